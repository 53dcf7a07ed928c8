//! Thermocycler hardware layer.
//!
//! - [`capabilities`]: the driver contract every backend implements
//! - [`types`]: device state and the records the contract returns
//! - [`simulator`]: in-memory reference driver
//! - [`gcode`], [`serial`], [`thermocycler`]: the serial driver and its wire protocol
//! - [`emulator`]: firmware emulator for running the serial driver without a device

pub mod capabilities;
pub mod emulator;
pub mod gcode;
pub mod serial;
pub mod simulator;
pub mod thermocycler;
pub mod types;

pub use capabilities::{DriverFactory, ThermocyclerDriver};
pub use emulator::{EmulatorConnector, ThermocyclerEmulator};
pub use serial::PortConnector;
pub use simulator::{DeactivationPolicy, SimulatingDriver, SimulatorConfig, SimulatorFactory};
pub use thermocycler::{SerialConfig, SerialDriver, SerialDriverFactory};
pub use types::{DeviceInfo, DeviceState, LidStatus, PlateTemperature, Temperature};
