//! # Lab Drivers
//!
//! Thermocycler driver abstraction with a deterministic simulator and a
//! command-trace harness for checking that protocol runs are reproducible.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the [`ThermocyclerDriver`](hardware::ThermocyclerDriver) contract,
//!   the in-memory simulator, the serial G-code driver and a firmware emulator.
//! - **`liquid_handling`**: validated request/result records for pipetting commands.
//! - **`trace`**: command-trace capture, the recording driver decorator, and
//!   trace comparison.
//! - **`harness`**: the protocol runner with determinism and cross-backend
//!   equivalence checks.
//! - **`config`**: Figment-based settings (TOML file plus environment).
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: the crate-wide [`DriverError`].
//!
//! ## Quick start
//!
//! ```no_run
//! use lab_drivers::harness::{Protocol, ProtocolRunner, ProtocolStep};
//! use lab_drivers::hardware::SimulatorFactory;
//! use std::sync::Arc;
//!
//! # async fn example() -> lab_drivers::DriverResult<()> {
//! let protocol = Protocol::new(
//!     "denature",
//!     vec![
//!         ProtocolStep::CloseLid,
//!         ProtocolStep::SetPlateTemperature { temp: 95.0, hold_time: Some(30.0), volume: None },
//!         ProtocolStep::GetPlateTemperature,
//!         ProtocolStep::OpenLid,
//!     ],
//! );
//!
//! let runner = ProtocolRunner::new(Arc::new(SimulatorFactory::new()));
//! let (run, _) = runner.verify_deterministic(&protocol).await?;
//! print!("{}", run.trace.to_text());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hardware;
pub mod harness;
pub mod liquid_handling;
pub mod logging;
pub mod trace;

pub use error::{DriverError, DriverResult};
