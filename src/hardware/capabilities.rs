//! Thermocycler Capability Contract
//!
//! [`ThermocyclerDriver`] is the single operation set that every thermocycler
//! implementation provides, whether it talks to a physical module over a serial
//! port ([`SerialDriver`](crate::hardware::thermocycler::SerialDriver)) or mutates
//! an in-memory model ([`SimulatingDriver`](crate::hardware::simulator::SimulatingDriver)).
//! Callers hold `Box<dyn ThermocyclerDriver>` and never name a concrete type, so the
//! harness can swap one for the other without code changes.
//!
//! # Design Philosophy
//!
//! - Every operation is async (uses #[async_trait]) and may suspend
//! - Every operation takes `&self`; implementations use interior mutability
//! - Each operation's state change is atomic from the caller's view
//! - Errors are [`DriverError`](crate::error::DriverError) and propagate unchanged
//!
//! # Connection Semantics
//!
//! A real driver rejects every operation except `connect`, `disconnect` and
//! `is_connected` with `NotConnected` while it has no port. The simulator has no
//! connection requirement and always reports connected.
//!
//! # Example
//!
//! ```rust,no_run
//! use lab_drivers::hardware::{LidStatus, SimulatingDriver, ThermocyclerDriver};
//!
//! # async fn example() -> lab_drivers::DriverResult<()> {
//! let driver: Box<dyn ThermocyclerDriver> = Box::new(SimulatingDriver::new());
//! driver.connect().await?;
//! driver.close_lid().await?;
//! driver.set_plate_temperature(95.0, Some(30.0), None).await?;
//! assert_eq!(driver.get_lid_status().await?, LidStatus::Closed);
//! driver.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::DriverResult;
use crate::hardware::types::{DeviceInfo, LidStatus, PlateTemperature, Temperature};
use crate::trace::TraceRecorder;
use async_trait::async_trait;
use futures::future::BoxFuture;

/// Capability: Thermocycler Control
///
/// Lid control, block and lid heater control, deactivation, and introspection.
///
/// # Contract
/// - `open_lid` / `close_lid` are idempotent
/// - Reads are pure; they never change state
/// - `volume` arguments are tuning hints and never appear in read-back state
/// - `set_temperature` leaves the same state as `set_plate_temperature` followed
///   by `set_ramp_rate` with the same arguments
/// - `get_device_info` is stable for the life of the instance
#[async_trait]
pub trait ThermocyclerDriver: Send + Sync {
    /// Establish readiness.
    async fn connect(&self) -> DriverResult<()>;

    /// Tear down readiness and release any buffered instructions.
    async fn disconnect(&self) -> DriverResult<()>;

    /// Report readiness. Never fails.
    async fn is_connected(&self) -> bool;

    /// Raise the lid.
    async fn open_lid(&self) -> DriverResult<()>;

    /// Lower the lid.
    async fn close_lid(&self) -> DriverResult<()>;

    /// Current lid position.
    async fn get_lid_status(&self) -> DriverResult<LidStatus>;

    /// Lid heater snapshot.
    async fn get_lid_temperature(&self) -> DriverResult<Temperature>;

    /// Set the block target.
    ///
    /// # Arguments
    /// * `temp` - Target in °C
    /// * `hold_time` - Seconds to hold once reached; `None` clears any previous hold
    /// * `volume` - Sample volume in µL, a ramp tuning hint only
    async fn set_plate_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        volume: Option<f64>,
    ) -> DriverResult<()>;

    /// Block snapshot.
    async fn get_plate_temperature(&self) -> DriverResult<PlateTemperature>;

    /// Set the block ramp rate in °C/s.
    async fn set_ramp_rate(&self, ramp_rate: f64) -> DriverResult<()>;

    /// Combined block setter: target, hold, and ramp rate in one call.
    async fn set_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        ramp_rate: Option<f64>,
        volume: Option<f64>,
    ) -> DriverResult<()>;

    /// Set the lid heater target, or clear it with `None`.
    async fn set_lid_temperature(&self, temp: Option<f64>) -> DriverResult<()>;

    /// Stop the lid heater.
    async fn deactivate_lid(&self) -> DriverResult<()>;

    /// Stop block heating/cooling.
    async fn deactivate_block(&self) -> DriverResult<()>;

    /// Stop everything.
    async fn deactivate_all(&self) -> DriverResult<()>;

    /// Identity record.
    async fn get_device_info(&self) -> DriverResult<DeviceInfo>;

    /// Move the module toward firmware-update mode.
    async fn enter_programming_mode(&self) -> DriverResult<()>;
}

/// Factory that produces fresh, independent driver instances.
///
/// The harness calls [`build`](Self::build) once per run. Implementations must
/// never hand out a shared or pooled instance: two builds share no state.
///
/// The recorder passed to `build` belongs to the run being started. Drivers that
/// only know their calls get wrapped in a
/// [`TracingDriver`](crate::trace::TracingDriver); drivers that emit literal
/// instructions write those into the recorder themselves.
pub trait DriverFactory: Send + Sync + 'static {
    /// Short machine name (e.g. "thermocycler_simulator").
    fn driver_type(&self) -> &'static str;

    /// Human-readable name for logs and error messages.
    fn name(&self) -> &'static str;

    /// Create a new driver that records into `recorder`.
    fn build(
        &self,
        recorder: TraceRecorder,
    ) -> BoxFuture<'static, DriverResult<Box<dyn ThermocyclerDriver>>>;
}
