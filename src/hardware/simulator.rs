//! Simulated thermocycler.
//!
//! Mutates a private [`DeviceState`] with no I/O, no delay and no thermal lag:
//! a target reads back as the current temperature the instant it is set. Two
//! fresh instances driven by the same call sequence are indistinguishable at
//! every step, which is what the trace harness relies on.

use crate::error::DriverResult;
use crate::hardware::capabilities::{DriverFactory, ThermocyclerDriver};
use crate::hardware::types::{DeviceInfo, DeviceState, LidStatus, PlateTemperature, Temperature};
use crate::trace::{TraceRecorder, TracingDriver};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// =============================================================================
// Configuration
// =============================================================================

/// What deactivation does to stored targets.
///
/// Real hardware semantics here are unsettled, so the default keeps the targets
/// and only `ClearTargets` resets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationPolicy {
    /// Deactivation is a no-op on state
    #[default]
    Retain,
    /// Deactivation clears the targets it covers
    ClearTargets,
}

/// Configuration for [`SimulatingDriver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Reported serial number (default: "dummySerialTC")
    #[serde(default = "default_serial")]
    pub serial: String,

    /// Reported model (default: "dummyModelTC")
    #[serde(default = "default_model")]
    pub model: String,

    /// Reported firmware version (default: "dummyVersionTC")
    #[serde(default = "default_version")]
    pub version: String,

    /// Deactivation behavior (default: retain targets)
    #[serde(default)]
    pub deactivation: DeactivationPolicy,
}

fn default_serial() -> String {
    "dummySerialTC".to_string()
}

fn default_model() -> String {
    "dummyModelTC".to_string()
}

fn default_version() -> String {
    "dummyVersionTC".to_string()
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            serial: default_serial(),
            model: default_model(),
            version: default_version(),
            deactivation: DeactivationPolicy::default(),
        }
    }
}

impl SimulatorConfig {
    /// Identity record built from this config.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(&self.serial, &self.model, &self.version)
    }
}

// =============================================================================
// SimulatorFactory - DriverFactory implementation
// =============================================================================

/// Factory for fresh [`SimulatingDriver`] instances, each wrapped in a
/// [`TracingDriver`].
#[derive(Debug, Clone, Default)]
pub struct SimulatorFactory {
    config: SimulatorConfig,
}

impl SimulatorFactory {
    /// Factory using the default identity and policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory using a custom configuration.
    pub fn with_config(config: SimulatorConfig) -> Self {
        Self { config }
    }
}

impl DriverFactory for SimulatorFactory {
    fn driver_type(&self) -> &'static str {
        "thermocycler_simulator"
    }

    fn name(&self) -> &'static str {
        "Simulated Thermocycler"
    }

    fn build(
        &self,
        recorder: TraceRecorder,
    ) -> BoxFuture<'static, DriverResult<Box<dyn ThermocyclerDriver>>> {
        let config = self.config.clone();
        Box::pin(async move {
            let driver = SimulatingDriver::with_config(config);
            Ok(Box::new(TracingDriver::new(driver, recorder)) as Box<dyn ThermocyclerDriver>)
        })
    }
}

// =============================================================================
// SimulatingDriver
// =============================================================================

/// In-memory thermocycler.
///
/// # Example
///
/// ```rust,ignore
/// let driver = SimulatingDriver::new();
/// driver.set_plate_temperature(95.0, Some(30.0), None).await?;
/// assert_eq!(driver.get_plate_temperature().await?.current, 95.0);
/// ```
pub struct SimulatingDriver {
    /// Device state; one write guard per operation
    state: RwLock<DeviceState>,

    deactivation: DeactivationPolicy,
}

impl SimulatingDriver {
    /// Simulator with the default identity and policy.
    pub fn new() -> Self {
        Self::with_config(SimulatorConfig::default())
    }

    /// Simulator with a custom configuration.
    pub fn with_config(config: SimulatorConfig) -> Self {
        Self {
            state: RwLock::new(DeviceState::new(config.device_info())),
            deactivation: config.deactivation,
        }
    }

    /// Last ramp rate set. Not part of the contract's read set.
    pub async fn ramp_rate(&self) -> Option<f64> {
        self.state.read().await.ramp_rate()
    }

    /// Copy of the full internal state.
    pub async fn state(&self) -> DeviceState {
        self.state.read().await.clone()
    }
}

impl Default for SimulatingDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThermocyclerDriver for SimulatingDriver {
    async fn connect(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn open_lid(&self) -> DriverResult<()> {
        self.state.write().await.set_lid_status(LidStatus::Open);
        Ok(())
    }

    async fn close_lid(&self) -> DriverResult<()> {
        self.state.write().await.set_lid_status(LidStatus::Closed);
        Ok(())
    }

    async fn get_lid_status(&self) -> DriverResult<LidStatus> {
        Ok(self.state.read().await.lid_status())
    }

    async fn get_lid_temperature(&self) -> DriverResult<Temperature> {
        Ok(self.state.read().await.lid_temperature())
    }

    async fn set_plate_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        _volume: Option<f64>,
    ) -> DriverResult<()> {
        self.state.write().await.set_plate_target(temp, hold_time);
        Ok(())
    }

    async fn get_plate_temperature(&self) -> DriverResult<PlateTemperature> {
        Ok(self.state.read().await.plate_temperature())
    }

    async fn set_ramp_rate(&self, ramp_rate: f64) -> DriverResult<()> {
        self.state.write().await.set_ramp_rate(Some(ramp_rate));
        Ok(())
    }

    async fn set_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        ramp_rate: Option<f64>,
        _volume: Option<f64>,
    ) -> DriverResult<()> {
        let mut state = self.state.write().await;
        state.set_plate_target(temp, hold_time);
        state.set_ramp_rate(ramp_rate);
        Ok(())
    }

    async fn set_lid_temperature(&self, temp: Option<f64>) -> DriverResult<()> {
        self.state.write().await.set_lid_target(temp);
        Ok(())
    }

    async fn deactivate_lid(&self) -> DriverResult<()> {
        if self.deactivation == DeactivationPolicy::ClearTargets {
            self.state.write().await.set_lid_target(None);
        }
        Ok(())
    }

    async fn deactivate_block(&self) -> DriverResult<()> {
        if self.deactivation == DeactivationPolicy::ClearTargets {
            self.state.write().await.clear_plate_target();
        }
        Ok(())
    }

    async fn deactivate_all(&self) -> DriverResult<()> {
        if self.deactivation == DeactivationPolicy::ClearTargets {
            let mut state = self.state.write().await;
            state.set_lid_target(None);
            state.clear_plate_target();
        }
        Ok(())
    }

    async fn get_device_info(&self) -> DriverResult<DeviceInfo> {
        Ok(self.state.read().await.device_info().clone())
    }

    async fn enter_programming_mode(&self) -> DriverResult<()> {
        tracing::debug!("simulator: programming mode requested (no-op)");
        Ok(())
    }
}
