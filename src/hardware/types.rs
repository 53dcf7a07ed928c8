//! Observable state of a thermocycler module.

use serde::{Deserialize, Serialize};

/// Whether the thermocycler lid is open or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LidStatus {
    /// Lid raised; plate accessible
    #[default]
    Open,
    /// Lid lowered onto the plate
    Closed,
}

impl std::fmt::Display for LidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LidStatus::Open => write!(f, "open"),
            LidStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Current/target snapshot of the lid heater.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Temperature {
    /// Reported temperature in °C
    pub current: f64,
    /// Target in °C, `None` when no target is set
    pub target: Option<f64>,
}

/// Current/target/hold snapshot of the sample block.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlateTemperature {
    /// Reported temperature in °C
    pub current: f64,
    /// Target in °C, `None` when no target is set
    pub target: Option<f64>,
    /// Hold time in seconds, `None` when not given
    pub hold: Option<f64>,
}

/// Identity record reported by a module. Fixed for the lifetime of a driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Serial number
    pub serial: String,
    /// Model identifier
    pub model: String,
    /// Firmware version
    pub version: String,
}

impl DeviceInfo {
    /// Create an identity record.
    pub fn new(
        serial: impl Into<String>,
        model: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            serial: serial.into(),
            model: model.into(),
            version: version.into(),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::new("dummySerialTC", "dummyModelTC", "dummyVersionTC")
    }
}

/// Authoritative in-memory state of one module.
///
/// Only targets are stored. The `current` values handed out by
/// [`plate_temperature`](Self::plate_temperature) and
/// [`lid_temperature`](Self::lid_temperature) are projections of the last target,
/// 0 when none has been set. An explicitly cleared target and a never-set target
/// read back the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    lid_status: LidStatus,
    plate_target: Option<f64>,
    plate_hold: Option<f64>,
    lid_target: Option<f64>,
    ramp_rate: Option<f64>,
    device_info: DeviceInfo,
}

impl DeviceState {
    /// Fresh state: lid open, no targets.
    pub fn new(device_info: DeviceInfo) -> Self {
        Self {
            lid_status: LidStatus::Open,
            plate_target: None,
            plate_hold: None,
            lid_target: None,
            ramp_rate: None,
            device_info,
        }
    }

    /// Current lid position.
    pub fn lid_status(&self) -> LidStatus {
        self.lid_status
    }

    /// Move the lid.
    pub fn set_lid_status(&mut self, status: LidStatus) {
        self.lid_status = status;
    }

    /// Block snapshot.
    pub fn plate_temperature(&self) -> PlateTemperature {
        PlateTemperature {
            current: self.plate_target.unwrap_or(0.0),
            target: self.plate_target,
            hold: self.plate_hold,
        }
    }

    /// Set the block target and hold time together.
    pub fn set_plate_target(&mut self, target: f64, hold: Option<f64>) {
        self.plate_target = Some(target);
        self.plate_hold = hold;
    }

    /// Drop the block target and hold time.
    pub fn clear_plate_target(&mut self) {
        self.plate_target = None;
        self.plate_hold = None;
    }

    /// Lid heater snapshot.
    pub fn lid_temperature(&self) -> Temperature {
        Temperature {
            current: self.lid_target.unwrap_or(0.0),
            target: self.lid_target,
        }
    }

    /// Set or clear the lid heater target.
    pub fn set_lid_target(&mut self, target: Option<f64>) {
        self.lid_target = target;
    }

    /// Last ramp rate set, if any.
    pub fn ramp_rate(&self) -> Option<f64> {
        self.ramp_rate
    }

    /// Set or clear the ramp rate.
    pub fn set_ramp_rate(&mut self, ramp_rate: Option<f64>) {
        self.ramp_rate = ramp_rate;
    }

    /// Identity record.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(DeviceInfo::default())
    }
}
