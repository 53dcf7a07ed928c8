//! Liquid-handling command records.
//!
//! Value objects a protocol engine fills in for aspirate/dispense style commands.
//! The only rule enforced here is the one every consumer relies on: a request or
//! result never carries a non-positive volume. Whether the ids point at real
//! pipettes and labware, and whether the volume fits the pipette, is up to the
//! engine dispatching the command ([`LiquidHandlingRequest::check_dispatch`]
//! bundles those checks for it).
//!
//! Wire field names are camelCase (`pipetteId`, `wellLocation`, ...). Deserialization
//! goes through the same constructor, so `{"volume": 0, ...}` fails to parse.

use crate::error::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};

fn check_volume(volume: f64) -> DriverResult<f64> {
    if volume.is_nan() || volume <= 0.0 {
        return Err(DriverError::InvalidArgument(format!(
            "volume must be greater than 0, got {}",
            volume
        )));
    }
    Ok(volume)
}

// =============================================================================
// Well addressing
// =============================================================================

/// Reference point inside a well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WellOrigin {
    /// Top of the well
    #[default]
    Top,
    /// Bottom of the well
    Bottom,
}

/// Offset from the origin in mm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WellOffset {
    /// X offset (mm)
    #[serde(default)]
    pub x: f64,
    /// Y offset (mm)
    #[serde(default)]
    pub y: f64,
    /// Z offset (mm)
    #[serde(default)]
    pub z: f64,
}

/// Position relative to a well.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WellLocation {
    /// Reference point
    #[serde(default)]
    pub origin: WellOrigin,
    /// Offset from `origin`
    #[serde(default)]
    pub offset: WellOffset,
}

/// Pipette, labware and well a command acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipettingTarget {
    /// Pipette to use
    pub pipette_id: String,
    /// Labware holding the well
    pub labware_id: String,
    /// Well within the labware (e.g. "A1")
    pub well_name: String,
}

impl PipettingTarget {
    /// Target from its three identifiers.
    pub fn new(
        pipette_id: impl Into<String>,
        labware_id: impl Into<String>,
        well_name: impl Into<String>,
    ) -> Self {
        Self {
            pipette_id: pipette_id.into(),
            labware_id: labware_id.into(),
            well_name: well_name.into(),
        }
    }
}

// =============================================================================
// Request / Result
// =============================================================================

/// Request to move liquid at a well. `volume` is in µL and always positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRequest", into = "RawRequest")]
pub struct LiquidHandlingRequest {
    target: PipettingTarget,
    volume: f64,
    well_location: WellLocation,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    #[serde(flatten)]
    target: PipettingTarget,
    volume: f64,
    #[serde(default)]
    well_location: WellLocation,
}

impl TryFrom<RawRequest> for LiquidHandlingRequest {
    type Error = DriverError;

    fn try_from(raw: RawRequest) -> DriverResult<Self> {
        Self::new(raw.target, raw.volume, raw.well_location)
    }
}

impl From<LiquidHandlingRequest> for RawRequest {
    fn from(request: LiquidHandlingRequest) -> Self {
        Self {
            target: request.target,
            volume: request.volume,
            well_location: request.well_location,
        }
    }
}

impl LiquidHandlingRequest {
    /// Build a request, rejecting `volume <= 0` (and NaN) with `InvalidArgument`.
    pub fn new(
        target: PipettingTarget,
        volume: f64,
        well_location: WellLocation,
    ) -> DriverResult<Self> {
        Ok(Self {
            target,
            volume: check_volume(volume)?,
            well_location,
        })
    }

    /// Pipette, labware and well.
    pub fn target(&self) -> &PipettingTarget {
        &self.target
    }

    /// Pipette id.
    pub fn pipette_id(&self) -> &str {
        &self.target.pipette_id
    }

    /// Labware id.
    pub fn labware_id(&self) -> &str {
        &self.target.labware_id
    }

    /// Well name.
    pub fn well_name(&self) -> &str {
        &self.target.well_name
    }

    /// Volume in µL.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Position within the well.
    pub fn well_location(&self) -> WellLocation {
        self.well_location
    }

    /// Checks the dispatching engine owns: non-empty ids and a volume the
    /// pipette can hold.
    pub fn check_dispatch(&self, max_volume: f64) -> DriverResult<()> {
        for (field, value) in [
            ("pipetteId", &self.target.pipette_id),
            ("labwareId", &self.target.labware_id),
            ("wellName", &self.target.well_name),
        ] {
            if value.trim().is_empty() {
                return Err(DriverError::InvalidArgument(format!("{} must not be empty", field)));
            }
        }
        if !max_volume.is_finite() || max_volume <= 0.0 {
            return Err(DriverError::InvalidArgument(format!(
                "pipette maximum must be a positive finite volume, got {}",
                max_volume
            )));
        }
        if self.volume > max_volume {
            return Err(DriverError::InvalidArgument(format!(
                "volume {} exceeds pipette maximum {}",
                self.volume, max_volume
            )));
        }
        Ok(())
    }
}

/// Volume actually handled by a completed command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResult", into = "RawResult")]
pub struct LiquidHandlingResult {
    volume: f64,
}

#[derive(Serialize, Deserialize)]
struct RawResult {
    volume: f64,
}

impl TryFrom<RawResult> for LiquidHandlingResult {
    type Error = DriverError;

    fn try_from(raw: RawResult) -> DriverResult<Self> {
        Self::new(raw.volume)
    }
}

impl From<LiquidHandlingResult> for RawResult {
    fn from(result: LiquidHandlingResult) -> Self {
        Self {
            volume: result.volume,
        }
    }
}

impl LiquidHandlingResult {
    /// Build a result, rejecting `volume <= 0` with `InvalidArgument`.
    pub fn new(volume: f64) -> DriverResult<Self> {
        Ok(Self {
            volume: check_volume(volume)?,
        })
    }

    /// Volume in µL.
    pub fn volume(&self) -> f64 {
        self.volume
    }
}
