//! Protocol Runner and Equivalence Harness
//!
//! Runs a [`Protocol`] against a fresh driver from a [`DriverFactory`], capturing
//! the command trace and the values returned by read steps, then throws the
//! driver away. Nothing survives from one run to the next except what the
//! returned [`CompletedRun`] holds.
//!
//! # Run State Machine
//!
//! ```text
//! ┌──────┐  build  ┌────────────┐ connect ┌──────────────┐
//! │ Idle │────────▶│ Connecting │────────▶│ Running(N)   │
//! └──────┘         └─────┬──────┘         └──────┬───────┘
//!                        │ error                 │ last step / error
//!                        ▼                       ▼
//!                  ┌──────────┐  disconnect ┌──────┐
//!                  │ Teardown │────────────▶│ Done │
//!                  └──────────┘             └──────┘
//! ```
//!
//! Teardown always runs. A failing step is not retried; its error is returned
//! unchanged after the driver is disconnected and dropped.
//!
//! # Usage
//!
//! ```rust,ignore
//! let runner = ProtocolRunner::new(Arc::new(SimulatorFactory::new()));
//! let protocol = Protocol::from_toml_str(PCR_TOML)?;
//!
//! // Two fresh instances, identical traces or a TraceMismatch error
//! let (first, _second) = runner.verify_deterministic(&protocol).await?;
//! println!("{}", first.trace.to_text());
//! ```

use crate::error::{DriverError, DriverResult};
use crate::hardware::capabilities::{DriverFactory, ThermocyclerDriver};
use crate::hardware::types::{DeviceInfo, LidStatus, PlateTemperature, Temperature};
use crate::trace::{compare_traces, CommandTrace, TraceRecorder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Protocol definition
// =============================================================================

/// One protocol step. Connection lifecycle belongs to the runner, so there are
/// no connect/disconnect steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ProtocolStep {
    /// Open the lid
    OpenLid,
    /// Close the lid
    CloseLid,
    /// Read lid status
    GetLidStatus,
    /// Read lid temperature
    GetLidTemperature,
    /// Set block target
    SetPlateTemperature {
        /// Target (°C)
        temp: f64,
        /// Hold time (s)
        #[serde(default)]
        hold_time: Option<f64>,
        /// Sample volume hint (µL)
        #[serde(default)]
        volume: Option<f64>,
    },
    /// Read block temperature
    GetPlateTemperature,
    /// Set ramp rate
    SetRampRate {
        /// Rate (°C/s)
        ramp_rate: f64,
    },
    /// Set block target and ramp rate together
    SetTemperature {
        /// Target (°C)
        temp: f64,
        /// Hold time (s)
        #[serde(default)]
        hold_time: Option<f64>,
        /// Rate (°C/s)
        #[serde(default)]
        ramp_rate: Option<f64>,
        /// Sample volume hint (µL)
        #[serde(default)]
        volume: Option<f64>,
    },
    /// Set or clear the lid target
    SetLidTemperature {
        /// Target (°C); absent clears it
        #[serde(default)]
        temp: Option<f64>,
    },
    /// Stop the lid heater
    DeactivateLid,
    /// Stop the block
    DeactivateBlock,
    /// Stop lid and block
    DeactivateAll,
    /// Read identity
    GetDeviceInfo,
    /// Enter firmware programming mode
    EnterProgrammingMode,
}

impl ProtocolStep {
    /// Issue this step. Read steps return what they read.
    async fn execute(&self, driver: &dyn ThermocyclerDriver) -> DriverResult<Option<Reading>> {
        match *self {
            Self::OpenLid => driver.open_lid().await.map(|_| None),
            Self::CloseLid => driver.close_lid().await.map(|_| None),
            Self::GetLidStatus => driver.get_lid_status().await.map(|s| Some(Reading::LidStatus(s))),
            Self::GetLidTemperature => driver
                .get_lid_temperature()
                .await
                .map(|t| Some(Reading::LidTemperature(t))),
            Self::SetPlateTemperature {
                temp,
                hold_time,
                volume,
            } => driver
                .set_plate_temperature(temp, hold_time, volume)
                .await
                .map(|_| None),
            Self::GetPlateTemperature => driver
                .get_plate_temperature()
                .await
                .map(|t| Some(Reading::PlateTemperature(t))),
            Self::SetRampRate { ramp_rate } => driver.set_ramp_rate(ramp_rate).await.map(|_| None),
            Self::SetTemperature {
                temp,
                hold_time,
                ramp_rate,
                volume,
            } => driver
                .set_temperature(temp, hold_time, ramp_rate, volume)
                .await
                .map(|_| None),
            Self::SetLidTemperature { temp } => driver.set_lid_temperature(temp).await.map(|_| None),
            Self::DeactivateLid => driver.deactivate_lid().await.map(|_| None),
            Self::DeactivateBlock => driver.deactivate_block().await.map(|_| None),
            Self::DeactivateAll => driver.deactivate_all().await.map(|_| None),
            Self::GetDeviceInfo => driver
                .get_device_info()
                .await
                .map(|info| Some(Reading::DeviceInfo(info))),
            Self::EnterProgrammingMode => driver.enter_programming_mode().await.map(|_| None),
        }
    }
}

/// Named, ordered list of steps.
///
/// ```toml
/// name = "denature"
///
/// [[steps]]
/// command = "close_lid"
///
/// [[steps]]
/// command = "set_plate_temperature"
/// temp = 95.0
/// hold_time = 30.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Protocol {
    /// Protocol name, used in logs and mismatch reports
    pub name: String,
    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<ProtocolStep>,
}

impl Protocol {
    /// Protocol from in-memory steps.
    pub fn new(name: impl Into<String>, steps: Vec<ProtocolStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Parse a TOML protocol.
    pub fn from_toml_str(text: &str) -> DriverResult<Self> {
        toml::from_str(text)
            .map_err(|e| DriverError::Configuration(format!("invalid protocol TOML: {}", e)))
    }

    /// Parse a JSON protocol.
    pub fn from_json_str(text: &str) -> DriverResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| DriverError::Configuration(format!("invalid protocol JSON: {}", e)))
    }

    /// Load a protocol file; `.json` is read as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> DriverResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }
}

// =============================================================================
// Run results
// =============================================================================

/// Runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Nothing built yet
    Idle,
    /// Driver built, connecting
    Connecting,
    /// Executing steps
    Running {
        /// Number of protocol steps
        steps: usize,
    },
    /// Disconnecting and dropping the driver
    Teardown,
    /// Driver gone, trace sealed
    Done,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Connecting => write!(f, "connecting"),
            RunPhase::Running { steps } => write!(f, "running({} ops)", steps),
            RunPhase::Teardown => write!(f, "teardown"),
            RunPhase::Done => write!(f, "done"),
        }
    }
}

/// Value returned by a read step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reading {
    /// From `get_lid_status`
    LidStatus(LidStatus),
    /// From `get_lid_temperature`
    LidTemperature(Temperature),
    /// From `get_plate_temperature`
    PlateTemperature(PlateTemperature),
    /// From `get_device_info`
    DeviceInfo(DeviceInfo),
}

/// A reading tagged with the step that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Index of the step in the protocol
    pub step: usize,
    /// What the step read
    pub reading: Reading,
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct CompletedRun {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Protocol name
    pub protocol: String,
    /// Every instruction issued, in order
    pub trace: CommandTrace,
    /// Values returned by read steps
    pub observations: Vec<Observation>,
    /// States visited, in order
    pub phases: Vec<RunPhase>,
}

// =============================================================================
// ProtocolRunner
// =============================================================================

/// Runs protocols against fresh drivers.
#[derive(Clone)]
pub struct ProtocolRunner {
    factory: Arc<dyn DriverFactory>,
}

impl ProtocolRunner {
    /// Runner building drivers from `factory`.
    pub fn new(factory: Arc<dyn DriverFactory>) -> Self {
        Self { factory }
    }

    /// Driver type this runner builds.
    pub fn driver_type(&self) -> &'static str {
        self.factory.driver_type()
    }

    /// Run `protocol` once against a fresh driver.
    #[instrument(skip(self, protocol), fields(protocol = %protocol.name, driver = self.factory.driver_type()))]
    pub async fn run(&self, protocol: &Protocol) -> DriverResult<CompletedRun> {
        let run_id = Uuid::new_v4();
        let recorder = TraceRecorder::new();
        let mut phases = vec![RunPhase::Idle];

        let driver = self.factory.build(recorder.clone()).await?;

        phases.push(RunPhase::Connecting);
        let outcome = match driver.connect().await {
            Ok(()) => {
                phases.push(RunPhase::Running {
                    steps: protocol.steps.len(),
                });
                execute_steps(driver.as_ref(), protocol).await
            }
            Err(e) => Err(e),
        };

        phases.push(RunPhase::Teardown);
        let teardown = driver.disconnect().await;
        drop(driver);
        let trace = recorder.finish();
        phases.push(RunPhase::Done);

        let observations = outcome.inspect_err(|e| warn!(%run_id, error = %e, "protocol step failed"))?;
        teardown?;

        info!(%run_id, entries = trace.len(), "protocol run complete");
        Ok(CompletedRun {
            run_id,
            protocol: protocol.name.clone(),
            trace,
            observations,
            phases,
        })
    }

    /// Run `protocol` twice on fresh instances and require identical traces.
    pub async fn verify_deterministic(
        &self,
        protocol: &Protocol,
    ) -> DriverResult<(CompletedRun, CompletedRun)> {
        let first = self.run(protocol).await?;
        let second = self.run(protocol).await?;
        compare_traces(&protocol.name, &first.trace, &second.trace)
            .map_err(|m| DriverError::TraceMismatch(Box::new(m)))?;
        debug!(protocol = %protocol.name, entries = first.trace.len(), "traces match");
        Ok((first, second))
    }

    /// Run `protocol` here and on `other` and require identical readings.
    ///
    /// Traces are not compared: different backends record different entry
    /// shapes (calls vs. literal G-code).
    pub async fn verify_equivalent(
        &self,
        other: &ProtocolRunner,
        protocol: &Protocol,
    ) -> DriverResult<(CompletedRun, CompletedRun)> {
        let left = self.run(protocol).await?;
        let right = other.run(protocol).await?;
        compare_observations(&left.observations, &right.observations)?;
        debug!(
            protocol = %protocol.name,
            left = self.driver_type(),
            right = other.driver_type(),
            "observations match"
        );
        Ok((left, right))
    }
}

async fn execute_steps(
    driver: &dyn ThermocyclerDriver,
    protocol: &Protocol,
) -> DriverResult<Vec<Observation>> {
    let mut observations = Vec::new();
    for (step, command) in protocol.steps.iter().enumerate() {
        debug!(step, ?command, "executing step");
        if let Some(reading) = command.execute(driver).await? {
            observations.push(Observation { step, reading });
        }
    }
    Ok(observations)
}

fn compare_observations(left: &[Observation], right: &[Observation]) -> DriverResult<()> {
    let show = |o: Option<&Observation>| match o {
        Some(o) => format!("{:?}", o.reading),
        None => "<none>".to_string(),
    };
    let len = left.len().max(right.len());
    for i in 0..len {
        let (l, r) = (left.get(i), right.get(i));
        if l != r {
            let index = l.or(r).map_or(i, |o| o.step);
            return Err(DriverError::ObservationMismatch {
                index,
                left: show(l),
                right: show(r),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatorFactory;

    fn runner() -> ProtocolRunner {
        ProtocolRunner::new(Arc::new(SimulatorFactory::new()))
    }

    #[test]
    fn parses_toml_protocol() {
        let protocol = Protocol::from_toml_str(
            r#"
            name = "denature"

            [[steps]]
            command = "close_lid"

            [[steps]]
            command = "set_plate_temperature"
            temp = 95.0
            hold_time = 30.0

            [[steps]]
            command = "set_lid_temperature"
            "#,
        )
        .unwrap();

        assert_eq!(protocol.name, "denature");
        assert_eq!(
            protocol.steps,
            vec![
                ProtocolStep::CloseLid,
                ProtocolStep::SetPlateTemperature {
                    temp: 95.0,
                    hold_time: Some(30.0),
                    volume: None
                },
                ProtocolStep::SetLidTemperature { temp: None },
            ]
        );
    }

    #[test]
    fn parses_json_protocol() {
        let protocol = Protocol::from_json_str(
            r#"{"name": "ramp", "steps": [{"command": "set_ramp_rate", "ramp_rate": 2.5}]}"#,
        )
        .unwrap();
        assert_eq!(protocol.steps, vec![ProtocolStep::SetRampRate { ramp_rate: 2.5 }]);
    }

    #[test]
    fn rejects_unknown_command() {
        let err = Protocol::from_json_str(r#"{"name": "x", "steps": [{"command": "home"}]}"#)
            .unwrap_err();
        assert!(matches!(err, DriverError::Configuration(_)));
    }

    #[test]
    fn phase_display() {
        assert_eq!(RunPhase::Running { steps: 4 }.to_string(), "running(4 ops)");
        assert_eq!(RunPhase::Teardown.to_string(), "teardown");
    }

    #[tokio::test]
    async fn run_visits_every_phase() {
        let protocol = Protocol::new("lid", vec![ProtocolStep::CloseLid, ProtocolStep::GetLidStatus]);
        let run = runner().run(&protocol).await.unwrap();

        assert_eq!(
            run.phases,
            vec![
                RunPhase::Idle,
                RunPhase::Connecting,
                RunPhase::Running { steps: 2 },
                RunPhase::Teardown,
                RunPhase::Done,
            ]
        );
        assert_eq!(
            run.observations,
            vec![Observation {
                step: 1,
                reading: Reading::LidStatus(LidStatus::Closed)
            }]
        );
    }

    #[tokio::test]
    async fn empty_protocol_records_only_lifecycle() {
        let run = runner().run(&Protocol::new("empty", vec![])).await.unwrap();
        assert_eq!(run.trace.to_text(), "connect\ndisconnect\n");
        assert!(run.observations.is_empty());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn logs_run_completion() {
        runner()
            .run(&Protocol::new("logged", vec![ProtocolStep::OpenLid]))
            .await
            .unwrap();
        assert!(logs_contain("protocol run complete"));
    }

    #[test]
    fn observation_mismatch_reports_step() {
        let left = vec![Observation {
            step: 3,
            reading: Reading::LidStatus(LidStatus::Open),
        }];
        let right = vec![Observation {
            step: 3,
            reading: Reading::LidStatus(LidStatus::Closed),
        }];
        assert!(matches!(
            compare_observations(&left, &right),
            Err(DriverError::ObservationMismatch { index: 3, .. })
        ));
        assert!(compare_observations(&left, &left).is_ok());
        assert!(compare_observations(&left, &[]).is_err());
    }
}
