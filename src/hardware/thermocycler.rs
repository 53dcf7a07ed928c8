//! Serial Thermocycler Driver
//!
//! Speaks the G-code subset in [`gcode`](crate::hardware::gcode) over any port a
//! [`PortConnector`] hands out. One request/response exchange holds the port lock
//! from write to read, so no other call can interleave a partial exchange.
//!
//! Every line written to the port is also recorded verbatim when the driver has a
//! [`TraceRecorder`], which is how literal instruction traces are captured.
//!
//! # Connection lifecycle
//!
//! ```text
//! ┌──────────────┐  connect()   ┌───────────┐
//! │ Disconnected │─────────────▶│ Connected │
//! └──────────────┘              └─────┬─────┘
//!        ▲                            │
//!        │  disconnect() / dfu /      │
//!        │  reply timeout / EOF       │
//!        └────────────────────────────┘
//! ```
//!
//! While disconnected every operation but `connect`, `disconnect` and
//! `is_connected` fails with `NotConnected`. Entering programming mode drops the
//! port, so a reconnect is required afterwards.
//!
//! A reply that misses its deadline may still arrive later. The driver does not
//! try to resynchronise: it discards pending input, drops the port and returns
//! `Timeout`, so the late line can never be taken as the answer to the next
//! command. Callers reconnect to continue.

use crate::error::{DriverError, DriverResult};
use crate::hardware::capabilities::{DriverFactory, ThermocyclerDriver};
use crate::hardware::emulator::EmulatorConnector;
use crate::hardware::gcode::{self, GCode, GCodeCommand, TERMINATOR};
use crate::hardware::serial::{discard_pending, BufferedPort, PortConnector};
use crate::hardware::simulator::SimulatorConfig;
use crate::hardware::types::{DeviceInfo, LidStatus, PlateTemperature, Temperature};
use crate::trace::{TraceEntry, TraceRecorder};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::instrument;

const DRIVER_TYPE: &str = "thermocycler_serial";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`SerialDriver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0")
    pub port: String,

    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Response timeout per command (default: 5s)
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Quiet period that ends discarding stale input when the port is released (default: 50ms)
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_drain_timeout() -> Duration {
    Duration::from_millis(50)
}

impl SerialConfig {
    /// Config for `port` with default timing.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            timeout: default_timeout(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

// =============================================================================
// SerialDriverFactory - DriverFactory implementation
// =============================================================================

/// Where a factory gets ports from.
#[derive(Debug, Clone)]
enum PortSource {
    /// Physical device via tokio-serial
    #[cfg(feature = "serial")]
    Device(SerialConfig),
    /// Fresh firmware emulator per driver
    Emulated {
        device: SimulatorConfig,
        timeout: Duration,
        drain_timeout: Duration,
    },
}

/// Factory for [`SerialDriver`] instances.
///
/// Each build gets its own connector. For the emulated source this means each
/// driver talks to its own emulator with fresh device state.
#[derive(Debug, Clone)]
pub struct SerialDriverFactory {
    source: PortSource,
}

impl SerialDriverFactory {
    /// Drivers for a physical module.
    #[cfg(feature = "serial")]
    pub fn new(config: SerialConfig) -> Self {
        Self {
            source: PortSource::Device(config),
        }
    }

    /// Drivers talking to an in-process firmware emulator.
    pub fn emulated(device: SimulatorConfig) -> Self {
        Self {
            source: PortSource::Emulated {
                device,
                timeout: default_timeout(),
                drain_timeout: default_drain_timeout(),
            },
        }
    }
}

impl DriverFactory for SerialDriverFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Serial Thermocycler"
    }

    fn build(
        &self,
        recorder: TraceRecorder,
    ) -> BoxFuture<'static, DriverResult<Box<dyn ThermocyclerDriver>>> {
        let source = self.source.clone();
        Box::pin(async move {
            let driver = match source {
                #[cfg(feature = "serial")]
                PortSource::Device(config) => {
                    let connector = crate::hardware::serial::SerialPortConnector::new(
                        &config.port,
                        config.baud_rate,
                    );
                    SerialDriver::new(Arc::new(connector))
                        .with_timeout(config.timeout)
                        .with_drain_timeout(config.drain_timeout)
                }
                PortSource::Emulated {
                    device,
                    timeout,
                    drain_timeout,
                } => SerialDriver::new(Arc::new(EmulatorConnector::new(device)))
                    .with_timeout(timeout)
                    .with_drain_timeout(drain_timeout),
            };
            Ok(Box::new(driver.with_recorder(recorder)) as Box<dyn ThermocyclerDriver>)
        })
    }
}

// =============================================================================
// SerialDriver
// =============================================================================

/// Thermocycler driver over a line-oriented serial port.
pub struct SerialDriver {
    connector: Arc<dyn PortConnector>,
    /// Open port; `None` while disconnected
    port: Mutex<Option<BufferedPort>>,
    timeout: Duration,
    drain_timeout: Duration,
    recorder: Option<TraceRecorder>,
}

impl SerialDriver {
    /// Driver that opens ports through `connector`. Starts disconnected.
    pub fn new(connector: Arc<dyn PortConnector>) -> Self {
        Self {
            connector,
            port: Mutex::new(None),
            timeout: default_timeout(),
            drain_timeout: default_drain_timeout(),
            recorder: None,
        }
    }

    /// Set the per-command response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the quiet period used when discarding stale input.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Record every written line into `recorder`.
    pub fn with_recorder(mut self, recorder: TraceRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Write one command and read its response line.
    async fn exchange(&self, command: &GCodeCommand) -> DriverResult<String> {
        let mut slot = self.port.lock().await;
        self.exchange_on(&mut slot, command).await
    }

    /// [`exchange`](Self::exchange) on a port slot the caller already holds.
    ///
    /// A missed deadline or EOF releases the port before the error is returned.
    async fn exchange_on(
        &self,
        slot: &mut Option<BufferedPort>,
        command: &GCodeCommand,
    ) -> DriverResult<String> {
        let port = slot
            .as_mut()
            .ok_or_else(|| DriverError::not_connected(DRIVER_TYPE))?;

        let line = command.to_string();
        if let Some(recorder) = &self.recorder {
            recorder.record(TraceEntry::instruction(&line));
        }

        port.get_mut()
            .write_all(format!("{}{}", line, TERMINATOR).as_bytes())
            .await?;
        port.get_mut().flush().await?;

        let mut response = String::new();
        let read = match tokio::time::timeout(self.timeout, port.read_line(&mut response)).await {
            Ok(read) => read,
            Err(_) => {
                let discarded = self.release(slot).await;
                tracing::warn!(command = %line, discarded, "no reply in time; port released");
                return Err(DriverError::Timeout(line));
            }
        };
        match read {
            Ok(0) => {
                self.release(slot).await;
                return Err(DriverError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("port closed while waiting for response to '{}'", line),
                )));
            }
            Ok(_) => {}
            Err(e) => {
                self.release(slot).await;
                return Err(e.into());
            }
        }

        let response = response.trim_end_matches(['\r', '\n']).to_string();
        tracing::debug!(command = %line, response = %response, "thermocycler exchange");
        Ok(response)
    }

    async fn send(&self, command: GCodeCommand) -> DriverResult<()> {
        let mut slot = self.port.lock().await;
        self.send_on(&mut slot, command).await
    }

    async fn send_on(&self, slot: &mut Option<BufferedPort>, command: GCodeCommand) -> DriverResult<()> {
        let response = self.exchange_on(slot, &command).await?;
        gcode::parse_ack(&command, &response)
    }

    /// Take the port out of `slot`, discarding its unread input.
    async fn release(&self, slot: &mut Option<BufferedPort>) -> usize {
        match slot.take() {
            Some(mut port) => discard_pending(&mut port, self.drain_timeout).await,
            None => 0,
        }
    }

    async fn release_port(&self) -> usize {
        let mut slot = self.port.lock().await;
        self.release(&mut slot).await
    }
}

#[async_trait]
impl ThermocyclerDriver for SerialDriver {
    #[instrument(skip(self), fields(port = %self.connector.describe()))]
    async fn connect(&self) -> DriverResult<()> {
        let mut guard = self.port.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let port = self.connector.open().await?;
        *guard = Some(BufReader::new(port));
        tracing::info!("thermocycler connected");
        Ok(())
    }

    #[instrument(skip(self), fields(port = %self.connector.describe()))]
    async fn disconnect(&self) -> DriverResult<()> {
        let discarded = self.release_port().await;
        if discarded > 0 {
            tracing::debug!(discarded, "discarded stale bytes on disconnect");
        }
        tracing::info!("thermocycler disconnected");
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.port.lock().await.is_some()
    }

    async fn open_lid(&self) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::OpenLid)).await
    }

    async fn close_lid(&self) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::CloseLid)).await
    }

    async fn get_lid_status(&self) -> DriverResult<LidStatus> {
        let command = GCodeCommand::new(GCode::GetLidStatus);
        let response = self.exchange(&command).await?;
        gcode::parse_lid_status(&command, &response)
    }

    async fn get_lid_temperature(&self) -> DriverResult<Temperature> {
        let command = GCodeCommand::new(GCode::GetLidTemperature);
        let response = self.exchange(&command).await?;
        gcode::parse_lid_temperature(&command, &response)
    }

    async fn set_plate_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        volume: Option<f64>,
    ) -> DriverResult<()> {
        self.send(
            GCodeCommand::new(GCode::SetPlateTemperature)
                .param('S', temp)
                .optional_param('H', hold_time)
                .optional_param('V', volume),
        )
        .await
    }

    async fn get_plate_temperature(&self) -> DriverResult<PlateTemperature> {
        let command = GCodeCommand::new(GCode::GetPlateTemperature);
        let response = self.exchange(&command).await?;
        gcode::parse_plate_temperature(&command, &response)
    }

    async fn set_ramp_rate(&self, ramp_rate: f64) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::SetRampRate).param('S', ramp_rate))
            .await
    }

    /// `M566` then `M104` under one port lock, so no other call runs between
    /// them.
    ///
    /// The firmware has no way to apply both as one unit. If `M104` is rejected
    /// after `M566` was accepted, the new ramp rate stays in effect and the `M104`
    /// error is returned unchanged.
    async fn set_temperature(
        &self,
        temp: f64,
        hold_time: Option<f64>,
        ramp_rate: Option<f64>,
        volume: Option<f64>,
    ) -> DriverResult<()> {
        let mut slot = self.port.lock().await;
        // Firmware keeps its previous ramp rate when none is sent.
        if let Some(rate) = ramp_rate {
            self.send_on(&mut slot, GCodeCommand::new(GCode::SetRampRate).param('S', rate))
                .await?;
        }
        self.send_on(
            &mut slot,
            GCodeCommand::new(GCode::SetPlateTemperature)
                .param('S', temp)
                .optional_param('H', hold_time)
                .optional_param('V', volume),
        )
        .await
    }

    async fn set_lid_temperature(&self, temp: Option<f64>) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::SetLidTemperature).optional_param('S', temp))
            .await
    }

    async fn deactivate_lid(&self) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::DeactivateLid)).await
    }

    async fn deactivate_block(&self) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::DeactivateBlock)).await
    }

    async fn deactivate_all(&self) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::DeactivateAll)).await
    }

    async fn get_device_info(&self) -> DriverResult<DeviceInfo> {
        let command = GCodeCommand::new(GCode::DeviceInfo);
        let response = self.exchange(&command).await?;
        gcode::parse_device_info(&command, &response)
    }

    #[instrument(skip(self))]
    async fn enter_programming_mode(&self) -> DriverResult<()> {
        self.send(GCodeCommand::new(GCode::EnterProgrammingMode))
            .await?;
        self.release_port().await;
        tracing::warn!("thermocycler entered programming mode; reconnect required");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::serial::DynSerial;
    use std::collections::VecDeque;
    use tokio::io::{AsyncBufReadExt, DuplexStream};

    /// Hands out prepared ports in order, then fails.
    struct PreparedPort(std::sync::Mutex<VecDeque<DynSerial>>);

    impl PreparedPort {
        fn new(port: DuplexStream) -> Arc<Self> {
            Self::sequence(vec![port])
        }

        fn sequence(ports: Vec<DuplexStream>) -> Arc<Self> {
            let ports = ports.into_iter().map(|p| Box::new(p) as DynSerial).collect();
            Arc::new(Self(std::sync::Mutex::new(ports)))
        }
    }

    #[async_trait]
    impl PortConnector for PreparedPort {
        async fn open(&self) -> DriverResult<DynSerial> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| DriverError::Configuration("no ports left".into()))
        }

        fn describe(&self) -> String {
            "duplex".into()
        }
    }

    /// Reply to each incoming line with the next canned response.
    fn script_device(host: DuplexStream, responses: Vec<&'static str>) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(host);
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            for response in responses {
                let Ok(Some(line)) = lines.next_line().await else {
                    break;
                };
                seen.push(line);
                write
                    .write_all(format!("{}\r\n", response).as_bytes())
                    .await
                    .unwrap();
            }
            seen
        })
    }

    #[tokio::test]
    async fn operations_fail_before_connect() {
        let (_host, device) = tokio::io::duplex(256);
        let driver = SerialDriver::new(PreparedPort::new(device));

        assert!(!driver.is_connected().await);
        let err = driver.open_lid().await.unwrap_err();
        assert!(matches!(err, DriverError::NotConnected { .. }));
        assert!(matches!(
            driver.get_plate_temperature().await,
            Err(DriverError::NotConnected { .. })
        ));
    }

    #[tokio::test]
    async fn disconnect_when_never_connected_is_ok() {
        let (_host, device) = tokio::io::duplex(256);
        let driver = SerialDriver::new(PreparedPort::new(device));
        driver.disconnect().await.unwrap();
        assert!(!driver.is_connected().await);
    }

    #[tokio::test]
    async fn writes_gcode_and_parses_responses() {
        let (host, device) = tokio::io::duplex(256);
        let device_task = script_device(host, vec!["ok", "ok", "T:95 C:95 H:30", "Lid:closed"]);

        let driver = SerialDriver::new(PreparedPort::new(device));
        driver.connect().await.unwrap();
        driver.close_lid().await.unwrap();
        driver
            .set_plate_temperature(95.0, Some(30.0), Some(50.0))
            .await
            .unwrap();
        let plate = driver.get_plate_temperature().await.unwrap();
        let lid = driver.get_lid_status().await.unwrap();
        driver.disconnect().await.unwrap();

        assert_eq!(plate.target, Some(95.0));
        assert_eq!(plate.hold, Some(30.0));
        assert_eq!(lid, LidStatus::Closed);
        assert_eq!(
            device_task.await.unwrap(),
            vec!["M127", "M104 S95 H30 V50", "M105", "M119"]
        );
    }

    #[tokio::test]
    async fn records_literal_instructions() {
        let (host, device) = tokio::io::duplex(256);
        let _device_task = script_device(host, vec!["ok", "ok", "ok"]);

        let recorder = TraceRecorder::new();
        let driver = SerialDriver::new(PreparedPort::new(device)).with_recorder(recorder.clone());
        driver.connect().await.unwrap();
        driver.set_temperature(60.0, None, Some(2.0), None).await.unwrap();
        driver.set_lid_temperature(None).await.unwrap();

        assert_eq!(recorder.finish().to_text(), "M566 S2\nM104 S60\nM140\n");
    }

    #[tokio::test]
    async fn device_error_line_surfaces_as_hardware_error() {
        let (host, device) = tokio::io::duplex(256);
        let _device_task = script_device(host, vec!["ERR003:lid motor stalled"]);

        let driver = SerialDriver::new(PreparedPort::new(device));
        driver.connect().await.unwrap();
        assert!(matches!(
            driver.open_lid().await,
            Err(DriverError::Hardware(_))
        ));
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let (_host, device) = tokio::io::duplex(256);
        let driver = SerialDriver::new(PreparedPort::new(device))
            .with_timeout(Duration::from_millis(20));
        driver.connect().await.unwrap();
        assert!(matches!(
            driver.close_lid().await,
            Err(DriverError::Timeout(_))
        ));
        assert!(!driver.is_connected().await);
    }

    #[tokio::test]
    async fn late_reply_is_not_taken_for_next_answer() {
        let (slow_host, slow_device) = tokio::io::duplex(256);
        let (host, device) = tokio::io::duplex(256);

        // Answers the first line only after the driver has given up on it
        let slow_task = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(slow_host);
            let mut lines = BufReader::new(read).lines();
            let first = lines.next_line().await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            let _ = write.write_all(b"ok\r\n").await;
            first
        });
        let device_task = script_device(host, vec!["Lid:closed"]);

        let driver = SerialDriver::new(PreparedPort::sequence(vec![slow_device, device]))
            .with_timeout(Duration::from_millis(20))
            .with_drain_timeout(Duration::from_millis(10));
        driver.connect().await.unwrap();

        let err = driver.close_lid().await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout(ref line) if line == "M127"));
        assert!(err.is_recoverable());
        assert!(!driver.is_connected().await);
        assert!(matches!(
            driver.get_lid_status().await,
            Err(DriverError::NotConnected { .. })
        ));

        driver.connect().await.unwrap();
        assert_eq!(driver.get_lid_status().await.unwrap(), LidStatus::Closed);
        assert_eq!(slow_task.await.unwrap().as_deref(), Some("M127"));
        assert_eq!(device_task.await.unwrap(), vec!["M119"]);
    }

    #[tokio::test]
    async fn rejected_setpoint_after_ramp_is_returned() {
        let (host, device) = tokio::io::duplex(256);
        let device_task = script_device(host, vec!["ok", "ERR012:setpoint out of range"]);

        let driver = SerialDriver::new(PreparedPort::new(device));
        driver.connect().await.unwrap();

        let err = driver
            .set_temperature(130.0, None, Some(2.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Hardware(ref msg) if msg.contains("setpoint")));
        assert!(driver.is_connected().await);
        assert_eq!(device_task.await.unwrap(), vec!["M566 S2", "M104 S130"]);
    }

    #[tokio::test]
    async fn nothing_runs_between_ramp_and_setpoint() {
        let (host, device) = tokio::io::duplex(256);
        let device_task = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(host);
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = if line == "M119" { "Lid:open" } else { "ok" };
                write
                    .write_all(format!("{}\r\n", reply).as_bytes())
                    .await
                    .unwrap();
                seen.push(line);
            }
            seen
        });

        let driver = Arc::new(SerialDriver::new(PreparedPort::new(device)));
        driver.connect().await.unwrap();

        let setter = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.set_temperature(72.0, None, Some(1.5), None).await })
        };
        let reader = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move { driver.get_lid_status().await })
        };
        setter.await.unwrap().unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), LidStatus::Open);
        driver.disconnect().await.unwrap();

        let seen = device_task.await.unwrap();
        assert_eq!(seen.len(), 3);
        let ramp = seen.iter().position(|l| l == "M566 S1.5").unwrap();
        assert_eq!(seen[ramp + 1], "M104 S72");
    }

    #[tokio::test]
    async fn programming_mode_requires_reconnect() {
        let (host, device) = tokio::io::duplex(256);
        let _device_task = script_device(host, vec!["ok"]);

        let driver = SerialDriver::new(PreparedPort::new(device));
        driver.connect().await.unwrap();
        driver.enter_programming_mode().await.unwrap();

        assert!(!driver.is_connected().await);
        assert!(matches!(
            driver.get_device_info().await,
            Err(DriverError::NotConnected { .. })
        ));
    }
}
