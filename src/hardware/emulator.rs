//! Firmware emulator.
//!
//! Serves the G-code subset over any byte stream, backed by a [`SimulatingDriver`].
//! Used to exercise [`SerialDriver`](crate::hardware::thermocycler::SerialDriver)
//! end to end without a device attached.
//!
//! Malformed lines get an `ERR` reply instead of closing the stream. `dfu` is
//! acknowledged and then the stream is closed, like a module rebooting into
//! its bootloader.

use crate::error::DriverResult;
use crate::hardware::capabilities::ThermocyclerDriver;
use crate::hardware::gcode::{self, GCode, GCodeCommand, ACK, TERMINATOR};
use crate::hardware::serial::{DynSerial, PortConnector};
use crate::hardware::simulator::{SimulatingDriver, SimulatorConfig};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

const DUPLEX_BUFFER: usize = 1024;

/// What to do after answering a line.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Continue,
    Close,
}

/// G-code front end over a simulated device.
pub struct ThermocyclerEmulator {
    device: SimulatingDriver,
}

impl ThermocyclerEmulator {
    /// Emulator for a fresh simulated device.
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            device: SimulatingDriver::with_config(config),
        }
    }

    /// The simulated device behind the emulator.
    pub fn device(&self) -> &SimulatingDriver {
        &self.device
    }

    /// Answer commands on `stream` until EOF or `dfu`.
    pub async fn serve<S>(&self, stream: S) -> DriverResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (response, next) = self.respond(line).await;
            write
                .write_all(format!("{}{}", response, TERMINATOR).as_bytes())
                .await?;
            write.flush().await?;
            if next == Next::Close {
                tracing::debug!("emulator: entering bootloader, closing stream");
                break;
            }
        }
        write.shutdown().await?;
        Ok(())
    }

    async fn respond(&self, line: &str) -> (String, Next) {
        let command = match GCodeCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(line, error = %e, "emulator: rejected line");
                return (format!("ERR:{}", e), Next::Continue);
            }
        };
        match self.execute(&command).await {
            Ok(response) if command.code() == GCode::EnterProgrammingMode => (response, Next::Close),
            Ok(response) => (response, Next::Continue),
            Err(e) => (format!("ERR:{}", e), Next::Continue),
        }
    }

    async fn execute(&self, command: &GCodeCommand) -> DriverResult<String> {
        let device = &self.device;
        let ack = || ACK.to_string();
        match command.code() {
            GCode::OpenLid => device.open_lid().await.map(|_| ack()),
            GCode::CloseLid => device.close_lid().await.map(|_| ack()),
            GCode::GetLidStatus => device
                .get_lid_status()
                .await
                .map(gcode::render_lid_status),
            GCode::SetLidTemperature => device
                .set_lid_temperature(command.get('S'))
                .await
                .map(|_| ack()),
            GCode::DeactivateLid => device.deactivate_lid().await.map(|_| ack()),
            GCode::GetLidTemperature => device
                .get_lid_temperature()
                .await
                .map(|t| gcode::render_lid_temperature(&t)),
            GCode::SetPlateTemperature => {
                let temp = required(command, 'S')?;
                device
                    .set_plate_temperature(temp, command.get('H'), command.get('V'))
                    .await
                    .map(|_| ack())
            }
            GCode::GetPlateTemperature => device
                .get_plate_temperature()
                .await
                .map(|t| gcode::render_plate_temperature(&t)),
            GCode::SetRampRate => {
                let rate = required(command, 'S')?;
                device.set_ramp_rate(rate).await.map(|_| ack())
            }
            GCode::DeactivateBlock => device.deactivate_block().await.map(|_| ack()),
            GCode::DeactivateAll => device.deactivate_all().await.map(|_| ack()),
            GCode::DeviceInfo => device
                .get_device_info()
                .await
                .map(|info| gcode::render_device_info(&info)),
            GCode::EnterProgrammingMode => device.enter_programming_mode().await.map(|_| ack()),
        }
    }
}

fn required(command: &GCodeCommand, letter: char) -> DriverResult<f64> {
    command.get(letter).ok_or_else(|| {
        crate::error::DriverError::InvalidArgument(format!(
            "{} requires parameter {}",
            command.code().code(),
            letter
        ))
    })
}

// =============================================================================
// EmulatorConnector
// =============================================================================

/// [`PortConnector`] that wires each opened port to one shared emulator.
///
/// Device state lives as long as the connector, so it survives a
/// disconnect/connect cycle the way a powered module would.
#[derive(Clone)]
pub struct EmulatorConnector {
    emulator: Arc<ThermocyclerEmulator>,
}

impl EmulatorConnector {
    /// Connector backed by a fresh emulator.
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            emulator: Arc::new(ThermocyclerEmulator::new(config)),
        }
    }

    /// The emulator behind this connector.
    pub fn emulator(&self) -> &ThermocyclerEmulator {
        &self.emulator
    }
}

#[async_trait]
impl PortConnector for EmulatorConnector {
    async fn open(&self) -> DriverResult<DynSerial> {
        let (host, device) = tokio::io::duplex(DUPLEX_BUFFER);
        let emulator = Arc::clone(&self.emulator);
        tokio::spawn(async move {
            if let Err(e) = emulator.serve(device).await {
                tracing::warn!(error = %e, "emulator stream ended with error");
            }
        });
        Ok(Box::new(host))
    }

    fn describe(&self) -> String {
        "emulator".to_string()
    }
}
