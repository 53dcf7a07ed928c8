//! Serial port plumbing for the real driver.
//!
//! The driver never names a concrete port type. It asks a [`PortConnector`] for a
//! [`DynSerial`] on every `connect()`, so the same driver code runs against:
//! - a `tokio_serial::SerialStream` ([`SerialPortConnector`], `serial` feature)
//! - a `tokio::io::DuplexStream` wired to the firmware emulator
//! - any other `AsyncRead + AsyncWrite` a test wants to script

use crate::error::DriverResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};

// =============================================================================
// Serial Port Trait
// =============================================================================

/// Anything usable as a thermocycler port.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Port wrapped for line-oriented reads.
pub type BufferedPort = BufReader<DynSerial>;

/// Opens a fresh port for a driver.
///
/// Called once per `connect()`. Every call must hand out a new port; reusing a
/// port across connections would carry its unread bytes along.
#[async_trait]
pub trait PortConnector: Send + Sync {
    /// Open a port.
    async fn open(&self) -> DriverResult<DynSerial>;

    /// Description for logs (e.g. the device path).
    fn describe(&self) -> String;
}

// =============================================================================
// Stale input
// =============================================================================

/// Upper bound on bytes thrown away in one call, so a chattering device cannot
/// keep the driver reading forever.
const MAX_DISCARD: usize = 4096;

/// Throw away every byte the device sent that no exchange is waiting for.
///
/// Counts whatever already sits in the line buffer, then keeps reading until the
/// port has been quiet for `quiet`, reaches EOF, or fails. The driver calls this
/// whenever it lets go of a port: on `disconnect()`, after programming mode, and
/// after a reply missed its deadline. Returns the number of bytes discarded.
pub async fn discard_pending(port: &mut BufferedPort, quiet: Duration) -> usize {
    let mut discarded = port.buffer().len();
    port.consume(discarded);

    let mut scratch = [0u8; 64];
    while discarded < MAX_DISCARD {
        match tokio::time::timeout(quiet, port.get_mut().read(&mut scratch)).await {
            Ok(Ok(n)) if n > 0 => discarded += n,
            _ => break,
        }
    }
    discarded
}

// =============================================================================
// tokio-serial connector
// =============================================================================

/// Opens the module's USB serial port with tokio-serial (8N1, no flow control).
#[cfg(feature = "serial")]
#[derive(Debug, Clone)]
pub struct SerialPortConnector {
    port_path: String,
    baud_rate: u32,
}

#[cfg(feature = "serial")]
impl SerialPortConnector {
    /// Connector for `port_path` at `baud_rate`.
    pub fn new(port_path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_path: port_path.into(),
            baud_rate,
        }
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl PortConnector for SerialPortConnector {
    async fn open(&self) -> DriverResult<DynSerial> {
        use anyhow::Context;
        use tokio_serial::SerialPortBuilderExt;

        // Opening can block on the OS, keep it off the runtime threads.
        let builder = tokio_serial::new(&self.port_path, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None);
        let described = self.describe();
        let stream = tokio::task::spawn_blocking(move || builder.open_native_async())
            .await
            .context("thermocycler port opener task failed")?
            .with_context(|| format!("cannot open thermocycler port {}", described))?;

        tracing::debug!(port = %described, "opened thermocycler port");
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.port_path, self.baud_rate)
    }
}
