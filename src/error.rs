//! Error types for drivers, commands, and the trace harness.
//!
//! Every fallible operation in the crate returns [`DriverResult`]. The variants map
//! onto the three error kinds callers have to tell apart:
//!
//! - **`NotConnected`**: an operation reached a real driver that has no open port.
//!   Recoverable by calling `connect()` again.
//! - **`InvalidArgument`**: a value object was built from bad input (for example a
//!   non-positive volume). The caller must fix the input; retrying is pointless.
//! - **`TraceMismatch`**: two runs of the same protocol emitted different command
//!   traces. Always fatal; it signals leaked state or non-determinism.
//!
//! The remaining variants cover the serial transport and configuration loading.

use crate::trace::TraceEntry;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Primary error type for drivers and the harness.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Operation attempted while the driver has no open connection.
    #[error("Driver '{driver}' is not connected")]
    NotConnected {
        /// Driver type that rejected the call
        driver: String,
    },

    /// Input rejected at construction time.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Two runs of one protocol produced different command traces.
    #[error("{0}")]
    TraceMismatch(Box<TraceMismatch>),

    /// Two drivers disagreed on the value returned by a read step.
    #[error("Observation mismatch at step {index}: left={left} right={right}")]
    ObservationMismatch {
        /// Position of the read step in the protocol
        index: usize,
        /// Value seen by the first run
        left: String,
        /// Value seen by the second run
        right: String,
    },

    /// The device answered with an error line.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// The device answered with something we could not parse.
    #[error("Unexpected response to '{command}': {response}")]
    Protocol {
        /// Command that was sent
        command: String,
        /// Raw response line
        response: String,
    },

    /// No response within the configured timeout.
    #[error("Timed out waiting for response to '{0}'")]
    Timeout(String),

    /// Serial I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Anything else, usually carrying `anyhow` context from port setup.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DriverError {
    /// Build a `NotConnected` error for the given driver type.
    pub fn not_connected(driver: impl Into<String>) -> Self {
        Self::NotConnected {
            driver: driver.into(),
        }
    }

    /// True for errors the caller can clear by reconnecting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. } | Self::Timeout(_) | Self::Io(_)
        )
    }
}

/// Details of the first point at which two command traces diverge.
///
/// Carries both entries at the divergent index (either may be missing when one
/// trace is a prefix of the other) and a line diff of the full traces.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMismatch {
    /// Protocol whose runs diverged
    pub protocol: String,
    /// Index of the first differing entry
    pub index: usize,
    /// Entry from the first run, if it has one at `index`
    pub left: Option<TraceEntry>,
    /// Entry from the second run, if it has one at `index`
    pub right: Option<TraceEntry>,
    /// Unified line diff of the two rendered traces
    pub diff: String,
}

impl std::fmt::Display for TraceMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |entry: &Option<TraceEntry>| match entry {
            Some(e) => e.to_string(),
            None => "<end of trace>".to_string(),
        };
        writeln!(
            f,
            "Command trace mismatch in protocol '{}' at entry {}: {} != {}",
            self.protocol,
            self.index,
            show(&self.left),
            show(&self.right)
        )?;
        write!(f, "{}", self.diff)
    }
}
