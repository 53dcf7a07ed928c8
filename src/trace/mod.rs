//! Command-Trace Capture
//!
//! A [`CommandTrace`] is the ordered record of every low-level instruction a
//! driver issued during exactly one protocol run. Entries come in two shapes:
//!
//! - [`TraceEntry::Call`]: operation name plus normalized numeric arguments,
//!   written by [`TracingDriver`] around drivers that have no wire format
//!   (the simulator).
//! - [`TraceEntry::Instruction`]: the literal G-code line, written by the serial
//!   driver as it puts bytes on the port.
//!
//! A [`TraceRecorder`] is created per run and handed to the driver factory. When
//! the run ends the recorder is consumed into an owned [`CommandTrace`], so
//! nothing recorded for one run can show up in another.

mod diff;
mod driver;

pub use diff::{compare_traces, diff_traces};
pub use driver::TracingDriver;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    /// A contract operation with its normalized arguments
    Call {
        /// Operation name in snake_case
        operation: String,
        /// Present arguments, sorted by name; absent optionals are omitted
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        args: BTreeMap<String, f64>,
    },
    /// A literal wire instruction
    Instruction {
        /// Command line without terminator
        line: String,
    },
}

impl TraceEntry {
    /// Operation with no arguments.
    pub fn call(operation: impl Into<String>) -> Self {
        Self::Call {
            operation: operation.into(),
            args: BTreeMap::new(),
        }
    }

    /// Operation with arguments; `None` values are dropped.
    pub fn call_with<'a>(
        operation: impl Into<String>,
        args: impl IntoIterator<Item = (&'a str, Option<f64>)>,
    ) -> Self {
        Self::Call {
            operation: operation.into(),
            args: args
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name.to_string(), v)))
                .collect(),
        }
    }

    /// Literal instruction line.
    pub fn instruction(line: impl Into<String>) -> Self {
        Self::Instruction { line: line.into() }
    }

    /// Operation name or instruction text, without arguments.
    pub fn name(&self) -> &str {
        match self {
            Self::Call { operation, .. } => operation,
            Self::Instruction { line } => line.split_whitespace().next().unwrap_or(line),
        }
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call { operation, args } => {
                write!(f, "{}", operation)?;
                for (name, value) in args {
                    write!(f, " {}={}", name, value)?;
                }
                Ok(())
            }
            Self::Instruction { line } => write!(f, "{}", line),
        }
    }
}

/// Ordered, append-only sequence of entries from one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTrace {
    entries: Vec<TraceEntry>,
}

impl CommandTrace {
    /// Build a trace from entries in order.
    pub fn from_entries(entries: Vec<TraceEntry>) -> Self {
        Self { entries }
    }

    /// Entries in issue order.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    /// True if any entry equals `entry`.
    pub fn contains(&self, entry: &TraceEntry) -> bool {
        self.entries.contains(entry)
    }

    /// Index of the first entry at which `self` and `other` differ, or `None`
    /// when they are equal. A trace that is a strict prefix of the other diverges
    /// at its own length.
    pub fn first_divergence(&self, other: &CommandTrace) -> Option<usize> {
        let shared = self.entries.len().min(other.entries.len());
        (0..shared)
            .find(|&i| self.entries[i] != other.entries[i])
            .or_else(|| (self.entries.len() != other.entries.len()).then_some(shared))
    }

    /// Text explanation: one entry per line, newline terminated.
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&entry.to_string());
            text.push('\n');
        }
        text
    }

    /// Pretty JSON for external diffing tools.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl<'a> IntoIterator for &'a CommandTrace {
    type Item = &'a TraceEntry;
    type IntoIter = std::slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Per-run sink for trace entries.
///
/// Cloning gives another handle to the same buffer, so a driver and the runner
/// that created it can both hold one. [`finish`](Self::finish) drains the buffer
/// into an owned trace.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

impl TraceRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn record(&self, entry: TraceEntry) {
        tracing::trace!(entry = %entry, "trace");
        self.lock().push(entry);
    }

    /// Number of entries recorded so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the entries recorded so far.
    pub fn snapshot(&self) -> CommandTrace {
        CommandTrace::from_entries(self.lock().clone())
    }

    /// Take every recorded entry, leaving the buffer empty.
    pub fn finish(&self) -> CommandTrace {
        CommandTrace::from_entries(std::mem::take(&mut *self.lock()))
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceEntry>> {
        // A panic while pushing cannot leave the Vec half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
