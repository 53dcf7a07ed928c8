//! Trace comparison and mismatch reporting.

use super::CommandTrace;
use crate::error::TraceMismatch;
use similar::{ChangeTag, TextDiff};

/// Line diff of two traces' text explanations.
///
/// Lines prefixed with `-` are only in `left`, `+` only in `right`, and ` `
/// (space) in both.
pub fn diff_traces(left: &CommandTrace, right: &CommandTrace) -> String {
    let left_text = left.to_text();
    let right_text = right.to_text();
    let diff = TextDiff::from_lines(&left_text, &right_text);

    let mut diff_text = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => " ",
        };
        diff_text.push_str(&format!("{}{}", sign, change));
    }
    diff_text
}

/// Compare two traces element for element.
///
/// Returns the first divergence, both entries at that index, and the full diff
/// when they differ.
pub fn compare_traces(
    protocol: &str,
    left: &CommandTrace,
    right: &CommandTrace,
) -> Result<(), TraceMismatch> {
    match left.first_divergence(right) {
        None => Ok(()),
        Some(index) => Err(TraceMismatch {
            protocol: protocol.to_string(),
            index,
            left: left.entries().get(index).cloned(),
            right: right.entries().get(index).cloned(),
            diff: diff_traces(left, right),
        }),
    }
}
