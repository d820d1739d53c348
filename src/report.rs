//! Failure reporting: line diffs, colored terminal output, and a `miette` diagnostic for
//! failing verification results.

use std::io::{self, Write};

use difference::{Changeset, Difference};
use miette::Diagnostic;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use thiserror::Error;

use crate::engine::{SnapshotStatus, TargetOutcome};

// ============================================================================
// DIFFS
// ============================================================================

/// Line diff of `verified` against `received`: ` ` unchanged, `-` only in verified, `+` only in
/// received.
pub fn render_diff(verified: &str, received: &str) -> String {
    let changeset = Changeset::new(verified, received, "\n");
    let mut out = String::new();
    for diff in &changeset.diffs {
        let (prefix, chunk) = match diff {
            Difference::Same(x) => (' ', x),
            Difference::Add(x) => ('+', x),
            Difference::Rem(x) => ('-', x),
        };
        for line in chunk.split('\n') {
            out.push(prefix);
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Writes the diff to stderr, colored when the terminal supports it.
pub fn print_diff(verified: &str, received: &str) -> io::Result<()> {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let changeset = Changeset::new(verified, received, "\n");
    for diff in &changeset.diffs {
        let (prefix, chunk, color) = match diff {
            Difference::Same(x) => (' ', x, None),
            Difference::Add(x) => ('+', x, Some(Color::Green)),
            Difference::Rem(x) => ('-', x, Some(Color::Red)),
        };
        stderr.set_color(ColorSpec::new().set_fg(color))?;
        for line in chunk.split('\n') {
            writeln!(stderr, "{prefix}{line}")?;
        }
    }
    stderr.reset()
}

// ============================================================================
// FAILURE DIAGNOSTIC
// ============================================================================

/// A verification call whose targets did not all match.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("{summary}")]
#[diagnostic(
    code(veracity::snapshot::failed),
    help("review the received files and rename them to .verified to accept them")
)]
pub struct SnapshotFailure {
    summary: String,
    failures: Vec<TargetOutcome>,
}

impl SnapshotFailure {
    pub fn new(failures: Vec<TargetOutcome>) -> Self {
        let not_approved = failures
            .iter()
            .filter(|f| matches!(f.status, SnapshotStatus::NotApproved { .. }))
            .count();
        let summary = format!(
            "{} snapshot(s) failed: {} mismatched, {} not approved",
            failures.len(),
            failures.len() - not_approved,
            not_approved
        );
        Self { summary, failures }
    }

    pub fn failures(&self) -> &[TargetOutcome] {
        &self.failures
    }

    /// Summary line followed by each failing target's description.
    pub fn details(&self) -> String {
        let mut text = self.summary.clone();
        for failure in &self.failures {
            text.push_str("\n\n");
            text.push_str(&failure.describe());
        }
        text
    }
}
