//! Output Reader / Sanitizer / Differ
//!
//! The terminal runs under `script(1)`, so everything typed and printed is
//! recorded to a transcript. After each command the reader replays that
//! transcript through a one-off exec, sanitizes it into a stable line list
//! and diffs it against the previous snapshot to find the lines the command
//! itself produced.

use std::sync::Arc;

use crate::sandbox::{Sandbox, SandboxError};

/// Line count assumed for the previous snapshot when there is none
const DEFAULT_PREVIOUS_LINES: usize = 5;

/// Trailing lines of a snapshot belonging to the next shell prompt
const TRAILING_PROMPT_LINES: usize = 2;

/// Clean a raw transcript buffer
///
/// 1. Leading bytes outside printable ASCII (stream framing) are discarded
/// 2. Carriage returns become newlines
/// 3. Empty and whitespace-only lines are dropped
/// 4. Runs of identical consecutive lines collapse to one
pub fn sanitize(raw: &[u8]) -> String {
    let start = raw
        .iter()
        .position(|b| (0x20..=0x7e).contains(b))
        .unwrap_or(raw.len());
    let text = String::from_utf8_lossy(&raw[start..]).replace('\r', "\n");

    let mut lines: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if line.trim().is_empty() {
            continue;
        }
        if lines.last() != Some(&line) {
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// Lines of `current` attributable to the command run since `previous`
///
/// Skips the first `N - 1` lines of `current`, where `N` is the line count of
/// `previous` (5 when `previous` has at most one line), and drops the last
/// two lines (the fresh prompt). Returns an empty string when nothing is left.
pub fn diff_new_output(previous: &str, current: &str) -> String {
    let mut previous_lines = previous.split('\n').count();
    if previous_lines <= 1 {
        previous_lines = DEFAULT_PREVIOUS_LINES;
    }

    let lines: Vec<&str> = current.split('\n').collect();
    let start = previous_lines - 1;
    let end = lines.len().saturating_sub(TRAILING_PROMPT_LINES);
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

/// Reads the sanitized terminal transcript from a sandbox
#[derive(Clone)]
pub struct OutputReader {
    sandbox: Arc<dyn Sandbox>,
    transcript_command: Vec<String>,
}

impl OutputReader {
    pub fn new(sandbox: Arc<dyn Sandbox>, transcript_command: Vec<String>) -> Self {
        Self {
            sandbox,
            transcript_command,
        }
    }

    /// Replay the transcript and return it sanitized
    pub async fn capture(&self) -> Result<String, SandboxError> {
        let output = self.sandbox.run_one_off(&self.transcript_command).await?;
        // script(1) records everything to stdout; stderr is noise here
        Ok(sanitize(&output.stdout))
    }
}
