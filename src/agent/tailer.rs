//! Background terminal tailer
//!
//! Periodically replays the transcript and logs lines it has not shown yet
//! under the `aquarium::terminal` target. It owns its own copy of the last
//! snapshot and never touches the session, so the controller's diffing is
//! unaffected by how often it runs.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::output::OutputReader;

lazy_static! {
    static ref COMPLETION_WRAPPER: Regex =
        Regex::new(r#"/bin/bash -c "echo \\\$\\\$>\S+(?: && exec |; )(.*)""#)
            .expect("valid wrapper pattern");
}

/// Undo the completion wrapper so a transcript line shows the command as proposed
pub fn clean_display_line(line: &str) -> String {
    COMPLETION_WRAPPER
        .replace(line, "$1")
        .replace("\"'\"'\"", "\"")
}

/// Spawn the tailer for one session
///
/// # Arguments
/// * `reader` - Transcript reader for the session's sandbox
/// * `session_id` - Identifier attached to every logged line
/// * `interval` - Delay between transcript reads
/// * `stop` - Termination receiver; the tailer exits once it flips to true
pub fn spawn_tailer(
    reader: OutputReader,
    session_id: String,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shown = 0usize;
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *stop.borrow() {
                break;
            }

            match reader.capture().await {
                Ok(snapshot) => {
                    let lines: Vec<&str> = snapshot.split('\n').filter(|l| !l.is_empty()).collect();
                    if lines.len() < shown {
                        // transcript was rewritten under us; start over
                        shown = 0;
                    }
                    for line in &lines[shown..] {
                        debug!(target: "aquarium::terminal", session_id = %session_id, "{}", clean_display_line(line));
                    }
                    shown = lines.len();
                }
                Err(e) if e.is_not_running() => {
                    debug!(session_id = %session_id, "Sandbox stopped, tailer exiting");
                    break;
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Terminal tailer stopped");
                    break;
                }
            }
        }
    })
}
