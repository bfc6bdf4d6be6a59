//! Session state for one agent driving one sandbox
//!
//! A `Session` is owned by exactly one controller and mutated only by its
//! iteration step. The termination signal is the one piece that is shared:
//! external callers may trigger it, the controller observes it at iteration
//! boundaries.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// One executed command and what came of it
///
/// Immutable once appended; rendered back into prompts in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHistoryEntry {
    pub command: String,
    pub outcome: String,
}

impl CommandHistoryEntry {
    pub fn new(command: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            outcome: outcome.into(),
        }
    }
}

impl std::fmt::Display for CommandHistoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.command, self.outcome)
    }
}

/// Idempotent, cooperatively observed stop signal
#[derive(Debug, Clone)]
pub struct Termination {
    tx: watch::Sender<bool>,
}

impl Termination {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Signal termination. Safe to call any number of times.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether termination has been signalled
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that resolves `changed()` once termination is signalled
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Termination {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable state of one agent session
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier
    pub id: String,
    /// Most recent full sanitized terminal snapshot
    pub snapshot: String,
    /// Most recently executed command
    pub last_command: Option<String>,
    /// Output attributed to the most recent command
    pub last_output: String,
    /// Ordered command/outcome pairs
    history: Vec<CommandHistoryEntry>,
    /// Loop passes so far (incremented before the limit check)
    pub iteration: usize,
    /// Maximum number of commands (0 = unlimited)
    pub iteration_limit: usize,
    /// Maximum split depth for summarization
    pub recursion_depth_limit: u32,
    /// Stop signal shared with whoever may cancel the session
    pub termination: Termination,
}

impl Session {
    /// Create a new session
    pub fn new(iteration_limit: usize, recursion_depth_limit: u32) -> Self {
        let id = uuid::Uuid::now_v7().simple().to_string();
        Self {
            // the tail of a v7 uuid is random, the head is a timestamp
            id: id[id.len() - 8..].to_string(),
            snapshot: String::new(),
            last_command: None,
            last_output: String::new(),
            history: Vec::new(),
            iteration: 0,
            iteration_limit,
            recursion_depth_limit,
            termination: Termination::new(),
        }
    }

    /// Advance the iteration counter; returns false once the limit is exceeded
    pub fn begin_iteration(&mut self) -> bool {
        self.iteration += 1;
        !(self.iteration_limit > 0 && self.iteration > self.iteration_limit)
    }

    /// Whether this is the first pass through the loop
    pub fn is_first_iteration(&self) -> bool {
        self.iteration == 1
    }

    /// Append a command/outcome pair
    pub fn record(&mut self, entry: CommandHistoryEntry) {
        self.history.push(entry);
    }

    /// Full ordered history
    pub fn history(&self) -> &[CommandHistoryEntry] {
        &self.history
    }

    /// The most recent `n` history entries, still in insertion order
    pub fn recent_history(&self, n: usize) -> &[CommandHistoryEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Store the result of the command just executed
    pub fn update_after_command(&mut self, command: String, output: String, snapshot: String) {
        self.last_command = Some(command);
        self.last_output = output;
        self.snapshot = snapshot;
    }

    /// Consume the session, keeping only its history
    pub fn into_history(self) -> Vec<CommandHistoryEntry> {
        self.history
    }
}
