//! Summarization Pipeline - fits arbitrarily long command output into the
//! instruction source's input budget
//!
//! # Architecture
//!
//! ```text
//! summarize(cmd, output)
//!   │ empty output ──────────────────────────────► NO_OUTPUT (no request)
//!   │ summarize_outcome ── ok ───────────────────► outcome
//!   │        └─ InputTooLarge
//!   ▼
//! split (depth 1): lines[..mid] │ lines[mid..]
//!   ├─ spawn: summarize_fragment(left)  ── InputTooLarge ─► split (depth 2) ...
//!   └─ spawn: summarize_fragment(right) ── InputTooLarge ─► split (depth 2) ...
//!   ▼ try_join (first error wins)
//! [part 1, part 2, ...] (left-to-right) ──► summarize_partials(cmd, parts)
//! ```
//!
//! Both halves of a split run as separate tasks. When one fails the join
//! returns its error immediately; the other task is detached, not aborted,
//! and finishes its own requests with the result discarded.

use std::sync::Arc;

use futures_util::future::{try_join, BoxFuture, FutureExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::llm::{InstructionError, InstructionSource};
use crate::metrics::AgentMetrics;

/// Outcome recorded for a command that printed nothing
pub const NO_OUTPUT: &str = "There was no output from this command.";

/// Error type for summarization
#[derive(Debug)]
pub enum SummarizeError {
    /// The instruction source failed for a reason other than input size
    Instruction(InstructionError),
    /// A fragment was still too large at the deepest permitted split
    RecursionLimitExceeded {
        /// Configured recursion-depth limit
        limit: u32,
        /// Worst-case number of fragment requests at that depth (2^limit)
        max_requests: u64,
    },
    /// A fan-out task panicked or was cancelled
    TaskFailed(String),
}

impl std::fmt::Display for SummarizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummarizeError::Instruction(e) => write!(f, "{}", e),
            SummarizeError::RecursionLimitExceeded { limit, max_requests } => write!(
                f,
                "Output still too large after {} levels of splitting (recursion depth limit {}, up to {} fragment requests)",
                limit, limit, max_requests
            ),
            SummarizeError::TaskFailed(msg) => write!(f, "Summarization task failed: {}", msg),
        }
    }
}

impl std::error::Error for SummarizeError {}

impl From<InstructionError> for SummarizeError {
    fn from(e: InstructionError) -> Self {
        SummarizeError::Instruction(e)
    }
}

/// Partial summaries in left-to-right order, plus the deepest split reached
type Partials = (Vec<String>, u32);

/// Recursive, depth-bounded summarizer
#[derive(Clone)]
pub struct Summarizer {
    source: Arc<dyn InstructionSource>,
    depth_limit: u32,
    metrics: Option<Arc<AgentMetrics>>,
}

impl Summarizer {
    /// Create a new summarizer
    ///
    /// # Arguments
    /// * `source` - Instruction source all requests go to
    /// * `depth_limit` - Maximum split depth before giving up
    pub fn new(source: Arc<dyn InstructionSource>, depth_limit: u32) -> Self {
        Self {
            source,
            depth_limit,
            metrics: None,
        }
    }

    /// Record request counts and split depth on `metrics`
    pub fn with_metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Summarize what `command` did, given its full output
    pub async fn summarize(&self, command: &str, output: &str) -> Result<String, SummarizeError> {
        if output.is_empty() {
            return Ok(NO_OUTPUT.to_string());
        }

        self.count("outcome");
        match self.source.summarize_outcome(command, output).await {
            Ok(outcome) => {
                self.observe_depth(0);
                Ok(outcome)
            }
            Err(e) if e.is_input_too_large() => {
                self.count_too_large();
                debug!(
                    command = %command,
                    lines = output.lines().count(),
                    "Output too large for one request, splitting"
                );

                let (partials, depth) = self.clone().split(output.to_string(), 1).await?;
                self.observe_depth(depth);

                self.count("rollup");
                Ok(self.source.summarize_partials(command, &partials).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Split `text` at the line midpoint and summarize both halves concurrently
    fn split(self, text: String, depth: u32) -> BoxFuture<'static, Result<Partials, SummarizeError>> {
        async move {
            if depth > self.depth_limit {
                warn!(limit = self.depth_limit, "Summarization recursion limit exceeded");
                return Err(SummarizeError::RecursionLimitExceeded {
                    limit: self.depth_limit,
                    max_requests: 2u64.saturating_pow(self.depth_limit),
                });
            }

            let (left, right) = {
                let lines: Vec<&str> = text.split('\n').collect();
                let mid = lines.len() / 2;
                (lines[..mid].join("\n"), lines[mid..].join("\n"))
            };
            debug!(depth, left_bytes = left.len(), right_bytes = right.len(), "Fanning out summary");

            let left = tokio::spawn(self.clone().fragment(left, depth));
            let right = tokio::spawn(self.fragment(right, depth));
            let ((mut parts, left_depth), (right_parts, right_depth)) =
                try_join(joined(left), joined(right)).await?;

            parts.extend(right_parts);
            Ok((parts, left_depth.max(right_depth)))
        }
        .boxed()
    }

    /// Summarize one fragment, splitting further if it is still too large
    fn fragment(self, fragment: String, depth: u32) -> BoxFuture<'static, Result<Partials, SummarizeError>> {
        async move {
            if fragment.trim().is_empty() {
                return Ok((Vec::new(), depth));
            }

            self.count("fragment");
            match self.source.summarize_fragment(&fragment).await {
                Ok(summary) => Ok((vec![summary], depth)),
                Err(e) if e.is_input_too_large() => {
                    self.count_too_large();
                    self.split(fragment, depth + 1).await
                }
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }

    fn count(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.source_request(kind);
        }
    }

    fn count_too_large(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.input_too_large.inc();
        }
    }

    fn observe_depth(&self, depth: u32) {
        if let Some(metrics) = &self.metrics {
            metrics.summarize_depth.observe(depth as f64);
        }
    }
}

async fn joined(handle: JoinHandle<Result<Partials, SummarizeError>>) -> Result<Partials, SummarizeError> {
    handle
        .await
        .map_err(|e| SummarizeError::TaskFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CommandHistoryEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scriptable instruction source for pipeline tests
    #[derive(Default)]
    struct StubSource {
        /// Reject every outcome request for size
        reject_outcome: bool,
        /// Reject fragments with more lines than this for size
        max_fragment_lines: Option<usize>,
        /// Fail every fragment request with a non-size error
        fail_fragments: bool,
        /// Delay fragments whose first line starts with this prefix
        slow_prefix: Option<&'static str>,
        calls: AtomicUsize,
        fragment_lines: Mutex<Vec<usize>>,
        rollups: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl InstructionSource for StubSource {
        async fn generate_initial(&self, _goal: &str) -> Result<String, InstructionError> {
            unreachable!()
        }

        async fn generate_next(
            &self,
            _goal: &str,
            _history: &[CommandHistoryEntry],
        ) -> Result<String, InstructionError> {
            unreachable!()
        }

        async fn summarize_outcome(&self, _command: &str, output: &str) -> Result<String, InstructionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject_outcome {
                return Err(InstructionError::InputTooLarge("context_length_exceeded".into()));
            }
            Ok(format!("outcome of {} lines", output.lines().count()))
        }

        async fn summarize_truncated(&self, _command: &str, _tail: &str) -> Result<String, InstructionError> {
            unreachable!()
        }

        async fn summarize_fragment(&self, fragment: &str) -> Result<String, InstructionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let lines = fragment.split('\n').count();
            self.fragment_lines.lock().unwrap().push(lines);

            if self.fail_fragments {
                return Err(InstructionError::Transport("connection reset".into()));
            }
            if let Some(max) = self.max_fragment_lines {
                if lines > max {
                    return Err(InstructionError::InputTooLarge("too many tokens".into()));
                }
            }
            let first = fragment.split('\n').next().unwrap_or("").to_string();
            if let Some(prefix) = self.slow_prefix {
                if first.starts_with(prefix) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
            Ok(first)
        }

        async fn summarize_partials(&self, _command: &str, partials: &[String]) -> Result<String, InstructionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.rollups.lock().unwrap().push(partials.to_vec());
            Ok(partials.join("|"))
        }
    }

    fn output_of(lines: usize) -> String {
        (0..lines).map(|i| format!("line {:02}", i)).collect::<Vec<_>>().join("\n")
    }

    #[tokio::test]
    async fn test_empty_output_makes_no_request() {
        let source = Arc::new(StubSource::default());
        let summarizer = Summarizer::new(source.clone(), 3);

        let outcome = summarizer.summarize("true", "").await.unwrap();
        assert_eq!(outcome, NO_OUTPUT);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_small_output_uses_single_request() {
        let source = Arc::new(StubSource::default());
        let summarizer = Summarizer::new(source.clone(), 3);

        let outcome = summarizer.summarize("ls", "a\nb\nc").await.unwrap();
        assert_eq!(outcome, "outcome of 3 lines");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_halves_keep_order_when_right_finishes_first() {
        let source = Arc::new(StubSource {
            reject_outcome: true,
            slow_prefix: Some("line 00"),
            ..Default::default()
        });
        let summarizer = Summarizer::new(source.clone(), 3);

        let outcome = summarizer.summarize("make", &output_of(10)).await.unwrap();
        assert_eq!(outcome, "line 00|line 05");
        assert_eq!(source.rollups.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nested_split_preserves_left_to_right_order() {
        let source = Arc::new(StubSource {
            reject_outcome: true,
            max_fragment_lines: Some(4),
            slow_prefix: Some("line 0"),
            ..Default::default()
        });
        let metrics = Arc::new(AgentMetrics::new().unwrap());
        let summarizer = Summarizer::new(source.clone(), 3).with_metrics(metrics.clone());

        // 16 lines: 8 + 8 rejected, then four fragments of 4
        let outcome = summarizer.summarize("make", &output_of(16)).await.unwrap();
        assert_eq!(outcome, "line 00|line 04|line 08|line 12");
        assert_eq!(metrics.summarize_depth.get_sample_count(), 1);
        assert_eq!(metrics.summarize_depth.get_sample_sum(), 2.0);
    }

    #[tokio::test]
    async fn test_recursion_limit_is_enforced() {
        let limit = 3;
        let source = Arc::new(StubSource {
            reject_outcome: true,
            max_fragment_lines: Some(0),
            ..Default::default()
        });
        let summarizer = Summarizer::new(source.clone(), limit);

        let err = summarizer.summarize("find /", &output_of(64)).await.unwrap_err();
        match err {
            SummarizeError::RecursionLimitExceeded { limit: l, max_requests } => {
                assert_eq!(l, limit);
                assert_eq!(max_requests, 8);
            }
            other => panic!("expected RecursionLimitExceeded, got {:?}", other),
        }

        // let detached siblings run out
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sizes = source.fragment_lines.lock().unwrap().clone();
        // levels 1..=limit issue at most 2 + 4 + 8 fragment requests
        assert!(sizes.len() <= 2 + 4 + 8, "too many fragment requests: {}", sizes.len());
        // no fragment is smaller than one produced by `limit` halvings
        assert!(sizes.iter().all(|&n| n >= 64 / 8), "fragment too small: {:?}", sizes);
        assert!(source.rollups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_errors_abort_without_rollup() {
        let source = Arc::new(StubSource {
            reject_outcome: true,
            fail_fragments: true,
            ..Default::default()
        });
        let summarizer = Summarizer::new(source.clone(), 3);

        let err = summarizer.summarize("make", &output_of(8)).await.unwrap_err();
        assert!(matches!(
            err,
            SummarizeError::Instruction(InstructionError::Transport(_))
        ));
        assert!(source.rollups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_half_is_not_sent() {
        let source = Arc::new(StubSource {
            reject_outcome: true,
            ..Default::default()
        });
        let summarizer = Summarizer::new(source.clone(), 3);

        // a single line splits into an empty left half and the line itself
        let outcome = summarizer.summarize("echo hi", "hi").await.unwrap();
        assert_eq!(outcome, "hi");
        assert_eq!(*source.fragment_lines.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_recursion_error_message_names_limit() {
        let err = SummarizeError::RecursionLimitExceeded {
            limit: 4,
            max_requests: 16,
        };
        let message = err.to_string();
        assert!(message.contains("limit 4"));
        assert!(message.contains("16"));
    }
}
