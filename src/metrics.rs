//! Prometheus metrics for agent sessions
//!
//! Collectors live on a private `Registry` owned by `AgentMetrics`, which is
//! created once by `init_tracing` and handed to every controller through the
//! `Telemetry` handle.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// All metrics recorded by the agent core
pub struct AgentMetrics {
    registry: Registry,

    // ─────────────────────────────────────────────────────────────────────────
    // Iteration loop
    // ─────────────────────────────────────────────────────────────────────────
    /// Loop passes, including the one that hits the iteration limit
    pub iterations: IntCounter,

    /// Commands written to a sandbox terminal
    pub commands_executed: IntCounter,

    /// Sessions ended, by reason
    ///
    /// Labels:
    /// - reason: "iteration_limit", "cancelled", "failed"
    pub sessions_ended: IntCounterVec,

    // ─────────────────────────────────────────────────────────────────────────
    // Instruction source
    // ─────────────────────────────────────────────────────────────────────────
    /// Requests sent to the instruction source
    ///
    /// Labels:
    /// - kind: "command", "outcome", "truncated", "fragment", "rollup"
    pub source_requests: IntCounterVec,

    /// Requests rejected because the prompt was too large
    pub input_too_large: IntCounter,

    /// Deepest split level reached per summarization
    pub summarize_depth: Histogram,
}

impl AgentMetrics {
    /// Create and register all collectors on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("aquarium".to_string()), None)?;

        let iterations = IntCounter::new("iterations_total", "Agent loop iterations")?;
        let commands_executed =
            IntCounter::new("commands_executed_total", "Commands sent to sandbox terminals")?;
        let sessions_ended = IntCounterVec::new(
            Opts::new("sessions_ended_total", "Agent sessions ended, by reason"),
            &["reason"],
        )?;
        let source_requests = IntCounterVec::new(
            Opts::new("source_requests_total", "Requests sent to the instruction source"),
            &["kind"],
        )?;
        let input_too_large = IntCounter::new(
            "input_too_large_total",
            "Instruction source requests rejected for size",
        )?;
        let summarize_depth = Histogram::with_opts(
            HistogramOpts::new(
                "summarize_split_depth",
                "Deepest split level reached while summarizing one output",
            )
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 8.0]),
        )?;

        registry.register(Box::new(iterations.clone()))?;
        registry.register(Box::new(commands_executed.clone()))?;
        registry.register(Box::new(sessions_ended.clone()))?;
        registry.register(Box::new(source_requests.clone()))?;
        registry.register(Box::new(input_too_large.clone()))?;
        registry.register(Box::new(summarize_depth.clone()))?;

        Ok(Self {
            registry,
            iterations,
            commands_executed,
            sessions_ended,
            source_requests,
            input_too_large,
            summarize_depth,
        })
    }

    /// Count one instruction-source request of the given kind
    pub fn source_request(&self, kind: &str) {
        self.source_requests.with_label_values(&[kind]).inc();
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl std::fmt::Debug for AgentMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMetrics")
            .field("iterations", &self.iterations.get())
            .field("commands_executed", &self.commands_executed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_prefixed_names() {
        let metrics = AgentMetrics::new().unwrap();
        metrics.iterations.inc();
        metrics.source_request("fragment");

        let text = metrics.render();
        assert!(text.contains("aquarium_iterations_total 1"));
        assert!(text.contains("aquarium_source_requests_total{kind=\"fragment\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = AgentMetrics::new().unwrap();
        let b = AgentMetrics::new().unwrap();
        a.commands_executed.inc();
        assert_eq!(b.commands_executed.get(), 0);
    }
}
