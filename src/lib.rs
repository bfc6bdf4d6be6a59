//! aquarium - autonomous agents operating sandboxed shells
//!
//! This library lets an instruction source (a language model) drive a shell
//! inside a Docker container one command at a time, detecting when each
//! command has finished and condensing its output before the next decision.
//!
//! # Modules
//!
//! - `agent` - session state, iteration controller, completion detection,
//!   output capture and recursive summarization
//! - `llm` - instruction sources (hosted chat completions, local completions server)
//! - `sandbox` - Docker Engine API client, container provisioning and terminal
//! - `config` - configuration consumed by the core
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - logging and optional OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use aquarium::agent::AgentController;
//! use aquarium::config::{AgentConfig, LogConfig, SandboxConfig};
//! use aquarium::sandbox::SandboxManager;
//!
//! let telemetry = aquarium::tracing::init_tracing("aquarium", &LogConfig::default())?;
//! let config = AgentConfig { goal: "Install nginx".into(), iteration_limit: 10, ..Default::default() };
//! let source = aquarium::llm::build_source(&config)?;
//!
//! let manager = SandboxManager::new(SandboxConfig::default());
//! let sandbox = manager.provision().await?;
//! let controller = AgentController::new(
//!     config,
//!     source,
//!     sandbox.container.clone(),
//!     Box::new(sandbox.terminal),
//!     telemetry,
//! );
//! let report = controller.run().await;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentController, AgentError, CommandHistoryEntry, SessionReport};
pub use config::{AgentConfig, ContextMode, SandboxConfig};
pub use sandbox::{Sandbox, SandboxError, Terminal};
