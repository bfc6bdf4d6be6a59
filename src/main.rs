//! aquarium - let a language model drive a sandboxed shell toward a goal
//!
//! Provisions one container per agent, attaches its terminal and runs an
//! `AgentController` until the iteration limit, a fatal error or Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use aquarium::agent::{spawn_tailer, AgentController, QuitReason, SessionReport};
use aquarium::config::{AgentConfig, ContextMode, LogConfig, SandboxConfig, SourceSelection};
use aquarium::llm::{build_source, InstructionSource};
use aquarium::sandbox::{Sandbox, SandboxManager};
use aquarium::tracing::{init_tracing, Telemetry};

/// Delay between starting consecutive agents
const AGENT_STAGGER: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(
    name = "aquarium",
    version,
    about = "Let a language model operate a sandboxed Linux terminal toward a goal"
)]
struct Cli {
    /// What the agent should accomplish
    #[arg(long, default_value = "Your goal is to execute a verbose port scan of amazon.com.")]
    goal: String,

    /// Remote model name, or "local" to use the completions server at --url
    #[arg(long, default_value = "gpt-3.5-turbo")]
    model: String,

    /// Local completions server (only used with --model local)
    #[arg(long, default_value = aquarium::llm::local::DEFAULT_LOCAL_URL)]
    url: String,

    /// Context carried between iterations: partial or full
    #[arg(long, default_value_t = ContextMode::Partial)]
    context_mode: ContextMode,

    /// Maximum number of commands per agent (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    iterations: usize,

    /// Maximum split depth when summarizing long outputs
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    recursion_depth: u32,

    /// Number of independent agents, each with its own sandbox
    #[arg(long, default_value_t = 1)]
    agents: usize,

    /// Sandbox image
    #[arg(long, default_value = "aquarium")]
    image: String,

    /// Docker network the sandboxes join
    #[arg(long, default_value = "aquarium")]
    network: String,

    /// Keep sandbox containers after their session ends
    #[arg(long)]
    keep_sandbox: bool,

    /// Debug logging (prompts, responses, terminal lines)
    #[arg(long)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,

    /// OTLP collector endpoint for trace export, e.g. http://localhost:4317
    #[arg(long)]
    otlp_endpoint: Option<String>,

    /// Print Prometheus metrics when all sessions have ended
    #[arg(long)]
    print_metrics: bool,

    /// Print each session's history as JSON when it ends
    #[arg(long)]
    report: bool,
}

impl Cli {
    fn agent_config(&self) -> AgentConfig {
        let source = if self.model == "local" {
            SourceSelection::Local { url: self.url.clone() }
        } else {
            SourceSelection::Remote {
                model: self.model.clone(),
            }
        };
        AgentConfig {
            goal: self.goal.clone(),
            context_mode: self.context_mode,
            iteration_limit: self.iterations,
            recursion_depth_limit: self.recursion_depth,
            source,
            ..Default::default()
        }
    }

    fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            image: self.image.clone(),
            network: self.network.clone(),
            ..Default::default()
        }
    }

    fn log_config(&self) -> LogConfig {
        LogConfig {
            debug: self.debug,
            json: self.json,
            otlp_endpoint: self.otlp_endpoint.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let telemetry = init_tracing("aquarium", &cli.log_config())?;
    let config = cli.agent_config();
    let source = build_source(&config)?;
    let manager = Arc::new(SandboxManager::new(cli.sandbox_config()));

    info!(
        agents = cli.agents,
        source = %config.source.label(),
        mode = %config.context_mode,
        iterations = config.iteration_limit,
        "Starting aquarium"
    );

    let mut handles = Vec::with_capacity(cli.agents);
    for index in 0..cli.agents {
        handles.push(tokio::spawn(run_agent(
            config.clone(),
            source.clone(),
            manager.clone(),
            telemetry.clone(),
            cli.keep_sandbox,
        )));
        if index + 1 < cli.agents {
            tokio::time::sleep(AGENT_STAGGER).await;
        }
    }

    let mut failed = 0;
    for handle in handles {
        match handle.await {
            Ok(Some(report)) => {
                if matches!(report.reason, QuitReason::Failed(_)) {
                    failed += 1;
                }
                print_report(&report, cli.report);
            }
            Ok(None) => failed += 1,
            Err(e) => {
                error!(error = %e, "Agent task panicked");
                failed += 1;
            }
        }
    }

    if cli.print_metrics {
        print!("{}", telemetry.metrics().render());
    }
    telemetry.shutdown();

    if failed > 0 {
        warn!(failed, total = cli.agents, "Some agent sessions failed");
    }
    Ok(())
}

/// Provision a sandbox, run one session in it, and tear it down
///
/// Returns `None` when the sandbox could not be provisioned.
async fn run_agent(
    config: AgentConfig,
    source: Arc<dyn InstructionSource>,
    manager: Arc<SandboxManager>,
    telemetry: Telemetry,
    keep_sandbox: bool,
) -> Option<SessionReport> {
    let sandbox = match manager.provision().await {
        Ok(sandbox) => sandbox,
        Err(e) => {
            error!(error = %e, "Failed to provision sandbox");
            return None;
        }
    };
    let container_id = sandbox.container.id().to_string();

    let controller = AgentController::new(
        config.clone(),
        source,
        sandbox.container.clone(),
        Box::new(sandbox.terminal),
        telemetry,
    );

    let termination = controller.termination();
    let tailer = spawn_tailer(
        controller.output_reader(),
        controller.session_id().to_string(),
        config.tail_interval,
        termination.subscribe(),
    );

    let interrupt = termination.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping at the next iteration boundary");
            interrupt.trigger();
        }
    });

    let report = controller.run().await;
    ctrl_c.abort();
    join_tailer(tailer).await;

    if keep_sandbox {
        info!(container = %container_id, "Keeping sandbox container");
    } else if let Err(e) = manager.destroy(&container_id).await {
        warn!(container = %container_id, error = %e, "Failed to remove sandbox container");
    }

    Some(report)
}

/// Wait for the terminal tailer, logging rather than propagating a panic
async fn join_tailer(tailer: JoinHandle<()>) -> bool {
    match tailer.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Terminal tailer task panicked");
            false
        }
    }
}

fn print_report(report: &SessionReport, as_json: bool) {
    match &report.reason {
        QuitReason::Failed(e) => println!(
            "[AGENT] Session {} failed after {} commands: {}",
            report.session_id, report.commands_executed, e
        ),
        reason => println!(
            "[AGENT] Session {} ended ({}) after {} commands",
            report.session_id,
            reason.label(),
            report.commands_executed
        ),
    }

    if as_json {
        match serde_json::to_string_pretty(&report.history) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!(error = %e, "Failed to serialize session history"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tailer_panic_is_reported_not_propagated() {
        let tailer = tokio::spawn(async { panic!("transcript stream poisoned") });
        assert!(!join_tailer(tailer).await);

        assert!(join_tailer(tokio::spawn(async {})).await);
    }

    #[test]
    fn test_local_model_selects_local_source() {
        let cli = Cli::parse_from(["aquarium", "--model", "local", "--url", "http://127.0.0.1:9000"]);
        assert_eq!(
            cli.agent_config().source,
            SourceSelection::Local {
                url: "http://127.0.0.1:9000".to_string()
            }
        );
    }
}
