//! Sandbox Manager - provisions and removes sandbox containers
//!
//! The SandboxManager is responsible for:
//! - Creating the container from the configured image
//! - Attaching it to the agent network and starting it
//! - Opening the interactive terminal and initialising the shell
//! - Force-removing the container when the caller is done with it

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::config::{ContainerCreate, HostConfig};
use super::docker::{DockerClient, DockerContainer, DockerTerminal};
use super::{SandboxError, Terminal};
use crate::config::SandboxConfig;

/// A freshly provisioned sandbox: shared exec handle plus its one terminal
pub struct ProvisionedSandbox {
    /// Handle for one-off commands, shareable with the tailer
    pub container: Arc<DockerContainer>,
    /// Interactive terminal, to be owned by exactly one controller
    pub terminal: DockerTerminal,
}

/// Creates and destroys sandbox containers
pub struct SandboxManager {
    client: DockerClient,
    config: SandboxConfig,
}

impl SandboxManager {
    /// Create a new SandboxManager talking to the configured Docker socket
    pub fn new(config: SandboxConfig) -> Self {
        let client = DockerClient::new(config.socket_path.clone(), config.api_version.clone());
        Self { client, config }
    }

    /// Provision a sandbox and attach its terminal
    ///
    /// Returns a sandbox whose terminal has already received the configured
    /// init lines (user switch, transcript recording).
    pub async fn provision(&self) -> Result<ProvisionedSandbox, SandboxError> {
        let start_time = Instant::now();

        let container_id = self
            .client
            .create_container(&ContainerCreate {
                image: self.config.image.clone(),
                cmd: self.config.entry_command.clone(),
                host_config: HostConfig {
                    network_mode: self.config.network.clone(),
                    security_opt: self.config.security_options.clone(),
                },
            })
            .await?;

        info!(container = %container_id, image = %self.config.image, "Sandbox container created");

        let terminal = match self.setup(&container_id).await {
            Ok(terminal) => terminal,
            Err(e) => {
                warn!(container = %container_id, error = %e, "Sandbox setup failed, removing container");
                if let Err(remove_err) = self.client.remove_container(&container_id, true).await {
                    warn!(container = %container_id, error = %remove_err, "Failed to remove half-provisioned container");
                }
                return Err(e);
            }
        };

        info!(
            container = %container_id,
            elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0,
            "Sandbox terminal attached"
        );

        Ok(ProvisionedSandbox {
            container: Arc::new(DockerContainer::new(self.client.clone(), container_id)),
            terminal,
        })
    }

    async fn setup(&self, container_id: &str) -> Result<DockerTerminal, SandboxError> {
        self.client.connect_network(&self.config.network, container_id).await?;
        self.client.start_container(container_id).await?;
        info!(container = %container_id, network = %self.config.network, "Sandbox container started");

        let mut terminal = DockerTerminal::open(&self.client, container_id, &self.config.shell).await?;
        for line in &self.config.init_commands {
            terminal.send_line(line).await?;
        }
        Ok(terminal)
    }

    /// Force-remove a sandbox container
    pub async fn destroy(&self, container_id: &str) -> Result<(), SandboxError> {
        info!(container = %container_id, "Removing sandbox container");
        self.client.remove_container(container_id, true).await
    }
}
