//! Docker Engine API payload structures
//!
//! These structs represent the JSON bodies sent to and received from the
//! Docker Engine API. Field names follow the API's PascalCase convention.

use serde::{Deserialize, Serialize};

/// Body of `POST /containers/create`
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerCreate {
    pub image: String,
    pub cmd: Vec<String>,
    pub host_config: HostConfig,
}

/// Host-side settings for a new container
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    pub network_mode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security_opt: Vec<String>,
}

/// Body of `POST /networks/{name}/connect`
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkConnect {
    pub container: String,
}

/// Body of `POST /containers/{id}/exec`
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ExecCreate {
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub tty: bool,
}

/// Body of `POST /exec/{id}/start`
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ExecStart {
    pub detach: bool,
    pub tty: bool,
}

/// Response carrying a newly created object's id
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct IdResponse {
    pub id: String,
}

/// Response of `GET /exec/{id}/json`
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct ExecInspect {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub exit_code: Option<i64>,
}

/// Error body returned by the Engine API
#[derive(Deserialize, Debug, Clone)]
pub struct ApiErrorBody {
    pub message: String,
}
