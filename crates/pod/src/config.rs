//! Tool configuration.
//!
//! Read from `config.yaml` in the working directory (or a `--config` path).
//! Every field has a default so a missing file still yields a runnable
//! config. The API key never lives here; it comes from the
//! `RUNPOD_API_KEY` environment variable only.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::api::CloudType;

/// Default GraphQL endpoint.
pub const DEFAULT_API_URL: &str = "https://api.runpod.io/graphql";

/// Full configuration surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// GraphQL endpoint URL.
    pub api_url: String,
    /// Explicit pod id to use, skipping acquisition entirely.
    pub target_pod_id: Option<String>,
    /// Reuse the persisted latest pod when possible.
    pub reuse: bool,
    /// Base pod name; the actual name is `{user}-{pod_name}`.
    pub pod_name: String,
    /// GPU type id for new and resumed pods.
    pub gpu_type_id: String,
    /// GPUs per pod.
    pub gpu_count: u32,
    /// Port the workload's HTTP server listens on inside the pod.
    pub app_port: u16,
    /// Persistent volume size for new pods.
    pub volume_in_gb: u32,
    /// Container disk size for new pods.
    pub container_disk_in_gb: u32,
    /// Mount path of the persistent volume.
    pub volume_mount_path: String,
    /// Pod template id for new pods.
    pub template_id: String,
    /// Command launched inside the tmux session.
    pub remote_command: String,
    /// tmux session name template; `{pod_id}` is substituted literally.
    pub tmux_session_name: String,
    /// Remote log file template; `{pod_id}` is substituted literally.
    pub tmux_log_file: String,
    /// Kill and recreate the session even when it is already serving.
    pub restart_command: bool,
    /// Seconds to wait for a created/resumed pod to become ready.
    pub startup_wait: u64,
    /// Stream the session log after launch until interrupted.
    pub stream_output: bool,
    /// Cloud placement for new pods.
    pub cloud_type: Option<CloudType>,
    /// Hugging Face token injected into new pods as `HF_TOKEN`.
    pub hf_token: Option<String>,
    /// Username override; otherwise `.user.yaml` or an interactive prompt.
    pub user_name: Option<String>,
    /// Maintain a `Host` alias for the pod in `~/.ssh/config`.
    pub update_ssh_config: bool,
    /// Git identity to configure on the pod after connecting.
    pub git: Option<GitIdentity>,
    pub ssh: SshConfig,
}

/// Git identity applied on the remote host.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// SSH client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    pub username: String,
    /// Per-attempt connect timeout in seconds.
    pub timeout: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            timeout: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            target_pod_id: None,
            reuse: true,
            pod_name: "dashboard".to_string(),
            gpu_type_id: "NVIDIA A40".to_string(),
            gpu_count: 1,
            app_port: 8000,
            volume_in_gb: 50,
            container_disk_in_gb: 40,
            volume_mount_path: "/workspace".to_string(),
            template_id: String::new(),
            remote_command: "python -m http.server 8000".to_string(),
            tmux_session_name: "pod-{pod_id}".to_string(),
            tmux_log_file: "/tmp/pod-{pod_id}.log".to_string(),
            restart_command: false,
            startup_wait: 300,
            stream_output: true,
            cloud_type: None,
            hf_token: None,
            user_name: None,
            update_ssh_config: true,
            git: None,
            ssh: SshConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path` if it exists, defaults otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// tmux session name for a pod.
    #[must_use]
    pub fn session_name(&self, pod_id: &str) -> String {
        self.tmux_session_name.replace("{pod_id}", pod_id)
    }

    /// Remote log file path for a pod.
    #[must_use]
    pub fn log_file(&self, pod_id: &str) -> String {
        self.tmux_log_file.replace("{pod_id}", pod_id)
    }
}
