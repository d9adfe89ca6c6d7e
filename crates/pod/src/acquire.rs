//! Pod acquisition.
//!
//! Decides, for one run, whether to reuse a running pod, resume a stopped
//! one (exact GPU match first, then a fuzzy scan across the account's
//! pods), or create a new pod, then drives the readiness poll. A resume
//! call that fails to dispatch falls through to creation; a pod that
//! accepted a resume/create and then never became ready is a hard error,
//! never a fallback to creation.

use std::path::Path;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{ApiError, CreatePodRequest, Pod, PortBinding, PortKind, RunPodClient};
use crate::config::Config;
use crate::state;

/// Errors from the acquisition engine. All are fatal for the run.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Failed to create pod")]
    CreateRejected,

    #[error("Pod {pod_id} failed to become ready within {timeout_secs}s")]
    ReadyTimeout { pod_id: String, timeout_secs: u64 },

    #[error("No SSH port (tcp/22) exposed on this pod")]
    MissingSshPort,

    #[error("No TCP port found for app port {0}")]
    MissingAppPort(u16),
}

/// The two port bindings every launched pod must expose.
#[derive(Debug, Clone)]
pub struct PodEndpoints {
    pub ssh: PortBinding,
    pub app: PortBinding,
}

/// Produce a ready pod id, creating/resuming as needed.
///
/// An explicitly configured target pod id is trusted as-is. Otherwise, when
/// reuse is enabled, the persisted latest pod is checked first; a stopped
/// latest pod with the wrong GPU type widens the search once to any stopped
/// pod that shares the `{user}-{pod_name}` naming convention before a new
/// pod is created.
pub async fn acquire_pod(
    client: &RunPodClient,
    cfg: &Config,
    user: &str,
    state_dir: &Path,
    token: &CancellationToken,
) -> Result<String, AcquireError> {
    if let Some(target) = &cfg.target_pod_id {
        println!("\n1. Using existing pod: {target}");
        return Ok(target.clone());
    }

    if cfg.reuse {
        if let Some(pod_id) = try_reuse_latest(client, cfg, user, state_dir, token).await? {
            return Ok(pod_id);
        }
    }

    create_new_pod(client, cfg, user, state_dir, token).await
}

/// The reuse path. `Ok(None)` means "fall through to creation".
async fn try_reuse_latest(
    client: &RunPodClient,
    cfg: &Config,
    user: &str,
    state_dir: &Path,
    token: &CancellationToken,
) -> Result<Option<String>, AcquireError> {
    let Some(latest) = state::get_latest_pod_id(state_dir) else {
        return Ok(None);
    };

    println!("\n1. Checking if latest pod {latest} is available...");
    let Some(pod) = client.get_pod(&latest).await? else {
        println!("   Latest pod {latest} not found (may have been deleted).");
        println!("   Will create a new pod.");
        return Ok(None);
    };

    if pod.is_running() {
        println!("   Latest pod {latest} is available and running!");
        println!("   Reusing existing pod instead of creating a new one.");
        return Ok(Some(latest));
    }

    println!("   Latest pod {latest} is stopped.");
    let pod_gpu = pod.gpu_type_id().unwrap_or_default();

    if pod_gpu == cfg.gpu_type_id {
        println!("   GPU type matches ({pod_gpu}). Resuming pod...");
        if client.resume_pod(&latest, cfg.gpu_count).await? {
            wait_ready(client, &latest, cfg.startup_wait, token).await?;
            return Ok(Some(latest));
        }
        // Dispatch failure is recoverable; do not retry the resume.
        println!("   Failed to resume pod {latest}");
        println!("   Will create a new pod.");
        return Ok(None);
    }

    println!(
        "   WARNING: Latest pod has GPU type '{pod_gpu}' but config specifies '{}'",
        cfg.gpu_type_id
    );
    println!("   Searching for stopped pods with matching GPU type...");

    let Some(matched) = find_matching_stopped_pod(client, cfg, user).await? else {
        println!(
            "   No stopped pods found with GPU type '{}'",
            cfg.gpu_type_id
        );
        println!("   Will create a new pod.");
        return Ok(None);
    };

    println!("   Found stopped pod {matched} with matching GPU type!");
    println!("   Resuming pod {matched}...");
    if client.resume_pod(&matched, cfg.gpu_count).await? {
        state::save_latest_pod_id(state_dir, &matched);
        wait_ready(client, &matched, cfg.startup_wait, token).await?;
        return Ok(Some(matched));
    }

    println!("   Failed to resume pod {matched}");
    println!("   Will create a new pod.");
    Ok(None)
}

/// First stopped pod whose name carries the `{user}-{pod_name}` prefix and
/// whose GPU type matches the config, in server listing order.
async fn find_matching_stopped_pod(
    client: &RunPodClient,
    cfg: &Config,
    user: &str,
) -> Result<Option<String>, ApiError> {
    let prefix = format!("{user}-{}", cfg.pod_name);
    let pods = client.list_pods().await?;
    Ok(pods
        .into_iter()
        .find(|pod| {
            pod.name.starts_with(&prefix)
                && pod.gpu_type_id() == Some(cfg.gpu_type_id.as_str())
                && !pod.is_running()
        })
        .map(|pod| pod.id))
}

async fn create_new_pod(
    client: &RunPodClient,
    cfg: &Config,
    user: &str,
    state_dir: &Path,
    token: &CancellationToken,
) -> Result<String, AcquireError> {
    let name = format!("{user}-{}", cfg.pod_name);
    println!(
        "\n1. Creating new pod '{name}' with GPU {} and template {}",
        cfg.gpu_type_id, cfg.template_id
    );

    let req = CreatePodRequest {
        template_id: cfg.template_id.clone(),
        name,
        gpu_type_id: cfg.gpu_type_id.clone(),
        gpu_count: cfg.gpu_count,
        app_port: cfg.app_port,
        volume_gb: cfg.volume_in_gb,
        container_disk_gb: cfg.container_disk_in_gb,
        volume_mount_path: cfg.volume_mount_path.clone(),
        cloud_type: cfg.cloud_type,
        hf_token: cfg.hf_token.clone(),
    };

    let Some(pod_id) = client.create_pod(&req).await? else {
        return Err(AcquireError::CreateRejected);
    };

    println!("   Pod created successfully! ID: {pod_id}");
    info!(pod_id, "Created new pod");
    state::save_latest_pod_id(state_dir, &pod_id);

    wait_ready(client, &pod_id, cfg.startup_wait, token).await?;
    Ok(pod_id)
}

async fn wait_ready(
    client: &RunPodClient,
    pod_id: &str,
    timeout_secs: u64,
    token: &CancellationToken,
) -> Result<(), AcquireError> {
    if client.wait_for_pod_ready(pod_id, timeout_secs, token).await? {
        Ok(())
    } else {
        Err(AcquireError::ReadyTimeout {
            pod_id: pod_id.to_string(),
            timeout_secs,
        })
    }
}

/// Extract the SSH (tcp/22) and application port bindings from a ready pod.
pub fn find_endpoints(pod: &Pod, app_port: u16) -> Result<PodEndpoints, AcquireError> {
    let ports = pod
        .runtime
        .as_ref()
        .map(|r| r.ports.as_slice())
        .unwrap_or_default();

    let ssh = ports
        .iter()
        .find(|p| p.kind == PortKind::Tcp && p.private_port == 22)
        .cloned()
        .ok_or(AcquireError::MissingSshPort)?;
    let app = ports
        .iter()
        .find(|p| p.kind == PortKind::Tcp && p.private_port == app_port)
        .cloned()
        .ok_or(AcquireError::MissingAppPort(app_port))?;

    Ok(PodEndpoints { ssh, app })
}
