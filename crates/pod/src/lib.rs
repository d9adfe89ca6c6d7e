//! Pod provisioning and remote workload management for RunPod.
//!
//! One invocation manages exactly one logical pod: acquire it (reuse a
//! running pod, resume a stopped one, or create a new one), wait until it is
//! ready, connect over SSH, start the workload inside a persistent tmux
//! session, and expose its HTTP endpoint.
//!
//! ## Example
//!
//! ```ignore
//! use pod::{acquire, Config, RunPodClient};
//!
//! let client = RunPodClient::new(api_key, &cfg.api_url)?;
//! let pod_id = acquire::acquire_pod(&client, &cfg, "alice", state_dir, &token).await?;
//! let pod = client.get_pod(&pod_id).await?.expect("pod just acquired");
//! let endpoints = acquire::find_endpoints(&pod, cfg.app_port)?;
//! ```

pub mod acquire;
pub mod api;
pub mod config;
pub mod probe;
pub mod ssh;
pub mod state;
pub mod tmux;

pub use acquire::{AcquireError, PodEndpoints};
pub use api::{ApiError, RunPodClient};
pub use config::Config;
pub use ssh::{ShellSession, SshError};
