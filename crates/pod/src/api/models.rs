//! Wire model for the RunPod GraphQL API.

use serde::Deserialize;

/// Generic GraphQL response envelope: `data` plus an optional error list.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

/// A single entry in a GraphQL `errors` list.
#[derive(Debug, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

/// Desired lifecycle state as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DesiredStatus {
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "EXITED")]
    Stopped,
    #[serde(other)]
    Unspecified,
}

/// A rented GPU pod.
///
/// `machine` is present once the pod has been scheduled onto hardware;
/// `runtime` is present only while the pod is actually running.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub desired_status: Option<DesiredStatus>,
    pub machine: Option<Machine>,
    pub runtime: Option<PodRuntime>,
}

impl Pod {
    /// A pod counts as running iff the server reports a runtime descriptor.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// GPU type the pod is scheduled on, if any.
    #[must_use]
    pub fn gpu_type_id(&self) -> Option<&str> {
        self.machine.as_ref().and_then(|m| m.gpu_type_id.as_deref())
    }
}

/// Hardware assignment for a scheduled pod.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub gpu_type_id: Option<String>,
}

/// Server-reported liveness info, present only while running.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRuntime {
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    #[serde(default)]
    pub uptime_in_seconds: u64,
}

/// Protocol of an exposed pod port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Tcp,
    Http,
}

/// One exposed network port of a running pod.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub ip: String,
    #[serde(default)]
    pub is_ip_public: bool,
    pub private_port: u16,
    pub public_port: u16,
    #[serde(rename = "type")]
    pub kind: PortKind,
}

/// GPU catalog entry, fetched once per client instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuType {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub memory_in_gb: Option<u32>,
}

/// One key/value pair of a template environment. Order matters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvVar {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Cloud placement for new pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CloudType {
    Secure,
    Community,
}

impl std::fmt::Display for CloudType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secure => write!(f, "SECURE"),
            Self::Community => write!(f, "COMMUNITY"),
        }
    }
}

/// Request to deploy a new on-demand pod.
#[derive(Debug, Clone)]
pub struct CreatePodRequest {
    pub template_id: String,
    pub name: String,
    pub gpu_type_id: String,
    pub gpu_count: u32,
    pub app_port: u16,
    pub volume_gb: u32,
    pub container_disk_gb: u32,
    pub volume_mount_path: String,
    pub cloud_type: Option<CloudType>,
    pub hf_token: Option<String>,
}

// Per-query `data` shapes.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PodData {
    pub pod: Option<Pod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GpuTypesData {
    pub gpu_types: Vec<GpuType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MyselfData {
    pub myself: Option<Myself>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Myself {
    #[serde(default)]
    pub pub_key: Option<String>,
    #[serde(default)]
    pub pods: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TemplateData {
    pub pod_template: Option<PodTemplate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PodTemplate {
    pub env: Option<Vec<EnvVar>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeployData {
    pub pod_find_and_deploy_on_demand: Option<DeployedPod>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeployedPod {
    pub id: String,
}
