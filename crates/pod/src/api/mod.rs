//! RunPod API client.
//!
//! One GraphQL endpoint, one POST per operation. [`query`] builds the
//! documents, [`models`] mirrors the wire shapes, [`client`] drives the
//! requests.

pub mod client;
pub mod models;
pub mod query;

pub use client::{normalize_for_match, suggest_gpu_types, ApiError, RunPodClient};
pub use models::{
    CloudType, CreatePodRequest, DesiredStatus, EnvVar, GpuType, Pod, PodRuntime, PortBinding,
    PortKind,
};
