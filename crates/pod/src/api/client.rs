//! RunPod GraphQL API client.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::models::{
    CreatePodRequest, DeployData, Envelope, EnvVar, GpuType, GpuTypesData, MyselfData, Pod,
    PodData, TemplateData,
};
use super::query;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Polling interval when waiting for a pod to come up.
const POLL_INTERVAL_SECS: u64 = 10;

/// Errors that can occur during API operations.
#[derive(Error, Debug)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned a non-success status.
    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    /// Response body did not match the expected shape.
    #[error("Malformed response: missing {0}")]
    Malformed(&'static str),

    /// Response body was not valid JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Client for the RunPod GraphQL endpoint.
///
/// All operations are one POST each; the API key travels on the query string.
/// The GPU catalog is fetched once per client instance and memoized.
pub struct RunPodClient {
    http: reqwest::Client,
    api_key: String,
    api_url: String,
    gpu_types: OnceCell<Vec<GpuType>>,
}

impl RunPodClient {
    /// Create a new client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>, api_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            api_url: api_url.into(),
            gpu_types: OnceCell::new(),
        })
    }

    /// Execute one GraphQL document and parse the response envelope.
    async fn graphql<T: serde::de::DeserializeOwned>(
        &self,
        document: &str,
    ) -> Result<Envelope<T>, ApiError> {
        let url = format!("{}?api_key={}", self.api_url, self.api_key);
        debug!(url = %self.api_url, "POST GraphQL document");

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "query": document }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %text, "API request failed");
            return Err(ApiError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| {
            warn!(error = %e, body = %text, "Failed to parse response");
            ApiError::Serialization(e)
        })
    }

    /// The GPU type catalog, fetched on first use and cached for the
    /// client's lifetime.
    pub async fn gpu_types(&self) -> Result<&[GpuType], ApiError> {
        let types = self
            .gpu_types
            .get_or_try_init(|| async {
                let envelope: Envelope<GpuTypesData> = self.graphql(query::GPU_TYPES).await?;
                envelope
                    .data
                    .map(|d| d.gpu_types)
                    .ok_or(ApiError::Malformed("gpuTypes"))
            })
            .await?;
        Ok(types)
    }

    /// Fetch one pod. Unknown ids resolve to `None`, not an error.
    pub async fn get_pod(&self, pod_id: &str) -> Result<Option<Pod>, ApiError> {
        let envelope: Envelope<PodData> = self.graphql(&query::pod(pod_id)).await?;
        Ok(envelope.data.and_then(|d| d.pod))
    }

    /// All pods owned by the authenticated account, in server order.
    pub async fn list_pods(&self) -> Result<Vec<Pod>, ApiError> {
        let envelope: Envelope<MyselfData> = self.graphql(query::MY_PODS).await?;
        Ok(envelope
            .data
            .and_then(|d| d.myself)
            .map(|m| m.pods)
            .unwrap_or_default())
    }

    /// The account's registered SSH public key, if any.
    pub async fn account_public_key(&self) -> Result<Option<String>, ApiError> {
        let envelope: Envelope<MyselfData> = self.graphql(query::ACCOUNT_PUBLIC_KEY).await?;
        Ok(envelope.data.and_then(|d| d.myself).and_then(|m| m.pub_key))
    }

    /// Declared environment of a template; empty when the template declares
    /// none.
    pub async fn template_env(&self, template_id: &str) -> Result<Vec<EnvVar>, ApiError> {
        let envelope: Envelope<TemplateData> =
            self.graphql(&query::template_env(template_id)).await?;
        Ok(envelope
            .data
            .and_then(|d| d.pod_template)
            .and_then(|t| t.env)
            .unwrap_or_default())
    }

    /// Deploy a new on-demand pod.
    ///
    /// The GPU type is validated against the catalog before any mutating
    /// call; an unknown type is narrated with fuzzy suggestions and resolves
    /// to `Ok(None)`. Server-side rejection also resolves to `Ok(None)`;
    /// the caller decides exit behavior.
    pub async fn create_pod(&self, req: &CreatePodRequest) -> Result<Option<String>, ApiError> {
        let catalog = self.gpu_types().await?;
        if !catalog.iter().any(|g| g.id == req.gpu_type_id) {
            let valid: Vec<String> = catalog.iter().map(|g| g.id.clone()).collect();
            let suggestions = suggest_gpu_types(&req.gpu_type_id, &valid, 5);
            println!("ERROR: Unknown gpu_type: {:?}", req.gpu_type_id);
            if let Some((best, rest)) = suggestions.split_first() {
                println!("Did you mean: {best:?}");
                if !rest.is_empty() {
                    println!("Other close matches:");
                    for candidate in rest {
                        println!("  - {candidate}");
                    }
                }
            }
            println!("\nValid gpu_type values are:");
            for id in &valid {
                println!("  - {id}");
            }
            return Ok(None);
        }

        println!(
            "Creating pod with template {}, GPU: {}, count: {}",
            req.template_id, req.gpu_type_id, req.gpu_count
        );
        println!(
            "   Volume: {}GB, container disk: {}GB",
            req.volume_gb, req.container_disk_gb
        );

        // Account key absence is a warning, not an error.
        let public_key = self.account_public_key().await?;
        if public_key.is_some() {
            println!("   SSH key retrieved from account");
        } else {
            println!("   WARNING: No SSH key found on account");
        }

        let mut overrides: Vec<(String, String)> = Vec::new();
        if let Some(key) = public_key {
            overrides.push(("PUBLIC_KEY".to_string(), key));
        }
        if let Some(token) = &req.hf_token {
            overrides.push(("HF_TOKEN".to_string(), token.clone()));
        }

        // The deploy input replaces the template env wholesale, so overrides
        // must be merged into the declared env rather than sent alone.
        let merged = if overrides.is_empty() {
            None
        } else {
            let template_env = self.template_env(&req.template_id).await?;
            let merged = query::merge_env(&template_env, &overrides);
            let keys: Vec<&str> = merged.iter().map(|v| v.key.as_str()).collect();
            println!("   Env keys: {keys:?}");
            Some(merged)
        };

        let document = query::deploy(req, merged.as_deref());
        let envelope: Envelope<DeployData> = self.graphql(&document).await?;

        if !envelope.errors.is_empty() {
            for error in &envelope.errors {
                warn!(message = %error.message, "Server rejected pod deploy");
            }
            return Ok(None);
        }

        Ok(envelope
            .data
            .and_then(|d| d.pod_find_and_deploy_on_demand)
            .map(|p| p.id))
    }

    /// Stop a running pod. Server error lists are logged and yield `false`.
    pub async fn stop_pod(&self, pod_id: &str) -> Result<bool, ApiError> {
        println!("Stopping pod {pod_id}...");
        let envelope: Envelope<serde_json::Value> = self.graphql(&query::pod_stop(pod_id)).await?;
        if !envelope.errors.is_empty() {
            for error in &envelope.errors {
                warn!(message = %error.message, pod_id, "Error stopping pod");
            }
            return Ok(false);
        }
        println!("Pod {pod_id} stopped (can be resumed later)");
        Ok(true)
    }

    /// Resume a stopped pod.
    pub async fn resume_pod(&self, pod_id: &str, gpu_count: u32) -> Result<bool, ApiError> {
        println!("Resuming pod {pod_id}...");
        let envelope: Envelope<serde_json::Value> =
            self.graphql(&query::pod_resume(pod_id, gpu_count)).await?;
        if !envelope.errors.is_empty() {
            for error in &envelope.errors {
                warn!(message = %error.message, pod_id, "Error resuming pod");
            }
            return Ok(false);
        }
        println!("Pod {pod_id} resumed");
        Ok(true)
    }

    /// Terminate (delete) a pod.
    pub async fn terminate_pod(&self, pod_id: &str) -> Result<bool, ApiError> {
        println!("Terminating pod {pod_id}...");
        let envelope: Envelope<serde_json::Value> =
            self.graphql(&query::pod_terminate(pod_id)).await?;
        if !envelope.errors.is_empty() {
            for error in &envelope.errors {
                warn!(message = %error.message, pod_id, "Error terminating pod");
            }
            return Ok(false);
        }
        println!("Pod {pod_id} terminated");
        Ok(true)
    }

    /// Poll until the pod reports a runtime with at least one port.
    ///
    /// Checks immediately, then every [`POLL_INTERVAL_SECS`]; returns `false`
    /// once the elapsed time reaches `timeout_secs` without readiness, or
    /// when `token` is cancelled.
    pub async fn wait_for_pod_ready(
        &self,
        pod_id: &str,
        timeout_secs: u64,
        token: &CancellationToken,
    ) -> Result<bool, ApiError> {
        println!("Waiting for pod {pod_id} to be ready (timeout: {timeout_secs}s)...");
        let start = Instant::now();

        loop {
            let pod = self.get_pod(pod_id).await?;
            let ready = pod
                .as_ref()
                .and_then(|p| p.runtime.as_ref())
                .is_some_and(|r| !r.ports.is_empty());

            if ready {
                println!("Pod {pod_id} is ready");
                return Ok(true);
            }

            if start.elapsed() >= Duration::from_secs(timeout_secs) {
                warn!(pod_id, timeout_secs, "Timed out waiting for pod readiness");
                return Ok(false);
            }

            println!(
                "  [{}s] Still waiting for pod to initialize...",
                start.elapsed().as_secs()
            );
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)) => {}
                () = token.cancelled() => return Ok(false),
            }
        }
    }
}

/// Normalize a string for human-ish fuzzy matching: lowercase, collapse all
/// non-alphanumeric runs to single spaces.
#[must_use]
pub fn normalize_for_match(s: &str) -> String {
    s.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rank catalog ids by similarity to `given` and return the top `k`.
///
/// An exact match after normalization is a strong "did you mean" and
/// short-circuits to a single suggestion.
#[must_use]
pub fn suggest_gpu_types(given: &str, valid_ids: &[String], k: usize) -> Vec<String> {
    let given_n = normalize_for_match(given);

    if let Some(exact) = valid_ids
        .iter()
        .find(|id| normalize_for_match(id) == given_n)
    {
        return vec![exact.clone()];
    }

    let mut scored: Vec<(f64, &String)> = valid_ids
        .iter()
        .map(|id| {
            (
                strsim::normalized_levenshtein(&given_n, &normalize_for_match(id)),
                id,
            )
        })
        .collect();
    // Stable sort keeps catalog order among equal scores.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(_, id)| id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog() -> Vec<String> {
        vec![
            "NVIDIA A100 80GB PCIe".to_string(),
            "NVIDIA A40".to_string(),
            "NVIDIA GeForce RTX 4090".to_string(),
            "NVIDIA H100 PCIe".to_string(),
            "NVIDIA L40S".to_string(),
        ]
    }

    #[test]
    fn test_normalize_folds_case_and_punctuation() {
        assert_eq!(normalize_for_match("NVIDIA A100 80GB PCIe"), "nvidia a100 80gb pcie");
        assert_eq!(normalize_for_match("nvidia-a100_80gb  pcie"), "nvidia a100 80gb pcie");
        assert_eq!(normalize_for_match("  A40!! "), "a40");
    }

    #[test]
    fn test_suggest_exact_normalized_match_short_circuits() {
        let suggestions = suggest_gpu_types("nvidia a40", &catalog(), 5);
        assert_eq!(suggestions, ["NVIDIA A40"]);
    }

    #[test]
    fn test_suggest_ranks_closest_first() {
        let suggestions = suggest_gpu_types("NVIDIA A100 80GB", &catalog(), 5);
        assert_eq!(suggestions.len(), 5);
        assert_eq!(suggestions[0], "NVIDIA A100 80GB PCIe");
    }

    #[test]
    fn test_suggest_caps_result_count() {
        let suggestions = suggest_gpu_types("totally unknown", &catalog(), 3);
        assert_eq!(suggestions.len(), 3);
    }

    async fn mount_gpu_types(server: &MockServer, expect: Option<u64>) {
        let mock = Mock::given(method("POST"))
            .and(path("/"))
            .and(query_param("api_key", "test-key"))
            .and(body_string_contains("gpuTypes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"gpuTypes": [
                    {"id": "NVIDIA A40", "displayName": "A40", "memoryInGb": 48},
                    {"id": "NVIDIA A100 80GB PCIe", "displayName": "A100 80GB", "memoryInGb": 80}
                ]}
            })));
        match expect {
            Some(n) => mock.expect(n).mount(server).await,
            None => mock.mount(server).await,
        }
    }

    #[tokio::test]
    async fn test_gpu_types_cached_for_client_lifetime() {
        let server = MockServer::start().await;
        mount_gpu_types(&server, Some(1)).await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        let first = client.gpu_types().await.unwrap().len();
        let second = client.gpu_types().await.unwrap().len();
        assert_eq!(first, 2);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn test_get_pod_absent_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("pod(input:"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"pod": null},
                "errors": [{"message": "Something went wrong"}]
            })))
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        assert!(client.get_pod("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_pod_transport_error_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        let err = client.get_pod("p1").await.unwrap_err();
        match err {
            ApiError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_pod_rejects_unknown_gpu_before_mutating() {
        let server = MockServer::start().await;
        mount_gpu_types(&server, None).await;
        // The deploy mutation must never be issued.
        Mock::given(method("POST"))
            .and(body_string_contains("podFindAndDeployOnDemand"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        let req = CreatePodRequest {
            template_id: "tmpl".into(),
            name: "alice-job".into(),
            gpu_type_id: "a100".into(),
            gpu_count: 1,
            app_port: 8000,
            volume_gb: 50,
            container_disk_gb: 40,
            volume_mount_path: "/workspace".into(),
            cloud_type: None,
            hf_token: None,
        };
        assert!(client.create_pod(&req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_pod_merges_env_and_returns_id() {
        let server = MockServer::start().await;
        mount_gpu_types(&server, None).await;
        Mock::given(method("POST"))
            .and(body_string_contains("pubKey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"myself": {"pubKey": "ssh-ed25519 AAAA"}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("podTemplate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"podTemplate": {"env": [
                    {"key": "PORT", "value": "8000"},
                    {"key": "PUBLIC_KEY", "value": "stale"}
                ]}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("podFindAndDeployOnDemand"))
            .and(body_string_contains("PUBLIC_KEY"))
            .and(body_string_contains("HF_TOKEN"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"podFindAndDeployOnDemand": {"id": "new-pod", "name": "alice-job",
                         "imageName": "img"}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        let req = CreatePodRequest {
            template_id: "tmpl".into(),
            name: "alice-job".into(),
            gpu_type_id: "NVIDIA A40".into(),
            gpu_count: 1,
            app_port: 8000,
            volume_gb: 50,
            container_disk_gb: 40,
            volume_mount_path: "/workspace".into(),
            cloud_type: None,
            hf_token: Some("hf_secret".into()),
        };
        let created = client.create_pod(&req).await.unwrap();
        assert_eq!(created.as_deref(), Some("new-pod"));
    }

    #[tokio::test]
    async fn test_create_pod_server_errors_resolve_to_none() {
        let server = MockServer::start().await;
        mount_gpu_types(&server, None).await;
        Mock::given(method("POST"))
            .and(body_string_contains("pubKey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"myself": {"pubKey": null}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("podFindAndDeployOnDemand"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [{"message": "no instances available"}]
            })))
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        let req = CreatePodRequest {
            template_id: "tmpl".into(),
            name: "alice-job".into(),
            gpu_type_id: "NVIDIA A40".into(),
            gpu_count: 1,
            app_port: 8000,
            volume_gb: 50,
            container_disk_gb: 40,
            volume_mount_path: "/workspace".into(),
            cloud_type: None,
            hf_token: None,
        };
        assert!(client.create_pod(&req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mutation_error_list_yields_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("podResume"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": null,
                "errors": [{"message": "pod is not stopped"}]
            })))
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        assert!(!client.resume_pod("p1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_pod_ready_immediate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("pod(input:"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"pod": {
                    "id": "p1",
                    "name": "alice-job",
                    "desiredStatus": "RUNNING",
                    "runtime": {"ports": [{"ip": "1.2.3.4", "isIpPublic": true,
                                           "privatePort": 22, "publicPort": 10022,
                                           "type": "tcp"}],
                                "uptimeInSeconds": 3}
                }}
            })))
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        let token = CancellationToken::new();
        assert!(client.wait_for_pod_ready("p1", 60, &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_pod_ready_exhausts_budget() {
        let server = MockServer::start().await;
        // Runtime never appears; a zero budget still performs one probe.
        Mock::given(method("POST"))
            .and(body_string_contains("pod(input:"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"pod": {"id": "p1", "name": "alice-job",
                                 "desiredStatus": "EXITED", "runtime": null}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RunPodClient::new("test-key", server.uri()).unwrap();
        let token = CancellationToken::new();
        assert!(!client.wait_for_pod_ready("p1", 0, &token).await.unwrap());
    }
}
