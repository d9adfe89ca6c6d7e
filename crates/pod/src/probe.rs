//! HTTP health probe for the workload endpoint.

use std::time::Duration;

use tracing::debug;

/// Whether an HTTP server answers on `http://{ip}:{port}/` with a sub-400
/// status. Any transport failure counts as "not running".
pub async fn http_server_running(ip: &str, port: u16, timeout: Duration) -> bool {
    let url = format!("http://{ip}:{port}/");
    let Ok(client) = reqwest::Client::builder().timeout(timeout).build() else {
        return false;
    };
    match client.get(&url).send().await {
        Ok(response) => response.status().as_u16() < 400,
        Err(e) => {
            debug!(%url, error = %e, "Health probe failed");
            false
        }
    }
}
