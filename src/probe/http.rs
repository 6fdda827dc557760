//! HTTP GET probe implementation.

use std::time::{Duration, Instant};

use super::ProbeError;

/// Issue a GET against the given URL and compare the status code.
///
/// Success requires a response within the timeout whose status equals
/// `expected_status`. Returns the success message.
pub async fn run_http_probe(
    url: &str,
    timeout: Duration,
    expected_status: u16,
) -> Result<String, ProbeError> {
    let url = normalize_url(url);

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    let start = Instant::now();

    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    let status = response.status().as_u16();
    let elapsed_ms = start.elapsed().as_millis();

    if status == expected_status {
        Ok(format!("HTTP {} in {} ms", status, elapsed_ms))
    } else {
        Err(ProbeError::Network(format!(
            "unexpected status {} (expected {})",
            status, expected_status
        )))
    }
}

/// Prepend a scheme when the stored URL lacks one.
pub(super) fn normalize_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    }
}
