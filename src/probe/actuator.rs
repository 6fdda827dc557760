//! Spring Boot actuator health probe.
//!
//! Fetches `<url>/actuator/health` and checks the standard health-endpoint
//! payload structurally: the top-level `status` indicator must be `"UP"`.
//! An HTTP 200 with a DOWN body is a failure; actuators also commonly answer
//! 503 when unhealthy, so the body is inspected regardless of status code.

use std::time::{Duration, Instant};

use serde_json::Value;

use super::{http::normalize_url, ProbeError};

const HEALTH_PATH: &str = "/actuator/health";

/// Probe a Spring Boot service's actuator health endpoint.
pub async fn run_actuator_probe(url: &str, timeout: Duration) -> Result<String, ProbeError> {
    let url = format!("{}{}", normalize_url(url).trim_end_matches('/'), HEALTH_PATH);

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

    let http_status = response.status().as_u16();
    let body: Value = response.json().await.map_err(|e| {
        ProbeError::Network(format!(
            "HTTP {} with unparseable health payload: {}",
            http_status, e
        ))
    })?;

    let message = evaluate_health_body(&body)?;
    Ok(format!("{} in {} ms", message, start.elapsed().as_millis()))
}

/// Structural check of the actuator payload.
pub(super) fn evaluate_health_body(body: &Value) -> Result<String, ProbeError> {
    match body.get("status").and_then(Value::as_str) {
        Some("UP") => Ok("health indicator UP".to_string()),
        Some(indicator) => {
            let mut message = format!("health indicator {}", indicator);
            if let Some(down) = down_components(body) {
                message.push_str(&format!(" ({})", down));
            }
            Err(ProbeError::Network(message))
        }
        None => Err(ProbeError::Network(
            "health payload has no top-level status indicator".to_string(),
        )),
    }
}

/// List the sub-components that are not UP, when the payload carries them.
fn down_components(body: &Value) -> Option<String> {
    let components = body.get("components").and_then(Value::as_object)?;
    let down: Vec<String> = components
        .iter()
        .filter_map(|(name, component)| {
            let status = component.get("status").and_then(Value::as_str)?;
            (status != "UP").then(|| format!("{}: {}", name, status))
        })
        .collect();
    if down.is_empty() {
        None
    } else {
        Some(down.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_up_payload_passes() {
        let body = json!({"status": "UP"});
        assert_eq!(evaluate_health_body(&body).unwrap(), "health indicator UP");
    }

    #[test]
    fn test_down_payload_fails_despite_http_200() {
        let body = json!({"status": "DOWN"});
        let err = evaluate_health_body(&body).unwrap_err();
        assert!(err.to_string().contains("health indicator DOWN"));
    }

    #[test]
    fn test_down_payload_surfaces_failing_components() {
        let body = json!({
            "status": "DOWN",
            "components": {
                "db": {"status": "DOWN"},
                "diskSpace": {"status": "UP"},
                "redis": {"status": "OUT_OF_SERVICE"}
            }
        });
        let message = evaluate_health_body(&body).unwrap_err().to_string();
        assert!(message.contains("db: DOWN"));
        assert!(message.contains("redis: OUT_OF_SERVICE"));
        assert!(!message.contains("diskSpace"));
    }

    #[test]
    fn test_missing_status_field_fails() {
        let body = json!({"details": {}});
        let err = evaluate_health_body(&body).unwrap_err();
        assert!(err.to_string().contains("no top-level status"));
    }

    #[tokio::test]
    async fn test_actuator_probe_appends_health_path() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = vec![0u8; 1024];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let body = r#"{"status":"UP"}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                assert!(request.starts_with("GET /actuator/health"));
            }
        });

        let message = run_actuator_probe(&format!("http://{}/", addr), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(message.contains("health indicator UP"));
    }
}
