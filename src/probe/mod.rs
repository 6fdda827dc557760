//! Probe executors for the supported check types.
//!
//! Every executor enforces the resolved timeout itself and resolves all
//! failures, including malformed addresses, into a failing [`CheckResult`].
//! Nothing escapes the executor boundary: one target's bad configuration
//! must never abort the cycle for its siblings.

mod actuator;
mod http;
mod ping;
mod tcp;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::CheckType;
use crate::resolver::EffectiveConfig;

/// Probe error types, internal to the executors.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Verdict of a single probe run. Folded into the target's health fields,
/// never persisted as its own row.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub success: bool,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

impl CheckResult {
    pub fn pass(message: String) -> Self {
        Self {
            success: true,
            message,
            observed_at: Utc::now(),
        }
    }

    pub fn fail(message: String) -> Self {
        Self {
            success: false,
            message,
            observed_at: Utc::now(),
        }
    }
}

/// Run the probe selected by the effective configuration.
pub async fn run_probe(cfg: &EffectiveConfig) -> CheckResult {
    // Small jitter to avoid a thundering herd when many targets share an
    // interval.
    let jitter = rand::random::<u64>() % 100;
    tokio::time::sleep(Duration::from_millis(jitter)).await;

    let outcome = match cfg.check_type {
        CheckType::Ping => ping::run_ping_probe(&cfg.url, cfg.timeout).await,
        CheckType::HttpGet => http::run_http_probe(&cfg.url, cfg.timeout, cfg.expected_status).await,
        CheckType::SpringBootHealth => actuator::run_actuator_probe(&cfg.url, cfg.timeout).await,
        CheckType::TcpPort => tcp::run_tcp_probe(&cfg.url, cfg.timeout).await,
        CheckType::None => Err(ProbeError::Config("check type NONE is not probeable".into())),
    };

    match outcome {
        Ok(message) => CheckResult::pass(message),
        Err(e) => CheckResult::fail(e.to_string()),
    }
}
