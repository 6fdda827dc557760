//! Configuration module for statuspulse.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "statuspulse.db")
    pub db_path: String,
    /// Size of the probe worker pool (default: 16)
    pub workers: usize,
    /// Seconds between registry re-syncs against the store (default: 30)
    pub refresh_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "statuspulse.db".to_string(),
            workers: 16,
            refresh_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATUSPULSE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `STATUSPULSE_DB_PATH`: Database file path (default: "statuspulse.db")
    /// - `STATUSPULSE_WORKERS`: probe worker pool size (default: 16)
    /// - `STATUSPULSE_REFRESH_SECS`: registry re-sync interval (default: 30)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("STATUSPULSE_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("STATUSPULSE_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(workers_str) = env::var("STATUSPULSE_WORKERS") {
            if let Ok(workers) = workers_str.parse() {
                cfg.workers = workers;
            }
        }

        if let Ok(refresh_str) = env::var("STATUSPULSE_REFRESH_SECS") {
            if let Ok(refresh) = refresh_str.parse() {
                cfg.refresh_secs = refresh;
            }
        }

        cfg
    }
}
