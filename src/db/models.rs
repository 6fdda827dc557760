//! Entity model types shared across the engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which table a target lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Application,
    Component,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Application => "application",
            TargetKind::Component => "component",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "application" => Some(TargetKind::Application),
            "component" => Some(TargetKind::Component),
            _ => None,
        }
    }
}

/// Protocol used to probe a target. `None` means the target is not checkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    None,
    Ping,
    HttpGet,
    SpringBootHealth,
    TcpPort,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::None => "NONE",
            CheckType::Ping => "PING",
            CheckType::HttpGet => "HTTP_GET",
            CheckType::SpringBootHealth => "SPRING_BOOT_HEALTH",
            CheckType::TcpPort => "TCP_PORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(CheckType::None),
            "PING" => Some(CheckType::Ping),
            "HTTP_GET" => Some(CheckType::HttpGet),
            "SPRING_BOOT_HEALTH" => Some(CheckType::SpringBootHealth),
            "TCP_PORT" => Some(CheckType::TcpPort),
            _ => None,
        }
    }
}

/// Published status of a target.
///
/// The engine only ever assigns `Operational` and `MajorOutage`; the
/// intermediate degrees and `UnderMaintenance` are set externally by the
/// incident workflow and the admin layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Operational,
    DegradedPerformance,
    PartialOutage,
    MajorOutage,
    UnderMaintenance,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Operational => "OPERATIONAL",
            Status::DegradedPerformance => "DEGRADED_PERFORMANCE",
            Status::PartialOutage => "PARTIAL_OUTAGE",
            Status::MajorOutage => "MAJOR_OUTAGE",
            Status::UnderMaintenance => "UNDER_MAINTENANCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPERATIONAL" => Some(Status::Operational),
            "DEGRADED_PERFORMANCE" => Some(Status::DegradedPerformance),
            "PARTIAL_OUTAGE" => Some(Status::PartialOutage),
            "MAJOR_OUTAGE" => Some(Status::MajorOutage),
            "UNDER_MAINTENANCE" => Some(Status::UnderMaintenance),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check configuration as stored on a target row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub enabled: bool,
    pub check_type: CheckType,
    pub url: String,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub expected_status: u16,
    pub failure_threshold: u32,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_type: CheckType::None,
            url: String::new(),
            interval_secs: 60,
            timeout_secs: 10,
            expected_status: 200,
            failure_threshold: 3,
        }
    }
}

/// Persisted health state of a target. These are the only fields the engine
/// ever writes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthState {
    pub last_check_at: Option<DateTime<Utc>>,
    /// `None` means the target has never been checked.
    pub last_check_success: Option<bool>,
    pub last_check_message: String,
    pub consecutive_failures: u32,
    pub status: Status,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            last_check_at: None,
            last_check_success: None,
            last_check_message: String::new(),
            consecutive_failures: 0,
            status: Status::Operational,
        }
    }
}

/// Identity of a target across both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TargetKey {
    pub kind: TargetKind,
    pub id: i64,
}

impl TargetKey {
    pub fn application(id: i64) -> Self {
        Self {
            kind: TargetKind::Application,
            id,
        }
    }

    pub fn component(id: i64) -> Self {
        Self {
            kind: TargetKind::Component,
            id,
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

/// An application or component subject to health checking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub kind: TargetKind,
    pub id: i64,
    pub name: String,
    pub check: CheckConfig,
    /// Component-only: take the check configuration from the owning
    /// application instead of this row's own fields.
    pub inherit_from_app: bool,
    /// Component-only: id of the owning application.
    pub application_id: Option<i64>,
    pub health: HealthState,
}

impl Target {
    pub fn key(&self) -> TargetKey {
        TargetKey {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn under_maintenance(&self) -> bool {
        self.health.status == Status::UnderMaintenance
    }
}
