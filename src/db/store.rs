//! SQLite entity store implementation.
//!
//! The CRUD layer of the surrounding status-page system owns the entity
//! rows; the engine reads check configuration and writes back health state.
//! Health updates go through a single UPDATE statement so readers never
//! observe a partially written state.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("invalid target: {0}")]
    Invalid(String),
    #[error("Not found")]
    NotFound,
}

const APP_COLUMNS: &str = "id, name, check_enabled, check_type, check_url, \
     check_interval_secs, check_timeout_secs, check_expected_status, \
     check_failure_threshold, last_check_at, last_check_success, \
     last_check_message, consecutive_failures, status";

const COMPONENT_COLUMNS: &str = "id, name, check_enabled, check_type, check_url, \
     check_interval_secs, check_timeout_secs, check_expected_status, \
     check_failure_threshold, last_check_at, last_check_success, \
     last_check_message, consecutive_failures, status, \
     application_id, check_inherit_from_app";

/// Thread-safe entity store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Target CRUD (exercised by the external admin layer and tests) ---

    /// Insert a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        match target.kind {
            TargetKind::Application => {
                conn.execute(
                    "INSERT INTO applications (name, check_enabled, check_type, check_url, \
                     check_interval_secs, check_timeout_secs, check_expected_status, \
                     check_failure_threshold, last_check_message, consecutive_failures, status) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        target.name,
                        target.check.enabled,
                        target.check.check_type.as_str(),
                        target.check.url,
                        target.check.interval_secs,
                        target.check.timeout_secs,
                        target.check.expected_status,
                        target.check.failure_threshold,
                        target.health.last_check_message,
                        target.health.consecutive_failures,
                        target.health.status.as_str(),
                    ],
                )?;
            }
            TargetKind::Component => {
                let app_id = target
                    .application_id
                    .ok_or_else(|| DbError::Invalid("component has no owning application".into()))?;
                conn.execute(
                    "INSERT INTO components (application_id, name, check_inherit_from_app, \
                     check_enabled, check_type, check_url, check_interval_secs, \
                     check_timeout_secs, check_expected_status, check_failure_threshold, \
                     last_check_message, consecutive_failures, status) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        app_id,
                        target.name,
                        target.inherit_from_app,
                        target.check.enabled,
                        target.check.check_type.as_str(),
                        target.check.url,
                        target.check.interval_secs,
                        target.check.timeout_secs,
                        target.check.expected_status,
                        target.check.failure_threshold,
                        target.health.last_check_message,
                        target.health.consecutive_failures,
                        target.health.status.as_str(),
                    ],
                )?;
            }
        }
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update a target's name and check configuration.
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let changed = match target.kind {
            TargetKind::Application => conn.execute(
                "UPDATE applications SET name=?1, check_enabled=?2, check_type=?3, \
                 check_url=?4, check_interval_secs=?5, check_timeout_secs=?6, \
                 check_expected_status=?7, check_failure_threshold=?8 WHERE id=?9",
                params![
                    target.name,
                    target.check.enabled,
                    target.check.check_type.as_str(),
                    target.check.url,
                    target.check.interval_secs,
                    target.check.timeout_secs,
                    target.check.expected_status,
                    target.check.failure_threshold,
                    target.id,
                ],
            )?,
            TargetKind::Component => conn.execute(
                "UPDATE components SET name=?1, check_enabled=?2, check_type=?3, \
                 check_url=?4, check_interval_secs=?5, check_timeout_secs=?6, \
                 check_expected_status=?7, check_failure_threshold=?8, \
                 check_inherit_from_app=?9 WHERE id=?10",
                params![
                    target.name,
                    target.check.enabled,
                    target.check.check_type.as_str(),
                    target.check.url,
                    target.check.interval_secs,
                    target.check.timeout_secs,
                    target.check.expected_status,
                    target.check.failure_threshold,
                    target.inherit_from_app,
                    target.id,
                ],
            )?,
        };
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all targets, applications first.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut targets = Vec::new();

        let mut stmt = conn.prepare(&format!("SELECT {} FROM applications", APP_COLUMNS))?;
        let apps = stmt
            .query_map([], application_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        targets.extend(apps);

        let mut stmt = conn.prepare(&format!("SELECT {} FROM components", COMPONENT_COLUMNS))?;
        let comps = stmt
            .query_map([], component_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        targets.extend(comps);

        Ok(targets)
    }

    /// Get a single target by key.
    pub fn get_target(&self, key: TargetKey) -> Result<Target, DbError> {
        let conn = self.conn.lock().unwrap();
        let result = match key.kind {
            TargetKind::Application => conn.query_row(
                &format!("SELECT {} FROM applications WHERE id = ?1", APP_COLUMNS),
                params![key.id],
                application_from_row,
            ),
            TargetKind::Component => conn.query_row(
                &format!("SELECT {} FROM components WHERE id = ?1", COMPONENT_COLUMNS),
                params![key.id],
                component_from_row,
            ),
        };
        result.map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound,
            e => DbError::Sqlite(e),
        })
    }

    /// Delete a target.
    pub fn delete_target(&self, key: TargetKey) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        match key.kind {
            TargetKind::Application => {
                conn.execute("DELETE FROM components WHERE application_id = ?1", params![key.id])?;
                conn.execute("DELETE FROM applications WHERE id = ?1", params![key.id])?;
            }
            TargetKind::Component => {
                conn.execute("DELETE FROM components WHERE id = ?1", params![key.id])?;
            }
        }
        Ok(())
    }

    // --- Health state ---

    /// Atomically persist the health-state fields for a target.
    pub fn update_health(&self, key: TargetKey, health: &HealthState) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let table = match key.kind {
            TargetKind::Application => "applications",
            TargetKind::Component => "components",
        };
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET last_check_at=?1, last_check_success=?2, \
                 last_check_message=?3, consecutive_failures=?4, status=?5 WHERE id=?6",
                table
            ),
            params![
                health.last_check_at.map(|t| t.to_rfc3339()),
                health.last_check_success,
                health.last_check_message,
                health.consecutive_failures,
                health.status.as_str(),
                key.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Override the published status of a target without touching the other
    /// health fields. Used by the admin layer for maintenance windows.
    pub fn set_status(&self, key: TargetKey, status: Status) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let table = match key.kind {
            TargetKind::Application => "applications",
            TargetKind::Component => "components",
        };
        let changed = conn.execute(
            &format!("UPDATE {} SET status=?1 WHERE id=?2", table),
            params![status.as_str(), key.id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}

fn application_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let (check, health) = check_and_health_from_row(row)?;
    Ok(Target {
        kind: TargetKind::Application,
        id: row.get(0)?,
        name: row.get(1)?,
        check,
        inherit_from_app: false,
        application_id: None,
        health,
    })
}

fn component_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let (check, health) = check_and_health_from_row(row)?;
    Ok(Target {
        kind: TargetKind::Component,
        id: row.get(0)?,
        name: row.get(1)?,
        check,
        inherit_from_app: row.get(15)?,
        application_id: Some(row.get(14)?),
        health,
    })
}

/// Map the shared column block (indexes 2..=13) of either table.
fn check_and_health_from_row(row: &Row<'_>) -> SqlResult<(CheckConfig, HealthState)> {
    let check_type: String = row.get(3)?;
    let status: String = row.get(13)?;
    let last_check_at: Option<String> = row.get(9)?;

    let check = CheckConfig {
        enabled: row.get(2)?,
        check_type: CheckType::parse(&check_type).unwrap_or(CheckType::None),
        url: row.get(4)?,
        interval_secs: row.get(5)?,
        timeout_secs: row.get(6)?,
        expected_status: row.get(7)?,
        failure_threshold: row.get(8)?,
    };
    let health = HealthState {
        last_check_at: last_check_at.as_deref().and_then(parse_db_time),
        last_check_success: row.get(10)?,
        last_check_message: row.get(11)?,
        consecutive_failures: row.get(12)?,
        status: Status::parse(&status).unwrap_or(Status::Operational),
    };
    Ok((check, health))
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn sample_application() -> Target {
        Target {
            kind: TargetKind::Application,
            id: 0,
            name: "API Gateway".to_string(),
            check: CheckConfig {
                enabled: true,
                check_type: CheckType::HttpGet,
                url: "https://gateway.example.com/health".to_string(),
                interval_secs: 30,
                timeout_secs: 5,
                expected_status: 200,
                failure_threshold: 3,
            },
            inherit_from_app: false,
            application_id: None,
            health: HealthState::default(),
        }
    }

    #[test]
    fn test_application_crud() {
        let (_tmp, store) = test_store();

        let mut app = sample_application();
        let id = store.add_target(&mut app).unwrap();
        assert!(id > 0);

        let fetched = store.get_target(TargetKey::application(id)).unwrap();
        assert_eq!(fetched.name, "API Gateway");
        assert_eq!(fetched.check.check_type, CheckType::HttpGet);
        assert_eq!(fetched.health.last_check_success, None);

        let mut updated = fetched;
        updated.check.enabled = false;
        store.update_target(&updated).unwrap();
        let fetched2 = store.get_target(TargetKey::application(id)).unwrap();
        assert!(!fetched2.check.enabled);

        store.delete_target(TargetKey::application(id)).unwrap();
        assert!(matches!(
            store.get_target(TargetKey::application(id)),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn test_component_belongs_to_application() {
        let (_tmp, store) = test_store();

        let mut app = sample_application();
        let app_id = store.add_target(&mut app).unwrap();

        let mut comp = Target {
            kind: TargetKind::Component,
            id: 0,
            name: "Checkout".to_string(),
            check: CheckConfig::default(),
            inherit_from_app: true,
            application_id: Some(app_id),
            health: HealthState::default(),
        };
        let comp_id = store.add_target(&mut comp).unwrap();

        let fetched = store.get_target(TargetKey::component(comp_id)).unwrap();
        assert_eq!(fetched.application_id, Some(app_id));
        assert!(fetched.inherit_from_app);

        // Components cannot exist without an owning application.
        let mut orphan = Target {
            application_id: None,
            ..comp.clone()
        };
        assert!(matches!(
            store.add_target(&mut orphan),
            Err(DbError::Invalid(_))
        ));

        // Deleting the application cascades.
        store.delete_target(TargetKey::application(app_id)).unwrap();
        assert!(matches!(
            store.get_target(TargetKey::component(comp_id)),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn test_update_health_round_trip() {
        let (_tmp, store) = test_store();

        let mut app = sample_application();
        let id = store.add_target(&mut app).unwrap();
        let key = TargetKey::application(id);

        let health = HealthState {
            last_check_at: Some(Utc::now()),
            last_check_success: Some(false),
            last_check_message: "connection refused".to_string(),
            consecutive_failures: 2,
            status: Status::Operational,
        };
        store.update_health(key, &health).unwrap();

        let fetched = store.get_target(key).unwrap();
        assert_eq!(fetched.health.last_check_success, Some(false));
        assert_eq!(fetched.health.consecutive_failures, 2);
        assert_eq!(fetched.health.last_check_message, "connection refused");
        assert!(fetched.health.last_check_at.is_some());
    }

    #[test]
    fn test_update_health_missing_target() {
        let (_tmp, store) = test_store();
        let err = store
            .update_health(TargetKey::application(999), &HealthState::default())
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[test]
    fn test_set_status_override() {
        let (_tmp, store) = test_store();
        let mut app = sample_application();
        let id = store.add_target(&mut app).unwrap();
        let key = TargetKey::application(id);

        store.set_status(key, Status::UnderMaintenance).unwrap();
        let fetched = store.get_target(key).unwrap();
        assert_eq!(fetched.health.status, Status::UnderMaintenance);
        // Other health fields untouched.
        assert_eq!(fetched.health.last_check_success, None);
    }
}
