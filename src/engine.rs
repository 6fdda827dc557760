//! The check pipeline: resolve -> probe -> state machine -> persist -> publish.
//!
//! Both scheduled runs and manual triggers go through [`Engine::run_check`].
//! The target row is re-read at the start of every run so CRUD edits (and
//! deletions) take effect on the very next cycle.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::db::{DbError, HealthState, Store, Target, TargetKey, TargetKind};
use crate::probe::{run_probe, CheckResult};
use crate::publisher::{Publisher, StatusChangeEvent};
use crate::resolver::{resolve, Resolution};
use crate::status;

/// Slack on top of the resolved timeout before the probe future is dropped.
/// Executors enforce the timeout themselves; this is the hard backstop that
/// reclaims the worker when one does not return promptly.
const HARD_DEADLINE_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("target {0} not found")]
    NotFound(TargetKey),
    #[error(transparent)]
    Store(#[from] DbError),
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    /// Checking resolved as disabled for this cycle; nothing was probed or
    /// written.
    Disabled,
    Completed {
        health: HealthState,
        /// Effective interval used this run, for scheduler re-arming.
        interval: Duration,
        status_change: Option<StatusChangeEvent>,
    },
}

pub struct Engine {
    store: Arc<Store>,
    publisher: Publisher,
}

impl Engine {
    pub fn new(store: Arc<Store>, publisher: Publisher) -> Self {
        Self { store, publisher }
    }

    /// Run the full check pipeline for one target.
    pub async fn run_check(&self, key: TargetKey) -> Result<CheckOutcome, EngineError> {
        let target = self.store.get_target(key).map_err(|e| match e {
            DbError::NotFound => EngineError::NotFound(key),
            e => EngineError::Store(e),
        })?;

        let parent = self.load_parent(&target)?;

        let cfg = match resolve(&target, parent.as_ref()) {
            Resolution::Disabled => return Ok(CheckOutcome::Disabled),
            Resolution::Enabled(cfg) => cfg,
        };

        // Dropping the probe future at the deadline is the hard cancellation:
        // the worker is reclaimed even if the underlying I/O never returns.
        let deadline = cfg.timeout + HARD_DEADLINE_GRACE;
        let result = match tokio::time::timeout(deadline, run_probe(&cfg)).await {
            Ok(result) => result,
            Err(_) => CheckResult::fail(format!(
                "probe exceeded hard deadline of {} ms",
                deadline.as_millis()
            )),
        };

        let transition = status::apply(&target.health, cfg.failure_threshold, &result);

        // Persistence failure aborts here; the event is only published once
        // the new state is durably the truth.
        self.store.update_health(key, &transition.health)?;

        let status_change = transition.status_change.map(|change| StatusChangeEvent {
            target_id: target.id,
            target_kind: target.kind,
            target_name: target.name.clone(),
            previous_status: change.previous,
            new_status: change.new,
            message: transition.health.last_check_message.clone(),
            timestamp: result.observed_at,
        });
        if let Some(event) = status_change.clone() {
            self.publisher.publish(event);
        }

        Ok(CheckOutcome::Completed {
            health: transition.health,
            interval: cfg.interval,
            status_change,
        })
    }

    /// Fetch the owning application when the component inherits from it.
    /// A dangling parent reference resolves as "no parent", which the
    /// resolver treats as disabled.
    fn load_parent(&self, target: &Target) -> Result<Option<Target>, EngineError> {
        if target.kind != TargetKind::Component || !target.inherit_from_app {
            return Ok(None);
        }
        let Some(app_id) = target.application_id else {
            return Ok(None);
        };
        match self.store.get_target(TargetKey::application(app_id)) {
            Ok(app) => Ok(Some(app)),
            Err(DbError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CheckConfig, CheckType, Status};
    use tempfile::NamedTempFile;

    fn engine_with_store() -> (NamedTempFile, Arc<Store>, Publisher, Engine) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let publisher = Publisher::new(16);
        let engine = Engine::new(store.clone(), publisher.clone());
        (tmp, store, publisher, engine)
    }

    fn tcp_check(url: &str) -> CheckConfig {
        CheckConfig {
            enabled: true,
            check_type: CheckType::TcpPort,
            url: url.to_string(),
            interval_secs: 10,
            timeout_secs: 2,
            expected_status: 200,
            failure_threshold: 2,
        }
    }

    fn add_application(store: &Store, check: CheckConfig) -> TargetKey {
        let mut target = Target {
            kind: TargetKind::Application,
            id: 0,
            name: "App".to_string(),
            check,
            inherit_from_app: false,
            application_id: None,
            health: HealthState::default(),
        };
        let id = store.add_target(&mut target).unwrap();
        TargetKey::application(id)
    }

    #[tokio::test]
    async fn test_pipeline_persists_success() {
        let (_tmp, store, _publisher, engine) = engine_with_store();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let key = add_application(&store, tcp_check(&addr.to_string()));
        let outcome = engine.run_check(key).await.unwrap();

        match outcome {
            CheckOutcome::Completed { health, interval, status_change } => {
                assert_eq!(health.last_check_success, Some(true));
                assert_eq!(health.consecutive_failures, 0);
                assert_eq!(interval, Duration::from_secs(10));
                assert!(status_change.is_none());
            }
            other => panic!("expected completed outcome, got {:?}", other),
        }

        let persisted = store.get_target(key).unwrap();
        assert_eq!(persisted.health.last_check_success, Some(true));
    }

    #[tokio::test]
    async fn test_pipeline_counts_failures_and_publishes_at_threshold() {
        let (_tmp, store, publisher, engine) = engine_with_store();
        let mut events = publisher.subscribe();

        // Nothing listens on this port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let key = add_application(&store, tcp_check(&addr.to_string()));

        // First failure: counter moves, status does not.
        engine.run_check(key).await.unwrap();
        let t = store.get_target(key).unwrap();
        assert_eq!(t.health.consecutive_failures, 1);
        assert_eq!(t.health.status, Status::Operational);
        assert!(events.try_recv().is_err());

        // Second failure hits the threshold.
        engine.run_check(key).await.unwrap();
        let t = store.get_target(key).unwrap();
        assert_eq!(t.health.consecutive_failures, 2);
        assert_eq!(t.health.status, Status::MajorOutage);

        let event = events.try_recv().unwrap();
        assert_eq!(event.previous_status, Status::Operational);
        assert_eq!(event.new_status, Status::MajorOutage);
        assert_eq!(event.target_id, key.id);
    }

    #[tokio::test]
    async fn test_disabled_target_is_not_probed_or_written() {
        let (_tmp, store, _publisher, engine) = engine_with_store();
        let mut check = tcp_check("127.0.0.1:1");
        check.enabled = false;
        let key = add_application(&store, check);

        let outcome = engine.run_check(key).await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Disabled));

        let t = store.get_target(key).unwrap();
        assert_eq!(t.health.last_check_success, None);
        assert_eq!(t.health.last_check_at, None);
    }

    #[tokio::test]
    async fn test_component_results_written_to_component_row() {
        let (_tmp, store, _publisher, engine) = engine_with_store();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let app_key = add_application(&store, tcp_check(&addr.to_string()));
        let mut comp = Target {
            kind: TargetKind::Component,
            id: 0,
            name: "Checkout".to_string(),
            check: CheckConfig::default(),
            inherit_from_app: true,
            application_id: Some(app_key.id),
            health: HealthState::default(),
        };
        let comp_id = store.add_target(&mut comp).unwrap();
        let comp_key = TargetKey::component(comp_id);

        engine.run_check(comp_key).await.unwrap();

        // Component row carries the result; the application row is untouched.
        let comp = store.get_target(comp_key).unwrap();
        assert_eq!(comp.health.last_check_success, Some(true));
        let app = store.get_target(app_key).unwrap();
        assert_eq!(app.health.last_check_success, None);
    }

    #[tokio::test]
    async fn test_missing_target_is_reported() {
        let (_tmp, _store, _publisher, engine) = engine_with_store();
        let err = engine
            .run_check(TargetKey::application(999))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
