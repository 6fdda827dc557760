//! Scheduler: owns the live target registry and dispatches due checks.
//!
//! A single 1s tick loop scans the in-memory registry for due targets and
//! hands them to a bounded worker pool. Each registry entry carries a
//! `running` flag, so at most one probe is ever in flight per target; when
//! the pool is saturated, due targets simply wait for a later tick instead
//! of queuing. The next due time is re-armed from the moment a run starts,
//! so a slow probe does not shrink the effective interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};

use crate::db::{DbError, Store, TargetKey, TargetKind};
use crate::engine::{CheckOutcome, Engine, EngineError};
use crate::resolver::{resolve, Resolution};

/// Due-ness is evaluated on this fixed tick; it matches the smallest
/// configurable check interval (1s).
const TICK: Duration = Duration::from_secs(1);

/// Interval placeholder for targets first seen through a manual trigger;
/// corrected from the resolved configuration as soon as the run completes.
const PROVISIONAL_INTERVAL: Duration = Duration::from_secs(60);

/// Errors surfaced by the manual "run check now" trigger.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("a check is already running for {0}")]
    AlreadyRunning(TargetKey),
    #[error("target {0} not found")]
    NotFound(TargetKey),
    #[error("checking is disabled for {0}")]
    Disabled(TargetKey),
    #[error(transparent)]
    Engine(EngineError),
}

#[derive(Debug)]
struct Entry {
    interval: Duration,
    next_due: DateTime<Utc>,
    running: bool,
    /// Deregistered while its run was in flight. The entry stays in the
    /// registry so the key cannot be re-dispatched concurrently; the
    /// settling run performs the removal. A re-register before that simply
    /// clears the flag and keeps the same entry.
    defunct: bool,
}

/// The main scheduler orchestrating check execution.
pub struct Scheduler {
    engine: Arc<Engine>,
    store: Arc<Store>,
    registry: Arc<RwLock<HashMap<TargetKey, Entry>>>,
    permits: Arc<Semaphore>,
    refresh_interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, store: Arc<Store>, workers: usize, refresh_secs: u64) -> Self {
        Self {
            engine,
            store,
            registry: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            refresh_interval: Duration::from_secs(refresh_secs.max(1)),
        }
    }

    /// Load the initial target set and start the tick and re-sync loops.
    pub async fn start(self: &Arc<Self>) -> Result<(), DbError> {
        self.sync_targets().await?;
        {
            let registry = self.registry.read().await;
            tracing::info!("Starting scheduler with {} checkable targets", registry.len());
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                scheduler.dispatch_due().await;
            }
        });

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(scheduler.refresh_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                if let Err(e) = scheduler.sync_targets().await {
                    tracing::error!("Target re-sync failed: {}", e);
                }
            }
        });

        Ok(())
    }

    /// Reconcile the registry with the store: register targets that resolve
    /// as checkable, drop the rest. Safe to call while dispatch is running.
    pub async fn sync_targets(&self) -> Result<(), DbError> {
        let targets = self.store.get_targets()?;

        let applications: HashMap<i64, _> = targets
            .iter()
            .filter(|t| t.kind == TargetKind::Application)
            .map(|t| (t.id, t.clone()))
            .collect();

        let mut live: HashMap<TargetKey, Duration> = HashMap::new();
        for target in &targets {
            let parent = target
                .application_id
                .and_then(|id| applications.get(&id));
            if let Resolution::Enabled(cfg) = resolve(target, parent) {
                live.insert(target.key(), cfg.interval);
            }
        }

        let now = Utc::now();
        let mut registry = self.registry.write().await;
        registry.retain(|key, entry| {
            if live.contains_key(key) {
                true
            } else if entry.running {
                // The in-flight run still owns this entry; it is removed
                // when the run settles.
                entry.defunct = true;
                true
            } else {
                false
            }
        });
        for (key, interval) in live {
            registry
                .entry(key)
                .and_modify(|e| {
                    e.interval = interval;
                    e.defunct = false;
                })
                .or_insert_with(|| Entry {
                    interval,
                    // New registrations are due immediately.
                    next_due: now,
                    running: false,
                    defunct: false,
                });
        }
        Ok(())
    }

    /// Register or refresh a single target, typically right after a CRUD
    /// create or update. A target that no longer resolves as checkable is
    /// dropped instead.
    pub async fn register(&self, key: TargetKey) -> Result<(), DbError> {
        let target = match self.store.get_target(key) {
            Ok(target) => target,
            Err(DbError::NotFound) => {
                self.deregister(key).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let parent = match target.application_id {
            Some(app_id) if target.inherit_from_app => {
                match self.store.get_target(TargetKey::application(app_id)) {
                    Ok(app) => Some(app),
                    Err(DbError::NotFound) => None,
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };

        let mut registry = self.registry.write().await;
        match resolve(&target, parent.as_ref()) {
            Resolution::Enabled(cfg) => {
                registry
                    .entry(key)
                    .and_modify(|e| {
                        // A revived defunct entry keeps its `running` flag,
                        // so the in-flight run still excludes new dispatch.
                        e.interval = cfg.interval;
                        e.defunct = false;
                    })
                    .or_insert_with(|| Entry {
                        interval: cfg.interval,
                        next_due: Utc::now(),
                        running: false,
                        defunct: false,
                    });
                tracing::info!("Scheduler: registered target {} ({})", key, target.name);
            }
            Resolution::Disabled => {
                Self::retire_entry(&mut registry, key);
            }
        }
        Ok(())
    }

    /// Drop a target from the registry so it is not dispatched again, even
    /// if it was already due. Call on CRUD delete or disable. An entry with
    /// a run in flight is only marked; the run removes it when it settles.
    pub async fn deregister(&self, key: TargetKey) {
        let mut registry = self.registry.write().await;
        if registry.contains_key(&key) {
            Self::retire_entry(&mut registry, key);
            tracing::info!("Scheduler: removed target {}", key);
        }
    }

    fn retire_entry(registry: &mut HashMap<TargetKey, Entry>, key: TargetKey) {
        if let Some(entry) = registry.get_mut(&key) {
            if entry.running {
                entry.defunct = true;
                return;
            }
        }
        registry.remove(&key);
    }

    /// One tick: dispatch every due, non-running target the pool can take.
    async fn dispatch_due(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<TargetKey> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .filter(|(_, e)| !e.running && !e.defunct && now >= e.next_due)
                .map(|(key, _)| *key)
                .collect()
        };

        for key in due {
            let permit = match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // Saturated pool: remaining due targets wait for a later
                    // tick rather than queuing unboundedly.
                    tracing::warn!("Worker pool saturated, deferring remaining due checks");
                    break;
                }
            };

            {
                let mut registry = self.registry.write().await;
                match registry.get_mut(&key) {
                    Some(entry) if !entry.running && !entry.defunct => {
                        entry.running = true;
                        // Re-arm from run start, not completion.
                        entry.next_due = now + chrono_interval(entry.interval);
                    }
                    // Deregistered or claimed since the scan; skip.
                    _ => continue,
                }
            }

            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                let _permit = permit;
                scheduler.run_pipeline(key).await;
            });
        }
    }

    /// Run one target's pipeline and settle its registry entry. Faults are
    /// contained here; they never touch sibling targets.
    async fn run_pipeline(&self, key: TargetKey) {
        let outcome = self.engine.run_check(key).await;
        if let Err(e) = &outcome {
            tracing::error!("Check pipeline failed for {}: {}", key, e);
        }

        let mut registry = self.registry.write().await;
        if registry.get(&key).is_some_and(|e| e.defunct) {
            // Deregistered mid-run; the settling run owns the removal.
            registry.remove(&key);
            return;
        }
        match outcome {
            Ok(CheckOutcome::Completed { interval, .. }) => {
                if let Some(entry) = registry.get_mut(&key) {
                    entry.running = false;
                    entry.interval = interval;
                }
            }
            Ok(CheckOutcome::Disabled) | Err(EngineError::NotFound(_)) => {
                registry.remove(&key);
            }
            Err(_) => {
                // Store unavailable or similar: back to idle, retried on the
                // next due tick.
                if let Some(entry) = registry.get_mut(&key) {
                    entry.running = false;
                }
            }
        }
    }

    /// Manual "run check now". Respects per-target mutual exclusion and the
    /// worker pool, and returns the outcome to the caller.
    pub async fn run_now(&self, key: TargetKey) -> Result<CheckOutcome, TriggerError> {
        {
            let mut registry = self.registry.write().await;
            match registry.get_mut(&key) {
                Some(entry) if entry.running => return Err(TriggerError::AlreadyRunning(key)),
                Some(entry) => {
                    entry.running = true;
                    entry.next_due = Utc::now() + chrono_interval(entry.interval);
                }
                None => {
                    // Not registered (e.g. just created); claim a provisional
                    // entry so concurrent triggers still exclude each other.
                    registry.insert(
                        key,
                        Entry {
                            interval: PROVISIONAL_INTERVAL,
                            next_due: Utc::now() + chrono_interval(PROVISIONAL_INTERVAL),
                            running: true,
                            defunct: false,
                        },
                    );
                }
            }
        }

        let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        let outcome = self.engine.run_check(key).await;
        drop(permit);

        let mut registry = self.registry.write().await;
        let defunct = registry.get(&key).is_some_and(|e| e.defunct);
        match outcome {
            Ok(CheckOutcome::Completed {
                health,
                interval,
                status_change,
            }) => {
                if defunct {
                    registry.remove(&key);
                } else if let Some(entry) = registry.get_mut(&key) {
                    entry.running = false;
                    entry.interval = interval;
                }
                Ok(CheckOutcome::Completed {
                    health,
                    interval,
                    status_change,
                })
            }
            Ok(CheckOutcome::Disabled) => {
                registry.remove(&key);
                Err(TriggerError::Disabled(key))
            }
            Err(EngineError::NotFound(_)) => {
                registry.remove(&key);
                Err(TriggerError::NotFound(key))
            }
            Err(e) => {
                if defunct {
                    registry.remove(&key);
                } else if let Some(entry) = registry.get_mut(&key) {
                    entry.running = false;
                }
                Err(TriggerError::Engine(e))
            }
        }
    }

    #[cfg(test)]
    async fn entry_state(&self, key: TargetKey) -> Option<(bool, DateTime<Utc>)> {
        let registry = self.registry.read().await;
        registry.get(&key).map(|e| (e.running, e.next_due))
    }

    #[cfg(test)]
    async fn registered(&self, key: TargetKey) -> bool {
        self.registry.read().await.contains_key(&key)
    }
}

fn chrono_interval(interval: Duration) -> chrono::Duration {
    chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::seconds(60))
}
