//! Status state machine.
//!
//! Pure function from the previous health state and a probe verdict to the
//! next health state. Degradation requires `failure_threshold` consecutive
//! failures; recovery is instant on the first success. Targets under
//! maintenance keep their published status no matter what the probes say.

use crate::db::{HealthState, Status};
use crate::probe::CheckResult;

/// A change of the published `status` field, to be forwarded externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub previous: Status,
    pub new: Status,
}

/// Result of applying one probe verdict.
#[derive(Debug, Clone)]
pub struct Transition {
    pub health: HealthState,
    /// Present only when the published status actually changed; counter and
    /// timestamp updates alone do not qualify.
    pub status_change: Option<StatusChange>,
}

/// Fold a probe verdict into the target's health state.
pub fn apply(prev: &HealthState, failure_threshold: u32, result: &CheckResult) -> Transition {
    let under_maintenance = prev.status == Status::UnderMaintenance;

    let (consecutive_failures, status) = if result.success {
        let status = if under_maintenance {
            prev.status
        } else {
            Status::Operational
        };
        (0, status)
    } else {
        let failures = prev.consecutive_failures.saturating_add(1);
        let status = if !under_maintenance && failures >= failure_threshold.max(1) {
            // The only degraded status the engine assigns itself; the finer
            // degrees are reserved for the incident workflow.
            Status::MajorOutage
        } else {
            prev.status
        };
        (failures, status)
    };

    let health = HealthState {
        last_check_at: Some(result.observed_at),
        last_check_success: Some(result.success),
        last_check_message: result.message.clone(),
        consecutive_failures,
        status,
    };

    let status_change = (status != prev.status).then_some(StatusChange {
        previous: prev.status,
        new: status,
    });

    Transition {
        health,
        status_change,
    }
}
