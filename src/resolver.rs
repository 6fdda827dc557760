//! Effective check configuration resolution.
//!
//! Components may inherit their check configuration from the owning
//! application. Resolution is a stateless mapping recomputed on every cycle,
//! so edits to a parent application take effect on the component's next
//! scheduled run without any cache invalidation.

use std::time::Duration;

use crate::db::{CheckConfig, CheckType, Target, TargetKind};

/// The configuration actually used for one check cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub check_type: CheckType,
    pub url: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub expected_status: u16,
    pub failure_threshold: u32,
}

/// Outcome of resolving a target's configuration for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The target must not be probed this cycle.
    Disabled,
    Enabled(EffectiveConfig),
}

/// Resolve the effective configuration for `target`.
///
/// `parent` is the owning application when `target` is a component; it is
/// only consulted when the component inherits. The component keeps its own
/// identity either way: results are always written to the component's row.
pub fn resolve(target: &Target, parent: Option<&Target>) -> Resolution {
    let source: &CheckConfig = if target.kind == TargetKind::Component && target.inherit_from_app {
        match parent {
            Some(app) => &app.check,
            // Inheriting component with no resolvable parent cannot be probed.
            None => return Resolution::Disabled,
        }
    } else {
        &target.check
    };

    if !source.enabled || source.check_type == CheckType::None {
        return Resolution::Disabled;
    }

    let interval_secs = source.interval_secs.max(1);
    // Enforce timeout < interval; with a 1s interval the floor degenerates
    // to equality.
    let timeout_secs = source
        .timeout_secs
        .max(1)
        .min(interval_secs.saturating_sub(1).max(1));
    let expected_status = if source.expected_status == 0 {
        200
    } else {
        source.expected_status
    };

    Resolution::Enabled(EffectiveConfig {
        check_type: source.check_type,
        url: source.url.clone(),
        interval: Duration::from_secs(u64::from(interval_secs)),
        timeout: Duration::from_secs(u64::from(timeout_secs)),
        expected_status,
        failure_threshold: source.failure_threshold.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{HealthState, TargetKey};

    fn application(check: CheckConfig) -> Target {
        Target {
            kind: TargetKind::Application,
            id: 1,
            name: "App".to_string(),
            check,
            inherit_from_app: false,
            application_id: None,
            health: HealthState::default(),
        }
    }

    fn component(check: CheckConfig, inherit: bool) -> Target {
        Target {
            kind: TargetKind::Component,
            id: 2,
            name: "Component".to_string(),
            check,
            inherit_from_app: inherit,
            application_id: Some(1),
            health: HealthState::default(),
        }
    }

    fn enabled_http(url: &str) -> CheckConfig {
        CheckConfig {
            enabled: true,
            check_type: CheckType::HttpGet,
            url: url.to_string(),
            interval_secs: 30,
            timeout_secs: 5,
            expected_status: 200,
            failure_threshold: 3,
        }
    }

    #[test]
    fn test_component_inherits_application_fields() {
        let app = application(enabled_http("https://x/health"));
        let comp = component(
            CheckConfig {
                enabled: false,
                check_type: CheckType::TcpPort,
                url: "ignored:1".to_string(),
                ..CheckConfig::default()
            },
            true,
        );

        let cfg = match resolve(&comp, Some(&app)) {
            Resolution::Enabled(cfg) => cfg,
            other => panic!("expected enabled resolution, got {:?}", other),
        };
        assert_eq!(cfg.check_type, CheckType::HttpGet);
        assert_eq!(cfg.url, "https://x/health");
        assert_eq!(cfg.expected_status, 200);
        // Results still go to the component's own row.
        assert_eq!(comp.key(), TargetKey::component(2));
    }

    #[test]
    fn test_component_own_fields_when_not_inheriting() {
        let app = application(enabled_http("https://app/health"));
        let comp = component(enabled_http("https://component/health"), false);

        let cfg = match resolve(&comp, Some(&app)) {
            Resolution::Enabled(cfg) => cfg,
            other => panic!("expected enabled resolution, got {:?}", other),
        };
        assert_eq!(cfg.url, "https://component/health");
    }

    #[test]
    fn test_inheriting_component_without_parent_is_disabled() {
        let comp = component(enabled_http("https://component/health"), true);
        assert_eq!(resolve(&comp, None), Resolution::Disabled);
    }

    #[test]
    fn test_disabled_and_none_are_not_checkable() {
        let mut check = enabled_http("https://x");
        check.enabled = false;
        assert_eq!(resolve(&application(check), None), Resolution::Disabled);

        let mut check = enabled_http("https://x");
        check.check_type = CheckType::None;
        assert_eq!(resolve(&application(check), None), Resolution::Disabled);
    }

    #[test]
    fn test_timeout_clamped_below_interval() {
        let mut check = enabled_http("https://x");
        check.interval_secs = 10;
        check.timeout_secs = 30;
        let cfg = match resolve(&application(check), None) {
            Resolution::Enabled(cfg) => cfg,
            other => panic!("expected enabled resolution, got {:?}", other),
        };
        assert_eq!(cfg.timeout, Duration::from_secs(9));
        assert_eq!(cfg.interval, Duration::from_secs(10));
    }

    #[test]
    fn test_zero_expected_status_defaults_to_200() {
        let mut check = enabled_http("https://x");
        check.expected_status = 0;
        let cfg = match resolve(&application(check), None) {
            Resolution::Enabled(cfg) => cfg,
            other => panic!("expected enabled resolution, got {:?}", other),
        };
        assert_eq!(cfg.expected_status, 200);
    }
}
