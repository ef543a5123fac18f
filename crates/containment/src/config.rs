//! Process-wide configuration toggles
//!
//! Exactly two kinds of global state exist: the emergency kill-switch
//! (`SAFE_MODE`), the event-disable toggle (`EVENTS_DISABLED`), and the
//! security level (`SECURITY_LEVEL`). All are read once and cached behind
//! a lock; tests reset the cache between cases.

use parking_lot::RwLock;

/// Strictness tier governing fail-open versus fail-closed behaviour of the
/// (external) policy-signature layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Dev,
    Ci,
    Prod,
}

impl SecurityLevel {
    /// CI and PROD abort on verification failures; DEV logs and continues.
    pub fn is_fail_closed(&self) -> bool {
        matches!(self, SecurityLevel::Ci | SecurityLevel::Prod)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Dev => "DEV",
            SecurityLevel::Ci => "CI",
            SecurityLevel::Prod => "PROD",
        }
    }
}

// Conventional CI environment markers, checked when SECURITY_LEVEL is
// unset.
const CI_ENV_VARS: [&str; 8] = [
    "GITHUB_ACTIONS",
    "CI",
    "TRAVIS",
    "CIRCLECI",
    "GITLAB_CI",
    "JENKINS_URL",
    "BITBUCKET_BUILD_NUMBER",
    "TF_BUILD",
];

#[derive(Debug, Clone, Copy)]
struct Settings {
    safe_mode: bool,
    events_disabled: bool,
    security_level: SecurityLevel,
}

static SETTINGS: RwLock<Option<Settings>> = RwLock::new(None);

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    )
}

fn detect() -> Settings {
    let security_level = match std::env::var("SECURITY_LEVEL").ok().as_deref() {
        Some("PROD") | Some("prod") => SecurityLevel::Prod,
        Some("CI") | Some("ci") => SecurityLevel::Ci,
        Some("DEV") | Some("dev") => SecurityLevel::Dev,
        Some(other) => {
            tracing::warn!(value = other, "unrecognised SECURITY_LEVEL, defaulting to DEV");
            SecurityLevel::Dev
        }
        None => {
            if CI_ENV_VARS.iter().any(|var| std::env::var(var).is_ok()) {
                SecurityLevel::Ci
            } else {
                SecurityLevel::Dev
            }
        }
    };
    Settings {
        safe_mode: env_flag("SAFE_MODE"),
        events_disabled: env_flag("EVENTS_DISABLED"),
        security_level,
    }
}

fn settings() -> Settings {
    if let Some(settings) = *SETTINGS.read() {
        return settings;
    }
    let mut guard = SETTINGS.write();
    *guard.get_or_insert_with(detect)
}

/// True when the emergency kill-switch is active.
pub fn safe_mode_enabled() -> bool {
    settings().safe_mode
}

/// True when default sinks should be replaced by the null sink.
pub fn events_disabled() -> bool {
    settings().events_disabled
}

/// The cached security level.
pub fn security_level() -> SecurityLevel {
    settings().security_level
}

/// Drop the cached settings so the next read re-detects. Test hook.
pub fn reset_cached() {
    *SETTINGS.write() = None;
}
