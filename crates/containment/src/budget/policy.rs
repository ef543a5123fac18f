//! Budget policy: per-scope, per-window spend limits

use std::collections::HashMap;

/// Whose spend a limit applies to, broadest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Org,
    Team,
    User,
    Service,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Org => "org",
            Scope::Team => "team",
            Scope::User => "user",
            Scope::Service => "service",
        }
    }
}

/// Scope hierarchy from broadest to narrowest.
pub const SCOPE_HIERARCHY: [Scope; 4] = [Scope::Org, Scope::Team, Scope::User, Scope::Service];

/// Accounting window granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        }
    }
}

/// Per-window spend limits in USD. Default is unlimited.
#[derive(Debug, Clone, Copy)]
pub struct WindowLimit {
    pub minute_usd: f64,
    pub hour_usd: f64,
    pub day_usd: f64,
}

impl Default for WindowLimit {
    fn default() -> Self {
        Self {
            minute_usd: f64::INFINITY,
            hour_usd: f64::INFINITY,
            day_usd: f64::INFINITY,
        }
    }
}

impl WindowLimit {
    pub fn new(minute_usd: f64, hour_usd: f64, day_usd: f64) -> Self {
        Self {
            minute_usd,
            hour_usd,
            day_usd,
        }
    }

    pub fn limit_for(&self, window: WindowKind) -> f64 {
        match window {
            WindowKind::Minute => self.minute_usd,
            WindowKind::Hour => self.hour_usd,
            WindowKind::Day => self.day_usd,
        }
    }
}

/// Global budget policy: limits per scope plus warning thresholds.
#[derive(Debug, Clone)]
pub struct BudgetPolicy {
    pub org_limits: WindowLimit,
    /// Applied to any team without an explicit entry.
    pub default_team: WindowLimit,
    pub teams: HashMap<String, WindowLimit>,
    pub users: HashMap<String, WindowLimit>,
    pub services: HashMap<String, WindowLimit>,
    /// Warning thresholds as fractions of the limit.
    pub thresholds: Vec<f64>,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            org_limits: WindowLimit::new(50.0, 200.0, 1000.0),
            default_team: WindowLimit::new(15.0, 60.0, 300.0),
            teams: HashMap::new(),
            users: HashMap::new(),
            services: HashMap::new(),
            thresholds: vec![0.8, 0.9, 1.0],
        }
    }
}

impl BudgetPolicy {
    /// Resolve the limit for a scope. Teams fall back to the default team
    /// limit; users and services without an entry are unlimited.
    pub fn get_limit(&self, scope: Scope, scope_id: &str) -> WindowLimit {
        match scope {
            Scope::Org => self.org_limits,
            Scope::Team => self.teams.get(scope_id).copied().unwrap_or(self.default_team),
            Scope::User => self.users.get(scope_id).copied().unwrap_or_default(),
            Scope::Service => self.services.get(scope_id).copied().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_falls_back_to_default() {
        let mut policy = BudgetPolicy::default();
        policy.teams.insert("search".into(), WindowLimit::new(30.0, 120.0, 600.0));

        assert_eq!(policy.get_limit(Scope::Team, "search").minute_usd, 30.0);
        assert_eq!(policy.get_limit(Scope::Team, "other").minute_usd, 15.0);
    }

    #[test]
    fn test_unknown_user_is_unlimited() {
        let policy = BudgetPolicy::default();
        let limit = policy.get_limit(Scope::User, "nobody");
        assert!(limit.limit_for(WindowKind::Day).is_infinite());
    }

    #[test]
    fn test_org_limits_apply_regardless_of_id() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.get_limit(Scope::Org, "anything").hour_usd, 200.0);
    }
}
