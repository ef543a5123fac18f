//! In-memory budget ledger with window keying

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::budget::policy::{Scope, WindowKind};

type LedgerKey = (&'static str, String, &'static str, String);

#[derive(Debug, Default)]
struct LedgerState {
    committed: HashMap<LedgerKey, f64>,
    reserved: HashMap<LedgerKey, f64>,
}

/// Tracks reserved and committed spend per `(scope, scope_id, window)`.
///
/// Reservations are pre-charges made before a call; on completion they are
/// committed with the actual amount, or released if the call never
/// happened.
#[derive(Debug, Default)]
pub struct BudgetLedger {
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// String window id for a window kind at a timestamp.
    pub fn window_id(window: WindowKind, ts: DateTime<Utc>) -> String {
        match window {
            WindowKind::Minute => ts.format("%Y%m%d%H%M").to_string(),
            WindowKind::Hour => ts.format("%Y%m%d%H").to_string(),
            WindowKind::Day => ts.format("%Y%m%d").to_string(),
        }
    }

    fn key(scope: Scope, scope_id: &str, window: WindowKind, ts: DateTime<Utc>) -> LedgerKey {
        (
            scope.as_str(),
            scope_id.to_string(),
            window.as_str(),
            Self::window_id(window, ts),
        )
    }

    /// Total spend (committed + reserved) in the window containing `ts`.
    pub fn used(&self, scope: Scope, scope_id: &str, window: WindowKind, ts: DateTime<Utc>) -> f64 {
        let key = Self::key(scope, scope_id, window, ts);
        let state = self.state.lock();
        state.committed.get(&key).copied().unwrap_or(0.0)
            + state.reserved.get(&key).copied().unwrap_or(0.0)
    }

    /// Confirmed spend only.
    pub fn committed(
        &self,
        scope: Scope,
        scope_id: &str,
        window: WindowKind,
        ts: DateTime<Utc>,
    ) -> f64 {
        let key = Self::key(scope, scope_id, window, ts);
        self.state.lock().committed.get(&key).copied().unwrap_or(0.0)
    }

    /// Add a reservation (pre-charge).
    pub fn reserve(
        &self,
        scope: Scope,
        scope_id: &str,
        window: WindowKind,
        amount_usd: f64,
        ts: DateTime<Utc>,
    ) {
        let key = Self::key(scope, scope_id, window, ts);
        *self.state.lock().reserved.entry(key).or_insert(0.0) += amount_usd;
    }

    /// Move `reserved_usd` out of the reservation, committing `actual_usd`.
    pub fn commit(
        &self,
        scope: Scope,
        scope_id: &str,
        window: WindowKind,
        reserved_usd: f64,
        actual_usd: f64,
        ts: DateTime<Utc>,
    ) {
        let key = Self::key(scope, scope_id, window, ts);
        let mut state = self.state.lock();
        let reserved = state.reserved.entry(key.clone()).or_insert(0.0);
        *reserved = (*reserved - reserved_usd).max(0.0);
        *state.committed.entry(key).or_insert(0.0) += actual_usd;
    }

    /// Remove a reservation without committing (call failed).
    pub fn release(
        &self,
        scope: Scope,
        scope_id: &str,
        window: WindowKind,
        amount_usd: f64,
        ts: DateTime<Utc>,
    ) {
        let key = Self::key(scope, scope_id, window, ts);
        let mut state = self.state.lock();
        let reserved = state.reserved.entry(key).or_insert(0.0);
        *reserved = (*reserved - amount_usd).max(0.0);
    }

    /// Window accounting as a JSON map, for event payloads.
    pub fn snapshot(
        &self,
        scope: Scope,
        scope_id: &str,
        window: WindowKind,
        ts: DateTime<Utc>,
    ) -> Map<String, Value> {
        let key = Self::key(scope, scope_id, window, ts);
        let state = self.state.lock();
        let committed = state.committed.get(&key).copied().unwrap_or(0.0);
        let reserved = state.reserved.get(&key).copied().unwrap_or(0.0);

        let mut map = Map::new();
        map.insert("scope".into(), Value::String(scope.as_str().into()));
        map.insert("scope_id".into(), Value::String(scope_id.into()));
        map.insert("window".into(), Value::String(window.as_str().into()));
        map.insert("window_id".into(), Value::String(key.3));
        map.insert("committed_usd".into(), Value::from(committed));
        map.insert("reserved_usd".into(), Value::from(reserved));
        map.insert("used_usd".into(), Value::from(committed + reserved));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn test_window_ids_format_per_kind() {
        assert_eq!(BudgetLedger::window_id(WindowKind::Minute, ts()), "202603141509");
        assert_eq!(BudgetLedger::window_id(WindowKind::Hour, ts()), "2026031415");
        assert_eq!(BudgetLedger::window_id(WindowKind::Day, ts()), "20260314");
    }

    #[test]
    fn test_reserve_commit_cycle() {
        let ledger = BudgetLedger::new();
        ledger.reserve(Scope::Team, "search", WindowKind::Hour, 0.5, ts());
        assert_eq!(ledger.used(Scope::Team, "search", WindowKind::Hour, ts()), 0.5);
        assert_eq!(ledger.committed(Scope::Team, "search", WindowKind::Hour, ts()), 0.0);

        // Actual spend came in under the reservation.
        ledger.commit(Scope::Team, "search", WindowKind::Hour, 0.5, 0.42, ts());
        assert!((ledger.used(Scope::Team, "search", WindowKind::Hour, ts()) - 0.42).abs() < 1e-9);
        assert!(
            (ledger.committed(Scope::Team, "search", WindowKind::Hour, ts()) - 0.42).abs() < 1e-9
        );
    }

    #[test]
    fn test_release_drops_reservation_only() {
        let ledger = BudgetLedger::new();
        ledger.reserve(Scope::User, "u1", WindowKind::Minute, 0.3, ts());
        ledger.release(Scope::User, "u1", WindowKind::Minute, 0.3, ts());
        assert_eq!(ledger.used(Scope::User, "u1", WindowKind::Minute, ts()), 0.0);
    }

    #[test]
    fn test_windows_are_isolated() {
        let ledger = BudgetLedger::new();
        let later = ts() + chrono::Duration::minutes(2);
        ledger.commit(Scope::Org, "acme", WindowKind::Minute, 0.0, 1.0, ts());
        assert_eq!(ledger.used(Scope::Org, "acme", WindowKind::Minute, later), 0.0);
        // The hour window still sees both timestamps.
        assert_eq!(ledger.used(Scope::Org, "acme", WindowKind::Hour, later), 1.0);
    }

    #[test]
    fn test_snapshot_payload_shape() {
        let ledger = BudgetLedger::new();
        ledger.reserve(Scope::Service, "mailer", WindowKind::Day, 0.25, ts());
        let snap = ledger.snapshot(Scope::Service, "mailer", WindowKind::Day, ts());
        assert_eq!(snap.get("scope").and_then(Value::as_str), Some("service"));
        assert_eq!(snap.get("window_id").and_then(Value::as_str), Some("20260314"));
        assert_eq!(snap.get("used_usd").and_then(Value::as_f64), Some(0.25));
    }
}
