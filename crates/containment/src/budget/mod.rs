//! Scoped, windowed budget accounting
//!
//! A ledger of reserved and committed spend keyed by scope (org, team,
//! user, service) and time window (minute, hour, day), with a policy that
//! resolves the limit for any scope.

pub mod ledger;
pub mod policy;

pub use ledger::BudgetLedger;
pub use policy::{BudgetPolicy, Scope, WindowKind, WindowLimit};
