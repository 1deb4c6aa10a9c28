//! Dependency-injection seams shared by every pipeline handler.
//!
//! Collaborators are threaded through as explicit values rather than
//! process-wide singletons: a [`Reporter`] for logging (not a tracing
//! facade) and an [`AccountingPort`] standing in for out-of-scope billing
//! hooks.

pub mod error;
pub mod reporter;

pub use error::{ConfigError, HandlerOutcome};
pub use reporter::{EprintlnReporter, Reporter};

/// Injectable hook for payment/usage accounting (spec §9). Out of scope
/// functionally (§1: "billing/SPU accounting"); this crate only owns the
/// seam so handlers never reach for a global. The default implementation
/// is a no-op, matching the design note's "default no-op implementation".
pub trait AccountingPort: Send + Sync {
    /// Whether the organization is within its usage limits for this kind
    /// of operation. A no-op implementation always returns `true`.
    fn check_payment_limits(&self, organization_id: &str, operation: &str) -> bool {
        let _ = (organization_id, operation);
        true
    }

    /// Record that a unit of billable work happened. A no-op
    /// implementation does nothing.
    fn record_usage(&self, organization_id: &str, operation: &str, units: u64) {
        let _ = (organization_id, operation, units);
    }
}

/// The default, no-op `AccountingPort`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAccounting;

impl AccountingPort for NoopAccounting {}

/// A source of the current time, injected so tests can control it instead
/// of handlers calling `Utc::now()` directly — needed for the delivery
/// engine's `next_attempt_at` scheduling and the recovery sweep's
/// visibility-timeout comparisons.
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

/// A clock backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}
