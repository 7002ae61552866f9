//! Hook invoked on denied card attempts.

use sheargate_core::AccessDecision;
use std::fmt;

/// Called by the access manager for every denial produced by the
/// allow-list (unknown, deactivated or out-of-hours cards).
///
/// Implementations run inside the manager loop and must not block.
pub trait DeniedAttemptPolicy: Send + Sync + fmt::Debug {
    fn on_denied(&mut self, decision: &AccessDecision);
}

/// Default policy: denials are only logged by the manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLockout;

impl DeniedAttemptPolicy for NoLockout {
    fn on_denied(&mut self, _decision: &AccessDecision) {}
}
