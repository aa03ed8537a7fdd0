//! Permission gate: pre-flight capability check before a session activates.
//!
//! The gate snapshots grants at session start and never re-evaluates them
//! mid-session. Any denial of a required capability fails the session before
//! the timer or voice loop ever starts.

use guardian_protocol::{CapabilityId, PermissionResult};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of the pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Granted,
    Missing(Vec<CapabilityId>),
}

/// Platform permission layer. `request` is asynchronous: the platform
/// reports back through `PermissionResult` events delivered to the session.
pub trait PermissionProvider: Send + Sync {
    fn check(&self, required: &[CapabilityId]) -> PermissionCheck;
    fn request(&self, missing: &[CapabilityId]);
}

/// Snapshot of capability grants for one session.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    results: BTreeMap<CapabilityId, bool>,
}

impl PermissionSet {
    /// Snapshot taken when the pre-flight check already granted everything.
    pub fn all_granted(required: &BTreeSet<CapabilityId>) -> Self {
        Self {
            results: required.iter().map(|cap| (*cap, true)).collect(),
        }
    }

    pub fn record(&mut self, result: PermissionResult) {
        self.results.insert(result.capability, result.granted);
    }

    pub fn is_granted(&self, capability: CapabilityId) -> bool {
        self.results.get(&capability).copied().unwrap_or(false)
    }

    /// Required capabilities explicitly denied so far.
    pub fn denied(&self, required: &BTreeSet<CapabilityId>) -> Vec<CapabilityId> {
        required
            .iter()
            .filter(|cap| self.results.get(cap) == Some(&false))
            .copied()
            .collect()
    }

    /// Required capabilities with no result yet.
    pub fn unresolved(&self, required: &BTreeSet<CapabilityId>) -> Vec<CapabilityId> {
        required
            .iter()
            .filter(|cap| !self.results.contains_key(cap))
            .copied()
            .collect()
    }

    pub fn covers(&self, required: &BTreeSet<CapabilityId>) -> bool {
        required.iter().all(|cap| self.is_granted(*cap))
    }
}
