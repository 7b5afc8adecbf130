//! Claim statistics shared across workers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::PollOutcome;
use crate::domain::ClaimErrorKind;

/// Point-in-time view of [`ClaimStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCounts {
    pub claimed: u64,
    pub idle: u64,
    pub outdated: u64,
    pub duplicated: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
pub struct ClaimStats {
    claimed: AtomicU64,
    idle: AtomicU64,
    outdated: AtomicU64,
    duplicated: AtomicU64,
    failed: AtomicU64,
}

impl ClaimStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: &PollOutcome) {
        let counter = match outcome {
            PollOutcome::Claimed(_) => &self.claimed,
            PollOutcome::Idle => &self.idle,
            PollOutcome::Skipped(ClaimErrorKind::TaskOutdated) => &self.outdated,
            PollOutcome::Skipped(_) => &self.duplicated,
            PollOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClaimCounts {
        ClaimCounts {
            claimed: self.claimed.load(Ordering::Relaxed),
            idle: self.idle.load(Ordering::Relaxed),
            outdated: self.outdated.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
