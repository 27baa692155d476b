//! crates/artifact_studio_core/src/quota.rs
//!
//! Per-user daily request limits with tier exemption.

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::QuotaState;

pub const DEFAULT_DAILY_REQUEST_LIMIT: u32 = 20;

/// The result of a quota check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// The request may go ahead; the caller persists the returned state.
    Granted(QuotaState),
    /// The daily limit is used up. Nothing was consumed.
    Rejected { limit: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaGovernor {
    daily_limit: u32,
}

impl Default for QuotaGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_DAILY_REQUEST_LIMIT)
    }
}

impl QuotaGovernor {
    pub fn new(daily_limit: u32) -> Self {
        Self { daily_limit }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    pub fn check_and_consume(&self, state: &QuotaState, now: DateTime<Utc>) -> QuotaDecision {
        let today = now.date_naive();
        let used = Self::used_today(state, today);

        if !state.tier.is_exempt() && used >= self.daily_limit {
            return QuotaDecision::Rejected {
                limit: self.daily_limit,
            };
        }

        QuotaDecision::Granted(QuotaState {
            daily_requests_count: used + 1,
            last_request_date: Some(today),
            tier: state.tier,
        })
    }

    /// Requests left today, or `None` for exempt tiers.
    pub fn remaining(&self, state: &QuotaState, now: DateTime<Utc>) -> Option<u32> {
        if state.tier.is_exempt() {
            return None;
        }
        let used = Self::used_today(state, now.date_naive());
        Some(self.daily_limit.saturating_sub(used))
    }

    /// Requests already counted on `today`; a record from an earlier day counts as zero.
    pub fn used_today(state: &QuotaState, today: NaiveDate) -> u32 {
        if state.last_request_date == Some(today) {
            state.daily_requests_count
        } else {
            0
        }
    }
}
