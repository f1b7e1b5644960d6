//! Risk Scorer: reduces an access history to a 0-3 score with reason flags.
//!
//! A heuristic, not a classifier. The result depends only on the multiset of
//! events and the evaluation time, never on their order. Blank or
//! out-of-window values are ignored rather than treated as errors.

use crate::{models::access_event::AccessEvent, services::now_millis};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Distinct non-empty IPs needed to raise `ip_churn`.
pub const IP_CHURN_THRESHOLD: usize = 3;
/// Distinct non-empty countries needed to raise `geo_shift`.
pub const GEO_SHIFT_THRESHOLD: usize = 2;
/// Events inside the trailing window needed to raise `burst`.
pub const BURST_THRESHOLD: usize = 10;
/// Length of the burst window.
pub const BURST_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    IpChurn,
    GeoShift,
    Burst,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RiskAssessment {
    /// Number of triggered reasons.
    pub score: u8,
    pub reasons: BTreeSet<RiskFlag>,
}

pub fn score(events: &[AccessEvent]) -> RiskAssessment {
    score_at(events, now_millis())
}

pub fn score_at(events: &[AccessEvent], now_ms: i64) -> RiskAssessment {
    let window_start = now_ms - BURST_WINDOW_MS;

    let ips: HashSet<&str> = events.iter().filter_map(|e| non_blank(&e.ip)).collect();
    let countries: HashSet<String> = events
        .iter()
        .filter_map(|e| non_blank(&e.country))
        .map(str::to_ascii_uppercase)
        .collect();
    let recent = events
        .iter()
        .filter(|e| e.at > window_start)
        .count();

    let mut reasons = BTreeSet::new();
    if ips.len() >= IP_CHURN_THRESHOLD {
        reasons.insert(RiskFlag::IpChurn);
    }
    if countries.len() >= GEO_SHIFT_THRESHOLD {
        reasons.insert(RiskFlag::GeoShift);
    }
    if recent >= BURST_THRESHOLD {
        reasons.insert(RiskFlag::Burst);
    }

    RiskAssessment {
        score: reasons.len() as u8,
        reasons,
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
