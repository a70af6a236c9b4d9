//! Win-rate statistiky z vyřešených příležitostí.
//! Sdílí je ledger (`aggregate`, `breakdown`) i offline `ledger-stats`.

use serde::Serialize;
use signal_model::{Opportunity, OpportunityStatus, Outcome, RuleId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WinRateStats {
    pub total:          usize,
    pub wins:           usize,
    pub losses:         usize,
    pub win_rate:       Option<f64>,
    pub avg_confidence: Option<f64>,
}

impl WinRateStats {
    /// Jen Resolved záznamy s výsledkem; open/pending se ignorují
    pub fn collect<'a>(opps: impl IntoIterator<Item = &'a Opportunity>) -> Self {
        let mut s = WinRateStats::default();
        let mut confidence_sum = 0.0;
        for o in opps {
            if o.status != OpportunityStatus::Resolved {
                continue;
            }
            match o.outcome {
                Outcome::Win => s.wins += 1,
                Outcome::Lose => s.losses += 1,
                Outcome::Pending => continue,
            }
            s.total += 1;
            confidence_sum += o.confidence;
        }
        if s.total > 0 {
            s.win_rate = Some(s.wins as f64 / s.total as f64);
            s.avg_confidence = Some(confidence_sum / s.total as f64);
        }
        s
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleBreakdown {
    pub rule_id:            Option<RuleId>,
    pub overall:            WinRateStats,
    pub by_side:            BTreeMap<String, WinRateStats>,
    pub by_opponent:        BTreeMap<String, WinRateStats>,
    pub by_rank_range:      BTreeMap<String, WinRateStats>,
    pub by_confidence_band: BTreeMap<String, WinRateStats>,
}

pub fn rank_range(rank: Option<u32>) -> &'static str {
    match rank {
        None => "unknown",
        Some(r) if r <= 5 => "top5",
        Some(r) if r <= 10 => "top10",
        Some(r) if r <= 15 => "mid",
        Some(_) => "bottom",
    }
}

pub fn confidence_band(confidence: f64) -> &'static str {
    if confidence < 0.6 {
        "<0.6"
    } else if confidence < 0.7 {
        "0.6-0.7"
    } else {
        ">=0.7"
    }
}

fn split<'a, K>(opps: &[&'a Opportunity], key: K) -> BTreeMap<String, WinRateStats>
where
    K: Fn(&Opportunity) -> String,
{
    let mut groups: BTreeMap<String, Vec<&'a Opportunity>> = BTreeMap::new();
    for &o in opps {
        groups.entry(key(o)).or_default().push(o);
    }
    groups
        .into_iter()
        .map(|(k, v)| (k, WinRateStats::collect(v)))
        .collect()
}

/// Rozpad jednoho pravidla (nebo všech při `rule = None`)
pub fn breakdown<'a>(
    rule: Option<RuleId>,
    opps: impl IntoIterator<Item = &'a Opportunity>,
) -> RuleBreakdown {
    let selected: Vec<&Opportunity> = opps
        .into_iter()
        .filter(|o| o.status == OpportunityStatus::Resolved)
        .filter(|o| rule.map_or(true, |r| o.rule_id == r))
        .collect();

    RuleBreakdown {
        rule_id:            rule,
        overall:            WinRateStats::collect(selected.iter().copied()),
        by_side:            split(&selected, |o| o.side.to_string()),
        by_opponent:        split(&selected, |o| {
            o.opponent_bucket.map_or("unknown", |b| b.as_str()).to_string()
        }),
        by_rank_range:      split(&selected, |o| rank_range(o.features.team_rank).to_string()),
        by_confidence_band: split(&selected, |o| confidence_band(o.confidence).to_string()),
    }
}
