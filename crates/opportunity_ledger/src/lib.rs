/// StreakSignals — Opportunity Ledger
///
/// Jediný sdílený mutable stav enginu. Klíč (match, rule, side):
/// - max. jedna OPEN příležitost na klíč, duplicity se zahazují (nikdy se neslučují)
/// - resolve zavře všechny open příležitosti zápasu, opakované volání nic nemění
/// - statistiky jen z RESOLVED, submit/resolve je nikdy nečtou
///
/// Zámek se drží jen po dobu úpravy map, JSONL log se píše až po uvolnění.

pub mod stats;

use chrono::{DateTime, Utc};
use logger::{
    now_iso, DuplicateSuppressedEvent, EventLogger, OpportunityOpenedEvent,
    OpportunityResolvedEvent,
};
use signal_model::{
    FinalResult, MatchId, Opportunity, OpportunityKey, OpportunityStatus, Outcome, RuleId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub use stats::{breakdown, confidence_band, rank_range, RuleBreakdown, WinRateStats};

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(Opportunity),
    /// Na klíči už je open příležitost; kandidát zahozen
    DuplicateSuppressed { key: OpportunityKey, open_confidence: f64 },
    /// Zápas už byl vyhodnocen
    MatchClosed { key: OpportunityKey },
}

impl SubmitOutcome {
    pub fn accepted(self) -> Option<Opportunity> {
        match self {
            SubmitOutcome::Accepted(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub open:             usize,
    pub resolved:         usize,
    pub accepted_total:   usize,
    pub suppressed_total: usize,
}

#[derive(Default)]
struct LedgerState {
    open:             BTreeMap<OpportunityKey, Opportunity>,
    resolved:         Vec<Opportunity>,
    /// Vyhodnocené zápasy → čas vyhodnocení
    closed:           HashMap<MatchId, DateTime<Utc>>,
    accepted_total:   usize,
    suppressed_total: usize,
}

#[derive(Default)]
pub struct OpportunityLedger {
    state:  Mutex<LedgerState>,
    events: Option<EventLogger>,
}

impl OpportunityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_log(events: EventLogger) -> Self {
        Self { state: Mutex::default(), events: Some(events) }
    }

    // Každá kritická sekce je jedna úprava map, takže i po panice je stav konzistentní
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit<T: serde::Serialize>(&self, event: &T) {
        if let Some(log) = &self.events {
            if let Err(e) = log.log(event) {
                warn!("event log write failed: {}", e);
            }
        }
    }

    pub fn submit(&self, candidate: Opportunity) -> SubmitOutcome {
        let key = candidate.key();

        let outcome = {
            let mut state = self.lock();
            if state.closed.contains_key(&key.match_id) {
                SubmitOutcome::MatchClosed { key }
            } else if let Some(open) = state.open.get(&key) {
                let open_confidence = open.confidence;
                state.suppressed_total += 1;
                SubmitOutcome::DuplicateSuppressed { key, open_confidence }
            } else {
                state.accepted_total += 1;
                state.open.insert(key, candidate.clone());
                SubmitOutcome::Accepted(candidate.clone())
            }
        };

        match &outcome {
            SubmitOutcome::Accepted(o) => {
                info!(
                    key = %o.key(),
                    confidence = o.confidence,
                    version = %o.config_version,
                    "opportunity opened"
                );
                self.emit(&OpportunityOpenedEvent {
                    ts:             now_iso(),
                    event:          "OPPORTUNITY_OPENED",
                    key:            o.key().to_string(),
                    rule_id:        o.rule_id.to_string(),
                    confidence:     o.confidence,
                    config_version: o.config_version.clone(),
                    opportunity:    serde_json::to_value(o).unwrap_or_default(),
                });
            }
            SubmitOutcome::DuplicateSuppressed { key, open_confidence } => {
                debug!(%key, dropped = candidate.confidence, "duplicate suppressed");
                self.emit(&DuplicateSuppressedEvent {
                    ts:                 now_iso(),
                    event:              "DUPLICATE_SUPPRESSED",
                    key:                key.to_string(),
                    dropped_confidence: candidate.confidence,
                    open_confidence:    *open_confidence,
                });
            }
            SubmitOutcome::MatchClosed { key } => {
                debug!(%key, "candidate for closed match dropped");
            }
        }

        outcome
    }

    /// Vrací jen NOVĚ vyřešené; druhé volání pro stejný zápas vrátí prázdno
    pub fn resolve(&self, match_id: &str, result: FinalResult, at: DateTime<Utc>) -> Vec<Opportunity> {
        let newly = {
            let mut state = self.lock();
            if state.closed.contains_key(match_id) {
                return Vec::new();
            }
            state.closed.insert(match_id.to_string(), at);

            let keys: Vec<OpportunityKey> = state
                .open
                .keys()
                .filter(|k| k.match_id == match_id)
                .cloned()
                .collect();

            let mut newly = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(mut o) = state.open.remove(&key) {
                    o.status = OpportunityStatus::Resolved;
                    o.outcome = o.bet.settle(&result);
                    o.resolved_at = Some(at);
                    state.resolved.push(o.clone());
                    newly.push(o);
                }
            }
            newly
        };

        for o in &newly {
            info!(key = %o.key(), outcome = ?o.outcome, "opportunity resolved");
            self.emit(&OpportunityResolvedEvent {
                ts:          now_iso(),
                event:       "OPPORTUNITY_RESOLVED",
                key:         o.key().to_string(),
                outcome:     outcome_str(o.outcome).to_string(),
                opportunity: serde_json::to_value(o).unwrap_or_default(),
            });
        }
        newly
    }

    pub fn is_closed(&self, match_id: &str) -> bool {
        self.lock().closed.contains_key(match_id)
    }

    pub fn open_opportunities(&self) -> Vec<Opportunity> {
        self.lock().open.values().cloned().collect()
    }

    pub fn resolved_opportunities(&self) -> Vec<Opportunity> {
        self.lock().resolved.clone()
    }

    /// Win rate pravidla nad vyřešenými záznamy, které projdou predikátem
    pub fn aggregate(&self, rule: RuleId, predicate: impl Fn(&Opportunity) -> bool) -> WinRateStats {
        let state = self.lock();
        WinRateStats::collect(
            state
                .resolved
                .iter()
                .filter(|o| o.rule_id == rule)
                .filter(|o| predicate(*o)),
        )
    }

    pub fn stats(&self, rule: RuleId) -> WinRateStats {
        self.aggregate(rule, |_| true)
    }

    pub fn breakdown(&self, rule: RuleId) -> RuleBreakdown {
        let state = self.lock();
        stats::breakdown(Some(rule), &state.resolved)
    }

    /// Smaže vyřešené záznamy starší než `older_than`.
    /// Open příležitosti ani značky zavřených zápasů se tu nemažou.
    pub fn prune_resolved(&self, older_than: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.resolved.len();
        state
            .resolved
            .retain(|o| o.resolved_at.map_or(true, |t| t >= older_than));
        let pruned = before - state.resolved.len();
        if pruned > 0 {
            info!(pruned, "old resolved opportunities pruned");
        }
        pruned
    }

    /// Zapomene zápasy zavřené před `older_than`. Cut-off musí být delší než
    /// nejpozdější kandidát, který pro zápas ještě může přijít, jinak se zápas znovu otevře.
    pub fn prune_closed(&self, older_than: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let before = state.closed.len();
        state.closed.retain(|_, t| *t >= older_than);
        let pruned = before - state.closed.len();
        if pruned > 0 {
            info!(pruned, "old closed-match markers pruned");
        }
        pruned
    }

    pub fn counts(&self) -> LedgerCounts {
        let state = self.lock();
        LedgerCounts {
            open:             state.open.len(),
            resolved:         state.resolved.len(),
            accepted_total:   state.accepted_total,
            suppressed_total: state.suppressed_total,
        }
    }
}

fn outcome_str(o: Outcome) -> &'static str {
    match o {
        Outcome::Win => "win",
        Outcome::Lose => "lose",
        Outcome::Pending => "pending",
    }
}
