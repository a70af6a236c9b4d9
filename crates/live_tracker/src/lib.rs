/// StreakSignals — Live State Tracker
///
/// Stavový automat per zápas: Scheduled → Live → Finished (terminál).
/// Snapshoty chodí z pollingu a pořadí není zaručené, takže každý snapshot,
/// který by vracel minutu, góly nebo karty zpět, se zahodí.
/// Live pravidla se vyhodnocují jen na přijatém přechodu (předchozí → nový).
/// Tracker si nepamatuje, co už vystřelilo; "jen jednou" hlídá ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_model::{
    Bet, GoalScorer, LateDrawThresholds, LiveRule, MatchId, RedCardThresholds,
    RedCardWinCondition, Side, Signal, SignalError, SignalFeatures, Snapshot,
    SnapshotAnomaly, Venue,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Scheduled,
    Live,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Přechod přijat; `signals` může být prázdné
    Accepted { signals: Vec<Signal> },
    /// Stejný snapshot jako poslední přijatý
    Unchanged,
}

impl IngestOutcome {
    pub fn signals(&self) -> &[Signal] {
        match self {
            IngestOutcome::Accepted { signals } => signals,
            IngestOutcome::Unchanged => &[],
        }
    }
}

/// Pořadí obou týmů v tabulce, potřebuje je jen late draw s rank gate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchRanks {
    pub home: Option<u32>,
    pub away: Option<u32>,
}

#[derive(Debug)]
struct MatchTracker {
    phase: MatchPhase,
    last:  Option<Snapshot>,
}

impl MatchTracker {
    fn scheduled() -> Self {
        Self { phase: MatchPhase::Scheduled, last: None }
    }
}

pub struct LiveTracker {
    rules:   Vec<LiveRule>,
    // Registry drží zámek jen na lookup; samotný zápas má vlastní mutex
    matches: Mutex<HashMap<MatchId, Arc<Mutex<MatchTracker>>>>,
}

impl LiveTracker {
    pub fn new(rules: Vec<LiveRule>) -> Self {
        Self { rules, matches: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, match_id: &str) -> Arc<Mutex<MatchTracker>> {
        let mut registry = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .entry(match_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(MatchTracker::scheduled())))
            .clone()
    }

    fn existing(&self, match_id: &str) -> Option<Arc<Mutex<MatchTracker>>> {
        let registry = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        registry.get(match_id).cloned()
    }

    pub fn ingest(
        &self,
        match_id: &str,
        snapshot: Snapshot,
        at: DateTime<Utc>,
    ) -> Result<IngestOutcome, SignalError> {
        self.ingest_with_ranks(match_id, snapshot, MatchRanks::default(), at)
    }

    /// Jediný vstupní bod pro poll i push
    pub fn ingest_with_ranks(
        &self,
        match_id: &str,
        snapshot: Snapshot,
        ranks: MatchRanks,
        at: DateTime<Utc>,
    ) -> Result<IngestOutcome, SignalError> {
        let slot = self.slot(match_id);
        let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);

        if state.phase == MatchPhase::Finished {
            return Err(SignalError::MatchFinished(match_id.to_string()));
        }

        let prev = match state.last {
            Some(last) if last == snapshot => return Ok(IngestOutcome::Unchanged),
            Some(last) => last,
            None => Snapshot::kick_off(),
        };

        if let Err(anomaly) = check_order(&prev, &snapshot) {
            warn!(match_id, %anomaly, "snapshot rejected");
            return Err(SignalError::SnapshotOrderingAnomaly {
                match_id: match_id.to_string(),
                anomaly,
            });
        }

        if state.phase == MatchPhase::Scheduled {
            info!(match_id, minute = snapshot.minute, "match went live");
        }
        state.phase = MatchPhase::Live;
        state.last = Some(snapshot);
        drop(state);

        let signals = evaluate_transition(&self.rules, match_id, &prev, &snapshot, &ranks, at);
        for s in &signals {
            debug!(match_id, rule = %s.rule_id, side = %s.side, minute = snapshot.minute, "live rule fired");
        }
        Ok(IngestOutcome::Accepted { signals })
    }

    /// Přepne sledovaný zápas do Finished, vrací poslední přijatý snapshot.
    /// Neznámý zápas se nezakládá.
    pub fn finish(&self, match_id: &str) -> Option<Snapshot> {
        let slot = self.existing(match_id)?;
        let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        state.phase = MatchPhase::Finished;
        state.last
    }

    pub fn forget(&self, match_id: &str) -> bool {
        let mut registry = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        registry.remove(match_id).is_some()
    }

    /// Zahodí stav zápasů, pro které `drop` vrátí true; vrací počet smazaných
    pub fn forget_where(&self, gone: impl Fn(&str, MatchPhase) -> bool) -> usize {
        let mut registry = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registry.len();
        registry.retain(|id, slot| {
            let phase = slot.lock().unwrap_or_else(PoisonError::into_inner).phase;
            !gone(id, phase)
        });
        before - registry.len()
    }

    pub fn tracked(&self) -> usize {
        self.matches.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn phase(&self, match_id: &str) -> Option<MatchPhase> {
        let slot = self.existing(match_id)?;
        let state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        Some(state.phase)
    }

    pub fn last_snapshot(&self, match_id: &str) -> Option<Snapshot> {
        let slot = self.existing(match_id)?;
        let state = slot.lock().unwrap_or_else(PoisonError::into_inner);
        state.last
    }

    pub fn live_matches(&self) -> Vec<MatchId> {
        let slots: Vec<(MatchId, Arc<Mutex<MatchTracker>>)> = {
            let registry = self.matches.lock().unwrap_or_else(PoisonError::into_inner);
            registry.iter().map(|(id, s)| (id.clone(), s.clone())).collect()
        };
        let mut live: Vec<MatchId> = slots
            .into_iter()
            .filter(|(_, s)| s.lock().unwrap_or_else(PoisonError::into_inner).phase == MatchPhase::Live)
            .map(|(id, _)| id)
            .collect();
        live.sort();
        live
    }
}

// ── Čisté funkce ──────────────────────────────────────────────────────────────

/// Minuta, góly ani karty nesmí jít zpět
pub fn check_order(prev: &Snapshot, next: &Snapshot) -> Result<(), SnapshotAnomaly> {
    if next.minute < prev.minute {
        return Err(SnapshotAnomaly::MinuteRegressed { last: prev.minute, got: next.minute });
    }
    if next.home_goals < prev.home_goals || next.away_goals < prev.away_goals {
        return Err(SnapshotAnomaly::GoalsRegressed);
    }
    if next.red_cards.home < prev.red_cards.home || next.red_cards.away < prev.red_cards.away {
        return Err(SnapshotAnomaly::RedCardsRegressed);
    }
    Ok(())
}

pub fn evaluate_transition(
    rules: &[LiveRule],
    match_id: &str,
    prev: &Snapshot,
    next: &Snapshot,
    ranks: &MatchRanks,
    at: DateTime<Utc>,
) -> Vec<Signal> {
    rules
        .iter()
        .filter_map(|rule| {
            let (side, bet) = match rule {
                LiveRule::RedCardDraw(t) => red_card_edge(t, prev, next)?,
                LiveRule::LateDraw(t) => late_draw_edge(t, prev, next, ranks)?,
            };
            Some(Signal {
                match_id: match_id.to_string(),
                rule_id: rule.id(),
                side,
                bet,
                features: SignalFeatures { trigger: Some(*next), ..SignalFeatures::default() },
                detected_at: at,
            })
        })
        .collect()
}

/// První červená v zápase za vyrovnaného stavu; sázíme na stranu BEZ karty.
/// Jakmile má kartu kterákoli strana, další červené už nic nespouští.
fn red_card_edge(t: &RedCardThresholds, prev: &Snapshot, next: &Snapshot) -> Option<(Side, Bet)> {
    if next.minute < t.min_minute || !next.is_level() {
        return None;
    }
    if prev.red_cards.home > 0 || prev.red_cards.away > 0 {
        return None;
    }

    let carded = match (next.red_cards.home >= 1, next.red_cards.away >= 1) {
        (true, false) => Venue::Home,
        (false, true) => Venue::Away,
        _ => return None, // nic, nebo obě strany naráz
    };
    let backed = carded.opposite();

    let bet = match t.win_condition {
        RedCardWinCondition::NonCardedSideScores => Bet::GoalAfter {
            home_goals: next.home_goals,
            away_goals: next.away_goals,
            scorer:     GoalScorer::Team { team: backed },
        },
        RedCardWinCondition::AnyGoal => Bet::GoalAfter {
            home_goals: next.home_goals,
            away_goals: next.away_goals,
            scorer:     GoalScorer::Any,
        },
        RedCardWinCondition::NonCardedSideWins => Bet::TeamWins { team: backed },
    };
    Some((Side::from(backed), bet))
}

/// Hrana: teď >= min_minute a vyrovnáno, předtím ne
fn late_draw_edge(
    t: &LateDrawThresholds,
    prev: &Snapshot,
    next: &Snapshot,
    ranks: &MatchRanks,
) -> Option<(Side, Bet)> {
    let holds = |s: &Snapshot| s.minute >= t.min_minute && s.is_level();
    if !holds(next) || holds(prev) {
        return None;
    }

    if let Some(top) = t.top_rank_gate {
        // Bez obou pořadí gate neprojde, neznámé pořadí není "mimo top"
        let (home, away) = (ranks.home?, ranks.away?);
        let favourite = match (home <= top, away <= top) {
            (true, false) => Venue::Home,
            (false, true) => Venue::Away,
            _ => return None,
        };
        return Some((Side::from(favourite), Bet::TeamWins { team: favourite }));
    }

    Some((
        Side::Match,
        Bet::GoalAfter {
            home_goals: next.home_goals,
            away_goals: next.away_goals,
            scorer:     GoalScorer::Any,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_model::{FinalResult, Outcome, RedCards, RuleConfig, RuleId};

    fn snap(minute: u8, home: u8, away: u8, red_home: u8, red_away: u8) -> Snapshot {
        Snapshot {
            minute,
            home_goals: home,
            away_goals: away,
            red_cards: RedCards { home: red_home, away: red_away },
        }
    }

    fn tracker() -> LiveTracker {
        LiveTracker::new(RuleConfig::default().live)
    }

    fn fired(outcome: &IngestOutcome) -> Vec<RuleId> {
        outcome.signals().iter().map(|s| s.rule_id).collect()
    }

    #[test]
    fn red_card_fires_once_on_edge() {
        let t = tracker();
        let now = Utc::now();

        let first = t.ingest("m1", snap(46, 1, 1, 0, 0), now).unwrap();
        assert!(first.signals().is_empty());

        let second = t.ingest("m1", snap(47, 1, 1, 1, 0), now).unwrap();
        assert_eq!(fired(&second), vec![RuleId::RedCardDraw]);
        let signal = &second.signals()[0];
        assert_eq!(signal.side, Side::Away);
        assert_eq!(signal.features.trigger, Some(snap(47, 1, 1, 1, 0)));

        let third = t.ingest("m1", snap(50, 1, 1, 1, 0), now).unwrap();
        assert!(third.signals().is_empty());
    }

    #[test]
    fn second_sides_red_card_does_not_fire_again() {
        let t = tracker();
        let now = Utc::now();
        t.ingest("m1", snap(46, 1, 1, 0, 0), now).unwrap();
        assert_eq!(fired(&t.ingest("m1", snap(47, 1, 1, 1, 0), now).unwrap()), vec![RuleId::RedCardDraw]);
        // hosté dostanou červenou taky, pořád 1:1 → žádný nový kandidát
        assert!(t.ingest("m1", snap(60, 1, 1, 1, 1), now).unwrap().signals().is_empty());
    }

    #[test]
    fn duplicate_snapshot_is_a_no_op() {
        let t = tracker();
        let now = Utc::now();
        t.ingest("m1", snap(72, 2, 2, 0, 0), now).unwrap();
        let again = t.ingest("m1", snap(72, 2, 2, 0, 0), now).unwrap();
        assert_eq!(again, IngestOutcome::Unchanged);
        assert_eq!(t.last_snapshot("m1"), Some(snap(72, 2, 2, 0, 0)));
    }

    #[test]
    fn regressing_snapshot_is_rejected_and_state_kept() {
        let t = tracker();
        let now = Utc::now();
        t.ingest("m1", snap(60, 2, 1, 1, 0), now).unwrap();

        let goals = t.ingest("m1", snap(61, 1, 1, 1, 0), now);
        assert!(matches!(
            goals,
            Err(SignalError::SnapshotOrderingAnomaly { anomaly: SnapshotAnomaly::GoalsRegressed, .. })
        ));
        let cards = t.ingest("m1", snap(61, 2, 1, 0, 0), now);
        assert!(matches!(
            cards,
            Err(SignalError::SnapshotOrderingAnomaly { anomaly: SnapshotAnomaly::RedCardsRegressed, .. })
        ));
        let minute = t.ingest("m1", snap(55, 2, 1, 1, 0), now);
        assert!(matches!(
            minute,
            Err(SignalError::SnapshotOrderingAnomaly {
                anomaly: SnapshotAnomaly::MinuteRegressed { last: 60, got: 55 },
                ..
            })
        ));

        assert_eq!(t.last_snapshot("m1"), Some(snap(60, 2, 1, 1, 0)));
    }

    #[test]
    fn late_draw_fires_on_first_level_snapshot_after_cutoff() {
        let t = tracker();
        let now = Utc::now();
        assert!(t.ingest("m1", snap(65, 1, 1, 0, 0), now).unwrap().signals().is_empty());

        let late = t.ingest("m1", snap(71, 1, 1, 0, 0), now).unwrap();
        assert_eq!(fired(&late), vec![RuleId::LateDraw]);
        let bet = late.signals()[0].bet;
        assert_eq!(late.signals()[0].side, Side::Match);
        assert_eq!(bet.settle(&FinalResult { home_goals: 1, away_goals: 1 }), Outcome::Lose);

        assert!(t.ingest("m1", snap(75, 1, 1, 0, 0), now).unwrap().signals().is_empty());
    }

    #[test]
    fn red_card_before_half_time_or_when_not_level_is_ignored() {
        let t = tracker();
        let now = Utc::now();
        assert!(t.ingest("m1", snap(30, 0, 0, 1, 0), now).unwrap().signals().is_empty());
        // karta už byla, druhá červená nic nemění
        assert!(t.ingest("m1", snap(50, 0, 0, 2, 0), now).unwrap().signals().is_empty());

        assert!(t.ingest("m2", snap(55, 1, 0, 0, 1), now).unwrap().signals().is_empty());
    }

    #[test]
    fn simultaneous_first_reds_do_not_fire() {
        let t = tracker();
        let now = Utc::now();
        t.ingest("m1", snap(50, 0, 0, 0, 0), now).unwrap();
        assert!(t.ingest("m1", snap(52, 0, 0, 1, 1), now).unwrap().signals().is_empty());
    }

    #[test]
    fn first_snapshot_compares_against_kick_off() {
        let t = tracker();
        let out = t.ingest("m1", snap(80, 0, 0, 0, 1), Utc::now()).unwrap();
        let mut rules = fired(&out);
        rules.sort();
        assert_eq!(rules, vec![RuleId::RedCardDraw, RuleId::LateDraw]);
        assert_eq!(t.phase("m1"), Some(MatchPhase::Live));
    }

    #[test]
    fn finished_match_rejects_snapshots() {
        let t = tracker();
        let now = Utc::now();
        t.ingest("m1", snap(88, 0, 1, 0, 0), now).unwrap();
        assert_eq!(t.finish("m1"), Some(snap(88, 0, 1, 0, 0)));
        assert_eq!(t.phase("m1"), Some(MatchPhase::Finished));
        assert!(matches!(
            t.ingest("m1", snap(90, 0, 1, 0, 0), now),
            Err(SignalError::MatchFinished(_))
        ));
        assert!(t.live_matches().is_empty());
        assert!(t.forget("m1"));
        assert_eq!(t.phase("m1"), None);
    }

    #[test]
    fn red_card_win_condition_is_configurable() {
        let prev = snap(50, 1, 1, 0, 0);
        let next = snap(51, 1, 1, 0, 1);
        let rule = |win_condition| {
            vec![LiveRule::RedCardDraw(RedCardThresholds { min_minute: 45, win_condition })]
        };
        let ranks = MatchRanks::default();

        let scores = evaluate_transition(&rule(RedCardWinCondition::NonCardedSideScores), "m", &prev, &next, &ranks, Utc::now());
        let any = evaluate_transition(&rule(RedCardWinCondition::AnyGoal), "m", &prev, &next, &ranks, Utc::now());
        let wins = evaluate_transition(&rule(RedCardWinCondition::NonCardedSideWins), "m", &prev, &next, &ranks, Utc::now());

        // 10 mužů hostů dá gól na 1:2
        let away_goal = FinalResult { home_goals: 1, away_goals: 2 };
        assert_eq!(scores[0].side, Side::Home);
        assert_eq!(scores[0].bet.settle(&away_goal), Outcome::Lose);
        assert_eq!(any[0].bet.settle(&away_goal), Outcome::Win);
        assert_eq!(wins[0].bet.settle(&FinalResult { home_goals: 2, away_goals: 1 }), Outcome::Win);
        assert_eq!(wins[0].bet.settle(&FinalResult { home_goals: 2, away_goals: 2 }), Outcome::Lose);
    }

    #[test]
    fn late_draw_rank_gate_backs_the_top_side() {
        let gated = vec![LiveRule::LateDraw(LateDrawThresholds { min_minute: 70, top_rank_gate: Some(5) })];
        let prev = snap(69, 1, 1, 0, 0);
        let next = snap(70, 1, 1, 0, 0);
        let at = Utc::now();
        let ranks = |home, away| MatchRanks { home, away };

        let away_top = evaluate_transition(&gated, "m", &prev, &next, &ranks(Some(11), Some(3)), at);
        assert_eq!(away_top.len(), 1);
        assert_eq!(away_top[0].side, Side::Away);
        assert_eq!(away_top[0].bet, Bet::TeamWins { team: Venue::Away });

        // oba v top 5, ani jeden, nebo neznámé pořadí → nic
        assert!(evaluate_transition(&gated, "m", &prev, &next, &ranks(Some(2), Some(4)), at).is_empty());
        assert!(evaluate_transition(&gated, "m", &prev, &next, &ranks(Some(8), Some(9)), at).is_empty());
        assert!(evaluate_transition(&gated, "m", &prev, &next, &ranks(None, Some(1)), at).is_empty());

        let t = LiveTracker::new(gated);
        t.ingest_with_ranks("m1", prev, ranks(Some(1), Some(14)), at).unwrap();
        let out = t.ingest_with_ranks("m1", next, ranks(Some(1), Some(14)), at).unwrap();
        assert_eq!(out.signals()[0].side, Side::Home);
    }

    #[test]
    fn finish_ignores_unknown_matches_and_sweep_drops_finished() {
        let t = tracker();
        let now = Utc::now();
        assert_eq!(t.finish("ghost"), None);
        assert_eq!(t.tracked(), 0);

        t.ingest("m1", snap(30, 0, 0, 0, 0), now).unwrap();
        t.ingest("m2", snap(30, 0, 0, 0, 0), now).unwrap();
        t.finish("m1");
        assert_eq!(t.forget_where(|_, phase| phase == MatchPhase::Finished), 1);
        assert_eq!(t.phase("m1"), None);
        assert_eq!(t.live_matches(), vec!["m2".to_string()]);
    }

    #[test]
    fn racing_snapshots_for_one_match_settle_on_the_latest() {
        let t = tracker();
        let now = Utc::now();
        let feed = [
            snap(46, 1, 1, 0, 0),
            snap(47, 1, 1, 1, 0),
            snap(55, 1, 1, 1, 0),
            snap(60, 1, 1, 1, 1),
            snap(72, 1, 1, 1, 1),
            snap(80, 2, 1, 1, 1),
        ];
        let red_cards = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for snapshot in feed {
                        // zamítnutí kvůli pořadí je tu v pořádku
                        if let Ok(out) = t.ingest("m1", snapshot, now) {
                            let reds = out.signals().iter().filter(|sig| sig.rule_id == RuleId::RedCardDraw).count();
                            red_cards.fetch_add(reds, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });
        assert_eq!(t.last_snapshot("m1"), Some(snap(80, 2, 1, 1, 1)));
        assert_eq!(red_cards.into_inner(), 1);
    }

    #[test]
    fn matches_are_tracked_independently() {
        let t = tracker();
        let now = Utc::now();
        std::thread::scope(|s| {
            for i in 0..8u8 {
                let t = &t;
                s.spawn(move || {
                    let id = format!("m{i}");
                    for minute in 1..=20u8 {
                        t.ingest(&id, snap(minute, 0, 0, 0, 0), now).unwrap();
                    }
                });
            }
        });
        assert_eq!(t.live_matches().len(), 8);
        assert_eq!(t.last_snapshot("m3").map(|s| s.minute), Some(20));
    }
}
