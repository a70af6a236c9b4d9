//! RulesEngine — fasáda nad detektorem, trackerem, scorerem a ledgerem.
//!
//! Detektor i scorer jsou bez stavu, tracker serializuje snímky per zápas,
//! ledger je jediný sdílený stav. Engine je `Sync`, takže ho binárka sdílí
//! přes `Arc` mezi blocking tasky.

use chrono::{DateTime, Utc};
use confidence_scorer::{score, Scoring};
use live_tracker::{IngestOutcome, LiveTracker, MatchPhase, MatchRanks};
use logger::{now_iso, EventLogger, SnapshotRejectedEvent};
use opportunity_ledger::{LedgerCounts, OpportunityLedger, RuleBreakdown, WinRateStats};
use signal_model::{
    FinalResult, Match, Opportunity, RuleConfig, RuleId, Side, Signal, SignalError, Snapshot,
    TeamId, Venue,
};
use std::path::PathBuf;
use std::sync::Arc;
use streak_detector::{StreakDetector, TeamContext};
use tracing::{debug, info, warn};

use crate::providers::{LivePoll, Providers};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Co přinesl jeden live poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollReport {
    Ingested(Vec<Opportunity>),
    Unchanged,
    Rejected,
    Resolved(Vec<Opportunity>),
}

pub struct RulesEngine {
    config:    RuleConfig,
    detector:  StreakDetector,
    tracker:   LiveTracker,
    ledger:    OpportunityLedger,
    providers: Providers,
    events:    Option<EventLogger>,
    clock:     Clock,
}

impl RulesEngine {
    pub fn new(config: RuleConfig, providers: Providers) -> Self {
        Self {
            detector: StreakDetector::new(config.historical.clone()),
            tracker: LiveTracker::new(config.live.clone()),
            ledger: OpportunityLedger::new(),
            config,
            providers,
            events: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// JSONL stream do `<dir>/<datum>.jsonl` (ledger přechody + zamítnuté snímky)
    pub fn with_event_log(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.ledger = OpportunityLedger::with_event_log(EventLogger::new(&dir));
        self.events = Some(EventLogger::new(dir));
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ── Historická pravidla ──────────────────────────────────────────────────

    /// Vyhodnotí tým proti jeho nejbližšímu zápasu; vrací přijaté příležitosti
    pub fn evaluate_historical(&self, team_id: &str) -> Vec<Opportunity> {
        let now = self.now();

        let fixture = match self.providers.fixtures.next_fixture(team_id, now) {
            Ok(Some(f)) => f,
            Ok(None) => {
                debug!(team = team_id, "no upcoming fixture");
                return Vec::new();
            }
            Err(e) => {
                warn!(team = team_id, "fixture provider failed: {:#}", e);
                return Vec::new();
            }
        };

        let history = match self
            .providers
            .history
            .finished_matches(team_id, self.config.effective_history_limit())
        {
            Ok(h) => h,
            Err(e) => {
                warn!(team = team_id, "history provider failed: {:#}", e);
                return Vec::new();
            }
        };

        let opponent = fixture.opponent_of(team_id);
        let opponent_rank = opponent.and_then(|o| self.rank_of(o));
        let opponent_history = match opponent {
            Some(o) if self.detector.rules().iter().any(|r| r.needs_opponent_form()) => self
                .providers
                .history
                .finished_matches(o, self.config.effective_history_limit())
                .unwrap_or_else(|e| {
                    warn!(team = o, "opponent history failed: {:#}", e);
                    Vec::new()
                }),
            _ => Vec::new(),
        };

        let ctx = TeamContext {
            team_id,
            rank: self.rank_of(team_id),
            league_size: self.league_size_of(team_id),
            history: &history,
            next_fixture: &fixture,
            opponent_rank,
            opponent_history: &opponent_history,
        };

        let report = self.detector.detect(&ctx, now);
        for (rule, gap) in &report.gaps {
            debug!(team = team_id, %rule, "skipped: {}", gap);
        }

        report
            .signals
            .into_iter()
            .filter_map(|s| self.score_and_submit(s))
            .collect()
    }

    /// Sekvenčně přes týmy; paralelní fan-out dělá binárka
    pub fn evaluate_batch(&self, team_ids: &[TeamId]) -> Vec<Opportunity> {
        team_ids
            .iter()
            .flat_map(|team| self.evaluate_historical(team))
            .collect()
    }

    // ── Live ─────────────────────────────────────────────────────────────────

    /// Jediný vstup pro live snímek. Zamítnutý snímek se zaloguje a vrátí jako chyba,
    /// stav trackeru zůstane beze změny. Vyhodnocený zápas se už nesleduje.
    pub fn ingest_live_snapshot(
        &self,
        match_id: &str,
        snapshot: Snapshot,
    ) -> Result<Vec<Opportunity>, SignalError> {
        if self.ledger.is_closed(match_id) {
            let e = SignalError::MatchFinished(match_id.to_string());
            self.log_rejected(match_id, &snapshot, &e);
            return Err(e);
        }

        let fixture = self.fixture_of(match_id);
        let ranks = fixture.as_ref().map_or_else(MatchRanks::default, |f| MatchRanks {
            home: self.rank_of(&f.home_team),
            away: self.rank_of(&f.away_team),
        });

        let outcome = match self.tracker.ingest_with_ranks(match_id, snapshot, ranks, self.now()) {
            Ok(o) => o,
            Err(e) => {
                self.log_rejected(match_id, &snapshot, &e);
                return Err(e);
            }
        };

        let signals = match outcome {
            IngestOutcome::Accepted { signals } => signals,
            IngestOutcome::Unchanged => return Ok(Vec::new()),
        };

        Ok(signals
            .into_iter()
            .map(|s| self.with_live_ranks(s, fixture.as_ref()))
            .filter_map(|s| self.score_and_submit(s))
            .collect())
    }

    /// Jeden poll live providera: snímek → ingest, konec → finish + resolve
    pub fn poll_live(&self, match_id: &str) -> anyhow::Result<PollReport> {
        match self.providers.live.poll(match_id)? {
            LivePoll::NoChange => Ok(PollReport::Unchanged),
            LivePoll::Snapshot(s) => match self.ingest_live_snapshot(match_id, s) {
                Ok(accepted) => Ok(PollReport::Ingested(accepted)),
                Err(_) => Ok(PollReport::Rejected),
            },
            LivePoll::Finished(result) => Ok(PollReport::Resolved(self.resolve_match(match_id, result))),
        }
    }

    pub fn resolve_match(&self, match_id: &str, result: FinalResult) -> Vec<Opportunity> {
        if let Some(last) = self.tracker.finish(match_id) {
            if FinalResult::from(last) != result {
                debug!(match_id, "final result differs from last live snapshot");
            }
        }
        let resolved = self.ledger.resolve(match_id, result, self.now());
        // Pozdní snímky odmítne ledger (is_closed), stav trackeru už není potřeba
        self.tracker.forget(match_id);
        info!(
            match_id,
            home = result.home_goals,
            away = result.away_goals,
            resolved = resolved.len(),
            "match resolved"
        );
        resolved
    }

    // ── Čtení ────────────────────────────────────────────────────────────────

    pub fn open_opportunities(&self) -> Vec<Opportunity> {
        self.ledger.open_opportunities()
    }

    pub fn stats(&self, rule: RuleId) -> WinRateStats {
        self.ledger.stats(rule)
    }

    pub fn aggregate(&self, rule: RuleId, predicate: impl Fn(&Opportunity) -> bool) -> WinRateStats {
        self.ledger.aggregate(rule, predicate)
    }

    pub fn breakdown(&self, rule: RuleId) -> RuleBreakdown {
        self.ledger.breakdown(rule)
    }

    pub fn counts(&self) -> LedgerCounts {
        self.ledger.counts()
    }

    pub fn live_matches(&self) -> Vec<String> {
        self.tracker.live_matches()
    }

    /// Smaže staré vyřešené záznamy a stav trackeru pro skončené zápasy
    pub fn prune_resolved(&self, older_than: DateTime<Utc>) -> usize {
        let swept = self
            .tracker
            .forget_where(|id, phase| phase == MatchPhase::Finished || self.ledger.is_closed(id));
        if swept > 0 {
            debug!(swept, "finished matches dropped from tracker");
        }
        self.ledger.prune_resolved(older_than)
    }

    pub fn prune_closed(&self, older_than: DateTime<Utc>) -> usize {
        self.ledger.prune_closed(older_than)
    }

    pub fn tracked_matches(&self) -> usize {
        self.tracker.tracked()
    }

    // ── Interní ──────────────────────────────────────────────────────────────

    fn score_and_submit(&self, signal: Signal) -> Option<Opportunity> {
        let scored = match score(&self.config.scoring, signal.rule_id, &signal.features) {
            Scoring::Scored(s) => s,
            Scoring::Excluded { team_rank, league_size } => {
                debug!(
                    key = %signal.key(),
                    team_rank,
                    league_size,
                    "candidate excluded by bottom band"
                );
                return None;
            }
        };
        debug!(key = %signal.key(), breakdown = ?scored.breakdown, "scored");

        let candidate = Opportunity::candidate(
            signal,
            scored.confidence,
            scored.bucket,
            self.config.version.clone(),
        );
        self.ledger.submit(candidate).accepted()
    }

    fn fixture_of(&self, match_id: &str) -> Option<Match> {
        self.providers.fixtures.fixture(match_id).unwrap_or_else(|e| {
            warn!(match_id, "fixture lookup failed: {:#}", e);
            None
        })
    }

    /// Live signál na stranu týmu dostane pořadí obou týmů (pro opponent bucket)
    fn with_live_ranks(&self, mut signal: Signal, fixture: Option<&Match>) -> Signal {
        let venue = match signal.side {
            Side::Home => Venue::Home,
            Side::Away => Venue::Away,
            Side::Match => return signal,
        };
        let Some(fixture) = fixture else {
            return signal;
        };
        let team = fixture.team_at(venue);
        let opponent = fixture.team_at(venue.opposite());
        signal.features.team_rank = self.rank_of(team);
        signal.features.opponent_rank = self.rank_of(opponent);
        signal.features.league_size = self.league_size_of(team);
        signal
    }

    fn rank_of(&self, team_id: &str) -> Option<u32> {
        self.providers.standings.rank(team_id).unwrap_or_else(|e| {
            warn!(team = team_id, "standings provider failed: {:#}", e);
            None
        })
    }

    fn league_size_of(&self, team_id: &str) -> Option<u32> {
        self.providers.standings.league_size(team_id).unwrap_or_else(|e| {
            warn!(team = team_id, "league size lookup failed: {:#}", e);
            None
        })
    }

    fn log_rejected(&self, match_id: &str, snapshot: &Snapshot, err: &SignalError) {
        warn!(match_id, "snapshot rejected: {}", err);
        if let Some(log) = &self.events {
            let event = SnapshotRejectedEvent {
                ts:       now_iso(),
                event:    "SNAPSHOT_REJECTED",
                match_id: match_id.to_string(),
                reason:   err.to_string(),
                snapshot: serde_json::to_value(snapshot).unwrap_or_default(),
            };
            if let Err(e) = log.log(&event) {
                warn!("event log write failed: {}", e);
            }
        }
    }
}
