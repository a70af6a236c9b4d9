use anyhow::anyhow;
use chrono::{DateTime, Duration, TimeZone, Utc};
use signal_model::{
    Bet, FinalResult, HistoricalRule, LateDrawThresholds, LiveRule, Match, MatchStatus,
    MatchupFormThresholds, OpponentBucket, Outcome, RedCards, RuleConfig, RuleId, Side,
    SignalError, Snapshot, StrongVsWeakThresholds, Team, Venue,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use streak_signals::{
    FixtureProvider, LivePoll, LiveSnapshotProvider, MatchHistoryProvider, PollReport, Providers,
    ReplayData, ReplayFeed, ReplayFrame, RulesEngine, StandingsProvider,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap()
}

fn team(id: &str, rank: Option<u32>) -> Team {
    Team { id: id.to_string(), name: id.to_uppercase(), rank, league: "L1".to_string() }
}

fn played(id: &str, home: &str, away: &str, score: (u8, u8), days_ago: i64) -> Match {
    Match {
        id: id.to_string(),
        home_team: home.to_string(),
        away_team: away.to_string(),
        date: t0() - Duration::days(days_ago),
        status: MatchStatus::Finished,
        minute: 90,
        home_goals: score.0,
        away_goals: score.1,
        red_cards: RedCards::default(),
        league: "L1".to_string(),
    }
}

fn fixture(id: &str, home: &str, away: &str, days_ahead: i64) -> Match {
    Match {
        id: id.to_string(),
        home_team: home.to_string(),
        away_team: away.to_string(),
        date: t0() + Duration::days(days_ahead),
        status: MatchStatus::Scheduled,
        minute: 0,
        home_goals: 0,
        away_goals: 0,
        red_cards: RedCards::default(),
        league: "L1".to_string(),
    }
}

fn snap(minute: u8, home: u8, away: u8, red_home: u8, red_away: u8) -> Snapshot {
    Snapshot {
        minute,
        home_goals: home,
        away_goals: away,
        red_cards: RedCards { home: red_home, away: red_away },
    }
}

/// a: 4. místo, dvě prohry; b: 10. místo, tři prohry; c: 12.; d: 4.
fn league() -> ReplayData {
    ReplayData {
        now: t0(),
        teams: vec![
            team("a", Some(4)),
            team("b", Some(10)),
            team("c", Some(12)),
            team("d", Some(4)),
            team("e", Some(2)),
        ],
        league_sizes: BTreeMap::from([("L1".to_string(), 20)]),
        matches: vec![
            played("a1", "a", "x", (0, 1), 7),
            played("a2", "y", "a", (2, 1), 14),
            played("a3", "a", "z", (3, 0), 21),
            played("b1", "b", "x", (1, 2), 7),
            played("b2", "y", "b", (3, 1), 14),
            played("b3", "b", "z", (2, 4), 21),
            played("b4", "b", "w", (2, 0), 28),
            played("e1", "e", "x", (0, 2), 7),
            fixture("a-c", "a", "c", 3),
            fixture("d-b", "d", "b", 4),
            fixture("e-c", "e", "c", 5),
            // už běží: výkop před hodinou, nejbližší fixture pro a je tedy a-c
            Match { date: t0() - Duration::hours(1), ..fixture("live1", "a", "c", 0) },
        ],
        live: BTreeMap::new(),
    }
}

fn engine_with(data: ReplayData) -> RulesEngine {
    let feed = Arc::new(ReplayFeed::new(data));
    RulesEngine::new(RuleConfig::default(), Providers::from_single(feed)).with_clock(t0)
}

fn engine() -> RulesEngine {
    engine_with(league())
}

fn engine_with_config(config: RuleConfig) -> RulesEngine {
    let feed = Arc::new(ReplayFeed::new(league()));
    RulesEngine::new(config, Providers::from_single(feed)).with_clock(t0)
}

fn red_card_count(engine: &RulesEngine) -> usize {
    engine
        .open_opportunities()
        .iter()
        .filter(|o| o.rule_id == RuleId::RedCardDraw)
        .count()
}

#[test]
fn top5_team_with_two_losses_against_weaker_opponent() {
    let engine = engine();
    let accepted = engine.evaluate_historical("a");
    assert_eq!(accepted.len(), 1);

    let o = &accepted[0];
    assert_eq!(o.rule_id, RuleId::LosingStreak);
    assert_eq!(o.match_id, "a-c");
    assert_eq!(o.side, Side::Home);
    assert_eq!(o.opponent_bucket, Some(OpponentBucket::MuchWeaker));
    assert!((o.confidence - 0.6).abs() < 1e-9);
    assert_eq!(o.config_version, RuleConfig::default().version);
}

#[test]
fn three_losses_against_much_stronger_opponent() {
    let engine = engine();
    let accepted = engine.evaluate_historical("b");
    assert_eq!(accepted.len(), 1);

    let o = &accepted[0];
    assert_eq!(o.rule_id, RuleId::LosingStreak);
    assert_eq!(o.side, Side::Away);
    assert_eq!(o.features.streak_len, Some(3));
    assert_eq!(o.opponent_bucket, Some(OpponentBucket::MuchStronger));
    assert!((o.confidence - 0.35).abs() < 1e-9);
}

#[test]
fn red_card_draw_fires_once_per_match() {
    let engine = engine();
    assert!(engine.ingest_live_snapshot("live1", snap(46, 1, 1, 0, 0)).unwrap().is_empty());

    let accepted = engine.ingest_live_snapshot("live1", snap(47, 1, 1, 1, 0)).unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].rule_id, RuleId::RedCardDraw);
    // sázka na hosty (c), kteří mají o hráče víc
    assert_eq!(accepted[0].side, Side::Away);
    assert_eq!(accepted[0].opponent_bucket, Some(OpponentBucket::MuchStronger));

    assert!(engine.ingest_live_snapshot("live1", snap(50, 1, 1, 1, 0)).unwrap().is_empty());
    assert_eq!(red_card_count(&engine), 1);
}

#[test]
fn red_card_for_the_other_side_later_opens_nothing_new() {
    let engine = engine();
    engine.ingest_live_snapshot("live1", snap(46, 1, 1, 0, 0)).unwrap();
    assert_eq!(engine.ingest_live_snapshot("live1", snap(47, 1, 1, 1, 0)).unwrap().len(), 1);

    assert!(engine.ingest_live_snapshot("live1", snap(60, 1, 1, 1, 1)).unwrap().is_empty());
    assert_eq!(red_card_count(&engine), 1);
    assert_eq!(engine.open_opportunities()[0].side, Side::Away);
}

#[test]
fn late_draw_loses_when_match_ends_level() {
    let engine = engine();
    engine.ingest_live_snapshot("live1", snap(60, 1, 1, 0, 0)).unwrap();
    let accepted = engine.ingest_live_snapshot("live1", snap(71, 1, 1, 0, 0)).unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].rule_id, RuleId::LateDraw);
    assert_eq!(accepted[0].side, Side::Match);

    let resolved = engine.resolve_match("live1", FinalResult { home_goals: 1, away_goals: 1 });
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].outcome, Outcome::Lose);
    assert_eq!(engine.stats(RuleId::LateDraw).losses, 1);
}

#[test]
fn repeated_snapshot_changes_nothing() {
    let engine = engine();
    let first = engine.ingest_live_snapshot("live1", snap(72, 0, 0, 0, 0)).unwrap();
    assert_eq!(first.len(), 1);
    let before = engine.counts();

    let second = engine.ingest_live_snapshot("live1", snap(72, 0, 0, 0, 0)).unwrap();
    assert!(second.is_empty());
    assert_eq!(engine.counts(), before);
}

#[test]
fn regressing_snapshot_is_rejected_without_state_change() {
    let engine = engine();
    engine.ingest_live_snapshot("live1", snap(60, 2, 1, 0, 1)).unwrap();

    let rejected = engine.ingest_live_snapshot("live1", snap(61, 1, 1, 0, 1));
    assert!(matches!(rejected, Err(SignalError::SnapshotOrderingAnomaly { .. })));
    let cards = engine.ingest_live_snapshot("live1", snap(61, 2, 1, 0, 0));
    assert!(matches!(cards, Err(SignalError::SnapshotOrderingAnomaly { .. })));

    // stav zůstal na 60' 2-1, takže vyrovnání ve 75' je pořád hrana pozdní remízy
    let accepted = engine.ingest_live_snapshot("live1", snap(75, 2, 2, 0, 1)).unwrap();
    assert_eq!(accepted.iter().map(|o| o.rule_id).collect::<Vec<_>>(), vec![RuleId::LateDraw]);
}

#[test]
fn evaluating_twice_keeps_one_open_opportunity() {
    let engine = engine();
    assert_eq!(engine.evaluate_historical("a").len(), 1);
    assert!(engine.evaluate_historical("a").is_empty());
    assert_eq!(engine.open_opportunities().len(), 1);
    assert_eq!(engine.counts().suppressed_total, 1);
}

#[test]
fn short_history_never_fires() {
    let engine = engine();
    // e je 2., ale má jen jeden dohraný zápas
    assert!(engine.evaluate_historical("e").is_empty());
}

#[test]
fn batch_collects_every_team() {
    let engine = engine();
    let teams: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
    let accepted = engine.evaluate_batch(&teams);
    assert_eq!(accepted.len(), 2);
    for o in &accepted {
        assert!((0.0..=1.0).contains(&o.confidence));
    }
}

#[test]
fn resolve_match_is_idempotent() {
    let engine = engine();
    engine.ingest_live_snapshot("live1", snap(80, 0, 0, 0, 0)).unwrap();
    let result = FinalResult { home_goals: 0, away_goals: 1 };

    let first = engine.resolve_match("live1", result);
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].outcome, Outcome::Win);
    assert!(engine.resolve_match("live1", result).is_empty());
    assert_eq!(engine.stats(RuleId::LateDraw).total, 1);

    assert!(matches!(
        engine.ingest_live_snapshot("live1", snap(90, 0, 1, 0, 0)),
        Err(SignalError::MatchFinished(_))
    ));
}

#[test]
fn poll_live_drives_replay_to_resolution() {
    let mut data = league();
    data.live.insert(
        "live1".to_string(),
        vec![
            ReplayFrame::Snapshot(snap(46, 1, 1, 0, 0)),
            ReplayFrame::NoChange,
            ReplayFrame::Snapshot(snap(40, 1, 1, 0, 0)),
            ReplayFrame::Snapshot(snap(52, 1, 1, 0, 1)),
            ReplayFrame::Finished(FinalResult { home_goals: 2, away_goals: 1 }),
        ],
    );
    let engine = engine_with(data);

    assert_eq!(engine.poll_live("live1").unwrap(), PollReport::Ingested(Vec::new()));
    assert_eq!(engine.poll_live("live1").unwrap(), PollReport::Unchanged);
    assert_eq!(engine.poll_live("live1").unwrap(), PollReport::Rejected);

    let PollReport::Ingested(accepted) = engine.poll_live("live1").unwrap() else {
        panic!("expected accepted red card signal");
    };
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].side, Side::Home);

    let PollReport::Resolved(resolved) = engine.poll_live("live1").unwrap() else {
        panic!("expected resolution");
    };
    assert_eq!(resolved.len(), 1);
    // domácí (bez karty) dali gól po 52. minutě
    assert_eq!(resolved[0].outcome, Outcome::Win);
    assert!(engine.live_matches().is_empty());
}

struct Unavailable;

impl MatchHistoryProvider for Unavailable {
    fn finished_matches(&self, _: &str, _: usize) -> anyhow::Result<Vec<Match>> {
        Err(anyhow!("history down"))
    }
}

impl StandingsProvider for Unavailable {
    fn rank(&self, _: &str) -> anyhow::Result<Option<u32>> {
        Err(anyhow!("standings down"))
    }
}

impl FixtureProvider for Unavailable {
    fn next_fixture(&self, _: &str, _: DateTime<Utc>) -> anyhow::Result<Option<Match>> {
        Ok(Some(fixture("f", "a", "b", 1)))
    }

    fn fixture(&self, _: &str) -> anyhow::Result<Option<Match>> {
        Err(anyhow!("fixtures down"))
    }
}

impl LiveSnapshotProvider for Unavailable {
    fn poll(&self, _: &str) -> anyhow::Result<LivePoll> {
        Err(anyhow!("live feed down"))
    }
}

#[test]
fn upstream_failure_degrades_to_no_opportunities() {
    let engine = RulesEngine::new(RuleConfig::default(), Providers::from_single(Arc::new(Unavailable)))
        .with_clock(t0);
    assert!(engine.evaluate_historical("a").is_empty());
    assert!(engine.poll_live("f").is_err());

    // live pravidla běží i bez fixture/tabulky, jen bez opponent bucketu
    let accepted = engine.ingest_live_snapshot("f", snap(70, 0, 0, 0, 0)).unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].opponent_bucket, None);
}

#[test]
fn pruned_match_stays_closed_and_untracked() {
    let engine = engine();
    engine.ingest_live_snapshot("live1", snap(80, 0, 0, 0, 0)).unwrap();
    assert_eq!(engine.resolve_match("live1", FinalResult { home_goals: 0, away_goals: 0 }).len(), 1);
    assert_eq!(engine.tracked_matches(), 0);

    // resolved_at = t0, cut-off o den později
    assert_eq!(engine.prune_resolved(t0() + Duration::days(1)), 1);
    assert!(matches!(
        engine.ingest_live_snapshot("live1", snap(85, 0, 0, 0, 0)),
        Err(SignalError::MatchFinished(_))
    ));
    assert!(engine.open_opportunities().is_empty());
    assert_eq!(engine.tracked_matches(), 0);
}

#[test]
fn resolving_an_unseen_match_leaves_no_tracker_state() {
    let engine = engine();
    assert!(engine.resolve_match("never-live", FinalResult { home_goals: 1, away_goals: 0 }).is_empty());
    assert_eq!(engine.tracked_matches(), 0);
    assert!(engine.live_matches().is_empty());
}

fn matchup_config() -> RuleConfig {
    let mut config = RuleConfig::default();
    config.historical.push(HistoricalRule::StrongVsWeakPoorForm(StrongVsWeakThresholds {
        min_rank_gap: 5,
        form:         MatchupFormThresholds { min_run: 2 },
    }));
    config.historical.push(HistoricalRule::BothTeamsPoorForm(MatchupFormThresholds { min_run: 2 }));
    config
}

#[test]
fn stronger_side_is_backed_against_team_on_losing_run() {
    let engine = engine_with_config(matchup_config());

    // d (4.) hostí b (10.), b prohrál tři zápasy v řadě
    let accepted = engine.evaluate_historical("d");
    assert_eq!(accepted.len(), 1);
    let o = &accepted[0];
    assert_eq!(o.rule_id, RuleId::StrongVsWeakPoorForm);
    assert_eq!(o.match_id, "d-b");
    assert_eq!(o.side, Side::Home);
    assert_eq!(o.bet, Bet::TeamWins { team: Venue::Home });
    assert!((o.confidence - 0.825).abs() < 1e-9);

    // z pohledu slabšího b jen jeho vlastní losing streak
    let from_b: Vec<RuleId> = engine.evaluate_historical("b").iter().map(|o| o.rule_id).collect();
    assert_eq!(from_b, vec![RuleId::LosingStreak]);
}

#[test]
fn late_draw_rank_gate_backs_the_top_five_side() {
    let mut config = RuleConfig::default();
    config.live = vec![LiveRule::LateDraw(LateDrawThresholds { min_minute: 70, top_rank_gate: Some(5) })];
    let engine = engine_with_config(config);

    let accepted = engine.ingest_live_snapshot("live1", snap(71, 1, 1, 0, 0)).unwrap();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].side, Side::Home);
    assert_eq!(accepted[0].opponent_bucket, Some(OpponentBucket::MuchWeaker));

    let resolved = engine.resolve_match("live1", FinalResult { home_goals: 2, away_goals: 1 });
    assert_eq!(resolved[0].outcome, Outcome::Win);
}
