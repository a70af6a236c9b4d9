/// StreakSignals — Historical Pattern Detector
///
/// Vyhodnocuje poslední dohrané zápasy týmu proti pravidlům série / formy
/// a vrací signály pro jeho NEJBLIŽŠÍ naplánovaný zápas.
/// Jednoduchá pravidla, žádné ML. Bez stavu → lze pouštět paralelně přes týmy.
/// Zápasová pravidla (silný vs slabý, oba ve špatné formě) čtou i formu soupeře.

use chrono::{DateTime, Utc};
use signal_model::{
    Bet, HistoricalRule, Match, MatchStatus, MatchupFormThresholds, PoorFormThresholds, RuleId,
    Side, Signal, SignalError, SignalFeatures, StreakThresholds, StrongVsWeakThresholds,
    TeamResult, Venue,
};
use tracing::debug;

/// Vstup pro jeden tým
#[derive(Debug, Clone, Copy)]
pub struct TeamContext<'a> {
    pub team_id:       &'a str,
    pub rank:          Option<u32>,
    pub league_size:   Option<u32>,
    /// Dohrané zápasy, nejnovější první
    pub history:       &'a [Match],
    pub next_fixture:  &'a Match,
    pub opponent_rank: Option<u32>,
    /// Dohrané zápasy soupeře z `next_fixture`; prázdné = forma soupeře neznámá
    pub opponent_history: &'a [Match],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormEntry {
    pub result:    TeamResult,
    pub goals_for: u8,
}

/// Forma týmu jen ze zápasů FINISHED a striktně před `at` (žádný lookahead).
/// Řadí znovu podle data, na pořadí od providera nespoléháme.
pub fn form_line(team_id: &str, history: &[Match], at: DateTime<Utc>) -> Vec<FormEntry> {
    let mut usable: Vec<&Match> = history
        .iter()
        .filter(|m| m.status == MatchStatus::Finished && m.date < at)
        .filter(|m| m.venue_of(team_id).is_some())
        .collect();
    usable.sort_by(|a, b| b.date.cmp(&a.date));

    usable
        .into_iter()
        .filter_map(|m| {
            Some(FormEntry {
                result:    m.result_for(team_id)?,
                goals_for: m.goals_for(team_id)?,
            })
        })
        .collect()
}

/// Délka série od nejnovějšího zápasu
pub fn leading_run(form: &[FormEntry], pred: impl Fn(&FormEntry) -> bool) -> usize {
    form.iter().take_while(|e| pred(e)).count()
}

#[derive(Debug, Default)]
pub struct DetectionReport {
    pub signals: Vec<Signal>,
    /// Pravidla přeskočená kvůli chybějícím datům (DataGap)
    pub gaps:    Vec<(RuleId, SignalError)>,
}

pub struct StreakDetector {
    rules: Vec<HistoricalRule>,
}

impl StreakDetector {
    pub fn new(rules: Vec<HistoricalRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[HistoricalRule] {
        &self.rules
    }

    /// Každé pravidlo samostatně; víc splněných pravidel = víc nezávislých signálů
    pub fn detect(&self, ctx: &TeamContext<'_>, at: DateTime<Utc>) -> DetectionReport {
        let form = form_line(ctx.team_id, ctx.history, at);
        let mut report = DetectionReport::default();

        for rule in &self.rules {
            match evaluate_rule(rule, ctx, &form, at) {
                Ok(Some(signal)) => {
                    debug!(
                        team = ctx.team_id,
                        rule = %signal.rule_id,
                        streak = ?signal.features.streak_len,
                        "historical rule fired"
                    );
                    report.signals.push(signal);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(team = ctx.team_id, rule = %rule.id(), "rule skipped: {}", e);
                    report.gaps.push((rule.id(), e));
                }
            }
        }

        report
    }
}

/// Jedno pravidlo nad předpočítanou formou.
/// Ok(None) = podmínka nesplněna, Err(DataGap) = nemáme data, pravidlo se přeskočí.
pub fn evaluate_rule(
    rule: &HistoricalRule,
    ctx: &TeamContext<'_>,
    form: &[FormEntry],
    at: DateTime<Utc>,
) -> Result<Option<Signal>, SignalError> {
    let venue = fixture_venue(ctx, at)?;

    match rule {
        HistoricalRule::LosingStreak(t) => streak_signal(
            StreakRule { id: RuleId::LosingStreak, hit: is_loss, bet: Bet::DrawOrWin { team: venue } },
            t,
            ctx,
            form,
            venue,
            at,
        ),
        HistoricalRule::DrawingStreak(t) => streak_signal(
            StreakRule { id: RuleId::DrawingStreak, hit: is_draw, bet: Bet::NoDraw },
            t,
            ctx,
            form,
            venue,
            at,
        ),
        HistoricalRule::NoGoalsStreak(t) => streak_signal(
            StreakRule { id: RuleId::NoGoalsStreak, hit: is_goalless, bet: Bet::TeamScores { team: venue } },
            t,
            ctx,
            form,
            venue,
            at,
        ),
        HistoricalRule::PoorForm(t) => poor_form_signal(t, ctx, form, venue, at),
        HistoricalRule::StrongVsWeakPoorForm(t) => strong_vs_weak_signal(t, ctx, venue, at),
        HistoricalRule::BothTeamsPoorForm(t) => both_poor_signal(t, ctx, form, venue, at),
    }
}

fn is_loss(e: &FormEntry) -> bool {
    e.result == TeamResult::Loss
}

fn is_draw(e: &FormEntry) -> bool {
    e.result == TeamResult::Draw
}

fn is_goalless(e: &FormEntry) -> bool {
    e.goals_for == 0
}

/// Co série počítá a na co se pak sází
struct StreakRule {
    id:  RuleId,
    hit: fn(&FormEntry) -> bool,
    bet: Bet,
}

fn fixture_venue(ctx: &TeamContext<'_>, at: DateTime<Utc>) -> Result<Venue, SignalError> {
    let fixture = ctx.next_fixture;
    let venue = fixture.venue_of(ctx.team_id).ok_or_else(|| {
        SignalError::data_gap(ctx.team_id, format!("fixture {} does not involve team", fixture.id))
    })?;
    if fixture.status != MatchStatus::Scheduled || fixture.date < at {
        return Err(SignalError::data_gap(
            ctx.team_id,
            format!("fixture {} is not an upcoming scheduled match", fixture.id),
        ));
    }
    Ok(venue)
}

fn streak_signal(
    rule: StreakRule,
    thresholds: &StreakThresholds,
    ctx: &TeamContext<'_>,
    form: &[FormEntry],
    venue: Venue,
    at: DateTime<Utc>,
) -> Result<Option<Signal>, SignalError> {
    let rule_id = rule.id;
    // Neznámé pořadí vypíná rank-gated pravidla, nikdy nebereme rank = 0
    let rank = ctx
        .rank
        .ok_or_else(|| SignalError::data_gap(ctx.team_id, format!("{rule_id}: rank unknown")))?;

    let Some(window) = thresholds.window_for(rank) else {
        return Ok(None); // mimo všechna pásma
    };

    // Absence dat není důkaz
    if form.len() < window {
        return Err(SignalError::data_gap(
            ctx.team_id,
            format!("{rule_id}: {} finished matches, need {window}", form.len()),
        ));
    }

    let run = leading_run(form, rule.hit);
    if run < window {
        return Ok(None);
    }

    Ok(Some(build_signal(rule_id, ctx, venue, rule.bet, Some(run as u32), at)))
}

fn poor_form_signal(
    t: &PoorFormThresholds,
    ctx: &TeamContext<'_>,
    form: &[FormEntry],
    venue: Venue,
    at: DateTime<Utc>,
) -> Result<Option<Signal>, SignalError> {
    if form.len() < t.window {
        return Err(SignalError::data_gap(
            ctx.team_id,
            format!("poor_form: {} finished matches, need {}", form.len(), t.window),
        ));
    }

    let wins = form[..t.window].iter().filter(|e| e.result == TeamResult::Win).count();
    let win_rate = wins as f64 / t.window as f64;
    if win_rate >= t.max_win_rate {
        return Ok(None);
    }

    // Poradní signál, délka série ho neovlivňuje
    Ok(Some(build_signal(
        RuleId::PoorForm,
        ctx,
        venue,
        Bet::DrawOrWin { team: venue },
        None,
        at,
    )))
}

/// Delší ze sérií proher / zápasů bez gólu, pokud dosahuje `min_run`.
/// Krátká historie je DataGap, ne "dobrá forma".
fn poor_form_run(
    team_id: &str,
    t: &MatchupFormThresholds,
    form: &[FormEntry],
    rule_id: RuleId,
) -> Result<Option<usize>, SignalError> {
    if form.len() < t.min_run {
        return Err(SignalError::data_gap(
            team_id,
            format!("{rule_id}: {} finished matches, need {}", form.len(), t.min_run),
        ));
    }
    let run = leading_run(form, is_loss).max(leading_run(form, is_goalless));
    Ok((run >= t.min_run).then_some(run))
}

fn opponent_form<'a>(ctx: &TeamContext<'a>, at: DateTime<Utc>) -> (&'a str, Vec<FormEntry>) {
    let opponent = ctx.next_fixture.opponent_of(ctx.team_id).unwrap_or_default();
    (opponent, form_line(opponent, ctx.opponent_history, at))
}

/// Tým je o `min_rank_gap` míst výš než soupeř ve špatné formě → sázka na výhru týmu.
/// Vyhodnoceno z pohledu slabšího týmu nic nevrací, takže zápas dá max. jeden signál.
fn strong_vs_weak_signal(
    t: &StrongVsWeakThresholds,
    ctx: &TeamContext<'_>,
    venue: Venue,
    at: DateTime<Utc>,
) -> Result<Option<Signal>, SignalError> {
    let rule_id = RuleId::StrongVsWeakPoorForm;
    let (Some(rank), Some(opponent_rank)) = (ctx.rank, ctx.opponent_rank) else {
        return Err(SignalError::data_gap(ctx.team_id, format!("{rule_id}: rank unknown")));
    };
    if i64::from(opponent_rank) - i64::from(rank) < i64::from(t.min_rank_gap) {
        return Ok(None);
    }

    let (opponent, form) = opponent_form(ctx, at);
    let Some(run) = poor_form_run(opponent, &t.form, &form, rule_id)? else {
        return Ok(None);
    };

    Ok(Some(build_signal(rule_id, ctx, venue, Bet::TeamWins { team: venue }, Some(run as u32), at)))
}

/// Oba týmy ve špatné formě → remíza. Klíč je na celý zápas a rysy jsou vždy
/// z pohledu domácích, takže vyhodnocení z obou stran dá stejného kandidáta.
fn both_poor_signal(
    t: &MatchupFormThresholds,
    ctx: &TeamContext<'_>,
    form: &[FormEntry],
    venue: Venue,
    at: DateTime<Utc>,
) -> Result<Option<Signal>, SignalError> {
    let rule_id = RuleId::BothTeamsPoorForm;
    if poor_form_run(ctx.team_id, t, form, rule_id)?.is_none() {
        return Ok(None);
    }
    let (opponent, opponent_form) = opponent_form(ctx, at);
    if poor_form_run(opponent, t, &opponent_form, rule_id)?.is_none() {
        return Ok(None);
    }

    let (home_rank, away_rank) = match venue {
        Venue::Home => (ctx.rank, ctx.opponent_rank),
        Venue::Away => (ctx.opponent_rank, ctx.rank),
    };
    Ok(Some(Signal {
        match_id: ctx.next_fixture.id.clone(),
        rule_id,
        side: Side::Match,
        bet: Bet::Draw,
        features: SignalFeatures {
            team_rank: home_rank,
            opponent_rank: away_rank,
            league_size: ctx.league_size,
            ..SignalFeatures::default()
        },
        detected_at: at,
    }))
}

fn build_signal(
    rule_id: RuleId,
    ctx: &TeamContext<'_>,
    venue: Venue,
    bet: Bet,
    streak_len: Option<u32>,
    at: DateTime<Utc>,
) -> Signal {
    Signal {
        match_id: ctx.next_fixture.id.clone(),
        rule_id,
        side: Side::from(venue),
        bet,
        features: SignalFeatures {
            team_rank: ctx.rank,
            opponent_rank: ctx.opponent_rank,
            league_size: ctx.league_size,
            streak_len,
            trigger: None,
        },
        detected_at: at,
    }
}
