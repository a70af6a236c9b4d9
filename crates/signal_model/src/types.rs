use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TeamId = String;
pub type MatchId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id:     TeamId,
    pub name:   String,
    pub rank:   Option<u32>, // None = pořadí neznáme, NIKDY ne 0
    pub league: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RedCards {
    pub home: u8,
    pub away: u8,
}

impl RedCards {
    pub fn for_venue(&self, venue: Venue) -> u8 {
        match venue {
            Venue::Home => self.home,
            Venue::Away => self.away,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id:         MatchId,
    pub home_team:  TeamId,
    pub away_team:  TeamId,
    pub date:       DateTime<Utc>,
    pub status:     MatchStatus,
    #[serde(default)]
    pub minute:     u8,
    #[serde(default)]
    pub home_goals: u8,
    #[serde(default)]
    pub away_goals: u8,
    #[serde(default)]
    pub red_cards:  RedCards,
    pub league:     String,
}

/// Výsledek zápasu z pohledu jednoho týmu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamResult {
    Win,
    Draw,
    Loss,
}

impl Match {
    pub fn venue_of(&self, team_id: &str) -> Option<Venue> {
        if self.home_team == team_id {
            Some(Venue::Home)
        } else if self.away_team == team_id {
            Some(Venue::Away)
        } else {
            None
        }
    }

    pub fn team_at(&self, venue: Venue) -> &str {
        match venue {
            Venue::Home => &self.home_team,
            Venue::Away => &self.away_team,
        }
    }

    pub fn opponent_of(&self, team_id: &str) -> Option<&str> {
        self.venue_of(team_id).map(|v| self.team_at(v.opposite()))
    }

    pub fn goals_for(&self, team_id: &str) -> Option<u8> {
        match self.venue_of(team_id)? {
            Venue::Home => Some(self.home_goals),
            Venue::Away => Some(self.away_goals),
        }
    }

    /// Jen dohrané zápasy mají výsledek
    pub fn result_for(&self, team_id: &str) -> Option<TeamResult> {
        if self.status != MatchStatus::Finished {
            return None;
        }
        let (own, other) = match self.venue_of(team_id)? {
            Venue::Home => (self.home_goals, self.away_goals),
            Venue::Away => (self.away_goals, self.home_goals),
        };
        Some(if own > other {
            TeamResult::Win
        } else if own < other {
            TeamResult::Loss
        } else {
            TeamResult::Draw
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Home,
    Away,
}

impl Venue {
    pub fn opposite(self) -> Venue {
        match self {
            Venue::Home => Venue::Away,
            Venue::Away => Venue::Home,
        }
    }
}

/// Strana klíče příležitosti. `Match` = signál na celý zápas (late draw).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Home,
    Away,
    Match,
}

impl From<Venue> for Side {
    fn from(v: Venue) -> Self {
        match v {
            Venue::Home => Side::Home,
            Venue::Away => Side::Away,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Home => "home",
            Side::Away => "away",
            Side::Match => "match",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    LosingStreak,
    DrawingStreak,
    NoGoalsStreak,
    PoorForm,
    StrongVsWeakPoorForm,
    BothTeamsPoorForm,
    RedCardDraw,
    LateDraw,
}

impl RuleId {
    pub const ALL: [RuleId; 8] = [
        RuleId::LosingStreak,
        RuleId::DrawingStreak,
        RuleId::NoGoalsStreak,
        RuleId::PoorForm,
        RuleId::StrongVsWeakPoorForm,
        RuleId::BothTeamsPoorForm,
        RuleId::RedCardDraw,
        RuleId::LateDraw,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::LosingStreak  => "losing_streak",
            RuleId::DrawingStreak => "drawing_streak",
            RuleId::NoGoalsStreak => "no_goals_streak",
            RuleId::PoorForm      => "poor_form",
            RuleId::StrongVsWeakPoorForm => "strong_vs_weak_poor_form",
            RuleId::BothTeamsPoorForm    => "both_teams_poor_form",
            RuleId::RedCardDraw   => "red_card_draw",
            RuleId::LateDraw      => "late_draw",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, RuleId::RedCardDraw | RuleId::LateDraw)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .iter()
            .find(|r| r.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown rule id '{s}'"))
    }
}

/// Okamžitý stav live zápasu (minuta, skóre, červené karty)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Snapshot {
    pub minute:     u8,
    pub home_goals: u8,
    pub away_goals: u8,
    #[serde(default)]
    pub red_cards:  RedCards,
}

impl Snapshot {
    /// Implicitní stav ve výkopu: 0', 0-0, bez karet
    pub fn kick_off() -> Self {
        Self::default()
    }

    pub fn is_level(&self) -> bool {
        self.home_goals == self.away_goals
    }

    pub fn goals_for(&self, venue: Venue) -> u8 {
        match venue {
            Venue::Home => self.home_goals,
            Venue::Away => self.away_goals,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    pub home_goals: u8,
    pub away_goals: u8,
}

impl FinalResult {
    pub fn goals_for(&self, venue: Venue) -> u8 {
        match venue {
            Venue::Home => self.home_goals,
            Venue::Away => self.away_goals,
        }
    }
}

impl From<Snapshot> for FinalResult {
    fn from(s: Snapshot) -> Self {
        Self { home_goals: s.home_goals, away_goals: s.away_goals }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "by")]
pub enum GoalScorer {
    Any,
    Team { team: Venue },
}

/// Podmínka výhry, se kterou byla příležitost otevřena.
/// Vyhodnocuje se jen jednou, při přechodu zápasu do FINISHED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Bet {
    /// Tým neprohraje
    DrawOrWin { team: Venue },
    /// Zápas neskončí remízou
    NoDraw,
    Draw,
    /// Tým vstřelí aspoň jeden gól
    TeamScores { team: Venue },
    TeamWins { team: Venue },
    /// Gól padne až po trigger snapshotu
    GoalAfter { home_goals: u8, away_goals: u8, scorer: GoalScorer },
}

impl Bet {
    pub fn settle(&self, result: &FinalResult) -> Outcome {
        let won = match *self {
            Bet::DrawOrWin { team } => {
                result.goals_for(team) >= result.goals_for(team.opposite())
            }
            Bet::NoDraw => result.home_goals != result.away_goals,
            Bet::Draw => result.home_goals == result.away_goals,
            Bet::TeamScores { team } => result.goals_for(team) > 0,
            Bet::TeamWins { team } => result.goals_for(team) > result.goals_for(team.opposite()),
            Bet::GoalAfter { home_goals, away_goals, scorer } => match scorer {
                GoalScorer::Any => {
                    result.home_goals > home_goals || result.away_goals > away_goals
                }
                GoalScorer::Team { team: Venue::Home } => result.home_goals > home_goals,
                GoalScorer::Team { team: Venue::Away } => result.away_goals > away_goals,
            },
        };
        if won { Outcome::Win } else { Outcome::Lose }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Lose,
    Pending,
}

/// Síla soupeře podle rozdílu v tabulce (soupeř − tým, kladné = slabší soupeř)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpponentBucket {
    MuchStronger,
    Stronger,
    Similar,
    Weaker,
    MuchWeaker,
}

impl OpponentBucket {
    pub const ALL: [OpponentBucket; 5] = [
        OpponentBucket::MuchStronger,
        OpponentBucket::Stronger,
        OpponentBucket::Similar,
        OpponentBucket::Weaker,
        OpponentBucket::MuchWeaker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpponentBucket::MuchStronger => "opponent_much_stronger",
            OpponentBucket::Stronger     => "opponent_stronger",
            OpponentBucket::Similar      => "similar_rank",
            OpponentBucket::Weaker       => "opponent_weaker",
            OpponentBucket::MuchWeaker   => "opponent_much_weaker",
        }
    }
}

/// Kontext, ze kterého se počítá confidence (a později statistiky)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalFeatures {
    pub team_rank:     Option<u32>,
    pub opponent_rank: Option<u32>,
    pub league_size:   Option<u32>,
    pub streak_len:    Option<u32>,
    /// Live pravidla: snapshot, na kterém signál vznikl
    pub trigger:       Option<Snapshot>,
}

/// Výstup detektoru / trackeru, ještě bez confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub match_id:    MatchId,
    pub rule_id:     RuleId,
    pub side:        Side,
    pub bet:         Bet,
    pub features:    SignalFeatures,
    pub detected_at: DateTime<Utc>,
}

impl Signal {
    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            match_id: self.match_id.clone(),
            rule_id:  self.rule_id,
            side:     self.side,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpportunityKey {
    pub match_id: MatchId,
    pub rule_id:  RuleId,
    pub side:     Side,
}

impl fmt::Display for OpportunityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.match_id, self.rule_id, self.side)
    }
}

pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub match_id:        MatchId,
    pub rule_id:         RuleId,
    pub side:            Side,
    pub confidence:      f64,
    pub created_at:      DateTime<Utc>,
    pub status:          OpportunityStatus,
    pub outcome:         Outcome,
    pub bet:             Bet,
    pub features:        SignalFeatures,
    pub opponent_bucket: Option<OpponentBucket>,
    pub config_version:  String,
    pub resolved_at:     Option<DateTime<Utc>>,
}

impl Opportunity {
    /// Kandidát pro ledger: open, outcome pending, confidence oříznutá do [0,1]
    pub fn candidate(
        signal: Signal,
        confidence: f64,
        opponent_bucket: Option<OpponentBucket>,
        config_version: impl Into<String>,
    ) -> Self {
        Self {
            match_id: signal.match_id,
            rule_id: signal.rule_id,
            side: signal.side,
            confidence: clamp_confidence(confidence),
            created_at: signal.detected_at,
            status: OpportunityStatus::Open,
            outcome: Outcome::Pending,
            bet: signal.bet,
            features: signal.features,
            opponent_bucket,
            config_version: config_version.into(),
            resolved_at: None,
        }
    }

    pub fn key(&self) -> OpportunityKey {
        OpportunityKey {
            match_id: self.match_id.clone(),
            rule_id:  self.rule_id,
            side:     self.side,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == OpportunityStatus::Open
    }
}
