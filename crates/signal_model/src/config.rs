//! RuleConfig — verzovaná, zvenku injektovaná konfigurace pravidel.
//!
//! Registry pravidel jsou jen data (tagged varianty), takže nové pravidlo
//! znamená novou variantu + jeho evaluátor, ne zásah do centrálního dispatcheru.
//! Multiplikátory se ladí offline ze statistik ledgeru a nasazují novou verzí.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::SignalError;
use crate::types::{OpponentBucket, RuleId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub version:       String,
    /// Kolik dohraných zápasů chceme od history providera
    pub history_limit: usize,
    pub historical:    Vec<HistoricalRule>,
    pub live:          Vec<LiveRule>,
    pub scoring:       ScoringTable,
}

// ── Registry pravidel ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoricalRule {
    LosingStreak(StreakThresholds),
    DrawingStreak(StreakThresholds),
    NoGoalsStreak(StreakThresholds),
    PoorForm(PoorFormThresholds),
    /// Zápasová pravidla: potřebují formu obou týmů
    StrongVsWeakPoorForm(StrongVsWeakThresholds),
    BothTeamsPoorForm(MatchupFormThresholds),
}

impl HistoricalRule {
    pub fn id(&self) -> RuleId {
        match self {
            HistoricalRule::LosingStreak(_)  => RuleId::LosingStreak,
            HistoricalRule::DrawingStreak(_) => RuleId::DrawingStreak,
            HistoricalRule::NoGoalsStreak(_) => RuleId::NoGoalsStreak,
            HistoricalRule::PoorForm(_)      => RuleId::PoorForm,
            HistoricalRule::StrongVsWeakPoorForm(_) => RuleId::StrongVsWeakPoorForm,
            HistoricalRule::BothTeamsPoorForm(_)    => RuleId::BothTeamsPoorForm,
        }
    }

    pub fn needs_opponent_form(&self) -> bool {
        matches!(self, HistoricalRule::StrongVsWeakPoorForm(_) | HistoricalRule::BothTeamsPoorForm(_))
    }

    /// Nejdelší okno, které pravidlo může potřebovat
    pub fn max_window(&self) -> usize {
        match self {
            HistoricalRule::LosingStreak(t)
            | HistoricalRule::DrawingStreak(t)
            | HistoricalRule::NoGoalsStreak(t) => t.bands.iter().map(|b| b.window).max().unwrap_or(0),
            HistoricalRule::PoorForm(t) => t.window,
            HistoricalRule::StrongVsWeakPoorForm(t) => t.form.min_run,
            HistoricalRule::BothTeamsPoorForm(t) => t.min_run,
        }
    }
}

/// Pásmo tabulky: tým s pořadím <= max_rank potřebuje sérii délky `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankBand {
    pub max_rank: u32,
    pub window:   usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakThresholds {
    /// Seřazeno podle max_rank vzestupně; vyhrává nejužší pásmo
    pub bands: Vec<RankBand>,
}

impl StreakThresholds {
    pub fn window_for(&self, rank: u32) -> Option<usize> {
        self.bands.iter().find(|b| rank <= b.max_rank).map(|b| b.window)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoorFormThresholds {
    pub window:       usize,
    /// Signál, pokud win rate v okně < max_win_rate
    pub max_win_rate: f64,
}

/// Špatná forma = aspoň `min_run` proher v řadě NEBO `min_run` zápasů bez gólu v řadě
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchupFormThresholds {
    pub min_run: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrongVsWeakThresholds {
    /// Soupeř musí být v tabulce aspoň o tolik míst níž
    pub min_rank_gap: u32,
    pub form:         MatchupFormThresholds,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveRule {
    RedCardDraw(RedCardThresholds),
    LateDraw(LateDrawThresholds),
}

impl LiveRule {
    pub fn id(&self) -> RuleId {
        match self {
            LiveRule::RedCardDraw(_) => RuleId::RedCardDraw,
            LiveRule::LateDraw(_)    => RuleId::LateDraw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedCardWinCondition {
    /// Tým bez červené dá gól po triggeru
    NonCardedSideScores,
    /// Jakýkoli gól po triggeru
    AnyGoal,
    NonCardedSideWins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedCardThresholds {
    pub min_minute:    u8,
    pub win_condition: RedCardWinCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LateDrawThresholds {
    pub min_minute: u8,
    /// Zapnuto: jen zápas "top N vs zbytek", sázka na výhru týmu z top N.
    /// Vypnuto: sázka na gól po triggeru pro jakýkoli zápas.
    #[serde(default)]
    pub top_rank_gate: Option<u32>,
}

// ── Scoring tabulky ───────────────────────────────────────────────────────────

/// Hranice bucketů pro rozdíl pořadí (soupeř − tým)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDiffBands {
    pub much_stronger_max: i32,
    pub stronger_max:      i32,
    pub similar_max:       i32,
    pub weaker_max:        i32,
}

impl Default for RankDiffBands {
    fn default() -> Self {
        Self {
            much_stronger_max: -5,
            stronger_max:      -2,
            similar_max:       2,
            weaker_max:        5,
        }
    }
}

impl RankDiffBands {
    pub fn classify(&self, diff: i32) -> OpponentBucket {
        if diff <= self.much_stronger_max {
            OpponentBucket::MuchStronger
        } else if diff <= self.stronger_max {
            OpponentBucket::Stronger
        } else if diff <= self.similar_max {
            OpponentBucket::Similar
        } else if diff <= self.weaker_max {
            OpponentBucket::Weaker
        } else {
            OpponentBucket::MuchWeaker
        }
    }

    /// Bez obou pořadí bucket neexistuje
    pub fn between(&self, team_rank: Option<u32>, opponent_rank: Option<u32>) -> Option<OpponentBucket> {
        let team = i64::from(team_rank?);
        let opponent = i64::from(opponent_rank?);
        let diff = (opponent - team).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        Some(self.classify(diff))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpponentMultipliers {
    pub much_weaker:   f64,
    pub weaker:        f64,
    pub similar:       f64,
    pub stronger:      f64,
    pub much_stronger: f64,
}

impl OpponentMultipliers {
    pub fn neutral() -> Self {
        Self { much_weaker: 1.0, weaker: 1.0, similar: 1.0, stronger: 1.0, much_stronger: 1.0 }
    }

    pub fn factor(&self, bucket: OpponentBucket) -> f64 {
        match bucket {
            OpponentBucket::MuchWeaker   => self.much_weaker,
            OpponentBucket::Weaker       => self.weaker,
            OpponentBucket::Similar      => self.similar,
            OpponentBucket::Stronger     => self.stronger,
            OpponentBucket::MuchStronger => self.much_stronger,
        }
    }

    fn values(&self) -> [f64; 5] {
        [self.much_weaker, self.weaker, self.similar, self.stronger, self.much_stronger]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BottomBandPolicy {
    Penalty { factor: f64 },
    Exclude,
}

/// Spodních `size` míst tabulky (potřebuje velikost ligy)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BottomBand {
    pub size:   u32,
    pub policy: BottomBandPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleScoring {
    pub base:        f64,
    pub opponent:    OpponentMultipliers,
    /// Přesná délka série → multiplikátor. Chybějící délka = 1.0.
    /// Záměrně bez monotonie, "sweet spot" může být uprostřed.
    #[serde(default)]
    pub streak:      BTreeMap<u32, f64>,
    #[serde(default)]
    pub bottom_band: Option<BottomBand>,
}

impl Default for RuleScoring {
    fn default() -> Self {
        Self {
            base:        0.5,
            opponent:    OpponentMultipliers::neutral(),
            streak:      BTreeMap::new(),
            bottom_band: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringTable {
    #[serde(default)]
    pub bands: RankDiffBands,
    pub rules: BTreeMap<RuleId, RuleScoring>,
}

impl ScoringTable {
    pub fn for_rule(&self, rule: RuleId) -> Option<&RuleScoring> {
        self.rules.get(&rule)
    }
}

// ── Defaulty (prahy z původního nastavení) ───────────────────────────────────

fn losing_table() -> OpponentMultipliers {
    OpponentMultipliers {
        much_weaker:   1.2,
        weaker:        1.1,
        similar:       1.0,
        stronger:      0.9,
        much_stronger: 0.7,
    }
}

impl Default for ScoringTable {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            RuleId::LosingStreak,
            RuleScoring {
                base:        0.5,
                opponent:    losing_table(),
                streak:      BTreeMap::from([(4, 1.15)]),
                bottom_band: Some(BottomBand { size: 3, policy: BottomBandPolicy::Exclude }),
            },
        );
        rules.insert(
            RuleId::DrawingStreak,
            RuleScoring { base: 0.5, opponent: losing_table(), ..RuleScoring::default() },
        );
        rules.insert(
            RuleId::NoGoalsStreak,
            RuleScoring {
                base:     0.5,
                opponent: OpponentMultipliers {
                    much_weaker:   1.15,
                    weaker:        1.05,
                    similar:       1.0,
                    stronger:      0.9,
                    much_stronger: 0.75,
                },
                ..RuleScoring::default()
            },
        );
        rules.insert(
            RuleId::PoorForm,
            RuleScoring {
                base:        0.35,
                opponent:    losing_table(),
                bottom_band: Some(BottomBand {
                    size:   3,
                    policy: BottomBandPolicy::Penalty { factor: 0.8 },
                }),
                ..RuleScoring::default()
            },
        );
        rules.insert(
            RuleId::RedCardDraw,
            RuleScoring {
                base:     0.5,
                opponent: OpponentMultipliers {
                    much_weaker:   1.2,
                    weaker:        1.1,
                    similar:       1.0,
                    stronger:      0.95,
                    much_stronger: 0.85,
                },
                ..RuleScoring::default()
            },
        );
        rules.insert(
            RuleId::StrongVsWeakPoorForm,
            RuleScoring {
                base:     0.75,
                opponent: OpponentMultipliers {
                    much_weaker:   1.1,
                    weaker:        1.0,
                    similar:       1.0,
                    stronger:      1.0,
                    much_stronger: 1.0,
                },
                ..RuleScoring::default()
            },
        );
        rules.insert(RuleId::BothTeamsPoorForm, RuleScoring { base: 0.7, ..RuleScoring::default() });
        rules.insert(RuleId::LateDraw, RuleScoring::default());

        Self { bands: RankDiffBands::default(), rules }
    }
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            version:       "2024.1-default".to_string(),
            history_limit: 10,
            historical: vec![
                HistoricalRule::LosingStreak(StreakThresholds {
                    bands: vec![
                        RankBand { max_rank: 5, window: 2 },
                        RankBand { max_rank: 10, window: 3 },
                    ],
                }),
                HistoricalRule::DrawingStreak(StreakThresholds {
                    bands: vec![RankBand { max_rank: 8, window: 3 }],
                }),
                HistoricalRule::NoGoalsStreak(StreakThresholds {
                    bands: vec![RankBand { max_rank: 8, window: 2 }],
                }),
                HistoricalRule::PoorForm(PoorFormThresholds { window: 6, max_win_rate: 0.2 }),
            ],
            live: vec![
                LiveRule::RedCardDraw(RedCardThresholds {
                    min_minute:    45,
                    win_condition: RedCardWinCondition::NonCardedSideScores,
                }),
                LiveRule::LateDraw(LateDrawThresholds { min_minute: 70, top_rank_gate: None }),
            ],
            scoring: ScoringTable::default(),
        }
    }
}

impl RuleConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, SignalError> {
        let cfg: RuleConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SignalError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Historie musí pokrýt nejdelší okno ze všech pravidel
    pub fn effective_history_limit(&self) -> usize {
        self.historical
            .iter()
            .map(HistoricalRule::max_window)
            .max()
            .unwrap_or(0)
            .max(self.history_limit)
    }

    pub fn validate(&self) -> Result<(), SignalError> {
        if self.version.trim().is_empty() {
            return Err(SignalError::Config("version must not be empty".to_string()));
        }

        for rule in &self.historical {
            match rule {
                HistoricalRule::LosingStreak(t)
                | HistoricalRule::DrawingStreak(t)
                | HistoricalRule::NoGoalsStreak(t) => {
                    if t.bands.is_empty() {
                        return Err(SignalError::Config(format!("{}: no rank bands", rule.id())));
                    }
                    if t.bands.iter().any(|b| b.window == 0) {
                        return Err(SignalError::Config(format!("{}: window must be >= 1", rule.id())));
                    }
                    if t.bands.windows(2).any(|w| w[0].max_rank >= w[1].max_rank) {
                        return Err(SignalError::Config(format!(
                            "{}: bands must be sorted by max_rank",
                            rule.id()
                        )));
                    }
                }
                HistoricalRule::PoorForm(t) => {
                    if t.window == 0 {
                        return Err(SignalError::Config("poor_form: window must be >= 1".to_string()));
                    }
                    if !(0.0..=1.0).contains(&t.max_win_rate) {
                        return Err(SignalError::Config(format!(
                            "poor_form: max_win_rate {} outside [0,1]",
                            t.max_win_rate
                        )));
                    }
                }
                HistoricalRule::StrongVsWeakPoorForm(StrongVsWeakThresholds { form, .. })
                | HistoricalRule::BothTeamsPoorForm(form) => {
                    if form.min_run == 0 {
                        return Err(SignalError::Config(format!("{}: min_run must be >= 1", rule.id())));
                    }
                }
            }
        }

        for rule in &self.live {
            if let LiveRule::LateDraw(LateDrawThresholds { top_rank_gate: Some(0), .. }) = rule {
                return Err(SignalError::Config("late_draw: top_rank_gate must be >= 1".to_string()));
            }
        }

        let b = &self.scoring.bands;
        if !(b.much_stronger_max < b.stronger_max
            && b.stronger_max < b.similar_max
            && b.similar_max < b.weaker_max)
        {
            return Err(SignalError::Config("rank diff bands must be increasing".to_string()));
        }

        for (rule, s) in &self.scoring.rules {
            let negative = s.base < 0.0
                || s.opponent.values().iter().any(|v| *v < 0.0 || v.is_nan())
                || s.streak.values().any(|v| *v < 0.0 || v.is_nan());
            if negative || s.base.is_nan() {
                return Err(SignalError::Config(format!("{rule}: multipliers must be >= 0")));
            }
            if let Some(BottomBand { policy: BottomBandPolicy::Penalty { factor }, .. }) = s.bottom_band {
                if factor < 0.0 || factor.is_nan() {
                    return Err(SignalError::Config(format!("{rule}: bottom penalty must be >= 0")));
                }
            }
        }

        Ok(())
    }
}
