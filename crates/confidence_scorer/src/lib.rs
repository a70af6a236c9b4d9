/// StreakSignals — Confidence Scorer
///
/// confidence = clamp(base(rule) × soupeř × délka série × spodek tabulky, 0, 1)
/// Čistá funkce nad injektovanou tabulkou, žádný globální stav.

use serde::Serialize;
use signal_model::{
    clamp_confidence, BottomBand, BottomBandPolicy, OpponentBucket, RuleId, RuleScoring,
    ScoringTable, SignalFeatures,
};

/// Rozpad výpočtu pro log (base + každý faktor)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Breakdown {
    pub base:        f64,
    pub opponent:    f64,
    pub streak:      f64,
    pub bottom_band: f64,
    pub raw:         f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scored {
    pub confidence: f64,
    pub bucket:     Option<OpponentBucket>,
    pub breakdown:  Breakdown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scoring {
    Scored(Scored),
    /// Tým ve spodním pásmu s politikou Exclude → kandidát se zahodí
    Excluded { team_rank: u32, league_size: u32 },
}

impl Scoring {
    pub fn scored(self) -> Option<Scored> {
        match self {
            Scoring::Scored(s) => Some(s),
            Scoring::Excluded { .. } => None,
        }
    }
}

pub fn score(table: &ScoringTable, rule: RuleId, features: &SignalFeatures) -> Scoring {
    let fallback;
    let scoring = match table.for_rule(rule) {
        Some(s) => s,
        None => {
            fallback = RuleScoring::default();
            &fallback
        }
    };

    let bottom_band = match bottom_band_factor(scoring.bottom_band, features) {
        BottomFactor::Factor(f) => f,
        BottomFactor::Excluded { team_rank, league_size } => {
            return Scoring::Excluded { team_rank, league_size }
        }
    };

    let bucket = table.bands.between(features.team_rank, features.opponent_rank);
    let opponent = bucket.map_or(1.0, |b| scoring.opponent.factor(b));

    // Přesná délka → multiplikátor; žádné "delší = lepší"
    let streak = features
        .streak_len
        .and_then(|len| scoring.streak.get(&len).copied())
        .unwrap_or(1.0);

    let raw = scoring.base * opponent * streak * bottom_band;

    Scoring::Scored(Scored {
        confidence: clamp_confidence(raw),
        bucket,
        breakdown: Breakdown { base: scoring.base, opponent, streak, bottom_band, raw },
    })
}

enum BottomFactor {
    Factor(f64),
    Excluded { team_rank: u32, league_size: u32 },
}

/// Bez velikosti ligy nebo pořadí se spodek tabulky neřeší
fn bottom_band_factor(band: Option<BottomBand>, features: &SignalFeatures) -> BottomFactor {
    let (Some(band), Some(rank), Some(size)) = (band, features.team_rank, features.league_size) else {
        return BottomFactor::Factor(1.0);
    };
    if rank.saturating_add(band.size) <= size {
        return BottomFactor::Factor(1.0);
    }
    match band.policy {
        BottomBandPolicy::Penalty { factor } => BottomFactor::Factor(factor),
        BottomBandPolicy::Exclude => BottomFactor::Excluded { team_rank: rank, league_size: size },
    }
}
