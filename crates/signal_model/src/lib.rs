/// StreakSignals — datový model
/// Týmy, zápasy, snapshoty, příležitosti + RuleConfig a chybová taxonomie.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BottomBand, BottomBandPolicy, HistoricalRule, LateDrawThresholds, LiveRule,
    MatchupFormThresholds, OpponentMultipliers, PoorFormThresholds, RankBand, RankDiffBands,
    RedCardThresholds, RedCardWinCondition, RuleConfig, RuleScoring, ScoringTable,
    StreakThresholds, StrongVsWeakThresholds,
};
pub use error::{SignalError, SnapshotAnomaly};
pub use types::{
    clamp_confidence, Bet, FinalResult, GoalScorer, Match, MatchId, MatchStatus, Opportunity,
    OpportunityKey, OpportunityStatus, OpponentBucket, Outcome, RedCards, RuleId, Side, Signal,
    SignalFeatures, Snapshot, Team, TeamId, TeamResult, Venue,
};
