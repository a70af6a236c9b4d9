//! Chybová taxonomie enginu.
//!
//! DuplicateSuppressed není chyba (viz `SubmitOutcome` v ledgeru) a konflikt
//! na stejném klíči ledger řeší serializací, takže se ven nikdy nedostane.

use thiserror::Error;

use crate::types::MatchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotAnomaly {
    MinuteRegressed { last: u8, got: u8 },
    GoalsRegressed,
    RedCardsRegressed,
}

impl std::fmt::Display for SnapshotAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotAnomaly::MinuteRegressed { last, got } => {
                write!(f, "minute went back from {last} to {got}")
            }
            SnapshotAnomaly::GoalsRegressed => f.write_str("goal count decreased"),
            SnapshotAnomaly::RedCardsRegressed => f.write_str("red card count decreased"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("data gap for {entity}: {reason}")]
    DataGap { entity: String, reason: String },

    #[error("snapshot rejected for match {match_id}: {anomaly}")]
    SnapshotOrderingAnomaly { match_id: MatchId, anomaly: SnapshotAnomaly },

    #[error("match {0} already finished")]
    MatchFinished(MatchId),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignalError {
    pub fn data_gap(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        SignalError::DataGap { entity: entity.into(), reason: reason.into() }
    }
}
