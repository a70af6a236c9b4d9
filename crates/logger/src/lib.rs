/// StreakSignals — Logger
/// JSONL event stream příležitostí (jeden JSON objekt na řádek, soubor na den)

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event typy ────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct OpportunityOpenedEvent {
    pub ts:             String,
    pub event:          &'static str,   // "OPPORTUNITY_OPENED"
    pub key:            String,         // "match/rule/side"
    pub rule_id:        String,
    pub confidence:     f64,
    pub config_version: String,
    pub opportunity:    serde_json::Value,
}

#[derive(Serialize, Debug)]
pub struct DuplicateSuppressedEvent {
    pub ts:                  String,
    pub event:               &'static str,   // "DUPLICATE_SUPPRESSED"
    pub key:                 String,
    pub dropped_confidence:  f64,
    pub open_confidence:     f64,
}

#[derive(Serialize, Debug)]
pub struct SnapshotRejectedEvent {
    pub ts:       String,
    pub event:    &'static str,   // "SNAPSHOT_REJECTED"
    pub match_id: String,
    pub reason:   String,
    pub snapshot: serde_json::Value,
}

/// `opportunity` = celý vyřešený záznam, ledger-stats z něj staví statistiky
#[derive(Serialize, Debug)]
pub struct OpportunityResolvedEvent {
    pub ts:          String,
    pub event:       &'static str,   // "OPPORTUNITY_RESOLVED"
    pub key:         String,
    pub outcome:     String,         // "win" | "lose"
    pub opportunity: serde_json::Value,
}

#[derive(Serialize, Debug)]
pub struct SystemHeartbeatEvent {
    pub ts:                String,
    pub event:             &'static str,   // "SYSTEM_HEARTBEAT"
    pub phase:             String,
    pub poll_interval_ms:  u64,
    pub open_opportunities: usize,
    pub live_matches:      usize,
    pub accepted_total:    usize,
    pub resolved_total:    usize,
}
