//! Nastavení z env (.env přes dotenv v binárkách).

use signal_model::{RuleConfig, SignalError};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_dir:             PathBuf,
    pub rules_config_path:   Option<PathBuf>,
    pub replay_feed_path:    PathBuf,
    pub poll_interval_ms:    u64,
    pub eval_parallelism:    usize,
    pub prune_resolved_days: i64,
    /// Jak dlouho si ledger pamatuje zavřené zápasy (odmítá pro ně kandidáty)
    pub closed_retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_dir:             PathBuf::from("logs"),
            rules_config_path:   None,
            replay_feed_path:    PathBuf::from("data/replay.json"),
            poll_interval_ms:    500,
            eval_parallelism:    4,
            prune_resolved_days: 7,
            closed_retention_days: 90,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Neplatná hodnota = default, stejně jako chybějící
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Settings::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            log_dir: non_empty("LOG_DIR").map(PathBuf::from).unwrap_or(d.log_dir),
            rules_config_path: non_empty("RULES_CONFIG_PATH").map(PathBuf::from),
            replay_feed_path: non_empty("REPLAY_FEED_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.replay_feed_path),
            poll_interval_ms: non_empty("POLL_INTERVAL_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(d.poll_interval_ms),
            eval_parallelism: non_empty("EVAL_PARALLELISM")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(d.eval_parallelism),
            prune_resolved_days: non_empty("PRUNE_RESOLVED_DAYS")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v >= 0)
                .unwrap_or(d.prune_resolved_days),
            closed_retention_days: non_empty("CLOSED_RETENTION_DAYS")
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v >= 0)
                .unwrap_or(d.closed_retention_days),
        }
    }

    /// Bez RULES_CONFIG_PATH se použije vestavěná konfigurace
    pub fn load_rule_config(&self) -> Result<RuleConfig, SignalError> {
        match &self.rules_config_path {
            Some(path) => {
                let cfg = RuleConfig::load(path)?;
                info!("Rule config {} loaded from {}", cfg.version, path.display());
                Ok(cfg)
            }
            None => {
                let cfg = RuleConfig::default();
                info!("Using built-in rule config {}", cfg.version);
                Ok(cfg)
            }
        }
    }
}
