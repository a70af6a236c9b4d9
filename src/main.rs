/// StreakSignals — Signal Observer
///
/// Co dělá:
///   1. Načte replay feed (tabulka, historie, fixtures, live snímky)
///   2. Paralelně vyhodnotí historická pravidla pro všechny týmy
///   3. Polluje live zápasy, dokud feed nevyprázdní (červené karty, pozdní remízy)
///   4. Dohrané zápasy vyhodnotí v ledgeru, staré záznamy pročistí
///
/// Co NEDĚLÁ: žádné sázky, jen signály do logu (observe only)
///
/// Spuštění:
///   cargo run --bin signal-observer

use anyhow::{Context, Result};
use dotenv::dotenv;
use logger::{now_iso, EventLogger, SystemHeartbeatEvent};
use signal_model::RuleId;
use std::collections::BTreeSet;
use std::env;
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use streak_signals::{PollReport, Providers, ReplayFeed, RulesEngine, Settings};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!("=== StreakSignals Observer ===");
    info!("Mode: OBSERVE ONLY (signals → ledger → JSONL)");

    // Single instance lock
    let lock_file_path = env::temp_dir().join("streak_signals_observer.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another instance of signal-observer is already running! Exiting.");
            return Ok(());
        }
    };

    let settings = Settings::from_env();
    info!("Logs: {}", settings.log_dir.display());
    info!("Poll interval: {}ms", settings.poll_interval_ms);

    let config = settings.load_rule_config().context("load rule config")?;
    let feed = Arc::new(
        ReplayFeed::load(&settings.replay_feed_path)
            .with_context(|| format!("load replay {}", settings.replay_feed_path.display()))?,
    );

    // Replay běží od času feedu, hodiny jen přičítají uplynulý čas
    let replay_start = feed.now();
    let started = Instant::now();
    let engine = Arc::new(
        RulesEngine::new(config, Providers::from_single(feed.clone()))
            .with_event_log(&settings.log_dir)
            .with_clock(move || {
                replay_start
                    + chrono::Duration::from_std(started.elapsed())
                        .unwrap_or_else(|_| chrono::Duration::zero())
            }),
    );
    let heartbeat_log = EventLogger::new(&settings.log_dir);

    // ── 1. Historická pravidla (paralelně přes týmy) ─────────────────────────
    let teams = feed.team_ids();
    info!("Evaluating {} teams (parallelism {})", teams.len(), settings.eval_parallelism);

    let permits = Arc::new(Semaphore::new(settings.eval_parallelism));
    let mut set = JoinSet::new();
    for team in teams {
        let engine = engine.clone();
        let permits = permits.clone();
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            tokio::task::spawn_blocking(move || engine.evaluate_historical(&team)).await
        });
    }

    let mut historical = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(accepted)) => historical += accepted.len(),
            Ok(Err(e)) | Err(e) => warn!("historical evaluation task failed: {}", e),
        }
    }
    info!("Historical signals accepted: {}", historical);

    // ── 2. Live polling, dokud feed nevyprázdní ──────────────────────────────
    let mut ticker = interval(Duration::from_millis(settings.poll_interval_ms));
    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C, stopping live loop.");
                break;
            }
        }

        let pending = feed.pending_live_matches();
        if pending.is_empty() {
            info!("Replay feed drained.");
            break;
        }
        cycle += 1;

        let mut polls = JoinSet::new();
        for match_id in pending {
            let engine = engine.clone();
            polls.spawn_blocking(move || {
                let report = engine.poll_live(&match_id);
                (match_id, report)
            });
        }

        while let Some(joined) = polls.join_next().await {
            match joined {
                Ok((match_id, Ok(PollReport::Ingested(accepted)))) if !accepted.is_empty() => {
                    info!("{}: {} live signal(s) accepted", match_id, accepted.len());
                }
                Ok((match_id, Ok(PollReport::Resolved(resolved)))) => {
                    info!("{}: finished, {} opportunity(ies) resolved", match_id, resolved.len());
                }
                Ok((match_id, Err(e))) => warn!("{}: live poll failed: {:#}", match_id, e),
                Ok(_) => {}
                Err(e) => warn!("live poll task failed: {}", e),
            }
        }

        let counts = engine.counts();
        let heartbeat = SystemHeartbeatEvent {
            ts:                 now_iso(),
            event:              "SYSTEM_HEARTBEAT",
            phase:              format!("LIVE_CYCLE_{cycle}"),
            poll_interval_ms:   settings.poll_interval_ms,
            open_opportunities: counts.open,
            live_matches:       engine.live_matches().len(),
            accepted_total:     counts.accepted_total,
            resolved_total:     counts.resolved,
        };
        if let Err(e) = heartbeat_log.log(&heartbeat) {
            warn!("heartbeat log failed: {}", e);
        }
    }

    // ── 3. Úklid + souhrn ────────────────────────────────────────────────────
    let cutoff = engine.now() - chrono::Duration::days(settings.prune_resolved_days);
    let pruned = engine.prune_resolved(cutoff);
    if pruned > 0 {
        info!("Pruned {} resolved opportunities older than {}", pruned, cutoff);
    }
    let closed_cutoff = engine.now() - chrono::Duration::days(settings.closed_retention_days);
    engine.prune_closed(closed_cutoff);

    let counts = engine.counts();
    info!(
        "Ledger: open={} resolved={} accepted={} suppressed={}",
        counts.open, counts.resolved, counts.accepted_total, counts.suppressed_total
    );

    let active: BTreeSet<RuleId> = engine
        .config()
        .historical
        .iter()
        .map(|r| r.id())
        .chain(engine.config().live.iter().map(|r| r.id()))
        .collect();
    for rule in active {
        let s = engine.stats(rule);
        match s.win_rate {
            Some(rate) => info!(
                "{:<24} resolved={:<4} win_rate={:.1}% avg_conf={:.2}",
                rule.as_str(),
                s.total,
                rate * 100.0,
                s.avg_confidence.unwrap_or_default()
            ),
            None => info!("{:<24} resolved=0", rule.as_str()),
        }
    }

    Ok(())
}
