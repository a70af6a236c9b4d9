use anyhow::{Context, Result};
use opportunity_ledger::{breakdown, RuleBreakdown, WinRateStats};
use signal_model::{Opportunity, RuleId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let rule_filter: Option<RuleId> = match std::env::args().nth(1) {
        Some(raw) => Some(raw.parse().map_err(anyhow::Error::msg)?),
        None => None,
    };

    let mut files: Vec<PathBuf> = std::fs::read_dir(&log_dir)
        .with_context(|| format!("read log dir {log_dir}"))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect();
    files.sort();

    // Poslední záznam na klíč vyhrává (restart může zalogovat totéž znovu)
    let mut resolved: BTreeMap<String, Opportunity> = BTreeMap::new();
    let mut skipped = 0usize;
    for path in &files {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                skipped += 1;
                continue;
            };
            if value["event"] != "OPPORTUNITY_RESOLVED" {
                continue;
            }
            match serde_json::from_value::<Opportunity>(value["opportunity"].clone()) {
                Ok(o) => {
                    resolved.insert(o.key().to_string(), o);
                }
                Err(_) => skipped += 1,
            }
        }
    }

    println!("log_dir={log_dir} files={} resolved={} skipped_lines={skipped}", files.len(), resolved.len());

    let rules: BTreeSet<RuleId> = match rule_filter {
        Some(r) => BTreeSet::from([r]),
        None => resolved.values().map(|o| o.rule_id).collect(),
    };

    for rule in rules {
        print_breakdown(&breakdown(Some(rule), resolved.values()));
    }

    Ok(())
}

fn print_breakdown(b: &RuleBreakdown) {
    let name = b.rule_id.map_or("all", |r| r.as_str());
    println!();
    println!("== {name} ==");
    println!("  {}", line("overall", &b.overall));
    for (title, groups) in [
        ("side", &b.by_side),
        ("opponent", &b.by_opponent),
        ("rank range", &b.by_rank_range),
        ("confidence", &b.by_confidence_band),
    ] {
        println!("  by {title}:");
        for (k, s) in groups {
            println!("    {}", line(k, s));
        }
    }
}

fn line(label: &str, s: &WinRateStats) -> String {
    match s.win_rate {
        Some(rate) => format!(
            "{label:<24} n={:<4} wins={:<4} win_rate={:>5.1}% avg_conf={:.2}",
            s.total,
            s.wins,
            rate * 100.0,
            s.avg_confidence.unwrap_or_default()
        ),
        None => format!("{label:<24} n=0"),
    }
}
