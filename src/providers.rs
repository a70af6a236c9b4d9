//! Externí zdroje dat. Engine je jen konzumuje; chyba providera se loguje
//! a pro danou entitu znamená "žádné příležitosti", nikdy pád celého běhu.

use anyhow::Result;
use chrono::{DateTime, Utc};
use signal_model::{FinalResult, Match, Snapshot};
use std::sync::Arc;

pub trait MatchHistoryProvider: Send + Sync {
    /// Dohrané zápasy týmu, nejnovější první
    fn finished_matches(&self, team_id: &str, limit: usize) -> Result<Vec<Match>>;
}

pub trait StandingsProvider: Send + Sync {
    /// None = pořadí neznáme
    fn rank(&self, team_id: &str) -> Result<Option<u32>>;

    fn league_size(&self, _team_id: &str) -> Result<Option<u32>> {
        Ok(None)
    }
}

pub trait FixtureProvider: Send + Sync {
    /// Nejbližší naplánovaný zápas týmu od `after`
    fn next_fixture(&self, team_id: &str, after: DateTime<Utc>) -> Result<Option<Match>>;

    fn fixture(&self, match_id: &str) -> Result<Option<Match>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivePoll {
    Snapshot(Snapshot),
    NoChange,
    Finished(FinalResult),
}

pub trait LiveSnapshotProvider: Send + Sync {
    fn poll(&self, match_id: &str) -> Result<LivePoll>;
}

#[derive(Clone)]
pub struct Providers {
    pub history:   Arc<dyn MatchHistoryProvider>,
    pub standings: Arc<dyn StandingsProvider>,
    pub fixtures:  Arc<dyn FixtureProvider>,
    pub live:      Arc<dyn LiveSnapshotProvider>,
}

impl Providers {
    /// Jeden zdroj pro všechno (replay feed, testy)
    pub fn from_single<P>(source: Arc<P>) -> Self
    where
        P: MatchHistoryProvider + StandingsProvider + FixtureProvider + LiveSnapshotProvider + 'static,
    {
        Self {
            history:   source.clone(),
            standings: source.clone(),
            fixtures:  source.clone(),
            live:      source,
        }
    }
}
