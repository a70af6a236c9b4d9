//! Replay feed — in-memory provider nad JSON souborem.
//! Tabulka, historie, fixtures a pro každý live zápas fronta snímků,
//! které `poll` vydává postupně (co poll, to jeden rámec).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signal_model::{FinalResult, Match, MatchId, MatchStatus, Snapshot, Team, TeamId};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::providers::{
    FixtureProvider, LivePoll, LiveSnapshotProvider, MatchHistoryProvider, StandingsProvider,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayFrame {
    Snapshot(Snapshot),
    NoChange,
    Finished(FinalResult),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayData {
    /// Čas, ke kterému se replay vyhodnocuje
    pub now:          DateTime<Utc>,
    pub teams:        Vec<Team>,
    #[serde(default)]
    pub league_sizes: BTreeMap<String, u32>,
    pub matches:      Vec<Match>,
    #[serde(default)]
    pub live:         BTreeMap<MatchId, Vec<ReplayFrame>>,
}

pub struct ReplayFeed {
    now:     DateTime<Utc>,
    teams:   HashMap<TeamId, Team>,
    leagues: BTreeMap<String, u32>,
    matches: Vec<Match>,
    frames:  Mutex<BTreeMap<MatchId, VecDeque<ReplayFrame>>>,
}

impl ReplayFeed {
    pub fn new(data: ReplayData) -> Self {
        let frames = data
            .live
            .into_iter()
            .map(|(id, f)| (id, f.into_iter().collect::<VecDeque<_>>()))
            .collect();
        Self {
            now:     data.now,
            teams:   data.teams.into_iter().map(|t| (t.id.clone(), t)).collect(),
            leagues: data.league_sizes,
            matches: data.matches,
            frames:  Mutex::new(frames),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let data: ReplayData = serde_json::from_str(raw).context("parse replay feed")?;
        Ok(Self::new(data))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read replay feed {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn team_ids(&self) -> Vec<TeamId> {
        let mut ids: Vec<TeamId> = self.teams.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Zápasy, které ještě mají co přehrát
    pub fn pending_live_matches(&self) -> Vec<MatchId> {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        frames
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_drained(&self) -> bool {
        self.pending_live_matches().is_empty()
    }
}

impl MatchHistoryProvider for ReplayFeed {
    fn finished_matches(&self, team_id: &str, limit: usize) -> Result<Vec<Match>> {
        let mut played: Vec<Match> = self
            .matches
            .iter()
            .filter(|m| m.status == MatchStatus::Finished && m.venue_of(team_id).is_some())
            .cloned()
            .collect();
        played.sort_by(|a, b| b.date.cmp(&a.date));
        played.truncate(limit);
        Ok(played)
    }
}

impl StandingsProvider for ReplayFeed {
    fn rank(&self, team_id: &str) -> Result<Option<u32>> {
        Ok(self.teams.get(team_id).and_then(|t| t.rank))
    }

    fn league_size(&self, team_id: &str) -> Result<Option<u32>> {
        Ok(self
            .teams
            .get(team_id)
            .and_then(|t| self.leagues.get(&t.league))
            .copied())
    }
}

impl FixtureProvider for ReplayFeed {
    fn next_fixture(&self, team_id: &str, after: DateTime<Utc>) -> Result<Option<Match>> {
        Ok(self
            .matches
            .iter()
            .filter(|m| m.status == MatchStatus::Scheduled && m.date >= after)
            .filter(|m| m.venue_of(team_id).is_some())
            .min_by_key(|m| m.date)
            .cloned())
    }

    fn fixture(&self, match_id: &str) -> Result<Option<Match>> {
        Ok(self.matches.iter().find(|m| m.id == match_id).cloned())
    }
}

impl LiveSnapshotProvider for ReplayFeed {
    fn poll(&self, match_id: &str) -> Result<LivePoll> {
        let mut frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let next = frames.get_mut(match_id).and_then(VecDeque::pop_front);
        Ok(match next {
            Some(ReplayFrame::Snapshot(s)) => LivePoll::Snapshot(s),
            Some(ReplayFrame::Finished(r)) => LivePoll::Finished(r),
            Some(ReplayFrame::NoChange) | None => LivePoll::NoChange,
        })
    }
}
