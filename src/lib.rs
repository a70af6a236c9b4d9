/// StreakSignals — rules engine pro sázkové signály
///
/// Historické série (prohry, remízy, bez gólu, slabá forma) → signál na další zápas.
/// Live snímky (červená karta, pozdní remíza) → signál během zápasu.
/// Každý signál dostane confidence a jde do ledgeru, který drží max. jednu
/// otevřenou příležitost na (zápas, pravidlo, strana) a po zápase ji vyhodnotí.

pub mod engine;
pub mod feed;
pub mod providers;
pub mod settings;

pub use engine::{Clock, PollReport, RulesEngine};
pub use feed::{ReplayData, ReplayFeed, ReplayFrame};
pub use providers::{
    FixtureProvider, LivePoll, LiveSnapshotProvider, MatchHistoryProvider, Providers,
    StandingsProvider,
};
pub use settings::Settings;
