/// Whale Tape - Shared Library
///
/// Live options whale-trade flow for the terminal:
/// - SSE client for the `/api/whales/stream` feed
/// - Market-phase gate (America/New_York session clock)
/// - De-duplicating normalizer with bounded memory
/// - Hover-pausable, staggered tape with a capped visible list
/// - Save-to-watchlist client
pub mod shared;

// Re-export commonly used types for convenience
pub use shared::types::{
    Direction, Moneyness, NormalizedTrade, OptionClass, Premium, RawTradeEvent, Side,
    TradeIdentity, TradeTag, WhaleBatch, WhaleEnvelope,
};

pub use shared::config::FeedConfig;
pub use shared::error::FeedError;
pub use shared::stream::spawn_whale_stream;
pub use shared::watchlist::{SaveReceipt, WatchlistClient};

pub use shared::dedup::TradeDeduplicator;
pub use shared::session::{Clock, ManualClock, MarketPhase, MarketPhaseGate, SystemClock};
pub use shared::tape::{Placeholder, VisibleTrade, WhaleTape};

// Pipeline actor (owns all tape state)
pub use shared::pipeline::{
    FeedHealth, PipelineCommand, PipelineHandle, TapeSnapshot, Toast, ToastKind, WhalePipeline,
};
