/// Runtime configuration for the whale feed pipeline
///
/// Defaults match the live dashboard. Every value can be overridden with the
/// builder methods or through `WHALE_*` environment variables.

use std::time::Duration;

use url::Url;

use crate::shared::error::FeedError;

/// Default backend base URL (env: WHALE_API_URL)
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8001";

const STREAM_PATH: &str = "/api/whales/stream";
const SAVE_PATH: &str = "/api/whales/save";

/// Whale feed configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Backend base URL, e.g. `http://127.0.0.1:8001`
    pub base_url: String,
    /// Fixed delay before reopening a closed stream
    pub reconnect_delay: Duration,
    /// Delay between staggered insertions into the visible list
    pub stagger_interval: Duration,
    /// Items admitted per drain cycle
    pub max_per_drain: usize,
    /// Visible list cap
    pub max_visible: usize,
    /// Hover buffer cap
    pub max_pending: usize,
    /// SeenTradeSet size that triggers a full clear
    pub seen_ceiling: usize,
    /// Lifetime of the "just arrived" indicator
    pub just_arrived_for: Duration,
    /// Lifetime of the NEW age badge, measured from first sighting
    pub new_badge_for: Duration,
    /// Lifetime of a save toast
    pub toast_for: Duration,
    /// Hold time that turns a click into a long-press save
    pub long_press: Duration,
    /// Periodic market-phase recheck
    pub phase_check_interval: Duration,
    /// Periodic cleanup sweep (toast expiry, identity memory pruning)
    pub cleanup_interval: Duration,
    /// Treat AFTER_HOURS as an idle phase like PRE_MARKET and WEEKEND
    pub after_hours_idle: bool,
    /// Pipeline command channel capacity
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
            stagger_interval: Duration::from_millis(200),
            max_per_drain: 10,
            max_visible: 50,
            max_pending: 50,
            seen_ceiling: 50_000,
            just_arrived_for: Duration::from_secs(3),
            new_badge_for: Duration::from_secs(10 * 60),
            toast_for: Duration::from_secs(4),
            long_press: Duration::from_millis(600),
            phase_check_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
            after_hours_idle: true,
            channel_buffer_size: 256,
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with custom base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from `WHALE_*` environment variables.
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("WHALE_API_URL").unwrap_or(defaults.base_url),
            reconnect_delay: env_parse("WHALE_RECONNECT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconnect_delay),
            stagger_interval: env_parse("WHALE_STAGGER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.stagger_interval),
            max_visible: env_parse("WHALE_MAX_VISIBLE").unwrap_or(defaults.max_visible),
            seen_ceiling: env_parse("WHALE_SEEN_CEILING").unwrap_or(defaults.seen_ceiling),
            after_hours_idle: env_parse("WHALE_AFTER_HOURS_IDLE")
                .unwrap_or(defaults.after_hours_idle),
            ..defaults
        }
    }

    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set stagger interval
    pub fn with_stagger_interval(mut self, interval: Duration) -> Self {
        self.stagger_interval = interval;
        self
    }

    /// Set visible list cap
    pub fn with_max_visible(mut self, max: usize) -> Self {
        self.max_visible = max;
        self
    }

    /// Set SeenTradeSet ceiling
    pub fn with_seen_ceiling(mut self, ceiling: usize) -> Self {
        self.seen_ceiling = ceiling;
        self
    }

    /// Set whether AFTER_HOURS idles the feed
    pub fn with_after_hours_idle(mut self, idle: bool) -> Self {
        self.after_hours_idle = idle;
        self
    }

    /// SSE endpoint URL
    pub fn stream_url(&self) -> Result<Url, FeedError> {
        self.endpoint(STREAM_PATH)
    }

    /// Save-to-watchlist endpoint URL
    pub fn save_url(&self) -> Result<Url, FeedError> {
        self.endpoint(SAVE_PATH)
    }

    fn endpoint(&self, path: &str) -> Result<Url, FeedError> {
        let base = Url::parse(self.base_url.trim_end_matches('/'))?;
        Ok(base.join(path)?)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
