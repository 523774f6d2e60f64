/// Core data types for whale-trade events
///
/// These types match the JSON envelope pushed by the `/api/whales/stream`
/// SSE endpoint: `{ "data": [RawTradeEvent, ...] | null, "stale": bool }`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as DeError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::shared::error::FeedError;

/// Index products whose puts are read as portfolio hedges
pub const INDEX_TICKERS: [&str; 5] = ["SPY", "QQQ", "IWM", "DIA", "VIX"];

/// Volume / open-interest ratio above which a print is tagged FRESH
pub const FRESH_VOL_OI: f64 = 5.0;

/// Absolute delta below which an option is tagged LOTTO
pub const LOTTO_DELTA: f64 = 0.20;

/// Option class (call or put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OptionClass {
    #[serde(rename(serialize = "CALL", deserialize = "C"), alias = "CALL")]
    Call,
    #[serde(rename(serialize = "PUT", deserialize = "P"), alias = "PUT")]
    Put,
}

impl OptionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionClass::Call => "CALL",
            OptionClass::Put => "PUT",
        }
    }

    /// Single-letter suffix used next to the strike (`450P`)
    pub fn letter(&self) -> char {
        match self {
            OptionClass::Call => 'C',
            OptionClass::Put => 'P',
        }
    }

    /// Calls read bullish, puts bearish
    pub fn direction(&self) -> Direction {
        match self {
            OptionClass::Call => Direction::Bull,
            OptionClass::Put => Direction::Bear,
        }
    }
}

impl fmt::Display for OptionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directional read of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Bull,
    Bear,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bull => "BULL",
            Direction::Bear => "BEAR",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strike relative to the underlying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Moneyness {
    Itm,
    Otm,
    Atm,
}

impl Moneyness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Moneyness::Itm => "ITM",
            Moneyness::Otm => "OTM",
            Moneyness::Atm => "ATM",
        }
    }
}

/// Aggressor side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Premium as reported upstream
///
/// The feed sends either a number, a pre-formatted string such as `"$6.9M"`,
/// or the `"DELAYED"` sentinel. Missing, null and zero premiums are DELAYED.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Premium {
    Amount(f64),
    Quoted(String),
    #[default]
    Delayed,
}

impl Premium {
    fn from_value(value: Option<&serde_json::Value>) -> Self {
        match value {
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(Premium::Amount)
                .unwrap_or(Premium::Delayed),
            Some(serde_json::Value::String(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("DELAYED") {
                    Premium::Delayed
                } else {
                    Premium::Quoted(trimmed.to_string())
                }
            }
            _ => Premium::Delayed,
        }
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, Premium::Delayed)
    }
}

impl fmt::Display for Premium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Premium::Amount(usd) => write!(f, "{}", format_usd_compact(*usd)),
            Premium::Quoted(text) => write!(f, "{}", text),
            Premium::Delayed => write!(f, "DELAYED"),
        }
    }
}

impl<'de> Deserialize<'de> for Premium {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        Ok(Premium::from_value(value.as_ref()))
    }
}

impl Serialize for Premium {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Premium::Amount(usd) => serializer.serialize_f64(*usd),
            Premium::Quoted(text) => serializer.serialize_str(text),
            Premium::Delayed => serializer.serialize_str("DELAYED"),
        }
    }
}

/// Format a USD notional as `$850K`, `$2.5M`, `$1.1B`
pub fn format_usd_compact(usd: f64) -> String {
    let abs = usd.abs();
    if abs >= 1_000_000_000.0 {
        format!("${:.1}B", usd / 1_000_000_000.0)
    } else if abs >= 1_000_000.0 {
        format!("${:.1}M", usd / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("${:.0}K", usd / 1_000.0)
    } else {
        format!("${:.0}", usd)
    }
}

/// Single whale trade as pushed by the upstream feed
///
/// Required: a ticker (`baseSymbol` or `symbol`), `strikePrice`, `putCall`,
/// `expirationDate` and `volume`. Everything else is optional, and an
/// unparsable optional field is treated as absent rather than rejecting the
/// whole event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTradeEvent {
    #[serde(rename = "baseSymbol", default)]
    pub base_symbol: Option<String>,
    /// OCC symbol or plain ticker; only used when `baseSymbol` is absent
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(rename = "strikePrice")]
    pub strike_price: f64,
    #[serde(rename = "putCall")]
    pub put_call: OptionClass,
    #[serde(rename = "expirationDate")]
    pub expiration_date: String,
    #[serde(deserialize_with = "de_volume")]
    pub volume: u64,
    #[serde(default)]
    pub premium: Premium,
    #[serde(default, deserialize_with = "lenient")]
    pub vol_oi: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub moneyness: Option<Moneyness>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_mega_whale: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub notional_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub delta: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub iv: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub side: Option<Side>,
    #[serde(default, deserialize_with = "lenient")]
    pub bid: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub ask: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_sweep: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_lotto: Option<bool>,
    #[serde(rename = "lastPrice", default, deserialize_with = "lenient")]
    pub last_price: Option<f64>,
    #[serde(rename = "openInterest", default, deserialize_with = "lenient")]
    pub open_interest: Option<f64>,
    /// Upstream trade time (unix seconds)
    #[serde(default, deserialize_with = "lenient")]
    pub timestamp: Option<f64>,
}

impl RawTradeEvent {
    /// Minimal event with only the identity fields set
    pub fn new(
        ticker: impl Into<String>,
        strike_price: f64,
        put_call: OptionClass,
        expiration_date: impl Into<String>,
        volume: u64,
    ) -> Self {
        Self {
            base_symbol: Some(ticker.into()),
            symbol: None,
            strike_price,
            put_call,
            expiration_date: expiration_date.into(),
            volume,
            premium: Premium::Delayed,
            vol_oi: None,
            moneyness: None,
            is_mega_whale: None,
            notional_value: None,
            delta: None,
            iv: None,
            side: None,
            bid: None,
            ask: None,
            is_sweep: None,
            is_lotto: None,
            last_price: None,
            open_interest: None,
            timestamp: None,
        }
    }

    /// Decode and validate a single event from the envelope's `data` array
    pub fn from_value(value: serde_json::Value) -> Result<Self, FeedError> {
        let event: RawTradeEvent = serde_json::from_value(value)?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), FeedError> {
        if self.ticker().is_empty() {
            return Err(FeedError::InvalidEvent("baseSymbol"));
        }
        if !self.strike_price.is_finite() || self.strike_price <= 0.0 {
            return Err(FeedError::InvalidEvent("strikePrice"));
        }
        if self.expiration_date.trim().is_empty() {
            return Err(FeedError::InvalidEvent("expirationDate"));
        }
        Ok(())
    }

    /// `baseSymbol`, falling back to `symbol`
    pub fn ticker(&self) -> &str {
        self.base_symbol
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.symbol.as_deref())
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn vol_oi(&self) -> f64 {
        self.vol_oi.unwrap_or(0.0)
    }

    pub fn is_mega_whale(&self) -> bool {
        self.is_mega_whale.unwrap_or(false)
    }

    /// Upstream sweep flag, or a print at/above a live ask with volume over OI
    pub fn is_sweep(&self) -> bool {
        if self.is_sweep.unwrap_or(false) {
            return true;
        }
        let lifted_ask = matches!(
            (self.last_price, self.ask),
            (Some(price), Some(ask)) if ask > 0.0 && price >= ask
        );
        lifted_ask && self.vol_oi() > 1.0
    }

    /// Upstream lotto flag, or a far out-of-the-money delta
    pub fn is_lotto(&self) -> bool {
        self.is_lotto.unwrap_or_else(|| {
            self.delta
                .map(|d| d != 0.0 && d.abs() < LOTTO_DELTA)
                .unwrap_or(false)
        })
    }
}

fn de_volume<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let volume = f64::deserialize(deserializer)?;
    if volume.is_finite() && volume >= 0.0 {
        Ok(volume.round() as u64)
    } else {
        Err(D::Error::custom("volume must be a non-negative number"))
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// SSE envelope as it arrives on the wire
#[derive(Debug, Clone, Deserialize)]
pub struct WhaleEnvelope {
    /// Trades, newest first; `null` or empty means "no new trades this tick"
    #[serde(default)]
    pub data: Option<Vec<serde_json::Value>>,
    /// Upstream health flag
    #[serde(default)]
    pub stale: bool,
    /// Server cache timestamp (unix seconds)
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl WhaleEnvelope {
    /// Validate every event, dropping (and logging) the malformed ones
    pub fn into_batch(self) -> WhaleBatch {
        let mut events = Vec::new();
        let mut rejected = 0;

        for value in self.data.unwrap_or_default() {
            match RawTradeEvent::from_value(value) {
                Ok(event) => events.push(event),
                Err(e) => {
                    rejected += 1;
                    warn!("Dropping malformed whale event: {}", e);
                }
            }
        }

        WhaleBatch {
            events,
            stale: self.stale,
            server_time: self.timestamp,
            rejected,
        }
    }
}

/// Validated batch handed to the pipeline
#[derive(Debug, Clone, Default)]
pub struct WhaleBatch {
    /// Upstream order (newest first)
    pub events: Vec<RawTradeEvent>,
    pub stale: bool,
    pub server_time: Option<f64>,
    /// Events dropped at the ingestion boundary
    pub rejected: usize,
}

impl WhaleBatch {
    pub fn new(events: Vec<RawTradeEvent>) -> Self {
        Self {
            events,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Identity of a trade: (ticker, strike, class, expiry, volume)
///
/// Volume is part of the key, so a print re-reported with a revised volume is
/// a different trade.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TradeIdentity {
    ticker: String,
    strike: String,
    class: OptionClass,
    expiry: String,
    volume: u64,
}

impl TradeIdentity {
    pub fn of(event: &RawTradeEvent) -> Self {
        Self {
            ticker: event.ticker().to_string(),
            // f64 Display is the shortest round-trip form: 450.0 -> "450"
            strike: event.strike_price.to_string(),
            class: event.put_call,
            expiry: event.expiration_date.trim().to_string(),
            volume: event.volume,
        }
    }
}

impl fmt::Display for TradeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            self.ticker, self.strike, self.class, self.expiry, self.volume
        )
    }
}

/// Display tag, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeTag {
    Mega,
    Hedge,
    Fresh,
    Sweep,
    Lotto,
    Bull,
    Bear,
}

impl TradeTag {
    /// MEGA > HEDGE > FRESH > SWEEP > LOTTO > BULL/BEAR
    pub fn classify(event: &RawTradeEvent) -> Self {
        let is_index = INDEX_TICKERS.contains(&event.ticker());

        if event.is_mega_whale() {
            TradeTag::Mega
        } else if is_index && event.put_call == OptionClass::Put {
            TradeTag::Hedge
        } else if event.vol_oi() > FRESH_VOL_OI {
            TradeTag::Fresh
        } else if event.is_sweep() {
            TradeTag::Sweep
        } else if event.is_lotto() {
            TradeTag::Lotto
        } else {
            match event.put_call {
                OptionClass::Call => TradeTag::Bull,
                OptionClass::Put => TradeTag::Bear,
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TradeTag::Mega => "MEGA",
            TradeTag::Hedge => "HEDGE",
            TradeTag::Fresh => "FRESH",
            TradeTag::Sweep => "⚡SWEEP",
            TradeTag::Lotto => "LOTTO",
            TradeTag::Bull => "BULL",
            TradeTag::Bear => "BEAR",
        }
    }

    /// Tags that get the pulsing highlight
    pub fn pulses(&self) -> bool {
        matches!(self, TradeTag::Mega | TradeTag::Sweep)
    }
}

/// Trade after normalization, as rendered and as posted to the watchlist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedTrade {
    #[serde(skip)]
    pub identity: TradeIdentity,
    pub ticker: String,
    pub strike: f64,
    #[serde(rename = "type")]
    pub class: OptionClass,
    pub expiry: String,
    pub premium: Premium,
    pub volume: u64,
    pub direction: Direction,
    pub vol_oi: f64,
    pub moneyness: Option<Moneyness>,
    pub is_mega_whale: bool,
    pub notional_value: f64,
    pub delta: Option<f64>,
    pub iv: Option<f64>,
    pub side: Option<Side>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub tag: TradeTag,
    /// Eligible for the pulse highlight (MEGA / SWEEP)
    pub pulse: bool,
    /// Not present in the previous batch snapshot
    pub is_new: bool,
    /// First time this identity was observed (not the upstream trade time)
    pub entered_at: DateTime<Utc>,
    pub timestamp: Option<f64>,
}

impl NormalizedTrade {
    pub fn from_raw(
        event: &RawTradeEvent,
        identity: TradeIdentity,
        entered_at: DateTime<Utc>,
        is_new: bool,
    ) -> Self {
        let tag = TradeTag::classify(event);
        Self {
            identity,
            ticker: event.ticker().to_string(),
            strike: event.strike_price,
            class: event.put_call,
            expiry: event.expiration_date.trim().to_string(),
            premium: event.premium.clone(),
            volume: event.volume,
            direction: event.put_call.direction(),
            vol_oi: event.vol_oi(),
            moneyness: event.moneyness,
            is_mega_whale: event.is_mega_whale(),
            notional_value: event.notional_value.unwrap_or(0.0),
            delta: event.delta,
            iv: event.iv,
            side: event.side,
            bid: event.bid,
            ask: event.ask,
            tag,
            pulse: tag.pulses(),
            is_new,
            entered_at,
            timestamp: event.timestamp,
        }
    }

    /// `450P`, `187.5C`
    pub fn strike_label(&self) -> String {
        format!("{}{}", self.strike, self.class.letter())
    }
}
