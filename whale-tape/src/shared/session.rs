//! US equity-options market phase, evaluated in America/New_York.
//!
//! Phases are a pure function of wall-clock time; there is no hysteresis and
//! no holiday calendar.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use tracing::info;

/// 09:30 ET, in minutes after midnight
const OPEN_MINUTES: u32 = 9 * 60 + 30;
/// 16:00 ET, in minutes after midnight
const CLOSE_MINUTES: u32 = 16 * 60;

/// Market phase for the whale feed
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash)]
pub enum MarketPhase {
    PreMarket,   // Mon-Fri 00:00 - 09:30 ET
    MarketHours, // Mon-Fri 09:30 - 16:00 ET
    AfterHours,  // Mon-Fri 16:00 - 24:00 ET
    Weekend,     // Sat, Sun
}

impl MarketPhase {
    /// Classify a UTC instant using the New York calendar
    pub fn at(now: DateTime<Utc>) -> Self {
        let et = now.with_timezone(&New_York);
        if matches!(et.weekday(), Weekday::Sat | Weekday::Sun) {
            return MarketPhase::Weekend;
        }

        let minutes = et.hour() * 60 + et.minute();
        if minutes < OPEN_MINUTES {
            MarketPhase::PreMarket
        } else if minutes < CLOSE_MINUTES {
            MarketPhase::MarketHours
        } else {
            MarketPhase::AfterHours
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MarketPhase::PreMarket => "PRE-MARKET",
            MarketPhase::MarketHours => "MARKET HOURS",
            MarketPhase::AfterHours => "AFTER HOURS",
            MarketPhase::Weekend => "WEEKEND",
        }
    }

    pub fn is_trading(&self) -> bool {
        matches!(self, MarketPhase::MarketHours)
    }
}

/// Next 09:30 ET open strictly after `now`, skipping weekends
pub fn next_market_open(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let open_time = NaiveTime::from_hms_opt(9, 30, 0)?;
    let today = now.with_timezone(&New_York).date_naive();

    (0..8).find_map(|offset| {
        let date = today + ChronoDuration::days(offset);
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return None;
        }
        let open = New_York
            .from_local_datetime(&date.and_time(open_time))
            .earliest()?
            .with_timezone(&Utc);
        (open > now).then_some(open)
    })
}

/// Time remaining until the next open
pub fn time_until_open(now: DateTime<Utc>) -> Option<std::time::Duration> {
    next_market_open(now).and_then(|open| (open - now).to_std().ok())
}

/// Current New York wall-clock time, `HH:MM:SS ET`
pub fn format_et_clock(now: DateTime<Utc>) -> String {
    now.with_timezone(&New_York).format("%H:%M:%S ET").to_string()
}

/// Source of "now" for phase classification and first-seen timestamps
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for replays and tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Outcome of running a batch through the gate
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Merge the batch
    Proceed(MarketPhase),
    /// Idle phase with an empty board: reset state, show the scanner
    Idle { phase: MarketPhase, entered: bool },
}

/// Short-circuits the pipeline outside trading hours while the board is empty
#[derive(Clone, Debug)]
pub struct MarketPhaseGate {
    after_hours_idle: bool,
    last_phase: Option<MarketPhase>,
}

impl MarketPhaseGate {
    pub fn new(after_hours_idle: bool) -> Self {
        Self {
            after_hours_idle,
            last_phase: None,
        }
    }

    /// PRE_MARKET and WEEKEND always; AFTER_HOURS when configured
    pub fn is_idle(&self, phase: MarketPhase) -> bool {
        match phase {
            MarketPhase::PreMarket | MarketPhase::Weekend => true,
            MarketPhase::AfterHours => self.after_hours_idle,
            MarketPhase::MarketHours => false,
        }
    }

    /// Last phase observed, if any
    pub fn phase(&self) -> Option<MarketPhase> {
        self.last_phase
    }

    /// Recompute the phase; returns it and whether it changed
    pub fn observe(&mut self, now: DateTime<Utc>) -> (MarketPhase, bool) {
        let phase = MarketPhase::at(now);
        let changed = self.last_phase != Some(phase);
        if changed {
            info!(
                "Market phase {} -> {}",
                self.last_phase.map(|p| p.label()).unwrap_or("startup"),
                phase.label()
            );
        }
        self.last_phase = Some(phase);
        (phase, changed)
    }

    /// Gate an inbound batch
    pub fn evaluate(&mut self, now: DateTime<Utc>, board_empty: bool) -> GateDecision {
        let (phase, entered) = self.observe(now);
        if self.is_idle(phase) && board_empty {
            GateDecision::Idle { phase, entered }
        } else {
            GateDecision::Proceed(phase)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// New York local time -> UTC
    fn et(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        New_York
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_phase_boundaries() {
        // Wednesday 2025-01-15
        assert_eq!(MarketPhase::at(et(2025, 1, 15, 9, 29)), MarketPhase::PreMarket);
        assert_eq!(MarketPhase::at(et(2025, 1, 15, 9, 30)), MarketPhase::MarketHours);
        assert_eq!(MarketPhase::at(et(2025, 1, 15, 15, 59)), MarketPhase::MarketHours);
        assert_eq!(MarketPhase::at(et(2025, 1, 15, 16, 0)), MarketPhase::AfterHours);
        assert_eq!(MarketPhase::at(et(2025, 1, 18, 11, 0)), MarketPhase::Weekend);
        assert_eq!(MarketPhase::at(et(2025, 1, 19, 8, 0)), MarketPhase::Weekend);
    }

    #[test]
    fn test_weekday_uses_new_york_not_utc() {
        // Friday 21:00 ET is already Saturday 02:00 UTC
        let friday_evening = et(2025, 1, 17, 21, 0);
        assert_eq!(friday_evening.weekday(), Weekday::Sat);
        assert_eq!(MarketPhase::at(friday_evening), MarketPhase::AfterHours);

        // Sunday 20:00 ET is Monday 01:00 UTC
        let sunday_evening = et(2025, 1, 19, 20, 0);
        assert_eq!(MarketPhase::at(sunday_evening), MarketPhase::Weekend);
    }

    #[test]
    fn test_phase_across_dst() {
        // 2025-03-10 is the first Monday after the spring-forward switch (UTC-4)
        let open = Utc.with_ymd_and_hms(2025, 3, 10, 13, 30, 0).unwrap();
        assert_eq!(MarketPhase::at(open), MarketPhase::MarketHours);
        // One week earlier the same UTC time is 08:30 EST
        let winter = Utc.with_ymd_and_hms(2025, 3, 3, 13, 30, 0).unwrap();
        assert_eq!(MarketPhase::at(winter), MarketPhase::PreMarket);
    }

    #[test]
    fn test_next_market_open() {
        // Pre-market: same day
        assert_eq!(next_market_open(et(2025, 1, 15, 8, 0)), Some(et(2025, 1, 15, 9, 30)));
        // During the session: next day
        assert_eq!(next_market_open(et(2025, 1, 15, 10, 0)), Some(et(2025, 1, 16, 9, 30)));
        // Friday after close: Monday
        assert_eq!(next_market_open(et(2025, 1, 17, 17, 0)), Some(et(2025, 1, 20, 9, 30)));
        // Saturday: Monday
        assert_eq!(next_market_open(et(2025, 1, 18, 12, 0)), Some(et(2025, 1, 20, 9, 30)));
    }

    #[test]
    fn test_time_until_open() {
        let until = time_until_open(et(2025, 1, 15, 9, 0)).unwrap();
        assert_eq!(until, std::time::Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_gate_idle_only_when_board_empty() {
        let mut gate = MarketPhaseGate::new(true);
        let saturday = et(2025, 1, 18, 12, 0);

        assert_eq!(
            gate.evaluate(saturday, true),
            GateDecision::Idle {
                phase: MarketPhase::Weekend,
                entered: true
            }
        );
        assert_eq!(
            gate.evaluate(saturday, true),
            GateDecision::Idle {
                phase: MarketPhase::Weekend,
                entered: false
            }
        );
        assert_eq!(
            gate.evaluate(saturday, false),
            GateDecision::Proceed(MarketPhase::Weekend)
        );
    }

    #[test]
    fn test_gate_after_hours_configurable() {
        let after_close = et(2025, 1, 15, 17, 0);

        let mut strict = MarketPhaseGate::new(true);
        assert!(matches!(strict.evaluate(after_close, true), GateDecision::Idle { .. }));

        let mut lenient = MarketPhaseGate::new(false);
        assert_eq!(
            lenient.evaluate(after_close, true),
            GateDecision::Proceed(MarketPhase::AfterHours)
        );
    }

    #[test]
    fn test_observe_reports_transitions() {
        let clock = ManualClock::new(et(2025, 1, 15, 9, 29));
        let mut gate = MarketPhaseGate::new(true);

        assert_eq!(gate.observe(clock.now()), (MarketPhase::PreMarket, true));
        clock.advance(ChronoDuration::seconds(30));
        assert_eq!(gate.observe(clock.now()), (MarketPhase::PreMarket, false));
        clock.advance(ChronoDuration::seconds(30));
        assert_eq!(gate.observe(clock.now()), (MarketPhase::MarketHours, true));
        assert_eq!(gate.phase(), Some(MarketPhase::MarketHours));
    }
}
