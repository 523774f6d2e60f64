//! Visible whale tape: hover buffer, staggered drain and the capped list.
//!
//! Timestamps are `tokio::time::Instant` so paused-clock tests can drive the
//! stagger schedule.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::shared::config::FeedConfig;
use crate::shared::session::MarketPhase;
use crate::shared::types::{NormalizedTrade, TradeIdentity};

/// Row on the tape
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleTrade {
    pub trade: NormalizedTrade,
    pub inserted_at: Instant,
}

impl VisibleTrade {
    /// Short-lived arrival highlight, only for trades missing from the
    /// previous snapshot
    pub fn just_arrived(&self, now: Instant, window: Duration) -> bool {
        self.trade.is_new && now.saturating_duration_since(self.inserted_at) < window
    }
}

/// What to show instead of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Idle phase scanner
    Scanning(MarketPhase),
    /// Market open but nothing printed yet
    Waiting,
}

impl Placeholder {
    pub fn message(&self) -> String {
        match self {
            Placeholder::Scanning(phase) => format!("Scanning for whales... ({})", phase.label()),
            Placeholder::Waiting => "Waiting for trade...".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct WhaleTape {
    /// Newest at the front
    visible: VecDeque<VisibleTrade>,
    /// Hover buffer, newest at the front
    pending: VecDeque<NormalizedTrade>,
    hovered: bool,
    /// Insertions waiting for their stagger slot, in slot order
    schedule: VecDeque<(Instant, NormalizedTrade)>,
    /// Excess beyond the per-cycle cap, oldest first
    backlog: VecDeque<NormalizedTrade>,
    placeholder: Option<Placeholder>,
    max_visible: usize,
    max_pending: usize,
    max_per_drain: usize,
    stagger: Duration,
}

impl WhaleTape {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            visible: VecDeque::with_capacity(config.max_visible + 1),
            pending: VecDeque::new(),
            hovered: false,
            schedule: VecDeque::new(),
            backlog: VecDeque::new(),
            placeholder: None,
            max_visible: config.max_visible,
            max_pending: config.max_pending,
            max_per_drain: config.max_per_drain.max(1),
            stagger: config.stagger_interval,
        }
    }

    /// Take freshly emitted trades (oldest first)
    pub fn accept(&mut self, trades: Vec<NormalizedTrade>, now: Instant) {
        if trades.is_empty() {
            return;
        }
        if self.hovered {
            for trade in trades {
                self.pending.push_front(trade);
                if self.pending.len() > self.max_pending {
                    self.pending.pop_back();
                }
            }
            return;
        }
        self.drain(trades, now);
    }

    /// Pointer entered or left the tape
    ///
    /// Entering parks every scheduled insertion at the head of the backlog so
    /// rows stop moving under the pointer. Leaving flushes the hover buffer
    /// behind them and restarts the drain.
    pub fn set_hovered(&mut self, hovered: bool, now: Instant) {
        if self.hovered == hovered {
            return;
        }
        self.hovered = hovered;
        if hovered {
            while let Some((_, trade)) = self.schedule.pop_back() {
                self.backlog.push_front(trade);
            }
        } else {
            let flushed: Vec<_> = self.pending.drain(..).rev().collect();
            self.drain(flushed, now);
        }
    }

    pub fn is_hovered(&self) -> bool {
        self.hovered
    }

    fn drain(&mut self, trades: Vec<NormalizedTrade>, now: Instant) {
        self.backlog.extend(trades);
        let start = match self.schedule.back() {
            Some((last, _)) => *last + self.stagger,
            None => now,
        };
        self.start_cycle(start);
    }

    fn start_cycle(&mut self, start: Instant) {
        let mut at = start;
        for _ in 0..self.max_per_drain {
            let Some(trade) = self.backlog.pop_front() else {
                break;
            };
            self.schedule.push_back((at, trade));
            at += self.stagger;
        }
    }

    /// Next stagger slot, if anything is scheduled
    pub fn next_due(&self) -> Option<Instant> {
        self.schedule.front().map(|(at, _)| *at)
    }

    /// Insert every trade whose slot has come; returns how many were inserted
    pub fn insert_due(&mut self, now: Instant) -> usize {
        let mut inserted = 0;
        loop {
            let mut last_slot = None;
            while self.schedule.front().is_some_and(|(at, _)| *at <= now) {
                if let Some((at, trade)) = self.schedule.pop_front() {
                    self.insert(trade, at);
                    last_slot = Some(at);
                    inserted += 1;
                }
            }
            // Backlog starts the next cycle one interval after the last slot
            match last_slot {
                Some(last) if self.schedule.is_empty() && !self.backlog.is_empty() => {
                    self.start_cycle(last + self.stagger);
                }
                _ => break,
            }
        }
        inserted
    }

    fn insert(&mut self, trade: NormalizedTrade, slot: Instant) {
        self.visible.push_front(VisibleTrade {
            trade,
            inserted_at: slot,
        });
        self.visible.truncate(self.max_visible);
        self.placeholder = None;
    }

    pub fn show_placeholder(&mut self, placeholder: Placeholder) {
        self.placeholder = Some(placeholder);
    }

    pub fn placeholder(&self) -> Option<Placeholder> {
        self.placeholder
    }

    /// Nothing visible, buffered or in flight
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
            && self.pending.is_empty()
            && self.schedule.is_empty()
            && self.backlog.is_empty()
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Scheduled plus backlogged
    pub fn in_flight(&self) -> usize {
        self.schedule.len() + self.backlog.len()
    }

    /// Row by position, 0 is the newest
    pub fn get(&self, index: usize) -> Option<&VisibleTrade> {
        self.visible.get(index)
    }

    /// Visible row holding this trade
    pub fn find(&self, identity: &TradeIdentity) -> Option<&VisibleTrade> {
        self.visible.iter().find(|row| &row.trade.identity == identity)
    }

    pub fn rows(&self) -> impl Iterator<Item = &VisibleTrade> {
        self.visible.iter()
    }

    /// Every identity still held anywhere on the tape
    pub fn identities(&self) -> HashSet<TradeIdentity> {
        self.visible
            .iter()
            .map(|row| &row.trade)
            .chain(self.pending.iter())
            .chain(self.schedule.iter().map(|(_, trade)| trade))
            .chain(self.backlog.iter())
            .map(|trade| trade.identity.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::{OptionClass, RawTradeEvent, TradeIdentity};
    use chrono::Utc;

    fn normalized(volume: u64) -> NormalizedTrade {
        let event = RawTradeEvent::new("SPY", 450.0, OptionClass::Call, "2025-01-17", volume);
        NormalizedTrade::from_raw(&event, TradeIdentity::of(&event), Utc::now(), true)
    }

    fn volumes(tape: &WhaleTape) -> Vec<u64> {
        tape.rows().map(|row| row.trade.volume).collect()
    }

    fn tape() -> WhaleTape {
        WhaleTape::new(&FeedConfig::default())
    }

    #[test]
    fn test_first_item_inserted_immediately() {
        let mut tape = tape();
        let now = Instant::now();
        tape.accept(vec![normalized(1), normalized(2)], now);

        assert_eq!(tape.next_due(), Some(now));
        assert_eq!(tape.insert_due(now), 1);
        assert_eq!(volumes(&tape), vec![1]);
        assert_eq!(tape.next_due(), Some(now + Duration::from_millis(200)));

        tape.insert_due(now + Duration::from_millis(200));
        assert_eq!(volumes(&tape), vec![2, 1]);
    }

    #[test]
    fn test_cycle_cap_moves_excess_to_backlog() {
        let mut tape = tape();
        let now = Instant::now();
        tape.accept((1..=15).map(normalized).collect(), now);
        assert_eq!(tape.in_flight(), 15);

        // Ten slots: 0ms .. 1800ms
        tape.insert_due(now + Duration::from_millis(1800));
        assert_eq!(tape.len(), 10);
        // Next cycle starts one interval after the schedule emptied
        assert_eq!(tape.next_due(), Some(now + Duration::from_millis(2000)));

        tape.insert_due(now + Duration::from_secs(10));
        assert_eq!(tape.len(), 15);
        assert_eq!(tape.get(0).unwrap().trade.volume, 15);
        assert_eq!(tape.in_flight(), 0);
    }

    #[test]
    fn test_second_batch_chains_after_first() {
        let mut tape = tape();
        let now = Instant::now();
        tape.accept(vec![normalized(1), normalized(2), normalized(3)], now);
        tape.insert_due(now);

        let later = now + Duration::from_millis(100);
        tape.accept(vec![normalized(4)], later);
        // Slots at 200, 400 for the first batch, then 600
        tape.insert_due(now + Duration::from_millis(600));
        assert_eq!(volumes(&tape), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_list_cap_keeps_newest() {
        let mut tape = tape();
        let now = Instant::now();
        for volume in 1..=60 {
            tape.accept(vec![normalized(volume)], now);
        }
        tape.insert_due(now + Duration::from_secs(60));

        assert_eq!(tape.len(), 50);
        assert_eq!(volumes(&tape), (11..=60).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_hover_buffers_and_flushes_in_order() {
        let mut tape = tape();
        let now = Instant::now();
        tape.set_hovered(true, now);
        tape.accept(vec![normalized(1), normalized(2), normalized(3)], now);
        tape.accept(vec![normalized(4), normalized(5), normalized(6)], now);

        assert_eq!(tape.len(), 0);
        assert_eq!(tape.pending_len(), 6);
        assert!(tape.next_due().is_none());

        tape.set_hovered(false, now);
        assert_eq!(tape.pending_len(), 0);
        tape.insert_due(now + Duration::from_secs(2));
        assert_eq!(volumes(&tape), vec![6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_hover_buffer_drops_oldest() {
        let mut tape = tape();
        let now = Instant::now();
        tape.set_hovered(true, now);
        tape.accept((1..=55).map(normalized).collect(), now);
        assert_eq!(tape.pending_len(), 50);

        tape.set_hovered(false, now);
        tape.insert_due(now + Duration::from_secs(60));
        assert_eq!(tape.get(49).unwrap().trade.volume, 6);
        assert_eq!(tape.get(0).unwrap().trade.volume, 55);
    }

    #[test]
    fn test_just_arrived_window() {
        let mut tape = tape();
        let now = Instant::now();
        let mut old = normalized(2);
        old.is_new = false;
        tape.accept(vec![normalized(1), old], now);
        tape.insert_due(now + Duration::from_millis(200));

        let window = Duration::from_secs(3);
        let check = now + Duration::from_secs(1);
        assert!(!tape.get(0).unwrap().just_arrived(check, window));
        assert!(tape.get(1).unwrap().just_arrived(check, window));
        assert!(!tape.get(1).unwrap().just_arrived(now + Duration::from_secs(4), window));
    }

    #[test]
    fn test_late_wakeup_keeps_slot_times() {
        let mut tape = tape();
        let now = Instant::now();
        tape.accept(vec![normalized(1), normalized(2), normalized(3)], now);
        tape.insert_due(now + Duration::from_secs(1));

        let inserted: Vec<_> = tape.rows().map(|row| row.inserted_at).collect();
        assert_eq!(
            inserted,
            vec![
                now + Duration::from_millis(400),
                now + Duration::from_millis(200),
                now,
            ]
        );

        let window = Duration::from_secs(3);
        let check = now + Duration::from_millis(3100);
        assert!(tape.get(0).unwrap().just_arrived(check, window));
        assert!(!tape.get(2).unwrap().just_arrived(check, window));
    }

    #[test]
    fn test_hover_parks_scheduled_insertions() {
        let mut tape = tape();
        let now = Instant::now();
        tape.accept(vec![normalized(1), normalized(2), normalized(3)], now);
        tape.insert_due(now);
        assert_eq!(volumes(&tape), vec![1]);

        tape.set_hovered(true, now + Duration::from_millis(100));
        assert!(tape.next_due().is_none());
        assert_eq!(tape.in_flight(), 2);
        tape.accept(vec![normalized(4)], now + Duration::from_millis(150));

        // Slots for 2 and 3 have passed, but nothing moves while hovered
        assert_eq!(tape.insert_due(now + Duration::from_secs(5)), 0);
        assert_eq!(volumes(&tape), vec![1]);

        let left = now + Duration::from_secs(6);
        tape.set_hovered(false, left);
        assert_eq!(tape.next_due(), Some(left));
        tape.insert_due(left + Duration::from_secs(1));
        assert_eq!(volumes(&tape), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_find_by_identity() {
        let mut tape = tape();
        let now = Instant::now();
        let target = normalized(7);
        let identity = target.identity.clone();
        tape.accept(vec![target, normalized(8)], now);
        tape.insert_due(now + Duration::from_millis(200));

        assert_eq!(tape.get(0).unwrap().trade.volume, 8);
        assert_eq!(tape.find(&identity).unwrap().trade.volume, 7);
        assert!(tape.find(&normalized(9).identity).is_none());
    }

    #[test]
    fn test_insert_clears_placeholder() {
        let mut tape = tape();
        let now = Instant::now();
        tape.show_placeholder(Placeholder::Waiting);
        assert_eq!(tape.placeholder(), Some(Placeholder::Waiting));

        tape.accept(vec![normalized(1)], now);
        tape.insert_due(now);
        assert_eq!(tape.placeholder(), None);
    }

    #[test]
    fn test_identities_cover_every_stage() {
        let mut tape = tape();
        let now = Instant::now();
        tape.accept((1..=12).map(normalized).collect(), now);
        tape.insert_due(now);
        tape.set_hovered(true, now);
        tape.accept(vec![normalized(13)], now);

        assert_eq!(tape.identities().len(), 13);
    }
}
