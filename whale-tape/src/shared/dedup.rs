//! Deduplicating normalizer.
//!
//! The upstream resends its whole recent window on every tick, so most of a
//! batch has been seen before. This module turns each batch into the trades
//! that are actually new to the tape, oldest first.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::shared::types::{NormalizedTrade, RawTradeEvent, TradeIdentity};

/// Dedup state owned by the pipeline
#[derive(Debug)]
pub struct TradeDeduplicator {
    /// Identities already emitted
    seen: HashSet<TradeIdentity>,
    /// First time each identity was observed
    entered_at: HashMap<TradeIdentity, DateTime<Utc>>,
    /// Identities present in the previous batch
    previous_snapshot: HashSet<TradeIdentity>,
    seen_ceiling: usize,
}

impl TradeDeduplicator {
    pub fn new(seen_ceiling: usize) -> Self {
        Self {
            seen: HashSet::new(),
            entered_at: HashMap::new(),
            previous_snapshot: HashSet::new(),
            seen_ceiling,
        }
    }

    /// Normalize a newest-first batch and return the unseen trades, oldest first
    pub fn process_batch(
        &mut self,
        events: &[RawTradeEvent],
        now: DateTime<Utc>,
    ) -> Vec<NormalizedTrade> {
        let mut snapshot = HashSet::with_capacity(events.len());
        let mut emitted = Vec::new();

        for event in events.iter().rev() {
            let identity = TradeIdentity::of(event);
            let entered_at = *self.entered_at.entry(identity.clone()).or_insert(now);
            let is_new = !self.previous_snapshot.contains(&identity);
            snapshot.insert(identity.clone());

            if !self.seen.insert(identity.clone()) {
                continue;
            }
            emitted.push(NormalizedTrade::from_raw(event, identity, entered_at, is_new));
        }

        debug!(
            "Dedup: {} in batch, {} emitted, {} seen",
            events.len(),
            emitted.len(),
            self.seen.len()
        );

        if self.seen.len() > self.seen_ceiling {
            info!(
                "Seen set reached {} identities (ceiling {}), clearing",
                self.seen.len(),
                self.seen_ceiling
            );
            self.seen.clear();
            self.entered_at.retain(|identity, _| snapshot.contains(identity));
        }

        self.previous_snapshot = snapshot;
        emitted
    }

    /// Forget everything: seen set, identity memory and previous snapshot
    pub fn reset(&mut self) {
        self.seen.clear();
        self.entered_at.clear();
        self.previous_snapshot.clear();
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Number of identities with a remembered first sighting
    pub fn identities_len(&self) -> usize {
        self.entered_at.len()
    }

    pub fn has_seen(&self, identity: &TradeIdentity) -> bool {
        self.seen.contains(identity)
    }

    pub fn entered_at(&self, identity: &TradeIdentity) -> Option<DateTime<Utc>> {
        self.entered_at.get(identity).copied()
    }

    /// Drop identity memory for anything no longer on the tape or in the
    /// last snapshot
    pub fn retain_identities(&mut self, live: &HashSet<TradeIdentity>) {
        let before = self.entered_at.len();
        let previous = &self.previous_snapshot;
        self.entered_at
            .retain(|identity, _| live.contains(identity) || previous.contains(identity));
        let pruned = before - self.entered_at.len();
        if pruned > 0 {
            debug!("Pruned {} stale identities", pruned);
        }
    }
}
