//! Whale feed pipeline actor.
//!
//! One task owns the dedup state, the tape and the toast. The stream client,
//! the UI and spawned save requests talk to it through `PipelineCommand`s;
//! the UI reads back `TapeSnapshot`s from a watch channel.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::shared::config::FeedConfig;
use crate::shared::dedup::TradeDeduplicator;
use crate::shared::error::FeedError;
use crate::shared::session::{time_until_open, Clock, GateDecision, MarketPhase, MarketPhaseGate};
use crate::shared::tape::{Placeholder, VisibleTrade, WhaleTape};
use crate::shared::types::{TradeIdentity, WhaleBatch};
use crate::shared::watchlist::{SaveReceipt, WatchlistClient};

/// Messages processed by the pipeline, strictly in arrival order
#[derive(Debug)]
pub enum PipelineCommand {
    /// Stream opened
    Connected,
    /// One SSE envelope
    BatchReceived(WhaleBatch),
    /// Stream closed or failed to open
    ConnectionLost,
    /// Re-evaluate the market phase now
    PhaseTick,
    /// Pointer entered (`true`) or left the tape
    HoverChanged(bool),
    /// Save the visible trade with this identity
    SaveTrade(TradeIdentity),
    /// A spawned save finished
    SaveCompleted {
        ticker: String,
        result: Result<SaveReceipt, FeedError>,
    },
    Shutdown,
}

/// Connection health shown in the status bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHealth {
    Connecting,
    Live,
    Offline,
}

impl FeedHealth {
    pub fn label(&self) -> &'static str {
        match self {
            FeedHealth::Connecting => "CONNECTING",
            FeedHealth::Live => "LIVE",
            FeedHealth::Offline => "OFFLINE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
}

/// Transient save notification
#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    pub expires_at: Instant,
}

/// Everything the UI needs to draw one frame
#[derive(Debug, Clone)]
pub struct TapeSnapshot {
    /// Newest first
    pub rows: Vec<VisibleTrade>,
    pub placeholder: Option<Placeholder>,
    pub health: FeedHealth,
    /// Last envelope carried `stale: true`
    pub stale: bool,
    pub phase: Option<MarketPhase>,
    pub hovered: bool,
    /// Trades held in the hover buffer
    pub pending: usize,
    /// Trades scheduled or backlogged for insertion
    pub in_flight: usize,
    pub toast: Option<Toast>,
    pub seen: usize,
    pub batches: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
    /// Pipeline clock when the snapshot was taken
    pub now: DateTime<Utc>,
}

pub struct WhalePipeline<C: Clock> {
    config: FeedConfig,
    clock: C,
    dedup: TradeDeduplicator,
    gate: MarketPhaseGate,
    tape: WhaleTape,
    watchlist: Option<WatchlistClient>,
    /// Weak so the pipeline never keeps its own command channel open
    commands: Option<mpsc::WeakSender<PipelineCommand>>,
    connected: bool,
    ever_connected: bool,
    stale: bool,
    toast: Option<Toast>,
    batches: u64,
    last_batch_at: Option<DateTime<Utc>>,
}

impl<C: Clock> WhalePipeline<C> {
    pub fn new(config: FeedConfig, clock: C, watchlist: Option<WatchlistClient>) -> Self {
        Self {
            dedup: TradeDeduplicator::new(config.seen_ceiling),
            gate: MarketPhaseGate::new(config.after_hours_idle),
            tape: WhaleTape::new(&config),
            config,
            clock,
            watchlist,
            commands: None,
            connected: false,
            ever_connected: false,
            stale: false,
            toast: None,
            batches: 0,
            last_batch_at: None,
        }
    }

    /// Apply one command; returns `false` on shutdown
    pub fn handle(&mut self, command: PipelineCommand, now: Instant) -> bool {
        match command {
            PipelineCommand::Connected => {
                self.connected = true;
                self.ever_connected = true;
            }
            PipelineCommand::ConnectionLost => {
                if self.connected {
                    warn!("Whale stream lost");
                }
                self.connected = false;
            }
            PipelineCommand::BatchReceived(batch) => self.on_batch(batch, now),
            PipelineCommand::PhaseTick => self.on_phase_tick(),
            PipelineCommand::HoverChanged(hovered) => self.tape.set_hovered(hovered, now),
            PipelineCommand::SaveTrade(identity) => self.on_save(&identity, now),
            PipelineCommand::SaveCompleted { ticker, result } => {
                self.on_save_completed(ticker, result, now)
            }
            PipelineCommand::Shutdown => {
                info!("Whale pipeline shutting down");
                return false;
            }
        }
        self.tape.insert_due(now);
        true
    }

    fn on_batch(&mut self, batch: WhaleBatch, now: Instant) {
        let wall = self.clock.now();
        self.batches += 1;
        self.last_batch_at = Some(wall);
        if batch.stale != self.stale {
            if batch.stale {
                warn!("Upstream reports stale data");
            } else {
                info!("Upstream data fresh again");
            }
        }
        self.stale = batch.stale;

        match self.gate.evaluate(wall, self.tape.is_empty()) {
            GateDecision::Idle { phase, entered } => {
                if entered {
                    info!("{} with an empty tape, feed idle", phase.label());
                }
                self.dedup.reset();
                self.tape.show_placeholder(Placeholder::Scanning(phase));
            }
            GateDecision::Proceed(_) => {
                let trades = self.dedup.process_batch(&batch.events, wall);
                debug!(
                    "Batch {}: {} events, {} new, {} rejected",
                    self.batches,
                    batch.events.len(),
                    trades.len(),
                    batch.rejected
                );
                if trades.is_empty() && self.tape.is_empty() {
                    self.tape.show_placeholder(Placeholder::Waiting);
                }
                self.tape.accept(trades, now);
            }
        }
    }

    fn on_phase_tick(&mut self) {
        let (phase, _) = self.gate.observe(self.clock.now());
        if !self.tape.is_empty() {
            return;
        }
        if self.gate.is_idle(phase) {
            self.dedup.reset();
            self.tape.show_placeholder(Placeholder::Scanning(phase));
        } else {
            self.tape.show_placeholder(Placeholder::Waiting);
        }
    }

    fn on_save(&mut self, identity: &TradeIdentity, now: Instant) {
        let Some(row) = self.tape.find(identity) else {
            debug!("Save requested for {} which is no longer on the tape", identity);
            return;
        };
        let trade = row.trade.clone();

        let (Some(client), Some(commands)) = (
            self.watchlist.clone(),
            self.commands.as_ref().and_then(|weak| weak.upgrade()),
        ) else {
            self.show_toast(ToastKind::Error, "Watchlist unavailable".to_string(), now);
            return;
        };

        info!("Saving {} to watchlist", trade.identity);
        tokio::spawn(async move {
            let result = client.save(&trade).await;
            let _ = commands
                .send(PipelineCommand::SaveCompleted {
                    ticker: trade.ticker,
                    result,
                })
                .await;
        });
    }

    fn on_save_completed(
        &mut self,
        ticker: String,
        result: Result<SaveReceipt, FeedError>,
        now: Instant,
    ) {
        match result {
            Ok(_) => self.show_toast(ToastKind::Success, format!("{} saved to watchlist", ticker), now),
            Err(e) => {
                warn!("Failed to save {}: {}", ticker, e);
                self.show_toast(ToastKind::Error, format!("Save failed: {}", e.summary()), now);
            }
        }
    }

    fn show_toast(&mut self, kind: ToastKind, message: String, now: Instant) {
        self.toast = Some(Toast {
            kind,
            message,
            expires_at: now + self.config.toast_for,
        });
    }

    /// Expire the toast and forget identities that left the tape
    pub fn cleanup(&mut self, now: Instant) {
        if self.toast.as_ref().is_some_and(|toast| toast.expires_at <= now) {
            self.toast = None;
        }
        self.dedup.retain_identities(&self.tape.identities());
    }

    /// Clear all dedup state
    pub fn reset(&mut self) {
        info!("Resetting whale dedup state");
        self.dedup.reset();
    }

    pub fn health(&self) -> FeedHealth {
        match (self.connected, self.ever_connected) {
            (true, _) if !self.stale => FeedHealth::Live,
            (false, false) => FeedHealth::Connecting,
            _ => FeedHealth::Offline,
        }
    }

    pub fn snapshot(&self, now: Instant) -> TapeSnapshot {
        TapeSnapshot {
            rows: self.tape.rows().cloned().collect(),
            placeholder: self.tape.placeholder(),
            health: self.health(),
            stale: self.stale,
            phase: self.gate.phase(),
            hovered: self.tape.is_hovered(),
            pending: self.tape.pending_len(),
            in_flight: self.tape.in_flight(),
            toast: self.toast.clone().filter(|toast| toast.expires_at > now),
            seen: self.dedup.seen_len(),
            batches: self.batches,
            last_batch_at: self.last_batch_at,
            now: self.clock.now(),
        }
    }

    /// Run the actor on its own task
    pub fn spawn(mut self) -> PipelineHandle {
        let (commands, receiver) = mpsc::channel(self.config.channel_buffer_size);
        let (snapshots_tx, snapshots) = watch::channel(self.snapshot(Instant::now()));
        self.commands = Some(commands.downgrade());

        let task = tokio::spawn(self.run(receiver, snapshots_tx));
        PipelineHandle {
            commands,
            snapshots,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<PipelineCommand>,
        snapshots: watch::Sender<TapeSnapshot>,
    ) {
        let mut phase_check = tokio::time::interval(self.config.phase_check_interval);
        phase_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup = tokio::time::interval(self.config.cleanup_interval);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Whale pipeline started");

        loop {
            let stagger_due = self.tape.next_due();
            let market_open = time_until_open(self.clock.now());

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle(command, Instant::now()) {
                                break;
                            }
                        }
                        None => {
                            debug!("All pipeline senders dropped");
                            break;
                        }
                    }
                }
                _ = sleep_until_some(stagger_due) => {}
                _ = phase_check.tick() => self.on_phase_tick(),
                _ = sleep_some(market_open) => {
                    info!("Market open");
                    self.on_phase_tick();
                }
                _ = cleanup.tick() => self.cleanup(Instant::now()),
            }

            let now = Instant::now();
            self.tape.insert_due(now);
            snapshots.send_replace(self.snapshot(now));
        }

        info!("Whale pipeline stopped");
    }
}

async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn sleep_some(after: Option<Duration>) {
    match after {
        Some(after) => tokio::time::sleep(after).await,
        None => std::future::pending().await,
    }
}

/// Handle to a running pipeline
pub struct PipelineHandle {
    commands: mpsc::Sender<PipelineCommand>,
    snapshots: watch::Receiver<TapeSnapshot>,
    task: JoinHandle<()>,
}

impl PipelineHandle {
    /// Sender for the stream client and other producers
    pub fn sender(&self) -> mpsc::Sender<PipelineCommand> {
        self.commands.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TapeSnapshot> {
        self.snapshots.clone()
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> TapeSnapshot {
        self.snapshots.borrow().clone()
    }

    pub async fn send(&self, command: PipelineCommand) -> Result<(), FeedError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FeedError::ChannelClosed)
    }

    /// Non-blocking send for the UI thread
    pub fn try_send(&self, command: PipelineCommand) -> Result<(), FeedError> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(command) => {
                warn!("Pipeline busy, dropping {:?}", command);
                FeedError::ChannelClosed
            }
            mpsc::error::TrySendError::Closed(_) => FeedError::ChannelClosed,
        })
    }

    /// Stop the actor and wait for it
    pub async fn shutdown(self) {
        let _ = self.commands.send(PipelineCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Pipeline task ended abnormally: {}", e);
        }
    }
}
