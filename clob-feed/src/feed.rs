//! Realtime feed engine
//!
//! Owns the websocket connection and drives the book store through the
//! synchronization state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Synchronizing -> Live
//!       ^                                          |
//!       +--------------- error/timeout ------------+
//! ```
//!
//! On every (re)connect the engine subscribes, fetches fresh REST snapshots
//! for all subscribed assets, and buffers deltas that arrive before their
//! snapshot lands. Buffered deltas are replayed in sequence order; any that
//! do not chain onto the snapshot are discarded and the asset is
//! re-snapshotted. In Live, a `SequenceGap` or `CrossedBook` from the store
//! sends that asset back through Synchronizing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use clob_client::{BookSnapshotResponse, ClobRestClient, OrderManager};
use clob_core::{BookStore, ClobError, ClobResult, LevelChange, TradeEvent};

use crate::messages::{
    parse_events, AuthPayload, BookEvent, FeedMessage, MarketSubscribeMessage,
    UserSubscribeMessage,
};

/// Market channel endpoint (public, no auth)
pub const DEFAULT_MARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// User channel endpoint (order/trade events, L2 auth)
pub const DEFAULT_USER_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/user";

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Public surface
// ============================================================================

/// Connection/synchronization state, observable via `watch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedState {
    #[default]
    Disconnected,
    Connecting,
    /// Connected, snapshots in flight; books not yet trustworthy
    Synchronizing,
    /// All subscribed books sequence-consistent
    Live,
}

/// Events re-broadcast to observers
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A book mutation was applied (snapshot or delta)
    BookUpdated { asset_id: String, seq: u64 },
    Trade(TradeEvent),
    TickSizeChanged { asset_id: String, tick_size: Decimal },
    OrderChanged(clob_client::OrderUpdate),
}

/// Which channel this feed speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedChannel {
    /// Public market data, subscribed by asset id
    #[default]
    Market,
    /// Authenticated order/trade events, subscribed by market (condition id)
    User,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub channel: FeedChannel,
    /// Keepalive PING cadence
    pub ping_interval: Duration,
    /// No inbound traffic for this long forces a reconnect
    pub heartbeat_timeout: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    /// Snapshot attempts per asset before the asset is dropped from sync
    pub sync_retry_limit: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_MARKET_WS_URL.to_string(),
            channel: FeedChannel::Market,
            ping_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(60),
            sync_retry_limit: 3,
        }
    }
}

impl FeedConfig {
    pub fn user_channel() -> Self {
        Self {
            ws_url: DEFAULT_USER_WS_URL.to_string(),
            channel: FeedChannel::User,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
enum FeedCommand {
    Subscribe { ids: Vec<String> },
    Unsubscribe { ids: Vec<String> },
    Close,
}

/// Handle to a running feed task
///
/// Connection is lazy: the task connects on the first non-empty subscribe.
/// `close` is terminal and idempotent.
pub struct MarketFeed {
    command_tx: mpsc::Sender<FeedCommand>,
    event_tx: broadcast::Sender<FeedEvent>,
    state_rx: watch::Receiver<FeedState>,
    closed: AtomicBool,
}

impl MarketFeed {
    /// Spawn the feed task
    pub fn start(
        config: FeedConfig,
        books: Arc<BookStore>,
        rest: Arc<ClobRestClient>,
        orders: Option<Arc<OrderManager>>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(FeedState::Disconnected);

        let task = FeedTask {
            config,
            books,
            rest,
            orders,
            event_tx: event_tx.clone(),
            state_tx,
            subscriptions: HashSet::new(),
        };
        tokio::spawn(task.run(command_rx));

        Self {
            command_tx,
            event_tx,
            state_rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to realtime updates for the given ids (asset ids on the
    /// market channel, condition ids on the user channel)
    pub async fn subscribe(&self, ids: Vec<String>) -> ClobResult<()> {
        self.send(FeedCommand::Subscribe { ids }).await
    }

    /// Stop tracking the given ids; their books are dropped from the store
    pub async fn unsubscribe(&self, ids: Vec<String>) -> ClobResult<()> {
        self.send(FeedCommand::Unsubscribe { ids }).await
    }

    /// Shut the feed down. Safe to call more than once.
    pub async fn close(&self) -> ClobResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // A task that already exited means close has effectively happened
        let _ = self.command_tx.send(FeedCommand::Close).await;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state_rx.clone()
    }

    async fn send(&self, command: FeedCommand) -> ClobResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClobError::internal("feed is closed"));
        }
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ClobError::internal("feed task has exited"))
    }
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeed")
            .field("state", &*self.state_rx.borrow())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

// ============================================================================
// Synchronization primitives
// ============================================================================

/// A delta held back while its asset's snapshot is in flight
#[derive(Debug, Clone)]
struct BufferedDelta {
    seq: u64,
    changes: Vec<LevelChange>,
}

/// Per-connection synchronization bookkeeping: assets with a buffer entry
/// are pending a snapshot
#[derive(Debug, Default)]
struct SyncState {
    buffers: HashMap<String, Vec<BufferedDelta>>,
    attempts: HashMap<String, u32>,
}

impl SyncState {
    fn begin(&mut self, asset_id: &str) {
        self.buffers.entry(asset_id.to_string()).or_default();
    }

    fn is_pending(&self, asset_id: &str) -> bool {
        self.buffers.contains_key(asset_id)
    }

    fn buffer(&mut self, asset_id: &str, delta: BufferedDelta) {
        self.buffers.entry(asset_id.to_string()).or_default().push(delta);
    }

    /// Drain the buffered deltas for replay; the asset stays pending until
    /// `finish` or an exhausted `retry` removes it
    fn take_buffered(&mut self, asset_id: &str) -> Vec<BufferedDelta> {
        self.buffers
            .get_mut(asset_id)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    fn finish(&mut self, asset_id: &str) -> Vec<BufferedDelta> {
        self.attempts.remove(asset_id);
        self.buffers.remove(asset_id).unwrap_or_default()
    }

    /// Count a failed snapshot attempt; true while retries remain
    fn retry(&mut self, asset_id: &str, limit: u32) -> bool {
        let attempts = self.attempts.entry(asset_id.to_string()).or_insert(0);
        *attempts += 1;
        if *attempts > limit {
            self.buffers.remove(asset_id);
            self.attempts.remove(asset_id);
            false
        } else {
            // Old buffered deltas cannot chain onto a future snapshot;
            // keep the asset pending with an empty buffer
            self.buffers.entry(asset_id.to_string()).or_default().clear();
            true
        }
    }

    fn pending_assets(&self) -> Vec<String> {
        self.buffers.keys().cloned().collect()
    }

    fn is_synced(&self) -> bool {
        self.buffers.is_empty()
    }
}

/// Outcome of replaying an asset's buffered deltas onto a fresh snapshot
#[derive(Debug, PartialEq, Eq)]
enum ReplayOutcome {
    /// All applicable deltas chained; `applied` of them changed the book
    Synced { applied: usize },
    /// A buffered delta did not chain; the asset needs another snapshot
    NeedsResync,
}

/// Replay buffered deltas in sequence order against the freshly
/// snapshotted book. Deltas at or below the snapshot's sequence are
/// already reflected and skipped.
fn replay_buffered(
    books: &BookStore,
    asset_id: &str,
    mut buffered: Vec<BufferedDelta>,
) -> ReplayOutcome {
    buffered.sort_by_key(|d| d.seq);
    let mut applied = 0usize;
    for delta in buffered {
        let Some(current) = books.snapshot(asset_id) else {
            return ReplayOutcome::NeedsResync;
        };
        if delta.seq <= current.seq {
            continue;
        }
        match books.apply_delta(asset_id, &delta.changes, delta.seq) {
            Ok(()) => applied += 1,
            Err(ClobError::SequenceGap { .. }) | Err(ClobError::CrossedBook { .. }) => {
                return ReplayOutcome::NeedsResync;
            }
            Err(e) => {
                warn!(asset_id, %e, "buffered delta dropped");
            }
        }
    }
    ReplayOutcome::Synced { applied }
}

/// Outcome of a live delta against the store
#[derive(Debug, PartialEq, Eq)]
enum DeltaOutcome {
    Applied(u64),
    /// Already reflected by a newer snapshot
    Stale,
    NeedsResync,
}

fn handle_live_delta(
    books: &BookStore,
    asset_id: &str,
    changes: &[LevelChange],
    seq: Option<u64>,
) -> DeltaOutcome {
    // A delta that cannot be chained is indistinguishable from a gap
    let Some(seq) = seq else {
        warn!(asset_id, "delta without sequence number forces resync");
        return DeltaOutcome::NeedsResync;
    };
    let Some(current) = books.snapshot(asset_id) else {
        return DeltaOutcome::NeedsResync;
    };
    if seq <= current.seq {
        debug!(asset_id, seq, book_seq = current.seq, "stale delta skipped");
        return DeltaOutcome::Stale;
    }
    match books.apply_delta(asset_id, changes, seq) {
        Ok(()) => DeltaOutcome::Applied(seq),
        Err(ClobError::SequenceGap {
            expected, received, ..
        }) => {
            warn!(asset_id, expected, received, "sequence gap, resynchronizing");
            DeltaOutcome::NeedsResync
        }
        Err(ClobError::CrossedBook { .. }) => {
            warn!(asset_id, "crossed delta rejected, resynchronizing");
            DeltaOutcome::NeedsResync
        }
        Err(e) => {
            warn!(asset_id, %e, "delta dropped");
            DeltaOutcome::Stale
        }
    }
}

/// Exponential backoff with jitter, capped
fn reconnect_delay(config: &FeedConfig, attempt: u32) -> Duration {
    use rand::Rng;
    let backoff = config
        .reconnect_base
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(config.reconnect_cap);
    let jitter = Duration::from_millis(rand::rng().random_range(0..250));
    backoff + jitter
}

// ============================================================================
// Connection task
// ============================================================================

enum ConnectionExit {
    /// Close command or command channel gone; do not reconnect
    Closed,
    /// Connection lost; reconnect with backoff
    Lost,
}

type SnapshotFetch = BoxFuture<'static, (Vec<String>, ClobResult<Vec<BookSnapshotResponse>>)>;

struct FeedTask {
    config: FeedConfig,
    books: Arc<BookStore>,
    rest: Arc<ClobRestClient>,
    orders: Option<Arc<OrderManager>>,
    event_tx: broadcast::Sender<FeedEvent>,
    state_tx: watch::Sender<FeedState>,
    subscriptions: HashSet<String>,
}

impl FeedTask {
    async fn run(mut self, mut command_rx: mpsc::Receiver<FeedCommand>) {
        // Lazy connect: idle servers drop bare connections, so wait for the
        // first subscription before dialing
        loop {
            match command_rx.recv().await {
                Some(FeedCommand::Subscribe { ids }) if !ids.is_empty() => {
                    self.subscriptions.extend(ids);
                    break;
                }
                Some(FeedCommand::Subscribe { .. }) | Some(FeedCommand::Unsubscribe { .. }) => {}
                Some(FeedCommand::Close) | None => {
                    debug!("feed closed before first subscription");
                    return;
                }
            }
        }

        let mut attempt = 0u32;
        loop {
            self.set_state(FeedState::Connecting);
            info!(url = %self.config.ws_url, "connecting feed");

            match connect_async(&self.config.ws_url).await {
                Ok((stream, _)) => {
                    attempt = 0;
                    match self.run_connection(stream, &mut command_rx).await {
                        ConnectionExit::Closed => {
                            self.set_state(FeedState::Disconnected);
                            info!("feed closed");
                            return;
                        }
                        ConnectionExit::Lost => {
                            self.set_state(FeedState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "feed connection failed");
                    self.set_state(FeedState::Disconnected);
                }
            }

            attempt += 1;
            let delay = reconnect_delay(&self.config, attempt);
            info!(attempt, ?delay, "reconnecting feed");
            // Honor Close while waiting out the backoff
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                cmd = command_rx.recv() => match cmd {
                    Some(FeedCommand::Subscribe { ids }) => {
                        self.subscriptions.extend(ids);
                    }
                    Some(FeedCommand::Unsubscribe { ids }) => {
                        for id in &ids {
                            self.subscriptions.remove(id);
                            self.books.remove(id);
                        }
                    }
                    Some(FeedCommand::Close) | None => {
                        self.set_state(FeedState::Disconnected);
                        return;
                    }
                },
            }
        }
    }

    async fn run_connection(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        command_rx: &mut mpsc::Receiver<FeedCommand>,
    ) -> ConnectionExit {
        let (mut write, mut read) = stream.split();

        let ids: Vec<String> = self.subscriptions.iter().cloned().collect();
        match self.build_subscribe(&ids) {
            Ok(payload) => {
                if let Err(e) = write.send(Message::Text(payload.into())).await {
                    warn!(error = %e, "subscribe send failed");
                    return ConnectionExit::Lost;
                }
            }
            Err(e) => {
                // User channel without credentials cannot proceed
                error!(error = %e, "cannot build subscription, closing feed");
                return ConnectionExit::Closed;
            }
        }

        // Books only need synchronizing on the market channel
        let mut sync = SyncState::default();
        let mut snapshot_fut: Option<SnapshotFetch> = None;
        if self.config.channel == FeedChannel::Market {
            self.set_state(FeedState::Synchronizing);
            for id in &ids {
                sync.begin(id);
            }
            snapshot_fut = Some(self.fetch_snapshots(sync.pending_assets()));
        } else {
            self.set_state(FeedState::Live);
        }

        let mut ping_timer = interval(self.config.ping_interval);
        let mut last_inbound = Instant::now();

        loop {
            // One snapshot fetch in flight at a time; newly gapped assets
            // wait for the next round
            if snapshot_fut.is_none() && !sync.is_synced() {
                snapshot_fut = Some(self.fetch_snapshots(sync.pending_assets()));
            }
            let fetch_in_flight = snapshot_fut.is_some();
            let snapshot_ready: futures_util::future::OptionFuture<_> =
                snapshot_fut.as_mut().into();

            tokio::select! {
                Some((assets, result)) = snapshot_ready => {
                    snapshot_fut = None;
                    self.handle_snapshot_result(assets, result, &mut sync);
                    self.update_sync_state(&sync, false);
                }

                msg = read.next() => {
                    last_inbound = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(&text, &mut sync);
                            self.update_sync_state(&sync, fetch_in_flight);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if write.send(Message::Pong(data)).await.is_err() {
                                return ConnectionExit::Lost;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("feed connection closed by server");
                            return ConnectionExit::Lost;
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "feed read error");
                            return ConnectionExit::Lost;
                        }
                        None => {
                            info!("feed stream ended");
                            return ConnectionExit::Lost;
                        }
                        _ => {}
                    }
                }

                cmd = command_rx.recv() => match cmd {
                    Some(FeedCommand::Subscribe { ids }) => {
                        let fresh: Vec<String> = ids
                            .into_iter()
                            .filter(|id| self.subscriptions.insert(id.clone()))
                            .collect();
                        if !fresh.is_empty() {
                            match self.build_subscribe(&fresh) {
                                Ok(payload) => {
                                    if write.send(Message::Text(payload.into())).await.is_err() {
                                        return ConnectionExit::Lost;
                                    }
                                }
                                Err(e) => warn!(error = %e, "subscribe skipped"),
                            }
                            if self.config.channel == FeedChannel::Market {
                                for id in &fresh {
                                    sync.begin(id);
                                }
                                self.update_sync_state(&sync, fetch_in_flight);
                            }
                        }
                    }
                    Some(FeedCommand::Unsubscribe { ids }) => {
                        // The venue has no server-side unsubscribe; drop local state
                        for id in &ids {
                            self.subscriptions.remove(id);
                            self.books.remove(id);
                            sync.finish(id);
                        }
                        self.update_sync_state(&sync, fetch_in_flight);
                    }
                    Some(FeedCommand::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return ConnectionExit::Closed;
                    }
                },

                _ = ping_timer.tick() => {
                    if write.send(Message::Text("PING".into())).await.is_err() {
                        warn!("keepalive send failed");
                        return ConnectionExit::Lost;
                    }
                }

                _ = tokio::time::sleep_until(last_inbound + self.config.heartbeat_timeout) => {
                    warn!(timeout = ?self.config.heartbeat_timeout, "feed heartbeat timeout");
                    return ConnectionExit::Lost;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------------

    fn handle_frame(&self, text: &str, sync: &mut SyncState) {
        for event in parse_events(text) {
            match event {
                FeedMessage::Book(book) => self.handle_book(book, sync),
                FeedMessage::PriceChange(change) => {
                    let asset_id = change.asset_id.clone();
                    let changes = match change.level_changes() {
                        Ok(changes) => changes,
                        Err(e) => {
                            warn!(asset_id, %e, "malformed delta dropped");
                            continue;
                        }
                    };
                    if sync.is_pending(&asset_id) {
                        // Snapshot in flight: hold the delta for replay. A
                        // seq-less delta can never chain, so it is dropped.
                        if let Some(seq) = change.seq {
                            sync.buffer(&asset_id, BufferedDelta { seq, changes });
                        }
                        continue;
                    }
                    match handle_live_delta(&self.books, &asset_id, &changes, change.seq) {
                        DeltaOutcome::Applied(seq) => {
                            let _ = self.event_tx.send(FeedEvent::BookUpdated {
                                asset_id,
                                seq,
                            });
                        }
                        DeltaOutcome::Stale => {}
                        DeltaOutcome::NeedsResync => {
                            sync.begin(&asset_id);
                        }
                    }
                }
                FeedMessage::LastTradePrice(trade) => match trade.into_trade_event() {
                    Ok(event) => {
                        let _ = self.event_tx.send(FeedEvent::Trade(event));
                    }
                    Err(e) => warn!(%e, "malformed trade print dropped"),
                },
                FeedMessage::TickSizeChange(tick) => {
                    match tick.tick_size.parse::<Decimal>() {
                        Ok(tick_size) => {
                            info!(asset_id = %tick.asset_id, %tick_size, "tick size changed");
                            let _ = self.event_tx.send(FeedEvent::TickSizeChanged {
                                asset_id: tick.asset_id,
                                tick_size,
                            });
                        }
                        Err(e) => warn!(%e, "malformed tick size dropped"),
                    }
                }
                FeedMessage::Order(order) => {
                    let update = order.to_update();
                    if let Some(orders) = &self.orders {
                        orders.apply_update(&update);
                    }
                    let _ = self.event_tx.send(FeedEvent::OrderChanged(update));
                }
                FeedMessage::Trade(trade) => {
                    let update = trade.to_update();
                    if let Some(orders) = &self.orders {
                        orders.apply_update(&update);
                    }
                    let _ = self.event_tx.send(FeedEvent::OrderChanged(update));
                    if let Ok(event) = trade.to_trade_event() {
                        let _ = self.event_tx.send(FeedEvent::Trade(event));
                    }
                }
            }
        }
    }

    /// An in-band book event is snapshot-equivalent: it resets the asset's
    /// sequence and supersedes any pending synchronization
    fn handle_book(&self, book: BookEvent, sync: &mut SyncState) {
        let asset_id = book.asset_id.clone();
        let seq = book.sequence();
        let (bids, asks) = match (book.bid_levels(), book.ask_levels()) {
            (Ok(bids), Ok(asks)) => (bids, asks),
            (Err(e), _) | (_, Err(e)) => {
                warn!(asset_id, %e, "malformed book event dropped");
                return;
            }
        };
        match self.books.apply_snapshot(&asset_id, &bids, &asks, seq) {
            Ok(()) => {
                sync.finish(&asset_id);
                let _ = self.event_tx.send(FeedEvent::BookUpdated { asset_id, seq });
            }
            Err(e) => {
                warn!(asset_id, %e, "book event rejected, resynchronizing");
                sync.begin(&asset_id);
            }
        }
    }

    fn handle_snapshot_result(
        &self,
        requested: Vec<String>,
        result: ClobResult<Vec<BookSnapshotResponse>>,
        sync: &mut SyncState,
    ) {
        let snapshots = match result {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(%e, assets = requested.len(), "snapshot fetch failed");
                for asset_id in &requested {
                    // Skip assets unsubscribed while the fetch was out
                    if !sync.is_pending(asset_id) {
                        continue;
                    }
                    if !sync.retry(asset_id, self.config.sync_retry_limit) {
                        error!(asset_id, "snapshot retries exhausted, asset dropped");
                    }
                }
                return;
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        for snapshot in snapshots {
            let asset_id = snapshot.asset_id.clone();
            // The asset may have been unsubscribed while the fetch was out
            if !sync.is_pending(&asset_id) {
                continue;
            }
            seen.insert(asset_id.clone());

            let applied = snapshot
                .bid_levels()
                .and_then(|bids| Ok((bids, snapshot.ask_levels()?)))
                .and_then(|(bids, asks)| {
                    self.books
                        .apply_snapshot(&asset_id, &bids, &asks, snapshot.sequence())
                });
            if let Err(e) = applied {
                warn!(asset_id, %e, "snapshot rejected");
                if !sync.retry(&asset_id, self.config.sync_retry_limit) {
                    error!(asset_id, "snapshot retries exhausted, asset dropped");
                }
                continue;
            }

            let buffered = sync.take_buffered(&asset_id);
            match replay_buffered(&self.books, &asset_id, buffered) {
                ReplayOutcome::Synced { applied } => {
                    sync.finish(&asset_id);
                    debug!(asset_id, replayed = applied, "asset synchronized");
                    if let Some(book) = self.books.snapshot(&asset_id) {
                        let _ = self.event_tx.send(FeedEvent::BookUpdated {
                            asset_id,
                            seq: book.seq,
                        });
                    }
                }
                ReplayOutcome::NeedsResync => {
                    debug!(asset_id, "buffered deltas did not chain, re-snapshotting");
                    if !sync.retry(&asset_id, self.config.sync_retry_limit) {
                        error!(asset_id, "snapshot retries exhausted, asset dropped");
                    }
                }
            }
        }

        // Assets the venue did not answer for count as failed attempts
        for asset_id in requested {
            if !seen.contains(&asset_id) && sync.is_pending(&asset_id) {
                warn!(asset_id, "asset missing from snapshot response");
                if !sync.retry(&asset_id, self.config.sync_retry_limit) {
                    error!(asset_id, "snapshot retries exhausted, asset dropped");
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn build_subscribe(&self, ids: &[String]) -> ClobResult<String> {
        let payload = match self.config.channel {
            FeedChannel::Market => {
                serde_json::to_string(&MarketSubscribeMessage::new(ids.to_vec()))
            }
            FeedChannel::User => {
                let api = self.rest.credentials().api_credentials().ok_or_else(|| {
                    ClobError::signing_unavailable("user channel requires API credentials")
                })?;
                serde_json::to_string(&UserSubscribeMessage {
                    markets: ids.to_vec(),
                    msg_type: "user".to_string(),
                    auth: AuthPayload {
                        api_key: api.api_key,
                        secret: api.secret,
                        passphrase: api.passphrase,
                    },
                })
            }
        };
        payload.map_err(|e| ClobError::internal(format!("failed to encode subscribe: {}", e)))
    }

    fn fetch_snapshots(&self, assets: Vec<String>) -> SnapshotFetch {
        let rest = Arc::clone(&self.rest);
        Box::pin(async move {
            let result = rest.order_books(&assets).await;
            (assets, result)
        })
    }

    fn update_sync_state(&self, sync: &SyncState, fetch_in_flight: bool) {
        if self.config.channel != FeedChannel::Market {
            return;
        }
        if sync.is_synced() && !fetch_in_flight {
            self.set_state(FeedState::Live);
        } else {
            self.set_state(FeedState::Synchronizing);
        }
    }

    fn set_state(&self, state: FeedState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!(?state, "feed state changed");
                *current = state;
                true
            }
        });
    }
}
