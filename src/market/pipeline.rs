use crate::market::alerts::{NotificationEvent, VolatilityWindow, VOLATILITY_TICK_MS};
use crate::market::binance::{
    connect_market_stream, fetch_depth_snapshot, fetch_kline_history, fetch_recent_trades,
};
use crate::market::types::{
    parse_stream_frame, ConnectionStatus, EngineConfig, MarketEvent, MAX_KLINE_HISTORY,
};
use crate::state::MarketState;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;
const RATE_TRACK_TICK_MS: u64 = 1_000;
const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Runtime context shared between the engine facade and its session tasks.
/// The generation counter fences callbacks of superseded connections: every
/// task captures the generation it was spawned under and drops its work when
/// the counter has moved on.
pub(crate) struct EngineShared {
    pub config: Mutex<EngineConfig>,
    pub state: Arc<Mutex<MarketState>>,
    pub generation: AtomicU64,
    pub manual_disconnect: AtomicBool,
    pub events: broadcast::Sender<NotificationEvent>,
    pub http: Client,
}

impl EngineShared {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config: Mutex::new(config),
            state: Arc::new(Mutex::new(MarketState::default())),
            generation: AtomicU64::new(0),
            manual_disconnect: AtomicBool::new(false),
            events,
            http: Client::new(),
        })
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_torn_down(&self, generation: u64) -> bool {
        !self.is_current(generation) || self.manual_disconnect.load(Ordering::SeqCst)
    }
}

pub fn backoff_delay_ms(attempts: u32) -> u64 {
    let exponent = attempts.min(5);
    RECONNECT_BASE_DELAY_MS
        .saturating_mul(1 << exponent)
        .min(RECONNECT_MAX_DELAY_MS)
}

pub fn should_retry(attempts: u32) -> bool {
    attempts < MAX_RECONNECT_ATTEMPTS
}

pub(crate) fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

/// Applies one decoded market event. Runs to completion under the state lock,
/// so book mutation, history upsert and imbalance recompute are atomic with
/// respect to other frames.
pub fn apply_market_event(state: &mut MarketState, event: MarketEvent, now_ms: i64) {
    state.stats.last_update_ms = Some(now_ms);

    match event {
        MarketEvent::Kline(kline) => {
            if kline.is_closed {
                state.kline_history.commit(kline.clone());
            }
            state.live_kline = Some(kline);
            state.stats.klines_received += 1;
        }
        MarketEvent::Trade(trade) => {
            state.trades.push(trade);
            state.stats.trades_received += 1;
        }
        MarketEvent::Ticker(ticker) => {
            state.ticker = ticker;
        }
        MarketEvent::Depth(delta) => {
            state.book.apply_delta(&delta);
            state.stats.book_updates += 1;
        }
        MarketEvent::Ignored => {}
    }
}

/// Decodes and applies one inbound frame, fenced by generation. A malformed
/// frame is logged and dropped; the connection stays open.
pub(crate) fn handle_frame(shared: &EngineShared, generation: u64, payload: &mut [u8]) {
    if shared.is_torn_down(generation) {
        return;
    }

    match parse_stream_frame(payload) {
        Ok(event) => {
            let mut state = shared.state.lock();
            apply_market_event(&mut state, event, now_unix_ms());
        }
        Err(error) => {
            tracing::warn!(%error, "dropping malformed stream frame");
        }
    }
}

fn set_status(
    shared: &EngineShared,
    generation: u64,
    status: ConnectionStatus,
    error: Option<String>,
) {
    if !shared.is_current(generation) {
        return;
    }
    let mut state = shared.state.lock();
    state.status = status;
    state.connection_error = error;
}

/// One-shot bootstrap fetches issued before the socket opens. Each source is
/// independent: a failed fetch leaves that slice at its default and the
/// connection proceeds.
pub(crate) async fn run_bootstrap(shared: &Arc<EngineShared>, generation: u64) {
    let (rest_base, symbol, interval) = {
        let config = shared.config.lock();
        (
            config.rest_base_url.clone(),
            config.symbol.clone(),
            config.interval,
        )
    };

    let depth = fetch_depth_snapshot(&shared.http, &rest_base, &symbol);
    let klines = fetch_kline_history(&shared.http, &rest_base, &symbol, interval, MAX_KLINE_HISTORY);
    let trades = fetch_recent_trades(&shared.http, &rest_base, &symbol);
    let (depth, klines, trades) = tokio::join!(depth, klines, trades);

    if shared.is_torn_down(generation) {
        return;
    }

    let mut state = shared.state.lock();
    match depth {
        Ok((bids, asks)) => state.book.seed(bids, asks),
        Err(error) => tracing::warn!(%error, "order book snapshot unavailable, starting empty"),
    }
    match klines {
        Ok(klines) => state.kline_history.seed(klines),
        Err(error) => tracing::warn!(%error, "kline history unavailable, starting empty"),
    }
    match trades {
        Ok(trades) => state.trades.seed(trades),
        Err(error) => tracing::warn!(%error, "recent trades unavailable, starting empty"),
    }
}

fn volatility_tick(
    shared: &EngineShared,
    generation: u64,
    window: &mut VolatilityWindow,
    threshold_pct: f64,
) {
    if shared.is_torn_down(generation) {
        return;
    }

    let price = shared.state.lock().last_price();
    let Some(price) = price else {
        return;
    };

    if let Some(event) = window.record(price, now_unix_ms(), threshold_pct) {
        let volatility_alerts = shared.config.lock().preferences.volatility_alerts;
        if volatility_alerts {
            let _ = shared.events.send(event);
        }
    }
}

/// Session loop for one generation: connect, stream, and on unexpected close
/// reconnect with exponential backoff until cancelled, superseded, or the
/// retry budget is exhausted.
pub(crate) async fn run_market_session(
    shared: Arc<EngineShared>,
    generation: u64,
    cancel: CancellationToken,
) {
    let mut reconnect_attempts: u32 = 0;

    loop {
        if cancel.is_cancelled() || shared.is_torn_down(generation) {
            return;
        }

        let (ws_base, symbol, interval, threshold_pct) = {
            let config = shared.config.lock();
            (
                config.stream_base_url.clone(),
                config.symbol.clone(),
                config.interval,
                config.volatility_threshold_pct,
            )
        };

        set_status(&shared, generation, ConnectionStatus::Connecting, None);

        match connect_market_stream(&ws_base, &symbol, interval).await {
            Ok(mut stream) => {
                if cancel.is_cancelled() || shared.is_torn_down(generation) {
                    return;
                }

                reconnect_attempts = 0;
                {
                    let mut state = shared.state.lock();
                    state.status = ConnectionStatus::Connected;
                    state.connection_error = None;
                    state.stats.connected_at_ms = Some(now_unix_ms());
                }
                tracing::info!(%symbol, generation, "market stream connected");

                let mut rate_ticker =
                    tokio::time::interval(Duration::from_millis(RATE_TRACK_TICK_MS));
                rate_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut volatility_ticker =
                    tokio::time::interval(Duration::from_millis(VOLATILITY_TICK_MS));
                volatility_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                let mut volatility_window = VolatilityWindow::default();
                let mut message_count: u64 = 0;

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = rate_ticker.tick() => {
                            if shared.is_current(generation) {
                                shared.state.lock().stats.messages_per_second = message_count;
                            }
                            message_count = 0;
                        }
                        _ = volatility_ticker.tick() => {
                            volatility_tick(&shared, generation, &mut volatility_window, threshold_pct);
                        }
                        frame = stream.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    message_count += 1;
                                    let mut payload = text.into_bytes();
                                    handle_frame(&shared, generation, payload.as_mut_slice());
                                }
                                Some(Ok(Message::Binary(mut payload))) => {
                                    message_count += 1;
                                    handle_frame(&shared, generation, payload.as_mut_slice());
                                }
                                Some(Ok(Message::Close(_))) => {
                                    tracing::info!(generation, "market stream closed by peer");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(error)) => {
                                    tracing::warn!(%error, generation, "market stream frame error");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%error, generation, "market stream connect failed");
            }
        }

        if cancel.is_cancelled() || shared.is_torn_down(generation) {
            return;
        }

        if !should_retry(reconnect_attempts) {
            tracing::error!(generation, "max reconnection attempts reached");
            set_status(
                &shared,
                generation,
                ConnectionStatus::Error,
                Some("max reconnection attempts reached".to_string()),
            );
            return;
        }

        let delay_ms = backoff_delay_ms(reconnect_attempts);
        reconnect_attempts += 1;
        tracing::info!(
            delay_ms,
            attempt = reconnect_attempts,
            generation,
            "scheduling reconnect"
        );
        set_status(&shared, generation, ConnectionStatus::Connecting, None);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }
}
