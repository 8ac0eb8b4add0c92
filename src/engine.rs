use crate::error::EngineError;
use crate::market::alerts::NotificationEvent;
use crate::market::analytics::{AnalyticsContext, AnalyticsPoller};
use crate::market::pipeline::{run_bootstrap, run_market_session, EngineShared};
use crate::market::types::{validate_symbol, ConnectionStatus, EngineArgs, KlineInterval};
use crate::state::MarketSnapshot;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause between tearing down the old stream and dialing the new one when the
/// subscription changes, so the closing socket fully unwinds first.
const SUBSCRIPTION_SWITCH_SETTLE_MS: u64 = 100;

struct SessionHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Public entry point: owns the shared runtime context and the lifecycles of
/// the stream session and the analytics poller.
pub struct MarketEngine {
    shared: Arc<EngineShared>,
    session: Mutex<Option<SessionHandle>>,
    analytics: Mutex<Option<AnalyticsPoller>>,
}

impl MarketEngine {
    pub fn new(args: EngineArgs) -> Result<Self, EngineError> {
        let config = args.normalize()?;
        Ok(Self {
            shared: EngineShared::new(config),
            session: Mutex::new(None),
            analytics: Mutex::new(None),
        })
    }

    /// Starts the market stream session. Calling while a session is running
    /// is a no-op; the existing session keeps going. A session that exhausted
    /// its retry budget leaves a finished handle behind, which counts as
    /// absent so reconnecting out of the terminal error state works.
    pub async fn connect(&self) {
        let mut session = self.session.lock().await;
        if session
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
        {
            return;
        }
        *session = None;

        self.shared
            .manual_disconnect
            .store(false, Ordering::SeqCst);
        let generation = self.shared.next_generation();
        {
            let mut state = self.shared.state.lock();
            state.status = ConnectionStatus::Connecting;
            state.connection_error = None;
        }

        run_bootstrap(&self.shared, generation).await;

        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_market_session(
            Arc::clone(&self.shared),
            generation,
            cancel.clone(),
        ));
        *session = Some(SessionHandle { cancel, join });
    }

    /// Stops the stream session and settles in `Disconnected` with no error.
    /// Safe to call when not connected.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        let Some(handle) = session.take() else {
            return;
        };

        self.shared.manual_disconnect.store(true, Ordering::SeqCst);
        self.shared.next_generation();
        handle.cancel.cancel();
        let _ = handle.join.await;

        let mut state = self.shared.state.lock();
        state.status = ConnectionStatus::Disconnected;
        state.connection_error = None;
    }

    /// Switches the traded symbol: clears all market data, tears the current
    /// session down and reconnects with a fresh retry budget. A no-op when the
    /// normalized symbol is unchanged.
    pub async fn change_symbol(&self, symbol: &str) -> Result<(), EngineError> {
        let symbol = validate_symbol(symbol)?;
        {
            let mut config = self.shared.config.lock();
            if config.symbol == symbol {
                return Ok(());
            }
            config.symbol = symbol;
        }

        self.resubscribe().await;
        Ok(())
    }

    /// Switches the kline interval. Same lifecycle as a symbol change.
    pub async fn change_interval(&self, interval: KlineInterval) -> Result<(), EngineError> {
        {
            let mut config = self.shared.config.lock();
            if config.interval == interval {
                return Ok(());
            }
            config.interval = interval;
        }

        self.resubscribe().await;
        Ok(())
    }

    async fn resubscribe(&self) {
        let was_connected = self.session.lock().await.is_some();
        self.shared.next_generation();
        self.shared.state.lock().reset_market_data();

        if was_connected {
            self.disconnect().await;
            tokio::time::sleep(Duration::from_millis(SUBSCRIPTION_SWITCH_SETTLE_MS)).await;
            self.connect().await;
        }
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.shared.state.lock().snapshot()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    /// Subscribes to notification events. Slow receivers may observe a lagged
    /// error and miss events; the engine never blocks on delivery.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.shared.events.subscribe()
    }

    /// Starts the derived-analytics poller. A no-op when no analytics base url
    /// is configured or the poller is already running.
    pub async fn start_analytics(&self) {
        let mut analytics = self.analytics.lock().await;
        if analytics.is_some() {
            return;
        }

        let context = {
            let config = self.shared.config.lock();
            let Some(base_url) = config.analytics_base_url.clone() else {
                tracing::info!("analytics base url not configured, poller not started");
                return;
            };
            AnalyticsContext {
                state: Arc::clone(&self.shared.state),
                events: self.shared.events.clone(),
                client: self.shared.http.clone(),
                base_url,
                preferences: config.preferences,
                market_analysis_poll_ms: config.market_analysis_poll_ms,
                llm_analysis_poll_ms: config.llm_analysis_poll_ms,
                market_signals_poll_ms: config.market_signals_poll_ms,
            }
        };

        *analytics = Some(AnalyticsPoller::start(context));
    }

    /// Stops the analytics poller. Safe to call when it was never started.
    pub async fn stop_analytics(&self) {
        let poller = self.analytics.lock().await.take();
        if let Some(poller) = poller {
            poller.stop().await;
        }
    }

    /// Current traded symbol, normalized.
    pub fn symbol(&self) -> String {
        self.shared.config.lock().symbol.clone()
    }

    pub fn interval(&self) -> KlineInterval {
        self.shared.config.lock().interval
    }
}

impl Drop for MarketEngine {
    fn drop(&mut self) {
        // Tasks observe the cancelled tokens and stale generation and exit on
        // their own; nothing to await here.
        if let Some(handle) = self.session.get_mut().take() {
            handle.cancel.cancel();
        }
        self.shared.manual_disconnect.store(true, Ordering::SeqCst);
    }
}
