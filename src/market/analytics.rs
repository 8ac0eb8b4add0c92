use crate::error::EngineError;
use crate::market::alerts::{prediction_transition, signal_transition, NotificationEvent};
use crate::market::types::NotificationPreferences;
use crate::state::MarketState;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub const LLM_ANALYSIS_FETCH_LIMIT: usize = 5;
pub const MARKET_SIGNALS_FETCH_LIMIT: usize = 20;

/// Per-resource poll outcome. `NotConfigured` (HTTP 503 upstream) is a
/// first-class state, not an error: the resource may come online later and
/// polling continues on schedule without retry noise.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AnalyticsResourceStatus {
    #[default]
    Idle,
    Ok,
    NotConfigured,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    pub id: i64,
    pub signal_type: String,
    pub summary: String,
    pub generated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmAnalysis {
    pub id: i64,
    pub model: String,
    pub prediction: String,
    pub summary: String,
    pub generated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketSignal {
    pub id: i64,
    pub signal_type: String,
    pub summary: String,
    pub generated_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsState {
    pub market_analysis: Option<MarketAnalysis>,
    pub market_analysis_status: AnalyticsResourceStatus,
    pub llm_analysis: Option<LlmAnalysis>,
    pub llm_analysis_status: AnalyticsResourceStatus,
    pub signals: Vec<MarketSignal>,
    pub signals_status: AnalyticsResourceStatus,
    // Identity keys for change detection only; not part of the snapshot.
    #[serde(skip)]
    pub last_signal_type: Option<String>,
    #[serde(skip)]
    pub last_prediction_id: Option<i64>,
}

#[derive(Debug, PartialEq)]
pub enum FetchOutcome<T> {
    Fetched(T),
    NotConfigured,
}

pub fn apply_market_analysis(
    analytics: &mut AnalyticsState,
    outcome: FetchOutcome<MarketAnalysis>,
) {
    match outcome {
        FetchOutcome::Fetched(analysis) => {
            analytics.market_analysis = Some(analysis);
            analytics.market_analysis_status = AnalyticsResourceStatus::Ok;
        }
        FetchOutcome::NotConfigured => {
            analytics.market_analysis_status = AnalyticsResourceStatus::NotConfigured;
        }
    }
}

/// Applies an llm-analysis refresh; only the newest entry is kept. Returns a
/// new-prediction event when the newest identity changed.
pub fn apply_llm_analysis(
    analytics: &mut AnalyticsState,
    outcome: FetchOutcome<Vec<LlmAnalysis>>,
) -> Option<NotificationEvent> {
    match outcome {
        FetchOutcome::Fetched(entries) => {
            analytics.llm_analysis_status = AnalyticsResourceStatus::Ok;
            let latest = entries.into_iter().next()?;
            let event = prediction_transition(analytics.last_prediction_id, &latest);
            analytics.last_prediction_id = Some(latest.id);
            analytics.llm_analysis = Some(latest);
            event
        }
        FetchOutcome::NotConfigured => {
            analytics.llm_analysis_status = AnalyticsResourceStatus::NotConfigured;
            None
        }
    }
}

/// Applies a market-signals refresh. Returns a signal-change event when the
/// newest signal-type identity differs from the previously observed one.
pub fn apply_market_signals(
    analytics: &mut AnalyticsState,
    outcome: FetchOutcome<Vec<MarketSignal>>,
) -> Option<NotificationEvent> {
    match outcome {
        FetchOutcome::Fetched(signals) => {
            analytics.signals_status = AnalyticsResourceStatus::Ok;
            let event = signals.first().and_then(|latest| {
                let event = signal_transition(analytics.last_signal_type.as_deref(), latest);
                analytics.last_signal_type = Some(latest.signal_type.clone());
                event
            });
            analytics.signals = signals;
            event
        }
        FetchOutcome::NotConfigured => {
            analytics.signals_status = AnalyticsResourceStatus::NotConfigured;
            None
        }
    }
}

async fn fetch_resource<T: serde::de::DeserializeOwned>(
    client: &Client,
    endpoint: String,
) -> Result<FetchOutcome<T>, EngineError> {
    let response = client.get(endpoint).send().await?;
    if response.status() == StatusCode::SERVICE_UNAVAILABLE {
        return Ok(FetchOutcome::NotConfigured);
    }
    let response = response.error_for_status()?;
    Ok(FetchOutcome::Fetched(response.json::<T>().await?))
}

async fn fetch_market_analysis(
    client: &Client,
    base_url: &str,
) -> Result<FetchOutcome<MarketAnalysis>, EngineError> {
    fetch_resource(client, format!("{base_url}/api/ml/market-analysis")).await
}

async fn fetch_llm_analysis(
    client: &Client,
    base_url: &str,
) -> Result<FetchOutcome<Vec<LlmAnalysis>>, EngineError> {
    fetch_resource(
        client,
        format!("{base_url}/api/ml/llm-analysis?limit={LLM_ANALYSIS_FETCH_LIMIT}"),
    )
    .await
}

async fn fetch_market_signals(
    client: &Client,
    base_url: &str,
) -> Result<FetchOutcome<Vec<MarketSignal>>, EngineError> {
    fetch_resource(
        client,
        format!("{base_url}/api/ml/market-signals?limit={MARKET_SIGNALS_FETCH_LIMIT}"),
    )
    .await
}

pub(crate) struct AnalyticsContext {
    pub state: Arc<Mutex<MarketState>>,
    pub events: broadcast::Sender<NotificationEvent>,
    pub client: Client,
    pub base_url: String,
    pub preferences: NotificationPreferences,
    pub market_analysis_poll_ms: u64,
    pub llm_analysis_poll_ms: u64,
    pub market_signals_poll_ms: u64,
}

/// Runs the three analytic resources on independent timers. Each resource
/// fetches immediately on start; failures never block or cancel siblings.
pub struct AnalyticsPoller {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl AnalyticsPoller {
    pub(crate) fn start(context: AnalyticsContext) -> Self {
        let cancel = CancellationToken::new();
        let context = Arc::new(context);

        let market_analysis = spawn_poll_task(
            Arc::clone(&context),
            cancel.clone(),
            context.market_analysis_poll_ms,
            |context| async move {
                let outcome = fetch_market_analysis(&context.client, &context.base_url).await;
                match outcome {
                    Ok(outcome) => {
                        let mut state = context.state.lock();
                        apply_market_analysis(&mut state.analytics, outcome);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "market-analysis fetch failed");
                        context.state.lock().analytics.market_analysis_status =
                            AnalyticsResourceStatus::Error;
                    }
                }
            },
        );

        let llm_analysis = spawn_poll_task(
            Arc::clone(&context),
            cancel.clone(),
            context.llm_analysis_poll_ms,
            |context| async move {
                let outcome = fetch_llm_analysis(&context.client, &context.base_url).await;
                match outcome {
                    Ok(outcome) => {
                        let event = {
                            let mut state = context.state.lock();
                            apply_llm_analysis(&mut state.analytics, outcome)
                        };
                        if context.preferences.prediction_alerts {
                            if let Some(event) = event {
                                let _ = context.events.send(event);
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "llm-analysis fetch failed");
                        context.state.lock().analytics.llm_analysis_status =
                            AnalyticsResourceStatus::Error;
                    }
                }
            },
        );

        let market_signals = spawn_poll_task(
            Arc::clone(&context),
            cancel.clone(),
            context.market_signals_poll_ms,
            |context| async move {
                let outcome = fetch_market_signals(&context.client, &context.base_url).await;
                match outcome {
                    Ok(outcome) => {
                        let event = {
                            let mut state = context.state.lock();
                            apply_market_signals(&mut state.analytics, outcome)
                        };
                        if context.preferences.signal_alerts {
                            if let Some(event) = event {
                                let _ = context.events.send(event);
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%error, "market-signals fetch failed");
                        context.state.lock().analytics.signals_status =
                            AnalyticsResourceStatus::Error;
                    }
                }
            },
        );

        Self {
            cancel,
            handles: vec![market_analysis, llm_analysis, market_signals],
        }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

fn spawn_poll_task<F, Fut>(
    context: Arc<AnalyticsContext>,
    cancel: CancellationToken,
    poll_ms: u64,
    refresh: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<AnalyticsContext>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => refresh(Arc::clone(&context)).await,
            }
        }
    })
}
