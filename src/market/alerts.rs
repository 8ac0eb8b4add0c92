use crate::market::analytics::{LlmAnalysis, MarketSignal};
use serde::Serialize;
use std::collections::VecDeque;

pub const PRICE_WINDOW_MS: i64 = 60_000;
pub const MIN_WINDOW_SPAN_MS: i64 = 10_000;
pub const VOLATILITY_TICK_MS: u64 = 1_000;

/// Fire-and-forget events for the notification boundary. Delivery mechanics
/// (browser push, sounds) live outside the engine.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum NotificationEvent {
    VolatilityAlert {
        price: f64,
        change_pct: f64,
        window_ms: i64,
    },
    SignalChange {
        previous: Option<String>,
        current: String,
        summary: String,
    },
    NewPrediction {
        model: String,
        summary: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub price: f64,
    pub timestamp_ms: i64,
}

/// Rolling 60s price window sampled on a 1s cadence. Emitting an alert resets
/// the window to the current sample, debouncing repeats for the same move.
#[derive(Debug, Default)]
pub struct VolatilityWindow {
    samples: VecDeque<PriceSample>,
}

impl VolatilityWindow {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn record(
        &mut self,
        price: f64,
        now_ms: i64,
        threshold_pct: f64,
    ) -> Option<NotificationEvent> {
        self.samples.push_back(PriceSample {
            price,
            timestamp_ms: now_ms,
        });
        while self
            .samples
            .front()
            .is_some_and(|sample| now_ms - sample.timestamp_ms > PRICE_WINDOW_MS)
        {
            self.samples.pop_front();
        }

        if self.samples.len() < 2 {
            return None;
        }

        let oldest = *self.samples.front()?;
        let window_ms = now_ms - oldest.timestamp_ms;
        if window_ms < MIN_WINDOW_SPAN_MS || oldest.price <= 0.0 {
            return None;
        }

        let change_pct = (price - oldest.price) / oldest.price * 100.0;
        if change_pct.abs() < threshold_pct {
            return None;
        }

        self.samples.clear();
        self.samples.push_back(PriceSample {
            price,
            timestamp_ms: now_ms,
        });

        Some(NotificationEvent::VolatilityAlert {
            price,
            change_pct,
            window_ms,
        })
    }
}

/// Compares the previously observed signal-type identity to the newest fetch.
pub fn signal_transition(
    previous: Option<&str>,
    latest: &MarketSignal,
) -> Option<NotificationEvent> {
    if previous == Some(latest.signal_type.as_str()) {
        return None;
    }

    Some(NotificationEvent::SignalChange {
        previous: previous.map(str::to_string),
        current: latest.signal_type.clone(),
        summary: latest.summary.clone(),
    })
}

/// A new llm-analysis identity means a fresh model prediction.
pub fn prediction_transition(
    previous_id: Option<i64>,
    latest: &LlmAnalysis,
) -> Option<NotificationEvent> {
    if previous_id == Some(latest.id) {
        return None;
    }

    Some(NotificationEvent::NewPrediction {
        model: latest.model.clone(),
        summary: latest.summary.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(signal_type: &str) -> MarketSignal {
        MarketSignal {
            id: 1,
            signal_type: signal_type.to_string(),
            summary: format!("{signal_type} conditions"),
            generated_at_ms: 0,
        }
    }

    fn prediction(id: i64) -> LlmAnalysis {
        LlmAnalysis {
            id,
            model: "test-model".to_string(),
            prediction: "up".to_string(),
            summary: "summary".to_string(),
            generated_at_ms: 0,
        }
    }

    #[test]
    fn emits_single_alert_once_window_spans_ten_seconds() {
        let mut window = VolatilityWindow::default();

        assert!(window.record(100.0, 0, 0.5).is_none());
        // Same move observed before the 10s floor stays silent.
        assert!(window.record(100.6, 9_000, 0.5).is_none());

        let alert = window
            .record(100.6, 12_000, 0.5)
            .expect("0.6% move over 12s should alert");
        let NotificationEvent::VolatilityAlert {
            change_pct,
            window_ms,
            ..
        } = alert
        else {
            panic!("expected volatility alert");
        };
        assert!((change_pct - 0.6).abs() < 1e-9);
        assert_eq!(window_ms, 12_000);
    }

    #[test]
    fn alert_resets_window_to_current_sample() {
        let mut window = VolatilityWindow::default();
        window.record(100.0, 0, 0.5);
        window
            .record(100.6, 12_000, 0.5)
            .expect("first crossing should alert");

        assert_eq!(window.len(), 1);
        // The same level shortly after does not re-alert.
        assert!(window.record(100.6, 13_000, 0.5).is_none());
    }

    #[test]
    fn sub_threshold_move_stays_silent() {
        let mut window = VolatilityWindow::default();
        window.record(100.0, 0, 0.5);
        assert!(window.record(100.3, 15_000, 0.5).is_none());
    }

    #[test]
    fn samples_older_than_window_are_pruned() {
        let mut window = VolatilityWindow::default();
        window.record(100.0, 0, 50.0);
        window.record(100.0, 61_000, 50.0);

        assert_eq!(window.len(), 1);
    }

    #[test]
    fn downward_moves_alert_with_negative_change() {
        let mut window = VolatilityWindow::default();
        window.record(100.0, 0, 0.5);

        let alert = window
            .record(99.0, 12_000, 0.5)
            .expect("-1% move should alert");
        let NotificationEvent::VolatilityAlert { change_pct, .. } = alert else {
            panic!("expected volatility alert");
        };
        assert!(change_pct < 0.0);
    }

    #[test]
    fn signal_transition_fires_on_identity_change_only() {
        assert!(signal_transition(None, &signal("bullish")).is_some());
        assert!(signal_transition(Some("bearish"), &signal("bullish")).is_some());
        assert!(signal_transition(Some("bullish"), &signal("bullish")).is_none());
    }

    #[test]
    fn signal_transition_carries_old_and_new_types() {
        let event = signal_transition(Some("bearish"), &signal("bullish"))
            .expect("transition should emit");
        assert_eq!(
            event,
            NotificationEvent::SignalChange {
                previous: Some("bearish".to_string()),
                current: "bullish".to_string(),
                summary: "bullish conditions".to_string(),
            }
        );
    }

    #[test]
    fn prediction_transition_fires_on_new_identity() {
        assert!(prediction_transition(None, &prediction(1)).is_some());
        assert!(prediction_transition(Some(1), &prediction(1)).is_none());
        assert!(prediction_transition(Some(1), &prediction(2)).is_some());
    }
}
