use crate::market::analytics::AnalyticsState;
use crate::market::book::OrderBook;
use crate::market::history::{KlineHistory, TradeHistory};
use crate::market::types::{
    ConnectionStatus, Kline, PriceLevel, StreamStats, Ticker, Trade, MAX_KLINE_HISTORY,
    MAX_TRADE_HISTORY,
};
use serde::Serialize;

/// Mutable state owned by the engine. Observers never touch this directly;
/// they read [`MarketSnapshot`] copies or subscribe to notification events.
#[derive(Debug)]
pub struct MarketState {
    pub ticker: Ticker,
    pub live_kline: Option<Kline>,
    pub kline_history: KlineHistory,
    pub trades: TradeHistory,
    pub book: OrderBook,
    pub stats: StreamStats,
    pub status: ConnectionStatus,
    pub connection_error: Option<String>,
    pub analytics: AnalyticsState,
}

impl Default for MarketState {
    fn default() -> Self {
        Self {
            ticker: Ticker::default(),
            live_kline: None,
            kline_history: KlineHistory::new(MAX_KLINE_HISTORY),
            trades: TradeHistory::new(MAX_TRADE_HISTORY),
            book: OrderBook::default(),
            stats: StreamStats::default(),
            status: ConnectionStatus::Disconnected,
            connection_error: None,
            analytics: AnalyticsState::default(),
        }
    }
}

impl MarketState {
    /// Clears everything tied to the traded symbol/interval. Analytics are
    /// symbol-independent and survive the reset.
    pub fn reset_market_data(&mut self) {
        self.ticker = Ticker::default();
        self.live_kline = None;
        self.kline_history.clear();
        self.trades.clear();
        self.book.clear();
        self.stats = StreamStats::default();
    }

    /// Best available reference price: live kline close, else best bid.
    pub fn last_price(&self) -> Option<f64> {
        let close = self
            .live_kline
            .as_ref()
            .map(|kline| kline.close)
            .filter(|close| *close > 0.0);
        close.or_else(|| Some(self.ticker.bid_price).filter(|bid| *bid > 0.0))
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        MarketSnapshot {
            status: self.status,
            connection_error: self.connection_error.clone(),
            ticker: self.ticker,
            live_kline: self.live_kline.clone(),
            kline_history: self.kline_history.snapshot(),
            trades: self.trades.snapshot(),
            bids: self.book.bids().to_vec(),
            asks: self.book.asks().to_vec(),
            imbalance: self.book.imbalance(),
            stats: self.stats.clone(),
            analytics: self.analytics.clone(),
        }
    }
}

/// Read-only point-in-time copy of the engine state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub status: ConnectionStatus,
    pub connection_error: Option<String>,
    pub ticker: Ticker,
    pub live_kline: Option<Kline>,
    pub kline_history: Vec<Kline>,
    pub trades: Vec<Trade>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub imbalance: f64,
    pub stats: StreamStats,
    pub analytics: AnalyticsState,
}

impl MarketSnapshot {
    pub fn price_change_percent(&self) -> f64 {
        match &self.live_kline {
            Some(kline) if kline.open > 0.0 => (kline.close - kline.open) / kline.open * 100.0,
            _ => 0.0,
        }
    }

    pub fn buy_ratio_percent(&self) -> f64 {
        match &self.live_kline {
            Some(kline) if kline.quote_volume > 0.0 => {
                kline.taker_buy_quote_volume / kline.quote_volume * 100.0
            }
            _ => 50.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::TradeSide;

    fn live_kline(open: f64, close: f64) -> Kline {
        Kline {
            time: 60_000,
            close_time: 119_999,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: 10.0,
            quote_volume: 1_000.0,
            trade_count: 5,
            taker_buy_volume: 6.0,
            taker_buy_quote_volume: 600.0,
            is_closed: false,
        }
    }

    #[test]
    fn reset_clears_market_slices_but_keeps_analytics() {
        let mut state = MarketState::default();
        state.live_kline = Some(live_kline(100.0, 101.0));
        state.trades.push(Trade {
            id: 1,
            time: 1,
            price: 100.0,
            quantity: 1.0,
            quote_volume: 100.0,
            side: TradeSide::Buy,
        });
        state.stats.trades_received = 1;
        state.analytics.last_signal_type = Some("bullish".to_string());

        state.reset_market_data();

        assert!(state.live_kline.is_none());
        assert!(state.trades.is_empty());
        assert_eq!(state.stats.trades_received, 0);
        assert_eq!(state.analytics.last_signal_type.as_deref(), Some("bullish"));
    }

    #[test]
    fn last_price_prefers_live_kline_close() {
        let mut state = MarketState::default();
        state.ticker.bid_price = 99.0;
        state.live_kline = Some(live_kline(100.0, 101.0));

        assert_eq!(state.last_price(), Some(101.0));
    }

    #[test]
    fn last_price_falls_back_to_bid_then_none() {
        let mut state = MarketState::default();
        assert_eq!(state.last_price(), None);

        state.ticker.bid_price = 99.0;
        assert_eq!(state.last_price(), Some(99.0));
    }

    #[test]
    fn snapshot_derives_price_change_and_buy_ratio() {
        let mut state = MarketState::default();
        state.live_kline = Some(live_kline(100.0, 101.0));
        let snapshot = state.snapshot();

        assert!((snapshot.price_change_percent() - 1.0).abs() < 1e-9);
        assert!((snapshot.buy_ratio_percent() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn empty_snapshot_has_neutral_derived_values() {
        let snapshot = MarketState::default().snapshot();
        assert_eq!(snapshot.price_change_percent(), 0.0);
        assert_eq!(snapshot.buy_ratio_percent(), 50.0);
        assert_eq!(snapshot.imbalance, 0.0);
    }
}
