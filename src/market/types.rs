use crate::error::EngineError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_INTERVAL: KlineInterval = KlineInterval::M1;
pub const DEFAULT_VOLATILITY_THRESHOLD_PCT: f64 = 0.5;
pub const DEFAULT_MARKET_ANALYSIS_POLL_MS: u64 = 30_000;
pub const DEFAULT_LLM_ANALYSIS_POLL_MS: u64 = 60_000;
pub const DEFAULT_MARKET_SIGNALS_POLL_MS: u64 = 15_000;
pub const DEFAULT_STREAM_BASE_URL: &str = "wss://stream.binance.com:9443";
pub const DEFAULT_REST_BASE_URL: &str = "https://api.binance.com/api/v3";
pub const MAX_KLINE_HISTORY: usize = 500;
pub const MAX_TRADE_HISTORY: usize = 100;
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 600_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum KlineInterval {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
}

impl KlineInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S1 => "1s",
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn from_is_buyer_maker(is_buyer_maker: bool) -> Self {
        // The aggressor took the ask when the buyer was the maker.
        if is_buyer_maker {
            Self::Sell
        } else {
            Self::Buy
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub bid_price: f64,
    pub bid_qty: f64,
    pub ask_price: f64,
    pub ask_qty: f64,
    pub spread: f64,
    pub spread_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Kline {
    pub time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub is_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: u64,
    pub time: i64,
    pub price: f64,
    pub quantity: f64,
    pub quote_volume: f64,
    pub side: TradeSide,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

/// One incremental depth update with absolute quantities per price level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DepthDelta {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub trades_received: u64,
    pub klines_received: u64,
    pub book_updates: u64,
    pub messages_per_second: u64,
    pub connected_at_ms: Option<i64>,
    pub last_update_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum MarketEvent {
    Kline(Kline),
    Trade(Trade),
    Ticker(Ticker),
    Depth(DepthDelta),
    Ignored,
}

#[derive(Debug, Deserialize)]
struct CombinedFrameWire {
    stream: String,
    data: simd_json::OwnedValue,
}

#[derive(Debug, Deserialize)]
pub struct KlineEventWire {
    #[serde(rename = "k")]
    pub kline: KlinePayloadWire,
}

#[derive(Debug, Deserialize)]
pub struct KlinePayloadWire {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "n")]
    pub trade_count: u64,
    #[serde(rename = "V")]
    pub taker_buy_volume: String,
    #[serde(rename = "Q")]
    pub taker_buy_quote_volume: String,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

impl TryFrom<KlineEventWire> for Kline {
    type Error = EngineError;

    fn try_from(value: KlineEventWire) -> Result<Self, Self::Error> {
        let k = value.kline;
        let open = k.open.parse::<f64>()?;
        let high = k.high.parse::<f64>()?;
        let low = k.low.parse::<f64>()?;
        let close = k.close.parse::<f64>()?;
        let volume = k.volume.parse::<f64>()?;
        let quote_volume = k.quote_volume.parse::<f64>()?;
        let taker_buy_volume = k.taker_buy_volume.parse::<f64>()?;
        let taker_buy_quote_volume = k.taker_buy_quote_volume.parse::<f64>()?;

        if !open.is_finite()
            || !high.is_finite()
            || !low.is_finite()
            || !close.is_finite()
            || !volume.is_finite()
        {
            return Err(EngineError::InvalidArgument(
                "kline values must be finite".to_string(),
            ));
        }

        Ok(Self {
            time: k.open_time,
            close_time: k.close_time,
            open,
            high,
            low,
            close,
            volume: volume.max(0.0),
            quote_volume: quote_volume.max(0.0),
            trade_count: k.trade_count,
            taker_buy_volume: taker_buy_volume.max(0.0),
            taker_buy_quote_volume: taker_buy_quote_volume.max(0.0),
            is_closed: k.is_closed,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AggTradeWire {
    #[serde(rename = "a")]
    pub aggregate_trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl TryFrom<AggTradeWire> for Trade {
    type Error = EngineError;

    fn try_from(value: AggTradeWire) -> Result<Self, Self::Error> {
        let price = value.price.parse::<f64>()?;
        let quantity = value.quantity.parse::<f64>()?;
        if !price.is_finite() || !quantity.is_finite() || quantity < 0.0 {
            return Err(EngineError::InvalidArgument(
                "trade price/quantity must be finite and quantity non-negative".to_string(),
            ));
        }

        Ok(Self {
            id: value.aggregate_trade_id,
            time: value.trade_time,
            price,
            quantity,
            quote_volume: price * quantity,
            side: TradeSide::from_is_buyer_maker(value.is_buyer_maker),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct BookTickerWire {
    #[serde(rename = "b")]
    pub bid_price: String,
    #[serde(rename = "B")]
    pub bid_qty: String,
    #[serde(rename = "a")]
    pub ask_price: String,
    #[serde(rename = "A")]
    pub ask_qty: String,
}

impl TryFrom<BookTickerWire> for Ticker {
    type Error = EngineError;

    fn try_from(value: BookTickerWire) -> Result<Self, Self::Error> {
        let bid_price = value.bid_price.parse::<f64>()?;
        let bid_qty = value.bid_qty.parse::<f64>()?;
        let ask_price = value.ask_price.parse::<f64>()?;
        let ask_qty = value.ask_qty.parse::<f64>()?;
        if !bid_price.is_finite() || !ask_price.is_finite() {
            return Err(EngineError::InvalidArgument(
                "book ticker prices must be finite".to_string(),
            ));
        }

        let spread = ask_price - bid_price;
        let spread_pct = if bid_price > 0.0 {
            spread / bid_price
        } else {
            0.0
        };

        Ok(Self {
            bid_price,
            bid_qty,
            ask_price,
            ask_qty,
            spread,
            spread_pct,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DepthWire {
    #[serde(rename = "b", default)]
    pub bids: Vec<(String, String)>,
    #[serde(rename = "a", default)]
    pub asks: Vec<(String, String)>,
}

fn parse_levels(raw: Vec<(String, String)>) -> Result<Vec<(f64, f64)>, EngineError> {
    let mut levels = Vec::with_capacity(raw.len());
    for (price, quantity) in raw {
        let price = price.parse::<f64>()?;
        let quantity = quantity.parse::<f64>()?;
        if !price.is_finite() || !quantity.is_finite() || quantity < 0.0 {
            return Err(EngineError::InvalidArgument(
                "depth level price/quantity must be finite and quantity non-negative".to_string(),
            ));
        }
        levels.push((price, quantity));
    }
    Ok(levels)
}

impl TryFrom<DepthWire> for DepthDelta {
    type Error = EngineError;

    fn try_from(value: DepthWire) -> Result<Self, Self::Error> {
        Ok(Self {
            bids: parse_levels(value.bids)?,
            asks: parse_levels(value.asks)?,
        })
    }
}

/// Decodes one combined-stream frame and dispatches on the stream-tag suffix.
/// Frames for unrecognized sub-streams decode to [`MarketEvent::Ignored`].
pub fn parse_stream_frame(payload: &mut [u8]) -> Result<MarketEvent, EngineError> {
    let wire: CombinedFrameWire = simd_json::serde::from_slice(payload)?;
    let CombinedFrameWire { stream, data } = wire;

    if stream.contains("@kline_") {
        let kline: KlineEventWire = simd_json::serde::from_owned_value(data)?;
        Ok(MarketEvent::Kline(kline.try_into()?))
    } else if stream.ends_with("@aggTrade") {
        let trade: AggTradeWire = simd_json::serde::from_owned_value(data)?;
        Ok(MarketEvent::Trade(trade.try_into()?))
    } else if stream.ends_with("@bookTicker") {
        let ticker: BookTickerWire = simd_json::serde::from_owned_value(data)?;
        Ok(MarketEvent::Ticker(ticker.try_into()?))
    } else if stream.contains("@depth") {
        let depth: DepthWire = simd_json::serde::from_owned_value(data)?;
        Ok(MarketEvent::Depth(depth.try_into()?))
    } else {
        Ok(MarketEvent::Ignored)
    }
}

/// Notification toggles injected from externally persisted preferences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub signal_alerts: bool,
    pub volatility_alerts: bool,
    pub prediction_alerts: bool,
    pub sound: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            signal_alerts: true,
            volatility_alerts: true,
            prediction_alerts: true,
            sound: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineArgs {
    pub symbol: Option<String>,
    pub interval: Option<KlineInterval>,
    pub stream_base_url: Option<String>,
    pub rest_base_url: Option<String>,
    pub analytics_base_url: Option<String>,
    pub volatility_threshold_pct: Option<f64>,
    pub market_analysis_poll_ms: Option<u64>,
    pub llm_analysis_poll_ms: Option<u64>,
    pub market_signals_poll_ms: Option<u64>,
    pub preferences: Option<NotificationPreferences>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    pub interval: KlineInterval,
    pub stream_base_url: String,
    pub rest_base_url: String,
    pub analytics_base_url: Option<String>,
    pub volatility_threshold_pct: f64,
    pub market_analysis_poll_ms: u64,
    pub llm_analysis_poll_ms: u64,
    pub market_signals_poll_ms: u64,
    pub preferences: NotificationPreferences,
}

fn validate_poll_interval(name: &str, value: u64) -> Result<u64, EngineError> {
    if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&value) {
        return Err(EngineError::InvalidArgument(format!(
            "{name} must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS}"
        )));
    }
    Ok(value)
}

pub fn validate_symbol(raw: &str) -> Result<String, EngineError> {
    let symbol = raw.trim().to_ascii_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(EngineError::InvalidArgument(
            "symbol must be non-empty alphanumeric ASCII".to_string(),
        ));
    }
    Ok(symbol)
}

impl EngineArgs {
    pub fn normalize(self) -> Result<EngineConfig, EngineError> {
        let symbol = validate_symbol(&self.symbol.unwrap_or_else(|| DEFAULT_SYMBOL.to_string()))?;

        let volatility_threshold_pct = self
            .volatility_threshold_pct
            .unwrap_or(DEFAULT_VOLATILITY_THRESHOLD_PCT);
        if !volatility_threshold_pct.is_finite() || volatility_threshold_pct <= 0.0 {
            return Err(EngineError::InvalidArgument(
                "volatilityThresholdPct must be a finite positive number".to_string(),
            ));
        }

        let market_analysis_poll_ms = validate_poll_interval(
            "marketAnalysisPollMs",
            self.market_analysis_poll_ms
                .unwrap_or(DEFAULT_MARKET_ANALYSIS_POLL_MS),
        )?;
        let llm_analysis_poll_ms = validate_poll_interval(
            "llmAnalysisPollMs",
            self.llm_analysis_poll_ms
                .unwrap_or(DEFAULT_LLM_ANALYSIS_POLL_MS),
        )?;
        let market_signals_poll_ms = validate_poll_interval(
            "marketSignalsPollMs",
            self.market_signals_poll_ms
                .unwrap_or(DEFAULT_MARKET_SIGNALS_POLL_MS),
        )?;

        Ok(EngineConfig {
            symbol,
            interval: self.interval.unwrap_or(DEFAULT_INTERVAL),
            stream_base_url: self
                .stream_base_url
                .unwrap_or_else(|| DEFAULT_STREAM_BASE_URL.to_string()),
            rest_base_url: self
                .rest_base_url
                .unwrap_or_else(|| DEFAULT_REST_BASE_URL.to_string()),
            analytics_base_url: self.analytics_base_url,
            volatility_threshold_pct,
            market_analysis_poll_ms,
            llm_analysis_poll_ms,
            market_signals_poll_ms,
            preferences: self.preferences.unwrap_or_default(),
        })
    }
}
