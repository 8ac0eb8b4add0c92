use crate::error::EngineError;
use crate::market::types::{Kline, KlineInterval, PriceLevel, Trade, TradeSide};
use reqwest::Client;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

pub const DEPTH_SNAPSHOT_LIMIT: u16 = 20;
pub const BOOTSTRAP_TRADES_LIMIT: u16 = 50;

pub type MarketWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn combined_stream_endpoint(base_url: &str, symbol: &str, interval: KlineInterval) -> String {
    let sym = symbol.to_ascii_lowercase();
    format!(
        "{base_url}/stream?streams={sym}@kline_{}/{sym}@aggTrade/{sym}@bookTicker/{sym}@depth@100ms",
        interval.as_str()
    )
}

fn depth_endpoint(base_url: &str, symbol: &str) -> String {
    format!(
        "{base_url}/depth?symbol={}&limit={DEPTH_SNAPSHOT_LIMIT}",
        symbol.to_ascii_uppercase()
    )
}

fn klines_endpoint(base_url: &str, symbol: &str, interval: KlineInterval, limit: usize) -> String {
    format!(
        "{base_url}/klines?symbol={}&interval={}&limit={limit}",
        symbol.to_ascii_uppercase(),
        interval.as_str()
    )
}

fn trades_endpoint(base_url: &str, symbol: &str) -> String {
    format!(
        "{base_url}/trades?symbol={}&limit={BOOTSTRAP_TRADES_LIMIT}",
        symbol.to_ascii_uppercase()
    )
}

/// Opens the multiplexed kline/trade/ticker/depth socket for one symbol.
pub async fn connect_market_stream(
    base_url: &str,
    symbol: &str,
    interval: KlineInterval,
) -> Result<MarketWsStream, EngineError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(64 << 20),
        max_frame_size: Some(16 << 20),
        ..Default::default()
    };

    let request = combined_stream_endpoint(base_url, symbol, interval);
    let (stream, _) = connect_async_with_config(request, Some(ws_config), true).await?;
    Ok(stream)
}

#[derive(Debug, Deserialize)]
struct DepthSnapshotWire {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

fn snapshot_levels(raw: Vec<(String, String)>) -> Result<Vec<PriceLevel>, EngineError> {
    let mut levels = Vec::with_capacity(raw.len());
    for (price, quantity) in raw {
        let price = price.parse::<f64>()?;
        let quantity = quantity.parse::<f64>()?;
        if quantity > 0.0 {
            levels.push(PriceLevel { price, quantity });
        }
    }
    Ok(levels)
}

pub async fn fetch_depth_snapshot(
    client: &Client,
    base_url: &str,
    symbol: &str,
) -> Result<(Vec<PriceLevel>, Vec<PriceLevel>), EngineError> {
    let endpoint = depth_endpoint(base_url, symbol);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<DepthSnapshotWire>().await?;

    Ok((
        snapshot_levels(payload.bids)?,
        snapshot_levels(payload.asks)?,
    ))
}

#[derive(Debug, Deserialize)]
struct RestKlineWire(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    String,
);

impl TryFrom<RestKlineWire> for Kline {
    type Error = EngineError;

    fn try_from(value: RestKlineWire) -> Result<Self, Self::Error> {
        let open = value.1.parse::<f64>()?;
        let high = value.2.parse::<f64>()?;
        let low = value.3.parse::<f64>()?;
        let close = value.4.parse::<f64>()?;
        let volume = value.5.parse::<f64>()?;
        let quote_volume = value.7.parse::<f64>()?;
        let taker_buy_volume = value.9.parse::<f64>()?;
        let taker_buy_quote_volume = value.10.parse::<f64>()?;

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
            time: value.0,
            close_time: value.6,
            open,
            high,
            low,
            close,
            volume: volume.max(0.0),
            quote_volume: quote_volume.max(0.0),
            trade_count: value.8,
            taker_buy_volume: taker_buy_volume.max(0.0),
            taker_buy_quote_volume: taker_buy_quote_volume.max(0.0),
            is_closed: true,
        })
    }
}

pub async fn fetch_kline_history(
    client: &Client,
    base_url: &str,
    symbol: &str,
    interval: KlineInterval,
    limit: usize,
) -> Result<Vec<Kline>, EngineError> {
    let endpoint = klines_endpoint(base_url, symbol, interval, limit);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<RestKlineWire>>().await?;

    let mut klines = Vec::with_capacity(payload.len());
    for kline in payload {
        klines.push(kline.try_into()?);
    }
    Ok(klines)
}

#[derive(Debug, Deserialize)]
struct RestTradeWire {
    id: u64,
    price: String,
    qty: String,
    time: i64,
    #[serde(rename = "isBuyerMaker")]
    is_buyer_maker: bool,
}

impl TryFrom<RestTradeWire> for Trade {
    type Error = EngineError;

    fn try_from(value: RestTradeWire) -> Result<Self, Self::Error> {
        let price = value.price.parse::<f64>()?;
        let quantity = value.qty.parse::<f64>()?;
        if !price.is_finite() || !quantity.is_finite() {
            return Err(EngineError::InvalidArgument(
                "trade price/quantity must be finite".to_string(),
            ));
        }

        Ok(Self {
            id: value.id,
            time: value.time,
            price,
            quantity,
            quote_volume: price * quantity,
            side: TradeSide::from_is_buyer_maker(value.is_buyer_maker),
        })
    }
}

pub async fn fetch_recent_trades(
    client: &Client,
    base_url: &str,
    symbol: &str,
) -> Result<Vec<Trade>, EngineError> {
    let endpoint = trades_endpoint(base_url, symbol);
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let payload = response.json::<Vec<RestTradeWire>>().await?;

    let mut trades = Vec::with_capacity(payload.len());
    for trade in payload {
        trades.push(trade.try_into()?);
    }
    Ok(trades)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_endpoint_multiplexes_all_substreams() {
        let endpoint = combined_stream_endpoint(
            "wss://stream.binance.com:9443",
            "BTCUSDT",
            KlineInterval::M1,
        );

        assert!(endpoint.starts_with("wss://stream.binance.com:9443/stream?streams="));
        assert!(endpoint.contains("btcusdt@kline_1m"));
        assert!(endpoint.contains("btcusdt@aggTrade"));
        assert!(endpoint.contains("btcusdt@bookTicker"));
        assert!(endpoint.contains("btcusdt@depth@100ms"));
    }

    #[test]
    fn depth_endpoint_uses_uppercase_symbol_and_snapshot_limit() {
        let endpoint = depth_endpoint("https://api.binance.com/api/v3", "btcusdt");
        assert!(endpoint.contains("symbol=BTCUSDT"));
        assert!(endpoint.contains("limit=20"));
    }

    #[test]
    fn klines_endpoint_carries_interval_and_limit() {
        let endpoint =
            klines_endpoint("https://api.binance.com/api/v3", "btcusdt", KlineInterval::H1, 500);
        assert!(endpoint.contains("interval=1h"));
        assert!(endpoint.contains("limit=500"));
    }

    #[test]
    fn trades_endpoint_uses_bootstrap_limit() {
        let endpoint = trades_endpoint("https://api.binance.com/api/v3", "btcusdt");
        assert!(endpoint.contains("limit=50"));
    }

    #[test]
    fn snapshot_levels_skip_zero_quantity_rows() {
        let levels = snapshot_levels(vec![
            ("100.0".to_string(), "2.0".to_string()),
            ("99.9".to_string(), "0".to_string()),
        ])
        .expect("snapshot rows should parse");

        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].price, 100.0);
    }
}
