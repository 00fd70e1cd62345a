/*
[INPUT]:  Push frames and REST history payloads (serde_json values)
[OUTPUT]: Typed kline, trade and depth records
[POS]:    Data layer - market payload shapes and channel routing
[UPDATE]: When adding channel kinds or payload fields
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FeedError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub ch: String,
    pub ts: u64,
    pub tick: KlineTick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineTick {
    pub id: u64,
    pub amount: f64,
    pub count: u64,
    pub open: f64,
    pub close: f64,
    pub low: f64,
    pub high: f64,
    pub vol: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ch: String,
    pub ts: u64,
    pub tick: TradeTick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub id: u64,
    pub ts: u64,
    #[serde(default)]
    pub data: Vec<TradeItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeItem {
    pub id: u64,
    pub ts: u64,
    pub direction: String,
    pub amount: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depth {
    pub ch: String,
    pub ts: u64,
    pub tick: DepthTick,
}

/// Price levels as `[price, amount]` pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthTick {
    #[serde(default)]
    pub bids: Vec<[f64; 2]>,
    #[serde(default)]
    pub asks: Vec<[f64; 2]>,
}

impl DepthTick {
    pub fn best_bid(&self) -> Option<[f64; 2]> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<[f64; 2]> {
        self.asks.first().copied()
    }
}

pub fn decode_kline(payload: &Value) -> Result<Kline> {
    Ok(Kline::deserialize(payload)?)
}

pub fn decode_trade(payload: &Value) -> Result<Trade> {
    Ok(Trade::deserialize(payload)?)
}

pub fn decode_depth(payload: &Value) -> Result<Depth> {
    Ok(Depth::deserialize(payload)?)
}

/// Market channel parsed from its dotted name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// `market.<symbol>.kline.<period>`
    Kline { symbol: String, period: String },
    /// `market.<symbol>.trade.detail`
    Trade { symbol: String },
    /// `market.<symbol>.depth.<step>`
    Depth { symbol: String, step: String },
}

/// A decoded push, tagged by channel kind
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Kline(Kline),
    Trade(Trade),
    Depth(Depth),
}

impl ChannelKind {
    pub fn from_channel(channel: &str) -> Option<Self> {
        let mut parts = channel.split('.');
        if parts.next()? != "market" {
            return None;
        }
        let symbol = parts.next().filter(|s| !s.is_empty())?.to_string();
        let kind = parts.next()?;
        let arg = parts.next().filter(|s| !s.is_empty())?.to_string();
        if parts.next().is_some() {
            return None;
        }

        match kind {
            "kline" => Some(ChannelKind::Kline {
                symbol,
                period: arg,
            }),
            "trade" if arg == "detail" => Some(ChannelKind::Trade { symbol }),
            "depth" => Some(ChannelKind::Depth { symbol, step: arg }),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            ChannelKind::Kline { symbol, .. }
            | ChannelKind::Trade { symbol }
            | ChannelKind::Depth { symbol, .. } => symbol,
        }
    }

    /// Decode a push payload with the decoder matching this channel
    pub fn decode(&self, payload: &Value) -> Result<MarketEvent> {
        match self {
            ChannelKind::Kline { .. } => decode_kline(payload).map(MarketEvent::Kline),
            ChannelKind::Trade { .. } => decode_trade(payload).map(MarketEvent::Trade),
            ChannelKind::Depth { .. } => decode_depth(payload).map(MarketEvent::Depth),
        }
    }
}

/// Route a push by its channel name and decode it
pub fn decode_push(channel: &str, payload: &Value) -> Result<MarketEvent> {
    ChannelKind::from_channel(channel)
        .ok_or_else(|| FeedError::Decode(format!("unknown channel {channel}")))?
        .decode(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    const KLINE: &str = r#"{"ch":"market.eosusdt.kline.1min","tick":{"amount":280.483600000000000000,"close":14.290000000000000000,"count":9,"high":14.300000000000000000,"id":1516870800,"low":14.290000000000000000,"open":14.290000000000000000,"vol":4010.253191000000000000000000000000000000},"ts":1516870810953}"#;
    const TRADE: &str = r#"{"ch":"market.eosusdt.trade.detail","tick":{"data":[{"amount":8.333400000000000000,"direction":"sell","id":17592232489498,"price":14.290000000000000000,"ts":1516870810708}],"id":1557850942,"ts":1516870810708},"ts":1516870811033}"#;
    const DEPTH: &str = r#"{"ch":"market.btcusdt.depth.step0","ts":1516870811033,"tick":{"bids":[[9999.3,0.5],[9999.1,1.2]],"asks":[[10000.2,0.8]]}}"#;

    #[test]
    fn test_decode_kline() {
        let payload: Value = serde_json::from_str(KLINE).unwrap();
        let kline = decode_kline(&payload).unwrap();

        assert_eq!(kline.ch, "market.eosusdt.kline.1min");
        assert_eq!(kline.ts, 1516870810953);
        assert_close(kline.tick.amount, 280.4836);
        assert_close(kline.tick.close, 14.29);
        assert_close(kline.tick.open, 14.29);
        assert_eq!(kline.tick.count, 9);
        assert_close(kline.tick.high, 14.3);
        assert_close(kline.tick.low, 14.29);
        assert_eq!(kline.tick.id, 1516870800);
        assert_close(kline.tick.vol, 4010.253191);
    }

    #[test]
    fn test_decode_trade() {
        let payload: Value = serde_json::from_str(TRADE).unwrap();
        let trade = decode_trade(&payload).unwrap();

        assert_eq!(trade.ch, "market.eosusdt.trade.detail");
        assert_eq!(trade.ts, 1516870811033);
        assert_eq!(trade.tick.ts, 1516870810708);
        assert_eq!(trade.tick.id, 1557850942);

        let item = &trade.tick.data[0];
        assert_eq!(item.id, 17592232489498);
        assert_eq!(item.ts, 1516870810708);
        assert_eq!(item.direction, "sell");
        assert_close(item.amount, 8.3334);
        assert_close(item.price, 14.29);
    }

    #[test]
    fn test_decode_depth() {
        let payload: Value = serde_json::from_str(DEPTH).unwrap();
        let depth = decode_depth(&payload).unwrap();

        assert_eq!(depth.tick.bids.len(), 2);
        assert_eq!(depth.tick.best_bid(), Some([9999.3, 0.5]));
        assert_eq!(depth.tick.best_ask(), Some([10000.2, 0.8]));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let payload: Value = serde_json::from_str(TRADE).unwrap();
        assert!(matches!(
            decode_kline(&payload),
            Err(FeedError::Serialization(_))
        ));
    }

    #[rstest]
    #[case("market.btcusdt.kline.1min", Some(ChannelKind::Kline { symbol: "btcusdt".into(), period: "1min".into() }))]
    #[case("market.eosusdt.trade.detail", Some(ChannelKind::Trade { symbol: "eosusdt".into() }))]
    #[case("market.btcusdt.depth.step0", Some(ChannelKind::Depth { symbol: "btcusdt".into(), step: "step0".into() }))]
    #[case("market.btcusdt.detail", None)]
    #[case("market.btcusdt.trade.summary", None)]
    #[case("orders.btcusdt.kline.1min", None)]
    #[case("market..kline.1min", None)]
    fn test_channel_kind(#[case] channel: &str, #[case] expected: Option<ChannelKind>) {
        assert_eq!(ChannelKind::from_channel(channel), expected);
    }

    #[test]
    fn test_decode_push_routes_by_channel() {
        let payload: Value = serde_json::from_str(KLINE).unwrap();
        let event = decode_push("market.eosusdt.kline.1min", &payload).unwrap();
        assert!(matches!(event, MarketEvent::Kline(_)));

        let err = decode_push("market.eosusdt.detail", &payload).unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
    }
}
