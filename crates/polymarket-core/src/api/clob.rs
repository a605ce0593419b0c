//! Polymarket CLOB order book payloads.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::types::{OrderBook, PriceLevel};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub(crate) struct ClobOrderBook {
    market: String,
    asset_id: String,
    #[serde(default)]
    bids: Vec<ClobPriceLevel>,
    #[serde(default)]
    asks: Vec<ClobPriceLevel>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClobPriceLevel {
    price: String,
    size: String,
}

impl ClobPriceLevel {
    fn parse(&self) -> Result<PriceLevel> {
        let price: Decimal = self
            .price
            .parse()
            .map_err(|e| Error::InvalidMarket(format!("bad price {:?}: {e}", self.price)))?;
        let size: Decimal = self
            .size
            .parse()
            .map_err(|e| Error::InvalidMarket(format!("bad size {:?}: {e}", self.size)))?;
        Ok(PriceLevel { price, size })
    }
}

/// CLOB timestamps are unix milliseconds encoded as strings.
fn parse_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

impl TryFrom<ClobOrderBook> for OrderBook {
    type Error = Error;

    fn try_from(b: ClobOrderBook) -> Result<Self> {
        let bids = b.bids.iter().map(ClobPriceLevel::parse).collect::<Result<_>>()?;
        let asks = b.asks.iter().map(ClobPriceLevel::parse).collect::<Result<_>>()?;
        Ok(OrderBook {
            market_id: b.market,
            token_id: b.asset_id,
            timestamp: parse_timestamp(b.timestamp.as_deref()),
            bids,
            asks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_book() {
        let raw = r#"{
            "market": "0xabc",
            "asset_id": "111",
            "timestamp": "1760000000000",
            "bids": [{"price": "0.94", "size": "120"}, {"price": "0.95", "size": "80"}],
            "asks": [{"price": "0.97", "size": "50"}]
        }"#;
        let wire: ClobOrderBook = serde_json::from_str(raw).unwrap();
        let book = OrderBook::try_from(wire).unwrap();

        assert_eq!(book.token_id, "111");
        assert_eq!(book.best_bid().unwrap().price, Decimal::new(95, 2));
        assert_eq!(book.best_ask().unwrap().size, Decimal::new(50, 0));
        assert_eq!(book.timestamp.timestamp_millis(), 1_760_000_000_000);
    }

    #[test]
    fn test_malformed_level_is_an_error() {
        let raw = r#"{"market": "m", "asset_id": "t", "bids": [{"price": "abc", "size": "1"}]}"#;
        let wire: ClobOrderBook = serde_json::from_str(raw).unwrap();
        assert!(OrderBook::try_from(wire).is_err());
    }
}
