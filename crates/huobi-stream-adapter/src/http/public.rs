/*
[INPUT]:  Symbol identifiers and query parameters
[OUTPUT]: Historical klines and trades
[POS]:    HTTP layer - public market data endpoints
[UPDATE]: When adding new public endpoints or changing response format
*/

use reqwest::Method;

use crate::error::Result;
use crate::http::{HuobiClient, Params};
use crate::types::{KlineTick, TradeTick};

impl HuobiClient {
    /// Get kline/candlestick history, newest first
    ///
    /// GET /market/history/kline?symbol={symbol}&period={period}&size={size}
    pub async fn get_kline_history(
        &self,
        symbol: &str,
        period: &str,
        size: u32,
    ) -> Result<Vec<KlineTick>> {
        let params = Params::from([
            ("symbol".to_string(), symbol.to_string()),
            ("period".to_string(), period.to_string()),
            ("size".to_string(), size.to_string()),
        ]);
        self.request_data(Method::GET, "/market/history/kline", params)
            .await
    }

    /// Get recent trade batches, newest first
    ///
    /// GET /market/history/trade?symbol={symbol}&size={size}
    pub async fn get_trade_history(&self, symbol: &str, size: u32) -> Result<Vec<TradeTick>> {
        let params = Params::from([
            ("symbol".to_string(), symbol.to_string()),
            ("size".to_string(), size.to_string()),
        ]);
        self.request_data(Method::GET, "/market/history/trade", params)
            .await
    }
}
