/*
[INPUT]:  MonitorConfig + shutdown token
[OUTPUT]: Decoded market pushes logged via tracing, per-topic counters
[POS]:    Runtime layer - drives one feed Session until shutdown
[UPDATE]: When changing subscription flow, decoding or shutdown semantics
*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use huobi_stream_adapter::{ChannelKind, FeedError, MarketEvent, Session};
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;

/// Counters shared with the topic listeners
#[derive(Debug, Default)]
pub struct MonitorStats {
    pushes: Mutex<HashMap<String, u64>>,
    last_price: Mutex<HashMap<String, f64>>,
    decode_failures: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MonitorStats {
    /// Decode one push by its channel kind, log it and update the counters
    pub fn record(&self, channel: &str, frame: &Value) {
        let count = {
            let mut pushes = lock(&self.pushes);
            let count = pushes.entry(channel.to_string()).or_default();
            *count += 1;
            *count
        };
        if count == 1 {
            info!(%channel, "first push received");
        }

        let Some(kind) = ChannelKind::from_channel(channel) else {
            debug!(%channel, "push on unrouted channel");
            return;
        };
        let event = match kind.decode(frame) {
            Ok(event) => event,
            Err(err) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%channel, error = %err, "push decode failed");
                return;
            }
        };

        let symbol = kind.symbol();
        match event {
            MarketEvent::Kline(kline) => {
                debug!(
                    %channel,
                    open = kline.tick.open,
                    close = kline.tick.close,
                    high = kline.tick.high,
                    low = kline.tick.low,
                    vol = kline.tick.vol,
                    "kline"
                );
                self.set_price(symbol, kline.tick.close);
            }
            MarketEvent::Trade(trade) => {
                for item in &trade.tick.data {
                    debug!(
                        %channel,
                        direction = %item.direction,
                        amount = item.amount,
                        price = item.price,
                        "trade"
                    );
                }
                if let Some(last) = trade.tick.data.last() {
                    self.set_price(symbol, last.price);
                }
            }
            MarketEvent::Depth(depth) => {
                debug!(
                    %channel,
                    best_bid = ?depth.tick.best_bid(),
                    best_ask = ?depth.tick.best_ask(),
                    levels = depth.tick.bids.len() + depth.tick.asks.len(),
                    "depth"
                );
            }
        }
    }

    fn set_price(&self, symbol: &str, price: f64) {
        lock(&self.last_price).insert(symbol.to_string(), price);
    }

    pub fn pushes(&self, channel: &str) -> u64 {
        lock(&self.pushes).get(channel).copied().unwrap_or_default()
    }

    pub fn total_pushes(&self) -> u64 {
        lock(&self.pushes).values().sum()
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        lock(&self.last_price).get(symbol).copied()
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    fn log_summary(&self) {
        let pushes = lock(&self.pushes);
        let mut channels: Vec<_> = pushes.iter().collect();
        channels.sort();
        for (channel, count) in channels {
            info!(%channel, pushes = count, "topic summary");
        }
        info!(decode_failures = self.decode_failures(), "monitor summary");
    }
}

enum Startup {
    Cancelled,
    SessionEnded(Result<(), JoinError>),
    Finished(anyhow::Result<()>),
}

/// One feed session plus the configured subscriptions
#[derive(Debug)]
pub struct Monitor {
    config: MonitorConfig,
    session: Session,
    stats: Arc<MonitorStats>,
}

impl Monitor {
    pub async fn connect(config: MonitorConfig) -> anyhow::Result<Self> {
        let session = Session::connect(
            config.endpoint.clone(),
            config.session.to_session_config(),
        )
        .await
        .with_context(|| format!("connect to {}", config.endpoint))?;

        Ok(Self {
            config,
            session,
            stats: Arc::new(MonitorStats::default()),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> Arc<MonitorStats> {
        self.stats.clone()
    }

    /// Subscribe every configured topic; rejected topics are logged and skipped
    pub async fn subscribe_all(&self) -> anyhow::Result<usize> {
        let mut subscribed = 0;
        for topic in &self.config.topics {
            let stats = self.stats.clone();
            match self
                .session
                .subscribe(topic, move |channel, frame| stats.record(channel, frame))
                .await
            {
                Ok(()) => subscribed += 1,
                Err(err @ FeedError::Subscribe { .. }) => {
                    warn!(%topic, error = %err, "topic rejected");
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("subscribe {topic}"));
                }
            }
        }
        info!(subscribed, configured = self.config.topics.len(), "subscriptions ready");
        Ok(subscribed)
    }

    /// Issue each configured request once and log the reply
    pub async fn run_requests(&self) -> Vec<(String, Result<Value, FeedError>)> {
        let mut replies = Vec::with_capacity(self.config.requests.len());
        for topic in &self.config.requests {
            let reply = self.session.request(topic).await;
            match &reply {
                Ok(frame) => info!(%topic, data = %frame["data"], "request reply"),
                Err(err) => warn!(%topic, error = %err, "request failed"),
            }
            replies.push((topic.clone(), reply));
        }
        replies
    }

    /// Subscribe, issue requests, then keep the session alive until `shutdown`.
    ///
    /// The session loop is driven from the start, so a drop during startup is
    /// reconnected and `shutdown` is honoured while acks are still pending.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut runner = tokio::spawn({
            let session = self.session.clone();
            async move { session.run().await }
        });

        let subscribe_phase = async {
            self.subscribe_all().await?;
            self.run_requests().await;
            anyhow::Ok(())
        };

        let startup = tokio::select! {
            _ = shutdown.cancelled() => Startup::Cancelled,
            joined = &mut runner => Startup::SessionEnded(joined),
            result = subscribe_phase => Startup::Finished(result),
        };

        let started = match startup {
            Startup::Finished(Ok(())) => true,
            Startup::Finished(Err(err)) => {
                self.stop(runner).await?;
                return Err(err);
            }
            Startup::Cancelled => {
                info!("shutdown requested during startup");
                false
            }
            Startup::SessionEnded(joined) => {
                joined.context("session loop")?;
                warn!("session ended during startup");
                self.session.close().await;
                self.stats.log_summary();
                return Ok(());
            }
        };

        if started {
            let ended_early = tokio::select! {
                _ = shutdown.cancelled() => false,
                joined = &mut runner => {
                    joined.context("session loop")?;
                    true
                }
            };
            if ended_early {
                warn!("session ended without shutdown request");
                self.session.close().await;
                self.stats.log_summary();
                return Ok(());
            }
            info!("shutdown requested, closing session");
        }

        self.stop(runner).await?;
        self.stats.log_summary();
        Ok(())
    }

    /// Close the session and wait for its loop to exit
    async fn stop(&self, runner: JoinHandle<()>) -> anyhow::Result<()> {
        self.session.close().await;
        runner.await.context("session loop")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kline_frame(close: f64) -> Value {
        json!({
            "ch": "market.btcusdt.kline.1min",
            "ts": 1516870810953_u64,
            "tick": {"id": 1516870800, "amount": 1.5, "count": 3, "open": 10.0,
                     "close": close, "low": 9.0, "high": 12.0, "vol": 15.0}
        })
    }

    #[test]
    fn test_record_counts_and_tracks_price() {
        let stats = MonitorStats::default();
        stats.record("market.btcusdt.kline.1min", &kline_frame(11.0));
        stats.record("market.btcusdt.kline.1min", &kline_frame(11.5));

        assert_eq!(stats.pushes("market.btcusdt.kline.1min"), 2);
        assert_eq!(stats.total_pushes(), 2);
        assert_eq!(stats.last_price("btcusdt"), Some(11.5));
        assert_eq!(stats.decode_failures(), 0);
    }

    #[test]
    fn test_record_trade_uses_last_item_price() {
        let stats = MonitorStats::default();
        let frame = json!({
            "ch": "market.eosusdt.trade.detail",
            "ts": 1516870811033_u64,
            "tick": {"id": 1, "ts": 2, "data": [
                {"id": 10, "ts": 2, "direction": "buy", "amount": 1.0, "price": 14.2},
                {"id": 11, "ts": 2, "direction": "sell", "amount": 2.0, "price": 14.3}
            ]}
        });
        stats.record("market.eosusdt.trade.detail", &frame);
        assert_eq!(stats.last_price("eosusdt"), Some(14.3));
    }

    #[test]
    fn test_record_counts_decode_failures() {
        let stats = MonitorStats::default();
        stats.record("market.btcusdt.depth.step0", &json!({"ch": "market.btcusdt.depth.step0"}));

        assert_eq!(stats.pushes("market.btcusdt.depth.step0"), 1);
        assert_eq!(stats.decode_failures(), 1);
    }
}
