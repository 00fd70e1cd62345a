/*
[INPUT]:  Monitor runs against a scripted local feed
[OUTPUT]: End-to-end verification of subscribe, request and shutdown flow
[POS]:    Integration test layer - monitor runtime
[UPDATE]: When changing monitor startup or shutdown logic
*/

use std::io::Write;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::{SinkExt, StreamExt};
use huobi_stream_monitor::{Monitor, MonitorConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_test::assert_ok;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const KLINE: &str = "market.btcusdt.kline.1min";

fn gzip(frame: &Value) -> Message {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(frame.to_string().as_bytes()).unwrap();
    Message::binary(encoder.finish().unwrap())
}

/// Acks subs, answers requests and follows each ack with one kline push
async fn spawn_feed() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let Ok(mut ws) = accept_async(tcp).await else {
                continue;
            };
            tokio::spawn(async move {
                while let Some(Ok(message)) = ws.next().await {
                    let Message::Text(text) = message else { continue };
                    let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };

                    if let Some(topic) = frame.get("sub").and_then(Value::as_str) {
                        if topic.starts_with("market.bad") {
                            let ack = json!({"id": topic, "subbed": topic, "status": "error", "err-msg": "invalid topic"});
                            let _ = ws.send(gzip(&ack)).await;
                            continue;
                        }
                        let _ = ws
                            .send(gzip(&json!({"id": topic, "subbed": topic, "status": "ok"})))
                            .await;
                        let push = json!({
                            "ch": topic,
                            "ts": 1516870810953_u64,
                            "tick": {"id": 1516870800, "amount": 1.0, "count": 1, "open": 14.0,
                                     "close": 14.29, "low": 13.9, "high": 14.3, "vol": 14.2}
                        });
                        let _ = ws.send(gzip(&push)).await;
                    } else if let Some(topic) = frame.get("req").and_then(Value::as_str) {
                        let reply = json!({"rep": topic, "id": frame["id"], "status": "ok", "data": {"close": 14.29}});
                        let _ = ws.send(gzip(&reply)).await;
                    } else if let Some(ts) = frame.get("ping").and_then(Value::as_i64) {
                        let _ = ws.send(gzip(&json!({"pong": ts}))).await;
                    }
                }
            });
        }
    });
    format!("ws://{addr}")
}

fn config_for(endpoint: &str, topics: &[&str]) -> MonitorConfig {
    let yaml = format!(
        "endpoint: {endpoint}\nsession:\n  reconnect_delay_ms: 20\n  request_timeout_ms: 5000\ntopics: [{}]\nrequests: [market.btcusdt.detail]\n",
        topics.join(", ")
    );
    MonitorConfig::from_yaml(&yaml).unwrap()
}

async fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_monitor_decodes_pushes_and_shuts_down() {
    let endpoint = spawn_feed().await;
    let monitor = Monitor::connect(config_for(&endpoint, &[KLINE])).await.unwrap();
    let stats = monitor.stats();
    let shutdown = CancellationToken::new();

    let running = tokio::spawn(monitor.run(shutdown.clone()));

    assert!(wait_for(|| stats.pushes(KLINE) == 1).await);
    assert_eq!(stats.last_price("btcusdt"), Some(14.29));
    assert_eq!(stats.decode_failures(), 0);

    shutdown.cancel();
    let finished = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert_ok!(finished);
}

#[tokio::test]
async fn test_rejected_topic_is_skipped() {
    let endpoint = spawn_feed().await;
    let monitor = Monitor::connect(config_for(&endpoint, &["market.badsym.kline.1min", KLINE]))
        .await
        .unwrap();

    let subscribed = monitor.subscribe_all().await.unwrap();
    assert_eq!(subscribed, 1);
    assert_eq!(monitor.session().topics(), vec![KLINE.to_string()]);

    let replies = monitor.run_requests().await;
    assert_eq!(replies.len(), 1);
    let reply = replies[0].1.as_ref().unwrap();
    assert_eq!(reply["data"]["close"], 14.29);

    monitor.session().close().await;
}

#[tokio::test]
async fn test_connect_failure_has_context() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Monitor::connect(config_for(&format!("ws://{addr}"), &[KLINE]))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("connect to ws://"));
}

/// Accepts connections and reads every frame without ever answering
async fn spawn_mute_feed() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let Ok(mut ws) = accept_async(tcp).await else {
                continue;
            };
            tokio::spawn(async move { while let Some(Ok(_)) = ws.next().await {} });
        }
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn test_shutdown_while_subscribe_unacked() {
    let endpoint = spawn_mute_feed().await;
    let yaml = format!("endpoint: {endpoint}\ntopics: [{KLINE}]\n");
    let config = MonitorConfig::from_yaml(&yaml).unwrap();
    assert!(config.session.request_timeout_ms.is_none());

    let monitor = Monitor::connect(config).await.unwrap();
    let session = monitor.session().clone();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn(monitor.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running.is_finished());

    shutdown.cancel();
    let finished = tokio::time::timeout(Duration::from_secs(3), running)
        .await
        .expect("monitor run must return after shutdown")
        .unwrap();
    assert_ok!(finished);
    assert!(session.is_closed());
}
