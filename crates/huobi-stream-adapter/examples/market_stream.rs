/*
[INPUT]:  Public Huobi market feed
[OUTPUT]: Decoded kline/trade pushes and one detail snapshot on stdout
[POS]:    Examples - WebSocket session usage
[UPDATE]: When the Session API changes
*/

use huobi_stream_adapter::*;
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

fn print_push(channel: &str, frame: &serde_json::Value) {
    match decode_push(channel, frame) {
        Ok(MarketEvent::Kline(kline)) => println!(
            "{channel}: open {} close {} vol {}",
            kline.tick.open, kline.tick.close, kline.tick.vol
        ),
        Ok(MarketEvent::Trade(trade)) => {
            for item in &trade.tick.data {
                println!("{channel}: {} {} @ {}", item.direction, item.amount, item.price);
            }
        }
        Ok(MarketEvent::Depth(depth)) => println!(
            "{channel}: bid {:?} ask {:?}",
            depth.tick.best_bid(),
            depth.tick.best_ask()
        ),
        Err(err) => eprintln!("{channel}: {err}"),
    }
}

/// Example: subscribe to a couple of channels and issue one request.
///
/// The session reconnects on its own while `run()` is parked in a task.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("huobi_stream_adapter=info"))
        .init();

    println!("=== Huobi Market Stream Example ===\n");

    let session = Session::connect_default().await?;
    println!("✓ Connected to {}", session.endpoint());

    let runner = tokio::spawn({
        let session = session.clone();
        async move { session.run().await }
    });

    session.subscribe("market.btcusdt.kline.1min", print_push).await?;
    session.subscribe("market.btcusdt.trade.detail", print_push).await?;
    println!("✓ Subscribed to {:?}\n", session.topics());

    let detail = session.request("market.btcusdt.detail").await?;
    println!("Detail snapshot: {}\n", detail["data"]);

    sleep(Duration::from_secs(30)).await;

    session.close().await;
    let _ = runner.await;
    println!("\n✓ Market stream example complete");
    Ok(())
}
