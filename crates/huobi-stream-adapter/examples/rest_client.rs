/*
[INPUT]:  Huobi REST endpoint and optional API key pair
[OUTPUT]: Recent klines and trades on stdout
[POS]:    Examples - signed REST client usage
[UPDATE]: When the REST client API changes
*/

use huobi_stream_adapter::http::ENDPOINT;
use huobi_stream_adapter::*;

/// Example: public history endpoints through the signing client.
///
/// Set HUOBI_ACCESS_KEY / HUOBI_SECRET_KEY to sign with a real key pair.
#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Huobi REST Example ===\n");

    let access_key = std::env::var("HUOBI_ACCESS_KEY").unwrap_or_default();
    let secret = std::env::var("HUOBI_SECRET_KEY").unwrap_or_default();
    let client = HuobiClient::new(ENDPOINT, &access_key, &secret)?;
    println!("✓ Client created for {}", client.host());

    let klines = client.get_kline_history("btcusdt", "1day", 5).await?;
    println!("\nLast {} daily klines:", klines.len());
    for kline in &klines {
        println!("  {} open {} close {}", kline.id, kline.open, kline.close);
    }

    let trades = client.get_trade_history("eosusdt", 3).await?;
    println!("\nLast {} trade batches:", trades.len());
    for batch in &trades {
        for item in &batch.data {
            println!("  {} {} @ {}", item.direction, item.amount, item.price);
        }
    }

    println!("\n✓ REST example complete");
    Ok(())
}
