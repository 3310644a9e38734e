//! Consume Demo - print every message of a topic/channel.
//!
//! This demo shows:
//! - Building a consumer with dedupe and a requeue strategy
//! - Subscribing a closure that decodes JSON bodies
//! - Stopping the dispatch loop on Ctrl-C
//!
//! # Running against a local nsqd
//!
//! ```sh
//! nsqd &
//! cargo run --example consume -- orders billing 127.0.0.1:4150
//! ```
//!
//! `RUST_LOG=nsq_subscriber=debug` shows the protocol traffic.

use std::time::Duration;

use nsq_subscriber::{
    Consumer, ConsumerConfig, ExponentialBackoff, MemoryDedupe, Message, StaticLookup,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let topic = args.next().unwrap_or_else(|| "test".to_string());
    let channel = args.next().unwrap_or_else(|| "demo".to_string());
    let mut hosts: Vec<String> = args.collect();
    if hosts.is_empty() {
        hosts.push("127.0.0.1:4150".to_string());
    }

    let mut consumer = Consumer::builder()
        .config(ConsumerConfig::from_env()?)
        .lookup(StaticLookup::new(hosts))
        .dedupe(MemoryDedupe::default())
        .requeue_strategy(ExponentialBackoff {
            base: Duration::from_millis(500),
            ..ExponentialBackoff::default()
        })
        .on_connection_error(|id, error| {
            tracing::warn!(connection = %id, "dropped: {}", error);
        })
        .build()?;

    consumer
        .subscribe(&topic, &channel, |message: Message| async move {
            let id = message.id();
            match message.json::<serde_json::Value>() {
                Ok(value) => tracing::info!(%id, "{}", value),
                Err(_) => tracing::info!(%id, "{}", String::from_utf8_lossy(message.body())),
            }
            Ok(())
        })
        .await?;

    let stop = consumer.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt, stopping");
            stop.stop();
        }
    });

    consumer.run().await?;
    Ok(())
}
