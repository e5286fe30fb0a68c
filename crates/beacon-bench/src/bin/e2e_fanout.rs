//! End-to-end fan-out benchmark for Beacon.
//!
//! Connects N dashboards to a running server, then has one extra client send
//! relayed `message` frames and measures how fast the resulting `hello`
//! frames arrive across all dashboards.

use beacon_protocol::{codec, Envelope, FrameType};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const SEND_INTERVAL: Duration = Duration::from_millis(1);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| SERVER_URL.to_string());

    println!("Beacon end-to-end fan-out benchmark");
    println!("  Server:  {url} (start it with `cargo run --release -p beacon-server`)");
    println!("  Clients: {num_clients}");
    println!("  Warmup:  {WARMUP_SECS}s, measurement: {BENCH_SECS}s");
    println!();

    if let Err(e) = run(num_clients, &url).await {
        eprintln!("Benchmark failed: {e}");
        std::process::exit(1);
    }
}

async fn run(num_clients: usize, url: &str) -> Result<(), BoxError> {
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = url.to_string();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_dashboard(&url, received, barrier).await {
                eprintln!("Dashboard {client_id} error: {e}");
            }
        }));
    }

    barrier.wait().await;
    println!("All {num_clients} dashboards connected");

    let sent = Arc::new(AtomicU64::new(0));
    let producer = {
        let sent = Arc::clone(&sent);
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = run_producer(&url, sent).await {
                eprintln!("Producer error: {e}");
            }
        })
    };

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;
    let elapsed = start.elapsed().as_secs_f64();

    let total_received = received.load(Ordering::SeqCst);
    let total_sent = sent.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  Events sent:      {total_sent:>10}");
    println!("  Frames received:  {total_received:>10}");
    println!("  Events/s:         {:>10.0}", total_sent as f64 / elapsed);
    println!("  Frames/s:         {:>10.0}", total_received as f64 / elapsed);
    if total_sent > 0 {
        let expected = total_sent * num_clients as u64;
        println!(
            "  Delivery ratio:   {:>10.3}",
            total_received as f64 / expected as f64
        );
    }

    producer.abort();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn run_dashboard(
    url: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(format!("{url}?role=bench")).await?;
    let (_sender, mut receiver) = ws.split();

    barrier.wait().await;

    while let Some(msg) = receiver.next().await {
        if let Message::Text(text) = msg? {
            if let Ok(envelope) = codec::decode(text.as_bytes()) {
                if envelope.frame_type() == FrameType::Hello {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
    Ok(())
}

async fn run_producer(url: &str, sent: Arc<AtomicU64>) -> Result<(), BoxError> {
    let (ws, _) = connect_async(format!("{url}?role=producer")).await?;
    let (mut sender, mut receiver) = ws.split();

    // The producer's own copies of the relay are discarded.
    tokio::spawn(async move { while receiver.next().await.is_some() {} });

    let mut interval = tokio::time::interval(SEND_INTERVAL);
    let mut seq = 0u64;
    loop {
        interval.tick().await;
        let envelope = Envelope::message(json!({"status": "tmp inserted", "seq": seq}));
        let frame = codec::encode(&envelope)?;
        let text = String::from_utf8(frame.to_vec())?;
        sender.send(Message::Text(text)).await?;
        sent.fetch_add(1, Ordering::Relaxed);
        seq += 1;
    }
}
