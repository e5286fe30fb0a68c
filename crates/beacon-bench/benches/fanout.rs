//! Fan-out benchmarks for Beacon.
//!
//! These benchmarks measure broadcast and restore cost against in-process
//! sockets, so no network I/O is involved.

use beacon_core::Hub;
use beacon_transport::{MemoryPeer, MemorySocket, MemorySocketHost, SocketHost};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

fn attach(hub: &Hub, count: usize) -> Vec<MemoryPeer> {
    (0..count)
        .map(|_| {
            let (socket, peer) = MemorySocket::pair(1024);
            hub.attach(socket, None).unwrap();
            peer
        })
        .collect()
}

/// Benchmark one trigger against N dashboards.
fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");
    let event = json!({"status": "tmp inserted", "id": "42", "ic": "04a1b2c3"});

    for count in [1usize, 10, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let hub = Hub::new(Arc::new(MemorySocketHost::new()));
            let mut peers = attach(&hub, count);

            b.iter_custom(|iters| {
                let mut elapsed = std::time::Duration::ZERO;
                for _ in 0..iters {
                    let start = Instant::now();
                    let report = hub.broadcast(black_box(event.clone())).unwrap();
                    elapsed += start.elapsed();
                    debug_assert_eq!(report.delivered, count);
                    // Keep queues from filling up between iterations.
                    for peer in &mut peers {
                        while peer.try_recv().is_some() {}
                    }
                }
                elapsed
            });
        });
    }

    group.finish();
}

/// Benchmark rebuilding the registry from attachment records.
fn bench_wake(c: &mut Criterion) {
    let mut group = c.benchmark_group("wake");

    for count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let host: Arc<dyn SocketHost> = Arc::new(MemorySocketHost::new());
            let seed = Hub::new(Arc::clone(&host));
            let _peers = attach(&seed, count);

            b.iter(|| {
                let hub = Hub::new(Arc::clone(&host));
                black_box(hub.wake())
            });
        });
    }

    group.finish();
}

/// Benchmark ping handling, the hot inbound path.
fn bench_ping(c: &mut Criterion) {
    let hub = Hub::new(Arc::new(MemorySocketHost::new()));
    let (socket, mut peer) = MemorySocket::pair(1024);
    let socket: Arc<dyn beacon_transport::Socket> = socket;
    hub.attach(Arc::clone(&socket), None).unwrap();
    let ping = br#"{"type":"ping"}"#;

    c.bench_function("ping_pong", |b| {
        b.iter(|| {
            hub.on_message(&socket, black_box(ping)).unwrap();
            peer.try_recv()
        })
    });
}

criterion_group!(benches, bench_broadcast, bench_wake, bench_ping);
criterion_main!(benches);
