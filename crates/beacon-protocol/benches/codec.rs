//! Codec benchmarks for beacon-protocol.

use beacon_protocol::{codec, Envelope};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

fn scan_event() -> Envelope {
    Envelope::hello(json!({
        "status": "tmp inserted",
        "ip": "192.168.0.21",
        "data": {
            "time": "2024-04-01T08:59:12.000000",
            "temperature": 36.4,
            "pic_data_aft": "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk"
        }
    }))
}

fn bench_encode(c: &mut Criterion) {
    let envelope = scan_event();
    let size = codec::encode(&envelope).unwrap().len();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("scan_event", |b| b.iter(|| codec::encode(black_box(&envelope))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let ping = codec::encode(&Envelope::ping()).unwrap();
    let event = codec::encode(&scan_event()).unwrap();

    let mut group = c.benchmark_group("decode");
    group.bench_function("ping", |b| b.iter(|| codec::decode(black_box(&ping))));
    group.throughput(Throughput::Bytes(event.len() as u64));
    group.bench_function("scan_event", |b| b.iter(|| codec::decode(black_box(&event))));
    group.finish();
}

fn bench_malformed(c: &mut Criterion) {
    c.bench_function("decode_malformed", |b| {
        b.iter(|| codec::decode(black_box(b"{not json")).is_err())
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_malformed);
criterion_main!(benches);
