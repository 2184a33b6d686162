//! Microbenchmarks for the wire codec and the reliable engines.

use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use hudp::engine::receiver::ReliableReceiver;
use hudp::engine::sender::ReliableSender;
use hudp::packet::{Channel, Packet};

fn bench_codec(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xAB; 1192]);
    let packet = Packet::data(Channel::Reliable, 12345, 987_654_321, payload);
    let encoded = packet.encode();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode_1200", |b| {
        b.iter(|| black_box(packet.encode()));
    });
    group.bench_function("decode_1200", |b| {
        b.iter(|| Packet::decode(black_box(&encoded)).unwrap());
    });
    group.finish();
}

fn bench_reliable_round(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xCD; 1192]);

    let mut group = c.benchmark_group("reliable");
    group.throughput(Throughput::Elements(1));
    group.bench_function("transmit_ack_deliver", |b| {
        let mut tx = ReliableSender::new(1024, 200, 10, 0);
        let mut rx = ReliableReceiver::new(1024, 200, 0);
        let mut now = 0u64;
        b.iter(|| {
            now += 1;
            let seq = tx.transmit(payload.clone(), now);
            let deliveries = rx.on_data(seq, now as u32, payload.clone(), now);
            tx.on_ack(seq, now);
            tx.next_deadline_ms(); // prune the retired deadline
            black_box(deliveries)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_codec, bench_reliable_round);
criterion_main!(benches);
