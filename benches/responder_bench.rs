//! Benchmarks for the override decision path.
//!
//! Measures how quickly a parsed query is matched against the overrides.

use std::str::FromStr;

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};

use dnstweak::resolver::Resolver;
use dnstweak::OverrideTable;

fn query(host: &str, qtype: RecordType) -> Message {
    let mut msg = Message::new();
    msg.set_id(0x1234)
        .add_query(Query::query(Name::from_str(host).unwrap(), qtype));
    msg
}

fn bench_process_query(c: &mut Criterion) {
    let specs: Vec<String> = (0..1000)
        .map(|i| format!("host{i}.example.com=10.0.{}.{},10.1.{}.{}", i / 256, i % 256, i / 256, i % 256))
        .collect();
    let resolver = Resolver::new(OverrideTable::from_specs(&specs).unwrap());

    let hit = query("host500.example.com.", RecordType::A);
    let miss = query("www.google.com.", RecordType::A);
    let wrong_type = query("host500.example.com.", RecordType::AAAA);

    let mut group = c.benchmark_group("resolver");
    group.throughput(Throughput::Elements(1));

    // Override hit: builds and shuffles the answer set
    group.bench_function(BenchmarkId::new("process_query", "hit"), |b| {
        b.iter(|| resolver.process_query(black_box(&hit)))
    });

    // Miss: falls through to forwarding
    group.bench_function(BenchmarkId::new("process_query", "miss"), |b| {
        b.iter(|| resolver.process_query(black_box(&miss)))
    });

    // Non-A query for an overridden host
    group.bench_function(BenchmarkId::new("process_query", "wrong_type"), |b| {
        b.iter(|| resolver.process_query(black_box(&wrong_type)))
    });

    group.finish();
}

fn bench_wire_round_trip(c: &mut Criterion) {
    let resolver = Resolver::new(OverrideTable::from_specs(["local.example.com=5.6.7.8"]).unwrap());
    let packet = query("local.example.com.", RecordType::A).to_vec().unwrap();

    c.bench_function("decode_decide_encode", |b| {
        b.iter(|| {
            let msg = Message::from_vec(black_box(&packet)).unwrap();
            match resolver.process_query(&msg) {
                dnstweak::resolver::QueryAction::Overridden(resp) => resp.to_vec().unwrap(),
                dnstweak::resolver::QueryAction::Forward => Vec::new(),
            }
        })
    });
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_process_query(&mut criterion);
    bench_wire_round_trip(&mut criterion);
    criterion.final_summary();
}
