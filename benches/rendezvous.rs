//! Control channel round trip: agent call -> host accept -> response pulse

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use venom_probe::signal::Doorbell;
use venom_probe::{Channel, ChannelKind, ResourceNames, ResourceRole, SessionKey, CHANNEL_CAPACITY};

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("rendezvous");

    for size in [64usize, 4096, CHANNEL_CAPACITY] {
        let names = ResourceNames::new("venom_probe_bench_", SessionKey::generate());
        let bell = Arc::new(Doorbell::create(&names.name(ResourceRole::Doorbell)).unwrap());
        let host = Channel::create(&names, ChannelKind::Control).unwrap();
        let agent = Channel::open(&names, ChannelKind::Control, Arc::clone(&bell)).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let responder = thread::spawn({
            let bell = Arc::clone(&bell);
            let stop = Arc::clone(&stop);
            move || {
                let mut buf = vec![0u8; CHANNEL_CAPACITY];
                loop {
                    let got = bell
                        .wait_for(|| {
                            if host.request().is_set() {
                                Some(true)
                            } else if stop.load(Ordering::Acquire) {
                                Some(false)
                            } else {
                                None
                            }
                        })
                        .unwrap();
                    if !got {
                        break;
                    }
                    host.accept(&mut buf[..size]).unwrap();
                }
            }
        });

        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| agent.call(payload, None).unwrap())
        });

        stop.store(true, Ordering::Release);
        bell.ring().unwrap();
        responder.join().unwrap();
    }

    group.finish();
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
