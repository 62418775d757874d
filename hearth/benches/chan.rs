use chan::Chan;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;

/// Uncontended round trip: one thread, alternating `send`/`recv` against a
/// channel that is never actually empty or full. Measures the monitor
/// pattern's per-call mutex/condvar overhead in isolation from any waiting.
fn round_trip(c: &mut Criterion) {
    let ch: Chan<usize> = Chan::new(64);
    c.bench_function("chan_round_trip", |b| {
        b.iter(|| {
            ch.send(black_box(1)).unwrap();
            black_box(ch.recv().unwrap());
        });
    });
}

/// Contended throughput: a background thread continuously drains a small
/// bounded channel while the benchmarked thread sends, so every iteration
/// has a real chance of blocking on `not_full` or waking a waiter on
/// `not_empty` — the same two-sided wait the process mailbox relies on.
fn contended_send(c: &mut Criterion) {
    let ch = Arc::new(Chan::<usize>::new(8));
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let consumer = {
        let ch = ch.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let _ = ch.recv_deadline(deadline::Deadline::from_ms(10));
            }
        })
    };

    c.bench_function("chan_contended_send", |b| {
        b.iter(|| {
            ch.send(black_box(1)).unwrap();
        });
    });

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    ch.close();
    consumer.join().unwrap();
}

criterion_group!(benches, round_trip, contended_send);
criterion_main!(benches);
