use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use netpolicy::bucket::{CountBucket, FwdBucket};
use netpolicy::{Packet, field, fwd};

const THREADS: i64 = 4;
const PER_THREAD: i64 = 500;

fn sized(switch: i64, seq: i64) -> Packet {
    Packet::new()
        .set("switch", switch)
        .set("seq", seq)
        .set("header_len", 20_i64)
        .set("payload_len", 80_i64)
}

#[test]
fn classifier_shared_across_threads() {
    let classifier = Arc::new(
        ((field("switch").eq(1_i64) >> fwd(2)) + (field("switch").eq(2_i64) >> fwd(1)))
            .compile()
            .unwrap(),
    );

    let handles: Vec<_> = (1..=THREADS)
        .map(|s| {
            let c = Arc::clone(&classifier);
            thread::spawn(move || c.eval(&Packet::new().set("switch", s)).unwrap())
        })
        .collect();
    let results: Vec<HashSet<Packet>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results[0].contains(&Packet::new().set("switch", 1_i64).set("outport", 2_i64)));
    assert!(results[1].contains(&Packet::new().set("switch", 2_i64).set("outport", 1_i64)));
    assert!(results[2].is_empty());
    assert!(results[3].is_empty());
}

#[test]
fn count_bucket_loses_nothing_under_concurrent_drains() {
    let bucket = CountBucket::new();
    let policy = field("switch").eq(1_i64) >> bucket.clone();
    let classifier = Arc::new(policy.compile().unwrap());
    let done = Arc::new(AtomicBool::new(false));

    // Drain repeatedly while the evaluators are still inserting.
    let drainer = {
        let bucket = bucket.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut drained = 0;
            while !done.load(Ordering::SeqCst) {
                drained += bucket.apply();
                thread::yield_now();
            }
            drained + bucket.apply()
        })
    };

    let evaluators: Vec<_> = (0..THREADS)
        .map(|t| {
            let c = Arc::clone(&classifier);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    assert!(c.eval(&sized(1, t * PER_THREAD + i)).unwrap().is_empty());
                }
            })
        })
        .collect();
    for h in evaluators {
        h.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    let drained = drainer.join().unwrap();

    let total = u64::try_from(THREADS * PER_THREAD).unwrap();
    assert_eq!(drained, usize::try_from(total).unwrap());
    assert_eq!(bucket.buffered(), 0);
    let counts = bucket.persistent_counts();
    assert_eq!(counts.packets, total);
    assert_eq!(counts.bytes, total * 100);
}

#[test]
fn fwd_bucket_delivers_each_packet_once() {
    let bucket = FwdBucket::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    bucket.register_callback(move |pkt| {
        s.lock().unwrap().push(pkt.clone());
    });
    let policy = Arc::new(fwd(9) >> bucket.clone());
    let done = Arc::new(AtomicBool::new(false));

    let drainer = {
        let bucket = bucket.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                bucket.apply();
                thread::yield_now();
            }
            bucket.apply();
        })
    };

    let evaluators: Vec<_> = (0..THREADS)
        .map(|t| {
            let p = Arc::clone(&policy);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let _ = p.eval(&sized(1, t * PER_THREAD + i));
                }
            })
        })
        .collect();
    for h in evaluators {
        h.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    drainer.join().unwrap();

    let seen = seen.lock().unwrap();
    let unique: HashSet<&Packet> = seen.iter().collect();
    assert_eq!(seen.len(), usize::try_from(THREADS * PER_THREAD).unwrap());
    assert_eq!(unique.len(), seen.len());
    assert!(seen.iter().all(|p| p.get("outport").is_some()));
}

#[test]
fn stats_pull_waits_for_update_to_finish() {
    let bucket = CountBucket::new();
    let reports = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&reports);
    bucket.register_callback(move |_| {
        r.fetch_add(1, Ordering::SeqCst);
    });

    bucket.begin_update();
    let puller = {
        let bucket = bucket.clone();
        thread::spawn(move || bucket.pull_stats())
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(reports.load(Ordering::SeqCst), 0);

    bucket.end_update();
    puller.join().unwrap();
    assert_eq!(reports.load(Ordering::SeqCst), 1);
    assert!(!bucket.is_updating());
}
