use std::sync::Arc;
use std::thread;

use netpolicy::bucket::CountBucket;
use netpolicy::{Packet, field, fwd};

fn main() {
    let counted = CountBucket::new();
    counted.register_callback(|counts| println!("counted: {counts:?}"));

    let classifier = Arc::new(
        ((field("switch").eq(1_i64) >> fwd(2)) + (field("inport").eq(1_i64) >> counted.clone()))
            .compile()
            .expect("failed to compile policy"),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let cls = Arc::clone(&classifier);
            thread::spawn(move || {
                let pkt = Packet::new()
                    .set("switch", 1_i64)
                    .set("inport", i64::from(i % 2 + 1))
                    .set("payload_len", 100_i64);

                let result = cls.eval(&pkt);
                println!("Thread {i}: {result:?}");
            })
        })
        .collect();

    for h in handles {
        h.join().expect("thread panicked");
    }

    counted.apply();
    counted.pull_stats();
}
