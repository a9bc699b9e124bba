use std::net::Ipv4Addr;

use netpolicy::bucket::CountBucket;
use netpolicy::{Packet, Policy, field, fwd};

fn main() {
    let web = CountBucket::new();

    let policy = (field("switch").eq(1_i64) >> fwd(2))
        + (field("dstport").eq(80_i64) >> web.clone())
        + (field("srcip").eq(Ipv4Addr::new(10, 0, 0, 9)) >> Policy::Controller);

    let classifier = policy.compile().expect("failed to compile policy");

    let pkt = Packet::new()
        .set("switch", 1_i64)
        .set("inport", 3_i64)
        .set("dstport", 80_i64)
        .set("header_len", 54_i64)
        .set("payload_len", 1200_i64);

    let report = classifier
        .eval_detailed(&pkt)
        .expect("compiled classifiers are total");

    println!("{report}");
    println!();
    println!("Winning rule: {}", classifier.rules()[report.rule_index()]);
    println!("Outputs: {:?}", report.outputs());
    println!("Duration: {:?}", report.duration());

    let (reached, forwarded) = policy.queries_in_eval(&pkt);
    println!("Queries reached: {}", reached.len());
    println!("Forwarded without side effects: {}", forwarded.len());

    web.apply();
    println!("Web traffic so far: {:?}", web.persistent_counts());
}
