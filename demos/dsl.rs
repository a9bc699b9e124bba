use std::net::Ipv4Addr;

use netpolicy::{Packet, Policy};

fn main() {
    let policy = Policy::from_dsl(include_str!("line.policy")).expect("failed to load policy");

    println!("{policy}");

    let classifier = policy.compile().expect("failed to compile policy");
    println!("{classifier}");

    let pkt = Packet::new()
        .set("switch", 2_i64)
        .set("inport", 1_i64)
        .set("srcip", Ipv4Addr::new(10, 0, 0, 7))
        .set("dstport", 443_i64);

    match classifier.eval(&pkt) {
        Ok(out) => println!("{} packet(s) out: {out:?}", out.len()),
        Err(e) => println!("evaluation failed: {e}"),
    }
}
