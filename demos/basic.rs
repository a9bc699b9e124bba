use netpolicy::{Packet, field, fwd};

fn main() {
    // Two switches joined by port 2 on switch 1 and port 1 on switch 2.
    let policy = (field("switch").eq(1_i64) >> fwd(2)) + (field("switch").eq(2_i64) >> fwd(1));

    println!("policy: {policy}");

    let classifier = policy.compile().expect("failed to compile policy");
    println!("{classifier}");

    let pkt = Packet::new().set("switch", 1_i64).set("inport", 1_i64);
    match classifier.eval(&pkt) {
        Ok(out) => {
            for p in &out {
                println!("{pkt} => {p}");
            }
        }
        Err(e) => println!("evaluation failed: {e}"),
    }
}
