use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use netpolicy::topology::{
    EgressNetwork, Flood, IngressNetwork, Location, NetworkAware, SpanningTree, StaticTopology,
};
use netpolicy::Packet;

fn main() {
    let flood = Flood::new();
    let ingress = IngressNetwork::new();
    let egress = EgressNetwork::new();

    let policy = ingress.filter() >> flood.policy() >> egress.filter();
    let classifier = Arc::new(Mutex::new(
        policy.compile().expect("failed to compile policy"),
    ));

    // Recompile whenever one of the reactive pieces changes.
    for node in policy.dynamic_policies() {
        let policy = policy.clone();
        let classifier = Arc::clone(&classifier);
        node.attach(move || match policy.compile() {
            Ok(c) => {
                println!("recompiled: {} rules", c.len());
                *classifier.lock().expect("classifier lock poisoned") = c;
            }
            Err(e) => println!("recompile failed: {e}"),
        });
    }

    let topo = StaticTopology {
        egress: BTreeSet::from([
            Location::new(1, 1),
            Location::new(2, 1),
            Location::new(2, 4),
        ]),
        tree: SpanningTree::new()
            .with_node(1, [1, 2])
            .with_node(2, [1, 2, 4]),
    };
    for piece in [&flood as &dyn NetworkAware, &ingress, &egress] {
        piece.set_network(&topo);
    }

    let pkt = Packet::new().set("switch", 2_i64).set("inport", 1_i64);
    let out = classifier
        .lock()
        .expect("classifier lock poisoned")
        .eval(&pkt);
    println!("{pkt} => {out:?}");
}
