//! Reactive built-in policies driven by network topology snapshots.
//!
//! The topology itself lives outside this crate; it is consumed through the
//! [`Topology`] trait. Each built-in caches the part of the last snapshot it
//! depends on and only rebuilds its policy when that part changes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::{DynamicPolicy, Filter, HeaderMatch, Pattern, Policy, xfwd};

pub type SwitchId = i64;
pub type PortNo = i64;

/// A port on a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub switch: SwitchId,
    pub port: PortNo,
}

impl Location {
    #[must_use]
    pub fn new(switch: SwitchId, port: PortNo) -> Self {
        Self { switch, port }
    }
}

/// Switches of a spanning tree and, for each, the ports that stay on the
/// tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanningTree {
    nodes: BTreeMap<SwitchId, BTreeSet<PortNo>>,
}

impl SpanningTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a switch with the given tree ports, merging with any ports
    /// already recorded.
    #[must_use]
    pub fn with_node(mut self, switch: SwitchId, ports: impl IntoIterator<Item = PortNo>) -> Self {
        self.nodes.entry(switch).or_default().extend(ports);
        self
    }

    pub fn nodes(&self) -> impl Iterator<Item = (SwitchId, &BTreeSet<PortNo>)> {
        self.nodes.iter().map(|(s, p)| (*s, p))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A network topology snapshot.
pub trait Topology {
    /// Ports facing hosts or other networks rather than another switch.
    fn egress_locations(&self) -> BTreeSet<Location>;

    fn minimum_spanning_tree(&self) -> SpanningTree;
}

/// A topology described up front. Handy for tests and for networks whose
/// shape is known statically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticTopology {
    pub egress: BTreeSet<Location>,
    pub tree: SpanningTree,
}

impl Topology for StaticTopology {
    fn egress_locations(&self) -> BTreeSet<Location> {
        self.egress.clone()
    }

    fn minimum_spanning_tree(&self) -> SpanningTree {
        self.tree.clone()
    }
}

/// A policy that reacts to topology changes.
pub trait NetworkAware {
    /// Feed a new snapshot. Rebuilds the policy if the relevant part of the
    /// snapshot changed.
    fn set_network(&self, network: &dyn Topology);

    /// The dynamic policy to compose into a larger tree.
    fn dynamic(&self) -> &DynamicPolicy;
}

fn location_match(loc: &Location, port_field: &str) -> Filter {
    Filter::from(
        HeaderMatch::single("switch".to_owned(), Pattern::from(loc.switch))
            .with(port_field, Pattern::from(loc.port)),
    )
}

/// Floods every packet along the minimum spanning tree, never back out the
/// port it arrived on.
#[derive(Debug, Default)]
pub struct Flood {
    dynamic: DynamicPolicy,
    mst: Mutex<Option<SpanningTree>>,
}

impl Flood {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The reactive policy, to compose into a larger tree.
    #[must_use]
    pub fn policy(&self) -> Policy {
        Policy::Dynamic(self.dynamic.clone())
    }

    fn build(tree: &SpanningTree) -> Policy {
        Policy::parallel(tree.nodes().map(|(switch, ports)| {
            let on_switch = Filter::from(HeaderMatch::single(
                "switch".to_owned(),
                Pattern::from(switch),
            ));
            on_switch >> Policy::parallel(ports.iter().map(|p| xfwd(*p)))
        }))
    }
}

impl NetworkAware for Flood {
    fn set_network(&self, network: &dyn Topology) {
        let tree = network.minimum_spanning_tree();
        let mut cached = self.mst.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.as_ref() == Some(&tree) {
            return;
        }
        let policy = Self::build(&tree);
        let switches = tree.len();
        *cached = Some(tree);
        drop(cached);
        debug!(switches, "rebuilt flood policy");
        self.dynamic.replace(policy);
    }

    fn dynamic(&self) -> &DynamicPolicy {
        &self.dynamic
    }
}

/// A filter over the egress locations of the last snapshot, keyed on one
/// port header.
#[derive(Debug)]
struct EgressFilter {
    dynamic: DynamicPolicy,
    egress: Mutex<Option<BTreeSet<Location>>>,
    port_field: &'static str,
}

impl EgressFilter {
    fn new(port_field: &'static str) -> Self {
        Self {
            dynamic: DynamicPolicy::filter(Filter::DROP),
            egress: Mutex::new(None),
            port_field,
        }
    }

    fn filter(&self) -> Filter {
        Filter::from_policy_unchecked(Policy::Dynamic(self.dynamic.clone()))
    }

    fn set_network(&self, network: &dyn Topology) {
        let egress = network.egress_locations();
        let mut cached = self.egress.lock().unwrap_or_else(PoisonError::into_inner);
        if cached.as_ref() == Some(&egress) {
            return;
        }
        let filter = Filter::union(egress.iter().map(|l| location_match(l, self.port_field)));
        let locations = egress.len();
        *cached = Some(egress);
        drop(cached);
        debug!(locations, port = self.port_field, "rebuilt egress location filter");
        self.dynamic.replace(filter.into());
    }
}

/// Passes packets that entered the network through an egress port.
#[derive(Debug)]
pub struct IngressNetwork(EgressFilter);

impl IngressNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self(EgressFilter::new("inport"))
    }

    /// The reactive filter, ready for the boolean operators.
    #[must_use]
    pub fn filter(&self) -> Filter {
        self.0.filter()
    }
}

impl Default for IngressNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkAware for IngressNetwork {
    fn set_network(&self, network: &dyn Topology) {
        self.0.set_network(network);
    }

    fn dynamic(&self) -> &DynamicPolicy {
        &self.0.dynamic
    }
}

/// Passes packets leaving the network through an egress port.
#[derive(Debug)]
pub struct EgressNetwork(EgressFilter);

impl EgressNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self(EgressFilter::new("outport"))
    }

    #[must_use]
    pub fn filter(&self) -> Filter {
        self.0.filter()
    }
}

impl Default for EgressNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkAware for EgressNetwork {
    fn set_network(&self, network: &dyn Topology) {
        self.0.set_network(network);
    }

    fn dynamic(&self) -> &DynamicPolicy {
        &self.0.dynamic
    }
}
