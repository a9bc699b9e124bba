//! Query sinks: terminal actions that consume packets into a shared buffer
//! for out-of-band delivery.
//!
//! Evaluation may run on any thread, so every sink keeps its packets in a
//! [`PacketBuffer`] guarded by a single lock. Draining moves the buffered
//! packets out under that same lock, so an insert either lands before a
//! drain (and is delivered by it) or after it (and waits for the next one).

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::topology::SwitchId;
use crate::{HeaderMatch, Packet, Pattern, Predicate};

pub type PacketCallback = Arc<dyn Fn(&Packet) + Send + Sync>;
pub type CountCallback = Arc<dyn Fn(Counts) + Send + Sync>;
pub type StatsQuery = Arc<dyn Fn() + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A packet buffer shared between evaluating threads and a drainer.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    packets: Mutex<Vec<Packet>>,
}

impl PacketBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pkt: Packet) {
        lock(&self.packets).push(pkt);
    }

    /// Take every buffered packet, leaving the buffer empty.
    #[must_use]
    pub fn drain(&self) -> Vec<Packet> {
        std::mem::take(&mut *lock(&self.packets))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.packets).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct FwdState {
    buffer: PacketBuffer,
    callbacks: Mutex<Vec<PacketCallback>>,
}

/// Delivers each packet that reaches it to the registered callbacks.
#[derive(Clone, Default)]
pub struct FwdBucket {
    inner: Arc<FwdState>,
}

impl FwdBucket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callback(&self, f: impl Fn(&Packet) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).push(Arc::new(f));
    }

    /// Buffer a packet for the next [`apply`](Self::apply).
    pub fn insert(&self, pkt: Packet) {
        self.inner.buffer.insert(pkt);
    }

    /// Number of packets waiting for delivery.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Drain the buffer, handing every packet to every callback. Returns the
    /// number of packets drained.
    pub fn apply(&self) -> usize {
        let packets = self.inner.buffer.drain();
        let callbacks = lock(&self.inner.callbacks).clone();
        for pkt in &packets {
            for cb in &callbacks {
                cb(pkt);
            }
        }
        debug!(packets = packets.len(), callbacks = callbacks.len(), "drained forward bucket");
        packets.len()
    }
}

impl fmt::Debug for FwdBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FwdBucket")
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}

/// Packet and byte totals reported by a [`CountBucket`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub packets: u64,
    pub bytes: u64,
}

/// One entry of a switch's flow-statistics reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStat {
    /// The table entry's match, if the reply carried one.
    pub predicate: Option<Predicate>,
    pub packet_count: u64,
    pub byte_count: u64,
}

#[derive(Default)]
struct CountState {
    in_update: bool,
    matches: HashSet<Predicate>,
    stats_query: Option<StatsQuery>,
    outstanding: Vec<SwitchId>,
    current: Counts,
    persistent: Counts,
}

#[derive(Default)]
struct CountInner {
    buffer: PacketBuffer,
    callbacks: Mutex<Vec<CountCallback>>,
    state: Mutex<CountState>,
    idle: Condvar,
}

/// Counts the packets and bytes that reach it.
///
/// Packets evaluated by the controller are buffered and folded into the
/// persistent totals by [`apply`](Self::apply). Packets counted by switch
/// tables arrive later as flow-statistics replies, which are only attributed
/// once no update is in flight (see [`begin_update`](Self::begin_update)).
#[derive(Clone, Default)]
pub struct CountBucket {
    inner: Arc<CountInner>,
}

impl CountBucket {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_callback(&self, f: impl Fn(Counts) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).push(Arc::new(f));
    }

    pub fn insert(&self, pkt: Packet) {
        self.inner.buffer.insert(pkt);
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Fold buffered packets into the persistent totals. A packet's size is
    /// its `header_len` plus `payload_len`. Returns the number drained.
    pub fn apply(&self) -> usize {
        let packets = self.inner.buffer.drain();
        let mut state = lock(&self.inner.state);
        for pkt in &packets {
            state.persistent.packets += 1;
            state.persistent.bytes += header_int(pkt, "header_len") + header_int(pkt, "payload_len");
        }
        debug!(packets = packets.len(), "drained count bucket");
        packets.len()
    }

    /// Totals as of the last completed statistics round.
    #[must_use]
    pub fn counts(&self) -> Counts {
        lock(&self.inner.state).current
    }

    /// Totals folded in by [`apply`](Self::apply).
    #[must_use]
    pub fn persistent_counts(&self) -> Counts {
        lock(&self.inner.state).persistent
    }

    /// Mark the start of a multi-step rule installation. Resets the set of
    /// interesting matches, the registered stats query and any outstanding
    /// switch queries.
    pub fn begin_update(&self) {
        let mut state = lock(&self.inner.state);
        state.in_update = true;
        state.matches.clear();
        state.stats_query = None;
        state.outstanding.clear();
    }

    /// Mark the update finished and wake anyone waiting to attribute stats.
    pub fn end_update(&self) {
        lock(&self.inner.state).in_update = false;
        self.inner.idle.notify_all();
    }

    #[must_use]
    pub fn is_updating(&self) -> bool {
        lock(&self.inner.state).in_update
    }

    /// Register a table match whose counters belong to this bucket.
    pub fn add_match(&self, predicate: Predicate) {
        lock(&self.inner.state).matches.insert(predicate);
    }

    /// Register the function that issues statistics requests to switches.
    /// Only the first registration after [`begin_update`](Self::begin_update)
    /// takes effect.
    pub fn set_stats_query(&self, f: impl Fn() + Send + Sync + 'static) {
        let mut state = lock(&self.inner.state);
        if state.stats_query.is_none() {
            state.stats_query = Some(Arc::new(f));
        }
    }

    pub fn add_outstanding_switch_query(&self, switch: SwitchId) {
        lock(&self.inner.state).outstanding.push(switch);
    }

    /// Start a statistics round. With a registered query, issue it and let
    /// the replies complete the round; otherwise report the persistent
    /// totals immediately.
    pub fn pull_stats(&self) {
        let mut state = self.wait_idle();
        state.current = state.persistent;
        if let Some(query) = state.stats_query.clone() {
            state.outstanding.clear();
            drop(state);
            query();
        } else {
            let counts = state.current;
            drop(state);
            self.notify(counts);
        }
    }

    /// Attribute a switch's flow-statistics reply. Entries whose match, as
    /// installed on `switch` or network-wide, is one of this bucket's matches
    /// are added to the current totals. Callbacks fire once every
    /// outstanding switch has replied.
    pub fn handle_flow_stats_reply(&self, switch: SwitchId, stats: &[FlowStat]) {
        let mut state = self.wait_idle();
        let Some(pos) = state.outstanding.iter().position(|s| *s == switch) else {
            debug!(switch, "ignoring stats reply from switch with no outstanding query");
            return;
        };
        let on_switch = Predicate::Match(HeaderMatch::single(
            "switch".to_owned(),
            Pattern::from(switch),
        ));
        for stat in stats {
            let Some(network) = &stat.predicate else {
                continue;
            };
            let table = network.intersect(&on_switch);
            if state.matches.contains(&table) || state.matches.contains(network) {
                state.current.packets += stat.packet_count;
                state.current.bytes += stat.byte_count;
            }
        }
        state.outstanding.remove(pos);
        let done = state.outstanding.is_empty();
        let counts = state.current;
        drop(state);
        debug!(switch, done, "attributed flow stats reply");
        if done {
            self.notify(counts);
        }
    }

    fn wait_idle(&self) -> MutexGuard<'_, CountState> {
        let mut state = lock(&self.inner.state);
        while state.in_update {
            state = self
                .inner
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    fn notify(&self, counts: Counts) {
        let callbacks = lock(&self.inner.callbacks).clone();
        for cb in &callbacks {
            cb(counts);
        }
    }
}

fn header_int(pkt: &Packet, field: &str) -> u64 {
    pkt.get(field)
        .and_then(crate::Value::as_int)
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(0)
}

impl fmt::Debug for CountBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountBucket")
            .field("buffered", &self.buffered())
            .field("persistent", &self.persistent_counts())
            .finish_non_exhaustive()
    }
}

/// A query sink as it appears in a policy or a rule's action list.
///
/// Sinks have identity: two handles are equal only if they share the same
/// buffer.
#[derive(Debug, Clone)]
pub enum Bucket {
    Forward(FwdBucket),
    Count(CountBucket),
}

impl Bucket {
    /// Consume a packet into the sink.
    pub fn insert(&self, pkt: Packet) {
        match self {
            Bucket::Forward(b) => b.insert(pkt),
            Bucket::Count(b) => b.insert(pkt),
        }
    }

    /// Drain the sink to its callbacks or counters.
    pub fn apply(&self) -> usize {
        match self {
            Bucket::Forward(b) => b.apply(),
            Bucket::Count(b) => b.apply(),
        }
    }
}

impl PartialEq for Bucket {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Bucket::Forward(a), Bucket::Forward(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (Bucket::Count(a), Bucket::Count(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl From<FwdBucket> for Bucket {
    fn from(b: FwdBucket) -> Self {
        Bucket::Forward(b)
    }
}

impl From<CountBucket> for Bucket {
    fn from(b: CountBucket) -> Self {
        Bucket::Count(b)
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Forward(_) => write!(f, "fwd_bucket"),
            Bucket::Count(_) => write!(f, "count_bucket"),
        }
    }
}
