use std::collections::HashSet;
use std::time::Instant;

use tracing::error;

use crate::bucket::Bucket;
use crate::{Action, Classifier, EvalError, EvaluationReport, Packet, Policy};

/// What evaluation does when a packet reaches a query sink.
pub(crate) enum Effects<'a> {
    /// Buffer the packet in the sink once the evaluation finishes. A sink
    /// reached several times by the same packet buffers it once.
    Live(Vec<(Bucket, Packet)>),
    /// Nothing.
    Dry,
    /// Record the sink without buffering.
    Collect(&'a mut Vec<Bucket>),
}

pub(crate) fn eval_policy(policy: &Policy, pkt: &Packet, mut effects: Effects<'_>) -> HashSet<Packet> {
    let out = eval(policy, pkt, &mut effects);
    if let Effects::Live(reached) = effects {
        for (bucket, p) in reached {
            bucket.insert(p);
        }
    }
    out
}

fn eval(policy: &Policy, pkt: &Packet, effects: &mut Effects<'_>) -> HashSet<Packet> {
    match policy {
        Policy::Identity => HashSet::from([pkt.clone()]),
        Policy::Drop | Policy::Controller => HashSet::new(),
        Policy::Match(m) => {
            if m.matches(pkt) {
                HashSet::from([pkt.clone()])
            } else {
                HashSet::new()
            }
        }
        Policy::Modify(m) => HashSet::from([pkt.modify(m)]),
        Policy::Query(b) => {
            match effects {
                Effects::Live(reached) => {
                    if !reached.iter().any(|(seen, p)| seen == b && p == pkt) {
                        reached.push((b.clone(), pkt.clone()));
                    }
                }
                Effects::Dry => {}
                Effects::Collect(reached) => {
                    if !reached.contains(b) {
                        reached.push(b.clone());
                    }
                }
            }
            HashSet::new()
        }
        Policy::Negate(inner) => {
            if eval(inner, pkt, effects).is_empty() {
                HashSet::from([pkt.clone()])
            } else {
                HashSet::new()
            }
        }
        Policy::Parallel(children) | Policy::Union(children) => {
            let mut out = HashSet::new();
            for child in children {
                out.extend(eval(child, pkt, effects));
            }
            out
        }
        Policy::Sequential(children) | Policy::Intersection(children) => {
            eval_sequential(children, pkt, effects)
        }
        Policy::Derived(d) => eval(d.policy(), pkt, effects),
        Policy::Dynamic(d) => eval(&d.snapshot(), pkt, effects),
    }
}

fn eval_sequential(children: &[Policy], pkt: &Packet, effects: &mut Effects<'_>) -> HashSet<Packet> {
    let mut current = HashSet::from([pkt.clone()]);
    for child in children {
        match child {
            Policy::Identity => continue,
            Policy::Drop => return HashSet::new(),
            _ => {}
        }
        let mut next = HashSet::new();
        for p in &current {
            next.extend(eval(child, p, effects));
        }
        if next.is_empty() {
            return next;
        }
        current = next;
    }
    current
}

pub(crate) fn eval_classifier(c: &Classifier, pkt: &Packet) -> Result<HashSet<Packet>, EvalError> {
    first_match(c, pkt).map(|(_, out)| out)
}

pub(crate) fn eval_classifier_detailed(
    c: &Classifier,
    pkt: &Packet,
) -> Result<EvaluationReport, EvalError> {
    let start = Instant::now();
    let (index, outputs) = first_match(c, pkt)?;
    Ok(EvaluationReport::new(outputs, index, start.elapsed()))
}

fn first_match(c: &Classifier, pkt: &Packet) -> Result<(usize, HashSet<Packet>), EvalError> {
    let Some((index, rule)) = c
        .rules
        .iter()
        .enumerate()
        .find(|(_, r)| r.predicate.matches(pkt))
    else {
        error!(packet = %pkt, rules = c.len(), "no classifier rule matches packet");
        return Err(EvalError::NotTotal {
            packet: pkt.to_string(),
        });
    };
    let mut out = HashSet::new();
    for action in &rule.actions {
        apply_action(action, pkt, &mut out);
    }
    Ok((index, out))
}

fn apply_action(action: &Action, pkt: &Packet, out: &mut HashSet<Packet>) {
    match action {
        Action::Identity => {
            out.insert(pkt.clone());
        }
        Action::Drop | Action::Controller => {}
        Action::Modify(m) => {
            out.insert(pkt.modify(m));
        }
        Action::Query(b) => b.insert(pkt.clone()),
    }
}

#[cfg(test)]
mod tests {
    use crate::bucket::{Bucket, CountBucket, FwdBucket};
    use crate::{Filter, Packet, Policy, field, fwd};

    fn pkt() -> Packet {
        Packet::new().set("switch", 1_i64).set("inport", 1_i64)
    }

    #[test]
    fn sequential_short_circuits_on_drop() {
        let bucket = CountBucket::new();
        let p = Policy::Drop >> bucket.clone();
        assert!(p.eval(&pkt()).is_empty());
        assert_eq!(bucket.buffered(), 0);
    }

    #[test]
    fn sequential_stops_when_nothing_left() {
        let bucket = CountBucket::new();
        let p = field("switch").eq(2_i64) >> bucket.clone();
        assert!(p.eval(&pkt()).is_empty());
        assert_eq!(bucket.buffered(), 0);
    }

    #[test]
    fn empty_sequential_is_identity() {
        let out = Policy::Sequential(vec![]).eval(&pkt());
        assert!(out.contains(&pkt()));
    }

    #[test]
    fn parallel_unions() {
        let out = (fwd(1) + fwd(2) + Policy::Drop).eval(&pkt());
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn sequential_fans_out() {
        let p = (fwd(1) + fwd(2)) >> field("outport").eq(2_i64);
        let out = p.eval(&pkt());
        assert_eq!(out.len(), 1);
        assert!(out.contains(&pkt().set("outport", 2_i64)));
    }

    #[test]
    fn query_buffers_and_returns_nothing() {
        let bucket = FwdBucket::new();
        let p = fwd(3) >> bucket.clone();
        assert!(p.eval(&pkt()).is_empty());
        assert_eq!(bucket.buffered(), 1);
    }

    #[test]
    fn dry_eval_has_no_side_effects() {
        let bucket = CountBucket::new();
        let p = Policy::from(bucket.clone()) + Policy::Identity;
        assert_eq!(p.dry_eval(&pkt()).len(), 1);
        assert_eq!(bucket.buffered(), 0);
    }

    #[test]
    fn queries_in_eval_reports_reached_sinks() {
        let reached = CountBucket::new();
        let missed = CountBucket::new();
        let p = (field("switch").eq(1_i64) >> reached.clone())
            + (field("switch").eq(2_i64) >> missed.clone())
            + fwd(4);
        let (queries, out) = p.queries_in_eval(&pkt());
        assert_eq!(queries, vec![Bucket::from(reached.clone())]);
        assert_eq!(out.len(), 1);
        assert_eq!(reached.buffered(), 0);
    }

    #[test]
    fn negate_inverts_filter() {
        let f = !field("switch").eq(1_i64);
        assert!(f.eval(&pkt()).is_empty());
        assert_eq!(f.eval(&pkt().set("switch", 5_i64)).len(), 1);
        assert_eq!((!Filter::DROP).eval(&pkt()).len(), 1);
    }

    #[test]
    fn sink_reached_twice_buffers_once() {
        let bucket = CountBucket::new();
        let p = (field("switch").eq(1_i64) | field("inport").eq(1_i64)) >> bucket.clone();
        assert!(p.eval(&pkt()).is_empty());
        assert_eq!(bucket.buffered(), 1);

        // Once per evaluation, not once per path.
        let both = Policy::from(bucket.clone()) + Policy::from(bucket.clone());
        let _ = both.eval(&pkt());
        assert_eq!(bucket.buffered(), 2);
    }

    #[test]
    fn distinct_packets_each_reach_the_sink() {
        let bucket = FwdBucket::new();
        let p = (fwd(1) + fwd(2)) >> bucket.clone();
        let _ = p.eval(&pkt());
        assert_eq!(bucket.buffered(), 2);
    }

    #[test]
    fn classifier_and_policy_buffer_alike_after_union() {
        let direct = CountBucket::new();
        let compiled = CountBucket::new();
        let over = |b: &CountBucket| {
            (field("switch").eq(1_i64) | field("inport").eq(1_i64)) >> b.clone()
        };

        let _ = over(&direct).eval(&pkt());
        let c = over(&compiled).compile().unwrap();
        assert!(c.eval(&pkt()).unwrap().is_empty());
        assert_eq!(compiled.buffered(), direct.buffered());
        assert_eq!(compiled.buffered(), 1);
    }

    #[test]
    fn classifier_query_buffers() {
        let bucket = CountBucket::new();
        let c = (field("switch").eq(1_i64) >> bucket.clone()).compile().unwrap();
        assert!(c.eval(&pkt()).unwrap().is_empty());
        assert!(c.eval(&pkt().set("switch", 2_i64)).unwrap().is_empty());
        assert_eq!(bucket.buffered(), 1);
    }
}
