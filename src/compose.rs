//! Merging compiled rule tables under parallel and sequential composition.

use tracing::trace;

use crate::{Action, Classifier, HeaderModify, Predicate, Rule};

/// `c1 + c2`: every packet gets the union of what each table does to it.
///
/// Overlapping regions get a combined rule ahead of both originals, so the
/// originals only fire on the part of their predicate the other table
/// leaves to its fallthrough rules.
pub(crate) fn parallel(c1: &Classifier, c2: &Classifier, optimize: bool) -> Classifier {
    let mut rules = Vec::with_capacity(c1.len() * c2.len() + c1.len() + c2.len());
    for r1 in &c1.rules {
        for r2 in &c2.rules {
            let predicate = r1.predicate.intersect(&r2.predicate);
            if predicate == Predicate::Drop {
                continue;
            }
            rules.push(Rule::new(predicate, union_actions(&r1.actions, &r2.actions)));
        }
    }
    rules.extend(c1.rules.iter().cloned());
    rules.extend(c2.rules.iter().cloned());
    trace!(left = c1.len(), right = c2.len(), merged = rules.len(), "parallel merge");
    finish(Classifier::new(rules), optimize)
}

/// The actions of two overlapping rules run side by side. A rule's outputs
/// are a set, so an action repeated on both sides runs once; otherwise a
/// shared sink would receive the packet twice.
fn union_actions(a1: &[Action], a2: &[Action]) -> Vec<Action> {
    let mut actions: Vec<Action> = Vec::with_capacity(a1.len() + a2.len());
    for act in a1.iter().chain(a2) {
        if !matches!(act, Action::Drop) && !actions.contains(act) {
            actions.push(act.clone());
        }
    }
    if actions.is_empty() {
        actions.push(Action::Drop);
    }
    actions
}

/// `c1 >> c2`: each rule of `c1` is pushed through `c2`, and the resulting
/// rules are restricted to packets the `c1` rule accepted.
pub(crate) fn sequential(c1: &Classifier, c2: &Classifier, optimize: bool) -> Classifier {
    let mut rules = Vec::new();
    for rule in &c1.rules {
        let pushed = sequence_rule(rule, c2, optimize);
        rules.extend(pushed.rules);
    }
    trace!(left = c1.len(), right = c2.len(), merged = rules.len(), "sequential merge");
    finish(Classifier::new(rules), optimize)
}

fn sequence_rule(rule: &Rule, c2: &Classifier, optimize: bool) -> Classifier {
    let pushed = sequence_actions_classifier(&rule.actions, c2, optimize);
    let rules = pushed
        .rules
        .into_iter()
        .filter_map(|r| {
            let predicate = r.predicate.intersect(&rule.predicate);
            (predicate != Predicate::Drop).then(|| Rule::new(predicate, r.actions))
        })
        .collect();
    finish(Classifier::new(rules), optimize)
}

/// The table equivalent to running `actions` (in parallel) and then `c`.
fn sequence_actions_classifier(actions: &[Action], c: &Classifier, optimize: bool) -> Classifier {
    let mut pushed = actions.iter().map(|act| sequence_action_classifier(act, c));
    let Some(first) = pushed.next() else {
        return Classifier::drop_all();
    };
    pushed.fold(first, |acc, next| parallel(&acc, &next, optimize))
}

/// The table equivalent to running `act` and then `c`.
fn sequence_action_classifier(act: &Action, c: &Classifier) -> Classifier {
    let mut rules = Vec::new();
    for rule in &c.rules {
        match commute_test(act, &rule.predicate) {
            Predicate::Drop => {}
            Predicate::Identity => {
                rules.push(Rule::new(
                    Predicate::Identity,
                    sequence_actions(act, &rule.actions),
                ));
                break;
            }
            p => rules.push(Rule::new(p, sequence_actions(act, &rule.actions))),
        }
    }
    if rules.is_empty() {
        Classifier::drop_all()
    } else {
        Classifier::new(rules)
    }
}

/// The predicate `p'` such that `act` followed by testing `p` is testing
/// `p'` followed by `act`.
pub(crate) fn commute_test(act: &Action, p: &Predicate) -> Predicate {
    if act.is_terminal() {
        // The packet has left the switch; nothing downstream can test it.
        return Predicate::Identity;
    }
    match act {
        Action::Drop => Predicate::Drop,
        Action::Modify(m) => commute_modify(m, p),
        _ => p.clone(),
    }
}

fn commute_modify(m: &HeaderModify, p: &Predicate) -> Predicate {
    let Predicate::Match(hm) = p else {
        return p.clone();
    };
    for (field, written) in m.iter() {
        let Some(pattern) = hm.get(field) else {
            continue;
        };
        if !written.is_some_and(|v| pattern.matches(v)) {
            return Predicate::Drop;
        }
    }
    hm.without(m.fields())
        .map_or(Predicate::Identity, Predicate::Match)
}

/// Compose one action with the action list of a downstream rule.
pub(crate) fn sequence_actions(a1: &Action, as2: &[Action]) -> Vec<Action> {
    if a1.is_terminal() {
        return vec![a1.clone()];
    }
    match a1 {
        Action::Drop => vec![Action::Drop],
        Action::Modify(m) => as2
            .iter()
            .map(|a2| match a2 {
                Action::Identity => Action::Modify(m.clone()),
                Action::Modify(m2) => Action::Modify(m.then(m2)),
                // Drops stay drops; sinks take the packet as it reached the rule.
                other => other.clone(),
            })
            .collect(),
        _ => as2.to_vec(),
    }
}

/// Keep a rule only if no higher-priority rule already kept covers it.
pub(crate) fn optimize(c: Classifier) -> Classifier {
    let before = c.len();
    let mut kept: Vec<Rule> = Vec::with_capacity(before);
    for rule in c.rules {
        if !kept.iter().any(|k| k.predicate.covers(&rule.predicate)) {
            kept.push(rule);
        }
    }
    trace!(before, after = kept.len(), "removed shadowed rules");
    Classifier::new(kept)
}

fn finish(c: Classifier, optimize_rules: bool) -> Classifier {
    if optimize_rules { optimize(c) } else { c }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::CountBucket;
    use crate::{HeaderMatch, Pattern, Value};

    fn m(fields: &[(&str, &str)]) -> Predicate {
        Predicate::Match(
            HeaderMatch::new(fields.iter().map(|(k, v)| (*k, v.parse::<Pattern>().unwrap())))
                .unwrap(),
        )
    }

    fn set(field: &str, v: impl Into<Value>) -> Action {
        Action::Modify(HeaderModify::new([(field, Some(v.into()))]).unwrap())
    }

    fn match_classifier(p: Predicate) -> Classifier {
        Classifier::new(vec![
            Rule::new(p, vec![Action::Identity]),
            Rule::new(Predicate::Identity, vec![Action::Drop]),
        ])
    }

    #[test]
    fn commute_identity_and_drop() {
        let p = m(&[("switch", "1")]);
        assert_eq!(commute_test(&Action::Identity, &p), p);
        assert_eq!(commute_test(&Action::Drop, &p), Predicate::Drop);
    }

    #[test]
    fn commute_terminal_is_identity() {
        let p = m(&[("switch", "1")]);
        assert_eq!(commute_test(&Action::Controller, &p), Predicate::Identity);
        let q = Action::Query(CountBucket::new().into());
        assert_eq!(commute_test(&q, &p), Predicate::Identity);
    }

    #[test]
    fn commute_modify_satisfied_field_removed() {
        let p = m(&[("outport", "2"), ("switch", "1")]);
        assert_eq!(commute_test(&set("outport", 2_i64), &p), m(&[("switch", "1")]));
        assert_eq!(
            commute_test(&set("outport", 2_i64), &m(&[("outport", "2")])),
            Predicate::Identity
        );
    }

    #[test]
    fn commute_modify_conflict_is_drop() {
        let p = m(&[("outport", "3")]);
        assert_eq!(commute_test(&set("outport", 2_i64), &p), Predicate::Drop);
    }

    #[test]
    fn commute_modify_untouched_fields_pass() {
        let p = m(&[("switch", "1")]);
        assert_eq!(commute_test(&set("outport", 2_i64), &p), p);
        assert_eq!(
            commute_test(&set("outport", 2_i64), &Predicate::Identity),
            Predicate::Identity
        );
    }

    #[test]
    fn commute_modify_address_into_prefix() {
        let p = m(&[("dstip", "10.0.0.0/24")]);
        let inside = set("dstip", std::net::Ipv4Addr::new(10, 0, 0, 9));
        let outside = set("dstip", std::net::Ipv4Addr::new(10, 0, 1, 9));
        assert_eq!(commute_test(&inside, &p), Predicate::Identity);
        assert_eq!(commute_test(&outside, &p), Predicate::Drop);
    }

    #[test]
    fn commute_unset_never_satisfies() {
        let unset = Action::Modify(HeaderModify::new([("outport", None)]).unwrap());
        assert_eq!(commute_test(&unset, &m(&[("outport", "1")])), Predicate::Drop);
    }

    #[test]
    fn sequence_modify_overlays() {
        let out = sequence_actions(
            &set("outport", 1_i64),
            &[Action::Identity, set("outport", 2_i64), Action::Drop, Action::Controller],
        );
        assert_eq!(
            out,
            vec![
                set("outport", 1_i64),
                set("outport", 2_i64),
                Action::Drop,
                Action::Controller,
            ]
        );
    }

    #[test]
    fn sequence_terminal_absorbs() {
        assert_eq!(
            sequence_actions(&Action::Controller, &[set("outport", 1_i64)]),
            vec![Action::Controller]
        );
        assert_eq!(
            sequence_actions(&Action::Drop, &[Action::Identity]),
            vec![Action::Drop]
        );
        assert_eq!(
            sequence_actions(&Action::Identity, &[Action::Controller]),
            vec![Action::Controller]
        );
    }

    #[test]
    fn parallel_overlap_outranks_originals() {
        let c1 = match_classifier(m(&[("switch", "1")]));
        let c2 = match_classifier(m(&[("inport", "2")]));
        let c = parallel(&c1, &c2, true);
        assert_eq!(
            c.rules()[0],
            Rule::new(
                m(&[("inport", "2"), ("switch", "1")]),
                vec![Action::Identity]
            )
        );
        assert_eq!(c.rules().last().unwrap().predicate(), &Predicate::Identity);
    }

    #[test]
    fn parallel_drop_drop_is_drop() {
        let c = parallel(&Classifier::drop_all(), &Classifier::drop_all(), true);
        assert_eq!(c, Classifier::drop_all());
    }

    #[test]
    fn sequential_match_then_modify() {
        let c1 = match_classifier(m(&[("switch", "1")]));
        let c2 = Classifier::single(set("outport", 2_i64));
        let c = sequential(&c1, &c2, true);
        assert_eq!(
            c.rules(),
            &[
                Rule::new(m(&[("switch", "1")]), vec![set("outport", 2_i64)]),
                Rule::new(Predicate::Identity, vec![Action::Drop]),
            ]
        );
    }

    #[test]
    fn sequential_modify_then_match() {
        let c1 = Classifier::single(set("outport", 2_i64));
        let c2 = Classifier::new(vec![
            Rule::new(m(&[("outport", "3")]), vec![Action::Controller]),
            Rule::new(m(&[("outport", "2"), ("switch", "1")]), vec![Action::Identity]),
            Rule::new(Predicate::Identity, vec![Action::Drop]),
        ]);
        let c = sequential(&c1, &c2, true);
        assert_eq!(
            c.rules(),
            &[
                Rule::new(m(&[("switch", "1")]), vec![set("outport", 2_i64)]),
                Rule::new(Predicate::Identity, vec![Action::Drop]),
            ]
        );
    }

    #[test]
    fn optimize_removes_shadowed() {
        let c = Classifier::new(vec![
            Rule::new(m(&[("dstip", "10.0.0.0/8")]), vec![Action::Identity]),
            Rule::new(m(&[("dstip", "10.1.0.0/16")]), vec![Action::Controller]),
            Rule::new(Predicate::Identity, vec![Action::Drop]),
            Rule::new(m(&[("switch", "1")]), vec![Action::Identity]),
        ]);
        let opt = optimize(c);
        assert_eq!(opt.len(), 2);
        assert_eq!(optimize(opt.clone()), opt);
    }

    #[test]
    fn unoptimized_keeps_shadowed_rules() {
        let c = parallel(&Classifier::drop_all(), &Classifier::drop_all(), false);
        assert_eq!(c.len(), 3);
    }
}
