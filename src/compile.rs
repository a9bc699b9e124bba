use tracing::debug;

use crate::compose::{optimize, parallel, sequential};
use crate::{Action, Classifier, CompileError, HeaderSet, Policy, Predicate, Rule};

/// Settings for lowering a policy into a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileConfig {
    /// Headers a switch can rewrite. A modify touching anything else is
    /// handed to the controller.
    pub compilable_headers: HeaderSet,
    /// Remove shadowed rules after every merge. Disabling this never changes
    /// behavior, but every merge then keeps its cross product and both
    /// originals, so tables grow multiplicatively with nesting depth.
    pub optimize: bool,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            compilable_headers: HeaderSet::compilable(),
            optimize: true,
        }
    }
}

pub(crate) fn compile(policy: &Policy, config: &CompileConfig) -> Result<Classifier, CompileError> {
    let classifier = lower(policy, config)?;
    debug!(rules = classifier.len(), "compiled policy");
    Ok(classifier)
}

fn lower(policy: &Policy, config: &CompileConfig) -> Result<Classifier, CompileError> {
    match policy {
        Policy::Identity => Ok(Classifier::single(Action::Identity)),
        Policy::Drop => Ok(Classifier::drop_all()),
        Policy::Match(m) => Ok(Classifier::new(vec![
            Rule::new(Predicate::Match(m.clone()), vec![Action::Identity]),
            Rule::new(Predicate::Identity, vec![Action::Drop]),
        ])),
        Policy::Modify(m) => {
            if m.writes_outside(&config.compilable_headers) {
                debug!(modify = %m, "modify writes non-switch headers; sending to controller");
                Ok(Classifier::single(Action::Controller))
            } else {
                Ok(Classifier::single(Action::Modify(m.clone())))
            }
        }
        Policy::Controller => Ok(Classifier::single(Action::Controller)),
        Policy::Query(b) => Ok(Classifier::single(Action::Query(b.clone()))),
        Policy::Negate(inner) => negate(lower(inner, config)?, config),
        Policy::Parallel(children) | Policy::Union(children) => {
            fold(children, config, Classifier::drop_all(), parallel)
        }
        Policy::Sequential(children) | Policy::Intersection(children) => fold(
            children,
            config,
            Classifier::single(Action::Identity),
            sequential,
        ),
        Policy::Derived(d) => lower(d.policy(), config),
        Policy::Dynamic(d) => lower(&d.snapshot(), config),
    }
}

fn fold(
    children: &[Policy],
    config: &CompileConfig,
    empty: Classifier,
    merge: fn(&Classifier, &Classifier, bool) -> Classifier,
) -> Result<Classifier, CompileError> {
    let mut compiled = children.iter().map(|c| lower(c, config));
    let Some(first) = compiled.next() else {
        return Ok(empty);
    };
    compiled.try_fold(first?, |acc, next| Ok(merge(&acc, &next?, config.optimize)))
}

/// Swap identity and drop in a filter's rule table.
fn negate(inner: Classifier, config: &CompileConfig) -> Result<Classifier, CompileError> {
    let mut rules = Vec::with_capacity(inner.len());
    for rule in inner.rules {
        let flipped = match rule.actions.first() {
            Some(Action::Identity) => Action::Drop,
            Some(Action::Drop) => Action::Identity,
            other => {
                return Err(CompileError::NonFilterAction {
                    action: other.map_or_else(|| "nothing".to_owned(), ToString::to_string),
                });
            }
        };
        rules.push(Rule::new(rule.predicate, vec![flipped]));
    }
    let negated = Classifier::new(rules);
    Ok(if config.optimize { optimize(negated) } else { negated })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HeaderMatch, HeaderModify, Packet, Value, field, fwd};

    fn on_switch(s: i64) -> Predicate {
        Predicate::Match(HeaderMatch::new([("switch", s)]).unwrap())
    }

    fn out(p: i64) -> Action {
        Action::Modify(HeaderModify::new([("outport", Some(Value::Int(p)))]).unwrap())
    }

    #[test]
    fn identity_and_drop_base_cases() {
        assert_eq!(
            Policy::Identity.compile().unwrap(),
            Classifier::single(Action::Identity)
        );
        assert_eq!(Policy::Drop.compile().unwrap(), Classifier::drop_all());
    }

    #[test]
    fn match_compiles_to_two_rules() {
        let c = field("switch").eq(1_i64).compile().unwrap();
        assert_eq!(
            c.rules(),
            &[
                Rule::new(on_switch(1), vec![Action::Identity]),
                Rule::new(Predicate::Identity, vec![Action::Drop]),
            ]
        );
    }

    #[test]
    fn match_then_forward() {
        let c = (field("switch").eq(1_i64) >> fwd(2)).compile().unwrap();
        assert_eq!(
            c.rules(),
            &[
                Rule::new(on_switch(1), vec![out(2)]),
                Rule::new(Predicate::Identity, vec![Action::Drop]),
            ]
        );
    }

    #[test]
    fn non_switch_header_goes_to_controller() {
        let c = field("v_header").set(7_i64).compile().unwrap();
        assert_eq!(c, Classifier::single(Action::Controller));
    }

    #[test]
    fn extra_compilable_header_stays_on_switch() {
        let config = CompileConfig {
            compilable_headers: HeaderSet::compilable().with("v_header"),
            ..CompileConfig::default()
        };
        let c = field("v_header").set(7_i64).compile_with(&config).unwrap();
        assert!(matches!(c.rules()[0].actions(), [Action::Modify(_)]));
    }

    #[test]
    fn negate_flips_actions() {
        let c = (!field("switch").eq(1_i64)).compile().unwrap();
        assert_eq!(
            c.rules(),
            &[
                Rule::new(on_switch(1), vec![Action::Drop]),
                Rule::new(Predicate::Identity, vec![Action::Identity]),
            ]
        );
    }

    #[test]
    fn negate_of_non_filter_fails() {
        let p = Policy::Negate(Box::new(fwd(1)));
        let err = p.compile().unwrap_err();
        assert_eq!(
            err,
            CompileError::NonFilterAction {
                action: "modify(outport=1)".into()
            }
        );
    }

    #[test]
    fn empty_combinators() {
        assert_eq!(
            Policy::Parallel(vec![]).compile().unwrap(),
            Classifier::drop_all()
        );
        assert_eq!(
            Policy::Sequential(vec![]).compile().unwrap(),
            Classifier::single(Action::Identity)
        );
    }

    #[test]
    fn unoptimized_compiles_same_behavior() {
        let p = (field("switch").eq(1_i64) >> fwd(2)) + (field("switch").eq(2_i64) >> fwd(1));
        let config = CompileConfig {
            optimize: false,
            ..CompileConfig::default()
        };
        let fast = p.compile().unwrap();
        let slow = p.compile_with(&config).unwrap();
        assert!(slow.len() >= fast.len());
        for s in 1..=3_i64 {
            let pkt = Packet::new().set("switch", s);
            assert_eq!(fast.eval(&pkt).unwrap(), slow.eval(&pkt).unwrap());
        }
    }

    #[test]
    fn unoptimized_sequencing_adds_no_seed_rules() {
        let config = CompileConfig {
            optimize: false,
            ..CompileConfig::default()
        };
        let chained = (fwd(1) >> fwd(2)).compile_with(&config).unwrap();
        assert_eq!(chained.rules(), &[Rule::new(Predicate::Identity, vec![out(2)])]);

        let guarded = (field("switch").eq(1_i64) >> fwd(2))
            .compile_with(&config)
            .unwrap();
        assert_eq!(
            guarded.rules(),
            &[
                Rule::new(on_switch(1), vec![out(2)]),
                Rule::new(Predicate::Identity, vec![Action::Drop]),
            ]
        );
    }
}
