use std::collections::HashSet;
use std::fmt;
use std::ops::{Add, Shr};

use super::error::EvalError;
use super::evaluation_report::EvaluationReport;
use super::{Action, Packet, Predicate, Rule};

/// A priority-ordered rule table: the compiled form of a policy.
///
/// Rules are read top to bottom and the first rule whose predicate accepts a
/// packet decides its fate. Classifiers produced by
/// [`Policy::compile`](crate::Policy::compile) are total: their last rule
/// accepts every packet.
///
/// # Example
///
/// ```
/// use netpolicy::{field, fwd, Packet};
///
/// let policy = field("switch").eq(1_i64) >> fwd(2);
/// let classifier = policy.compile().unwrap();
///
/// let pkt = Packet::new().set("switch", 1_i64);
/// let out = classifier.eval(&pkt).unwrap();
/// assert!(out.contains(&pkt.clone().set("outport", 2_i64)));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Classifier {
    pub(crate) rules: Vec<Rule>,
}

impl Classifier {
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The single-rule classifier `(Identity, [action])`.
    #[must_use]
    pub fn single(action: Action) -> Self {
        Self::new(vec![Rule::new(Predicate::Identity, vec![action])])
    }

    /// The classifier that drops every packet.
    #[must_use]
    pub fn drop_all() -> Self {
        Self::single(Action::Drop)
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply the first matching rule to a packet.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::NotTotal`] if no rule accepts the packet.
    pub fn eval(&self, pkt: &Packet) -> Result<HashSet<Packet>, EvalError> {
        crate::evaluate::eval_classifier(self, pkt)
    }

    /// Like [`eval`](Self::eval), also reporting which rule fired and how
    /// long the lookup took.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::NotTotal`] if no rule accepts the packet.
    pub fn eval_detailed(&self, pkt: &Packet) -> Result<EvaluationReport, EvalError> {
        crate::evaluate::eval_classifier_detailed(self, pkt)
    }

    /// Remove every rule shadowed by a higher-priority rule.
    #[must_use]
    pub fn optimize(self) -> Self {
        crate::compose::optimize(self)
    }
}

impl From<Vec<Rule>> for Classifier {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}

impl<'a> IntoIterator for &'a Classifier {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// Parallel composition of two rule tables.
impl Add for Classifier {
    type Output = Classifier;

    fn add(self, rhs: Classifier) -> Classifier {
        crate::compose::parallel(&self, &rhs, true)
    }
}

/// Sequential composition of two rule tables.
impl Shr for Classifier {
    type Output = Classifier;

    fn shr(self, rhs: Classifier) -> Classifier {
        crate::compose::sequential(&self, &rhs, true)
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Classifier({} rules)", self.rules.len())?;
        for (i, rule) in self.rules.iter().enumerate() {
            writeln!(f, "  {i:>3}: {rule}")?;
        }
        Ok(())
    }
}
