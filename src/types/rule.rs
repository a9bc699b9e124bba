use std::fmt;

use super::{Action, Predicate};

/// One classifier entry: packets accepted by `predicate` receive the union
/// of `actions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub(crate) predicate: Predicate,
    pub(crate) actions: Vec<Action>,
}

impl Rule {
    #[must_use]
    pub fn new(predicate: Predicate, actions: Vec<Action>) -> Self {
        Self { predicate, actions }
    }

    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> [", self.predicate)?;
        for (i, a) in self.actions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{a}")?;
        }
        write!(f, "]")
    }
}
