use std::fmt;

use super::{HeaderMatch, Packet};

/// The match side of a classifier rule.
///
/// `Identity` accepts every packet (top), `Drop` accepts none (bottom).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Predicate {
    Identity,
    Drop,
    Match(HeaderMatch),
}

impl Predicate {
    #[must_use]
    pub fn matches(&self, pkt: &Packet) -> bool {
        match self {
            Predicate::Identity => true,
            Predicate::Drop => false,
            Predicate::Match(m) => m.matches(pkt),
        }
    }

    /// Conjunction. Total: incompatible matches yield [`Predicate::Drop`].
    #[must_use]
    pub fn intersect(&self, other: &Predicate) -> Predicate {
        match (self, other) {
            (Predicate::Drop, _) | (_, Predicate::Drop) => Predicate::Drop,
            (Predicate::Identity, p) | (p, Predicate::Identity) => p.clone(),
            (Predicate::Match(a), Predicate::Match(b)) => {
                a.intersect(b).map_or(Predicate::Drop, Predicate::Match)
            }
        }
    }

    /// Whether every packet accepted by `other` is also accepted by `self`.
    ///
    /// One-directional; used to find rules shadowed by a higher-priority rule.
    #[must_use]
    pub fn covers(&self, other: &Predicate) -> bool {
        match (self, other) {
            (Predicate::Identity, _) | (_, Predicate::Drop) => true,
            (Predicate::Drop, _) | (Predicate::Match(_), Predicate::Identity) => false,
            (Predicate::Match(a), Predicate::Match(b)) => a.covers(b),
        }
    }
}

impl From<HeaderMatch> for Predicate {
    fn from(m: HeaderMatch) -> Self {
        Predicate::Match(m)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Identity => write!(f, "identity"),
            Predicate::Drop => write!(f, "drop"),
            Predicate::Match(m) => write!(f, "match({m})"),
        }
    }
}
