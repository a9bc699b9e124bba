use std::fmt;

use super::HeaderModify;
use crate::bucket::Bucket;

/// What a classifier rule does to a packet it matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Pass the packet on unchanged.
    Identity,
    /// Discard the packet.
    Drop,
    /// Rewrite headers and pass the result on.
    Modify(HeaderModify),
    /// Hand the packet to the control plane.
    Controller,
    /// Consume the packet into a query sink.
    Query(Bucket),
}

impl Action {
    /// Whether the packet leaves the switch pipeline: nothing sequenced
    /// after a terminal action can observe it.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Controller | Action::Query(_))
    }
}

impl From<HeaderModify> for Action {
    fn from(m: HeaderModify) -> Self {
        Action::Modify(m)
    }
}

impl From<Bucket> for Action {
    fn from(b: Bucket) -> Self {
        Action::Query(b)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Identity => write!(f, "identity"),
            Action::Drop => write!(f, "drop"),
            Action::Modify(m) => write!(f, "modify({m})"),
            Action::Controller => write!(f, "controller"),
            Action::Query(b) => write!(f, "{b}"),
        }
    }
}
