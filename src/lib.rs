//! A network-policy algebra and its compiler to prioritized match-action
//! rule tables.
//!
//! Policies are built from primitives (match, modify, drop, controller,
//! query sinks) with parallel (`+`) and sequential (`>>`) composition and the
//! boolean filter operators. Any policy can be evaluated directly against a
//! [`Packet`], or compiled into a [`Classifier`] that produces the same
//! output for every packet.

pub mod bucket;
mod compile;
mod compose;
mod error;
mod evaluate;
pub mod parse;
pub mod topology;
mod types;

pub use compile::CompileConfig;
pub use error::NetPolicyError;
pub use types::headers;
pub use types::{
    Action, Classifier, CompileError, Derived, DerivedForm, DynamicPolicy, EvalError,
    EvaluationReport, FieldRef, Filter, HeaderMatch, HeaderModify, HeaderSet, Observer, Packet,
    Pattern, Policy, PolicyError, Predicate, Rule, Value, field, fwd, if_, link, xfwd,
};
