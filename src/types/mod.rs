mod action;
mod classifier;
mod derived;
mod dynamic;
mod error;
mod evaluation_report;
mod header_match;
pub mod headers;
mod packet;
mod pattern;
mod policy;
mod predicate;
mod rule;
mod value;

pub use action::Action;
pub use classifier::Classifier;
pub use derived::{Derived, DerivedForm};
pub use dynamic::{DynamicPolicy, Observer};
pub use error::{CompileError, EvalError, PolicyError};
pub use evaluation_report::EvaluationReport;
pub use header_match::{HeaderMatch, HeaderModify};
pub use headers::HeaderSet;
pub use packet::Packet;
pub use pattern::Pattern;
pub use policy::{FieldRef, Filter, Policy, field, fwd, if_, link, xfwd};
pub use predicate::Predicate;
pub use rule::Rule;
pub use value::Value;
