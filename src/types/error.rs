use thiserror::Error;

/// Raised while building a policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("match requires at least one field")]
    EmptyMatch,

    #[error("modify requires at least one field")]
    EmptyModify,

    #[error("'{policy}' is not a filter")]
    NotAFilter { policy: String },
}

/// Raised while lowering a policy into a classifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("cannot negate a classifier whose rule action is '{action}'; negation requires identity or drop")]
    NonFilterAction { action: String },
}

/// Raised while evaluating a classifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("classifier is not total: no rule matches packet {packet}")]
    NotTotal { packet: String },
}
