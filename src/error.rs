use thiserror::Error;

use crate::parse::ParseError;
use crate::{CompileError, EvalError, PolicyError};

/// Unified error type covering parsing, policy construction, compilation
/// and classifier evaluation.
///
/// Returned by convenience methods like
/// [`Policy::from_dsl()`](crate::Policy::from_dsl).
#[derive(Debug, Error)]
pub enum NetPolicyError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}
