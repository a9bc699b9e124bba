//! Text syntax for policies.
//!
//! The grammar follows the operator precedence of the algebra, loosest
//! first: `|`, `&`, `>>`, `+`/`-`, `~`. Atoms are `identity`, `drop`,
//! `controller`, `match(..)`, `modify(..)`, `fwd(n)`, `xfwd(n)`,
//! `link(s, p, s, p)`, `if(pred, then[, else])` and parenthesized
//! expressions. `#` starts a comment.

mod error;
mod grammar;
mod parser;

pub use error::ParseError;
pub use parser::{BinaryOp, PolicyExpr};

/// Parse a policy expression into a [`PolicyExpr`].
///
/// # Errors
///
/// Returns [`ParseError`] if the input is not valid policy syntax.
pub fn parse(input: &str) -> Result<PolicyExpr, ParseError> {
    use winnow::Parser;
    grammar::parse_policy
        .parse(input)
        .map_err(|e| ParseError::new(e.to_string()))
}
