use crate::topology::{PortNo, SwitchId};
use crate::{Filter, Pattern, Policy, PolicyError, Value, if_, link};

/// Binary operators of the policy DSL, loosest-binding last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Parallel,
    /// `-`
    Difference,
    /// `>>`
    Sequential,
    /// `&`
    Intersection,
    /// `|`
    Union,
}

/// The result of parsing a policy expression, before filter typing.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyExpr {
    Identity,
    Drop,
    Controller,
    Match(Vec<(String, Pattern)>),
    Modify(Vec<(String, Option<Value>)>),
    Fwd(PortNo),
    Xfwd(PortNo),
    Link {
        switch_out: SwitchId,
        port_out: PortNo,
        switch_in: SwitchId,
        port_in: PortNo,
    },
    If {
        predicate: Box<PolicyExpr>,
        then: Box<PolicyExpr>,
        otherwise: Option<Box<PolicyExpr>>,
    },
    Not(Box<PolicyExpr>),
    Binary {
        op: BinaryOp,
        lhs: Box<PolicyExpr>,
        rhs: Box<PolicyExpr>,
    },
}

impl PolicyExpr {
    /// Build the policy, checking that boolean operators only see filters.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] for an empty `match()`/`modify()` or a
    /// non-filter operand of `~`, `&`, `|`, `-` or an `if` predicate.
    pub fn lower(&self) -> Result<Policy, PolicyError> {
        Ok(match self {
            PolicyExpr::Identity => Policy::Identity,
            PolicyExpr::Drop => Policy::Drop,
            PolicyExpr::Controller => Policy::Controller,
            PolicyExpr::Match(fields) => Filter::matching(fields.iter().cloned())?.into(),
            PolicyExpr::Modify(fields) => Policy::modifying(fields.iter().cloned())?,
            PolicyExpr::Fwd(port) => crate::fwd(*port),
            PolicyExpr::Xfwd(port) => crate::xfwd(*port),
            PolicyExpr::Link {
                switch_out,
                port_out,
                switch_in,
                port_in,
            } => link(*switch_out, *port_out, *switch_in, *port_in),
            PolicyExpr::If {
                predicate,
                then,
                otherwise,
            } => {
                let otherwise = match otherwise {
                    Some(e) => e.lower()?,
                    None => Policy::Identity,
                };
                if_(predicate.lower_filter()?, then.lower()?, otherwise)
            }
            PolicyExpr::Not(inner) => (!inner.lower_filter()?).into(),
            PolicyExpr::Binary { op, lhs, rhs } => match op {
                BinaryOp::Parallel => lhs.lower()? + rhs.lower()?,
                BinaryOp::Sequential => lhs.lower()? >> rhs.lower()?,
                BinaryOp::Difference => (lhs.lower_filter()? - rhs.lower_filter()?).into(),
                BinaryOp::Intersection => (lhs.lower_filter()? & rhs.lower_filter()?).into(),
                BinaryOp::Union => (lhs.lower_filter()? | rhs.lower_filter()?).into(),
            },
        })
    }

    fn lower_filter(&self) -> Result<Filter, PolicyError> {
        Filter::try_from(self.lower()?)
    }
}
