use std::fmt;

use super::policy::{fwd, Filter, Operand, Policy};
use super::{HeaderMatch, HeaderModify, Pattern, Value};
use crate::topology::{PortNo, SwitchId};

/// The user-facing form of a derived policy.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedForm {
    /// `a - b`: packets passed by `a` but not `b`.
    Difference(Filter, Filter),
    /// `if(predicate, then, otherwise)`.
    Conditional {
        predicate: Filter,
        then: Policy,
        otherwise: Policy,
    },
    /// `fwd(port)`.
    Forward(PortNo),
    /// `xfwd(port)`: forward unless `port` is the ingress port.
    ExclusiveForward(PortNo),
    /// `link(switch_out, port_out, switch_in, port_in)`.
    Link {
        switch_out: SwitchId,
        port_out: PortNo,
        switch_in: SwitchId,
        port_in: PortNo,
    },
}

/// A macro over the core combinators. Evaluation and compilation use the
/// expansion; printing uses the form it was written in.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    form: DerivedForm,
    policy: Policy,
}

impl Derived {
    #[must_use]
    pub fn new(form: DerivedForm) -> Self {
        let policy = expand(&form);
        Self { form, policy }
    }

    #[must_use]
    pub fn form(&self) -> &DerivedForm {
        &self.form
    }

    /// The equivalent policy built from core combinators.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

fn expand(form: &DerivedForm) -> Policy {
    match form {
        DerivedForm::Difference(keep, remove) => Policy::Intersection(vec![
            keep.clone().into(),
            Policy::Negate(Box::new(remove.clone().into())),
        ]),
        DerivedForm::Conditional {
            predicate,
            then,
            otherwise,
        } => {
            let pass: Policy = predicate.clone().into();
            let fail = Policy::Negate(Box::new(pass.clone()));
            Policy::Parallel(vec![
                Policy::Sequential(vec![pass, then.clone()]),
                Policy::Sequential(vec![fail, otherwise.clone()]),
            ])
        }
        DerivedForm::Forward(port) => {
            Policy::Modify(HeaderModify::single("outport".to_owned(), Some(Value::Int(*port))))
        }
        DerivedForm::ExclusiveForward(port) => Policy::Sequential(vec![
            Policy::Negate(Box::new(Policy::Match(HeaderMatch::single(
                "inport".to_owned(),
                Pattern::from(*port),
            )))),
            fwd(*port),
        ]),
        DerivedForm::Link {
            switch_out,
            port_out,
            switch_in,
            port_in,
        } => {
            let on_link = HeaderMatch::single("switch".to_owned(), Pattern::from(*switch_out))
                .with("outport", Pattern::from(*port_out));
            let across = HeaderModify::single("switch".to_owned(), Some(Value::Int(*switch_in)))
                .with("inport", Some(Value::Int(*port_in)))
                .with("outport", None);
            Policy::Sequential(vec![Policy::Match(on_link), Policy::Modify(across)])
        }
    }
}

impl fmt::Display for Derived {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.form {
            DerivedForm::Difference(keep, remove) => {
                write!(f, "{} - {}", Operand(keep), Operand(remove))
            }
            DerivedForm::Conditional {
                predicate,
                then,
                otherwise,
            } => write!(f, "if({predicate}, {then}, {otherwise})"),
            DerivedForm::Forward(port) => write!(f, "fwd({port})"),
            DerivedForm::ExclusiveForward(port) => write!(f, "xfwd({port})"),
            DerivedForm::Link {
                switch_out,
                port_out,
                switch_in,
                port_in,
            } => write!(f, "link({switch_out}, {port_out}, {switch_in}, {port_in})"),
        }
    }
}
