use std::collections::HashSet;
use std::fmt;
use std::ops::{Add, BitAnd, BitOr, Deref, Not, Shr, Sub};
use std::sync::Arc;

use super::derived::{Derived, DerivedForm};
use super::dynamic::DynamicPolicy;
use super::error::{CompileError, PolicyError};
use super::{Classifier, HeaderMatch, HeaderModify, Packet, Pattern, Value};
use crate::bucket::{Bucket, CountBucket, FwdBucket};
use crate::compile::CompileConfig;
use crate::topology::{PortNo, SwitchId};

/// A network policy: a function from one packet to a set of packets.
///
/// Policies are built from primitives with the `+` (parallel) and `>>`
/// (sequential) operators, or with the boolean operators on [`Filter`].
/// Equality is structural: two policies that behave identically may still
/// compare unequal.
///
/// # Example
///
/// ```
/// use netpolicy::{field, fwd, Packet, Policy};
///
/// let policy = (field("switch").eq(1_i64) >> fwd(2)) + (field("switch").eq(2_i64) >> fwd(1));
///
/// let pkt = Packet::new().set("switch", 1_i64);
/// let out = policy.eval(&pkt);
/// assert!(out.contains(&pkt.clone().set("outport", 2_i64)));
/// assert_eq!(policy.compile().unwrap().eval(&pkt).unwrap(), out);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    /// Pass every packet unchanged.
    Identity,
    /// Pass no packet.
    Drop,
    /// Pass packets satisfying every field constraint.
    Match(HeaderMatch),
    /// Rewrite header fields.
    Modify(HeaderModify),
    /// Send to the control plane.
    Controller,
    /// Consume into a query sink.
    Query(Bucket),
    /// Pass exactly the packets the inner filter drops.
    Negate(Box<Policy>),
    /// Union of the children's outputs (`+`).
    Parallel(Vec<Policy>),
    /// Union of filters (`|`).
    Union(Vec<Policy>),
    /// Feed each child's output into the next (`>>`).
    Sequential(Vec<Policy>),
    /// Conjunction of filters (`&`).
    Intersection(Vec<Policy>),
    /// A macro defined in terms of the variants above.
    Derived(Box<Derived>),
    /// A policy whose definition can be replaced at runtime.
    Dynamic(DynamicPolicy),
}

impl Policy {
    /// A modify from field assignments. `None` unsets the field.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EmptyModify`] if no fields are given.
    pub fn modifying<K: Into<String>>(
        fields: impl IntoIterator<Item = (K, Option<Value>)>,
    ) -> Result<Policy, PolicyError> {
        HeaderModify::new(fields).map(Policy::Modify)
    }

    /// Parallel composition. No children is [`Policy::Drop`].
    #[must_use]
    pub fn parallel(children: impl IntoIterator<Item = Policy>) -> Policy {
        let mut children: Vec<Policy> = children.into_iter().collect();
        match children.len() {
            0 => Policy::Drop,
            1 => children.swap_remove(0),
            _ => Policy::Parallel(children),
        }
    }

    /// Sequential composition. No children is [`Policy::Identity`].
    #[must_use]
    pub fn sequential(children: impl IntoIterator<Item = Policy>) -> Policy {
        let mut children: Vec<Policy> = children.into_iter().collect();
        match children.len() {
            0 => Policy::Identity,
            1 => children.swap_remove(0),
            _ => Policy::Sequential(children),
        }
    }

    /// Parse a policy expression.
    ///
    /// # Errors
    ///
    /// Returns [`NetPolicyError`](crate::NetPolicyError) on a syntax error or
    /// when a boolean operator is applied to something that is not a filter.
    pub fn from_dsl(input: &str) -> Result<Policy, crate::NetPolicyError> {
        let expr = crate::parse::parse(input)?;
        Ok(expr.lower()?)
    }

    /// Whether this policy never alters a packet, only passes or drops it.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        match self {
            Policy::Identity | Policy::Drop | Policy::Match(_) => true,
            Policy::Modify(_) | Policy::Controller | Policy::Query(_) => false,
            Policy::Negate(inner) => inner.is_filter(),
            Policy::Parallel(children)
            | Policy::Union(children)
            | Policy::Sequential(children)
            | Policy::Intersection(children) => children.iter().all(Policy::is_filter),
            Policy::Derived(d) => d.policy().is_filter(),
            Policy::Dynamic(d) => d.is_filter(),
        }
    }

    /// Evaluate against one packet. Query sinks reached buffer the packet.
    #[must_use]
    pub fn eval(&self, pkt: &Packet) -> HashSet<Packet> {
        crate::evaluate::eval_policy(self, pkt, crate::evaluate::Effects::Live(Vec::new()))
    }

    /// Evaluate without side effects: sinks reached do not buffer.
    #[must_use]
    pub fn dry_eval(&self, pkt: &Packet) -> HashSet<Packet> {
        crate::evaluate::eval_policy(self, pkt, crate::evaluate::Effects::Dry)
    }

    /// The sinks a packet reaches, and the packets forwarded. Side-effect
    /// free.
    #[must_use]
    pub fn queries_in_eval(&self, pkt: &Packet) -> (Vec<Bucket>, HashSet<Packet>) {
        let mut reached = Vec::new();
        let out = crate::evaluate::eval_policy(
            self,
            pkt,
            crate::evaluate::Effects::Collect(&mut reached),
        );
        (reached, out)
    }

    /// Compile with the default [`CompileConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if a negated subpolicy compiles to a rule
    /// table that is not a filter.
    pub fn compile(&self) -> Result<Classifier, CompileError> {
        crate::compile::compile(self, &CompileConfig::default())
    }

    /// Compile with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] if a negated subpolicy compiles to a rule
    /// table that is not a filter.
    pub fn compile_with(&self, config: &CompileConfig) -> Result<Classifier, CompileError> {
        crate::compile::compile(self, config)
    }

    /// Visit this node and every node beneath it, depth first. Dynamic
    /// policies are visited, then their current definition.
    pub fn walk(&self, visit: &mut dyn FnMut(&Policy)) {
        visit(self);
        match self {
            Policy::Identity
            | Policy::Drop
            | Policy::Match(_)
            | Policy::Modify(_)
            | Policy::Controller
            | Policy::Query(_) => {}
            Policy::Negate(inner) => inner.walk(visit),
            Policy::Parallel(children)
            | Policy::Union(children)
            | Policy::Sequential(children)
            | Policy::Intersection(children) => {
                for child in children {
                    child.walk(visit);
                }
            }
            Policy::Derived(d) => d.policy().walk(visit),
            Policy::Dynamic(d) => {
                let inner: Arc<Policy> = d.snapshot();
                inner.walk(visit);
            }
        }
    }

    /// Every distinct dynamic policy in the tree.
    #[must_use]
    pub fn dynamic_policies(&self) -> Vec<DynamicPolicy> {
        let mut found: Vec<DynamicPolicy> = Vec::new();
        self.walk(&mut |p| {
            if let Policy::Dynamic(d) = p
                && !found.contains(d)
            {
                found.push(d.clone());
            }
        });
        found
    }

    /// Every distinct query sink in the tree.
    #[must_use]
    pub fn queries(&self) -> Vec<Bucket> {
        let mut found: Vec<Bucket> = Vec::new();
        self.walk(&mut |p| {
            if let Policy::Query(b) = p
                && !found.contains(b)
            {
                found.push(b.clone());
            }
        });
        found
    }

    fn is_compound(&self) -> bool {
        match self {
            Policy::Parallel(c)
            | Policy::Union(c)
            | Policy::Sequential(c)
            | Policy::Intersection(c) => c.len() > 1,
            Policy::Derived(d) => matches!(d.form(), DerivedForm::Difference(..)),
            _ => false,
        }
    }
}

impl From<HeaderMatch> for Policy {
    fn from(m: HeaderMatch) -> Self {
        Policy::Match(m)
    }
}

impl From<HeaderModify> for Policy {
    fn from(m: HeaderModify) -> Self {
        Policy::Modify(m)
    }
}

impl From<Bucket> for Policy {
    fn from(b: Bucket) -> Self {
        Policy::Query(b)
    }
}

impl From<FwdBucket> for Policy {
    fn from(b: FwdBucket) -> Self {
        Policy::Query(Bucket::Forward(b))
    }
}

impl From<CountBucket> for Policy {
    fn from(b: CountBucket) -> Self {
        Policy::Query(Bucket::Count(b))
    }
}

impl From<DynamicPolicy> for Policy {
    fn from(d: DynamicPolicy) -> Self {
        Policy::Dynamic(d)
    }
}

impl From<Derived> for Policy {
    fn from(d: Derived) -> Self {
        Policy::Derived(Box::new(d))
    }
}

impl<P: Into<Policy>> Add<P> for Policy {
    type Output = Policy;

    fn add(self, rhs: P) -> Policy {
        let mut children = match self {
            Policy::Parallel(c) => c,
            other => vec![other],
        };
        match rhs.into() {
            Policy::Parallel(c) => children.extend(c),
            other => children.push(other),
        }
        Policy::Parallel(children)
    }
}

impl<P: Into<Policy>> Shr<P> for Policy {
    type Output = Policy;

    fn shr(self, rhs: P) -> Policy {
        let mut children = match self {
            Policy::Sequential(c) => c,
            other => vec![other],
        };
        match rhs.into() {
            Policy::Sequential(c) => children.extend(c),
            other => children.push(other),
        }
        Policy::Sequential(children)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Identity => write!(f, "identity"),
            Policy::Drop => write!(f, "drop"),
            Policy::Match(m) => write!(f, "match({m})"),
            Policy::Modify(m) => write!(f, "modify({m})"),
            Policy::Controller => write!(f, "controller"),
            Policy::Query(b) => write!(f, "{b}"),
            Policy::Negate(inner) => write!(f, "~{}", Operand(inner)),
            Policy::Parallel(c) => write_joined(f, c, " + ", "drop"),
            Policy::Union(c) => write_joined(f, c, " | ", "drop"),
            Policy::Sequential(c) => write_joined(f, c, " >> ", "identity"),
            Policy::Intersection(c) => write_joined(f, c, " & ", "identity"),
            Policy::Derived(d) => write!(f, "{d}"),
            Policy::Dynamic(d) => write!(f, "{d}"),
        }
    }
}

/// A policy printed as the operand of an operator: parenthesized unless it
/// is a single term.
pub(crate) struct Operand<'a>(pub(crate) &'a Policy);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_compound() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_joined(
    f: &mut fmt::Formatter<'_>,
    children: &[Policy],
    sep: &str,
    empty: &str,
) -> fmt::Result {
    if children.is_empty() {
        return write!(f, "{empty}");
    }
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{}", Operand(child))?;
    }
    Ok(())
}

/// A policy known to be a filter: it only passes or drops packets.
///
/// The boolean operators `&`, `|`, `-` and `!` are only defined here.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter(Policy);

impl Filter {
    pub const IDENTITY: Filter = Filter(Policy::Identity);
    pub const DROP: Filter = Filter(Policy::Drop);

    /// A match from field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EmptyMatch`] if no fields are given.
    pub fn matching<K, P>(fields: impl IntoIterator<Item = (K, P)>) -> Result<Filter, PolicyError>
    where
        K: Into<String>,
        P: Into<Pattern>,
    {
        HeaderMatch::new(fields).map(|m| Filter(Policy::Match(m)))
    }

    /// Union of filters. No children is [`Filter::DROP`].
    #[must_use]
    pub fn union(children: impl IntoIterator<Item = Filter>) -> Filter {
        let mut children: Vec<Policy> = children.into_iter().map(Policy::from).collect();
        match children.len() {
            0 => Filter::DROP,
            1 => Filter(children.swap_remove(0)),
            _ => Filter(Policy::Union(children)),
        }
    }

    /// Conjunction of filters. No children is [`Filter::IDENTITY`].
    #[must_use]
    pub fn intersection(children: impl IntoIterator<Item = Filter>) -> Filter {
        let mut children: Vec<Policy> = children.into_iter().map(Policy::from).collect();
        match children.len() {
            0 => Filter::IDENTITY,
            1 => Filter(children.swap_remove(0)),
            _ => Filter(Policy::Intersection(children)),
        }
    }

    #[must_use]
    pub fn into_policy(self) -> Policy {
        self.0
    }

    pub(crate) fn from_policy_unchecked(policy: Policy) -> Filter {
        Filter(policy)
    }
}

impl Deref for Filter {
    type Target = Policy;

    fn deref(&self) -> &Policy {
        &self.0
    }
}

impl From<Filter> for Policy {
    fn from(f: Filter) -> Self {
        f.0
    }
}

impl From<HeaderMatch> for Filter {
    fn from(m: HeaderMatch) -> Self {
        Filter(Policy::Match(m))
    }
}

impl TryFrom<Policy> for Filter {
    type Error = PolicyError;

    fn try_from(policy: Policy) -> Result<Self, Self::Error> {
        if policy.is_filter() {
            Ok(Filter(policy))
        } else {
            Err(PolicyError::NotAFilter {
                policy: policy.to_string(),
            })
        }
    }
}

impl<P: Into<Policy>> Add<P> for Filter {
    type Output = Policy;

    fn add(self, rhs: P) -> Policy {
        self.0 + rhs
    }
}

impl<P: Into<Policy>> Shr<P> for Filter {
    type Output = Policy;

    fn shr(self, rhs: P) -> Policy {
        self.0 >> rhs
    }
}

/// Conjunction. Two plain matches intersect into a single match, or
/// [`Filter::DROP`] when they conflict.
impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        if let (Policy::Match(a), Policy::Match(b)) = (&self.0, &rhs.0) {
            return a.intersect(b).map_or(Filter::DROP, Filter::from);
        }
        let mut children = match self.0 {
            Policy::Intersection(c) => c,
            other => vec![other],
        };
        match rhs.0 {
            Policy::Intersection(c) => children.extend(c),
            other => children.push(other),
        }
        Filter(Policy::Intersection(children))
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        let mut children = match self.0 {
            Policy::Union(c) => c,
            other => vec![other],
        };
        match rhs.0 {
            Policy::Union(c) => children.extend(c),
            other => children.push(other),
        }
        Filter(Policy::Union(children))
    }
}

/// Difference: packets passed by `self` but not by `rhs`.
impl Sub for Filter {
    type Output = Filter;

    fn sub(self, rhs: Filter) -> Filter {
        Filter(Derived::new(DerivedForm::Difference(self, rhs)).into())
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter(Policy::Negate(Box::new(self.0)))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Intermediate builder for single-field policies.
/// Created by [`field()`].
#[derive(Debug, Clone)]
pub struct FieldRef {
    name: String,
}

impl FieldRef {
    /// Match packets whose field satisfies `pattern`.
    #[must_use]
    pub fn eq(self, pattern: impl Into<Pattern>) -> Filter {
        Filter(Policy::Match(HeaderMatch::single(self.name, pattern.into())))
    }

    /// Write `value` to the field.
    #[must_use]
    pub fn set(self, value: impl Into<Value>) -> Policy {
        Policy::Modify(HeaderModify::single(self.name, Some(value.into())))
    }

    /// Remove the field from the packet.
    #[must_use]
    pub fn unset(self) -> Policy {
        Policy::Modify(HeaderModify::single(self.name, None))
    }
}

/// Create a field builder for the named header.
#[must_use]
pub fn field(name: &str) -> FieldRef {
    FieldRef {
        name: name.to_owned(),
    }
}

/// Set `outport`.
#[must_use]
pub fn fwd(port: PortNo) -> Policy {
    Derived::new(DerivedForm::Forward(port)).into()
}

/// Set `outport`, unless that is the port the packet came in on.
#[must_use]
pub fn xfwd(port: PortNo) -> Policy {
    Derived::new(DerivedForm::ExclusiveForward(port)).into()
}

/// Move packets leaving `switch_out` on `port_out` to the far end of the
/// link, arriving on `switch_in` at `port_in`.
#[must_use]
pub fn link(switch_out: SwitchId, port_out: PortNo, switch_in: SwitchId, port_in: PortNo) -> Policy {
    Derived::new(DerivedForm::Link {
        switch_out,
        port_out,
        switch_in,
        port_in,
    })
    .into()
}

/// `then` on packets passing `predicate`, `otherwise` on the rest.
#[must_use]
pub fn if_(predicate: Filter, then: impl Into<Policy>, otherwise: impl Into<Policy>) -> Policy {
    Derived::new(DerivedForm::Conditional {
        predicate,
        then: then.into(),
        otherwise: otherwise.into(),
    })
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt() -> Packet {
        Packet::new().set("switch", 1_i64).set("inport", 3_i64)
    }

    #[test]
    fn empty_combinators_normalize() {
        assert_eq!(Policy::parallel(vec![]), Policy::Drop);
        assert_eq!(Policy::sequential(vec![]), Policy::Identity);
        assert_eq!(Filter::union(vec![]), Filter::DROP);
        assert_eq!(Filter::intersection(vec![]), Filter::IDENTITY);
    }

    #[test]
    fn single_child_combinator_is_child() {
        assert_eq!(Policy::parallel(vec![fwd(1)]), fwd(1));
        assert_eq!(Policy::sequential(vec![Policy::Controller]), Policy::Controller);
    }

    #[test]
    fn operators_flatten() {
        let p = fwd(1) + fwd(2) + fwd(3);
        assert!(matches!(&p, Policy::Parallel(c) if c.len() == 3));
        let s = Policy::Identity >> fwd(1) >> (fwd(2) >> fwd(3));
        assert!(matches!(&s, Policy::Sequential(c) if c.len() == 4));
        let u = field("switch").eq(1_i64) | field("switch").eq(2_i64) | field("switch").eq(3_i64);
        assert!(matches!(&*u, Policy::Union(c) if c.len() == 3));
    }

    #[test]
    fn and_of_matches_intersects() {
        let f = field("switch").eq(1_i64) & field("inport").eq(3_i64);
        assert_eq!(
            f,
            Filter::matching([("switch", 1_i64), ("inport", 3_i64)]).unwrap()
        );
        let conflict = field("switch").eq(1_i64) & field("switch").eq(2_i64);
        assert_eq!(conflict, Filter::DROP);
    }

    #[test]
    fn and_of_non_matches_builds_intersection() {
        let f = !field("switch").eq(1_i64) & field("inport").eq(3_i64);
        assert!(matches!(&*f, Policy::Intersection(c) if c.len() == 2));
    }

    #[test]
    fn filter_conversion() {
        assert!(Filter::try_from(Policy::Identity).is_ok());
        assert!(Filter::try_from(Policy::parallel(vec![Policy::Drop, Policy::Identity])).is_ok());
        let err = Filter::try_from(fwd(1)).unwrap_err();
        assert_eq!(
            err,
            PolicyError::NotAFilter {
                policy: "fwd(1)".into()
            }
        );
    }

    #[test]
    fn boolean_variants_over_non_filters_are_not_filters() {
        assert!(Filter::try_from(Policy::Union(vec![fwd(1)])).is_err());
        assert!(Filter::try_from(Policy::Intersection(vec![Policy::Identity, fwd(1)])).is_err());
        assert!(Filter::try_from(Policy::Negate(Box::new(Policy::Controller))).is_err());
        let nested = Policy::Negate(Box::new(Policy::Union(vec![field("switch").eq(1_i64).into()])));
        assert!(Filter::try_from(nested).is_ok());

        let dynamic = DynamicPolicy::filter(Filter::IDENTITY);
        assert!(dynamic.set_policy(Policy::Union(vec![fwd(1)])).is_err());
        assert_eq!(dynamic.policy(), Policy::Identity);
    }

    #[test]
    fn difference_is_filter() {
        let d = field("switch").eq(1_i64) - field("inport").eq(3_i64);
        assert!(d.is_filter());
        assert!(d.eval(&pkt()).is_empty());
        assert_eq!(d.eval(&pkt().set("inport", 4_i64)).len(), 1);
    }

    #[test]
    fn empty_builders_rejected() {
        let none: Vec<(&str, i64)> = vec![];
        assert_eq!(Filter::matching(none), Err(PolicyError::EmptyMatch));
        let none: Vec<(&str, Option<Value>)> = vec![];
        assert_eq!(Policy::modifying(none), Err(PolicyError::EmptyModify));
    }

    #[test]
    fn walk_finds_queries_once() {
        let bucket = CountBucket::new();
        let p = Policy::from(bucket.clone()) + (fwd(1) >> bucket) + FwdBucket::new();
        assert_eq!(p.queries().len(), 2);
    }

    #[test]
    fn walk_descends_into_dynamic() {
        let inner = DynamicPolicy::new(fwd(1));
        let outer = DynamicPolicy::new(Policy::from(inner.clone()) + fwd(2));
        let p = Policy::from(outer) >> Policy::Controller;
        let found = p.dynamic_policies();
        assert_eq!(found.len(), 2);
        assert!(found.contains(&inner));
    }

    #[test]
    fn display_round_trips_shape() {
        let p = (field("switch").eq(1_i64) >> fwd(2)) + Policy::Controller;
        assert_eq!(p.to_string(), "(match(switch=1) >> fwd(2)) + controller");
        let f = !(field("switch").eq(1_i64) | field("inport").eq(2_i64));
        assert_eq!(f.to_string(), "~(match(switch=1) | match(inport=2))");
        assert_eq!(Policy::Parallel(vec![]).to_string(), "drop");
        assert_eq!(field("outport").unset().to_string(), "modify(outport=none)");
    }
}
