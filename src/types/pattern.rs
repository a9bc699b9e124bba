use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;

use super::Value;

/// The right-hand side of a single match constraint.
///
/// Addresses are always stored as prefixes: an [`Ipv4Addr`] pattern becomes a
/// `/32`, and a prefix is normalized to its network address. `Exact` therefore
/// never holds a [`Value::Ip`], which keeps equality and hashing structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Pattern {
    Exact(Value),
    Prefix(Ipv4Network),
}

impl Pattern {
    /// Build a prefix pattern, clearing any host bits.
    #[must_use]
    pub fn prefix(net: Ipv4Network) -> Self {
        Pattern::Prefix(Ipv4Network::new(net.network(), net.prefix()).unwrap_or(net))
    }

    /// Whether a packet header value satisfies this pattern.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Pattern::Exact(expected), v) => expected == v,
            (Pattern::Prefix(net), Value::Ip(ip)) => net.contains(*ip),
            (Pattern::Prefix(_), _) => false,
        }
    }

    /// The pattern accepting exactly the values both patterns accept, or
    /// `None` if no value satisfies both. Of two nested prefixes the longer
    /// one wins.
    #[must_use]
    pub fn intersect(&self, other: &Pattern) -> Option<Pattern> {
        match (self, other) {
            (Pattern::Exact(a), Pattern::Exact(b)) => (a == b).then(|| self.clone()),
            (Pattern::Prefix(a), Pattern::Prefix(b)) => {
                if contains(*b, *a) {
                    Some(self.clone())
                } else if contains(*a, *b) {
                    Some(other.clone())
                } else {
                    None
                }
            }
            (Pattern::Exact(v), Pattern::Prefix(_)) => other.matches(v).then(|| self.clone()),
            (Pattern::Prefix(_), Pattern::Exact(v)) => self.matches(v).then(|| other.clone()),
        }
    }

    /// Whether every value accepted by `other` is also accepted by `self`.
    #[must_use]
    pub fn covers(&self, other: &Pattern) -> bool {
        match (self, other) {
            (Pattern::Exact(a), Pattern::Exact(b)) => a == b,
            (Pattern::Prefix(a), Pattern::Prefix(b)) => contains(*a, *b),
            (Pattern::Prefix(_), Pattern::Exact(v)) => self.matches(v),
            (Pattern::Exact(_), Pattern::Prefix(_)) => false,
        }
    }
}

/// `outer` contains every address of `inner`.
fn contains(outer: Ipv4Network, inner: Ipv4Network) -> bool {
    outer.prefix() <= inner.prefix() && outer.contains(inner.network())
}

impl From<Value> for Pattern {
    fn from(v: Value) -> Self {
        match v {
            Value::Ip(ip) => Pattern::Prefix(Ipv4Network::from(ip)),
            other => Pattern::Exact(other),
        }
    }
}

impl From<i64> for Pattern {
    fn from(v: i64) -> Self {
        Pattern::Exact(Value::Int(v))
    }
}

impl From<&str> for Pattern {
    fn from(v: &str) -> Self {
        Pattern::Exact(Value::from(v))
    }
}

impl From<String> for Pattern {
    fn from(v: String) -> Self {
        Pattern::Exact(Value::String(v))
    }
}

impl From<Ipv4Addr> for Pattern {
    fn from(v: Ipv4Addr) -> Self {
        Pattern::Prefix(Ipv4Network::from(v))
    }
}

impl From<Ipv4Network> for Pattern {
    fn from(v: Ipv4Network) -> Self {
        Pattern::prefix(v)
    }
}

/// Parses integers, dotted addresses and CIDR prefixes; anything else is
/// taken as an exact string.
impl FromStr for Pattern {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(i) = s.parse::<i64>() {
            return Ok(Pattern::from(i));
        }
        if s.contains('.')
            && let Ok(net) = s.parse::<Ipv4Network>()
        {
            return Ok(Pattern::prefix(net));
        }
        Ok(Pattern::from(s))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(v) => write!(f, "{v}"),
            Pattern::Prefix(net) if net.prefix() == 32 => write!(f, "{}", net.network()),
            Pattern::Prefix(net) => write!(f, "{}/{}", net.network(), net.prefix()),
        }
    }
}
