use std::collections::BTreeMap;
use std::fmt;

use super::{HeaderModify, Value};

/// An immutable packet: a map from header name to value.
///
/// A header that is absent is unset; matches that constrain it fail.
/// [`modify`](Self::modify) returns a new packet and leaves `self` untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Packet {
    headers: BTreeMap<String, Value>,
}

impl Packet {
    /// Create a packet with no headers set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header value.
    #[must_use]
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.headers.insert(field.to_owned(), value.into());
        self
    }

    /// Look up a header value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.headers.get(field)
    }

    /// A copy of this packet with the fields of `m` written; `None` entries
    /// unset the field.
    #[must_use]
    pub fn modify(&self, m: &HeaderModify) -> Packet {
        let mut headers = self.headers.clone();
        for (field, value) in m.iter() {
            match value {
                Some(v) => {
                    headers.insert(field.to_owned(), v.clone());
                }
                None => {
                    headers.remove(field);
                }
            }
        }
        Packet { headers }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.headers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}
