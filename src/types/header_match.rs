use std::collections::BTreeMap;
use std::fmt;

use super::error::PolicyError;
use super::{HeaderSet, Packet, Pattern, Value};

/// A conjunction of per-field constraints. Fields not mentioned are
/// wildcards. Never empty: the empty conjunction is
/// [`Predicate::Identity`](super::Predicate::Identity).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeaderMatch {
    fields: BTreeMap<String, Pattern>,
}

impl HeaderMatch {
    /// Build a match from field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EmptyMatch`] if no fields are given.
    pub fn new<K, P>(fields: impl IntoIterator<Item = (K, P)>) -> Result<Self, PolicyError>
    where
        K: Into<String>,
        P: Into<Pattern>,
    {
        let fields: BTreeMap<String, Pattern> = fields
            .into_iter()
            .map(|(k, p)| (k.into(), p.into()))
            .collect();
        if fields.is_empty() {
            return Err(PolicyError::EmptyMatch);
        }
        Ok(Self { fields })
    }

    pub(crate) fn single(field: String, pattern: Pattern) -> Self {
        Self {
            fields: BTreeMap::from([(field, pattern)]),
        }
    }

    pub(crate) fn with(mut self, field: &str, pattern: Pattern) -> Self {
        self.fields.insert(field.to_owned(), pattern);
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Pattern> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pattern)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always `false`; present for API symmetry with [`len`](Self::len).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether the packet satisfies every constraint.
    #[must_use]
    pub fn matches(&self, pkt: &Packet) -> bool {
        self.fields
            .iter()
            .all(|(field, pattern)| pkt.get(field).is_some_and(|v| pattern.matches(v)))
    }

    /// Conjunction of two matches, or `None` when some shared field has no
    /// value satisfying both.
    #[must_use]
    pub fn intersect(&self, other: &HeaderMatch) -> Option<HeaderMatch> {
        let mut fields = self.fields.clone();
        for (field, theirs) in &other.fields {
            let merged = match fields.get(field) {
                Some(ours) => ours.intersect(theirs)?,
                None => theirs.clone(),
            };
            fields.insert(field.clone(), merged);
        }
        Some(HeaderMatch { fields })
    }

    /// Whether every packet `other` accepts is accepted by `self`.
    ///
    /// A match constraining a field `other` leaves open never covers it.
    #[must_use]
    pub fn covers(&self, other: &HeaderMatch) -> bool {
        self.fields.iter().all(|(field, ours)| {
            other
                .fields
                .get(field)
                .is_some_and(|theirs| ours.covers(theirs))
        })
    }

    /// Drop the constraints on `fields`, returning `None` if nothing remains.
    pub(crate) fn without<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Option<HeaderMatch> {
        let mut remaining = self.fields.clone();
        for f in fields {
            remaining.remove(f);
        }
        (!remaining.is_empty()).then_some(HeaderMatch { fields: remaining })
    }
}

impl fmt::Display for HeaderMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_assignments(f, self.fields.iter().map(|(k, p)| (k, p.to_string())))
    }
}

/// A set of header writes. `None` unsets the field. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeaderModify {
    fields: BTreeMap<String, Option<Value>>,
}

impl HeaderModify {
    /// Build a modify from field assignments.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EmptyModify`] if no fields are given.
    pub fn new<K>(fields: impl IntoIterator<Item = (K, Option<Value>)>) -> Result<Self, PolicyError>
    where
        K: Into<String>,
    {
        let fields: BTreeMap<String, Option<Value>> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if fields.is_empty() {
            return Err(PolicyError::EmptyModify);
        }
        Ok(Self { fields })
    }

    pub(crate) fn single(field: String, value: Option<Value>) -> Self {
        Self {
            fields: BTreeMap::from([(field, value)]),
        }
    }

    pub(crate) fn with(mut self, field: &str, value: Option<Value>) -> Self {
        self.fields.insert(field.to_owned(), value);
        self
    }

    /// The value written to `field`: `None` if untouched, `Some(None)` if unset.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Option<Value>> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// This modify followed by `later`: writes in `later` win.
    #[must_use]
    pub fn then(&self, later: &HeaderModify) -> HeaderModify {
        let mut fields = self.fields.clone();
        fields.extend(later.fields.clone());
        HeaderModify { fields }
    }

    /// Whether any written field falls outside `compilable`.
    #[must_use]
    pub fn writes_outside(&self, compilable: &HeaderSet) -> bool {
        self.fields.keys().any(|f| !compilable.contains(f))
    }
}

impl fmt::Display for HeaderModify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_assignments(
            f,
            self.fields.iter().map(|(k, v)| {
                let rendered = v.as_ref().map_or_else(|| "none".to_owned(), Value::to_string);
                (k, rendered)
            }),
        )
    }
}

fn write_assignments<'a>(
    f: &mut fmt::Formatter<'_>,
    fields: impl Iterator<Item = (&'a String, String)>,
) -> fmt::Result {
    for (i, (k, v)) in fields.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{k}={v}")?;
    }
    Ok(())
}
