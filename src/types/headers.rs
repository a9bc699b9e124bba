use std::collections::BTreeSet;

/// Layer 2-4 headers every switch can match and rewrite.
pub const BASIC_HEADERS: &[&str] = &[
    "srcmac", "dstmac", "srcip", "dstip", "tos", "srcport", "dstport", "ethtype", "protocol",
];

/// VLAN tagging headers.
pub const TAGGING_HEADERS: &[&str] = &["vlan_id", "vlan_pcp"];

/// Where the packet is: the switch it sits on and its ports.
pub const LOCATION_HEADERS: &[&str] = &["switch", "inport", "outport"];

/// Packet content metadata; never realizable in a switch table.
pub const CONTENT_HEADERS: &[&str] = &["raw", "header_len", "payload_len"];

/// A set of header names.
///
/// The compiler consults one of these to decide whether a modify can run on
/// a switch or must be handed to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSet {
    names: BTreeSet<String>,
}

impl HeaderSet {
    /// An empty set. [`Default`] is the compilable set instead.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            names: BTreeSet::new(),
        }
    }

    /// The switch-realizable headers: basic, tagging and location headers.
    #[must_use]
    pub fn compilable() -> Self {
        BASIC_HEADERS
            .iter()
            .chain(TAGGING_HEADERS)
            .chain(LOCATION_HEADERS)
            .copied()
            .collect()
    }

    /// Add a header name. Returns `false` if it was already present.
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(name.to_owned())
    }

    #[must_use]
    pub fn with(mut self, name: &str) -> Self {
        self.insert(name);
        self
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Default for HeaderSet {
    fn default() -> Self {
        Self::compilable()
    }
}

impl<'a> FromIterator<&'a str> for HeaderSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(str::to_owned).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compilable_contains_switch_headers() {
        let set = HeaderSet::compilable();
        for name in ["srcip", "dstip", "vlan_id", "switch", "inport", "outport"] {
            assert!(set.contains(name), "{name} should be compilable");
        }
        assert_eq!(
            set.len(),
            BASIC_HEADERS.len() + TAGGING_HEADERS.len() + LOCATION_HEADERS.len()
        );
    }

    #[test]
    fn content_headers_not_compilable() {
        let set = HeaderSet::compilable();
        for name in CONTENT_HEADERS {
            assert!(!set.contains(name));
        }
    }

    #[test]
    fn insert_and_with() {
        let mut set = HeaderSet::empty();
        assert!(set.is_empty());
        assert!(set.insert("v_header"));
        assert!(!set.insert("v_header"));
        let set = set.with("mpls_label");
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["mpls_label", "v_header"]);
    }

    #[test]
    fn default_is_compilable() {
        assert_eq!(HeaderSet::default(), HeaderSet::compilable());
    }
}
