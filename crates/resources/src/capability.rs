//! Capabilities — what a resource can do, detached from what it is.
//!
//! Lookup across the graph is capability-constrained rather than
//! inheritance-constrained: a resource carries a [`CapabilitySet`]
//! (seeded from its type registration, mutable per instance) and callers
//! ask for "the resource that provides X" instead of naming a concrete
//! subtype.

use std::collections::BTreeSet;

/// One named capability, interned as a static string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Capability(&'static str);

impl Capability {
    /// Declare a capability constant.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// The capability name.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// An ordered set of capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: BTreeSet<Capability>,
}

impl CapabilitySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability. Returns `false` if it was already present.
    pub fn add(&mut self, cap: Capability) -> bool {
        self.caps.insert(cap)
    }

    /// Remove a capability. Returns `false` if it was not present.
    pub fn remove(&mut self, cap: Capability) -> bool {
        self.caps.remove(&cap)
    }

    /// Whether this set contains `cap`.
    #[must_use]
    pub fn contains(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    /// Whether this set satisfies every capability in `required`.
    ///
    /// The empty requirement is satisfied by every set.
    #[must_use]
    pub fn provides(&self, required: &CapabilitySet) -> bool {
        required.caps.is_subset(&self.caps)
    }

    /// Merge all capabilities of `other` into this set.
    pub fn extend_from(&mut self, other: &CapabilitySet) {
        self.caps.extend(other.caps.iter().copied());
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Iterate the capabilities in name order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.caps.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            caps: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for cap in &self.caps {
            if !first {
                f.write_str(" + ")?;
            }
            first = false;
            write!(f, "{cap}")?;
        }
        if first {
            f.write_str("(none)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRILLING: Capability = Capability::new("drilling");
    const WELDING: Capability = Capability::new("welding");

    #[test]
    fn provides_is_superset_semantics() {
        let mut have = CapabilitySet::new();
        have.add(DRILLING);
        have.add(WELDING);

        let need: CapabilitySet = [DRILLING].into_iter().collect();
        assert!(have.provides(&need));
        assert!(!need.provides(&have));
    }

    #[test]
    fn empty_requirement_always_satisfied() {
        let empty = CapabilitySet::new();
        let some: CapabilitySet = [WELDING].into_iter().collect();
        assert!(some.provides(&empty));
        assert!(empty.provides(&empty));
    }

    #[test]
    fn add_is_idempotent() {
        let mut set = CapabilitySet::new();
        assert!(set.add(DRILLING));
        assert!(!set.add(DRILLING));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display_joins_names() {
        let set: CapabilitySet = [WELDING, DRILLING].into_iter().collect();
        assert_eq!(set.to_string(), "drilling + welding");
        assert_eq!(CapabilitySet::new().to_string(), "(none)");
    }
}
