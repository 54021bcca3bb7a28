//! Typed references between resources.
//!
//! Every reference a resource type carries is declared once, at type
//! registration, as a [`ReferenceDescriptor`] — an explicit registration
//! table instead of runtime reflection. At construction the declared
//! descriptors are instantiated into a per-resource [`ReferenceMap`] of
//! [`ReferenceSlot`]s holding the actual target ids.
//!
//! Collections track a dirty flag. The manager drains that flag after
//! every mutation scope; for descriptors marked `auto_save` the drained
//! dirt is persisted immediately, everything else waits for an explicit
//! save.

use indexmap::{IndexMap, IndexSet};

pub use fabrik_model::RelationKind;
use fabrik_model::ResourceId;

use crate::error::{Error, Result};

/// Reference name reserved for the composition edge to child resources.
pub const CHILDREN: &str = "children";
/// Reference name reserved for the composition edge to the parent.
pub const PARENT: &str = "parent";

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Which end of a bidirectional reference this resource holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceRole {
    /// This resource owns the link rows.
    Source,
    /// The partner owns the link rows; this end is derived.
    Target,
}

/// Whether a reference holds one target or an ordered set of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one target.
    Single,
    /// An ordered, duplicate-free set of targets.
    Collection,
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Collection => f.write_str("collection"),
        }
    }
}

/// Static declaration of one reference on a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    /// Reference name, unique per type (including inherited references).
    pub name: &'static str,
    /// Life-cycle coupling of the edge.
    pub kind: RelationKind,
    /// Which end of the edge this type holds.
    pub role: ReferenceRole,
    /// Single target or collection of targets.
    pub cardinality: Cardinality,
    /// Whether membership changes persist immediately.
    pub auto_save: bool,
}

impl ReferenceDescriptor {
    /// Declare a single-valued source reference.
    #[must_use]
    pub fn single(name: &'static str, kind: RelationKind) -> Self {
        Self {
            name,
            kind,
            role: ReferenceRole::Source,
            cardinality: Cardinality::Single,
            auto_save: false,
        }
    }

    /// Declare a collection-valued source reference.
    #[must_use]
    pub fn collection(name: &'static str, kind: RelationKind) -> Self {
        Self {
            name,
            kind,
            role: ReferenceRole::Source,
            cardinality: Cardinality::Collection,
            auto_save: false,
        }
    }

    /// Persist membership changes immediately instead of on explicit save.
    #[must_use]
    pub fn auto_save(mut self) -> Self {
        self.auto_save = true;
        self
    }

    /// Mark this end as the derived (target) side of the edge.
    #[must_use]
    pub fn as_target(mut self) -> Self {
        self.role = ReferenceRole::Target;
        self
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Ordered, duplicate-free set of referenced resource ids.
///
/// Mutations raise an internal dirty flag; the manager consumes it via
/// [`take_dirty`](Self::take_dirty) after each mutation scope.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCollection {
    ids: IndexSet<ResourceId>,
    dirty: bool,
}

impl ReferenceCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a target. Returns `false` (and stays clean) on duplicates.
    pub fn insert(&mut self, id: ResourceId) -> bool {
        let inserted = self.ids.insert(id);
        self.dirty |= inserted;
        inserted
    }

    /// Remove a target, preserving the order of the remainder.
    pub fn remove(&mut self, id: ResourceId) -> bool {
        let removed = self.ids.shift_remove(&id);
        self.dirty |= removed;
        removed
    }

    /// Whether `id` is a member.
    #[must_use]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.ids.contains(&id)
    }

    /// Remove all members.
    pub fn clear(&mut self) {
        if !self.ids.is_empty() {
            self.ids.clear();
            self.dirty = true;
        }
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.ids.iter().copied()
    }

    /// Members as an ordered vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<ResourceId> {
        self.ids.iter().copied().collect()
    }

    /// Consume and reset the dirty flag.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Replace the membership from storage without marking dirty.
    pub(crate) fn hydrate(&mut self, ids: impl IntoIterator<Item = ResourceId>) {
        self.ids = ids.into_iter().collect();
        self.dirty = false;
    }
}

// ---------------------------------------------------------------------------
// Slot & map
// ---------------------------------------------------------------------------

/// Runtime value of one declared reference.
#[derive(Debug, Clone)]
pub enum ReferenceSlot {
    /// Single-valued reference.
    Single(Option<ResourceId>),
    /// Collection-valued reference.
    Collection(ReferenceCollection),
}

impl ReferenceSlot {
    fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::Single => Self::Single(None),
            Cardinality::Collection => Self::Collection(ReferenceCollection::new()),
        }
    }
}

struct ReferenceEntry {
    descriptor: ReferenceDescriptor,
    slot: ReferenceSlot,
}

/// Per-resource table of declared reference slots, keyed by name.
///
/// Built once at construction from the type's effective descriptors;
/// accessing an undeclared name is a typed error, never a silent insert.
#[derive(Default)]
pub struct ReferenceMap {
    entries: IndexMap<&'static str, ReferenceEntry>,
}

impl ReferenceMap {
    /// Instantiate empty slots for every descriptor.
    #[must_use]
    pub fn from_descriptors(descriptors: &[ReferenceDescriptor]) -> Self {
        let entries = descriptors
            .iter()
            .map(|descriptor| {
                let slot = ReferenceSlot::empty(descriptor.cardinality);
                (
                    descriptor.name,
                    ReferenceEntry {
                        descriptor: descriptor.clone(),
                        slot,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    fn entry(&self, name: &str) -> Result<&ReferenceEntry> {
        self.entries.get(name).ok_or_else(|| Error::UnknownReference {
            name: name.to_string(),
        })
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut ReferenceEntry> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| Error::UnknownReference {
                name: name.to_string(),
            })
    }

    /// The descriptor for `name`.
    pub fn descriptor(&self, name: &str) -> Result<&ReferenceDescriptor> {
        Ok(&self.entry(name)?.descriptor)
    }

    /// Current target of a single-valued reference.
    pub fn single(&self, name: &str) -> Result<Option<ResourceId>> {
        match &self.entry(name)?.slot {
            ReferenceSlot::Single(id) => Ok(*id),
            ReferenceSlot::Collection(_) => Err(Error::WrongCardinality {
                name: name.to_string(),
                expected: Cardinality::Single,
            }),
        }
    }

    /// Set the target of a single-valued reference.
    pub fn set_single(&mut self, name: &str, target: Option<ResourceId>) -> Result<()> {
        match &mut self.entry_mut(name)?.slot {
            ReferenceSlot::Single(id) => {
                *id = target;
                Ok(())
            }
            ReferenceSlot::Collection(_) => Err(Error::WrongCardinality {
                name: name.to_string(),
                expected: Cardinality::Single,
            }),
        }
    }

    /// Read access to a collection-valued reference.
    pub fn collection(&self, name: &str) -> Result<&ReferenceCollection> {
        match &self.entry(name)?.slot {
            ReferenceSlot::Collection(collection) => Ok(collection),
            ReferenceSlot::Single(_) => Err(Error::WrongCardinality {
                name: name.to_string(),
                expected: Cardinality::Collection,
            }),
        }
    }

    /// Mutable access to a collection-valued reference.
    pub fn collection_mut(&mut self, name: &str) -> Result<&mut ReferenceCollection> {
        match &mut self.entry_mut(name)?.slot {
            ReferenceSlot::Collection(collection) => Ok(collection),
            ReferenceSlot::Single(_) => Err(Error::WrongCardinality {
                name: name.to_string(),
                expected: Cardinality::Collection,
            }),
        }
    }

    /// Iterate all declared references with their current slots.
    pub fn iter(&self) -> impl Iterator<Item = (&ReferenceDescriptor, &ReferenceSlot)> {
        self.entries
            .values()
            .map(|entry| (&entry.descriptor, &entry.slot))
    }

    /// Names of dirty collections, dirty flags consumed.
    pub(crate) fn drain_dirty(&mut self) -> Vec<&'static str> {
        let mut dirty = Vec::new();
        for (name, entry) in &mut self.entries {
            if let ReferenceSlot::Collection(collection) = &mut entry.slot {
                if collection.take_dirty() {
                    dirty.push(*name);
                }
            }
        }
        dirty
    }
}

impl std::fmt::Debug for ReferenceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(name, entry)| (name, &entry.slot)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: i64) -> ResourceId {
        ResourceId::new(raw).unwrap()
    }

    fn map() -> ReferenceMap {
        ReferenceMap::from_descriptors(&[
            ReferenceDescriptor::single("driver", RelationKind::Usage),
            ReferenceDescriptor::collection("peers", RelationKind::Usage).auto_save(),
        ])
    }

    #[test]
    fn duplicate_insert_rejected_and_stays_clean() {
        let mut collection = ReferenceCollection::new();
        assert!(collection.insert(id(1)));
        collection.take_dirty();

        assert!(!collection.insert(id(1)));
        assert!(!collection.take_dirty());
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn remove_preserves_order() {
        let mut collection = ReferenceCollection::new();
        for raw in 1..=4 {
            collection.insert(id(raw));
        }
        collection.remove(id(2));
        assert_eq!(collection.to_vec(), vec![id(1), id(3), id(4)]);
    }

    #[test]
    fn hydrate_does_not_mark_dirty() {
        let mut collection = ReferenceCollection::new();
        collection.hydrate([id(5), id(6)]);
        assert!(!collection.take_dirty());
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn unknown_name_is_typed_error() {
        let refs = map();
        assert!(matches!(
            refs.single("nope"),
            Err(Error::UnknownReference { .. })
        ));
    }

    #[test]
    fn cardinality_mismatch_is_typed_error() {
        let mut refs = map();
        assert!(matches!(
            refs.collection("driver"),
            Err(Error::WrongCardinality { .. })
        ));
        assert!(matches!(
            refs.set_single("peers", None),
            Err(Error::WrongCardinality { .. })
        ));
    }

    #[test]
    fn drain_dirty_reports_each_mutation_once() {
        let mut refs = map();
        refs.collection_mut("peers").unwrap().insert(id(9));
        assert_eq!(refs.drain_dirty(), vec!["peers"]);
        assert!(refs.drain_dirty().is_empty());
    }
}
