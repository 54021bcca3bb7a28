//! Row shapes for the resource store.
//!
//! A [`ResourceRecord`] is the relational representation of one live
//! resource; a [`LinkRecord`] is one directed reference edge between two
//! resources. Both are plain data — all graph semantics live in the
//! resource core, the store persists rows verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Numeric identity of a resource row, assigned by the store on insert.
///
/// A freshly constructed, never-persisted resource carries
/// [`ResourceId::UNSET`]; the insert-vs-update decision on save is made
/// from this sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(i64);

impl ResourceId {
    /// Sentinel for a resource that has no database identity yet.
    pub const UNSET: ResourceId = ResourceId(0);

    /// Wrap a raw row id. Returns `None` for the reserved value `0`.
    #[must_use]
    pub fn new(raw: i64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// The raw row id.
    #[must_use]
    pub fn raw(self) -> i64 {
        self.0
    }

    /// Whether this is the [`UNSET`](Self::UNSET) sentinel.
    #[must_use]
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric identity of a link row, assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(i64);

impl LinkId {
    /// Sentinel for a link that has no database identity yet.
    pub const UNSET: LinkId = LinkId(0);

    /// Wrap a raw row id. Returns `None` for the reserved value `0`.
    #[must_use]
    pub fn new(raw: i64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// The raw row id.
    #[must_use]
    pub fn raw(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RelationKind
// ---------------------------------------------------------------------------

/// UML-style life-cycle coupling of a reference edge.
///
/// The kind is declared on the reference descriptor of the source type
/// and stored on every link row so the graph can be rebuilt without the
/// type registry at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Composition edge between a resource and its owned children.
    /// Maintained exclusively by the graph, never by user code.
    ParentChild,
    /// The source aggregates the target; both have independent lifetimes.
    Aggregation,
    /// The source owns the target beyond the parent/children axis.
    Composition,
    /// The source merely uses the target.
    Usage,
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ParentChild => "parent-child",
            Self::Aggregation => "aggregation",
            Self::Composition => "composition",
            Self::Usage => "usage",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ResourceRecord
// ---------------------------------------------------------------------------

/// Relational representation of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Row identity; [`ResourceId::UNSET`] until first insert.
    pub id: ResourceId,
    /// Type discriminator resolved through the type registry on load.
    pub type_tag: String,
    /// Display name, unique-ish but not enforced by the store.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Optional identifier local to the plant/cell (e.g. a bus address).
    pub local_identifier: Option<String>,
    /// Optional globally unique identifier (e.g. a serial number).
    pub global_identifier: Option<String>,
    /// Type-specific serialized state, round-tripped through the
    /// resource's extension-data hooks.
    pub extension: serde_json::Value,
    /// Soft-delete marker; `Some` rows are invisible to `all_active`.
    pub deleted: Option<DateTime<Utc>>,
}

impl ResourceRecord {
    /// A blank record for the given type tag, ready for insert.
    #[must_use]
    pub fn new(type_tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::UNSET,
            type_tag: type_tag.into(),
            name: name.into(),
            description: String::new(),
            local_identifier: None,
            global_identifier: None,
            extension: serde_json::Value::Null,
            deleted: None,
        }
    }
}

// ---------------------------------------------------------------------------
// LinkRecord
// ---------------------------------------------------------------------------

/// One directed reference edge between two resource rows.
///
/// `name` is the reference name declared on the **source** type;
/// `position` preserves collection ordering across reloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Row identity; [`LinkId::UNSET`] until first insert.
    pub id: LinkId,
    /// The resource owning the reference.
    pub source: ResourceId,
    /// The referenced resource.
    pub target: ResourceId,
    /// Reference name on the source type (`"parent-child"` edges use
    /// the reserved name `children`).
    pub name: String,
    /// Life-cycle coupling of the edge.
    pub kind: RelationKind,
    /// Zero-based position within a collection reference.
    pub position: usize,
}

impl LinkRecord {
    /// A new unsaved link row.
    #[must_use]
    pub fn new(
        source: ResourceId,
        target: ResourceId,
        name: impl Into<String>,
        kind: RelationKind,
        position: usize,
    ) -> Self {
        Self {
            id: LinkId::UNSET,
            source,
            target,
            name: name.into(),
            kind,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_id_is_reserved() {
        assert!(ResourceId::new(0).is_none());
        assert!(ResourceId::UNSET.is_unset());
        assert!(!ResourceId::new(7).unwrap().is_unset());
    }

    #[test]
    fn new_record_has_no_identity() {
        let record = ResourceRecord::new("machine", "Press 1");
        assert!(record.id.is_unset());
        assert_eq!(record.extension, serde_json::Value::Null);
        assert!(record.deleted.is_none());
    }

    #[test]
    fn relation_kind_serializes_snake_case() {
        let json = serde_json::to_string(&RelationKind::ParentChild).unwrap();
        assert_eq!(json, "\"parent_child\"");
    }
}
