//! The resource domain object.
//!
//! A resource is split in two: the [`ResourceCore`] — the required
//! record every resource carries (identity, naming, parent/children,
//! declared reference slots, capabilities) — and the type-specific
//! behavior implementing [`Resource`]. Composition over inheritance:
//! there is no base-class ladder, a concrete type is its core plus its
//! capability set plus its hooks.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use crossbeam_channel::Sender;

use fabrik_model::{ResourceId, ResourceRecord};

use crate::capability::CapabilitySet;
use crate::error::Result;
use crate::reference::{ReferenceCollection, ReferenceMap};

// ---------------------------------------------------------------------------
// Resource trait
// ---------------------------------------------------------------------------

/// Type-specific behavior of a resource.
///
/// All hooks default to no-ops; a purely structural resource (a folder
/// grouping stations, say) implements nothing. Hooks are invoked by the
/// manager with the cell lock held, so implementations never observe
/// concurrent access to `self`.
pub trait Resource: Any + Send {
    /// Wiring hook, called once before the resource is used. The context
    /// carries the identity and the changed-signal for later state
    /// notifications.
    fn on_initialize(&mut self, _ctx: &ResourceContext) -> Result<()> {
        Ok(())
    }

    /// Called when the owning module starts, after every dependency
    /// (transitively, every ancestor) has started.
    fn on_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on shutdown, children first.
    fn on_stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Final cleanup before the resource leaves the graph.
    fn on_dispose(&mut self) {}

    /// Serialize type-specific state for the record's extension blob.
    fn extension_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    /// Restore type-specific state from a persisted extension blob.
    fn restore(&mut self, _data: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

impl dyn Resource {
    /// Whether the concrete type behind this object is `T`.
    #[must_use]
    pub fn is<T: Resource>(&self) -> bool {
        (self as &dyn Any).is::<T>()
    }

    /// Downcast to a concrete resource type.
    #[must_use]
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref::<T>()
    }

    /// Downcast to a concrete resource type, mutably.
    #[must_use]
    pub fn downcast_mut<T: Resource>(&mut self) -> Option<&mut T> {
        (self as &mut dyn Any).downcast_mut::<T>()
    }
}

// ---------------------------------------------------------------------------
// ChangedSignal
// ---------------------------------------------------------------------------

/// Handle a resource raises when its internal state changed and should
/// be persisted.
///
/// Raising is non-blocking: the id lands on the manager's change queue
/// and is flushed through the regular save path at the end of the next
/// manager operation. A signal raised before the resource has a database
/// identity is dropped — creation persists the resource anyway.
#[derive(Clone)]
pub struct ChangedSignal {
    id: Arc<AtomicI64>,
    tx: Sender<ResourceId>,
}

impl ChangedSignal {
    pub(crate) fn new(tx: Sender<ResourceId>) -> Self {
        Self {
            id: Arc::new(AtomicI64::new(0)),
            tx,
        }
    }

    /// Bind the signal to the persisted identity.
    pub(crate) fn bind(&self, id: ResourceId) {
        self.id.store(id.raw(), Ordering::Relaxed);
    }

    /// Announce that this resource's state changed.
    pub fn raise(&self) {
        if let Some(id) = ResourceId::new(self.id.load(Ordering::Relaxed)) {
            let _ = self.tx.send(id);
        }
    }
}

impl std::fmt::Debug for ChangedSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangedSignal")
            .field("id", &self.id.load(Ordering::Relaxed))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ResourceContext
// ---------------------------------------------------------------------------

/// Context handed to [`Resource::on_initialize`].
#[derive(Debug)]
pub struct ResourceContext {
    id: ResourceId,
    name: String,
    changed: ChangedSignal,
    graph: Arc<crate::graph::ResourceGraph>,
}

impl ResourceContext {
    pub(crate) fn new(
        id: ResourceId,
        name: String,
        changed: ChangedSignal,
        graph: Arc<crate::graph::ResourceGraph>,
    ) -> Self {
        Self {
            id,
            name,
            changed,
            graph,
        }
    }

    /// The resource's identity. [`ResourceId::UNSET`] during explicit
    /// creation — the id is assigned on the save that follows.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The resource's name at initialization time.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The changed-signal. Implementations clone this into themselves to
    /// request persistence after later state mutations (driver events,
    /// counters, calibration data).
    #[must_use]
    pub fn changed(&self) -> &ChangedSignal {
        &self.changed
    }

    /// Read access to the live graph, for wiring against other
    /// resources during initialize.
    ///
    /// The hook runs with this resource's cell locked: `get` on other
    /// ids is safe, but queries that read every cell (`by_name`,
    /// `by_tag`, capability lookups) would re-enter this resource's
    /// lock and must wait until after initialize.
    #[must_use]
    pub fn graph(&self) -> &Arc<crate::graph::ResourceGraph> {
        &self.graph
    }
}

// ---------------------------------------------------------------------------
// ResourceCore
// ---------------------------------------------------------------------------

/// Required fields of every resource.
#[derive(Debug)]
pub struct ResourceCore {
    id: ResourceId,
    type_tag: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Optional identifier local to the plant (e.g. a bus address).
    pub local_identifier: Option<String>,
    /// Optional globally unique identifier (e.g. a serial number).
    pub global_identifier: Option<String>,
    parent: Option<ResourceId>,
    children: ReferenceCollection,
    references: ReferenceMap,
    capabilities: CapabilitySet,
}

impl ResourceCore {
    pub(crate) fn new(
        type_tag: String,
        name: String,
        references: ReferenceMap,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            id: ResourceId::UNSET,
            type_tag,
            name,
            description: String::new(),
            local_identifier: None,
            global_identifier: None,
            parent: None,
            children: ReferenceCollection::new(),
            references,
            capabilities,
        }
    }

    /// Database identity; [`ResourceId::UNSET`] until first save.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ResourceId) {
        self.id = id;
    }

    /// Type discriminator this resource was created from.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// The owning resource, `None` for roots.
    #[must_use]
    pub fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ResourceId>) {
        self.parent = parent;
    }

    /// Owned child resources, in attach order.
    #[must_use]
    pub fn children(&self) -> &ReferenceCollection {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut ReferenceCollection {
        &mut self.children
    }

    /// Declared reference slots.
    #[must_use]
    pub fn references(&self) -> &ReferenceMap {
        &self.references
    }

    /// Mutable access to the declared reference slots.
    pub fn references_mut(&mut self) -> &mut ReferenceMap {
        &mut self.references
    }

    /// Instance capability set, seeded from the type registration.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Mutable access to the instance capability set.
    pub fn capabilities_mut(&mut self) -> &mut CapabilitySet {
        &mut self.capabilities
    }

    /// Build the relational row for this core; the caller supplies the
    /// serialized extension blob.
    #[must_use]
    pub fn to_record(&self, extension: serde_json::Value) -> ResourceRecord {
        ResourceRecord {
            id: self.id,
            type_tag: self.type_tag.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            local_identifier: self.local_identifier.clone(),
            global_identifier: self.global_identifier.clone(),
            extension,
            deleted: None,
        }
    }

    /// Restore scalar fields from a persisted row.
    pub(crate) fn apply_record(&mut self, record: &ResourceRecord) {
        self.id = record.id;
        self.name = record.name.clone();
        self.description = record.description.clone();
        self.local_identifier = record.local_identifier.clone();
        self.global_identifier = record.global_identifier.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{ReferenceDescriptor, RelationKind};
    use crossbeam_channel::unbounded;

    struct Probe;
    impl Resource for Probe {}

    struct Other;
    impl Resource for Other {}

    #[test]
    fn dyn_downcast_roundtrip() {
        let boxed: Box<dyn Resource> = Box::new(Probe);
        assert!(boxed.is::<Probe>());
        assert!(!boxed.is::<Other>());
        assert!(boxed.downcast_ref::<Probe>().is_some());
    }

    #[test]
    fn unbound_signal_drops_raise() {
        let (tx, rx) = unbounded();
        let signal = ChangedSignal::new(tx);
        signal.raise();
        assert!(rx.try_recv().is_err());

        signal.bind(ResourceId::new(4).unwrap());
        signal.raise();
        assert_eq!(rx.try_recv().unwrap(), ResourceId::new(4).unwrap());
    }

    #[test]
    fn record_roundtrip_keeps_scalars() {
        let refs = ReferenceMap::from_descriptors(&[ReferenceDescriptor::single(
            "driver",
            RelationKind::Usage,
        )]);
        let mut core = ResourceCore::new(
            "machine".into(),
            "Press 1".into(),
            refs,
            CapabilitySet::new(),
        );
        core.description = "hydraulic press".into();
        core.local_identifier = Some("bus:7".into());

        let record = core.to_record(serde_json::Value::Null);
        let mut other = ResourceCore::new(
            "machine".into(),
            String::new(),
            ReferenceMap::from_descriptors(&[]),
            CapabilitySet::new(),
        );
        other.apply_record(&record);

        assert_eq!(other.name, "Press 1");
        assert_eq!(other.description, "hydraulic press");
        assert_eq!(other.local_identifier.as_deref(), Some("bus:7"));
        assert_eq!(other.id(), ResourceId::UNSET);
    }
}
