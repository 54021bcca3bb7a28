//! The resource graph — authoritative in-memory index of live resources.
//!
//! The graph is an explicitly owned object (no ambient global): the
//! manager creates it, components receive it by reference, and all
//! mutation funnels through the manager. Reads are lock-per-cell; the id
//! index is a `DashMap` so `get` stays O(1) under concurrent readers.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

use fabrik_model::ResourceId;

use crate::capability::CapabilitySet;
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::registry::{TypeConstraint, TypeRegistry};
use crate::resource::{ChangedSignal, Resource, ResourceCore};

// ---------------------------------------------------------------------------
// Cell
// ---------------------------------------------------------------------------

/// Everything the graph knows about one resource.
pub struct ResourceState {
    /// Required fields record.
    pub core: ResourceCore,
    /// Type-specific behavior.
    pub body: Box<dyn Resource>,
    lifecycle: Lifecycle,
    pub(crate) changed: Option<ChangedSignal>,
}

impl ResourceState {
    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Move to `to`, checking the state machine.
    pub(crate) fn transition(&mut self, to: Lifecycle) -> Result<()> {
        if !self.lifecycle.can_transition(to) {
            return Err(Error::InvalidTransition {
                id: self.core.id(),
                from: self.lifecycle,
                to,
            });
        }
        self.lifecycle = to;
        Ok(())
    }
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceState")
            .field("id", &self.core.id())
            .field("type_tag", &self.core.type_tag())
            .field("name", &self.core.name)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

/// One resource behind a single mutex.
///
/// The mutex serializes every access to the core and the body, so a
/// resource never observes concurrent lifecycle calls, mutations, or
/// saves — the per-resource serialization the save path relies on.
pub struct ResourceCell {
    state: Mutex<ResourceState>,
}

/// Shared handle to a [`ResourceCell`].
pub type ResourceHandle = Arc<ResourceCell>;

impl ResourceCell {
    pub(crate) fn new(core: ResourceCore, body: Box<dyn Resource>) -> ResourceHandle {
        Arc::new(Self {
            state: Mutex::new(ResourceState {
                core,
                body,
                lifecycle: Lifecycle::Unloaded,
                changed: None,
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ResourceState> {
        self.state.lock()
    }

    /// Run a read-only closure against the locked state.
    pub fn with<R>(&self, f: impl FnOnce(&ResourceState) -> R) -> R {
        f(&self.state.lock())
    }

    /// The resource's id.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.state.lock().core.id()
    }

    /// The resource's current name.
    #[must_use]
    pub fn name(&self) -> String {
        self.state.lock().core.name.clone()
    }

    /// The resource's type tag.
    #[must_use]
    pub fn type_tag(&self) -> String {
        self.state.lock().core.type_tag().to_string()
    }

    /// The resource's lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle()
    }
}

impl std::fmt::Debug for ResourceCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_lock() {
            Some(state) => state.fmt(f),
            None => f.write_str("ResourceCell(locked)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// In-memory registry of all currently loaded resources.
pub struct ResourceGraph {
    registry: Arc<TypeRegistry>,
    cells: DashMap<i64, ResourceHandle>,
    /// Insertion order, for deterministic iteration and name lookup.
    order: Mutex<Vec<ResourceId>>,
}

impl ResourceGraph {
    pub(crate) fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            cells: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    /// The type registry this graph resolves tags against.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Number of loaded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Whether a resource with `id` is loaded.
    #[must_use]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.cells.contains_key(&id.raw())
    }

    /// O(1) lookup by id.
    #[must_use]
    pub fn get(&self, id: ResourceId) -> Option<ResourceHandle> {
        self.cells.get(&id.raw()).map(|entry| Arc::clone(entry.value()))
    }

    /// First resource with the given name, in insertion order.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<ResourceHandle> {
        self.handles()
            .into_iter()
            .find(|handle| handle.with(|state| state.core.name == name))
    }

    /// All resources whose type is `tag` or derives from it.
    #[must_use]
    pub fn by_tag(&self, tag: &str) -> Vec<ResourceHandle> {
        self.handles()
            .into_iter()
            .filter(|handle| {
                handle.with(|state| self.registry.is_assignable(state.core.type_tag(), tag))
            })
            .collect()
    }

    /// All resources providing every capability in `required`.
    #[must_use]
    pub fn by_capability(&self, required: &CapabilitySet) -> Vec<ResourceHandle> {
        self.handles()
            .into_iter()
            .filter(|handle| handle.with(|state| state.core.capabilities().provides(required)))
            .collect()
    }

    /// All resources matching an arbitrary predicate.
    ///
    /// Re-invoking re-scans the live set; there is no snapshot isolation.
    pub fn find(&self, predicate: impl Fn(&ResourceState) -> bool) -> Vec<ResourceHandle> {
        self.handles()
            .into_iter()
            .filter(|handle| handle.with(&predicate))
            .collect()
    }

    /// The unique resource assignable to `tag`.
    ///
    /// Zero matches and multiple matches are both caller errors, never
    /// silently resolved.
    pub fn single_by_tag(&self, tag: &str) -> Result<ResourceHandle> {
        Self::single(self.by_tag(tag), &TypeConstraint::of_tag(tag))
    }

    /// The unique resource providing `required`.
    pub fn single_by_capability(&self, required: &CapabilitySet) -> Result<ResourceHandle> {
        Self::single(
            self.by_capability(required),
            &TypeConstraint::providing(required.clone()),
        )
    }

    fn single(mut matches: Vec<ResourceHandle>, constraint: &TypeConstraint) -> Result<ResourceHandle> {
        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(Error::no_match(constraint.to_string())),
            count => Err(Error::Ambiguous {
                constraint: constraint.to_string(),
                count,
            }),
        }
    }

    /// Snapshot of all handles in insertion order.
    #[must_use]
    pub fn handles(&self) -> Vec<ResourceHandle> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.cells.get(&id.raw()).map(|entry| Arc::clone(entry.value())))
            .collect()
    }

    /// All resources without a parent.
    #[must_use]
    pub fn roots(&self) -> Vec<ResourceHandle> {
        self.find(|state| state.core.parent().is_none())
    }

    pub(crate) fn insert(&self, handle: ResourceHandle) -> Result<()> {
        let id = handle.id();
        debug_assert!(!id.is_unset(), "graph only holds persisted resources");
        if self.cells.contains_key(&id.raw()) {
            return Err(Error::AlreadyLoaded { id });
        }
        self.cells.insert(id.raw(), handle);
        self.order.lock().push(id);
        Ok(())
    }

    pub(crate) fn remove(&self, id: ResourceId) -> Option<ResourceHandle> {
        let removed = self.cells.remove(&id.raw()).map(|(_, handle)| handle);
        if removed.is_some() {
            self.order.lock().retain(|entry| *entry != id);
        }
        removed
    }

    /// Re-home `child` under `parent` (or make it a root), keeping the
    /// parent pointer and both children collections consistent.
    ///
    /// Must only be called from the manager's serialized mutation path;
    /// the cells are locked one at a time.
    pub(crate) fn attach(&self, child: ResourceId, parent: Option<ResourceId>) -> Result<()> {
        if parent == Some(child) {
            return Err(Error::no_match(format!(
                "resource {child} cannot be its own parent"
            )));
        }
        let child_cell = self.get(child).ok_or(Error::NotFound { id: child })?;
        let new_parent_cell = match parent {
            Some(id) => Some(self.get(id).ok_or(Error::NotFound { id })?),
            None => None,
        };

        let old_parent = child_cell.with(|state| state.core.parent());
        if old_parent == parent {
            return Ok(());
        }

        if let Some(old) = old_parent {
            if let Some(old_cell) = self.get(old) {
                old_cell.lock().core.children_mut().remove(child);
            }
        }
        if let Some(cell) = &new_parent_cell {
            cell.lock().core.children_mut().insert(child);
        }
        child_cell.lock().core.set_parent(parent);
        Ok(())
    }

    /// Handles ordered parent-first: every resource appears after its
    /// parent. Resources whose parent is not loaded count as roots.
    pub(crate) fn parent_first(&self) -> Vec<ResourceHandle> {
        let handles = self.handles();
        let loaded: std::collections::HashSet<ResourceId> =
            handles.iter().map(|handle| handle.id()).collect();

        let mut ordered = Vec::with_capacity(handles.len());
        let mut pending: Vec<ResourceHandle> = handles;
        let mut placed = std::collections::HashSet::new();

        // Peel off layers: first the roots, then resources whose parent
        // is already placed. A corrupt parent cycle would stall — bail
        // out and append the leftovers so nothing is silently dropped.
        while !pending.is_empty() {
            let mut progressed = false;
            let mut rest = Vec::new();
            for handle in pending {
                let parent = handle.with(|state| state.core.parent());
                let ready = match parent {
                    None => true,
                    Some(parent_id) => !loaded.contains(&parent_id) || placed.contains(&parent_id),
                };
                if ready {
                    placed.insert(handle.id());
                    ordered.push(handle);
                    progressed = true;
                } else {
                    rest.push(handle);
                }
            }
            if !progressed {
                tracing::warn!(
                    stalled = rest.len(),
                    "parent ordering stalled, appending remaining resources"
                );
                ordered.extend(rest);
                break;
            }
            pending = rest;
        }
        ordered
    }
}

impl std::fmt::Debug for ResourceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGraph")
            .field("resources", &self.cells.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::reference::ReferenceMap;
    use crate::registry::{TypeDescriptor, TypeRegistryBuilder};

    #[derive(Default)]
    struct Blank;
    impl Resource for Blank {}

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistryBuilder::new()
                .register(TypeDescriptor::new("machine").creates::<Blank>())
                .register(TypeDescriptor::new("saw").base("machine").creates::<Blank>())
                .build()
                .unwrap(),
        )
    }

    fn insert_resource(
        graph: &ResourceGraph,
        raw_id: i64,
        tag: &str,
        name: &str,
        capabilities: CapabilitySet,
    ) -> ResourceHandle {
        let mut core = ResourceCore::new(
            tag.to_string(),
            name.to_string(),
            ReferenceMap::from_descriptors(&[]),
            capabilities,
        );
        core.set_id(ResourceId::new(raw_id).unwrap());
        let handle = ResourceCell::new(core, Box::new(Blank));
        graph.insert(Arc::clone(&handle)).unwrap();
        handle
    }

    #[test]
    fn get_by_id_and_name() {
        let graph = ResourceGraph::new(registry());
        insert_resource(&graph, 1, "machine", "Press", CapabilitySet::new());

        let id = ResourceId::new(1).unwrap();
        assert!(graph.get(id).is_some());
        assert!(graph.by_name("Press").is_some());
        assert!(graph.by_name("Mill").is_none());
        assert!(graph.get(ResourceId::new(99).unwrap()).is_none());
    }

    #[test]
    fn by_tag_includes_derived_types() {
        let graph = ResourceGraph::new(registry());
        insert_resource(&graph, 1, "machine", "Press", CapabilitySet::new());
        insert_resource(&graph, 2, "saw", "Saw", CapabilitySet::new());

        assert_eq!(graph.by_tag("machine").len(), 2);
        assert_eq!(graph.by_tag("saw").len(), 1);
    }

    #[test]
    fn single_lookup_fails_on_zero_and_many() {
        let graph = ResourceGraph::new(registry());
        assert!(matches!(
            graph.single_by_tag("machine"),
            Err(Error::NoMatch { .. })
        ));

        insert_resource(&graph, 1, "machine", "A", CapabilitySet::new());
        assert!(graph.single_by_tag("machine").is_ok());

        insert_resource(&graph, 2, "machine", "B", CapabilitySet::new());
        assert!(matches!(
            graph.single_by_tag("machine"),
            Err(Error::Ambiguous { count: 2, .. })
        ));
    }

    #[test]
    fn capability_lookup_uses_superset_match() {
        const WELDING: Capability = Capability::new("welding");
        let graph = ResourceGraph::new(registry());
        insert_resource(
            &graph,
            1,
            "machine",
            "Welder",
            [WELDING].into_iter().collect(),
        );
        insert_resource(&graph, 2, "machine", "Plain", CapabilitySet::new());

        let required: CapabilitySet = [WELDING].into_iter().collect();
        let found = graph.single_by_capability(&required).unwrap();
        assert_eq!(found.name(), "Welder");
    }

    #[test]
    fn attach_keeps_both_ends_consistent() {
        let graph = ResourceGraph::new(registry());
        let parent = insert_resource(&graph, 1, "machine", "Cell", CapabilitySet::new());
        let child = insert_resource(&graph, 2, "machine", "Station", CapabilitySet::new());
        let parent_id = parent.id();
        let child_id = child.id();

        graph.attach(child_id, Some(parent_id)).unwrap();
        assert_eq!(child.with(|s| s.core.parent()), Some(parent_id));
        assert!(parent.with(|s| s.core.children().contains(child_id)));

        // re-home to root
        graph.attach(child_id, None).unwrap();
        assert_eq!(child.with(|s| s.core.parent()), None);
        assert!(!parent.with(|s| s.core.children().contains(child_id)));
    }

    #[test]
    fn attach_rejects_self_parenting() {
        let graph = ResourceGraph::new(registry());
        let cell = insert_resource(&graph, 1, "machine", "Cell", CapabilitySet::new());
        assert!(graph.attach(cell.id(), Some(cell.id())).is_err());
    }

    #[test]
    fn parent_first_orders_parents_before_children() {
        let graph = ResourceGraph::new(registry());
        // insert child before parent to make ordering do real work
        insert_resource(&graph, 2, "machine", "Station", CapabilitySet::new());
        insert_resource(&graph, 1, "machine", "Cell", CapabilitySet::new());
        insert_resource(&graph, 3, "machine", "Tool", CapabilitySet::new());

        let cell = ResourceId::new(1).unwrap();
        let station = ResourceId::new(2).unwrap();
        let tool = ResourceId::new(3).unwrap();
        graph.attach(station, Some(cell)).unwrap();
        graph.attach(tool, Some(station)).unwrap();

        let order: Vec<ResourceId> = graph
            .parent_first()
            .iter()
            .map(|handle| handle.id())
            .collect();
        let pos = |id| order.iter().position(|entry| *entry == id).unwrap();
        assert!(pos(cell) < pos(station));
        assert!(pos(station) < pos(tool));
    }

    #[test]
    fn duplicate_insert_rejected() {
        let graph = ResourceGraph::new(registry());
        let handle = insert_resource(&graph, 1, "machine", "A", CapabilitySet::new());
        assert!(matches!(
            graph.insert(handle),
            Err(Error::AlreadyLoaded { .. })
        ));
    }
}
