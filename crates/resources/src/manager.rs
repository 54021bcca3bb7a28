//! Resource manager — boot hydration, lifecycle ordering, and
//! persistence orchestration.
//!
//! The manager owns the graph, the linker, and the store handle, and is
//! the single funnel for every mutation: explicit `save`, auto-save
//! collection flushes after `mutate`, and changed-signal saves all run
//! through the same linker reconciliation while the resource's cell
//! lock is held, so two save paths can never interleave on one
//! resource.
//!
//! Per-resource lifecycle failures are caught, logged with id and name,
//! and emitted as [`ResourceEvent::LifecycleFailed`] — one faulty
//! resource never prevents its siblings from initializing or starting.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};

use fabrik_model::{LinkRecord, ResourceId, ResourceRecord, ResourceStore};

use crate::error::{Error, Result};
use crate::events::{EventBus, ResourceEvent};
use crate::graph::{ResourceCell, ResourceGraph, ResourceHandle, ResourceState};
use crate::initializer::{ResourceInitializer, SeedResource};
use crate::lifecycle::{Lifecycle, LifecyclePhase};
use crate::linker::ResourceLinker;
use crate::reference::CHILDREN;
use crate::registry::TypeRegistry;
use crate::resource::{ChangedSignal, ResourceContext, ResourceCore};

/// Lifecycle and persistence orchestrator for the resource graph.
pub struct ResourceManager {
    registry: Arc<TypeRegistry>,
    graph: Arc<ResourceGraph>,
    linker: ResourceLinker,
    store: Arc<dyn ResourceStore>,
    events: EventBus,
    changed_tx: Sender<ResourceId>,
    changed_rx: Receiver<ResourceId>,
    started: AtomicBool,
}

impl ResourceManager {
    /// Create a manager over a type registry and a store.
    ///
    /// The graph starts empty; call [`load`](Self::load) to hydrate it.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>, store: Arc<dyn ResourceStore>) -> Self {
        let (changed_tx, changed_rx) = unbounded();
        Self {
            graph: Arc::new(ResourceGraph::new(Arc::clone(&registry))),
            linker: ResourceLinker::new(Arc::clone(&registry)),
            registry,
            store,
            events: EventBus::new(),
            changed_tx,
            changed_rx,
            started: AtomicBool::new(false),
        }
    }

    /// The graph this manager orchestrates.
    #[must_use]
    pub fn graph(&self) -> &Arc<ResourceGraph> {
        &self.graph
    }

    /// The type registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Subscribe to lifecycle and persistence events.
    #[must_use]
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ResourceEvent> {
        self.events.subscribe()
    }

    /// Whether [`start`](Self::start) has run.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------
    // Boot
    // -----------------------------------------------------------------

    /// Hydrate the graph from storage and initialize every resource,
    /// parents before children.
    ///
    /// A record whose type cannot be created or whose extension data
    /// fails to restore is logged and skipped; everything else loads.
    /// Returns the number of resources that entered the graph.
    pub fn load(&self) -> Result<usize> {
        let mut rows: Vec<(ResourceRecord, Vec<LinkRecord>, Vec<LinkRecord>)> = Vec::new();
        {
            let mut uow = self.store.begin();
            let records = uow.resources().all_active()?;
            let active: HashSet<ResourceId> = records.iter().map(|record| record.id).collect();
            for record in records {
                // rows whose other endpoint is soft-deleted or missing
                // must not hydrate dangling ids into slots or parents
                let own = uow
                    .links()
                    .by_source(record.id)?
                    .into_iter()
                    .filter(|row| active.contains(&row.target))
                    .collect();
                let incoming = uow
                    .links()
                    .by_target(record.id)?
                    .into_iter()
                    .filter(|row| active.contains(&row.source))
                    .collect();
                rows.push((record, own, incoming));
            }
            // read-only unit of work, dropped uncommitted
        }

        let mut loaded = 0usize;
        for (record, own, incoming) in rows {
            let id = record.id;
            let type_tag = record.type_tag.clone();
            match self.hydrate_one(record, &own, &incoming) {
                Ok(handle) => {
                    self.graph.insert(handle)?;
                    self.events.emit(ResourceEvent::Added { id, type_tag });
                    loaded += 1;
                }
                Err(error) => {
                    tracing::warn!(resource_id = %id, %type_tag, %error, "skipping unloadable resource");
                }
            }
        }

        for handle in self.graph.parent_first() {
            if let Err(error) = self.initialize_cell(&handle) {
                self.report_failure(&handle, LifecyclePhase::Initialize, &error);
            }
        }

        tracing::info!(resources = loaded, "resource graph loaded");
        Ok(loaded)
    }

    fn hydrate_one(
        &self,
        record: ResourceRecord,
        own: &[LinkRecord],
        incoming: &[LinkRecord],
    ) -> Result<ResourceHandle> {
        let mut body = self.registry.create(&record.type_tag)?;
        if !record.extension.is_null() {
            body.restore(record.extension.clone())?;
        }

        let references = self.linker.reference_map_for(&record.type_tag)?;
        let capabilities = self.registry.capabilities_of(&record.type_tag)?.clone();
        let mut core = ResourceCore::new(
            record.type_tag.clone(),
            record.name.clone(),
            references,
            capabilities,
        );
        core.apply_record(&record);
        self.linker.hydrate_references(&mut core, own, incoming);

        Ok(ResourceCell::new(core, body))
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    fn initialize_cell(&self, handle: &ResourceHandle) -> Result<()> {
        let mut state = handle.lock();
        if !state.lifecycle().can_transition(Lifecycle::Initialized) {
            return Err(Error::InvalidTransition {
                id: state.core.id(),
                from: state.lifecycle(),
                to: Lifecycle::Initialized,
            });
        }

        let signal = ChangedSignal::new(self.changed_tx.clone());
        if !state.core.id().is_unset() {
            signal.bind(state.core.id());
        }
        state.changed = Some(signal.clone());

        let ctx = ResourceContext::new(
            state.core.id(),
            state.core.name.clone(),
            signal,
            Arc::clone(&self.graph),
        );
        state.body.on_initialize(&ctx).map_err(|error| Error::Lifecycle {
            id: state.core.id(),
            name: state.core.name.clone(),
            phase: LifecyclePhase::Initialize,
            reason: error.to_string(),
        })?;

        state.transition(Lifecycle::Initialized)?;
        let id = state.core.id();
        drop(state);
        if !id.is_unset() {
            self.events.emit(ResourceEvent::Initialized { id });
        }
        tracing::debug!(resource_id = %id, "resource initialized");
        Ok(())
    }

    /// Start every initialized resource, parents before children.
    ///
    /// Resources that are already started are left alone; resources
    /// whose initialize failed are skipped.
    pub fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        for handle in self.graph.parent_first() {
            self.start_cell(&handle);
        }
        self.flush_changes();
        Ok(())
    }

    fn start_cell(&self, handle: &ResourceHandle) {
        let mut state = handle.lock();
        match state.lifecycle() {
            Lifecycle::Initialized | Lifecycle::Stopped => {}
            other => {
                tracing::debug!(resource_id = %state.core.id(), lifecycle = %other, "not startable, skipping");
                return;
            }
        }
        match state.body.on_start() {
            Ok(()) => {
                // transition from Initialized/Stopped to Started is always legal
                let _ = state.transition(Lifecycle::Started);
                let id = state.core.id();
                drop(state);
                self.events.emit(ResourceEvent::Started { id });
                tracing::debug!(resource_id = %id, "resource started");
            }
            Err(error) => {
                drop(state);
                self.report_failure(handle, LifecyclePhase::Start, &error);
            }
        }
    }

    /// Stop every started resource, children before parents.
    pub fn stop(&self) {
        self.flush_changes();
        for handle in self.graph.parent_first().into_iter().rev() {
            self.stop_cell(&handle);
        }
        self.started.store(false, Ordering::SeqCst);
        self.flush_changes();
    }

    fn stop_cell(&self, handle: &ResourceHandle) {
        let mut state = handle.lock();
        if !state.lifecycle().is_started() {
            return;
        }
        match state.body.on_stop() {
            Ok(()) => {
                let _ = state.transition(Lifecycle::Stopped);
                let id = state.core.id();
                drop(state);
                self.events.emit(ResourceEvent::Stopped { id });
                tracing::debug!(resource_id = %id, "resource stopped");
            }
            Err(error) => {
                // still leave the started state, the hook had its chance
                let _ = state.transition(Lifecycle::Stopped);
                drop(state);
                self.report_failure(handle, LifecyclePhase::Stop, &error);
            }
        }
    }

    fn report_failure(&self, handle: &ResourceHandle, phase: LifecyclePhase, error: &Error) {
        let (id, name) = handle.with(|state| (state.core.id(), state.core.name.clone()));
        tracing::error!(resource_id = %id, %name, %phase, %error, "resource lifecycle hook failed");
        self.events.emit(ResourceEvent::LifecycleFailed {
            id,
            phase,
            error: error.to_string(),
        });
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Persist a resource: scalar fields, extension data, and reconciled
    /// references in one unit of work.
    pub fn save(&self, id: ResourceId) -> Result<()> {
        let handle = self.graph.get(id).ok_or(Error::NotFound { id })?;
        self.save_handle(&handle)?;
        self.flush_changes();
        Ok(())
    }

    fn save_handle(&self, handle: &ResourceHandle) -> Result<()> {
        let mut state = handle.lock();
        let mut uow = self.store.begin();
        let affected = self.linker.persist(&mut *uow, &mut state)?;
        uow.commit()?;

        // everything is on disk, absorb any outstanding dirt
        let _ = state.core.references_mut().drain_dirty();
        let _ = state.core.children_mut().take_dirty();
        let id = state.core.id();
        drop(state);

        self.events.emit(ResourceEvent::Saved { id, affected });
        tracing::debug!(resource_id = %id, "resource saved");
        Ok(())
    }

    /// Run a mutation against the locked resource, then flush auto-save
    /// collections that got dirty.
    ///
    /// Collections not flagged auto-save keep their new membership in
    /// memory and are persisted on the next explicit [`save`](Self::save).
    /// The cell lock is held across the flush, so a concurrent save of
    /// the same resource cannot interleave.
    pub fn mutate<R>(&self, id: ResourceId, f: impl FnOnce(&mut ResourceState) -> R) -> Result<R> {
        let handle = self.graph.get(id).ok_or(Error::NotFound { id })?;
        let result = {
            let mut state = handle.lock();
            let result = f(&mut state);

            let children_dirty = state.core.children_mut().take_dirty();
            let dirty = state.core.references_mut().drain_dirty();
            let auto: Vec<&'static str> = dirty
                .into_iter()
                .filter(|name| {
                    state
                        .core
                        .references()
                        .descriptor(name)
                        .map(|descriptor| descriptor.auto_save)
                        .unwrap_or(false)
                })
                .collect();

            if children_dirty || !auto.is_empty() {
                let mut affected = Vec::new();
                let mut uow = self.store.begin();
                if children_dirty {
                    affected
                        .extend(self.linker.save_single_collection(&mut *uow, &state.core, CHILDREN)?);
                }
                for name in &auto {
                    affected
                        .extend(self.linker.save_single_collection(&mut *uow, &state.core, name)?);
                }
                uow.commit()?;
                let id = state.core.id();
                self.events.emit(ResourceEvent::Saved { id, affected });
                tracing::debug!(resource_id = %id, collections = auto.len(), "auto-save collections persisted");
            }
            result
        };
        self.flush_changes();
        Ok(result)
    }

    // -----------------------------------------------------------------
    // Creation & destruction
    // -----------------------------------------------------------------

    /// Explicitly instantiate, initialize, persist, and register a new
    /// resource of type `tag`. The setup closure runs before initialize.
    ///
    /// If the manager is already started, the new resource is started
    /// immediately.
    pub fn create(
        &self,
        tag: &str,
        setup: impl FnOnce(&mut ResourceState) -> Result<()>,
    ) -> Result<ResourceId> {
        let body = self.registry.create(tag)?;
        let references = self.linker.reference_map_for(tag)?;
        let capabilities = self.registry.capabilities_of(tag)?.clone();
        let core = ResourceCore::new(tag.to_string(), tag.to_string(), references, capabilities);
        let handle = ResourceCell::new(core, body);

        {
            let mut state = handle.lock();
            setup(&mut state)?;
        }
        self.initialize_cell(&handle)?;

        let id = {
            let mut state = handle.lock();
            let mut uow = self.store.begin();
            self.linker.persist(&mut *uow, &mut state)?;
            uow.commit()?;
            let _ = state.core.references_mut().drain_dirty();
            let _ = state.core.children_mut().take_dirty();
            state.core.id()
        };
        self.graph.insert(Arc::clone(&handle))?;
        self.events.emit(ResourceEvent::Added {
            id,
            type_tag: tag.to_string(),
        });
        tracing::info!(resource_id = %id, type_tag = tag, "resource created");

        if self.is_started() {
            self.start_cell(&handle);
        }
        self.flush_changes();
        Ok(id)
    }

    /// Re-home `child` under `parent` (`None` makes it a root) and
    /// persist the affected children collections.
    pub fn attach(&self, child: ResourceId, parent: Option<ResourceId>) -> Result<()> {
        let child_cell = self.graph.get(child).ok_or(Error::NotFound { id: child })?;
        let old_parent = child_cell.with(|state| state.core.parent());
        if old_parent == parent {
            return Ok(());
        }
        self.graph.attach(child, parent)?;

        // lock order is always cell first, store second
        for parent_id in [old_parent, parent].into_iter().flatten() {
            if let Some(cell) = self.graph.get(parent_id) {
                let mut state = cell.lock();
                let mut uow = self.store.begin();
                self.linker
                    .save_single_collection(&mut *uow, &state.core, CHILDREN)?;
                uow.commit()?;
                let _ = state.core.children_mut().take_dirty();
            }
        }
        tracing::debug!(resource_id = %child, parent = ?parent, "resource re-homed");
        self.flush_changes();
        Ok(())
    }

    /// Stop, dispose, unregister, and delete a resource.
    ///
    /// `permanent` removes the row and its links; otherwise the row is
    /// soft-deleted with a timestamp. Either way the resource leaves the
    /// graph and subsequent lookups fail typed.
    pub fn destroy(&self, id: ResourceId, permanent: bool) -> Result<()> {
        let handle = self.graph.get(id).ok_or(Error::NotFound { id })?;
        let (parent, children, partners) = {
            let mut state = handle.lock();

            if state.lifecycle().is_started() {
                if let Err(error) = state.body.on_stop() {
                    let failure = Error::Lifecycle {
                        id,
                        name: state.core.name.clone(),
                        phase: LifecyclePhase::Stop,
                        reason: error.to_string(),
                    };
                    tracing::warn!(resource_id = %id, error = %failure, "stop during destroy failed");
                }
                let _ = state.transition(Lifecycle::Stopped);
            }
            state.body.on_dispose();
            // unsubscribe the changed listener with the instance
            state.changed = None;
            state.transition(Lifecycle::Destroyed)?;

            let mut uow = self.store.begin();
            // capture both link directions before the rows disappear;
            // these partners still hold the dead id in their slots
            let incoming = uow.links().by_target(id)?;
            let outgoing = uow.links().by_source(id)?;
            if permanent {
                uow.links().remove_for(id)?;
                uow.resources().remove(id)?;
            } else {
                uow.resources().soft_delete(id, Utc::now())?;
            }
            uow.commit()?;

            let mut partners: Vec<ResourceId> = incoming
                .iter()
                .filter(|row| row.name != CHILDREN)
                .map(|row| row.source)
                .chain(
                    outgoing
                        .iter()
                        .filter(|row| row.name != CHILDREN)
                        .map(|row| row.target),
                )
                .collect();
            partners.sort_unstable();
            partners.dedup();
            partners.retain(|partner| *partner != id);

            (state.core.parent(), state.core.children().to_vec(), partners)
        };

        // detach from the owner and orphan the children
        if let Some(parent_id) = parent {
            if let Some(cell) = self.graph.get(parent_id) {
                let mut state = cell.lock();
                state.core.children_mut().remove(id);
                let mut uow = self.store.begin();
                self.linker
                    .save_single_collection(&mut *uow, &state.core, CHILDREN)?;
                uow.commit()?;
                let _ = state.core.children_mut().take_dirty();
            }
        }
        for child_id in children {
            if let Some(cell) = self.graph.get(child_id) {
                cell.lock().core.set_parent(None);
            }
        }

        // scrub the dead id out of every partner's slots; a partner's
        // next save must not re-create an edge to the deleted row
        for partner_id in partners {
            if let Some(cell) = self.graph.get(partner_id) {
                let mut state = cell.lock();
                let mut uow = self.store.begin();
                let affected =
                    self.linker
                        .purge_reference_target(&mut *uow, &mut state.core, id)?;
                uow.commit()?;
                let _ = state.core.references_mut().drain_dirty();
                if !affected.is_empty() {
                    let partner = state.core.id();
                    drop(state);
                    self.events.emit(ResourceEvent::Saved {
                        id: partner,
                        affected,
                    });
                }
            }
        }

        self.graph.remove(id);
        self.events.emit(ResourceEvent::Destroyed { id, permanent });
        tracing::info!(resource_id = %id, permanent, "resource destroyed");
        self.flush_changes();
        Ok(())
    }

    /// Run a bootstrap initializer and persist the roots it seeds.
    ///
    /// Returns the ids of the created root resources.
    pub fn execute_initializer(
        &self,
        initializer: &dyn ResourceInitializer,
    ) -> Result<Vec<ResourceId>> {
        tracing::info!(initializer = initializer.name(), "executing resource initializer");
        let seeds = initializer.execute(&self.registry)?;
        let mut roots = Vec::with_capacity(seeds.len());
        for seed in seeds {
            roots.push(self.create_seed(seed, None)?);
        }
        Ok(roots)
    }

    fn create_seed(&self, seed: SeedResource, parent: Option<ResourceId>) -> Result<ResourceId> {
        let SeedResource {
            tag,
            name,
            setup,
            children,
        } = seed;
        let id = self.create(&tag, |state| {
            state.core.name = name;
            match setup {
                Some(setup) => setup(state),
                None => Ok(()),
            }
        })?;
        if parent.is_some() {
            self.attach(id, parent)?;
        }
        for child in children {
            self.create_seed(child, Some(id))?;
        }
        Ok(id)
    }

    // -----------------------------------------------------------------
    // Changed-signal queue
    // -----------------------------------------------------------------

    /// Drain the changed-signal queue, saving each announced resource.
    ///
    /// Runs automatically at the end of every manager operation; exposed
    /// for hosts that want to flush between operations (e.g. after a
    /// burst of driver events).
    pub fn flush_changes(&self) {
        while let Ok(id) = self.changed_rx.try_recv() {
            let Some(handle) = self.graph.get(id) else {
                tracing::debug!(resource_id = %id, "change signal for unloaded resource, ignoring");
                continue;
            };
            if let Err(error) = self.save_handle(&handle) {
                tracing::warn!(resource_id = %id, %error, "failed to save changed resource");
            }
        }
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("resources", &self.graph.len())
            .field("started", &self.is_started())
            .finish()
    }
}
