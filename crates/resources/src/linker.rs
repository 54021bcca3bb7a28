//! Reference linker — reconciliation of declared references against
//! stored link rows.
//!
//! The linker owns the mapping between a resource's in-memory reference
//! slots and the `LinkRecord` rows in the store: it instantiates the
//! slot table from the type's descriptors, diffs the current membership
//! against the persisted rows on save, and rebuilds the slots from rows
//! on boot. Reconciliation is idempotent — saving twice without an
//! intervening mutation writes nothing the second time and reports an
//! empty affected set.
//!
//! Convention: both ends of a bidirectional reference declare the same
//! name; the source end owns the rows, the target end is derived from
//! incoming rows at hydration time.

use std::collections::HashSet;
use std::sync::Arc;

use fabrik_model::{LinkRecord, RelationKind, ResourceId, UnitOfWork};

use crate::error::Result;
use crate::graph::{ResourceHandle, ResourceState};
use crate::reference::{
    Cardinality, ReferenceDescriptor, ReferenceMap, ReferenceRole, ReferenceSlot, CHILDREN,
};
use crate::registry::TypeRegistry;
use crate::resource::ResourceCore;

/// Attribute-table-driven persistence of resource references.
pub struct ResourceLinker {
    registry: Arc<TypeRegistry>,
}

impl ResourceLinker {
    /// Create a linker over the given type registry.
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    /// Instantiate the declared reference slots for a type.
    pub fn reference_map_for(&self, tag: &str) -> Result<ReferenceMap> {
        Ok(ReferenceMap::from_descriptors(
            self.registry.references_of(tag)?,
        ))
    }

    /// The subset of a type's references flagged for auto-save.
    pub fn auto_save_references(&self, tag: &str) -> Result<Vec<ReferenceDescriptor>> {
        Ok(self
            .registry
            .references_of(tag)?
            .iter()
            .filter(|descriptor| descriptor.auto_save)
            .cloned()
            .collect())
    }

    /// Persist one resource completely: scalar fields, extension data,
    /// and reconciled references, in the caller's unit of work.
    ///
    /// Inserts or updates depending on identity presence; a newly
    /// assigned id is written back into the core (and bound to the
    /// changed-signal) before link reconciliation so the rows carry the
    /// real identity.
    pub fn persist(
        &self,
        uow: &mut dyn UnitOfWork,
        state: &mut ResourceState,
    ) -> Result<Vec<ResourceId>> {
        let extension = state.body.extension_data()?;
        let record = state.core.to_record(extension);

        if state.core.id().is_unset() {
            let id = uow.resources().insert(record)?;
            state.core.set_id(id);
            if let Some(signal) = &state.changed {
                signal.bind(id);
            }
            tracing::debug!(resource_id = %id, type_tag = %state.core.type_tag(), "inserted resource row");
        } else {
            uow.resources().update(record)?;
        }

        self.save_references(uow, &state.core)
    }

    /// Reconcile the full reference set of `core` against its stored
    /// link rows. Returns the partner ids whose membership changed.
    pub fn save_references(
        &self,
        uow: &mut dyn UnitOfWork,
        core: &ResourceCore,
    ) -> Result<Vec<ResourceId>> {
        let source = core.id();
        debug_assert!(!source.is_unset(), "references saved before identity");

        let existing = uow.links().by_source(source)?;
        let mut affected = Vec::new();
        let mut managed: HashSet<&str> = HashSet::new();

        // Composition edge first.
        managed.insert(CHILDREN);
        self.reconcile_name(
            uow,
            source,
            CHILDREN,
            RelationKind::ParentChild,
            &core.children().to_vec(),
            &existing,
            &mut affected,
        )?;

        // Declared references. A slot whose descriptor no longer resolves
        // is logged and skipped so it cannot block its siblings.
        for (descriptor, slot) in core.references().iter() {
            if descriptor.role == ReferenceRole::Target {
                continue;
            }
            if !managed.insert(descriptor.name) {
                tracing::warn!(
                    resource_id = %source,
                    reference = descriptor.name,
                    "duplicate reference name, skipping"
                );
                continue;
            }
            let desired = match slot {
                ReferenceSlot::Single(target) => target.iter().copied().collect::<Vec<_>>(),
                ReferenceSlot::Collection(collection) => collection.to_vec(),
            };
            self.reconcile_name(
                uow,
                source,
                descriptor.name,
                descriptor.kind,
                &desired,
                &existing,
                &mut affected,
            )?;
        }

        // Rows under names this type no longer declares are left in
        // place; removing data over a registry drift is worse than
        // carrying it.
        for row in &existing {
            if !managed.contains(row.name.as_str()) {
                tracing::warn!(
                    resource_id = %source,
                    reference = %row.name,
                    "stale link row for undeclared reference, leaving untouched"
                );
            }
        }

        affected.sort_unstable();
        affected.dedup();
        Ok(affected)
    }

    /// Persist just one collection's current membership.
    pub fn save_single_collection(
        &self,
        uow: &mut dyn UnitOfWork,
        core: &ResourceCore,
        name: &str,
    ) -> Result<Vec<ResourceId>> {
        let source = core.id();
        let (kind, desired) = if name == CHILDREN {
            (RelationKind::ParentChild, core.children().to_vec())
        } else {
            let descriptor = core.references().descriptor(name)?.clone();
            let desired = core.references().collection(name)?.to_vec();
            (descriptor.kind, desired)
        };

        let existing = uow.links().by_source(source)?;
        let mut affected = Vec::new();
        self.reconcile_name(uow, source, name, kind, &desired, &existing, &mut affected)?;
        affected.sort_unstable();
        affected.dedup();
        Ok(affected)
    }

    /// Remove a destroyed resource from every reference slot of `core`.
    ///
    /// Source-role names that held the id are reconciled against their
    /// stored rows in the caller's unit of work, so a later save of
    /// this resource cannot re-create an edge to the dead row.
    /// Target-role slots are derived and only cleared in memory.
    /// Returns the partner ids whose membership changed.
    pub fn purge_reference_target(
        &self,
        uow: &mut dyn UnitOfWork,
        core: &mut ResourceCore,
        dead: ResourceId,
    ) -> Result<Vec<ResourceId>> {
        let holding: Vec<ReferenceDescriptor> = core
            .references()
            .iter()
            .filter(|(_, slot)| match slot {
                ReferenceSlot::Single(target) => *target == Some(dead),
                ReferenceSlot::Collection(collection) => collection.contains(dead),
            })
            .map(|(descriptor, _)| descriptor.clone())
            .collect();
        if holding.is_empty() {
            return Ok(Vec::new());
        }

        let existing = uow.links().by_source(core.id())?;
        let mut affected = Vec::new();
        for descriptor in holding {
            let desired = match descriptor.cardinality {
                Cardinality::Single => {
                    core.references_mut().set_single(descriptor.name, None)?;
                    Vec::new()
                }
                Cardinality::Collection => {
                    let collection = core.references_mut().collection_mut(descriptor.name)?;
                    collection.remove(dead);
                    collection.to_vec()
                }
            };
            if descriptor.role == ReferenceRole::Source {
                self.reconcile_name(
                    uow,
                    core.id(),
                    descriptor.name,
                    descriptor.kind,
                    &desired,
                    &existing,
                    &mut affected,
                )?;
            }
        }
        affected.sort_unstable();
        affected.dedup();
        Ok(affected)
    }

    /// Persist every parentless resource in `roots`.
    pub fn save_roots(
        &self,
        uow: &mut dyn UnitOfWork,
        roots: &[ResourceHandle],
    ) -> Result<Vec<ResourceId>> {
        let mut saved = Vec::with_capacity(roots.len());
        for handle in roots {
            let mut state = handle.lock();
            if state.core.parent().is_some() {
                continue;
            }
            self.persist(uow, &mut state)?;
            saved.push(state.core.id());
        }
        Ok(saved)
    }

    /// Rebuild the reference slots of `core` from stored rows.
    ///
    /// `own` are rows with this resource as source, `incoming` rows with
    /// it as target. Also restores the parent pointer from the incoming
    /// composition edge. Never marks anything dirty.
    pub fn hydrate_references(
        &self,
        core: &mut ResourceCore,
        own: &[LinkRecord],
        incoming: &[LinkRecord],
    ) {
        let children: Vec<ResourceId> = own
            .iter()
            .filter(|row| row.name == CHILDREN)
            .map(|row| row.target)
            .collect();
        core.children_mut().hydrate(children);

        let parent = incoming
            .iter()
            .find(|row| row.name == CHILDREN)
            .map(|row| row.source);
        core.set_parent(parent);

        let declared: Vec<ReferenceDescriptor> = core
            .references()
            .iter()
            .map(|(descriptor, _)| descriptor.clone())
            .collect();
        for descriptor in declared {
            let targets: Vec<ResourceId> = match descriptor.role {
                ReferenceRole::Source => own
                    .iter()
                    .filter(|row| row.name == descriptor.name)
                    .map(|row| row.target)
                    .collect(),
                ReferenceRole::Target => incoming
                    .iter()
                    .filter(|row| row.name == descriptor.name)
                    .map(|row| row.source)
                    .collect(),
            };
            match descriptor.cardinality {
                Cardinality::Single => {
                    let target = targets.first().copied();
                    // slot exists for every declared descriptor
                    let _ = core.references_mut().set_single(descriptor.name, target);
                }
                Cardinality::Collection => {
                    if let Ok(collection) = core.references_mut().collection_mut(descriptor.name) {
                        collection.hydrate(targets);
                    }
                }
            }
        }
    }

    /// Diff `desired` membership against the `existing` rows under one
    /// reference name: keep rows whose target and position still match,
    /// delete the rest, insert what is missing.
    #[allow(clippy::too_many_arguments)]
    fn reconcile_name(
        &self,
        uow: &mut dyn UnitOfWork,
        source: ResourceId,
        name: &str,
        kind: RelationKind,
        desired: &[ResourceId],
        existing: &[LinkRecord],
        affected: &mut Vec<ResourceId>,
    ) -> Result<()> {
        let rows: Vec<&LinkRecord> = existing.iter().filter(|row| row.name == name).collect();

        let mut claimed = vec![false; desired.len()];
        let mut stale = Vec::new();
        for row in &rows {
            let keep = desired
                .iter()
                .position(|target| *target == row.target)
                .is_some_and(|pos| pos == row.position && !std::mem::replace(&mut claimed[pos], true));
            if !keep {
                stale.push(*row);
            }
        }

        let existing_targets: HashSet<ResourceId> = rows.iter().map(|row| row.target).collect();
        let desired_targets: HashSet<ResourceId> = desired.iter().copied().collect();

        for row in stale {
            uow.links().remove(row.id)?;
            if !desired_targets.contains(&row.target) {
                affected.push(row.target);
            }
        }
        for (position, target) in desired.iter().enumerate() {
            if !claimed[position] {
                uow.links()
                    .insert(LinkRecord::new(source, *target, name, kind, position))?;
                if !existing_targets.contains(target) {
                    affected.push(*target);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResourceLinker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLinker").finish()
    }
}
