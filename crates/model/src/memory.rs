//! In-memory store.
//!
//! Backs every test suite and embedded deployments without a database.
//! Transactions are serialized: `begin()` takes the store lock for the
//! lifetime of the unit of work and operates on a working copy, which is
//! swapped in on commit. Dropping the unit of work publishes nothing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::record::{LinkId, LinkRecord, ResourceId, ResourceRecord};
use crate::store::{
    LinkRepository, ResourceRepository, ResourceStore, StoreError, StoreResult, UnitOfWork,
};

#[derive(Debug, Default, Clone)]
struct MemoryInner {
    resources: BTreeMap<i64, ResourceRecord>,
    links: BTreeMap<i64, LinkRecord>,
    next_resource: i64,
    next_link: i64,
}

/// In-memory [`ResourceStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resource rows, soft-deleted ones included.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.inner.lock().resources.len()
    }

    /// Number of link rows.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.inner.lock().links.len()
    }
}

impl ResourceStore for MemoryStore {
    fn begin(&self) -> Box<dyn UnitOfWork + '_> {
        let guard = self.inner.lock();
        let work = guard.clone();
        Box::new(MemoryUnitOfWork { guard, work })
    }
}

/// One open transaction against a [`MemoryStore`].
///
/// Holds the store lock, so units of work are strictly serialized.
struct MemoryUnitOfWork<'a> {
    guard: MutexGuard<'a, MemoryInner>,
    work: MemoryInner,
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn resources(&mut self) -> &mut dyn ResourceRepository {
        self
    }

    fn links(&mut self) -> &mut dyn LinkRepository {
        self
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        tracing::trace!(
            resources = self.work.resources.len(),
            links = self.work.links.len(),
            "committing in-memory transaction"
        );
        *self.guard = std::mem::take(&mut self.work);
        Ok(())
    }
}

impl ResourceRepository for MemoryUnitOfWork<'_> {
    fn insert(&mut self, mut record: ResourceRecord) -> StoreResult<ResourceId> {
        self.work.next_resource += 1;
        let id = ResourceId::new(self.work.next_resource)
            .ok_or_else(|| StoreError::backend("resource id sequence overflow"))?;
        record.id = id;
        self.work.resources.insert(id.raw(), record);
        Ok(id)
    }

    fn update(&mut self, record: ResourceRecord) -> StoreResult<()> {
        let id = record.id;
        match self.work.resources.get_mut(&id.raw()) {
            Some(row) => {
                *row = record;
                Ok(())
            }
            None => Err(StoreError::MissingRow { id }),
        }
    }

    fn get(&mut self, id: ResourceId) -> StoreResult<Option<ResourceRecord>> {
        Ok(self.work.resources.get(&id.raw()).cloned())
    }

    fn all_active(&mut self) -> StoreResult<Vec<ResourceRecord>> {
        Ok(self
            .work
            .resources
            .values()
            .filter(|row| row.deleted.is_none())
            .cloned()
            .collect())
    }

    fn soft_delete(&mut self, id: ResourceId, at: DateTime<Utc>) -> StoreResult<()> {
        match self.work.resources.get_mut(&id.raw()) {
            Some(row) => {
                row.deleted = Some(at);
                Ok(())
            }
            None => Err(StoreError::MissingRow { id }),
        }
    }

    fn remove(&mut self, id: ResourceId) -> StoreResult<()> {
        match self.work.resources.remove(&id.raw()) {
            Some(_) => Ok(()),
            None => Err(StoreError::MissingRow { id }),
        }
    }
}

impl LinkRepository for MemoryUnitOfWork<'_> {
    fn insert(&mut self, mut record: LinkRecord) -> StoreResult<LinkId> {
        self.work.next_link += 1;
        let id = LinkId::new(self.work.next_link)
            .ok_or_else(|| StoreError::backend("link id sequence overflow"))?;
        record.id = id;
        self.work.links.insert(id.raw(), record);
        Ok(id)
    }

    fn remove(&mut self, id: LinkId) -> StoreResult<()> {
        match self.work.links.remove(&id.raw()) {
            Some(_) => Ok(()),
            None => Err(StoreError::MissingLink { id }),
        }
    }

    fn by_source(&mut self, source: ResourceId) -> StoreResult<Vec<LinkRecord>> {
        let mut links: Vec<LinkRecord> = self
            .work
            .links
            .values()
            .filter(|link| link.source == source)
            .cloned()
            .collect();
        links.sort_by(|a, b| (&a.name, a.position).cmp(&(&b.name, b.position)));
        Ok(links)
    }

    fn by_target(&mut self, target: ResourceId) -> StoreResult<Vec<LinkRecord>> {
        let mut links: Vec<LinkRecord> = self
            .work
            .links
            .values()
            .filter(|link| link.target == target)
            .cloned()
            .collect();
        links.sort_by(|a, b| (&a.name, a.position).cmp(&(&b.name, b.position)));
        Ok(links)
    }

    fn remove_for(&mut self, id: ResourceId) -> StoreResult<()> {
        self.work
            .links
            .retain(|_, link| link.source != id && link.target != id);
        Ok(())
    }
}
