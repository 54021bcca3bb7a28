//! Resource proxies — the handles handed across the facade boundary.
//!
//! A proxy never owns the resource: it holds a weak handle to the cell
//! plus the id, and every access revalidates that the resource is still
//! loaded and live. Once the resource is destroyed (or the manager
//! dropped it), every call on an outstanding proxy fails with
//! [`Error::ProxyDetached`] instead of touching stale state.

use std::sync::Weak;

use fabrik_model::ResourceId;

use crate::capability::CapabilitySet;
use crate::error::{Error, Result};
use crate::graph::{ResourceCell, ResourceHandle, ResourceState};
use crate::lifecycle::Lifecycle;

/// Detachable read handle to one resource.
#[derive(Clone)]
pub struct ResourceProxy {
    id: ResourceId,
    cell: Weak<ResourceCell>,
}

impl ResourceProxy {
    pub(crate) fn new(handle: &ResourceHandle) -> Self {
        Self {
            id: handle.id(),
            cell: std::sync::Arc::downgrade(handle),
        }
    }

    /// The proxied resource's id. Available even after detach.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Whether the proxy still reaches a live resource.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.cell
            .upgrade()
            .is_some_and(|cell| cell.lifecycle().is_live())
    }

    fn attached(&self) -> Result<ResourceHandle> {
        let cell = self
            .cell
            .upgrade()
            .ok_or(Error::ProxyDetached { id: self.id })?;
        if !cell.lifecycle().is_live() {
            return Err(Error::ProxyDetached { id: self.id });
        }
        Ok(cell)
    }

    /// The resource's current name.
    pub fn name(&self) -> Result<String> {
        Ok(self.attached()?.name())
    }

    /// The resource's type tag.
    pub fn type_tag(&self) -> Result<String> {
        Ok(self.attached()?.type_tag())
    }

    /// The resource's lifecycle state.
    pub fn lifecycle(&self) -> Result<Lifecycle> {
        Ok(self.attached()?.lifecycle())
    }

    /// The resource's current capability set.
    pub fn capabilities(&self) -> Result<CapabilitySet> {
        self.with(|state| state.core.capabilities().clone())
    }

    /// The owning resource's id, `None` for roots.
    pub fn parent(&self) -> Result<Option<ResourceId>> {
        self.with(|state| state.core.parent())
    }

    /// Ids of the owned child resources.
    pub fn children(&self) -> Result<Vec<ResourceId>> {
        self.with(|state| state.core.children().to_vec())
    }

    /// Run a read-only closure against the locked resource state.
    pub fn with<R>(&self, f: impl FnOnce(&ResourceState) -> R) -> Result<R> {
        Ok(self.attached()?.with(f))
    }

    /// Run a closure against the concrete resource type, if it is `T`.
    ///
    /// Returns `Ok(None)` when the resource is live but of another type.
    pub fn with_body<T: crate::resource::Resource, R>(
        &self,
        f: impl FnOnce(&T) -> R,
    ) -> Result<Option<R>> {
        self.with(|state| state.body.downcast_ref::<T>().map(f))
    }
}

impl std::fmt::Debug for ResourceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceProxy")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::reference::ReferenceMap;
    use crate::resource::{Resource, ResourceCore};
    use std::sync::Arc;

    #[derive(Default)]
    struct Blank;
    impl Resource for Blank {}

    fn handle(raw_id: i64, name: &str) -> ResourceHandle {
        let mut core = ResourceCore::new(
            "machine".into(),
            name.into(),
            ReferenceMap::from_descriptors(&[]),
            CapabilitySet::new(),
        );
        core.set_id(ResourceId::new(raw_id).unwrap());
        ResourceCell::new(core, Box::new(Blank))
    }

    #[test]
    fn proxy_reads_live_resource() {
        let handle = handle(1, "Press");
        let proxy = ResourceProxy::new(&handle);

        assert!(proxy.is_attached());
        assert_eq!(proxy.name().unwrap(), "Press");
        assert_eq!(proxy.type_tag().unwrap(), "machine");
    }

    #[test]
    fn dropped_cell_detaches_proxy() {
        let handle = handle(2, "Press");
        let proxy = ResourceProxy::new(&handle);
        drop(handle);

        assert!(!proxy.is_attached());
        assert_eq!(proxy.id(), ResourceId::new(2).unwrap());
        assert!(matches!(proxy.name(), Err(Error::ProxyDetached { .. })));
    }

    #[test]
    fn destroyed_resource_detaches_proxy_while_cell_lives() {
        let handle = handle(3, "Press");
        let proxy = ResourceProxy::new(&handle);

        {
            let mut state = handle.lock();
            state.transition(Lifecycle::Destroyed).unwrap();
        }
        assert!(!proxy.is_attached());
        assert!(matches!(
            proxy.lifecycle(),
            Err(Error::ProxyDetached { .. })
        ));
        let _keep = Arc::clone(&handle);
    }

    #[test]
    fn downcast_through_proxy() {
        struct Typed {
            value: u32,
        }
        impl Resource for Typed {}

        let mut core = ResourceCore::new(
            "typed".into(),
            "T".into(),
            ReferenceMap::from_descriptors(&[]),
            CapabilitySet::new(),
        );
        core.set_id(ResourceId::new(4).unwrap());
        let handle = ResourceCell::new(core, Box::new(Typed { value: 17 }));
        let proxy = ResourceProxy::new(&handle);

        assert_eq!(proxy.with_body::<Typed, _>(|t| t.value).unwrap(), Some(17));
        assert_eq!(proxy.with_body::<Blank, _>(|_| ()).unwrap(), None);
    }
}
