//! Facade boundary — the surface other modules consume.
//!
//! Consumers never receive graph handles; every lookup returns a
//! [`ResourceProxy`] that revalidates on access and detaches on destroy.
//! The facade is a thin veneer over the manager: queries delegate to the
//! graph, mutations funnel through the manager's serialized paths.

use std::sync::Arc;

use fabrik_model::ResourceId;

use crate::capability::CapabilitySet;
use crate::error::{Error, Result};
use crate::events::ResourceEvent;
use crate::graph::ResourceState;
use crate::initializer::ResourceInitializer;
use crate::manager::ResourceManager;
use crate::proxy::ResourceProxy;
use crate::registry::TypeConstraint;

/// Read-side surface: typed lookups over the live graph.
pub trait ResourceAccess: Send + Sync {
    /// The resource with `id`.
    fn get(&self, id: ResourceId) -> Result<ResourceProxy>;

    /// The first resource named `name`, in load order.
    fn by_name(&self, name: &str) -> Result<ResourceProxy>;

    /// All resources whose type is `tag` or derives from it.
    fn with_tag(&self, tag: &str) -> Vec<ResourceProxy>;

    /// All resources providing every capability in `required`.
    fn with_capability(&self, required: &CapabilitySet) -> Vec<ResourceProxy>;

    /// The unique resource assignable to `tag`; zero or many matches are
    /// errors.
    fn single_by_tag(&self, tag: &str) -> Result<ResourceProxy>;

    /// The unique resource providing `required`; zero or many matches
    /// are errors.
    fn single_by_capability(&self, required: &CapabilitySet) -> Result<ResourceProxy>;

    /// Tags of the registered creatable types matching `constraint`.
    fn supported_types(&self, constraint: &TypeConstraint) -> Vec<String>;

    /// Subscribe to resource lifecycle and persistence events.
    fn subscribe(&self) -> crossbeam_channel::Receiver<ResourceEvent>;
}

/// Write-side surface: creation, mutation, persistence, destruction.
pub trait ResourceControl: Send + Sync {
    /// Create, initialize, and persist a resource of type `tag`; the
    /// setup closure runs before initialization.
    fn create(
        &self,
        tag: &str,
        setup: Box<dyn FnOnce(&mut ResourceState) -> Result<()> + Send>,
    ) -> Result<ResourceProxy>;

    /// Run a mutation against the locked resource; auto-save collections
    /// it dirtied are persisted before the lock is released.
    fn modify(
        &self,
        id: ResourceId,
        f: Box<dyn FnOnce(&mut ResourceState) -> Result<()> + Send>,
    ) -> Result<()>;

    /// Persist the resource's scalars, extension data, and references.
    fn save(&self, id: ResourceId) -> Result<()>;

    /// Re-home `child` under `parent`; `None` makes it a root.
    fn attach(&self, child: ResourceId, parent: Option<ResourceId>) -> Result<()>;

    /// Stop, unregister, and delete a resource. `permanent` removes the
    /// rows; otherwise the resource is soft-deleted.
    fn destroy(&self, id: ResourceId, permanent: bool) -> Result<()>;

    /// Run a bootstrap initializer; returns proxies to the seeded roots.
    fn execute_initializer(&self, initializer: &dyn ResourceInitializer)
        -> Result<Vec<ResourceProxy>>;
}

/// The facade implementation handed to consuming modules.
#[derive(Clone)]
pub struct ResourceFacade {
    manager: Arc<ResourceManager>,
}

impl ResourceFacade {
    /// Wrap a manager.
    #[must_use]
    pub fn new(manager: Arc<ResourceManager>) -> Self {
        Self { manager }
    }

    /// The manager behind this facade.
    #[must_use]
    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    fn proxy(&self, id: ResourceId) -> Result<ResourceProxy> {
        self.manager
            .graph()
            .get(id)
            .map(|handle| ResourceProxy::new(&handle))
            .ok_or(Error::NotFound { id })
    }
}

impl ResourceAccess for ResourceFacade {
    fn get(&self, id: ResourceId) -> Result<ResourceProxy> {
        self.proxy(id)
    }

    fn by_name(&self, name: &str) -> Result<ResourceProxy> {
        self.manager
            .graph()
            .by_name(name)
            .map(|handle| ResourceProxy::new(&handle))
            .ok_or_else(|| Error::no_match(format!("resource named '{name}'")))
    }

    fn with_tag(&self, tag: &str) -> Vec<ResourceProxy> {
        self.manager
            .graph()
            .by_tag(tag)
            .iter()
            .map(ResourceProxy::new)
            .collect()
    }

    fn with_capability(&self, required: &CapabilitySet) -> Vec<ResourceProxy> {
        self.manager
            .graph()
            .by_capability(required)
            .iter()
            .map(ResourceProxy::new)
            .collect()
    }

    fn single_by_tag(&self, tag: &str) -> Result<ResourceProxy> {
        let handle = self.manager.graph().single_by_tag(tag)?;
        Ok(ResourceProxy::new(&handle))
    }

    fn single_by_capability(&self, required: &CapabilitySet) -> Result<ResourceProxy> {
        let handle = self.manager.graph().single_by_capability(required)?;
        Ok(ResourceProxy::new(&handle))
    }

    fn supported_types(&self, constraint: &TypeConstraint) -> Vec<String> {
        self.manager
            .registry()
            .supported_types(constraint)
            .iter()
            .map(|node| node.tag().to_string())
            .collect()
    }

    fn subscribe(&self) -> crossbeam_channel::Receiver<ResourceEvent> {
        self.manager.subscribe()
    }
}

impl ResourceControl for ResourceFacade {
    fn create(
        &self,
        tag: &str,
        setup: Box<dyn FnOnce(&mut ResourceState) -> Result<()> + Send>,
    ) -> Result<ResourceProxy> {
        let id = self.manager.create(tag, setup)?;
        self.proxy(id)
    }

    fn modify(
        &self,
        id: ResourceId,
        f: Box<dyn FnOnce(&mut ResourceState) -> Result<()> + Send>,
    ) -> Result<()> {
        self.manager.mutate(id, f)?
    }

    fn save(&self, id: ResourceId) -> Result<()> {
        self.manager.save(id)
    }

    fn attach(&self, child: ResourceId, parent: Option<ResourceId>) -> Result<()> {
        self.manager.attach(child, parent)
    }

    fn destroy(&self, id: ResourceId, permanent: bool) -> Result<()> {
        self.manager.destroy(id, permanent)
    }

    fn execute_initializer(
        &self,
        initializer: &dyn ResourceInitializer,
    ) -> Result<Vec<ResourceProxy>> {
        let ids = self.manager.execute_initializer(initializer)?;
        ids.into_iter().map(|id| self.proxy(id)).collect()
    }
}

impl std::fmt::Debug for ResourceFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceFacade")
            .field("resources", &self.manager.graph().len())
            .finish()
    }
}
