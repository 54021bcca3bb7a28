//! Initializer boundary for bootstrap and seed operations.
//!
//! An initializer describes the root resources a fresh installation
//! should start with; the manager wires, initializes, and persists the
//! returned seeds through its regular creation path.

use crate::error::Result;
use crate::graph::ResourceState;
use crate::registry::TypeRegistry;

/// Description of one resource to seed, with optional child seeds.
pub struct SeedResource {
    /// Type tag to instantiate.
    pub tag: String,
    /// Display name for the new resource.
    pub name: String,
    /// Optional setup applied before the resource is initialized.
    pub setup: Option<Box<dyn FnOnce(&mut ResourceState) -> Result<()> + Send>>,
    /// Child resources attached under this one.
    pub children: Vec<SeedResource>,
}

impl SeedResource {
    /// Seed of `tag` named `name`, no setup, no children.
    #[must_use]
    pub fn new(tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            name: name.into(),
            setup: None,
            children: Vec::new(),
        }
    }

    /// Apply `f` to the freshly constructed resource before initialize.
    #[must_use]
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut ResourceState) -> Result<()> + Send + 'static,
    {
        self.setup = Some(Box::new(f));
        self
    }

    /// Attach a child seed.
    #[must_use]
    pub fn child(mut self, seed: SeedResource) -> Self {
        self.children.push(seed);
        self
    }
}

impl std::fmt::Debug for SeedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedResource")
            .field("tag", &self.tag)
            .field("name", &self.name)
            .field("children", &self.children)
            .finish()
    }
}

/// Bootstrap hook invoked through
/// [`ResourceManager::execute_initializer`](crate::manager::ResourceManager::execute_initializer).
pub trait ResourceInitializer: Send + Sync {
    /// Short identifier shown in logs and maintenance tooling.
    fn name(&self) -> &str;

    /// Human-readable description of what the initializer seeds.
    fn description(&self) -> &str {
        ""
    }

    /// Produce the root seeds to create. The registry is available for
    /// capability- or type-driven decisions.
    fn execute(&self, registry: &TypeRegistry) -> Result<Vec<SeedResource>>;
}
