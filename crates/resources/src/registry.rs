//! Type registry — the type tree and the factory.
//!
//! Every resource type the platform can host is registered once at
//! startup through [`TypeRegistryBuilder`]: its tag, optional base tag,
//! constructor, capability set, and reference descriptors. `build()`
//! validates the whole table exhaustively — unknown bases, cycles,
//! duplicate tags, colliding reference names — so lookups afterwards are
//! pure index queries and `create` can never stumble over a half-wired
//! type at runtime.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::capability::{Capability, CapabilitySet};
use crate::error::{Error, Result};
use crate::reference::{ReferenceDescriptor, CHILDREN, PARENT};
use crate::resource::Resource;

/// Constructor delegate producing a blank instance of a concrete type.
pub type Constructor = Arc<dyn Fn() -> Box<dyn Resource> + Send + Sync>;

// ---------------------------------------------------------------------------
// TypeDescriptor
// ---------------------------------------------------------------------------

/// Registration of one resource type.
///
/// Types without a constructor are abstract: they organize the tree and
/// contribute capabilities and references to derived types, but cannot
/// be instantiated.
pub struct TypeDescriptor {
    tag: &'static str,
    base: Option<&'static str>,
    constructor: Option<Constructor>,
    capabilities: CapabilitySet,
    references: Vec<ReferenceDescriptor>,
}

impl TypeDescriptor {
    /// Start a descriptor for `tag`, abstract until a constructor is set.
    #[must_use]
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            base: None,
            constructor: None,
            capabilities: CapabilitySet::new(),
            references: Vec::new(),
        }
    }

    /// Derive from the type registered under `base`.
    #[must_use]
    pub fn base(mut self, base: &'static str) -> Self {
        self.base = Some(base);
        self
    }

    /// Make the type creatable through the given constructor delegate.
    #[must_use]
    pub fn constructor<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Box<dyn Resource> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(f));
        self
    }

    /// Make the type creatable through `T::default()`.
    #[must_use]
    pub fn creates<T: Resource + Default>(self) -> Self {
        self.constructor(|| Box::new(T::default()))
    }

    /// Add a capability every instance of this type provides.
    #[must_use]
    pub fn capability(mut self, cap: Capability) -> Self {
        self.capabilities.add(cap);
        self
    }

    /// Declare a reference. Redeclaring an inherited name overrides it.
    #[must_use]
    pub fn reference(mut self, descriptor: ReferenceDescriptor) -> Self {
        self.references.push(descriptor);
        self
    }
}

// ---------------------------------------------------------------------------
// TypeNode
// ---------------------------------------------------------------------------

/// One resolved node of the type tree.
pub struct TypeNode {
    tag: &'static str,
    base: Option<&'static str>,
    derived: Vec<&'static str>,
    constructor: Option<Constructor>,
    /// Effective capabilities: own plus all ancestors'.
    capabilities: CapabilitySet,
    /// Effective references: inherited chain with nearest override winning.
    references: Vec<ReferenceDescriptor>,
}

impl TypeNode {
    /// The type tag.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        self.tag
    }

    /// The base tag, if any.
    #[must_use]
    pub fn base(&self) -> Option<&'static str> {
        self.base
    }

    /// Tags directly derived from this node.
    #[must_use]
    pub fn derived(&self) -> &[&'static str] {
        &self.derived
    }

    /// Whether instances can be constructed.
    #[must_use]
    pub fn is_creatable(&self) -> bool {
        self.constructor.is_some()
    }

    /// Effective capability set (own plus inherited).
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Effective reference descriptors (own plus inherited).
    #[must_use]
    pub fn references(&self) -> &[ReferenceDescriptor] {
        &self.references
    }
}

impl std::fmt::Debug for TypeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeNode")
            .field("tag", &self.tag)
            .field("base", &self.base)
            .field("derived", &self.derived)
            .field("creatable", &self.is_creatable())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TypeConstraint
// ---------------------------------------------------------------------------

/// Constraint for type- and capability-based queries.
#[derive(Debug, Clone, Default)]
pub struct TypeConstraint {
    base: Option<String>,
    capabilities: CapabilitySet,
}

impl TypeConstraint {
    /// Match every type.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Match types assignable to `tag`.
    #[must_use]
    pub fn of_tag(tag: impl Into<String>) -> Self {
        Self {
            base: Some(tag.into()),
            capabilities: CapabilitySet::new(),
        }
    }

    /// Match types providing all of `capabilities`.
    #[must_use]
    pub fn providing(capabilities: CapabilitySet) -> Self {
        Self {
            base: None,
            capabilities,
        }
    }

    /// Additionally require `cap`.
    #[must_use]
    pub fn with_capability(mut self, cap: Capability) -> Self {
        self.capabilities.add(cap);
        self
    }

    /// The base-tag part of the constraint.
    #[must_use]
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// The capability part of the constraint.
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }
}

impl std::fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.base, self.capabilities.is_empty()) {
            (Some(base), true) => write!(f, "type '{base}'"),
            (Some(base), false) => write!(f, "type '{base}' providing {}", self.capabilities),
            (None, false) => write!(f, "providing {}", self.capabilities),
            (None, true) => f.write_str("any"),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects [`TypeDescriptor`]s and validates them into a [`TypeRegistry`].
#[derive(Default)]
pub struct TypeRegistryBuilder {
    descriptors: Vec<TypeDescriptor>,
}

impl TypeRegistryBuilder {
    /// Start an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one type.
    #[must_use]
    pub fn register(mut self, descriptor: TypeDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Validate the whole table and freeze it into a registry.
    pub fn build(self) -> Result<TypeRegistry> {
        let mut nodes: IndexMap<&'static str, TypeNode> = IndexMap::new();

        // Pass 1: shape checks and node skeletons.
        for descriptor in &self.descriptors {
            if nodes.contains_key(descriptor.tag) {
                return Err(Error::registry(format!(
                    "type '{}' registered twice",
                    descriptor.tag
                )));
            }
            let mut seen = HashSet::new();
            for reference in &descriptor.references {
                if reference.name == CHILDREN || reference.name == PARENT {
                    return Err(Error::registry(format!(
                        "type '{}' declares reserved reference name '{}'",
                        descriptor.tag, reference.name
                    )));
                }
                if !seen.insert(reference.name) {
                    return Err(Error::registry(format!(
                        "type '{}' declares reference '{}' twice",
                        descriptor.tag, reference.name
                    )));
                }
            }
            nodes.insert(
                descriptor.tag,
                TypeNode {
                    tag: descriptor.tag,
                    base: descriptor.base,
                    derived: Vec::new(),
                    constructor: descriptor.constructor.clone(),
                    capabilities: CapabilitySet::new(),
                    references: Vec::new(),
                },
            );
        }

        // Pass 2: base edges exist and form no cycle.
        for descriptor in &self.descriptors {
            if let Some(base) = descriptor.base {
                if !nodes.contains_key(base) {
                    return Err(Error::registry(format!(
                        "type '{}' derives from unknown base '{}'",
                        descriptor.tag, base
                    )));
                }
            }
            let mut walked = HashSet::new();
            let mut cursor = descriptor.base;
            walked.insert(descriptor.tag);
            while let Some(tag) = cursor {
                if !walked.insert(tag) {
                    return Err(Error::registry(format!(
                        "base cycle through type '{}'",
                        descriptor.tag
                    )));
                }
                cursor = self
                    .descriptors
                    .iter()
                    .find(|d| d.tag == tag)
                    .and_then(|d| d.base);
            }
        }

        // Pass 3: effective capabilities and references, root to leaf.
        for descriptor in &self.descriptors {
            let chain = Self::chain(&self.descriptors, descriptor.tag);
            let mut capabilities = CapabilitySet::new();
            let mut references: IndexMap<&'static str, ReferenceDescriptor> = IndexMap::new();
            for ancestor in chain {
                capabilities.extend_from(&ancestor.capabilities);
                for reference in &ancestor.references {
                    // nearest override wins: later chain entries are more derived
                    references.insert(reference.name, reference.clone());
                }
            }
            let node = nodes
                .get_mut(descriptor.tag)
                .expect("node inserted in pass 1");
            node.capabilities = capabilities;
            node.references = references.into_values().collect();
        }

        // Pass 4: derived lists.
        let edges: Vec<(&'static str, &'static str)> = self
            .descriptors
            .iter()
            .filter_map(|d| d.base.map(|base| (base, d.tag)))
            .collect();
        for (base, derived) in edges {
            nodes
                .get_mut(base)
                .expect("base existence checked in pass 2")
                .derived
                .push(derived);
        }

        Ok(TypeRegistry { nodes })
    }

    /// Root-first inheritance chain ending at `tag`.
    fn chain<'a>(descriptors: &'a [TypeDescriptor], tag: &str) -> Vec<&'a TypeDescriptor> {
        let mut chain = Vec::new();
        let mut cursor = descriptors.iter().find(|d| d.tag == tag);
        while let Some(descriptor) = cursor {
            chain.push(descriptor);
            cursor = descriptor
                .base
                .and_then(|base| descriptors.iter().find(|d| d.tag == base));
        }
        chain.reverse();
        chain
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Frozen type tree. All queries are index lookups; nothing is resolved
/// lazily after [`TypeRegistryBuilder::build`].
pub struct TypeRegistry {
    nodes: IndexMap<&'static str, TypeNode>,
}

impl TypeRegistry {
    /// The node registered under `tag`.
    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&TypeNode> {
        self.nodes.get(tag)
    }

    /// Iterate all nodes in registration order.
    pub fn nodes(&self) -> impl Iterator<Item = &TypeNode> {
        self.nodes.values()
    }

    /// Instantiate a blank resource of the concrete type `tag`.
    pub fn create(&self, tag: &str) -> Result<Box<dyn Resource>> {
        let node = self.get(tag).ok_or_else(|| Error::UnknownType {
            tag: tag.to_string(),
        })?;
        let constructor = node.constructor.as_ref().ok_or_else(|| Error::UnknownType {
            tag: tag.to_string(),
        })?;
        Ok(constructor())
    }

    /// Whether `tag` is `to` or derives from it, directly or transitively.
    #[must_use]
    pub fn is_assignable(&self, tag: &str, to: &str) -> bool {
        let mut cursor = Some(tag);
        while let Some(current) = cursor {
            if current == to {
                return true;
            }
            cursor = self.get(current).and_then(TypeNode::base);
        }
        false
    }

    /// Effective capability set of `tag`.
    pub fn capabilities_of(&self, tag: &str) -> Result<&CapabilitySet> {
        self.get(tag)
            .map(TypeNode::capabilities)
            .ok_or_else(|| Error::UnknownType {
                tag: tag.to_string(),
            })
    }

    /// Effective reference descriptors of `tag`.
    pub fn references_of(&self, tag: &str) -> Result<&[ReferenceDescriptor]> {
        self.get(tag)
            .map(TypeNode::references)
            .ok_or_else(|| Error::UnknownType {
                tag: tag.to_string(),
            })
    }

    /// All creatable nodes satisfying `constraint` — the answer to
    /// "which resource type can satisfy this requirement".
    #[must_use]
    pub fn supported_types(&self, constraint: &TypeConstraint) -> Vec<&TypeNode> {
        self.nodes
            .values()
            .filter(|node| node.is_creatable())
            .filter(|node| {
                constraint
                    .base()
                    .is_none_or(|base| self.is_assignable(node.tag, base))
            })
            .filter(|node| node.capabilities.provides(constraint.capabilities()))
            .collect()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.nodes.len())
            .finish()
    }
}
