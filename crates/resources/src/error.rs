//! Error types for the resource subsystem
use thiserror::Error;

use fabrik_model::{ResourceId, StoreError};

use crate::lifecycle::{Lifecycle, LifecyclePhase};
use crate::reference::Cardinality;

/// Result type for resource operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the resource graph, linker, manager, and facade.
#[derive(Error, Debug)]
pub enum Error {
    /// No resource with the given id is loaded.
    #[error("no resource with id {id}")]
    NotFound {
        /// The requested resource id
        id: ResourceId,
    },

    /// A capability- or type-constrained lookup matched nothing.
    #[error("no resource matches constraint '{constraint}'")]
    NoMatch {
        /// Human-readable description of the constraint
        constraint: String,
    },

    /// A lookup that requires a unique match found several candidates.
    #[error("constraint '{constraint}' is ambiguous: {count} resources match")]
    Ambiguous {
        /// Human-readable description of the constraint
        constraint: String,
        /// Number of matching resources
        count: usize,
    },

    /// A facade proxy was used after its backing resource was destroyed.
    #[error("proxy for resource {id} is detached")]
    ProxyDetached {
        /// Id the proxy was created for
        id: ResourceId,
    },

    /// The type tag is not registered or not creatable.
    #[error("unknown resource type '{tag}'")]
    UnknownType {
        /// The offending type discriminator
        tag: String,
    },

    /// A reference name is not declared on the resource's type.
    #[error("unknown reference '{name}'")]
    UnknownReference {
        /// The offending reference name
        name: String,
    },

    /// A reference was accessed with the wrong cardinality.
    #[error("reference '{name}' is not a {expected} reference")]
    WrongCardinality {
        /// The reference name
        name: String,
        /// The cardinality the caller assumed
        expected: Cardinality,
    },

    /// A lifecycle transition that the state machine forbids.
    #[error("invalid lifecycle transition for resource {id}: {from} -> {to}")]
    InvalidTransition {
        /// The resource id
        id: ResourceId,
        /// Current lifecycle state
        from: Lifecycle,
        /// Attempted target state
        to: Lifecycle,
    },

    /// A lifecycle hook of one resource failed.
    ///
    /// The manager catches and logs these per resource so siblings keep
    /// running; the variant exists for the explicit-creation path where
    /// the caller owns the failure.
    #[error("resource {id} '{name}' failed during {phase}: {reason}")]
    Lifecycle {
        /// The resource id
        id: ResourceId,
        /// The resource name at the time of failure
        name: String,
        /// Which hook failed
        phase: LifecyclePhase,
        /// The failure description
        reason: String,
    },

    /// Type registry construction rejected the registered descriptors.
    #[error("type registry error: {message}")]
    Registry {
        /// What the builder rejected
        message: String,
    },

    /// A resource with this id is already present in the graph.
    #[error("resource {id} is already loaded")]
    AlreadyLoaded {
        /// The duplicate id
        id: ResourceId,
    },

    /// The storage boundary failed.
    #[error("storage error")]
    Storage(#[from] StoreError),

    /// Extension data could not be serialized or restored.
    #[error("extension data error")]
    Extension(#[from] serde_json::Error),
}

impl Error {
    /// Create a [`Error::NoMatch`] from a constraint description.
    pub fn no_match<S: Into<String>>(constraint: S) -> Self {
        Self::NoMatch {
            constraint: constraint.into(),
        }
    }

    /// Create a [`Error::Registry`] from a message.
    pub fn registry<S: Into<String>>(message: S) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// The resource id associated with this error, if any.
    #[must_use]
    pub fn resource_id(&self) -> Option<ResourceId> {
        match self {
            Self::NotFound { id }
            | Self::ProxyDetached { id }
            | Self::InvalidTransition { id, .. }
            | Self::Lifecycle { id, .. }
            | Self::AlreadyLoaded { id } => Some(*id),
            _ => None,
        }
    }

    /// Whether this is one of the not-found/ambiguous lookup failures.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::NoMatch { .. } | Self::Ambiguous { .. }
        )
    }
}
