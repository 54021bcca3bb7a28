//! # Fabrik Resources
//!
//! Resource graph and lifecycle management for modular automation
//! platforms. A resource is a node in a live, typed object graph — a
//! machine, a station, a driver, a logical link between them. This crate
//! keeps that graph in memory, persists it incrementally through the
//! `fabrik-model` storage boundary, and exposes a restricted facade
//! surface for the rest of the platform.
//!
//! The moving parts, leaves first:
//!
//! - [`registry`] — startup-time type tree and factory: type tags, base
//!   edges, capability sets, and reference descriptors, validated once
//!   at build time.
//! - [`graph`] — the authoritative in-memory index of live resources.
//! - [`linker`] — reconciliation of declared references against stored
//!   link rows, including auto-save collections.
//! - [`manager`] — boot hydration, Initialize/Start/Stop ordering,
//!   save and destroy orchestration.
//! - [`facade`] — the only surface other platform modules may call.

pub mod capability;
pub mod error;
pub mod events;
pub mod facade;
pub mod graph;
pub mod initializer;
pub mod lifecycle;
pub mod linker;
pub mod manager;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod resource;
pub mod testing;

pub use capability::{Capability, CapabilitySet};
pub use error::{Error, Result};
pub use events::{EventBus, ResourceEvent};
pub use facade::{ResourceAccess, ResourceControl, ResourceFacade};
pub use graph::{ResourceCell, ResourceGraph, ResourceHandle, ResourceState};
pub use initializer::{ResourceInitializer, SeedResource};
pub use lifecycle::{Lifecycle, LifecyclePhase};
pub use linker::ResourceLinker;
pub use manager::ResourceManager;
pub use proxy::ResourceProxy;
pub use reference::{
    Cardinality, ReferenceCollection, ReferenceDescriptor, ReferenceMap, ReferenceRole,
    ReferenceSlot, RelationKind,
};
pub use registry::{TypeConstraint, TypeDescriptor, TypeNode, TypeRegistry, TypeRegistryBuilder};
pub use resource::{ChangedSignal, Resource, ResourceContext, ResourceCore};

pub use fabrik_model::{ResourceId, ResourceRecord};
