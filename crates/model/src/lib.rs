//! # Fabrik Model
//!
//! Persistence boundary for the Fabrik resource subsystem: row shapes
//! for resources and their links, repository traits, a transactional
//! unit-of-work abstraction, and an in-memory store used by tests and
//! embedded deployments.
//!
//! The storage engine proper (SQL schema, migrations, providers) lives
//! outside this workspace; everything here is the contract the resource
//! core consumes.

pub mod memory;
pub mod record;
pub mod store;

pub use memory::MemoryStore;
pub use record::{LinkId, LinkRecord, RelationKind, ResourceId, ResourceRecord};
pub use store::{LinkRepository, ResourceRepository, ResourceStore, StoreError, StoreResult, UnitOfWork};
