//! Storage boundary traits.
//!
//! The resource core persists exclusively through [`ResourceStore`] and
//! the transaction-scoped [`UnitOfWork`] it opens. A unit of work stages
//! writes until [`commit`](UnitOfWork::commit); dropping it without
//! committing discards everything, so the transaction closes
//! deterministically on every exit path.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::record::{LinkId, LinkRecord, ResourceId, ResourceRecord};

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the storage boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A row that was expected to exist is gone.
    #[error("no resource row with id {id}")]
    MissingRow {
        /// The requested row id.
        id: ResourceId,
    },

    /// A link row that was expected to exist is gone.
    #[error("no link row with id {id}")]
    MissingLink {
        /// The requested link row id.
        id: LinkId,
    },

    /// The backend rejected or failed the operation.
    #[error("store backend error: {message}")]
    Backend {
        /// Backend-specific failure description.
        message: String,
        /// The underlying error, if the backend produced one.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    /// Create a backend error from a plain message.
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

/// Repository view over resource rows within one unit of work.
pub trait ResourceRepository {
    /// Insert a new row. The record's `id` field is ignored; the store
    /// assigns and returns a fresh identity.
    fn insert(&mut self, record: ResourceRecord) -> StoreResult<ResourceId>;

    /// Overwrite an existing row identified by `record.id`.
    fn update(&mut self, record: ResourceRecord) -> StoreResult<()>;

    /// Fetch one row by id, soft-deleted rows included.
    fn get(&mut self, id: ResourceId) -> StoreResult<Option<ResourceRecord>>;

    /// All rows without a soft-delete marker, ordered by id.
    fn all_active(&mut self) -> StoreResult<Vec<ResourceRecord>>;

    /// Mark a row deleted at `at` without removing it.
    fn soft_delete(&mut self, id: ResourceId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Remove a row entirely.
    fn remove(&mut self, id: ResourceId) -> StoreResult<()>;
}

/// Repository view over link rows within one unit of work.
pub trait LinkRepository {
    /// Insert a new link row; assigns and returns a fresh identity.
    fn insert(&mut self, record: LinkRecord) -> StoreResult<LinkId>;

    /// Remove one link row.
    fn remove(&mut self, id: LinkId) -> StoreResult<()>;

    /// All links whose source is `source`, ordered by (name, position).
    fn by_source(&mut self, source: ResourceId) -> StoreResult<Vec<LinkRecord>>;

    /// All links whose target is `target`, ordered by (name, position).
    fn by_target(&mut self, target: ResourceId) -> StoreResult<Vec<LinkRecord>>;

    /// Remove every link touching `id`, as source or target.
    fn remove_for(&mut self, id: ResourceId) -> StoreResult<()>;
}

/// One open transaction against the store.
///
/// All writes are staged; nothing is visible to other units of work
/// until [`commit`](Self::commit) succeeds. Dropping the unit of work
/// rolls the staged writes back.
pub trait UnitOfWork {
    /// Resource-row repository bound to this transaction.
    fn resources(&mut self) -> &mut dyn ResourceRepository;

    /// Link-row repository bound to this transaction.
    fn links(&mut self) -> &mut dyn LinkRepository;

    /// Atomically publish all staged writes.
    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Factory for units of work; the only handle the resource core holds.
pub trait ResourceStore: Send + Sync {
    /// Open a new transaction.
    fn begin(&self) -> Box<dyn UnitOfWork + '_>;
}
