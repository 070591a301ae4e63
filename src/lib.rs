//! Descriptor-driven persistence with first-class relationships.
//!
//! Application code declares an [`EntityDescriptor`] per record type and
//! picks a backend: [`SqlEngine`] stores relationships in soft-deleted link
//! tables and reads them back through aggregate subqueries, [`DocEngine`]
//! keeps keys inline in the documents and maintains the mirror side through
//! queued actions. Both share the [`Condition`] filter tree, the
//! [`QueryOptions`] call directives and the [`HandlerRegistry`] of
//! relationship handlers.
//!
//! Writes are not transactional across the primary statement and the queued
//! relationship actions: a failed action surfaces as
//! [`Error::PostAction`] while the primary write stays committed.
//! Concurrent updates to the same list field resolve last-diff-wins.

pub mod backend;
pub mod condition;
pub mod error;
pub mod model;
pub mod options;
pub mod relation;

pub use backend::doc::{DocEngine, DocStore, MemoryStore};
pub use backend::sql::{SqlDialect, SqlEngine, create_table_sql};
pub use condition::{BindValue, Comparator, Condition};
pub use error::Error;
pub use model::{
    CascadeMode, ColumnType, Document, EntityDescriptor, FieldDescriptor, FieldKind,
    GenerationStrategy, Id, IdKind, Record, RelationDescriptor, RelationElement, RelationKind,
};
pub use options::{QueryOption, QueryOptions};
pub use relation::{HandlerRegistry, LazyFetch, LazyQueue, WriteAction};
