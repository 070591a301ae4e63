//! Storage engines. Both walk the same descriptors and share the handler
//! registry; only the statement/document plumbing differs.

pub mod doc;
pub mod sql;

use std::future::Future;
use std::pin::Pin;

/// Boxed future used wherever the engines recurse (lazy resolution,
/// cascading deletes).
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
