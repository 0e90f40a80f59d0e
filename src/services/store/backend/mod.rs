use tokio_stream::wrappers::BroadcastStream;

use crate::Result;
use crate::services::store::document::{Cursor, DocumentId, Fields};
use crate::services::store::path::{CollectionPath, DocumentPath};
use crate::services::store::query::Query;

pub mod http;
pub mod memory;
mod value;

/// A stored document before it is shaped into a caller type.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: DocumentId,
    pub fields: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum WriteMode {
    /// Deep merge, creating the document when absent.
    Merge,
    /// Replace the given top-level fields of an existing document.
    Update,
}

#[allow(async_fn_in_trait)]
pub trait Backend: Clone + 'static {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>>;

    /// Fails with [`crate::Error::AlreadyExists`] when the id is taken.
    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<()>;

    /// [`WriteMode::Update`] fails with [`crate::Error::MissingDocument`] when absent.
    async fn write(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> Result<()>;

    /// Deleting a missing document succeeds.
    async fn delete(&self, path: &DocumentPath) -> Result<()>;

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<RawDocument>>;

    async fn run_query(
        &self,
        collection: &CollectionPath,
        query: &Query,
        start_after: Option<&Cursor>,
    ) -> Result<Vec<RawDocument>>;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// One committed write as seen by the change feed: the document fields before
/// and after it, `None` where the document did not exist.
#[derive(Debug, Clone)]
pub struct Change {
    pub collection: CollectionPath,
    pub id: DocumentId,
    pub before: Option<Fields>,
    pub after: Option<Fields>,
}

/// Backends able to push committed writes to subscribers.
pub trait ChangeFeed: Backend {
    fn changes(&self) -> Result<BroadcastStream<Change>>;
}
