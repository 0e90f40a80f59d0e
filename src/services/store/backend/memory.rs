use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use super::{Backend, Change, ChangeFeed, RawDocument, WriteMode};
use crate::services::store::document::{Cursor, DocumentId, Fields};
use crate::services::store::path::{CollectionPath, DocumentPath};
use crate::services::store::query::Query;
use crate::{Error, Result};

const FEED_CAPACITY: usize = 1024;

type Collections = HashMap<CollectionPath, BTreeMap<DocumentId, Fields>>;

struct MemoryBackendInner {
    collections: Mutex<Collections>,
    feed: Mutex<Option<broadcast::Sender<Change>>>,
}

/// Process local backend with the same query semantics as the remote one.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryBackendInner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_capacity(FEED_CAPACITY)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `capacity` bounds how far a subscriber may fall behind before lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);

        Self {
            inner: Arc::new(MemoryBackendInner {
                collections: Mutex::new(HashMap::new()),
                feed: Mutex::new(Some(feed)),
            }),
        }
    }

    fn feed(&self) -> MutexGuard<'_, Option<broadcast::Sender<Change>>> {
        self.inner
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn collections(&self) -> Result<MutexGuard<'_, Collections>> {
        if self.feed().is_none() {
            return Err(Error::Closed);
        }

        Ok(self
            .inner
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(&self, path: &DocumentPath, before: Option<Fields>, after: Option<Fields>) {
        if let Some(feed) = self.feed().as_ref() {
            let change = Change {
                collection: path.collection().clone(),
                id: path.id().to_owned(),
                before,
                after,
            };

            // no subscribers is fine
            let _ = feed.send(change);
        }
    }
}

fn merge(target: &mut Fields, patch: Fields) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(patch)) if !patch.is_empty() => {
                merge(existing, patch)
            }

            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

pub(crate) fn execute<'a>(
    query: &Query,
    start_after: Option<&Cursor>,
    documents: impl Iterator<Item = (&'a DocumentId, &'a Fields)>,
) -> Result<Vec<RawDocument>> {
    query.validate()?;

    let ordering = query.ordering();
    let cursor = start_after
        .map(|cursor| Query::cursor_key(&ordering, cursor))
        .transpose()?;

    let mut hits = documents
        .filter(|(_, fields)| query.matches(fields))
        .filter_map(|(id, fields)| {
            Query::sort_key(&ordering, id, fields).map(|key| {
                let document = RawDocument {
                    id: id.clone(),
                    fields: fields.clone(),
                };
                (key, document)
            })
        })
        .collect::<Vec<_>>();

    hits.sort_by(|(a, _), (b, _)| Query::compare_keys(&ordering, a, b));

    if let Some(cursor) = cursor {
        hits.retain(|(key, _)| Query::compare_keys(&ordering, key, &cursor).is_gt());
    }

    let limit = query.limit().map_or(usize::MAX, |limit| limit as usize);

    Ok(hits
        .into_iter()
        .take(limit)
        .map(|(_, document)| document)
        .collect())
}

impl Backend for MemoryBackend {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>> {
        Ok(self
            .collections()?
            .get(path.collection())
            .and_then(|documents| documents.get(path.id()))
            .cloned())
    }

    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<()> {
        let mut collections = self.collections()?;
        let documents = collections.entry(path.collection().clone()).or_default();

        if documents.contains_key(path.id()) {
            return Err(Error::AlreadyExists(path.to_string()));
        }

        documents.insert(path.id().to_owned(), fields.clone());
        trace!(%path, "create");

        self.publish(path, None, Some(fields));

        Ok(())
    }

    async fn write(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> Result<()> {
        let mut collections = self.collections()?;
        let documents = collections.entry(path.collection().clone()).or_default();

        let (before, after) = if let Some(existing) = documents.get_mut(path.id()) {
            let before = existing.clone();

            match mode {
                WriteMode::Merge => merge(existing, fields),
                WriteMode::Update => existing.extend(fields),
            }

            (Some(before), existing.clone())
        } else if mode == WriteMode::Merge {
            documents.insert(path.id().to_owned(), fields.clone());
            (None, fields)
        } else {
            return Err(Error::MissingDocument(path.to_string()));
        };

        trace!(%path, %mode, created = before.is_none(), "write");

        self.publish(path, before, Some(after));

        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        let removed = self
            .collections()?
            .get_mut(path.collection())
            .and_then(|documents| documents.remove(path.id()));

        trace!(%path, existed = removed.is_some(), "delete");

        if removed.is_some() {
            self.publish(path, removed, None);
        }

        Ok(())
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<RawDocument>> {
        Ok(self
            .collections()?
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| RawDocument {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn run_query(
        &self,
        collection: &CollectionPath,
        query: &Query,
        start_after: Option<&Cursor>,
    ) -> Result<Vec<RawDocument>> {
        let collections = self.collections()?;

        match collections.get(collection) {
            Some(documents) => execute(query, start_after, documents.iter()),
            None => execute(query, start_after, std::iter::empty()),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if self.feed().take().is_some() {
            trace!("memory backend closed");
        }

        Ok(())
    }
}

impl ChangeFeed for MemoryBackend {
    fn changes(&self) -> Result<BroadcastStream<Change>> {
        match self.feed().as_ref() {
            Some(feed) => Ok(BroadcastStream::new(feed.subscribe())),
            None => Err(Error::Closed),
        }
    }
}
