use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use super::QueryHandle;
use super::backend::{Change, ChangeFeed, RawDocument};
use super::document::{Document, Fields};
use super::query::Query;
use crate::{Error, Result};

/// How a write moved a document relative to the watched query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ChangeKind {
    /// Entered the result set, by creation or by starting to match.
    Added,
    Modified,
    /// Left the result set, by deletion or by no longer matching.
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange<T> {
    pub kind: ChangeKind,
    pub document: Document<T>,
}

/// Live view over the writes touching a [`QueryHandle`]'s collection and
/// filters. Ordering and limits of the handle are not applied. Dropping the
/// stream unsubscribes; it ends when the backend shuts down.
pub struct Subscription<T> {
    changes: BroadcastStream<Change>,
    handle: QueryHandle,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Subscription<T> {
    pub fn new<B: ChangeFeed>(backend: &B, handle: QueryHandle) -> Result<Self> {
        Ok(Self {
            changes: backend.changes()?,
            handle,
            _phantom: PhantomData,
        })
    }

    pub fn handle(&self) -> &QueryHandle {
        &self.handle
    }
}

fn classify(query: &Query, change: Change) -> Option<(ChangeKind, RawDocument)> {
    let matches = |fields: &Option<Fields>| fields.as_ref().is_some_and(|f| query.matches(f));

    let kind = match (matches(&change.before), matches(&change.after)) {
        (false, true) => ChangeKind::Added,
        (true, true) => ChangeKind::Modified,
        (true, false) => ChangeKind::Removed,
        (false, false) => return None,
    };

    // removals report the last matching state
    let fields = match kind {
        ChangeKind::Removed => change.before,
        _ => change.after,
    }?;

    Some((
        kind,
        RawDocument {
            id: change.id,
            fields,
        },
    ))
}

impl<T: DeserializeOwned> Stream for Subscription<T> {
    type Item = Result<DocumentChange<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.changes.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(change))) => {
                    if change.collection != self.handle.collection {
                        continue;
                    }

                    if let Some((kind, raw)) = classify(&self.handle.query, change) {
                        let change = Document::try_from(raw)
                            .map(|document| DocumentChange { kind, document });

                        return Poll::Ready(Some(change));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, collection = %self.handle.collection, "Subscription lagged");
                    return Poll::Ready(Some(Err(Error::SubscriptionLagged)));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}
