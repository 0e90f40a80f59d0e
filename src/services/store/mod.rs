//
// Copyright © 2025 Hardcore Engineering Inc.
//
// Licensed under the Eclipse Public License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License. You may
// obtain a copy of the License at https://www.eclipse.org/legal/epl-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Typed access to named collections of a document database.
//!
//! [`DocumentStore`] owns no connection state of its own: it stamps
//! bookkeeping fields, shapes documents into caller types and hands every
//! request to the injected [`Backend`]. Failures are logged once with their
//! operation and path, then returned as [`Error::Persistence`]; nothing is
//! retried at this layer.

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tracing::*;

use crate::{Error, Result};

pub mod backend;
pub mod document;
pub mod path;
pub mod query;
pub mod subscription;

use backend::{Backend, ChangeFeed, RawDocument, WriteMode};
use document::{
    CREATED_AT, Cursor, Document, DocumentId, UPDATED_AT, generate_document_id, stamp, to_fields,
};
use path::{CollectionPath, DocumentPath};
use query::{Constraint, Query};
use subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    CreateWithId,
    Add,
    Get,
    Update,
    Upsert,
    Delete,
    GetAll,
    Query,
    Close,
}

/// Unexecuted query over one collection, reusable for runs and subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHandle {
    pub(crate) collection: CollectionPath,
    pub(crate) query: Query,
}

impl QueryHandle {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            query: Query::default(),
        }
    }

    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.query.push(constraint);
        self
    }

    pub fn constrain(self, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        constraints.into_iter().fold(self, Self::with)
    }
}

#[derive(Clone)]
pub struct DocumentStore<B: Backend> {
    backend: B,
}

impl<B: Backend> DocumentStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn guard<R>(
        &self,
        operation: Operation,
        path: &dyn std::fmt::Display,
        work: impl Future<Output = Result<R>>,
    ) -> Result<R> {
        work.await.map_err(|error| {
            error!(%operation, %path, %error, "Persistence failure");

            Error::Persistence {
                operation,
                path: path.to_string(),
                source: Box::new(error),
            }
        })
    }

    fn document_path(collection: &str, id: &str) -> Result<DocumentPath> {
        CollectionPath::parse(collection)?.doc(id)
    }

    /// Merges `data` into the document at `id`, creating it when absent.
    /// `createdAt` is left as stored.
    #[tracing::instrument(level = "debug", skip(self, data))]
    pub async fn create_with_id<T: Serialize + ?Sized>(
        &self,
        collection: &str,
        id: &str,
        data: &T,
    ) -> Result<()> {
        let path = Self::document_path(collection, id)?;
        let mut fields = to_fields(data)?;
        stamp(&mut fields, UPDATED_AT, Utc::now());

        self.guard(
            Operation::CreateWithId,
            &path,
            self.backend.write(&path, fields, WriteMode::Merge),
        )
        .await?;

        trace!(%path, "created");

        Ok(())
    }

    /// Creates a document under a fresh id and returns it.
    #[tracing::instrument(level = "debug", skip(self, data))]
    pub async fn add<T: Serialize + ?Sized>(&self, collection: &str, data: &T) -> Result<DocumentId> {
        let collection = CollectionPath::parse(collection)?;
        let path = collection.doc(&generate_document_id())?;

        let now = Utc::now();
        let mut fields = to_fields(data)?;
        stamp(&mut fields, CREATED_AT, now);
        stamp(&mut fields, UPDATED_AT, now);

        self.guard(Operation::Add, &path, self.backend.create(&path, fields))
            .await?;

        trace!(%path, "added");

        Ok(path.id().to_owned())
    }

    /// `None` when no document exists at `id`.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document<T>>> {
        let path = Self::document_path(collection, id)?;

        let fields = self
            .guard(Operation::Get, &path, self.backend.get(&path))
            .await?;

        fields
            .map(|fields| {
                Document::try_from(RawDocument {
                    id: id.to_owned(),
                    fields,
                })
            })
            .transpose()
    }

    /// Replaces the given top-level fields of an existing document. Fails
    /// with [`Error::MissingDocument`] as the root cause when there is none;
    /// see [`DocumentStore::upsert`] for the creating variant.
    #[tracing::instrument(level = "debug", skip(self, partial))]
    pub async fn update<P: Serialize + ?Sized>(
        &self,
        collection: &str,
        id: &str,
        partial: &P,
    ) -> Result<()> {
        self.write(Operation::Update, collection, id, partial, WriteMode::Update)
            .await
    }

    /// Deep merges into the document, creating it when absent.
    #[tracing::instrument(level = "debug", skip(self, partial))]
    pub async fn upsert<P: Serialize + ?Sized>(
        &self,
        collection: &str,
        id: &str,
        partial: &P,
    ) -> Result<()> {
        self.write(Operation::Upsert, collection, id, partial, WriteMode::Merge)
            .await
    }

    async fn write<P: Serialize + ?Sized>(
        &self,
        operation: Operation,
        collection: &str,
        id: &str,
        partial: &P,
        mode: WriteMode,
    ) -> Result<()> {
        let path = Self::document_path(collection, id)?;
        let mut fields = to_fields(partial)?;
        stamp(&mut fields, UPDATED_AT, Utc::now());

        self.guard(operation, &path, self.backend.write(&path, fields, mode))
            .await
    }

    /// Succeeds whether or not the document exists.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let path = Self::document_path(collection, id)?;

        self.guard(Operation::Delete, &path, self.backend.delete(&path))
            .await
    }

    /// Every document of the collection, unpaged.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<Document<T>>> {
        let collection = CollectionPath::parse(collection)?;

        let documents = self
            .guard(
                Operation::GetAll,
                &collection,
                self.backend.list(&collection),
            )
            .await?;

        trace!(%collection, count = documents.len(), "listed");

        documents.into_iter().map(Document::try_from).collect()
    }

    pub fn query_handle(&self, collection: &str) -> Result<QueryHandle> {
        Ok(QueryHandle::new(CollectionPath::parse(collection)?))
    }

    /// Filters, then orders, then resumes strictly after `start_after`.
    #[tracing::instrument(level = "debug", skip(self, start_after))]
    pub async fn query<T: DeserializeOwned>(
        &self,
        collection: &str,
        constraints: &[Constraint],
        start_after: Option<&Cursor>,
    ) -> Result<Vec<Document<T>>> {
        let handle = self
            .query_handle(collection)?
            .constrain(constraints.iter().cloned());

        self.run(&handle, start_after).await
    }

    pub async fn run<T: DeserializeOwned>(
        &self,
        handle: &QueryHandle,
        start_after: Option<&Cursor>,
    ) -> Result<Vec<Document<T>>> {
        let documents = self
            .guard(
                Operation::Query,
                &handle.collection,
                self.backend
                    .run_query(&handle.collection, &handle.query, start_after),
            )
            .await?;

        trace!(collection = %handle.collection, count = documents.len(), "queried");

        documents.into_iter().map(Document::try_from).collect()
    }

    /// Tears the backend down; the store is consumed.
    pub async fn close(self) -> Result<()> {
        self.guard(Operation::Close, &"backend", self.backend.shutdown())
            .await
    }
}

impl<B: ChangeFeed> DocumentStore<B> {
    pub fn subscribe<T: DeserializeOwned>(&self, handle: QueryHandle) -> Result<Subscription<T>> {
        Subscription::new(&self.backend, handle)
    }
}
