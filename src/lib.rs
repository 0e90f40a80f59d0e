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

pub use reqwest::StatusCode;

mod config;
pub mod services;

pub use config::{Config, ConfigBuilder, ConfigBuilderError};
pub use services::store::{
    DocumentStore, Operation, QueryHandle,
    backend::{
        Backend, Change, ChangeFeed, RawDocument, WriteMode, http::HttpBackend,
        memory::MemoryBackend,
    },
    document::{Cursor, Document, DocumentId, Fields, Timestamp},
    path::{CollectionPath, DocumentPath},
    query::{Constraint, Direction, Operator, filter, limit, order_by},
    subscription::{ChangeKind, DocumentChange, Subscription},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ServiceError: {0}")]
    ServiceError(#[from] services::Status),

    #[error("{operation} failed on {path}: {source}")]
    Persistence {
        operation: Operation,
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Document {0} does not exist")]
    MissingDocument(String),

    #[error("Document {0} already exists")]
    AlreadyExists(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    ReqwestMiddleware(#[from] reqwest_middleware::Error),

    #[error("Subscription lagged behind the change feed")]
    SubscriptionLagged,

    #[error("Backend is closed")]
    Closed,

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    HttpError(reqwest::StatusCode, String),

    #[error(transparent)]
    Config(#[from] ::config::ConfigError),

    #[error("{0}")]
    Other(&'static str),
}

impl Error {
    /// The error as reported by the backend, without the store's context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Persistence { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
