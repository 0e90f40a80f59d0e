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
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{self as json, Map, Value};
use tracing::trace;

use super::backend::RawDocument;
use crate::services::from_value;
use crate::{Error, Result};

pub type DocumentId = String;
pub type Timestamp = chrono::DateTime<chrono::Utc>;
pub type Fields = Map<String, Value>;

pub(crate) const ID: &str = "id";
pub(crate) const CREATED_AT: &str = "createdAt";
pub(crate) const UPDATED_AT: &str = "updatedAt";

/// Keys owned by the store, never taken from caller data.
pub(crate) const RESERVED_KEYS: &[&str] = &[ID, CREATED_AT, UPDATED_AT];

const AUTO_ID_LEN: usize = 20;

pub(crate) fn generate_document_id() -> DocumentId {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LEN)
        .map(char::from)
        .collect()
}

/// One record of a collection as returned to callers.
///
/// `data` is the caller's shape flattened next to the bookkeeping fields, so a
/// `Document<User>` reads back as `{"id": .., "updatedAt": .., "name": ..}`.
/// Timestamps travel as milliseconds since the epoch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document<T> {
    pub id: DocumentId,

    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,

    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,

    #[serde(flatten)]
    pub data: T,

    /// Stored fields the document was read with, independent of `T`.
    #[serde(skip)]
    position: Option<Cursor>,
}

impl<T> Document<T> {
    pub fn new(id: impl Into<DocumentId>, data: T) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            data,
            position: None,
        }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: Serialize> Document<T> {
    /// Position to resume a query strictly after this document.
    ///
    /// Documents read from a backend resume from their stored fields, so `T`
    /// may be a projection that omits the ordered fields. Documents built by
    /// hand fall back to serializing `data`.
    pub fn cursor(&self) -> Result<Cursor> {
        match &self.position {
            Some(position) => Ok(position.clone()),
            None => Cursor::from_document(self),
        }
    }
}

impl<T: DeserializeOwned> TryFrom<RawDocument> for Document<T> {
    type Error = Error;

    fn try_from(raw: RawDocument) -> Result<Self> {
        let RawDocument { id, mut fields } = raw;

        let position = Cursor {
            id: id.clone(),
            fields: fields.clone(),
        };

        // the document id wins over a stored `id` field
        fields.insert(ID.into(), Value::String(id));

        let document: Self = from_value(Value::Object(fields))?;

        Ok(Self {
            position: Some(position),
            ..document
        })
    }
}

/// Serializes caller data into a field map, dropping the store-owned keys.
pub(crate) fn to_fields<T: Serialize + ?Sized>(data: &T) -> Result<Fields> {
    match json::to_value(data)? {
        Value::Object(mut fields) => {
            for key in RESERVED_KEYS {
                if fields.remove(*key).is_some() {
                    trace!(%key, "Ignoring store owned key");
                }
            }

            Ok(fields)
        }

        _ => Err(Error::Other("DocumentIsNotObject")),
    }
}

pub(crate) fn stamp(fields: &mut Fields, key: &str, at: Timestamp) {
    fields.insert(key.into(), Value::from(at.timestamp_millis()));
}

/// Position of a previously returned document, used to resume a query after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub id: DocumentId,
    pub fields: Fields,
}

impl Cursor {
    pub fn from_document<T: Serialize>(document: &Document<T>) -> Result<Self> {
        match json::to_value(document)? {
            Value::Object(mut fields) => {
                fields.remove(ID);

                Ok(Self {
                    id: document.id.clone(),
                    fields,
                })
            }

            _ => Err(Error::Other("DocumentIsNotObject")),
        }
    }
}
