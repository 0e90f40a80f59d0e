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

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::*;
use url::Url;

use super::value::{TypedValue, decode_fields, encode_fields};
use super::{Backend, RawDocument, WriteMode};
use crate::config::Config;
use crate::services::store::document::{Cursor, Fields};
use crate::services::store::path::{CollectionPath, DocumentPath};
use crate::services::store::query::{DOCUMENT_ID, Operator, Query, lookup};
use crate::services::{Code, RequestBuilderExt, ResponseExt, Status, TokenProvider};
use crate::{Error, Result};

pub type HttpClient = ClientWithMiddleware;

/// Token the emulator accepts for unrestricted access.
const EMULATOR_TOKEN: &str = "owner";

#[cfg(feature = "reqwest_middleware")]
mod retry {
    use reqwest::StatusCode;
    use reqwest_retry::{Retryable, RetryableStrategy, default_on_request_failure};
    use tracing::trace;

    pub(super) struct DocumentStrategy;

    impl RetryableStrategy for DocumentStrategy {
        #[tracing::instrument(level = "trace", skip_all)]
        fn handle(
            &self,
            res: &std::result::Result<reqwest::Response, reqwest_middleware::Error>,
        ) -> Option<Retryable> {
            match res {
                Ok(success) => match success.status() {
                    StatusCode::REQUEST_TIMEOUT
                    | StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::SERVICE_UNAVAILABLE => {
                        let retry_after = success
                            .headers()
                            .get("Retry-After")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("");

                        trace!(code = %success.status(), retry_after, "Transient error");

                        Some(Retryable::Transient)
                    }

                    other => {
                        if other.is_success() {
                            None
                        } else {
                            Some(Retryable::Fatal)
                        }
                    }
                },
                Err(error) => default_on_request_failure(error),
            }
        }
    }
}

/// Client with transient-failure retries bounded by `config.retry_duration`.
#[cfg_attr(not(feature = "reqwest_middleware"), allow(unused_variables))]
pub fn http_client(config: &Config) -> HttpClient {
    let builder = ClientBuilder::new(reqwest::Client::new());

    #[cfg(feature = "reqwest_middleware")]
    let builder = {
        use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};

        let policy =
            ExponentialBackoff::builder().build_with_total_retry_duration(config.retry_duration);

        builder.with(RetryTransientMiddleware::new_with_policy_and_strategy(
            policy,
            retry::DocumentStrategy,
        ))
    };

    builder.build()
}

struct HttpBackendInner {
    base: Url,
    root: String,
    client: HttpClient,
    token: Option<SecretString>,
    page_size: u32,
}

/// Backend speaking the Firestore REST v1 API.
#[derive(Clone)]
pub struct HttpBackend {
    inner: Arc<HttpBackendInner>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct WireDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    #[serde(default)]
    fields: BTreeMap<String, TypedValue>,
}

impl WireDocument {
    fn from_fields(fields: &Fields) -> Result<Self> {
        Ok(Self {
            name: None,
            fields: encode_fields(fields)?,
        })
    }

    fn into_raw(self) -> Result<RawDocument> {
        let id = self
            .name
            .as_deref()
            .and_then(|name| name.rsplit('/').next())
            .map(str::to_owned)
            .ok_or(Error::Other("DocumentWithoutName"))?;

        Ok(RawDocument {
            id,
            fields: decode_fields(self.fields)?,
        })
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<WireDocument>,
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RunQueryResponse {
    document: Option<WireDocument>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FieldReference {
    field_path: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
enum Filter {
    CompositeFilter {
        op: &'static str,
        filters: Vec<Filter>,
    },
    FieldFilter {
        field: FieldReference,
        op: &'static str,
        value: TypedValue,
    },
    UnaryFilter {
        op: &'static str,
        field: FieldReference,
    },
}

#[derive(Serialize, Debug)]
struct Order {
    field: FieldReference,
    direction: &'static str,
}

#[derive(Serialize, Debug)]
struct WireCursor {
    values: Vec<TypedValue>,
    before: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CollectionSelector {
    collection_id: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct StructuredQuery {
    from: Vec<CollectionSelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    r#where: Option<Filter>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    order_by: Vec<Order>,

    #[serde(skip_serializing_if = "Option::is_none")]
    start_at: Option<WireCursor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u32>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RunQueryRequest {
    structured_query: StructuredQuery,
}

fn quote_segment(segment: &str) -> String {
    let simple = segment
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if simple {
        segment.to_owned()
    } else {
        format!("`{}`", segment.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

fn field_reference(dotted: &str) -> FieldReference {
    FieldReference {
        field_path: dotted
            .split('.')
            .map(quote_segment)
            .collect::<Vec<_>>()
            .join("."),
    }
}

/// Field paths touched by a write: every leaf for a merge, top-level keys for an update.
fn update_mask(fields: &Fields, mode: WriteMode) -> Vec<String> {
    fn leaves(prefix: &str, fields: &Fields, mask: &mut Vec<String>) {
        for (key, value) in fields {
            let path = if prefix.is_empty() {
                quote_segment(key)
            } else {
                format!("{prefix}.{}", quote_segment(key))
            };

            match value {
                Value::Object(nested) if !nested.is_empty() => leaves(&path, nested, mask),
                _ => mask.push(path),
            }
        }
    }

    let mut mask = Vec::new();

    match mode {
        WriteMode::Merge => leaves("", fields, &mut mask),
        WriteMode::Update => mask.extend(fields.keys().map(|key| quote_segment(key))),
    }

    mask
}

fn build_filter(field: &str, op: Operator, value: &Value) -> Result<Filter> {
    let unary = match (op, value) {
        (Operator::Eq, Value::Null) => Some("IS_NULL"),
        (Operator::Ne, Value::Null) => Some("IS_NOT_NULL"),
        _ => None,
    };

    Ok(match unary {
        Some(op) => Filter::UnaryFilter {
            op,
            field: field_reference(field),
        },
        None => Filter::FieldFilter {
            field: field_reference(field),
            op: op.wire(),
            value: TypedValue::at(field, value)?,
        },
    })
}

fn structured_query(
    root: &str,
    collection: &CollectionPath,
    query: &Query,
    start_after: Option<&Cursor>,
) -> Result<StructuredQuery> {
    let mut filters = query
        .filters()
        .map(|(field, op, value)| build_filter(field, op, value))
        .collect::<Result<Vec<_>>>()?;

    let r#where = match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(Filter::CompositeFilter {
            op: "AND",
            filters,
        }),
    };

    let ordering = query.ordering();

    let start_at = match start_after {
        Some(cursor) => {
            let values = ordering
                .iter()
                .map(|(field, _)| {
                    if field == DOCUMENT_ID {
                        return Ok(TypedValue::ReferenceValue(format!(
                            "{root}/{collection}/{}",
                            cursor.id
                        )));
                    }

                    let value = lookup(&cursor.fields, field).ok_or_else(|| {
                        Error::InvalidQuery(format!(
                            "cursor document {} lacks ordered field {field}",
                            cursor.id
                        ))
                    })?;

                    TypedValue::at(field, value)
                })
                .collect::<Result<Vec<_>>>()?;

            Some(WireCursor {
                values,
                before: false,
            })
        }
        None => None,
    };

    Ok(StructuredQuery {
        from: vec![CollectionSelector {
            collection_id: collection.collection_id().to_owned(),
        }],
        r#where,
        order_by: ordering
            .iter()
            .map(|(field, direction)| Order {
                field: field_reference(field),
                direction: direction.wire(),
            })
            .collect(),
        start_at,
        limit: query.limit(),
    })
}

/// Maps backend statuses onto the store's own error kinds.
fn refine(error: Error, path: &DocumentPath) -> Error {
    match error {
        Error::ServiceError(Status {
            kind: Code::AlreadyExists,
            ..
        }) => Error::AlreadyExists(path.to_string()),

        Error::ServiceError(Status {
            kind: Code::NotFound,
            ..
        }) => Error::MissingDocument(path.to_string()),

        other => other,
    }
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_client(http_client(config), config)
    }

    pub fn with_client(client: HttpClient, config: &Config) -> Result<Self> {
        let base = config.base()?;
        if base.cannot_be_a_base() {
            return Err(Error::Other("EndpointCannotBeABase"));
        }

        let token = match &config.emulator_host {
            Some(_) => Some(SecretString::from(EMULATOR_TOKEN.to_owned())),
            None => config.token.clone(),
        };

        debug!(%base, root = config.documents_root(), "http backend");

        Ok(Self {
            inner: Arc::new(HttpBackendInner {
                base,
                root: config.documents_root(),
                client,
                token,
                page_size: config.page_size,
            }),
        })
    }

    fn name(&self, path: &DocumentPath) -> String {
        format!("{}/{path}", self.inner.root)
    }

    /// Resource owning a collection: the database root or a parent document.
    fn parent(&self, collection: &CollectionPath) -> String {
        match collection.parent() {
            Some(document) => self.name(&document),
            None => self.inner.root.clone(),
        }
    }

    fn url(&self, resource: &str) -> Result<Url> {
        let mut url = self.inner.base.clone();

        url.path_segments_mut()
            .map_err(|_| Error::Other("EndpointCannotBeABase"))?
            .pop_if_empty()
            .extend(resource.split('/'));

        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        trace!(%method, %url, "http request");

        let request = self.inner.client.request(method, url);

        match self.provide_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl TokenProvider for HttpBackend {
    fn provide_token(&self) -> Option<&str> {
        self.inner.token.as_ref().map(|token| token.expose_secret())
    }
}

impl Backend for HttpBackend {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Fields>> {
        let url = self.url(&self.name(path))?;

        let response = self.request(Method::GET, url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),

            status if status.is_success() => {
                let document = response.json_body::<WireDocument>().await?;
                Ok(Some(decode_fields(document.fields)?))
            }

            status => Err(crate::services::error_from_body(
                status,
                response.text().await?,
            )),
        }
    }

    async fn create(&self, path: &DocumentPath, fields: Fields) -> Result<()> {
        let collection = path.collection();
        let mut url = self.url(&format!(
            "{}/{}",
            self.parent(collection),
            collection.collection_id()
        ))?;
        url.query_pairs_mut().append_pair("documentId", path.id());

        self.request(Method::POST, url)
            .json(&WireDocument::from_fields(&fields)?)
            .send_ext()
            .await
            .map_err(|error| refine(error, path))?;

        trace!(%path, "create");

        Ok(())
    }

    async fn write(&self, path: &DocumentPath, fields: Fields, mode: WriteMode) -> Result<()> {
        let mut url = self.url(&self.name(path))?;
        {
            let mut query = url.query_pairs_mut();

            for field in update_mask(&fields, mode) {
                query.append_pair("updateMask.fieldPaths", &field);
            }

            if mode == WriteMode::Update {
                query.append_pair("currentDocument.exists", "true");
            }
        }

        self.request(Method::PATCH, url)
            .json(&WireDocument::from_fields(&fields)?)
            .send_ext()
            .await
            .map_err(|error| refine(error, path))?;

        trace!(%path, %mode, "write");

        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        let url = self.url(&self.name(path))?;

        self.request(Method::DELETE, url).send_ext().await?;

        trace!(%path, "delete");

        Ok(())
    }

    async fn list(&self, collection: &CollectionPath) -> Result<Vec<RawDocument>> {
        let resource = format!(
            "{}/{}",
            self.parent(collection),
            collection.collection_id()
        );

        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(&resource)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &self.inner.page_size.to_string());

                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page = self
                .request(Method::GET, url)
                .send_ext()
                .await?
                .json_body::<ListResponse>()
                .await?;

            trace!(%collection, count = page.documents.len(), "list page");

            for document in page.documents {
                documents.push(document.into_raw()?);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn run_query(
        &self,
        collection: &CollectionPath,
        query: &Query,
        start_after: Option<&Cursor>,
    ) -> Result<Vec<RawDocument>> {
        query.validate()?;

        let url = self.url(&format!("{}:runQuery", self.parent(collection)))?;

        let request = RunQueryRequest {
            structured_query: structured_query(&self.inner.root, collection, query, start_after)?,
        };

        let responses = self
            .request(Method::POST, url)
            .json(&request)
            .send_ext()
            .await?
            .json_body::<Vec<RunQueryResponse>>()
            .await?;

        responses
            .into_iter()
            .filter_map(|response| response.document)
            .map(WireDocument::into_raw)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigBuilder;
    use crate::services::store::query::{Direction, filter, limit, order_by};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const ROOT: &str = "projects/p/databases/(default)/documents";

    fn backend() -> HttpBackend {
        let config = ConfigBuilder::default().project_id("p").build().unwrap();
        HttpBackend::new(&config).unwrap()
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn urls_for_nested_collections() {
        let backend = backend();
        let conversations = CollectionPath::parse("students/s1/conversations").unwrap();

        assert_eq!(
            backend.parent(&conversations),
            format!("{ROOT}/students/s1")
        );

        let url = backend
            .url(&format!("{}:runQuery", backend.parent(&conversations)))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/p/databases/(default)/documents/students/s1:runQuery"
        );

        let odd = CollectionPath::parse("users").unwrap().doc("a b?c").unwrap();
        let url = backend.url(&backend.name(&odd)).unwrap();
        assert!(url.as_str().ends_with("/documents/users/a%20b%3Fc"));
    }

    #[test]
    fn emulator_uses_owner_token() {
        let config = ConfigBuilder::default()
            .project_id("p")
            .emulator_host("127.0.0.1:8080")
            .build()
            .unwrap();
        let backend = HttpBackend::new(&config).unwrap();

        assert_eq!(backend.provide_token(), Some(EMULATOR_TOKEN));
        assert_eq!(
            backend.url("x").unwrap().as_str(),
            "http://127.0.0.1:8080/v1/x"
        );
    }

    #[test]
    fn masks() {
        let data = fields(json!({"name": "A", "address": {"city": "Lyon"}, "first name": 1}));

        assert_eq!(
            update_mask(&data, WriteMode::Merge),
            ["address.city", "`first name`", "name"]
        );
        assert_eq!(
            update_mask(&data, WriteMode::Update),
            ["address", "`first name`", "name"]
        );
    }

    #[test]
    fn single_filter_query() {
        let collection = CollectionPath::parse("users").unwrap();
        let query = Query::from(vec![filter("status", Operator::Eq, "A")]);

        let wire = serde_json::to_value(structured_query(ROOT, &collection, &query, None).unwrap())
            .unwrap();

        assert_eq!(
            wire,
            json!({
                "from": [{"collectionId": "users"}],
                "where": {"fieldFilter": {
                    "field": {"fieldPath": "status"},
                    "op": "EQUAL",
                    "value": {"stringValue": "A"},
                }},
                "orderBy": [{"field": {"fieldPath": "__name__"}, "direction": "ASCENDING"}],
            })
        );
    }

    #[test]
    fn composite_query_with_cursor() {
        let collection = CollectionPath::parse("students/s1/conversations").unwrap();
        let query = Query::from(vec![
            filter("archived", Operator::Eq, Value::Null),
            filter("updatedAt", Operator::Gt, 1_000),
            order_by("updatedAt", Direction::Desc),
            limit(10),
        ]);
        let cursor = Cursor {
            id: "c9".into(),
            fields: fields(json!({"updatedAt": 2_000})),
        };

        let wire = serde_json::to_value(
            structured_query(ROOT, &collection, &query, Some(&cursor)).unwrap(),
        )
        .unwrap();

        assert_eq!(
            wire,
            json!({
                "from": [{"collectionId": "conversations"}],
                "where": {"compositeFilter": {"op": "AND", "filters": [
                    {"unaryFilter": {"op": "IS_NULL", "field": {"fieldPath": "archived"}}},
                    {"fieldFilter": {
                        "field": {"fieldPath": "updatedAt"},
                        "op": "GREATER_THAN",
                        "value": {"timestampValue": "1970-01-01T00:00:01.000Z"},
                    }},
                ]}},
                "orderBy": [
                    {"field": {"fieldPath": "updatedAt"}, "direction": "DESCENDING"},
                    {"field": {"fieldPath": "__name__"}, "direction": "DESCENDING"},
                ],
                "startAt": {"values": [
                    {"timestampValue": "1970-01-01T00:00:02.000Z"},
                    {"referenceValue": format!("{ROOT}/students/s1/conversations/c9")},
                ], "before": false},
                "limit": 10,
            })
        );
    }

    #[test]
    fn refines_statuses() {
        let path = CollectionPath::parse("users").unwrap().doc("u1").unwrap();
        let status = |kind| {
            Error::ServiceError(Status {
                code: 0,
                message: String::new(),
                kind,
            })
        };

        assert!(matches!(
            refine(status(Code::NotFound), &path),
            Error::MissingDocument(p) if p == "users/u1"
        ));
        assert!(matches!(
            refine(status(Code::AlreadyExists), &path),
            Error::AlreadyExists(_)
        ));
        assert!(matches!(
            refine(status(Code::PermissionDenied), &path),
            Error::ServiceError(_)
        ));
    }

    #[test]
    fn wire_document_id_from_name() {
        let document: WireDocument = serde_json::from_value(json!({
            "name": format!("{ROOT}/users/u1"),
            "fields": {"name": {"stringValue": "Alice"}},
            "createTime": "2024-01-01T00:00:00Z",
        }))
        .unwrap();

        let raw = document.into_raw().unwrap();
        assert_eq!(raw.id, "u1");
        assert_eq!(Value::Object(raw.fields), json!({"name": "Alice"}));
    }

    #[derive(Debug, Clone)]
    struct Request {
        line: String,
        head: String,
        body: String,
    }

    type Requests = Arc<Mutex<Vec<Request>>>;

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];

        loop {
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);

            let text = String::from_utf8_lossy(&buffer);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);

                if buffer.len() >= end + 4 + length {
                    break;
                }
            }
        }

        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Local server answering every request with `respond(method, target)`.
    async fn serve<F>(respond: F) -> (HttpBackend, Requests)
    where
        F: Fn(&str, &str) -> (u16, Value) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let requests = Requests::default();

        let log = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let raw = read_request(&mut socket).await;
                let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw.as_str(), ""));
                let line = head.lines().next().unwrap_or_default().to_owned();

                let mut parts = line.split(' ');
                let method = parts.next().unwrap_or_default();
                let target = parts.next().unwrap_or_default();
                let (status, payload) = respond(method, target);

                log.lock().unwrap().push(Request {
                    line: format!("{method} {target}"),
                    head: head.to_lowercase(),
                    body: body.to_owned(),
                });

                let payload = payload.to_string();
                let response = format!(
                    "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
                    payload.len()
                );

                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });

        let config = ConfigBuilder::default()
            .project_id("p")
            .emulator_host(address.to_string())
            .build()
            .unwrap();

        (HttpBackend::new(&config).unwrap(), requests)
    }

    fn sent(requests: &Requests) -> Vec<Request> {
        requests.lock().unwrap().clone()
    }

    fn stored(id: &str, name: &str) -> Value {
        json!({
            "name": format!("{ROOT}/users/{id}"),
            "fields": {"name": {"stringValue": name}},
            "updateTime": "2024-01-01T00:00:00Z",
        })
    }

    fn status(code: u16, status: &str) -> (u16, Value) {
        (
            code,
            json!({"error": {"code": code, "message": "canned", "status": status}}),
        )
    }

    fn user(id: &str) -> DocumentPath {
        CollectionPath::parse("users").unwrap().doc(id).unwrap()
    }

    #[tokio::test]
    async fn get_reads_fields_and_maps_not_found_to_none() {
        let (backend, requests) = serve(|_, target| {
            if target.ends_with("/users/u1") {
                (200, stored("u1", "Alice"))
            } else {
                status(404, "NOT_FOUND")
            }
        })
        .await;

        assert_eq!(
            backend.get(&user("u1")).await.unwrap(),
            Some(fields(json!({"name": "Alice"})))
        );
        assert_eq!(backend.get(&user("ghost")).await.unwrap(), None);

        let requests = sent(&requests);
        assert_eq!(requests[1].line, format!("GET /v1/{ROOT}/users/ghost"));
        assert!(requests[0].head.contains("authorization: bearer owner"));
    }

    #[tokio::test]
    async fn list_follows_page_tokens() {
        let (backend, requests) = serve(|_, target| {
            if target.contains("pageToken=t2") {
                (
                    200,
                    json!({"documents": [stored("b", "Bob")], "nextPageToken": ""}),
                )
            } else {
                (
                    200,
                    json!({"documents": [stored("a", "Ana")], "nextPageToken": "t2"}),
                )
            }
        })
        .await;

        let documents = backend
            .list(&CollectionPath::parse("users").unwrap())
            .await
            .unwrap();

        assert_eq!(
            documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            ["a", "b"]
        );
        assert_eq!(
            sent(&requests)
                .into_iter()
                .map(|r| r.line)
                .collect::<Vec<_>>(),
            [
                format!("GET /v1/{ROOT}/users?pageSize=300"),
                format!("GET /v1/{ROOT}/users?pageSize=300&pageToken=t2"),
            ]
        );
    }

    #[tokio::test]
    async fn empty_collection_lists_nothing() {
        let (backend, _) = serve(|_, _| (200, json!({}))).await;

        let documents = backend
            .list(&CollectionPath::parse("users").unwrap())
            .await
            .unwrap();

        assert!(documents.is_empty());
    }

    #[tokio::test]
    async fn run_query_keeps_only_document_rows() {
        let (backend, requests) = serve(|_, _| {
            (
                200,
                json!([
                    {"document": stored("u1", "Alice"), "readTime": "2024-01-01T00:00:00Z"},
                    {"document": stored("u2", "Bob"), "readTime": "2024-01-01T00:00:00Z"},
                    {"readTime": "2024-01-01T00:00:00Z", "skippedResults": 1},
                ]),
            )
        })
        .await;

        let collection = CollectionPath::parse("users").unwrap();
        let query = Query::from(vec![filter("name", Operator::Ne, "Zed")]);

        let documents = backend.run_query(&collection, &query, None).await.unwrap();

        assert_eq!(
            documents.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            ["u1", "u2"]
        );

        let request = &sent(&requests)[0];
        assert_eq!(request.line, format!("POST /v1/{ROOT}:runQuery"));

        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(
            body["structuredQuery"]["from"],
            json!([{"collectionId": "users"}])
        );
    }

    #[tokio::test]
    async fn run_query_without_matches() {
        let (backend, _) = serve(|_, _| (200, json!([{"readTime": "2024-01-01T00:00:00Z"}]))).await;

        let documents = backend
            .run_query(&CollectionPath::parse("users").unwrap(), &Query::default(), None)
            .await
            .unwrap();

        assert!(documents.is_empty());
    }

    #[tokio::test]
    async fn invalid_query_never_leaves_the_client() {
        let (backend, requests) = serve(|_, _| (200, json!([]))).await;
        let collection = CollectionPath::parse("users").unwrap();

        for query in [
            Query::from(vec![limit(0)]),
            Query::from(vec![filter("status", Operator::In, "A")]),
        ] {
            assert!(matches!(
                backend.run_query(&collection, &query, None).await,
                Err(Error::InvalidQuery(_))
            ));
        }

        assert!(sent(&requests).is_empty());
    }

    #[tokio::test]
    async fn strict_update_of_missing_document() {
        let (backend, requests) = serve(|_, _| status(404, "NOT_FOUND")).await;

        let result = backend
            .write(
                &user("ghost"),
                fields(json!({"name": "Nobody"})),
                WriteMode::Update,
            )
            .await;

        assert!(matches!(result, Err(Error::MissingDocument(path)) if path == "users/ghost"));

        let request = &sent(&requests)[0];
        assert_eq!(
            request.line,
            format!(
                "PATCH /v1/{ROOT}/users/ghost?updateMask.fieldPaths=name&currentDocument.exists=true"
            )
        );
        assert_eq!(
            serde_json::from_str::<Value>(&request.body).unwrap(),
            json!({"fields": {"name": {"stringValue": "Nobody"}}})
        );
    }

    #[tokio::test]
    async fn merge_write_creates_without_precondition() {
        let (backend, requests) = serve(|_, _| (200, stored("u1", "Alice"))).await;

        backend
            .write(&user("u1"), fields(json!({"name": "Alice"})), WriteMode::Merge)
            .await
            .unwrap();

        assert_eq!(
            sent(&requests)[0].line,
            format!("PATCH /v1/{ROOT}/users/u1?updateMask.fieldPaths=name")
        );
    }

    #[tokio::test]
    async fn create_conflict_is_already_exists() {
        let (backend, requests) = serve(|_, _| status(409, "ALREADY_EXISTS")).await;

        let result = backend
            .create(&user("u1"), fields(json!({"name": "Alice"})))
            .await;

        assert!(matches!(result, Err(Error::AlreadyExists(path)) if path == "users/u1"));
        assert_eq!(
            sent(&requests)[0].line,
            format!("POST /v1/{ROOT}/users?documentId=u1")
        );
    }

    #[tokio::test]
    async fn deleting_missing_document_succeeds() {
        let (backend, requests) = serve(|_, _| (200, json!({}))).await;

        backend.delete(&user("ghost")).await.unwrap();

        assert_eq!(
            sent(&requests)[0].line,
            format!("DELETE /v1/{ROOT}/users/ghost")
        );
    }

    #[tokio::test]
    async fn denied_request_keeps_service_status() {
        let (backend, _) = serve(|_, _| status(403, "PERMISSION_DENIED")).await;

        match backend.delete(&user("u1")).await {
            Err(Error::ServiceError(status)) => assert_eq!(status.kind, Code::PermissionDenied),
            other => panic!("unexpected {other:?}"),
        }
    }
}
