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

use reqwest::{self, Response, StatusCode};
use reqwest_middleware::RequestBuilder;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{self as json, Value};
use tracing::*;

pub mod store;

use super::{Error, Result};

pub(crate) trait RequestBuilderExt {
    fn send_ext(self) -> impl Future<Output = Result<Response>>;
}

pub trait TokenProvider {
    fn provide_token(&self) -> Option<&str>;
}

impl RequestBuilderExt for RequestBuilder {
    async fn send_ext(self) -> Result<Response> {
        let response = self.send().await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await?;

            Err(error_from_body(status, body))
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Status,
}

/// Error bodies come as `{"error": {...}}`, either alone or as the single
/// element of a streamed array.
pub(crate) fn error_from_body(status: StatusCode, body: String) -> Error {
    if let Ok(ErrorEnvelope { error }) = json::from_str(&body) {
        return Error::ServiceError(error);
    }

    if let Ok(mut envelopes) = json::from_str::<Vec<ErrorEnvelope>>(&body) {
        if let Some(ErrorEnvelope { error }) = envelopes.pop() {
            return Error::ServiceError(error);
        }
    }

    Error::HttpError(status, body)
}

pub(crate) trait ResponseExt {
    fn json_body<T: DeserializeOwned>(self) -> impl Future<Output = Result<T>>;
}

impl ResponseExt for reqwest::Response {
    async fn json_body<T: DeserializeOwned>(self) -> Result<T> {
        let body = self.text().await?;

        serde_json::from_str::<T>(&body).map_err(|error| {
            error!(%body, %error);
            Error::Serde(error)
        })
    }
}

pub(crate) fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    json::from_value(value).map_err(|error| {
        error!(%error, "Cannot deserialize document");
        Error::Serde(error)
    })
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, thiserror::Error)]
pub struct Status {
    pub code: u16,

    #[serde(default)]
    pub message: String,

    #[serde(rename = "status")]
    pub kind: Code,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.code, self.kind, self.message)
    }
}
