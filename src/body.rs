//! Declared body kinds, request body encoding and header defaults.

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method,
};
use serde::Deserialize;

use crate::{transport::RequestBody, FetchError, Result};

/// How the request body is encoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Json,
    /// `application/x-www-form-urlencoded`.
    #[serde(rename = "url")]
    UrlEncoded,
    Text,
    /// `multipart/form-data`.
    Form,
}

impl std::str::FromStr for RequestKind {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(Self::Json),
            "url" => Ok(Self::UrlEncoded),
            "text" => Ok(Self::Text),
            "form" => Ok(Self::Form),
            other => Err(FetchError::config(format!(
                "request kind not supported ({other})"
            ))),
        }
    }
}

/// How the response is returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Body parsed as JSON.
    Json,
    /// Body read as a string.
    Text,
    /// Raw response, body left unread.
    File,
}

impl ResponseKind {
    /// Whether the body is consumed by the fetch.
    pub(crate) fn decodes_body(self) -> bool {
        matches!(self, Self::Json | Self::Text)
    }
}

impl std::str::FromStr for ResponseKind {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "file" => Ok(Self::File),
            other => Err(FetchError::config(format!(
                "response kind not supported ({other})"
            ))),
        }
    }
}

/// Request payload as given by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
    /// Ordered key/value pairs.
    Fields(Vec<(String, String)>),
    Multipart(FormData),
}

impl Body {
    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn fields<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::Fields(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<FormData> for Body {
    fn from(value: FormData) -> Self {
        Self::Multipart(value)
    }
}

/// Multipart form. Kept as plain data so it can be re-sent on every attempt.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormData {
    pub parts: Vec<FormPart>,
}

/// Single multipart field.
#[derive(Clone, Debug, PartialEq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<&str>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            content_type: content_type.map(str::to_owned),
            bytes: bytes.into(),
        });
        self
    }
}

/// Encodes `body` for `kind` and fills in missing content headers.
pub(crate) fn prepare_request_body(
    method: &Method,
    headers: &mut HeaderMap,
    kind: Option<RequestKind>,
    body: Option<Body>,
) -> Result<RequestBody> {
    if body.is_some() && (*method == Method::GET || *method == Method::HEAD) {
        return Err(FetchError::config(format!(
            "request with {method} method cannot have a body"
        )));
    }

    let Some(kind) = kind else {
        return Ok(match body {
            None => RequestBody::Empty,
            Some(body) => encode_untyped(body)?,
        });
    };

    let body = match kind {
        RequestKind::Json => {
            default_header(headers, header::CONTENT_TYPE, "application/json");
            match body {
                None => RequestBody::Empty,
                Some(Body::Bytes(bytes)) => RequestBody::Bytes(bytes),
                Some(Body::Text(text)) => RequestBody::Bytes(to_json(&text)?),
                Some(Body::Json(value)) => RequestBody::Bytes(to_json(&value)?),
                Some(Body::Fields(pairs)) => {
                    let object: serde_json::Map<String, serde_json::Value> = pairs
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect();
                    RequestBody::Bytes(to_json(&object)?)
                }
                Some(Body::Multipart(_)) => {
                    return Err(mismatch("json", "multipart form"));
                }
            }
        }
        RequestKind::UrlEncoded => {
            default_header(
                headers,
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            );
            match body {
                None => RequestBody::Empty,
                Some(Body::Fields(pairs)) => RequestBody::Bytes(form_urlencode(&pairs).into_bytes()),
                Some(Body::Json(serde_json::Value::Object(object))) => {
                    let pairs: Vec<(String, String)> = object
                        .into_iter()
                        .map(|(key, value)| (key, json_scalar_to_string(value)))
                        .collect();
                    RequestBody::Bytes(form_urlencode(&pairs).into_bytes())
                }
                Some(Body::Text(text)) => RequestBody::Bytes(text.into_bytes()),
                Some(Body::Bytes(bytes)) => RequestBody::Bytes(bytes),
                Some(Body::Json(_)) => return Err(mismatch("url", "non-object JSON")),
                Some(Body::Multipart(_)) => return Err(mismatch("url", "multipart form")),
            }
        }
        RequestKind::Text => {
            default_header(headers, header::CONTENT_TYPE, "text/plain");
            match body {
                None => RequestBody::Empty,
                Some(Body::Multipart(_)) => return Err(mismatch("text", "multipart form")),
                Some(body) => encode_untyped(body)?,
            }
        }
        RequestKind::Form => match body {
            None => RequestBody::Multipart(FormData::new()),
            Some(Body::Multipart(form)) => RequestBody::Multipart(form),
            Some(_) => return Err(mismatch("form", "non-multipart body")),
        },
    };

    Ok(body)
}

/// Fills in the `accept` header implied by `kind`.
pub(crate) fn apply_response_kind(headers: &mut HeaderMap, kind: Option<ResponseKind>) {
    match kind {
        Some(ResponseKind::Json) => default_header(headers, header::ACCEPT, "application/json"),
        Some(ResponseKind::File) => {
            default_header(headers, header::ACCEPT, "application/octet-stream")
        }
        Some(ResponseKind::Text) | None => {}
    }
}

fn encode_untyped(body: Body) -> Result<RequestBody> {
    Ok(match body {
        Body::Bytes(bytes) => RequestBody::Bytes(bytes),
        Body::Text(text) => RequestBody::Bytes(text.into_bytes()),
        Body::Json(value) => RequestBody::Bytes(to_json(&value)?),
        Body::Fields(pairs) => RequestBody::Bytes(form_urlencode(&pairs).into_bytes()),
        Body::Multipart(form) => RequestBody::Multipart(form),
    })
}

fn default_header(headers: &mut HeaderMap, name: header::HeaderName, value: &'static str) {
    headers
        .entry(name)
        .or_insert_with(|| HeaderValue::from_static(value));
}

fn form_urlencode(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn json_scalar_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => "null".to_owned(),
        other => other.to_string(),
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|err| FetchError::config(format!("request body could not be serialized: {err}")))
}

fn mismatch(kind: &str, body: &str) -> FetchError {
    FetchError::config(format!("request kind '{kind}' cannot encode a {body} body"))
}
