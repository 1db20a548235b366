use std::fmt;

use reqwest::{header::HeaderMap, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::{error::TransportError, FetchError, ResponseKind, Result};

/// HTTP response with an unread body.
pub struct Response {
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
    body: ResponseBody,
}

enum ResponseBody {
    Streaming(reqwest::Response),
    Buffered(Vec<u8>),
}

impl Response {
    /// Builds a response from already buffered parts, e.g. in a custom
    /// [`Transport`](crate::Transport).
    pub fn from_parts(status: StatusCode, url: Url, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            url,
            headers,
            body: ResponseBody::Buffered(body),
        }
    }

    pub(crate) fn from_reqwest(response: reqwest::Response) -> Self {
        Self {
            status: response.status(),
            url: response.url().clone(),
            headers: response.headers().clone(),
            body: ResponseBody::Streaming(response),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `true` for 2xx statuses.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub async fn bytes(self) -> std::result::Result<Vec<u8>, TransportError> {
        match self.body {
            ResponseBody::Streaming(response) => Ok(response.bytes().await?.to_vec()),
            ResponseBody::Buffered(bytes) => Ok(bytes),
        }
    }

    pub async fn text(self) -> std::result::Result<String, TransportError> {
        match self.body {
            ResponseBody::Streaming(response) => Ok(response.text().await?),
            ResponseBody::Buffered(bytes) => Ok(String::from_utf8(bytes)?),
        }
    }

    /// Reads the body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> std::result::Result<T, TransportError> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Reads the body according to `kind`. `File` is rejected: it never
    /// decodes.
    pub(crate) async fn decode(
        self,
        kind: ResponseKind,
    ) -> std::result::Result<DecodedBody, TransportError> {
        match kind {
            ResponseKind::Text => Ok(DecodedBody::Text(self.text().await?)),
            ResponseKind::Json | ResponseKind::File => {
                let bytes = self.bytes().await?;
                DecodedBody::from_bytes(kind, &bytes)
            }
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            ResponseBody::Streaming(_) => "<streaming>",
            ResponseBody::Buffered(_) => "<buffered>",
        };
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}

/// Body decoded according to the declared response kind.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedBody {
    Json(serde_json::Value),
    Text(String),
}

impl DecodedBody {
    pub(crate) fn from_bytes(
        kind: ResponseKind,
        bytes: &[u8],
    ) -> std::result::Result<Self, TransportError> {
        match kind {
            ResponseKind::Json => Ok(Self::Json(serde_json::from_slice(bytes)?)),
            ResponseKind::Text => Ok(Self::Text(String::from_utf8(bytes.to_vec())?)),
            ResponseKind::File => Err(TransportError::other("file responses are not decoded")),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

/// Value a successful fetch settles with.
#[derive(Debug)]
pub enum Fetched {
    /// No decoding kind was declared (or `file`).
    Response(Response),
    Json(serde_json::Value),
    Text(String),
}

impl Fetched {
    pub(crate) fn from_decoded(body: DecodedBody) -> Self {
        match body {
            DecodedBody::Json(value) => Self::Json(value),
            DecodedBody::Text(text) => Self::Text(text),
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn into_json_value(self) -> Option<serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Deserializes a JSON result into `T`.
    pub fn json<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value)
                .map_err(|err| FetchError::Transport(TransportError::Json(err))),
            Self::Text(_) | Self::Response(_) => Err(FetchError::config(
                "fetch was not declared with the json response kind",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::{header::HeaderMap, StatusCode, Url};
    use serde_json::json;

    use super::{DecodedBody, Fetched, Response};
    use crate::ResponseKind;

    fn buffered(status: u16, body: &str) -> Response {
        Response::from_parts(
            StatusCode::from_u16(status).expect("valid status"),
            Url::parse("http://mock.test/").expect("valid url"),
            HeaderMap::new(),
            body.as_bytes().to_vec(),
        )
    }

    #[tokio::test]
    async fn buffered_bodies_decode_by_kind() {
        let json = buffered(200, r#"{"name":"kit"}"#)
            .decode(ResponseKind::Json)
            .await
            .expect("valid json");
        assert_eq!(json, DecodedBody::Json(json!({"name": "kit"})));

        let text = buffered(200, "plain")
            .decode(ResponseKind::Text)
            .await
            .expect("valid text");
        assert_eq!(text.as_text(), Some("plain"));
    }

    #[tokio::test]
    async fn invalid_json_is_a_decode_error() {
        let err = buffered(200, "<html>")
            .decode(ResponseKind::Json)
            .await
            .expect_err("must not parse");
        assert!(matches!(err, crate::TransportError::Json(_)));
    }

    #[test]
    fn ok_covers_2xx_only() {
        assert!(buffered(204, "").ok());
        assert!(!buffered(301, "").ok());
        assert!(!buffered(404, "").ok());
    }

    #[test]
    fn typed_json_access() {
        #[derive(serde::Deserialize)]
        struct Agify {
            name: String,
        }

        let fetched = Fetched::Json(json!({"name": "lucas", "age": 40}));
        let agify: Agify = fetched.json().expect("shape must match");
        assert_eq!(agify.name, "lucas");

        assert!(Fetched::Text("x".to_owned()).json::<Agify>().is_err());
    }
}
