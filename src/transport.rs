use std::{fmt, future::Future, sync::Arc};

use reqwest::{header::HeaderMap, multipart, Method, Url};

use crate::{error::TransportError, FormData, FormPart, Response};

/// Encoded request payload.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    /// Multipart form; the transport picks the boundary and content type.
    Multipart(FormData),
}

/// Fully resolved request. Built once per fetch and re-sent unchanged on
/// every attempt.
#[derive(Clone, Debug)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

/// Performs one HTTP attempt.
///
/// Cancellation is delivered by dropping the returned future, so
/// implementations need not observe any signal themselves.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: &RequestSpec,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(
        &self,
        request: &RequestSpec,
    ) -> impl Future<Output = Result<Response, TransportError>> + Send {
        (**self).send(request)
    }
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS, pooling).
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestSpec) -> Result<Response, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes.clone()),
            RequestBody::Multipart(form) => builder.multipart(build_multipart(form)?),
        };

        let response = builder.send().await?;
        Ok(Response::from_reqwest(response))
    }
}

fn build_multipart(form: &FormData) -> Result<multipart::Form, TransportError> {
    let mut multipart = multipart::Form::new();
    for part in &form.parts {
        multipart = match part {
            FormPart::Text { name, value } => multipart.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                content_type,
                bytes,
            } => {
                let mut file = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                if let Some(content_type) = content_type {
                    file = file.mime_str(content_type)?;
                }
                multipart.part(name.clone(), file)
            }
        };
    }
    Ok(multipart)
}

#[cfg(test)]
mod tests {
    use super::build_multipart;
    use crate::FormData;

    #[test]
    fn multipart_rejects_invalid_content_type() {
        let form = FormData::new().file("upload", "a.bin", Some("not a mime"), vec![1, 2, 3]);
        assert!(build_multipart(&form).is_err());
    }

    #[test]
    fn multipart_builds_text_and_files() {
        let form = FormData::new()
            .text("name", "kit")
            .file("upload", "a.bin", Some("application/octet-stream"), vec![1]);
        let multipart = build_multipart(&form).expect("form must build");
        assert!(!multipart.boundary().is_empty());
    }
}
