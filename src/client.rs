use std::{fmt, sync::Arc, time::Duration};

use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::{
    body::{apply_response_kind, prepare_request_body},
    fetch::Orchestrator,
    query::append_query,
    AbortController, AbortSignal, ControllerSlot, Fetch, FetchError, FetchOptions, RequestSpec,
    ReqwestTransport, ResponseKind, Result, Transport,
};

/// Starts a fetch with a one-off [`Client`].
///
/// Prefer a shared [`Client`] when issuing many requests so the underlying
/// connection pool is reused.
pub fn fetch(target: &str, options: FetchOptions) -> Result<Fetch> {
    Client::new().fetch(target, options)
}

/// Entry point for fetches sharing a transport, a base URL and default
/// options.
pub struct Client<T = ReqwestTransport> {
    transport: Arc<T>,
    base_url: Option<String>,
    options: FetchOptions,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            base_url: self.base_url.clone(),
            options: self.options.clone(),
        }
    }
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Client<ReqwestTransport> {
    /// Creates a client backed by a default `reqwest::Client`.
    pub fn new() -> Self {
        Self::with_transport(ReqwestTransport::new())
    }

    /// Creates a client from environment variables.
    ///
    /// Reads `RETRY_FETCH_BASE_URL` (optional) plus everything
    /// [`FetchOptions::from_env`] reads.
    pub fn from_env() -> Result<Self> {
        let options = FetchOptions::from_env()?;
        let mut client = Self::new().with_options(options);
        if let Some(base_url) = std::env::var("RETRY_FETCH_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            client = client.with_base_url(base_url);
        }
        Ok(client)
    }
}

impl Default for Client<ReqwestTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport + 'static> Client<T> {
    /// Creates a client over a custom transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            base_url: None,
            options: FetchOptions::default(),
        }
    }

    /// Prefixes every target with `base_url` (plain concatenation).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets default options; per-call options override them field by field.
    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates `options` and returns the pending fetch.
    ///
    /// Configuration problems (unsupported body kinds, a signal that does not
    /// belong to the supplied controller, an unparsable URL) are reported
    /// here, before any attempt.
    pub fn fetch(&self, target: &str, options: FetchOptions) -> Result<Fetch> {
        let orchestrator = self.prepare(target, options)?;
        Ok(Fetch::start(orchestrator))
    }

    /// Fetches `target` as JSON and deserializes it into `R`.
    pub async fn get_json<R: DeserializeOwned>(&self, target: &str, options: FetchOptions) -> Result<R> {
        let options = options.response_kind(ResponseKind::Json);
        self.fetch(target, options)?.await?.json()
    }

    fn prepare(&self, target: &str, options: FetchOptions) -> Result<Orchestrator<T>> {
        let options = options.merged_over(&self.options);
        let target = match &self.base_url {
            Some(base_url) => format!("{base_url}{target}"),
            None => target.to_owned(),
        };

        let external = resolve_external_signal(options.signal, options.controller)?;
        let method = options.method.unwrap_or(Method::GET);
        let mut headers = options.headers.unwrap_or_default();
        let body = prepare_request_body(&method, &mut headers, options.request_kind, options.body)?;
        apply_response_kind(&mut headers, options.response_kind);
        let url = append_query(&target, options.query.as_ref())?;

        Ok(Orchestrator {
            transport: Arc::clone(&self.transport),
            request: RequestSpec {
                method,
                url,
                headers,
                body,
            },
            retry: options.retry,
            timeout: options
                .timeout_ms
                .filter(|timeout_ms| *timeout_ms > 0)
                .map(Duration::from_millis),
            validate_status: options.validate_status,
            response_kind: options.response_kind,
            external,
            slot: ControllerSlot::new(AbortController::new()),
        })
    }
}

fn resolve_external_signal(
    signal: Option<AbortSignal>,
    controller: Option<AbortController>,
) -> Result<Option<AbortSignal>> {
    match (signal, controller) {
        (Some(signal), Some(controller)) if !signal.belongs_to(&controller) => Err(
            FetchError::config("signal does not belong to the supplied controller"),
        ),
        (Some(signal), _) => Ok(Some(signal)),
        (None, Some(controller)) => Ok(Some(controller.signal())),
        (None, None) => Ok(None),
    }
}
