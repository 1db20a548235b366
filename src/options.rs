use std::{fmt, sync::Arc};

use reqwest::{header::HeaderMap, Method, StatusCode};

use crate::{
    AbortController, AbortSignal, Body, FetchError, Query, RequestKind, ResponseKind, Result,
    RetryConfig, Strategy,
};

/// Rule deciding whether a response status is acceptable.
#[derive(Clone)]
pub enum ValidateStatus {
    /// Only this exact status passes.
    Exact(u16),
    /// Any 2xx status passes.
    Ok,
    /// Caller-supplied predicate. It may abort a controller or signal as a
    /// side effect; that abort is honored as a cancellation.
    Predicate(Arc<dyn Fn(StatusCode) -> bool + Send + Sync>),
}

impl ValidateStatus {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            Self::Exact(expected) => status.as_u16() == *expected,
            Self::Ok => status.is_success(),
            Self::Predicate(predicate) => predicate(status),
        }
    }
}

impl fmt::Debug for ValidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(status) => f.debug_tuple("Exact").field(status).finish(),
            Self::Ok => f.write_str("Ok"),
            Self::Predicate(_) => f.write_str("Predicate(<fn>)"),
        }
    }
}

impl std::str::FromStr for ValidateStatus {
    type Err = FetchError;

    /// Accepts `"ok"` or a numeric status.
    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("ok") {
            return Ok(Self::Ok);
        }
        value
            .parse::<u16>()
            .ok()
            .filter(|status| (100..=999).contains(status))
            .map(Self::Exact)
            .ok_or_else(|| FetchError::config(format!("validate status not supported ({value})")))
    }
}

impl From<u16> for ValidateStatus {
    fn from(status: u16) -> Self {
        Self::Exact(status)
    }
}

/// Per-call options. Every field is optional; unset fields fall back to the
/// client's defaults, see [`FetchOptions::merged_over`].
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Defaults to `GET`.
    pub method: Option<Method>,
    pub headers: Option<HeaderMap>,
    pub body: Option<Body>,
    /// Merged into the target URL's query string.
    pub query: Option<Query>,
    /// Absent means exactly one attempt.
    pub retry: Option<RetryConfig>,
    /// Per-attempt timeout in milliseconds. `0` disables it.
    pub timeout_ms: Option<u64>,
    pub validate_status: Option<ValidateStatus>,
    pub request_kind: Option<RequestKind>,
    pub response_kind: Option<ResponseKind>,
    /// Externally owned cancellation, honored across every attempt.
    pub signal: Option<AbortSignal>,
    /// Externally owned controller; its signal is used like `signal`.
    pub controller: Option<AbortController>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn validate_status(mut self, rule: impl Into<ValidateStatus>) -> Self {
        self.validate_status = Some(rule.into());
        self
    }

    pub fn request_kind(mut self, kind: RequestKind) -> Self {
        self.request_kind = Some(kind);
        self
    }

    pub fn response_kind(mut self, kind: ResponseKind) -> Self {
        self.response_kind = Some(kind);
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn controller(mut self, controller: AbortController) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Shallow merge: fields set on `self` win over `defaults`.
    pub fn merged_over(self, defaults: &FetchOptions) -> FetchOptions {
        let defaults = defaults.clone();
        FetchOptions {
            method: self.method.or(defaults.method),
            headers: self.headers.or(defaults.headers),
            body: self.body.or(defaults.body),
            query: self.query.or(defaults.query),
            retry: self.retry.or(defaults.retry),
            timeout_ms: self.timeout_ms.or(defaults.timeout_ms),
            validate_status: self.validate_status.or(defaults.validate_status),
            request_kind: self.request_kind.or(defaults.request_kind),
            response_kind: self.response_kind.or(defaults.response_kind),
            signal: self.signal.or(defaults.signal),
            controller: self.controller.or(defaults.controller),
        }
    }

    /// Reads defaults from the environment.
    ///
    /// Reads:
    /// - `RETRY_FETCH_TIMEOUT_MS`: per-attempt timeout
    /// - `RETRY_FETCH_RETRY_MAX`: retries after the first attempt
    /// - `RETRY_FETCH_RETRY_DELAY_MS`: base backoff delay
    /// - `RETRY_FETCH_RETRY_STRATEGY`: `linear` or `exponential`
    /// - `RETRY_FETCH_VALIDATE_STATUS`: `ok` or a numeric status
    ///
    /// Unset variables leave the field unset; malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`FetchOptions::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut options = Self::default();

        if let Some(value) = read("RETRY_FETCH_TIMEOUT_MS") {
            options.timeout_ms = Some(parse_number("RETRY_FETCH_TIMEOUT_MS", &value)?);
        }

        let max = read("RETRY_FETCH_RETRY_MAX");
        let delay = read("RETRY_FETCH_RETRY_DELAY_MS");
        let strategy = read("RETRY_FETCH_RETRY_STRATEGY");
        if max.is_some() || delay.is_some() || strategy.is_some() {
            let mut retry = RetryConfig::default();
            if let Some(value) = max {
                retry.max = parse_number("RETRY_FETCH_RETRY_MAX", &value)?;
            }
            if let Some(value) = delay {
                retry.delay_ms = parse_number("RETRY_FETCH_RETRY_DELAY_MS", &value)?;
            }
            if let Some(value) = strategy {
                retry.strategy = value.parse::<Strategy>()?;
            }
            options.retry = Some(retry);
        }

        if let Some(value) = read("RETRY_FETCH_VALIDATE_STATUS") {
            options.validate_status = Some(value.parse()?);
        }

        Ok(options)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| FetchError::config(format!("{key} is not a valid number: '{value}'")))
}
