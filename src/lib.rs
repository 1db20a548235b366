//! `retry-fetch` wraps a single HTTP call with bounded retry, cooperative
//! cancellation and typed status validation.
//!
//! - [`Client::fetch`] / [`fetch`] validate options and return a [`Fetch`]
//! - awaiting the [`Fetch`] runs attempts until success, a terminal failure,
//!   or an exhausted [`RetryConfig`]
//! - [`Fetch::controller`] exposes the controller of the attempt in flight
//!
//! ```no_run
//! use retry_fetch::{Client, FetchOptions, ResponseKind, RetryConfig, ValidateStatus};
//!
//! # async fn run() -> retry_fetch::Result<()> {
//! let client = Client::new();
//! let body = client
//!     .fetch(
//!         "https://api.agify.io/?name=lucas",
//!         FetchOptions::new()
//!             .timeout_ms(2_000)
//!             .retry(RetryConfig::new(3, 500))
//!             .validate_status(ValidateStatus::Ok)
//!             .response_kind(ResponseKind::Json),
//!     )?
//!     .await?;
//! println!("{body:?}");
//! # Ok(())
//! # }
//! ```

mod backoff;
mod body;
mod classify;
mod client;
mod error;
mod fetch;
mod options;
mod query;
mod response;
pub mod signal;
mod transport;

pub use backoff::{Backoff, BackoffStep, Jitter, RetryConfig, Strategy};
pub use body::{Body, FormData, FormPart, RequestKind, ResponseKind};
pub use client::{fetch, Client};
pub use error::{FetchError, StatusError, StatusErrorCode, TransportError};
pub use fetch::Fetch;
pub use options::{FetchOptions, ValidateStatus};
pub use query::{append_query, Query, QueryValue, SearchParams};
pub use response::{DecodedBody, Fetched, Response};
pub use signal::{AbortController, AbortSignal, AbortSource, ControllerSlot};
pub use transport::{ReqwestTransport, RequestBody, RequestSpec, Transport};

pub type Result<T> = std::result::Result<T, FetchError>;
