//! Attempt state machine: one attempt in flight at a time, classified
//! failures, backoff between retryable ones.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use crate::{
    backoff::{Backoff, BackoffStep},
    classify::{classify, AttemptFailure, AttemptOutcome},
    signal::{wait_unless_aborted, EffectiveSignal},
    AbortController, AbortSignal, ControllerSlot, DecodedBody, FetchError, Fetched, RequestSpec,
    Response, ResponseKind, Result, RetryConfig, StatusError, StatusErrorCode, Transport,
    ValidateStatus,
};

/// A fetch in progress. Resolves to the settled result.
///
/// The fetch is lazy: nothing is sent until it is first polled. The
/// controller of the first attempt exists from construction, so aborting it
/// before the first poll settles the fetch as aborted without sending.
///
/// See the [cancellation contract](crate::signal) for how the current
/// controller changes across retries.
pub struct Fetch {
    slot: ControllerSlot,
    future: Pin<Box<dyn Future<Output = Result<Fetched>> + Send>>,
}

impl Fetch {
    pub(crate) fn start<T>(orchestrator: Orchestrator<T>) -> Self
    where
        T: Transport + 'static,
    {
        Self {
            slot: orchestrator.slot.clone(),
            future: Box::pin(orchestrator.run()),
        }
    }

    /// Snapshot of the controller governing the current attempt.
    pub fn controller(&self) -> AbortController {
        self.slot.current()
    }

    /// Shared view of the current controller that outlives borrows of the
    /// fetch, e.g. to abort from another task while this one awaits.
    pub fn controller_slot(&self) -> ControllerSlot {
        self.slot.clone()
    }

    /// Aborts the current attempt, which settles the fetch as aborted.
    pub fn abort(&self) {
        self.slot.current().abort();
    }
}

impl Future for Fetch {
    type Output = Result<Fetched>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl fmt::Debug for Fetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetch")
            .field("controller", &self.slot.current())
            .finish_non_exhaustive()
    }
}

/// What the cancellable part of an attempt produced.
enum Exchanged {
    Fetched(Fetched),
    /// Status failed validation; the body is still unread.
    Rejected(Response),
}

/// Everything one fetch needs, fixed before the first attempt.
pub(crate) struct Orchestrator<T> {
    pub(crate) transport: Arc<T>,
    pub(crate) request: RequestSpec,
    pub(crate) retry: Option<RetryConfig>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) validate_status: Option<ValidateStatus>,
    pub(crate) response_kind: Option<ResponseKind>,
    pub(crate) external: Option<AbortSignal>,
    pub(crate) slot: ControllerSlot,
}

impl<T: Transport> Orchestrator<T> {
    async fn run(self) -> Result<Fetched> {
        let mut backoff = Backoff::new(self.retry.clone());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            // The first attempt runs under the controller published at
            // construction; every later one gets a fresh controller.
            let controller = if attempt == 1 {
                self.slot.current()
            } else {
                let controller = AbortController::new();
                self.slot.publish(controller.clone());
                controller
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(attempt, method = %self.request.method, url = %self.request.url, "starting attempt");

            let error = match self.attempt(&controller).await {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::UserCancelled(origin) => {
                    return Err(self.settle(attempt, FetchError::Aborted { origin }))
                }
                AttemptOutcome::ValidationFailed(err) => {
                    return Err(self.settle(attempt, FetchError::Status(err)))
                }
                AttemptOutcome::DecodeFailed(err) => {
                    return Err(self.settle(attempt, FetchError::Transport(err)))
                }
                AttemptOutcome::AttemptTimedOut => FetchError::Timeout {
                    timeout_ms: self.timeout.map_or(0, |timeout| {
                        u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
                    }),
                },
                AttemptOutcome::TransportFailed(err) => FetchError::Transport(err),
            };

            match backoff.next_step(&error) {
                BackoffStep::GiveUp => return Err(self.settle(attempt, error)),
                BackoffStep::Wait(delay) => {
                    // The current controller stays published while waiting,
                    // so aborting it cuts the wait short.
                    if let Err(origin) =
                        wait_unless_aborted(delay, self.external.as_ref(), &controller).await
                    {
                        return Err(self.settle(attempt, FetchError::Aborted { origin }));
                    }
                }
            }
        }
    }

    /// Runs one attempt under a freshly composed signal.
    async fn attempt(&self, controller: &AbortController) -> AttemptOutcome {
        let signal = EffectiveSignal::compose(self.external.as_ref(), self.timeout, controller);
        if let Some(source) = signal.fired_source() {
            return classify(AttemptFailure::Aborted, Some(source));
        }

        let result = tokio::select! {
            biased;
            _ = signal.fired() => Err(AttemptFailure::Aborted),
            result = self.exchange(&signal) => result,
        };

        match result {
            Ok(Exchanged::Fetched(value)) => AttemptOutcome::Success(value),
            // The status is final from here on; only the diagnostic body read
            // remains, and cancelling it cannot turn the rejection into a retry.
            Ok(Exchanged::Rejected(response)) => {
                let rejection = self.rejection(response, &signal).await;
                classify(AttemptFailure::Rejected(Box::new(rejection)), None)
            }
            Err(failure) => classify(failure, signal.fired_source()),
        }
    }

    /// Send, validate, decode.
    async fn exchange(
        &self,
        signal: &EffectiveSignal,
    ) -> std::result::Result<Exchanged, AttemptFailure> {
        let response = self
            .transport
            .send(&self.request)
            .await
            .map_err(AttemptFailure::Transport)?;

        if let Some(rule) = &self.validate_status {
            let accepted = rule.accepts(response.status());
            // The rule may have aborted something as a side effect.
            if signal.fired_source().is_some() {
                return Err(AttemptFailure::Aborted);
            }
            if !accepted {
                return Ok(Exchanged::Rejected(response));
            }
        }

        match self.response_kind {
            Some(kind) if kind.decodes_body() => response
                .decode(kind)
                .await
                .map(|body| Exchanged::Fetched(Fetched::from_decoded(body)))
                .map_err(AttemptFailure::Undecodable),
            _ => Ok(Exchanged::Fetched(Fetched::Response(response))),
        }
    }

    /// Builds the validation error, decoding the body best-effort. The read
    /// is bounded by `signal`; if it fires first the error carries no body.
    async fn rejection(&self, response: Response, signal: &EffectiveSignal) -> StatusError {
        let status = response.status();
        let url = response.url().clone();
        let headers = response.headers().clone();

        let (body, response) = match self.response_kind {
            Some(kind) if kind.decodes_body() => {
                let read = tokio::select! {
                    biased;
                    source = signal.fired() => Err(source),
                    bytes = response.bytes() => Ok(bytes),
                };
                match read {
                    Ok(Ok(bytes)) => match DecodedBody::from_bytes(kind, &bytes) {
                        Ok(body) => (Some(body), None),
                        Err(_err) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%status, error = %_err, "diagnostic body not decodable");
                            let raw =
                                Response::from_parts(status, url.clone(), headers.clone(), bytes);
                            (None, Some(raw))
                        }
                    },
                    Ok(Err(_err)) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%status, error = %_err, "diagnostic body not readable");
                        (None, None)
                    }
                    Err(_source) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%status, source = %_source, "diagnostic body read cut short");
                        (None, None)
                    }
                }
            }
            _ => (None, Some(response)),
        };

        StatusError {
            status,
            code: StatusErrorCode::from_status(status),
            url,
            headers,
            body,
            response,
        }
    }

    fn settle(&self, _attempts: u32, error: FetchError) -> FetchError {
        #[cfg(feature = "tracing")]
        tracing::debug!(attempts = _attempts, url = %self.request.url, %error, "fetch failed");
        error
    }
}
