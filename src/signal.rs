//! Cancellation primitives and per-attempt signal composition.
//!
//! An [`AbortController`] owns a one-shot "aborted" flag; its [`AbortSignal`]s
//! observe it. Every attempt gets a fresh controller, published through a
//! [`ControllerSlot`] so callers can reach the attempt that is in flight.
//!
//! # Cancellation contract
//!
//! The slot is reseated at the start of every attempt. A controller captured
//! during attempt `N` only governs attempt `N` (and the backoff wait that
//! follows it); once attempt `N + 1` starts, aborting the old controller has
//! no effect. Read the slot again, or use [`Fetch::abort`](crate::Fetch::abort),
//! to cancel whatever is current. Aborting after the fetch settled is a no-op.

use std::{fmt, future, sync::Arc};

use arc_swap::ArcSwap;
use tokio::{
    sync::watch,
    time::{sleep_until, Duration, Instant},
};

/// Identifies which cancellation source fired.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbortSource {
    /// The externally owned signal passed in the options.
    Signal,
    /// The controller of the attempt in flight.
    Controller,
    /// The per-attempt timeout.
    Timeout,
}

impl fmt::Display for AbortSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signal => "external signal",
            Self::Controller => "controller",
            Self::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

struct Shared {
    aborted: watch::Sender<bool>,
}

/// Handle that can cancel the work observing its signals.
#[derive(Clone)]
pub struct AbortController {
    shared: Arc<Shared>,
}

impl AbortController {
    pub fn new() -> Self {
        let (aborted, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared { aborted }),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn abort(&self) {
        self.shared.aborted.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.shared.aborted.borrow()
    }

    /// Returns a signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns `true` when both handles control the same flag.
    pub fn same_as(&self, other: &AbortController) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AbortController {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for AbortController {}

impl fmt::Debug for AbortController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortController")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Read side of an [`AbortController`].
#[derive(Clone)]
pub struct AbortSignal {
    shared: Arc<Shared>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.shared.aborted.borrow()
    }

    /// Completes once the controller has been aborted.
    pub async fn aborted(&self) {
        let mut rx = self.shared.aborted.subscribe();
        // The sender lives in `shared`, so the channel cannot close under us.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }

    /// Returns `true` when this signal belongs to `controller`.
    pub fn belongs_to(&self, controller: &AbortController) -> bool {
        Arc::ptr_eq(&self.shared, &controller.shared)
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Shared cell holding the controller of the current attempt.
///
/// Written only by the fetch driving the attempts; any number of clones may
/// take snapshots concurrently.
#[derive(Clone)]
pub struct ControllerSlot {
    current: Arc<ArcSwap<AbortController>>,
}

impl ControllerSlot {
    pub(crate) fn new(initial: AbortController) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Snapshot of the controller governing the current (or last) attempt.
    pub fn current(&self) -> AbortController {
        AbortController::clone(&self.current.load())
    }

    pub(crate) fn publish(&self, controller: AbortController) {
        self.current.store(Arc::new(controller));
    }
}

impl fmt::Debug for ControllerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ControllerSlot").field(&self.current()).finish()
    }
}

/// The merged signal governing a single attempt.
///
/// Holds no timer or listener of its own; they are created inside
/// [`EffectiveSignal::fired`] and dropped with that future.
pub(crate) struct EffectiveSignal {
    external: Option<AbortSignal>,
    controller: AbortSignal,
    deadline: Option<Instant>,
}

impl EffectiveSignal {
    pub(crate) fn compose(
        external: Option<&AbortSignal>,
        timeout: Option<Duration>,
        controller: &AbortController,
    ) -> Self {
        Self {
            external: external.cloned(),
            controller: controller.signal(),
            // A deadline past the clock's range never fires.
            deadline: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
        }
    }

    /// Non-blocking check. Caller sources win over the timeout.
    pub(crate) fn fired_source(&self) -> Option<AbortSource> {
        if self.external.as_ref().is_some_and(AbortSignal::is_aborted) {
            Some(AbortSource::Signal)
        } else if self.controller.is_aborted() {
            Some(AbortSource::Controller)
        } else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(AbortSource::Timeout)
        } else {
            None
        }
    }

    /// Completes with the first source that fires.
    pub(crate) async fn fired(&self) -> AbortSource {
        let external = async {
            match &self.external {
                Some(signal) => signal.aborted().await,
                None => future::pending().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = external => AbortSource::Signal,
            _ = self.controller.aborted() => AbortSource::Controller,
            _ = deadline => AbortSource::Timeout,
        }
    }
}

/// Waits for `delay` unless a caller source fires first.
pub(crate) async fn wait_unless_aborted(
    delay: Duration,
    external: Option<&AbortSignal>,
    controller: &AbortController,
) -> Result<(), AbortSource> {
    let signal = EffectiveSignal::compose(external, None, controller);
    if let Some(source) = signal.fired_source() {
        return Err(source);
    }

    tokio::select! {
        biased;
        source = signal.fired() => Err(source),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
