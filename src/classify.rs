//! Maps the failure of a single attempt to what the fetch does next.

use crate::{error::TransportError, AbortSource, Fetched, StatusError};

/// Why an attempt did not produce a value.
#[derive(Debug)]
pub(crate) enum AttemptFailure {
    /// The attempt was cut short by cancellation.
    Aborted,
    /// A response arrived but failed status validation.
    Rejected(Box<StatusError>),
    /// The transport call failed.
    Transport(TransportError),
    /// The response was fine but its body could not be decoded.
    Undecodable(TransportError),
}

/// Classified result of one attempt.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Success(Fetched),
    /// Terminal.
    UserCancelled(AbortSource),
    /// Retryable.
    AttemptTimedOut,
    /// Terminal.
    ValidationFailed(Box<StatusError>),
    /// Terminal; the body cannot be read twice.
    DecodeFailed(TransportError),
    /// Retryable.
    TransportFailed(TransportError),
}

/// Classifies a failed attempt. `fired` is the source, if any, that had fired
/// on the attempt's effective signal when the failure surfaced.
pub(crate) fn classify(failure: AttemptFailure, fired: Option<AbortSource>) -> AttemptOutcome {
    match failure {
        AttemptFailure::Aborted | AttemptFailure::Transport(TransportError::Aborted) => {
            match fired {
                Some(AbortSource::Timeout) => AttemptOutcome::AttemptTimedOut,
                Some(source @ (AbortSource::Signal | AbortSource::Controller)) => {
                    AttemptOutcome::UserCancelled(source)
                }
                None => AttemptOutcome::TransportFailed(TransportError::Aborted),
            }
        }
        AttemptFailure::Rejected(err) => AttemptOutcome::ValidationFailed(err),
        AttemptFailure::Undecodable(err) => AttemptOutcome::DecodeFailed(err),
        AttemptFailure::Transport(err) => AttemptOutcome::TransportFailed(err),
    }
}
