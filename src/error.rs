//! Rejection reasons produced by the engine itself.

use std::any::Any;
use std::fmt;
use std::time::Duration;

/// Errors the engine injects into a promise chain.
///
/// User code rejects with its own reason type; any type that can absorb an
/// [`Error`] (see [`Reason`]) can be used, and [`Error`] itself is the default.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A promise was resolved with itself, directly or through a chain of
    /// promises that leads back to it.
    #[error("chaining cycle detected for promise")]
    ChainingCycle,

    /// [`timeout`](crate::Promise::timeout) fired before the source settled.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// User code (an executor, callback, merge function, coroutine step or
    /// input iterator) panicked.
    #[error("panicked: {0}")]
    Panicked(String),

    /// A plain rejection message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Builds a [`Error::Message`] rejection.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    /// Returns `true` for [`Error::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Message(message.to_owned())
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Message(message)
    }
}

/// Rejection of [`any`](crate::Promise::any) when every input rejected.
///
/// `reasons` holds one entry per input, in input order. It is empty when
/// `any` was given no inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("all {} inputs rejected", .reasons.len())]
pub struct AggregateError<E> {
    /// Rejection reasons in input order.
    pub reasons: Vec<E>,
}

impl<E> AggregateError<E> {
    pub(crate) fn new(reasons: Vec<E>) -> Self {
        AggregateError { reasons }
    }
}

impl<E: From<Error>> From<Error> for AggregateError<E> {
    fn from(err: Error) -> Self {
        AggregateError::new(vec![E::from(err)])
    }
}

/// Bounds on a promise's fulfillment value.
///
/// Values are cloned once per subscriber and may cross threads.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

/// Bounds on a promise's rejection reason.
///
/// `From<Error>` lets the engine reject with cycle, timeout and panic errors;
/// `Debug` is what the rejection [`Reporter`](crate::Reporter) sees.
pub trait Reason: From<Error> + Clone + fmt::Debug + Send + Sync + 'static {}

impl<E: From<Error> + Clone + fmt::Debug + Send + Sync + 'static> Reason for E {}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
