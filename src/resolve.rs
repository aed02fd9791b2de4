//! What a promise can be resolved with, and the capability to resolve one.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{panic_message, Error, Reason, Value};
use crate::handler::{Handler, PENDING};
use crate::Promise;

/// A foreign promise-like value.
///
/// The engine calls [`then`](Thenable::then) once, from a scheduled task,
/// and adopts whatever the thenable does with the resolver. Calling the
/// resolver more than once has no effect; panicking rejects.
///
/// # Example
/// ```
/// # use promissory::{Promise, Resolver, Thenable};
/// struct Ready(i32);
///
/// impl Thenable<i32, promissory::Error> for Ready {
///     fn then(self: Box<Self>, resolver: Resolver<i32, promissory::Error>) {
///         resolver.resolve(self.0);
///     }
/// }
///
/// let p: Promise<i32> = Promise::resolve_from(Box::new(Ready(4)) as Box<dyn Thenable<_, _>>);
/// assert_eq!(p.wait(), Ok(4));
/// ```
pub trait Thenable<T, E>: Send + 'static {
    /// Settles `resolver` now or later.
    fn then(self: Box<Self>, resolver: Resolver<T, E>);
}

/// The outcome a callback hands back to the engine.
///
/// A `Fulfill` or `Reject` settles directly. An `Adopt` or `Thenable` makes
/// the receiving promise wait for that value and settle the same way.
pub enum Resolution<T, E> {
    /// Fulfill with a plain value.
    Fulfill(T),
    /// Reject with a reason.
    Reject(E),
    /// Follow another promise.
    Adopt(Promise<T, E>),
    /// Follow a foreign promise-like value.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Fulfill(_) => f.write_str("Resolution::Fulfill(..)"),
            Resolution::Reject(_) => f.write_str("Resolution::Reject(..)"),
            Resolution::Adopt(_) => f.write_str("Resolution::Adopt(..)"),
            Resolution::Thenable(_) => f.write_str("Resolution::Thenable(..)"),
        }
    }
}

/// Conversion into a [`Resolution`].
///
/// Callbacks and combinator inputs accept anything implementing this:
/// `Result<T, E>`, `Promise<T, E>`, a boxed [`Thenable`], or a
/// `Resolution` itself.
pub trait IntoResolution {
    /// Fulfillment type.
    type Value;
    /// Rejection type.
    type Reason;

    /// Performs the conversion.
    fn into_resolution(self) -> Resolution<Self::Value, Self::Reason>;
}

impl<T, E> IntoResolution for Resolution<T, E> {
    type Value = T;
    type Reason = E;

    fn into_resolution(self) -> Resolution<T, E> {
        self
    }
}

impl<T, E> IntoResolution for Result<T, E> {
    type Value = T;
    type Reason = E;

    fn into_resolution(self) -> Resolution<T, E> {
        match self {
            Ok(value) => Resolution::Fulfill(value),
            Err(reason) => Resolution::Reject(reason),
        }
    }
}

impl<T, E> IntoResolution for Promise<T, E> {
    type Value = T;
    type Reason = E;

    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Adopt(self)
    }
}

impl<T, E> IntoResolution for Box<dyn Thenable<T, E>> {
    type Value = T;
    type Reason = E;

    fn into_resolution(self) -> Resolution<T, E> {
        Resolution::Thenable(self)
    }
}

/// Settles the pending promise it was created for.
///
/// Only the first `resolve`/`reject`/`resolve_with`/`settle` takes effect;
/// the rest return `false`. Resolvers can be cloned and sent to other
/// threads.
pub struct Resolver<T, E> {
    handler: Handler<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Resolver {
            handler: self.handler.clone(),
        }
    }
}

impl<T: Value, E: Reason> Resolver<T, E> {
    pub(crate) fn new(handler: Handler<T, E>) -> Self {
        Resolver { handler }
    }

    /// Fulfills with `value`.
    pub fn resolve(&self, value: T) -> bool {
        self.handler.fulfill(value)
    }

    /// Rejects with `reason`.
    pub fn reject(&self, reason: E) -> bool {
        self.handler.reject(reason)
    }

    /// Follows `promise`: settles however it settles.
    ///
    /// Following the promise this resolver belongs to, directly or through
    /// other promises, rejects with [`Error::ChainingCycle`].
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise};
    /// let (p, resolver) = Promise::<i32>::pending();
    /// resolver.resolve_with(p.clone());
    /// assert_eq!(p.wait(), Err(Error::ChainingCycle));
    /// ```
    pub fn resolve_with(&self, promise: Promise<T, E>) -> bool {
        self.handler.forward(promise.handler())
    }

    /// Settles with anything convertible to a [`Resolution`].
    pub fn settle<R>(&self, resolution: R) -> bool
    where
        R: IntoResolution<Value = T, Reason = E>,
    {
        self.handler.resolve(resolution.into_resolution())
    }

    /// Returns `true` once this resolver's promise has left the pending state.
    pub fn is_settled(&self) -> bool {
        self.handler.state() & PENDING == 0
    }
}

/// Runs user code, turning a panic into a rejection.
pub(crate) fn guarded<R>(f: impl FnOnce() -> R) -> Resolution<R::Value, R::Reason>
where
    R: IntoResolution,
    R::Reason: From<Error>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(resolution) => resolution.into_resolution(),
        Err(payload) => Resolution::Reject(Error::Panicked(panic_message(payload)).into()),
    }
}

pub(crate) fn call_thenable<T: Value, E: Reason>(thenable: Box<dyn Thenable<T, E>>, target: Handler<T, E>) {
    let resolver = Resolver::new(target.clone());
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || thenable.then(resolver))) {
        target.reject(E::from(Error::Panicked(panic_message(payload))));
    }
}
