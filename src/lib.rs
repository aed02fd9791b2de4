#![doc(html_root_url = "https://docs.rs/promissory/0.1.0")]
//!
//! # Settle-once promises for Rust
//!
//! This crate provides a promise engine: a value standing for the eventual result of an asynchronous computation,
//! the standard combinators over such values, and a FIFO microtask scheduler that fixes the order in which reactions run.
//!
//! ## Features
//! - Promises settle exactly once; later resolution attempts are ignored
//! - A promise resolved with another promise follows it, with forwarding chains flattened on access
//! - Reactions never run inside the call that registered them
//! - Combinators: [`Promise::all`], [`Promise::race`], [`Promise::any`], [`Promise::settle`], [`Promise::merge`]
//! - Time: [`Promise::delay`] and [`Promise::timeout`]
//! - Unhandled rejections are detected once per turn and reported through a pluggable [`Reporter`]
//! - Adapters for callback-style functions ([`denodeify`]) and coroutines ([`co`])
//!
//! ## Example
//! ```
//! use promissory::Promise;
//! let p: Promise<i32> = Promise::resolve(2);
//! let p = p
//!     .then(|res| res.map(|v| v * 10))
//!     .then(|res| res.map(|v| v + 5));
//! assert_eq!(p.wait(), Ok(25));
//! ```
//!
//! ## Scheduling
//! Reactions are queued on a [`Scheduler`]. Each thread has a current one; it is drained by
//! [`Promise::wait`] or [`Scheduler::run_until_stalled`].
//!
//! ## Error Handling
//! Rejections carry any type implementing [`Reason`]; [`Error`] is the default. Panics in user code
//! (executors, callbacks, coroutine steps) reject with [`Error::Panicked`].
//!
//! ---
//!
//! Released under the MIT License.

#![warn(missing_docs)]

#[cfg(test)]
mod tests;

mod adapter;
mod combinator;
mod error;
mod handler;
mod resolve;
mod scheduler;
mod then;
mod time;
mod tracker;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub use adapter::{co, denodeify, Callback, Coroutine, Resume, Step};
pub use combinator::Settlement;
pub use error::{AggregateError, Error, Reason, Value};
pub use handler::RejectionId;
pub use resolve::{IntoResolution, Resolution, Resolver, Thenable};
pub use scheduler::{Builder, Scheduler};
pub use tracker::{install, RejectionEvent, RejectionKind, Reporter, TracingReporter};

use error::panic_message;
use handler::{Handler, FULFILLED, HANDLED, PENDING, REJECTED};
use then::{Finally, Notify, Then, ThenWith};

/// Snapshot of a promise's settlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Not settled yet.
    Pending,
    /// Fulfilled with a value.
    Fulfilled,
    /// Rejected; `handled` once a rejection reaction has observed it.
    Rejected {
        /// Whether a reaction has observed the rejection.
        handled: bool,
    },
}

impl State {
    fn from_bits(bits: u8) -> Self {
        if bits & PENDING != 0 {
            State::Pending
        } else if bits & FULFILLED != 0 {
            State::Fulfilled
        } else {
            debug_assert!(bits & REJECTED != 0);
            State::Rejected {
                handled: bits & HANDLED != 0,
            }
        }
    }
}

/// A promise is the eventual outcome of an asynchronous computation: pending at first, then fulfilled
/// with a `T` or rejected with an `E`, permanently.
///
/// A [`Promise`] is a cheap handle. Cloning it gives another handle to the same outcome, and every handle
/// can be subscribed to with [`then`](Self::then) and friends as often as needed.
///
/// # States
/// Promises are pending, fulfilled or rejected (see [`state`](Self::state)). To use the outcome, attach a
/// reaction (e.g. via [`then`](Self::then)) or block on it with [`wait`](Self::wait).
///
/// # Ordering
/// Reactions run from the promise's [`Scheduler`], never inside the call that registered them, and reactions
/// registered on the same promise run in registration order.
///
/// # Error Handling
/// Rejections skip [`map`](Self::map) steps until a reaction that looks at the reason, such as
/// [`then`](Self::then), [`catch`](Self::catch) or [`map_err`](Self::map_err), handles them. A rejection that
/// nothing observes within one scheduler turn is reported to the scheduler's [`Reporter`].
pub struct Promise<T, E = Error> {
    handler: Handler<T, E>,
    scheduler: Scheduler,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            handler: self.handler.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<T, E> Promise<T, E> {
    pub(crate) fn handler(&self) -> &Handler<T, E> {
        &self.handler
    }

    /// The scheduler this promise's reactions run on.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl<T: Value, E: Reason> Promise<T, E> {
    fn from_parts(handler: Handler<T, E>, scheduler: Scheduler) -> Self {
        Promise { handler, scheduler }
    }

    /// Creates a promise and runs `executor` immediately with its [`Resolver`].
    ///
    /// The executor may settle the promise right away, keep the resolver for later, or hand it to another thread.
    /// If the executor panics, the promise rejects with [`Error::Panicked`].
    ///
    /// # Examples
    /// ## Settling immediately:
    /// ```
    /// # use promissory::Promise;
    /// let p: Promise<i32> = Promise::new(|resolver| {
    ///     resolver.resolve(42);
    /// });
    /// assert_eq!(p.wait(), Ok(42));
    /// ```
    ///
    /// ## Settling from another thread:
    /// ```
    /// # use promissory::Promise;
    /// # use std::thread;
    /// let p: Promise<&str> = Promise::new(|resolver| {
    ///     thread::spawn(move || resolver.resolve("done"));
    /// });
    /// assert_eq!(p.wait(), Ok("done"));
    /// ```
    ///
    /// ## Panicking executor:
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<()> = Promise::new(|_| panic!("boom"));
    /// assert_eq!(p.wait(), Err(Error::Panicked("boom".into())));
    /// ```
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let (promise, resolver) = Self::pending();
        let fallback = resolver.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || executor(resolver))) {
            fallback.reject(E::from(Error::Panicked(panic_message(payload))));
        }
        promise
    }

    /// Creates a pending promise together with the [`Resolver`] that settles it.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// let (p, resolver) = Promise::<i32>::pending();
    /// assert!(p.is_pending());
    /// resolver.resolve(1);
    /// assert!(!resolver.resolve(2));
    /// assert_eq!(p.wait(), Ok(1));
    /// ```
    pub fn pending() -> (Self, Resolver<T, E>) {
        let scheduler = Scheduler::current();
        let handler = Handler::deferred(&scheduler);
        let resolver = Resolver::new(handler.clone());
        (Self::from_parts(handler, scheduler), resolver)
    }

    /// Spawns a new promise that executes the given function in a background thread.
    ///
    /// The function should return a `Result<T, E>`. The promise settles with this result, or rejects with
    /// [`Error::Panicked`] if the function panics.
    ///
    /// # Examples
    /// ## Basic usage:
    /// ```
    /// # use promissory::Promise;
    /// let p: Promise<i32> = Promise::spawn(|| Ok(42));
    /// assert_eq!(p.wait(), Ok(42));
    /// ```
    ///
    /// ## With error:
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<()> = Promise::spawn(|| Err(Error::msg("fail")));
    /// assert_eq!(p.wait(), Err(Error::msg("fail")));
    /// ```
    pub fn spawn<F>(func: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let (promise, resolver) = Self::pending();
        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(func))
                .unwrap_or_else(|payload| Err(E::from(Error::Panicked(panic_message(payload)))));
            resolver.settle(result);
        });
        promise
    }

    /// Creates a promise that is already fulfilled with the given value.
    ///
    /// Reactions to it still run from the scheduler, not inside [`then`](Self::then).
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// let p: Promise<i32> = Promise::resolve(123);
    /// assert_eq!(p.wait(), Ok(123));
    /// ```
    pub fn resolve(value: T) -> Self {
        let scheduler = Scheduler::current();
        let handler = Handler::async_of(Handler::fulfilled(value), &scheduler);
        Self::from_parts(handler, scheduler)
    }

    /// Creates a promise that is already rejected with the given reason.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<()> = Promise::reject(Error::msg("fail"));
    /// assert_eq!(p.wait(), Err(Error::msg("fail")));
    /// ```
    pub fn reject(reason: E) -> Self {
        let scheduler = Scheduler::current();
        let handler = Handler::async_of(Handler::rejected(reason, &scheduler), &scheduler);
        Self::from_parts(handler, scheduler)
    }

    /// Creates a promise that is already settled with the given result.
    ///
    /// # Examples
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::from_result(Ok(1));
    /// assert_eq!(p.wait(), Ok(1));
    /// let p: Promise<()> = Promise::from_result(Err(Error::msg("fail")));
    /// assert_eq!(p.wait(), Err(Error::msg("fail")));
    /// ```
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::resolve(value),
            Err(reason) => Self::reject(reason),
        }
    }

    /// Creates a promise that settles like `resolution`.
    ///
    /// A promise is returned as is, so `resolve_from(p)` settles exactly like `p`; a [`Thenable`] is adopted.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// let inner: Promise<i32> = Promise::resolve(5);
    /// let outer = Promise::resolve_from(inner);
    /// assert_eq!(outer.wait(), Ok(5));
    /// ```
    pub fn resolve_from<R>(resolution: R) -> Self
    where
        R: IntoResolution<Value = T, Reason = E>,
    {
        match resolution.into_resolution() {
            Resolution::Fulfill(value) => Self::resolve(value),
            Resolution::Reject(reason) => Self::reject(reason),
            Resolution::Adopt(promise) => promise,
            thenable @ Resolution::Thenable(_) => {
                let (promise, resolver) = Self::pending();
                resolver.settle(thenable);
                promise
            }
        }
    }

    /// Creates a promise that never settles.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// # use std::time::Duration;
    /// let p: Promise<i32> = Promise::never();
    /// assert_eq!(p.wait_timeout(Duration::from_millis(10)), None);
    /// ```
    pub fn never() -> Self {
        Self::from_parts(Handler::never(), Scheduler::current())
    }

    /// Returns a snapshot of this promise's state.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Promise, State};
    /// let (p, resolver) = Promise::<i32>::pending();
    /// assert_eq!(p.state(), State::Pending);
    /// resolver.resolve(1);
    /// assert_eq!(p.state(), State::Fulfilled);
    /// ```
    pub fn state(&self) -> State {
        State::from_bits(self.handler.state())
    }

    /// Returns `true` if this promise has not settled yet.
    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// Returns `true` if this promise fulfilled.
    pub fn is_fulfilled(&self) -> bool {
        self.state() == State::Fulfilled
    }

    /// Returns `true` if this promise rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self.state(), State::Rejected { .. })
    }

    /// Drives this promise's scheduler until the promise settles, then returns its outcome.
    ///
    /// Waiting observes a rejection, so a rejection returned here is never reported as unhandled.
    ///
    /// # Panics
    /// Panics if the promise can provably never settle (it follows [`never`](Self::never)). A promise that is
    /// merely never resolved blocks forever; use [`wait_timeout`](Self::wait_timeout) if that can happen.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::resolve(1);
    /// assert_eq!(p.wait(), Ok(1));
    /// let p2: Promise<()> = Promise::reject(Error::msg("fail"));
    /// assert_eq!(p2.wait(), Err(Error::msg("fail")));
    /// ```
    pub fn wait(self) -> Result<T, E> {
        match self.drive(None) {
            Some(result) => result,
            None => panic!("waited on a promise that can never settle"),
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` and returns `None`.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// # use std::time::Duration;
    /// let (p, _resolver) = Promise::<i32>::pending();
    /// assert_eq!(p.wait_timeout(Duration::from_millis(10)), None);
    /// ```
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<T, E>> {
        self.drive(Some(Instant::now() + timeout))
    }

    fn drive(self, deadline: Option<Instant>) -> Option<Result<T, E>> {
        let (tx, rx) = oneshot::channel();
        self.handler.when(Box::new(Notify::new(tx)));
        loop {
            self.scheduler.run_until_stalled();
            match rx.try_recv() {
                Ok(result) => return Some(result),
                Err(oneshot::TryRecvError::Disconnected) => return None,
                Err(oneshot::TryRecvError::Empty) => {}
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return None;
            }
            self.scheduler.park(deadline);
        }
    }

    /// Chains a function to be called after this promise settles, returning a new promise.
    ///
    /// The callback receives the `Result` of this promise and returns anything convertible to a
    /// [`Resolution`]: a new `Result`, or another [`Promise`] to follow. This allows for both value and
    /// error transformation. A panic in the callback rejects the new promise.
    ///
    /// # Examples
    /// ## Chaining and transforming values:
    /// ```
    /// # use promissory::Promise;
    /// let p: Promise<i32> = Promise::resolve(2);
    /// let p = p
    ///     .then(|res| res.map(|v| v * 10))
    ///     .then(|res| res.map(|v| v + 5));
    /// assert_eq!(p.wait(), Ok(25));
    /// ```
    ///
    /// ## Propagating errors:
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::reject(Error::msg("fail"));
    /// let p = p.then(|res| res.map(|v| v + 1));
    /// assert_eq!(p.wait(), Err(Error::msg("fail")));
    /// ```
    ///
    /// ## Returning a promise:
    /// ```
    /// # use promissory::Promise;
    /// let p: Promise<i32> = Promise::resolve(3);
    /// let p = p.then(|res| Promise::from_result(res.map(|v| v * 3)));
    /// assert_eq!(p.wait(), Ok(9));
    /// ```
    pub fn then<F, R>(&self, callback: F) -> Promise<R::Value, R::Reason>
    where
        F: FnOnce(Result<T, E>) -> R + Send + 'static,
        R: IntoResolution,
        R::Value: Value,
        R::Reason: Reason,
    {
        let output = Handler::deferred(&self.scheduler);
        self.handler.when(Box::new(Then::new(callback, output.clone())));
        Promise::from_parts(output, self.scheduler.clone())
    }

    /// Chains separate, optional reactions for fulfillment and rejection.
    ///
    /// A missing reaction passes that outcome through unchanged. If this promise has already settled and the
    /// reaction for its outcome is missing, the same promise is returned without subscribing anything.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::reject(Error::msg("fail"));
    /// let p = p.then_with(Some(|v: i32| Ok(v + 1)), Some(|_: Error| Ok(0)));
    /// assert_eq!(p.wait(), Ok(0));
    /// ```
    pub fn then_with<F, G, R1, R2>(&self, on_fulfilled: Option<F>, on_rejected: Option<G>) -> Promise<T, E>
    where
        F: FnOnce(T) -> R1 + Send + 'static,
        G: FnOnce(E) -> R2 + Send + 'static,
        R1: IntoResolution<Value = T, Reason = E>,
        R2: IntoResolution<Value = T, Reason = E>,
    {
        let state = self.handler.state();
        if (state & FULFILLED != 0 && on_fulfilled.is_none()) || (state & REJECTED != 0 && on_rejected.is_none()) {
            return self.clone();
        }
        let output = Handler::deferred(&self.scheduler);
        self.handler
            .when(Box::new(ThenWith::new(on_fulfilled, on_rejected, output.clone())));
        Promise::from_parts(output, self.scheduler.clone())
    }

    /// Maps the success value of this promise using the provided callback, returning a new promise.
    ///
    /// This is a convenience wrapper over [`then`](Self::then) for transforming only the `Ok` value.
    /// Errors are passed through unchanged.
    ///
    /// # Examples
    /// ## Basic mapping:
    /// ```
    /// # use promissory::Promise;
    /// let p: Promise<i32> = Promise::resolve(3);
    /// assert_eq!(p.map(|v| Ok(v * 2)).wait(), Ok(6));
    /// ```
    ///
    /// ## Chaining with error propagation:
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::resolve(1);
    /// let p = p
    ///     .map(|v| Ok(v + 1))
    ///     .map(|v| if v > 1 { Err(Error::msg("too big")) } else { Ok(v) });
    /// assert_eq!(p.wait(), Err(Error::msg("too big")));
    /// ```
    ///
    /// ## Mapping after an error (will not run):
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::reject(Error::msg("fail"));
    /// assert_eq!(p.map(|v| Ok(v + 1)).wait(), Err(Error::msg("fail")));
    /// ```
    pub fn map<F, R>(&self, callback: F) -> Promise<R::Value, E>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoResolution<Reason = E>,
        R::Value: Value,
    {
        self.then(move |res| match res {
            Ok(ok) => callback(ok).into_resolution(),
            Err(err) => Resolution::Reject(err),
        })
    }

    /// Maps the error value of this promise using the provided callback, returning a new promise.
    ///
    /// This is a convenience wrapper over [`then`](Self::then) for transforming only the `Err` value.
    /// Success values are passed through unchanged.
    ///
    /// # Examples
    /// ## Basic error mapping:
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<()> = Promise::reject(Error::msg("fail"));
    /// let p = p.map_err(|e| Err(Error::msg(format!("Promise failed: {}", e))));
    /// assert_eq!(p.wait(), Err(Error::msg("Promise failed: fail")));
    /// ```
    ///
    /// ## Error mapping after a successful value (will not run):
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::resolve(5);
    /// let p = p.map_err(|e| Err(Error::msg(format!("err: {}", e))));
    /// assert_eq!(p.wait(), Ok(5));
    /// ```
    pub fn map_err<F, R>(&self, errback: F) -> Promise<T, R::Reason>
    where
        F: FnOnce(E) -> R + Send + 'static,
        R: IntoResolution<Value = T>,
        R::Reason: Reason,
    {
        self.then(move |res| match res {
            Ok(ok) => Resolution::Fulfill(ok),
            Err(err) => errback(err).into_resolution(),
        })
    }

    /// Recovers from a rejection. Fulfillments pass through unchanged.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise};
    /// let p: Promise<i32> = Promise::reject(Error::msg("fail"));
    /// assert_eq!(p.catch(|_| Ok(0)).wait(), Ok(0));
    /// ```
    pub fn catch<F, R>(&self, on_rejected: F) -> Promise<T, E>
    where
        F: FnOnce(E) -> R + Send + 'static,
        R: IntoResolution<Value = T, Reason = E>,
    {
        self.then_with(None::<fn(T) -> Result<T, E>>, Some(on_rejected))
    }

    /// Runs `callback` once this promise settles either way, then settles like this promise.
    ///
    /// If `callback` panics, the new promise rejects with [`Error::Panicked`] instead.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise};
    /// # use std::sync::atomic::{AtomicBool, Ordering};
    /// # use std::sync::Arc;
    /// let ran = Arc::new(AtomicBool::new(false));
    /// let flag = ran.clone();
    /// let p: Promise<i32> = Promise::reject(Error::msg("fail"));
    /// let p = p.finally(move || flag.store(true, Ordering::SeqCst));
    /// assert_eq!(p.wait(), Err(Error::msg("fail")));
    /// assert!(ran.load(Ordering::SeqCst));
    /// ```
    pub fn finally<F>(&self, callback: F) -> Promise<T, E>
    where
        F: FnOnce() + Send + 'static,
    {
        let output = Handler::deferred(&self.scheduler);
        self.handler.when(Box::new(Finally::new(callback, output.clone())));
        Promise::from_parts(output, self.scheduler.clone())
    }

    /// Looks at the fulfillment value without changing it.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// # use std::sync::atomic::{AtomicI32, Ordering};
    /// # use std::sync::Arc;
    /// let seen = Arc::new(AtomicI32::new(0));
    /// let s = seen.clone();
    /// let p: Promise<i32> = Promise::resolve(7);
    /// assert_eq!(p.tap(move |v| s.store(*v, Ordering::SeqCst)).wait(), Ok(7));
    /// assert_eq!(seen.load(Ordering::SeqCst), 7);
    /// ```
    pub fn tap<F>(&self, callback: F) -> Promise<T, E>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.then_with(
            Some(move |value: T| {
                callback(&value);
                Ok::<T, E>(value)
            }),
            None::<fn(E) -> Result<T, E>>,
        )
    }

    /// Settles like this promise, but no sooner than `duration` from now.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// # use std::time::{Duration, Instant};
    /// let start = Instant::now();
    /// let p: Promise<&str> = Promise::resolve("late");
    /// assert_eq!(p.delay(Duration::from_millis(20)).wait(), Ok("late"));
    /// assert!(start.elapsed() >= Duration::from_millis(20));
    /// ```
    pub fn delay(&self, duration: Duration) -> Promise<T, E> {
        let output = Handler::deferred(&self.scheduler);
        self.handler.when(Box::new(time::Delay::new(
            output.clone(),
            self.scheduler.clone(),
            duration,
        )));
        Promise::from_parts(output, self.scheduler.clone())
    }

    /// Settles like this promise if it settles within `duration`, otherwise rejects with
    /// [`Error::Timeout`].
    ///
    /// A settlement arriving after the timeout is ignored and never reported as unhandled.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise};
    /// # use std::time::Duration;
    /// let p: Promise<i32> = Promise::never();
    /// let p = p.timeout(Duration::from_millis(10));
    /// assert_eq!(p.wait(), Err(Error::Timeout(Duration::from_millis(10))));
    /// ```
    pub fn timeout(&self, duration: Duration) -> Promise<T, E> {
        let output = Handler::deferred(&self.scheduler);
        self.handler.when(Box::new(time::Timeout::start(
            output.clone(),
            self.scheduler.clone(),
            duration,
        )));
        Promise::from_parts(output, self.scheduler.clone())
    }

    /// Returns a promise that fulfills with every input's value, in input order, or rejects with the first
    /// rejection.
    ///
    /// Inputs may be promises or plain `Result`s. Inputs still pending after a rejection are observed, so their
    /// own rejections are not reported as unhandled.
    ///
    /// # Examples
    /// ## All succeed:
    /// ```
    /// # use promissory::Promise;
    /// let ps: Vec<Promise<i32>> = (0..3).map(Promise::resolve).collect();
    /// assert_eq!(Promise::all(ps).wait(), Ok(vec![0, 1, 2]));
    /// ```
    ///
    /// ## With an error:
    /// ```
    /// # use promissory::{Error, Promise};
    /// let ps: Vec<Promise<i32>> = vec![
    ///     Promise::resolve(1),
    ///     Promise::reject(Error::msg("fail")),
    ///     Promise::resolve(3),
    /// ];
    /// assert_eq!(Promise::all(ps).wait(), Err(Error::msg("fail")));
    /// ```
    ///
    /// ## Empty input:
    /// ```
    /// # use promissory::Promise;
    /// let all = Promise::<i32>::all(Vec::<Promise<i32>>::new());
    /// assert_eq!(all.wait(), Ok(vec![]));
    /// ```
    pub fn all<I>(inputs: I) -> Promise<Vec<T>, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Reason = E>,
    {
        let scheduler = Scheduler::current();
        match collect(inputs) {
            Ok(inputs) => Promise::from_parts(combinator::all(inputs, &scheduler), scheduler),
            Err(err) => Promise::reject(E::from(err)),
        }
    }

    /// Returns a promise that settles like the first input to settle.
    ///
    /// Already-settled inputs win in input order. With no inputs the result never settles.
    ///
    /// # Examples
    /// ## Basic race:
    /// ```
    /// # use promissory::Promise;
    /// # use std::time::Duration;
    /// let slow: Promise<i32> = Promise::resolve(1).delay(Duration::from_millis(50));
    /// let fast: Promise<i32> = Promise::resolve(2).delay(Duration::from_millis(5));
    /// assert_eq!(Promise::race(vec![slow, fast]).wait(), Ok(2));
    /// ```
    ///
    /// ## Race with error:
    /// ```
    /// # use promissory::{Error, Promise};
    /// # use std::time::Duration;
    /// let slow: Promise<()> = Promise::resolve(()).delay(Duration::from_millis(50));
    /// let failed: Promise<()> = Promise::reject(Error::msg("fail"));
    /// assert_eq!(Promise::race(vec![slow, failed]).wait(), Err(Error::msg("fail")));
    /// ```
    ///
    /// ## Empty race:
    /// ```
    /// # use promissory::Promise;
    /// # use std::time::Duration;
    /// let p = Promise::<i32>::race(Vec::<Promise<i32>>::new());
    /// assert_eq!(p.wait_timeout(Duration::from_millis(10)), None);
    /// ```
    pub fn race<I>(inputs: I) -> Promise<T, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Reason = E>,
    {
        let scheduler = Scheduler::current();
        match collect(inputs) {
            Ok(inputs) => Promise::from_parts(combinator::race(inputs, &scheduler), scheduler),
            Err(err) => Promise::reject(E::from(err)),
        }
    }

    /// Returns a promise that fulfills with the first input to fulfill, or rejects with an
    /// [`AggregateError`] holding every reason in input order once all inputs rejected.
    ///
    /// With no inputs the result rejects immediately with no reasons.
    ///
    /// # Example
    /// ```
    /// # use promissory::{AggregateError, Error, Promise};
    /// let ps: Vec<Promise<i32>> = vec![Promise::reject(Error::msg("a")), Promise::resolve(2)];
    /// assert_eq!(Promise::any(ps).wait(), Ok(2));
    ///
    /// let ps: Vec<Promise<i32>> = vec![Promise::reject(Error::msg("a")), Promise::reject(Error::msg("b"))];
    /// assert_eq!(
    ///     Promise::any(ps).wait(),
    ///     Err(AggregateError { reasons: vec![Error::msg("a"), Error::msg("b")] })
    /// );
    /// ```
    pub fn any<I>(inputs: I) -> Promise<T, AggregateError<E>>
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Reason = E>,
    {
        let scheduler = Scheduler::current();
        match collect(inputs) {
            Ok(inputs) => Promise::from_parts(combinator::any(inputs, &scheduler), scheduler),
            Err(err) => Promise::reject(AggregateError::from(err)),
        }
    }

    /// Returns a promise that fulfills with every input's [`Settlement`], in input order. It never rejects.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Error, Promise, Settlement};
    /// let ps: Vec<Promise<i32>> = vec![Promise::resolve(1), Promise::reject(Error::msg("e"))];
    /// assert_eq!(
    ///     Promise::settle(ps).wait(),
    ///     Ok(vec![Settlement::Fulfilled(1), Settlement::Rejected(Error::msg("e"))])
    /// );
    /// ```
    pub fn settle<I>(inputs: I) -> Promise<Vec<Settlement<T, E>>, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Reason = E>,
    {
        let scheduler = Scheduler::current();
        match collect(inputs) {
            Ok(inputs) => Promise::from_parts(combinator::settle(inputs, &scheduler), scheduler),
            Err(err) => Promise::resolve(vec![Settlement::Rejected(E::from(err))]),
        }
    }

    /// Waits for every input like [`all`](Self::all), then applies `f` to the values.
    ///
    /// `f` may return a `Result` or another promise to follow; a panic in `f` rejects.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// let ps: Vec<Promise<i32>> = vec![Promise::resolve(1), Promise::resolve(2)];
    /// let sum = Promise::merge(|values: Vec<i32>| Ok(values.iter().sum::<i32>()), ps);
    /// assert_eq!(sum.wait(), Ok(3));
    /// ```
    pub fn merge<I, F, R>(f: F, inputs: I) -> Promise<R::Value, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Reason = E>,
        F: FnOnce(Vec<T>) -> R + Send + 'static,
        R: IntoResolution<Reason = E>,
        R::Value: Value,
    {
        Promise::all(inputs).map(f)
    }

    /// Turns `f` into a function over promises: each call [`merge`](Self::merge)s its inputs into `f`.
    ///
    /// # Example
    /// ```
    /// # use promissory::Promise;
    /// let product = Promise::<i32>::lift(|values: Vec<i32>| Ok(values.iter().product::<i32>()));
    /// let ps: Vec<Promise<i32>> = vec![Promise::resolve(2), Promise::resolve(3)];
    /// assert_eq!(product(ps).wait(), Ok(6));
    /// ```
    pub fn lift<I, F, R>(f: F) -> impl Fn(I) -> Promise<R::Value, E>
    where
        I: IntoIterator,
        I::Item: IntoResolution<Value = T, Reason = E>,
        F: Fn(Vec<T>) -> R + Send + Sync + 'static,
        R: IntoResolution<Reason = E>,
        R::Value: Value,
    {
        let f = Arc::new(f);
        move |inputs| {
            let f = Arc::clone(&f);
            Promise::merge(move |values| f(values), inputs)
        }
    }
}

/// Drains the input iterator, turning a panic inside it into an error.
fn collect<I, T, E>(inputs: I) -> Result<Vec<Resolution<T, E>>, Error>
where
    I: IntoIterator,
    I::Item: IntoResolution<Value = T, Reason = E>,
{
    panic::catch_unwind(AssertUnwindSafe(|| {
        inputs
            .into_iter()
            .map(IntoResolution::into_resolution)
            .collect::<Vec<_>>()
    }))
    .map_err(|payload| Error::Panicked(panic_message(payload)))
}

impl<T: Value, E: Reason> From<Result<T, E>> for Promise<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Promise::from_result(result)
    }
}

impl<T: Value, E: Reason> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("scheduler", &self.scheduler.name())
            .finish()
    }
}

