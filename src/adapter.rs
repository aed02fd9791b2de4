//! Adapters that build promises out of other asynchronous shapes.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::{panic_message, Error, Reason, Value};
use crate::resolve::{IntoResolution, Resolution};
use crate::Promise;

/// Completion callback handed to a [`denodeify`]d function.
pub type Callback<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

/// Adapts a function that reports completion through a callback into one
/// that returns a [`Promise`].
///
/// The callback may be called from any thread. A panic in `f` rejects the
/// promise; never calling the callback leaves it pending.
///
/// # Example
/// ```
/// # use promissory::{denodeify, Callback, Error, Promise};
/// let read_len = denodeify(|path: &'static str, done: Callback<usize, Error>| {
///     done(if path.is_empty() { Err(Error::msg("empty path")) } else { Ok(path.len()) })
/// });
/// assert_eq!(read_len("/etc/hosts").wait(), Ok(10));
/// assert_eq!(read_len("").wait(), Err(Error::msg("empty path")));
/// ```
pub fn denodeify<A, T, E, F>(f: F) -> impl Fn(A) -> Promise<T, E>
where
    T: Value,
    E: Reason,
    F: Fn(A, Callback<T, E>) + Send + Sync + 'static,
{
    let f = Arc::new(f);
    move |args| {
        let f = Arc::clone(&f);
        Promise::new(move |resolver| {
            f(args, Box::new(move |result| {
                resolver.settle(result);
            }))
        })
    }
}

/// What a coroutine is resumed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume<Y, E> {
    /// First resumption.
    Start,
    /// The last yielded promise fulfilled with this value.
    Value(Y),
    /// The last yielded promise rejected with this reason.
    Error(E),
}

impl<Y, E> From<Result<Y, E>> for Resume<Y, E> {
    fn from(result: Result<Y, E>) -> Self {
        match result {
            Ok(value) => Resume::Value(value),
            Err(reason) => Resume::Error(reason),
        }
    }
}

/// What a coroutine does when resumed.
pub enum Step<Y, T, E> {
    /// Suspend until this promise settles.
    Yield(Promise<Y, E>),
    /// Finish; the coroutine's promise resolves with this.
    Return(Resolution<T, E>),
}

impl<Y, T, E> Step<Y, T, E> {
    /// Finish with anything convertible to a [`Resolution`].
    pub fn done<R>(result: R) -> Self
    where
        R: IntoResolution<Value = T, Reason = E>,
    {
        Step::Return(result.into_resolution())
    }
}

/// A computation that suspends on promises.
///
/// Each [`resume`](Coroutine::resume) runs until the next suspension point.
/// A rejected promise is handed back as [`Resume::Error`], which the
/// coroutine may recover from or propagate.
pub trait Coroutine<Y, T, E>: Send + 'static {
    /// Runs to the next suspension point.
    fn resume(&mut self, input: Resume<Y, E>) -> Step<Y, T, E>;
}

impl<Y, T, E, F> Coroutine<Y, T, E> for F
where
    F: FnMut(Resume<Y, E>) -> Step<Y, T, E> + Send + 'static,
{
    fn resume(&mut self, input: Resume<Y, E>) -> Step<Y, T, E> {
        self(input)
    }
}

/// Adapts a coroutine factory into a promise-returning function.
///
/// The first step runs inside the call; every later step runs from the
/// scheduler once the yielded promise settles.
///
/// # Example
/// ```
/// # use promissory::{co, Error, Promise, Resume, Step};
/// let sum = co(|limit: i32| {
///     let mut total = 0;
///     let mut next = 0;
///     move |input: Resume<i32, Error>| -> Step<i32, i32, Error> {
///         if let Resume::Value(v) = input {
///             total += v;
///         }
///         next += 1;
///         if next > limit {
///             Step::done(Ok(total))
///         } else {
///             Step::Yield(Promise::resolve(next))
///         }
///     }
/// });
/// assert_eq!(sum(4).wait(), Ok(10));
/// ```
pub fn co<A, Y, T, E, C, F>(f: F) -> impl Fn(A) -> Promise<T, E>
where
    Y: Value,
    T: Value,
    E: Reason,
    C: Coroutine<Y, T, E>,
    F: Fn(A) -> C + Send + Sync + 'static,
{
    move |args| match panic::catch_unwind(AssertUnwindSafe(|| f(args))) {
        Ok(coroutine) => Promise::resolve_from(drive(coroutine, Resume::Start)),
        Err(payload) => Promise::reject(E::from(Error::Panicked(panic_message(payload)))),
    }
}

fn drive<Y, T, E, C>(mut coroutine: C, input: Resume<Y, E>) -> Resolution<T, E>
where
    Y: Value,
    T: Value,
    E: Reason,
    C: Coroutine<Y, T, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| coroutine.resume(input))) {
        Ok(Step::Yield(promise)) => {
            Resolution::Adopt(promise.then(move |result| drive(coroutine, Resume::from(result))))
        }
        Ok(Step::Return(resolution)) => resolution,
        Err(payload) => Resolution::Reject(E::from(Error::Panicked(panic_message(payload)))),
    }
}
