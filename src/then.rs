//! Single-step reactions: `then`, `then_with`, `finally`, and the sink
//! [`Promise::wait`](crate::Promise::wait) listens on.

use std::marker::PhantomData;

use crate::error::{Reason, Value};
use crate::handler::{Continuation, Handler};
use crate::resolve::{guarded, IntoResolution, Resolution};

/// Feeds the whole `Result` to one callback and resolves `output` with
/// whatever it returns.
pub(crate) struct Then<F, U, E2> {
    callback: F,
    output: Handler<U, E2>,
}

impl<F, U, E2> Then<F, U, E2> {
    pub(crate) fn new(callback: F, output: Handler<U, E2>) -> Self {
        Then { callback, output }
    }
}

impl<T, E, F, R, U, E2> Continuation<T, E> for Then<F, U, E2>
where
    T: Value,
    E: Reason,
    U: Value,
    E2: Reason,
    F: FnOnce(Result<T, E>) -> R + Send,
    R: IntoResolution<Value = U, Reason = E2>,
{
    fn fulfilled(self: Box<Self>, _: &Handler<T, E>, value: &T) {
        let Then { callback, output } = *self;
        let value = value.clone();
        output.resolve(guarded(move || callback(Ok(value))));
    }

    fn rejected(self: Box<Self>, _: &Handler<T, E>, reason: &E) -> bool {
        let Then { callback, output } = *self;
        let reason = reason.clone();
        output.resolve(guarded(move || callback(Err(reason))));
        true
    }
}

/// Separate optional callbacks for each outcome. A missing callback forwards
/// the settlement unchanged, sharing the source's terminal handler.
pub(crate) struct ThenWith<F, G, T, E> {
    on_fulfilled: Option<F>,
    on_rejected: Option<G>,
    output: Handler<T, E>,
}

impl<F, G, T, E> ThenWith<F, G, T, E> {
    pub(crate) fn new(on_fulfilled: Option<F>, on_rejected: Option<G>, output: Handler<T, E>) -> Self {
        ThenWith {
            on_fulfilled,
            on_rejected,
            output,
        }
    }
}

impl<T, E, F, G, R1, R2> Continuation<T, E> for ThenWith<F, G, T, E>
where
    T: Value,
    E: Reason,
    F: FnOnce(T) -> R1 + Send,
    G: FnOnce(E) -> R2 + Send,
    R1: IntoResolution<Value = T, Reason = E>,
    R2: IntoResolution<Value = T, Reason = E>,
{
    fn fulfilled(self: Box<Self>, handler: &Handler<T, E>, value: &T) {
        let ThenWith { on_fulfilled, output, .. } = *self;
        match on_fulfilled {
            Some(callback) => {
                let value = value.clone();
                output.resolve(guarded(move || callback(value)));
            }
            None => {
                output.forward(handler);
            }
        }
    }

    fn rejected(self: Box<Self>, handler: &Handler<T, E>, reason: &E) -> bool {
        let ThenWith { on_rejected, output, .. } = *self;
        match on_rejected {
            Some(callback) => {
                let reason = reason.clone();
                output.resolve(guarded(move || callback(reason)));
                true
            }
            None => {
                output.forward(handler);
                false
            }
        }
    }
}

/// Runs a side effect on either outcome, then forwards the source's
/// settlement. A panicking side effect rejects instead.
pub(crate) struct Finally<F, T, E> {
    callback: F,
    output: Handler<T, E>,
}

impl<F, T, E> Finally<F, T, E> {
    pub(crate) fn new(callback: F, output: Handler<T, E>) -> Self {
        Finally { callback, output }
    }

    fn run(self, handler: &Handler<T, E>) -> bool
    where
        T: Value,
        E: Reason,
        F: FnOnce(),
    {
        let Finally { callback, output } = self;
        match guarded(move || {
            callback();
            Ok::<(), E>(())
        }) {
            Resolution::Reject(reason) => {
                output.reject(reason);
                true
            }
            _ => {
                output.forward(handler);
                false
            }
        }
    }
}

impl<T, E, F> Continuation<T, E> for Finally<F, T, E>
where
    T: Value,
    E: Reason,
    F: FnOnce() + Send,
{
    fn fulfilled(self: Box<Self>, handler: &Handler<T, E>, _: &T) {
        (*self).run(handler);
    }

    fn rejected(self: Box<Self>, handler: &Handler<T, E>, _: &E) -> bool {
        (*self).run(handler)
    }
}

/// Delivers the outcome into a oneshot channel. Counts as observing the
/// rejection.
pub(crate) struct Notify<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Notify<T, E> {
    pub(crate) fn new(tx: oneshot::Sender<Result<T, E>>) -> Self {
        Notify { tx }
    }
}

impl<T: Value, E: Reason> Continuation<T, E> for Notify<T, E> {
    fn fulfilled(self: Box<Self>, _: &Handler<T, E>, value: &T) {
        // The receiver may have given up (`wait_timeout`).
        let _ = self.tx.send(Ok(value.clone()));
    }

    fn rejected(self: Box<Self>, _: &Handler<T, E>, reason: &E) -> bool {
        let _ = self.tx.send(Err(reason.clone()));
        true
    }
}

/// Observes and discards. Used on inputs whose outcome no longer matters so
/// their rejections do not surface as unhandled.
pub(crate) struct Silence<T, E>(PhantomData<fn(T, E)>);

impl<T, E> Silence<T, E> {
    pub(crate) fn new() -> Self {
        Silence(PhantomData)
    }
}

impl<T: Value, E: Reason> Continuation<T, E> for Silence<T, E> {
    fn fulfilled(self: Box<Self>, _: &Handler<T, E>, _: &T) {}

    fn rejected(self: Box<Self>, _: &Handler<T, E>, _: &E) -> bool {
        true
    }
}
