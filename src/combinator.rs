//! Aggregate combinators over a sequence of inputs.
//!
//! Inputs are classified up front: plain values and already-settled promises
//! are consumed in scan order, pending ones get a per-index continuation.
//! Each combinator settles its output exactly once; inputs that no longer
//! matter afterwards are still observed so their rejections are not reported
//! as unhandled.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AggregateError, Reason, Value};
use crate::handler::{Continuation, Handler};
use crate::resolve::Resolution;
use crate::scheduler::Scheduler;
use crate::then::Silence;

/// Outcome of one input to [`settle`](crate::Promise::settle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement<T, E> {
    /// The input fulfilled with this value.
    Fulfilled(T),
    /// The input rejected with this reason.
    Rejected(E),
}

impl<T, E> Settlement<T, E> {
    /// Returns `true` for [`Settlement::Fulfilled`].
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled(_))
    }

    /// Returns `true` for [`Settlement::Rejected`].
    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected(_))
    }

    /// Converts back into a `Result`.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Settlement::Fulfilled(value) => Ok(value),
            Settlement::Rejected(reason) => Err(reason),
        }
    }
}

impl<T, E> From<Result<T, E>> for Settlement<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Settlement::Fulfilled(value),
            Err(reason) => Settlement::Rejected(reason),
        }
    }
}

enum Input<T, E> {
    Value(T),
    /// Carries the rejected handler when the reason came from a promise, so
    /// it can be marked handled.
    Reason(E, Option<Handler<T, E>>),
    Pending(Handler<T, E>),
}

fn classify<T: Value, E: Reason>(resolution: Resolution<T, E>, scheduler: &Scheduler) -> Input<T, E> {
    match resolution {
        Resolution::Fulfill(value) => Input::Value(value),
        Resolution::Reject(reason) => Input::Reason(reason, None),
        Resolution::Adopt(promise) => {
            let joined = promise.handler().join();
            let settled = joined.settled().map(|outcome| match outcome {
                Ok(value) => Ok(value.clone()),
                Err(reason) => Err(reason.clone()),
            });
            match settled {
                Some(Ok(value)) => Input::Value(value),
                Some(Err(reason)) => Input::Reason(reason, Some(joined)),
                None => Input::Pending(joined),
            }
        }
        thenable @ Resolution::Thenable(_) => {
            let handler = Handler::deferred(scheduler);
            handler.resolve(thenable);
            Input::Pending(handler)
        }
    }
}

fn silence<T: Value, E: Reason>(rest: impl Iterator<Item = Input<T, E>>) {
    for input in rest {
        match input {
            Input::Reason(_, Some(handler)) => handler.mark_handled(),
            Input::Pending(handler) => handler.when(Box::new(Silence::new())),
            Input::Value(_) | Input::Reason(_, None) => {}
        }
    }
}

/// Fixed-size slots filled out of order, complete when every slot is set.
struct Gather<T> {
    slots: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    fn new(len: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Gather {
            slots: (0..len).map(|_| None).collect(),
            remaining: len,
        }))
    }

    /// Stores `item` at `index`; returns every item in order once the last
    /// slot is filled.
    fn fill(&mut self, index: usize, item: T) -> Option<Vec<T>> {
        if self.slots[index].replace(item).is_none() {
            self.remaining -= 1;
        }
        if self.remaining == 0 {
            self.slots.iter_mut().map(Option::take).collect()
        } else {
            None
        }
    }
}

struct AllAt<T, E> {
    index: usize,
    gather: Arc<Mutex<Gather<T>>>,
    output: Handler<Vec<T>, E>,
}

impl<T: Value, E: Reason> Continuation<T, E> for AllAt<T, E> {
    fn fulfilled(self: Box<Self>, _: &Handler<T, E>, value: &T) {
        let complete = self.gather.lock().fill(self.index, value.clone());
        if let Some(values) = complete {
            self.output.fulfill(values);
        }
    }

    fn rejected(self: Box<Self>, _: &Handler<T, E>, reason: &E) -> bool {
        self.output.reject(reason.clone());
        true
    }
}

/// Fulfills with every value in input order, or rejects with the first
/// rejection.
pub(crate) fn all<T: Value, E: Reason>(inputs: Vec<Resolution<T, E>>, scheduler: &Scheduler) -> Handler<Vec<T>, E> {
    let output = Handler::deferred(scheduler);
    if inputs.is_empty() {
        output.fulfill(Vec::new());
        return output;
    }

    let gather = Gather::new(inputs.len());
    let mut inputs = inputs.into_iter().map(|input| classify(input, scheduler)).enumerate();
    while let Some((index, input)) = inputs.next() {
        match input {
            Input::Value(value) => {
                let complete = gather.lock().fill(index, value);
                if let Some(values) = complete {
                    output.fulfill(values);
                }
            }
            Input::Reason(reason, handler) => {
                if let Some(handler) = handler {
                    handler.mark_handled();
                }
                output.reject(reason);
                silence(inputs.map(|(_, input)| input));
                break;
            }
            Input::Pending(handler) => handler.when(Box::new(AllAt {
                index,
                gather: Arc::clone(&gather),
                output: output.clone(),
            })),
        }
    }
    output
}

struct RaceTo<T, E> {
    output: Handler<T, E>,
}

impl<T: Value, E: Reason> Continuation<T, E> for RaceTo<T, E> {
    fn fulfilled(self: Box<Self>, handler: &Handler<T, E>, _: &T) {
        self.output.forward(handler);
    }

    fn rejected(self: Box<Self>, handler: &Handler<T, E>, _: &E) -> bool {
        // The winner's rejection now belongs to the output.
        !self.output.forward(handler)
    }
}

/// Settles like the first input to settle. Never settles for no inputs.
pub(crate) fn race<T: Value, E: Reason>(inputs: Vec<Resolution<T, E>>, scheduler: &Scheduler) -> Handler<T, E> {
    if inputs.is_empty() {
        return Handler::never();
    }

    let output = Handler::deferred(scheduler);
    let mut inputs = inputs.into_iter().map(|input| classify(input, scheduler));
    while let Some(input) = inputs.next() {
        match input {
            Input::Value(value) => {
                output.fulfill(value);
                silence(inputs);
                break;
            }
            Input::Reason(_, Some(handler)) => {
                output.forward(&handler);
                silence(inputs);
                break;
            }
            Input::Reason(reason, None) => {
                output.reject(reason);
                silence(inputs);
                break;
            }
            Input::Pending(handler) => handler.when(Box::new(RaceTo {
                output: output.clone(),
            })),
        }
    }
    output
}

struct AnyAt<T, E> {
    index: usize,
    gather: Arc<Mutex<Gather<E>>>,
    output: Handler<T, AggregateError<E>>,
}

impl<T: Value, E: Reason> Continuation<T, E> for AnyAt<T, E> {
    fn fulfilled(self: Box<Self>, _: &Handler<T, E>, value: &T) {
        self.output.fulfill(value.clone());
    }

    fn rejected(self: Box<Self>, _: &Handler<T, E>, reason: &E) -> bool {
        let complete = self.gather.lock().fill(self.index, reason.clone());
        if let Some(reasons) = complete {
            self.output.reject(AggregateError::new(reasons));
        }
        true
    }
}

/// Fulfills with the first fulfillment; rejects with every reason, in input
/// order, once all inputs rejected.
pub(crate) fn any<T: Value, E: Reason>(
    inputs: Vec<Resolution<T, E>>,
    scheduler: &Scheduler,
) -> Handler<T, AggregateError<E>> {
    let output = Handler::deferred(scheduler);
    if inputs.is_empty() {
        output.reject(AggregateError::new(Vec::new()));
        return output;
    }

    let gather = Gather::new(inputs.len());
    let mut inputs = inputs.into_iter().map(|input| classify(input, scheduler)).enumerate();
    while let Some((index, input)) = inputs.next() {
        match input {
            Input::Value(value) => {
                output.fulfill(value);
                silence(inputs.map(|(_, input)| input));
                break;
            }
            Input::Reason(reason, handler) => {
                if let Some(handler) = handler {
                    handler.mark_handled();
                }
                let complete = gather.lock().fill(index, reason);
                if let Some(reasons) = complete {
                    output.reject(AggregateError::new(reasons));
                }
            }
            Input::Pending(handler) => handler.when(Box::new(AnyAt {
                index,
                gather: Arc::clone(&gather),
                output: output.clone(),
            })),
        }
    }
    output
}

struct SettleAt<T, E> {
    index: usize,
    gather: Arc<Mutex<Gather<Settlement<T, E>>>>,
    output: Handler<Vec<Settlement<T, E>>, E>,
}

impl<T: Value, E: Reason> SettleAt<T, E> {
    fn record(self, settlement: Settlement<T, E>) {
        let complete = self.gather.lock().fill(self.index, settlement);
        if let Some(settlements) = complete {
            self.output.fulfill(settlements);
        }
    }
}

impl<T: Value, E: Reason> Continuation<T, E> for SettleAt<T, E> {
    fn fulfilled(self: Box<Self>, _: &Handler<T, E>, value: &T) {
        (*self).record(Settlement::Fulfilled(value.clone()));
    }

    fn rejected(self: Box<Self>, _: &Handler<T, E>, reason: &E) -> bool {
        (*self).record(Settlement::Rejected(reason.clone()));
        true
    }
}

/// Fulfills with every input's outcome in input order. Never rejects.
pub(crate) fn settle<T: Value, E: Reason>(
    inputs: Vec<Resolution<T, E>>,
    scheduler: &Scheduler,
) -> Handler<Vec<Settlement<T, E>>, E> {
    let output = Handler::deferred(scheduler);
    if inputs.is_empty() {
        output.fulfill(Vec::new());
        return output;
    }

    let gather = Gather::new(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        let settlement = match classify(input, scheduler) {
            Input::Value(value) => Settlement::Fulfilled(value),
            Input::Reason(reason, handler) => {
                if let Some(handler) = handler {
                    handler.mark_handled();
                }
                Settlement::Rejected(reason)
            }
            Input::Pending(handler) => {
                handler.when(Box::new(SettleAt {
                    index,
                    gather: Arc::clone(&gather),
                    output: output.clone(),
                }));
                continue;
            }
        };
        let complete = gather.lock().fill(index, settlement);
        if let Some(settlements) = complete {
            output.fulfill(settlements);
        }
    }
    output
}
