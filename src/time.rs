//! Time-bounded reactions backing [`Promise::delay`](crate::Promise::delay)
//! and [`Promise::timeout`](crate::Promise::timeout).

use std::time::{Duration, Instant};

use crate::error::{Error, Reason, Value};
use crate::handler::{Continuation, Handler};
use crate::scheduler::{Scheduler, TimerId};

/// Forwards the source's outcome, but not before `not_before`.
pub(crate) struct Delay<T, E> {
    output: Handler<T, E>,
    scheduler: Scheduler,
    not_before: Instant,
}

impl<T: Value, E: Reason> Delay<T, E> {
    pub(crate) fn new(output: Handler<T, E>, scheduler: Scheduler, delay: Duration) -> Self {
        Delay {
            output,
            scheduler,
            not_before: Instant::now() + delay,
        }
    }

    fn remaining(&self) -> Duration {
        self.not_before.saturating_duration_since(Instant::now())
    }
}

impl<T: Value, E: Reason> Continuation<T, E> for Delay<T, E> {
    fn fulfilled(self: Box<Self>, handler: &Handler<T, E>, _: &T) {
        let remaining = self.remaining();
        let Delay { output, scheduler, .. } = *self;
        let source = handler.clone();
        scheduler.set_timer(remaining, move || {
            output.forward(&source);
        });
    }

    fn rejected(self: Box<Self>, _: &Handler<T, E>, reason: &E) -> bool {
        // Observed here; the output rejects on its own once the delay is over.
        let remaining = self.remaining();
        let Delay { output, scheduler, .. } = *self;
        let reason = reason.clone();
        scheduler.set_timer(remaining, move || {
            output.reject(reason);
        });
        true
    }
}

/// Forwards the source's outcome unless the timer fires first.
pub(crate) struct Timeout<T, E> {
    output: Handler<T, E>,
    scheduler: Scheduler,
    timer: TimerId,
}

impl<T: Value, E: Reason> Timeout<T, E> {
    /// Starts the timer and returns the reaction to subscribe to the source.
    pub(crate) fn start(output: Handler<T, E>, scheduler: Scheduler, after: Duration) -> Self {
        let expired = output.clone();
        let timer = scheduler.set_timer(after, move || {
            if expired.reject(E::from(Error::Timeout(after))) {
                tracing::debug!(?after, "promise timed out");
            }
        });
        Timeout {
            output,
            scheduler,
            timer,
        }
    }
}

impl<T: Value, E: Reason> Continuation<T, E> for Timeout<T, E> {
    fn fulfilled(self: Box<Self>, handler: &Handler<T, E>, _: &T) {
        if self.output.forward(handler) {
            self.scheduler.cancel_timer(self.timer);
        }
    }

    fn rejected(self: Box<Self>, handler: &Handler<T, E>, _: &E) -> bool {
        if self.output.forward(handler) {
            self.scheduler.cancel_timer(self.timer);
            false
        } else {
            // Lost to the timer; swallow the late rejection.
            true
        }
    }
}
