//! The settlement state machine behind every [`Promise`](crate::Promise).
//!
//! A promise owns exactly one [`Handler`]. Handlers come in five shapes:
//!
//! - `Fulfilled` and `Rejected` are terminal and immutable (apart from the
//!   rejection's `handled`/`reported` flags).
//! - `Deferred` is the only mutable shape. It starts pending with a list of
//!   subscribed continuations and transitions exactly once, by *forwarding*
//!   to another handler: a fresh `Fulfilled`/`Rejected`, or the handler of a
//!   promise it was resolved with. Later attempts are no-ops.
//! - `Async` wraps another handler so subscribing to it never notifies from
//!   inside the subscribing call.
//! - `Never` stays pending and drops whatever subscribes to it.
//!
//! [`Handler::join`] walks forwarding links to the terminal handler and
//! rewrites every link it passed to point straight at it, so chains of
//! promises resolving to promises stay flat.
//!
//! Links to still-pending handlers are only ever created by
//! [`Handler::forward`], one at a time, so the forwarding graph stays
//! acyclic even when promises are resolved from several threads.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Reason, Value};
use crate::resolve::Resolution;
use crate::scheduler::Scheduler;
use crate::tracker;

pub(crate) const PENDING: u8 = 1 << 0;
pub(crate) const FULFILLED: u8 = 1 << 1;
pub(crate) const REJECTED: u8 = 1 << 2;
pub(crate) const HANDLED: u8 = 1 << 3;

/// A reaction subscribed to a handler.
///
/// Exactly one hook runs, at most once, with the terminal handler that
/// settled. `rejected` returns whether it observed the rejection; a `true`
/// marks the rejection handled.
pub(crate) trait Continuation<T, E>: Send {
    fn fulfilled(self: Box<Self>, handler: &Handler<T, E>, value: &T);

    fn rejected(self: Box<Self>, handler: &Handler<T, E>, reason: &E) -> bool;
}

/// Identifies a rejected handler in [`RejectionEvent`](crate::RejectionEvent)s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RejectionId(u64);

impl RejectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        RejectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RejectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejection#{}", self.0)
    }
}

pub(crate) struct Rejection<E> {
    pub(crate) reason: E,
    pub(crate) id: RejectionId,
    pub(crate) handled: AtomicBool,
    pub(crate) reported: AtomicBool,
    pub(crate) scheduler: Scheduler,
}

struct Deferred<T, E> {
    scheduler: Scheduler,
    slot: Mutex<Slot<T, E>>,
}

enum Slot<T, E> {
    Pending(Vec<Box<dyn Continuation<T, E>>>),
    Forwarded(Handler<T, E>),
}

enum Node<T, E> {
    Fulfilled(T),
    Rejected(Rejection<E>),
    Deferred(Deferred<T, E>),
    Async(Handler<T, E>, Scheduler),
    Never,
}

pub(crate) struct Handler<T, E>(Arc<Node<T, E>>);

impl<T, E> Clone for Handler<T, E> {
    fn clone(&self) -> Self {
        Handler(Arc::clone(&self.0))
    }
}

impl<T: Value, E: Reason> Handler<T, E> {
    pub(crate) fn fulfilled(value: T) -> Self {
        Handler(Arc::new(Node::Fulfilled(value)))
    }

    /// A terminal rejection, registered with the rejection tracker.
    pub(crate) fn rejected(reason: E, scheduler: &Scheduler) -> Self {
        let handler = Self::untracked_rejection(reason, scheduler);
        tracker::track(&handler);
        handler
    }

    fn untracked_rejection(reason: E, scheduler: &Scheduler) -> Self {
        Handler(Arc::new(Node::Rejected(Rejection {
            reason,
            id: RejectionId::next(),
            handled: AtomicBool::new(false),
            reported: AtomicBool::new(false),
            scheduler: scheduler.clone(),
        })))
    }

    pub(crate) fn deferred(scheduler: &Scheduler) -> Self {
        Handler(Arc::new(Node::Deferred(Deferred {
            scheduler: scheduler.clone(),
            slot: Mutex::new(Slot::Pending(Vec::new())),
        })))
    }

    pub(crate) fn async_of(inner: Handler<T, E>, scheduler: &Scheduler) -> Self {
        Handler(Arc::new(Node::Async(inner, scheduler.clone())))
    }

    pub(crate) fn never() -> Self {
        Handler(Arc::new(Node::Never))
    }

    pub(crate) fn ptr_eq(&self, other: &Handler<T, E>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn rejection(&self) -> Option<&Rejection<E>> {
        match &*self.0 {
            Node::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// The terminal value or reason, if this exact handler is terminal.
    ///
    /// Call on a [`join`](Self::join)ed handler.
    pub(crate) fn settled(&self) -> Option<Result<&T, &E>> {
        match &*self.0 {
            Node::Fulfilled(value) => Some(Ok(value)),
            Node::Rejected(rejection) => Some(Err(&rejection.reason)),
            _ => None,
        }
    }

    fn is_pending_deferred(&self) -> bool {
        match &*self.0 {
            Node::Deferred(deferred) => matches!(*deferred.slot.lock(), Slot::Pending(_)),
            _ => false,
        }
    }

    /// Follows forwarding links (and `Async` wrappers) to the handler that
    /// actually holds the state, re-pointing every link passed on the way.
    pub(crate) fn join(&self) -> Handler<T, E> {
        let mut links = Vec::new();
        let mut current = self.clone();
        loop {
            let next = match &*current.0 {
                Node::Deferred(deferred) => match &*deferred.slot.lock() {
                    Slot::Forwarded(target) => target.clone(),
                    Slot::Pending(_) => break,
                },
                Node::Async(inner, _) => inner.clone(),
                _ => break,
            };
            links.push(mem::replace(&mut current, next));
        }

        for link in &links {
            link.point_at(&current);
        }
        current
    }

    fn point_at(&self, terminal: &Handler<T, E>) {
        if let Node::Deferred(deferred) = &*self.0 {
            if let Slot::Forwarded(target) = &mut *deferred.slot.lock() {
                if !target.ptr_eq(terminal) {
                    *target = terminal.clone();
                }
            }
        }
    }

    /// The PENDING/FULFILLED/REJECTED/HANDLED bitmask of the joined handler.
    pub(crate) fn state(&self) -> u8 {
        let joined = self.join();
        match &*joined.0 {
            Node::Fulfilled(_) => FULFILLED,
            Node::Rejected(rejection) if rejection.handled.load(Ordering::Acquire) => REJECTED | HANDLED,
            Node::Rejected(_) => REJECTED,
            Node::Deferred(_) | Node::Async(..) | Node::Never => PENDING,
        }
    }

    /// Subscribes `continuation`.
    ///
    /// Terminal handlers notify synchronously and are only subscribed to from
    /// inside a scheduled task. Every other shape notifies through the
    /// scheduler, so a continuation never runs inside the `when` call that
    /// registered it. Continuations registered on the same handler run in
    /// registration order.
    pub(crate) fn when(&self, continuation: Box<dyn Continuation<T, E>>) {
        match &*self.0 {
            Node::Fulfilled(value) => continuation.fulfilled(self, value),
            Node::Rejected(rejection) => {
                if continuation.rejected(self, &rejection.reason) {
                    self.mark_handled();
                }
            }
            Node::Deferred(deferred) => {
                let target = {
                    let mut slot = deferred.slot.lock();
                    match &mut *slot {
                        Slot::Pending(consumers) => {
                            consumers.push(continuation);
                            return;
                        }
                        Slot::Forwarded(target) => target.clone(),
                    }
                };
                // Earlier continuations were handed to a pending target;
                // queue behind them there.
                let target = target.join();
                if target.is_pending_deferred() {
                    target.when(continuation);
                } else {
                    deferred
                        .scheduler
                        .enqueue(move || target.join().when(continuation));
                }
            }
            Node::Async(inner, scheduler) => {
                let inner = inner.clone();
                scheduler.enqueue(move || inner.join().when(continuation));
            }
            Node::Never => drop(continuation),
        }
    }

    /// Marks a rejected handler as observed. No-op for other shapes.
    pub(crate) fn mark_handled(&self) {
        if let Some(rejection) = self.rejection() {
            if !rejection.handled.swap(true, Ordering::AcqRel) {
                tracker::untrack(self);
            }
        }
    }

    /// Settles a deferred handler by forwarding to whatever `make` builds.
    ///
    /// `make` only runs if the handler is still pending, so a losing
    /// `reject` never creates (and reports) a stray rejection. Consumers are
    /// handed over before the slot lock is released, so anything subscribing
    /// afterwards lines up behind them.
    fn transition(&self, make: impl FnOnce(&Scheduler) -> Handler<T, E>) -> bool {
        let Node::Deferred(deferred) = &*self.0 else {
            return false;
        };
        let mut slot = deferred.slot.lock();
        let consumers = match &mut *slot {
            Slot::Pending(consumers) => mem::take(consumers),
            Slot::Forwarded(_) => return false,
        };
        let target = make(&deferred.scheduler);
        *slot = Slot::Forwarded(target.clone());
        tracing::debug!(
            scheduler = %deferred.scheduler.name(),
            consumers = consumers.len(),
            "deferred settled"
        );

        if consumers.is_empty() {
            return true;
        }
        if target.is_pending_deferred() {
            for continuation in consumers {
                target.when(continuation);
            }
        } else {
            deferred.scheduler.enqueue(move || {
                let target = target.join();
                for continuation in consumers {
                    target.when(continuation);
                }
            });
        }
        true
    }

    pub(crate) fn fulfill(&self, value: T) -> bool {
        self.transition(|_| Handler::fulfilled(value))
    }

    /// The unhandled check is queued only after the consumers, so a reaction
    /// already waiting always gets to observe the rejection first.
    pub(crate) fn reject(&self, reason: E) -> bool {
        let mut created = None;
        let settled = self.transition(|scheduler| {
            let rejection = Handler::untracked_rejection(reason, scheduler);
            created = Some(rejection.clone());
            rejection
        });
        if let Some(rejection) = created {
            tracker::track(&rejection);
        }
        settled
    }

    /// Makes this deferred a permanent alias of `target`'s terminal handler.
    ///
    /// Forwarding to itself, directly or through other promises, rejects
    /// with [`Error::ChainingCycle`] instead.
    pub(crate) fn forward(&self, target: &Handler<T, E>) -> bool {
        static FORWARDING: Mutex<()> = parking_lot::const_mutex(());

        // The cycle check and the new link must be atomic with respect to
        // every other forward.
        let _serial = FORWARDING.lock();
        let target = target.join();
        if target.ptr_eq(self) {
            tracing::debug!("chaining cycle detected");
            return self.reject(E::from(Error::ChainingCycle));
        }
        self.transition(|_| target)
    }

    pub(crate) fn resolve(&self, resolution: Resolution<T, E>) -> bool {
        match resolution {
            Resolution::Fulfill(value) => self.fulfill(value),
            Resolution::Reject(reason) => self.reject(reason),
            Resolution::Adopt(promise) => self.forward(promise.handler()),
            Resolution::Thenable(thenable) => {
                let Node::Deferred(deferred) = &*self.0 else {
                    return false;
                };
                let scheduler = deferred.scheduler.clone();
                let inner = Handler::deferred(&scheduler);
                if !self.forward(&inner) {
                    return false;
                }
                scheduler.enqueue(move || crate::resolve::call_thenable(thenable, inner));
                true
            }
        }
    }
}
