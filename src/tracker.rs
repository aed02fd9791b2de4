//! Unhandled-rejection detection.
//!
//! Every rejected handler schedules one check on its scheduler's after-queue,
//! which runs once the current batch of tasks has drained. If no continuation
//! observed the rejection by then, the scheduler's [`Reporter`] hears about it
//! once. Observing it afterwards produces a single retraction.
//!
//! Reporting is a side channel: it never changes how a promise settles.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use crate::error::{Reason, Value};
use crate::handler::{Handler, RejectionId};

static INSTALLED: OnceLock<Arc<dyn Reporter>> = OnceLock::new();

/// Which side of the unhandled/handled pair an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    /// Nothing observed the rejection within the turn it was created in.
    Unhandled,
    /// A rejection previously reported as unhandled has now been observed.
    Handled,
}

/// One notification from the rejection tracker.
#[derive(Clone, Copy)]
pub struct RejectionEvent<'a> {
    /// What happened.
    pub kind: RejectionKind,
    /// Which rejected promise it happened to; stable across the
    /// `Unhandled`/`Handled` pair.
    pub id: RejectionId,
    /// The rejection reason.
    pub reason: &'a dyn fmt::Debug,
}

impl fmt::Debug for RejectionEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectionEvent")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("reason", self.reason)
            .finish()
    }
}

/// Transport for rejection notifications.
pub trait Reporter: Send + Sync + 'static {
    /// Delivers one event. Called from inside the scheduler's drain.
    fn report(&self, event: &RejectionEvent<'_>);
}

impl<F> Reporter for F
where
    F: Fn(&RejectionEvent<'_>) + Send + Sync + 'static,
{
    fn report(&self, event: &RejectionEvent<'_>) {
        self(event)
    }
}

/// Logs rejection events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: &RejectionEvent<'_>) {
        match event.kind {
            RejectionKind::Unhandled => {
                tracing::warn!(id = %event.id, reason = ?event.reason, "unhandled promise rejection")
            }
            RejectionKind::Handled => {
                tracing::info!(id = %event.id, reason = ?event.reason, "promise rejection handled late")
            }
        }
    }
}

/// Registers `reporter` as the process-wide default for schedulers built
/// after this call.
///
/// Takes effect once: returns `false`, leaving the existing reporter in
/// place, if one was already installed.
///
/// # Example
/// ```
/// # use promissory::TracingReporter;
/// promissory::install(TracingReporter);
/// assert!(!promissory::install(TracingReporter));
/// ```
pub fn install(reporter: impl Reporter) -> bool {
    let installed = INSTALLED.set(Arc::new(reporter)).is_ok();
    if installed {
        tracing::debug!("global rejection reporter installed");
    }
    installed
}

pub(crate) fn default_reporter() -> Arc<dyn Reporter> {
    match INSTALLED.get() {
        Some(reporter) => Arc::clone(reporter),
        None => Arc::new(TracingReporter),
    }
}

/// Schedules the unhandled check for a freshly rejected handler.
pub(crate) fn track<T: Value, E: Reason>(handler: &Handler<T, E>) {
    let Some(rejection) = handler.rejection() else {
        return;
    };
    if !rejection.scheduler.tracks_rejections() {
        return;
    }
    let handler = handler.clone();
    rejection.scheduler.after_queue(move || {
        let Some(rejection) = handler.rejection() else {
            return;
        };
        if rejection.handled.load(Ordering::Acquire) || rejection.reported.swap(true, Ordering::AcqRel) {
            return;
        }
        rejection.scheduler.reporter().report(&RejectionEvent {
            kind: RejectionKind::Unhandled,
            id: rejection.id,
            reason: &rejection.reason,
        });
    });
}

/// Schedules the retraction for a rejection that was just observed.
pub(crate) fn untrack<T: Value, E: Reason>(handler: &Handler<T, E>) {
    let Some(rejection) = handler.rejection() else {
        return;
    };
    if !rejection.scheduler.tracks_rejections() {
        return;
    }
    let handler = handler.clone();
    rejection.scheduler.after_queue(move || {
        let Some(rejection) = handler.rejection() else {
            return;
        };
        if rejection.reported.load(Ordering::Acquire) {
            rejection.scheduler.reporter().report(&RejectionEvent {
                kind: RejectionKind::Handled,
                id: rejection.id,
                reason: &rejection.reason,
            });
        }
    });
}
