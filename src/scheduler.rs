//! The run-queue every reaction goes through.
//!
//! A [`Scheduler`] owns three things: a FIFO task queue, an after-queue that
//! only runs once the task queue is empty (the rejection tracker lives there),
//! and a set of one-shot timers. Nothing runs on its own; the queue is drained
//! by [`Scheduler::run_until_stalled`] or by [`Promise::wait`](crate::Promise::wait),
//! which parks the calling thread between turns.
//!
//! Every thread has a current scheduler, created on first use. Promises
//! remember the scheduler they were created on, so settling one from another
//! thread enqueues onto the right queue and wakes whoever is waiting on it.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::tracker::{self, Reporter};

/// A unit of work on the queue.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

/// Handle to a pending one-shot timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(u64);

/// Cloneable handle to a shared run-queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    reporter: Arc<dyn Reporter>,
    track_rejections: bool,
    queues: Mutex<Queues>,
    wakeup: Condvar,
}

#[derive(Default)]
struct Queues {
    tasks: VecDeque<Task>,
    after: VecDeque<Task>,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    timers: HashMap<u64, Task>,
    next_timer: u64,
    draining: bool,
}

impl Queues {
    fn fire_due_timers(&mut self, now: Instant) {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            // Cancelled timers leave their deadline behind.
            if let Some(task) = self.timers.remove(&id) {
                tracing::trace!(timer = id, "timer fired");
                self.tasks.push_back(task);
            }
        }
    }

    /// Earliest live deadline. Cancelled entries on top of the heap are
    /// dropped on the way.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if self.timers.contains_key(&id) {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }

    fn cancel(&mut self, id: u64) -> bool {
        if self.timers.remove(&id).is_none() {
            return false;
        }
        self.next_deadline();
        if self.deadlines.len() > 2 * self.timers.len() + 16 {
            let timers = &self.timers;
            self.deadlines.retain(|Reverse((_, id))| timers.contains_key(id));
        }
        true
    }

    fn has_ready(&mut self, now: Instant) -> bool {
        !self.tasks.is_empty()
            || !self.after.is_empty()
            || self.next_deadline().is_some_and(|deadline| deadline <= now)
    }
}

/// Configures a [`Scheduler`].
///
/// # Example
/// ```
/// # use promissory::{Scheduler, TracingReporter};
/// let scheduler = Scheduler::builder()
///     .name("worker")
///     .reporter(TracingReporter)
///     .track_rejections(true)
///     .build();
/// assert_eq!(scheduler.name(), "worker");
/// ```
pub struct Builder {
    name: String,
    reporter: Option<Arc<dyn Reporter>>,
    track_rejections: bool,
}

impl Builder {
    /// Name attached to this scheduler's log events.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Where unhandled-rejection notifications go.
    ///
    /// Defaults to the reporter registered with [`install`](crate::install),
    /// or [`TracingReporter`](crate::TracingReporter) if none was.
    pub fn reporter(mut self, reporter: impl Reporter) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Whether rejected promises are checked for handlers at all.
    pub fn track_rejections(mut self, track: bool) -> Self {
        self.track_rejections = track;
        self
    }

    /// Builds the scheduler.
    pub fn build(self) -> Scheduler {
        let reporter = self.reporter.unwrap_or_else(tracker::default_reporter);
        Scheduler {
            inner: Arc::new(Inner {
                name: self.name,
                reporter,
                track_rejections: self.track_rejections,
                queues: Mutex::new(Queues::default()),
                wakeup: Condvar::new(),
            }),
        }
    }
}

impl Scheduler {
    /// Starts configuring a new scheduler.
    pub fn builder() -> Builder {
        Builder {
            name: "default".to_owned(),
            reporter: None,
            track_rejections: true,
        }
    }

    /// The calling thread's current scheduler.
    pub fn current() -> Scheduler {
        CURRENT.with(|current| {
            current
                .borrow_mut()
                .get_or_insert_with(|| Scheduler::builder().build())
                .clone()
        })
    }

    /// Runs `f` with `self` as the calling thread's current scheduler.
    ///
    /// Promises created inside `f` are bound to `self`.
    ///
    /// # Example
    /// ```
    /// # use promissory::{Promise, Scheduler};
    /// let scheduler = Scheduler::builder().name("isolated").build();
    /// let p: Promise<i32> = scheduler.enter(|| Promise::resolve(1));
    /// assert_eq!(p.scheduler().name(), "isolated");
    /// ```
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Restore(Option<Scheduler>);

        impl Drop for Restore {
            fn drop(&mut self) {
                let previous = self.0.take();
                CURRENT.with(|current| *current.borrow_mut() = previous);
            }
        }

        let previous = CURRENT.with(|current| current.borrow_mut().replace(self.clone()));
        let _restore = Restore(previous);
        f()
    }

    /// This scheduler's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn reporter(&self) -> &dyn Reporter {
        &*self.inner.reporter
    }

    pub(crate) fn tracks_rejections(&self) -> bool {
        self.inner.track_rejections
    }

    /// Returns `true` if both handles point at the same queue.
    pub fn same(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Appends `task` to the queue. It runs after everything already queued.
    pub(crate) fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        let mut queues = self.inner.queues.lock();
        queues.tasks.push_back(Box::new(task));
        tracing::trace!(scheduler = %self.inner.name, queued = queues.tasks.len(), "task enqueued");
        drop(queues);
        self.inner.wakeup.notify_all();
    }

    /// Queues `task` to run once the task queue is empty.
    pub(crate) fn after_queue(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.queues.lock().after.push_back(Box::new(task));
        self.inner.wakeup.notify_all();
    }

    /// Runs `task` on this queue once `delay` has elapsed.
    pub(crate) fn set_timer(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerId {
        let deadline = Instant::now() + delay;
        let mut queues = self.inner.queues.lock();
        let id = queues.next_timer;
        queues.next_timer += 1;
        queues.deadlines.push(Reverse((deadline, id)));
        queues.timers.insert(id, Box::new(task));
        tracing::trace!(scheduler = %self.inner.name, timer = id, ?delay, "timer set");
        drop(queues);
        self.inner.wakeup.notify_all();
        TimerId(id)
    }

    /// Cancels a timer that has not fired yet. Returns `false` if it already
    /// fired or was cancelled.
    pub(crate) fn cancel_timer(&self, timer: TimerId) -> bool {
        self.inner.queues.lock().cancel(timer.0)
    }

    /// Runs queued tasks, due timers and after-queue tasks until nothing is
    /// ready. Returns the number of tasks run.
    ///
    /// Calling this from inside a task, or while another thread is draining
    /// the same queue, returns `0` immediately.
    pub fn run_until_stalled(&self) -> usize {
        {
            let mut queues = self.inner.queues.lock();
            if queues.draining {
                return 0;
            }
            queues.draining = true;
        }
        let _drain = DrainGuard(self);

        let mut ran = 0;
        loop {
            let next = {
                let mut queues = self.inner.queues.lock();
                queues.fire_due_timers(Instant::now());
                queues.tasks.pop_front().or_else(|| queues.after.pop_front())
            };
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            tracing::trace!(scheduler = %self.inner.name, ran, "queue drained");
        }
        ran
    }

    /// Blocks until there is something to run, the next timer is due, or
    /// `deadline` passes.
    pub(crate) fn park(&self, deadline: Option<Instant>) {
        let mut queues = self.inner.queues.lock();
        if !queues.draining && queues.has_ready(Instant::now()) {
            return;
        }
        let wake_at = match (queues.next_deadline(), deadline) {
            (Some(timer), Some(deadline)) => Some(timer.min(deadline)),
            (timer, deadline) => timer.or(deadline),
        };
        match wake_at {
            Some(at) => {
                self.inner.wakeup.wait_until(&mut queues, at);
            }
            None => self.inner.wakeup.wait(&mut queues),
        }
    }

    /// Number of queued tasks, after-queue tasks and live timers.
    pub fn pending_work(&self) -> usize {
        let queues = self.inner.queues.lock();
        queues.tasks.len() + queues.after.len() + queues.timers.len()
    }
}

struct DrainGuard<'a>(&'a Scheduler);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.inner.queues.lock().draining = false;
        self.0.inner.wakeup.notify_all();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("track_rejections", &self.inner.track_rejections)
            .finish_non_exhaustive()
    }
}
