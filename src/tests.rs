#![cfg(test)]

use std::env;
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{
    co, denodeify, AggregateError, Callback, Error, Promise, RejectionKind, Resolution, Resolver, Resume, Scheduler,
    Settlement, State, Step, Thenable,
};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
enum FsError {
    #[error("couldn't make dir")]
    CreateDir,
    #[error("couldn't create file")]
    CreateFile,
    #[error(transparent)]
    Engine(#[from] Error),
}

fn scratch(name: &str) -> PathBuf {
    env::temp_dir().join(format!("promissory-{}-{}", name, std::process::id()))
}

/// A scheduler whose reporter records every event kind it hears.
fn recording() -> (Scheduler, Arc<Mutex<Vec<RejectionKind>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let scheduler = Scheduler::builder()
        .name("recording")
        .reporter(move |event: &super::RejectionEvent<'_>| sink.lock().push(event.kind))
        .build();
    (scheduler, events)
}

// These tests touch the filesystem from background threads
#[test]
fn spawn_creates_file() {
    let path = scratch("spawn");
    let _ = fs::remove_file(&path);
    let path_for_promise = path.clone();
    let result: Result<(), FsError> = Promise::spawn(move || {
        File::create(&path_for_promise)
            .map(|_| ())
            .map_err(|_| FsError::CreateFile)
    })
    .wait();
    assert!(result.is_ok());
    assert!(File::open(&path).is_ok());
    fs::remove_file(&path).unwrap();
}

#[test]
fn then_creates_file_in_dir() {
    let dir = scratch("then");
    let file = dir.join("file");
    let _ = fs::remove_dir_all(&dir);
    let dir_for_promise = dir.clone();
    let file_for_promise = file.clone();
    let result = Promise::spawn(move || fs::create_dir(&dir_for_promise).map_err(|_| FsError::CreateDir))
        .then(move |res| {
            res.and_then(|_| {
                File::create(&file_for_promise)
                    .map(|_| ())
                    .map_err(|_| FsError::CreateFile)
            })
        })
        .wait();
    assert!(result.is_ok());
    assert!(File::open(&file).is_ok());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn then_skips_work_after_failed_step() {
    let dir = scratch("missing-parent").join("child");
    let attempted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&attempted);
    let result = Promise::spawn(move || fs::create_dir(&dir).map_err(|_| FsError::CreateDir))
        .map(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .wait();
    assert_eq!(result, Err(FsError::CreateDir));
    assert!(!attempted.load(Ordering::SeqCst));
}

#[test]
fn engine_errors_convert_into_custom_reasons() {
    let p: Promise<(), FsError> = Promise::never();
    let result = p.timeout(Duration::from_millis(5)).wait();
    assert_eq!(result, Err(FsError::Engine(Error::Timeout(Duration::from_millis(5)))));
}

#[test]
fn settles_only_once() {
    let (p, resolver) = Promise::<i32>::pending();
    assert!(resolver.resolve(1));
    assert!(!resolver.resolve(2));
    assert!(!resolver.reject(Error::msg("late")));
    assert!(resolver.is_settled());
    assert_eq!(p.wait(), Ok(1));
}

#[test]
fn rejection_is_final_too() {
    let (p, resolver) = Promise::<i32>::pending();
    assert!(resolver.reject(Error::msg("first")));
    assert!(!resolver.resolve(1));
    assert_eq!(p.wait(), Err(Error::msg("first")));
}

#[test]
fn nested_promises_flatten() {
    let p: Promise<i32> = Promise::resolve_from(Promise::resolve_from(Promise::resolve(1)));
    assert_eq!(p.wait(), Ok(1));

    let (outer, outer_resolver) = Promise::<i32>::pending();
    let (inner, inner_resolver) = Promise::<i32>::pending();
    outer_resolver.resolve_with(inner);
    assert!(outer.is_pending());
    inner_resolver.resolve(7);
    assert_eq!(outer.wait(), Ok(7));
}

#[test]
fn then_can_return_a_pending_promise() {
    let (inner, resolver) = Promise::<i32>::pending();
    let p: Promise<i32> = Promise::resolve(1);
    let chained = p.then(move |_| inner);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(10));
        resolver.resolve(9);
    });
    assert_eq!(chained.wait(), Ok(9));
    handle.join().unwrap();
}

#[test]
fn mutual_forwarding_is_a_cycle() {
    let (a, resolve_a) = Promise::<i32>::pending();
    let (b, resolve_b) = Promise::<i32>::pending();
    resolve_a.resolve_with(b.clone());
    resolve_b.resolve_with(a.clone());
    assert_eq!(a.wait(), Err(Error::ChainingCycle));
    assert_eq!(b.wait(), Err(Error::ChainingCycle));
}

#[test]
fn reactions_never_run_synchronously() {
    let scheduler = Scheduler::builder().build();
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    let p = scheduler.enter(|| {
        let p: Promise<i32> = Promise::resolve(1);
        p.then(move |res| {
            flag.store(true, Ordering::SeqCst);
            res
        })
    });
    assert!(!ran.load(Ordering::SeqCst));
    scheduler.run_until_stalled();
    assert!(ran.load(Ordering::SeqCst));
    assert!(p.is_fulfilled());
}

#[test]
fn reactions_run_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (p, resolver) = Promise::<i32>::pending();
    let reactions: Vec<Promise<()>> = (0..4)
        .map(|i| {
            let order = Arc::clone(&order);
            p.map(move |_| {
                order.lock().push(i);
                Ok(())
            })
        })
        .collect();
    resolver.resolve(0);
    Promise::all(reactions).wait().unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn state_reports_handled_rejections() {
    let scheduler = Scheduler::builder().track_rejections(false).build();
    let (p, resolver) = scheduler.enter(Promise::<i32>::pending);
    assert_eq!(p.state(), State::Pending);
    resolver.reject(Error::msg("x"));
    assert_eq!(p.state(), State::Rejected { handled: false });
    let caught = p.catch(|_| Ok(0));
    assert_eq!(caught.wait(), Ok(0));
    assert_eq!(p.state(), State::Rejected { handled: true });
    assert!(p.is_rejected());
}

#[test]
fn all_keeps_input_order() {
    let ps: Vec<Promise<i32>> = vec![
        Promise::resolve(1).delay(Duration::from_millis(30)),
        Promise::resolve(2).delay(Duration::from_millis(5)),
        Promise::resolve(3),
    ];
    assert_eq!(Promise::all(ps).wait(), Ok(vec![1, 2, 3]));
}

#[test]
fn all_accepts_plain_results() {
    let inputs: Vec<Result<i32, Error>> = vec![Ok(1), Ok(2)];
    assert_eq!(Promise::all(inputs).wait(), Ok(vec![1, 2]));
}

#[test]
fn all_rejects_with_first_rejection() {
    let ps: Vec<Promise<i32>> = vec![
        Promise::resolve(1).delay(Duration::from_millis(20)),
        Promise::reject(Error::msg("slow")).delay(Duration::from_millis(40)),
        Promise::reject(Error::msg("fast")).delay(Duration::from_millis(5)),
    ];
    assert_eq!(Promise::all(ps).wait(), Err(Error::msg("fast")));
}

#[test]
fn all_rejects_when_input_iterator_panics() {
    let inputs = (0..3).map(|i| {
        if i == 2 {
            panic!("bad input");
        }
        Promise::<i32>::resolve(i)
    });
    assert_eq!(
        Promise::all(inputs).wait(),
        Err(Error::Panicked("bad input".into()))
    );
}

#[test]
fn race_picks_the_fastest() {
    let ps: Vec<Promise<char>> = vec![
        Promise::resolve('a').delay(Duration::from_millis(50)),
        Promise::resolve('b').delay(Duration::from_millis(10)),
    ];
    assert_eq!(Promise::race(ps).wait(), Ok('b'));
}

#[test]
fn race_of_nothing_never_settles() {
    let p = Promise::<i32>::race(Vec::<Promise<i32>>::new());
    assert_eq!(p.wait_timeout(Duration::from_millis(20)), None);
}

#[test]
fn race_prefers_already_settled_inputs_in_order() {
    let (pending, _resolver) = Promise::<i32>::pending();
    let inputs: Vec<Resolution<i32, Error>> = vec![
        Resolution::Adopt(pending),
        Resolution::Fulfill(1),
        Resolution::Fulfill(2),
    ];
    assert_eq!(Promise::race(inputs).wait(), Ok(1));
}

#[test]
fn any_aggregates_reasons_in_input_order() {
    let ps: Vec<Promise<i32>> = vec![
        Promise::reject(Error::msg("first")).delay(Duration::from_millis(20)),
        Promise::reject(Error::msg("second")),
    ];
    assert_eq!(
        Promise::any(ps).wait(),
        Err(AggregateError {
            reasons: vec![Error::msg("first"), Error::msg("second")],
        })
    );
}

#[test]
fn any_fulfills_with_first_fulfillment() {
    let ps: Vec<Promise<i32>> = vec![
        Promise::resolve(1).delay(Duration::from_millis(40)),
        Promise::reject(Error::msg("nope")),
        Promise::resolve(3).delay(Duration::from_millis(5)),
    ];
    assert_eq!(Promise::any(ps).wait(), Ok(3));
}

#[test]
fn any_of_nothing_rejects() {
    let p = Promise::<i32>::any(Vec::<Promise<i32>>::new());
    assert_eq!(p.wait(), Err(AggregateError { reasons: vec![] }));
}

#[test]
fn settle_never_rejects() {
    let ps: Vec<Promise<i32>> = vec![
        Promise::reject(Error::msg("a")).delay(Duration::from_millis(10)),
        Promise::resolve(2),
    ];
    let settled = Promise::settle(ps).wait().unwrap();
    assert_eq!(
        settled,
        vec![Settlement::Rejected(Error::msg("a")), Settlement::Fulfilled(2)]
    );
    assert!(settled[0].is_rejected());
    assert_eq!(settled[1].clone().into_result(), Ok(2));
}

#[test]
fn unhandled_rejection_is_reported_once() {
    let (scheduler, events) = recording();
    scheduler.enter(|| {
        let _p: Promise<i32> = Promise::reject(Error::msg("dropped"));
    });
    scheduler.run_until_stalled();
    scheduler.run_until_stalled();
    assert_eq!(*events.lock(), vec![RejectionKind::Unhandled]);
}

#[test]
fn handler_attached_in_same_turn_suppresses_report() {
    let (scheduler, events) = recording();
    let caught = scheduler.enter(|| {
        let p: Promise<i32> = Promise::reject(Error::msg("caught"));
        p.catch(|_| Ok(0))
    });
    assert_eq!(caught.wait(), Ok(0));
    assert!(events.lock().is_empty());
}

#[test]
fn late_handler_retracts_report() {
    let (scheduler, events) = recording();
    let p = scheduler.enter(|| Promise::<i32>::reject(Error::msg("late")));
    scheduler.run_until_stalled();
    assert_eq!(*events.lock(), vec![RejectionKind::Unhandled]);
    assert_eq!(p.catch(|_| Ok(1)).wait(), Ok(1));
    assert_eq!(
        *events.lock(),
        vec![RejectionKind::Unhandled, RejectionKind::Handled]
    );
}

#[test]
fn rejection_passed_through_map_is_reported_once() {
    let (scheduler, events) = recording();
    scheduler.enter(|| {
        let p: Promise<i32> = Promise::reject(Error::msg("x"));
        let _ = p.then_with(Some(|v: i32| Ok(v + 1)), None::<fn(Error) -> Result<i32, Error>>);
    });
    scheduler.run_until_stalled();
    assert_eq!(*events.lock(), vec![RejectionKind::Unhandled]);
}

#[test]
fn tracking_can_be_disabled() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let scheduler = Scheduler::builder()
        .track_rejections(false)
        .reporter(move |event: &super::RejectionEvent<'_>| sink.lock().push(event.kind))
        .build();
    scheduler.enter(|| {
        let _p: Promise<i32> = Promise::reject(Error::msg("quiet"));
    });
    scheduler.run_until_stalled();
    assert!(events.lock().is_empty());
}

#[test]
fn timeout_passes_through_early_settlement() {
    let p: Promise<i32> = Promise::resolve(1);
    let start = Instant::now();
    assert_eq!(p.timeout(Duration::from_secs(5)).wait(), Ok(1));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn timeout_swallows_late_rejection() {
    let (scheduler, events) = recording();
    let (p, resolver) = scheduler.enter(Promise::<i32>::pending);
    let timed = p.timeout(Duration::from_millis(10));
    assert_eq!(timed.wait(), Err(Error::Timeout(Duration::from_millis(10))));
    resolver.reject(Error::msg("too late"));
    scheduler.run_until_stalled();
    assert!(events.lock().is_empty());
}

#[test]
fn delay_holds_back_rejections() {
    let p: Promise<i32> = Promise::reject(Error::msg("later"));
    let start = Instant::now();
    assert_eq!(p.delay(Duration::from_millis(20)).wait(), Err(Error::msg("later")));
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn panicking_callback_rejects() {
    let p: Promise<i32> = Promise::resolve(1);
    let p = p.map(|_| -> Result<i32, Error> { panic!("boom") });
    assert_eq!(p.wait(), Err(Error::Panicked("boom".into())));
}

#[test]
fn panicking_finally_rejects() {
    let p: Promise<i32> = Promise::resolve(1);
    let p = p.finally(|| panic!("cleanup failed"));
    assert_eq!(p.wait(), Err(Error::Panicked("cleanup failed".into())));
}

#[test]
fn finally_passes_value_through() {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let p: Promise<i32> = Promise::resolve(4);
    assert_eq!(p.finally(move || { c.fetch_add(1, Ordering::SeqCst); }).wait(), Ok(4));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn catch_leaves_fulfillment_alone() {
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    let p: Promise<i32> = Promise::resolve(5);
    let p = p.catch(move |_| {
        flag.store(true, Ordering::SeqCst);
        Ok(0)
    });
    assert_eq!(p.wait(), Ok(5));
    assert!(!called.load(Ordering::SeqCst));
}

struct Later(i32);

impl Thenable<i32, Error> for Later {
    fn then(self: Box<Self>, resolver: Resolver<i32, Error>) {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            resolver.resolve(self.0);
        });
    }
}

struct Broken;

impl Thenable<i32, Error> for Broken {
    fn then(self: Box<Self>, _: Resolver<i32, Error>) {
        panic!("broken thenable");
    }
}

#[test]
fn thenables_are_adopted() {
    let p = Promise::resolve_from(Box::new(Later(3)) as Box<dyn Thenable<i32, Error>>);
    assert_eq!(p.wait(), Ok(3));
}

#[test]
fn panicking_thenable_rejects() {
    let p = Promise::resolve_from(Box::new(Broken) as Box<dyn Thenable<i32, Error>>);
    assert_eq!(p.wait(), Err(Error::Panicked("broken thenable".into())));
}

#[test]
fn thenable_returned_from_then_is_adopted() {
    let p: Promise<i32> = Promise::resolve(1);
    let p = p.then(|res| match res {
        Ok(v) => Resolution::Thenable(Box::new(Later(v + 10))),
        Err(e) => Resolution::Reject(e),
    });
    assert_eq!(p.wait(), Ok(11));
}

#[test]
fn denodeify_settles_from_callback_thread() {
    let double = denodeify(|n: i32, done: Callback<i32, Error>| {
        thread::spawn(move || done(if n < 0 { Err(Error::msg("negative")) } else { Ok(n * 2) }));
    });
    assert_eq!(double(21).wait(), Ok(42));
    assert_eq!(double(-1).wait(), Err(Error::msg("negative")));
}

#[test]
fn coroutine_recovers_from_rejected_yield() {
    let recover = co(|_: ()| {
        let mut step = 0;
        move |input: Resume<i32, Error>| -> Step<i32, i32, Error> {
            step += 1;
            match (step, input) {
                (1, _) => Step::Yield(Promise::reject(Error::msg("first try"))),
                (2, Resume::Error(_)) => Step::Yield(Promise::resolve(8)),
                (_, Resume::Value(v)) => Step::done(Ok(v * 2)),
                (_, other) => Step::done(Err(Error::msg(format!("unexpected {:?}", other)))),
            }
        }
    });
    assert_eq!(recover(()).wait(), Ok(16));
}

#[test]
fn coroutine_panic_rejects() {
    let fails = co(|_: ()| {
        move |_: Resume<i32, Error>| -> Step<i32, i32, Error> { panic!("step failed") }
    });
    assert_eq!(fails(()).wait(), Err(Error::Panicked("step failed".into())));
}

#[test]
fn lift_propagates_rejection() {
    let sum = Promise::<i32, Error>::lift(|values: Vec<i32>| Ok(values.into_iter().sum::<i32>()));
    let ok: Vec<Promise<i32>> = vec![Promise::resolve(1), Promise::resolve(2)];
    let bad: Vec<Promise<i32>> = vec![Promise::resolve(1), Promise::reject(Error::msg("no"))];
    assert_eq!(sum(ok).wait(), Ok(3));
    assert_eq!(sum(bad).wait(), Err(Error::msg("no")));
}

#[test]
fn promises_bind_to_entered_scheduler() {
    let scheduler = Scheduler::builder().name("bound").build();
    let p: Promise<i32> = scheduler.enter(|| Promise::resolve(1));
    assert!(p.scheduler().same(&scheduler));
    assert!(!p.scheduler().same(&Scheduler::current()));
    assert_eq!(p.wait(), Ok(1));
}

#[test]
fn from_result_round_trips() {
    let ok: Promise<i32> = Ok(1).into();
    let err: Promise<i32> = Err(Error::msg("e")).into();
    assert_eq!(ok.wait(), Ok(1));
    assert_eq!(err.wait(), Err(Error::msg("e")));
}

#[test]
fn reactions_keep_order_across_forwarding() {
    let scheduler = Scheduler::builder().build();
    let order = Arc::new(Mutex::new(Vec::new()));
    let (first, first_resolver) = scheduler.enter(Promise::<i32>::pending);
    let (second, second_resolver) = scheduler.enter(Promise::<i32>::pending);

    let o = Arc::clone(&order);
    let _a = first.map(move |v| {
        o.lock().push(("a", v));
        Ok(())
    });
    first_resolver.resolve_with(second);
    let o = Arc::clone(&order);
    let _b = first.map(move |v| {
        o.lock().push(("b", v));
        Ok(())
    });
    second_resolver.resolve(5);
    scheduler.run_until_stalled();
    assert_eq!(*order.lock(), vec![("a", 5), ("b", 5)]);
}

#[test]
fn rejection_from_background_thread_is_not_reported() {
    let (scheduler, events) = recording();
    scheduler.enter(|| {
        for _ in 0..300 {
            let result: Result<i32, Error> = Promise::spawn(|| Err(Error::msg("background"))).wait();
            assert_eq!(result, Err(Error::msg("background")));
        }
    });
    scheduler.run_until_stalled();
    assert!(events.lock().is_empty());
}

#[test]
fn concurrent_mutual_resolution_rejects_instead_of_hanging() {
    use std::sync::Barrier;

    let scheduler = Scheduler::builder().track_rejections(false).build();
    for _ in 0..200 {
        let (a, resolve_a) = scheduler.enter(Promise::<i32>::pending);
        let (b, resolve_b) = scheduler.enter(Promise::<i32>::pending);
        let barrier = Arc::new(Barrier::new(2));
        let threads = vec![(resolve_a, b.clone()), (resolve_b, a.clone())]
            .into_iter()
            .map(|(resolver, target)| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    resolver.resolve_with(target);
                })
            })
            .collect::<Vec<_>>();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(a.state(), State::Rejected { handled: false });
        assert_eq!(a.wait(), Err(Error::ChainingCycle));
        assert_eq!(b.wait(), Err(Error::ChainingCycle));
    }
}

#[test]
fn race_losers_rejecting_later_are_not_reported() {
    let (scheduler, events) = recording();
    let (winner, resolve_winner) = scheduler.enter(Promise::<i32>::pending);
    let (loser, resolve_loser) = scheduler.enter(Promise::<i32>::pending);
    let raced = scheduler.enter(|| Promise::race(vec![winner, loser]));
    resolve_winner.resolve(1);
    assert_eq!(raced.wait(), Ok(1));
    resolve_loser.reject(Error::msg("lost"));
    scheduler.run_until_stalled();
    assert!(events.lock().is_empty());
}

#[test]
fn any_silences_rejections_that_do_not_decide() {
    let (scheduler, events) = recording();
    let (early, reject_early) = scheduler.enter(Promise::<i32>::pending);
    let (winner, resolve_winner) = scheduler.enter(Promise::<i32>::pending);
    let (late, reject_late) = scheduler.enter(Promise::<i32>::pending);
    let first = scheduler.enter(|| Promise::any(vec![early, winner, late]));
    reject_early.reject(Error::msg("early"));
    resolve_winner.resolve(2);
    assert_eq!(first.wait(), Ok(2));
    reject_late.reject(Error::msg("late"));
    scheduler.run_until_stalled();
    assert!(events.lock().is_empty());
}

#[test]
fn panicking_merge_function_rejects() {
    let ps: Vec<Promise<i32>> = vec![Promise::resolve(1), Promise::resolve(2)];
    let merged = Promise::merge(|_: Vec<i32>| -> Result<i32, Error> { panic!("merge failed") }, ps);
    assert_eq!(merged.wait(), Err(Error::Panicked("merge failed".into())));
}

struct Circular(Promise<i32>);

impl Thenable<i32, Error> for Circular {
    fn then(self: Box<Self>, resolver: Resolver<i32, Error>) {
        resolver.resolve_with(self.0);
    }
}

#[test]
fn resolving_with_itself_through_a_thenable_is_a_cycle() {
    let (p, resolver) = Promise::<i32>::pending();
    resolver.settle(Box::new(Circular(p.clone())) as Box<dyn Thenable<i32, Error>>);
    assert_eq!(p.wait(), Err(Error::ChainingCycle));
}
