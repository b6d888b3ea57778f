//! End-to-end scenarios driving the scheduler through `event_hub`'s public
//! API only, the way an embedding application would. Each test owns the
//! process-wide runtime for its duration via `global_init`/`global_exit`;
//! `#[sequential]` keeps them from interleaving since the runtime is a
//! single static, not one instance per test.

use core::ffi::c_void;
use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use event_hub::error::Error;
use event_hub::event::Event;
use event_hub::port::TIME_FOREVER;
use event_hub::task_manager::{self, TaskState};
use event_hub::timer;
use sequential_test::sequential;

fn entry_42(_: *mut c_void) -> i32 {
    42
}

#[test]
#[sequential]
fn s1_hello() {
    event_hub::global_init().unwrap();
    let a = task_manager::task_create("a", 32 * 1024, core::ptr::null_mut(), entry_42).unwrap();
    let result = task_manager::task_join(a, TIME_FOREVER);
    assert_eq!(result, Ok(42));
    event_hub::global_exit();
}

static LOG: [AtomicUsize; 8] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];
static LOG_LEN: AtomicUsize = AtomicUsize::new(0);

fn record(tag: usize) {
    let slot = LOG_LEN.fetch_add(1, Ordering::SeqCst);
    if slot < LOG.len() {
        LOG[slot].store(tag, Ordering::SeqCst);
    }
}

fn yielder_p(_: *mut c_void) -> i32 {
    for _ in 0..4 {
        record(1);
        task_manager::task_yield();
    }
    0
}

fn yielder_q(_: *mut c_void) -> i32 {
    for _ in 0..4 {
        record(2);
        task_manager::task_yield();
    }
    0
}

#[test]
#[sequential]
fn s2_two_yielder_alternation() {
    event_hub::global_init().unwrap();
    LOG_LEN.store(0, Ordering::SeqCst);

    let p = task_manager::task_create("p", 32 * 1024, core::ptr::null_mut(), yielder_p).unwrap();
    let q = task_manager::task_create("q", 32 * 1024, core::ptr::null_mut(), yielder_q).unwrap();

    assert_eq!(task_manager::task_join(p, TIME_FOREVER), Ok(0));
    assert_eq!(task_manager::task_join(q, TIME_FOREVER), Ok(0));

    let len = LOG_LEN.load(Ordering::SeqCst).min(LOG.len());
    let tags: std::vec::Vec<usize> = (0..len).map(|i| LOG[i].load(Ordering::SeqCst)).collect();
    // Each entry alternates between the two tags once both tasks are in the
    // ring; the first entry is whichever of p/q the scheduler ran first.
    for pair in tags.windows(2) {
        assert_ne!(pair[0], pair[1], "two-yielder log was not strictly alternating: {tags:?}");
    }

    event_hub::global_exit();
}

#[test]
#[sequential]
fn s3_join_timeout_leaves_sleeper_waiting() {
    event_hub::global_init().unwrap();

    fn never_wakes(_: *mut c_void) -> i32 {
        let mut event = Event::new("never-signalled");
        let _ = event.wait(TIME_FOREVER);
        0
    }

    // Once `sleeper` parks, main is the only other task in the ring; without
    // a second ready task a blocking `join` would hit the same empty-ring
    // edge case as s5 instead of ever reaching its deadline. `ticker` plays
    // the part `loop_run` would: the thing that keeps calling `timer_check`
    // while main is itself parked waiting on the join's timeout.
    fn ticker(_: *mut c_void) -> i32 {
        for _ in 0..100_000 {
            timer::timer_check();
            task_manager::task_yield();
        }
        0
    }

    let sleeper = task_manager::task_create("sleeper", 32 * 1024, core::ptr::null_mut(), never_wakes).unwrap();
    let driver = task_manager::task_create("ticker", 32 * 1024, core::ptr::null_mut(), ticker).unwrap();
    // Let the sleeper actually park on its event before joining it.
    task_manager::task_yield();

    let result = task_manager::task_join(sleeper, 1);
    assert_eq!(result, Err(Error::Timeout));
    assert_eq!(sleeper.state(), TaskState::Wait);

    task_manager::task_destroy(sleeper);
    task_manager::task_destroy(driver);
    event_hub::global_exit();
}

static WAKE_TICK: AtomicI32 = AtomicI32::new(-1);

#[test]
#[sequential]
fn s4_wake_across_sleep_records_timer_deadline() {
    event_hub::global_init().unwrap();
    WAKE_TICK.store(-1, Ordering::SeqCst);

    fn waiter(_: *mut c_void) -> i32 {
        // 2ms on the host port's 1MHz clock.
        let _ = timer::sleep(2_000);
        WAKE_TICK.store(1, Ordering::SeqCst);
        0
    }

    let a = task_manager::task_create("a", 32 * 1024, core::ptr::null_mut(), waiter).unwrap();
    // `timer_check` is only ever invoked by `loop_run`; drive it by hand here
    // the same way, so the sleeper's deadline actually gets dispatched
    // instead of the only-other-task edge case silently skipping the wait.
    for _ in 0..100_000 {
        timer::timer_check();
        task_manager::task_yield();
        if WAKE_TICK.load(Ordering::SeqCst) == 1 {
            break;
        }
    }
    assert_eq!(WAKE_TICK.load(Ordering::SeqCst), 1, "sleeper never resumed after its deadline");
    assert_eq!(task_manager::task_join(a, TIME_FOREVER), Ok(0));

    event_hub::global_exit();
}

#[test]
#[sequential]
fn s5_no_runnable_task_returns_scheduling_error() {
    event_hub::global_init().unwrap();

    let mut event = Event::new("nobody-else-is-running");
    let result = event.wait(TIME_FOREVER);
    assert_eq!(result, Err(Error::SchedulingError));
    assert_eq!(task_manager::task_self().state(), TaskState::Running);

    event_hub::global_exit();
}

fn returns_immediately(_: *mut c_void) -> i32 {
    0
}

// Calls `loop_exit` from inside the ring rather than before `loop_run`
// starts: `loop_run` resets `stop_flag` to false as its very first step
// (spec §4.3), so a stop request armed before the loop begins would simply
// be discarded. Requesting the stop from a task that runs *during* the
// loop's first pass is the only way `task_yield`'s return sees it set.
fn stop_the_loop(_: *mut c_void) -> i32 {
    task_manager::loop_exit(0);
    0
}

#[test]
#[sequential]
fn s6_finish_drain_after_loop_exit() {
    event_hub::global_init().unwrap();

    let mut tasks = std::vec::Vec::with_capacity(100);
    for i in 0..100 {
        let name: &'static str = std::boxed::Box::leak(format!("t{i}").into_boxed_str());
        let handle = task_manager::task_create(name, 16 * 1024, core::ptr::null_mut(), returns_immediately).unwrap();
        tasks.push(handle);
    }
    let stopper = task_manager::task_create("stopper", 16 * 1024, core::ptr::null_mut(), stop_the_loop).unwrap();

    let code = task_manager::loop_run();
    assert_eq!(code, 0);
    assert_eq!(task_manager::task_join(stopper, TIME_FOREVER), Ok(0));

    for task in tasks {
        assert_eq!(task.state(), TaskState::Finish);
        assert_eq!(task_manager::task_join(task, TIME_FOREVER), Ok(0));
    }

    event_hub::global_exit();
}
