//! Scheduler behavior tests driven through hand-built state machines.
//!
//! Compiled programs provide resume functions generated from async Python;
//! these tests stand in minimal hand-written machines to pin down the
//! scheduling contract: FIFO dispatch, gather ordering and failure
//! propagation, timeout delivery, and cooperative cancellation.

use std::{cell::RefCell, collections::HashMap};

use pretty_assertions::assert_eq;
use pyrite_runtime::{
    POLL_AWAITING, POLL_CANCELLED, RtPoll, RtVal,
    exc::ExcKind,
    heap::HeapData,
    state::{run_until_complete, with_rt},
};

thread_local! {
    /// Per-machine stage counters, keyed by the fake frame handle.
    static STAGE: RefCell<HashMap<u64, u32>> = RefCell::new(HashMap::new());
    /// Cleanup observation log for cancellation tests.
    static CLEANUPS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

fn stage(frame: u64) -> u32 {
    STAGE.with(|s| *s.borrow().get(&frame).unwrap_or(&0))
}

fn advance(frame: u64) {
    STAGE.with(|s| *s.borrow_mut().entry(frame).or_insert(0) += 1);
}

/// `async def task(i): await sleep(0); return i` with `i` packed into the
/// frame handle.
extern "C" fn sleep_then_index(frame: u64, cancel: u32) -> RtPoll {
    if cancel != 0 {
        CLEANUPS.with(|c| c.borrow_mut().push(frame));
        return RtPoll {
            status: POLL_CANCELLED,
            value: RtVal::NONE,
            task: 0,
        };
    }
    if stage(frame) == 0 {
        advance(frame);
        let timer = with_rt(|rt| rt.sched.spawn_timer(0).raw());
        return RtPoll {
            status: POLL_AWAITING,
            value: RtVal::NONE,
            task: timer,
        };
    }
    RtPoll::done(RtVal::from_int(frame as i64))
}

/// A machine that parks on a far-future timer until cancelled.
extern "C" fn sleep_forever(frame: u64, cancel: u32) -> RtPoll {
    if cancel != 0 {
        CLEANUPS.with(|c| c.borrow_mut().push(frame));
        return RtPoll {
            status: POLL_CANCELLED,
            value: RtVal::NONE,
            task: 0,
        };
    }
    let timer = with_rt(|rt| rt.sched.spawn_timer(60_000).raw());
    RtPoll {
        status: POLL_AWAITING,
        value: RtVal::NONE,
        task: timer,
    }
}

/// A machine that fails immediately.
extern "C" fn raise_value_error(_frame: u64, _cancel: u32) -> RtPoll {
    with_rt(|rt| rt.raise(ExcKind::ValueError, "boom"));
    RtPoll::done(RtVal::NONE)
}

#[test]
fn gather_of_hundred_sleepers_sums_indices() {
    let gather = with_rt(|rt| {
        let children: Vec<_> = (0..100).map(|i| rt.sched.spawn(sleep_then_index, i)).collect();
        rt.sched.spawn_gather(children)
    });
    let result = run_until_complete(gather).unwrap();
    let total = with_rt(|rt| {
        let list = result.ref_id().unwrap();
        let HeapData::List(items) = rt.heap.get(list) else {
            panic!("gather result should be a list");
        };
        items.iter().map(|v| v.as_int()).sum::<i64>()
    });
    assert_eq!(total, 4950);
}

#[test]
fn gather_failure_cancels_siblings() {
    let (gather, slow) = with_rt(|rt| {
        let slow = rt.sched.spawn(sleep_forever, 77);
        let failing = rt.sched.spawn(raise_value_error, 0);
        (rt.sched.spawn_gather(vec![slow, failing]), slow)
    });
    let err = run_until_complete(gather).unwrap_err();
    assert_eq!(err.kind, ExcKind::ValueError);
    assert_eq!(err.message, "boom");
    with_rt(|rt| assert!(rt.sched.is_settled(slow)));
    assert!(CLEANUPS.with(|c| c.borrow().contains(&77)));
}

#[test]
fn wait_for_times_out_and_cancels() {
    let wrapper = with_rt(|rt| {
        let inner = rt.sched.spawn(sleep_forever, 5);
        rt.sched.spawn_wait_for(inner, 10)
    });
    let err = run_until_complete(wrapper).unwrap_err();
    assert_eq!(err.kind, ExcKind::TimeoutError);
    // The timed-out machine observed cancellation and ran its cleanup.
    assert!(CLEANUPS.with(|c| c.borrow().contains(&5)));
}

#[test]
fn wait_for_fast_task_passes_result_through() {
    let wrapper = with_rt(|rt| {
        let inner = rt.sched.spawn(sleep_then_index, 9);
        rt.sched.spawn_wait_for(inner, 60_000)
    });
    let result = run_until_complete(wrapper).unwrap();
    assert_eq!(result.as_int(), 9);
}

#[test]
fn cancellation_is_observed_at_suspension() {
    let task = with_rt(|rt| rt.sched.spawn(sleep_forever, 11));
    // Let it park, then cancel.
    let probe = with_rt(|rt| rt.sched.spawn(sleep_then_index, 1));
    run_until_complete(probe).unwrap();
    with_rt(|rt| rt.sched.cancel(task));
    let err = run_until_complete(task).unwrap_err();
    assert_eq!(err.kind, ExcKind::CancelledError);
    assert!(CLEANUPS.with(|c| c.borrow().contains(&11)));
}

#[test]
fn queue_roundtrip_between_tasks() {
    let (get, put) = with_rt(|rt| {
        let queue = rt.heap.alloc(HeapData::Queue(pyrite_runtime::heap::QueueState::default()));
        let get = rt.sched.spawn_queue_get(queue);
        let put = rt.sched.spawn_queue_put(queue, RtVal::from_int(42));
        (get, put)
    });
    let item = run_until_complete(get).unwrap();
    assert_eq!(item.as_int(), 42);
    run_until_complete(put).unwrap();
}

#[test]
fn bounded_queue_put_parks_until_space() {
    let (queue, put2) = with_rt(|rt| {
        let queue = rt.heap.alloc(HeapData::Queue(pyrite_runtime::heap::QueueState {
            capacity: 1,
            ..Default::default()
        }));
        let put1 = rt.sched.spawn_queue_put(queue, RtVal::from_int(1));
        let put2 = rt.sched.spawn_queue_put(queue, RtVal::from_int(2));
        let _ = put1;
        (queue, put2)
    });
    // The second put cannot complete while the queue is full.
    let probe = with_rt(|rt| rt.sched.spawn(sleep_then_index, 2));
    run_until_complete(probe).unwrap();
    with_rt(|rt| assert!(!rt.sched.is_settled(put2)));
    // Draining one item unblocks it.
    let get = with_rt(|rt| rt.sched.spawn_queue_get(queue));
    let first = run_until_complete(get).unwrap();
    assert_eq!(first.as_int(), 1);
    run_until_complete(put2).unwrap();
}
