//! Scheduler and queue entry points.
//!
//! Inside an async function, `await` never calls the runtime: the state
//! machine returns an awaiting poll and the runloop wires the dependency.
//! These entry points serve the synchronous edges: spawning, the blocking
//! `scheduler_await` used by generated `main`, and the awaitable
//! constructors (`scheduler_sleep`, queue endpoints, `gather`, `wait_for`)
//! whose handles async code then awaits.

use crate::{
    exc::ExcKind,
    heap::{HeapData, HeapId, QueueState},
    sched::{ResumeFn, TaskId, TaskStatus},
    state::{run_until_complete, with_rt},
    value::RtVal,
};

/// Spawns a state machine as a task; it joins the back of the ready
/// queue. The frame reference is consumed (the task owns it).
#[unsafe(no_mangle)]
pub extern "C" fn scheduler_spawn(resume: ResumeFn, frame: u64) -> u64 {
    with_rt(|rt| rt.sched.spawn(resume, frame).raw())
}

/// Blocks until the task settles and returns its value. On failure the
/// exception is left pending for the caller's check. Only callable from
/// synchronous context.
#[unsafe(no_mangle)]
pub extern "C" fn scheduler_await(task: u64) -> RtVal {
    match run_until_complete(TaskId::from_raw(task)) {
        Ok(value) => value,
        Err(exc) => {
            with_rt(|rt| rt.exc.raise(exc));
            RtVal::NONE
        }
    }
}

/// Creates a timer task completing after `ms` milliseconds. `sleep(0)`
/// yields to the back of the ready queue.
#[unsafe(no_mangle)]
pub extern "C" fn scheduler_sleep(ms: u64) -> u64 {
    with_rt(|rt| rt.sched.spawn_timer(ms).raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn scheduler_cancel(task: u64) {
    with_rt(|rt| rt.sched.cancel(TaskId::from_raw(task)));
}

/// `gather(t1..tn)`: completes with a list of results in argument order,
/// or cancels the siblings and propagates the first failure.
///
/// # Safety
/// `tasks` must point to `n` valid task handles.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn scheduler_gather(tasks: *const u64, n: u64) -> u64 {
    let children: Vec<TaskId> = if n == 0 {
        Vec::new()
    } else {
        // SAFETY: caller passes a stack array of n handles.
        unsafe { std::slice::from_raw_parts(tasks, n as usize) }
            .iter()
            .map(|raw| TaskId::from_raw(*raw))
            .collect()
    };
    with_rt(|rt| rt.sched.spawn_gather(children).raw())
}

/// `gather(*tasks)` over a list of already-spawned task handles.
#[unsafe(no_mangle)]
pub extern "C" fn scheduler_gather_list(list: u64) -> u64 {
    with_rt(|rt| {
        let children: Vec<TaskId> = match rt.heap.get(HeapId::from_raw(list)) {
            HeapData::List(items) => items.iter().map(|v| TaskId::from_raw(v.bits)).collect(),
            _ => Vec::new(),
        };
        rt.sched.spawn_gather(children).raw()
    })
}

/// `wait_for(task, ms)`: the awaiter receives the task's outcome, or
/// `TimeoutError` after the deadline cancels it.
#[unsafe(no_mangle)]
pub extern "C" fn scheduler_wait_for(task: u64, ms: u64) -> u64 {
    with_rt(|rt| rt.sched.spawn_wait_for(TaskId::from_raw(task), ms).raw())
}

/// Takes a settled task's result (owned). Re-raises the task's failure as
/// the pending exception when it failed or was cancelled.
#[unsafe(no_mangle)]
pub extern "C" fn task_result(task: u64) -> RtVal {
    with_rt(|rt| {
        let id = TaskId::from_raw(task);
        if let Some(exc) = rt.sched.task(id).exc.clone() {
            rt.exc.raise(exc);
            return RtVal::NONE;
        }
        let value = rt.sched.task(id).result;
        rt.heap.inc_val(value);
        value
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn task_done(task: u64) -> bool {
    with_rt(|rt| rt.sched.is_settled(TaskId::from_raw(task)))
}

#[unsafe(no_mangle)]
pub extern "C" fn task_cancelled(task: u64) -> bool {
    with_rt(|rt| rt.sched.task(TaskId::from_raw(task)).status == TaskStatus::Cancelled)
}

/// Enters a no-cancel scope on the currently running task; cancellation
/// delivered inside is queued and observed after the matching exit.
#[unsafe(no_mangle)]
pub extern "C" fn shield_enter() {
    with_rt(|rt| rt.sched.shield_enter());
}

#[unsafe(no_mangle)]
pub extern "C" fn shield_exit() {
    with_rt(|rt| rt.sched.shield_exit());
}

/// `Queue(cap)`; 0 means unbounded.
#[unsafe(no_mangle)]
pub extern "C" fn queue_new(cap: i64) -> u64 {
    with_rt(|rt| {
        rt.heap
            .alloc(HeapData::Queue(QueueState {
                capacity: cap.max(0) as usize,
                ..QueueState::default()
            }))
            .raw()
    })
}

/// Awaitable put; parks while the queue is full. Consumes the reference
/// to `value`.
#[unsafe(no_mangle)]
pub extern "C" fn queue_put(queue: u64, value: RtVal) -> u64 {
    with_rt(|rt| rt.sched.spawn_queue_put(HeapId::from_raw(queue), value).raw())
}

/// Awaitable get; parks while the queue is empty.
#[unsafe(no_mangle)]
pub extern "C" fn queue_get(queue: u64) -> u64 {
    with_rt(|rt| rt.sched.spawn_queue_get(HeapId::from_raw(queue)).raw())
}

/// Synchronous put; raises `QueueFull` instead of parking. Consumes the
/// reference to `value` (released on failure).
#[unsafe(no_mangle)]
pub extern "C" fn queue_put_nowait(queue: u64, value: RtVal) {
    with_rt(|rt| {
        let id = HeapId::from_raw(queue);
        let outcome = match rt.heap.get_mut(id) {
            HeapData::Queue(state) => {
                if state.is_full() {
                    Err(true)
                } else {
                    state.items.push_back(value);
                    Ok(state.getters.pop_front())
                }
            }
            _ => Err(false),
        };
        match outcome {
            Ok(Some(getter)) => rt.sched.make_ready(getter),
            Ok(None) => {}
            Err(full) => {
                rt.heap.dec_val(value);
                if full {
                    rt.raise(ExcKind::QueueFull, "");
                }
            }
        }
    });
}

/// Synchronous get; raises `QueueEmpty` instead of parking.
#[unsafe(no_mangle)]
pub extern "C" fn queue_get_nowait(queue: u64) -> RtVal {
    with_rt(|rt| {
        let id = HeapId::from_raw(queue);
        let outcome = match rt.heap.get_mut(id) {
            HeapData::Queue(state) => state.items.pop_front().map(|item| (item, state.putters.pop_front())),
            _ => return RtVal::NONE,
        };
        match outcome {
            Some((item, woken)) => {
                if let Some(putter) = woken {
                    rt.sched.make_ready(putter);
                }
                item
            }
            None => {
                rt.raise(ExcKind::QueueEmpty, "");
                RtVal::NONE
            }
        }
    })
}
