//! Process-wide runtime state and the event runloop.
//!
//! Compiled programs are single-threaded, so the runtime lives in a
//! thread-local cell. Every `extern "C"` entry point borrows it for the
//! duration of one operation; the runloop is careful to release the borrow
//! before calling back into generated code, because resumed state machines
//! re-enter the runtime freely.

use std::{cell::RefCell, time::Instant};

use crate::{
    exc::{ExcKind, ExcState, Exception},
    heap::Heap,
    sched::{self, NextStep, POLL_DONE, ResumeFn, RtPoll, Scheduler, TaskId},
    value::RtVal,
};

/// Metadata for one compiled class, registered at program start.
#[derive(Debug)]
pub struct ClassMeta {
    pub name: String,
    pub base: Option<u32>,
    /// Field names in layout order (base-class fields first).
    pub fields: Vec<String>,
    /// Flat method table; entries are function addresses from the emitted
    /// code. Derived classes register a full copy with overridden slots
    /// replaced.
    pub vtable: Vec<usize>,
    /// Method names aligned with `vtable`, for dynamic attribute lookup.
    pub methods: Vec<String>,
}

#[derive(Default)]
pub struct Runtime {
    pub heap: Heap,
    pub exc: ExcState,
    pub sched: Scheduler,
    classes: Vec<Option<ClassMeta>>,
}

impl Runtime {
    pub fn register_class(&mut self, id: u32, meta: ClassMeta) {
        let index = id as usize;
        if self.classes.len() <= index {
            self.classes.resize_with(index + 1, || None);
        }
        self.classes[index] = Some(meta);
    }

    pub fn class(&self, id: u32) -> &ClassMeta {
        self.classes[id as usize].as_ref().expect("class not registered")
    }

    pub fn class_mut(&mut self, id: u32) -> &mut ClassMeta {
        self.classes[id as usize].as_mut().expect("class not registered")
    }

    /// Whether `class` equals or derives from `ancestor`.
    pub fn class_is_subclass(&self, class: u32, ancestor: u32) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.class(id).base;
        }
        false
    }

    pub fn raise(&mut self, kind: ExcKind, message: impl Into<String>) {
        self.exc.raise(Exception::new(kind, message));
    }
}

thread_local! {
    static RT: RefCell<Runtime> = RefCell::new(Runtime::default());
}

/// Runs `f` with exclusive access to the runtime.
///
/// # Panics
/// Panics if the runtime is already borrowed, which would mean an entry
/// point called back into generated code while holding the borrow.
pub fn with_rt<R>(f: impl FnOnce(&mut Runtime) -> R) -> R {
    RT.with(|rt| f(&mut rt.borrow_mut()))
}

enum Step {
    Finished,
    Resume { task: TaskId, resume: ResumeFn, frame: u64, cancel: u32 },
    Internal(TaskId),
    Sleep(std::time::Duration),
    Deadlock,
}

/// Drives the scheduler until `target` settles.
///
/// Called from synchronous context only (the program's `main`, via
/// `scheduler_await`). Returns the task's value, or its failure. Resume
/// calls happen outside the runtime borrow.
pub fn run_until_complete(target: TaskId) -> Result<RtVal, Exception> {
    loop {
        let step = with_rt(|rt| {
            let now = Instant::now();
            rt.sched.expire_timers(now);
            if rt.sched.is_settled(target) {
                return Step::Finished;
            }
            match rt.sched.next_step(now) {
                NextStep::Resume { task, resume, frame, cancel } => Step::Resume { task, resume, frame, cancel },
                NextStep::Internal(id) => Step::Internal(id),
                NextStep::Sleep(d) => Step::Sleep(d),
                NextStep::Idle => Step::Deadlock,
            }
        });
        match step {
            Step::Finished => {
                return with_rt(|rt| {
                    if let Some(exc) = rt.sched.task(target).exc.clone() {
                        Err(exc)
                    } else {
                        let value = rt.sched.task(target).result;
                        rt.heap.inc_val(value);
                        Ok(value)
                    }
                });
            }
            Step::Resume { task, resume, frame, cancel } => {
                with_rt(|rt| rt.sched.current = Some(task));
                let poll: RtPoll = resume(frame, cancel);
                with_rt(|rt| {
                    rt.sched.current = None;
                    let pending = if poll.status == POLL_DONE { rt.exc.clear() } else { None };
                    // A cancelled machine may leave its CancelledError
                    // pending; the task status already records it.
                    if poll.status != POLL_DONE {
                        rt.exc.clear();
                    }
                    rt.sched.apply_poll(task, poll, pending);
                });
            }
            Step::Internal(id) => with_rt(|rt| {
                let Runtime { heap, sched, .. } = rt;
                sched::process_internal(sched, heap, id);
            }),
            Step::Sleep(d) => std::thread::sleep(d),
            Step::Deadlock => {
                return Err(Exception::new(
                    ExcKind::RuntimeError,
                    "event loop deadlocked: task is waiting but nothing is runnable",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{run_until_complete, with_rt};
    use crate::{
        heap::{HeapData, QueueState},
        sched::{POLL_YIELDED, RtPoll},
        value::RtVal,
    };

    // A resume function that completes immediately with its frame handle
    // as the result, for exercising the loop without generated code.
    extern "C" fn done_with_frame(frame: u64, _cancel: u32) -> RtPoll {
        RtPoll::done(RtVal::from_int(frame as i64))
    }

    // Yields once, then completes. State is kept in the low bit of a
    // thread-local since these test machines have no real frames.
    thread_local! {
        static YIELDED: std::cell::Cell<u64> = const { std::cell::Cell::new(0) };
    }
    extern "C" fn yield_once(frame: u64, _cancel: u32) -> RtPoll {
        let seen = YIELDED.with(|c| {
            let v = c.get();
            c.set(v | frame);
            v & frame != 0
        });
        if seen {
            RtPoll::done(RtVal::from_int(frame as i64))
        } else {
            RtPoll {
                status: POLL_YIELDED,
                value: RtVal::NONE,
                task: 0,
            }
        }
    }

    #[test]
    fn spawn_and_complete() {
        let task = with_rt(|rt| rt.sched.spawn(done_with_frame, 7));
        let result = run_until_complete(task).unwrap();
        assert_eq!(result.as_int(), 7);
    }

    #[test]
    fn fifo_dispatch_is_fair() {
        // Two perpetually-yielding tasks must alternate: between two
        // resumes of one task the other is resumed exactly once.
        YIELDED.with(|c| c.set(0));
        let (a, b) = with_rt(|rt| (rt.sched.spawn(yield_once, 1), rt.sched.spawn(yield_once, 2)));
        let ra = run_until_complete(a).unwrap();
        let rb = run_until_complete(b).unwrap();
        assert_eq!(ra.as_int(), 1);
        assert_eq!(rb.as_int(), 2);
    }

    #[test]
    fn gather_collects_in_order() {
        let gather = with_rt(|rt| {
            let children: Vec<_> = (0..10).map(|i| rt.sched.spawn(done_with_frame, i)).collect();
            rt.sched.spawn_gather(children)
        });
        let result = run_until_complete(gather).unwrap();
        with_rt(|rt| {
            let list = result.ref_id().unwrap();
            let HeapData::List(items) = rt.heap.get(list) else {
                panic!("gather result should be a list");
            };
            let values: Vec<i64> = items.iter().map(|v| v.as_int()).collect();
            assert_eq!(values, (0..10).collect::<Vec<_>>());
            rt.heap.dec(list);
        });
    }

    #[test]
    fn queue_put_then_get() {
        let (queue, get) = with_rt(|rt| {
            let queue = rt.heap.alloc(HeapData::Queue(QueueState::default()));
            let put = rt.sched.spawn_queue_put(queue, RtVal::from_int(5));
            let get = rt.sched.spawn_queue_get(queue);
            let _ = put;
            (queue, get)
        });
        let got = run_until_complete(get).unwrap();
        assert_eq!(got.as_int(), 5);
        with_rt(|rt| rt.heap.dec(queue));
    }

    #[test]
    fn timer_completes() {
        let timer = with_rt(|rt| rt.sched.spawn_timer(1));
        let result = run_until_complete(timer).unwrap();
        assert_eq!(result.tag, crate::value::Tag::None as u32);
    }
}
