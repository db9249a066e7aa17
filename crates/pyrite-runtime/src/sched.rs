//! Single-threaded cooperative task scheduler.
//!
//! Compiled async functions are state machines; the scheduler is the only
//! component that drives them. A resume call runs the machine up to its
//! next suspension and reports back through [`RtPoll`]: done with a value,
//! yielded (cooperative reschedule), awaiting another task, or cancelled.
//!
//! Scheduling structures are exactly the classic pair: a FIFO ready queue
//! and a min-heap of timer deadlines. Tasks enqueued in program order are
//! dispatched in FIFO order; `sleep(0)` re-queues at the back; `sleep(d)`
//! parks in the timer heap. Cancellation is cooperative: it is observed
//! only when a task is resumed, via the `cancel` argument of the resume
//! function, and a task may defer delivery by entering a shield scope.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, VecDeque},
    time::{Duration, Instant},
};

use crate::{
    exc::{ExcKind, Exception},
    heap::{Heap, HeapData, HeapId},
    value::RtVal,
};

/// Resume entry point of a compiled state machine.
///
/// `frame` is the heap handle of the machine's frame; `cancel` is non-zero
/// when cancellation should be delivered at this suspension point.
pub type ResumeFn = extern "C" fn(frame: u64, cancel: u32) -> RtPoll;

pub const POLL_DONE: u32 = 0;
pub const POLL_YIELDED: u32 = 1;
pub const POLL_AWAITING: u32 = 2;
pub const POLL_CANCELLED: u32 = 3;

/// Result of one resume call, mirrored by the emitted C header.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RtPoll {
    pub status: u32,
    pub value: RtVal,
    /// Task handle being awaited when `status == POLL_AWAITING`.
    pub task: u64,
}

impl RtPoll {
    pub fn done(value: RtVal) -> Self {
        Self { status: POLL_DONE, value, task: 0 }
    }
}

/// Opaque task handle. Raw form is `index + 1`; 0 is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self((raw - 1) as u32)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        u64::from(self.0) + 1
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ready,
    Waiting,
    Done,
    Cancelled,
}

/// What kind of work a task represents.
///
/// Coroutines are the compiled state machines. The other kinds are
/// scheduler-internal awaitables: timers, queue endpoints, `gather`, and
/// `wait_for` wrappers. Internal kinds are processed inside the runloop
/// rather than through a resume function.
pub enum TaskKind {
    Coroutine { resume: ResumeFn, frame: u64 },
    Timer { deadline: Instant },
    Gather { children: Vec<TaskId> },
    QueueGet { queue: HeapId },
    QueuePut { queue: HeapId, value: RtVal },
    WaitFor { inner: TaskId, timer: TaskId },
}

impl std::fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coroutine { frame, .. } => write!(f, "Coroutine(frame={frame})"),
            Self::Timer { deadline } => write!(f, "Timer({deadline:?})"),
            Self::Gather { children } => write!(f, "Gather({} children)", children.len()),
            Self::QueueGet { queue } => write!(f, "QueueGet({queue:?})"),
            Self::QueuePut { queue, .. } => write!(f, "QueuePut({queue:?})"),
            Self::WaitFor { inner, timer } => write!(f, "WaitFor({inner:?}, {timer:?})"),
        }
    }
}

#[derive(Debug)]
pub struct Task {
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Completion value; owns one reference when it is a heap value.
    pub result: RtVal,
    /// Failure, when the task completed by raising.
    pub exc: Option<Exception>,
    /// Tasks to wake when this one settles.
    pub awaiters: Vec<TaskId>,
    pub cancel_requested: bool,
    /// Non-zero while inside a no-cancel scope; delivery is deferred.
    pub shield: u32,
}

/// One step the runloop should take next. Computed under the runtime
/// borrow; `Resume` is executed outside it so state machines can call back
/// into the runtime.
#[derive(Debug)]
pub enum NextStep {
    Resume { task: TaskId, resume: ResumeFn, frame: u64, cancel: u32 },
    /// An internal awaitable (gather, queue endpoint, wait_for) to process.
    Internal(TaskId),
    /// Nothing ready; sleep until the next timer deadline.
    Sleep(Duration),
    /// Nothing ready and no timers pending.
    Idle,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<Task>,
    ready: VecDeque<TaskId>,
    timers: BinaryHeap<Reverse<(Instant, u64, TaskId)>>,
    /// Task currently being resumed, for shield bookkeeping.
    pub current: Option<TaskId>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.index()]
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.index()]
    }

    fn add_task(&mut self, kind: TaskKind, status: TaskStatus) -> TaskId {
        let id = TaskId(self.tasks.len() as u32);
        self.tasks.push(Task {
            kind,
            status,
            result: RtVal::NONE,
            exc: None,
            awaiters: Vec::new(),
            cancel_requested: false,
            shield: 0,
        });
        id
    }

    /// Spawns a compiled coroutine; it joins the back of the ready queue.
    pub fn spawn(&mut self, resume: ResumeFn, frame: u64) -> TaskId {
        let id = self.add_task(TaskKind::Coroutine { resume, frame }, TaskStatus::Ready);
        self.ready.push_back(id);
        id
    }

    /// Creates a timer task completing `ms` milliseconds from now.
    ///
    /// `sleep(0)` still goes through the timer heap with an immediate
    /// deadline, which lands the sleeper behind everything already ready.
    pub fn spawn_timer(&mut self, ms: u64) -> TaskId {
        let deadline = Instant::now() + Duration::from_millis(ms);
        let id = self.add_task(TaskKind::Timer { deadline }, TaskStatus::Waiting);
        self.seq += 1;
        self.timers.push(Reverse((deadline, self.seq, id)));
        id
    }

    /// Creates a gather over already-spawned child tasks.
    pub fn spawn_gather(&mut self, children: Vec<TaskId>) -> TaskId {
        let id = self.add_task(TaskKind::Gather { children: children.clone() }, TaskStatus::Ready);
        for child in children {
            if self.tasks[child.index()].status != TaskStatus::Done
                && self.tasks[child.index()].status != TaskStatus::Cancelled
            {
                self.tasks[child.index()].awaiters.push(id);
            }
        }
        // Process once immediately in case every child already settled.
        self.ready.push_back(id);
        id
    }

    pub fn spawn_queue_get(&mut self, queue: HeapId) -> TaskId {
        let id = self.add_task(TaskKind::QueueGet { queue }, TaskStatus::Ready);
        self.ready.push_back(id);
        id
    }

    pub fn spawn_queue_put(&mut self, queue: HeapId, value: RtVal) -> TaskId {
        let id = self.add_task(TaskKind::QueuePut { queue, value }, TaskStatus::Ready);
        self.ready.push_back(id);
        id
    }

    /// `wait_for(task, ms)`: completes with the task's outcome, or cancels
    /// it and fails with `TimeoutError` when the timer fires first.
    pub fn spawn_wait_for(&mut self, inner: TaskId, ms: u64) -> TaskId {
        let timer = self.spawn_timer(ms);
        let id = self.add_task(TaskKind::WaitFor { inner, timer }, TaskStatus::Ready);
        self.tasks[inner.index()].awaiters.push(id);
        self.tasks[timer.index()].awaiters.push(id);
        self.ready.push_back(id);
        id
    }

    pub fn is_settled(&self, id: TaskId) -> bool {
        matches!(self.tasks[id.index()].status, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// Requests cooperative cancellation of a task.
    ///
    /// Settled tasks ignore the request. Timers cancel immediately (there
    /// is no user code to unwind). Coroutines are made ready so their next
    /// resume observes the cancel flag — unless shielded, in which case
    /// delivery waits for the shield to exit.
    pub fn cancel(&mut self, id: TaskId) {
        if self.is_settled(id) {
            return;
        }
        enum Act {
            SettleNow,
            Wake,
            Children(Vec<TaskId>),
            Nothing,
        }
        self.tasks[id.index()].cancel_requested = true;
        let act = {
            let task = &self.tasks[id.index()];
            match &task.kind {
                // Timers have no user code to unwind.
                TaskKind::Timer { .. } => Act::SettleNow,
                // A waiting coroutine is made ready so its next resume
                // observes the cancel flag; shielded tasks wait for the
                // shield to exit.
                TaskKind::Coroutine { .. } => {
                    if task.shield == 0 && task.status == TaskStatus::Waiting {
                        Act::Wake
                    } else {
                        Act::Nothing
                    }
                }
                TaskKind::Gather { children } => Act::Children(children.clone()),
                TaskKind::WaitFor { inner, timer } => Act::Children(vec![*inner, *timer]),
                // Parked queue endpoints settle as cancelled when the
                // runloop reprocesses them.
                TaskKind::QueueGet { .. } | TaskKind::QueuePut { .. } => {
                    if task.status == TaskStatus::Waiting {
                        Act::Wake
                    } else {
                        Act::Nothing
                    }
                }
            }
        };
        match act {
            Act::SettleNow => self.complete_cancelled(id),
            Act::Wake => {
                self.tasks[id.index()].status = TaskStatus::Ready;
                self.ready.push_back(id);
            }
            Act::Children(children) => {
                for child in children {
                    self.cancel(child);
                }
            }
            Act::Nothing => {}
        }
    }

    /// Settles a task as done with `result` and wakes its awaiters.
    pub fn complete_done(&mut self, id: TaskId, result: RtVal) {
        let task = &mut self.tasks[id.index()];
        task.status = TaskStatus::Done;
        task.result = result;
        self.wake_awaiters(id);
    }

    /// Settles a task as failed and wakes its awaiters.
    pub fn complete_failed(&mut self, id: TaskId, exc: Exception) {
        let task = &mut self.tasks[id.index()];
        task.status = TaskStatus::Done;
        task.exc = Some(exc);
        self.wake_awaiters(id);
    }

    pub fn complete_cancelled(&mut self, id: TaskId) {
        let task = &mut self.tasks[id.index()];
        task.status = TaskStatus::Cancelled;
        task.exc = Some(Exception::new(ExcKind::CancelledError, ""));
        self.wake_awaiters(id);
    }

    fn wake_awaiters(&mut self, id: TaskId) {
        let awaiters = std::mem::take(&mut self.tasks[id.index()].awaiters);
        for awaiter in awaiters {
            let task = &mut self.tasks[awaiter.index()];
            if task.status == TaskStatus::Waiting {
                task.status = TaskStatus::Ready;
                self.ready.push_back(awaiter);
            }
        }
    }

    /// Records that `id` awaits `target`; wakes immediately if `target`
    /// already settled.
    pub fn register_await(&mut self, id: TaskId, target: TaskId) {
        if self.is_settled(target) {
            self.tasks[id.index()].status = TaskStatus::Ready;
            self.ready.push_back(id);
        } else {
            self.tasks[id.index()].status = TaskStatus::Waiting;
            self.tasks[target.index()].awaiters.push(id);
        }
    }

    /// Moves expired timers to done, waking their awaiters.
    pub fn expire_timers(&mut self, now: Instant) {
        while let Some(Reverse((deadline, _, id))) = self.timers.peek().copied() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            if !self.is_settled(id) {
                self.complete_done(id, RtVal::NONE);
            }
        }
    }

    /// Picks the next runloop step. Expired timers must already have been
    /// drained for `now`.
    pub fn next_step(&mut self, now: Instant) -> NextStep {
        while let Some(id) = self.ready.pop_front() {
            let task = &self.tasks[id.index()];
            if task.status != TaskStatus::Ready {
                continue;
            }
            match &task.kind {
                TaskKind::Coroutine { resume, frame } => {
                    let cancel = u32::from(task.cancel_requested && task.shield == 0);
                    return NextStep::Resume {
                        task: id,
                        resume: *resume,
                        frame: *frame,
                        cancel,
                    };
                }
                TaskKind::Timer { .. } => continue,
                _ => return NextStep::Internal(id),
            }
        }
        match self.timers.peek() {
            Some(Reverse((deadline, _, _))) => NextStep::Sleep(deadline.saturating_duration_since(now)),
            None => NextStep::Idle,
        }
    }

    /// Applies the poll result of a coroutine resume.
    ///
    /// `pending_exc` is the exception left pending by the resume call, if
    /// any; a `Done` poll with a pending exception means the task failed.
    pub fn apply_poll(&mut self, id: TaskId, poll: RtPoll, pending_exc: Option<Exception>) {
        match poll.status {
            POLL_DONE => match pending_exc {
                Some(exc) => self.complete_failed(id, exc),
                None => self.complete_done(id, poll.value),
            },
            POLL_CANCELLED => self.complete_cancelled(id),
            POLL_YIELDED => {
                self.tasks[id.index()].status = TaskStatus::Ready;
                self.ready.push_back(id);
            }
            _ => {
                // Awaiting. A cancellation that arrived while running is
                // delivered at this suspension: skip the wait and resume
                // immediately with the cancel flag up.
                let task = &mut self.tasks[id.index()];
                if task.cancel_requested && task.shield == 0 {
                    task.status = TaskStatus::Ready;
                    self.ready.push_back(id);
                } else {
                    self.register_await(id, TaskId::from_raw(poll.task));
                }
            }
        }
    }

    /// Enters a no-cancel scope on the current task.
    pub fn shield_enter(&mut self) {
        if let Some(id) = self.current {
            self.tasks[id.index()].shield += 1;
        }
    }

    /// Exits a no-cancel scope; queued cancellation is re-delivered at the
    /// next suspension point.
    pub fn shield_exit(&mut self) {
        if let Some(id) = self.current {
            let task = &mut self.tasks[id.index()];
            task.shield = task.shield.saturating_sub(1);
        }
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    /// Re-queues an internal task for another settlement check.
    pub fn park_internal(&mut self, id: TaskId) {
        self.tasks[id.index()].status = TaskStatus::Waiting;
    }

    pub fn make_ready(&mut self, id: TaskId) {
        let task = &mut self.tasks[id.index()];
        if task.status == TaskStatus::Waiting {
            task.status = TaskStatus::Ready;
            self.ready.push_back(id);
        }
    }
}

/// Settles internal awaitables. Lives outside `Scheduler` because queue
/// endpoints and gather results need heap access.
pub fn process_internal(sched: &mut Scheduler, heap: &mut Heap, id: TaskId) {
    if sched.is_settled(id) {
        return;
    }
    let cancelled = sched.task(id).cancel_requested;
    match &sched.task(id).kind {
        TaskKind::Gather { children } => {
            let children = children.clone();
            if let Some(failed) = children
                .iter()
                .find(|c| sched.is_settled(**c) && sched.task(**c).exc.is_some())
            {
                // First failure cancels the siblings and is propagated once
                // every child has settled.
                let exc = sched.task(*failed).exc.clone().expect("failed child has exception");
                for child in &children {
                    if !sched.is_settled(*child) {
                        sched.cancel(*child);
                    }
                }
                if children.iter().all(|c| sched.is_settled(*c)) {
                    sched.complete_failed(id, exc);
                } else {
                    sched.park_internal(id);
                }
            } else if children.iter().all(|c| sched.is_settled(*c)) {
                let results: Vec<RtVal> = children
                    .iter()
                    .map(|c| {
                        let v = sched.task(*c).result;
                        heap.inc_val(v);
                        v
                    })
                    .collect();
                let list = heap.alloc(HeapData::List(results));
                sched.complete_done(id, RtVal::from_ref(list));
            } else {
                sched.park_internal(id);
            }
        }
        TaskKind::QueueGet { queue } => {
            let queue = *queue;
            if cancelled {
                remove_parked(heap, queue, id);
                sched.complete_cancelled(id);
                return;
            }
            let HeapData::Queue(state) = heap.get_mut(queue) else {
                sched.complete_failed(id, Exception::new(ExcKind::TypeError, "not a queue"));
                return;
            };
            if let Some(item) = state.items.pop_front() {
                let woken = state.putters.pop_front();
                sched.complete_done(id, item);
                // Space opened up; let the oldest parked putter retry.
                if let Some(putter) = woken {
                    sched.make_ready(putter);
                }
            } else {
                state.getters.push_back(id);
                sched.park_internal(id);
            }
        }
        TaskKind::QueuePut { queue, value } => {
            let (queue, value) = (*queue, *value);
            if cancelled {
                remove_parked(heap, queue, id);
                heap.dec_val(value);
                sched.complete_cancelled(id);
                return;
            }
            let HeapData::Queue(state) = heap.get_mut(queue) else {
                sched.complete_failed(id, Exception::new(ExcKind::TypeError, "not a queue"));
                return;
            };
            if state.is_full() {
                state.putters.push_back(id);
                sched.park_internal(id);
            } else {
                state.items.push_back(value);
                let woken = state.getters.pop_front();
                sched.complete_done(id, RtVal::NONE);
                if let Some(getter) = woken {
                    sched.make_ready(getter);
                }
            }
        }
        TaskKind::WaitFor { inner, timer } => {
            let (inner, timer) = (*inner, *timer);
            if sched.is_settled(inner) {
                let timer_fired = sched.is_settled(timer) && sched.task(timer).status == TaskStatus::Done;
                sched.cancel(timer);
                let (status, exc) = (sched.task(inner).status, sched.task(inner).exc.clone());
                if cancelled {
                    sched.complete_cancelled(id);
                } else if status == TaskStatus::Cancelled && timer_fired {
                    // The deadline fired and the task has finished
                    // unwinding; the awaiter sees a timeout.
                    sched.complete_failed(id, Exception::new(ExcKind::TimeoutError, ""));
                } else if let Some(exc) = exc {
                    sched.complete_failed(id, exc);
                } else {
                    let v = sched.task(inner).result;
                    heap.inc_val(v);
                    sched.complete_done(id, v);
                }
            } else if sched.is_settled(timer) && sched.task(timer).status == TaskStatus::Done {
                // Deadline hit first: cancel the task; the wrapper settles
                // when the task finishes unwinding and wakes it again.
                sched.cancel(inner);
                if sched.is_settled(inner) {
                    sched.complete_failed(id, Exception::new(ExcKind::TimeoutError, ""));
                } else {
                    sched.park_internal(id);
                }
            } else {
                sched.park_internal(id);
            }
        }
        TaskKind::Coroutine { .. } | TaskKind::Timer { .. } => {}
    }
}

/// Drops a cancelled task id from a queue's wait lists.
fn remove_parked(heap: &mut Heap, queue: HeapId, id: TaskId) {
    if let HeapData::Queue(state) = heap.get_mut(queue) {
        state.getters.retain(|t| *t != id);
        state.putters.retain(|t| *t != id);
    }
}
