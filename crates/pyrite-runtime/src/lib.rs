//! Runtime library linked into every pyrite-compiled binary.
//!
//! The compiler emits C that calls into this crate through a fixed set of
//! `extern "C"` entry points (the `ffi` module). Everything behind that
//! surface is ordinary Rust: a reference-counted heap of tagged objects, a
//! cooperative single-threaded task scheduler, the exception machinery, and
//! the built-in modules (`json_*`, `math_*`, `hashlib_*`, `re_*`, `os_*`,
//! `zlib_*`).
//!
//! Heap objects are addressed through opaque `u64` handles rather than raw
//! pointers; the only raw memory handed to generated code is the payload of
//! state-machine frames (`frame_ptr`), whose layout the compiler itself
//! defines.
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the compiled language")]
#![expect(clippy::float_cmp, reason = "value semantics require exact float comparison")]
#![expect(clippy::must_use_candidate, reason = "C-facing helpers are called for effect")]

pub mod exc;
pub mod ffi;
pub mod heap;
pub mod sched;
pub mod state;
pub mod value;

pub use crate::{
    exc::{ExcKind, Exception},
    heap::{Heap, HeapData, HeapId},
    sched::{POLL_AWAITING, POLL_CANCELLED, POLL_DONE, POLL_YIELDED, ResumeFn, RtPoll, Scheduler, TaskId},
    state::{Runtime, with_rt},
    value::{RtVal, Tag},
};
