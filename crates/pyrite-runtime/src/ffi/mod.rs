//! The C ABI surface called by emitted code.
//!
//! Every function here is `extern "C"` with a stable, unmangled name; the
//! compiler's shim header declares exactly this set. Handles (`u64`) and
//! [`RtVal`] structs cross the boundary by value.
//!
//! # Ownership convention
//!
//! Reference counting at the boundary follows two rules the emitter relies
//! on:
//!
//! - A function *returning* an `RtVal` or handle returns an **owned**
//!   reference: the caller is responsible for a matching `rc_dec`.
//! - A function *storing* an `RtVal` argument into a container
//!   (`list_push`, `dict_put`, `attr_set`, `queue_put`...) **consumes** the
//!   caller's reference. Read-only arguments (print, `list_len`,
//!   comparisons, string operands) are borrowed.

pub mod collections;
pub mod exceptions;
pub mod modules;
pub mod objects;
pub mod strings;
pub mod tasks;
pub mod values;

use crate::{
    heap::{HeapData, HeapId},
    state::with_rt,
    value::RtVal,
};

/// Reads a byte slice passed from C.
///
/// # Safety
/// `ptr` must point to `len` readable bytes for the duration of the call.
pub(crate) unsafe fn byte_slice<'a>(ptr: *const u8, len: u64) -> &'a [u8] {
    if len == 0 {
        return &[];
    }
    // SAFETY: forwarded from the caller's contract.
    unsafe { std::slice::from_raw_parts(ptr, len as usize) }
}

/// Reads a UTF-8 string passed from C. Emitted literals are always valid
/// UTF-8; anything else is replaced lossily rather than trusted.
pub(crate) unsafe fn str_arg<'a>(ptr: *const u8, len: u64) -> std::borrow::Cow<'a, str> {
    // SAFETY: forwarded from the caller's contract.
    String::from_utf8_lossy(unsafe { byte_slice(ptr, len) })
}

/// One-time runtime setup. Currently the thread-local initializes lazily;
/// the call exists so generated `main` has a fixed prologue.
#[unsafe(no_mangle)]
pub extern "C" fn rt_init() {
    with_rt(|_| {});
}

/// Allocates `nbytes` of zeroed frame memory for a state machine or
/// closure environment. The type tag is recorded for diagnostics only;
/// layout is owned by the emitted code.
#[unsafe(no_mangle)]
pub extern "C" fn heap_alloc(_type_tag: u32, nbytes: u64) -> u64 {
    with_rt(|rt| rt.heap.alloc(HeapData::Frame(vec![0u8; nbytes as usize].into_boxed_slice())).raw())
}

/// Stable pointer to a frame's payload. Valid until the frame's reference
/// count reaches zero.
#[unsafe(no_mangle)]
pub extern "C" fn frame_ptr(handle: u64) -> *mut u8 {
    if handle == 0 {
        return std::ptr::null_mut();
    }
    with_rt(|rt| match rt.heap.get_mut(HeapId::from_raw(handle)) {
        HeapData::Frame(bytes) => bytes.as_mut_ptr(),
        _ => std::ptr::null_mut(),
    })
}

/// Null handles are tolerated: generated code zero-initializes slots and
/// releases them unconditionally on scope exit.
#[unsafe(no_mangle)]
pub extern "C" fn rc_inc(handle: u64) {
    if handle == 0 {
        return;
    }
    with_rt(|rt| rt.heap.inc(HeapId::from_raw(handle)));
}

#[unsafe(no_mangle)]
pub extern "C" fn rc_dec(handle: u64) {
    if handle == 0 {
        return;
    }
    with_rt(|rt| rt.heap.dec(HeapId::from_raw(handle)));
}

/// `print(...)`: space-separated `str()` of each argument, then a newline.
/// Arguments are borrowed.
///
/// # Safety
/// `args` must point to `n` valid `RtVal`s.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rt_print(args: *const RtVal, n: u64) {
    if n == 0 {
        println!();
        return;
    }
    // SAFETY: caller passes a stack array of n values.
    let args = unsafe { std::slice::from_raw_parts(args, n as usize) };
    let line = with_rt(|rt| {
        let mut out = String::new();
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            arg.write_str(&rt.heap, &mut out);
        }
        out
    });
    println!("{line}");
}
