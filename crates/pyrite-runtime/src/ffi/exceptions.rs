//! The exception channel between runtime and generated code.
//!
//! Raising records a pending exception; generated call sites check
//! `exc_pending` and branch to their handler or propagate by returning.
//! `try_push`/`try_pop` bracket protected regions so the runtime knows
//! whether an escaping exception still has a handler above it.

use crate::{
    exc::{ExcKind, Exception},
    heap::{HeapData, HeapId},
    state::with_rt,
    value::RtVal,
};

/// Raises a builtin exception kind with a message.
///
/// # Safety
/// `msg` must point to `msg_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn throw(kind: u32, msg: *const u8, msg_len: u64) {
    // SAFETY: forwarded from the caller's contract.
    let message = unsafe { super::str_arg(msg, msg_len) }.into_owned();
    let kind = ExcKind::from_repr(kind).unwrap_or(ExcKind::Exception);
    with_rt(|rt| rt.exc.raise(Exception::new(kind, message)));
}

/// Raises a user-defined exception instance. Consumes the caller's
/// reference to `obj`; the message is taken from the instance's first
/// field when it is a string (the conventional `args[0]` slot).
#[unsafe(no_mangle)]
pub extern "C" fn throw_obj(obj: u64, class_id: u32) {
    with_rt(|rt| {
        let message = match rt.heap.get(HeapId::from_raw(obj)) {
            HeapData::Object { fields, .. } => match fields.first().and_then(|v| v.ref_id()) {
                Some(first) => match rt.heap.get(first) {
                    HeapData::Str(s) => s.clone(),
                    _ => String::new(),
                },
                None => String::new(),
            },
            _ => String::new(),
        };
        let mut exc = Exception::new(ExcKind::UserDefined, message);
        exc.class = Some(class_id);
        exc.value = Some(obj);
        rt.exc.raise(exc);
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn try_push() {
    with_rt(|rt| rt.exc.push_try());
}

#[unsafe(no_mangle)]
pub extern "C" fn try_pop() {
    with_rt(|rt| rt.exc.pop_try());
}

#[unsafe(no_mangle)]
pub extern "C" fn exc_pending() -> bool {
    with_rt(|rt| rt.exc.pending())
}

#[unsafe(no_mangle)]
pub extern "C" fn exc_kind() -> u32 {
    with_rt(|rt| rt.exc.current().map_or(0, |exc| exc.kind as u32))
}

/// Whether the pending exception is caught by a handler for the given
/// builtin kind (or user class when `class_plus1` is non-zero).
#[unsafe(no_mangle)]
pub extern "C" fn exc_matches(kind: u32, class_plus1: u32) -> bool {
    with_rt(|rt| {
        let Some(exc) = rt.exc.current() else {
            return false;
        };
        if let Some(handler_class) = class_plus1.checked_sub(1) {
            return match exc.class {
                Some(raised) => rt.class_is_subclass(raised, handler_class),
                None => false,
            };
        }
        let handler = ExcKind::from_repr(kind).unwrap_or(ExcKind::Exception);
        // User-defined exceptions derive from Exception.
        if exc.kind == ExcKind::UserDefined {
            return handler == ExcKind::Exception;
        }
        exc.kind.is_caught_by(handler)
    })
}

/// Takes the pending exception's value for `except X as e` bindings: the
/// raised instance when there is one, otherwise a fresh string of the
/// message. Clears nothing; pair with `exc_clear`.
#[unsafe(no_mangle)]
pub extern "C" fn exc_value() -> RtVal {
    with_rt(|rt| {
        let Some(exc) = rt.exc.current() else {
            return RtVal::NONE;
        };
        if let Some(obj) = exc.value {
            let id = HeapId::from_raw(obj);
            rt.heap.inc(id);
            return RtVal::from_ref(id);
        }
        let message = exc.message.clone();
        RtVal::from_ref(rt.heap.alloc(HeapData::Str(message)))
    })
}

/// Drops the pending exception (entering a matching handler). Releases
/// the instance reference held by the exception, if any.
#[unsafe(no_mangle)]
pub extern "C" fn exc_clear() {
    with_rt(|rt| {
        if let Some(exc) = rt.exc.clear()
            && let Some(obj) = exc.value
        {
            rt.heap.dec(HeapId::from_raw(obj));
        }
    });
}

/// Prints the fatal-exception report to stderr, CPython style. Used by
/// generated `main` when an exception escapes the top level.
#[unsafe(no_mangle)]
pub extern "C" fn exc_print() {
    with_rt(|rt| {
        let Some(exc) = rt.exc.current() else {
            return;
        };
        let name = match exc.class {
            Some(class) => rt.class(class).name.clone(),
            None => exc.kind.to_string(),
        };
        eprintln!("Traceback (most recent call last):");
        if exc.message.is_empty() {
            eprintln!("{name}");
        } else {
            eprintln!("{name}: {}", exc.message);
        }
    });
}
