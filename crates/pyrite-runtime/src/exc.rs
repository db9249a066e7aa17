//! Exception kinds and the pending-exception channel.
//!
//! Generated code does not unwind; a `throw` records the exception in the
//! runtime and every call site that can observe it checks the pending flag
//! and branches to its handler (or returns, propagating the flag upward).
//! `try_push`/`try_pop` track protected-region depth so the runtime knows
//! whether an exception escaping the current task is handled or fatal.

use strum::{Display, EnumString, FromRepr, IntoStaticStr};

/// Runtime exception types.
///
/// The numeric representation is part of the compiler/runtime contract:
/// emitted `throw`/`exc_matches` calls pass these discriminants.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, FromRepr, IntoStaticStr)]
pub enum ExcKind {
    /// Base class; matches any exception in handler checks.
    Exception = 0,
    TypeError = 1,
    ValueError = 2,
    IndexError = 3,
    KeyError = 4,
    ZeroDivisionError = 5,
    AttributeError = 6,
    NameError = 7,
    OverflowError = 8,
    RuntimeError = 9,
    StopIteration = 10,
    AssertionError = 11,
    TimeoutError = 12,
    CancelledError = 13,
    QueueEmpty = 14,
    QueueFull = 15,
    /// User-defined exception classes throw with this kind plus the class id
    /// carried on the exception object.
    UserDefined = 16,
}

impl ExcKind {
    /// Implements the handler-matching hierarchy for `except` clauses.
    ///
    /// `Exception` catches everything except `CancelledError`, mirroring
    /// Python where cancellation derives from `BaseException` so that bare
    /// handlers do not swallow it. `LookupError`-style intermediate classes
    /// are resolved at compile time, so only leaf kinds appear here.
    pub fn is_caught_by(self, handler: Self) -> bool {
        if self == handler {
            return true;
        }
        match handler {
            Self::Exception => self != Self::CancelledError,
            _ => false,
        }
    }
}

/// A raised exception: kind, message, and (for user classes) the class id
/// and instance payload.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExcKind,
    pub message: String,
    /// Class id of a user-defined exception, when `kind` is `UserDefined`.
    pub class: Option<u32>,
    /// Heap handle of the exception instance, when one was constructed.
    pub value: Option<u64>,
}

impl Exception {
    pub fn new(kind: ExcKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            class: None,
            value: None,
        }
    }
}

/// Per-runtime exception bookkeeping.
#[derive(Debug, Default)]
pub struct ExcState {
    pending: Option<Exception>,
    /// Depth of active `try` regions in the current call stack.
    try_depth: u32,
}

impl ExcState {
    pub fn raise(&mut self, exc: Exception) {
        self.pending = Some(exc);
    }

    pub fn pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current(&self) -> Option<&Exception> {
        self.pending.as_ref()
    }

    pub fn clear(&mut self) -> Option<Exception> {
        self.pending.take()
    }

    pub fn push_try(&mut self) {
        self.try_depth += 1;
    }

    pub fn pop_try(&mut self) {
        self.try_depth = self.try_depth.saturating_sub(1);
    }

    pub fn in_try(&self) -> bool {
        self.try_depth > 0
    }
}

#[cfg(test)]
mod tests {
    use super::ExcKind;

    #[test]
    fn handler_matching() {
        assert!(ExcKind::IndexError.is_caught_by(ExcKind::IndexError));
        assert!(ExcKind::IndexError.is_caught_by(ExcKind::Exception));
        assert!(!ExcKind::IndexError.is_caught_by(ExcKind::KeyError));
        assert!(!ExcKind::CancelledError.is_caught_by(ExcKind::Exception));
        assert!(ExcKind::CancelledError.is_caught_by(ExcKind::CancelledError));
    }

    #[test]
    fn kind_names_round_trip() {
        assert_eq!(ExcKind::ZeroDivisionError.to_string(), "ZeroDivisionError");
        assert_eq!("KeyError".parse::<ExcKind>().unwrap(), ExcKind::KeyError);
        assert_eq!(ExcKind::from_repr(3), Some(ExcKind::IndexError));
    }
}
