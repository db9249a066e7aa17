//! Ahead-of-time compiler from a statically-checkable Python subset to
//! native executables.
//!
//! The pipeline: `ruff_python_parser` produces the AST; [`parse`]
//! narrows it to the supported subset; [`resolve`] assigns slots and
//! captures; [`infer`] builds the class table and function signatures;
//! [`lower`] type-infers bodies into the typed [`ir`], folding
//! comptime-constant subtrees via [`comptime`]; [`emit`] renders C with
//! the runtime shim; and [`driver`] hands the result to the external C
//! compiler, statically linked against `pyrite_runtime`.
#![expect(clippy::cast_possible_truncation, reason = "id spaces are u32 by construction")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the source language")]

pub mod ast;
pub mod comptime;
pub mod driver;
pub mod emit;
pub mod errors;
pub mod infer;
pub mod intern;
pub mod ir;
mod lower;
pub mod parse;
pub mod resolve;
pub mod types;

pub use crate::{
    driver::{CompileOptions, DriverError, compile, compile_to_c},
    errors::{CompileError, ErrorKind},
    lower::{bin_result, lower_program},
};
