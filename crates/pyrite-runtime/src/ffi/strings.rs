//! String and bytes operations.
//!
//! Strings are immutable heap objects; every operation returns a fresh
//! owned handle. Indices and lengths are in Unicode codepoints, matching
//! Python semantics, even though storage is UTF-8.

use crate::{
    exc::ExcKind,
    heap::{HeapData, HeapId, resolve_index, slice_indices},
    state::{Runtime, with_rt},
    value::format_float,
};

fn get_str(rt: &Runtime, handle: u64) -> &str {
    match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Str(s) => s,
        _ => "",
    }
}

fn alloc_str(rt: &mut Runtime, s: String) -> u64 {
    rt.heap.alloc(HeapData::Str(s)).raw()
}

/// Creates a string from embedded literal bytes.
///
/// # Safety
/// `ptr` must point to `len` readable bytes of UTF-8.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn str_new(ptr: *const u8, len: u64) -> u64 {
    // SAFETY: forwarded from the caller's contract.
    let s = unsafe { super::str_arg(ptr, len) }.into_owned();
    with_rt(|rt| alloc_str(rt, s))
}

#[unsafe(no_mangle)]
pub extern "C" fn str_concat(a: u64, b: u64) -> u64 {
    with_rt(|rt| {
        let joined = format!("{}{}", get_str(rt, a), get_str(rt, b));
        alloc_str(rt, joined)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn str_len(handle: u64) -> i64 {
    with_rt(|rt| get_str(rt, handle).chars().count() as i64)
}

#[unsafe(no_mangle)]
pub extern "C" fn str_eq(a: u64, b: u64) -> bool {
    with_rt(|rt| get_str(rt, a) == get_str(rt, b))
}

#[unsafe(no_mangle)]
pub extern "C" fn str_contains(hay: u64, needle: u64) -> bool {
    with_rt(|rt| {
        let needle = get_str(rt, needle);
        get_str(rt, hay).contains(needle)
    })
}

/// One-codepoint subscript with negative-index support.
#[unsafe(no_mangle)]
pub extern "C" fn str_index(handle: u64, index: i64) -> u64 {
    with_rt(|rt| {
        let chars: Vec<char> = get_str(rt, handle).chars().collect();
        match resolve_index(chars.len() as i64, index) {
            Some(i) => alloc_str(rt, chars[i].to_string()),
            None => {
                rt.raise(ExcKind::IndexError, "string index out of range");
                0
            }
        }
    })
}

/// `s[start:stop:step]`; [`crate::heap::SLICE_MISSING`] marks omitted
/// bounds.
#[unsafe(no_mangle)]
pub extern "C" fn str_slice(handle: u64, start: i64, stop: i64, step: i64) -> u64 {
    with_rt(|rt| {
        let chars: Vec<char> = get_str(rt, handle).chars().collect();
        match slice_indices(chars.len() as i64, start, stop, step) {
            Some(indices) => {
                let sliced: String = indices.into_iter().map(|i| chars[i]).collect();
                alloc_str(rt, sliced)
            }
            None => {
                rt.raise(ExcKind::ValueError, "slice step cannot be zero");
                0
            }
        }
    })
}

/// Codepoint index of the first occurrence, or -1.
#[unsafe(no_mangle)]
pub extern "C" fn str_find(hay: u64, needle: u64) -> i64 {
    with_rt(|rt| {
        let (hay, needle) = (get_str(rt, hay), get_str(rt, needle));
        match hay.find(needle) {
            Some(byte_index) => hay[..byte_index].chars().count() as i64,
            None => -1,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn str_upper(handle: u64) -> u64 {
    with_rt(|rt| {
        let upper = get_str(rt, handle).to_uppercase();
        alloc_str(rt, upper)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn str_lower(handle: u64) -> u64 {
    with_rt(|rt| {
        let lower = get_str(rt, handle).to_lowercase();
        alloc_str(rt, lower)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn str_strip(handle: u64) -> u64 {
    with_rt(|rt| {
        let stripped = get_str(rt, handle).trim().to_owned();
        alloc_str(rt, stripped)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn str_replace(handle: u64, from: u64, to: u64) -> u64 {
    with_rt(|rt| {
        let replaced = {
            let (s, from, to) = (get_str(rt, handle), get_str(rt, from), get_str(rt, to));
            s.replace(from, to)
        };
        alloc_str(rt, replaced)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn str_from_int(v: i64) -> u64 {
    with_rt(|rt| alloc_str(rt, v.to_string()))
}

#[unsafe(no_mangle)]
pub extern "C" fn str_from_float(v: f64) -> u64 {
    with_rt(|rt| alloc_str(rt, format_float(v)))
}

#[unsafe(no_mangle)]
pub extern "C" fn str_from_bool(v: bool) -> u64 {
    with_rt(|rt| alloc_str(rt, if v { "True".to_owned() } else { "False".to_owned() }))
}

/// `int(s)`; raises `ValueError` on malformed input.
#[unsafe(no_mangle)]
pub extern "C" fn str_to_int(handle: u64) -> i64 {
    with_rt(|rt| {
        let trimmed = get_str(rt, handle).trim().to_owned();
        match trimmed.parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                rt.raise(
                    ExcKind::ValueError,
                    format!("invalid literal for int() with base 10: '{trimmed}'"),
                );
                0
            }
        }
    })
}

/// `float(s)`; raises `ValueError` on malformed input.
#[unsafe(no_mangle)]
pub extern "C" fn str_to_float(handle: u64) -> f64 {
    with_rt(|rt| {
        let trimmed = get_str(rt, handle).trim().to_owned();
        match trimmed.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                rt.raise(ExcKind::ValueError, format!("could not convert string to float: '{trimmed}'"));
                0.0
            }
        }
    })
}

/// Creates a bytes object from embedded literal bytes.
///
/// # Safety
/// `ptr` must point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bytes_new(ptr: *const u8, len: u64) -> u64 {
    // SAFETY: forwarded from the caller's contract.
    let bytes = unsafe { super::byte_slice(ptr, len) }.to_vec();
    with_rt(|rt| rt.heap.alloc(HeapData::Bytes(bytes)).raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn bytes_len(handle: u64) -> i64 {
    with_rt(|rt| match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Bytes(b) => b.len() as i64,
        _ => 0,
    })
}
