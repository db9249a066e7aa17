//! Built-in module primitives: `json_*`, `math_*`, `hashlib_*`, `re_*`,
//! `os_*`, `zlib_*`, and the arbitrary-precision integer operations that
//! back `int` overflow promotion.

use std::io::Write as _;

use md5::{Digest as _, Md5};
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use sha1::Sha1;
use sha2::Sha256;

use crate::{
    exc::ExcKind,
    heap::{HashKey, Heap, HeapData, HeapId},
    state::{Runtime, with_rt},
    value::{RtVal, Tag},
};

fn get_text(rt: &Runtime, handle: u64) -> String {
    match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Str(s) => s.clone(),
        _ => String::new(),
    }
}

fn get_bytes(rt: &Runtime, handle: u64) -> Vec<u8> {
    match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Str(s) => s.clone().into_bytes(),
        HeapData::Bytes(b) => b.clone(),
        _ => Vec::new(),
    }
}

fn alloc_str(rt: &mut Runtime, s: String) -> u64 {
    rt.heap.alloc(HeapData::Str(s)).raw()
}

// ---------------------------------------------------------------------
// json
// ---------------------------------------------------------------------

fn to_json(heap: &Heap, v: RtVal) -> Option<serde_json::Value> {
    Some(match v.tag() {
        Tag::None => serde_json::Value::Null,
        Tag::Bool => serde_json::Value::Bool(v.as_bool()),
        Tag::Int => serde_json::Value::from(v.as_int()),
        Tag::Float => serde_json::Value::from(v.as_float()),
        Tag::Ref => match heap.get(HeapId::from_raw(v.bits)) {
            HeapData::Str(s) => serde_json::Value::String(s.clone()),
            HeapData::List(items) | HeapData::Tuple(items) => {
                let arr: Option<Vec<_>> = items.iter().map(|item| to_json(heap, *item)).collect();
                serde_json::Value::Array(arr?)
            }
            HeapData::Dict(map) => {
                let mut obj = serde_json::Map::new();
                for (key, value) in map {
                    let key = match key {
                        HashKey::Str(s) => s.to_string(),
                        HashKey::Int(i) => i.to_string(),
                        _ => return None,
                    };
                    obj.insert(key, to_json(heap, *value)?);
                }
                serde_json::Value::Object(obj)
            }
            HeapData::Big(b) => serde_json::Value::String(b.to_string()),
            _ => return None,
        },
    })
}

fn from_json(heap: &mut Heap, v: &serde_json::Value) -> RtVal {
    match v {
        serde_json::Value::Null => RtVal::NONE,
        serde_json::Value::Bool(b) => RtVal::from_bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => RtVal::from_int(i),
            None => RtVal::from_float(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => RtVal::from_ref(heap.alloc(HeapData::Str(s.clone()))),
        serde_json::Value::Array(items) => {
            let list: Vec<RtVal> = items.iter().map(|item| from_json(heap, item)).collect();
            RtVal::from_ref(heap.alloc(HeapData::List(list)))
        }
        serde_json::Value::Object(obj) => {
            let mut map = indexmap::IndexMap::with_hasher(ahash::RandomState::default());
            for (key, value) in obj {
                let value = from_json(heap, value);
                map.insert(HashKey::Str(key.clone().into_boxed_str()), value);
            }
            RtVal::from_ref(heap.alloc(HeapData::Dict(map)))
        }
    }
}

/// `json.dumps(v)`; raises `TypeError` for unserializable values. The
/// argument is borrowed.
#[unsafe(no_mangle)]
pub extern "C" fn json_dumps(v: RtVal) -> u64 {
    with_rt(|rt| match to_json(&rt.heap, v) {
        Some(json) => alloc_str(rt, json.to_string()),
        None => {
            rt.raise(ExcKind::TypeError, "object is not JSON serializable");
            0
        }
    })
}

/// `json.loads(s)`; raises `ValueError` on malformed input.
#[unsafe(no_mangle)]
pub extern "C" fn json_loads(handle: u64) -> RtVal {
    with_rt(|rt| {
        let text = get_text(rt, handle);
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => from_json(&mut rt.heap, &json),
            Err(err) => {
                rt.raise(ExcKind::ValueError, err.to_string());
                RtVal::NONE
            }
        }
    })
}

// ---------------------------------------------------------------------
// math
// ---------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn math_sqrt(x: f64) -> f64 {
    if x < 0.0 {
        with_rt(|rt| rt.raise(ExcKind::ValueError, "math domain error"));
        return 0.0;
    }
    x.sqrt()
}

#[unsafe(no_mangle)]
pub extern "C" fn math_pow(x: f64, y: f64) -> f64 {
    x.powf(y)
}

#[unsafe(no_mangle)]
pub extern "C" fn math_log(x: f64) -> f64 {
    if x <= 0.0 {
        with_rt(|rt| rt.raise(ExcKind::ValueError, "math domain error"));
        return 0.0;
    }
    x.ln()
}

#[unsafe(no_mangle)]
pub extern "C" fn math_exp(x: f64) -> f64 {
    x.exp()
}

#[unsafe(no_mangle)]
pub extern "C" fn math_sin(x: f64) -> f64 {
    x.sin()
}

#[unsafe(no_mangle)]
pub extern "C" fn math_cos(x: f64) -> f64 {
    x.cos()
}

#[unsafe(no_mangle)]
pub extern "C" fn math_floor(x: f64) -> i64 {
    x.floor() as i64
}

#[unsafe(no_mangle)]
pub extern "C" fn math_ceil(x: f64) -> i64 {
    x.ceil() as i64
}

#[unsafe(no_mangle)]
pub extern "C" fn math_fabs(x: f64) -> f64 {
    x.abs()
}

// ---------------------------------------------------------------------
// hashlib
// ---------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn hashlib_md5_hexdigest(data: u64) -> u64 {
    with_rt(|rt| {
        let digest = Md5::digest(get_bytes(rt, data));
        alloc_str(rt, hex(&digest))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hashlib_sha1_hexdigest(data: u64) -> u64 {
    with_rt(|rt| {
        let digest = Sha1::digest(get_bytes(rt, data));
        alloc_str(rt, hex(&digest))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn hashlib_sha256_hexdigest(data: u64) -> u64 {
    with_rt(|rt| {
        let digest = Sha256::digest(get_bytes(rt, data));
        alloc_str(rt, hex(&digest))
    })
}

fn hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = std::fmt::Write::write_fmt(&mut out, format_args!("{byte:02x}"));
    }
    out
}

// ---------------------------------------------------------------------
// re
// ---------------------------------------------------------------------

fn compile_pattern(rt: &mut Runtime, pattern: u64) -> Option<regex::Regex> {
    let pattern = get_text(rt, pattern);
    match regex::Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            rt.raise(ExcKind::ValueError, err.to_string());
            None
        }
    }
}

/// `re.match(p, s)`: the matched prefix as a string, or `None`. Matching
/// is anchored at the start, like Python's `match` (not `search`).
#[unsafe(no_mangle)]
pub extern "C" fn re_match(pattern: u64, text: u64) -> RtVal {
    with_rt(|rt| {
        let Some(re) = compile_pattern(rt, pattern) else {
            return RtVal::NONE;
        };
        let text = get_text(rt, text);
        match re.find(&text) {
            Some(found) if found.start() == 0 => {
                let matched = found.as_str().to_owned();
                RtVal::from_ref(HeapId::from_raw(alloc_str(rt, matched)))
            }
            _ => RtVal::NONE,
        }
    })
}

/// `re.findall(p, s)` as a list of strings (whole matches).
#[unsafe(no_mangle)]
pub extern "C" fn re_findall(pattern: u64, text: u64) -> u64 {
    with_rt(|rt| {
        let Some(re) = compile_pattern(rt, pattern) else {
            return 0;
        };
        let text = get_text(rt, text);
        let matches: Vec<String> = re.find_iter(&text).map(|m| m.as_str().to_owned()).collect();
        let items: Vec<RtVal> = matches
            .into_iter()
            .map(|m| RtVal::from_ref(rt.heap.alloc(HeapData::Str(m))))
            .collect();
        rt.heap.alloc(HeapData::List(items)).raw()
    })
}

/// `re.sub(p, repl, s)`; the replacement is taken literally except for
/// `$n` group references.
#[unsafe(no_mangle)]
pub extern "C" fn re_sub(pattern: u64, repl: u64, text: u64) -> u64 {
    with_rt(|rt| {
        let Some(re) = compile_pattern(rt, pattern) else {
            return 0;
        };
        let (repl, text) = (get_text(rt, repl), get_text(rt, text));
        let replaced = re.replace_all(&text, repl.as_str()).into_owned();
        alloc_str(rt, replaced)
    })
}

// ---------------------------------------------------------------------
// os
// ---------------------------------------------------------------------

/// `os.getenv(name)`: the value, or `None` when unset.
#[unsafe(no_mangle)]
pub extern "C" fn os_getenv(name: u64) -> RtVal {
    with_rt(|rt| {
        let name = get_text(rt, name);
        match std::env::var(&name) {
            Ok(value) => RtVal::from_ref(HeapId::from_raw(alloc_str(rt, value))),
            Err(_) => RtVal::NONE,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn os_path_exists(path: u64) -> bool {
    with_rt(|rt| {
        let path = get_text(rt, path);
        std::path::Path::new(&path).exists()
    })
}

// ---------------------------------------------------------------------
// zlib
// ---------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn zlib_compress(data: u64) -> u64 {
    with_rt(|rt| {
        let input = get_bytes(rt, data);
        let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        let compressed = encoder
            .write_all(&input)
            .and_then(|()| encoder.finish())
            .unwrap_or_default();
        rt.heap.alloc(HeapData::Bytes(compressed)).raw()
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn zlib_decompress(data: u64) -> u64 {
    with_rt(|rt| {
        let input = get_bytes(rt, data);
        let mut decoder = flate2::write::ZlibDecoder::new(Vec::new());
        match decoder.write_all(&input).and_then(|()| decoder.finish()) {
            Ok(decompressed) => rt.heap.alloc(HeapData::Bytes(decompressed)).raw(),
            Err(err) => {
                rt.raise(ExcKind::ValueError, err.to_string());
                0
            }
        }
    })
}

// ---------------------------------------------------------------------
// arbitrary-precision integers
// ---------------------------------------------------------------------

fn get_big(rt: &Runtime, handle: u64) -> BigInt {
    match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Big(b) => b.clone(),
        _ => BigInt::from(0),
    }
}

fn alloc_big(rt: &mut Runtime, b: BigInt) -> u64 {
    rt.heap.alloc(HeapData::Big(b)).raw()
}

#[unsafe(no_mangle)]
pub extern "C" fn big_from_i64(v: i64) -> u64 {
    with_rt(|rt| alloc_big(rt, BigInt::from(v)))
}

/// `int(f)` for floats beyond the `i64` range; raises `ValueError` for
/// NaN and `OverflowError` for infinities, as Python does.
#[unsafe(no_mangle)]
pub extern "C" fn big_from_f64(v: f64) -> u64 {
    with_rt(|rt| {
        if v.is_nan() {
            rt.raise(ExcKind::ValueError, "cannot convert float NaN to integer");
            return 0;
        }
        match BigInt::from_f64(v.trunc()) {
            Some(b) => alloc_big(rt, b),
            None => {
                rt.raise(ExcKind::OverflowError, "cannot convert float infinity to integer");
                0
            }
        }
    })
}

/// Builds a big integer from a decimal literal too large for `i64`.
///
/// # Safety
/// `ptr` must point to `len` readable bytes of ASCII digits.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn big_from_str(ptr: *const u8, len: u64) -> u64 {
    // SAFETY: forwarded from the caller's contract.
    let text = unsafe { super::str_arg(ptr, len) }.into_owned();
    with_rt(|rt| match text.parse::<BigInt>() {
        Ok(b) => alloc_big(rt, b),
        Err(_) => {
            rt.raise(ExcKind::ValueError, format!("invalid integer literal: '{text}'"));
            0
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn big_add(a: u64, b: u64) -> u64 {
    with_rt(|rt| {
        let sum = get_big(rt, a) + get_big(rt, b);
        alloc_big(rt, sum)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn big_sub(a: u64, b: u64) -> u64 {
    with_rt(|rt| {
        let diff = get_big(rt, a) - get_big(rt, b);
        alloc_big(rt, diff)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn big_mul(a: u64, b: u64) -> u64 {
    with_rt(|rt| {
        let product = get_big(rt, a) * get_big(rt, b);
        alloc_big(rt, product)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn big_pow(base: u64, exp: u32) -> u64 {
    with_rt(|rt| {
        let result = get_big(rt, base).pow(exp);
        alloc_big(rt, result)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn big_eq(a: u64, b: u64) -> bool {
    with_rt(|rt| get_big(rt, a) == get_big(rt, b))
}

/// Three-way comparison: -1, 0, or 1.
#[unsafe(no_mangle)]
pub extern "C" fn big_cmp(a: u64, b: u64) -> i32 {
    with_rt(|rt| match get_big(rt, a).cmp(&get_big(rt, b)) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

/// Narrows back to `i64` when the value fits; raises `OverflowError`
/// otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn big_to_i64(handle: u64) -> i64 {
    with_rt(|rt| match get_big(rt, handle).to_i64() {
        Some(v) => v,
        None => {
            rt.raise(ExcKind::OverflowError, "int too large to convert");
            0
        }
    })
}
