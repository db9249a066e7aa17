//! List, dict, set, and tuple operations.
//!
//! Containers own one reference to each stored element: storing consumes
//! the caller's reference, reading returns a fresh one (see the ownership
//! convention in the module docs of [`super`]).

use indexmap::IndexMap;

use crate::{
    exc::ExcKind,
    heap::{HashKey, Heap, HeapData, HeapId, SLICE_MISSING, resolve_index, slice_indices},
    state::{Runtime, with_rt},
    value::RtVal,
};

fn list_ref(rt: &Runtime, handle: u64) -> &Vec<RtVal> {
    match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::List(items) => items,
        _ => panic!("expected list"),
    }
}

fn key_or_raise(rt: &mut Runtime, val: RtVal) -> Option<HashKey> {
    let key = rt.heap.hash_key(val);
    if key.is_none() {
        rt.raise(ExcKind::TypeError, "unhashable type");
    }
    key
}

#[unsafe(no_mangle)]
pub extern "C" fn list_new(cap: u64) -> u64 {
    with_rt(|rt| rt.heap.alloc(HeapData::List(Vec::with_capacity(cap as usize))).raw())
}

/// Appends; consumes the caller's reference to `item`.
#[unsafe(no_mangle)]
pub extern "C" fn list_push(handle: u64, item: RtVal) {
    with_rt(|rt| {
        if let HeapData::List(items) = rt.heap.get_mut(HeapId::from_raw(handle)) {
            items.push(item);
        }
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn list_len(handle: u64) -> i64 {
    with_rt(|rt| list_ref(rt, handle).len() as i64)
}

/// `xs[i]` with negative-index support; returns an owned reference.
#[unsafe(no_mangle)]
pub extern "C" fn list_get(handle: u64, index: i64) -> RtVal {
    with_rt(|rt| {
        let items = list_ref(rt, handle);
        match resolve_index(items.len() as i64, index) {
            Some(i) => {
                let v = items[i];
                rt.heap.inc_val(v);
                v
            }
            None => {
                rt.raise(ExcKind::IndexError, "list index out of range");
                RtVal::NONE
            }
        }
    })
}

/// `xs[i] = v`; consumes the reference to `value`, releases the old
/// element.
#[unsafe(no_mangle)]
pub extern "C" fn list_set(handle: u64, index: i64, value: RtVal) {
    with_rt(|rt| {
        let len = list_ref(rt, handle).len() as i64;
        match resolve_index(len, index) {
            Some(i) => {
                let HeapData::List(items) = rt.heap.get_mut(HeapId::from_raw(handle)) else {
                    return;
                };
                let old = std::mem::replace(&mut items[i], value);
                rt.heap.dec_val(old);
            }
            None => {
                rt.heap.dec_val(value);
                rt.raise(ExcKind::IndexError, "list assignment index out of range");
            }
        }
    });
}

/// `xs.pop()` / `xs.pop(i)`; [`SLICE_MISSING`] as index pops the last
/// element. Ownership of the element moves to the caller.
#[unsafe(no_mangle)]
pub extern "C" fn list_pop(handle: u64, index: i64) -> RtVal {
    with_rt(|rt| {
        let len = list_ref(rt, handle).len() as i64;
        let index = if index == SLICE_MISSING { len - 1 } else { index };
        match resolve_index(len, index) {
            Some(i) => {
                let HeapData::List(items) = rt.heap.get_mut(HeapId::from_raw(handle)) else {
                    return RtVal::NONE;
                };
                items.remove(i)
            }
            None => {
                rt.raise(ExcKind::IndexError, "pop index out of range");
                RtVal::NONE
            }
        }
    })
}

/// `xs.insert(i, v)`; clamps like Python, consumes the reference.
#[unsafe(no_mangle)]
pub extern "C" fn list_insert(handle: u64, index: i64, value: RtVal) {
    with_rt(|rt| {
        let len = list_ref(rt, handle).len() as i64;
        let i = if index < 0 { (index + len).max(0) } else { index.min(len) };
        if let HeapData::List(items) = rt.heap.get_mut(HeapId::from_raw(handle)) {
            items.insert(i as usize, value);
        }
    });
}

/// `xs.remove(v)`: drops the first equal element or raises `ValueError`.
/// `value` is borrowed.
#[unsafe(no_mangle)]
pub extern "C" fn list_remove(handle: u64, value: RtVal) {
    with_rt(|rt| {
        let found = list_ref(rt, handle)
            .iter()
            .position(|item| item.eq_with_heap(value, &rt.heap));
        match found {
            Some(i) => {
                let HeapData::List(items) = rt.heap.get_mut(HeapId::from_raw(handle)) else {
                    return;
                };
                let removed = items.remove(i);
                rt.heap.dec_val(removed);
            }
            None => rt.raise(ExcKind::ValueError, "list.remove(x): x not in list"),
        }
    });
}

/// `xs.index(v)`; raises `ValueError` when absent. `value` is borrowed.
#[unsafe(no_mangle)]
pub extern "C" fn list_index(handle: u64, value: RtVal) -> i64 {
    with_rt(|rt| {
        match list_ref(rt, handle)
            .iter()
            .position(|item| item.eq_with_heap(value, &rt.heap))
        {
            Some(i) => i as i64,
            None => {
                rt.raise(ExcKind::ValueError, "value is not in list");
                0
            }
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn list_count(handle: u64, value: RtVal) -> i64 {
    with_rt(|rt| {
        list_ref(rt, handle)
            .iter()
            .filter(|item| item.eq_with_heap(value, &rt.heap))
            .count() as i64
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn list_contains(handle: u64, value: RtVal) -> bool {
    with_rt(|rt| {
        list_ref(rt, handle)
            .iter()
            .any(|item| item.eq_with_heap(value, &rt.heap))
    })
}

/// In-place ascending sort; raises `TypeError` on incomparable elements.
#[unsafe(no_mangle)]
pub extern "C" fn list_sort(handle: u64) {
    with_rt(|rt| {
        let mut items = match rt.heap.get_mut(HeapId::from_raw(handle)) {
            HeapData::List(items) => std::mem::take(items),
            _ => return,
        };
        let mut comparable = true;
        items.sort_by(|a, b| {
            a.cmp_with_heap(*b, &rt.heap).unwrap_or_else(|| {
                comparable = false;
                std::cmp::Ordering::Equal
            })
        });
        if !comparable {
            rt.raise(ExcKind::TypeError, "'<' not supported between sort elements");
        }
        if let HeapData::List(slot) = rt.heap.get_mut(HeapId::from_raw(handle)) {
            *slot = items;
        }
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn list_reverse(handle: u64) {
    with_rt(|rt| {
        if let HeapData::List(items) = rt.heap.get_mut(HeapId::from_raw(handle)) {
            items.reverse();
        }
    });
}

/// `xs[a:b:c]` as a fresh list; elements gain a reference each.
#[unsafe(no_mangle)]
pub extern "C" fn list_slice(handle: u64, start: i64, stop: i64, step: i64) -> u64 {
    with_rt(|rt| {
        let items = list_ref(rt, handle);
        match slice_indices(items.len() as i64, start, stop, step) {
            Some(indices) => {
                let sliced: Vec<RtVal> = indices.into_iter().map(|i| items[i]).collect();
                for item in &sliced {
                    rt.heap.inc_val(*item);
                }
                rt.heap.alloc(HeapData::List(sliced)).raw()
            }
            None => {
                rt.raise(ExcKind::ValueError, "slice step cannot be zero");
                0
            }
        }
    })
}

/// `xs + ys` as a fresh list.
#[unsafe(no_mangle)]
pub extern "C" fn list_concat(a: u64, b: u64) -> u64 {
    with_rt(|rt| {
        let items: Vec<RtVal> = list_ref(rt, a).iter().chain(list_ref(rt, b).iter()).copied().collect();
        for item in &items {
            rt.heap.inc_val(*item);
        }
        rt.heap.alloc(HeapData::List(items)).raw()
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn dict_new(cap: u64) -> u64 {
    with_rt(|rt| {
        let map = IndexMap::with_capacity_and_hasher(cap as usize, ahash::RandomState::default());
        rt.heap.alloc(HeapData::Dict(map)).raw()
    })
}

/// `d[k] = v`; the key is borrowed (copied into key form), the value
/// reference is consumed. Overwriting releases the old value.
#[unsafe(no_mangle)]
pub extern "C" fn dict_put(handle: u64, key: RtVal, value: RtVal) {
    with_rt(|rt| {
        let Some(key) = key_or_raise(rt, key) else {
            rt.heap.dec_val(value);
            return;
        };
        let HeapData::Dict(map) = rt.heap.get_mut(HeapId::from_raw(handle)) else {
            return;
        };
        if let Some(old) = map.insert(key, value) {
            rt.heap.dec_val(old);
        }
    });
}

/// `d[k]`; raises `KeyError` on a missing key. Returns an owned reference.
#[unsafe(no_mangle)]
pub extern "C" fn dict_get(handle: u64, key: RtVal) -> RtVal {
    with_rt(|rt| {
        let Some(key) = key_or_raise(rt, key) else {
            return RtVal::NONE;
        };
        let HeapData::Dict(map) = rt.heap.get(HeapId::from_raw(handle)) else {
            return RtVal::NONE;
        };
        match map.get(&key) {
            Some(v) => {
                let v = *v;
                rt.heap.inc_val(v);
                v
            }
            None => {
                let mut repr = String::new();
                key.write_repr(&mut repr);
                rt.raise(ExcKind::KeyError, repr);
                RtVal::NONE
            }
        }
    })
}

/// `d.get(k, default)`; the default is borrowed and re-owned only when
/// returned.
#[unsafe(no_mangle)]
pub extern "C" fn dict_get_default(handle: u64, key: RtVal, default: RtVal) -> RtVal {
    with_rt(|rt| {
        let Some(key) = rt.heap.hash_key(key) else {
            rt.heap.inc_val(default);
            return default;
        };
        let HeapData::Dict(map) = rt.heap.get(HeapId::from_raw(handle)) else {
            return RtVal::NONE;
        };
        let v = map.get(&key).copied().unwrap_or(default);
        rt.heap.inc_val(v);
        v
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn dict_contains(handle: u64, key: RtVal) -> bool {
    with_rt(|rt| {
        let Some(key) = rt.heap.hash_key(key) else {
            return false;
        };
        match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Dict(map) => map.contains_key(&key),
            _ => false,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn dict_len(handle: u64) -> i64 {
    with_rt(|rt| match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Dict(map) => map.len() as i64,
        _ => 0,
    })
}

/// `d.keys()` materialized as a list, in insertion order.
#[unsafe(no_mangle)]
pub extern "C" fn dict_keys(handle: u64) -> u64 {
    with_rt(|rt| {
        let keys: Vec<HashKey> = match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Dict(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        let items: Vec<RtVal> = keys.iter().map(|k| k.to_val(&mut rt.heap)).collect();
        rt.heap.alloc(HeapData::List(items)).raw()
    })
}

/// `d.values()` materialized as a list.
#[unsafe(no_mangle)]
pub extern "C" fn dict_values(handle: u64) -> u64 {
    with_rt(|rt| {
        let values: Vec<RtVal> = match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Dict(map) => map.values().copied().collect(),
            _ => Vec::new(),
        };
        for v in &values {
            rt.heap.inc_val(*v);
        }
        rt.heap.alloc(HeapData::List(values)).raw()
    })
}

/// `d.items()` materialized as a list of 2-tuples.
#[unsafe(no_mangle)]
pub extern "C" fn dict_items(handle: u64) -> u64 {
    with_rt(|rt| {
        let pairs: Vec<(HashKey, RtVal)> = match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Dict(map) => map.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            _ => Vec::new(),
        };
        let items: Vec<RtVal> = pairs
            .into_iter()
            .map(|(k, v)| {
                let key = k.to_val(&mut rt.heap);
                rt.heap.inc_val(v);
                RtVal::from_ref(rt.heap.alloc(HeapData::Tuple(vec![key, v])))
            })
            .collect();
        rt.heap.alloc(HeapData::List(items)).raw()
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn set_new() -> u64 {
    with_rt(|rt| {
        rt.heap
            .alloc(HeapData::Set(IndexMap::with_hasher(ahash::RandomState::default())))
            .raw()
    })
}

/// `s.add(v)`; the value is borrowed (copied into key form).
#[unsafe(no_mangle)]
pub extern "C" fn set_add(handle: u64, value: RtVal) {
    with_rt(|rt| {
        let Some(key) = key_or_raise(rt, value) else {
            return;
        };
        if let HeapData::Set(items) = rt.heap.get_mut(HeapId::from_raw(handle)) {
            items.insert(key, ());
        }
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn set_contains(handle: u64, value: RtVal) -> bool {
    with_rt(|rt| {
        let Some(key) = rt.heap.hash_key(value) else {
            return false;
        };
        match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Set(items) => items.contains_key(&key),
            _ => false,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn set_len(handle: u64) -> i64 {
    with_rt(|rt| match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Set(items) => items.len() as i64,
        _ => 0,
    })
}

/// Builds a tuple from a C array; element references are consumed.
///
/// # Safety
/// `items` must point to `n` valid `RtVal`s.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tuple_new(items: *const RtVal, n: u64) -> u64 {
    let items = if n == 0 {
        Vec::new()
    } else {
        // SAFETY: caller passes a stack array of n values.
        unsafe { std::slice::from_raw_parts(items, n as usize) }.to_vec()
    };
    with_rt(|rt| rt.heap.alloc(HeapData::Tuple(items)).raw())
}

#[unsafe(no_mangle)]
pub extern "C" fn tuple_get(handle: u64, index: i64) -> RtVal {
    with_rt(|rt| {
        let items = match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Tuple(items) => items,
            _ => return RtVal::NONE,
        };
        match resolve_index(items.len() as i64, index) {
            Some(i) => {
                let v = items[i];
                rt.heap.inc_val(v);
                v
            }
            None => {
                rt.raise(ExcKind::IndexError, "tuple index out of range");
                RtVal::NONE
            }
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tuple_len(handle: u64) -> i64 {
    with_rt(|rt| match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Tuple(items) => items.len() as i64,
        _ => 0,
    })
}
