//! Reference-counted heap shared by all generated code.
//!
//! Objects live in a slab of slots addressed by [`HeapId`] handles; a
//! handle's raw form is the slot index plus one so that 0 stays available
//! as a null handle in the C ABI. Each slot carries the reference count
//! alongside the payload. Freed slots are recycled through a free list.
//!
//! Ownership discipline: every allocation starts with a reference count of
//! one held by the defining value. The compiler emits the matching
//! `rc_inc`/`rc_dec` pairs; container operations that store a value
//! increment on behalf of the container and decrement when the container
//! itself is dropped.

use std::fmt::Write;

use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::value::{RtVal, Tag, format_float};

/// Opaque handle to a heap slot. Raw form is `index + 1`; 0 is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u64);

impl HeapId {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

/// Hashable key form of a value, used by dict and set storage.
///
/// Numeric keys are normalized the way Python's hash contract requires:
/// `True`, `1` and `1.0` are the same key. Strings are copied out of the
/// heap so the key owns its data and stays valid across heap mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    /// Float with no integral normalization possible; stores raw bits.
    FloatBits(u64),
    Str(Box<str>),
    Bytes(Box<[u8]>),
    Tuple(Box<[HashKey]>),
}

impl HashKey {
    /// Renders the key for container reprs.
    pub fn write_repr(&self, out: &mut String) {
        match self {
            Self::None => out.push_str("None"),
            Self::Int(v) => {
                let _ = write!(out, "{v}");
            }
            Self::FloatBits(bits) => out.push_str(&format_float(f64::from_bits(*bits))),
            Self::Str(s) => {
                let _ = write!(out, "'{s}'");
            }
            Self::Bytes(b) => {
                let _ = write!(out, "b'{}'", b.escape_ascii());
            }
            Self::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
        }
    }

    /// Converts the key back into a value, allocating strings as needed.
    pub fn to_val(&self, heap: &mut Heap) -> RtVal {
        match self {
            Self::None => RtVal::NONE,
            Self::Int(v) => RtVal::from_int(*v),
            Self::FloatBits(bits) => RtVal::from_float(f64::from_bits(*bits)),
            Self::Str(s) => RtVal::from_ref(heap.alloc(HeapData::Str(s.to_string()))),
            Self::Bytes(b) => RtVal::from_ref(heap.alloc(HeapData::Bytes(b.to_vec()))),
            Self::Tuple(items) => {
                let vals: Vec<RtVal> = items.iter().map(|k| k.to_val(heap)).collect();
                RtVal::from_ref(heap.alloc(HeapData::Tuple(vals)))
            }
        }
    }
}

/// State of one `asyncio.Queue`.
///
/// Waiting getters and putters are parked task ids, woken in FIFO order by
/// the scheduler when the complementary operation arrives.
#[derive(Debug, Default)]
pub struct QueueState {
    pub items: std::collections::VecDeque<RtVal>,
    /// Zero means unbounded.
    pub capacity: usize,
    pub getters: std::collections::VecDeque<crate::sched::TaskId>,
    pub putters: std::collections::VecDeque<crate::sched::TaskId>,
}

impl QueueState {
    pub fn is_full(&self) -> bool {
        self.capacity != 0 && self.items.len() >= self.capacity
    }
}

/// Payload of a heap slot.
#[derive(Debug)]
pub enum HeapData {
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<RtVal>),
    Tuple(Vec<RtVal>),
    Dict(IndexMap<HashKey, RtVal, ahash::RandomState>),
    Set(IndexMap<HashKey, (), ahash::RandomState>),
    /// Class instance: resolved class id plus field slots in declaration
    /// order (base-class fields first).
    Object { class: u32, fields: Vec<RtVal> },
    /// Arbitrary-precision integer, reached when `int()` overflows `i64`.
    Big(BigInt),
    /// Raw state-machine frame memory. Layout is owned by the emitted C;
    /// the box keeps the payload address stable across slab growth.
    Frame(Box<[u8]>),
    Queue(QueueState),
}

#[derive(Debug)]
struct Slot {
    rc: u32,
    data: HeapData,
}

/// The slab itself. One per runtime instance (and the program is
/// single-threaded, so one per process in practice).
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new object with an initial reference count of one.
    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let slot = Slot { rc: 1, data };
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(slot);
            HeapId((index + 1) as u64)
        } else {
            self.slots.push(Some(slot));
            HeapId(self.slots.len() as u64)
        }
    }

    /// # Panics
    /// Panics if the handle is null or the slot was already freed; both
    /// indicate a reference-counting bug in emitted code.
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.slots[id.index()].as_ref().expect("use after free").data
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.slots[id.index()].as_mut().expect("use after free").data
    }

    pub fn rc(&self, id: HeapId) -> u32 {
        self.slots[id.index()].as_ref().expect("use after free").rc
    }

    pub fn inc(&mut self, id: HeapId) {
        let slot = self.slots[id.index()].as_mut().expect("use after free");
        slot.rc += 1;
    }

    /// Decrements the count, freeing the object and recursively releasing
    /// its children when it reaches zero.
    pub fn dec(&mut self, id: HeapId) {
        let slot = self.slots[id.index()].as_mut().expect("use after free");
        slot.rc -= 1;
        if slot.rc > 0 {
            return;
        }
        let slot = self.slots[id.index()].take().expect("use after free");
        self.free.push(id.index());
        match slot.data {
            HeapData::List(items) | HeapData::Tuple(items) => {
                for item in items {
                    self.dec_val(item);
                }
            }
            HeapData::Dict(map) => {
                for (_, value) in map {
                    self.dec_val(value);
                }
            }
            HeapData::Object { fields, .. } => {
                for field in fields {
                    self.dec_val(field);
                }
            }
            HeapData::Queue(queue) => {
                for item in queue.items {
                    self.dec_val(item);
                }
            }
            // Frames are released by the terminal block of their state
            // machine before the final reference drops; the raw bytes hold
            // nothing the heap needs to chase.
            HeapData::Str(_) | HeapData::Bytes(_) | HeapData::Set(_) | HeapData::Big(_) | HeapData::Frame(_) => {}
        }
    }

    /// Decrements the referent when `val` is a reference; no-op otherwise.
    pub fn dec_val(&mut self, val: RtVal) {
        if let Some(id) = val.ref_id() {
            self.dec(id);
        }
    }

    /// Increments the referent when `val` is a reference; no-op otherwise.
    pub fn inc_val(&mut self, val: RtVal) {
        if let Some(id) = val.ref_id() {
            self.inc(id);
        }
    }

    /// Number of live objects, used by tests to assert balance.
    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Converts a value into its hashable key form.
    ///
    /// Returns `None` for unhashable values (lists, dicts, sets, objects);
    /// callers raise `TypeError`.
    pub fn hash_key(&self, val: RtVal) -> Option<HashKey> {
        match val.tag() {
            Tag::None => Some(HashKey::None),
            Tag::Bool => Some(HashKey::Int(i64::from(val.as_bool()))),
            Tag::Int => Some(HashKey::Int(val.as_int())),
            Tag::Float => {
                let f = val.as_float();
                if f.fract() == 0.0 && f.abs() < 9.22e18 {
                    Some(HashKey::Int(f as i64))
                } else {
                    Some(HashKey::FloatBits(f.to_bits()))
                }
            }
            Tag::Ref => match self.get(HeapId::from_raw(val.bits)) {
                HeapData::Str(s) => Some(HashKey::Str(s.clone().into_boxed_str())),
                HeapData::Bytes(b) => Some(HashKey::Bytes(b.clone().into_boxed_slice())),
                HeapData::Tuple(items) => {
                    let keys: Option<Vec<HashKey>> = items.iter().map(|v| self.hash_key(*v)).collect();
                    keys.map(|k| HashKey::Tuple(k.into_boxed_slice()))
                }
                _ => None,
            },
        }
    }

    /// Writes the str/repr of a heap object into `out`.
    ///
    /// Container elements always render in repr form, matching Python's
    /// `print([1, 'a'])` output of `[1, 'a']`.
    pub fn write_data(&self, id: HeapId, out: &mut String, repr: bool) {
        match self.get(id) {
            HeapData::Str(s) => {
                if repr {
                    let _ = write!(out, "'{s}'");
                } else {
                    out.push_str(s);
                }
            }
            HeapData::Bytes(b) => {
                let _ = write!(out, "b'{}'", b.escape_ascii());
            }
            HeapData::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(self, out);
                }
                out.push(']');
            }
            HeapData::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(self, out);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            HeapData::Dict(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out);
                    out.push_str(": ");
                    value.write_repr(self, out);
                }
                out.push('}');
            }
            HeapData::Set(items) => {
                if items.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    for (i, (key, ())) in items.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        key.write_repr(out);
                    }
                    out.push('}');
                }
            }
            HeapData::Object { class, .. } => {
                let _ = write!(out, "<object class_id={class}>");
            }
            HeapData::Big(b) => {
                let _ = write!(out, "{b}");
            }
            HeapData::Frame(_) => out.push_str("<frame>"),
            HeapData::Queue(_) => out.push_str("<Queue>"),
        }
    }
}

/// Sentinel for an omitted slice bound in the `*_slice` ABI calls.
pub const SLICE_MISSING: i64 = i64::MIN;

/// Resolves Python slice semantics to a list of element indices.
///
/// Handles negative bounds, clamping, and negative steps the way
/// `PySlice_AdjustIndices` does. Returns `None` for a zero step; the
/// caller raises `ValueError`.
pub fn slice_indices(len: i64, start: i64, stop: i64, step: i64) -> Option<Vec<usize>> {
    if step == 0 {
        return None;
    }
    let adjust = |bound: i64, is_start: bool| -> i64 {
        if bound == SLICE_MISSING {
            if step > 0 {
                return if is_start { 0 } else { len };
            }
            return if is_start { len - 1 } else { -1 };
        }
        let mut b = bound;
        if b < 0 {
            b += len;
            if b < 0 {
                return if step < 0 { -1 } else { 0 };
            }
        } else if b >= len {
            return if step < 0 { len - 1 } else { len };
        }
        b
    };
    let start = adjust(start, true);
    let stop = adjust(stop, false);
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Some(out)
}

/// Resolves a possibly-negative index against a length. `None` is out of
/// bounds.
pub fn resolve_index(len: i64, index: i64) -> Option<usize> {
    let i = if index < 0 { index + len } else { index };
    if (0..len).contains(&i) { Some(i as usize) } else { None }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Heap, HeapData, SLICE_MISSING, slice_indices};
    use crate::value::RtVal;

    #[test]
    fn rc_lifecycle_frees_children() {
        let mut heap = Heap::new();
        let s = heap.alloc(HeapData::Str("hi".to_owned()));
        let list = heap.alloc(HeapData::List(vec![RtVal::from_ref(s), RtVal::from_int(1)]));
        // The list holds its own reference to the string.
        heap.inc(s);
        heap.dec(s);
        assert_eq!(heap.live_objects(), 2);
        heap.dec(list);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn slots_are_recycled() {
        let mut heap = Heap::new();
        let a = heap.alloc(HeapData::Str("a".to_owned()));
        heap.dec(a);
        let b = heap.alloc(HeapData::Str("b".to_owned()));
        assert_eq!(a.raw(), b.raw());
        heap.dec(b);
    }

    #[test]
    fn slice_index_resolution() {
        let m = SLICE_MISSING;
        assert_eq!(slice_indices(5, m, m, 1).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_indices(5, 1, 3, 1).unwrap(), vec![1, 2]);
        assert_eq!(slice_indices(5, m, m, 2).unwrap(), vec![0, 2, 4]);
        assert_eq!(slice_indices(5, m, m, -1).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_indices(5, -2, m, 1).unwrap(), vec![3, 4]);
        assert_eq!(slice_indices(5, m, -3, 1).unwrap(), vec![0, 1]);
        assert_eq!(slice_indices(5, 10, 20, 1).unwrap(), Vec::<usize>::new());
        assert!(slice_indices(5, m, m, 0).is_none());
    }

    #[test]
    fn numeric_keys_normalize() {
        let heap = Heap::new();
        let one = heap.hash_key(RtVal::from_int(1)).unwrap();
        let one_f = heap.hash_key(RtVal::from_float(1.0)).unwrap();
        let one_b = heap.hash_key(RtVal::from_bool(true)).unwrap();
        assert_eq!(one, one_f);
        assert_eq!(one, one_b);
    }
}
