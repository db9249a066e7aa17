//! Class instances, vtables, and dynamic attribute dispatch.
//!
//! The compiler registers every class at program start: name, base, field
//! layout, and a flat method table (base methods first, overrides written
//! over the inherited slot). Calls on statically typed receivers never
//! come through here — the compiler devirtualizes them — so this surface
//! only serves `Dyn` receivers and exception machinery.

use crate::{
    exc::ExcKind,
    heap::{HeapData, HeapId},
    state::{ClassMeta, with_rt},
    value::RtVal,
};

/// Begins registration of a class. Fields and methods follow via
/// `class_add_field` / `class_add_method` in declaration order.
///
/// `base_plus1` is the base class id plus one; 0 means no base.
///
/// # Safety
/// `name` must point to `name_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn class_register(id: u32, name: *const u8, name_len: u64, base_plus1: u32) {
    // SAFETY: forwarded from the caller's contract.
    let name = unsafe { super::str_arg(name, name_len) }.into_owned();
    with_rt(|rt| {
        rt.register_class(
            id,
            ClassMeta {
                name,
                base: base_plus1.checked_sub(1),
                fields: Vec::new(),
                vtable: Vec::new(),
                methods: Vec::new(),
            },
        );
    });
}

/// # Safety
/// `name` must point to `name_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn class_add_field(id: u32, name: *const u8, name_len: u64) {
    // SAFETY: forwarded from the caller's contract.
    let name = unsafe { super::str_arg(name, name_len) }.into_owned();
    with_rt(|rt| rt.class_mut(id).fields.push(name));
}

/// Appends a vtable slot. Overridden methods are re-registered at the same
/// slot index by the derived class, so registration order must match the
/// compiler's slot assignment.
///
/// # Safety
/// `name` must point to `name_len` readable bytes; `fn_addr` must be the
/// address of a function emitted for this class.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn class_add_method(id: u32, name: *const u8, name_len: u64, fn_addr: u64) {
    // SAFETY: forwarded from the caller's contract.
    let name = unsafe { super::str_arg(name, name_len) }.into_owned();
    with_rt(|rt| {
        let class = rt.class_mut(id);
        class.methods.push(name);
        class.vtable.push(fn_addr as usize);
    });
}

/// Allocates an instance with `nfields` slots, all `None`.
#[unsafe(no_mangle)]
pub extern "C" fn obj_new(class_id: u32, nfields: u64) -> u64 {
    with_rt(|rt| {
        rt.heap
            .alloc(HeapData::Object {
                class: class_id,
                fields: vec![RtVal::NONE; nfields as usize],
            })
            .raw()
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn obj_class(handle: u64) -> u32 {
    with_rt(|rt| match rt.heap.get(HeapId::from_raw(handle)) {
        HeapData::Object { class, .. } => *class,
        _ => 0,
    })
}

/// Field read by layout index; returns an owned reference.
#[unsafe(no_mangle)]
pub extern "C" fn attr_get(handle: u64, field: u32) -> RtVal {
    with_rt(|rt| {
        let v = match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Object { fields, .. } => fields.get(field as usize).copied().unwrap_or(RtVal::NONE),
            _ => RtVal::NONE,
        };
        rt.heap.inc_val(v);
        v
    })
}

/// Field write by layout index; consumes the reference to `value`.
#[unsafe(no_mangle)]
pub extern "C" fn attr_set(handle: u64, field: u32, value: RtVal) {
    with_rt(|rt| {
        let old = match rt.heap.get_mut(HeapId::from_raw(handle)) {
            HeapData::Object { fields, .. } => match fields.get_mut(field as usize) {
                Some(slot) => std::mem::replace(slot, value),
                None => value,
            },
            _ => value,
        };
        rt.heap.dec_val(old);
    });
}

/// Vtable fetch for a virtual call on a `Dyn` receiver. Returns the
/// function address for the slot, or 0.
#[unsafe(no_mangle)]
pub extern "C" fn obj_vmethod(handle: u64, slot: u32) -> u64 {
    with_rt(|rt| {
        let class = match rt.heap.get(HeapId::from_raw(handle)) {
            HeapData::Object { class, .. } => *class,
            _ => return 0,
        };
        rt.class(class).vtable.get(slot as usize).copied().unwrap_or(0) as u64
    })
}

/// Attribute lookup by name on a `Dyn` receiver: fields first, then the
/// method table. Missing names raise `AttributeError`.
///
/// Method results come back as the raw function address tagged as an int;
/// the compiler only permits immediate calls on such lookups.
///
/// # Safety
/// `name` must point to `name_len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dyn_attr_get(obj: RtVal, name: *const u8, name_len: u64) -> RtVal {
    // SAFETY: forwarded from the caller's contract.
    let name = unsafe { super::str_arg(name, name_len) }.into_owned();
    with_rt(|rt| {
        let Some(id) = obj.ref_id() else {
            rt.raise(ExcKind::AttributeError, format!("value has no attribute '{name}'"));
            return RtVal::NONE;
        };
        let (class, field) = match rt.heap.get(id) {
            HeapData::Object { class, fields } => {
                let index = rt.class(*class).fields.iter().position(|f| f == &name);
                (*class, index.map(|i| fields[i]))
            }
            _ => {
                rt.raise(ExcKind::AttributeError, format!("value has no attribute '{name}'"));
                return RtVal::NONE;
            }
        };
        if let Some(v) = field {
            rt.heap.inc_val(v);
            return v;
        }
        if let Some(slot) = rt.class(class).methods.iter().position(|m| m == &name) {
            return RtVal::from_int(rt.class(class).vtable[slot] as i64);
        }
        let class_name = rt.class(class).name.clone();
        rt.raise(
            ExcKind::AttributeError,
            format!("'{class_name}' object has no attribute '{name}'"),
        );
        RtVal::NONE
    })
}
