//! Dynamic-value constructors, accessors, and the `Dyn` dispatch table.
//!
//! Typed code touches these only at boxing boundaries (container element
//! traffic, printing, f-strings). Code the compiler could not type falls
//! back to the `dyn_*` operations, which dispatch on the runtime tags.

use std::cmp::Ordering;

use crate::{
    exc::ExcKind,
    heap::{HeapData, HeapId},
    state::with_rt,
    value::RtVal,
};

#[unsafe(no_mangle)]
pub extern "C" fn val_none() -> RtVal {
    RtVal::NONE
}

#[unsafe(no_mangle)]
pub extern "C" fn val_from_int(v: i64) -> RtVal {
    RtVal::from_int(v)
}

#[unsafe(no_mangle)]
pub extern "C" fn val_from_float(v: f64) -> RtVal {
    RtVal::from_float(v)
}

#[unsafe(no_mangle)]
pub extern "C" fn val_from_bool(v: bool) -> RtVal {
    RtVal::from_bool(v)
}

/// Wraps a heap handle; ownership of the caller's reference moves into the
/// value.
#[unsafe(no_mangle)]
pub extern "C" fn val_from_ref(handle: u64) -> RtVal {
    RtVal::from_ref(HeapId::from_raw(handle))
}

#[unsafe(no_mangle)]
pub extern "C" fn val_as_int(v: RtVal) -> i64 {
    match v.tag() {
        crate::value::Tag::Bool => i64::from(v.as_bool()),
        crate::value::Tag::Float => v.as_float() as i64,
        _ => v.as_int(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn val_as_float(v: RtVal) -> f64 {
    match v.tag() {
        crate::value::Tag::Int => v.as_int() as f64,
        crate::value::Tag::Bool => f64::from(u8::from(v.as_bool())),
        _ => v.as_float(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn val_as_bool(v: RtVal) -> bool {
    v.as_bool()
}

#[unsafe(no_mangle)]
pub extern "C" fn val_as_ref(v: RtVal) -> u64 {
    v.ref_id().map_or(0, HeapId::raw)
}

#[unsafe(no_mangle)]
pub extern "C" fn val_truthy(v: RtVal) -> bool {
    with_rt(|rt| v.truthy(&rt.heap))
}

/// Structural equality; operands are borrowed.
#[unsafe(no_mangle)]
pub extern "C" fn val_eq(a: RtVal, b: RtVal) -> bool {
    with_rt(|rt| a.eq_with_heap(b, &rt.heap))
}

/// `str(value)` as a fresh owned string handle.
#[unsafe(no_mangle)]
pub extern "C" fn str_of_val(v: RtVal) -> u64 {
    with_rt(|rt| {
        let mut out = String::new();
        v.write_str(&rt.heap, &mut out);
        rt.heap.alloc(HeapData::Str(out)).raw()
    })
}

/// Binary operator codes shared with the emitter.
const OP_ADD: u32 = 0;
const OP_SUB: u32 = 1;
const OP_MUL: u32 = 2;
const OP_DIV: u32 = 3;
const OP_FLOORDIV: u32 = 4;
const OP_MOD: u32 = 5;
const OP_POW: u32 = 6;

/// Dynamic binary dispatch. Operands are borrowed; the result is owned.
///
/// Numeric pairs follow the promotion lattice; `+` additionally handles
/// string and list concatenation. Anything else raises `TypeError`.
#[unsafe(no_mangle)]
pub extern "C" fn dyn_binop(op: u32, a: RtVal, b: RtVal) -> RtVal {
    with_rt(|rt| {
        use crate::value::Tag;
        if op == OP_ADD
            && let (Some(x), Some(y)) = (a.ref_id(), b.ref_id())
        {
            match (rt.heap.get(x), rt.heap.get(y)) {
                (HeapData::Str(l), HeapData::Str(r)) => {
                    let joined = format!("{l}{r}");
                    return RtVal::from_ref(rt.heap.alloc(HeapData::Str(joined)));
                }
                (HeapData::List(l), HeapData::List(r)) => {
                    let items: Vec<RtVal> = l.iter().chain(r.iter()).copied().collect();
                    for item in &items {
                        rt.heap.inc_val(*item);
                    }
                    return RtVal::from_ref(rt.heap.alloc(HeapData::List(items)));
                }
                _ => {}
            }
        }
        let both_int = matches!(a.tag(), Tag::Int | Tag::Bool) && matches!(b.tag(), Tag::Int | Tag::Bool);
        let (x, y) = (val_as_float(a), val_as_float(b));
        if both_int {
            let (x, y) = (val_as_int(a), val_as_int(b));
            match op {
                OP_ADD => return RtVal::from_int(x.wrapping_add(y)),
                OP_SUB => return RtVal::from_int(x.wrapping_sub(y)),
                OP_MUL => return RtVal::from_int(x.wrapping_mul(y)),
                OP_DIV => {
                    if y == 0 {
                        rt.raise(ExcKind::ZeroDivisionError, "division by zero");
                        return RtVal::NONE;
                    }
                    return RtVal::from_float(x as f64 / y as f64);
                }
                OP_FLOORDIV => {
                    if y == 0 {
                        rt.raise(ExcKind::ZeroDivisionError, "integer division or modulo by zero");
                        return RtVal::NONE;
                    }
                    return RtVal::from_int(x.div_euclid(y));
                }
                OP_MOD => {
                    if y == 0 {
                        rt.raise(ExcKind::ZeroDivisionError, "integer division or modulo by zero");
                        return RtVal::NONE;
                    }
                    return RtVal::from_int(x.rem_euclid(y));
                }
                OP_POW => {
                    // Negative exponents leave the integers.
                    return match u32::try_from(y) {
                        Ok(exp) => RtVal::from_int(x.wrapping_pow(exp)),
                        Err(_) => RtVal::from_float((x as f64).powi(y as i32)),
                    };
                }
                _ => {}
            }
        }
        let numericish = |v: RtVal| matches!(v.tag(), Tag::Int | Tag::Bool | Tag::Float);
        if !(numericish(a) && numericish(b)) {
            rt.raise(ExcKind::TypeError, "unsupported operand types");
            return RtVal::NONE;
        }
        match op {
            OP_ADD => RtVal::from_float(x + y),
            OP_SUB => RtVal::from_float(x - y),
            OP_MUL => RtVal::from_float(x * y),
            OP_DIV => {
                if y == 0.0 {
                    rt.raise(ExcKind::ZeroDivisionError, "float division by zero");
                    return RtVal::NONE;
                }
                RtVal::from_float(x / y)
            }
            OP_FLOORDIV => RtVal::from_float((x / y).floor()),
            OP_MOD => RtVal::from_float(x - (x / y).floor() * y),
            OP_POW => RtVal::from_float(x.powf(y)),
            _ => {
                rt.raise(ExcKind::TypeError, "unknown operator");
                RtVal::NONE
            }
        }
    })
}

/// Comparison codes shared with the emitter.
const CMP_EQ: u32 = 0;
const CMP_NE: u32 = 1;
const CMP_LT: u32 = 2;
const CMP_LE: u32 = 3;
const CMP_GT: u32 = 4;
const CMP_GE: u32 = 5;

/// Dynamic comparison dispatch; operands are borrowed.
#[unsafe(no_mangle)]
pub extern "C" fn dyn_cmp(op: u32, a: RtVal, b: RtVal) -> bool {
    with_rt(|rt| match op {
        CMP_EQ => a.eq_with_heap(b, &rt.heap),
        CMP_NE => !a.eq_with_heap(b, &rt.heap),
        _ => match a.cmp_with_heap(b, &rt.heap) {
            Some(ordering) => match op {
                CMP_LT => ordering == Ordering::Less,
                CMP_LE => ordering != Ordering::Greater,
                CMP_GT => ordering == Ordering::Greater,
                CMP_GE => ordering != Ordering::Less,
                _ => false,
            },
            None => {
                rt.raise(ExcKind::TypeError, "'<' not supported between these operands");
                false
            }
        },
    })
}
