//! Tagged dynamic values exchanged between generated code and the runtime.
//!
//! Statically typed values live in plain C locals (`int64_t`, `double`,
//! `bool`); a value crosses into [`RtVal`] form when it is stored in a
//! container, printed, or typed `Dyn` by the compiler. The layout is a
//! two-word `{tag, bits}` struct mirrored verbatim by the emitted C header.

use std::fmt::Write;

use num_traits::ToPrimitive;

use crate::heap::{Heap, HeapData, HeapId};

/// Discriminant for the immediate portion of a dynamic value.
///
/// Heap-resident kinds (strings, lists, dicts, class instances, big
/// integers, frames) all share [`Tag::Ref`]; the heap header's type tag
/// distinguishes them.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    None = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    Ref = 4,
}

/// A dynamic value: 4-byte tag plus 8-byte payload.
///
/// `bits` holds the raw `i64` for ints, the IEEE bits for floats, 0/1 for
/// bools, and a heap handle for refs. `Copy` is deliberate: an `RtVal` does
/// not own its referent, reference counting is managed explicitly by the
/// generated code and the container operations.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RtVal {
    pub tag: u32,
    pub bits: u64,
}

impl RtVal {
    pub const NONE: Self = Self { tag: Tag::None as u32, bits: 0 };

    #[inline]
    pub fn from_int(v: i64) -> Self {
        Self { tag: Tag::Int as u32, bits: v as u64 }
    }

    #[inline]
    pub fn from_float(v: f64) -> Self {
        Self { tag: Tag::Float as u32, bits: v.to_bits() }
    }

    #[inline]
    pub fn from_bool(v: bool) -> Self {
        Self { tag: Tag::Bool as u32, bits: u64::from(v) }
    }

    #[inline]
    pub fn from_ref(id: HeapId) -> Self {
        Self { tag: Tag::Ref as u32, bits: id.raw() }
    }

    #[inline]
    pub fn tag(self) -> Tag {
        match self.tag {
            1 => Tag::Bool,
            2 => Tag::Int,
            3 => Tag::Float,
            4 => Tag::Ref,
            _ => Tag::None,
        }
    }

    #[inline]
    pub fn as_int(self) -> i64 {
        self.bits as i64
    }

    #[inline]
    pub fn as_float(self) -> f64 {
        f64::from_bits(self.bits)
    }

    #[inline]
    pub fn as_bool(self) -> bool {
        self.bits != 0
    }

    /// Returns the heap handle if this value is a reference.
    #[inline]
    pub fn ref_id(self) -> Option<HeapId> {
        if self.tag() == Tag::Ref { Some(HeapId::from_raw(self.bits)) } else { None }
    }

    /// Truthiness following Python rules: zero, empty, and `None` are false.
    pub fn truthy(self, heap: &Heap) -> bool {
        match self.tag() {
            Tag::None => false,
            Tag::Bool => self.as_bool(),
            Tag::Int => self.as_int() != 0,
            Tag::Float => self.as_float() != 0.0,
            Tag::Ref => match heap.get(HeapId::from_raw(self.bits)) {
                HeapData::Str(s) => !s.is_empty(),
                HeapData::Bytes(b) => !b.is_empty(),
                HeapData::List(items) => !items.is_empty(),
                HeapData::Tuple(items) => !items.is_empty(),
                HeapData::Dict(map) => !map.is_empty(),
                HeapData::Set(items) => !items.is_empty(),
                HeapData::Big(b) => !num_traits::Zero::is_zero(b),
                _ => true,
            },
        }
    }

    /// Structural equality following Python `==` for the supported kinds.
    ///
    /// Numeric kinds compare across tags (`1 == 1.0 == True`). Reference
    /// kinds compare by identity first, then structurally.
    pub fn eq_with_heap(self, other: Self, heap: &Heap) -> bool {
        if let (Some(a), Some(b)) = (self.numeric(heap), other.numeric(heap)) {
            return a == b;
        }
        match (self.tag(), other.tag()) {
            (Tag::None, Tag::None) => true,
            (Tag::Ref, Tag::Ref) => {
                let (a, b) = (HeapId::from_raw(self.bits), HeapId::from_raw(other.bits));
                if a == b {
                    return true;
                }
                match (heap.get(a), heap.get(b)) {
                    (HeapData::Str(x), HeapData::Str(y)) => x == y,
                    (HeapData::Bytes(x), HeapData::Bytes(y)) => x == y,
                    (HeapData::List(x), HeapData::List(y)) | (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                        x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| l.eq_with_heap(*r, heap))
                    }
                    (HeapData::Big(x), HeapData::Big(y)) => x == y,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Ordering following Python `<`/`>` for the comparable kinds:
    /// numerics cross-tag, strings lexicographic by codepoint, lists and
    /// tuples elementwise. `None` when the kinds are not comparable.
    pub fn cmp_with_heap(self, other: Self, heap: &Heap) -> Option<std::cmp::Ordering> {
        if let (Some(a), Some(b)) = (self.numeric(heap), other.numeric(heap)) {
            return a.partial_cmp(&b);
        }
        if let (Tag::Ref, Tag::Ref) = (self.tag(), other.tag()) {
            let (a, b) = (HeapId::from_raw(self.bits), HeapId::from_raw(other.bits));
            match (heap.get(a), heap.get(b)) {
                (HeapData::Str(x), HeapData::Str(y)) => return Some(x.cmp(y)),
                (HeapData::Bytes(x), HeapData::Bytes(y)) => return Some(x.cmp(y)),
                (HeapData::List(x), HeapData::List(y)) | (HeapData::Tuple(x), HeapData::Tuple(y)) => {
                    for (l, r) in x.iter().zip(y.iter()) {
                        match l.cmp_with_heap(*r, heap) {
                            Some(std::cmp::Ordering::Equal) => {}
                            other => return other,
                        }
                    }
                    return Some(x.len().cmp(&y.len()));
                }
                (HeapData::Big(x), HeapData::Big(y)) => return Some(x.cmp(y)),
                _ => {}
            }
        }
        None
    }

    /// Numeric view of a value, used for cross-tag comparisons.
    ///
    /// Big integers degrade to `f64`; exact for every value the comparison
    /// paths produce in practice since mixed big/float comparisons already
    /// went through float promotion in the compiler.
    fn numeric(self, heap: &Heap) -> Option<f64> {
        match self.tag() {
            Tag::Bool => Some(f64::from(u8::from(self.as_bool()))),
            Tag::Int => Some(self.as_int() as f64),
            Tag::Float => Some(self.as_float()),
            Tag::Ref => match heap.get(HeapId::from_raw(self.bits)) {
                HeapData::Big(b) => b.to_f64(),
                _ => None,
            },
            Tag::None => None,
        }
    }

    /// Writes `str(value)` into `out`.
    pub fn write_str(self, heap: &Heap, out: &mut String) {
        self.write_fmt(heap, out, false);
    }

    /// Writes `repr(value)` into `out` (strings gain quotes).
    pub fn write_repr(self, heap: &Heap, out: &mut String) {
        self.write_fmt(heap, out, true);
    }

    fn write_fmt(self, heap: &Heap, out: &mut String, repr: bool) {
        match self.tag() {
            Tag::None => out.push_str("None"),
            Tag::Bool => out.push_str(if self.as_bool() { "True" } else { "False" }),
            Tag::Int => {
                let _ = write!(out, "{}", self.as_int());
            }
            Tag::Float => out.push_str(&format_float(self.as_float())),
            Tag::Ref => heap.write_data(HeapId::from_raw(self.bits), out, repr),
        }
    }
}

/// Formats a float the way CPython's `repr` does.
///
/// ryu gives the shortest round-tripping decimal form; what remains is
/// matching CPython's choice of positional vs. scientific notation
/// (scientific when the decimal exponent is below -4 or at least 16) and
/// its `e+NN` exponent spelling.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_owned();
    }
    if x.is_infinite() {
        return if x < 0.0 { "-inf".to_owned() } else { "inf".to_owned() };
    }
    let mut buf = ryu::Buffer::new();
    let shortest = buf.format_finite(x);
    let (mantissa, exp) = match shortest.split_once(['e', 'E']) {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (shortest, 0),
    };
    let mantissa = mantissa.strip_prefix('-').unwrap_or(mantissa);
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let all_digits = format!("{int_part}{frac_part}");
    let leading_zeros = all_digits.bytes().take_while(|&b| b == b'0').count();
    let digits = all_digits[leading_zeros..].trim_end_matches('0');

    let mut out = String::new();
    if x.is_sign_negative() {
        out.push('-');
    }
    if digits.is_empty() {
        out.push_str("0.0");
        return out;
    }
    // Decimal exponent of the leading significant digit.
    let lead_exp = exp + int_part.len() as i32 - 1 - leading_zeros as i32;
    if (-4..16).contains(&lead_exp) {
        if lead_exp >= 0 {
            let int_len = (lead_exp + 1) as usize;
            if digits.len() <= int_len {
                out.push_str(digits);
                out.push_str(&"0".repeat(int_len - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        } else {
            out.push_str("0.");
            out.push_str(&"0".repeat((-lead_exp - 1) as usize));
            out.push_str(digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let _ = write!(out, "e{}{:02}", if lead_exp < 0 { '-' } else { '+' }, lead_exp.abs());
    }
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::format_float;

    #[test]
    fn float_repr_matches_cpython() {
        assert_eq!(format_float(25.0), "25.0");
        assert_eq!(format_float(3.14), "3.14");
        assert_eq!(format_float(-0.5), "-0.5");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(1e100), "1e+100");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(1234.5), "1234.5");
        assert_eq!(format_float(1e15), "1000000000000000.0");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }
}
