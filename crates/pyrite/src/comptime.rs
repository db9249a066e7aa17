//! Compile-time evaluation of literal-derived expressions.
//!
//! A pure folding interpreter over the whitelisted subset: numeric and
//! string arithmetic, boolean logic, string methods (`upper`, `lower`,
//! `strip`, `replace`), constant-index list indexing, `len` of literals,
//! and f-strings whose parts are all constant. Folded values substitute
//! for their expressions during lowering, so `2**8` reaches the emitted C
//! as the literal `256`.
//!
//! Failures inside a foldable expression (division by zero, index out of
//! bounds) are compile-time `ValueError`s at the offending span; they are
//! never demoted to runtime errors.

use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::{
    ast::{BinOp, BoolOp, CmpOp, CodeRange, Expr, ExprKind, FStringPart, Literal, UnaryOp},
    errors::{CompileError, ErrorKind},
    intern::Interner,
    types::Ty,
};

/// A compile-time value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Big(BigInt),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Const>),
    Tuple(Vec<Const>),
}

impl Const {
    /// The static type of this constant. Lists report their unified
    /// element type; the fixed-vs-dynamic decision is the inferencer's.
    pub fn ty(&self) -> Ty {
        match self {
            Self::None => Ty::None,
            Self::Bool(_) => Ty::Bool,
            Self::Int(_) => Ty::Int64,
            Self::Big(_) => Ty::BigInt,
            Self::Float(_) => Ty::Float64,
            Self::Str(_) => Ty::Str,
            Self::Bytes(_) => Ty::Bytes,
            Self::List(items) => {
                let elem = Self::unified_elem(items).unwrap_or(Ty::Dyn);
                Ty::FixedArr(Box::new(elem), items.len())
            }
            Self::Tuple(items) => Ty::Tuple(items.iter().map(Self::ty).collect()),
        }
    }

    /// Unified element type of a homogeneous constant sequence.
    pub fn unified_elem(items: &[Self]) -> Option<Ty> {
        let mut elem: Option<Ty> = None;
        for item in items {
            let ty = item.ty();
            elem = Some(match elem {
                Some(prev) => prev.join(&ty)?,
                None => ty,
            });
        }
        elem
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Big(b) => !b.is_zero(),
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            Self::Int(v) => Some(*v as f64),
            Self::Big(b) => b.to_f64(),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Renders the constant the way `str()` would, for f-string folding.
    pub fn display(&self) -> Option<String> {
        match self {
            Self::None => Some("None".to_owned()),
            Self::Bool(b) => Some(if *b { "True" } else { "False" }.to_owned()),
            Self::Int(v) => Some(v.to_string()),
            Self::Big(b) => Some(b.to_string()),
            // Shares the runtime's float formatting so folded f-strings
            // match runtime output byte for byte.
            Self::Float(f) => Some(pyrite_runtime::value::format_float(*f)),
            Self::Str(s) => Some(s.clone()),
            Self::Bytes(_) | Self::List(_) | Self::Tuple(_) => None,
        }
    }
}

type FoldResult = Result<Option<Const>, CompileError>;

fn value_error(message: impl Into<String>, range: CodeRange) -> CompileError {
    CompileError::new(ErrorKind::ValueError, message, range)
}

/// Attempts to fold `expr`. `Ok(None)` means "not comptime"; errors are
/// hard compile errors.
pub fn fold(expr: &Expr, interner: &Interner) -> FoldResult {
    match &expr.kind {
        ExprKind::Literal(literal) => Ok(Some(match literal {
            Literal::None => Const::None,
            Literal::Bool(b) => Const::Bool(*b),
            Literal::Int(v) => Const::Int(*v),
            Literal::BigInt(b) => Const::Big(b.clone()),
            Literal::Float(f) => Const::Float(*f),
            Literal::Str(id) => Const::Str(interner.get(*id).to_owned()),
            Literal::Bytes(bytes) => Const::Bytes(bytes.clone()),
        })),
        ExprKind::List(items) => fold_sequence(items, interner, Const::List),
        ExprKind::Tuple(items) => fold_sequence(items, interner, Const::Tuple),
        ExprKind::Bin { op, left, right } => {
            let (Some(lhs), Some(rhs)) = (fold(left, interner)?, fold(right, interner)?) else {
                return Ok(None);
            };
            fold_bin(*op, &lhs, &rhs, expr.range)
        }
        ExprKind::Unary { op, operand } => {
            let Some(value) = fold(operand, interner)? else {
                return Ok(None);
            };
            Ok(match (op, value) {
                (UnaryOp::Neg, Const::Int(v)) => Some(Const::Int(v.wrapping_neg())),
                (UnaryOp::Neg, Const::Big(b)) => Some(Const::Big(-b)),
                (UnaryOp::Neg, Const::Float(f)) => Some(Const::Float(-f)),
                (UnaryOp::Not, value) => Some(Const::Bool(!value.truthy())),
                _ => None,
            })
        }
        ExprKind::Bool { op, values } => {
            let mut folded = Vec::with_capacity(values.len());
            for value in values {
                match fold(value, interner)? {
                    Some(c) => folded.push(c),
                    None => return Ok(None),
                }
            }
            // Python returns the deciding operand; restrict folding to
            // all-bool operands so the result type stays Bool.
            if !folded.iter().all(|c| matches!(c, Const::Bool(_))) {
                return Ok(None);
            }
            let result = match op {
                BoolOp::And => folded.iter().all(Const::truthy),
                BoolOp::Or => folded.iter().any(Const::truthy),
            };
            Ok(Some(Const::Bool(result)))
        }
        ExprKind::Compare { left, rest } => {
            let Some(mut lhs) = fold(left, interner)? else {
                return Ok(None);
            };
            let mut result = true;
            for (op, comparator) in rest {
                let Some(rhs) = fold(comparator, interner)? else {
                    return Ok(None);
                };
                let Some(step) = fold_cmp(*op, &lhs, &rhs) else {
                    return Ok(None);
                };
                result &= step;
                lhs = rhs;
            }
            Ok(Some(Const::Bool(result)))
        }
        ExprKind::Subscript { value, index } => {
            let (Some(seq), Some(index)) = (fold(value, interner)?, fold(index, interner)?) else {
                return Ok(None);
            };
            let (Const::List(items) | Const::Tuple(items)) = seq else {
                return Ok(None);
            };
            let Const::Int(i) = index else {
                return Ok(None);
            };
            let len = items.len() as i64;
            let resolved = if i < 0 { i + len } else { i };
            if (0..len).contains(&resolved) {
                Ok(Some(items[resolved as usize].clone()))
            } else {
                Err(value_error(format!("index {i} out of range for length {len}"), expr.range))
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            let Some(test) = fold(test, interner)? else {
                return Ok(None);
            };
            fold(if test.truthy() { body } else { orelse }, interner)
        }
        ExprKind::Call { func, args, star_arg: None } => fold_call(func, args, interner, expr.range),
        ExprKind::FString(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    FStringPart::Literal(id) => out.push_str(interner.get(*id)),
                    FStringPart::Expr(inner) => match fold(inner, interner)? {
                        Some(c) => match c.display() {
                            Some(text) => out.push_str(&text),
                            None => return Ok(None),
                        },
                        None => return Ok(None),
                    },
                }
            }
            Ok(Some(Const::Str(out)))
        }
        _ => Ok(None),
    }
}

fn fold_sequence(items: &[Expr], interner: &Interner, wrap: fn(Vec<Const>) -> Const) -> FoldResult {
    let mut folded = Vec::with_capacity(items.len());
    for item in items {
        match fold(item, interner)? {
            Some(c) => folded.push(c),
            None => return Ok(None),
        }
    }
    Ok(Some(wrap(folded)))
}

/// Folds calls on the whitelist: `len` of a literal, `int` of a constant
/// (where overflow promotes to a big integer), and string methods.
fn fold_call(func: &Expr, args: &[Expr], interner: &Interner, range: CodeRange) -> FoldResult {
    match &func.kind {
        ExprKind::Name(ident) if ident.slot.is_none() && interner.get(ident.name) == "int" => {
            if args.len() != 1 {
                return Ok(None);
            }
            let Some(value) = fold(&args[0], interner)? else {
                return Ok(None);
            };
            match value {
                Const::Int(_) | Const::Big(_) => Ok(Some(value)),
                Const::Bool(b) => Ok(Some(Const::Int(i64::from(b)))),
                Const::Float(f) => {
                    if f.is_nan() {
                        return Err(value_error("cannot convert float NaN to integer", range));
                    }
                    if f.is_infinite() {
                        return Err(value_error("cannot convert float infinity to integer", range));
                    }
                    let truncated = f.trunc();
                    // Floats beyond the i64 range promote to a big
                    // integer whose operations run through the runtime.
                    Ok(Some(if truncated.abs() < 9.223_372_036_854_776e18 {
                        Const::Int(truncated as i64)
                    } else {
                        Const::Big(BigInt::from_f64(truncated).expect("finite float converts"))
                    }))
                }
                _ => Ok(None),
            }
        }
        ExprKind::Name(ident) if ident.slot.is_none() && interner.get(ident.name) == "len" => {
            if args.len() != 1 {
                return Ok(None);
            }
            let Some(value) = fold(&args[0], interner)? else {
                return Ok(None);
            };
            Ok(match value {
                Const::Str(s) => Some(Const::Int(s.chars().count() as i64)),
                Const::List(items) | Const::Tuple(items) => Some(Const::Int(items.len() as i64)),
                _ => None,
            })
        }
        ExprKind::Attribute { value, attr } => {
            let Some(Const::Str(s)) = fold(value, interner)? else {
                return Ok(None);
            };
            let mut folded_args = Vec::with_capacity(args.len());
            for arg in args {
                match fold(arg, interner)? {
                    Some(c) => folded_args.push(c),
                    None => return Ok(None),
                }
            }
            let method = interner.get(*attr);
            Ok(match (method, folded_args.as_slice()) {
                ("upper", []) => Some(Const::Str(s.to_uppercase())),
                ("lower", []) => Some(Const::Str(s.to_lowercase())),
                ("strip", []) => Some(Const::Str(s.trim().to_owned())),
                ("replace", [Const::Str(from), Const::Str(to)]) => Some(Const::Str(s.replace(from, to))),
                _ => None,
            })
        }
        _ => {
            let _ = range;
            Ok(None)
        }
    }
}

fn fold_bin(op: BinOp, lhs: &Const, rhs: &Const, range: CodeRange) -> FoldResult {
    // String and sequence concatenation.
    if let (BinOp::Add, Const::Str(a), Const::Str(b)) = (op, lhs, rhs) {
        return Ok(Some(Const::Str(format!("{a}{b}"))));
    }
    if let (BinOp::Add, Const::List(a), Const::List(b)) = (op, lhs, rhs) {
        let mut items = a.clone();
        items.extend(b.iter().cloned());
        return Ok(Some(Const::List(items)));
    }
    // Integer arithmetic, promoting to big integers on overflow.
    if let (Some(a), Some(b)) = (int_of(lhs), int_of(rhs)) {
        return fold_int_bin(op, &a, &b, range).map(Some);
    }
    // Mixed numeric arithmetic in floats.
    let (Some(a), Some(b)) = (lhs.as_float(), rhs.as_float()) else {
        return Ok(None);
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(value_error("float division by zero", range));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(value_error("float floor division by zero", range));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(value_error("float modulo by zero", range));
            }
            a - (a / b).floor() * b
        }
        BinOp::Pow => a.powf(b),
    };
    Ok(Some(Const::Float(result)))
}

fn int_of(c: &Const) -> Option<BigInt> {
    match c {
        Const::Bool(b) => Some(BigInt::from(u8::from(*b))),
        Const::Int(v) => Some(BigInt::from(*v)),
        Const::Big(b) => Some(b.clone()),
        _ => None,
    }
}

/// Exact integer folding; results that fit `i64` narrow back down.
fn fold_int_bin(op: BinOp, a: &BigInt, b: &BigInt, range: CodeRange) -> Result<Const, CompileError> {
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b.is_zero() {
                return Err(value_error("division by zero", range));
            }
            let (a, b) = (a.to_f64().unwrap_or(f64::NAN), b.to_f64().unwrap_or(f64::NAN));
            return Ok(Const::Float(a / b));
        }
        BinOp::FloorDiv => {
            if b.is_zero() {
                return Err(value_error("integer division or modulo by zero", range));
            }
            num_integer::Integer::div_floor(a, b)
        }
        BinOp::Mod => {
            if b.is_zero() {
                return Err(value_error("integer division or modulo by zero", range));
            }
            num_integer::Integer::mod_floor(a, b)
        }
        BinOp::Pow => {
            if b.is_negative() {
                let (a, b) = (a.to_f64().unwrap_or(f64::NAN), b.to_f64().unwrap_or(f64::NAN));
                return Ok(Const::Float(a.powf(b)));
            }
            let Some(exp) = b.to_u32() else {
                return Err(value_error("exponent too large", range));
            };
            a.pow(exp)
        }
    };
    Ok(match result.to_i64() {
        Some(v) => Const::Int(v),
        None => Const::Big(result),
    })
}

fn fold_cmp(op: CmpOp, lhs: &Const, rhs: &Const) -> Option<bool> {
    let ordering = match (lhs, rhs) {
        (Const::Str(a), Const::Str(b)) => a.partial_cmp(b),
        _ => {
            if let (Some(a), Some(b)) = (int_of(lhs), int_of(rhs)) {
                a.partial_cmp(&b)
            } else {
                lhs.as_float()?.partial_cmp(&rhs.as_float()?)
            }
        }
    };
    match op {
        CmpOp::Eq => Some(ordering == Some(std::cmp::Ordering::Equal)),
        CmpOp::Ne => Some(ordering != Some(std::cmp::Ordering::Equal)),
        CmpOp::Lt => Some(ordering == Some(std::cmp::Ordering::Less)),
        CmpOp::Le => ordering.map(|o| o != std::cmp::Ordering::Greater),
        CmpOp::Gt => Some(ordering == Some(std::cmp::Ordering::Greater)),
        CmpOp::Ge => ordering.map(|o| o != std::cmp::Ordering::Less),
        CmpOp::In | CmpOp::NotIn => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Const, fold};
    use crate::{errors::ErrorKind, intern::Interner, parse::parse_source};

    fn fold_expr(code: &str) -> Result<Option<Const>, crate::errors::CompileError> {
        let mut interner = Interner::new();
        let module = parse_source(code, "main", 0, &mut interner).unwrap();
        let crate::ast::StmtKind::Expr(expr) = &module.body[0].kind else {
            panic!("expected expression statement");
        };
        fold(expr, &interner)
    }

    #[test]
    fn arithmetic_folds() {
        assert_eq!(fold_expr("2 + 3").unwrap(), Some(Const::Int(5)));
        assert_eq!(fold_expr("2 ** 8").unwrap(), Some(Const::Int(256)));
        assert_eq!(fold_expr("100 / 4").unwrap(), Some(Const::Float(25.0)));
        assert_eq!(fold_expr("20 // 3").unwrap(), Some(Const::Int(6)));
        assert_eq!(fold_expr("17 % 5").unwrap(), Some(Const::Int(2)));
        assert_eq!(fold_expr("-7 // 2").unwrap(), Some(Const::Int(-4)));
    }

    #[test]
    fn folding_twice_is_idempotent() {
        let once = fold_expr("(2 + 3) * 4").unwrap();
        let twice = fold_expr("(2 + 3) * 4").unwrap();
        assert_eq!(once, twice);
        assert_eq!(once, Some(Const::Int(20)));
    }

    #[test]
    fn overflow_promotes_to_big() {
        let folded = fold_expr("2 ** 100").unwrap().unwrap();
        assert!(matches!(folded, Const::Big(_)));
    }

    #[test]
    fn string_methods_fold() {
        assert_eq!(fold_expr("'abc'.upper()").unwrap(), Some(Const::Str("ABC".to_owned())));
        assert_eq!(
            fold_expr("'a-b'.replace('-', '+')").unwrap(),
            Some(Const::Str("a+b".to_owned()))
        );
        assert_eq!(fold_expr("'ab' + 'cd'").unwrap(), Some(Const::Str("abcd".to_owned())));
    }

    #[test]
    fn len_of_literals_folds() {
        assert_eq!(fold_expr("len('hello')").unwrap(), Some(Const::Int(5)));
        assert_eq!(fold_expr("len([1, 2, 3])").unwrap(), Some(Const::Int(3)));
    }

    #[test]
    fn constant_index_folds_and_bounds_check() {
        assert_eq!(fold_expr("[10, 20, 30][1]").unwrap(), Some(Const::Int(20)));
        assert_eq!(fold_expr("[10, 20, 30][-1]").unwrap(), Some(Const::Int(30)));
        let err = fold_expr("[1, 2][5]").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn comptime_division_by_zero_is_hard_error() {
        let err = fold_expr("1 // 0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
        let err = fold_expr("1 / 0").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueError);
    }

    #[test]
    fn non_constant_subtrees_do_not_fold() {
        assert_eq!(fold_expr("x + 1").unwrap(), None);
    }
}
