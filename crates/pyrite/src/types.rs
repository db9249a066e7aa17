//! The compiler's type language.
//!
//! Every IR value carries exactly one [`Ty`]. Primitives stay unboxed in
//! the emitted C; heap kinds lower to opaque handles; `Dyn` is the tagged
//! fallback used only where inference fails. The numeric lattice is
//! `Int64 ≤ Float64`; mixing promotes to the wider type.

use std::fmt;

use crate::intern::StringId;

/// Identifies a compiled class. Ids are dense and double as the runtime
/// class registry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ClassId(pub u32);

/// Identifies a compiled function (top-level, method, closure, or
/// lambda).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FuncSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Ty {
    Int64,
    Float64,
    Bool,
    /// Single byte, produced by `bytes` subscripts.
    Byte,
    Str,
    Bytes,
    /// Integer beyond `i64`, operated on through runtime calls.
    BigInt,
    None,
    /// Diverging expressions (`raise`); unifies with anything.
    Never,
    /// Tagged runtime box, used only where inference fails.
    Dyn,
    /// Stack-resident array with compile-time length. The element type is
    /// never `Dyn`.
    FixedArr(Box<Ty>, usize),
    List(Box<Ty>),
    Dict(Box<Ty>, Box<Ty>),
    Tuple(Vec<Ty>),
    Set(Box<Ty>),
    Class(ClassId),
    Func(Box<FuncSig>),
    Generator(Box<Ty>),
    /// A called-but-not-yet-scheduled async function: a bound frame that
    /// awaiting or `create_task` turns into a [`Ty::Task`].
    Coroutine(Box<Ty>),
    Task(Box<Ty>),
    /// An `asyncio.Queue` of element type T.
    Queue(Box<Ty>),
}

impl Ty {
    /// Whether values of this type live on the runtime heap (and thus
    /// participate in reference counting).
    pub fn is_heap(&self) -> bool {
        matches!(
            self,
            Self::Str
                | Self::Bytes
                | Self::BigInt
                | Self::List(_)
                | Self::Dict(..)
                | Self::Tuple(_)
                | Self::Set(_)
                | Self::Class(_)
                | Self::Func(_)
                | Self::Generator(_)
                | Self::Coroutine(_)
                | Self::Queue(_)
                | Self::Dyn
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64 | Self::Float64 | Self::Bool | Self::Byte | Self::BigInt)
    }

    /// Least upper bound of two types, or `None` when they are unrelated.
    ///
    /// `Never` is the bottom; numerics join upward (`Int64` with
    /// `Float64` is `Float64`); identical types join to themselves;
    /// derived classes join to a common ancestor only when identical
    /// (subtype joins widen through `Dyn` instead).
    pub fn join(&self, other: &Self) -> Option<Self> {
        if self == other {
            return Some(self.clone());
        }
        match (self, other) {
            (Self::Never, t) | (t, Self::Never) => Some(t.clone()),
            (Self::Bool | Self::Byte, Self::Int64) | (Self::Int64, Self::Bool | Self::Byte) => Some(Self::Int64),
            (Self::Int64 | Self::Bool | Self::Byte, Self::Float64)
            | (Self::Float64, Self::Int64 | Self::Bool | Self::Byte) => Some(Self::Float64),
            (Self::Int64 | Self::BigInt, Self::BigInt | Self::Int64) => Some(Self::BigInt),
            (Self::FixedArr(a, n), Self::FixedArr(b, m)) => {
                let elem = a.join(b)?;
                if n == m {
                    Some(Self::FixedArr(Box::new(elem), *n))
                } else {
                    Some(Self::List(Box::new(elem)))
                }
            }
            (Self::FixedArr(a, _), Self::List(b)) | (Self::List(a), Self::FixedArr(b, _)) => {
                Some(Self::List(Box::new(a.join(b)?)))
            }
            (Self::List(a), Self::List(b)) => Some(Self::List(Box::new(a.join(b)?))),
            _ => None,
        }
    }

    /// Element type yielded when iterating a value of this type.
    pub fn iter_elem(&self) -> Option<Self> {
        match self {
            Self::FixedArr(elem, _) | Self::List(elem) | Self::Set(elem) => Some(elem.as_ref().clone()),
            Self::Str => Some(Self::Str),
            Self::Bytes => Some(Self::Byte),
            Self::Dict(key, _) => Some(key.as_ref().clone()),
            Self::Generator(yielded) => Some(yielded.as_ref().clone()),
            Self::Dyn => Some(Self::Dyn),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => write!(f, "int"),
            Self::Float64 => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Byte => write!(f, "byte"),
            Self::Str => write!(f, "str"),
            Self::Bytes => write!(f, "bytes"),
            Self::BigInt => write!(f, "bigint"),
            Self::None => write!(f, "None"),
            Self::Never => write!(f, "Never"),
            Self::Dyn => write!(f, "Dyn"),
            Self::FixedArr(elem, n) => write!(f, "array[{elem}; {n}]"),
            Self::List(elem) => write!(f, "list[{elem}]"),
            Self::Dict(key, value) => write!(f, "dict[{key}, {value}]"),
            Self::Tuple(items) => {
                write!(f, "tuple[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Set(elem) => write!(f, "set[{elem}]"),
            Self::Class(id) => write!(f, "class#{}", id.0),
            Self::Func(sig) => write!(f, "func(...) -> {}", sig.ret),
            Self::Generator(yielded) => write!(f, "generator[{yielded}]"),
            Self::Coroutine(ret) => write!(f, "coroutine[{ret}]"),
            Self::Task(ret) => write!(f, "Task[{ret}]"),
            Self::Queue(elem) => write!(f, "Queue[{elem}]"),
        }
    }
}

/// One compiled class: record layout plus flat method table.
///
/// Base-class fields come first in `fields` so a derived instance is
/// layout-compatible with its base. The method table starts as a copy of
/// the base's and overrides replace the inherited slot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClassInfo {
    pub name: StringId,
    pub base: Option<ClassId>,
    pub fields: Vec<(StringId, Ty)>,
    /// Vtable: slot index -> (method name, implementing function).
    pub methods: Vec<(StringId, FuncId)>,
    /// `__init__`, when defined.
    pub init: Option<FuncId>,
    /// Classes deriving from an exception type are throwable.
    pub is_exception: bool,
}

impl ClassInfo {
    pub fn field_index(&self, name: StringId) -> Option<u32> {
        self.fields.iter().position(|(f, _)| *f == name).map(|i| i as u32)
    }

    pub fn method_slot(&self, name: StringId) -> Option<u32> {
        self.methods.iter().position(|(m, _)| *m == name).map(|i| i as u32)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Ty;

    #[test]
    fn numeric_join_promotes() {
        assert_eq!(Ty::Int64.join(&Ty::Float64), Some(Ty::Float64));
        assert_eq!(Ty::Bool.join(&Ty::Int64), Some(Ty::Int64));
        assert_eq!(Ty::Int64.join(&Ty::Int64), Some(Ty::Int64));
        assert_eq!(Ty::Str.join(&Ty::Int64), None);
        assert_eq!(Ty::Never.join(&Ty::Str), Some(Ty::Str));
    }

    #[test]
    fn fixed_arrays_join_to_lists() {
        let a = Ty::FixedArr(Box::new(Ty::Int64), 3);
        let b = Ty::FixedArr(Box::new(Ty::Int64), 4);
        assert_eq!(a.join(&b), Some(Ty::List(Box::new(Ty::Int64))));
        assert_eq!(a.join(&a), Some(a.clone()));
    }
}
