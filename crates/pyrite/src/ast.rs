//! The compiler's own AST, converted from the ruff parse tree.
//!
//! Nodes carry byte-range spans and interned names. Name resolution fills
//! in the `slot` of each [`Identifier`] and the scope summary of each
//! [`FunctionDef`] in place; the inferencer then walks the resolved tree.

use num_bigint::BigInt;

use crate::intern::StringId;

/// Source span: owning file plus byte offsets into its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CodeRange {
    /// Index of the compilation unit (module) this span belongs to.
    pub file: u32,
    pub start: u32,
    pub end: u32,
}

impl CodeRange {
    pub const SYNTH: Self = Self { file: 0, start: 0, end: 0 };

    pub fn new(file: u32, start: u32, end: u32) -> Self {
        Self { file, start, end }
    }
}

/// Where a resolved name lives.
///
/// Captures index into the enclosing function's capture tuple; captured
/// names are read-only (writes are rejected during resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Slot {
    Local(u32),
    Capture(u32),
    Global(u32),
}

/// A name reference. `slot` is `None` until resolution; builtins resolve
/// through the inferencer instead and keep `None`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Identifier {
    pub name: StringId,
    pub range: CodeRange,
    pub slot: Option<Slot>,
}

impl Identifier {
    pub fn new(name: StringId, range: CodeRange) -> Self {
        Self { name, range, slot: None }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    /// Integer literal exceeding `i64`; kept exact for comptime folding
    /// and emitted as a runtime big-integer construction.
    BigInt(BigInt),
    Float(f64),
    Str(StringId),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// True division: `int / int` is a float.
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

/// One piece of an f-string.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum FStringPart {
    Literal(StringId),
    Expr(Expr),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: CodeRange,
}

impl Expr {
    pub fn new(kind: ExprKind, range: CodeRange) -> Self {
        Self { kind, range }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Name(Identifier),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    FString(Vec<FStringPart>),
    Bin {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Bool {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        /// Chained comparisons: `a < b <= c` keeps each (op, operand).
        rest: Vec<(CmpOp, Expr)>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        /// A trailing `*expr` argument (`gather(*tasks)`).
        star_arg: Option<Box<Expr>>,
    },
    Attribute {
        value: Box<Expr>,
        attr: StringId,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        value: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    ListComp {
        element: Box<Expr>,
        target: Identifier,
        iter: Box<Expr>,
        condition: Option<Box<Expr>>,
    },
    Lambda(Box<FunctionDef>),
    Await(Box<Expr>),
    Yield(Option<Box<Expr>>),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Param {
    pub name: Identifier,
    pub annotation: Option<Expr>,
    pub default: Option<Expr>,
}

/// Scope summary computed by the resolver.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ScopeInfo {
    /// Number of local slots, parameters first.
    pub nlocals: u32,
    /// Captured names, in capture-tuple order, with the slot they resolve
    /// to in the *enclosing* scope.
    pub captures: Vec<(StringId, Slot)>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FunctionDef {
    pub name: Identifier,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub returns: Option<Expr>,
    pub decorators: Vec<Expr>,
    pub is_async: bool,
    /// Set by the resolver when the body contains `yield`.
    pub is_generator: bool,
    pub scope: ScopeInfo,
    pub range: CodeRange,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ClassDef {
    pub name: Identifier,
    /// Single inheritance only; the resolver rejects multiple bases.
    pub base: Option<Identifier>,
    pub methods: Vec<FunctionDef>,
    /// Class-level `name: annotation` field declarations.
    pub field_decls: Vec<(StringId, Expr)>,
    pub range: CodeRange,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum AssignTarget {
    Name(Identifier),
    Subscript { value: Expr, index: Expr },
    Attribute { value: Expr, attr: StringId },
    /// Tuple unpacking of plain names (`a, b = ...`).
    Tuple(Vec<Identifier>),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExceptHandler {
    /// Exception type name; `None` is a bare `except:`.
    pub exc_type: Option<Identifier>,
    /// `except X as e` binding.
    pub binding: Option<Identifier>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WithItem {
    pub context: Expr,
    pub binding: Option<Identifier>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub range: CodeRange,
}

impl Stmt {
    pub fn new(kind: StmtKind, range: CodeRange) -> Self {
        Self { kind, range }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum StmtKind {
    Expr(Expr),
    Assign {
        target: AssignTarget,
        value: Expr,
    },
    AugAssign {
        target: AssignTarget,
        op: BinOp,
        value: Expr,
    },
    Return(Option<Expr>),
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: AssignTarget,
        iter: Expr,
        body: Vec<Stmt>,
    },
    FuncDef(FunctionDef),
    ClassDef(ClassDef),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        finally: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    Import {
        module: StringId,
    },
    Global {
        names: Vec<Identifier>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Raise {
        exc: Option<Expr>,
    },
    Break,
    Continue,
    Pass,
}

/// One parsed compilation unit.
#[derive(Debug)]
pub struct Module {
    /// Module name (file stem), used for mangling and import resolution.
    pub name: StringId,
    pub file: u32,
    pub body: Vec<Stmt>,
    /// Module-level slot count, filled by the resolver.
    pub nglobals: u32,
    /// Scratch locals needed by the module initializer (comprehension
    /// induction variables at module level).
    pub module_locals: u32,
}
