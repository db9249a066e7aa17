//! The typed intermediate representation.
//!
//! Each function is a list of basic blocks over single-assignment values.
//! Values are block-local by construction: anything that crosses a block
//! boundary travels through a (possibly synthetic) local slot. That keeps
//! dominance trivial and makes the reference-counting pass purely local.
//!
//! # Ownership discipline
//!
//! Every op producing a heap-typed value yields one owned reference.
//! Loads from slots are borrowed (the slot keeps its reference); stores
//! and most container writes consume. [`insert_refcounts`] rewrites each
//! block so that consumed-but-borrowed operands gain an `RcInc` and
//! owned-but-unconsumed results get an `RcDec` after their last use,
//! leaving every block balanced for dead-at-exit values — the property
//! [`check_balance`] verifies.

use serde::{Deserialize, Serialize};

use crate::{
    ast::{BinOp, CmpOp},
    comptime::Const,
    intern::StringId,
    types::{ClassId, ClassInfo, FuncId, Ty},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// Runtime entry points the emitter may call. `symbol` is the exact
/// linker name declared in the shim header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeFn {
    HeapAlloc,
    RcInc,
    RcDec,
    FramePtr,
    RtPrint,
    ListNew,
    ListPush,
    ListGet,
    ListSet,
    ListLen,
    ListPop,
    ListInsert,
    ListRemove,
    ListIndex,
    ListCount,
    ListContains,
    ListSort,
    ListReverse,
    ListSlice,
    ListConcat,
    DictNew,
    DictGet,
    DictGetDefault,
    DictPut,
    DictContains,
    DictLen,
    DictKeys,
    DictValues,
    DictItems,
    SetNew,
    SetAdd,
    SetContains,
    SetLen,
    TupleNew,
    TupleGet,
    TupleLen,
    StrNew,
    StrConcat,
    StrLen,
    StrEq,
    StrContains,
    StrIndex,
    StrSlice,
    StrFind,
    StrUpper,
    StrLower,
    StrStrip,
    StrReplace,
    StrFromInt,
    StrFromFloat,
    StrFromBool,
    StrOfVal,
    StrToInt,
    StrToFloat,
    BytesNew,
    BytesLen,
    ValTruthy,
    ValEq,
    DynBinop,
    DynCmp,
    DynAttrGet,
    ObjNew,
    AttrGetRt,
    AttrSetRt,
    ObjVMethod,
    Throw,
    TryPush,
    TryPop,
    ExcPending,
    ExcKind,
    ExcMatches,
    ExcValue,
    ExcClear,
    ExcPrint,
    SchedulerSpawn,
    SchedulerAwait,
    SchedulerSleep,
    SchedulerCancel,
    SchedulerGather,
    SchedulerGatherList,
    SchedulerWaitFor,
    TaskResult,
    TaskDone,
    ShieldEnter,
    ShieldExit,
    QueueNew,
    QueuePut,
    QueueGet,
    QueuePutNowait,
    QueueGetNowait,
    JsonDumps,
    JsonLoads,
    MathSqrt,
    MathPow,
    MathLog,
    MathExp,
    MathSin,
    MathCos,
    MathFloor,
    MathCeil,
    MathFabs,
    HashlibMd5,
    HashlibSha1,
    HashlibSha256,
    ReMatch,
    ReFindall,
    ReSub,
    OsGetenv,
    OsPathExists,
    ZlibCompress,
    ZlibDecompress,
    BigFromI64,
    BigFromF64,
    BigFromStr,
    BigAdd,
    BigSub,
    BigMul,
    BigPow,
    BigEq,
    BigCmp,
    BigToI64,
}

impl RuntimeFn {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::HeapAlloc => "heap_alloc",
            Self::RcInc => "rc_inc",
            Self::RcDec => "rc_dec",
            Self::FramePtr => "frame_ptr",
            Self::RtPrint => "rt_print",
            Self::ListNew => "list_new",
            Self::ListPush => "list_push",
            Self::ListGet => "list_get",
            Self::ListSet => "list_set",
            Self::ListLen => "list_len",
            Self::ListPop => "list_pop",
            Self::ListInsert => "list_insert",
            Self::ListRemove => "list_remove",
            Self::ListIndex => "list_index",
            Self::ListCount => "list_count",
            Self::ListContains => "list_contains",
            Self::ListSort => "list_sort",
            Self::ListReverse => "list_reverse",
            Self::ListSlice => "list_slice",
            Self::ListConcat => "list_concat",
            Self::DictNew => "dict_new",
            Self::DictGet => "dict_get",
            Self::DictGetDefault => "dict_get_default",
            Self::DictPut => "dict_put",
            Self::DictContains => "dict_contains",
            Self::DictLen => "dict_len",
            Self::DictKeys => "dict_keys",
            Self::DictValues => "dict_values",
            Self::DictItems => "dict_items",
            Self::SetNew => "set_new",
            Self::SetAdd => "set_add",
            Self::SetContains => "set_contains",
            Self::SetLen => "set_len",
            Self::TupleNew => "tuple_new",
            Self::TupleGet => "tuple_get",
            Self::TupleLen => "tuple_len",
            Self::StrNew => "str_new",
            Self::StrConcat => "str_concat",
            Self::StrLen => "str_len",
            Self::StrEq => "str_eq",
            Self::StrContains => "str_contains",
            Self::StrIndex => "str_index",
            Self::StrSlice => "str_slice",
            Self::StrFind => "str_find",
            Self::StrUpper => "str_upper",
            Self::StrLower => "str_lower",
            Self::StrStrip => "str_strip",
            Self::StrReplace => "str_replace",
            Self::StrFromInt => "str_from_int",
            Self::StrFromFloat => "str_from_float",
            Self::StrFromBool => "str_from_bool",
            Self::StrOfVal => "str_of_val",
            Self::StrToInt => "str_to_int",
            Self::StrToFloat => "str_to_float",
            Self::BytesNew => "bytes_new",
            Self::BytesLen => "bytes_len",
            Self::ValTruthy => "val_truthy",
            Self::ValEq => "val_eq",
            Self::DynBinop => "dyn_binop",
            Self::DynCmp => "dyn_cmp",
            Self::DynAttrGet => "dyn_attr_get",
            Self::ObjNew => "obj_new",
            Self::AttrGetRt => "attr_get",
            Self::AttrSetRt => "attr_set",
            Self::ObjVMethod => "obj_vmethod",
            Self::Throw => "throw",
            Self::TryPush => "try_push",
            Self::TryPop => "try_pop",
            Self::ExcPending => "exc_pending",
            Self::ExcKind => "exc_kind",
            Self::ExcMatches => "exc_matches",
            Self::ExcValue => "exc_value",
            Self::ExcClear => "exc_clear",
            Self::ExcPrint => "exc_print",
            Self::SchedulerSpawn => "scheduler_spawn",
            Self::SchedulerAwait => "scheduler_await",
            Self::SchedulerSleep => "scheduler_sleep",
            Self::SchedulerCancel => "scheduler_cancel",
            Self::SchedulerGather => "scheduler_gather",
            Self::SchedulerGatherList => "scheduler_gather_list",
            Self::SchedulerWaitFor => "scheduler_wait_for",
            Self::TaskResult => "task_result",
            Self::TaskDone => "task_done",
            Self::ShieldEnter => "shield_enter",
            Self::ShieldExit => "shield_exit",
            Self::QueueNew => "queue_new",
            Self::QueuePut => "queue_put",
            Self::QueueGet => "queue_get",
            Self::QueuePutNowait => "queue_put_nowait",
            Self::QueueGetNowait => "queue_get_nowait",
            Self::JsonDumps => "json_dumps",
            Self::JsonLoads => "json_loads",
            Self::MathSqrt => "math_sqrt",
            Self::MathPow => "math_pow",
            Self::MathLog => "math_log",
            Self::MathExp => "math_exp",
            Self::MathSin => "math_sin",
            Self::MathCos => "math_cos",
            Self::MathFloor => "math_floor",
            Self::MathCeil => "math_ceil",
            Self::MathFabs => "math_fabs",
            Self::HashlibMd5 => "hashlib_md5_hexdigest",
            Self::HashlibSha1 => "hashlib_sha1_hexdigest",
            Self::HashlibSha256 => "hashlib_sha256_hexdigest",
            Self::ReMatch => "re_match",
            Self::ReFindall => "re_findall",
            Self::ReSub => "re_sub",
            Self::OsGetenv => "os_getenv",
            Self::OsPathExists => "os_path_exists",
            Self::ZlibCompress => "zlib_compress",
            Self::ZlibDecompress => "zlib_decompress",
            Self::BigFromI64 => "big_from_i64",
            Self::BigFromF64 => "big_from_f64",
            Self::BigFromStr => "big_from_str",
            Self::BigAdd => "big_add",
            Self::BigSub => "big_sub",
            Self::BigMul => "big_mul",
            Self::BigPow => "big_pow",
            Self::BigEq => "big_eq",
            Self::BigCmp => "big_cmp",
            Self::BigToI64 => "big_to_i64",
        }
    }

    /// Whether a call can leave an exception pending, requiring the
    /// emitter to insert a check after it.
    pub fn can_raise(self) -> bool {
        matches!(
            self,
            Self::ListGet
                | Self::ListSet
                | Self::ListPop
                | Self::ListRemove
                | Self::ListIndex
                | Self::ListSlice
                | Self::DictGet
                | Self::DictPut
                | Self::SetAdd
                | Self::TupleGet
                | Self::StrIndex
                | Self::StrSlice
                | Self::StrToInt
                | Self::StrToFloat
                | Self::DynBinop
                | Self::DynCmp
                | Self::DynAttrGet
                | Self::SchedulerAwait
                | Self::TaskResult
                | Self::QueuePutNowait
                | Self::QueueGetNowait
                | Self::JsonDumps
                | Self::JsonLoads
                | Self::MathSqrt
                | Self::MathLog
                | Self::ReMatch
                | Self::ReFindall
                | Self::ReSub
                | Self::ZlibDecompress
                | Self::BigFromF64
                | Self::BigFromStr
                | Self::BigToI64
        )
    }

    /// Positions of arguments whose reference is consumed by the callee
    /// (the boundary ownership convention).
    pub fn consumed_args(self) -> &'static [usize] {
        match self {
            // `set_add` copies into key form and borrows, so it is
            // absent here.
            Self::ListPush => &[1],
            Self::ListSet | Self::ListInsert => &[2],
            Self::DictPut => &[2],
            Self::QueuePut | Self::QueuePutNowait => &[1],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Op {
    Const {
        dst: ValueId,
        value: Const,
    },
    LoadLocal {
        dst: ValueId,
        slot: u32,
    },
    StoreLocal {
        slot: u32,
        src: ValueId,
    },
    LoadGlobal {
        dst: ValueId,
        slot: u32,
    },
    StoreGlobal {
        slot: u32,
        src: ValueId,
    },
    LoadCapture {
        dst: ValueId,
        index: u32,
    },
    Bin {
        dst: ValueId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        dst: ValueId,
        op: CmpOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Not {
        dst: ValueId,
        src: ValueId,
    },
    Neg {
        dst: ValueId,
        src: ValueId,
    },
    /// Direct call to a compiled function. Heap arguments transfer
    /// ownership to the callee's parameter slots.
    Call {
        dst: Option<ValueId>,
        func: FuncId,
        args: Vec<ValueId>,
    },
    /// Indirect call through a closure record (code pointer in word 0).
    CallClosure {
        dst: Option<ValueId>,
        callee: ValueId,
        args: Vec<ValueId>,
    },
    /// Devirtualized-to-dynamic call through the receiver's vtable.
    CallVirtual {
        dst: Option<ValueId>,
        recv: ValueId,
        class: ClassId,
        slot: u32,
        args: Vec<ValueId>,
    },
    CallRuntime {
        dst: Option<ValueId>,
        func: RuntimeFn,
        args: Vec<ValueId>,
    },
    /// Allocates and fills a coroutine/generator frame for `func`,
    /// binding `args` into its parameter slots.
    MakeFrame {
        dst: ValueId,
        func: FuncId,
        args: Vec<ValueId>,
    },
    /// Allocates a closure record capturing the given values.
    MakeClosure {
        dst: ValueId,
        func: FuncId,
        captures: Vec<ValueId>,
    },
    /// Spawns a frame as a scheduler task.
    Spawn {
        dst: ValueId,
        frame: ValueId,
    },
    AllocObj {
        dst: ValueId,
        class: ClassId,
    },
    MakeTuple {
        dst: ValueId,
        items: Vec<ValueId>,
    },
    /// Bounds-checked fixed-array read; `len` is the static length.
    ArrGet {
        dst: ValueId,
        arr: ValueId,
        index: ValueId,
        len: usize,
    },
    AttrGet {
        dst: ValueId,
        obj: ValueId,
        field: u32,
    },
    AttrSet {
        obj: ValueId,
        field: u32,
        value: ValueId,
    },
    /// Attribute lookup by name on a `Dyn` receiver; dispatches through
    /// the runtime class registry.
    DynAttr {
        dst: ValueId,
        obj: ValueId,
        name: StringId,
    },
    /// Primitive conversion (int to float, bool to int, float
    /// truncation); semantics decided by the operand types.
    Cast {
        dst: ValueId,
        src: ValueId,
    },
    /// Boxes a typed value into a tagged `RtVal`. Boxing a heap value
    /// transfers the reference into the box.
    Box {
        dst: ValueId,
        src: ValueId,
    },
    /// Unboxes a tagged value into the destination's static type.
    Unbox {
        dst: ValueId,
        src: ValueId,
    },
    RcInc {
        src: ValueId,
    },
    RcDec {
        src: ValueId,
    },
    /// Marks entry into a protected region (runtime handler depth).
    TryPush,
    TryPop,
    /// Tests the pending exception against a handler kind (builtin
    /// discriminant or user class).
    ExcMatch {
        dst: ValueId,
        kind: u32,
        class: Option<ClassId>,
    },
    ExcValue {
        dst: ValueId,
    },
    ExcClear,
    /// Reads the result of the task completed before entering this
    /// resume block; re-raises the task's failure.
    AwaitResult {
        dst: ValueId,
    },
    /// Drives a generator one step: writes the yielded value (boxed) to
    /// `value_slot` and whether iteration finished to `dst_done`.
    GenNext {
        r#gen: ValueId,
        value_slot: u32,
        dst_done: ValueId,
    },
    Print {
        args: Vec<ValueId>,
    },
}

impl Op {
    pub fn dst(&self) -> Option<ValueId> {
        match self {
            Self::Const { dst, .. }
            | Self::LoadLocal { dst, .. }
            | Self::LoadGlobal { dst, .. }
            | Self::LoadCapture { dst, .. }
            | Self::Bin { dst, .. }
            | Self::Cmp { dst, .. }
            | Self::Not { dst, .. }
            | Self::Neg { dst, .. }
            | Self::MakeFrame { dst, .. }
            | Self::MakeClosure { dst, .. }
            | Self::Spawn { dst, .. }
            | Self::AllocObj { dst, .. }
            | Self::MakeTuple { dst, .. }
            | Self::ArrGet { dst, .. }
            | Self::AttrGet { dst, .. }
            | Self::DynAttr { dst, .. }
            | Self::Cast { dst, .. }
            | Self::Box { dst, .. }
            | Self::Unbox { dst, .. }
            | Self::ExcMatch { dst, .. }
            | Self::ExcValue { dst }
            | Self::AwaitResult { dst }
            | Self::GenNext { dst_done: dst, .. } => Some(*dst),
            Self::Call { dst, .. }
            | Self::CallClosure { dst, .. }
            | Self::CallVirtual { dst, .. }
            | Self::CallRuntime { dst, .. } => *dst,
            _ => None,
        }
    }

    /// Operand values read by this op, paired with whether the reference
    /// is consumed.
    pub fn operands(&self) -> Vec<(ValueId, bool)> {
        match self {
            Self::StoreLocal { src, .. } | Self::StoreGlobal { src, .. } => vec![(*src, true)],
            Self::Bin { lhs, rhs, .. } | Self::Cmp { lhs, rhs, .. } => vec![(*lhs, false), (*rhs, false)],
            Self::Not { src, .. } | Self::Neg { src, .. } => vec![(*src, false)],
            Self::Call { args, .. } | Self::MakeFrame { args, .. } => args.iter().map(|a| (*a, true)).collect(),
            Self::CallClosure { callee, args, .. } => std::iter::once((*callee, false))
                .chain(args.iter().map(|a| (*a, true)))
                .collect(),
            // The receiver follows the callee's parameter-ownership
            // convention like any other argument.
            Self::CallVirtual { recv, args, .. } => std::iter::once((*recv, true))
                .chain(args.iter().map(|a| (*a, true)))
                .collect(),
            Self::CallRuntime { func, args, .. } => {
                let consumed = func.consumed_args();
                args.iter()
                    .enumerate()
                    .map(|(i, a)| (*a, consumed.contains(&i)))
                    .collect()
            }
            Self::MakeClosure { captures, .. } => captures.iter().map(|c| (*c, true)).collect(),
            Self::Spawn { frame, .. } => vec![(*frame, true)],
            Self::MakeTuple { items, .. } => items.iter().map(|i| (*i, true)).collect(),
            Self::ArrGet { arr, index, .. } => vec![(*arr, false), (*index, false)],
            Self::AttrGet { obj, .. } | Self::DynAttr { obj, .. } => vec![(*obj, false)],
            Self::AttrSet { obj, value, .. } => vec![(*obj, false), (*value, true)],
            Self::Cast { src, .. } => vec![(*src, false)],
            Self::Box { src, .. } => vec![(*src, true)],
            // An unbox is a borrowed view into the box; the box keeps its
            // reference.
            Self::Unbox { src, .. } => vec![(*src, false)],
            Self::RcInc { src } | Self::RcDec { src } => vec![(*src, false)],
            Self::GenNext { r#gen, .. } => vec![(*r#gen, false)],
            Self::Print { args } => args.iter().map(|a| (*a, false)).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: ValueId,
        then_blk: BlockId,
        else_blk: BlockId,
    },
    Return(Option<ValueId>),
    /// Raises a builtin exception kind with a static message.
    Throw {
        kind: u32,
        msg: StringId,
        /// Landing block, when the throw happens inside a protected
        /// region of this function.
        handler: Option<BlockId>,
    },
    /// Raises a user exception instance.
    ThrowValue {
        value: ValueId,
        class: ClassId,
        handler: Option<BlockId>,
    },
    /// Generator suspension: emit the value, continue at `resume`.
    Yield {
        value: ValueId,
        resume: BlockId,
    },
    /// Async suspension on a task handle.
    Await {
        task: ValueId,
        resume: BlockId,
    },
    /// Re-raises the pending exception: jump to the enclosing handler,
    /// or return with the exception still pending.
    Propagate {
        handler: Option<BlockId>,
    },
    /// Terminal state reached after cancellation cleanup.
    Cancelled,
}

impl Terminator {
    /// Operand consumed by this terminator, if any.
    pub fn operand(&self) -> Option<(ValueId, bool)> {
        match self {
            Self::Branch { cond, .. } => Some((*cond, false)),
            Self::Return(Some(value)) => Some((*value, true)),
            Self::ThrowValue { value, .. } => Some((*value, true)),
            Self::Yield { value, .. } => Some((*value, true)),
            Self::Await { task, .. } => Some((*task, false)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub ops: Vec<Op>,
    pub term: Terminator,
    /// Innermost exception landing pad covering this block.
    pub handler: Option<BlockId>,
    /// Cancellation cleanup target for suspension points in this block.
    pub cleanup: Option<BlockId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IRFunction {
    pub id: FuncId,
    /// Mangled symbol name.
    pub name: String,
    pub nparams: u32,
    pub ret: Ty,
    pub is_async: bool,
    pub is_generator: bool,
    /// Slot types; parameters occupy the first `nparams` slots.
    pub locals: Vec<Ty>,
    /// Types of captured values, in capture-record order.
    pub captures: Vec<Ty>,
    pub blocks: Vec<Block>,
    /// Type of every SSA value.
    pub vals: Vec<Ty>,
}

impl IRFunction {
    pub fn val_ty(&self, id: ValueId) -> &Ty {
        &self.vals[id.0 as usize]
    }
}

/// One compiled module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IRModule {
    pub name: String,
    pub globals: Vec<(String, Ty)>,
    pub functions: Vec<IRFunction>,
    pub classes: Vec<ClassInfo>,
    /// Index of the module initializer in `functions`.
    pub init: usize,
}

/// Inserts the `rc_inc`/`rc_dec` ops that balance each block.
pub fn insert_refcounts(func: &mut IRFunction) {
    let vals = func.vals.clone();
    for block in &mut func.blocks {
        balance_block(block, &vals);
    }
}

fn is_heap(vals: &[Ty], id: ValueId) -> bool {
    vals[id.0 as usize].is_heap()
}

/// Whether an op's result starts out owned. Loads borrow from their
/// slot, unboxes borrow from their box; everything else producing a heap
/// value owns it.
fn dst_owned(op: &Op) -> bool {
    !matches!(
        op,
        Op::LoadLocal { .. } | Op::LoadGlobal { .. } | Op::LoadCapture { .. } | Op::Unbox { .. }
    )
}

fn balance_block(block: &mut Block, vals: &[Ty]) {
    #[derive(Clone, Copy)]
    struct Track {
        owned: bool,
        consumed: bool,
        last_use: usize,
    }
    let mut tracked: std::collections::BTreeMap<ValueId, Track> = std::collections::BTreeMap::new();

    // First walk: record definitions, uses, and consumptions; collect the
    // RcInc fixes needed when a borrowed or already-consumed value is
    // consumed (again).
    let mut incs: Vec<(usize, ValueId)> = Vec::new();
    let nops = block.ops.len();
    for (index, op) in block.ops.iter().enumerate() {
        for (value, consumes) in op.operands() {
            if !is_heap(vals, value) {
                continue;
            }
            let Some(track) = tracked.get_mut(&value) else {
                continue;
            };
            track.last_use = index;
            if consumes {
                if track.owned && !track.consumed {
                    track.consumed = true;
                } else {
                    // Borrowed (or second consumption): materialize a
                    // fresh reference for the consumer.
                    incs.push((index, value));
                }
            }
        }
        if let Some(dst) = op.dst()
            && is_heap(vals, dst)
        {
            tracked.insert(
                dst,
                Track {
                    owned: dst_owned(op),
                    consumed: false,
                    last_use: index,
                },
            );
        }
    }
    if let Some((value, consumes)) = block.term.operand()
        && is_heap(vals, value)
        && let Some(track) = tracked.get_mut(&value)
    {
        track.last_use = nops;
        if consumes {
            if track.owned && !track.consumed {
                track.consumed = true;
            } else {
                incs.push((nops, value));
            }
        }
    }

    // Owned values never consumed need a release after their last use.
    let mut decs: Vec<(usize, ValueId)> = tracked
        .iter()
        .filter(|(_, t)| t.owned && !t.consumed)
        .map(|(v, t)| (t.last_use + 1, *v))
        .collect();

    // Splice fixes back in, later positions first so indices stay valid.
    let mut edits: Vec<(usize, Op)> = incs
        .into_iter()
        .map(|(at, src)| (at, Op::RcInc { src }))
        .chain(decs.drain(..).map(|(at, src)| (at, Op::RcDec { src })))
        .collect();
    edits.sort_by(|a, b| b.0.cmp(&a.0));
    for (at, op) in edits {
        block.ops.insert(at.min(block.ops.len()), op);
    }
}

/// Verifies the reference-count balance property: along this block, every
/// heap value defined in it ends with zero net references unless it
/// escaped through a consuming op.
pub fn check_balance(func: &IRFunction) -> Result<(), String> {
    for (block_index, block) in func.blocks.iter().enumerate() {
        let mut net: std::collections::BTreeMap<ValueId, i64> = std::collections::BTreeMap::new();
        for op in &block.ops {
            match op {
                Op::RcInc { src } => *net.entry(*src).or_insert(0) += 1,
                Op::RcDec { src } => *net.entry(*src).or_insert(0) -= 1,
                _ => {
                    for (value, consumes) in op.operands() {
                        if consumes && func.val_ty(value).is_heap() {
                            *net.entry(value).or_insert(0) -= 1;
                        }
                    }
                    if let Some(dst) = op.dst()
                        && func.val_ty(dst).is_heap()
                        && dst_owned(op)
                    {
                        *net.entry(dst).or_insert(0) += 1;
                    }
                }
            }
        }
        if let Some((value, true)) = block.term.operand()
            && func.val_ty(value).is_heap()
        {
            *net.entry(value).or_insert(0) -= 1;
        }
        for (value, count) in net {
            if count != 0 {
                return Err(format!(
                    "unbalanced refcount for v{} in block {block_index} of {}: net {count}",
                    value.0, func.name
                ));
            }
        }
    }
    Ok(())
}
