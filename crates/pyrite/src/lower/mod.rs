//! Type-directed lowering from the resolved AST to the typed IR.
//!
//! Lowering runs twice per function. The first (collect) pass is a
//! forgiving abstract interpretation that joins the types stored into
//! every slot and global, notes which fixed-array candidates escape or
//! mutate (demoting them to lists), and discovers nested functions. The
//! second (emit) pass lowers for real against the finalized slot types,
//! reporting type errors and producing balanced IR.
//!
//! Values are kept block-local: control-flow joins (if-expressions,
//! boolean operators, loop carriers) travel through synthetic slots, so
//! the reference-count pass in `ir` stays per-block.

mod expr;

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{BinOp, CodeRange, Expr, ExprKind, FunctionDef, Module, Stmt, StmtKind},
    errors::{CompileError, CompileResult, Diagnostics, ErrorKind},
    infer::{FuncDecl, FuncKind, ProgramInfo, func_sig},
    intern::{Interner, StringId},
    ir::{Block, BlockId, IRFunction, IRModule, Op, Terminator, ValueId, insert_refcounts},
    types::{ClassId, FuncId, Ty},
};

/// Result type of binary numeric/sequence operators; `None` means the
/// combination is ill-typed.
pub fn bin_result(op: BinOp, lhs: &Ty, rhs: &Ty) -> Option<Ty> {
    match (lhs, rhs) {
        (Ty::Str, Ty::Str) if op == BinOp::Add => Some(Ty::Str),
        (Ty::List(a), Ty::List(b)) if op == BinOp::Add => Some(Ty::List(Box::new(a.join(b)?))),
        (Ty::FixedArr(a, _), Ty::FixedArr(b, _)) if op == BinOp::Add => Some(Ty::List(Box::new(a.join(b)?))),
        (Ty::Dyn, other) | (other, Ty::Dyn) if other.is_numeric() || *other == Ty::Dyn || *other == Ty::Str => {
            Some(Ty::Dyn)
        }
        (Ty::BigInt, other) | (other, Ty::BigInt) if other.is_numeric() => match op {
            BinOp::Div => Some(Ty::Float64),
            _ => Some(Ty::BigInt),
        },
        _ if lhs.is_numeric() && rhs.is_numeric() => {
            let joined = lhs.join(rhs)?;
            match op {
                // True division always produces a float.
                BinOp::Div => Some(Ty::Float64),
                _ => match joined {
                    Ty::Bool | Ty::Byte => Some(Ty::Int64),
                    other => Some(other),
                },
            }
        }
        _ => None,
    }
}

/// Maps a builtin exception name to the runtime discriminant.
pub(crate) fn builtin_exc_kind(name: &str) -> Option<pyrite_runtime::ExcKind> {
    name.parse::<pyrite_runtime::ExcKind>().ok()
}

/// Tracks one pending cleanup region (a `finally` body or a `with` exit
/// call) that must run on every exit path.
#[derive(Clone, Copy)]
pub(super) enum Cleanup<'a> {
    Finally(&'a [Stmt]),
    WithExit { ctx_slot: u32, class: ClassId },
}

struct LoopCtx {
    continue_blk: BlockId,
    break_blk: BlockId,
    /// Cleanup-stack depth at loop entry; break/continue unwind to it.
    cleanup_depth: usize,
}

pub(super) enum FnBody<'a> {
    ModuleInit(&'a Module),
    Func(&'a FunctionDef),
}

/// Shared, program-wide lowering state that persists across functions
/// and across the two passes.
pub struct Lowerer<'a> {
    pub info: ProgramInfo,
    pub interner: &'a mut Interner,
    /// Module names by index, for mangling nested-function symbols.
    module_names: Vec<StringId>,
    diags: Diagnostics,
    /// Stable ids for nested functions, keyed by definition span.
    nested_keys: AHashMap<(u32, u32), FuncId>,
    /// Finalized slot types per function, produced by the collect pass.
    slot_results: AHashMap<FuncId, Vec<Ty>>,
    /// Globals reassigned after definition (decorated functions); calls
    /// through them go indirect.
    reassigned: AHashSet<(u32, u32)>,
    global_needs_list: AHashSet<(u32, u32)>,
}

/// Lowers every module to IR. `info` comes from [`crate::infer::collect`].
pub fn lower_program(
    modules: &[Module],
    interner: &mut Interner,
    mut info: ProgramInfo,
) -> Result<(ProgramInfo, Vec<IRModule>), Vec<CompileError>> {
    // Give each module initializer a function declaration.
    let mut init_ids = Vec::with_capacity(modules.len());
    for (index, module) in modules.iter().enumerate() {
        let id = FuncId(info.funcs.len() as u32);
        info.funcs.push(FuncDecl {
            id,
            name: module.name,
            symbol: crate::emit::mangle::module_init(interner.get(module.name)),
            module: index as u32,
            kind: FuncKind::ModuleInit,
            params: Vec::new(),
            ret: Ty::None,
            is_async: false,
            is_generator: false,
            captures: Vec::new(),
            needs_value_wrapper: false,
        });
        init_ids.push(id);
    }

    let mut lowerer = Lowerer {
        info,
        interner,
        module_names: modules.iter().map(|m| m.name).collect(),
        diags: Diagnostics::new(),
        nested_keys: AHashMap::new(),
        slot_results: AHashMap::new(),
        reassigned: AHashSet::new(),
        global_needs_list: AHashSet::new(),
    };

    // Two collect rounds: the first learns inferred return types and
    // capture types, the second re-derives slot and global types with
    // that knowledge in place (a module initializer may call a function
    // whose return type only settles once its own body was scanned).
    lowerer.run_pass(modules, &init_ids, true);
    lowerer.reset_type_state(modules);
    lowerer.run_pass(modules, &init_ids, true);
    lowerer.finalize_globals();
    let functions = lowerer.run_pass(modules, &init_ids, false);
    lowerer.diags.finish()?;
    let ir_modules = assemble(modules, &lowerer.info, lowerer.interner, &init_ids, functions);
    Ok((lowerer.info, ir_modules))
}

fn assemble(
    modules: &[Module],
    info: &ProgramInfo,
    interner: &Interner,
    init_ids: &[FuncId],
    mut functions: AHashMap<FuncId, IRFunction>,
) -> Vec<IRModule> {
    modules
        .iter()
        .enumerate()
        .map(|(index, module)| {
            let mut funcs: Vec<IRFunction> = Vec::new();
            let mut init = 0;
            for decl in &info.funcs {
                if decl.module == index as u32
                    && let Some(func) = functions.remove(&decl.id)
                {
                    if decl.id == init_ids[index] {
                        init = funcs.len();
                    }
                    funcs.push(func);
                }
            }
            IRModule {
                name: interner.get(module.name).to_owned(),
                globals: info.global_tys[index]
                    .iter()
                    .map(|ty| (String::new(), ty.clone()))
                    .collect(),
                functions: funcs,
                classes: info.classes.clone(),
                init,
            }
        })
        .collect()
}

impl<'a> Lowerer<'a> {
    fn run_pass(&mut self, modules: &'a [Module], init_ids: &[FuncId], collecting: bool) -> AHashMap<FuncId, IRFunction> {
        let mut out = AHashMap::new();
        let mut queue: VecDeque<(FuncId, FnBody<'a>)> = VecDeque::new();
        for (index, module) in modules.iter().enumerate() {
            queue.push_back((init_ids[index], FnBody::ModuleInit(module)));
            for stmt in &module.body {
                match &stmt.kind {
                    StmtKind::FuncDef(def) => {
                        let id = self.info.func_by_name[&(index as u32, def.name.name)];
                        queue.push_back((id, FnBody::Func(def)));
                    }
                    StmtKind::ClassDef(class) => {
                        let class_id = self.info.class_by_name[&class.name.name];
                        for method in &class.methods {
                            let id = if self.interner.get(method.name.name) == "__init__" {
                                self.info.class(class_id).init
                            } else {
                                self.info
                                    .class(class_id)
                                    .methods
                                    .iter()
                                    .find(|(name, _)| *name == method.name.name)
                                    .map(|(_, id)| *id)
                            };
                            if let Some(id) = id
                                && self.info.func(id).kind == FuncKind::Method(class_id)
                            {
                                queue.push_back((id, FnBody::Func(method)));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        while let Some((id, body)) = queue.pop_front() {
            let function = self.lower_function(id, &body, collecting, &mut queue);
            if !collecting && let Some(function) = function {
                out.insert(id, function);
            }
        }
        out
    }

    /// Clears the joined type state between collect rounds, keeping the
    /// learned function declarations.
    fn reset_type_state(&mut self, modules: &[Module]) {
        self.info.global_tys = modules
            .iter()
            .map(|m| vec![Ty::Never; m.nglobals as usize])
            .collect();
        self.slot_results.clear();
        self.global_needs_list.clear();
        self.reassigned.clear();
    }

    fn finalize_globals(&mut self) {
        for (module, globals) in self.info.global_tys.iter_mut().enumerate() {
            for (slot, ty) in globals.iter_mut().enumerate() {
                if *ty == Ty::Never {
                    *ty = Ty::Dyn;
                }
                if self.global_needs_list.contains(&(module as u32, slot as u32))
                    && let Ty::FixedArr(elem, _) = ty.clone()
                {
                    *ty = Ty::List(elem);
                }
            }
        }
    }

    fn lower_function(
        &mut self,
        id: FuncId,
        body: &FnBody<'a>,
        collecting: bool,
        queue: &mut VecDeque<(FuncId, FnBody<'a>)>,
    ) -> Option<IRFunction> {
        let decl = self.info.func(id);
        let module = decl.module;
        let nparams = decl.params.len() as u32;
        let (is_async, is_generator, ret) = (decl.is_async, decl.is_generator, decl.ret.clone());
        let mut slot_tys: Vec<Ty> = decl.params.clone();
        if !collecting && let Some(finalized) = self.slot_results.get(&id) {
            slot_tys = finalized.clone();
        }
        let captures = decl.captures.clone();
        let mut fx = FnLowerer {
            parent: self,
            func: id,
            module,
            collecting,
            queue,
            slot_tys,
            slot_funcs: AHashMap::new(),
            slot_needs_list: AHashSet::new(),
            blocks: vec![Block {
                ops: Vec::new(),
                term: Terminator::Return(None),
                handler: None,
                cleanup: None,
            }],
            cur: BlockId(0),
            sealed: vec![false],
            vals: Vec::new(),
            ret,
            is_async,
            is_generator,
            captures,
            loop_stack: Vec::new(),
            handler_stack: Vec::new(),
            cleanups: Vec::new(),
        };
        let stmts: &'a [Stmt] = match body {
            FnBody::ModuleInit(m) => {
                // Module-level comprehension scratch slots are plain
                // locals of the initializer.
                fx.slot_tys.resize(fx.slot_tys.len() + m.module_locals as usize, Ty::Dyn);
                &m.body
            }
            FnBody::Func(def) => &def.body,
        };
        if let Err(error) = fx.stmts(stmts) {
            if !collecting {
                fx.parent.diags.report(error);
            }
            return None;
        }
        fx.seal(Terminator::Return(None));
        let slot_tys = fx.slot_tys;
        let needs_list = fx.slot_needs_list;
        let blocks = fx.blocks;
        let vals = fx.vals;

        if collecting {
            let finalized: Vec<Ty> = slot_tys
                .iter()
                .enumerate()
                .map(|(slot, ty)| {
                    let mut ty = ty.clone();
                    if ty == Ty::Never {
                        ty = Ty::Dyn;
                    }
                    if needs_list.contains(&(slot as u32))
                        && let Ty::FixedArr(elem, _) = ty.clone()
                    {
                        ty = Ty::List(elem);
                    }
                    ty
                })
                .collect();
            self.slot_results.insert(id, finalized);
            return None;
        }

        let decl = self.info.func(id);
        let mut function = IRFunction {
            id,
            name: decl.symbol.clone(),
            nparams,
            ret: decl.ret.clone(),
            is_async,
            is_generator,
            locals: slot_tys,
            captures: decl.captures.clone(),
            blocks,
            vals,
        };
        insert_refcounts(&mut function);
        Some(function)
    }
}

/// Per-function lowering state. Expression lowering lives in the `expr`
/// submodule.
pub(super) struct FnLowerer<'p, 'a> {
    pub(super) parent: &'p mut Lowerer<'a>,
    pub(super) func: FuncId,
    pub(super) module: u32,
    pub(super) collecting: bool,
    pub(super) queue: &'p mut VecDeque<(FuncId, FnBody<'a>)>,
    pub(super) slot_tys: Vec<Ty>,
    /// Local slots currently known to hold a specific compiled function.
    pub(super) slot_funcs: AHashMap<u32, FuncId>,
    pub(super) slot_needs_list: AHashSet<u32>,
    blocks: Vec<Block>,
    cur: BlockId,
    sealed: Vec<bool>,
    vals: Vec<Ty>,
    pub(super) ret: Ty,
    pub(super) is_async: bool,
    pub(super) is_generator: bool,
    pub(super) captures: Vec<Ty>,
    loop_stack: Vec<LoopCtx>,
    handler_stack: Vec<BlockId>,
    pub(super) cleanups: Vec<Cleanup<'a>>,
}

impl<'p, 'a> FnLowerer<'p, 'a> {
    pub(super) fn interner(&self) -> &Interner {
        self.parent.interner
    }

    pub(super) fn intern(&mut self, s: &str) -> StringId {
        self.parent.interner.intern(s)
    }

    pub(super) fn err(&self, kind: ErrorKind, message: impl Into<String>, range: CodeRange) -> CompileError {
        CompileError::new(kind, message, range)
    }

    pub(super) fn val(&mut self, ty: Ty) -> ValueId {
        let id = ValueId(self.vals.len() as u32);
        self.vals.push(ty);
        id
    }

    pub(super) fn val_ty(&self, id: ValueId) -> Ty {
        self.vals[id.0 as usize].clone()
    }

    pub(super) fn set_val_ty(&mut self, id: ValueId, ty: Ty) {
        self.vals[id.0 as usize] = ty;
    }

    pub(super) fn set_slot_ty(&mut self, slot: u32, ty: Ty) {
        self.slot_tys[slot as usize] = ty;
    }

    pub(super) fn push(&mut self, op: Op) {
        if !self.sealed[self.cur.0 as usize] {
            self.blocks[self.cur.0 as usize].ops.push(op);
        }
    }

    pub(super) fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            ops: Vec::new(),
            term: Terminator::Return(None),
            handler: self.handler_stack.last().copied(),
            cleanup: None,
        });
        self.sealed.push(false);
        id
    }

    pub(super) fn seal(&mut self, term: Terminator) {
        if !self.sealed[self.cur.0 as usize] {
            self.blocks[self.cur.0 as usize].term = term;
            self.sealed[self.cur.0 as usize] = true;
        }
    }

    pub(super) fn switch_to(&mut self, block: BlockId) {
        self.cur = block;
    }

    pub(super) fn current_sealed(&self) -> bool {
        self.sealed[self.cur.0 as usize]
    }

    pub(super) fn handler(&self) -> Option<BlockId> {
        self.handler_stack.last().copied()
    }

    pub(super) fn push_handler(&mut self, handler: BlockId) {
        self.handler_stack.push(handler);
    }

    pub(super) fn pop_handler(&mut self) {
        self.handler_stack.pop();
    }

    /// Sets the cancellation cleanup target of the current block.
    pub(super) fn set_cleanup(&mut self, target: Option<BlockId>) {
        self.blocks[self.cur.0 as usize].cleanup = target;
    }

    /// Allocates a synthetic slot for cross-block value traffic.
    pub(super) fn new_slot(&mut self, ty: Ty) -> u32 {
        let slot = self.slot_tys.len() as u32;
        self.slot_tys.push(ty);
        slot
    }

    pub(super) fn global_ty(&self, slot: u32) -> Ty {
        self.parent.info.global_tys[self.module as usize][slot as usize].clone()
    }

    pub(super) fn join_global(&mut self, slot: u32, ty: &Ty) {
        let current = &mut self.parent.info.global_tys[self.module as usize][slot as usize];
        *current = current.join(ty).unwrap_or(Ty::Dyn);
    }

    pub(super) fn join_local(&mut self, slot: u32, ty: &Ty) {
        let current = &mut self.slot_tys[slot as usize];
        *current = current.join(ty).unwrap_or(Ty::Dyn);
    }

    pub(super) fn stmts(&mut self, stmts: &'a [Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            if self.current_sealed() {
                // Unreachable code after return/raise; skip it.
                break;
            }
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> CompileResult<()> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expr(expr)?;
                Ok(())
            }
            StmtKind::Assign { target, value } => self.assign(target, value, stmt.range),
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value, stmt.range),
            StmtKind::Return(value) => self.lower_return(value.as_ref(), stmt.range),
            StmtKind::If { test, body, orelse } => self.lower_if(test, body, orelse),
            StmtKind::While { test, body } => self.lower_while(test, body),
            StmtKind::For { target, iter, body } => self.lower_for(target, iter, body, stmt.range),
            StmtKind::FuncDef(def) => self.lower_nested_def(def),
            StmtKind::ClassDef(_) => Ok(()),
            StmtKind::Try { body, handlers, finally } => self.lower_try(body, handlers, finally),
            StmtKind::With { items, body } => self.lower_with(items, body, stmt.range),
            StmtKind::Import { .. } | StmtKind::Global { .. } | StmtKind::Pass => Ok(()),
            StmtKind::Assert { test, msg } => self.lower_assert(test, msg.as_ref(), stmt.range),
            StmtKind::Raise { exc } => self.lower_raise(exc.as_ref(), stmt.range),
            StmtKind::Break => {
                let Some(ctx) = self.loop_stack.last() else {
                    return Err(self.err(ErrorKind::TypeError, "'break' outside loop", stmt.range));
                };
                let (break_blk, depth) = (ctx.break_blk, ctx.cleanup_depth);
                self.run_cleanups(depth)?;
                self.seal(Terminator::Jump(break_blk));
                Ok(())
            }
            StmtKind::Continue => {
                let Some(ctx) = self.loop_stack.last() else {
                    return Err(self.err(ErrorKind::TypeError, "'continue' outside loop", stmt.range));
                };
                let (continue_blk, depth) = (ctx.continue_blk, ctx.cleanup_depth);
                self.run_cleanups(depth)?;
                self.seal(Terminator::Jump(continue_blk));
                Ok(())
            }
        }
    }

    pub(super) fn enter_loop(&mut self, continue_blk: BlockId, break_blk: BlockId) {
        self.loop_stack.push(LoopCtx {
            continue_blk,
            break_blk,
            cleanup_depth: self.cleanups.len(),
        });
    }

    pub(super) fn exit_loop(&mut self) {
        self.loop_stack.pop();
    }

    /// Emits the cleanup actions (with-exits, finally bodies) from the
    /// top of the stack down to `depth`, innermost first, into the
    /// current block. Used before early exits; the cleanup code is
    /// duplicated per exit edge.
    pub(super) fn run_cleanups(&mut self, depth: usize) -> CompileResult<()> {
        let pending: Vec<Cleanup<'a>> = self.cleanups[depth..].to_vec();
        for cleanup in pending.iter().rev() {
            self.emit_cleanup(*cleanup)?;
        }
        Ok(())
    }

    pub(super) fn emit_cleanup(&mut self, cleanup: Cleanup<'a>) -> CompileResult<()> {
        match cleanup {
            Cleanup::Finally(stmts) => self.stmts(stmts),
            Cleanup::WithExit { ctx_slot, class } => {
                self.emit_with_exit(ctx_slot, class);
                Ok(())
            }
        }
    }

    fn lower_return(&mut self, value: Option<&'a Expr>, range: CodeRange) -> CompileResult<()> {
        let ret = self.ret.clone();
        let lowered = match value {
            Some(expr) => {
                let (v, ty) = self.expr(expr)?;
                if self.collecting {
                    // Refine an inferred return type from actual returns.
                    let demoted = crate::infer::demote_fixed(ty);
                    let decl = self.parent.info.func_mut(self.func);
                    if decl.ret == Ty::None && demoted != Ty::None && demoted != Ty::Never {
                        decl.ret = demoted;
                    }
                    Some(v)
                } else {
                    Some(self.coerce(v, &ty, &ret, range)?)
                }
            }
            None => None,
        };
        self.run_cleanups(0)?;
        self.seal(Terminator::Return(lowered));
        Ok(())
    }

    fn lower_if(&mut self, test: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> CompileResult<()> {
        let cond = self.truthy_expr(test)?;
        let then_blk = self.new_block();
        let else_blk = self.new_block();
        let join_blk = self.new_block();
        self.seal(Terminator::Branch { cond, then_blk, else_blk });
        self.switch_to(then_blk);
        self.stmts(body)?;
        self.seal(Terminator::Jump(join_blk));
        self.switch_to(else_blk);
        self.stmts(orelse)?;
        self.seal(Terminator::Jump(join_blk));
        self.switch_to(join_blk);
        Ok(())
    }

    fn lower_while(&mut self, test: &'a Expr, body: &'a [Stmt]) -> CompileResult<()> {
        let head = self.new_block();
        self.seal(Terminator::Jump(head));
        self.switch_to(head);
        let cond = self.truthy_expr(test)?;
        let body_blk = self.new_block();
        let exit_blk = self.new_block();
        self.seal(Terminator::Branch {
            cond,
            then_blk: body_blk,
            else_blk: exit_blk,
        });
        self.enter_loop(head, exit_blk);
        self.switch_to(body_blk);
        self.stmts(body)?;
        self.seal(Terminator::Jump(head));
        self.exit_loop();
        self.switch_to(exit_blk);
        Ok(())
    }

    fn lower_nested_def(&mut self, def: &'a FunctionDef) -> CompileResult<()> {
        // Top-level defs were seeded into the queue already; only truly
        // nested functions need queueing here.
        let seeded = self
            .parent
            .info
            .decl_spans
            .contains_key(&(def.range.file, def.range.start));
        let id = self.declare_nested(def)?;
        if !seeded {
            self.queue.push_back((id, FnBody::Func(def)));
        }
        let decl = self.parent.info.func(id);
        let sig_ty = func_sig(decl);
        let has_captures = !def.scope.captures.is_empty();
        let decorated = !def.decorators.is_empty();

        let target = def.name.slot.ok_or_else(|| {
            self.err(ErrorKind::NameError, "nested function binding was not resolved", def.range)
        })?;

        if !has_captures && !decorated {
            // Plain function: calls resolve statically; no value is
            // materialized unless one is demanded later. Defs binding a
            // global slot from nested scopes (a def inside a module-level
            // `if`) keep a callable value in the slot, since static
            // resolution only covers direct top-level definitions.
            match target {
                crate::ast::Slot::Local(slot) => {
                    self.slot_funcs.insert(slot, id);
                    self.join_local(slot, &sig_ty);
                }
                crate::ast::Slot::Global(slot) => {
                    let top_level = self
                        .parent
                        .info
                        .func_by_name
                        .get(&(self.module, def.name.name))
                        .copied()
                        == Some(id);
                    self.join_global(slot, &sig_ty);
                    if !top_level {
                        let value = self.make_closure_value(id, def)?;
                        self.store_to_slot(target, value, &sig_ty, def.range)?;
                    }
                }
                crate::ast::Slot::Capture(_) => {}
            }
            return Ok(());
        }

        // Closure (or decorated function): materialize the record and
        // apply decorators inside-out.
        let mut value = self.make_closure_value(id, def)?;
        let mut value_ty = sig_ty;
        for decorator in def.decorators.iter().rev() {
            let (callee, callee_ty) = self.expr(decorator)?;
            let (v, ty) = self.call_function_value(callee, &callee_ty, vec![(value, value_ty)], def.range)?;
            value = v;
            value_ty = ty;
        }
        if decorated
            && let crate::ast::Slot::Global(slot) = target
        {
            self.parent.reassigned.insert((self.module, slot));
        }
        self.store_to_slot(target, value, &value_ty, def.range)
    }

    fn lower_assert(&mut self, test: &'a Expr, msg: Option<&'a Expr>, range: CodeRange) -> CompileResult<()> {
        let cond = self.truthy_expr(test)?;
        let fail_blk = self.new_block();
        let pass_blk = self.new_block();
        self.seal(Terminator::Branch {
            cond,
            then_blk: pass_blk,
            else_blk: fail_blk,
        });
        self.switch_to(fail_blk);
        let message = match msg {
            Some(expr) => match crate::comptime::fold(expr, self.interner()) {
                Ok(Some(crate::comptime::Const::Str(s))) => self.intern(&s),
                _ => self.intern(""),
            },
            None => self.intern(""),
        };
        let handler = self.handler();
        self.seal(Terminator::Throw {
            kind: pyrite_runtime::ExcKind::AssertionError as u32,
            msg: message,
            handler,
        });
        self.switch_to(pass_blk);
        let _ = range;
        Ok(())
    }

    fn lower_raise(&mut self, exc: Option<&'a Expr>, range: CodeRange) -> CompileResult<()> {
        let Some(exc) = exc else {
            return Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "bare 'raise' re-raising is not supported",
                range,
            ));
        };
        let handler = self.handler();
        if let ExprKind::Call { func, args, star_arg: None } = &exc.kind
            && let ExprKind::Name(ident) = &func.kind
        {
            let name = self.interner().get(ident.name).to_owned();
            // `raise Kind("message")` with a constant message.
            if let Some(kind) = builtin_exc_kind(&name) {
                let message = match args.first() {
                    Some(arg) => match crate::comptime::fold(arg, self.interner()) {
                        Ok(Some(crate::comptime::Const::Str(s))) => self.intern(&s),
                        _ => {
                            return Err(self.err(
                                ErrorKind::UnsupportedFeatureError,
                                "exception messages must be constant strings",
                                arg.range,
                            ));
                        }
                    },
                    None => self.intern(""),
                };
                self.seal(Terminator::Throw { kind: kind as u32, msg: message, handler });
                return Ok(());
            }
            // User-defined exception class.
            if let Some(class_id) = self.parent.info.class_by_name.get(&ident.name).copied() {
                if !self.parent.info.class(class_id).is_exception {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("exceptions must derive from Exception; '{name}' does not"),
                        range,
                    ));
                }
                let (value, _) = self.construct_class(class_id, args, range)?;
                self.seal(Terminator::ThrowValue {
                    value,
                    class: class_id,
                    handler,
                });
                return Ok(());
            }
        }
        Err(self.err(
            ErrorKind::UnsupportedFeatureError,
            "raise requires an exception constructor",
            range,
        ))
    }
}
