//! C source emission.
//!
//! One file is generated per compilation unit; cross-module references
//! go through a shared declaration section (prototypes, frame structs,
//! global externs) pasted into every file, and the linker resolves them.
//! Statically typed values lower to plain C locals; heap values to
//! opaque handles; `Dyn` to the two-word tagged struct.
//!
//! Async functions and generators are emitted as resume functions over
//! an explicit frame struct: a `switch` on the stored state re-enters
//! the machine at the block after its last suspension, and a second
//! dispatch routes cancellation to the cleanup block recorded for that
//! suspension.

pub mod mangle;
pub mod shim;

use std::fmt::Write;

use crate::{
    ast::{BinOp, CmpOp},
    comptime::Const,
    infer::ProgramInfo,
    intern::Interner,
    ir::{Block, BlockId, IRFunction, IRModule, Op, RuntimeFn, Terminator, ValueId},
    types::{ClassId, FuncId, Ty},
};

/// A float as a C `double` literal.
pub fn format_float_literal(v: f64) -> String {
    if v.is_nan() {
        return "(0.0/0.0)".to_owned();
    }
    if v.is_infinite() {
        return if v < 0.0 { "(-1.0/0.0)" } else { "(1.0/0.0)" }.to_owned();
    }
    // `{:?}` prints integral floats as `25.0` and uses `e` notation
    // where shorter; both are valid C double literals.
    format!("{v:?}")
}

/// Escapes bytes into a C string literal (without quotes). Round-trips
/// exactly: every byte outside the printable ASCII range is emitted as
/// an octal escape.
fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            // Three-digit octal escapes cannot swallow following digits.
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out
}

fn c_ty(ty: &Ty) -> &'static str {
    match ty {
        Ty::Int64 | Ty::None | Ty::Never => "int64_t",
        Ty::Float64 => "double",
        Ty::Bool => "bool",
        Ty::Byte => "uint8_t",
        Ty::Dyn => "RtVal",
        Ty::Task(_) => "RtTask",
        Ty::FixedArr(..) => unreachable!("fixed arrays are declared in place"),
        _ => "RtRef",
    }
}

fn is_handle(ty: &Ty) -> bool {
    ty.is_heap() && *ty != Ty::Dyn
}

/// Emits the whole program: one `(file name, source)` pair per module.
/// The first module is the entry point and receives `main`.
pub fn emit_program(modules: &[IRModule], info: &ProgramInfo, interner: &Interner) -> Vec<(String, String)> {
    let decls = shared_decls(modules, info, interner);
    modules
        .iter()
        .enumerate()
        .map(|(index, module)| {
            let mut out = String::new();
            out.push_str(shim::RUNTIME_PRELUDE);
            out.push_str("#include <string.h>\n\n");
            out.push_str(&decls);
            out.push('\n');
            // Global definitions for this module.
            for (slot, (_, ty)) in module.globals.iter().enumerate() {
                emit_global_decl(&mut out, &module.name, slot as u32, ty, false);
            }
            out.push('\n');
            for function in &module.functions {
                emit_function(&mut out, function, info, interner, &module.name);
                out.push('\n');
            }
            if index == 0 {
                emit_main(&mut out, modules, info, interner);
            }
            (format!("{}.c", module.name), out)
        })
        .collect()
}

fn emit_global_decl(out: &mut String, module: &str, slot: u32, ty: &Ty, is_extern: bool) {
    let name = mangle::global(module, slot);
    let prefix = if is_extern { "extern " } else { "" };
    match ty {
        Ty::FixedArr(elem, n) => {
            let _ = writeln!(out, "{prefix}{} {name}[{n}];", c_ty(elem));
        }
        Ty::Dyn if !is_extern => {
            let _ = writeln!(out, "RtVal {name};");
        }
        _ => {
            let _ = writeln!(out, "{prefix}{} {name};", c_ty(ty));
        }
    }
}

/// Prototypes, frame/env structs, and global externs shared by every
/// generated file.
fn shared_decls(modules: &[IRModule], info: &ProgramInfo, _interner: &Interner) -> String {
    let mut out = String::new();
    for module in modules {
        for (slot, (_, ty)) in module.globals.iter().enumerate() {
            emit_global_decl(&mut out, &module.name, slot as u32, ty, true);
        }
    }
    out.push('\n');
    for module in modules {
        for function in &module.functions {
            let decl = info.func(function.id);
            if function.is_async || function.is_generator {
                let _ = writeln!(out, "struct {}__frame {{", function.name);
                out.push_str("    RtResumeFn fn;\n    int64_t state;\n    RtTask awaiting;\n");
                for (slot, ty) in function.locals.iter().enumerate() {
                    emit_field(&mut out, &format!("s{slot}"), ty);
                }
                out.push_str("};\n");
                let _ = writeln!(out, "RtPoll {}(RtRef __frame, uint32_t __cancel);", function.name);
                continue;
            }
            let has_env = !function.captures.is_empty() || decl.needs_value_wrapper;
            if has_env {
                let _ = writeln!(out, "struct {}__env {{", function.name);
                out.push_str("    void* fn;\n");
                for (index, ty) in function.captures.iter().enumerate() {
                    emit_field(&mut out, &format!("c{index}"), ty);
                }
                out.push_str("};\n");
            }
            let _ = write!(out, "{} {}(", ret_c(&function.ret), function.name);
            let mut first = true;
            if !function.captures.is_empty() {
                out.push_str("RtRef __env");
                first = false;
            }
            for slot in 0..function.nparams {
                if !first {
                    out.push_str(", ");
                }
                first = false;
                let _ = write!(out, "{} s{slot}", param_c(&function.locals[slot as usize]));
            }
            if first {
                out.push_str("void");
            }
            out.push_str(");\n");
            if decl.needs_value_wrapper && function.captures.is_empty() {
                let _ = write!(out, "{} {}__cl(RtRef __env", ret_c(&function.ret), function.name);
                for slot in 0..function.nparams {
                    let _ = write!(out, ", {} s{slot}", param_c(&function.locals[slot as usize]));
                }
                out.push_str(");\n");
            }
        }
    }
    out
}

fn emit_field(out: &mut String, name: &str, ty: &Ty) {
    match ty {
        Ty::FixedArr(elem, n) => {
            let _ = writeln!(out, "    {} {name}[{n}];", c_ty(elem));
        }
        _ => {
            let _ = writeln!(out, "    {} {name};", c_ty(ty));
        }
    }
}

fn ret_c(ty: &Ty) -> &'static str {
    match ty {
        Ty::None => "void",
        other => c_ty(other),
    }
}

fn param_c(ty: &Ty) -> &'static str {
    match ty {
        // Arrays decay; fixed arrays are not passed as parameters.
        Ty::FixedArr(..) => "RtRef",
        other => c_ty(other),
    }
}

struct FnEmitter<'a> {
    out: &'a mut String,
    func: &'a IRFunction,
    info: &'a ProgramInfo,
    interner: &'a Interner,
    module: &'a str,
    /// State index assigned to each resume block of a suspension.
    states: Vec<(BlockId, u32)>,
    machine: bool,
}

fn emit_function(out: &mut String, func: &IRFunction, info: &ProgramInfo, interner: &Interner, module: &str) {
    let machine = func.is_async || func.is_generator;
    // Suspension states, in block order.
    let mut states = Vec::new();
    for block in &func.blocks {
        match block.term {
            Terminator::Await { resume, .. } | Terminator::Yield { resume, .. } => {
                states.push((resume, states.len() as u32 + 1));
            }
            _ => {}
        }
    }
    let mut fx = FnEmitter {
        out,
        func,
        info,
        interner,
        module,
        states,
        machine,
    };
    fx.emit();
}

impl FnEmitter<'_> {
    fn w(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn wf(&mut self, args: std::fmt::Arguments<'_>) {
        let _ = self.out.write_fmt(args);
        self.out.push('\n');
    }

    fn vty(&self, v: ValueId) -> &Ty {
        self.func.val_ty(v)
    }

    /// C expression for reading slot `i`.
    fn slot(&self, i: u32) -> String {
        if self.machine {
            format!("f->s{i}")
        } else {
            format!("s{i}")
        }
    }

    fn emit(&mut self) {
        let func = self.func;
        let info = self.info;
        let decl = info.func(func.id);
        if self.machine {
            self.wf(format_args!("RtPoll {}(RtRef __frame, uint32_t __cancel) {{", func.name));
            self.wf(format_args!(
                "    struct {}__frame* f = (struct {}__frame*)frame_ptr(__frame);",
                func.name, func.name
            ));
            // Cancellation routes through the cleanup block recorded for
            // the interrupted suspension, when there is one.
            self.w("    if (__cancel) {");
            self.w("        switch (f->state) {");
            let state_cleanups: Vec<(u32, Option<BlockId>)> = self
                .collect_state_cleanups();
            for (state, cleanup) in state_cleanups {
                match cleanup {
                    Some(block) => self.wf(format_args!("        case {state}: goto B{};", block.0)),
                    None => self.wf(format_args!(
                        "        case {state}: return (RtPoll){{RT_POLL_CANCELLED, val_none(), 0}};"
                    )),
                }
            }
            self.w("        default: return (RtPoll){RT_POLL_CANCELLED, val_none(), 0};");
            self.w("        }");
            self.w("    }");
            self.w("    switch (f->state) {");
            self.w("    case 0: goto B0;");
            let states = self.states.clone();
            for (resume, state) in states {
                self.wf(format_args!("    case {state}: goto B{};", resume.0));
            }
            self.w("    default: return (RtPoll){RT_POLL_DONE, val_none(), 0};");
            self.w("    }");
        } else {
            let mut header = format!("{} {}(", ret_c(&func.ret), func.name);
            let mut first = true;
            if !func.captures.is_empty() {
                header.push_str("RtRef __env");
                first = false;
            }
            for slot in 0..func.nparams {
                if !first {
                    header.push_str(", ");
                }
                first = false;
                let _ = write!(header, "{} s{slot}", param_c(&func.locals[slot as usize]));
            }
            if first {
                header.push_str("void");
            }
            header.push_str(") {");
            self.w(&header);
            if !func.captures.is_empty() {
                self.wf(format_args!(
                    "    struct {}__env* __e = (struct {}__env*)frame_ptr(__env);",
                    func.name, func.name
                ));
            }
            // Non-parameter slots, zero-initialized.
            for (slot, ty) in func.locals.iter().enumerate().skip(func.nparams as usize) {
                match ty {
                    Ty::FixedArr(elem, n) => {
                        self.wf(format_args!("    {} s{slot}[{n}] = {{0}};", c_ty(elem)));
                    }
                    Ty::Dyn => self.wf(format_args!("    RtVal s{slot} = val_none();")),
                    _ => self.wf(format_args!("    {} s{slot} = 0;", c_ty(ty))),
                }
            }
        }
        // Value temporaries.
        for (index, ty) in func.vals.iter().enumerate() {
            match ty {
                Ty::FixedArr(elem, n) => {
                    self.wf(format_args!("    {} v{index}[{n}];", c_ty(elem)));
                }
                Ty::Dyn => self.wf(format_args!("    RtVal v{index} = val_none();")),
                _ => self.wf(format_args!("    {} v{index} = 0;", c_ty(ty))),
            }
        }
        self.w("    goto B0;");

        for (index, block) in func.blocks.iter().enumerate() {
            self.wf(format_args!("B{index}:;"));
            for op in &block.ops {
                self.emit_op(op, block);
            }
            self.emit_terminator(&block.term);
        }

        // Shared propagation path: an exception with no handler in this
        // function unwinds to the caller with the flag still pending.
        self.w("Lprop:;");
        if self.machine {
            self.emit_frame_release();
            self.w("    return (RtPoll){RT_POLL_DONE, val_none(), 0};");
        } else {
            self.emit_slot_release();
            match &func.ret {
                Ty::None => self.w("    return;"),
                Ty::Dyn => self.w("    return val_none();"),
                Ty::Float64 => self.w("    return 0.0;"),
                _ => self.w("    return 0;"),
            }
        }
        self.w("}");

        // Closure-convention wrapper for capture-less functions used as
        // values.
        if decl.needs_value_wrapper && func.captures.is_empty() && !self.machine {
            let mut header = format!("{} {}__cl(RtRef __env", ret_c(&func.ret), func.name);
            for slot in 0..func.nparams {
                let _ = write!(header, ", {} s{slot}", param_c(&func.locals[slot as usize]));
            }
            header.push_str(") {");
            self.w(&header);
            self.w("    (void)__env;");
            let call_args: Vec<String> = (0..func.nparams).map(|i| format!("s{i}")).collect();
            if func.ret == Ty::None {
                self.wf(format_args!("    {}({});", func.name, call_args.join(", ")));
                self.w("    return;");
            } else {
                self.wf(format_args!("    return {}({});", func.name, call_args.join(", ")));
            }
            self.w("}");
        }
    }

    fn collect_state_cleanups(&self) -> Vec<(u32, Option<BlockId>)> {
        let mut out = Vec::new();
        let mut state = 0u32;
        for block in &self.func.blocks {
            if let Terminator::Await { .. } | Terminator::Yield { .. } = block.term {
                state += 1;
                out.push((state, block.cleanup));
            }
        }
        out
    }

    /// Releases all heap-typed slots (function epilogue).
    fn emit_slot_release(&mut self) {
        let locals = self.func.locals.clone();
        for (slot, ty) in locals.iter().enumerate() {
            let place = self.slot(slot as u32);
            self.emit_release(&place, ty);
        }
    }

    fn emit_frame_release(&mut self) {
        let locals = self.func.locals.clone();
        for (slot, ty) in locals.iter().enumerate() {
            self.emit_release(&format!("f->s{slot}"), ty);
        }
    }

    fn emit_release(&mut self, place: &str, ty: &Ty) {
        match ty {
            Ty::Dyn => self.wf(format_args!("    rc_dec(val_as_ref({place}));")),
            Ty::FixedArr(elem, n) if is_handle(elem) || **elem == Ty::Dyn => {
                for i in 0..*n {
                    let inner = format!("{place}[{i}]");
                    self.emit_release(&inner, elem);
                }
            }
            _ if is_handle(ty) => self.wf(format_args!("    rc_dec({place});")),
            _ => {}
        }
    }

    fn handler_label(&self, block: &Block) -> String {
        match block.handler {
            Some(handler) => format!("B{}", handler.0),
            None => "Lprop".to_owned(),
        }
    }

    fn check_exc(&mut self, block: &Block) {
        let label = self.handler_label(block);
        self.wf(format_args!("    if (exc_pending()) goto {label};"));
    }

    /// Boxed form of a value for `RtVal` contexts.
    fn boxed(&self, v: ValueId) -> String {
        match self.vty(v) {
            Ty::Dyn => format!("v{}", v.0),
            Ty::Int64 | Ty::Byte => format!("val_from_int((int64_t)v{})", v.0),
            Ty::Float64 => format!("val_from_float(v{})", v.0),
            Ty::Bool => format!("val_from_bool(v{})", v.0),
            Ty::None | Ty::Never => "val_none()".to_owned(),
            Ty::Task(_) => format!("val_from_int((int64_t)v{})", v.0),
            _ => format!("val_from_ref(v{})", v.0),
        }
    }

    fn emit_store(&mut self, place: &str, place_ty: &Ty, src: ValueId) {
        match place_ty {
            Ty::Dyn => {
                self.wf(format_args!("    rc_dec(val_as_ref({place}));"));
                self.wf(format_args!("    {place} = v{};", src.0));
            }
            Ty::FixedArr(..) => {
                self.wf(format_args!("    memcpy({place}, v{}, sizeof({place}));", src.0));
            }
            _ if is_handle(place_ty) => {
                self.wf(format_args!("    rc_dec({place});"));
                self.wf(format_args!("    {place} = v{};", src.0));
            }
            _ => self.wf(format_args!("    {place} = v{};", src.0)),
        }
    }

    fn emit_op(&mut self, op: &Op, block: &Block) {
        match op {
            Op::Const { dst, value } => self.emit_const(*dst, value),
            Op::LoadLocal { dst, slot } => {
                let place = self.slot(*slot);
                match self.vty(*dst) {
                    Ty::FixedArr(..) => {
                        self.wf(format_args!("    memcpy(v{}, {place}, sizeof(v{}));", dst.0, dst.0));
                    }
                    _ => self.wf(format_args!("    v{} = {place};", dst.0)),
                }
            }
            Op::StoreLocal { slot, src } => {
                let place = self.slot(*slot);
                let ty = self.func.locals[*slot as usize].clone();
                self.emit_store(&place, &ty, *src);
            }
            Op::LoadGlobal { dst, slot } => {
                let name = mangle::global(self.module, *slot);
                match self.vty(*dst) {
                    Ty::FixedArr(..) => {
                        self.wf(format_args!("    memcpy(v{}, {name}, sizeof(v{}));", dst.0, dst.0));
                    }
                    _ => self.wf(format_args!("    v{} = {name};", dst.0)),
                }
            }
            Op::StoreGlobal { slot, src } => {
                let name = mangle::global(self.module, *slot);
                let ty = self
                    .info
                    .global_tys
                    .get(self.info.func(self.func.id).module as usize)
                    .and_then(|g| g.get(*slot as usize))
                    .cloned()
                    .unwrap_or(Ty::Dyn);
                self.emit_store(&name, &ty, *src);
            }
            Op::LoadCapture { dst, index } => {
                if self.machine {
                    self.wf(format_args!("    v{} = f->c{index};", dst.0));
                } else {
                    self.wf(format_args!("    v{} = __e->c{index};", dst.0));
                }
            }
            Op::Bin { dst, op, lhs, rhs } => self.emit_bin(*dst, *op, *lhs, *rhs, block),
            Op::Cmp { dst, op, lhs, rhs } => {
                let c_op = match op {
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                    CmpOp::In | CmpOp::NotIn => unreachable!("membership lowers to contains calls"),
                };
                self.wf(format_args!("    v{} = (v{} {c_op} v{});", dst.0, lhs.0, rhs.0));
            }
            Op::Not { dst, src } => self.wf(format_args!("    v{} = !v{};", dst.0, src.0)),
            Op::Neg { dst, src } => match self.vty(*dst) {
                Ty::Float64 => self.wf(format_args!("    v{} = -v{};", dst.0, src.0)),
                _ => self.wf(format_args!("    v{} = rt_wneg(v{});", dst.0, src.0)),
            },
            Op::Call { dst, func, args } => {
                let callee = self.info.func(*func);
                let symbol = callee.symbol.clone();
                let rendered: Vec<String> = args.iter().map(|a| format!("v{}", a.0)).collect();
                match dst {
                    Some(dst) => self.wf(format_args!("    v{} = {symbol}({});", dst.0, rendered.join(", "))),
                    None => self.wf(format_args!("    {symbol}({});", rendered.join(", "))),
                }
                self.check_exc(block);
            }
            Op::CallClosure { dst, callee, args } => {
                let Ty::Func(sig) = self.vty(*callee) else {
                    return;
                };
                let params: Vec<String> = std::iter::once("RtRef".to_owned())
                    .chain(sig.params.iter().map(|p| param_c(p).to_owned()))
                    .collect();
                let cast = format!("{}(*)({})", ret_c(&sig.ret), params.join(", "));
                let mut rendered: Vec<String> = vec![format!("v{}", callee.0)];
                rendered.extend(args.iter().map(|a| format!("v{}", a.0)));
                let call = format!(
                    "(({cast})(uintptr_t)(*(void**)frame_ptr(v{})))({})",
                    callee.0,
                    rendered.join(", ")
                );
                match dst {
                    Some(dst) => self.wf(format_args!("    v{} = {call};", dst.0)),
                    None => self.wf(format_args!("    {call};")),
                }
                self.check_exc(block);
            }
            Op::CallVirtual {
                dst,
                recv,
                class,
                slot,
                args,
            } => {
                let (_, func) = self
                    .info
                    .class(*class)
                    .methods
                    .get(*slot as usize)
                    .copied()
                    .expect("vtable slot in range");
                let callee = self.info.func(func);
                let params: Vec<String> = callee.params.iter().map(|p| param_c(p).to_owned()).collect();
                let cast = format!("{}(*)({})", ret_c(&callee.ret), params.join(", "));
                let mut rendered: Vec<String> = vec![format!("v{}", recv.0)];
                rendered.extend(args.iter().map(|a| format!("v{}", a.0)));
                let call = format!(
                    "(({cast})(uintptr_t)obj_vmethod(v{}, {slot}))({})",
                    recv.0,
                    rendered.join(", ")
                );
                match dst {
                    Some(dst) => self.wf(format_args!("    v{} = {call};", dst.0)),
                    None => self.wf(format_args!("    {call};")),
                }
                self.check_exc(block);
            }
            Op::CallRuntime { dst, func, args } => self.emit_runtime_call(*dst, *func, args, block),
            Op::MakeFrame { dst, func, args } => {
                let callee = self.info.func(*func);
                let symbol = callee.symbol.clone();
                self.wf(format_args!(
                    "    v{} = heap_alloc(9, sizeof(struct {symbol}__frame));",
                    dst.0
                ));
                self.w("    {");
                self.wf(format_args!(
                    "        struct {symbol}__frame* __mf = (struct {symbol}__frame*)frame_ptr(v{});",
                    dst.0
                ));
                self.wf(format_args!("        __mf->fn = {symbol};"));
                self.w("        __mf->state = 0;");
                for (index, arg) in args.iter().enumerate() {
                    self.wf(format_args!("        __mf->s{index} = v{};", arg.0));
                }
                self.w("    }");
            }
            Op::MakeClosure { dst, func, captures } => {
                let callee = self.info.func(*func);
                let symbol = callee.symbol.clone();
                let code = if callee.captures.is_empty() {
                    format!("{symbol}__cl")
                } else {
                    symbol.clone()
                };
                self.wf(format_args!(
                    "    v{} = heap_alloc(9, sizeof(struct {symbol}__env));",
                    dst.0
                ));
                self.w("    {");
                self.wf(format_args!(
                    "        struct {symbol}__env* __mc = (struct {symbol}__env*)frame_ptr(v{});",
                    dst.0
                ));
                self.wf(format_args!("        __mc->fn = (void*){code};"));
                for (index, capture) in captures.iter().enumerate() {
                    self.wf(format_args!("        __mc->c{index} = v{};", capture.0));
                }
                self.w("    }");
            }
            Op::Spawn { dst, frame } => {
                self.wf(format_args!(
                    "    v{} = scheduler_spawn(*(RtResumeFn*)frame_ptr(v{}), v{});",
                    dst.0, frame.0, frame.0
                ));
            }
            Op::AllocObj { dst, class } => {
                let nfields = self.info.class(*class).fields.len();
                self.wf(format_args!("    v{} = obj_new({}, {nfields});", dst.0, class.0));
            }
            Op::MakeTuple { dst, items } => {
                if items.is_empty() {
                    self.wf(format_args!("    v{} = tuple_new(NULL, 0);", dst.0));
                } else {
                    let rendered: Vec<String> = items.iter().map(|i| format!("v{}", i.0)).collect();
                    self.w("    {");
                    self.wf(format_args!(
                        "        RtVal __t[{}] = {{{}}};",
                        items.len(),
                        rendered.join(", ")
                    ));
                    self.wf(format_args!("        v{} = tuple_new(__t, {});", dst.0, items.len()));
                    self.w("    }");
                }
            }
            Op::ArrGet { dst, arr, index, len } => {
                let label = self.handler_label(block);
                self.w("    {");
                self.wf(format_args!("        int64_t __i = v{};", index.0));
                self.wf(format_args!("        if (__i < 0) __i += {len};"));
                self.wf(format_args!(
                    "        if (__i < 0 || __i >= {len}) {{ throw({}, (const uint8_t*)\"array index out of range\", 24); goto {label}; }}",
                    pyrite_runtime::ExcKind::IndexError as u32
                ));
                self.wf(format_args!("        v{} = v{}[__i];", dst.0, arr.0));
                self.w("    }");
            }
            Op::AttrGet { dst, obj, field } => {
                self.wf(format_args!("    v{} = attr_get(v{}, {field});", dst.0, obj.0));
            }
            Op::AttrSet { obj, field, value } => {
                self.wf(format_args!("    attr_set(v{}, {field}, v{});", obj.0, value.0));
            }
            Op::DynAttr { dst, obj, name } => {
                let text = self.interner.get(*name).to_owned();
                let escaped = escape_bytes(text.as_bytes());
                self.wf(format_args!(
                    "    v{} = dyn_attr_get(v{}, (const uint8_t*)\"{escaped}\", {});",
                    dst.0,
                    obj.0,
                    text.len()
                ));
                self.check_exc(block);
            }
            Op::Cast { dst, src } => self.emit_cast(*dst, *src),
            Op::Box { dst, src } => {
                let boxed = self.boxed(*src);
                self.wf(format_args!("    v{} = {boxed};", dst.0));
            }
            Op::Unbox { dst, src } => {
                let expr = match self.vty(*dst) {
                    Ty::Int64 | Ty::Byte | Ty::None | Ty::Never => format!("val_as_int(v{})", src.0),
                    Ty::Float64 => format!("val_as_float(v{})", src.0),
                    Ty::Bool => format!("val_as_bool(v{})", src.0),
                    Ty::Task(_) => format!("(RtTask)val_as_int(v{})", src.0),
                    Ty::Dyn => format!("v{}", src.0),
                    _ => format!("val_as_ref(v{})", src.0),
                };
                self.wf(format_args!("    v{} = {expr};", dst.0));
            }
            Op::RcInc { src } => match self.vty(*src) {
                Ty::Dyn => self.wf(format_args!("    rc_inc(val_as_ref(v{}));", src.0)),
                ty if is_handle(ty) => self.wf(format_args!("    rc_inc(v{});", src.0)),
                _ => {}
            },
            Op::RcDec { src } => match self.vty(*src) {
                Ty::Dyn => self.wf(format_args!("    rc_dec(val_as_ref(v{}));", src.0)),
                ty if is_handle(ty) => self.wf(format_args!("    rc_dec(v{});", src.0)),
                _ => {}
            },
            Op::TryPush => self.w("    try_push();"),
            Op::TryPop => self.w("    try_pop();"),
            Op::ExcMatch { dst, kind, class } => {
                let class_plus1 = class.map_or(0, |c| c.0 + 1);
                self.wf(format_args!("    v{} = exc_matches({kind}, {class_plus1});", dst.0));
            }
            Op::ExcValue { dst } => self.wf(format_args!("    v{} = exc_value();", dst.0)),
            Op::ExcClear => self.w("    exc_clear();"),
            Op::AwaitResult { dst } => {
                self.wf(format_args!("    v{} = task_result(f->awaiting);", dst.0));
                self.check_exc(block);
            }
            Op::GenNext {
                r#gen,
                value_slot,
                dst_done,
            } => {
                let place = self.slot(*value_slot);
                self.w("    {");
                self.wf(format_args!(
                    "        RtPoll __p = (*(RtResumeFn*)frame_ptr(v{}))(v{}, 0);",
                    r#gen.0, r#gen.0
                ));
                let label = self.handler_label(block);
                self.wf(format_args!("        if (exc_pending()) goto {label};"));
                self.wf(format_args!("        v{} = (__p.status == RT_POLL_DONE);", dst_done.0));
                self.wf(format_args!(
                    "        if (!v{}) {{ rc_dec(val_as_ref({place})); {place} = __p.value; }}",
                    dst_done.0
                ));
                self.w("    }");
            }
            Op::Print { args } => {
                if args.is_empty() {
                    self.w("    rt_print(NULL, 0);");
                } else {
                    let rendered: Vec<String> = args.iter().map(|a| format!("v{}", a.0)).collect();
                    self.w("    {");
                    self.wf(format_args!(
                        "        RtVal __p[{}] = {{{}}};",
                        args.len(),
                        rendered.join(", ")
                    ));
                    self.wf(format_args!("        rt_print(__p, {});", args.len()));
                    self.w("    }");
                }
            }
        }
    }

    fn emit_const(&mut self, dst: ValueId, value: &Const) {
        let ty = self.vty(dst).clone();
        if let (Ty::FixedArr(elem, _), Const::List(items)) = (&ty, value) {
            let elem = elem.clone();
            for (index, item) in items.iter().enumerate() {
                let item_expr = self.const_expr(item, &elem);
                self.wf(format_args!("    v{}[{index}] = {item_expr};", dst.0));
            }
            return;
        }
        let expr = self.const_expr(value, &ty);
        self.wf(format_args!("    v{} = {expr};", dst.0));
    }

    /// A C expression producing `value` at type `ty`.
    fn const_expr(&mut self, value: &Const, ty: &Ty) -> String {
        if *ty == Ty::Dyn {
            let inner = self.const_expr(value, &value.ty());
            return match value {
                Const::None => "val_none()".to_owned(),
                Const::Bool(_) => format!("val_from_bool({inner})"),
                Const::Int(_) => format!("val_from_int({inner})"),
                Const::Float(_) => format!("val_from_float({inner})"),
                _ => format!("val_from_ref({inner})"),
            };
        }
        match value {
            Const::None => "0".to_owned(),
            Const::Bool(b) => if *b { "true" } else { "false" }.to_owned(),
            Const::Int(v) => format!("INT64_C({v})"),
            Const::Float(f) => format_float_literal(*f),
            Const::Str(s) => {
                let escaped = escape_bytes(s.as_bytes());
                format!("str_new((const uint8_t*)\"{escaped}\", {})", s.len())
            }
            Const::Bytes(b) => {
                let escaped = escape_bytes(b);
                format!("bytes_new((const uint8_t*)\"{escaped}\", {})", b.len())
            }
            Const::Big(big) => {
                let text = big.to_string();
                let escaped = escape_bytes(text.as_bytes());
                format!("big_from_str((const uint8_t*)\"{escaped}\", {})", text.len())
            }
            Const::List(_) => unreachable!("array constants are emitted elementwise"),
            Const::Tuple(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| {
                        let inner = self.const_expr(item, &Ty::Dyn);
                        inner
                    })
                    .collect();
                // Materialized through a compound literal.
                format!(
                    "tuple_new((const RtVal[]){{{}}}, {})",
                    rendered.join(", "),
                    items.len()
                )
            }
        }
    }

    fn emit_bin(&mut self, dst: ValueId, op: BinOp, lhs: ValueId, rhs: ValueId, block: &Block) {
        let float = *self.vty(dst) == Ty::Float64 || *self.vty(lhs) == Ty::Float64;
        let label = self.handler_label(block);
        let kind_zero = pyrite_runtime::ExcKind::ZeroDivisionError as u32;
        if float {
            match op {
                BinOp::Add => self.wf(format_args!("    v{} = v{} + v{};", dst.0, lhs.0, rhs.0)),
                BinOp::Sub => self.wf(format_args!("    v{} = v{} - v{};", dst.0, lhs.0, rhs.0)),
                BinOp::Mul => self.wf(format_args!("    v{} = v{} * v{};", dst.0, lhs.0, rhs.0)),
                BinOp::Div => {
                    self.wf(format_args!(
                        "    if (v{} == 0.0) {{ throw({kind_zero}, (const uint8_t*)\"float division by zero\", 22); goto {label}; }}",
                        rhs.0
                    ));
                    self.wf(format_args!("    v{} = v{} / v{};", dst.0, lhs.0, rhs.0));
                }
                BinOp::FloorDiv => {
                    self.wf(format_args!(
                        "    if (v{} == 0.0) {{ throw({kind_zero}, (const uint8_t*)\"float floor division by zero\", 28); goto {label}; }}",
                        rhs.0
                    ));
                    self.wf(format_args!(
                        "    v{} = (double)math_floor(v{} / v{});",
                        dst.0, lhs.0, rhs.0
                    ));
                }
                BinOp::Mod => {
                    self.wf(format_args!(
                        "    if (v{} == 0.0) {{ throw({kind_zero}, (const uint8_t*)\"float modulo\", 12); goto {label}; }}",
                        rhs.0
                    ));
                    self.wf(format_args!(
                        "    v{} = v{} - (double)math_floor(v{} / v{}) * v{};",
                        dst.0, lhs.0, lhs.0, rhs.0, rhs.0
                    ));
                }
                BinOp::Pow => self.wf(format_args!("    v{} = math_pow(v{}, v{});", dst.0, lhs.0, rhs.0)),
            }
            return;
        }
        match op {
            BinOp::Add => self.wf(format_args!("    v{} = rt_wadd(v{}, v{});", dst.0, lhs.0, rhs.0)),
            BinOp::Sub => self.wf(format_args!("    v{} = rt_wsub(v{}, v{});", dst.0, lhs.0, rhs.0)),
            BinOp::Mul => self.wf(format_args!("    v{} = rt_wmul(v{}, v{});", dst.0, lhs.0, rhs.0)),
            BinOp::Div => unreachable!("integer true division lowers to float"),
            BinOp::FloorDiv => {
                self.wf(format_args!(
                    "    if (v{} == 0) {{ throw({kind_zero}, (const uint8_t*)\"integer division or modulo by zero\", 34); goto {label}; }}",
                    rhs.0
                ));
                self.wf(format_args!("    v{} = rt_ifloordiv(v{}, v{});", dst.0, lhs.0, rhs.0));
            }
            BinOp::Mod => {
                self.wf(format_args!(
                    "    if (v{} == 0) {{ throw({kind_zero}, (const uint8_t*)\"integer division or modulo by zero\", 34); goto {label}; }}",
                    rhs.0
                ));
                self.wf(format_args!("    v{} = rt_imod(v{}, v{});", dst.0, lhs.0, rhs.0));
            }
            BinOp::Pow => self.wf(format_args!("    v{} = rt_ipow(v{}, v{});", dst.0, lhs.0, rhs.0)),
        }
    }

    fn emit_cast(&mut self, dst: ValueId, src: ValueId) {
        let (from, to) = (self.vty(src).clone(), self.vty(dst).clone());
        let expr = match (&from, &to) {
            (Ty::Int64 | Ty::Bool | Ty::Byte, Ty::Float64) => format!("(double)v{}", src.0),
            (Ty::Float64, Ty::Int64) => format!("(int64_t)v{}", src.0),
            (Ty::Bool | Ty::Byte, Ty::Int64) => format!("(int64_t)v{}", src.0),
            (Ty::Int64, Ty::Bool) => format!("(v{} != 0)", src.0),
            (Ty::Float64, Ty::Bool) => format!("(v{} != 0.0)", src.0),
            // Representation-preserving retype (list element widening,
            // upcasts to a base class).
            _ => format!("v{}", src.0),
        };
        self.wf(format_args!("    v{} = {expr};", dst.0));
    }

    fn emit_runtime_call(&mut self, dst: Option<ValueId>, func: RuntimeFn, args: &[ValueId], block: &Block) {
        // gather takes its task handles as a C array.
        if func == RuntimeFn::SchedulerGather {
            let dst = dst.expect("gather produces a task");
            if args.is_empty() {
                self.wf(format_args!("    v{} = scheduler_gather(NULL, 0);", dst.0));
            } else {
                let rendered: Vec<String> = args.iter().map(|a| format!("v{}", a.0)).collect();
                self.w("    {");
                self.wf(format_args!(
                    "        RtTask __g[{}] = {{{}}};",
                    args.len(),
                    rendered.join(", ")
                ));
                self.wf(format_args!("        v{} = scheduler_gather(__g, {});", dst.0, args.len()));
                self.w("    }");
            }
            return;
        }
        let symbol = func.symbol();
        let rendered: Vec<String> = args
            .iter()
            .enumerate()
            .map(|(index, a)| {
                // A few entry points take narrower integer arguments.
                match (func, index) {
                    (RuntimeFn::DynBinop | RuntimeFn::DynCmp, 0) => format!("(uint32_t)v{}", a.0),
                    (RuntimeFn::SchedulerSleep, 0) | (RuntimeFn::SchedulerWaitFor, 1) => {
                        format!("(uint64_t)v{}", a.0)
                    }
                    (RuntimeFn::BigPow, 1) => format!("(uint32_t)v{}", a.0),
                    (RuntimeFn::ListNew | RuntimeFn::DictNew, 0) => format!("(uint64_t)v{}", a.0),
                    _ => format!("v{}", a.0),
                }
            })
            .collect();
        match dst {
            Some(dst) => self.wf(format_args!("    v{} = {symbol}({});", dst.0, rendered.join(", "))),
            None => self.wf(format_args!("    {symbol}({});", rendered.join(", "))),
        }
        if func.can_raise() {
            self.check_exc(block);
        }
    }

    fn emit_terminator(&mut self, term: &Terminator) {
        match term {
            Terminator::Jump(target) => self.wf(format_args!("    goto B{};", target.0)),
            Terminator::Branch { cond, then_blk, else_blk } => {
                self.wf(format_args!(
                    "    if (v{}) goto B{}; else goto B{};",
                    cond.0, then_blk.0, else_blk.0
                ));
            }
            Terminator::Return(value) => {
                if self.machine {
                    let boxed = value.map(|v| self.boxed(v)).unwrap_or_else(|| "val_none()".to_owned());
                    self.wf(format_args!("    {{ RtVal __r = {boxed};"));
                    self.emit_frame_release();
                    self.w("    return (RtPoll){RT_POLL_DONE, __r, 0}; }");
                } else {
                    match value {
                        Some(v) => {
                            let ty = self.vty(*v).clone();
                            self.wf(format_args!("    {{ {} __r = v{};", c_ty(&ty), v.0));
                            self.emit_slot_release();
                            self.w("    return __r; }");
                        }
                        None => {
                            self.emit_slot_release();
                            if self.func.ret == Ty::None {
                                self.w("    return;");
                            } else {
                                match self.func.ret {
                                    Ty::Dyn => self.w("    return val_none();"),
                                    Ty::Float64 => self.w("    return 0.0;"),
                                    _ => self.w("    return 0;"),
                                }
                            }
                        }
                    }
                }
            }
            Terminator::Throw { kind, msg, handler } => {
                let text = self.interner.get(*msg).to_owned();
                let escaped = escape_bytes(text.as_bytes());
                self.wf(format_args!(
                    "    throw({kind}, (const uint8_t*)\"{escaped}\", {});",
                    text.len()
                ));
                match handler {
                    Some(handler) => self.wf(format_args!("    goto B{};", handler.0)),
                    None => self.w("    goto Lprop;"),
                }
            }
            Terminator::ThrowValue { value, class, handler } => {
                self.wf(format_args!("    throw_obj(v{}, {});", value.0, class.0));
                match handler {
                    Some(handler) => self.wf(format_args!("    goto B{};", handler.0)),
                    None => self.w("    goto Lprop;"),
                }
            }
            Terminator::Yield { value, resume } => {
                let state = self.state_for(*resume);
                self.wf(format_args!("    f->state = {state};"));
                self.wf(format_args!(
                    "    return (RtPoll){{RT_POLL_YIELDED, v{}, 0}};",
                    value.0
                ));
            }
            Terminator::Await { task, resume } => {
                let state = self.state_for(*resume);
                self.wf(format_args!("    f->state = {state};"));
                self.wf(format_args!("    f->awaiting = v{};", task.0));
                self.wf(format_args!(
                    "    return (RtPoll){{RT_POLL_AWAITING, val_none(), v{}}};",
                    task.0
                ));
            }
            Terminator::Propagate { handler } => match handler {
                Some(handler) => self.wf(format_args!("    goto B{};", handler.0)),
                None => self.w("    goto Lprop;"),
            },
            Terminator::Cancelled => {
                self.emit_frame_release();
                self.w("    return (RtPoll){RT_POLL_CANCELLED, val_none(), 0};");
            }
        }
    }

    fn state_for(&self, resume: BlockId) -> u32 {
        self.states
            .iter()
            .find(|(block, _)| *block == resume)
            .map(|(_, state)| *state)
            .expect("suspension state registered")
    }
}

/// Entry `main`: runtime init, class registration, module initializers
/// in import order, fatal-exception reporting.
fn emit_main(out: &mut String, modules: &[IRModule], info: &ProgramInfo, interner: &Interner) {
    out.push_str("int main(void) {\n    rt_init();\n");
    for (id, class) in info.classes.iter().enumerate() {
        let name = interner.get(class.name);
        let escaped = escape_bytes(name.as_bytes());
        let base_plus1 = class.base.map_or(0, |b| b.0 + 1);
        let _ = writeln!(
            out,
            "    class_register({id}, (const uint8_t*)\"{escaped}\", {}, {base_plus1});",
            name.len()
        );
        for (field, _) in &class.fields {
            let field = interner.get(*field);
            let escaped = escape_bytes(field.as_bytes());
            let _ = writeln!(
                out,
                "    class_add_field({id}, (const uint8_t*)\"{escaped}\", {});",
                field.len()
            );
        }
        for (method, func) in &class.methods {
            let method = interner.get(*method);
            let escaped = escape_bytes(method.as_bytes());
            let symbol = info.func(*func).symbol.clone();
            let _ = writeln!(
                out,
                "    class_add_method({id}, (const uint8_t*)\"{escaped}\", {}, (uint64_t)(uintptr_t){symbol});",
                method.len()
            );
        }
    }
    // Modules initialize in import-topological order (the driver sorts
    // them; the entry module comes first in `modules` but runs last).
    for module in modules.iter().rev() {
        let init = &module.functions[module.init];
        let _ = writeln!(out, "    {}();", init.name);
        out.push_str("    if (exc_pending()) { exc_print(); return 1; }\n");
    }
    out.push_str("    return 0;\n}\n");
}

/// Classes referenced for registration need the emitter to resolve a
/// vtable address; re-exported for the driver's IR dump.
pub fn class_vtable_symbols(info: &ProgramInfo, class: ClassId) -> Vec<String> {
    info.class(class)
        .methods
        .iter()
        .map(|(_, func)| info.func(*func).symbol.clone())
        .collect()
}

/// Resolves a function's mangled symbol, for tests and the driver.
pub fn symbol_of(info: &ProgramInfo, id: FuncId) -> String {
    info.func(id).symbol.clone()
}
