//! Program-level type inference: the class table, function signatures,
//! and the bidirectional rules shared with lowering.
//!
//! Inference is type-directed lowering: this module collects everything
//! that must be known *before* a body is lowered — class layouts and
//! vtables, parameter types (annotations first, call-site inference for
//! bare parameters), return types (annotation or a pre-scan of `return`
//! statements) — and the per-expression rules then run as the lowerer
//! walks each body.

use ahash::AHashMap;

use crate::{
    ast::{AssignTarget, ClassDef, Expr, ExprKind, FunctionDef, Literal, Module, Stmt, StmtKind},
    comptime,
    errors::{CompileError, Diagnostics, ErrorKind},
    intern::{Interner, StringId},
    resolve::EXCEPTION_NAMES,
    types::{ClassId, ClassInfo, FuncId, FuncSig, Ty},
};

/// Which body a compiled function came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    /// Module initializer (the module's top-level statements).
    ModuleInit,
    TopLevel,
    Method(ClassId),
    /// Nested function or lambda; carries captures.
    Nested,
}

/// Everything known about one compiled function before lowering.
#[derive(Debug)]
pub struct FuncDecl {
    pub id: FuncId,
    pub name: StringId,
    /// Mangled symbol name.
    pub symbol: String,
    pub module: u32,
    pub kind: FuncKind,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub is_async: bool,
    pub is_generator: bool,
    /// Capture types, filled when the closure is created.
    pub captures: Vec<Ty>,
    /// Set when the function is used as a value (decorators, callbacks),
    /// which makes the emitter generate a closure-convention wrapper.
    pub needs_value_wrapper: bool,
}

/// The whole-program symbol table built before lowering.
pub struct ProgramInfo {
    pub classes: Vec<ClassInfo>,
    pub class_by_name: AHashMap<StringId, ClassId>,
    pub funcs: Vec<FuncDecl>,
    /// Top-level function by (module, name).
    pub func_by_name: AHashMap<(u32, StringId), FuncId>,
    /// Declared function by definition span, so re-encountering a `def`
    /// statement during body lowering finds the collected declaration
    /// instead of minting a nested duplicate.
    pub decl_spans: AHashMap<(u32, u32), FuncId>,
    /// Module-level global types, refined during lowering.
    pub global_tys: Vec<Vec<Ty>>,
    /// Module name -> module index, for `import` resolution.
    pub module_by_name: AHashMap<StringId, u32>,
}

impl ProgramInfo {
    pub fn class(&self, id: ClassId) -> &ClassInfo {
        &self.classes[id.0 as usize]
    }

    pub fn func(&self, id: FuncId) -> &FuncDecl {
        &self.funcs[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut FuncDecl {
        &mut self.funcs[id.0 as usize]
    }

    /// Looks up a method through the inheritance chain; the vtable is
    /// already flattened, so a single table probe suffices.
    pub fn method(&self, class: ClassId, name: StringId) -> Option<(u32, FuncId)> {
        let info = self.class(class);
        info.method_slot(name).map(|slot| (slot, info.methods[slot as usize].1))
    }

    pub fn is_subclass(&self, derived: ClassId, base: ClassId) -> bool {
        let mut current = Some(derived);
        while let Some(id) = current {
            if id == base {
                return true;
            }
            current = self.class(id).base;
        }
        false
    }

    /// Whether any class below `class` overrides the given vtable slot.
    /// When nothing does, a call on a receiver of this static type is
    /// safely devirtualized.
    pub fn slot_overridden(&self, class: ClassId, slot: u32) -> bool {
        let base_impl = self.class(class).methods.get(slot as usize).map(|(_, f)| *f);
        self.classes.iter().enumerate().any(|(index, candidate)| {
            let id = ClassId(index as u32);
            id != class
                && self.is_subclass(id, class)
                && candidate.methods.get(slot as usize).map(|(_, f)| *f) != base_impl
        })
    }

    /// Allocates a fresh function id for a nested function or lambda
    /// discovered during lowering.
    pub fn add_nested(&mut self, decl: FuncDecl) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        let mut decl = decl;
        decl.id = id;
        self.funcs.push(decl);
        id
    }
}

/// Builds the program symbol table from all parsed modules.
pub fn collect(modules: &[Module], interner: &Interner) -> Result<ProgramInfo, Vec<CompileError>> {
    let mut diags = Diagnostics::new();
    let mut info = ProgramInfo {
        classes: Vec::new(),
        class_by_name: AHashMap::new(),
        funcs: Vec::new(),
        func_by_name: AHashMap::new(),
        decl_spans: AHashMap::new(),
        global_tys: modules.iter().map(|m| vec![Ty::Never; m.nglobals as usize]).collect(),
        module_by_name: modules.iter().enumerate().map(|(i, m)| (m.name, i as u32)).collect(),
    };

    // Classes first: method signatures may reference other classes.
    for module in modules {
        for stmt in &module.body {
            if let StmtKind::ClassDef(def) = &stmt.kind {
                declare_class(&mut info, def, &mut diags, interner);
            }
        }
    }
    for (module_index, module) in modules.iter().enumerate() {
        for stmt in &module.body {
            if let StmtKind::ClassDef(def) = &stmt.kind {
                fill_class(&mut info, def, module_index as u32, &mut diags, interner, modules);
            }
        }
    }

    // Top-level functions.
    for (module_index, module) in modules.iter().enumerate() {
        for stmt in &module.body {
            if let StmtKind::FuncDef(def) = &stmt.kind {
                let id = FuncId(info.funcs.len() as u32);
                let module_name = interner.get(module.name);
                let symbol = crate::emit::mangle::function(module_name, interner.get(def.name.name));
                let params = param_types(def, &info, interner, modules, Some(module_index as u32), &mut diags);
                let ret = return_type(def, &info, interner, &params);
                info.funcs.push(FuncDecl {
                    id,
                    name: def.name.name,
                    symbol,
                    module: module_index as u32,
                    kind: FuncKind::TopLevel,
                    params,
                    ret,
                    is_async: def.is_async,
                    is_generator: def.is_generator,
                    captures: Vec::new(),
                    needs_value_wrapper: false,
                });
                info.func_by_name.insert((module_index as u32, def.name.name), id);
                info.decl_spans.insert((def.range.file, def.range.start), id);
            }
        }
    }

    diags.finish()?;
    Ok(info)
}

fn declare_class(info: &mut ProgramInfo, def: &ClassDef, diags: &mut Diagnostics, interner: &Interner) {
    if info.class_by_name.contains_key(&def.name.name) {
        diags.error(
            ErrorKind::TypeError,
            format!("duplicate class '{}'", interner.get(def.name.name)),
            def.range,
        );
        return;
    }
    let id = ClassId(info.classes.len() as u32);
    info.classes.push(ClassInfo {
        name: def.name.name,
        base: None,
        fields: Vec::new(),
        methods: Vec::new(),
        init: None,
        is_exception: false,
    });
    info.class_by_name.insert(def.name.name, id);
}

/// Fills layout and vtable for one class. Fields of the base appear
/// first; the method table is the base's table with overridden slots
/// replaced, extended in declaration order.
fn fill_class(
    info: &mut ProgramInfo,
    def: &ClassDef,
    module: u32,
    diags: &mut Diagnostics,
    interner: &Interner,
    modules: &[Module],
) {
    let id = info.class_by_name[&def.name.name];
    let (base, is_exception) = match &def.base {
        Some(base) => match info.class_by_name.get(&base.name) {
            Some(base_id) => (Some(*base_id), info.class(*base_id).is_exception),
            None if EXCEPTION_NAMES.contains(&interner.get(base.name)) => (None, true),
            None => {
                diags.error(
                    ErrorKind::NameError,
                    format!("unknown base class '{}'", interner.get(base.name)),
                    base.range,
                );
                (None, false)
            }
        },
        None => (None, false),
    };

    let mut fields: Vec<(StringId, Ty)> = Vec::new();
    let mut methods: Vec<(StringId, FuncId)> = Vec::new();
    // The constructor is inherited unless overridden.
    let mut inherited_init = None;
    if let Some(base_id) = base {
        fields.extend(info.class(base_id).fields.iter().cloned());
        methods.extend(info.class(base_id).methods.iter().cloned());
        inherited_init = info.class(base_id).init;
    }

    // Declared fields (`x: int`) and fields discovered from `self.x = ...`
    // in `__init__`.
    for (field, annotation) in &def.field_decls {
        let ty = annotation_type(annotation, info, interner, diags);
        if !fields.iter().any(|(name, _)| name == field) {
            fields.push((*field, ty));
        }
    }
    for method in &def.methods {
        if interner.get(method.name.name) == "__init__" {
            collect_init_fields(&method.body, method, info, interner, &mut fields, diags);
        }
    }

    let mut init = inherited_init;
    for method in &def.methods {
        let func_id = FuncId(info.funcs.len() as u32);
        let module_name = interner.get(modules[module as usize].name);
        let class_name = interner.get(def.name.name);
        let symbol = crate::emit::mangle::method(module_name, class_name, interner.get(method.name.name));
        let mut params = param_types(method, info, interner, modules, Some(module), diags);
        if params.is_empty() {
            diags.error(
                ErrorKind::TypeError,
                format!("method '{}' is missing self", interner.get(method.name.name)),
                method.range,
            );
        } else {
            params[0] = Ty::Class(id);
        }
        let ret = return_type(method, info, interner, &params);
        info.funcs.push(FuncDecl {
            id: func_id,
            name: method.name.name,
            symbol,
            module,
            kind: FuncKind::Method(id),
            params,
            ret,
            is_async: method.is_async,
            is_generator: method.is_generator,
            captures: Vec::new(),
            needs_value_wrapper: false,
        });
        info.decl_spans.insert((method.range.file, method.range.start), func_id);
        if interner.get(method.name.name) == "__init__" {
            init = Some(func_id);
        } else {
            match methods.iter().position(|(name, _)| *name == method.name.name) {
                Some(slot) => methods[slot].1 = func_id,
                None => methods.push((method.name.name, func_id)),
            }
        }
    }

    let class = &mut info.classes[id.0 as usize];
    class.base = base;
    class.is_exception = is_exception;
    class.fields = fields;
    class.methods = methods;
    class.init = init;
}

/// Walks `__init__` for `self.<field> = value` assignments and records
/// each new field with its inferred type.
fn collect_init_fields(
    body: &[Stmt],
    init: &FunctionDef,
    info: &ProgramInfo,
    interner: &Interner,
    fields: &mut Vec<(StringId, Ty)>,
    diags: &mut Diagnostics,
) {
    let self_name = init.params.first().map(|p| p.name.name);
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign {
                target: AssignTarget::Attribute { value, attr },
                value: assigned,
            } => {
                let ExprKind::Name(receiver) = &value.kind else {
                    continue;
                };
                if Some(receiver.name) != self_name || fields.iter().any(|(name, _)| name == attr) {
                    continue;
                }
                // The field type comes from the assigned expression: a
                // parameter's declared type, or a literal's type.
                let ty = match &assigned.kind {
                    ExprKind::Name(name) => init
                        .params
                        .iter()
                        .find(|p| p.name.name == name.name)
                        .map_or(Ty::Dyn, |p| {
                            p.annotation
                                .as_ref()
                                .map_or(Ty::Dyn, |a| annotation_type(a, info, interner, diags))
                        }),
                    _ => comptime::fold(assigned, interner)
                        .ok()
                        .flatten()
                        .map_or(Ty::Dyn, |c| demote_fixed(c.ty())),
                };
                fields.push((*attr, ty));
            }
            StmtKind::If { body, orelse, .. } => {
                collect_init_fields(body, init, info, interner, fields, diags);
                collect_init_fields(orelse, init, info, interner, fields, diags);
            }
            _ => {}
        }
    }
}

/// Fields and containers never hold fixed arrays; demote to lists.
pub fn demote_fixed(ty: Ty) -> Ty {
    match ty {
        Ty::FixedArr(elem, _) => Ty::List(elem),
        other => other,
    }
}

/// Parameter types: annotations win; un-annotated parameters fall back
/// to call-site inference (a single call with inferable literal argument
/// types), then `Dyn`.
fn param_types(
    def: &FunctionDef,
    info: &ProgramInfo,
    interner: &Interner,
    modules: &[Module],
    module: Option<u32>,
    diags: &mut Diagnostics,
) -> Vec<Ty> {
    let mut params: Vec<Ty> = def
        .params
        .iter()
        .map(|p| {
            p.annotation
                .as_ref()
                .map_or(Ty::Dyn, |a| annotation_type(a, info, interner, diags))
        })
        .collect();
    if params.contains(&Ty::Dyn)
        && let Some(module) = module
        && let Some(site) = find_single_call_site(def.name.name, &modules[module as usize].body)
    {
        for (param, arg) in params.iter_mut().zip(site) {
            if *param == Ty::Dyn
                && let Ok(Some(c)) = comptime::fold(arg, interner)
            {
                *param = demote_fixed(c.ty());
            }
        }
    }
    params
}

/// Finds the arguments of the unique call to `name` in the module body,
/// if there is exactly one and it is a plain call. Recursive calls inside
/// the function's own body do not count against uniqueness.
fn find_single_call_site<'a>(name: StringId, body: &'a [Stmt]) -> Option<&'a [Expr]> {
    let mut found: Option<&'a [Expr]> = None;
    let mut count = 0usize;
    visit_calls(body, Some(name), &mut |func, args| {
        if let ExprKind::Name(ident) = &func.kind
            && ident.name == name
        {
            count += 1;
            found = Some(args);
        }
    });
    if count == 1 { found } else { None }
}

fn visit_calls<'a>(body: &'a [Stmt], skip_def: Option<StringId>, visit: &mut impl FnMut(&'a Expr, &'a [Expr])) {
    fn expr<'a>(e: &'a Expr, visit: &mut impl FnMut(&'a Expr, &'a [Expr])) {
        match &e.kind {
            ExprKind::Call { func, args, .. } => {
                visit(func, args);
                expr(func, visit);
                for arg in args {
                    expr(arg, visit);
                }
            }
            ExprKind::Bin { left, right, .. } => {
                expr(left, visit);
                expr(right, visit);
            }
            ExprKind::Unary { operand, .. } => expr(operand, visit),
            ExprKind::Compare { left, rest } => {
                expr(left, visit);
                for (_, c) in rest {
                    expr(c, visit);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                expr(test, visit);
                expr(body, visit);
                expr(orelse, visit);
            }
            ExprKind::Await(inner) | ExprKind::Attribute { value: inner, .. } => expr(inner, visit),
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for item in items {
                    expr(item, visit);
                }
            }
            ExprKind::Subscript { value, index } => {
                expr(value, visit);
                expr(index, visit);
            }
            _ => {}
        }
    }
    for stmt in body {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) | StmtKind::Assert { test: e, .. } => expr(e, visit),
            StmtKind::Assign { value, .. } | StmtKind::AugAssign { value, .. } => expr(value, visit),
            StmtKind::If { test, body, orelse } => {
                expr(test, visit);
                visit_calls(body, skip_def, visit);
                visit_calls(orelse, skip_def, visit);
            }
            StmtKind::While { test, body } => {
                expr(test, visit);
                visit_calls(body, skip_def, visit);
            }
            StmtKind::For { iter, body, .. } => {
                expr(iter, visit);
                visit_calls(body, skip_def, visit);
            }
            StmtKind::FuncDef(def) => {
                if skip_def != Some(def.name.name) {
                    visit_calls(&def.body, skip_def, visit);
                }
            }
            StmtKind::Try { body, handlers, finally } => {
                visit_calls(body, skip_def, visit);
                for handler in handlers {
                    visit_calls(&handler.body, skip_def, visit);
                }
                visit_calls(finally, skip_def, visit);
            }
            StmtKind::With { body, .. } => visit_calls(body, skip_def, visit),
            _ => {}
        }
    }
}

/// Return type: the annotation when present, otherwise a pre-scan that
/// unifies the types of non-recursive `return` expressions (recursive
/// calls are skipped, which resolves `fib`-style self-recursion).
pub(crate) fn return_type(def: &FunctionDef, info: &ProgramInfo, interner: &Interner, params: &[Ty]) -> Ty {
    if let Some(annotation) = &def.returns {
        let mut scratch = Diagnostics::new();
        return annotation_type(annotation, info, interner, &mut scratch);
    }
    if def.is_generator {
        return Ty::Dyn;
    }
    let env: AHashMap<StringId, Ty> = def
        .params
        .iter()
        .zip(params)
        .map(|(p, ty)| (p.name.name, ty.clone()))
        .collect();
    let mut ret: Option<Ty> = None;
    scan_returns(&def.body, def.name.name, &env, interner, &mut ret);
    ret.unwrap_or(Ty::None)
}

fn scan_returns(
    body: &[Stmt],
    self_name: StringId,
    env: &AHashMap<StringId, Ty>,
    interner: &Interner,
    ret: &mut Option<Ty>,
) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Return(value) => {
                let ty = match value {
                    Some(expr) => sketch_type(expr, self_name, env, interner),
                    None => Some(Ty::None),
                };
                if let Some(ty) = ty {
                    *ret = Some(match ret.take() {
                        Some(prev) => prev.join(&ty).unwrap_or(Ty::Dyn),
                        None => ty,
                    });
                }
            }
            StmtKind::If { body, orelse, .. } => {
                scan_returns(body, self_name, env, interner, ret);
                scan_returns(orelse, self_name, env, interner, ret);
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                scan_returns(body, self_name, env, interner, ret);
            }
            StmtKind::Try { body, handlers, finally } => {
                scan_returns(body, self_name, env, interner, ret);
                for handler in handlers {
                    scan_returns(&handler.body, self_name, env, interner, ret);
                }
                scan_returns(finally, self_name, env, interner, ret);
            }
            StmtKind::With { body, .. } => scan_returns(body, self_name, env, interner, ret),
            _ => {}
        }
    }
}

/// A lightweight type sketch for the return pre-scan. `None` means
/// "cannot tell here" (for example a recursive call), which the scan
/// skips rather than poisons.
fn sketch_type(
    expr: &Expr,
    self_name: StringId,
    env: &AHashMap<StringId, Ty>,
    interner: &Interner,
) -> Option<Ty> {
    match &expr.kind {
        ExprKind::Literal(literal) => Some(match literal {
            Literal::None => Ty::None,
            Literal::Bool(_) => Ty::Bool,
            Literal::Int(_) => Ty::Int64,
            Literal::BigInt(_) => Ty::BigInt,
            Literal::Float(_) => Ty::Float64,
            Literal::Str(_) => Ty::Str,
            Literal::Bytes(_) => Ty::Bytes,
        }),
        ExprKind::FString(_) => Some(Ty::Str),
        ExprKind::Name(ident) => env.get(&ident.name).cloned(),
        ExprKind::Bin { op, left, right } => {
            let (l, r) = (
                sketch_type(left, self_name, env, interner),
                sketch_type(right, self_name, env, interner),
            );
            match (l, r) {
                // One side recursive: arithmetic preserves the other
                // side's numeric type.
                (Some(t), None) | (None, Some(t)) if t.is_numeric() => Some(t),
                (Some(l), Some(r)) => crate::lower::bin_result(*op, &l, &r),
                _ => None,
            }
        }
        ExprKind::Unary { operand, .. } => sketch_type(operand, self_name, env, interner),
        ExprKind::Compare { .. } | ExprKind::Bool { .. } => Some(Ty::Bool),
        ExprKind::IfExp { body, orelse, .. } => {
            let (b, o) = (
                sketch_type(body, self_name, env, interner),
                sketch_type(orelse, self_name, env, interner),
            );
            match (b, o) {
                (Some(b), Some(o)) => b.join(&o),
                (Some(t), None) | (None, Some(t)) => Some(t),
                (None, None) => None,
            }
        }
        ExprKind::Call { func, .. } => {
            if let ExprKind::Name(ident) = &func.kind
                && ident.name == self_name
            {
                // Self-recursion: skip.
                return None;
            }
            None
        }
        _ => None,
    }
}

/// Converts a type annotation expression to a [`Ty`].
///
/// Supported: `int`, `float`, `bool`, `str`, `bytes`, `None`, class
/// names, and `list[T]` subscripts.
pub fn annotation_type(expr: &Expr, info: &ProgramInfo, interner: &Interner, diags: &mut Diagnostics) -> Ty {
    match &expr.kind {
        ExprKind::Name(ident) => match interner.get(ident.name) {
            "int" => Ty::Int64,
            "float" => Ty::Float64,
            "bool" => Ty::Bool,
            "str" => Ty::Str,
            "bytes" => Ty::Bytes,
            "list" => Ty::List(Box::new(Ty::Dyn)),
            "dict" => Ty::Dict(Box::new(Ty::Dyn), Box::new(Ty::Dyn)),
            "None" => Ty::None,
            name => match info.class_by_name.get(&ident.name) {
                Some(id) => Ty::Class(*id),
                None => {
                    diags.error(
                        ErrorKind::TypeError,
                        format!("unknown type annotation '{name}'"),
                        expr.range,
                    );
                    Ty::Dyn
                }
            },
        },
        ExprKind::Literal(Literal::None) => Ty::None,
        ExprKind::Subscript { value, index } => {
            if let ExprKind::Name(ident) = &value.kind {
                match interner.get(ident.name) {
                    "list" => {
                        let elem = annotation_type(index, info, interner, diags);
                        return Ty::List(Box::new(elem));
                    }
                    "dict" => {
                        if let ExprKind::Tuple(items) = &index.kind
                            && items.len() == 2
                        {
                            let key = annotation_type(&items[0], info, interner, diags);
                            let value = annotation_type(&items[1], info, interner, diags);
                            return Ty::Dict(Box::new(key), Box::new(value));
                        }
                    }
                    _ => {}
                }
            }
            diags.error(ErrorKind::TypeError, "unsupported type annotation", expr.range);
            Ty::Dyn
        }
        _ => {
            diags.error(ErrorKind::TypeError, "unsupported type annotation", expr.range);
            Ty::Dyn
        }
    }
}

/// Builds the function signature type for a declared function.
pub fn func_sig(decl: &FuncDecl) -> Ty {
    let ret = if decl.is_async {
        Ty::Task(Box::new(decl.ret.clone()))
    } else if decl.is_generator {
        Ty::Generator(Box::new(decl.ret.clone()))
    } else {
        decl.ret.clone()
    };
    Ty::Func(Box::new(FuncSig {
        params: decl.params.clone(),
        ret,
    }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::collect;
    use crate::{intern::Interner, parse::parse_source, resolve::resolve, types::Ty};

    fn program(code: &str) -> (super::ProgramInfo, Interner) {
        let mut interner = Interner::new();
        let mut module = parse_source(code, "main", 0, &mut interner).unwrap();
        resolve(&mut module, &interner).unwrap();
        let info = collect(std::slice::from_ref(&module), &interner).unwrap();
        (info, interner)
    }

    #[test]
    fn annotated_signature_collected() {
        let (info, _) = program("def add(a: int, b: int) -> int:\n    return a + b\n");
        let decl = &info.funcs[0];
        assert_eq!(decl.params, vec![Ty::Int64, Ty::Int64]);
        assert_eq!(decl.ret, Ty::Int64);
    }

    #[test]
    fn recursive_return_type_inferred_from_annotation_free_body() {
        let (info, _) = program("def fib(n: int):\n    return n if n <= 1 else fib(n - 1) + fib(n - 2)\nprint(fib(10))\n");
        assert_eq!(info.funcs[0].ret, Ty::Int64);
    }

    #[test]
    fn class_layout_base_fields_first() {
        let (info, interner) = program(
            "class Animal:\n    def __init__(self, name: str):\n        self.name = name\n    def speak(self) -> str:\n        return 'sound'\nclass Dog(Animal):\n    def speak(self) -> str:\n        return 'Woof!'\n",
        );
        let dog = info.class(crate::types::ClassId(1));
        assert_eq!(interner.get(dog.fields[0].0), "name");
        assert_eq!(dog.fields[0].1, Ty::Str);
        // The override landed in the base's vtable slot.
        assert_eq!(dog.methods.len(), 1);
        assert_eq!(interner.get(dog.methods[0].0), "speak");
        assert_ne!(dog.methods[0].1, info.class(crate::types::ClassId(0)).methods[0].1);
    }

    #[test]
    fn call_site_inference_for_bare_params() {
        let (info, _) = program("def fib(n):\n    return n if n <= 1 else fib(n - 1) + fib(n - 2)\nprint(fib(10))\n");
        assert_eq!(info.funcs[0].params, vec![Ty::Int64]);
        assert_eq!(info.funcs[0].ret, Ty::Int64);
    }
}
