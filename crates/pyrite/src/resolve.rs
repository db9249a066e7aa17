//! Name resolution: lexical scopes, slot assignment, capture analysis.
//!
//! Walks the parsed module and fills in each [`Identifier`]'s slot in
//! place. Every reference resolves to a function-local slot, a capture
//! from an enclosing function, a module-level slot, or a builtin;
//! anything else is a compile-time `NameError`. Shadowing is legal and
//! reuses the slot; single-assignment form is established later by the
//! IR, not here.
//!
//! Captures follow Python's scoping rule that assignment binds locally,
//! so a captured name is read-only by construction (`nonlocal` is outside
//! the subset). Comprehension induction variables get a fresh slot that
//! shadows the name only inside the comprehension.

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{
    ast::{
        AssignTarget, ClassDef, Expr, ExprKind, FStringPart, FunctionDef, Identifier, Module, ScopeInfo, Slot, Stmt,
        StmtKind,
    },
    errors::{CompileError, Diagnostics, ErrorKind},
    intern::{Interner, StringId},
};

/// Names that resolve as builtins when nothing in scope shadows them.
/// `__name__` is compiled away as a string constant.
pub const BUILTIN_NAMES: &[&str] = &[
    "print", "len", "range", "enumerate", "zip", "abs", "min", "max", "sum", "str", "int", "float", "bool",
    "__name__",
];

/// Builtin exception type names, usable in `except` clauses, `raise`, and
/// as base classes for user exceptions.
pub const EXCEPTION_NAMES: &[&str] = &[
    "Exception",
    "ValueError",
    "TypeError",
    "IndexError",
    "KeyError",
    "ZeroDivisionError",
    "AttributeError",
    "NameError",
    "OverflowError",
    "RuntimeError",
    "StopIteration",
    "AssertionError",
    "TimeoutError",
    "CancelledError",
];

/// Resolves all names in `module`, mutating identifiers in place.
pub fn resolve(module: &mut Module, interner: &Interner) -> Result<(), Vec<CompileError>> {
    let builtins: AHashSet<&str> = BUILTIN_NAMES.iter().chain(EXCEPTION_NAMES).copied().collect();
    let mut resolver = Resolver {
        interner,
        diags: Diagnostics::new(),
        globals: IndexMap::new(),
        scopes: Vec::new(),
        imported: AHashSet::new(),
        class_names: AHashSet::new(),
        builtins,
        module_locals: 0,
    };
    resolver.collect_module_bindings(&module.body);
    for stmt in &mut module.body {
        resolver.stmt(stmt);
    }
    module.nglobals = resolver.globals.len() as u32;
    module.module_locals = resolver.module_locals;
    resolver.diags.finish()
}

struct Scope {
    bound: AHashMap<StringId, u32>,
    next_slot: u32,
    captures: Vec<(StringId, Slot)>,
    capture_index: AHashMap<StringId, u32>,
    /// Names declared `global` in this function.
    global_decls: AHashSet<StringId>,
    /// Comprehension shadow stack: (name, shadow slot, previous binding).
    shadows: Vec<(StringId, u32, Option<u32>)>,
}

impl Scope {
    fn new() -> Self {
        Self {
            bound: AHashMap::new(),
            next_slot: 0,
            captures: Vec::new(),
            capture_index: AHashMap::new(),
            global_decls: AHashSet::new(),
            shadows: Vec::new(),
        }
    }

    fn bind(&mut self, name: StringId) -> u32 {
        if let Some(slot) = self.bound.get(&name) {
            return *slot;
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        self.bound.insert(name, slot);
        slot
    }
}

struct Resolver<'a> {
    interner: &'a Interner,
    diags: Diagnostics,
    globals: IndexMap<StringId, u32>,
    scopes: Vec<Scope>,
    imported: AHashSet<StringId>,
    class_names: AHashSet<StringId>,
    builtins: AHashSet<&'a str>,
    /// Scratch locals used by module-level comprehensions.
    module_locals: u32,
}

impl Resolver<'_> {
    fn bind_global(&mut self, name: StringId) -> u32 {
        if let Some(slot) = self.globals.get(&name) {
            return *slot;
        }
        let slot = self.globals.len() as u32;
        self.globals.insert(name, slot);
        slot
    }

    /// Pre-binds every module-level name so forward references resolve.
    fn collect_module_bindings(&mut self, body: &[Stmt]) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Assign { target, .. } | StmtKind::AugAssign { target, .. } => {
                    self.collect_target_global(target);
                }
                StmtKind::For { target, .. } => self.collect_target_global(target),
                StmtKind::FuncDef(def) => {
                    self.bind_global(def.name.name);
                }
                StmtKind::ClassDef(def) => {
                    self.class_names.insert(def.name.name);
                }
                StmtKind::Import { module } => {
                    self.imported.insert(*module);
                }
                StmtKind::With { items, .. } => {
                    for item in items {
                        if let Some(binding) = &item.binding {
                            self.bind_global(binding.name);
                        }
                    }
                }
                StmtKind::If { body, orelse, .. } => {
                    self.collect_module_bindings(body);
                    self.collect_module_bindings(orelse);
                }
                StmtKind::While { body, .. } => self.collect_module_bindings(body),
                StmtKind::Try { body, handlers, finally } => {
                    self.collect_module_bindings(body);
                    for handler in handlers {
                        if let Some(binding) = &handler.binding {
                            self.bind_global(binding.name);
                        }
                        self.collect_module_bindings(&handler.body);
                    }
                    self.collect_module_bindings(finally);
                }
                _ => {}
            }
        }
    }

    fn collect_target_global(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Name(name) => {
                self.bind_global(name.name);
            }
            AssignTarget::Tuple(names) => {
                for name in names {
                    self.bind_global(name.name);
                }
            }
            AssignTarget::Subscript { .. } | AssignTarget::Attribute { .. } => {}
        }
    }

    /// Collects names bound inside a function body (Python's "assigned
    /// anywhere in the block means local" rule).
    fn collect_local_bindings(&mut self, body: &[Stmt]) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Assign { target, .. } | StmtKind::AugAssign { target, .. } => {
                    self.collect_target_local(target);
                }
                StmtKind::For { target, body, .. } => {
                    self.collect_target_local(target);
                    self.collect_local_bindings(body);
                }
                StmtKind::FuncDef(def) => {
                    let scope = self.scopes.last_mut().expect("inside function");
                    scope.bind(def.name.name);
                }
                StmtKind::ClassDef(def) => {
                    self.diags.error(
                        ErrorKind::UnsupportedFeatureError,
                        "class definitions inside functions are not supported",
                        def.range,
                    );
                }
                StmtKind::Global { names } => {
                    for name in names {
                        self.bind_global(name.name);
                        let scope = self.scopes.last_mut().expect("inside function");
                        scope.global_decls.insert(name.name);
                    }
                }
                StmtKind::If { body, orelse, .. } => {
                    self.collect_local_bindings(body);
                    self.collect_local_bindings(orelse);
                }
                StmtKind::While { body, .. } => self.collect_local_bindings(body),
                StmtKind::Try { body, handlers, finally } => {
                    self.collect_local_bindings(body);
                    for handler in handlers {
                        if let Some(binding) = &handler.binding {
                            let scope = self.scopes.last_mut().expect("inside function");
                            scope.bind(binding.name);
                        }
                        self.collect_local_bindings(&handler.body);
                    }
                    self.collect_local_bindings(finally);
                }
                StmtKind::With { items, body } => {
                    for item in items {
                        if let Some(binding) = &item.binding {
                            let scope = self.scopes.last_mut().expect("inside function");
                            scope.bind(binding.name);
                        }
                    }
                    self.collect_local_bindings(body);
                }
                _ => {}
            }
        }
    }

    fn collect_target_local(&mut self, target: &AssignTarget) {
        let scope = self.scopes.last_mut().expect("inside function");
        match target {
            AssignTarget::Name(name) => {
                if !scope.global_decls.contains(&name.name) {
                    scope.bind(name.name);
                }
            }
            AssignTarget::Tuple(names) => {
                for name in names {
                    scope.bind(name.name);
                }
            }
            AssignTarget::Subscript { .. } | AssignTarget::Attribute { .. } => {}
        }
    }

    /// Resolves one name reference, registering captures along the way.
    fn resolve_name(&mut self, ident: &mut Identifier) {
        let name = ident.name;
        // Comprehension shadows and ordinary locals of the innermost
        // function scope.
        if let Some(scope) = self.scopes.last() {
            if let Some((_, slot, _)) = scope.shadows.iter().rev().find(|(n, _, _)| *n == name) {
                ident.slot = Some(Slot::Local(*slot));
                return;
            }
            if !scope.global_decls.contains(&name)
                && let Some(slot) = scope.bound.get(&name)
            {
                ident.slot = Some(Slot::Local(*slot));
                return;
            }
        }
        // Enclosing function scopes: a hit here becomes a capture chain
        // through every intervening function.
        if self.scopes.len() > 1 {
            for depth in (0..self.scopes.len() - 1).rev() {
                let hit = self.scopes[depth].bound.get(&name).copied();
                if let Some(mut slot) = hit.map(Slot::Local) {
                    for inner in depth + 1..self.scopes.len() {
                        let scope = &mut self.scopes[inner];
                        let index = match scope.capture_index.get(&name) {
                            Some(index) => *index,
                            None => {
                                let index = scope.captures.len() as u32;
                                scope.captures.push((name, slot));
                                scope.capture_index.insert(name, index);
                                index
                            }
                        };
                        slot = Slot::Capture(index);
                    }
                    ident.slot = Some(slot);
                    return;
                }
            }
        }
        if let Some(slot) = self.globals.get(&name) {
            ident.slot = Some(Slot::Global(*slot));
            return;
        }
        // Imported modules, class names, and builtins resolve through the
        // inferencer; no slot is assigned.
        if self.imported.contains(&name) || self.class_names.contains(&name) {
            return;
        }
        if self.builtins.contains(self.interner.get(name)) {
            return;
        }
        self.diags.error(
            ErrorKind::NameError,
            format!("name '{}' is not defined", self.interner.get(name)),
            ident.range,
        );
    }

    fn assign_name(&mut self, ident: &mut Identifier) {
        let name = ident.name;
        if let Some(scope) = self.scopes.last() {
            if scope.global_decls.contains(&name) {
                let slot = self.bind_global(name);
                ident.slot = Some(Slot::Global(slot));
                return;
            }
            let slot = self.scopes.last_mut().expect("inside function").bind(name);
            ident.slot = Some(Slot::Local(slot));
            return;
        }
        let slot = self.bind_global(name);
        ident.slot = Some(Slot::Global(slot));
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
                self.expr(value);
                self.target(target);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test);
                self.stmts(body);
                self.stmts(orelse);
            }
            StmtKind::While { test, body } => {
                self.expr(test);
                self.stmts(body);
            }
            StmtKind::For { target, iter, body } => {
                self.expr(iter);
                self.target(target);
                self.stmts(body);
            }
            StmtKind::FuncDef(def) => {
                // The function's own binding resolves in the enclosing
                // scope; decorators as well.
                for decorator in &mut def.decorators {
                    self.expr(decorator);
                }
                self.assign_name(&mut def.name);
                self.function(def);
            }
            StmtKind::ClassDef(def) => self.class(def),
            StmtKind::Try { body, handlers, finally } => {
                self.stmts(body);
                for handler in handlers {
                    if let Some(exc_type) = &mut handler.exc_type {
                        self.resolve_exception_name(exc_type);
                    }
                    if let Some(binding) = &mut handler.binding {
                        self.assign_name(binding);
                    }
                    self.stmts(&mut handler.body);
                }
                self.stmts(finally);
            }
            StmtKind::With { items, body } => {
                for item in items {
                    self.expr(&mut item.context);
                    if let Some(binding) = &mut item.binding {
                        self.assign_name(binding);
                    }
                }
                self.stmts(body);
            }
            StmtKind::Import { .. } | StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Global { names } => {
                // Declarations were registered during collection; nothing
                // to resolve at module level.
                if self.scopes.is_empty() {
                    for name in names.iter() {
                        self.diags.error(
                            ErrorKind::UnsupportedFeatureError,
                            "global declaration outside a function",
                            name.range,
                        );
                    }
                }
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test);
                if let Some(msg) = msg {
                    self.expr(msg);
                }
            }
            StmtKind::Raise { exc } => {
                if let Some(exc) = exc {
                    self.expr(exc);
                }
            }
        }
    }

    /// Exception names in `except` clauses may be builtins or user
    /// exception classes.
    fn resolve_exception_name(&mut self, ident: &mut Identifier) {
        let text = self.interner.get(ident.name);
        if EXCEPTION_NAMES.contains(&text) || self.class_names.contains(&ident.name) {
            return;
        }
        self.diags.error(
            ErrorKind::NameError,
            format!("unknown exception type '{text}'"),
            ident.range,
        );
    }

    fn stmts(&mut self, stmts: &mut [Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn target(&mut self, target: &mut AssignTarget) {
        match target {
            AssignTarget::Name(name) => self.assign_name(name),
            AssignTarget::Tuple(names) => {
                for name in names {
                    self.assign_name(name);
                }
            }
            AssignTarget::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            AssignTarget::Attribute { value, .. } => self.expr(value),
        }
    }

    fn function(&mut self, def: &mut FunctionDef) {
        for param in &mut def.params {
            if let Some(default) = &mut param.default {
                // Defaults evaluate in the enclosing scope at definition
                // time.
                self.expr(default);
            }
        }
        self.scopes.push(Scope::new());
        for param in &mut def.params {
            let slot = self.scopes.last_mut().expect("just pushed").bind(param.name.name);
            param.name.slot = Some(Slot::Local(slot));
        }
        self.collect_local_bindings(&def.body);
        self.stmts(&mut def.body);
        def.is_generator = body_has_yield(&def.body);
        let scope = self.scopes.pop().expect("scope balance");
        def.scope = ScopeInfo {
            nlocals: scope.next_slot,
            captures: scope.captures,
        };
    }

    fn class(&mut self, def: &mut ClassDef) {
        if let Some(base) = &def.base
            && !self.class_names.contains(&base.name)
            && !EXCEPTION_NAMES.contains(&self.interner.get(base.name))
        {
            self.diags.error(
                ErrorKind::NameError,
                format!("unknown base class '{}'", self.interner.get(base.name)),
                base.range,
            );
        }
        for method in &mut def.methods {
            for decorator in &mut method.decorators {
                self.expr(decorator);
            }
            self.function(method);
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Name(ident) => self.resolve_name(ident),
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Set(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::Dict(pairs) => {
                for (key, value) in pairs {
                    self.expr(key);
                    self.expr(value);
                }
            }
            ExprKind::FString(parts) => {
                for part in parts {
                    if let FStringPart::Expr(inner) = part {
                        self.expr(inner);
                    }
                }
            }
            ExprKind::Bin { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Bool { values, .. } => {
                for value in values {
                    self.expr(value);
                }
            }
            ExprKind::Compare { left, rest } => {
                self.expr(left);
                for (_, comparator) in rest {
                    self.expr(comparator);
                }
            }
            ExprKind::Call { func, args, star_arg } => {
                self.expr(func);
                for arg in args {
                    self.expr(arg);
                }
                if let Some(star) = star_arg {
                    self.expr(star);
                }
            }
            ExprKind::Attribute { value, .. } => self.expr(value),
            ExprKind::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            ExprKind::Slice { value, start, stop, step } => {
                self.expr(value);
                for bound in [start, stop, step].into_iter().flatten() {
                    self.expr(bound);
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                condition,
            } => {
                self.expr(iter);
                // The induction variable shadows only inside the
                // comprehension; module-level comprehensions get a
                // synthetic scope for it.
                let module_level = self.scopes.is_empty();
                if module_level {
                    self.scopes.push(Scope::new());
                }
                let scope = self.scopes.last_mut().expect("scope present");
                let shadow_slot = scope.next_slot;
                scope.next_slot += 1;
                let previous = scope.bound.get(&target.name).copied();
                scope.shadows.push((target.name, shadow_slot, previous));
                target.slot = Some(Slot::Local(shadow_slot));
                if let Some(condition) = condition {
                    self.expr(condition);
                }
                self.expr(element);
                let scope = self.scopes.last_mut().expect("scope present");
                scope.shadows.pop();
                if module_level {
                    let scope = self.scopes.pop().expect("synthetic scope");
                    self.module_locals = self.module_locals.max(scope.next_slot);
                }
            }
            ExprKind::Lambda(def) => self.function(def),
            ExprKind::Await(value) => self.expr(value),
            ExprKind::Yield(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
        }
    }
}

fn body_has_yield(body: &[Stmt]) -> bool {
    fn expr_has_yield(expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Yield(_) => true,
            ExprKind::Bin { left, right, .. } => expr_has_yield(left) || expr_has_yield(right),
            ExprKind::Unary { operand, .. } => expr_has_yield(operand),
            _ => false,
        }
    }
    body.iter().any(|stmt| match &stmt.kind {
        StmtKind::Expr(expr) => expr_has_yield(expr),
        StmtKind::Assign { value, .. } => expr_has_yield(value),
        StmtKind::Return(Some(expr)) => expr_has_yield(expr),
        StmtKind::If { body, orelse, .. } => body_has_yield(body) || body_has_yield(orelse),
        StmtKind::While { body, .. } | StmtKind::For { body, .. } => body_has_yield(body),
        StmtKind::Try { body, handlers, finally } => {
            body_has_yield(body) || handlers.iter().any(|h| body_has_yield(&h.body)) || body_has_yield(finally)
        }
        StmtKind::With { body, .. } => body_has_yield(body),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::resolve;
    use crate::{
        ast::{ExprKind, Slot, StmtKind},
        errors::ErrorKind,
        intern::Interner,
        parse::parse_source,
    };

    fn resolved(code: &str) -> (crate::ast::Module, Interner) {
        let mut interner = Interner::new();
        let mut module = parse_source(code, "main", 0, &mut interner).unwrap();
        resolve(&mut module, &interner).unwrap();
        (module, interner)
    }

    #[test]
    fn module_names_get_global_slots() {
        let (module, _) = resolved("x = 1\ny = x\n");
        assert_eq!(module.nglobals, 2);
        let StmtKind::Assign { value, .. } = &module.body[1].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Name(ident) = &value.kind else {
            panic!("expected name");
        };
        assert_eq!(ident.slot, Some(Slot::Global(0)));
    }

    #[test]
    fn captures_are_recorded() {
        let (module, interner) = resolved("def outer():\n    n = 3\n    def inner():\n        return n\n    return inner\n");
        let StmtKind::FuncDef(outer) = &module.body[0].kind else {
            panic!("expected function");
        };
        let StmtKind::FuncDef(inner) = &outer.body[1].kind else {
            panic!("expected nested function");
        };
        assert_eq!(inner.scope.captures.len(), 1);
        assert_eq!(interner.get(inner.scope.captures[0].0), "n");
        assert_eq!(inner.scope.captures[0].1, Slot::Local(0));
    }

    #[test]
    fn unresolved_name_is_name_error() {
        let mut interner = Interner::new();
        let mut module = parse_source("print(missing)\n", "main", 0, &mut interner).unwrap();
        let errors = resolve(&mut module, &interner).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::NameError);
    }

    #[test]
    fn comprehension_variable_is_isolated() {
        let (module, _) = resolved("x = 5\nys = [x * x for x in [1, 2]]\nprint(x)\n");
        // The comprehension target must not take over the module slot of x.
        let StmtKind::Expr(print_call) = &module.body[2].kind else {
            panic!("expected expression statement");
        };
        let ExprKind::Call { args, .. } = &print_call.kind else {
            panic!("expected call");
        };
        let ExprKind::Name(ident) = &args[0].kind else {
            panic!("expected name");
        };
        assert_eq!(ident.slot, Some(Slot::Global(0)));
    }
}
