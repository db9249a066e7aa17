//! Conversion from the ruff parse tree into pyrite's AST.
//!
//! `ruff_python_parser` produces the positioned tree; this pass narrows it
//! to the statically compilable subset. Constructs outside the subset
//! (keyword arguments, `**` unpacking, comprehensions other than list
//! comprehensions, `match`, walrus, `yield from`...) are reported as
//! `UnsupportedFeatureError` with the offending span rather than silently
//! miscompiled.

use num_bigint::BigInt;
use ruff_python_ast::{
    self as ast, Expr as AstExpr, InterpolatedStringElement, Number, Operator as AstOperator, Stmt as AstStmt,
};
use ruff_python_parser::parse_module;
use ruff_text_size::{Ranged, TextRange};

use crate::{
    ast::{
        AssignTarget, BinOp, BoolOp, ClassDef, CmpOp, CodeRange, ExceptHandler, Expr, ExprKind, FStringPart,
        FunctionDef, Identifier, Literal, Module, Param, ScopeInfo, Stmt, StmtKind, UnaryOp, WithItem,
    },
    errors::{CompileError, CompileResult, ErrorKind},
    intern::{Interner, StringId},
};

/// Parses one source file into a [`Module`].
pub fn parse_source(code: &str, module_name: &str, file: u32, interner: &mut Interner) -> CompileResult<Module> {
    let mut parser = Parser { file, interner };
    let parsed = parse_module(code).map_err(|e| {
        CompileError::new(
            ErrorKind::ParseError,
            e.to_string(),
            CodeRange::new(file, e.range().start().to_u32(), e.range().end().to_u32()),
        )
    })?;
    let body = parser.statements(parsed.into_syntax().body.to_vec())?;
    Ok(Module {
        name: parser.interner.intern(module_name),
        file,
        body,
        nglobals: 0,
        module_locals: 0,
    })
}

struct Parser<'a> {
    file: u32,
    interner: &'a mut Interner,
}

impl Parser<'_> {
    fn range(&self, range: TextRange) -> CodeRange {
        CodeRange::new(self.file, range.start().to_u32(), range.end().to_u32())
    }

    fn unsupported<T>(&self, what: &str, range: CodeRange) -> CompileResult<T> {
        Err(CompileError::new(
            ErrorKind::UnsupportedFeatureError,
            format!("{what} is not supported"),
            range,
        ))
    }

    fn intern(&mut self, s: &str) -> StringId {
        self.interner.intern(s)
    }

    fn identifier(&mut self, name: &str, range: TextRange) -> Identifier {
        let name = self.intern(name);
        Identifier::new(name, self.range(range))
    }

    fn statements(&mut self, stmts: Vec<AstStmt>) -> CompileResult<Vec<Stmt>> {
        stmts.into_iter().map(|stmt| self.statement(stmt)).collect()
    }

    fn statement(&mut self, stmt: AstStmt) -> CompileResult<Stmt> {
        match stmt {
            AstStmt::Expr(ast::StmtExpr { value, range, .. }) => {
                let expr = self.expression(*value)?;
                Ok(Stmt::new(StmtKind::Expr(expr), self.range(range)))
            }
            AstStmt::Assign(ast::StmtAssign { targets, value, range, .. }) => {
                let span = self.range(range);
                if targets.len() != 1 {
                    return self.unsupported("chained assignment", span);
                }
                let target = self.assign_target(targets.into_iter().next().expect("one target"))?;
                let value = self.expression(*value)?;
                Ok(Stmt::new(StmtKind::Assign { target, value }, span))
            }
            AstStmt::AugAssign(ast::StmtAugAssign { target, op, value, range, .. }) => {
                let span = self.range(range);
                let target = self.assign_target(*target)?;
                let op = self.bin_op(op, span)?;
                let value = self.expression(*value)?;
                Ok(Stmt::new(StmtKind::AugAssign { target, op, value }, span))
            }
            AstStmt::AnnAssign(ast::StmtAnnAssign { target, value, range, .. }) => {
                // The annotation has already served its purpose for field
                // declarations; for ordinary assignments the inferencer
                // re-reads it from the class table, so a plain assignment
                // remains. Bare declarations without a value become `pass`.
                let span = self.range(range);
                match value {
                    Some(value) => {
                        let target = self.assign_target(*target)?;
                        let value = self.expression(*value)?;
                        Ok(Stmt::new(StmtKind::Assign { target, value }, span))
                    }
                    None => Ok(Stmt::new(StmtKind::Pass, span)),
                }
            }
            AstStmt::Return(ast::StmtReturn { value, range, .. }) => {
                let value = value.map(|v| self.expression(*v)).transpose()?;
                Ok(Stmt::new(StmtKind::Return(value), self.range(range)))
            }
            AstStmt::If(ast::StmtIf {
                test,
                body,
                elif_else_clauses,
                range,
                ..
            }) => {
                let span = self.range(range);
                let test = self.expression(*test)?;
                let body = self.statements(body.to_vec())?;
                // elif chains fold into nested else-if statements.
                let mut orelse: Vec<Stmt> = Vec::new();
                for clause in elif_else_clauses.into_iter().rev() {
                    let clause_span = self.range(clause.range);
                    let clause_body = self.statements(clause.body.to_vec())?;
                    orelse = match clause.test {
                        Some(test) => {
                            let test = self.expression(test)?;
                            vec![Stmt::new(
                                StmtKind::If {
                                    test,
                                    body: clause_body,
                                    orelse,
                                },
                                clause_span,
                            )]
                        }
                        None => clause_body,
                    };
                }
                Ok(Stmt::new(StmtKind::If { test, body, orelse }, span))
            }
            AstStmt::While(ast::StmtWhile { test, body, orelse, range, .. }) => {
                let span = self.range(range);
                if !orelse.is_empty() {
                    return self.unsupported("while/else", span);
                }
                let test = self.expression(*test)?;
                let body = self.statements(body.to_vec())?;
                Ok(Stmt::new(StmtKind::While { test, body }, span))
            }
            AstStmt::For(ast::StmtFor {
                is_async,
                target,
                iter,
                body,
                orelse,
                range,
                ..
            }) => {
                let span = self.range(range);
                if is_async {
                    return self.unsupported("async for", span);
                }
                if !orelse.is_empty() {
                    return self.unsupported("for/else", span);
                }
                let target = self.assign_target(*target)?;
                let iter = self.expression(*iter)?;
                let body = self.statements(body.to_vec())?;
                Ok(Stmt::new(StmtKind::For { target, iter, body }, span))
            }
            AstStmt::FunctionDef(function) => {
                let span = self.range(function.range);
                let def = self.function_def(function)?;
                Ok(Stmt::new(StmtKind::FuncDef(def), span))
            }
            AstStmt::ClassDef(class) => {
                let span = self.range(class.range);
                let def = self.class_def(class)?;
                Ok(Stmt::new(StmtKind::ClassDef(def), span))
            }
            AstStmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                is_star,
                range,
                ..
            }) => {
                let span = self.range(range);
                if is_star {
                    return self.unsupported("except*", span);
                }
                if !orelse.is_empty() {
                    return self.unsupported("try/else", span);
                }
                let body = self.statements(body.to_vec())?;
                let handlers = handlers
                    .into_iter()
                    .map(|h| self.except_handler(h))
                    .collect::<CompileResult<Vec<_>>>()?;
                let finally = self.statements(finalbody.to_vec())?;
                Ok(Stmt::new(StmtKind::Try { body, handlers, finally }, span))
            }
            AstStmt::With(ast::StmtWith {
                is_async,
                items,
                body,
                range,
                ..
            }) => {
                let span = self.range(range);
                if is_async {
                    return self.unsupported("async with", span);
                }
                let items = items
                    .into_iter()
                    .map(|item| {
                        let context = self.expression(item.context_expr)?;
                        let binding = match item.optional_vars {
                            Some(expr) => match *expr {
                                AstExpr::Name(ast::ExprName { id, range, .. }) => {
                                    Some(self.identifier(id.as_str(), range))
                                }
                                other => return self.unsupported("destructuring with targets", self.range(other.range())),
                            },
                            None => None,
                        };
                        Ok(WithItem { context, binding })
                    })
                    .collect::<CompileResult<Vec<_>>>()?;
                let body = self.statements(body.to_vec())?;
                Ok(Stmt::new(StmtKind::With { items, body }, span))
            }
            AstStmt::Import(ast::StmtImport { names, range, .. }) => {
                let span = self.range(range);
                if names.len() != 1 {
                    return self.unsupported("multiple imports per statement", span);
                }
                let alias = names.into_iter().next().expect("one name");
                if alias.asname.is_some() {
                    return self.unsupported("import aliases", span);
                }
                let module = self.intern(alias.name.as_str());
                Ok(Stmt::new(StmtKind::Import { module }, span))
            }
            AstStmt::ImportFrom(import) => self.unsupported("from-imports", self.range(import.range)),
            AstStmt::Global(ast::StmtGlobal { names, range, .. }) => {
                let span = self.range(range);
                let names = names
                    .into_iter()
                    .map(|name| self.identifier(name.as_str(), name.range))
                    .collect();
                Ok(Stmt::new(StmtKind::Global { names }, span))
            }
            AstStmt::Nonlocal(stmt) => self.unsupported("nonlocal", self.range(stmt.range)),
            AstStmt::Assert(ast::StmtAssert { test, msg, range, .. }) => {
                let span = self.range(range);
                let test = self.expression(*test)?;
                let msg = msg.map(|m| self.expression(*m)).transpose()?;
                Ok(Stmt::new(StmtKind::Assert { test, msg }, span))
            }
            AstStmt::Raise(ast::StmtRaise { exc, cause, range, .. }) => {
                let span = self.range(range);
                if cause.is_some() {
                    return self.unsupported("raise ... from", span);
                }
                let exc = exc.map(|e| self.expression(*e)).transpose()?;
                Ok(Stmt::new(StmtKind::Raise { exc }, span))
            }
            AstStmt::Pass(pass) => Ok(Stmt::new(StmtKind::Pass, self.range(pass.range))),
            AstStmt::Break(stmt) => Ok(Stmt::new(StmtKind::Break, self.range(stmt.range))),
            AstStmt::Continue(stmt) => Ok(Stmt::new(StmtKind::Continue, self.range(stmt.range))),
            AstStmt::Delete(stmt) => self.unsupported("del", self.range(stmt.range)),
            AstStmt::TypeAlias(stmt) => self.unsupported("type aliases", self.range(stmt.range)),
            AstStmt::Match(stmt) => self.unsupported("match statements", self.range(stmt.range)),
            AstStmt::IpyEscapeCommand(stmt) => self.unsupported("IPython escapes", self.range(stmt.range)),
        }
    }

    fn function_def(&mut self, function: ast::StmtFunctionDef) -> CompileResult<FunctionDef> {
        let span = self.range(function.range);
        if function.type_params.is_some() {
            return self.unsupported("generic type parameters", span);
        }
        let parameters = &function.parameters;
        if parameters.vararg.is_some() || parameters.kwarg.is_some() {
            return self.unsupported("*args/**kwargs parameters", span);
        }
        if !parameters.posonlyargs.is_empty() || !parameters.kwonlyargs.is_empty() {
            return self.unsupported("positional-only/keyword-only parameters", span);
        }
        let mut params = Vec::with_capacity(parameters.args.len());
        for param in &parameters.args {
            let name = self.identifier(param.parameter.name.id.as_str(), param.parameter.name.range);
            let annotation = param
                .parameter
                .annotation
                .clone()
                .map(|a| self.expression(*a))
                .transpose()?;
            let default = param.default.clone().map(|d| self.expression(*d)).transpose()?;
            params.push(Param { name, annotation, default });
        }
        let name = self.identifier(function.name.id.as_str(), function.name.range);
        let returns = function.returns.map(|r| self.expression(*r)).transpose()?;
        let body = self.statements(function.body.to_vec())?;
        let decorators = function
            .decorator_list
            .into_iter()
            .map(|d| self.expression(d.expression))
            .collect::<CompileResult<Vec<_>>>()?;
        Ok(FunctionDef {
            name,
            params,
            body,
            returns,
            decorators,
            is_async: function.is_async,
            is_generator: false,
            scope: ScopeInfo::default(),
            range: span,
        })
    }

    fn class_def(&mut self, class: ast::StmtClassDef) -> CompileResult<ClassDef> {
        let span = self.range(class.range);
        if class.type_params.is_some() {
            return self.unsupported("generic type parameters", span);
        }
        let name = self.identifier(class.name.id.as_str(), class.name.range);
        let base = match class.arguments {
            Some(arguments) => {
                if !arguments.keywords.is_empty() {
                    return self.unsupported("class keyword arguments", span);
                }
                let mut bases = arguments.args.into_vec();
                if bases.len() > 1 {
                    return self.unsupported("multiple inheritance", span);
                }
                match bases.pop() {
                    Some(AstExpr::Name(ast::ExprName { id, range, .. })) => {
                        Some(self.identifier(id.as_str(), range))
                    }
                    Some(other) => return self.unsupported("computed base classes", self.range(other.range())),
                    None => None,
                }
            }
            None => None,
        };
        let mut methods = Vec::new();
        let mut field_decls = Vec::new();
        for stmt in class.body {
            match stmt {
                AstStmt::FunctionDef(function) => methods.push(self.function_def(function)?),
                AstStmt::AnnAssign(ast::StmtAnnAssign { target, annotation, .. }) => {
                    if let AstExpr::Name(ast::ExprName { id, .. }) = *target {
                        let field = self.intern(id.as_str());
                        field_decls.push((field, self.expression(*annotation)?));
                    }
                }
                // A docstring expression or `pass` contributes nothing.
                AstStmt::Expr(_) | AstStmt::Pass(_) => {}
                other => return self.unsupported("class-level statements", self.range(other.range())),
            }
        }
        Ok(ClassDef {
            name,
            base,
            methods,
            field_decls,
            range: span,
        })
    }

    fn except_handler(&mut self, handler: ast::ExceptHandler) -> CompileResult<ExceptHandler> {
        let ast::ExceptHandler::ExceptHandler(handler) = handler;
        let span = self.range(handler.range);
        let exc_type = match handler.type_ {
            Some(type_expr) => match *type_expr {
                AstExpr::Name(ast::ExprName { id, range, .. }) => Some(self.identifier(id.as_str(), range)),
                AstExpr::Tuple(_) => return self.unsupported("exception type tuples", span),
                other => return self.unsupported("computed exception types", self.range(other.range())),
            },
            None => None,
        };
        let binding = handler
            .name
            .map(|name| self.identifier(name.id.as_str(), name.range));
        let body = self.statements(handler.body.to_vec())?;
        Ok(ExceptHandler { exc_type, binding, body })
    }

    fn assign_target(&mut self, expr: AstExpr) -> CompileResult<AssignTarget> {
        match expr {
            AstExpr::Name(ast::ExprName { id, range, .. }) => {
                Ok(AssignTarget::Name(self.identifier(id.as_str(), range)))
            }
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(AssignTarget::Subscript {
                value: self.expression(*value)?,
                index: self.expression(*slice)?,
            }),
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => Ok(AssignTarget::Attribute {
                value: self.expression(*value)?,
                attr: self.intern(attr.id.as_str()),
            }),
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => {
                let names = elts
                    .into_iter()
                    .map(|elt| match elt {
                        AstExpr::Name(ast::ExprName { id, range, .. }) => Ok(self.identifier(id.as_str(), range)),
                        other => self.unsupported("nested unpacking targets", self.range(other.range())),
                    })
                    .collect::<CompileResult<Vec<_>>>()?;
                Ok(AssignTarget::Tuple(names))
            }
            other => self.unsupported("assignment target", self.range(other.range())),
        }
    }

    fn bin_op(&self, op: AstOperator, span: CodeRange) -> CompileResult<BinOp> {
        match op {
            AstOperator::Add => Ok(BinOp::Add),
            AstOperator::Sub => Ok(BinOp::Sub),
            AstOperator::Mult => Ok(BinOp::Mul),
            AstOperator::Div => Ok(BinOp::Div),
            AstOperator::FloorDiv => Ok(BinOp::FloorDiv),
            AstOperator::Mod => Ok(BinOp::Mod),
            AstOperator::Pow => Ok(BinOp::Pow),
            _ => self.unsupported("bitwise/matrix operators", span),
        }
    }

    fn expression(&mut self, expr: AstExpr) -> CompileResult<Expr> {
        let span = self.range(expr.range());
        match expr {
            AstExpr::NumberLiteral(ast::ExprNumberLiteral { value, .. }) => {
                let literal = match value {
                    Number::Int(i) => match i.as_i64() {
                        Some(v) => Literal::Int(v),
                        None => {
                            let big = parse_int_literal(&i.to_string()).ok_or_else(|| {
                                CompileError::new(ErrorKind::ParseError, format!("invalid integer literal: {i}"), span)
                            })?;
                            Literal::BigInt(big)
                        }
                    },
                    Number::Float(f) => Literal::Float(f),
                    Number::Complex { .. } => return self.unsupported("complex literals", span),
                };
                Ok(Expr::new(ExprKind::Literal(literal), span))
            }
            AstExpr::StringLiteral(ast::ExprStringLiteral { value, .. }) => {
                let id = self.intern(&value.to_string());
                Ok(Expr::new(ExprKind::Literal(Literal::Str(id)), span))
            }
            AstExpr::BytesLiteral(ast::ExprBytesLiteral { value, .. }) => {
                let bytes: Vec<u8> = value.bytes().collect();
                Ok(Expr::new(ExprKind::Literal(Literal::Bytes(bytes)), span))
            }
            AstExpr::BooleanLiteral(ast::ExprBooleanLiteral { value, .. }) => {
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(value)), span))
            }
            AstExpr::NoneLiteral(_) => Ok(Expr::new(ExprKind::Literal(Literal::None), span)),
            AstExpr::EllipsisLiteral(_) => self.unsupported("ellipsis", span),
            AstExpr::Name(ast::ExprName { id, range, .. }) => {
                let ident = self.identifier(id.as_str(), range);
                Ok(Expr::new(ExprKind::Name(ident), span))
            }
            AstExpr::List(ast::ExprList { elts, .. }) => {
                let items = self.expressions(elts)?;
                Ok(Expr::new(ExprKind::List(items), span))
            }
            AstExpr::Tuple(ast::ExprTuple { elts, .. }) => {
                let items = self.expressions(elts)?;
                Ok(Expr::new(ExprKind::Tuple(items), span))
            }
            AstExpr::Set(ast::ExprSet { elts, .. }) => {
                let items = self.expressions(elts)?;
                Ok(Expr::new(ExprKind::Set(items), span))
            }
            AstExpr::Dict(ast::ExprDict { items, .. }) => {
                let mut pairs = Vec::with_capacity(items.len());
                for item in items {
                    let Some(key) = item.key else {
                        return self.unsupported("dict unpacking", span);
                    };
                    pairs.push((self.expression(key)?, self.expression(item.value)?));
                }
                Ok(Expr::new(ExprKind::Dict(pairs), span))
            }
            AstExpr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                let op = match op {
                    ast::BoolOp::And => BoolOp::And,
                    ast::BoolOp::Or => BoolOp::Or,
                };
                let values = self.expressions(values)?;
                Ok(Expr::new(ExprKind::Bool { op, values }, span))
            }
            AstExpr::BinOp(ast::ExprBinOp { left, op, right, .. }) => {
                let op = self.bin_op(op, span)?;
                let left = Box::new(self.expression(*left)?);
                let right = Box::new(self.expression(*right)?);
                Ok(Expr::new(ExprKind::Bin { op, left, right }, span))
            }
            AstExpr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
                let operand = self.expression(*operand)?;
                match op {
                    ast::UnaryOp::USub => Ok(Expr::new(
                        ExprKind::Unary {
                            op: UnaryOp::Neg,
                            operand: Box::new(operand),
                        },
                        span,
                    )),
                    ast::UnaryOp::Not => Ok(Expr::new(
                        ExprKind::Unary {
                            op: UnaryOp::Not,
                            operand: Box::new(operand),
                        },
                        span,
                    )),
                    ast::UnaryOp::UAdd => Ok(operand),
                    ast::UnaryOp::Invert => self.unsupported("bitwise inversion", span),
                }
            }
            AstExpr::Compare(ast::ExprCompare {
                left, ops, comparators, ..
            }) => {
                let left = Box::new(self.expression(*left)?);
                let mut rest = Vec::with_capacity(ops.len());
                for (op, comparator) in ops.iter().zip(comparators.into_vec()) {
                    let op = match op {
                        ast::CmpOp::Eq => CmpOp::Eq,
                        ast::CmpOp::NotEq => CmpOp::Ne,
                        ast::CmpOp::Lt => CmpOp::Lt,
                        ast::CmpOp::LtE => CmpOp::Le,
                        ast::CmpOp::Gt => CmpOp::Gt,
                        ast::CmpOp::GtE => CmpOp::Ge,
                        ast::CmpOp::In => CmpOp::In,
                        ast::CmpOp::NotIn => CmpOp::NotIn,
                        ast::CmpOp::Is | ast::CmpOp::IsNot => {
                            return self.unsupported("identity comparisons", span);
                        }
                    };
                    rest.push((op, self.expression(comparator)?));
                }
                Ok(Expr::new(ExprKind::Compare { left, rest }, span))
            }
            AstExpr::Call(ast::ExprCall { func, arguments, .. }) => {
                if !arguments.keywords.is_empty() {
                    return self.unsupported("keyword arguments", span);
                }
                let mut args = Vec::new();
                let mut star_arg = None;
                for arg in arguments.args.into_vec() {
                    match arg {
                        AstExpr::Starred(ast::ExprStarred { value, range, .. }) => {
                            if star_arg.is_some() || !args.is_empty() {
                                return self.unsupported("mixed star arguments", self.range(range));
                            }
                            star_arg = Some(Box::new(self.expression(*value)?));
                        }
                        other => {
                            if star_arg.is_some() {
                                return self.unsupported("arguments after *", span);
                            }
                            args.push(self.expression(other)?);
                        }
                    }
                }
                let func = Box::new(self.expression(*func)?);
                Ok(Expr::new(ExprKind::Call { func, args, star_arg }, span))
            }
            AstExpr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                let value = Box::new(self.expression(*value)?);
                let attr = self.intern(attr.id.as_str());
                Ok(Expr::new(ExprKind::Attribute { value, attr }, span))
            }
            AstExpr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                let value = Box::new(self.expression(*value)?);
                match *slice {
                    AstExpr::Slice(ast::ExprSlice { lower, upper, step, .. }) => {
                        let start = lower.map(|e| self.expression(*e)).transpose()?.map(Box::new);
                        let stop = upper.map(|e| self.expression(*e)).transpose()?.map(Box::new);
                        let step = step.map(|e| self.expression(*e)).transpose()?.map(Box::new);
                        Ok(Expr::new(ExprKind::Slice { value, start, stop, step }, span))
                    }
                    index => {
                        let index = Box::new(self.expression(index)?);
                        Ok(Expr::new(ExprKind::Subscript { value, index }, span))
                    }
                }
            }
            AstExpr::If(ast::ExprIf { test, body, orelse, .. }) => {
                let test = Box::new(self.expression(*test)?);
                let body = Box::new(self.expression(*body)?);
                let orelse = Box::new(self.expression(*orelse)?);
                Ok(Expr::new(ExprKind::IfExp { test, body, orelse }, span))
            }
            AstExpr::ListComp(ast::ExprListComp { elt, generators, .. }) => {
                if generators.len() != 1 {
                    return self.unsupported("nested comprehensions", span);
                }
                let generator = generators.into_iter().next().expect("one generator");
                if generator.is_async {
                    return self.unsupported("async comprehensions", span);
                }
                if generator.ifs.len() > 1 {
                    return self.unsupported("multiple comprehension conditions", span);
                }
                let target = match generator.target {
                    AstExpr::Name(ast::ExprName { id, range, .. }) => self.identifier(id.as_str(), range),
                    other => return self.unsupported("destructuring comprehension targets", self.range(other.range())),
                };
                let iter = Box::new(self.expression(generator.iter)?);
                let condition = generator
                    .ifs
                    .into_iter()
                    .next()
                    .map(|c| self.expression(c))
                    .transpose()?
                    .map(Box::new);
                let element = Box::new(self.expression(*elt)?);
                Ok(Expr::new(
                    ExprKind::ListComp {
                        element,
                        target,
                        iter,
                        condition,
                    },
                    span,
                ))
            }
            AstExpr::SetComp(_) | AstExpr::DictComp(_) | AstExpr::Generator(_) => {
                self.unsupported("set/dict/generator comprehensions", span)
            }
            AstExpr::Lambda(ast::ExprLambda { parameters, body, range, .. }) => {
                let mut params = Vec::new();
                if let Some(parameters) = parameters {
                    if parameters.vararg.is_some() || parameters.kwarg.is_some() {
                        return self.unsupported("*args/**kwargs parameters", span);
                    }
                    for param in &parameters.args {
                        let name = self.identifier(param.parameter.name.id.as_str(), param.parameter.name.range);
                        let default = param.default.clone().map(|d| self.expression(*d)).transpose()?;
                        params.push(Param {
                            name,
                            annotation: None,
                            default,
                        });
                    }
                }
                let body_span = self.range(body.range());
                let body_expr = self.expression(*body)?;
                let name = self.identifier("<lambda>", range);
                Ok(Expr::new(
                    ExprKind::Lambda(Box::new(FunctionDef {
                        name,
                        params,
                        body: vec![Stmt::new(StmtKind::Return(Some(body_expr)), body_span)],
                        returns: None,
                        decorators: Vec::new(),
                        is_async: false,
                        is_generator: false,
                        scope: ScopeInfo::default(),
                        range: span,
                    })),
                    span,
                ))
            }
            AstExpr::Await(ast::ExprAwait { value, .. }) => {
                let value = Box::new(self.expression(*value)?);
                Ok(Expr::new(ExprKind::Await(value), span))
            }
            AstExpr::Yield(ast::ExprYield { value, .. }) => {
                let value = value.map(|v| self.expression(*v)).transpose()?.map(Box::new);
                Ok(Expr::new(ExprKind::Yield(value), span))
            }
            AstExpr::YieldFrom(_) => self.unsupported("yield from", span),
            AstExpr::FString(ast::ExprFString { value, .. }) => {
                let mut parts = Vec::new();
                for part in &value {
                    match part {
                        ast::FStringPart::Literal(lit) => {
                            let text = lit.value.to_string();
                            if !text.is_empty() {
                                let id = self.intern(&text);
                                parts.push(FStringPart::Literal(id));
                            }
                        }
                        ast::FStringPart::FString(fstring) => {
                            for element in &fstring.elements {
                                parts.push(self.fstring_element(element, span)?);
                            }
                        }
                    }
                }
                Ok(Expr::new(ExprKind::FString(parts), span))
            }
            AstExpr::Named(named) => self.unsupported("walrus assignment", self.range(named.range)),
            AstExpr::Starred(starred) => self.unsupported("star expressions here", self.range(starred.range)),
            AstExpr::Slice(slice) => self.unsupported("bare slice expressions", self.range(slice.range)),
            other => self.unsupported("this expression form", self.range(other.range())),
        }
    }

    fn fstring_element(&mut self, element: &InterpolatedStringElement, span: CodeRange) -> CompileResult<FStringPart> {
        match element {
            InterpolatedStringElement::Literal(lit) => {
                let id = self.intern(&lit.value.to_string());
                Ok(FStringPart::Literal(id))
            }
            InterpolatedStringElement::Interpolation(interp) => {
                if interp.format_spec.is_some() || interp.debug_text.is_some() {
                    return self.unsupported("f-string format specs", span);
                }
                let expr = self.expression((*interp.expression).clone())?;
                Ok(FStringPart::Expr(expr))
            }
        }
    }

    fn expressions(&mut self, exprs: Vec<AstExpr>) -> CompileResult<Vec<Expr>> {
        exprs.into_iter().map(|e| self.expression(e)).collect()
    }
}

/// Parses an integer literal of any radix (`0x`, `0o`, `0b`, underscores)
/// into a big integer.
fn parse_int_literal(text: &str) -> Option<BigInt> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    let (digits, radix) = if let Some(hex) = cleaned.strip_prefix("0x").or_else(|| cleaned.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(oct) = cleaned.strip_prefix("0o").or_else(|| cleaned.strip_prefix("0O")) {
        (oct, 8)
    } else if let Some(bin) = cleaned.strip_prefix("0b").or_else(|| cleaned.strip_prefix("0B")) {
        (bin, 2)
    } else {
        (cleaned.as_str(), 10)
    };
    BigInt::parse_bytes(digits.as_bytes(), radix)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{parse_int_literal, parse_source};
    use crate::{
        ast::{ExprKind, Literal, StmtKind},
        errors::ErrorKind,
        intern::Interner,
    };

    #[test]
    fn parses_simple_module() {
        let mut interner = Interner::new();
        let module = parse_source("x = 1\nprint(x)\n", "main", 0, &mut interner).unwrap();
        assert_eq!(module.body.len(), 2);
        let StmtKind::Assign { value, .. } = &module.body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Literal(Literal::Int(1))));
    }

    #[test]
    fn rejects_walrus() {
        let mut interner = Interner::new();
        let err = parse_source("if (n := 10) > 5:\n    pass\n", "main", 0, &mut interner).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedFeatureError);
    }

    #[test]
    fn elif_chains_nest() {
        let mut interner = Interner::new();
        let module = parse_source("if a:\n    pass\nelif b:\n    pass\nelse:\n    pass\n", "main", 0, &mut interner)
            .unwrap();
        let StmtKind::If { orelse, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        assert!(matches!(orelse[0].kind, StmtKind::If { .. }));
    }

    #[test]
    fn int_literal_radixes() {
        assert_eq!(parse_int_literal("0xff").unwrap(), 255.into());
        assert_eq!(parse_int_literal("1_000").unwrap(), 1000.into());
        assert_eq!(parse_int_literal("0b101").unwrap(), 5.into());
    }
}
