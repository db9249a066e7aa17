//! Expression and statement-body lowering for [`FnLowerer`].
//!
//! Call dispatch (builtins, methods, modules, closures, async) and loop
//! lowering live in the `calls` submodule. No reference-count ops are
//! emitted here; the balancing pass in `ir` derives them from the
//! ownership metadata on each op.

pub(super) mod calls;

use super::{Cleanup, FnLowerer, bin_result};
use crate::{
    ast::{
        AssignTarget, BinOp, BoolOp, CmpOp, CodeRange, ExceptHandler, Expr, ExprKind, FStringPart, Identifier,
        Literal, Slot, Stmt, WithItem,
    },
    comptime::{self, Const},
    errors::{CompileResult, ErrorKind},
    ir::{Op, RuntimeFn, Terminator, ValueId},
    types::{ClassId, Ty},
};

pub(super) const SLICE_MISSING: i64 = i64::MIN;

impl<'p, 'a> FnLowerer<'p, 'a> {
    /// Lowers one expression to a value, folding comptime-constant
    /// subtrees first.
    pub(super) fn expr(&mut self, e: &'a Expr) -> CompileResult<(ValueId, Ty)> {
        match comptime::fold(e, self.interner()) {
            Ok(Some(c)) => {
                if let Some(result) = self.try_emit_const(&c) {
                    return Ok(result);
                }
            }
            Ok(None) => {}
            Err(error) => {
                // Comptime failures are hard errors, reported once in
                // the emit pass.
                if !self.collecting {
                    return Err(error);
                }
            }
        }
        self.expr_uncached(e)
    }

    /// Emits a folded constant, unless its shape cannot be represented
    /// directly (mixed or nested sequences stay runtime literals).
    fn try_emit_const(&mut self, c: &Const) -> Option<(ValueId, Ty)> {
        fn scalar(c: &Const) -> bool {
            matches!(
                c,
                Const::None | Const::Bool(_) | Const::Int(_) | Const::Float(_) | Const::Str(_)
            )
        }
        match c {
            Const::List(items) => {
                let ty = c.ty();
                let Ty::FixedArr(elem, _) = &ty else {
                    return None;
                };
                if **elem == Ty::Dyn || !items.iter().all(scalar) {
                    return None;
                }
                let dst = self.val(ty.clone());
                self.push(Op::Const { dst, value: c.clone() });
                Some((dst, ty))
            }
            Const::Tuple(items) => {
                if !items.iter().all(scalar) {
                    return None;
                }
                let ty = c.ty();
                let dst = self.val(ty.clone());
                self.push(Op::Const { dst, value: c.clone() });
                Some((dst, ty))
            }
            _ => {
                let ty = c.ty();
                let dst = self.val(ty.clone());
                self.push(Op::Const { dst, value: c.clone() });
                Some((dst, ty))
            }
        }
    }

    fn expr_uncached(&mut self, e: &'a Expr) -> CompileResult<(ValueId, Ty)> {
        match &e.kind {
            ExprKind::Literal(literal) => self.lower_literal(literal, e.range),
            ExprKind::Name(ident) => self.load_name(ident, e.range),
            ExprKind::List(items) => self.lower_list_literal(items),
            ExprKind::Tuple(items) => self.lower_tuple_literal(items),
            ExprKind::Set(items) => self.lower_set_literal(items),
            ExprKind::Dict(pairs) => self.lower_dict_literal(pairs),
            ExprKind::FString(parts) => self.lower_fstring(parts),
            ExprKind::Bin { op, left, right } => self.lower_bin(*op, left, right, e.range),
            ExprKind::Unary { op, operand } => match op {
                crate::ast::UnaryOp::Not => {
                    let cond = self.truthy_expr(operand)?;
                    let dst = self.val(Ty::Bool);
                    self.push(Op::Not { dst, src: cond });
                    Ok((dst, Ty::Bool))
                }
                crate::ast::UnaryOp::Neg => {
                    let (v, ty) = self.expr(operand)?;
                    // Dynamic operands negate as `0 - x` through the
                    // dispatch table.
                    if ty == Ty::Dyn || ty == Ty::BigInt {
                        let zero = self.emit_const_int(0);
                        return self.bin_values(BinOp::Sub, zero, &Ty::Int64, v, &ty, e.range);
                    }
                    if !ty.is_numeric() && !self.collecting {
                        return Err(self.err(
                            ErrorKind::TypeError,
                            format!("bad operand type for unary -: {ty}"),
                            e.range,
                        ));
                    }
                    let out_ty = if ty == Ty::Bool { Ty::Int64 } else { ty };
                    let dst = self.val(out_ty.clone());
                    self.push(Op::Neg { dst, src: v });
                    Ok((dst, out_ty))
                }
            },
            ExprKind::Bool { op, values } => self.lower_boolop(*op, values, e.range),
            ExprKind::Compare { left, rest } => self.lower_compare(left, rest, e.range),
            ExprKind::Call { func, args, star_arg } => self.lower_call(func, args, star_arg.as_deref(), e.range),
            ExprKind::Attribute { value, attr } => self.lower_attr_get(value, *attr, e.range),
            ExprKind::Subscript { value, index } => self.lower_subscript(value, index, e.range),
            ExprKind::Slice { value, start, stop, step } => {
                self.lower_slice(value, start.as_deref(), stop.as_deref(), step.as_deref(), e.range)
            }
            ExprKind::IfExp { test, body, orelse } => self.lower_ifexp(test, body, orelse),
            ExprKind::ListComp {
                element,
                target,
                iter,
                condition,
            } => self.lower_listcomp(element, target, iter, condition.as_deref(), e.range),
            ExprKind::Lambda(def) => self.lower_lambda(def),
            ExprKind::Await(inner) => self.lower_await(inner, e.range),
            ExprKind::Yield(value) => self.lower_yield(value.as_deref(), e.range),
        }
    }

    fn lower_literal(&mut self, literal: &Literal, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let c = match literal {
            Literal::None => Const::None,
            Literal::Bool(b) => Const::Bool(*b),
            Literal::Int(v) => Const::Int(*v),
            Literal::BigInt(b) => Const::Big(b.clone()),
            Literal::Float(f) => Const::Float(*f),
            Literal::Str(id) => Const::Str(self.interner().get(*id).to_owned()),
            Literal::Bytes(bytes) => Const::Bytes(bytes.clone()),
        };
        self.try_emit_const(&c)
            .ok_or_else(|| self.err(ErrorKind::TypeError, "unrepresentable constant", range))
    }

    pub(super) fn load_name(&mut self, ident: &Identifier, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        match ident.slot {
            Some(Slot::Local(slot)) => {
                let ty = self.slot_tys[slot as usize].clone();
                let dst = self.val(ty.clone());
                self.push(Op::LoadLocal { dst, slot });
                Ok((dst, ty))
            }
            Some(Slot::Capture(index)) => {
                let ty = self.captures.get(index as usize).cloned().unwrap_or(Ty::Dyn);
                let dst = self.val(ty.clone());
                self.push(Op::LoadCapture { dst, index });
                Ok((dst, ty))
            }
            Some(Slot::Global(slot)) => {
                let ty = self.global_ty(slot);
                let dst = self.val(ty.clone());
                self.push(Op::LoadGlobal { dst, slot });
                Ok((dst, ty))
            }
            None => {
                let name = self.interner().get(ident.name).to_owned();
                // `__name__` compiles to a constant: the entry module is
                // "__main__", imported modules see their own name.
                if name == "__name__" {
                    let text = if self.module == 0 {
                        "__main__".to_owned()
                    } else {
                        let module_name = self.parent.module_names[self.module as usize];
                        self.interner().get(module_name).to_owned()
                    };
                    let dst = self.val(Ty::Str);
                    self.push(Op::Const {
                        dst,
                        value: Const::Str(text),
                    });
                    return Ok((dst, Ty::Str));
                }
                Err(self.err(
                    ErrorKind::TypeError,
                    format!("'{name}' cannot be used as a value"),
                    range,
                ))
            }
        }
    }

    /// Dynamic lists store boxed elements; a non-constant list literal
    /// lowers to `list_new` plus pushes. (Comptime-constant homogeneous
    /// literals became fixed arrays upstream.)
    fn lower_list_literal(&mut self, items: &'a [Expr]) -> CompileResult<(ValueId, Ty)> {
        let mut lowered = Vec::with_capacity(items.len());
        let mut elem: Option<Ty> = None;
        for item in items {
            let (v, ty) = self.expr(item)?;
            elem = Some(match elem {
                Some(prev) => prev.join(&ty).unwrap_or(Ty::Dyn),
                None => ty.clone(),
            });
            lowered.push((v, ty));
        }
        let elem = crate::infer::demote_fixed(elem.unwrap_or(Ty::Dyn));
        let list_ty = Ty::List(Box::new(elem));
        let cap = self.emit_const_int(items.len() as i64);
        let dst = self.val(list_ty.clone());
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func: RuntimeFn::ListNew,
            args: vec![cap],
        });
        for (v, ty) in lowered {
            let boxed = self.box_value(v, &ty);
            self.push(Op::CallRuntime {
                dst: None,
                func: RuntimeFn::ListPush,
                args: vec![dst, boxed],
            });
        }
        Ok((dst, list_ty))
    }

    fn lower_tuple_literal(&mut self, items: &'a [Expr]) -> CompileResult<(ValueId, Ty)> {
        let mut boxed = Vec::with_capacity(items.len());
        let mut tys = Vec::with_capacity(items.len());
        for item in items {
            let (v, ty) = self.expr(item)?;
            boxed.push(self.box_value(v, &ty));
            tys.push(crate::infer::demote_fixed(ty));
        }
        let ty = Ty::Tuple(tys);
        let dst = self.val(ty.clone());
        self.push(Op::MakeTuple { dst, items: boxed });
        Ok((dst, ty))
    }

    fn lower_set_literal(&mut self, items: &'a [Expr]) -> CompileResult<(ValueId, Ty)> {
        let dst = self.val(Ty::Set(Box::new(Ty::Dyn)));
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func: RuntimeFn::SetNew,
            args: Vec::new(),
        });
        let mut elem: Option<Ty> = None;
        for item in items {
            let (v, ty) = self.expr(item)?;
            elem = Some(match elem {
                Some(prev) => prev.join(&ty).unwrap_or(Ty::Dyn),
                None => ty.clone(),
            });
            let boxed = self.box_value(v, &ty);
            self.push(Op::CallRuntime {
                dst: None,
                func: RuntimeFn::SetAdd,
                args: vec![dst, boxed],
            });
        }
        let ty = Ty::Set(Box::new(elem.unwrap_or(Ty::Dyn)));
        self.set_val_ty(dst, ty.clone());
        Ok((dst, ty))
    }

    fn lower_dict_literal(&mut self, pairs: &'a [(Expr, Expr)]) -> CompileResult<(ValueId, Ty)> {
        let cap = self.emit_const_int(pairs.len() as i64);
        let dst = self.val(Ty::Dict(Box::new(Ty::Dyn), Box::new(Ty::Dyn)));
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func: RuntimeFn::DictNew,
            args: vec![cap],
        });
        let mut key_ty: Option<Ty> = None;
        let mut val_ty: Option<Ty> = None;
        for (key, value) in pairs {
            let (kv, kt) = self.expr(key)?;
            let (vv, vt) = self.expr(value)?;
            key_ty = Some(match key_ty {
                Some(prev) => prev.join(&kt).unwrap_or(Ty::Dyn),
                None => kt.clone(),
            });
            val_ty = Some(match val_ty {
                Some(prev) => prev.join(&vt).unwrap_or(Ty::Dyn),
                None => vt.clone(),
            });
            let kb = self.box_value(kv, &kt);
            let vb = self.box_value(vv, &vt);
            self.push(Op::CallRuntime {
                dst: None,
                func: RuntimeFn::DictPut,
                args: vec![dst, kb, vb],
            });
        }
        let ty = Ty::Dict(
            Box::new(key_ty.unwrap_or(Ty::Dyn)),
            Box::new(crate::infer::demote_fixed(val_ty.unwrap_or(Ty::Dyn))),
        );
        self.set_val_ty(dst, ty.clone());
        Ok((dst, ty))
    }

    fn lower_fstring(&mut self, parts: &'a [FStringPart]) -> CompileResult<(ValueId, Ty)> {
        let mut acc: Option<ValueId> = None;
        for part in parts {
            let piece = match part {
                FStringPart::Literal(id) => {
                    let text = self.interner().get(*id).to_owned();
                    self.try_emit_const(&Const::Str(text))
                        .expect("string constants are representable")
                        .0
                }
                FStringPart::Expr(inner) => {
                    let (v, ty) = self.expr(inner)?;
                    self.stringify(v, &ty)
                }
            };
            acc = Some(match acc {
                Some(prev) => {
                    let dst = self.val(Ty::Str);
                    self.push(Op::CallRuntime {
                        dst: Some(dst),
                        func: RuntimeFn::StrConcat,
                        args: vec![prev, piece],
                    });
                    dst
                }
                None => piece,
            });
        }
        let result = match acc {
            Some(v) => v,
            None => {
                self.try_emit_const(&Const::Str(String::new()))
                    .expect("string constants are representable")
                    .0
            }
        };
        Ok((result, Ty::Str))
    }

    /// `str()` of a typed value as a string handle.
    pub(super) fn stringify(&mut self, v: ValueId, ty: &Ty) -> ValueId {
        let func = match ty {
            Ty::Str => return v,
            Ty::Int64 | Ty::Byte => RuntimeFn::StrFromInt,
            Ty::Float64 => RuntimeFn::StrFromFloat,
            Ty::Bool => RuntimeFn::StrFromBool,
            _ => {
                let boxed = self.box_value(v, ty);
                let dst = self.val(Ty::Str);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::StrOfVal,
                    args: vec![boxed],
                });
                return dst;
            }
        };
        let dst = self.val(Ty::Str);
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func,
            args: vec![v],
        });
        dst
    }

    pub(super) fn emit_const_int(&mut self, v: i64) -> ValueId {
        let dst = self.val(Ty::Int64);
        self.push(Op::Const {
            dst,
            value: Const::Int(v),
        });
        dst
    }

    /// Boxes a typed value into an `RtVal`, transferring (one reference
    /// of) heap operands into the box.
    pub(super) fn box_value(&mut self, v: ValueId, ty: &Ty) -> ValueId {
        if *ty == Ty::Dyn {
            return v;
        }
        let dst = self.val(Ty::Dyn);
        self.push(Op::Box { dst, src: v });
        dst
    }

    pub(super) fn unbox_value(&mut self, v: ValueId, ty: &Ty) -> ValueId {
        if *ty == Ty::Dyn {
            return v;
        }
        let dst = self.val(ty.clone());
        self.push(Op::Unbox { dst, src: v });
        dst
    }

    /// Converts `v` from `from` to `to`, or reports a type error.
    pub(super) fn coerce(&mut self, v: ValueId, from: &Ty, to: &Ty, range: CodeRange) -> CompileResult<ValueId> {
        if self.collecting || from == to || *from == Ty::Never {
            return Ok(v);
        }
        match (from, to) {
            (_, Ty::Dyn) => Ok(self.box_value(v, from)),
            (Ty::Dyn, _) => Ok(self.unbox_value(v, to)),
            (Ty::Int64 | Ty::Bool | Ty::Byte, Ty::Float64)
            | (Ty::Bool | Ty::Byte, Ty::Int64)
            | (Ty::Int64 | Ty::Float64, Ty::Bool) => {
                let dst = self.val(to.clone());
                self.push(Op::Cast { dst, src: v });
                Ok(dst)
            }
            (Ty::Int64, Ty::BigInt) => {
                let dst = self.val(Ty::BigInt);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::BigFromI64,
                    args: vec![v],
                });
                Ok(dst)
            }
            (Ty::FixedArr(elem, n), Ty::List(want)) => {
                let (elem, n, want) = (elem.clone(), *n, want.clone());
                self.arr_to_list(v, &elem, n, &want)
            }
            (Ty::List(a), Ty::List(b)) if a.join(b).is_some() || **b == Ty::Dyn => {
                let dst = self.val(to.clone());
                self.push(Op::Cast { dst, src: v });
                Ok(dst)
            }
            (Ty::Class(derived), Ty::Class(base)) if self.is_subclass(*derived, *base) => {
                let dst = self.val(to.clone());
                self.push(Op::Cast { dst, src: v });
                Ok(dst)
            }
            _ => Err(self.err(ErrorKind::TypeError, format!("expected {to}, got {from}"), range)),
        }
    }

    pub(super) fn is_subclass(&self, derived: ClassId, base: ClassId) -> bool {
        self.parent.info.is_subclass(derived, base)
    }

    /// Materializes a fixed array as a dynamic list.
    pub(super) fn arr_to_list(&mut self, arr: ValueId, elem: &Ty, n: usize, want_elem: &Ty) -> CompileResult<ValueId> {
        let cap = self.emit_const_int(n as i64);
        let dst = self.val(Ty::List(Box::new(want_elem.clone())));
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func: RuntimeFn::ListNew,
            args: vec![cap],
        });
        for i in 0..n {
            let index = self.emit_const_int(i as i64);
            let item = self.val(elem.clone());
            self.push(Op::ArrGet {
                dst: item,
                arr,
                index,
                len: n,
            });
            let boxed = self.box_value(item, elem);
            self.push(Op::CallRuntime {
                dst: None,
                func: RuntimeFn::ListPush,
                args: vec![dst, boxed],
            });
        }
        Ok(dst)
    }

    /// Lowers `e` and reduces it to a boolean condition.
    pub(super) fn truthy_expr(&mut self, e: &'a Expr) -> CompileResult<ValueId> {
        let (v, ty) = self.expr(e)?;
        Ok(self.truthy_value(v, &ty))
    }

    pub(super) fn truthy_value(&mut self, v: ValueId, ty: &Ty) -> ValueId {
        match ty {
            Ty::Bool => v,
            Ty::Int64 | Ty::Float64 | Ty::Byte => {
                let dst = self.val(Ty::Bool);
                self.push(Op::Cast { dst, src: v });
                dst
            }
            _ => {
                let boxed = self.box_value(v, ty);
                let dst = self.val(Ty::Bool);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::ValTruthy,
                    args: vec![boxed],
                });
                dst
            }
        }
    }

    fn lower_bin(&mut self, op: BinOp, left: &'a Expr, right: &'a Expr, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let (lv, lt) = self.expr(left)?;
        let (rv, rt) = self.expr(right)?;
        self.bin_values(op, lv, &lt, rv, &rt, range)
    }

    pub(super) fn bin_values(
        &mut self,
        op: BinOp,
        lv: ValueId,
        lt: &Ty,
        rv: ValueId,
        rt: &Ty,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        if self.collecting {
            let out_ty = bin_result(op, lt, rt).unwrap_or(Ty::Dyn);
            let dst = self.val(out_ty.clone());
            return Ok((dst, out_ty));
        }
        let Some(out_ty) = bin_result(op, lt, rt) else {
            return Err(self.err(
                ErrorKind::TypeError,
                format!("unsupported operand types: {lt} and {rt}"),
                range,
            ));
        };
        // String concatenation.
        if *lt == Ty::Str && *rt == Ty::Str {
            let dst = self.val(Ty::Str);
            self.push(Op::CallRuntime {
                dst: Some(dst),
                func: RuntimeFn::StrConcat,
                args: vec![lv, rv],
            });
            return Ok((dst, Ty::Str));
        }
        // Sequence concatenation.
        if let Ty::List(elem) = &out_ty
            && op == BinOp::Add
            && !lt.is_numeric()
            && *lt != Ty::Dyn
            && *rt != Ty::Dyn
        {
            let want = Ty::List(elem.clone());
            let lv = self.coerce(lv, lt, &want, range)?;
            let rv = self.coerce(rv, rt, &want, range)?;
            let dst = self.val(want.clone());
            self.push(Op::CallRuntime {
                dst: Some(dst),
                func: RuntimeFn::ListConcat,
                args: vec![lv, rv],
            });
            return Ok((dst, want));
        }
        // Dynamic dispatch.
        if *lt == Ty::Dyn || *rt == Ty::Dyn {
            let code = self.bin_code(op);
            let lb = self.box_value(lv, lt);
            let rb = self.box_value(rv, rt);
            let dst = self.val(Ty::Dyn);
            self.push(Op::CallRuntime {
                dst: Some(dst),
                func: RuntimeFn::DynBinop,
                args: vec![code, lb, rb],
            });
            return Ok((dst, Ty::Dyn));
        }
        // Big-integer arithmetic through runtime calls.
        if out_ty == Ty::BigInt {
            let lv = self.coerce(lv, lt, &Ty::BigInt, range)?;
            let rv = self.coerce(rv, rt, &Ty::BigInt, range)?;
            let func = match op {
                BinOp::Add => RuntimeFn::BigAdd,
                BinOp::Sub => RuntimeFn::BigSub,
                BinOp::Mul => RuntimeFn::BigMul,
                _ => {
                    return Err(self.err(
                        ErrorKind::UnsupportedFeatureError,
                        "this big-integer operation is not supported",
                        range,
                    ));
                }
            };
            let dst = self.val(Ty::BigInt);
            self.push(Op::CallRuntime {
                dst: Some(dst),
                func,
                args: vec![lv, rv],
            });
            return Ok((dst, Ty::BigInt));
        }
        // Plain numeric arithmetic. True division runs in floats; other
        // operators unify the operands first.
        let operand_ty = if op == BinOp::Div { Ty::Float64 } else { out_ty.clone() };
        let lv = self.coerce(lv, lt, &operand_ty, range)?;
        let rv = self.coerce(rv, rt, &operand_ty, range)?;
        let dst = self.val(out_ty.clone());
        self.push(Op::Bin { dst, op, lhs: lv, rhs: rv });
        Ok((dst, out_ty))
    }

    fn bin_code(&mut self, op: BinOp) -> ValueId {
        // Operator codes match the runtime's dispatch table.
        let code = match op {
            BinOp::Add => 0,
            BinOp::Sub => 1,
            BinOp::Mul => 2,
            BinOp::Div => 3,
            BinOp::FloorDiv => 4,
            BinOp::Mod => 5,
            BinOp::Pow => 6,
        };
        self.emit_const_int(code)
    }

    fn cmp_code(&mut self, op: CmpOp) -> ValueId {
        let code = match op {
            CmpOp::Eq => 0,
            CmpOp::Ne => 1,
            CmpOp::Lt => 2,
            CmpOp::Le => 3,
            CmpOp::Gt => 4,
            CmpOp::Ge => 5,
            CmpOp::In | CmpOp::NotIn => 0,
        };
        self.emit_const_int(code)
    }

    fn lower_compare(
        &mut self,
        left: &'a Expr,
        rest: &'a [(CmpOp, Expr)],
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let (lv, lt) = self.expr(left)?;
        if rest.len() == 1 {
            let (op, comparator) = &rest[0];
            let (rv, rt) = self.expr(comparator)?;
            let result = self.cmp_values(*op, lv, &lt, rv, &rt, range)?;
            return Ok((result, Ty::Bool));
        }
        // Chained comparison: short-circuit through a boolean slot, with
        // each middle operand parked in a slot so values stay
        // block-local.
        let result_slot = self.new_slot(Ty::Bool);
        let fail_blk = self.new_block();
        let done_blk = self.new_block();
        let mut prev = (lv, lt);
        for (index, (op, comparator)) in rest.iter().enumerate() {
            let (rv, rt) = self.expr(comparator)?;
            let step = self.cmp_values(*op, prev.0, &prev.1, rv, &rt, range)?;
            if index == rest.len() - 1 {
                self.push(Op::StoreLocal {
                    slot: result_slot,
                    src: step,
                });
                self.seal(Terminator::Jump(done_blk));
            } else {
                let mid_slot = self.new_slot(rt.clone());
                self.push(Op::StoreLocal { slot: mid_slot, src: rv });
                let next_blk = self.new_block();
                self.seal(Terminator::Branch {
                    cond: step,
                    then_blk: next_blk,
                    else_blk: fail_blk,
                });
                self.switch_to(next_blk);
                let reloaded = self.val(rt.clone());
                self.push(Op::LoadLocal {
                    dst: reloaded,
                    slot: mid_slot,
                });
                prev = (reloaded, rt);
            }
        }
        self.switch_to(fail_blk);
        let false_val = self.val(Ty::Bool);
        self.push(Op::Const {
            dst: false_val,
            value: Const::Bool(false),
        });
        self.push(Op::StoreLocal {
            slot: result_slot,
            src: false_val,
        });
        self.seal(Terminator::Jump(done_blk));
        self.switch_to(done_blk);
        let result = self.val(Ty::Bool);
        self.push(Op::LoadLocal {
            dst: result,
            slot: result_slot,
        });
        Ok((result, Ty::Bool))
    }

    pub(super) fn cmp_values(
        &mut self,
        op: CmpOp,
        lv: ValueId,
        lt: &Ty,
        rv: ValueId,
        rt: &Ty,
        range: CodeRange,
    ) -> CompileResult<ValueId> {
        if self.collecting {
            return Ok(self.val(Ty::Bool));
        }
        // Membership tests dispatch on the container.
        if matches!(op, CmpOp::In | CmpOp::NotIn) {
            let contains = self.contains_value(lv, lt, rv, rt, range)?;
            if op == CmpOp::NotIn {
                let dst = self.val(Ty::Bool);
                self.push(Op::Not { dst, src: contains });
                return Ok(dst);
            }
            return Ok(contains);
        }
        // Plain numeric comparison.
        if lt.is_numeric() && rt.is_numeric() && *lt != Ty::BigInt && *rt != Ty::BigInt {
            let joined = lt.join(rt).unwrap_or(Ty::Float64);
            let lv = self.coerce(lv, lt, &joined, range)?;
            let rv = self.coerce(rv, rt, &joined, range)?;
            let dst = self.val(Ty::Bool);
            self.push(Op::Cmp { dst, op, lhs: lv, rhs: rv });
            return Ok(dst);
        }
        // String equality; ordering on strings is not supported.
        if *lt == Ty::Str && *rt == Ty::Str {
            match op {
                CmpOp::Eq | CmpOp::Ne => {
                    let eq = self.val(Ty::Bool);
                    self.push(Op::CallRuntime {
                        dst: Some(eq),
                        func: RuntimeFn::StrEq,
                        args: vec![lv, rv],
                    });
                    if op == CmpOp::Ne {
                        let dst = self.val(Ty::Bool);
                        self.push(Op::Not { dst, src: eq });
                        return Ok(dst);
                    }
                    return Ok(eq);
                }
                _ => {
                    return Err(self.err(
                        ErrorKind::UnsupportedFeatureError,
                        "string ordering comparisons are not supported",
                        range,
                    ));
                }
            }
        }
        // Big integers through the runtime.
        if *lt == Ty::BigInt || *rt == Ty::BigInt {
            let lv = self.coerce(lv, lt, &Ty::BigInt, range)?;
            let rv = self.coerce(rv, rt, &Ty::BigInt, range)?;
            if matches!(op, CmpOp::Eq | CmpOp::Ne) {
                let eq = self.val(Ty::Bool);
                self.push(Op::CallRuntime {
                    dst: Some(eq),
                    func: RuntimeFn::BigEq,
                    args: vec![lv, rv],
                });
                if op == CmpOp::Ne {
                    let dst = self.val(Ty::Bool);
                    self.push(Op::Not { dst, src: eq });
                    return Ok(dst);
                }
                return Ok(eq);
            }
            let three_way = self.val(Ty::Int64);
            self.push(Op::CallRuntime {
                dst: Some(three_way),
                func: RuntimeFn::BigCmp,
                args: vec![lv, rv],
            });
            let zero = self.emit_const_int(0);
            let dst = self.val(Ty::Bool);
            self.push(Op::Cmp {
                dst,
                op,
                lhs: three_way,
                rhs: zero,
            });
            return Ok(dst);
        }
        // Class operands go through their magic methods when defined.
        if let Ty::Class(class) = lt {
            let method = match op {
                CmpOp::Eq | CmpOp::Ne => "__eq__",
                CmpOp::Lt | CmpOp::Gt => "__lt__",
                _ => "",
            };
            if !method.is_empty() {
                let name = self.intern(method);
                if let Some((_, func)) = self.parent.info.method(*class, name) {
                    // `a > b` lowers to `b < a`.
                    let (first, second) = if op == CmpOp::Gt { (rv, lv) } else { (lv, rv) };
                    let ret = self.parent.info.func(func).ret.clone();
                    let raw = self.val(ret.clone());
                    self.push(Op::Call {
                        dst: Some(raw),
                        func,
                        args: vec![first, second],
                    });
                    let dst = self.truthy_value(raw, &ret);
                    if op == CmpOp::Ne {
                        let inverted = self.val(Ty::Bool);
                        self.push(Op::Not { dst: inverted, src: dst });
                        return Ok(inverted);
                    }
                    return Ok(dst);
                }
            }
        }
        // Structural fallback through the dynamic dispatch table.
        let code = self.cmp_code(op);
        let lb = self.box_value(lv, lt);
        let rb = self.box_value(rv, rt);
        let dst = self.val(Ty::Bool);
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func: RuntimeFn::DynCmp,
            args: vec![code, lb, rb],
        });
        Ok(dst)
    }

    fn contains_value(
        &mut self,
        needle: ValueId,
        needle_ty: &Ty,
        container: ValueId,
        container_ty: &Ty,
        range: CodeRange,
    ) -> CompileResult<ValueId> {
        let dst = self.val(Ty::Bool);
        match container_ty {
            Ty::List(_) => {
                let boxed = self.box_value(needle, needle_ty);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::ListContains,
                    args: vec![container, boxed],
                });
            }
            Ty::FixedArr(elem, n) => {
                let (elem, n) = (elem.clone(), *n);
                let list = self.arr_to_list(container, &elem, n, &elem)?;
                let boxed = self.box_value(needle, needle_ty);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::ListContains,
                    args: vec![list, boxed],
                });
            }
            Ty::Dict(..) => {
                let boxed = self.box_value(needle, needle_ty);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::DictContains,
                    args: vec![container, boxed],
                });
            }
            Ty::Set(_) => {
                let boxed = self.box_value(needle, needle_ty);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::SetContains,
                    args: vec![container, boxed],
                });
            }
            Ty::Str => {
                if *needle_ty != Ty::Str {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        "'in <string>' requires a string operand",
                        range,
                    ));
                }
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::StrContains,
                    args: vec![container, needle],
                });
            }
            _ => {
                return Err(self.err(
                    ErrorKind::TypeError,
                    format!("'in' requires a container, got {container_ty}"),
                    range,
                ));
            }
        }
        Ok(dst)
    }

    /// Boolean operators produce the deciding operand; the result slot
    /// takes the first operand's type and the rest must coerce to it.
    fn lower_boolop(&mut self, op: BoolOp, values: &'a [Expr], range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let (first, first_ty) = self.expr(&values[0])?;
        let slot = self.new_slot(first_ty.clone());
        self.push(Op::StoreLocal { slot, src: first });
        let done_blk = self.new_block();
        for value in &values[1..] {
            let current = self.val(first_ty.clone());
            self.push(Op::LoadLocal { dst: current, slot });
            let cond = self.truthy_value(current, &first_ty);
            let next_blk = self.new_block();
            let (then_blk, else_blk) = match op {
                // `and` keeps evaluating while true.
                BoolOp::And => (next_blk, done_blk),
                // `or` stops at the first truthy operand.
                BoolOp::Or => (done_blk, next_blk),
            };
            self.seal(Terminator::Branch { cond, then_blk, else_blk });
            self.switch_to(next_blk);
            let (v, ty) = self.expr(value)?;
            let v = self.coerce(v, &ty, &first_ty, range)?;
            self.push(Op::StoreLocal { slot, src: v });
        }
        self.seal(Terminator::Jump(done_blk));
        self.switch_to(done_blk);
        let result = self.val(first_ty.clone());
        self.push(Op::LoadLocal { dst: result, slot });
        Ok((result, first_ty))
    }

    fn lower_ifexp(&mut self, test: &'a Expr, body: &'a Expr, orelse: &'a Expr) -> CompileResult<(ValueId, Ty)> {
        let cond = self.truthy_expr(test)?;
        let then_blk = self.new_block();
        let else_blk = self.new_block();
        self.seal(Terminator::Branch { cond, then_blk, else_blk });

        self.switch_to(then_blk);
        let (tv, tt) = self.expr(body)?;
        let then_end = self.cur;

        self.switch_to(else_blk);
        let (ev, et) = self.expr(orelse)?;
        let else_end = self.cur;

        let ty = tt.join(&et).unwrap_or(Ty::Dyn);
        let slot = self.new_slot(ty.clone());
        let join_blk = self.new_block();

        self.switch_to(then_end);
        let tv = self.coerce(tv, &tt, &ty, body.range)?;
        self.push(Op::StoreLocal { slot, src: tv });
        self.seal(Terminator::Jump(join_blk));

        self.switch_to(else_end);
        let ev = self.coerce(ev, &et, &ty, orelse.range)?;
        self.push(Op::StoreLocal { slot, src: ev });
        self.seal(Terminator::Jump(join_blk));

        self.switch_to(join_blk);
        let result = self.val(ty.clone());
        self.push(Op::LoadLocal { dst: result, slot });
        Ok((result, ty))
    }

    /// `[elt for x in iter if cond]` lowers to an explicit build loop
    /// over the iteration machinery shared with `for`.
    fn lower_listcomp(
        &mut self,
        element: &'a Expr,
        target: &Identifier,
        iter: &'a Expr,
        condition: Option<&'a Expr>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let Some(Slot::Local(target_slot)) = target.slot else {
            return Err(self.err(ErrorKind::NameError, "comprehension target was not resolved", range));
        };
        let zero = self.emit_const_int(0);
        let list = self.val(Ty::List(Box::new(Ty::Dyn)));
        self.push(Op::CallRuntime {
            dst: Some(list),
            func: RuntimeFn::ListNew,
            args: vec![zero],
        });
        let list_slot = self.new_slot(Ty::List(Box::new(Ty::Dyn)));
        self.push(Op::StoreLocal { slot: list_slot, src: list });

        let mut elem_ty = Ty::Dyn;
        self.lower_iteration(iter, range, &mut |fx, item, item_ty, continue_blk| {
            fx.store_to_slot(Slot::Local(target_slot), item, &item_ty, range)?;
            if let Some(condition) = condition {
                let cond = fx.truthy_expr(condition)?;
                let keep_blk = fx.new_block();
                fx.seal(Terminator::Branch {
                    cond,
                    then_blk: keep_blk,
                    else_blk: continue_blk,
                });
                fx.switch_to(keep_blk);
            }
            let (v, ty) = fx.expr(element)?;
            elem_ty = crate::infer::demote_fixed(ty.clone());
            let boxed = fx.box_value(v, &ty);
            let list = fx.val(Ty::List(Box::new(Ty::Dyn)));
            fx.push(Op::LoadLocal {
                dst: list,
                slot: list_slot,
            });
            fx.push(Op::CallRuntime {
                dst: None,
                func: RuntimeFn::ListPush,
                args: vec![list, boxed],
            });
            Ok(())
        })?;

        let ty = Ty::List(Box::new(elem_ty));
        self.set_slot_ty(list_slot, ty.clone());
        let result = self.val(ty.clone());
        self.push(Op::LoadLocal {
            dst: result,
            slot: list_slot,
        });
        Ok((result, ty))
    }

    fn lower_subscript(&mut self, value: &'a Expr, index: &'a Expr, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let (seq, seq_ty) = self.expr(value)?;
        let (idx, idx_ty) = self.expr(index)?;
        match &seq_ty {
            Ty::FixedArr(elem, n) => {
                let idx = self.coerce(idx, &idx_ty, &Ty::Int64, range)?;
                let dst = self.val(elem.as_ref().clone());
                self.push(Op::ArrGet {
                    dst,
                    arr: seq,
                    index: idx,
                    len: *n,
                });
                Ok((dst, elem.as_ref().clone()))
            }
            Ty::List(elem) => {
                let idx = self.coerce(idx, &idx_ty, &Ty::Int64, range)?;
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::ListGet,
                    args: vec![seq, idx],
                });
                let result = self.unbox_value(boxed, elem);
                Ok((result, elem.as_ref().clone()))
            }
            Ty::Tuple(items) => {
                // Constant indices pick the precise element type.
                let elem_ty = match &index.kind {
                    ExprKind::Literal(Literal::Int(i)) => {
                        let len = items.len() as i64;
                        let resolved = if *i < 0 { *i + len } else { *i };
                        if !(0..len).contains(&resolved) {
                            return Err(self.err(
                                ErrorKind::ValueError,
                                format!("tuple index {i} out of range"),
                                range,
                            ));
                        }
                        items[resolved as usize].clone()
                    }
                    _ => {
                        let mut joined = Ty::Never;
                        for item in items {
                            joined = joined.join(item).unwrap_or(Ty::Dyn);
                        }
                        joined
                    }
                };
                let idx = self.coerce(idx, &idx_ty, &Ty::Int64, range)?;
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::TupleGet,
                    args: vec![seq, idx],
                });
                let result = self.unbox_value(boxed, &elem_ty);
                Ok((result, elem_ty))
            }
            Ty::Dict(_, val) => {
                let key = self.box_value(idx, &idx_ty);
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::DictGet,
                    args: vec![seq, key],
                });
                let result = self.unbox_value(boxed, val);
                Ok((result, val.as_ref().clone()))
            }
            Ty::Str => {
                let idx = self.coerce(idx, &idx_ty, &Ty::Int64, range)?;
                let dst = self.val(Ty::Str);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::StrIndex,
                    args: vec![seq, idx],
                });
                Ok((dst, Ty::Str))
            }
            // A subscript on a class instance goes through `__getitem__`.
            Ty::Class(class) => {
                let name = self.intern("__getitem__");
                let Some((_, func)) = self.parent.info.method(*class, name) else {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("{seq_ty} object is not subscriptable"),
                        range,
                    ));
                };
                let params = self.parent.info.func(func).params.clone();
                let ret = self.parent.info.func(func).ret.clone();
                let idx = match params.get(1) {
                    Some(want) => {
                        let want = want.clone();
                        self.coerce(idx, &idx_ty, &want, range)?
                    }
                    None => idx,
                };
                let dst = self.val(ret.clone());
                self.push(Op::Call {
                    dst: Some(dst),
                    func,
                    args: vec![seq, idx],
                });
                Ok((dst, ret))
            }
            _ if self.collecting => Ok((self.val(Ty::Dyn), Ty::Dyn)),
            other => Err(self.err(
                ErrorKind::TypeError,
                format!("{other} is not subscriptable"),
                range,
            )),
        }
    }

    fn lower_slice(
        &mut self,
        value: &'a Expr,
        start: Option<&'a Expr>,
        stop: Option<&'a Expr>,
        step: Option<&'a Expr>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let (seq, seq_ty) = self.expr(value)?;
        let start = self.slice_bound(start, range)?;
        let stop = self.slice_bound(stop, range)?;
        let step = match step {
            Some(expr) => self.slice_bound(Some(expr), range)?,
            None => self.emit_const_int(1),
        };
        match &seq_ty {
            Ty::Str => {
                let dst = self.val(Ty::Str);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::StrSlice,
                    args: vec![seq, start, stop, step],
                });
                Ok((dst, Ty::Str))
            }
            Ty::List(elem) => {
                let ty = Ty::List(elem.clone());
                let dst = self.val(ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::ListSlice,
                    args: vec![seq, start, stop, step],
                });
                Ok((dst, ty))
            }
            Ty::FixedArr(elem, n) => {
                let (elem, n) = (elem.clone(), *n);
                let list = self.arr_to_list(seq, &elem, n, &elem)?;
                let ty = Ty::List(elem);
                let dst = self.val(ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::ListSlice,
                    args: vec![list, start, stop, step],
                });
                Ok((dst, ty))
            }
            _ if self.collecting => Ok((self.val(Ty::Dyn), Ty::Dyn)),
            other => Err(self.err(ErrorKind::TypeError, format!("{other} cannot be sliced"), range)),
        }
    }

    fn slice_bound(&mut self, bound: Option<&'a Expr>, range: CodeRange) -> CompileResult<ValueId> {
        match bound {
            Some(expr) => {
                let (v, ty) = self.expr(expr)?;
                self.coerce(v, &ty, &Ty::Int64, range)
            }
            None => Ok(self.emit_const_int(SLICE_MISSING)),
        }
    }

    fn lower_attr_get(
        &mut self,
        value: &'a Expr,
        attr: crate::intern::StringId,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        // Module constants (math.pi) resolve statically.
        if let ExprKind::Name(ident) = &value.kind
            && ident.slot.is_none()
        {
            let module = self.interner().get(ident.name).to_owned();
            let attr_name = self.interner().get(attr).to_owned();
            if module == "math" {
                let constant = match attr_name.as_str() {
                    "pi" => Some(std::f64::consts::PI),
                    "e" => Some(std::f64::consts::E),
                    "tau" => Some(std::f64::consts::TAU),
                    "inf" => Some(f64::INFINITY),
                    _ => None,
                };
                if let Some(constant) = constant {
                    return Ok(self
                        .try_emit_const(&Const::Float(constant))
                        .expect("float constants are representable"));
                }
            }
            return Err(self.err(
                ErrorKind::AttributeError,
                format!("module '{module}' has no attribute '{attr_name}'"),
                range,
            ));
        }
        let (obj, obj_ty) = self.expr(value)?;
        match &obj_ty {
            Ty::Class(class) => {
                let info = self.parent.info.class(*class);
                if let Some(index) = info.field_index(attr) {
                    let field_ty = info.fields[index as usize].1.clone();
                    let boxed = self.val(Ty::Dyn);
                    self.push(Op::AttrGet {
                        dst: boxed,
                        obj,
                        field: index,
                    });
                    let result = self.unbox_value(boxed, &field_ty);
                    return Ok((result, field_ty));
                }
                let attr_name = self.interner().get(attr).to_owned();
                let class_name = self.interner().get(info.name).to_owned();
                Err(self.err(
                    ErrorKind::AttributeError,
                    format!("'{class_name}' object has no attribute '{attr_name}'"),
                    range,
                ))
            }
            // Dynamic receivers defer the lookup to runtime.
            Ty::Dyn => {
                let dst = self.val(Ty::Dyn);
                self.push(Op::DynAttr { dst, obj, name: attr });
                Ok((dst, Ty::Dyn))
            }
            _ if self.collecting => Ok((self.val(Ty::Dyn), Ty::Dyn)),
            other => {
                let attr_name = self.interner().get(attr).to_owned();
                Err(self.err(
                    ErrorKind::AttributeError,
                    format!("{other} has no attribute '{attr_name}'"),
                    range,
                ))
            }
        }
    }

    // --- assignment -----------------------------------------------------

    pub(super) fn assign(&mut self, target: &'a AssignTarget, value: &'a Expr, range: CodeRange) -> CompileResult<()> {
        match target {
            AssignTarget::Name(ident) => {
                let (v, ty) = self.expr(value)?;
                let slot = ident
                    .slot
                    .ok_or_else(|| self.err(ErrorKind::NameError, "assignment target was not resolved", range))?;
                self.store_to_slot(slot, v, &ty, range)
            }
            AssignTarget::Tuple(names) => self.destructure(names, value, range),
            AssignTarget::Subscript { value: seq, index } => self.store_subscript(seq, index, value, range),
            AssignTarget::Attribute { value: obj, attr } => self.store_attr(obj, *attr, value, range),
        }
    }

    pub(super) fn store_to_slot(&mut self, slot: Slot, v: ValueId, ty: &Ty, range: CodeRange) -> CompileResult<()> {
        match slot {
            Slot::Local(slot) => {
                if self.collecting {
                    self.join_local(slot, ty);
                    self.slot_funcs.remove(&slot);
                    self.push(Op::StoreLocal { slot, src: v });
                    return Ok(());
                }
                let want = self.slot_tys[slot as usize].clone();
                let v = self.coerce(v, ty, &want, range)?;
                self.slot_funcs.remove(&slot);
                self.push(Op::StoreLocal { slot, src: v });
                Ok(())
            }
            Slot::Global(slot) => {
                if self.collecting {
                    self.join_global(slot, ty);
                    let module = self.module;
                    // A store to a slot naming a compiled function forces
                    // later calls through the stored value.
                    self.parent.reassigned.insert((module, slot));
                    self.push(Op::StoreGlobal { slot, src: v });
                    return Ok(());
                }
                let want = self.global_ty(slot);
                let v = self.coerce(v, ty, &want, range)?;
                self.push(Op::StoreGlobal { slot, src: v });
                Ok(())
            }
            Slot::Capture(_) => Err(self.err(
                ErrorKind::TypeError,
                "captured variables are read-only; hoist the state into a mutable container",
                range,
            )),
        }
    }

    fn destructure(&mut self, names: &[Identifier], value: &'a Expr, range: CodeRange) -> CompileResult<()> {
        let (v, ty) = self.expr(value)?;
        let item_tys: Vec<Ty> = match &ty {
            Ty::Tuple(items) => {
                if items.len() != names.len() && !self.collecting {
                    return Err(self.err(
                        ErrorKind::ValueError,
                        format!("cannot unpack {} values into {} names", items.len(), names.len()),
                        range,
                    ));
                }
                items.clone()
            }
            Ty::List(elem) => vec![elem.as_ref().clone(); names.len()],
            _ if self.collecting => vec![Ty::Dyn; names.len()],
            other => {
                return Err(self.err(ErrorKind::TypeError, format!("cannot unpack {other}"), range));
            }
        };
        let getter = if matches!(ty, Ty::Tuple(_)) {
            RuntimeFn::TupleGet
        } else {
            RuntimeFn::ListGet
        };
        for (index, (name, item_ty)) in names.iter().zip(item_tys).enumerate() {
            let idx = self.emit_const_int(index as i64);
            let boxed = self.val(Ty::Dyn);
            self.push(Op::CallRuntime {
                dst: Some(boxed),
                func: getter,
                args: vec![v, idx],
            });
            let item = self.unbox_value(boxed, &item_ty);
            let slot = name
                .slot
                .ok_or_else(|| self.err(ErrorKind::NameError, "assignment target was not resolved", range))?;
            self.store_to_slot(slot, item, &item_ty, range)?;
        }
        Ok(())
    }

    fn store_subscript(&mut self, seq: &'a Expr, index: &'a Expr, value: &'a Expr, range: CodeRange) -> CompileResult<()> {
        // Mutating through a subscript demotes fixed-array candidates.
        if self.collecting {
            self.mark_seq_mutation(seq);
        }
        let (seq_v, seq_ty) = self.expr(seq)?;
        let (idx, idx_ty) = self.expr(index)?;
        let (v, v_ty) = self.expr(value)?;
        self.emit_item_store(seq_v, &seq_ty, idx, &idx_ty, v, &v_ty, range)
    }

    fn emit_item_store(
        &mut self,
        seq_v: ValueId,
        seq_ty: &Ty,
        idx: ValueId,
        idx_ty: &Ty,
        v: ValueId,
        v_ty: &Ty,
        range: CodeRange,
    ) -> CompileResult<()> {
        match seq_ty {
            Ty::List(elem) => {
                let elem = elem.clone();
                let idx = self.coerce(idx, idx_ty, &Ty::Int64, range)?;
                let v = self.coerce(v, v_ty, &elem, range)?;
                let boxed = self.box_value(v, &elem);
                self.push(Op::CallRuntime {
                    dst: None,
                    func: RuntimeFn::ListSet,
                    args: vec![seq_v, idx, boxed],
                });
                Ok(())
            }
            Ty::Dict(_, val) => {
                let val = val.clone();
                let key = self.box_value(idx, idx_ty);
                let v = self.coerce(v, v_ty, &val, range)?;
                let boxed = self.box_value(v, &val);
                self.push(Op::CallRuntime {
                    dst: None,
                    func: RuntimeFn::DictPut,
                    args: vec![seq_v, key, boxed],
                });
                Ok(())
            }
            _ if self.collecting => Ok(()),
            other => Err(self.err(
                ErrorKind::TypeError,
                format!("{other} does not support item assignment"),
                range,
            )),
        }
    }

    fn store_attr(
        &mut self,
        obj: &'a Expr,
        attr: crate::intern::StringId,
        value: &'a Expr,
        range: CodeRange,
    ) -> CompileResult<()> {
        let (obj_v, obj_ty) = self.expr(obj)?;
        let (v, v_ty) = self.expr(value)?;
        self.emit_attr_store(obj_v, &obj_ty, attr, v, &v_ty, range)
    }

    fn emit_attr_store(
        &mut self,
        obj_v: ValueId,
        obj_ty: &Ty,
        attr: crate::intern::StringId,
        v: ValueId,
        v_ty: &Ty,
        range: CodeRange,
    ) -> CompileResult<()> {
        let Ty::Class(class) = obj_ty else {
            if self.collecting {
                return Ok(());
            }
            return Err(self.err(
                ErrorKind::AttributeError,
                format!("{obj_ty} does not support attribute assignment"),
                range,
            ));
        };
        let info = self.parent.info.class(*class);
        let Some(index) = info.field_index(attr) else {
            if self.collecting {
                return Ok(());
            }
            let attr_name = self.interner().get(attr).to_owned();
            let class_name = self.interner().get(info.name).to_owned();
            return Err(self.err(
                ErrorKind::AttributeError,
                format!("'{class_name}' object has no attribute '{attr_name}'"),
                range,
            ));
        };
        let field_ty = info.fields[index as usize].1.clone();
        let v = self.coerce(v, v_ty, &field_ty, range)?;
        let boxed = self.box_value(v, &field_ty);
        self.push(Op::AttrSet {
            obj: obj_v,
            field: index,
            value: boxed,
        });
        Ok(())
    }

    /// During collection, a mutation through a name marks its slot as
    /// requiring a real list.
    pub(super) fn mark_seq_mutation(&mut self, seq: &Expr) {
        if let ExprKind::Name(ident) = &seq.kind {
            match ident.slot {
                Some(Slot::Local(slot)) => self.mark_needs_list_local(slot),
                Some(Slot::Global(slot)) => self.mark_needs_list_global(slot),
                _ => {}
            }
        }
    }

    pub(super) fn aug_assign(
        &mut self,
        target: &'a AssignTarget,
        op: BinOp,
        value: &'a Expr,
        range: CodeRange,
    ) -> CompileResult<()> {
        match target {
            AssignTarget::Name(ident) => {
                let (current, current_ty) = self.load_name(ident, range)?;
                let (v, v_ty) = self.expr(value)?;
                let (result, result_ty) = self.bin_values(op, current, &current_ty, v, &v_ty, range)?;
                let slot = ident
                    .slot
                    .ok_or_else(|| self.err(ErrorKind::NameError, "assignment target was not resolved", range))?;
                self.store_to_slot(slot, result, &result_ty, range)
            }
            AssignTarget::Subscript { value: seq, index } => {
                // Read-modify-write; the sequence and index expressions
                // are evaluated twice, which is fine for the name/index
                // forms the subset allows.
                if self.collecting {
                    self.mark_seq_mutation(seq);
                }
                let (current, current_ty) = self.lower_subscript(seq, index, range)?;
                let (v, v_ty) = self.expr(value)?;
                let (result, result_ty) = self.bin_values(op, current, &current_ty, v, &v_ty, range)?;
                let (seq_v, seq_ty) = self.expr(seq)?;
                let (idx, idx_ty) = self.expr(index)?;
                self.emit_item_store(seq_v, &seq_ty, idx, &idx_ty, result, &result_ty, range)
            }
            AssignTarget::Attribute { value: obj, attr } => {
                let (current, current_ty) = self.lower_attr_get(obj, *attr, range)?;
                let (v, v_ty) = self.expr(value)?;
                let (result, result_ty) = self.bin_values(op, current, &current_ty, v, &v_ty, range)?;
                let (obj_v, obj_ty) = self.expr(obj)?;
                self.emit_attr_store(obj_v, &obj_ty, *attr, result, &result_ty, range)
            }
            AssignTarget::Tuple(_) => Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "augmented assignment to tuple targets is not supported",
                range,
            )),
        }
    }

    // --- statements with control flow ------------------------------------

    pub(super) fn lower_try(
        &mut self,
        body: &'a [Stmt],
        handlers: &'a [ExceptHandler],
        finally: &'a [Stmt],
    ) -> CompileResult<()> {
        let has_finally = !finally.is_empty();
        // The landing pad is created under the *outer* handler context.
        let dispatch_blk = self.new_block();
        let join_blk = self.new_block();

        self.push(Op::TryPush);
        self.push_handler(dispatch_blk);
        if has_finally {
            self.cleanups.push(Cleanup::Finally(finally));
        }
        let body_blk = self.new_block();
        self.seal(Terminator::Jump(body_blk));
        self.switch_to(body_blk);
        self.stmts(body)?;
        self.pop_handler();
        if has_finally {
            self.cleanups.pop();
        }
        self.push(Op::TryPop);
        if has_finally {
            self.stmts(finally)?;
        }
        self.seal(Terminator::Jump(join_blk));

        // Landing pad: match clauses in order, re-raise on no match.
        self.switch_to(dispatch_blk);
        self.push(Op::TryPop);
        let outer_handler = self.handler();
        for handler in handlers {
            let (kind, class) = match &handler.exc_type {
                Some(ident) => {
                    let name = self.interner().get(ident.name).to_owned();
                    match super::builtin_exc_kind(&name) {
                        Some(kind) => (kind as u32, None),
                        None => match self.parent.info.class_by_name.get(&ident.name) {
                            Some(class) => (0, Some(*class)),
                            None => {
                                return Err(self.err(
                                    ErrorKind::NameError,
                                    format!("unknown exception type '{name}'"),
                                    ident.range,
                                ));
                            }
                        },
                    }
                }
                // Bare `except:` matches everything.
                None => (pyrite_runtime::ExcKind::Exception as u32, None),
            };
            let matched = self.val(Ty::Bool);
            self.push(Op::ExcMatch {
                dst: matched,
                kind,
                class,
            });
            let clause_blk = self.new_block();
            let next_blk = self.new_block();
            self.seal(Terminator::Branch {
                cond: matched,
                then_blk: clause_blk,
                else_blk: next_blk,
            });
            self.switch_to(clause_blk);
            if let Some(binding) = &handler.binding {
                let bound = self.val(Ty::Dyn);
                self.push(Op::ExcValue { dst: bound });
                let slot = binding.slot.ok_or_else(|| {
                    self.err(ErrorKind::NameError, "exception binding was not resolved", binding.range)
                })?;
                self.store_to_slot(slot, bound, &Ty::Dyn, binding.range)?;
            }
            self.push(Op::ExcClear);
            self.stmts(&handler.body)?;
            if has_finally {
                self.stmts(finally)?;
            }
            self.seal(Terminator::Jump(join_blk));
            self.switch_to(next_blk);
        }
        // No clause matched: run finally, keep unwinding.
        if has_finally {
            self.stmts(finally)?;
        }
        self.seal(Terminator::Propagate { handler: outer_handler });

        self.switch_to(join_blk);
        Ok(())
    }

    pub(super) fn lower_with(&mut self, items: &'a [WithItem], body: &'a [Stmt], range: CodeRange) -> CompileResult<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.stmts(body);
        };
        let (ctx, ctx_ty) = self.expr(&item.context)?;
        let Ty::Class(class) = ctx_ty else {
            if self.collecting {
                return self.stmts(body);
            }
            return Err(self.err(
                ErrorKind::TypeError,
                format!("{ctx_ty} is not a context manager"),
                range,
            ));
        };
        // The slot owns the context for the duration of the region.
        let ctx_slot = self.new_slot(Ty::Class(class));
        self.push(Op::StoreLocal { slot: ctx_slot, src: ctx });

        // `__enter__` (when defined) produces the bound value; otherwise
        // the context itself binds.
        let enter_name = self.intern("__enter__");
        let enter = self.parent.info.method(class, enter_name);
        let bound_value = match enter {
            Some((_, func)) => {
                let ret = self.parent.info.func(func).ret.clone();
                let dst = self.val(ret.clone());
                self.push(Op::Call {
                    dst: Some(dst),
                    func,
                    args: vec![ctx],
                });
                (dst, ret)
            }
            None => (ctx, Ty::Class(class)),
        };
        if let Some(binding) = &item.binding {
            let slot = binding
                .slot
                .ok_or_else(|| self.err(ErrorKind::NameError, "with binding was not resolved", binding.range))?;
            self.store_to_slot(slot, bound_value.0, &bound_value.1, binding.range)?;
        }

        // Exceptions inside the region run the exit before unwinding.
        let dispatch_blk = self.new_block();
        let join_blk = self.new_block();
        self.push_handler(dispatch_blk);
        self.cleanups.push(Cleanup::WithExit { ctx_slot, class });
        let body_blk = self.new_block();
        self.seal(Terminator::Jump(body_blk));
        self.switch_to(body_blk);
        if rest.is_empty() {
            self.stmts(body)?;
        } else {
            self.lower_with(rest, body, range)?;
        }
        self.cleanups.pop();
        self.pop_handler();
        self.emit_with_exit(ctx_slot, class);
        self.seal(Terminator::Jump(join_blk));

        self.switch_to(dispatch_blk);
        let outer = self.handler();
        self.emit_with_exit(ctx_slot, class);
        self.seal(Terminator::Propagate { handler: outer });

        self.switch_to(join_blk);
        Ok(())
    }

    /// Calls the context's `__exit__`, passing `None` for any extra
    /// parameters it declares.
    pub(super) fn emit_with_exit(&mut self, ctx_slot: u32, class: ClassId) {
        let exit_name = self.intern("__exit__");
        let Some((_, func)) = self.parent.info.method(class, exit_name) else {
            return;
        };
        let nparams = self.parent.info.func(func).params.len();
        let ctx = self.val(Ty::Class(class));
        self.push(Op::LoadLocal {
            dst: ctx,
            slot: ctx_slot,
        });
        let mut args = vec![ctx];
        for _ in 1..nparams {
            let none = self.val(Ty::Dyn);
            self.push(Op::Const {
                dst: none,
                value: Const::None,
            });
            args.push(none);
        }
        self.push(Op::Call { dst: None, func, args });
    }
}
