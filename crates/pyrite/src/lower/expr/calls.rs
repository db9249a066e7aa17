//! Call dispatch: builtins, class construction, method calls, module
//! primitives, closures, and the suspension points (`await`, `yield`),
//! plus loop lowering shared by `for` and comprehensions.

use super::super::{FnBody, FnLowerer};
use crate::{
    ast::{AssignTarget, BinOp, CmpOp, CodeRange, Expr, ExprKind, FunctionDef, Slot, Stmt},
    comptime::Const,
    errors::{CompileResult, ErrorKind},
    infer::{FuncDecl, FuncKind, func_sig},
    ir::{BlockId, Op, RuntimeFn, Terminator, ValueId},
    types::{ClassId, FuncId, Ty},
};

impl<'p, 'a> FnLowerer<'p, 'a> {
    pub(in super::super) fn lower_call(
        &mut self,
        func: &'a Expr,
        args: &'a [Expr],
        star_arg: Option<&'a Expr>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        match &func.kind {
            ExprKind::Attribute { value, attr } => self.lower_method_call(value, *attr, args, star_arg, range),
            ExprKind::Name(ident) => {
                if let Some(star) = star_arg
                    && ident.slot.is_some()
                {
                    let _ = star;
                    return Err(self.err(
                        ErrorKind::UnsupportedFeatureError,
                        "star arguments are only supported for gather",
                        range,
                    ));
                }
                match ident.slot {
                    None => {
                        let name = self.interner().get(ident.name).to_owned();
                        // Class constructors first, builtins second.
                        if let Some(class) = self.parent.info.class_by_name.get(&ident.name).copied() {
                            return self.construct_class(class, args, range);
                        }
                        self.lower_builtin(&name, args, star_arg, range)
                    }
                    Some(Slot::Local(slot)) => {
                        if let Some(func_id) = self.slot_funcs.get(&slot).copied() {
                            return self.call_direct(func_id, args, range);
                        }
                        let (callee, callee_ty) = self.load_name(ident, range)?;
                        let lowered = self.lower_args(args)?;
                        self.call_function_value(callee, &callee_ty, lowered, range)
                    }
                    Some(Slot::Global(slot)) => {
                        let key = (self.module, ident.name);
                        if let Some(func_id) = self.parent.info.func_by_name.get(&key).copied()
                            && !self.parent.reassigned.contains(&(self.module, slot))
                        {
                            return self.call_direct(func_id, args, range);
                        }
                        let (callee, callee_ty) = self.load_name(ident, range)?;
                        let lowered = self.lower_args(args)?;
                        self.call_function_value(callee, &callee_ty, lowered, range)
                    }
                    Some(Slot::Capture(_)) => {
                        let (callee, callee_ty) = self.load_name(ident, range)?;
                        let lowered = self.lower_args(args)?;
                        self.call_function_value(callee, &callee_ty, lowered, range)
                    }
                }
            }
            // Immediately invoked lambdas and other callable expressions.
            _ => {
                let (callee, callee_ty) = self.expr(func)?;
                let lowered = self.lower_args(args)?;
                self.call_function_value(callee, &callee_ty, lowered, range)
            }
        }
    }

    fn lower_args(&mut self, args: &'a [Expr]) -> CompileResult<Vec<(ValueId, Ty)>> {
        args.iter().map(|arg| self.expr(arg)).collect()
    }

    /// Direct call to a compiled function. Calling an async function
    /// builds a coroutine frame; calling a generator builds its frame.
    fn call_direct(&mut self, func_id: FuncId, args: &'a [Expr], range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let decl = self.parent.info.func(func_id);
        let params = decl.params.clone();
        let ret = decl.ret.clone();
        let (is_async, is_generator) = (decl.is_async, decl.is_generator);
        if args.len() != params.len() && !self.collecting {
            let name = self.interner().get(decl.name).to_owned();
            return Err(self.err(
                ErrorKind::TypeError,
                format!("{name}() takes {} arguments but {} were given", params.len(), args.len()),
                range,
            ));
        }
        let mut lowered = Vec::with_capacity(args.len());
        for (arg, want) in args.iter().zip(&params) {
            let (v, ty) = self.expr(arg)?;
            lowered.push(self.coerce(v, &ty, want, range)?);
        }
        if is_async {
            let ty = Ty::Coroutine(Box::new(ret));
            let dst = self.val(ty.clone());
            self.push(Op::MakeFrame {
                dst,
                func: func_id,
                args: lowered,
            });
            return Ok((dst, ty));
        }
        if is_generator {
            let ty = Ty::Generator(Box::new(ret));
            let dst = self.val(ty.clone());
            self.push(Op::MakeFrame {
                dst,
                func: func_id,
                args: lowered,
            });
            return Ok((dst, ty));
        }
        let dst = if ret == Ty::None {
            None
        } else {
            Some(self.val(ret.clone()))
        };
        self.push(Op::Call {
            dst,
            func: func_id,
            args: lowered,
        });
        let result = match dst {
            Some(v) => v,
            None => {
                let none = self.val(Ty::None);
                self.push(Op::Const {
                    dst: none,
                    value: Const::None,
                });
                none
            }
        };
        Ok((result, ret))
    }

    /// Indirect call through a function value (closure record).
    pub(in super::super) fn call_function_value(
        &mut self,
        callee: ValueId,
        callee_ty: &Ty,
        args: Vec<(ValueId, Ty)>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let Ty::Func(sig) = callee_ty else {
            if self.collecting {
                return Ok((self.val(Ty::Dyn), Ty::Dyn));
            }
            return Err(self.err(
                ErrorKind::TypeError,
                format!("{callee_ty} is not callable"),
                range,
            ));
        };
        if args.len() != sig.params.len() && !self.collecting {
            return Err(self.err(
                ErrorKind::TypeError,
                format!("function takes {} arguments but {} were given", sig.params.len(), args.len()),
                range,
            ));
        }
        let mut lowered = Vec::with_capacity(args.len());
        for ((v, ty), want) in args.into_iter().zip(&sig.params) {
            lowered.push(self.coerce(v, &ty, want, range)?);
        }
        let ret = sig.ret.clone();
        let dst = if ret == Ty::None {
            None
        } else {
            Some(self.val(ret.clone()))
        };
        self.push(Op::CallClosure {
            dst,
            callee,
            args: lowered,
        });
        let result = match dst {
            Some(v) => v,
            None => {
                let none = self.val(Ty::None);
                self.push(Op::Const {
                    dst: none,
                    value: Const::None,
                });
                none
            }
        };
        Ok((result, ret))
    }

    pub(in super::super) fn construct_class(
        &mut self,
        class: ClassId,
        args: &'a [Expr],
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let info = self.parent.info.class(class);
        let init = info.init;
        let obj = self.val(Ty::Class(class));
        self.push(Op::AllocObj { dst: obj, class });
        if let Some(init) = init {
            let params = self.parent.info.func(init).params.clone();
            if args.len() + 1 != params.len() && !self.collecting {
                let name = self.interner().get(self.parent.info.class(class).name).to_owned();
                return Err(self.err(
                    ErrorKind::TypeError,
                    format!("{name}() takes {} arguments but {} were given", params.len() - 1, args.len()),
                    range,
                ));
            }
            let mut lowered = vec![obj];
            for (arg, want) in args.iter().zip(params.iter().skip(1)) {
                let (v, ty) = self.expr(arg)?;
                lowered.push(self.coerce(v, &ty, want, range)?);
            }
            self.push(Op::Call {
                dst: None,
                func: init,
                args: lowered,
            });
        } else if !args.is_empty() && !self.collecting {
            // Exception subclasses without __init__ store their message
            // in the conventional first field.
            let fields = self.parent.info.class(class).fields.len();
            let is_exception = self.parent.info.class(class).is_exception;
            if is_exception && fields == 0 && args.len() == 1 {
                // Message-only exceptions carry the text on the raise.
                let _ = &args[0];
            } else {
                return Err(self.err(
                    ErrorKind::TypeError,
                    "this class takes no constructor arguments",
                    range,
                ));
            }
        }
        Ok((obj, Ty::Class(class)))
    }

    // --- builtins --------------------------------------------------------

    fn lower_builtin(
        &mut self,
        name: &str,
        args: &'a [Expr],
        star_arg: Option<&'a Expr>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        if star_arg.is_some() {
            return Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "star arguments are only supported for gather",
                range,
            ));
        }
        match name {
            "print" => {
                let mut boxed = Vec::with_capacity(args.len());
                for arg in args {
                    let (v, ty) = self.expr(arg)?;
                    let display = self.display_value(v, &ty, range)?;
                    boxed.push(display);
                }
                self.push(Op::Print { args: boxed });
                let none = self.val(Ty::None);
                self.push(Op::Const {
                    dst: none,
                    value: Const::None,
                });
                Ok((none, Ty::None))
            }
            "len" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "len() takes exactly one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                self.lower_len(v, &ty, range)
            }
            "str" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "str() takes exactly one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                let s = self.display_str(v, &ty, range)?;
                Ok((s, Ty::Str))
            }
            "int" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "int() takes exactly one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                match ty {
                    Ty::Int64 => Ok((v, Ty::Int64)),
                    Ty::Bool | Ty::Float64 => {
                        let dst = self.val(Ty::Int64);
                        self.push(Op::Cast { dst, src: v });
                        Ok((dst, Ty::Int64))
                    }
                    Ty::Str => {
                        let dst = self.val(Ty::Int64);
                        self.push(Op::CallRuntime {
                            dst: Some(dst),
                            func: RuntimeFn::StrToInt,
                            args: vec![v],
                        });
                        Ok((dst, Ty::Int64))
                    }
                    Ty::BigInt => Ok((v, Ty::BigInt)),
                    _ if self.collecting => Ok((self.val(Ty::Int64), Ty::Int64)),
                    other => Err(self.err(ErrorKind::TypeError, format!("int() argument must be numeric or str, got {other}"), range)),
                }
            }
            "float" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "float() takes exactly one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                match ty {
                    Ty::Float64 => Ok((v, Ty::Float64)),
                    Ty::Int64 | Ty::Bool => {
                        let dst = self.val(Ty::Float64);
                        self.push(Op::Cast { dst, src: v });
                        Ok((dst, Ty::Float64))
                    }
                    Ty::Str => {
                        let dst = self.val(Ty::Float64);
                        self.push(Op::CallRuntime {
                            dst: Some(dst),
                            func: RuntimeFn::StrToFloat,
                            args: vec![v],
                        });
                        Ok((dst, Ty::Float64))
                    }
                    _ if self.collecting => Ok((self.val(Ty::Float64), Ty::Float64)),
                    other => Err(self.err(ErrorKind::TypeError, format!("float() argument must be numeric or str, got {other}"), range)),
                }
            }
            "bool" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "bool() takes exactly one argument", range));
                };
                let cond = self.truthy_expr(arg)?;
                Ok((cond, Ty::Bool))
            }
            "abs" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "abs() takes exactly one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                match ty {
                    Ty::Float64 => {
                        let dst = self.val(Ty::Float64);
                        self.push(Op::CallRuntime {
                            dst: Some(dst),
                            func: RuntimeFn::MathFabs,
                            args: vec![v],
                        });
                        Ok((dst, Ty::Float64))
                    }
                    Ty::Int64 | Ty::Bool => self.lower_int_abs(v, &ty, range),
                    _ if self.collecting => Ok((self.val(Ty::Int64), Ty::Int64)),
                    other => Err(self.err(ErrorKind::TypeError, format!("bad operand type for abs(): {other}"), range)),
                }
            }
            "min" | "max" => self.lower_min_max(name == "min", args, range),
            "sum" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "sum() takes exactly one argument", range));
                };
                self.lower_sum(arg, range)
            }
            "range" | "enumerate" | "zip" => Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                format!("{name}() is only supported as a for-loop iterable"),
                range,
            )),
            _ => Err(self.err(ErrorKind::NameError, format!("name '{name}' is not defined"), range)),
        }
    }

    /// A printable `RtVal`: classes with `__str__` print their string
    /// form, everything else boxes directly.
    fn display_value(&mut self, v: ValueId, ty: &Ty, range: CodeRange) -> CompileResult<ValueId> {
        if let Ty::Class(_) = ty {
            let s = self.display_str(v, ty, range)?;
            return Ok(self.box_value(s, &Ty::Str));
        }
        if let Ty::FixedArr(elem, n) = ty {
            let (elem, n) = (elem.clone(), *n);
            let list = self.arr_to_list(v, &elem, n, &elem)?;
            return Ok(self.box_value(list, &Ty::List(elem)));
        }
        Ok(self.box_value(v, ty))
    }

    fn display_str(&mut self, v: ValueId, ty: &Ty, range: CodeRange) -> CompileResult<ValueId> {
        if let Ty::Class(class) = ty {
            let name = self.intern("__str__");
            if let Some((_, func)) = self.parent.info.method(*class, name) {
                let ret = self.parent.info.func(func).ret.clone();
                let raw = self.val(ret.clone());
                self.push(Op::Call {
                    dst: Some(raw),
                    func,
                    args: vec![v],
                });
                return self.coerce(raw, &ret, &Ty::Str, range);
            }
            // No __str__: a class-name placeholder, like the runtime's
            // fallback repr for unknown objects.
            let class_name = self.interner().get(self.parent.info.class(*class).name).to_owned();
            let dst = self.val(Ty::Str);
            self.push(Op::Const {
                dst,
                value: Const::Str(format!("<{class_name} object>")),
            });
            return Ok(dst);
        }
        Ok(self.stringify(v, ty))
    }

    fn lower_len(&mut self, v: ValueId, ty: &Ty, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let func = match ty {
            Ty::FixedArr(_, n) => {
                let dst = self.emit_const_int(*n as i64);
                return Ok((dst, Ty::Int64));
            }
            Ty::Tuple(items) => {
                let dst = self.emit_const_int(items.len() as i64);
                return Ok((dst, Ty::Int64));
            }
            Ty::List(_) => RuntimeFn::ListLen,
            Ty::Dict(..) => RuntimeFn::DictLen,
            Ty::Set(_) => RuntimeFn::SetLen,
            Ty::Str => RuntimeFn::StrLen,
            Ty::Bytes => RuntimeFn::BytesLen,
            Ty::Class(class) => {
                let name = self.intern("__len__");
                let Some((_, func)) = self.parent.info.method(*class, name) else {
                    return Err(self.err(ErrorKind::TypeError, format!("{ty} has no len()"), range));
                };
                let ret = self.parent.info.func(func).ret.clone();
                let raw = self.val(ret.clone());
                self.push(Op::Call {
                    dst: Some(raw),
                    func,
                    args: vec![v],
                });
                let result = self.coerce(raw, &ret, &Ty::Int64, range)?;
                return Ok((result, Ty::Int64));
            }
            _ if self.collecting => {
                return Ok((self.val(Ty::Int64), Ty::Int64));
            }
            other => {
                return Err(self.err(ErrorKind::TypeError, format!("{other} has no len()"), range));
            }
        };
        let dst = self.val(Ty::Int64);
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func,
            args: vec![v],
        });
        Ok((dst, Ty::Int64))
    }

    fn lower_int_abs(&mut self, v: ValueId, ty: &Ty, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let v = self.coerce(v, ty, &Ty::Int64, range)?;
        let slot = self.new_slot(Ty::Int64);
        self.push(Op::StoreLocal { slot, src: v });
        let zero = self.emit_const_int(0);
        let reloaded = self.val(Ty::Int64);
        self.push(Op::LoadLocal { dst: reloaded, slot });
        let is_neg = self.val(Ty::Bool);
        self.push(Op::Cmp {
            dst: is_neg,
            op: CmpOp::Lt,
            lhs: reloaded,
            rhs: zero,
        });
        let neg_blk = self.new_block();
        let done_blk = self.new_block();
        self.seal(Terminator::Branch {
            cond: is_neg,
            then_blk: neg_blk,
            else_blk: done_blk,
        });
        self.switch_to(neg_blk);
        let value = self.val(Ty::Int64);
        self.push(Op::LoadLocal { dst: value, slot });
        let negated = self.val(Ty::Int64);
        self.push(Op::Neg { dst: negated, src: value });
        self.push(Op::StoreLocal { slot, src: negated });
        self.seal(Terminator::Jump(done_blk));
        self.switch_to(done_blk);
        let result = self.val(Ty::Int64);
        self.push(Op::LoadLocal { dst: result, slot });
        Ok((result, Ty::Int64))
    }

    fn lower_min_max(&mut self, is_min: bool, args: &'a [Expr], range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        // Pairwise over two or more scalar arguments.
        if args.len() >= 2 {
            let (first, first_ty) = self.expr(&args[0])?;
            let mut acc_ty = first_ty;
            let slot = self.new_slot(acc_ty.clone());
            self.push(Op::StoreLocal { slot, src: first });
            for arg in &args[1..] {
                let (v, ty) = self.expr(arg)?;
                let joined = acc_ty.join(&ty).unwrap_or(Ty::Float64);
                let candidate_slot = self.new_slot(joined.clone());
                let v = self.coerce(v, &ty, &joined, range)?;
                self.push(Op::StoreLocal {
                    slot: candidate_slot,
                    src: v,
                });
                let current = self.val(acc_ty.clone());
                self.push(Op::LoadLocal { dst: current, slot });
                let current = self.coerce(current, &acc_ty.clone(), &joined, range)?;
                let candidate = self.val(joined.clone());
                self.push(Op::LoadLocal {
                    dst: candidate,
                    slot: candidate_slot,
                });
                let cond = self.val(Ty::Bool);
                self.push(Op::Cmp {
                    dst: cond,
                    op: if is_min { CmpOp::Lt } else { CmpOp::Gt },
                    lhs: candidate,
                    rhs: current,
                });
                let take_blk = self.new_block();
                let keep_blk = self.new_block();
                self.seal(Terminator::Branch {
                    cond,
                    then_blk: take_blk,
                    else_blk: keep_blk,
                });
                self.switch_to(take_blk);
                let replacement = self.val(joined.clone());
                self.push(Op::LoadLocal {
                    dst: replacement,
                    slot: candidate_slot,
                });
                self.push(Op::StoreLocal { slot, src: replacement });
                self.seal(Terminator::Jump(keep_blk));
                self.switch_to(keep_blk);
                acc_ty = joined;
                self.set_slot_ty(slot, acc_ty.clone());
            }
            let result = self.val(acc_ty.clone());
            self.push(Op::LoadLocal { dst: result, slot });
            return Ok((result, acc_ty));
        }
        // Single sequence argument.
        let [arg] = args else {
            return Err(self.err(ErrorKind::TypeError, "min()/max() need at least one argument", range));
        };
        let (seq, seq_ty) = self.expr(arg)?;
        let Some(elem) = seq_ty.iter_elem() else {
            if self.collecting {
                return Ok((self.val(Ty::Dyn), Ty::Dyn));
            }
            return Err(self.err(ErrorKind::TypeError, format!("{seq_ty} is not iterable"), range));
        };
        if !elem.is_numeric() && !self.collecting {
            return Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "min()/max() over non-numeric sequences is not supported",
                range,
            ));
        }
        let acc_slot = self.new_slot(elem.clone());
        let seeded_slot = self.new_slot(Ty::Bool);
        let false_val = self.val(Ty::Bool);
        self.push(Op::Const {
            dst: false_val,
            value: Const::Bool(false),
        });
        self.push(Op::StoreLocal {
            slot: seeded_slot,
            src: false_val,
        });
        self.iterate_sequence_value(seq, &seq_ty, range, &mut |fx, item, item_ty, _continue_blk| {
            let item = fx.coerce(item, &item_ty, &elem, range)?;
            let item_slot = fx.new_slot(elem.clone());
            fx.push(Op::StoreLocal { slot: item_slot, src: item });
            let seeded = fx.val(Ty::Bool);
            fx.push(Op::LoadLocal {
                dst: seeded,
                slot: seeded_slot,
            });
            let compare_blk = fx.new_block();
            let seed_blk = fx.new_block();
            let next_blk = fx.new_block();
            fx.seal(Terminator::Branch {
                cond: seeded,
                then_blk: compare_blk,
                else_blk: seed_blk,
            });
            fx.switch_to(seed_blk);
            let item_v = fx.val(elem.clone());
            fx.push(Op::LoadLocal { dst: item_v, slot: item_slot });
            fx.push(Op::StoreLocal { slot: acc_slot, src: item_v });
            let true_val = fx.val(Ty::Bool);
            fx.push(Op::Const {
                dst: true_val,
                value: Const::Bool(true),
            });
            fx.push(Op::StoreLocal {
                slot: seeded_slot,
                src: true_val,
            });
            fx.seal(Terminator::Jump(next_blk));
            fx.switch_to(compare_blk);
            let current = fx.val(elem.clone());
            fx.push(Op::LoadLocal { dst: current, slot: acc_slot });
            let candidate = fx.val(elem.clone());
            fx.push(Op::LoadLocal {
                dst: candidate,
                slot: item_slot,
            });
            let cond = fx.val(Ty::Bool);
            fx.push(Op::Cmp {
                dst: cond,
                op: if is_min { CmpOp::Lt } else { CmpOp::Gt },
                lhs: candidate,
                rhs: current,
            });
            let take_blk = fx.new_block();
            fx.seal(Terminator::Branch {
                cond,
                then_blk: take_blk,
                else_blk: next_blk,
            });
            fx.switch_to(take_blk);
            let replacement = fx.val(elem.clone());
            fx.push(Op::LoadLocal {
                dst: replacement,
                slot: item_slot,
            });
            fx.push(Op::StoreLocal {
                slot: acc_slot,
                src: replacement,
            });
            fx.seal(Terminator::Jump(next_blk));
            fx.switch_to(next_blk);
            Ok(())
        })?;
        let result = self.val(elem.clone());
        self.push(Op::LoadLocal { dst: result, slot: acc_slot });
        Ok((result, elem))
    }

    fn lower_sum(&mut self, arg: &'a Expr, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let (seq, seq_ty) = self.expr(arg)?;
        let elem = seq_ty.iter_elem().unwrap_or(Ty::Dyn);
        let acc_ty = match &elem {
            Ty::Float64 => Ty::Float64,
            Ty::Dyn => Ty::Dyn,
            _ => Ty::Int64,
        };
        let acc_slot = self.new_slot(acc_ty.clone());
        let zero = if acc_ty == Ty::Float64 {
            let dst = self.val(Ty::Float64);
            self.push(Op::Const {
                dst,
                value: Const::Float(0.0),
            });
            dst
        } else {
            let z = self.emit_const_int(0);
            if acc_ty == Ty::Dyn {
                self.box_value(z, &Ty::Int64)
            } else {
                z
            }
        };
        self.push(Op::StoreLocal { slot: acc_slot, src: zero });
        let acc_ty_inner = acc_ty.clone();
        self.iterate_sequence_value(seq, &seq_ty, range, &mut |fx, item, item_ty, _continue_blk| {
            let current = fx.val(acc_ty_inner.clone());
            fx.push(Op::LoadLocal {
                dst: current,
                slot: acc_slot,
            });
            let (sum, sum_ty) = fx.bin_values(BinOp::Add, current, &acc_ty_inner, item, &item_ty, range)?;
            let sum = fx.coerce(sum, &sum_ty, &acc_ty_inner, range)?;
            fx.push(Op::StoreLocal { slot: acc_slot, src: sum });
            Ok(())
        })?;
        let result = self.val(acc_ty.clone());
        self.push(Op::LoadLocal {
            dst: result,
            slot: acc_slot,
        });
        Ok((result, acc_ty))
    }

    // --- method and module calls ----------------------------------------

    fn lower_method_call(
        &mut self,
        recv: &'a Expr,
        attr: crate::intern::StringId,
        args: &'a [Expr],
        star_arg: Option<&'a Expr>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let method = self.interner().get(attr).to_owned();
        // Imported user modules: a cross-module call resolves to the
        // other module's compiled function (an extern at link time).
        if let ExprKind::Name(ident) = &recv.kind
            && ident.slot.is_none()
            && let Some(module_index) = self.parent.info.module_by_name.get(&ident.name).copied()
        {
            if let Some(func_id) = self.parent.info.func_by_name.get(&(module_index, attr)).copied() {
                return self.call_direct(func_id, args, range);
            }
            let module_name = self.interner().get(ident.name).to_owned();
            return Err(self.err(
                ErrorKind::AttributeError,
                format!("module '{module_name}' has no function '{method}'"),
                range,
            ));
        }
        // Built-in module calls: the receiver is an unresolved module
        // name (or a dotted module path like os.path).
        if let Some(module_path) = self.module_path_of(recv) {
            return self.lower_module_call(&module_path, &method, args, star_arg, range);
        }
        // hashlib digests chain: hashlib.md5(data).hexdigest().
        if method == "hexdigest"
            && let ExprKind::Call {
                func: inner_func,
                args: inner_args,
                star_arg: None,
            } = &recv.kind
            && let ExprKind::Attribute { value, attr: algo } = &inner_func.kind
            && self.module_path_of(value).as_deref() == Some("hashlib")
        {
            let algo = self.interner().get(*algo).to_owned();
            let func = match algo.as_str() {
                "md5" => RuntimeFn::HashlibMd5,
                "sha1" => RuntimeFn::HashlibSha1,
                "sha256" => RuntimeFn::HashlibSha256,
                _ => {
                    return Err(self.err(
                        ErrorKind::AttributeError,
                        format!("hashlib has no algorithm '{algo}'"),
                        range,
                    ));
                }
            };
            let [data] = inner_args.as_slice() else {
                return Err(self.err(ErrorKind::TypeError, "hash constructors take one argument", range));
            };
            let (data_v, data_ty) = self.expr(data)?;
            if !matches!(data_ty, Ty::Str | Ty::Bytes) && !self.collecting {
                return Err(self.err(ErrorKind::TypeError, "hash input must be str or bytes", range));
            }
            let dst = self.val(Ty::Str);
            self.push(Op::CallRuntime {
                dst: Some(dst),
                func,
                args: vec![data_v],
            });
            return Ok((dst, Ty::Str));
        }

        let (obj, obj_ty) = self.expr(recv)?;
        match &obj_ty {
            Ty::List(elem) => {
                let elem = elem.as_ref().clone();
                if matches!(method.as_str(), "append" | "pop" | "insert" | "remove" | "sort" | "reverse")
                    && self.collecting
                {
                    self.mark_seq_mutation(recv);
                }
                self.lower_list_method(obj, &elem, &method, args, range)
            }
            Ty::FixedArr(elem, _) => {
                // Mutation of a fixed-array candidate forces the slot to
                // a list; the emit pass sees the demoted type.
                if self.collecting {
                    self.mark_seq_mutation(recv);
                    let elem = elem.as_ref().clone();
                    self.lower_list_method(obj, &elem, &method, args, range)
                } else {
                    Err(self.err(
                        ErrorKind::TypeError,
                        format!("fixed arrays have no method '{method}'"),
                        range,
                    ))
                }
            }
            Ty::Dict(key, value) => {
                let (key, value) = (key.as_ref().clone(), value.as_ref().clone());
                self.lower_dict_method(obj, &key, &value, &method, args, range)
            }
            Ty::Set(elem) => {
                let elem = elem.as_ref().clone();
                match method.as_str() {
                    "add" => {
                        let [arg] = args else {
                            return Err(self.err(ErrorKind::TypeError, "set.add() takes one argument", range));
                        };
                        let (v, ty) = self.expr(arg)?;
                        let v = self.coerce(v, &ty, &elem, range)?;
                        let boxed = self.box_value(v, &elem);
                        self.push(Op::CallRuntime {
                            dst: None,
                            func: RuntimeFn::SetAdd,
                            args: vec![obj, boxed],
                        });
                        let none = self.val(Ty::None);
                        self.push(Op::Const {
                            dst: none,
                            value: Const::None,
                        });
                        Ok((none, Ty::None))
                    }
                    _ => Err(self.err(
                        ErrorKind::AttributeError,
                        format!("set has no method '{method}'"),
                        range,
                    )),
                }
            }
            Ty::Str => self.lower_str_method(obj, &method, args, range),
            Ty::Queue(elem) => {
                let elem = elem.as_ref().clone();
                self.lower_queue_method(obj, &elem, &method, args, range)
            }
            Ty::Class(class) => {
                let name = self.intern(&method);
                let Some((slot, func)) = self.parent.info.method(*class, name) else {
                    let class_name = self.interner().get(self.parent.info.class(*class).name).to_owned();
                    return Err(self.err(
                        ErrorKind::AttributeError,
                        format!("'{class_name}' object has no method '{method}'"),
                        range,
                    ));
                };
                let params = self.parent.info.func(func).params.clone();
                let ret = self.parent.info.func(func).ret.clone();
                let is_async = self.parent.info.func(func).is_async;
                if args.len() + 1 != params.len() && !self.collecting {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("{method}() takes {} arguments but {} were given", params.len() - 1, args.len()),
                        range,
                    ));
                }
                let mut lowered = vec![obj];
                for (arg, want) in args.iter().zip(params.iter().skip(1)) {
                    let (v, ty) = self.expr(arg)?;
                    lowered.push(self.coerce(v, &ty, want, range)?);
                }
                if is_async {
                    let ty = Ty::Coroutine(Box::new(ret));
                    let dst = self.val(ty.clone());
                    self.push(Op::MakeFrame {
                        dst,
                        func,
                        args: lowered,
                    });
                    return Ok((dst, ty));
                }
                let dst = if ret == Ty::None {
                    None
                } else {
                    Some(self.val(ret.clone()))
                };
                // Devirtualized when no subclass overrides the slot; a
                // base-typed receiver with overrides below dispatches
                // through the vtable.
                if self.parent.info.slot_overridden(*class, slot) {
                    self.push(Op::CallVirtual {
                        dst,
                        recv: obj,
                        class: *class,
                        slot,
                        args: lowered[1..].to_vec(),
                    });
                } else {
                    self.push(Op::Call {
                        dst,
                        func,
                        args: lowered,
                    });
                }
                let result = match dst {
                    Some(v) => v,
                    None => {
                        let none = self.val(Ty::None);
                        self.push(Op::Const {
                            dst: none,
                            value: Const::None,
                        });
                        none
                    }
                };
                Ok((result, ret))
            }
            _ if self.collecting => Ok((self.val(Ty::Dyn), Ty::Dyn)),
            other => Err(self.err(
                ErrorKind::TypeError,
                format!("{other} has no method '{method}'"),
                range,
            )),
        }
    }

    /// Dotted module path of an expression (`asyncio`, `os.path`), when
    /// it bottoms out in an unresolved module name.
    fn module_path_of(&self, e: &Expr) -> Option<String> {
        match &e.kind {
            ExprKind::Name(ident) if ident.slot.is_none() => {
                let name = self.interner().get(ident.name);
                let known = ["asyncio", "json", "math", "hashlib", "re", "os", "zlib"];
                known.contains(&name).then(|| name.to_owned())
            }
            ExprKind::Attribute { value, attr } => {
                let base = self.module_path_of(value)?;
                Some(format!("{base}.{}", self.interner().get(*attr)))
            }
            _ => None,
        }
    }

    fn lower_list_method(
        &mut self,
        obj: ValueId,
        elem: &Ty,
        method: &str,
        args: &'a [Expr],
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let none = |fx: &mut Self| {
            let none = fx.val(Ty::None);
            fx.push(Op::Const {
                dst: none,
                value: Const::None,
            });
            (none, Ty::None)
        };
        match method {
            "append" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "append() takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                let v = self.coerce(v, &ty, elem, range)?;
                let boxed = self.box_value(v, elem);
                self.push(Op::CallRuntime {
                    dst: None,
                    func: RuntimeFn::ListPush,
                    args: vec![obj, boxed],
                });
                Ok(none(self))
            }
            "pop" => {
                let index = match args {
                    [] => self.emit_const_int(super::SLICE_MISSING),
                    [arg] => {
                        let (v, ty) = self.expr(arg)?;
                        self.coerce(v, &ty, &Ty::Int64, range)?
                    }
                    _ => return Err(self.err(ErrorKind::TypeError, "pop() takes at most one argument", range)),
                };
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::ListPop,
                    args: vec![obj, index],
                });
                let result = self.unbox_value(boxed, elem);
                Ok((result, elem.clone()))
            }
            "insert" => {
                let [index, value] = args else {
                    return Err(self.err(ErrorKind::TypeError, "insert() takes two arguments", range));
                };
                let (iv, it) = self.expr(index)?;
                let iv = self.coerce(iv, &it, &Ty::Int64, range)?;
                let (v, ty) = self.expr(value)?;
                let v = self.coerce(v, &ty, elem, range)?;
                let boxed = self.box_value(v, elem);
                self.push(Op::CallRuntime {
                    dst: None,
                    func: RuntimeFn::ListInsert,
                    args: vec![obj, iv, boxed],
                });
                Ok(none(self))
            }
            "remove" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "remove() takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                let boxed = self.box_value(v, &ty);
                self.push(Op::CallRuntime {
                    dst: None,
                    func: RuntimeFn::ListRemove,
                    args: vec![obj, boxed],
                });
                Ok(none(self))
            }
            "index" | "count" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "this method takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                let boxed = self.box_value(v, &ty);
                let dst = self.val(Ty::Int64);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: if method == "index" {
                        RuntimeFn::ListIndex
                    } else {
                        RuntimeFn::ListCount
                    },
                    args: vec![obj, boxed],
                });
                Ok((dst, Ty::Int64))
            }
            "sort" | "reverse" => {
                if !args.is_empty() {
                    return Err(self.err(ErrorKind::TypeError, "this method takes no arguments", range));
                }
                self.push(Op::CallRuntime {
                    dst: None,
                    func: if method == "sort" {
                        RuntimeFn::ListSort
                    } else {
                        RuntimeFn::ListReverse
                    },
                    args: vec![obj],
                });
                Ok(none(self))
            }
            _ => Err(self.err(
                ErrorKind::AttributeError,
                format!("list has no method '{method}'"),
                range,
            )),
        }
    }

    fn lower_dict_method(
        &mut self,
        obj: ValueId,
        key_ty: &Ty,
        val_ty: &Ty,
        method: &str,
        args: &'a [Expr],
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        match method {
            "keys" | "values" | "items" => {
                if !args.is_empty() {
                    return Err(self.err(ErrorKind::TypeError, "this method takes no arguments", range));
                }
                let (func, elem) = match method {
                    "keys" => (RuntimeFn::DictKeys, key_ty.clone()),
                    "values" => (RuntimeFn::DictValues, val_ty.clone()),
                    _ => (
                        RuntimeFn::DictItems,
                        Ty::Tuple(vec![key_ty.clone(), val_ty.clone()]),
                    ),
                };
                let ty = Ty::List(Box::new(elem));
                let dst = self.val(ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func,
                    args: vec![obj],
                });
                Ok((dst, ty))
            }
            "get" => {
                let (key, default) = match args {
                    [key] => (key, None),
                    [key, default] => (key, Some(default)),
                    _ => return Err(self.err(ErrorKind::TypeError, "get() takes one or two arguments", range)),
                };
                let (kv, kt) = self.expr(key)?;
                let boxed_key = self.box_value(kv, &kt);
                let default_boxed = match default {
                    Some(default) => {
                        let (dv, dt) = self.expr(default)?;
                        let dv = self.coerce(dv, &dt, val_ty, range)?;
                        self.box_value(dv, val_ty)
                    }
                    None => {
                        let none = self.val(Ty::Dyn);
                        self.push(Op::Const {
                            dst: none,
                            value: Const::None,
                        });
                        none
                    }
                };
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::DictGetDefault,
                    args: vec![obj, boxed_key, default_boxed],
                });
                // Without a default the miss value is None, so the
                // result is dynamic unless a default pins the type.
                let result_ty = if default.is_some() { val_ty.clone() } else { Ty::Dyn };
                let result = self.unbox_value(boxed, &result_ty);
                Ok((result, result_ty))
            }
            _ => Err(self.err(
                ErrorKind::AttributeError,
                format!("dict has no method '{method}'"),
                range,
            )),
        }
    }

    fn lower_str_method(
        &mut self,
        obj: ValueId,
        method: &str,
        args: &'a [Expr],
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        let expect_args = |fx: &Self, n: usize| -> CompileResult<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(fx.err(
                    ErrorKind::TypeError,
                    format!("{method}() takes {n} arguments"),
                    range,
                ))
            }
        };
        match method {
            "upper" | "lower" | "strip" => {
                expect_args(self, 0)?;
                let func = match method {
                    "upper" => RuntimeFn::StrUpper,
                    "lower" => RuntimeFn::StrLower,
                    _ => RuntimeFn::StrStrip,
                };
                let dst = self.val(Ty::Str);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func,
                    args: vec![obj],
                });
                Ok((dst, Ty::Str))
            }
            "replace" => {
                expect_args(self, 2)?;
                let (from, ft) = self.expr(&args[0])?;
                let (to, tt) = self.expr(&args[1])?;
                if (ft != Ty::Str || tt != Ty::Str) && !self.collecting {
                    return Err(self.err(ErrorKind::TypeError, "replace() arguments must be strings", range));
                }
                let dst = self.val(Ty::Str);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::StrReplace,
                    args: vec![obj, from, to],
                });
                Ok((dst, Ty::Str))
            }
            "find" => {
                expect_args(self, 1)?;
                let (needle, nt) = self.expr(&args[0])?;
                if nt != Ty::Str && !self.collecting {
                    return Err(self.err(ErrorKind::TypeError, "find() argument must be a string", range));
                }
                let dst = self.val(Ty::Int64);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::StrFind,
                    args: vec![obj, needle],
                });
                Ok((dst, Ty::Int64))
            }
            _ => Err(self.err(
                ErrorKind::AttributeError,
                format!("str has no method '{method}'"),
                range,
            )),
        }
    }

    fn lower_queue_method(
        &mut self,
        obj: ValueId,
        elem: &Ty,
        method: &str,
        args: &'a [Expr],
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        match method {
            "put" | "put_nowait" => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "put() takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                let v = self.coerce(v, &ty, elem, range)?;
                let boxed = self.box_value(v, elem);
                if method == "put" {
                    let ty = Ty::Task(Box::new(Ty::None));
                    let dst = self.val(ty.clone());
                    self.push(Op::CallRuntime {
                        dst: Some(dst),
                        func: RuntimeFn::QueuePut,
                        args: vec![obj, boxed],
                    });
                    Ok((dst, ty))
                } else {
                    self.push(Op::CallRuntime {
                        dst: None,
                        func: RuntimeFn::QueuePutNowait,
                        args: vec![obj, boxed],
                    });
                    let none = self.val(Ty::None);
                    self.push(Op::Const {
                        dst: none,
                        value: Const::None,
                    });
                    Ok((none, Ty::None))
                }
            }
            "get" => {
                if !args.is_empty() {
                    return Err(self.err(ErrorKind::TypeError, "get() takes no arguments", range));
                }
                let ty = Ty::Task(Box::new(elem.clone()));
                let dst = self.val(ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::QueueGet,
                    args: vec![obj],
                });
                Ok((dst, ty))
            }
            "get_nowait" => {
                if !args.is_empty() {
                    return Err(self.err(ErrorKind::TypeError, "get_nowait() takes no arguments", range));
                }
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::QueueGetNowait,
                    args: vec![obj],
                });
                let result = self.unbox_value(boxed, elem);
                Ok((result, elem.clone()))
            }
            _ => Err(self.err(
                ErrorKind::AttributeError,
                format!("Queue has no method '{method}'"),
                range,
            )),
        }
    }

    fn lower_module_call(
        &mut self,
        module: &str,
        method: &str,
        args: &'a [Expr],
        star_arg: Option<&'a Expr>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        match (module, method) {
            ("asyncio", "run") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "asyncio.run() takes one argument", range));
                };
                let (coro, coro_ty) = self.expr(arg)?;
                let Ty::Coroutine(ret) = coro_ty else {
                    if self.collecting {
                        return Ok((self.val(Ty::Dyn), Ty::Dyn));
                    }
                    return Err(self.err(ErrorKind::TypeError, "asyncio.run() requires a coroutine", range));
                };
                let task = self.val(Ty::Task(ret.clone()));
                self.push(Op::Spawn { dst: task, frame: coro });
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::SchedulerAwait,
                    args: vec![task],
                });
                let result = self.unbox_value(boxed, &ret);
                Ok((result, *ret))
            }
            ("asyncio", "sleep") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "asyncio.sleep() takes one argument", range));
                };
                let ms = self.lower_millis(arg, range)?;
                let ty = Ty::Task(Box::new(Ty::None));
                let dst = self.val(ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::SchedulerSleep,
                    args: vec![ms],
                });
                Ok((dst, ty))
            }
            ("asyncio", "create_task") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "create_task() takes one argument", range));
                };
                let (coro, coro_ty) = self.expr(arg)?;
                let Ty::Coroutine(ret) = coro_ty else {
                    if self.collecting {
                        return Ok((self.val(Ty::Task(Box::new(Ty::Dyn))), Ty::Task(Box::new(Ty::Dyn))));
                    }
                    return Err(self.err(ErrorKind::TypeError, "create_task() requires a coroutine", range));
                };
                let ty = Ty::Task(ret);
                let dst = self.val(ty.clone());
                self.push(Op::Spawn { dst, frame: coro });
                Ok((dst, ty))
            }
            ("asyncio", "gather") => self.lower_gather(args, star_arg, range),
            ("asyncio", "wait_for") => {
                let [awaitable, timeout] = args else {
                    return Err(self.err(ErrorKind::TypeError, "wait_for() takes two arguments", range));
                };
                let task = self.lower_to_task(awaitable, range)?;
                let ms = self.lower_millis(timeout, range)?;
                let (task_v, inner) = task;
                let ty = Ty::Task(Box::new(inner));
                let dst = self.val(ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::SchedulerWaitFor,
                    args: vec![task_v, ms],
                });
                Ok((dst, ty))
            }
            ("asyncio", "Queue") => {
                let cap = match args {
                    [] => self.emit_const_int(0),
                    [arg] => {
                        let (v, ty) = self.expr(arg)?;
                        self.coerce(v, &ty, &Ty::Int64, range)?
                    }
                    _ => return Err(self.err(ErrorKind::TypeError, "Queue() takes at most one argument", range)),
                };
                let ty = Ty::Queue(Box::new(Ty::Dyn));
                let dst = self.val(ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::QueueNew,
                    args: vec![cap],
                });
                Ok((dst, ty))
            }
            ("json", "dumps") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "json.dumps() takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                let boxed = self.box_value(v, &ty);
                let dst = self.val(Ty::Str);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::JsonDumps,
                    args: vec![boxed],
                });
                Ok((dst, Ty::Str))
            }
            ("json", "loads") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "json.loads() takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                if ty != Ty::Str && !self.collecting {
                    return Err(self.err(ErrorKind::TypeError, "json.loads() requires a string", range));
                }
                let dst = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::JsonLoads,
                    args: vec![v],
                });
                Ok((dst, Ty::Dyn))
            }
            ("math", _) => {
                let func = match method {
                    "sqrt" => RuntimeFn::MathSqrt,
                    "pow" => RuntimeFn::MathPow,
                    "log" => RuntimeFn::MathLog,
                    "exp" => RuntimeFn::MathExp,
                    "sin" => RuntimeFn::MathSin,
                    "cos" => RuntimeFn::MathCos,
                    "floor" => RuntimeFn::MathFloor,
                    "ceil" => RuntimeFn::MathCeil,
                    "fabs" => RuntimeFn::MathFabs,
                    _ => {
                        return Err(self.err(
                            ErrorKind::AttributeError,
                            format!("math has no function '{method}'"),
                            range,
                        ));
                    }
                };
                let want_args = if method == "pow" { 2 } else { 1 };
                if args.len() != want_args {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("math.{method}() takes {want_args} arguments"),
                        range,
                    ));
                }
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    let (v, ty) = self.expr(arg)?;
                    lowered.push(self.coerce(v, &ty, &Ty::Float64, range)?);
                }
                let ret = if matches!(method, "floor" | "ceil") { Ty::Int64 } else { Ty::Float64 };
                let dst = self.val(ret.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func,
                    args: lowered,
                });
                Ok((dst, ret))
            }
            ("os", "getenv") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "os.getenv() takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                if ty != Ty::Str && !self.collecting {
                    return Err(self.err(ErrorKind::TypeError, "os.getenv() requires a string", range));
                }
                let dst = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::OsGetenv,
                    args: vec![v],
                });
                Ok((dst, Ty::Dyn))
            }
            ("os.path", "exists") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "os.path.exists() takes one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                if ty != Ty::Str && !self.collecting {
                    return Err(self.err(ErrorKind::TypeError, "os.path.exists() requires a string", range));
                }
                let dst = self.val(Ty::Bool);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::OsPathExists,
                    args: vec![v],
                });
                Ok((dst, Ty::Bool))
            }
            ("zlib", "compress" | "decompress") => {
                let [arg] = args else {
                    return Err(self.err(ErrorKind::TypeError, "zlib functions take one argument", range));
                };
                let (v, ty) = self.expr(arg)?;
                if !matches!(ty, Ty::Str | Ty::Bytes) && !self.collecting {
                    return Err(self.err(ErrorKind::TypeError, "zlib input must be str or bytes", range));
                }
                let dst = self.val(Ty::Bytes);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: if method == "compress" {
                        RuntimeFn::ZlibCompress
                    } else {
                        RuntimeFn::ZlibDecompress
                    },
                    args: vec![v],
                });
                Ok((dst, Ty::Bytes))
            }
            ("re", "match" | "findall" | "sub") => {
                let (func, nargs, ret) = match method {
                    "match" => (RuntimeFn::ReMatch, 2, Ty::Dyn),
                    "findall" => (RuntimeFn::ReFindall, 2, Ty::List(Box::new(Ty::Str))),
                    _ => (RuntimeFn::ReSub, 3, Ty::Str),
                };
                if args.len() != nargs {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("re.{method}() takes {nargs} arguments"),
                        range,
                    ));
                }
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    let (v, ty) = self.expr(arg)?;
                    if ty != Ty::Str && !self.collecting {
                        return Err(self.err(ErrorKind::TypeError, "re arguments must be strings", range));
                    }
                    lowered.push(v);
                }
                let dst = self.val(ret.clone());
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func,
                    args: lowered,
                });
                Ok((dst, ret))
            }
            _ => Err(self.err(
                ErrorKind::AttributeError,
                format!("module '{module}' has no function '{method}'"),
                range,
            )),
        }
    }

    /// Converts a seconds expression to integer milliseconds.
    fn lower_millis(&mut self, arg: &'a Expr, range: CodeRange) -> CompileResult<ValueId> {
        let (v, ty) = self.expr(arg)?;
        let secs = self.coerce(v, &ty, &Ty::Float64, range)?;
        let thousand = self.val(Ty::Float64);
        self.push(Op::Const {
            dst: thousand,
            value: Const::Float(1000.0),
        });
        let scaled = self.val(Ty::Float64);
        self.push(Op::Bin {
            dst: scaled,
            op: BinOp::Mul,
            lhs: secs,
            rhs: thousand,
        });
        let ms = self.val(Ty::Int64);
        self.push(Op::Cast { dst: ms, src: scaled });
        Ok(ms)
    }

    /// Normalizes an awaitable expression into a spawned task handle.
    fn lower_to_task(&mut self, e: &'a Expr, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        let (v, ty) = self.expr(e)?;
        match ty {
            Ty::Coroutine(ret) => {
                let task = self.val(Ty::Task(ret.clone()));
                self.push(Op::Spawn { dst: task, frame: v });
                Ok((task, *ret))
            }
            Ty::Task(ret) => Ok((v, *ret)),
            _ if self.collecting => Ok((self.val(Ty::Task(Box::new(Ty::Dyn))), Ty::Dyn)),
            other => Err(self.err(
                ErrorKind::TypeError,
                format!("expected an awaitable, got {other}"),
                range,
            )),
        }
    }

    fn lower_gather(
        &mut self,
        args: &'a [Expr],
        star_arg: Option<&'a Expr>,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        if let Some(star) = star_arg {
            // gather(*tasks): spawn every element, then gather the list.
            let (list, list_ty) = self.expr(star)?;
            let elem = list_ty.iter_elem().unwrap_or(Ty::Dyn);
            let tasks_list = match &elem {
                Ty::Task(_) => list,
                Ty::Coroutine(_) => self.spawn_list_elements(list, &list_ty, &elem, range)?,
                _ if self.collecting => list,
                other => {
                    return Err(self.err(
                        ErrorKind::TypeError,
                        format!("gather(*xs) requires tasks or coroutines, got {other}"),
                        range,
                    ));
                }
            };
            let result_elem = match elem {
                Ty::Task(inner) | Ty::Coroutine(inner) => *inner,
                _ => Ty::Dyn,
            };
            let ty = Ty::Task(Box::new(Ty::List(Box::new(result_elem))));
            let dst = self.val(ty.clone());
            self.push(Op::CallRuntime {
                dst: Some(dst),
                func: RuntimeFn::SchedulerGatherList,
                args: vec![tasks_list],
            });
            return Ok((dst, ty));
        }
        let mut tasks = Vec::with_capacity(args.len());
        let mut elem: Option<Ty> = None;
        for arg in args {
            let (task, ret) = self.lower_to_task(arg, range)?;
            elem = Some(match elem {
                Some(prev) => prev.join(&ret).unwrap_or(Ty::Dyn),
                None => ret,
            });
            tasks.push(task);
        }
        let ty = Ty::Task(Box::new(Ty::List(Box::new(elem.unwrap_or(Ty::Dyn)))));
        let dst = self.val(ty.clone());
        self.push(Op::CallRuntime {
            dst: Some(dst),
            func: RuntimeFn::SchedulerGather,
            args: tasks,
        });
        Ok((dst, ty))
    }

    /// Builds a list of task handles by spawning each coroutine element.
    fn spawn_list_elements(&mut self, list: ValueId, list_ty: &Ty, elem: &Ty, range: CodeRange) -> CompileResult<ValueId> {
        let zero = self.emit_const_int(0);
        let tasks = self.val(Ty::List(Box::new(Ty::Task(Box::new(Ty::Dyn)))));
        self.push(Op::CallRuntime {
            dst: Some(tasks),
            func: RuntimeFn::ListNew,
            args: vec![zero],
        });
        let tasks_slot = self.new_slot(Ty::List(Box::new(Ty::Task(Box::new(Ty::Dyn)))));
        self.push(Op::StoreLocal { slot: tasks_slot, src: tasks });
        self.iterate_sequence_value(list, list_ty, range, &mut |fx, item, _item_ty, _continue_blk| {
            let task = fx.val(Ty::Task(Box::new(Ty::Dyn)));
            fx.push(Op::Spawn { dst: task, frame: item });
            let boxed = fx.box_value(task, &Ty::Task(Box::new(Ty::Dyn)));
            let tasks = fx.val(Ty::List(Box::new(Ty::Task(Box::new(Ty::Dyn)))));
            fx.push(Op::LoadLocal {
                dst: tasks,
                slot: tasks_slot,
            });
            fx.push(Op::CallRuntime {
                dst: None,
                func: RuntimeFn::ListPush,
                args: vec![tasks, boxed],
            });
            Ok(())
        })?;
        let _ = elem;
        let result = self.val(Ty::List(Box::new(Ty::Task(Box::new(Ty::Dyn)))));
        self.push(Op::LoadLocal {
            dst: result,
            slot: tasks_slot,
        });
        Ok(result)
    }

    // --- suspension points ----------------------------------------------

    pub(in super::super) fn lower_await(&mut self, inner: &'a Expr, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        if !self.is_async {
            return Err(self.err(
                ErrorKind::TypeError,
                "'await' outside async function",
                range,
            ));
        }
        let (task, ret) = self.lower_to_task(inner, range)?;
        if self.collecting {
            return Ok((self.val(ret.clone()), ret));
        }
        // Cancellation delivered at this suspension runs the active
        // cleanups before the machine reports itself cancelled.
        let cancel_target = if self.cleanups.is_empty() {
            None
        } else {
            let saved = self.cur;
            let cancel_blk = self.new_block();
            self.switch_to(cancel_blk);
            self.run_cleanups(0)?;
            self.seal(Terminator::Cancelled);
            self.switch_to(saved);
            Some(cancel_blk)
        };
        self.set_cleanup(cancel_target);
        let resume_blk = self.new_block();
        self.seal(Terminator::Await { task, resume: resume_blk });
        self.switch_to(resume_blk);
        let boxed = self.val(Ty::Dyn);
        self.push(Op::AwaitResult { dst: boxed });
        let result = self.unbox_value(boxed, &ret);
        Ok((result, ret))
    }

    pub(in super::super) fn lower_yield(&mut self, value: Option<&'a Expr>, range: CodeRange) -> CompileResult<(ValueId, Ty)> {
        if !self.is_generator {
            return Err(self.err(ErrorKind::TypeError, "'yield' outside generator", range));
        }
        let boxed = match value {
            Some(expr) => {
                let (v, ty) = self.expr(expr)?;
                self.box_value(v, &ty)
            }
            None => {
                let none = self.val(Ty::Dyn);
                self.push(Op::Const {
                    dst: none,
                    value: Const::None,
                });
                none
            }
        };
        if self.collecting {
            let dst = self.val(Ty::None);
            return Ok((dst, Ty::None));
        }
        let resume_blk = self.new_block();
        self.seal(Terminator::Yield {
            value: boxed,
            resume: resume_blk,
        });
        self.switch_to(resume_blk);
        let none = self.val(Ty::None);
        self.push(Op::Const {
            dst: none,
            value: Const::None,
        });
        Ok((none, Ty::None))
    }

    // --- nested functions and closures ----------------------------------

    /// Declares (or re-finds) a nested function/lambda and refreshes its
    /// capture types from the current scope.
    pub(in super::super) fn declare_nested(&mut self, def: &'a FunctionDef) -> CompileResult<FuncId> {
        let key = (def.range.file, def.range.start);
        // A def statement already collected (a top-level function seen
        // again while lowering the module initializer) reuses its
        // declaration.
        if let Some(id) = self.parent.info.decl_spans.get(&key).copied() {
            return Ok(id);
        }
        let captures = self.capture_types(def);
        if (def.is_async || def.is_generator) && !captures.is_empty() {
            return Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "async functions and generators cannot capture enclosing variables",
                def.range,
            ));
        }
        if let Some(id) = self.parent.nested_keys.get(&key).copied() {
            self.parent.info.func_mut(id).captures = captures;
            return Ok(id);
        }
        let mut scratch = crate::errors::Diagnostics::new();
        let params: Vec<Ty> = def
            .params
            .iter()
            .map(|p| {
                p.annotation.as_ref().map_or(Ty::Dyn, |a| {
                    crate::infer::annotation_type(a, &self.parent.info, self.parent.interner, &mut scratch)
                })
            })
            .collect();
        let ret = crate::infer::return_type(def, &self.parent.info, self.parent.interner, &params);
        let module_name = self
            .interner()
            .get(self.parent.module_names[self.module as usize])
            .to_owned();
        let func_name = self.interner().get(def.name.name).to_owned();
        let symbol = crate::emit::mangle::nested(&module_name, &func_name, def.range.start);
        let decl = FuncDecl {
            id: FuncId(0),
            name: def.name.name,
            symbol,
            module: self.module,
            kind: FuncKind::Nested,
            params,
            ret,
            is_async: def.is_async,
            is_generator: def.is_generator,
            captures,
            needs_value_wrapper: false,
        };
        let id = self.parent.info.add_nested(decl);
        self.parent.nested_keys.insert(key, id);
        Ok(id)
    }

    fn capture_types(&self, def: &FunctionDef) -> Vec<Ty> {
        def.scope
            .captures
            .iter()
            .map(|(_, slot)| match slot {
                Slot::Local(slot) => self.slot_tys.get(*slot as usize).cloned().unwrap_or(Ty::Dyn),
                Slot::Capture(index) => self.captures.get(*index as usize).cloned().unwrap_or(Ty::Dyn),
                Slot::Global(_) => Ty::Dyn,
            })
            .collect()
    }

    /// Materializes a closure record for a nested function: captured
    /// values are loaded from the enclosing scope and moved into the
    /// record.
    pub(in super::super) fn make_closure_value(&mut self, id: FuncId, def: &'a FunctionDef) -> CompileResult<ValueId> {
        if self.parent.info.func(id).is_async || self.parent.info.func(id).is_generator {
            return Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "async functions and generators cannot be used as values",
                def.range,
            ));
        }
        self.parent.info.func_mut(id).needs_value_wrapper = true;
        let mut captures = Vec::with_capacity(def.scope.captures.len());
        for (index, (_, slot)) in def.scope.captures.iter().enumerate() {
            let ty = self.parent.info.func(id).captures.get(index).cloned().unwrap_or(Ty::Dyn);
            let v = self.val(ty);
            match slot {
                Slot::Local(slot) => self.push(Op::LoadLocal { dst: v, slot: *slot }),
                Slot::Capture(capture) => self.push(Op::LoadCapture { dst: v, index: *capture }),
                Slot::Global(slot) => self.push(Op::LoadGlobal { dst: v, slot: *slot }),
            }
            captures.push(v);
        }
        let sig = func_sig(self.parent.info.func(id));
        let dst = self.val(sig);
        self.push(Op::MakeClosure {
            dst,
            func: id,
            captures,
        });
        Ok(dst)
    }

    pub(in super::super) fn lower_lambda(&mut self, def: &'a FunctionDef) -> CompileResult<(ValueId, Ty)> {
        let id = self.declare_nested(def)?;
        self.queue.push_back((id, FnBody::Func(def)));
        let value = self.make_closure_value(id, def)?;
        let ty = func_sig(self.parent.info.func(id));
        Ok((value, ty))
    }

    // --- loops -----------------------------------------------------------

    pub(in super::super) fn lower_for(
        &mut self,
        target: &'a AssignTarget,
        iter: &'a Expr,
        body: &'a [Stmt],
        range: CodeRange,
    ) -> CompileResult<()> {
        // The enumerate/zip forms bind their own targets; range goes
        // through the shared counted-loop path.
        if let ExprKind::Call { func, args, star_arg: None } = &iter.kind
            && let ExprKind::Name(ident) = &func.kind
            && ident.slot.is_none()
        {
            match self.interner().get(ident.name) {
                "enumerate" => return self.lower_for_enumerate(target, args, body, range),
                "zip" => return self.lower_for_zip(target, args, body, range),
                _ => {}
            }
        }
        self.lower_iteration(iter, range, &mut |fx, item, item_ty, _continue_blk| {
            fx.bind_target(target, item, &item_ty, range)?;
            fx.stmts(body)?;
            Ok(())
        })
    }

    fn bind_target(&mut self, target: &'a AssignTarget, v: ValueId, ty: &Ty, range: CodeRange) -> CompileResult<()> {
        match target {
            AssignTarget::Name(ident) => {
                let slot = ident
                    .slot
                    .ok_or_else(|| self.err(ErrorKind::NameError, "loop target was not resolved", range))?;
                self.store_to_slot(slot, v, ty, range)
            }
            AssignTarget::Tuple(names) => {
                let Ty::Tuple(items) = ty else {
                    if self.collecting {
                        for name in names {
                            let slot = name.slot.ok_or_else(|| {
                                self.err(ErrorKind::NameError, "loop target was not resolved", range)
                            })?;
                            let dummy = self.val(Ty::Dyn);
                            self.store_to_slot(slot, dummy, &Ty::Dyn, range)?;
                        }
                        return Ok(());
                    }
                    return Err(self.err(ErrorKind::TypeError, format!("cannot unpack {ty}"), range));
                };
                if items.len() != names.len() && !self.collecting {
                    return Err(self.err(
                        ErrorKind::ValueError,
                        format!("cannot unpack {} values into {} names", items.len(), names.len()),
                        range,
                    ));
                }
                for (index, (name, item_ty)) in names.iter().zip(items.clone()).enumerate() {
                    let idx = self.emit_const_int(index as i64);
                    let boxed = self.val(Ty::Dyn);
                    self.push(Op::CallRuntime {
                        dst: Some(boxed),
                        func: RuntimeFn::TupleGet,
                        args: vec![v, idx],
                    });
                    let item = self.unbox_value(boxed, &item_ty);
                    let slot = name
                        .slot
                        .ok_or_else(|| self.err(ErrorKind::NameError, "loop target was not resolved", range))?;
                    self.store_to_slot(slot, item, &item_ty, range)?;
                }
                Ok(())
            }
            _ => Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "this loop target form is not supported",
                range,
            )),
        }
    }

    fn lower_for_enumerate(
        &mut self,
        target: &'a AssignTarget,
        args: &'a [Expr],
        body: &'a [Stmt],
        range: CodeRange,
    ) -> CompileResult<()> {
        let [seq] = args else {
            return Err(self.err(ErrorKind::TypeError, "enumerate() takes one argument", range));
        };
        let AssignTarget::Tuple(names) = target else {
            return Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "enumerate() requires an (index, value) target",
                range,
            ));
        };
        let [index_name, value_name] = names.as_slice() else {
            return Err(self.err(ErrorKind::TypeError, "enumerate() unpacks two values", range));
        };
        let index_slot = self.new_slot(Ty::Int64);
        let zero = self.emit_const_int(0);
        self.push(Op::StoreLocal {
            slot: index_slot,
            src: zero,
        });
        self.lower_iteration(seq, range, &mut |fx, item, item_ty, _continue_blk| {
            let i = fx.val(Ty::Int64);
            fx.push(Op::LoadLocal { dst: i, slot: index_slot });
            let index_target = index_name
                .slot
                .ok_or_else(|| fx.err(ErrorKind::NameError, "loop target was not resolved", range))?;
            fx.store_to_slot(index_target, i, &Ty::Int64, range)?;
            let value_target = value_name
                .slot
                .ok_or_else(|| fx.err(ErrorKind::NameError, "loop target was not resolved", range))?;
            fx.store_to_slot(value_target, item, &item_ty, range)?;
            let i = fx.val(Ty::Int64);
            fx.push(Op::LoadLocal { dst: i, slot: index_slot });
            let one = fx.emit_const_int(1);
            let next = fx.val(Ty::Int64);
            fx.push(Op::Bin {
                dst: next,
                op: BinOp::Add,
                lhs: i,
                rhs: one,
            });
            fx.push(Op::StoreLocal {
                slot: index_slot,
                src: next,
            });
            fx.stmts(body)?;
            Ok(())
        })
    }

    fn lower_for_zip(
        &mut self,
        target: &'a AssignTarget,
        args: &'a [Expr],
        body: &'a [Stmt],
        range: CodeRange,
    ) -> CompileResult<()> {
        let [left, right] = args else {
            return Err(self.err(ErrorKind::TypeError, "zip() takes two arguments", range));
        };
        let AssignTarget::Tuple(names) = target else {
            return Err(self.err(
                ErrorKind::UnsupportedFeatureError,
                "zip() requires a two-name target",
                range,
            ));
        };
        let [left_name, right_name] = names.as_slice() else {
            return Err(self.err(ErrorKind::TypeError, "zip() unpacks two values", range));
        };
        let (lv, lt) = self.expr(left)?;
        let (rv, rt) = self.expr(right)?;
        let l_elem = lt.iter_elem().unwrap_or(Ty::Dyn);
        let r_elem = rt.iter_elem().unwrap_or(Ty::Dyn);
        let l_slot = self.new_slot(lt.clone());
        let r_slot = self.new_slot(rt.clone());
        self.push(Op::StoreLocal { slot: l_slot, src: lv });
        self.push(Op::StoreLocal { slot: r_slot, src: rv });
        let counter_slot = self.new_slot(Ty::Int64);
        let zero = self.emit_const_int(0);
        self.push(Op::StoreLocal {
            slot: counter_slot,
            src: zero,
        });

        let head = self.new_block();
        self.seal(Terminator::Jump(head));
        self.switch_to(head);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let l = self.val(lt.clone());
        self.push(Op::LoadLocal { dst: l, slot: l_slot });
        let (l_len, _) = self.lower_len(l, &lt, range)?;
        let in_left = self.val(Ty::Bool);
        self.push(Op::Cmp {
            dst: in_left,
            op: CmpOp::Lt,
            lhs: i,
            rhs: l_len,
        });
        let check_right_blk = self.new_block();
        let body_blk = self.new_block();
        let incr_blk = self.new_block();
        let exit_blk = self.new_block();
        self.seal(Terminator::Branch {
            cond: in_left,
            then_blk: check_right_blk,
            else_blk: exit_blk,
        });
        self.switch_to(check_right_blk);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let r = self.val(rt.clone());
        self.push(Op::LoadLocal { dst: r, slot: r_slot });
        let (r_len, _) = self.lower_len(r, &rt, range)?;
        let in_right = self.val(Ty::Bool);
        self.push(Op::Cmp {
            dst: in_right,
            op: CmpOp::Lt,
            lhs: i,
            rhs: r_len,
        });
        self.seal(Terminator::Branch {
            cond: in_right,
            then_blk: body_blk,
            else_blk: exit_blk,
        });

        self.switch_to(body_blk);
        for (name, (seq_slot, seq_ty, elem)) in [
            (left_name, (l_slot, lt.clone(), l_elem)),
            (right_name, (r_slot, rt.clone(), r_elem)),
        ] {
            let i = self.val(Ty::Int64);
            self.push(Op::LoadLocal {
                dst: i,
                slot: counter_slot,
            });
            let seq = self.val(seq_ty.clone());
            self.push(Op::LoadLocal { dst: seq, slot: seq_slot });
            let (item, item_ty) = self.element_at(seq, &seq_ty, i, &elem, range)?;
            let slot = name
                .slot
                .ok_or_else(|| self.err(ErrorKind::NameError, "loop target was not resolved", range))?;
            self.store_to_slot(slot, item, &item_ty, range)?;
        }
        self.enter_loop(incr_blk, exit_blk);
        self.stmts(body)?;
        self.exit_loop();
        self.seal(Terminator::Jump(incr_blk));

        self.switch_to(incr_blk);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let one = self.emit_const_int(1);
        let next = self.val(Ty::Int64);
        self.push(Op::Bin {
            dst: next,
            op: BinOp::Add,
            lhs: i,
            rhs: one,
        });
        self.push(Op::StoreLocal {
            slot: counter_slot,
            src: next,
        });
        self.seal(Terminator::Jump(head));
        self.switch_to(exit_blk);
        Ok(())
    }

    /// One element of an indexable sequence, unboxed to `elem`.
    fn element_at(
        &mut self,
        seq: ValueId,
        seq_ty: &Ty,
        index: ValueId,
        elem: &Ty,
        range: CodeRange,
    ) -> CompileResult<(ValueId, Ty)> {
        match seq_ty {
            Ty::FixedArr(_, n) => {
                let dst = self.val(elem.clone());
                self.push(Op::ArrGet {
                    dst,
                    arr: seq,
                    index,
                    len: *n,
                });
                Ok((dst, elem.clone()))
            }
            Ty::List(_) => {
                let boxed = self.val(Ty::Dyn);
                self.push(Op::CallRuntime {
                    dst: Some(boxed),
                    func: RuntimeFn::ListGet,
                    args: vec![seq, index],
                });
                let result = self.unbox_value(boxed, elem);
                Ok((result, elem.clone()))
            }
            Ty::Str => {
                let dst = self.val(Ty::Str);
                self.push(Op::CallRuntime {
                    dst: Some(dst),
                    func: RuntimeFn::StrIndex,
                    args: vec![seq, index],
                });
                Ok((dst, Ty::Str))
            }
            _ if self.collecting => Ok((self.val(Ty::Dyn), Ty::Dyn)),
            other => Err(self.err(ErrorKind::TypeError, format!("{other} is not indexable"), range)),
        }
    }

    /// Generic iteration over the value of `iter`, calling `body` once
    /// per element with the element value, its type, and the block a
    /// skipped iteration should jump to. `range()` iterables lower to a
    /// counted loop with no materialized sequence.
    pub(in super::super) fn lower_iteration(
        &mut self,
        iter: &'a Expr,
        range: CodeRange,
        body: &mut dyn FnMut(&mut Self, ValueId, Ty, BlockId) -> CompileResult<()>,
    ) -> CompileResult<()> {
        if let ExprKind::Call { func, args, star_arg: None } = &iter.kind
            && let ExprKind::Name(ident) = &func.kind
            && ident.slot.is_none()
            && self.interner().get(ident.name) == "range"
        {
            return self.iterate_range(args, range, body);
        }
        let (seq, seq_ty) = self.expr(iter)?;
        self.iterate_sequence_value(seq, &seq_ty, range, body)
    }

    /// Counted loop over `range(...)` bounds.
    fn iterate_range(
        &mut self,
        args: &'a [Expr],
        range: CodeRange,
        body: &mut dyn FnMut(&mut Self, ValueId, Ty, BlockId) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let (start, stop, step) = match args {
            [stop] => (None, stop, 1),
            [start, stop] => (Some(start), stop, 1),
            [start, stop, step] => {
                let step = match crate::comptime::fold(step, self.interner()) {
                    Ok(Some(Const::Int(v))) if v != 0 => v,
                    _ => {
                        return Err(self.err(
                            ErrorKind::UnsupportedFeatureError,
                            "range() steps must be non-zero integer constants",
                            range,
                        ));
                    }
                };
                (Some(start), stop, step)
            }
            _ => return Err(self.err(ErrorKind::TypeError, "range() takes 1 to 3 arguments", range)),
        };
        let counter_slot = self.new_slot(Ty::Int64);
        let start_v = match start {
            Some(expr) => {
                let (v, ty) = self.expr(expr)?;
                self.coerce(v, &ty, &Ty::Int64, range)?
            }
            None => self.emit_const_int(0),
        };
        self.push(Op::StoreLocal {
            slot: counter_slot,
            src: start_v,
        });
        let stop_slot = self.new_slot(Ty::Int64);
        let (stop_v, stop_ty) = self.expr(stop)?;
        let stop_v = self.coerce(stop_v, &stop_ty, &Ty::Int64, range)?;
        self.push(Op::StoreLocal {
            slot: stop_slot,
            src: stop_v,
        });

        let head = self.new_block();
        self.seal(Terminator::Jump(head));
        self.switch_to(head);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let limit = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: limit,
            slot: stop_slot,
        });
        let cond = self.val(Ty::Bool);
        self.push(Op::Cmp {
            dst: cond,
            op: if step > 0 { CmpOp::Lt } else { CmpOp::Gt },
            lhs: i,
            rhs: limit,
        });
        let body_blk = self.new_block();
        let incr_blk = self.new_block();
        let exit_blk = self.new_block();
        self.seal(Terminator::Branch {
            cond,
            then_blk: body_blk,
            else_blk: exit_blk,
        });

        self.switch_to(body_blk);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        self.enter_loop(incr_blk, exit_blk);
        body(self, i, Ty::Int64, incr_blk)?;
        self.exit_loop();
        self.seal(Terminator::Jump(incr_blk));

        self.switch_to(incr_blk);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let delta = self.emit_const_int(step);
        let next = self.val(Ty::Int64);
        self.push(Op::Bin {
            dst: next,
            op: BinOp::Add,
            lhs: i,
            rhs: delta,
        });
        self.push(Op::StoreLocal {
            slot: counter_slot,
            src: next,
        });
        self.seal(Terminator::Jump(head));
        self.switch_to(exit_blk);
        Ok(())
    }

    /// Iteration over an already-lowered sequence value. Dicts iterate
    /// their keys; generators drive the state machine.
    fn iterate_sequence_value(
        &mut self,
        seq: ValueId,
        seq_ty: &Ty,
        range: CodeRange,
        body: &mut dyn FnMut(&mut Self, ValueId, Ty, BlockId) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let (seq, seq_ty) = match seq_ty {
            Ty::Dict(key, _) => {
                let keys_ty = Ty::List(key.clone());
                let keys = self.val(keys_ty.clone());
                self.push(Op::CallRuntime {
                    dst: Some(keys),
                    func: RuntimeFn::DictKeys,
                    args: vec![seq],
                });
                (keys, keys_ty)
            }
            _ => (seq, seq_ty.clone()),
        };
        if let Ty::Generator(yielded) = &seq_ty {
            return self.iterate_generator(seq, yielded.as_ref().clone(), body);
        }
        let Some(elem) = seq_ty.iter_elem() else {
            if self.collecting {
                let dummy = self.val(Ty::Dyn);
                let dummy_blk = self.new_block();
                body(self, dummy, Ty::Dyn, dummy_blk)?;
                let after = self.new_block();
                self.seal(Terminator::Jump(after));
                self.switch_to(dummy_blk);
                self.seal(Terminator::Jump(after));
                self.switch_to(after);
                return Ok(());
            }
            return Err(self.err(ErrorKind::TypeError, format!("{seq_ty} is not iterable"), range));
        };

        let seq_slot = self.new_slot(seq_ty.clone());
        self.push(Op::StoreLocal { slot: seq_slot, src: seq });
        let counter_slot = self.new_slot(Ty::Int64);
        let zero = self.emit_const_int(0);
        self.push(Op::StoreLocal {
            slot: counter_slot,
            src: zero,
        });

        let head = self.new_block();
        self.seal(Terminator::Jump(head));
        self.switch_to(head);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let seq_v = self.val(seq_ty.clone());
        self.push(Op::LoadLocal {
            dst: seq_v,
            slot: seq_slot,
        });
        let (len, _) = self.lower_len(seq_v, &seq_ty, range)?;
        let cond = self.val(Ty::Bool);
        self.push(Op::Cmp {
            dst: cond,
            op: CmpOp::Lt,
            lhs: i,
            rhs: len,
        });
        let body_blk = self.new_block();
        let incr_blk = self.new_block();
        let exit_blk = self.new_block();
        self.seal(Terminator::Branch {
            cond,
            then_blk: body_blk,
            else_blk: exit_blk,
        });

        self.switch_to(body_blk);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let seq_v = self.val(seq_ty.clone());
        self.push(Op::LoadLocal {
            dst: seq_v,
            slot: seq_slot,
        });
        let (item, item_ty) = self.element_at(seq_v, &seq_ty, i, &elem, range)?;
        self.enter_loop(incr_blk, exit_blk);
        body(self, item, item_ty, incr_blk)?;
        self.exit_loop();
        self.seal(Terminator::Jump(incr_blk));

        self.switch_to(incr_blk);
        let i = self.val(Ty::Int64);
        self.push(Op::LoadLocal {
            dst: i,
            slot: counter_slot,
        });
        let one = self.emit_const_int(1);
        let next = self.val(Ty::Int64);
        self.push(Op::Bin {
            dst: next,
            op: BinOp::Add,
            lhs: i,
            rhs: one,
        });
        self.push(Op::StoreLocal {
            slot: counter_slot,
            src: next,
        });
        self.seal(Terminator::Jump(head));
        self.switch_to(exit_blk);
        Ok(())
    }

    /// Consumer-driven generator iteration: resume, test for exhaustion,
    /// run the body with the yielded value.
    fn iterate_generator(
        &mut self,
        r#gen: ValueId,
        yielded: Ty,
        body: &mut dyn FnMut(&mut Self, ValueId, Ty, BlockId) -> CompileResult<()>,
    ) -> CompileResult<()> {
        let gen_slot = self.new_slot(Ty::Generator(Box::new(yielded.clone())));
        self.push(Op::StoreLocal { slot: gen_slot, src: r#gen });
        let value_slot = self.new_slot(Ty::Dyn);

        let head = self.new_block();
        self.seal(Terminator::Jump(head));
        self.switch_to(head);
        let gen_v = self.val(Ty::Generator(Box::new(yielded.clone())));
        self.push(Op::LoadLocal {
            dst: gen_v,
            slot: gen_slot,
        });
        let done = self.val(Ty::Bool);
        self.push(Op::GenNext {
            r#gen: gen_v,
            value_slot,
            dst_done: done,
        });
        let body_blk = self.new_block();
        let exit_blk = self.new_block();
        self.seal(Terminator::Branch {
            cond: done,
            then_blk: exit_blk,
            else_blk: body_blk,
        });

        self.switch_to(body_blk);
        let boxed = self.val(Ty::Dyn);
        self.push(Op::LoadLocal {
            dst: boxed,
            slot: value_slot,
        });
        let item = self.unbox_value(boxed, &yielded);
        self.enter_loop(head, exit_blk);
        body(self, item, yielded.clone(), head)?;
        self.exit_loop();
        self.seal(Terminator::Jump(head));
        self.switch_to(exit_blk);
        Ok(())
    }
}
