//! Expression lowering.

use super::Lowerer;
use crate::{
    ast::{BinOp, Expr, Pos, Type, UnOp},
    CompileError, ErrorKind,
};
use etch_asm::{op, FuncId, Imm16, RegId, Simm8, ValueTag};
use etch_bytecode::{type_id, Constant, FunctionKind, PropagationKind};

impl<'a> Lowerer<'a> {
    /// Lower an expression, returning the register holding its value. The
    /// register is a fresh temp unless the expression is a bare local name.
    pub(super) fn lower_expr(&mut self, expr: &Expr, pos: Pos) -> Result<u8, CompileError> {
        match expr {
            Expr::Int(value) => self.load_const(Constant::Int(*value), pos),
            Expr::Float(value) => self.load_const(Constant::Float(*value), pos),
            Expr::Bool(value) => self.load_const(Constant::Bool(*value), pos),
            Expr::Char(value) => self.load_const(Constant::Char(*value), pos),
            Expr::Str(value) => self.load_const(Constant::Str(value.clone()), pos),
            Expr::Nil => self.load_const(Constant::Nil, pos),
            Expr::NoneLit => self.load_const(Constant::None, pos),
            Expr::TypeDescLit(name) => {
                self.load_const(Constant::TypeDesc(name.clone()), pos)
            }
            Expr::EnumLit {
                type_name,
                value,
                display,
            } => self.load_const(
                Constant::Enum {
                    type_id: type_id(type_name),
                    value: *value,
                    display: display.clone(),
                },
                pos,
            ),

            Expr::Name(var) => {
                if let Some(reg) = self.lookup_var(var) {
                    return Ok(reg);
                }
                let index = self.global_name_index(var);
                let dst = self.alloc_temp(pos)?;
                self.emit(op::getglob(RegId::new(dst), Imm16::new(index)), pos);
                Ok(dst)
            }

            Expr::Binary {
                op,
                lhs,
                rhs,
                operand_ty,
            } => self.lower_binary(*op, lhs, rhs, operand_ty, pos),
            Expr::Unary { op, expr } => {
                let src = self.lower_expr(expr, pos)?;
                let dst = self.alloc_temp(pos)?;
                let insn = match op {
                    UnOp::Neg => op::neg(RegId::new(dst), RegId::new(src), RegId::new(0)),
                    UnOp::Not => op::not(RegId::new(dst), RegId::new(src), RegId::new(0)),
                };
                self.emit(insn, pos);
                self.free_temp(src);
                Ok(dst)
            }

            Expr::Call {
                name,
                sig,
                ret,
                args,
            } => self.lower_call(name, sig, ret, args, pos),
            Expr::CallClosure {
                callee,
                args,
                has_result,
            } => {
                let base = self.regs.alloc_block(1 + args.len() as u8, pos)?;
                self.lower_expr_into(base, callee, pos)?;
                for (i, arg) in args.iter().enumerate() {
                    self.lower_expr_into(base + 1 + i as u8, arg, pos)?;
                }
                self.emit(
                    op::callc(
                        RegId::new(base),
                        FuncId::new(0),
                        args.len() as u8,
                        *has_result as u8,
                    ),
                    pos,
                );
                for i in 0..args.len() as u8 {
                    self.regs.free(base + 1 + i);
                }
                Ok(base)
            }

            Expr::Index { obj, index } => {
                let container = self.lower_expr(obj, pos)?;
                let dst = self.alloc_temp(pos)?;
                if let Expr::Int(value) = index.as_ref() {
                    if let Ok(small) = i8::try_from(*value) {
                        self.emit(
                            op::getidxi(
                                RegId::new(dst),
                                RegId::new(container),
                                Simm8::new(small),
                            ),
                            pos,
                        );
                        self.free_temp(container);
                        return Ok(dst);
                    }
                }
                let index = self.lower_expr(index, pos)?;
                self.emit(
                    op::getidx(RegId::new(dst), RegId::new(container), RegId::new(index)),
                    pos,
                );
                self.free_temp(index);
                self.free_temp(container);
                Ok(dst)
            }
            Expr::Field { obj, field } => {
                let container = self.lower_expr(obj, pos)?;
                let dst = self.alloc_temp(pos)?;
                match self.field_key(field) {
                    Some(key) => {
                        self.emit(
                            op::getfld(
                                RegId::new(dst),
                                RegId::new(container),
                                RegId::new(key),
                            ),
                            pos,
                        );
                    }
                    None => {
                        // Key fell outside the 8-bit field; index by register.
                        let key = self.load_const(Constant::Str(field.clone()), pos)?;
                        self.emit(
                            op::getidx(
                                RegId::new(dst),
                                RegId::new(container),
                                RegId::new(key),
                            ),
                            pos,
                        );
                        self.free_temp(key);
                    }
                }
                self.free_temp(container);
                Ok(dst)
            }

            Expr::ArrayLit { items } | Expr::TupleLit { items } => {
                let dst = self.alloc_temp(pos)?;
                let len = u16::try_from(items.len()).map_err(|_| {
                    CompileError::new(ErrorKind::TooLarge, pos, "container literal too long")
                })?;
                self.emit(op::newarr(RegId::new(dst), Imm16::new(len)), pos);
                for (i, item) in items.iter().enumerate() {
                    let value = self.lower_expr(item, pos)?;
                    if let Ok(small) = i8::try_from(i) {
                        self.emit(
                            op::setidxi(
                                RegId::new(dst),
                                RegId::new(value),
                                Simm8::new(small),
                            ),
                            pos,
                        );
                    } else {
                        let index = self.load_const(Constant::Int(i as i64), pos)?;
                        self.emit(
                            op::setidx(
                                RegId::new(dst),
                                RegId::new(index),
                                RegId::new(value),
                            ),
                            pos,
                        );
                        self.free_temp(index);
                    }
                    self.free_temp(value);
                }
                Ok(dst)
            }
            Expr::TableLit { entries, type_name } => {
                let dst = self.alloc_temp(pos)?;
                let dtor = self.destructor_operand(type_name.as_deref(), pos)?;
                self.emit(
                    op::newtab(RegId::new(dst), RegId::new(dtor), RegId::new(0)),
                    pos,
                );
                for (field, value) in entries {
                    let value_reg = self.lower_expr(value, pos)?;
                    self.emit_field_store(dst, field, value_reg, pos)?;
                    self.free_temp(value_reg);
                }
                Ok(dst)
            }

            Expr::Lambda {
                func,
                sig,
                ret,
                captures,
            } => {
                let (index, kind) = self
                    .resolver
                    .resolve_call(func, sig, ret)
                    .ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::NameResolution,
                            pos,
                            format!("lifted lambda {func} is not defined"),
                        )
                    })?;
                if kind != FunctionKind::Native {
                    return Err(CompileError::new(
                        ErrorKind::TypeMismatch,
                        pos,
                        "closures can only capture over module functions",
                    ));
                }
                let base = self.regs.alloc_block(1 + captures.len() as u8, pos)?;
                for (i, capture) in captures.iter().enumerate() {
                    self.lower_expr_into(base + 1 + i as u8, capture, pos)?;
                }
                self.emit(
                    op::closure(
                        RegId::new(base),
                        FuncId::new(index),
                        captures.len() as u8,
                        1,
                    ),
                    pos,
                );
                for i in 0..captures.len() as u8 {
                    self.regs.free(base + 1 + i);
                }
                Ok(base)
            }

            Expr::Slice { obj, lo, hi } => {
                let src = self.lower_expr(obj, pos)?;
                let lo = self.lower_expr(lo, pos)?;
                let hi = self.lower_expr(hi, pos)?;
                let dst = self.alloc_temp(pos)?;
                self.emit(
                    op::slice(
                        RegId::new(dst),
                        RegId::new(src),
                        RegId::new(lo),
                        RegId::new(hi),
                    ),
                    pos,
                );
                self.free_temp(hi);
                self.free_temp(lo);
                self.free_temp(src);
                Ok(dst)
            }
            Expr::Cast { expr, kind } => {
                let src = self.lower_expr(expr, pos)?;
                let dst = self.alloc_temp(pos)?;
                self.emit(
                    op::cast(RegId::new(dst), RegId::new(src), RegId::new(*kind as u8)),
                    pos,
                );
                self.free_temp(src);
                Ok(dst)
            }

            Expr::WrapSome(inner) => self.lower_wrap(op::wrapsome, inner, pos),
            Expr::WrapOk(inner) => self.lower_wrap(op::wrapok, inner, pos),
            Expr::WrapErr(inner) => self.lower_wrap(op::wraperr, inner, pos),
            Expr::Propagate(inner) => self.lower_propagate(inner, pos),

            Expr::Spawn {
                name,
                sig,
                ret,
                args,
            } => {
                let (index, kind) = self
                    .resolver
                    .resolve_call(name, sig, ret)
                    .ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::NameResolution,
                            pos,
                            format!("no function {name} to spawn"),
                        )
                    })?;
                if kind != FunctionKind::Native {
                    return Err(CompileError::new(
                        ErrorKind::TypeMismatch,
                        pos,
                        "only module functions can run as coroutines",
                    ));
                }
                let base = self.regs.alloc_block(1 + args.len() as u8, pos)?;
                for (i, arg) in args.iter().enumerate() {
                    self.lower_expr_into(base + 1 + i as u8, arg, pos)?;
                }
                self.emit(
                    op::spawn(RegId::new(base), FuncId::new(index), args.len() as u8, 1),
                    pos,
                );
                for i in 0..args.len() as u8 {
                    self.regs.free(base + 1 + i);
                }
                Ok(base)
            }
            Expr::Resume { coro, arg } => {
                let coro = self.lower_expr(coro, pos)?;
                let arg_reg = match arg {
                    Some(arg) => Some(self.lower_expr(arg, pos)?),
                    None => None,
                };
                let dst = self.alloc_temp(pos)?;
                let c = match arg_reg {
                    Some(reg) => reg + 1,
                    None => 0,
                };
                self.emit(
                    op::resume(RegId::new(dst), RegId::new(coro), RegId::new(c)),
                    pos,
                );
                if let Some(reg) = arg_reg {
                    self.free_temp(reg);
                }
                self.free_temp(coro);
                Ok(dst)
            }
            Expr::Yield { value } => {
                let value_reg = match value {
                    Some(value) => Some(self.lower_expr(value, pos)?),
                    None => None,
                };
                let dst = self.alloc_temp(pos)?;
                let (b, c) = match value_reg {
                    Some(reg) => (reg, 1),
                    None => (0, 0),
                };
                self.emit(
                    op::yield_(RegId::new(dst), RegId::new(b), RegId::new(c)),
                    pos,
                );
                if let Some(reg) = value_reg {
                    self.free_temp(reg);
                }
                Ok(dst)
            }
            Expr::ChannelNew { capacity, .. } => {
                let dst = self.alloc_temp(pos)?;
                self.emit(op::channew(RegId::new(dst), Imm16::new(*capacity)), pos);
                Ok(dst)
            }
            Expr::ChanSend { chan, value } => {
                let chan = self.lower_expr(chan, pos)?;
                let value = self.lower_expr(value, pos)?;
                self.emit(
                    op::chansend(RegId::new(chan), RegId::new(value), RegId::new(0)),
                    pos,
                );
                self.free_temp(value);
                self.free_temp(chan);
                let dst = self.alloc_temp(pos)?;
                self.emit_const_into(dst, Constant::Nil, pos);
                Ok(dst)
            }
            Expr::ChanRecv { chan } => {
                let chan = self.lower_expr(chan, pos)?;
                let dst = self.alloc_temp(pos)?;
                self.emit(
                    op::chanrecv(RegId::new(dst), RegId::new(chan), RegId::new(0)),
                    pos,
                );
                self.free_temp(chan);
                Ok(dst)
            }

            Expr::RefNew { value, destructor } => {
                let src = self.lower_expr(value, pos)?;
                let dst = self.alloc_temp(pos)?;
                let dtor = self.destructor_operand(destructor.as_deref(), pos)?;
                self.emit(
                    op::refnew(RegId::new(dst), RegId::new(src), RegId::new(dtor)),
                    pos,
                );
                self.free_temp(src);
                Ok(dst)
            }
            Expr::Deref(inner) => {
                let src = self.lower_expr(inner, pos)?;
                let dst = self.alloc_temp(pos)?;
                self.emit(
                    op::refget(RegId::new(dst), RegId::new(src), RegId::new(0)),
                    pos,
                );
                self.free_temp(src);
                Ok(dst)
            }
            Expr::WeakRef(inner) => {
                let src = self.lower_expr(inner, pos)?;
                let dst = self.alloc_temp(pos)?;
                self.emit(
                    op::weaknew(RegId::new(dst), RegId::new(src), RegId::new(0)),
                    pos,
                );
                self.free_temp(src);
                Ok(dst)
            }
        }
    }

    /// Lower an expression directly into a chosen register. Literals store
    /// straight into the destination; everything else lowers then moves.
    pub(super) fn lower_expr_into(
        &mut self,
        dst: u8,
        expr: &Expr,
        pos: Pos,
    ) -> Result<(), CompileError> {
        if let Some(constant) = literal_constant(expr) {
            self.emit_const_into(dst, constant, pos);
            return Ok(());
        }
        let src = self.lower_expr(expr, pos)?;
        if src != dst {
            self.emit(op::mov(RegId::new(dst), RegId::new(src), RegId::new(0)), pos);
            self.free_temp(src);
        }
        Ok(())
    }

    fn lower_binary(
        &mut self,
        bin: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        operand_ty: &Type,
        pos: Pos,
    ) -> Result<u8, CompileError> {
        // Short-circuit forms first.
        if matches!(bin, BinOp::And | BinOp::Or) {
            let dst = self.alloc_temp(pos)?;
            self.lower_expr_into(dst, lhs, pos)?;
            let expected = match bin {
                BinOp::And => 0,
                _ => 1,
            };
            self.emit(
                op::test(RegId::new(dst), RegId::new(0), RegId::new(expected)),
                pos,
            );
            let over = self.emit_jump_placeholder(pos);
            self.lower_expr_into(dst, rhs, pos)?;
            self.patch_jump_to_here(over)?;
            return Ok(dst);
        }

        let lhs_reg = self.lower_expr(lhs, pos)?;
        let rhs_reg = self.lower_expr(rhs, pos)?;
        let dst = self.alloc_temp(pos)?;
        let (a, b, c) = (RegId::new(dst), RegId::new(lhs_reg), RegId::new(rhs_reg));
        let insn = match bin {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let spec = match (operand_ty, bin) {
                    (Type::Int, BinOp::Add) => op::iadd,
                    (Type::Int, BinOp::Sub) => op::isub,
                    (Type::Int, BinOp::Mul) => op::imul,
                    (Type::Int, BinOp::Div) => op::idiv,
                    (Type::Int, BinOp::Mod) => op::imod,
                    (Type::Float, BinOp::Add) => op::fadd,
                    (Type::Float, BinOp::Sub) => op::fsub,
                    (Type::Float, BinOp::Mul) => op::fmul,
                    (Type::Float, BinOp::Div) => op::fdiv,
                    (Type::Float, BinOp::Mod) => op::fmod,
                    (_, BinOp::Add) => op::add,
                    (_, BinOp::Sub) => op::sub,
                    (_, BinOp::Mul) => op::mul,
                    (_, BinOp::Div) => op::div,
                    (_, BinOp::Mod) => op::mod_,
                    _ => unreachable!("operand restricted to Add|Sub|Mul|Div|Mod by outer match"),
                };
                spec(a, b, c)
            }
            BinOp::Pow => op::pow(a, b, c),
            BinOp::Eq => op::eqs(a, b, c),
            BinOp::Ne => op::nes(a, b, c),
            BinOp::Lt => op::lts(a, b, c),
            BinOp::Le => op::les(a, b, c),
            // Flip the operands for the greater-than forms.
            BinOp::Gt => op::lts(a, c, b),
            BinOp::Ge => op::les(a, c, b),
            BinOp::In => op::in_(a, b, c),
            BinOp::NotIn => op::notin(a, b, c),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        };
        self.emit(insn, pos);
        self.free_temp(rhs_reg);
        self.free_temp(lhs_reg);
        Ok(dst)
    }

    fn lower_call(
        &mut self,
        name: &str,
        sig: &[Type],
        ret: &Type,
        args: &[Expr],
        pos: Pos,
    ) -> Result<u8, CompileError> {
        let (index, kind) = self.resolver.resolve_call(name, sig, ret).ok_or_else(|| {
            CompileError::new(
                ErrorKind::NameResolution,
                pos,
                format!("no function named {name} matches this call"),
            )
        })?;
        let base = self.regs.alloc_block(1 + args.len() as u8, pos)?;
        for (i, arg) in args.iter().enumerate() {
            self.lower_expr_into(base + 1 + i as u8, arg, pos)?;
        }
        let nres = u8::from(*ret != Type::Unit);
        let ctor = match kind {
            FunctionKind::Native => op::call,
            FunctionKind::Builtin => op::callb,
            FunctionKind::Host => op::callh,
            FunctionKind::Foreign => op::callf,
        };
        self.emit(
            ctor(RegId::new(base), FuncId::new(index), args.len() as u8, nres),
            pos,
        );
        for i in 0..args.len() as u8 {
            self.regs.free(base + 1 + i);
        }
        Ok(base)
    }

    fn lower_wrap(
        &mut self,
        ctor: fn(RegId, RegId, RegId) -> etch_asm::Instruction,
        inner: &Expr,
        pos: Pos,
    ) -> Result<u8, CompileError> {
        let src = self.lower_expr(inner, pos)?;
        let dst = self.alloc_temp(pos)?;
        self.emit(ctor(RegId::new(dst), RegId::new(src), RegId::new(0)), pos);
        self.free_temp(src);
        Ok(dst)
    }

    /// The postfix propagation operator: short-circuit `none`/`error` out of
    /// the enclosing function (running its defers), unwrap otherwise.
    fn lower_propagate(&mut self, inner: &Expr, pos: Pos) -> Result<u8, CompileError> {
        let (kind, fail_tag) = match &self.ret_ty {
            Type::Option(_) => (PropagationKind::Option, ValueTag::None),
            Type::Result(_) => (PropagationKind::Result, ValueTag::Err),
            other => {
                return Err(CompileError::new(
                    ErrorKind::TypeMismatch,
                    pos,
                    format!(
                        "`?` needs an option or result return type, found {other:?}"
                    ),
                ))
            }
        };
        self.propagates = Some(kind);

        let src = self.lower_expr(inner, pos)?;
        // Skip the jump when the failure tag matches, landing on the early
        // return.
        self.emit(
            op::testtag(
                RegId::new(src),
                RegId::new(fail_tag as u8),
                RegId::new(0),
            ),
            pos,
        );
        let over = self.emit_jump_placeholder(pos);
        match kind {
            PropagationKind::Option => {
                let none = self.alloc_temp(pos)?;
                self.emit_const_into(none, Constant::None, pos);
                self.emit(op::ret(RegId::new(1), RegId::new(none), RegId::new(0)), pos);
                self.free_temp(none);
            }
            PropagationKind::Result => {
                // The error wrapper forwards as-is.
                self.emit(op::ret(RegId::new(1), RegId::new(src), RegId::new(0)), pos);
            }
        }
        self.patch_jump_to_here(over)?;

        let dst = self.alloc_temp(pos)?;
        let unwrap = match kind {
            PropagationKind::Option => op::unwrapopt,
            PropagationKind::Result => op::unwrapres,
        };
        self.emit(unwrap(RegId::new(dst), RegId::new(src), RegId::new(0)), pos);
        self.free_temp(src);
        Ok(dst)
    }

    /// Store into a field, falling back to register-keyed indexing when the
    /// key's pool position exceeds the 8-bit field.
    pub(super) fn emit_field_store(
        &mut self,
        obj: u8,
        field: &str,
        value: u8,
        pos: Pos,
    ) -> Result<(), CompileError> {
        match self.field_key(field) {
            Some(key) => {
                self.emit(
                    op::setfld(RegId::new(obj), RegId::new(key), RegId::new(value)),
                    pos,
                );
            }
            None => {
                let key = self.load_const(Constant::Str(field.to_owned()), pos)?;
                self.emit(
                    op::setidx(RegId::new(obj), RegId::new(key), RegId::new(value)),
                    pos,
                );
                self.free_temp(key);
            }
        }
        Ok(())
    }

    /// Destructor operand for `NEWTAB`/`REFNEW`: 0 for none, position plus
    /// one otherwise.
    pub(super) fn destructor_operand(
        &mut self,
        type_name: Option<&str>,
        pos: Pos,
    ) -> Result<u8, CompileError> {
        let Some(type_name) = type_name else {
            return Ok(0);
        };
        let Some(index) = self.resolver.destructor_of(type_name) else {
            return Ok(0);
        };
        u8::try_from(index + 1).map_err(|_| {
            CompileError::new(
                ErrorKind::TooLarge,
                pos,
                "destructor sits past the 254-entry operand bound; declare it earlier",
            )
        })
    }
}

/// The pool entry of a literal expression, when it is one.
fn literal_constant(expr: &Expr) -> Option<Constant> {
    let constant = match expr {
        Expr::Int(value) => Constant::Int(*value),
        Expr::Float(value) => Constant::Float(*value),
        Expr::Bool(value) => Constant::Bool(*value),
        Expr::Char(value) => Constant::Char(*value),
        Expr::Str(value) => Constant::Str(value.clone()),
        Expr::Nil => Constant::Nil,
        Expr::NoneLit => Constant::None,
        Expr::TypeDescLit(name) => Constant::TypeDesc(name.clone()),
        Expr::EnumLit {
            type_name,
            value,
            display,
        } => Constant::Enum {
            type_id: type_id(type_name),
            value: *value,
            display: display.clone(),
        },
        _ => return None,
    };
    Some(constant)
}
