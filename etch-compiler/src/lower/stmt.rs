//! Statement lowering.

use super::{LoopCtx, Lowerer};
use crate::{
    ast::{BinOp, Block, Expr, LValue, Pos, Stmt, Type},
    CompileError, ErrorKind,
};
use etch_asm::{op, Imm16, RegId, Simm8};
use etch_bytecode::Constant;

impl<'a> Lowerer<'a> {
    pub(super) fn lower_block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.push_scope();
        for stmt in &block.stmts {
            self.lower_stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Let {
                name, value, pos, ..
            } => {
                let reg = self.declare_var(name, *pos)?;
                self.lower_expr_into(reg, value, *pos)?;
            }

            Stmt::Assign { target, value, pos } => {
                self.lower_assign(target, value, *pos)?;
            }
            Stmt::Compound {
                target,
                op,
                value,
                operand_ty,
                pos,
            } => {
                self.lower_compound(target, *op, value, operand_ty, *pos)?;
            }

            Stmt::If {
                arms,
                else_block,
                pos,
            } => {
                let mut end_patches = Vec::new();
                for (cond, block) in arms {
                    let cond_reg = self.lower_expr(cond, *pos)?;
                    // Skip the jump to the next arm when the condition holds.
                    self.emit(
                        op::test(RegId::new(cond_reg), RegId::new(0), RegId::new(0)),
                        *pos,
                    );
                    self.free_temp(cond_reg);
                    let next_arm = self.emit_jump_placeholder(*pos);
                    self.lower_block(block)?;
                    end_patches.push(self.emit_jump_placeholder(*pos));
                    self.patch_jump_to_here(next_arm)?;
                }
                if let Some(block) = else_block {
                    self.lower_block(block)?;
                }
                for patch in end_patches {
                    self.patch_jump_to_here(patch)?;
                }
            }

            Stmt::While { cond, body, pos } => {
                let top = self.pc();
                let cond_reg = self.lower_expr(cond, *pos)?;
                self.emit(
                    op::test(RegId::new(cond_reg), RegId::new(0), RegId::new(0)),
                    *pos,
                );
                self.free_temp(cond_reg);
                let exit = self.emit_jump_placeholder(*pos);

                self.loops.push(LoopCtx::default());
                self.lower_block(body)?;
                let ctx = self.loops.pop().expect("loop context just pushed");
                for patch in ctx.continue_patches {
                    self.patch_jump(patch, top)?;
                }
                self.emit_jump_back(top, *pos)?;
                self.patch_jump_to_here(exit)?;
                for patch in ctx.break_patches {
                    self.patch_jump_to_here(patch)?;
                }
            }

            Stmt::ForRange {
                var,
                start,
                end,
                inclusive,
                body,
                pos,
            } => {
                self.push_scope();
                // Counter and limit live in adjacent registers.
                let base = self.regs.alloc_block(2, *pos)?;
                self.bind_var(var, base, self.pc());
                self.var_regs.push(base + 1);
                self.lower_expr_into(base, start, *pos)?;
                self.lower_expr_into(base + 1, end, *pos)?;
                if !*inclusive {
                    self.emit(
                        op::subimm(
                            RegId::new(base + 1),
                            RegId::new(base + 1),
                            Simm8::new(1),
                        ),
                        *pos,
                    );
                }
                let prep = self.emit(
                    op::foriprep(RegId::new(base), etch_asm::Simm16::new(0)),
                    *pos,
                ) as usize;
                let body_top = self.pc();

                self.loops.push(LoopCtx::default());
                self.lower_block(body)?;
                let ctx = self.loops.pop().expect("loop context just pushed");
                for patch in ctx.continue_patches {
                    self.patch_jump(patch, self.pc())?;
                }
                self.patch_jump_to_here(prep)?;
                let loop_pc = self.pc();
                let back = i64::from(body_top) - (i64::from(loop_pc) + 1);
                let back = i16::try_from(back).map_err(|_| {
                    CompileError::new(ErrorKind::TooLarge, *pos, "loop body too long")
                })?;
                self.emit(
                    op::foriloop(RegId::new(base), etch_asm::Simm16::new(back)),
                    *pos,
                );
                for patch in ctx.break_patches {
                    self.patch_jump_to_here(patch)?;
                }
                if let Some(position) =
                    self.var_regs.iter().rposition(|&r| r == base + 1)
                {
                    self.var_regs.swap_remove(position);
                }
                self.regs.free(base + 1);
                self.pop_scope();
            }

            Stmt::ForEach {
                var,
                iterable,
                body,
                pos,
                ..
            } => {
                self.push_scope();
                // Container, hidden cursor, loop binding: three adjacent
                // registers.
                let base = self.regs.alloc_block(3, *pos)?;
                self.var_regs.push(base);
                self.var_regs.push(base + 1);
                self.bind_var(var, base + 2, self.pc());
                self.lower_expr_into(base, iterable, *pos)?;
                let prep = self.emit(
                    op::forprep(RegId::new(base), etch_asm::Simm16::new(0)),
                    *pos,
                ) as usize;
                let body_top = self.pc();

                self.loops.push(LoopCtx::default());
                self.lower_block(body)?;
                let ctx = self.loops.pop().expect("loop context just pushed");
                for patch in ctx.continue_patches {
                    self.patch_jump(patch, self.pc())?;
                }
                self.patch_jump_to_here(prep)?;
                let loop_pc = self.pc();
                let back = i64::from(body_top) - (i64::from(loop_pc) + 1);
                let back = i16::try_from(back).map_err(|_| {
                    CompileError::new(ErrorKind::TooLarge, *pos, "loop body too long")
                })?;
                self.emit(
                    op::forloop(RegId::new(base), etch_asm::Simm16::new(back)),
                    *pos,
                );
                for patch in ctx.break_patches {
                    self.patch_jump_to_here(patch)?;
                }
                for reg in [base + 1, base] {
                    if let Some(position) =
                        self.var_regs.iter().rposition(|&r| r == reg)
                    {
                        self.var_regs.swap_remove(position);
                    }
                    self.regs.free(reg);
                }
                self.pop_scope();
            }

            Stmt::Break { pos } => {
                let patch = self.emit_jump_placeholder(*pos);
                self.loops
                    .last_mut()
                    .ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::InvalidControlFlow,
                            *pos,
                            "`break` outside a loop",
                        )
                    })?
                    .break_patches
                    .push(patch);
            }
            Stmt::Continue { pos } => {
                let patch = self.emit_jump_placeholder(*pos);
                self.loops
                    .last_mut()
                    .ok_or_else(|| {
                        CompileError::new(
                            ErrorKind::InvalidControlFlow,
                            *pos,
                            "`continue` outside a loop",
                        )
                    })?
                    .continue_patches
                    .push(patch);
            }

            Stmt::Return { value, pos } => match value {
                Some(value) => {
                    let reg = self.lower_expr(value, *pos)?;
                    self.emit(
                        op::ret(RegId::new(1), RegId::new(reg), RegId::new(0)),
                        *pos,
                    );
                    self.free_temp(reg);
                }
                None => {
                    self.emit(
                        op::ret(RegId::new(0), RegId::new(0), RegId::new(0)),
                        *pos,
                    );
                }
            },

            Stmt::Defer { body, pos } => {
                let defer = self.emit(
                    op::defer(RegId::new(0), etch_asm::Simm16::new(0)),
                    *pos,
                ) as usize;
                self.lower_block(body)?;
                self.emit(
                    op::deferend(RegId::new(0), RegId::new(0), RegId::new(0)),
                    *pos,
                );
                self.patch_jump_to_here(defer)?;
            }

            Stmt::Expr { expr, pos } => {
                let reg = self.lower_expr(expr, *pos)?;
                self.free_temp(reg);
            }

            Stmt::Match {
                scrutinee,
                arms,
                pos,
            } => self.lower_match(scrutinee, arms, *pos)?,

            Stmt::UnpackTuple {
                bindings,
                value,
                pos,
            } => {
                let tuple = self.lower_expr(value, *pos)?;
                for (i, (name, _)) in bindings.iter().enumerate() {
                    let reg = self.declare_var(name, *pos)?;
                    let index = i8::try_from(i).map_err(|_| {
                        CompileError::new(ErrorKind::TooLarge, *pos, "tuple too wide")
                    })?;
                    self.emit(
                        op::getidxi(
                            RegId::new(reg),
                            RegId::new(tuple),
                            Simm8::new(index),
                        ),
                        *pos,
                    );
                }
                self.free_temp(tuple);
            }
            Stmt::UnpackObject {
                bindings,
                value,
                pos,
            } => {
                let obj = self.lower_expr(value, *pos)?;
                for (field, name, _) in bindings {
                    let reg = self.declare_var(name, *pos)?;
                    match self.field_key(field) {
                        Some(key) => {
                            self.emit(
                                op::getfld(
                                    RegId::new(reg),
                                    RegId::new(obj),
                                    RegId::new(key),
                                ),
                                *pos,
                            );
                        }
                        None => {
                            let key =
                                self.load_const(Constant::Str(field.clone()), *pos)?;
                            self.emit(
                                op::getidx(
                                    RegId::new(reg),
                                    RegId::new(obj),
                                    RegId::new(key),
                                ),
                                *pos,
                            );
                            self.free_temp(key);
                        }
                    }
                }
                self.free_temp(obj);
            }
        }
        Ok(())
    }

    fn lower_assign(
        &mut self,
        target: &LValue,
        value: &Expr,
        pos: Pos,
    ) -> Result<(), CompileError> {
        match target {
            LValue::Name(name) => {
                if let Some(reg) = self.lookup_var(name) {
                    self.lower_expr_into(reg, value, pos)?;
                } else {
                    let value_reg = self.lower_expr(value, pos)?;
                    let index = self.global_name_index(name);
                    self.emit(
                        op::setglob(RegId::new(value_reg), Imm16::new(index)),
                        pos,
                    );
                    self.free_temp(value_reg);
                }
            }
            LValue::Field { obj, field } => {
                let obj_reg = self.lower_expr(obj, pos)?;
                let value_reg = self.lower_expr(value, pos)?;
                self.emit_field_store(obj_reg, field, value_reg, pos)?;
                self.free_temp(value_reg);
                self.free_temp(obj_reg);
            }
            LValue::Index { obj, index } => {
                let obj_reg = self.lower_expr(obj, pos)?;
                let index_reg = self.lower_expr(index, pos)?;
                let value_reg = self.lower_expr(value, pos)?;
                self.emit(
                    op::setidx(
                        RegId::new(obj_reg),
                        RegId::new(index_reg),
                        RegId::new(value_reg),
                    ),
                    pos,
                );
                self.free_temp(value_reg);
                self.free_temp(index_reg);
                self.free_temp(obj_reg);
            }
            LValue::Deref(cell) => {
                let cell_reg = self.lower_expr(cell, pos)?;
                let value_reg = self.lower_expr(value, pos)?;
                self.emit(
                    op::refset(
                        RegId::new(cell_reg),
                        RegId::new(value_reg),
                        RegId::new(0),
                    ),
                    pos,
                );
                self.free_temp(value_reg);
                self.free_temp(cell_reg);
            }
        }
        Ok(())
    }

    /// Compound assignment, preferring the fused load-op-store forms when the
    /// target is a field or element.
    fn lower_compound(
        &mut self,
        target: &LValue,
        bin: BinOp,
        value: &Expr,
        operand_ty: &Type,
        pos: Pos,
    ) -> Result<(), CompileError> {
        let alu = match bin {
            BinOp::Add => Some(etch_asm::AluOp::Add),
            BinOp::Sub => Some(etch_asm::AluOp::Sub),
            BinOp::Mul => Some(etch_asm::AluOp::Mul),
            BinOp::Div => Some(etch_asm::AluOp::Div),
            BinOp::Mod => Some(etch_asm::AluOp::Mod),
            _ => None,
        };

        match (target, alu) {
            // Field bumped by a small int constant: one fused instruction.
            (LValue::Field { obj, field }, Some(etch_asm::AluOp::Add))
                if small_int(value).is_some() && *operand_ty == Type::Int =>
            {
                if let Some(key) = self.field_key(field) {
                    let obj_reg = self.lower_expr(obj, pos)?;
                    let imm = small_int(value).expect("guard checked the literal");
                    self.emit(
                        op::fldaddi(RegId::new(obj_reg), key, Simm8::new(imm)),
                        pos,
                    );
                    self.free_temp(obj_reg);
                    return Ok(());
                }
            }
            (LValue::Field { obj, field }, Some(etch_asm::AluOp::Sub))
                if small_int(value).map(i8::checked_neg).flatten().is_some()
                    && *operand_ty == Type::Int =>
            {
                if let Some(key) = self.field_key(field) {
                    let obj_reg = self.lower_expr(obj, pos)?;
                    let imm = small_int(value)
                        .and_then(i8::checked_neg)
                        .expect("guard checked the literal");
                    self.emit(
                        op::fldaddi(RegId::new(obj_reg), key, Simm8::new(imm)),
                        pos,
                    );
                    self.free_temp(obj_reg);
                    return Ok(());
                }
            }
            // Element compound assignment: the fused get-op-set family.
            (LValue::Index { obj, index }, Some(alu)) => {
                let obj_reg = self.lower_expr(obj, pos)?;
                let index_reg = self.lower_expr(index, pos)?;
                let value_reg = self.lower_expr(value, pos)?;
                let fused = etch_asm::compound_index(alu);
                self.emit(
                    etch_asm::Instruction::ax(
                        fused,
                        RegId::new(obj_reg),
                        RegId::new(index_reg),
                        RegId::new(value_reg),
                        RegId::new(0),
                    ),
                    pos,
                );
                self.free_temp(value_reg);
                self.free_temp(index_reg);
                self.free_temp(obj_reg);
                return Ok(());
            }
            _ => {}
        }

        // General form: read, operate, write back.
        let read = match target {
            LValue::Name(name) => Expr::Name(name.clone()),
            LValue::Field { obj, field } => Expr::Field {
                obj: Box::new(obj.clone()),
                field: field.clone(),
            },
            LValue::Index { obj, index } => Expr::Index {
                obj: Box::new(obj.clone()),
                index: Box::new(index.clone()),
            },
            LValue::Deref(cell) => Expr::Deref(Box::new(cell.clone())),
        };
        let combined = Expr::Binary {
            op: bin,
            lhs: Box::new(read),
            rhs: Box::new(value.clone()),
            operand_ty: operand_ty.clone(),
        };
        self.lower_assign(target, &combined, pos)
    }
}

fn small_int(expr: &Expr) -> Option<i8> {
    match expr {
        Expr::Int(value) => i8::try_from(*value).ok(),
        _ => None,
    }
}
