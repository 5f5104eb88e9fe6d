//! Data-movement handlers: register copies, constant and global loads,
//! scalar heap boxes, weak handles.

use super::Interpreter;
use crate::{error::SimpleResult, value::Value};
use etch_asm::{Instruction, Opcode, PanicReason, RegId};

impl Interpreter {
    pub(super) fn op_data(&mut self, opcode: Opcode, insn: Instruction) -> SimpleResult<()> {
        match opcode {
            Opcode::MOVE => {
                let value = self.reg_cloned(insn.b());
                self.write_reg(insn.a(), value);
            }
            Opcode::LOADK => {
                let value = self.const_value(insn.bx().0)?;
                self.write_reg(insn.a(), value);
            }
            Opcode::LOADI => {
                self.write_reg(insn.a(), Value::Int(insn.sbx().0 as i64));
            }
            Opcode::LOADNIL => {
                let base = insn.a().to_u8();
                let count = insn.b().to_u8();
                for reg in base..=base.saturating_add(count) {
                    self.write_reg(RegId::new(reg), Value::Nil);
                }
            }
            Opcode::LOADBOOL => {
                self.write_reg(insn.a(), Value::Bool(insn.b().to_u8() != 0));
                if insn.c().to_u8() != 0 {
                    self.skip_next();
                }
            }
            Opcode::LOADNONE => {
                self.write_reg(insn.a(), Value::None);
            }
            Opcode::GETGLOB => {
                let name = self.const_str(insn.bx().0)?;
                let value = self
                    .global(&name)
                    .cloned()
                    .unwrap_or(Value::Nil);
                self.write_reg(insn.a(), value);
            }
            Opcode::SETGLOB => {
                let name = self.const_str(insn.bx().0)?;
                let value = self.reg_cloned(insn.a());
                self.set_global(&name, value);
            }
            Opcode::REFNEW => {
                let value = self.reg_cloned(insn.b());
                let dtor = match insn.c().to_u8() {
                    0 => None,
                    idx => Some((idx - 1) as u16),
                };
                let id = self.heap_mut().alloc_scalar(value, dtor)?;
                self.write_reg_owned(insn.a(), Value::Ref(id));
            }
            Opcode::REFGET => {
                let id = match self.reg(insn.b()) {
                    Value::Ref(id) => *id,
                    Value::Weak(weak) => self
                        .heap()
                        .weak_target(*weak)
                        .ok_or(PanicReason::NilDeref)?,
                    Value::Nil => return Err(PanicReason::NilDeref),
                    _ => return Err(PanicReason::TypeMismatch),
                };
                let value = self.heap().scalar_get(id)?;
                self.write_reg(insn.a(), value);
            }
            Opcode::REFSET => {
                let id = match self.reg(insn.a()) {
                    Value::Ref(id) => *id,
                    Value::Nil => return Err(PanicReason::NilDeref),
                    _ => return Err(PanicReason::TypeMismatch),
                };
                let value = self.reg_cloned(insn.b());
                self.heap_mut().scalar_set(id, value)?;
            }
            Opcode::WEAKNEW => {
                let target = match self.reg(insn.b()) {
                    Value::Ref(id) | Value::Closure(id) | Value::Coroutine(id) => *id,
                    Value::Nil => return Err(PanicReason::NilDeref),
                    _ => return Err(PanicReason::TypeMismatch),
                };
                let id = self.heap_mut().alloc_weak(target)?;
                self.write_reg_owned(insn.a(), Value::Weak(id));
            }
            _ => return Err(PanicReason::InvalidInstruction),
        }
        Ok(())
    }
}
