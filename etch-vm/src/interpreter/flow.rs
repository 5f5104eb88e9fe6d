//! Control-flow handlers: branches, loops, calls, returns and defers.

use super::Interpreter;
use crate::{
    call::{DeferRecord, PendingExit},
    error::SimpleResult,
    heap::SlotKind,
    state::ExecuteState,
    value::Value,
};
use etch_asm::{Instruction, Opcode, PanicReason, RegId};
use etch_bytecode::FunctionKind;

impl Interpreter {
    pub(super) fn op_flow(&mut self, opcode: Opcode, insn: Instruction) -> SimpleResult<()> {
        match opcode {
            Opcode::JMP => self.branch(i32::from(insn.sbx().0))?,
            Opcode::TEST => {
                let expected = insn.c().to_u8() != 0;
                if self.reg(insn.a()).truthy()? != expected {
                    self.skip_next();
                }
            }
            Opcode::TESTSET => {
                let expected = insn.c().to_u8() != 0;
                if self.reg(insn.b()).truthy()? == expected {
                    let value = self.reg_cloned(insn.b());
                    self.write_reg(insn.a(), value);
                } else {
                    self.skip_next();
                }
            }
            Opcode::FORIPREP => {
                let counter = self
                    .reg(insn.a())
                    .as_int()
                    .ok_or(PanicReason::TypeMismatch)?;
                self.write_reg(insn.a(), Value::Int(counter.wrapping_sub(1)));
                self.branch(i32::from(insn.sbx().0))?;
            }
            Opcode::FORILOOP => {
                let counter = self
                    .reg(insn.a())
                    .as_int()
                    .ok_or(PanicReason::TypeMismatch)?
                    .wrapping_add(1);
                let limit = {
                    let limit_reg = RegId::new(insn.a().to_u8() + 1);
                    self.reg(limit_reg)
                        .as_int()
                        .ok_or(PanicReason::TypeMismatch)?
                };
                if counter <= limit {
                    self.write_reg(insn.a(), Value::Int(counter));
                    self.branch(i32::from(insn.sbx().0))?;
                }
            }
            Opcode::FORPREP => {
                let index_reg = RegId::new(insn.a().to_u8() + 1);
                self.write_reg(index_reg, Value::Int(0));
                self.branch(i32::from(insn.sbx().0))?;
            }
            Opcode::FORLOOP => {
                let container = insn.a();
                let index_reg = RegId::new(insn.a().to_u8() + 1);
                let bind_reg = RegId::new(insn.a().to_u8() + 2);
                let index = self
                    .reg(index_reg)
                    .as_int()
                    .ok_or(PanicReason::TypeMismatch)?;
                let i = usize::try_from(index).map_err(|_| PanicReason::TypeMismatch)?;
                if i < self.length_of(container)? {
                    let item = self.iter_item(container, i)?;
                    self.write_reg(bind_reg, item);
                    self.write_reg(index_reg, Value::Int(index + 1));
                    self.branch(i32::from(insn.sbx().0))?;
                }
            }
            _ => return Err(PanicReason::InvalidInstruction),
        }
        Ok(())
    }

    /// The `i`-th iteration binding of a container: array element, table key
    /// (insertion order), or string byte.
    fn iter_item(&self, container: RegId, i: usize) -> SimpleResult<Value> {
        match self.reg(container) {
            Value::Str(s) => s
                .as_bytes()
                .get(i)
                .map(|byte| Value::Char(*byte))
                .ok_or(PanicReason::IndexOutOfBounds),
            Value::Array(items) => {
                items.get(i).cloned().ok_or(PanicReason::IndexOutOfBounds)
            }
            Value::Ref(id) => match self.heap().slot(*id).map(|slot| slot.kind()) {
                Some(SlotKind::Array(_)) => self.heap().array_get(*id, i),
                Some(SlotKind::Table(_)) => {
                    let keys = self.heap().table_keys(*id)?;
                    keys.get(i)
                        .map(|key| Value::Str(key.clone()))
                        .ok_or(PanicReason::IndexOutOfBounds)
                }
                _ => Err(PanicReason::TypeMismatch),
            },
            Value::Nil => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    pub(super) fn op_ret(&mut self, insn: Instruction) -> SimpleResult<ExecuteState> {
        let value = if insn.a().to_u8() > 0 {
            self.reg_cloned(insn.b())
        } else {
            Value::Nil
        };
        self.begin_frame_exit(PendingExit::Return(value))
    }

    pub(super) fn op_defer(&mut self, insn: Instruction) -> SimpleResult<()> {
        let body_pc = self.pc();
        self.frame_mut().defers.push(DeferRecord { body_pc });
        self.branch(i32::from(insn.sbx().0))
    }

    pub(super) fn op_call(&mut self, opcode: Opcode, insn: Instruction) -> SimpleResult<()> {
        let base = insn.a().to_u8();
        let args: Vec<Value> = (0..insn.nargs())
            .map(|i| self.reg_cloned(RegId::new(base + 1 + i)))
            .collect();
        let wants_result = insn.nres() > 0;

        match opcode {
            Opcode::CLOSURE => {
                let func = insn.func().to_u16();
                let id = self.heap_mut().alloc_closure(func, args)?;
                self.write_reg_owned(insn.a(), Value::Closure(id));
                return Ok(());
            }
            Opcode::CALLC => {
                let id = match self.reg(insn.a()) {
                    Value::Closure(id) => *id,
                    Value::Nil => return Err(PanicReason::NilDeref),
                    _ => return Err(PanicReason::TypeMismatch),
                };
                let (func, captures) = self.heap().closure(id)?;
                let mut full_args = captures;
                full_args.extend(args);
                let ret_pc = self.pc();
                return self.push_native_frame(
                    func,
                    full_args,
                    ret_pc,
                    insn.a(),
                    wants_result,
                );
            }
            _ => {}
        }

        let func = insn.func().to_u16();
        let desc = self
            .program()
            .functions
            .get(func)
            .ok_or(PanicReason::MissingFunction)?;
        let kind = desc.kind;
        let name = desc.name.clone();
        let symbol = desc.symbol.clone();

        match (opcode, kind) {
            (Opcode::CALL, FunctionKind::Native) => {
                let ret_pc = self.pc();
                self.push_native_frame(func, args, ret_pc, insn.a(), wants_result)?;
            }
            (Opcode::CALLB, FunctionKind::Builtin) => {
                let result = self.call_builtin_by_name(&name, args)?;
                if wants_result {
                    self.write_reg_owned(insn.a(), result);
                }
            }
            (Opcode::CALLH, FunctionKind::Host) => {
                let result = self.call_host_by_name(&name, &args);
                if wants_result {
                    self.write_reg(insn.a(), result);
                }
            }
            (Opcode::CALLF, FunctionKind::Foreign) => {
                let key = symbol.unwrap_or(name);
                if !self.has_host_fn(&key) {
                    return Err(PanicReason::MissingFunction);
                }
                let result = self.call_host_by_name(&key, &args);
                if wants_result {
                    self.write_reg(insn.a(), result);
                }
            }
            // The call opcode and the table entry's kind must agree.
            _ => return Err(PanicReason::MissingFunction),
        }
        Ok(())
    }
}
