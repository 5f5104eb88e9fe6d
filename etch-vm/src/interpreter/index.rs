//! Container handlers: indexing, fields, slices, membership, constructors
//! and the fused load-op-store forms.

use super::Interpreter;
use crate::{error::SimpleResult, heap::SlotKind, value::Value};
use etch_asm::{compound_index_op, AluOp, Instruction, Opcode, PanicReason, RegId};

impl Interpreter {
    pub(super) fn op_index(&mut self, opcode: Opcode, insn: Instruction) -> SimpleResult<()> {
        use Opcode::*;

        match opcode {
            IN | NOTIN => {
                let found = self.contains(insn.b(), insn.c())?;
                let result = if opcode == IN { found } else { !found };
                self.write_reg(insn.a(), Value::Bool(result));
            }
            GETIDX => {
                let index = self.index_value(insn.c())?;
                let value = self.get_index(insn.b(), index)?;
                self.write_reg(insn.a(), value);
            }
            GETIDXI => {
                let index = i64::from(insn.imm_c().0);
                let value = self.get_index(insn.b(), IndexKey::Position(index))?;
                self.write_reg(insn.a(), value);
            }
            SETIDX => {
                let index = self.index_value(insn.b())?;
                let value = self.reg_cloned(insn.c());
                self.set_index(insn.a(), index, value)?;
            }
            SETIDXI => {
                let index = i64::from(insn.imm_c().0);
                let value = self.reg_cloned(insn.b());
                self.set_index(insn.a(), IndexKey::Position(index), value)?;
            }
            GETFLD => {
                let key = self.const_str(insn.c().to_u8() as u16)?;
                let value = self.get_field(insn.b(), &key)?;
                self.write_reg(insn.a(), value);
            }
            SETFLD => {
                let key = self.const_str(insn.b().to_u8() as u16)?;
                let value = self.reg_cloned(insn.c());
                self.set_field(insn.a(), &key, value)?;
            }
            SLICE => {
                let value = self.slice(insn.b(), insn.c(), insn.d())?;
                self.write_reg_owned(insn.a(), value);
            }
            LEN => {
                let len = self.length_of(insn.b())?;
                self.write_reg(insn.a(), Value::Int(len as i64));
            }
            NEWARR => {
                let len = insn.bx().0 as usize;
                let id = self.heap_mut().alloc_array(len)?;
                for _ in 0..len {
                    self.heap_mut().array_push(id, Value::Nil)?;
                }
                self.write_reg_owned(insn.a(), Value::Ref(id));
            }
            NEWTAB => {
                let dtor = match insn.b().to_u8() {
                    0 => None,
                    idx => Some((idx - 1) as u16),
                };
                let id = self.heap_mut().alloc_table(dtor)?;
                self.write_reg_owned(insn.a(), Value::Ref(id));
            }
            FLDADDI => {
                let key = self.const_str(insn.b().to_u8() as u16)?;
                let current = self.get_field(insn.a(), &key)?;
                let bumped = Value::arith(
                    AluOp::Add,
                    &current,
                    &Value::Int(i64::from(insn.imm_c().0)),
                )?;
                self.set_field(insn.a(), &key, bumped)?;
            }
            GETADDSET | GETSUBSET | GETMULSET | GETDIVSET | GETMODSET => {
                let op = compound_index_op(opcode)
                    .ok_or(PanicReason::InvalidInstruction)?;
                let index = self.index_value(insn.b())?;
                let current = self.get_index(insn.a(), index)?;
                let operand = self.reg_cloned(insn.c());
                let updated = Value::arith(op, &current, &operand)?;
                let index = self.index_value(insn.b())?;
                self.set_index(insn.a(), index, updated)?;
            }
            _ => return Err(PanicReason::InvalidInstruction),
        }
        Ok(())
    }

    fn index_value(&self, reg: RegId) -> SimpleResult<IndexKey> {
        match self.reg(reg) {
            Value::Int(i) => Ok(IndexKey::Position(*i)),
            Value::Str(s) => Ok(IndexKey::Key(s.to_string())),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    fn get_index(&self, container: RegId, index: IndexKey) -> SimpleResult<Value> {
        match (self.reg(container), index) {
            (Value::Ref(id), IndexKey::Position(i)) => {
                let i = usize::try_from(i).map_err(|_| PanicReason::IndexOutOfBounds)?;
                match self.heap().slot(*id).map(|slot| slot.kind()) {
                    Some(SlotKind::Array(_)) => self.heap().array_get(*id, i),
                    _ => Err(PanicReason::TypeMismatch),
                }
            }
            (Value::Ref(id), IndexKey::Key(key)) => self.heap().table_get(*id, &key),
            (Value::Array(items), IndexKey::Position(i)) => {
                let i = usize::try_from(i).map_err(|_| PanicReason::IndexOutOfBounds)?;
                items.get(i).cloned().ok_or(PanicReason::IndexOutOfBounds)
            }
            (Value::Str(s), IndexKey::Position(i)) => {
                let i = usize::try_from(i).map_err(|_| PanicReason::IndexOutOfBounds)?;
                s.as_bytes()
                    .get(i)
                    .map(|byte| Value::Char(*byte))
                    .ok_or(PanicReason::IndexOutOfBounds)
            }
            (Value::Nil, _) => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    fn set_index(&mut self, container: RegId, index: IndexKey, value: Value) -> SimpleResult<()> {
        match (self.reg_cloned(container), index) {
            (Value::Ref(id), IndexKey::Position(i)) => {
                let i = usize::try_from(i).map_err(|_| PanicReason::IndexOutOfBounds)?;
                self.heap_mut().array_set(id, i, value)
            }
            (Value::Ref(id), IndexKey::Key(key)) => {
                self.heap_mut().table_set(id, &key, value)
            }
            (Value::Array(items), IndexKey::Position(i)) => {
                let i = usize::try_from(i).map_err(|_| PanicReason::IndexOutOfBounds)?;
                if i >= items.len() {
                    return Err(PanicReason::IndexOutOfBounds);
                }
                self.heap_mut().retain(&value);
                let frame = self.frame_mut();
                let Value::Array(items) =
                    &mut frame.registers[container.to_u8() as usize]
                else {
                    return Err(PanicReason::TypeMismatch);
                };
                let old = std::mem::replace(&mut items[i], value);
                self.heap_mut().release(&old);
                Ok(())
            }
            (Value::Nil, _) => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    fn get_field(&self, obj: RegId, key: &str) -> SimpleResult<Value> {
        match self.reg(obj) {
            Value::Ref(id) => self.heap().table_get(*id, key),
            Value::Weak(weak) => {
                let id = self
                    .heap()
                    .weak_target(*weak)
                    .ok_or(PanicReason::NilDeref)?;
                self.heap().table_get(id, key)
            }
            Value::Nil => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    fn set_field(&mut self, obj: RegId, key: &str, value: Value) -> SimpleResult<()> {
        match self.reg_cloned(obj) {
            Value::Ref(id) => self.heap_mut().table_set(id, key, value),
            Value::Weak(weak) => {
                let id = self
                    .heap()
                    .weak_target(weak)
                    .ok_or(PanicReason::NilDeref)?;
                self.heap_mut().table_set(id, key, value)
            }
            Value::Nil => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    fn slice(&mut self, src: RegId, lo: RegId, hi: RegId) -> SimpleResult<Value> {
        let lo = self
            .reg(lo)
            .as_int()
            .ok_or(PanicReason::TypeMismatch)?;
        let hi = self
            .reg(hi)
            .as_int()
            .ok_or(PanicReason::TypeMismatch)?;
        let lo = usize::try_from(lo).map_err(|_| PanicReason::IndexOutOfBounds)?;
        let hi = usize::try_from(hi).map_err(|_| PanicReason::IndexOutOfBounds)?;
        if hi < lo {
            return Err(PanicReason::IndexOutOfBounds);
        }
        match self.reg_cloned(src) {
            Value::Str(s) => {
                let bytes = s.as_bytes();
                if hi > bytes.len() {
                    return Err(PanicReason::IndexOutOfBounds);
                }
                let sliced = std::str::from_utf8(&bytes[lo..hi])
                    .map_err(|_| PanicReason::InvalidCast)?;
                Ok(Value::str(sliced))
            }
            Value::Ref(id) => {
                let items = self.heap().array_items(id)?;
                if hi > items.len() {
                    return Err(PanicReason::IndexOutOfBounds);
                }
                let slice_id = self.heap_mut().alloc_array(hi - lo)?;
                for item in &items[lo..hi] {
                    self.heap_mut().array_push(slice_id, item.clone())?;
                }
                Ok(Value::Ref(slice_id))
            }
            Value::Array(items) => {
                if hi > items.len() {
                    return Err(PanicReason::IndexOutOfBounds);
                }
                let value = Value::Array(Box::new(items[lo..hi].to_vec()));
                self.heap_mut().retain(&value);
                Ok(value)
            }
            Value::Nil => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    pub(crate) fn length_of(&self, reg: RegId) -> SimpleResult<usize> {
        match self.reg(reg) {
            Value::Str(s) => Ok(s.len()),
            Value::Array(items) => Ok(items.len()),
            Value::Ref(id) => self.heap().container_len(*id),
            Value::Nil => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// `needle in haystack`: substring for strings, key presence for tables,
    /// element equality for arrays.
    fn contains(&self, needle: RegId, haystack: RegId) -> SimpleResult<bool> {
        match self.reg(haystack) {
            Value::Str(s) => match self.reg(needle) {
                Value::Str(sub) => Ok(s.contains(sub.as_ref())),
                Value::Char(c) => Ok(s.as_bytes().contains(c)),
                _ => Err(PanicReason::TypeMismatch),
            },
            Value::Array(items) => {
                let needle = self.reg(needle);
                Ok(items.iter().any(|item| self.value_eq(item, needle)))
            }
            Value::Ref(id) => match self.heap().slot(*id).map(|slot| slot.kind()) {
                Some(SlotKind::Array(items)) => {
                    let needle = self.reg(needle);
                    Ok(items.iter().any(|item| self.value_eq(item, needle)))
                }
                Some(SlotKind::Table(_)) => {
                    let key = self
                        .reg(needle)
                        .as_str()
                        .ok_or(PanicReason::TypeMismatch)?;
                    self.heap().table_has(*id, key)
                }
                _ => Err(PanicReason::TypeMismatch),
            },
            Value::Nil => Err(PanicReason::NilDeref),
            _ => Err(PanicReason::TypeMismatch),
        }
    }
}

enum IndexKey {
    Position(i64),
    Key(String),
}
