//! Arithmetic, comparison and fused-arithmetic handlers.

use super::Interpreter;
use crate::{error::SimpleResult, value::Value};
use etch_asm::{
    triadic_ops, AluClass, AluOp, CmpKind, Instruction, Opcode, PanicReason, RegId,
};
use std::cmp::Ordering;

impl Interpreter {
    pub(super) fn op_alu(&mut self, opcode: Opcode, insn: Instruction) -> SimpleResult<()> {
        use Opcode::*;

        match opcode {
            ADD => {
                let result = self.add_values(insn.b(), insn.c())?;
                self.write_reg_owned(insn.a(), result);
                return Ok(());
            }
            SUB | MUL | DIV | MOD => {
                let (op, _) = etch_asm::alu_binop(opcode).expect("binary alu opcode");
                let result = Value::arith(op, self.reg(insn.b()), self.reg(insn.c()))?;
                self.write_reg(insn.a(), result);
                return Ok(());
            }
            IADD | ISUB | IMUL | IDIV | IMOD => {
                let (op, _) = etch_asm::alu_binop(opcode).expect("binary alu opcode");
                let result =
                    Value::arith_int(op, self.reg(insn.b()), self.reg(insn.c()))?;
                self.write_reg(insn.a(), result);
                return Ok(());
            }
            FADD | FSUB | FMUL | FDIV | FMOD => {
                let (op, _) = etch_asm::alu_binop(opcode).expect("binary alu opcode");
                let result =
                    Value::arith_float(op, self.reg(insn.b()), self.reg(insn.c()))?;
                self.write_reg(insn.a(), result);
                return Ok(());
            }
            POW => {
                let result = pow_values(self.reg(insn.b()), self.reg(insn.c()))?;
                self.write_reg(insn.a(), result);
                return Ok(());
            }
            NEG => {
                let result = match self.reg(insn.b()) {
                    Value::Int(i) => Value::Int(i.wrapping_neg()),
                    Value::Float(f) => Value::Float(-f),
                    _ => return Err(PanicReason::TypeMismatch),
                };
                self.write_reg(insn.a(), result);
                return Ok(());
            }
            NOT => {
                let value = self.reg(insn.b()).truthy()?;
                self.write_reg(insn.a(), Value::Bool(!value));
                return Ok(());
            }
            AND => {
                let lhs = self.reg(insn.b()).truthy()?;
                let rhs = self.reg(insn.c()).truthy()?;
                self.write_reg(insn.a(), Value::Bool(lhs && rhs));
                return Ok(());
            }
            OR => {
                let lhs = self.reg(insn.b()).truthy()?;
                let rhs = self.reg(insn.c()).truthy()?;
                self.write_reg(insn.a(), Value::Bool(lhs || rhs));
                return Ok(());
            }
            _ => {}
        }

        match opcode {
            ADDIMM | SUBIMM | MULIMM | DIVIMM | MODIMM => {
                let op = match opcode {
                    ADDIMM => AluOp::Add,
                    SUBIMM => AluOp::Sub,
                    MULIMM => AluOp::Mul,
                    DIVIMM => AluOp::Div,
                    _ => AluOp::Mod,
                };
                let imm = imm_operand(self.reg(insn.b()), insn)?;
                let result = Value::arith(op, self.reg(insn.b()), &imm)?;
                self.write_reg(insn.a(), result);
            }
            ANDIMM => {
                let lhs = self.reg(insn.b()).as_int().ok_or(PanicReason::TypeMismatch)?;
                let imm = i64::from(insn.imm_c().0);
                self.write_reg(insn.a(), Value::Int(lhs & imm));
            }
            ORIMM => {
                let lhs = self.reg(insn.b()).as_int().ok_or(PanicReason::TypeMismatch)?;
                let imm = i64::from(insn.imm_c().0);
                self.write_reg(insn.a(), Value::Int(lhs | imm));
            }

            EQ => {
                let expected = insn.a().to_u8() != 0;
                let equal = self.values_equal(insn.b(), insn.c());
                if equal != expected {
                    self.skip_next();
                }
            }
            LT | LE => {
                let expected = insn.a().to_u8() != 0;
                let ordering = self
                    .reg(insn.b())
                    .partial_cmp_scalar(self.reg(insn.c()))?;
                let holds = match opcode {
                    LT => matches!(ordering, Some(Ordering::Less)),
                    _ => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                };
                if holds != expected {
                    self.skip_next();
                }
            }
            EQS | NES => {
                let equal = self.values_equal(insn.b(), insn.c());
                let result = if opcode == EQS { equal } else { !equal };
                self.write_reg(insn.a(), Value::Bool(result));
            }
            LTS | LES => {
                let ordering = self
                    .reg(insn.b())
                    .partial_cmp_scalar(self.reg(insn.c()))?;
                let holds = match opcode {
                    LTS => matches!(ordering, Some(Ordering::Less)),
                    _ => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                };
                self.write_reg(insn.a(), Value::Bool(holds));
            }
            CMPJMP => {
                let kind = insn.cmp_kind()?;
                let holds = match kind {
                    CmpKind::Eq => self.values_equal(insn.b(), insn.c()),
                    CmpKind::Ne => !self.values_equal(insn.b(), insn.c()),
                    ordered => {
                        let ordering = self
                            .reg(insn.b())
                            .partial_cmp_scalar(self.reg(insn.c()))?;
                        match ordered {
                            CmpKind::Lt => matches!(ordering, Some(Ordering::Less)),
                            CmpKind::Le => {
                                matches!(ordering, Some(Ordering::Less | Ordering::Equal))
                            }
                            CmpKind::Gt => matches!(ordering, Some(Ordering::Greater)),
                            CmpKind::Ge => matches!(
                                ordering,
                                Some(Ordering::Greater | Ordering::Equal)
                            ),
                            _ => false,
                        }
                    }
                };
                if holds {
                    self.branch(i32::from(insn.imm_d().0))?;
                }
            }
            INCLT => {
                let counter = self
                    .reg(insn.a())
                    .as_int()
                    .ok_or(PanicReason::TypeMismatch)?;
                let bumped = counter.wrapping_add(1);
                self.write_reg(insn.a(), Value::Int(bumped));
                let limit = self
                    .reg(insn.b())
                    .as_int()
                    .ok_or(PanicReason::TypeMismatch)?;
                if bumped < limit {
                    self.branch(i32::from(insn.imm_d().0))?;
                }
            }
            _ => return Err(PanicReason::InvalidInstruction),
        }
        Ok(())
    }

    pub(super) fn op_fused_triadic(
        &mut self,
        opcode: Opcode,
        insn: Instruction,
    ) -> SimpleResult<()> {
        let (first, second, class) =
            triadic_ops(opcode).ok_or(PanicReason::InvalidInstruction)?;
        let apply = match class {
            AluClass::Generic => Value::arith,
            AluClass::Int => Value::arith_int,
            AluClass::Float => Value::arith_float,
        };
        let mid = apply(first, self.reg(insn.b()), self.reg(insn.c()))?;
        let result = apply(second, &mid, self.reg(insn.d()))?;
        self.write_reg(insn.a(), result);
        Ok(())
    }

    /// `+` with the concatenation forms: matching numeric scalars, string
    /// and string, array and array. Returns an owned (already-retained)
    /// value.
    fn add_values(&mut self, lhs: RegId, rhs: RegId) -> SimpleResult<Value> {
        let a = self.reg_cloned(lhs);
        let b = self.reg_cloned(rhs);
        match (&a, &b) {
            (Value::Str(x), Value::Str(y)) => {
                let mut joined = String::with_capacity(x.len() + y.len());
                joined.push_str(x);
                joined.push_str(y);
                Ok(Value::str(joined))
            }
            (Value::Array(x), Value::Array(y)) => {
                let mut items = x.as_ref().clone();
                items.extend(y.iter().cloned());
                let value = Value::Array(Box::new(items));
                self.heap_mut().retain(&value);
                Ok(value)
            }
            (Value::Ref(x), Value::Ref(y)) => {
                let mut items = self.heap().array_items(*x)?;
                items.extend(self.heap().array_items(*y)?);
                let id = self.heap_mut().alloc_array(items.len())?;
                for item in items {
                    self.heap_mut().array_push(id, item)?;
                }
                Ok(Value::Ref(id))
            }
            _ => Value::arith(AluOp::Add, &a, &b),
        }
    }

    /// Equality with the weak-against-nil special case: a weak handle equals
    /// `nil` exactly when its referent is gone.
    pub(crate) fn values_equal(&self, lhs: RegId, rhs: RegId) -> bool {
        let (a, b) = (self.reg(lhs), self.reg(rhs));
        self.value_eq(a, b)
    }

    pub(crate) fn value_eq(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Weak(id), Value::Nil) | (Value::Nil, Value::Weak(id)) => {
                !self.heap().weak_is_valid(*id)
            }
            _ => a == b,
        }
    }
}

fn pow_values(lhs: &Value, rhs: &Value) -> SimpleResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let exp = u32::try_from(*b).map_err(|_| PanicReason::TypeMismatch)?;
            Ok(Value::Int(a.wrapping_pow(exp)))
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a.powf(*b))),
        _ => Err(PanicReason::TypeMismatch),
    }
}

fn imm_operand(lhs: &Value, insn: Instruction) -> SimpleResult<Value> {
    let imm = i64::from(insn.imm_c().0);
    match lhs {
        Value::Int(_) => Ok(Value::Int(imm)),
        Value::Float(_) => Ok(Value::Float(imm as f64)),
        _ => Err(PanicReason::TypeMismatch),
    }
}
