//! Wrapper-variant handlers: `some`/`ok`/`error` construction, tag tests,
//! unwrapping and the cast table.

use super::Interpreter;
use crate::{error::SimpleResult, value::Value};
use etch_asm::{CastKind, Instruction, Opcode, PanicReason};

impl Interpreter {
    pub(super) fn op_wrap(&mut self, opcode: Opcode, insn: Instruction) -> SimpleResult<()> {
        match opcode {
            Opcode::WRAPSOME => {
                let inner = self.reg_cloned(insn.b());
                self.write_reg(insn.a(), Value::Some(Box::new(inner)));
            }
            Opcode::WRAPOK => {
                let inner = self.reg_cloned(insn.b());
                self.write_reg(insn.a(), Value::Ok(Box::new(inner)));
            }
            Opcode::WRAPERR => {
                let inner = self.reg_cloned(insn.b());
                self.write_reg(insn.a(), Value::Err(Box::new(inner)));
            }
            Opcode::TESTTAG => {
                let expected = insn.c().to_u8() != 0;
                let matches = self.reg(insn.a()).tag() as u8 == insn.b().to_u8();
                if matches != expected {
                    self.skip_next();
                }
            }
            Opcode::UNWRAPOPT => {
                let inner = match self.reg(insn.b()) {
                    Value::Some(inner) => inner.as_ref().clone(),
                    Value::None => return Err(PanicReason::UnwrapFailed),
                    _ => return Err(PanicReason::TypeMismatch),
                };
                self.write_reg(insn.a(), inner);
            }
            Opcode::UNWRAPRES => {
                let want_err = insn.c().to_u8() != 0;
                let inner = match (self.reg(insn.b()), want_err) {
                    (Value::Ok(inner), false) | (Value::Err(inner), true) => {
                        inner.as_ref().clone()
                    }
                    (Value::Ok(_) | Value::Err(_), _) => {
                        return Err(PanicReason::UnwrapFailed)
                    }
                    _ => return Err(PanicReason::TypeMismatch),
                };
                self.write_reg(insn.a(), inner);
            }
            Opcode::CAST => {
                let kind = CastKind::try_from(insn.c().to_u8())?;
                let value = cast(self.reg(insn.b()), kind)?;
                self.write_reg(insn.a(), value);
            }
            _ => return Err(PanicReason::InvalidInstruction),
        }
        Ok(())
    }
}

fn cast(value: &Value, kind: CastKind) -> SimpleResult<Value> {
    let out = match (kind, value) {
        (CastKind::IntToFloat, Value::Int(i)) => Value::Float(*i as f64),
        (CastKind::FloatToInt, Value::Float(f)) => {
            if !f.is_finite() {
                return Err(PanicReason::InvalidCast);
            }
            Value::Int(f.trunc() as i64)
        }
        (CastKind::IntToString, Value::Int(i)) => Value::str(i.to_string()),
        (CastKind::FloatToString, Value::Float(f)) => Value::str(Value::Float(*f).to_string()),
        (CastKind::BoolToString, Value::Bool(b)) => Value::str(b.to_string()),
        (CastKind::CharToString, Value::Char(c)) => {
            Value::str((*c as char).to_string())
        }
        (CastKind::CharToInt, Value::Char(c)) => Value::Int(i64::from(*c)),
        (CastKind::IntToChar, Value::Int(i)) => {
            let byte = u8::try_from(*i).map_err(|_| PanicReason::InvalidCast)?;
            Value::Char(byte)
        }
        (CastKind::StringToInt, Value::Str(s)) => {
            let parsed = s.trim().parse::<i64>().map_err(|_| PanicReason::InvalidCast)?;
            Value::Int(parsed)
        }
        (CastKind::StringToFloat, Value::Str(s)) => {
            let parsed = s.trim().parse::<f64>().map_err(|_| PanicReason::InvalidCast)?;
            Value::Float(parsed)
        }
        _ => return Err(PanicReason::TypeMismatch),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_to_int_truncates_toward_zero() {
        assert_eq!(cast(&Value::Float(2.9), CastKind::FloatToInt), Ok(Value::Int(2)));
        assert_eq!(cast(&Value::Float(-2.9), CastKind::FloatToInt), Ok(Value::Int(-2)));
        assert_eq!(
            cast(&Value::Float(f64::NAN), CastKind::FloatToInt),
            Err(PanicReason::InvalidCast)
        );
    }

    #[test]
    fn string_casts_reject_malformed_input() {
        assert_eq!(
            cast(&Value::str("12x"), CastKind::StringToInt),
            Err(PanicReason::InvalidCast)
        );
        assert_eq!(cast(&Value::str(" 42 "), CastKind::StringToInt), Ok(Value::Int(42)));
    }

    #[test]
    fn int_to_char_requires_byte_range() {
        assert_eq!(cast(&Value::Int(65), CastKind::IntToChar), Ok(Value::Char(b'A')));
        assert_eq!(
            cast(&Value::Int(300), CastKind::IntToChar),
            Err(PanicReason::InvalidCast)
        );
    }
}
