//! Builtin functions of the runtime (function-table kind `builtin`).

use crate::{error::SimpleResult, interpreter::Interpreter, value::Value};
use etch_asm::PanicReason;

/// The base name of a canonical function name: everything before the
/// signature suffix.
pub fn base_name(canonical: &str) -> &str {
    canonical.split("__").next().unwrap_or(canonical)
}

/// Names the runtime provides out of the box.
pub const BUILTIN_NAMES: &[&str] = &["print", "println", "len", "to_string", "read_file"];

pub(crate) fn dispatch(
    vm: &mut Interpreter,
    canonical: &str,
    args: Vec<Value>,
) -> SimpleResult<Value> {
    let first = args.first().cloned().unwrap_or(Value::Nil);
    match base_name(canonical) {
        "print" => {
            let text = vm.display_value(&first);
            vm.write_output(&text)?;
            Ok(Value::Nil)
        }
        "println" => {
            let mut text = vm.display_value(&first);
            text.push('\n');
            vm.write_output(&text)?;
            Ok(Value::Nil)
        }
        "len" => {
            let len = match &first {
                Value::Str(s) => s.len(),
                Value::Array(items) => items.len(),
                Value::Ref(id) => vm.heap().container_len(*id)?,
                Value::Nil => return Err(PanicReason::NilDeref),
                _ => return Err(PanicReason::TypeMismatch),
            };
            Ok(Value::Int(len as i64))
        }
        "to_string" => Ok(Value::str(vm.display_value(&first))),
        // Never panics: failures come back as the error variant.
        "read_file" => {
            let path = first.as_str().ok_or(PanicReason::TypeMismatch)?;
            match std::fs::read_to_string(path) {
                Ok(contents) => Ok(Value::Ok(Box::new(Value::str(contents)))),
                Err(error) => {
                    Ok(Value::Err(Box::new(Value::str(error.to_string()))))
                }
            }
        }
        _ => Err(PanicReason::MissingFunction),
    }
}
