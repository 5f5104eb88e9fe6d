//! The immutable program artifact the compiler emits and the VM executes.

use crate::{
    constant::ConstantPool,
    debug_info::{DebugMap, LifetimeMap},
    function::{FunctionKind, FunctionTable},
    types::TypeRegistry,
    LoadError,
};
use etch_asm::{Instruction, Opcode};

/// A compiled program: instruction stream plus every table the VM, debugger
/// and loaders need.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    /// Dense instruction stream; the PC indexes this vector.
    pub instructions: Vec<Instruction>,
    /// Deduplicated immediate-load values.
    pub constants: ConstantPool,
    /// Function descriptors and their canonical-name index.
    pub functions: FunctionTable,
    /// Declared object/enum/distinct types.
    pub types: TypeRegistry,
    /// PC at which a fresh driver starts.
    pub entry: u32,
    /// PC to source-position map.
    pub debug: DebugMap,
    /// Per-function variable lifetime records.
    pub lifetimes: LifetimeMap,
}

impl Program {
    /// An empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// The instruction at `pc`, if in range.
    pub fn fetch(&self, pc: u32) -> Option<Instruction> {
        self.instructions.get(pc as usize).copied()
    }

    /// Validate the static invariants a well-formed program upholds:
    /// every opcode decodes, every destination register stays below its
    /// function's declared window, and every branch target lands inside the
    /// owning function.
    ///
    /// Run after deserialization; a compiler-emitted program passes by
    /// construction.
    pub fn check(&self) -> Result<(), LoadError> {
        for func in self.functions.iter() {
            if func.kind != FunctionKind::Native {
                continue;
            }
            if func.entry > func.end || func.end as usize > self.instructions.len() {
                return Err(LoadError::Corrupted(format!(
                    "function {} has instruction range {}..{} outside the stream",
                    func.name, func.entry, func.end
                )));
            }
            for pc in func.entry..func.end {
                let insn = self.instructions[pc as usize];
                let opcode = insn.opcode().map_err(|_| {
                    LoadError::Corrupted(format!(
                        "undecodable opcode {:#04x} at pc {pc}",
                        insn.op()
                    ))
                })?;
                self.check_registers(opcode, insn, func.max_registers, pc)?;
                self.check_branch(opcode, insn, func.entry, func.end, pc)?;
            }
        }
        Ok(())
    }

    fn check_registers(
        &self,
        opcode: Opcode,
        insn: Instruction,
        max_registers: u8,
        pc: u32,
    ) -> Result<(), LoadError> {
        let bound = |reg: u8| -> Result<(), LoadError> {
            if reg >= max_registers {
                return Err(LoadError::Corrupted(format!(
                    "register r{reg} at pc {pc} exceeds the frame window of {max_registers}"
                )));
            }
            Ok(())
        };
        // `A` is a register in every form except `CMPJMP` (comparison
        // selector), `RET` (result arity) and `TRAP` (panic reason).
        match opcode {
            Opcode::CMPJMP => {
                bound(insn.b().to_u8())?;
                bound(insn.c().to_u8())?;
            }
            Opcode::RET => {
                bound(insn.b().to_u8())?;
            }
            Opcode::TRAP => {}
            _ => bound(insn.a().to_u8())?,
        }
        Ok(())
    }

    fn check_branch(
        &self,
        opcode: Opcode,
        insn: Instruction,
        entry: u32,
        end: u32,
        pc: u32,
    ) -> Result<(), LoadError> {
        let target = match opcode {
            Opcode::JMP
            | Opcode::FORPREP
            | Opcode::FORLOOP
            | Opcode::FORIPREP
            | Opcode::FORILOOP
            | Opcode::DEFER => {
                Some((pc as i64 + 1).wrapping_add(insn.sbx().0 as i64))
            }
            Opcode::CMPJMP | Opcode::INCLT => {
                Some((pc as i64 + 1).wrapping_add(insn.imm_d().0 as i64))
            }
            _ => None,
        };
        if let Some(target) = target {
            if target < entry as i64 || target > end as i64 {
                return Err(LoadError::Corrupted(format!(
                    "branch at pc {pc} targets {target}, outside {entry}..{end}"
                )));
            }
        }
        Ok(())
    }

    /// Text rendering of the program: per-function instruction listing with
    /// source lines and lifetime annotations. This is what the driver CLI's
    /// `dump` subcommand prints.
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "; etch bytecode v{} ({} instructions, {} constants, entry {})",
            etch_asm::BYTECODE_VERSION,
            self.instructions.len(),
            self.constants.len(),
            self.entry,
        );
        for (idx, func) in self.functions.iter().enumerate() {
            if func.kind != FunctionKind::Native {
                let _ = writeln!(out, "\n{:?} {}", func.kind, func.name);
                continue;
            }
            let _ = writeln!(
                out,
                "\nfn {} ; regs={} range={}..{}",
                func.name, func.max_registers, func.entry, func.end
            );
            for pc in func.entry..func.end {
                let insn = self.instructions[pc as usize];
                let line = self
                    .debug
                    .lookup(pc)
                    .map(|pos| format!(" ; line {}", pos.line))
                    .unwrap_or_default();
                let _ = writeln!(out, "  {pc:>5}  {insn}{line}");
            }
            for record in self.lifetimes.get(idx as u16) {
                let _ = writeln!(
                    out,
                    "  ; {} in r{} over {}..{} (def {})",
                    record.name, record.register, record.start_pc, record.end_pc,
                    record.def_pc
                );
            }
        }
        for (idx, constant) in self.constants.iter().enumerate() {
            let _ = writeln!(out, "; K[{idx}] = {constant:?}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{FunctionDesc, TypeSig};
    use etch_asm::{op, Imm16, RegId, Simm16};

    fn native(name: &str, entry: u32, end: u32, max_registers: u8) -> FunctionDesc {
        FunctionDesc {
            name: name.into(),
            kind: FunctionKind::Native,
            params: vec![],
            ret: TypeSig::Unit,
            entry,
            end,
            max_registers,
            propagates: None,
            library: None,
            symbol: None,
        }
    }

    #[test]
    fn check_accepts_a_well_formed_program() {
        let mut program = Program::new();
        program.instructions = vec![
            op::loadi(RegId::new(0), Simm16::new(2)),
            op::ret(RegId::new(1), RegId::new(0), RegId::new(0)),
        ];
        program.functions.push(native("main__u", 0, 2, 2));
        assert!(program.check().is_ok());
    }

    #[test]
    fn check_rejects_register_over_window() {
        let mut program = Program::new();
        program.instructions = vec![
            op::loadi(RegId::new(5), Simm16::new(2)),
            op::ret(RegId::new(0), RegId::new(0), RegId::new(0)),
        ];
        program.functions.push(native("main__u", 0, 2, 2));
        assert!(matches!(program.check(), Err(LoadError::Corrupted(_))));
    }

    #[test]
    fn check_rejects_branch_out_of_function() {
        let mut program = Program::new();
        program.instructions = vec![
            op::jmp(RegId::new(0), Simm16::new(100)),
            op::ret(RegId::new(0), RegId::new(0), RegId::new(0)),
        ];
        program.functions.push(native("main__u", 0, 2, 1));
        assert!(matches!(program.check(), Err(LoadError::Corrupted(_))));
    }

    #[test]
    fn dump_lists_every_native_instruction() {
        let mut program = Program::new();
        program.instructions = vec![
            op::loadk(RegId::new(0), Imm16::new(0)),
            op::ret(RegId::new(1), RegId::new(0), RegId::new(0)),
        ];
        program.constants.intern(crate::Constant::Int(14));
        program.functions.push(native("main__u", 0, 2, 1));
        let text = program.dump();
        assert!(text.contains("LOADK"));
        assert!(text.contains("RET"));
        assert!(text.contains("K[0]"));
    }
}
