//! Instruction set and encodings for the Etch register VM.
//!
//! This crate is the shared vocabulary of the compiler and the virtual
//! machine: opcode bytes, operand packing, the fused-instruction table, the
//! runtime panic taxonomy and the bytecode-format version. It holds no
//! execution state of its own.

#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod args;
mod fused;
mod instruction;
mod opcode;
mod panic_reason;

#[cfg(test)]
mod encoding_tests;

pub use args::{
    AluClass, AluOp, CastKind, CmpKind, FuncId, Imm16, RegId, Simm16, Simm8, ValueTag,
};
pub use fused::{
    alu_binop, cmp_branch, compound_index, compound_index_op, fuse_triadic,
    triadic_ops, TRIADIC_TABLE,
};
pub use instruction::{Format, Instruction};
pub use opcode::Opcode;
pub use panic_reason::PanicReason;

/// Shorthand instruction constructors, one per opcode.
pub mod op {
    pub use crate::opcode::_op::*;
}

/// Version of the bytecode instruction set and program layout. Loaders accept
/// only this version; any change to the instruction table or the serialized
/// sections bumps it.
pub const BYTECODE_VERSION: u16 = 3;

/// Version of the typed-AST structure the compiler consumes. Bumped together
/// with any change to the AST the front-end collaborators present.
pub const AST_VERSION: u16 = 2;

/// Raw, unparsed instruction cell.
pub type RawInstruction = u64;

/// Failed to parse the opcode byte of an instruction cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("the byte does not name an opcode of bytecode version {BYTECODE_VERSION}")]
pub struct InvalidOpcode;
