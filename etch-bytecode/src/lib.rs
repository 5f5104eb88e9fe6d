//! Program artifact for the Etch register VM.
//!
//! A [`Program`] is the immutable output of the compiler and the input of the
//! VM: the instruction stream plus the constant pool, function table, type
//! registry, debug map and lifetime map, with a versioned binary layout for
//! storage on disk.

#![warn(missing_docs)]

mod constant;
mod debug_info;
mod function;
mod program;
mod serialize;
mod types;

pub use constant::{Constant, ConstantPool};
pub use debug_info::{DebugMap, LifetimeMap, LifetimeRecord, SourcePos};
pub use function::{
    FunctionDesc, FunctionKind, FunctionTable, PropagationKind, TypeSig,
};
pub use program::Program;
pub use serialize::MAGIC;
pub use types::{type_id, TypeDecl, TypeRegistry};

/// Why a serialized program was rejected by the loader.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The input does not start with the program magic.
    #[error("not an etch program: bad magic bytes")]
    BadMagic,
    /// The program was produced by a different bytecode version.
    #[error("bytecode version mismatch: loader supports {expected}, file carries {found}")]
    BytecodeVersion {
        /// Version this loader supports.
        expected: u16,
        /// Version found in the file.
        found: u16,
    },
    /// The program was produced against a different AST structure version.
    #[error("AST version mismatch: loader supports {expected}, file carries {found}")]
    AstVersion {
        /// Version this loader supports.
        expected: u16,
        /// Version found in the file.
        found: u16,
    },
    /// The input ended inside a section.
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// A section decoded but violates a structural invariant.
    #[error("corrupted program: {0}")]
    Corrupted(String),
}
