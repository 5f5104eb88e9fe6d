//! Runtime error taxonomy of the virtual machine.

use etch_asm::PanicReason;
use etch_bytecode::{LoadError, SourcePos};

/// Result of an operation that can only fail with a VM panic.
pub type SimpleResult<T> = Result<T, PanicReason>;

/// Result of an operation driven through the interpreter's outer surface.
pub type VmResult<T> = Result<T, VmError>;

/// Fatal interpreter error. Panics abort execution; the owning context stays
/// usable for further compiles.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    /// Execution aborted with a well-formed VM panic.
    #[error("vm panic: {reason} at pc {pc}{}", fmt_pos(.pos))]
    Panic {
        /// What went wrong.
        reason: PanicReason,
        /// Instruction the panic surfaced at.
        pc: u32,
        /// Source position from the debug map, when mapped.
        pos: Option<SourcePos>,
    },
    /// The program artifact was rejected at load time.
    #[error("load error: {0}")]
    Load(#[from] LoadError),
    /// A host-facing call named a function the program does not export.
    #[error("no function named `{0}` in the program")]
    UnknownFunction(String),
    /// An execute/call operation was issued before a program was loaded.
    #[error("no program loaded")]
    NoProgram,
    /// A host-facing call was issued while the VM is suspended at a debug
    /// event; it must be resumed or reset first.
    #[error("vm is suspended at a debug event")]
    Suspended,
}

impl VmError {
    /// The panic reason behind this error, if it is a panic.
    pub const fn panic_reason(&self) -> Option<PanicReason> {
        match self {
            VmError::Panic { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

fn fmt_pos(pos: &Option<SourcePos>) -> String {
    match pos {
        Some(p) => format!(" (line {}, column {})", p.line, p.column),
        None => String::new(),
    }
}
