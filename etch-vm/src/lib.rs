//! Register-based virtual machine for Etch.
//!
//! The VM executes [`etch_bytecode::Program`] artifacts over a
//! reference-counted slab heap with a Tarjan cycle collector, stackless
//! coroutines with bounded channels, and a single cooperative thread of
//! control. Hosts embed it through [`Context`], which owns one program and
//! one interpreter.

#![warn(missing_docs)]

mod builtins;
mod call;
mod channel;
mod consts;
mod context;
mod coroutine;
mod error;
mod heap;
mod interpreter;
mod state;
mod value;

pub use builtins::{base_name, BUILTIN_NAMES};
pub use call::{CallFrame, DeferRecord, PendingExit};
pub use channel::Channel;
pub use consts::*;
pub use context::{CaptureBuffer, Context, ContextOptions};
pub use coroutine::{Coroutine, CoroutineState};
pub use error::{SimpleResult, VmError, VmResult};
pub use heap::{GcBudget, GcStats, Heap, RefSet, Slot, SlotKind};
pub use interpreter::{HookAction, HostCallback, InstructionHook, Interpreter};
pub use state::{
    Breakpoint, DebugEval, Debugger, ExecuteState, ProgramState, StepMode,
};
pub use value::{HeapId, Value};
