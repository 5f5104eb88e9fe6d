//! Call frames and pending-defer bookkeeping.

use crate::value::{HeapId, Value};
use etch_asm::RegId;

/// A queued defer body: the PC of its first instruction. The body runs the
/// frame's registers and ends at `DEFEREND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeferRecord {
    /// First instruction of the defer body.
    pub body_pc: u32,
}

/// What a frame is on its way to once its defers are drained.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingExit {
    /// Ordinary or propagating return carrying the result value.
    Return(Value),
    /// Forced coroutine cleanup; no result, the coroutine dies after the
    /// drain.
    Cleanup,
}

/// Per-call activation record.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Function-table index of the callee.
    pub func: u16,
    /// Fixed-size register window, sized to the callee's high-water mark.
    pub registers: Vec<Value>,
    /// Caller PC to restore on return.
    pub ret_pc: u32,
    /// Caller register that receives the result.
    pub dst: RegId,
    /// Whether the caller expects a result written back.
    pub wants_result: bool,
    /// Pending defer bodies, executed LIFO on exit.
    pub defers: Vec<DeferRecord>,
    /// Coroutine this frame belongs to; `None` on the main thread.
    pub coroutine: Option<HeapId>,
    /// Heap slot whose destructor this frame is running, if any. Popped off
    /// the reentry guard when the frame exits.
    pub dtor_of: Option<HeapId>,
    /// Set while the frame drains defers on its way out.
    pub exiting: Option<PendingExit>,
}

impl CallFrame {
    /// A frame for `func` with a window of `max_registers`, returning into
    /// the caller's `dst` at `ret_pc`.
    pub fn new(func: u16, max_registers: u8, ret_pc: u32, dst: RegId) -> Self {
        Self {
            func,
            registers: vec![Value::Nil; max_registers as usize],
            ret_pc,
            dst,
            wants_result: true,
            defers: Vec::new(),
            coroutine: None,
            dtor_of: None,
            exiting: None,
        }
    }

    /// Read a register.
    pub fn reg(&self, id: RegId) -> &Value {
        &self.registers[id.to_u8() as usize]
    }

    /// Number of registers in the window.
    pub fn window(&self) -> usize {
        self.registers.len()
    }
}
