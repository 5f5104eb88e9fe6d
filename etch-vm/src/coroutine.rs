//! Coroutine state machines.
//!
//! Coroutines are stackless: each one is a saved register window plus a
//! resume PC. The compiler threads resume labels through yield points; the
//! scheduler is the trivially single-active model, so no OS thread is ever
//! involved.

use crate::call::DeferRecord;
use crate::value::{HeapId, Value};
use etch_asm::RegId;

/// Lifecycle of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoroutineState {
    /// Spawned, never resumed.
    Ready,
    /// Currently the active thread of control.
    Running,
    /// Parked at a yield or a blocking channel operation.
    Suspended,
    /// Last strong reference dropped; pending a defer-draining resume.
    Cleanup,
    /// Returned, cancelled, or cleaned up. Resume returns the stored result
    /// without executing anything.
    Dead,
}

/// A coroutine: function, saved frame, and resume bookkeeping.
#[derive(Debug, Clone)]
pub struct Coroutine {
    /// Function-table index of the coroutine body.
    pub func: u16,
    /// Lifecycle state.
    pub state: CoroutineState,
    /// PC to continue from at the next resume.
    pub resume_pc: u32,
    /// Saved register window, valid while not `Running`.
    pub registers: Vec<Value>,
    /// Saved pending-defer stack.
    pub defers: Vec<DeferRecord>,
    /// Register inside the coroutine frame that receives the resume argument.
    pub yield_dst: RegId,
    /// Most recently yielded value.
    pub last_yield: Value,
    /// Final return value once `Dead`.
    pub result: Value,
    /// Channel this coroutine is parked on, when suspended by a blocking
    /// channel operation.
    pub parked_on: Option<HeapId>,
}

impl Coroutine {
    /// A fresh coroutine over `func` with its argument registers seeded and
    /// the window sized to the function's high-water mark.
    pub fn new(func: u16, entry: u32, args: Vec<Value>, max_registers: u8) -> Self {
        let mut registers = args;
        registers.resize(max_registers as usize, Value::Nil);
        Self {
            func,
            state: CoroutineState::Ready,
            resume_pc: entry,
            registers,
            defers: Vec::new(),
            yield_dst: RegId::new(0),
            last_yield: Value::Nil,
            result: Value::Nil,
            parked_on: None,
        }
    }

    /// Whether a resume may push a frame for this coroutine.
    pub const fn is_resumable(&self) -> bool {
        matches!(
            self.state,
            CoroutineState::Ready | CoroutineState::Suspended | CoroutineState::Cleanup
        )
    }

    /// Every value the coroutine owns, for release when its slot is freed.
    pub fn owned_values(&self) -> Vec<Value> {
        let mut values = self.registers.clone();
        values.push(self.last_yield.clone());
        values.push(self.result.clone());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_coroutine_is_ready_with_seeded_args() {
        let coroutine = Coroutine::new(3, 10, vec![Value::Int(7)], 4);
        assert_eq!(coroutine.state, CoroutineState::Ready);
        assert_eq!(coroutine.resume_pc, 10);
        assert_eq!(coroutine.registers.len(), 4);
        assert_eq!(coroutine.registers[0], Value::Int(7));
        assert_eq!(coroutine.registers[1], Value::Nil);
        assert!(coroutine.is_resumable());
    }

    #[test]
    fn dead_coroutines_are_not_resumable() {
        let mut coroutine = Coroutine::new(0, 0, vec![], 1);
        coroutine.state = CoroutineState::Dead;
        assert!(!coroutine.is_resumable());
    }
}
