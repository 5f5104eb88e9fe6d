//! Execution-state representation and the debugger shadow.

use crate::value::Value;
use std::collections::HashSet;

/// Resulting state of a single instruction execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteState {
    /// The VM should proceed normally with the execution.
    Proceed,
    /// The outermost frame returned; the payload is the program's result.
    Return(Value),
    /// A debug event was reached.
    DebugEvent(DebugEval),
}

impl ExecuteState {
    /// Return true if the VM execution should continue.
    pub fn should_continue(&self) -> bool {
        matches!(
            self,
            Self::Proceed | Self::DebugEvent(DebugEval::Continue)
        )
    }
}

impl From<DebugEval> for ExecuteState {
    fn from(d: DebugEval) -> Self {
        Self::DebugEvent(d)
    }
}

/// Resulting state of a program execution.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramState {
    /// The program ran to completion; the payload is its result value.
    Return(Value),
    /// Execution is suspended at a debug event. The VM keeps its state; the
    /// host may inspect it and call run again to continue.
    Suspended(DebugEval),
}

impl ProgramState {
    /// The exit code a driver reports for this state.
    pub fn exit_code(&self) -> i64 {
        match self {
            ProgramState::Return(Value::Int(code)) => *code,
            ProgramState::Return(_) => 0,
            ProgramState::Suspended(_) => 0,
        }
    }
}

/// Debug evaluation describing whether a program should break or continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugEval {
    /// Break at the breakpoint set on this PC.
    Breakpoint(Breakpoint),
    /// A step request completed.
    Step,
    /// The host's instruction callback or pause request stopped the VM.
    HostStop,
    /// Keep running.
    Continue,
}

impl Default for DebugEval {
    fn default() -> Self {
        Self::Continue
    }
}

impl DebugEval {
    /// Flag whether the program execution should continue.
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// Breakpoint bound to a program counter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Breakpoint {
    pc: u32,
}

impl Breakpoint {
    /// Create a breakpoint at an instruction index.
    pub const fn new(pc: u32) -> Self {
        Self { pc }
    }

    /// Program counter that triggers the breakpoint.
    pub const fn pc(&self) -> u32 {
        self.pc
    }
}

impl From<Breakpoint> for DebugEval {
    fn from(b: Breakpoint) -> Self {
        Self::Breakpoint(b)
    }
}

/// Stepping discipline the debugger applies between instructions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMode {
    /// Run until a breakpoint or host stop.
    #[default]
    Run,
    /// Stop before the next instruction, entering calls.
    Into,
    /// Stop before the next instruction at or above the recorded call depth.
    Over {
        /// Call depth when the step was requested.
        depth: usize,
    },
    /// Stop once the call depth drops below the recorded depth.
    Out {
        /// Call depth when the step was requested.
        depth: usize,
    },
}

/// Debugger state: breakpoints and the active step mode.
#[derive(Debug, Default, Clone)]
pub struct Debugger {
    breakpoints: HashSet<u32>,
    step_mode: StepMode,
    is_active: bool,
}

impl Debugger {
    /// Set a breakpoint.
    pub fn set_breakpoint(&mut self, bp: Breakpoint) {
        self.is_active = true;
        self.breakpoints.insert(bp.pc());
    }

    /// Remove a breakpoint, if set.
    pub fn remove_breakpoint(&mut self, bp: &Breakpoint) {
        self.breakpoints.remove(&bp.pc());
        self.is_active = !self.breakpoints.is_empty()
            || self.step_mode != StepMode::Run;
    }

    /// Replace the stepping discipline.
    pub fn set_step_mode(&mut self, mode: StepMode) {
        self.step_mode = mode;
        self.is_active = mode != StepMode::Run || !self.breakpoints.is_empty();
    }

    /// The active stepping discipline.
    pub const fn step_mode(&self) -> StepMode {
        self.step_mode
    }

    /// Whether any breakpoint or step request is outstanding.
    pub const fn is_active(&self) -> bool {
        self.is_active
    }

    /// Evaluate the debugger against the instruction about to execute.
    pub fn eval(&mut self, pc: u32, depth: usize) -> DebugEval {
        if self.breakpoints.contains(&pc) {
            return Breakpoint::new(pc).into();
        }
        let stop = match self.step_mode {
            StepMode::Run => false,
            StepMode::Into => true,
            StepMode::Over { depth: d } => depth <= d,
            StepMode::Out { depth: d } => depth < d,
        };
        if stop {
            self.set_step_mode(StepMode::Run);
            DebugEval::Step
        } else {
            DebugEval::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_fire_on_their_pc_only() {
        let mut dbg = Debugger::default();
        dbg.set_breakpoint(Breakpoint::new(4));
        assert_eq!(dbg.eval(3, 0), DebugEval::Continue);
        assert_eq!(dbg.eval(4, 0), DebugEval::Breakpoint(Breakpoint::new(4)));
    }

    #[test]
    fn step_over_ignores_deeper_frames() {
        let mut dbg = Debugger::default();
        dbg.set_step_mode(StepMode::Over { depth: 1 });
        assert_eq!(dbg.eval(0, 2), DebugEval::Continue);
        assert_eq!(dbg.eval(1, 1), DebugEval::Step);
        // A completed step resets to free-running.
        assert_eq!(dbg.eval(2, 1), DebugEval::Continue);
    }
}
