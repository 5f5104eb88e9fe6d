//! The dispatch engine.
//!
//! A tight fetch-decode-execute loop over one current frame window. All
//! per-opcode handlers live in the submodules, grouped the way the
//! instruction table groups opcodes; every handler runs between two
//! instruction boundaries, which is also where destructors, coroutine
//! cleanups, the instruction callback and the cycle collector are scheduled.

mod alu;
mod coro;
mod data;
mod flow;
mod index;
mod wrap;

use crate::{
    builtins,
    call::{CallFrame, PendingExit},
    consts::VM_MAX_CALL_DEPTH,
    error::{SimpleResult, VmError, VmResult},
    heap::{GcBudget, GcStats, Heap},
    state::{Debugger, ExecuteState, ProgramState},
    value::{HeapId, Value},
};
use etch_asm::{Instruction, Opcode, PanicReason, RegId};
use etch_bytecode::{Constant, FunctionKind, Program};
use std::any::Any;
use std::io::Write;

/// Verdict of the per-instruction host callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Keep executing.
    Continue,
    /// Suspend and surface control to the host.
    Stop,
}

/// Per-instruction host callback: receives the PC about to execute and the
/// total executed-instruction count.
pub type InstructionHook = Box<dyn FnMut(u32, u64) -> HookAction>;

/// Host callback bound to a `host`-kind function-table entry. Receives the
/// registration's user data and the call arguments.
pub type HostCallback = Box<dyn FnMut(&mut dyn Any, &[Value]) -> Value>;

pub(crate) struct HostFunction {
    pub callback: HostCallback,
    pub user_data: Box<dyn Any>,
}

/// VM interpreter.
///
/// Owns the heap, the frame stack and the globals of one program execution.
/// The embedding surface wraps it in a [`crate::context::Context`]; tests may
/// drive it directly.
pub struct Interpreter {
    program: Program,
    heap: Heap,
    frames: Vec<CallFrame>,
    pc: u32,
    globals: Vec<(String, Value)>,
    debugger: Debugger,
    budget: GcBudget,
    hook: Option<InstructionHook>,
    host_fns: Vec<(String, HostFunction)>,
    output: Box<dyn Write>,
    instruction_count: u64,
}

impl Interpreter {
    /// Wrap a program with a default-configured VM.
    pub fn new(program: Program) -> Self {
        Self {
            program,
            heap: Heap::default(),
            frames: Vec::new(),
            pc: 0,
            globals: Vec::new(),
            debugger: Debugger::default(),
            budget: GcBudget::default(),
            hook: None,
            host_fns: Vec::new(),
            output: Box::new(std::io::stdout()),
            instruction_count: 0,
        }
    }

    /// Replace the loaded program, resetting every piece of execution state
    /// (frames, heap, globals, counters) while keeping the embedder's
    /// configuration: host functions, instruction hook, output sink, GC
    /// policy and breakpoints.
    pub fn load_program(&mut self, program: Program) {
        self.program = program;
        self.heap = Heap::default();
        self.frames.clear();
        self.globals.clear();
        self.pc = 0;
        self.instruction_count = 0;
    }

    /// Replace the GC trigger policy.
    pub fn set_gc_budget(&mut self, budget: GcBudget) {
        self.budget = budget;
    }

    /// Grant the per-frame GC time budget in microseconds.
    pub fn set_gc_frame_budget(&mut self, micros: u64) {
        self.budget.set_frame_budget(micros);
    }

    /// Begin a new host frame for GC accounting.
    pub fn begin_gc_frame(&mut self) {
        self.budget.begin_frame();
    }

    /// Collector statistics snapshot.
    pub fn gc_stats(&self) -> GcStats {
        self.budget.stats(self.heap.dirty())
    }

    /// Whether the host should schedule a dedicated GC frame.
    pub fn gc_frame_recommended(&self) -> bool {
        self.budget.gc_frame_recommended(self.heap.dirty())
    }

    /// Run a cycle collection now, regardless of budget, returning the
    /// number of slots freed.
    pub fn collect_cycles(&mut self) -> usize {
        let roots = self.gc_roots();
        self.heap.collect_cycles(&roots)
    }

    /// Install the per-instruction callback.
    pub fn set_instruction_hook(&mut self, hook: Option<InstructionHook>) {
        self.hook = hook;
    }

    /// Redirect builtin output (stdout by default).
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    /// Register a host callback with its user data. A later registration
    /// under the same name replaces the earlier one.
    pub fn register_host_fn(
        &mut self,
        name: &str,
        callback: HostCallback,
        user_data: Box<dyn Any>,
    ) {
        let function = HostFunction {
            callback,
            user_data,
        };
        match self.host_fns.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = function,
            None => self.host_fns.push((name.to_owned(), function)),
        }
    }

    /// The loaded program.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Debugger handle.
    pub fn debugger_mut(&mut self) -> &mut Debugger {
        &mut self.debugger
    }

    /// Heap handle (inspection and tests).
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Current program counter.
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Executed-instruction count.
    pub const fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    /// Current call-stack depth.
    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Canonical name of the function the VM is executing.
    pub fn current_function(&self) -> Option<&str> {
        let frame = self.frames.last()?;
        self.program
            .functions
            .get(frame.func)
            .map(|desc| desc.name.as_str())
    }

    /// Read a register of the current frame.
    pub fn register(&self, index: u8) -> Option<&Value> {
        self.frames
            .last()
            .and_then(|frame| frame.registers.get(index as usize))
    }

    /// Number of registers in the current frame window.
    pub fn register_count(&self) -> usize {
        self.frames.last().map(CallFrame::window).unwrap_or(0)
    }

    /// Shadow call stack: `(canonical name, return pc)` per live frame,
    /// outermost first.
    pub fn call_stack(&self) -> Vec<(String, u32)> {
        self.frames
            .iter()
            .map(|frame| {
                let name = self
                    .program
                    .functions
                    .get(frame.func)
                    .map(|desc| desc.name.clone())
                    .unwrap_or_default();
                (name, frame.ret_pc)
            })
            .collect()
    }

    /// Snapshot of the current frame's registers, for the debugger.
    pub fn register_snapshot(&self) -> Vec<Value> {
        self.frames
            .last()
            .map(|frame| frame.registers.clone())
            .unwrap_or_default()
    }

    /// Set a global by name, retaining the value.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.heap.retain(&value);
        match self.globals.iter_mut().find(|(n, _)| n == name) {
            Some((_, cell)) => {
                let old = std::mem::replace(cell, value);
                self.heap.release(&old);
            }
            None => self.globals.push((name.to_owned(), value)),
        }
    }

    /// Read a global by name.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    /// Whether a global exists.
    pub fn global_exists(&self, name: &str) -> bool {
        self.global(name).is_some()
    }

    /// Run the program from its entry point until it returns or suspends.
    #[tracing::instrument(name = "execute", skip_all)]
    pub fn execute(&mut self) -> VmResult<ProgramState> {
        if !self.frames.is_empty() {
            return Err(VmError::Suspended);
        }
        let entry = self.program.entry;
        let (func, _) = self
            .program
            .functions
            .containing_pc(entry)
            .ok_or(VmError::NoProgram)?;
        self.push_native_frame(func, Vec::new(), self.pc, RegId::new(0), false)
            .map_err(|reason| self.panic_at(reason, entry))?;
        self.pc = entry;
        self.run()
    }

    /// Invoke a function by canonical name with already-built argument
    /// values. The VM must be idle (not suspended mid-program).
    pub fn call_by_name(&mut self, name: &str, args: Vec<Value>) -> VmResult<Value> {
        if !self.frames.is_empty() {
            return Err(VmError::Suspended);
        }
        let func = self
            .program
            .functions
            .by_name(name)
            .or_else(|| self.resolve_by_base_name(name))
            .ok_or_else(|| VmError::UnknownFunction(name.to_owned()))?;
        let desc = self
            .program
            .functions
            .get(func)
            .ok_or_else(|| VmError::UnknownFunction(name.to_owned()))?;
        let kind = desc.kind;
        let entry = desc.entry;
        let canonical = desc.name.clone();
        let symbol = desc.symbol.clone();
        match kind {
            FunctionKind::Native => {
                self.push_native_frame(func, args, self.pc, RegId::new(0), false)
                    .map_err(|reason| self.panic_at(reason, entry))?;
                match self.run()? {
                    ProgramState::Return(value) => Ok(value),
                    ProgramState::Suspended(_) => Err(VmError::Suspended),
                }
            }
            FunctionKind::Builtin => self
                .call_builtin_by_name(&canonical, args)
                .map_err(|reason| self.panic_at(reason, self.pc)),
            FunctionKind::Host | FunctionKind::Foreign => {
                let key = symbol.unwrap_or(canonical);
                Ok(self.call_host_by_name(&key, &args))
            }
        }
    }

    fn resolve_by_base_name(&self, name: &str) -> Option<u16> {
        let prefix = format!("{name}__");
        let mut found = None;
        for (idx, desc) in self.program.functions.iter().enumerate() {
            if desc.name.starts_with(&prefix) {
                // Ambiguous overloads need the canonical name.
                if found.is_some() {
                    return None;
                }
                found = Some(idx as u16);
            }
        }
        found
    }

    /// Run until the program returns, suspends at a debug event, or panics.
    pub fn run(&mut self) -> VmResult<ProgramState> {
        loop {
            match self.step()? {
                ExecuteState::Proceed => {}
                ExecuteState::Return(value) => return Ok(ProgramState::Return(value)),
                ExecuteState::DebugEvent(eval) => {
                    return Ok(ProgramState::Suspended(eval))
                }
            }
        }
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> VmResult<ExecuteState> {
        if let Some(hook) = &mut self.hook {
            if hook(self.pc, self.instruction_count) == HookAction::Stop {
                return Ok(crate::state::DebugEval::HostStop.into());
            }
        }
        if self.debugger.is_active() {
            let eval = self.debugger.eval(self.pc, self.frames.len());
            if !eval.should_continue() {
                return Ok(eval.into());
            }
        }

        // Instruction boundary work: queued destructors, coroutine cleanups,
        // then the collector.
        if self.drain_pending().map_err(|r| self.panic_at(r, self.pc))? {
            return Ok(ExecuteState::Proceed);
        }
        if self.budget.should_collect(self.heap.dirty()) {
            let roots = self.gc_roots();
            self.heap.maybe_collect(&roots, &mut self.budget);
        }

        let pc = self.pc;
        let insn = self
            .program
            .fetch(pc)
            .ok_or_else(|| self.panic_at(PanicReason::InvalidJump, pc))?;
        self.pc += 1;
        self.instruction_count += 1;
        tracing::trace!(pc, %insn, "dispatch");
        self.dispatch(insn)
            .map_err(|reason| self.panic_at(reason, pc))
    }

    fn panic_at(&self, reason: PanicReason, pc: u32) -> VmError {
        VmError::Panic {
            reason,
            pc,
            pos: self.program.debug.lookup(pc),
        }
    }

    fn dispatch(&mut self, insn: Instruction) -> SimpleResult<ExecuteState> {
        use Opcode::*;

        let opcode = insn
            .opcode()
            .map_err(|_| PanicReason::InvalidInstruction)?;
        match opcode {
            MOVE | LOADK | LOADI | LOADNIL | LOADBOOL | LOADNONE | GETGLOB
            | SETGLOB | REFNEW | REFGET | REFSET | WEAKNEW => {
                self.op_data(opcode, insn)?
            }

            ADD | SUB | MUL | DIV | MOD | POW | NEG | NOT | IADD | ISUB | IMUL
            | IDIV | IMOD | FADD | FSUB | FMUL | FDIV | FMOD | ADDIMM | SUBIMM
            | MULIMM | DIVIMM | MODIMM | ANDIMM | ORIMM | EQ | LT | LE | EQS
            | NES | LTS | LES | CMPJMP | AND | OR | INCLT => {
                self.op_alu(opcode, insn)?
            }
            ADDADD | MULADD | SUBSUB | SUBMUL | MULSUB | DIVADD | ADDSUB
            | ADDMUL | SUBDIV | IADDADD | IMULADD | ISUBSUB | ISUBMUL
            | IMULSUB | IDIVADD | IADDSUB | IADDMUL | ISUBDIV | FADDADD
            | FMULADD | FSUBSUB | FSUBMUL | FMULSUB | FDIVADD | FADDSUB
            | FADDMUL | FSUBDIV => self.op_fused_triadic(opcode, insn)?,

            IN | NOTIN | GETIDX | SETIDX | GETIDXI | SETIDXI | GETFLD | SETFLD
            | SLICE | LEN | NEWARR | NEWTAB | FLDADDI | GETADDSET | GETSUBSET
            | GETMULSET | GETDIVSET | GETMODSET => self.op_index(opcode, insn)?,

            WRAPSOME | WRAPOK | WRAPERR | TESTTAG | UNWRAPOPT | UNWRAPRES
            | CAST => self.op_wrap(opcode, insn)?,

            JMP | TEST | TESTSET | FORPREP | FORLOOP | FORIPREP | FORILOOP => {
                self.op_flow(opcode, insn)?
            }
            RET => return self.op_ret(insn),
            DEFER => self.op_defer(insn)?,
            DEFEREND => return self.op_deferend(),
            TRAP => return Err(PanicReason::from(insn.a().to_u8())),

            CALL | CALLB | CALLH | CALLF | CALLC | CLOSURE => {
                self.op_call(opcode, insn)?
            }

            SPAWN | RESUME | YIELD | CHANNEW | CHANSEND | CHANRECV => {
                self.op_coro(opcode, insn)?
            }
        }
        Ok(ExecuteState::Proceed)
    }

    // ---- frame and register plumbing ----------------------------------

    pub(crate) fn frame(&self) -> &CallFrame {
        self.frames.last().expect("an active call frame")
    }

    pub(crate) fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("an active call frame")
    }

    pub(crate) fn reg(&self, id: RegId) -> &Value {
        self.frame().reg(id)
    }

    pub(crate) fn reg_cloned(&self, id: RegId) -> Value {
        self.frame().reg(id).clone()
    }

    /// Store a copy: retains the value, releases the overwritten one.
    pub(crate) fn write_reg(&mut self, id: RegId, value: Value) {
        self.heap.retain(&value);
        self.write_reg_owned(id, value);
    }

    /// Store an owned (already-retained) value: releases only the
    /// overwritten one.
    pub(crate) fn write_reg_owned(&mut self, id: RegId, value: Value) {
        let frame = self.frames.last_mut().expect("an active call frame");
        let old = std::mem::replace(&mut frame.registers[id.to_u8() as usize], value);
        self.heap.release(&old);
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub(crate) fn skip_next(&mut self) {
        self.pc += 1;
    }

    pub(crate) fn branch(&mut self, offset: i32) -> SimpleResult<()> {
        let target = i64::from(self.pc) + i64::from(offset);
        if target < 0 || target as usize > self.program.instructions.len() {
            return Err(PanicReason::InvalidJump);
        }
        self.pc = target as u32;
        Ok(())
    }

    pub(crate) fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// Materialize a constant-pool entry as a value.
    pub(crate) fn const_value(&self, idx: u16) -> SimpleResult<Value> {
        let constant = self
            .program
            .constants
            .get(idx)
            .ok_or(PanicReason::InvalidInstruction)?;
        let value = match constant {
            Constant::Nil => Value::Nil,
            Constant::None => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::Char(c) => Value::Char(*c),
            Constant::Str(s) => Value::str(s),
            Constant::TypeDesc(name) => Value::typedesc(name),
            Constant::Enum {
                type_id,
                value,
                display,
            } => Value::Enum {
                type_id: *type_id,
                value: *value,
                display: display.as_deref().map(std::rc::Rc::from),
            },
        };
        Ok(value)
    }

    /// A constant-pool entry that must be a short string (global and field
    /// names).
    pub(crate) fn const_str(&self, idx: u16) -> SimpleResult<String> {
        match self.program.constants.get(idx) {
            Some(Constant::Str(s)) => Ok(s.clone()),
            _ => Err(PanicReason::InvalidInstruction),
        }
    }

    /// Push a frame for a native function, seeding its argument registers
    /// with already-cloned (not yet retained) values.
    pub(crate) fn push_native_frame(
        &mut self,
        func: u16,
        args: Vec<Value>,
        ret_pc: u32,
        dst: RegId,
        wants_result: bool,
    ) -> SimpleResult<()> {
        if self.frames.len() >= VM_MAX_CALL_DEPTH {
            return Err(PanicReason::CallDepthExceeded);
        }
        let desc = self
            .program
            .functions
            .get(func)
            .ok_or(PanicReason::MissingFunction)?;
        if desc.kind != FunctionKind::Native {
            return Err(PanicReason::MissingFunction);
        }
        if desc.max_registers > crate::consts::VM_MAX_REGISTERS
            || args.len() > desc.max_registers as usize
        {
            return Err(PanicReason::RegisterFileExhausted);
        }
        let mut frame = CallFrame::new(func, desc.max_registers, ret_pc, dst);
        frame.wants_result = wants_result;
        let entry = desc.entry;
        for (i, arg) in args.into_iter().enumerate() {
            self.heap.retain(&arg);
            frame.registers[i] = arg;
        }
        self.frames.push(frame);
        self.pc = entry;
        tracing::trace!(func, depth = self.frames.len(), "frame push");
        Ok(())
    }

    /// Begin exiting the current frame: drain defers LIFO first, then
    /// complete.
    pub(crate) fn begin_frame_exit(
        &mut self,
        exit: PendingExit,
    ) -> SimpleResult<ExecuteState> {
        let frame = self.frame_mut();
        if let Some(defer) = frame.defers.pop() {
            frame.exiting = Some(exit);
            self.pc = defer.body_pc;
            return Ok(ExecuteState::Proceed);
        }
        self.complete_frame_exit(exit)
    }

    fn op_deferend(&mut self) -> SimpleResult<ExecuteState> {
        let frame = self.frame_mut();
        let exit = frame
            .exiting
            .take()
            .ok_or(PanicReason::InvalidInstruction)?;
        if let Some(defer) = frame.defers.pop() {
            frame.exiting = Some(exit);
            self.pc = defer.body_pc;
            return Ok(ExecuteState::Proceed);
        }
        self.complete_frame_exit(exit)
    }

    fn complete_frame_exit(&mut self, exit: PendingExit) -> SimpleResult<ExecuteState> {
        let frame = self.frames.pop().expect("an active call frame");
        if frame.dtor_of.is_some() {
            // The destructor argument release below frees the slot.
            self.heap.dtor_stack_pop();
        }

        match exit {
            PendingExit::Return(value) => {
                self.heap.retain(&value);
                for value in &frame.registers {
                    self.heap.release(value);
                }
                if let Some(coroutine) = frame.coroutine {
                    return self.finish_coroutine(coroutine, frame, value);
                }
                if self.frames.is_empty() {
                    return Ok(ExecuteState::Return(value));
                }
                self.pc = frame.ret_pc;
                if frame.wants_result {
                    self.write_reg_owned(frame.dst, value);
                } else {
                    self.heap.release(&value);
                }
                Ok(ExecuteState::Proceed)
            }
            PendingExit::Cleanup => {
                for value in &frame.registers {
                    self.heap.release(value);
                }
                if let Some(coroutine) = frame.coroutine {
                    self.kill_coroutine(coroutine)?;
                }
                self.pc = frame.ret_pc;
                Ok(ExecuteState::Proceed)
            }
        }
    }

    /// Handle queued destructors and coroutine cleanups. Returns `true` when
    /// a frame was pushed (the caller restarts the step so the new frame
    /// executes first).
    fn drain_pending(&mut self) -> SimpleResult<bool> {
        let cleanups = self.heap.take_pending_cleanups();
        for id in cleanups {
            if self.begin_coroutine_cleanup(id)? {
                return Ok(true);
            }
        }
        if let Some((dtor, slot)) = self.heap.take_pending_dtor() {
            self.heap.dtor_stack_push(slot)?;
            let ret_pc = self.pc;
            self.push_native_frame(
                dtor,
                vec![Value::Ref(slot)],
                ret_pc,
                RegId::new(0),
                false,
            )?;
            self.frame_mut().dtor_of = Some(slot);
            return Ok(true);
        }
        Ok(false)
    }

    /// Roots for the cycle collector: every live register in every frame,
    /// every global, and the coroutines owning live frames.
    fn gc_roots(&self) -> Vec<Value> {
        let mut roots: Vec<Value> = Vec::new();
        for frame in &self.frames {
            roots.extend(frame.registers.iter().cloned());
            if let Some(id) = frame.coroutine {
                roots.push(Value::Coroutine(id));
            }
        }
        roots.extend(self.globals.iter().map(|(_, value)| value.clone()));
        roots
    }

    /// Render a value for the output builtins, following heap handles.
    pub(crate) fn display_value(&self, value: &Value) -> String {
        use crate::heap::SlotKind;
        use itertools::Itertools;

        match value {
            Value::Ref(id) => match self.heap.slot(*id).map(|slot| slot.kind()) {
                Some(SlotKind::Scalar(inner)) => self.display_value(inner),
                Some(SlotKind::Array(items)) => {
                    let rendered = items
                        .iter()
                        .map(|item| self.display_value(item))
                        .join(", ");
                    format!("[{rendered}]")
                }
                Some(SlotKind::Table(entries)) => {
                    let rendered = entries
                        .iter()
                        .map(|(key, item)| {
                            format!("{key}: {}", self.display_value(item))
                        })
                        .join(", ");
                    format!("{{{rendered}}}")
                }
                Some(SlotKind::Channel(channel)) => {
                    format!("channel(cap {})", channel.capacity())
                }
                _ => value.to_string(),
            },
            Value::Weak(id) => {
                if self.heap.weak_is_valid(*id) {
                    format!("weak({id})")
                } else {
                    "nil".to_owned()
                }
            }
            Value::Some(inner) => format!("some({})", self.display_value(inner)),
            Value::Ok(inner) => format!("ok({})", self.display_value(inner)),
            Value::Err(inner) => format!("error({})", self.display_value(inner)),
            other => other.to_string(),
        }
    }

    pub(crate) fn write_output(&mut self, text: &str) -> SimpleResult<()> {
        self.output
            .write_all(text.as_bytes())
            .map_err(|_| PanicReason::HostCallbackFailed)
    }

    pub(crate) fn call_builtin_by_name(
        &mut self,
        name: &str,
        args: Vec<Value>,
    ) -> SimpleResult<Value> {
        builtins::dispatch(self, name, args)
    }

    pub(crate) fn call_host_by_name(&mut self, name: &str, args: &[Value]) -> Value {
        let Some(position) = self.host_fns.iter().position(|(n, _)| n == name) else {
            tracing::error!(name, "host call against an unregistered function");
            return Value::Nil;
        };
        let (_, mut function) = self.host_fns.swap_remove(position);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (function.callback)(function.user_data.as_mut(), args)
        }));
        self.host_fns.push((name.to_owned(), function));
        match outcome {
            Ok(value) => value,
            Err(_) => {
                // A host-layer exception surfaces as nil, never propagates.
                tracing::error!(name, "host callback panicked; result forced to nil");
                Value::Nil
            }
        }
    }

    pub(crate) fn active_coroutine(&self) -> Option<HeapId> {
        self.frames.iter().rev().find_map(|frame| frame.coroutine)
    }

    pub(crate) fn has_host_fn(&self, name: &str) -> bool {
        self.host_fns.iter().any(|(n, _)| n == name)
    }

    /// Push a prebuilt frame (coroutine resumes and cleanups).
    pub(crate) fn push_frame(&mut self, frame: CallFrame) -> SimpleResult<()> {
        if self.frames.len() >= VM_MAX_CALL_DEPTH {
            return Err(PanicReason::CallDepthExceeded);
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the current frame without releasing its registers (suspension
    /// paths move ownership into the coroutine object).
    pub(crate) fn pop_frame(&mut self) -> CallFrame {
        self.frames.pop().expect("an active call frame")
    }
}
