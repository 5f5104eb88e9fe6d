//! The embedding surface: one context owns one program and one VM.

use crate::{
    error::{VmError, VmResult},
    heap::{GcBudget, GcStats},
    interpreter::{HostCallback, InstructionHook, Interpreter},
    state::{Breakpoint, ProgramState, StepMode},
    value::Value,
};
use etch_bytecode::{LoadError, Program};
use etch_compiler::{ast, CompileError};
use std::any::Any;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Construction-time configuration of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Log compile and execution milestones.
    pub verbose: bool,
    /// Keep debug information and enable the debugger shadow.
    pub debug: bool,
    /// Dirty-object count that triggers a GC cycle; 0 selects the default.
    pub gc_cycle_interval: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            debug: true,
            gc_cycle_interval: 0,
        }
    }
}

/// A host-driver context: compiles modules, runs the VM, binds globals and
/// host callbacks, and exposes the inspection surface the debugger needs.
///
/// Dropping the context releases every owned resource.
pub struct Context {
    options: ContextOptions,
    vm: Interpreter,
    loaded: bool,
}

impl Context {
    /// Create a context with the given options.
    pub fn new(options: ContextOptions) -> Self {
        let mut vm = Interpreter::new(Program::default());
        vm.set_gc_budget(GcBudget::with_interval(options.gc_cycle_interval));
        Self {
            options,
            vm,
            loaded: false,
        }
    }

    /// The options the context was created with.
    pub const fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Compile a typed module into this context's program slot. On failure
    /// the diagnostic carries the error category and source position.
    #[tracing::instrument(name = "context_compile", skip_all)]
    pub fn compile(&mut self, module: &ast::Module) -> Result<(), CompileError> {
        let mut options = etch_compiler::CompileOptions::default();
        options.release = !self.options.debug;
        let program = etch_compiler::compile_with(module, &options)?;
        if self.options.verbose {
            tracing::debug!(
                instructions = program.instructions.len(),
                constants = program.constants.len(),
                functions = program.functions.len(),
                "module compiled"
            );
        }
        self.vm.load_program(program);
        self.loaded = true;
        Ok(())
    }

    /// Load an already-compiled program.
    pub fn load_program(&mut self, program: Program) -> Result<(), LoadError> {
        program.check()?;
        self.vm.load_program(program);
        self.loaded = true;
        Ok(())
    }

    /// Load a serialized program, rejecting version mismatches.
    pub fn load_bytes(&mut self, bytes: &[u8]) -> Result<(), LoadError> {
        let program = Program::from_bytes(bytes)?;
        self.vm.load_program(program);
        self.loaded = true;
        Ok(())
    }

    /// Serialize the loaded program (compile-only driver path).
    pub fn program_bytes(&self) -> VmResult<Vec<u8>> {
        if !self.loaded {
            return Err(VmError::NoProgram);
        }
        Ok(self.vm.program().to_bytes())
    }

    /// Text rendering of the loaded program.
    pub fn dump(&self) -> VmResult<String> {
        if !self.loaded {
            return Err(VmError::NoProgram);
        }
        Ok(self.vm.program().dump())
    }

    /// Run the program from its entry point; the result is the driver exit
    /// code.
    pub fn execute(&mut self) -> VmResult<i64> {
        if !self.loaded {
            return Err(VmError::NoProgram);
        }
        self.vm.begin_gc_frame();
        let state = self.vm.execute()?;
        if self.options.verbose {
            tracing::debug!(
                instructions = self.vm.instruction_count(),
                "execution finished"
            );
        }
        Ok(state.exit_code())
    }

    /// Continue a VM suspended at a breakpoint, step or host stop.
    pub fn resume(&mut self) -> VmResult<ProgramState> {
        self.vm.run()
    }

    /// Invoke a function by (canonical or unambiguous base) name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> VmResult<Value> {
        if !self.loaded {
            return Err(VmError::NoProgram);
        }
        self.vm.call_by_name(name, args)
    }

    /// Set a global variable.
    pub fn set_global(&mut self, name: &str, value: Value) {
        self.vm.set_global(name, value);
    }

    /// Read a global variable.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.vm.global(name).cloned()
    }

    /// Whether a global exists.
    pub fn global_exists(&self, name: &str) -> bool {
        self.vm.global_exists(name)
    }

    /// Bind a host callback under a name; bytecode calls against a
    /// `host`-kind function-table entry of that name invoke it. The user
    /// data rides with the registration and is handed back on every call.
    pub fn register_host_fn(
        &mut self,
        name: &str,
        callback: HostCallback,
        user_data: Box<dyn Any>,
    ) {
        self.vm.register_host_fn(name, callback, user_data);
    }

    /// Install or clear the per-instruction callback.
    pub fn set_instruction_hook(&mut self, hook: Option<InstructionHook>) {
        self.vm.set_instruction_hook(hook);
    }

    /// Set a breakpoint at an instruction index.
    pub fn set_breakpoint(&mut self, pc: u32) {
        self.vm.debugger_mut().set_breakpoint(Breakpoint::new(pc));
    }

    /// Remove a breakpoint.
    pub fn remove_breakpoint(&mut self, pc: u32) {
        self.vm.debugger_mut().remove_breakpoint(&Breakpoint::new(pc));
    }

    /// Request a stepping discipline for the next resume.
    pub fn set_step_mode(&mut self, mode: StepMode) {
        self.vm.debugger_mut().set_step_mode(mode);
    }

    /// Current program counter.
    pub fn pc(&self) -> u32 {
        self.vm.pc()
    }

    /// Canonical name of the executing function.
    pub fn current_function(&self) -> Option<String> {
        self.vm.current_function().map(str::to_owned)
    }

    /// Current call-stack depth.
    pub fn call_depth(&self) -> usize {
        self.vm.call_depth()
    }

    /// Read a register of the current frame.
    pub fn register(&self, index: u8) -> Option<Value> {
        self.vm.register(index).cloned()
    }

    /// Register count of the current frame window.
    pub fn register_count(&self) -> usize {
        self.vm.register_count()
    }

    /// Executed-instruction count.
    pub fn instruction_count(&self) -> u64 {
        self.vm.instruction_count()
    }

    /// Shadow call stack, outermost frame first.
    pub fn call_stack(&self) -> Vec<(String, u32)> {
        self.vm.call_stack()
    }

    /// Snapshot of the current frame's registers.
    pub fn register_snapshot(&self) -> Vec<Value> {
        self.vm.register_snapshot()
    }

    /// Declare the per-frame GC time budget, in microseconds.
    pub fn set_gc_frame_budget(&mut self, micros: u64) {
        self.vm.set_gc_frame_budget(micros);
    }

    /// Begin a new host frame for GC accounting.
    pub fn begin_gc_frame(&mut self) {
        self.vm.begin_gc_frame();
    }

    /// Collector statistics.
    pub fn gc_stats(&self) -> GcStats {
        self.vm.gc_stats()
    }

    /// Whether a dedicated GC frame is recommended.
    pub fn gc_frame_recommended(&self) -> bool {
        self.vm.gc_frame_recommended()
    }

    /// Request an immediate cycle collection; the result is the number of
    /// slots freed.
    pub fn collect_cycles(&mut self) -> usize {
        self.vm.collect_cycles()
    }

    /// Lifetime count of freed heap slots.
    pub fn freed_slots(&self) -> u64 {
        self.vm.heap().freed_total()
    }

    /// Redirect builtin output; see [`CaptureBuffer`] for tests and tooling.
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.vm.set_output(output);
    }

    /// Direct VM access for advanced embedders.
    pub fn vm(&self) -> &Interpreter {
        &self.vm
    }

    /// Mutable VM access for advanced embedders.
    pub fn vm_mut(&mut self) -> &mut Interpreter {
        &mut self.vm
    }
}

/// A shareable output sink: clone one handle into the context, keep the
/// other to read what the program printed.
#[derive(Debug, Default, Clone)]
pub struct CaptureBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl CaptureBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
