//! Typed-AST to bytecode compiler.
//!
//! The front-end collaborators hand over a resolved, monomorphized
//! [`ast::Module`]; this crate allocates registers, lowers statements and
//! expressions, runs the fusion peepholes and emits an
//! [`etch_bytecode::Program`].

#![warn(missing_docs)]

pub mod ast;
mod lower;
mod mangle;
mod peephole;
mod regalloc;

pub use mangle::{mangle, mangle_types};
pub use regalloc::MAX_FUNCTION_REGISTERS;

use ast::{Block, Expr, Function, LValue, Module, Pos, Stmt, Type};
use etch_bytecode::{
    FunctionDesc, FunctionKind, Program, SourcePos, TypeSig,
};
use lower::FnResolver;

/// Category of a compile-time diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A name does not resolve to a variable, function or type.
    NameResolution,
    /// An operation was applied to an operand type it is not defined for.
    TypeMismatch,
    /// A match construct the lowering cannot prove exhaustive enough to
    /// bind.
    Exhaustiveness,
    /// The function needs more registers than a frame window holds.
    RegisterOverflow,
    /// A jump, constant index or table index exceeds its encoding field.
    TooLarge,
    /// `break`/`continue`/`yield` outside their governing construct.
    InvalidControlFlow,
    /// The compiler emitted a program that fails its own static checks.
    Internal,
}

/// A structured compile diagnostic: category plus source position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} error at {}:{}: {message}", .pos.line, .pos.column)]
pub struct CompileError {
    /// Diagnostic category.
    pub kind: ErrorKind,
    /// Source position the diagnostic anchors to.
    pub pos: Pos,
    /// Human-readable description.
    pub message: String,
}

impl CompileError {
    /// Construct a diagnostic.
    pub fn new(kind: ErrorKind, pos: Pos, message: impl Into<String>) -> Self {
        Self {
            kind,
            pos,
            message: message.into(),
        }
    }
}

/// Compilation switches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Release mode: dead-store elimination runs and the source-position map
    /// is stripped. The fusion peepholes run either way.
    pub release: bool,
}

/// Compile a module with default options.
pub fn compile(module: &Module) -> Result<Program, CompileError> {
    compile_with(module, &CompileOptions::default())
}

/// Compile a module into a program.
#[tracing::instrument(name = "compile", skip_all, fields(file = %module.file))]
pub fn compile_with(
    module: &Module,
    options: &CompileOptions,
) -> Result<Program, CompileError> {
    let mut program = Program::new();
    for decl in &module.types {
        program.types.push(decl.clone());
    }
    let file = program.debug.intern_file(&module.file);

    let entry_fn = synthesize_entry(module);
    let mut natives: Vec<&Function> = module.functions.iter().collect();
    natives.push(&entry_fn);

    let resolver = FnResolver::build(module, &natives, &mut program)?;

    for &function in &natives {
        let canonical = mangle_types(
            &function.name,
            &function
                .params
                .iter()
                .map(|param| param.ty.clone())
                .collect::<Vec<_>>(),
            &function.ret,
        );
        let index = resolver
            .canonical(&canonical)
            .ok_or_else(|| {
                CompileError::new(
                    ErrorKind::Internal,
                    function.pos,
                    format!("function {canonical} vanished from the table"),
                )
            })?;

        let mut lowered = lower::lower_function(function, &resolver, &mut program, file)?;
        peephole::optimize(&mut lowered, options.release);
        tracing::debug!(
            function = %canonical,
            instructions = lowered.code.len(),
            registers = lowered.max_registers,
            "function lowered"
        );

        let base = program.instructions.len() as u32;
        program.instructions.extend(lowered.code);
        let end = program.instructions.len() as u32;

        let desc = program
            .functions
            .get_mut(index)
            .expect("descriptor exists for every lowered function");
        desc.entry = base;
        desc.end = end;
        desc.max_registers = lowered.max_registers.max(1);
        desc.propagates = lowered.propagates;

        for record in &mut lowered.lifetimes {
            record.start_pc += base;
            record.end_pc += base;
            record.def_pc += base;
        }
        program.lifetimes.set(index, lowered.lifetimes);

        if !options.release {
            for (pc, pos) in lowered.debug {
                program.debug.record(
                    pc + base,
                    SourcePos {
                        file,
                        line: pos.line,
                        column: pos.column,
                    },
                );
            }
        }
    }

    let entry_canonical = mangle_types(&entry_fn.name, &[], &entry_fn.ret);
    let entry_index = resolver
        .canonical(&entry_canonical)
        .expect("entry function is always registered");
    program.entry = program
        .functions
        .get(entry_index)
        .expect("entry descriptor exists")
        .entry;

    program.check().map_err(|violation| {
        CompileError::new(
            ErrorKind::Internal,
            Pos::default(),
            format!("emitted program fails static checks: {violation}"),
        )
    })?;
    Ok(program)
}

/// The `<global>` entry function: run global initializers in declaration
/// order, then call `main` (when defined) and return its result.
fn synthesize_entry(module: &Module) -> Function {
    let mut stmts: Vec<Stmt> = Vec::new();
    for global in &module.globals {
        if let Some(init) = &global.init {
            stmts.push(Stmt::Assign {
                target: LValue::Name(global.name.clone()),
                value: init.clone(),
                pos: global.pos,
            });
        }
    }

    let main = module
        .functions
        .iter()
        .find(|function| function.name == "main" && function.params.is_empty());
    let ret = match main {
        Some(main) => {
            let call = Expr::Call {
                name: main.name.clone(),
                sig: Vec::new(),
                ret: main.ret.clone(),
                args: Vec::new(),
            };
            match main.ret {
                Type::Unit => {
                    stmts.push(Stmt::Expr {
                        expr: call,
                        pos: main.pos,
                    });
                    stmts.push(Stmt::Return {
                        value: None,
                        pos: main.pos,
                    });
                    Type::Unit
                }
                _ => {
                    stmts.push(Stmt::Return {
                        value: Some(call),
                        pos: main.pos,
                    });
                    main.ret.clone()
                }
            }
        }
        None => Type::Unit,
    };

    Function {
        name: "<global>".into(),
        params: Vec::new(),
        ret,
        body: Block::new(stmts),
        pos: Pos::default(),
    }
}

pub(crate) fn builtin_descs() -> Vec<FunctionDesc> {
    ["print", "println", "len", "to_string", "read_file"]
        .into_iter()
        .map(|name| FunctionDesc {
            name: name.to_owned(),
            kind: FunctionKind::Builtin,
            params: Vec::new(),
            ret: TypeSig::Unit,
            entry: 0,
            end: 0,
            max_registers: 0,
            propagates: None,
            library: None,
            symbol: None,
        })
        .collect()
}
