//! Function lowering: the emit machinery shared by the statement,
//! expression and pattern passes.

mod expr;
mod pattern;
mod stmt;

use crate::{
    ast::{Function, Module, Pos, Type},
    builtin_descs, mangle, mangle_types,
    regalloc::{LifetimeTracker, RegAlloc},
    CompileError, ErrorKind,
};
use etch_asm::{op, Imm16, Instruction, RegId, Simm16};
use etch_bytecode::{
    Constant, ConstantPool, FunctionDesc, FunctionKind, LifetimeRecord, Program,
    PropagationKind, TypeDecl, TypeSig,
};
use std::collections::HashMap;

/// Resolution tables from callee names to function-table positions.
pub(crate) struct FnResolver {
    by_canonical: HashMap<String, u16>,
    by_plain: HashMap<String, u16>,
    kinds: Vec<FunctionKind>,
    destructors: HashMap<String, u16>,
}

impl FnResolver {
    /// Register every callable of the module — builtins, host and foreign
    /// declarations, native definitions — into the program's function table
    /// and build the lookup maps.
    pub(crate) fn build(
        module: &Module,
        natives: &[&Function],
        program: &mut Program,
    ) -> Result<Self, CompileError> {
        let mut resolver = Self {
            by_canonical: HashMap::new(),
            by_plain: HashMap::new(),
            kinds: Vec::new(),
            destructors: HashMap::new(),
        };

        for desc in builtin_descs() {
            resolver.push(program, desc);
        }
        for decl in &module.host_decls {
            resolver.push(
                program,
                FunctionDesc {
                    name: decl.name.clone(),
                    kind: FunctionKind::Host,
                    params: decl.params.iter().map(Type::sig).collect(),
                    ret: decl.ret.sig(),
                    entry: 0,
                    end: 0,
                    max_registers: 0,
                    propagates: None,
                    library: None,
                    symbol: None,
                },
            );
        }
        for decl in &module.foreign_decls {
            resolver.push(
                program,
                FunctionDesc {
                    name: decl.name.clone(),
                    kind: FunctionKind::Foreign,
                    params: decl.params.iter().map(Type::sig).collect(),
                    ret: decl.ret.sig(),
                    entry: 0,
                    end: 0,
                    max_registers: 0,
                    propagates: None,
                    library: decl.library.clone(),
                    symbol: decl
                        .symbol
                        .clone()
                        .or_else(|| Some(decl.name.clone())),
                },
            );
        }
        for function in natives {
            let params: Vec<TypeSig> =
                function.params.iter().map(|p| p.ty.sig()).collect();
            let canonical = mangle(&function.name, &params, &function.ret.sig());
            if resolver.by_canonical.contains_key(&canonical) {
                return Err(CompileError::new(
                    ErrorKind::NameResolution,
                    function.pos,
                    format!("duplicate definition of {canonical}"),
                ));
            }
            resolver.push(
                program,
                FunctionDesc {
                    name: canonical,
                    kind: FunctionKind::Native,
                    params,
                    ret: function.ret.sig(),
                    entry: 0,
                    end: 0,
                    max_registers: 0,
                    propagates: None,
                    library: None,
                    symbol: None,
                },
            );
        }

        // Destructor positions for object construction sites.
        for decl in &module.types {
            if let TypeDecl::Object {
                name,
                destructor: Some(dtor),
                ..
            } = decl
            {
                let index = resolver.resolve_any(dtor).ok_or_else(|| {
                    CompileError::new(
                        ErrorKind::NameResolution,
                        Pos::default(),
                        format!("destructor {dtor} of {name} is not defined"),
                    )
                })?;
                resolver.destructors.insert(name.clone(), index.0);
            }
        }
        Ok(resolver)
    }

    fn push(&mut self, program: &mut Program, desc: FunctionDesc) {
        let plain = desc.name.split("__").next().unwrap_or(&desc.name).to_owned();
        let kind = desc.kind;
        let name = desc.name.clone();
        let index = program.functions.push(desc);
        self.by_canonical.insert(name, index);
        self.by_plain.entry(plain).or_insert(index);
        self.kinds.push(kind);
    }

    /// Position of an exactly-named (canonical) function.
    pub(crate) fn canonical(&self, name: &str) -> Option<u16> {
        self.by_canonical.get(name).copied()
    }

    /// Resolve a call site: the mangled signature first, then the plain name
    /// (builtins, host and foreign bindings).
    pub(crate) fn resolve_call(
        &self,
        name: &str,
        sig: &[Type],
        ret: &Type,
    ) -> Option<(u16, FunctionKind)> {
        let canonical = mangle_types(name, sig, ret);
        self.resolve_any(&canonical)
            .or_else(|| self.resolve_any(name))
    }

    fn resolve_any(&self, name: &str) -> Option<(u16, FunctionKind)> {
        self.by_canonical
            .get(name)
            .or_else(|| self.by_plain.get(name))
            .map(|&index| (index, self.kinds[index as usize]))
    }

    /// Destructor position for an object type, when declared.
    pub(crate) fn destructor_of(&self, type_name: &str) -> Option<u16> {
        self.destructors.get(type_name).copied()
    }
}

/// A loop's patch lists.
#[derive(Debug, Default)]
struct LoopCtx {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

/// Output of lowering one function.
pub(crate) struct LoweredFunction {
    pub code: Vec<Instruction>,
    pub lifetimes: Vec<LifetimeRecord>,
    pub debug: Vec<(u32, Pos)>,
    pub max_registers: u8,
    pub propagates: Option<PropagationKind>,
}

/// Single-function lowering state.
pub(crate) struct Lowerer<'a> {
    code: Vec<Instruction>,
    consts: &'a mut ConstantPool,
    resolver: &'a FnResolver,
    regs: RegAlloc,
    lifetimes: LifetimeTracker,
    scopes: Vec<Vec<(String, u8)>>,
    var_regs: Vec<u8>,
    loops: Vec<LoopCtx>,
    debug: Vec<(u32, Pos)>,
    ret_ty: Type,
    propagates: Option<PropagationKind>,
}

pub(crate) fn lower_function(
    function: &Function,
    resolver: &FnResolver,
    program: &mut Program,
    _file: u16,
) -> Result<LoweredFunction, CompileError> {
    let mut lowerer = Lowerer {
        code: Vec::new(),
        consts: &mut program.constants,
        resolver,
        regs: RegAlloc::new(),
        lifetimes: LifetimeTracker::new(),
        scopes: vec![Vec::new()],
        var_regs: Vec::new(),
        loops: Vec::new(),
        debug: Vec::new(),
        ret_ty: function.ret.clone(),
        propagates: None,
    };

    // Parameters occupy the leading registers, in declaration order.
    for param in &function.params {
        let reg = lowerer.regs.alloc(function.pos)?;
        lowerer.bind_var(&param.name, reg, 0);
    }

    lowerer.lower_block(&function.body)?;
    // A function body that falls off its end returns no value.
    lowerer.emit(op::ret(RegId::new(0), RegId::new(0), RegId::new(0)), function.pos);

    let end_pc = lowerer.code.len() as u32;
    let lifetimes = lowerer.lifetimes.finish(end_pc);
    Ok(LoweredFunction {
        code: lowerer.code,
        lifetimes,
        debug: lowerer.debug,
        max_registers: lowerer.regs.high_water(),
        propagates: lowerer.propagates,
    })
}

impl<'a> Lowerer<'a> {
    // ---- emission ------------------------------------------------------

    fn pc(&self) -> u32 {
        self.code.len() as u32
    }

    fn emit(&mut self, insn: Instruction, pos: Pos) -> u32 {
        let pc = self.pc();
        self.code.push(insn);
        if pos != Pos::default() {
            self.debug.push((pc, pos));
        }
        pc
    }

    /// Emit a forward jump to be patched once the target is known.
    fn emit_jump_placeholder(&mut self, pos: Pos) -> usize {
        self.emit(op::jmp(RegId::new(0), Simm16::new(0)), pos) as usize
    }

    /// Point a placeholder jump at the current position.
    fn patch_jump_to_here(&mut self, at: usize) -> Result<(), CompileError> {
        self.patch_jump(at, self.pc())
    }

    fn patch_jump(&mut self, at: usize, target: u32) -> Result<(), CompileError> {
        let offset = i64::from(target) - (at as i64 + 1);
        let offset = i16::try_from(offset).map_err(|_| {
            CompileError::new(
                ErrorKind::TooLarge,
                Pos::default(),
                "jump distance exceeds the signed 16-bit offset field",
            )
        })?;
        let old = self.code[at];
        let opcode = old.opcode().expect("patched cells are compiler-emitted");
        self.code[at] = Instruction::asbx(opcode, old.a(), Simm16::new(offset));
        Ok(())
    }

    /// Emit a backward jump to an already-known target.
    fn emit_jump_back(&mut self, target: u32, pos: Pos) -> Result<(), CompileError> {
        let at = self.emit(op::jmp(RegId::new(0), Simm16::new(0)), pos) as usize;
        self.patch_jump(at, target)
    }

    fn intern(&mut self, constant: Constant) -> u16 {
        self.consts.intern(constant)
    }

    /// Pool a short-string key and require it to fit the 8-bit field of the
    /// field opcodes; callers fall back to register-keyed indexing when it
    /// does not.
    fn field_key(&mut self, key: &str) -> Option<u8> {
        let index = self.consts.intern(Constant::Str(key.to_owned()));
        u8::try_from(index).ok()
    }

    // ---- registers and scopes -----------------------------------------

    fn alloc_temp(&mut self, pos: Pos) -> Result<u8, CompileError> {
        self.regs.alloc(pos)
    }

    /// Free a register unless it is pinned to a named variable.
    fn free_temp(&mut self, reg: u8) {
        if !self.var_regs.contains(&reg) {
            self.regs.free(reg);
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        let scope = self.scopes.pop().expect("scope stack is never empty");
        let pc = self.pc();
        for (_, reg) in scope.into_iter().rev() {
            self.lifetimes.close(reg, pc);
            if let Some(position) = self.var_regs.iter().rposition(|&r| r == reg) {
                self.var_regs.swap_remove(position);
            }
            self.regs.free(reg);
        }
    }

    fn bind_var(&mut self, name: &str, reg: u8, pc: u32) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .push((name.to_owned(), reg));
        self.var_regs.push(reg);
        self.lifetimes.open(name, reg, pc);
    }

    fn declare_var(&mut self, name: &str, pos: Pos) -> Result<u8, CompileError> {
        // Redeclaration in the same scope reuses the register; or-pattern
        // alternatives depend on binding a name to one place.
        if let Some(&(_, reg)) = self
            .scopes
            .last()
            .expect("scope stack is never empty")
            .iter()
            .rev()
            .find(|(n, _)| n == name)
        {
            return Ok(reg);
        }
        let reg = self.regs.alloc(pos)?;
        self.bind_var(name, reg, self.pc());
        Ok(reg)
    }

    fn lookup_var(&self, name: &str) -> Option<u8> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| {
                scope
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, reg)| *reg)
            })
    }

    // ---- shared emit patterns -----------------------------------------

    /// Load a constant into a fresh temp, folding small ints into `LOADI`.
    fn load_const(&mut self, constant: Constant, pos: Pos) -> Result<u8, CompileError> {
        let dst = self.alloc_temp(pos)?;
        self.emit_const_into(dst, constant, pos);
        Ok(dst)
    }

    fn emit_const_into(&mut self, dst: u8, constant: Constant, pos: Pos) {
        match constant {
            Constant::Int(value) => {
                if let Ok(small) = i16::try_from(value) {
                    self.emit(op::loadi(RegId::new(dst), Simm16::new(small)), pos);
                    return;
                }
                let index = self.intern(Constant::Int(value));
                self.emit(op::loadk(RegId::new(dst), Imm16::new(index)), pos);
            }
            Constant::Nil => {
                self.emit(op::loadnil(RegId::new(dst), RegId::new(0), RegId::new(0)), pos);
            }
            Constant::None => {
                self.emit(op::loadnone(RegId::new(dst), RegId::new(0), RegId::new(0)), pos);
            }
            Constant::Bool(value) => {
                self.emit(
                    op::loadbool(RegId::new(dst), RegId::new(value as u8), RegId::new(0)),
                    pos,
                );
            }
            other => {
                let index = self.intern(other);
                self.emit(op::loadk(RegId::new(dst), Imm16::new(index)), pos);
            }
        }
    }

    fn global_name_index(&mut self, name: &str) -> u16 {
        self.intern(Constant::Str(name.to_owned()))
    }
}
