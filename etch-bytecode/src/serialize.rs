//! Binary layout of a serialized program.
//!
//! The file is a fixed sequence of big-endian sections: magic and versions,
//! instruction stream, constant pool, function table, type registry, debug
//! map, lifetime map, entry PC. Loaders reject any version mismatch instead
//! of migrating.

use crate::{
    constant::{Constant, ConstantPool},
    debug_info::{DebugMap, LifetimeMap, LifetimeRecord, SourcePos},
    function::{FunctionDesc, FunctionKind, FunctionTable, PropagationKind, TypeSig},
    program::Program,
    types::{TypeDecl, TypeRegistry},
    LoadError,
};
use etch_asm::{Instruction, AST_VERSION, BYTECODE_VERSION};

/// Leading magic bytes of a serialized program.
pub const MAGIC: [u8; 4] = *b"ETCH";

impl Program {
    /// Serialize into the versioned binary layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        put_u16(&mut buf, BYTECODE_VERSION);
        put_u16(&mut buf, AST_VERSION);

        put_u32(&mut buf, self.instructions.len() as u32);
        for insn in &self.instructions {
            buf.extend_from_slice(&insn.to_bytes());
        }

        put_u32(&mut buf, self.constants.len() as u32);
        for constant in self.constants.iter() {
            put_constant(&mut buf, constant);
        }

        put_u32(&mut buf, self.functions.len() as u32);
        for func in self.functions.iter() {
            put_function(&mut buf, func);
        }

        put_u32(&mut buf, self.types.len() as u32);
        for decl in self.types.iter() {
            put_type_decl(&mut buf, decl);
        }

        put_u16(&mut buf, self.debug.files.len() as u16);
        for file in &self.debug.files {
            put_str(&mut buf, file);
        }
        let spans: Vec<_> = self.debug.iter().collect();
        put_u32(&mut buf, spans.len() as u32);
        for (pc, pos) in spans {
            put_u32(&mut buf, *pc);
            put_u16(&mut buf, pos.file);
            put_u32(&mut buf, pos.line);
            put_u32(&mut buf, pos.column);
        }

        put_u32(&mut buf, self.lifetimes.len() as u32);
        for (_, records) in self.lifetimes.iter() {
            put_u32(&mut buf, records.len() as u32);
            for r in records {
                put_str(&mut buf, &r.name);
                buf.push(r.register);
                put_u32(&mut buf, r.start_pc);
                put_u32(&mut buf, r.end_pc);
                put_u32(&mut buf, r.def_pc);
            }
        }

        put_u32(&mut buf, self.entry);
        buf
    }

    /// Deserialize from the versioned binary layout and validate the static
    /// invariants.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut r = Reader { bytes, pos: 0 };

        if r.take(4)? != MAGIC {
            return Err(LoadError::BadMagic);
        }
        let bytecode_version = r.u16()?;
        if bytecode_version != BYTECODE_VERSION {
            return Err(LoadError::BytecodeVersion {
                expected: BYTECODE_VERSION,
                found: bytecode_version,
            });
        }
        let ast_version = r.u16()?;
        if ast_version != AST_VERSION {
            return Err(LoadError::AstVersion {
                expected: AST_VERSION,
                found: ast_version,
            });
        }

        let count = r.u32()? as usize;
        let mut instructions = Vec::with_capacity(count);
        for _ in 0..count {
            let cell: [u8; Instruction::SIZE] = r
                .take(Instruction::SIZE)?
                .try_into()
                .expect("take returns the requested length");
            instructions.push(Instruction::from_bytes(cell));
        }

        let count = r.u32()? as usize;
        let mut constants = Vec::with_capacity(count);
        for _ in 0..count {
            constants.push(take_constant(&mut r)?);
        }

        let count = r.u32()? as usize;
        let mut funcs = Vec::with_capacity(count);
        for _ in 0..count {
            funcs.push(take_function(&mut r)?);
        }

        let count = r.u32()? as usize;
        let mut decls = TypeRegistry::new();
        for _ in 0..count {
            decls.push(take_type_decl(&mut r)?);
        }

        let file_count = r.u16()? as usize;
        let mut files = Vec::with_capacity(file_count);
        for _ in 0..file_count {
            files.push(r.str()?);
        }
        let span_count = r.u32()? as usize;
        let mut spans = Vec::with_capacity(span_count);
        for _ in 0..span_count {
            let pc = r.u32()?;
            let pos = SourcePos {
                file: r.u16()?,
                line: r.u32()?,
                column: r.u32()?,
            };
            spans.push((pc, pos));
        }

        let func_count = r.u32()? as usize;
        let mut lifetimes = Vec::with_capacity(func_count);
        for _ in 0..func_count {
            let record_count = r.u32()? as usize;
            let mut records = Vec::with_capacity(record_count);
            for _ in 0..record_count {
                records.push(LifetimeRecord {
                    name: r.str()?,
                    register: r.u8()?,
                    start_pc: r.u32()?,
                    end_pc: r.u32()?,
                    def_pc: r.u32()?,
                });
            }
            lifetimes.push(records);
        }

        let entry = r.u32()?;
        if r.pos != r.bytes.len() {
            return Err(LoadError::Corrupted("trailing bytes after entry PC".into()));
        }

        let program = Program {
            instructions,
            constants: ConstantPool::from_entries(constants),
            functions: FunctionTable::from_descs(funcs),
            types: decls,
            entry,
            debug: DebugMap::from_parts(files, spans),
            lifetimes: LifetimeMap::from_records(lifetimes),
        };
        program.check()?;
        Ok(program)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(LoadError::UnexpectedEof)?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, LoadError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, LoadError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, LoadError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, LoadError> {
        Ok(f64::from_bits(u64::from_be_bytes(
            self.take(8)?.try_into().unwrap(),
        )))
    }

    fn str(&mut self) -> Result<String, LoadError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| LoadError::Corrupted("non-UTF-8 string payload".into()))
    }

    fn opt_str(&mut self) -> Result<Option<String>, LoadError> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.str()?)),
            b => Err(LoadError::Corrupted(format!("bad option flag {b:#04x}"))),
        }
    }
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn put_opt_str(buf: &mut Vec<u8>, s: &Option<String>) {
    match s {
        None => buf.push(0),
        Some(s) => {
            buf.push(1);
            put_str(buf, s);
        }
    }
}

fn put_constant(buf: &mut Vec<u8>, constant: &Constant) {
    buf.push(constant.tag() as u8);
    match constant {
        Constant::Nil | Constant::None => {}
        Constant::Bool(b) => buf.push(*b as u8),
        Constant::Int(i) => put_i64(buf, *i),
        Constant::Float(f) => buf.extend_from_slice(&f.to_bits().to_be_bytes()),
        Constant::Char(c) => buf.push(*c),
        Constant::Str(s) | Constant::TypeDesc(s) => put_str(buf, s),
        Constant::Enum {
            type_id,
            value,
            display,
        } => {
            put_i64(buf, *type_id);
            put_i64(buf, *value);
            put_opt_str(buf, display);
        }
    }
}

fn take_constant(r: &mut Reader<'_>) -> Result<Constant, LoadError> {
    use etch_asm::ValueTag;

    let tag = ValueTag::try_from(r.u8()?)
        .map_err(|_| LoadError::Corrupted("unknown constant tag".into()))?;
    let constant = match tag {
        ValueTag::Nil => Constant::Nil,
        ValueTag::None => Constant::None,
        ValueTag::Bool => Constant::Bool(r.u8()? != 0),
        ValueTag::Int => Constant::Int(r.i64()?),
        ValueTag::Float => Constant::Float(r.f64()?),
        ValueTag::Char => Constant::Char(r.u8()?),
        ValueTag::Str => Constant::Str(r.str()?),
        ValueTag::TypeDesc => Constant::TypeDesc(r.str()?),
        ValueTag::Enum => Constant::Enum {
            type_id: r.i64()?,
            value: r.i64()?,
            display: r.opt_str()?,
        },
        other => {
            return Err(LoadError::Corrupted(format!(
                "tag {other:?} is not a constant tag"
            )))
        }
    };
    Ok(constant)
}

fn put_type_sig(buf: &mut Vec<u8>, sig: &TypeSig) {
    match sig {
        TypeSig::Unit => buf.push(0),
        TypeSig::Int => buf.push(1),
        TypeSig::Float => buf.push(2),
        TypeSig::Bool => buf.push(3),
        TypeSig::Char => buf.push(4),
        TypeSig::Str => buf.push(5),
        TypeSig::Option(inner) => {
            buf.push(6);
            put_type_sig(buf, inner);
        }
        TypeSig::Result(inner) => {
            buf.push(7);
            put_type_sig(buf, inner);
        }
        TypeSig::Array(inner) => {
            buf.push(8);
            put_type_sig(buf, inner);
        }
        TypeSig::Table => buf.push(9),
        TypeSig::Named(name) => {
            buf.push(10);
            put_str(buf, name);
        }
        TypeSig::TypeDesc => buf.push(11),
        TypeSig::Coroutine => buf.push(12),
        TypeSig::Channel(inner) => {
            buf.push(13);
            put_type_sig(buf, inner);
        }
    }
}

fn take_type_sig(r: &mut Reader<'_>) -> Result<TypeSig, LoadError> {
    let sig = match r.u8()? {
        0 => TypeSig::Unit,
        1 => TypeSig::Int,
        2 => TypeSig::Float,
        3 => TypeSig::Bool,
        4 => TypeSig::Char,
        5 => TypeSig::Str,
        6 => TypeSig::Option(Box::new(take_type_sig(r)?)),
        7 => TypeSig::Result(Box::new(take_type_sig(r)?)),
        8 => TypeSig::Array(Box::new(take_type_sig(r)?)),
        9 => TypeSig::Table,
        10 => TypeSig::Named(r.str()?),
        11 => TypeSig::TypeDesc,
        12 => TypeSig::Coroutine,
        13 => TypeSig::Channel(Box::new(take_type_sig(r)?)),
        b => return Err(LoadError::Corrupted(format!("unknown type-sig tag {b:#04x}"))),
    };
    Ok(sig)
}

fn put_function(buf: &mut Vec<u8>, func: &FunctionDesc) {
    put_str(buf, &func.name);
    buf.push(func.kind as u8);
    buf.push(func.params.len() as u8);
    for param in &func.params {
        put_type_sig(buf, param);
    }
    put_type_sig(buf, &func.ret);
    put_u32(buf, func.entry);
    put_u32(buf, func.end);
    buf.push(func.max_registers);
    buf.push(match func.propagates {
        None => 0,
        Some(PropagationKind::Option) => 1,
        Some(PropagationKind::Result) => 2,
    });
    put_opt_str(buf, &func.library);
    put_opt_str(buf, &func.symbol);
}

fn take_function(r: &mut Reader<'_>) -> Result<FunctionDesc, LoadError> {
    let name = r.str()?;
    let kind = FunctionKind::try_from(r.u8()?)
        .map_err(|b| LoadError::Corrupted(format!("unknown function kind {b:#04x}")))?;
    let param_count = r.u8()? as usize;
    let mut params = Vec::with_capacity(param_count);
    for _ in 0..param_count {
        params.push(take_type_sig(r)?);
    }
    let ret = take_type_sig(r)?;
    let entry = r.u32()?;
    let end = r.u32()?;
    let max_registers = r.u8()?;
    let propagates = match r.u8()? {
        0 => None,
        1 => Some(PropagationKind::Option),
        2 => Some(PropagationKind::Result),
        b => return Err(LoadError::Corrupted(format!("bad propagation flag {b:#04x}"))),
    };
    Ok(FunctionDesc {
        name,
        kind,
        params,
        ret,
        entry,
        end,
        max_registers,
        propagates,
        library: r.opt_str()?,
        symbol: r.opt_str()?,
    })
}

fn put_type_decl(buf: &mut Vec<u8>, decl: &TypeDecl) {
    match decl {
        TypeDecl::Object {
            name,
            fields,
            destructor,
        } => {
            buf.push(0);
            put_str(buf, name);
            put_u32(buf, fields.len() as u32);
            for (field, sig) in fields {
                put_str(buf, field);
                put_type_sig(buf, sig);
            }
            put_opt_str(buf, destructor);
        }
        TypeDecl::Enum { name, variants } => {
            buf.push(1);
            put_str(buf, name);
            put_u32(buf, variants.len() as u32);
            for (variant, value) in variants {
                put_str(buf, variant);
                put_i64(buf, *value);
            }
        }
        TypeDecl::Distinct { name, base } => {
            buf.push(2);
            put_str(buf, name);
            put_type_sig(buf, base);
        }
    }
}

fn take_type_decl(r: &mut Reader<'_>) -> Result<TypeDecl, LoadError> {
    let decl = match r.u8()? {
        0 => {
            let name = r.str()?;
            let field_count = r.u32()? as usize;
            let mut fields = Vec::with_capacity(field_count);
            for _ in 0..field_count {
                fields.push((r.str()?, take_type_sig(r)?));
            }
            TypeDecl::Object {
                name,
                fields,
                destructor: r.opt_str()?,
            }
        }
        1 => {
            let name = r.str()?;
            let variant_count = r.u32()? as usize;
            let mut variants = Vec::with_capacity(variant_count);
            for _ in 0..variant_count {
                variants.push((r.str()?, r.i64()?));
            }
            TypeDecl::Enum { name, variants }
        }
        2 => TypeDecl::Distinct {
            name: r.str()?,
            base: take_type_sig(r)?,
        },
        b => return Err(LoadError::Corrupted(format!("unknown type-decl tag {b:#04x}"))),
    };
    Ok(decl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use etch_asm::{op, RegId, Simm16};

    fn sample() -> Program {
        let mut program = Program::new();
        program.instructions = vec![
            op::loadi(RegId::new(0), Simm16::new(7)),
            op::ret(RegId::new(1), RegId::new(0), RegId::new(0)),
        ];
        program.constants.intern(Constant::Str("greeting".into()));
        program.constants.intern(Constant::Float(2.5));
        program.functions.push(FunctionDesc {
            name: "main__u".into(),
            kind: FunctionKind::Native,
            params: vec![],
            ret: TypeSig::Int,
            entry: 0,
            end: 2,
            max_registers: 2,
            propagates: None,
            library: None,
            symbol: None,
        });
        program.types.push(TypeDecl::Enum {
            name: "Color".into(),
            variants: vec![("red".into(), 0)],
        });
        let file = program.debug.intern_file("main.etch");
        program
            .debug
            .record(0, SourcePos { file, line: 1, column: 1 });
        program.lifetimes.set(
            0,
            vec![LifetimeRecord {
                name: "x".into(),
                register: 0,
                start_pc: 0,
                end_pc: 2,
                def_pc: 0,
            }],
        );
        program
    }

    #[test]
    fn byte_round_trip_preserves_every_section() {
        let program = sample();
        let bytes = program.to_bytes();
        let restored = Program::from_bytes(&bytes).unwrap();
        assert_eq!(program, restored);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(Program::from_bytes(&bytes), Err(LoadError::BadMagic)));
    }

    #[test]
    fn version_mismatch_is_rejected_not_migrated() {
        let mut bytes = sample().to_bytes();
        bytes[5] = bytes[5].wrapping_add(1);
        assert!(matches!(
            Program::from_bytes(&bytes),
            Err(LoadError::BytecodeVersion { .. })
        ));
    }

    #[test]
    fn truncated_input_is_an_eof_error() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Program::from_bytes(&bytes[..bytes.len() - 3]),
            Err(LoadError::UnexpectedEof) | Err(LoadError::Corrupted(_))
        ));
    }
}
