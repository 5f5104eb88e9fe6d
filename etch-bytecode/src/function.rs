//! Function descriptors, the function table, and canonical name mangling
//! support types.

use std::collections::HashMap;

/// Dispatch class of a function-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FunctionKind {
    /// Bytecode compiled from Etch source; called by frame push.
    Native = 0,
    /// Provided by the runtime itself (`print`, `len`, `read_file`, ...).
    Builtin = 1,
    /// Bound by the embedding host through the context.
    Host = 2,
    /// Resolved from a dynamic library at load time.
    Foreign = 3,
}

impl TryFrom<u8> for FunctionKind {
    type Error = u8;

    fn try_from(b: u8) -> Result<Self, u8> {
        match b {
            0 => Ok(FunctionKind::Native),
            1 => Ok(FunctionKind::Builtin),
            2 => Ok(FunctionKind::Host),
            3 => Ok(FunctionKind::Foreign),
            _ => Err(b),
        }
    }
}

/// Compact type signature used in function descriptors, the mangler and the
/// foreign-call marshaller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeSig {
    /// No value (procedures).
    Unit,
    /// 64-bit signed integer.
    Int,
    /// 64-bit IEEE-754 float.
    Float,
    /// Boolean.
    Bool,
    /// Single-byte character.
    Char,
    /// Immutable string.
    Str,
    /// `option[T]`.
    Option(Box<TypeSig>),
    /// `result[T]`.
    Result(Box<TypeSig>),
    /// `array[T]`.
    Array(Box<TypeSig>),
    /// Insertion-ordered table.
    Table,
    /// Declared object, enum or distinct type, by name.
    Named(String),
    /// Type-name carrier.
    TypeDesc,
    /// Coroutine handle.
    Coroutine,
    /// `channel[T]`.
    Channel(Box<TypeSig>),
}

impl TypeSig {
    /// The compact spelling used inside mangled names.
    pub fn mangle(&self) -> String {
        match self {
            TypeSig::Unit => "u".into(),
            TypeSig::Int => "i".into(),
            TypeSig::Float => "f".into(),
            TypeSig::Bool => "b".into(),
            TypeSig::Char => "c".into(),
            TypeSig::Str => "s".into(),
            TypeSig::Option(inner) => format!("o{}", inner.mangle()),
            TypeSig::Result(inner) => format!("r{}", inner.mangle()),
            TypeSig::Array(inner) => format!("a{}", inner.mangle()),
            TypeSig::Table => "t".into(),
            TypeSig::Named(name) => format!("n{}{name}", name.len()),
            TypeSig::TypeDesc => "d".into(),
            TypeSig::Coroutine => "w".into(),
            TypeSig::Channel(inner) => format!("h{}", inner.mangle()),
        }
    }
}

/// Which wrapper the propagation operator rebuilds when it short-circuits out
/// of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropagationKind {
    /// The function returns `option[T]`; short-circuits rebuild `none`.
    Option,
    /// The function returns `result[T]`; short-circuits forward the `error`.
    Result,
}

/// One entry of the function table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionDesc {
    /// Canonical (mangled) name; unique within the program.
    pub name: String,
    /// Dispatch class.
    pub kind: FunctionKind,
    /// Parameter types, in declaration order.
    pub params: Vec<TypeSig>,
    /// Return type.
    pub ret: TypeSig,
    /// First instruction of the body (native functions; 0 otherwise).
    pub entry: u32,
    /// One past the last instruction of the body (native functions).
    pub end: u32,
    /// High-water register count the frame window must provide.
    pub max_registers: u8,
    /// Whether the body uses the propagation operator, and which wrapper it
    /// rebuilds.
    pub propagates: Option<PropagationKind>,
    /// Library name for foreign entries.
    pub library: Option<String>,
    /// Symbol name for foreign entries.
    pub symbol: Option<String>,
}

impl FunctionDesc {
    /// Whether `pc` lies inside this function's instruction range.
    pub fn contains_pc(&self, pc: u32) -> bool {
        self.kind == FunctionKind::Native && pc >= self.entry && pc < self.end
    }
}

/// The program's function table with its canonical-name index.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionTable {
    funcs: Vec<FunctionDesc>,
    #[cfg_attr(feature = "serde", serde(skip))]
    by_name: HashMap<String, u16>,
}

impl FunctionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor, returning its table index.
    ///
    /// # Panics
    ///
    /// Panics when the table exceeds the 16-bit index space.
    pub fn push(&mut self, desc: FunctionDesc) -> u16 {
        let idx = u16::try_from(self.funcs.len())
            .expect("function table exceeds 16-bit index space");
        self.by_name.insert(desc.name.clone(), idx);
        self.funcs.push(desc);
        idx
    }

    /// The descriptor at `idx`, if present.
    pub fn get(&self, idx: u16) -> Option<&FunctionDesc> {
        self.funcs.get(idx as usize)
    }

    /// Mutable descriptor access (used by the compiler to patch entry PCs).
    pub fn get_mut(&mut self, idx: u16) -> Option<&mut FunctionDesc> {
        self.funcs.get_mut(idx as usize)
    }

    /// Look up a function by its canonical name.
    pub fn by_name(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    /// The function whose instruction range contains `pc`, if any.
    pub fn containing_pc(&self, pc: u32) -> Option<(u16, &FunctionDesc)> {
        self.funcs
            .iter()
            .enumerate()
            .find(|(_, f)| f.contains_pc(pc))
            .map(|(i, f)| (i as u16, f))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    /// Iterate descriptors in table order.
    pub fn iter(&self) -> impl Iterator<Item = &FunctionDesc> {
        self.funcs.iter()
    }

    /// Rebuild a table from deserialized descriptors, restoring the name
    /// index.
    pub(crate) fn from_descs(funcs: Vec<FunctionDesc>) -> Self {
        let by_name = funcs
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i as u16))
            .collect();
        Self { funcs, by_name }
    }
}
