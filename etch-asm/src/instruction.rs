//! Fixed-width instruction cells and their packed operand fields.

use crate::{
    args::{CmpKind, FuncId, Imm16, RegId, Simm16, Simm8},
    InvalidOpcode, Opcode,
};

/// Operand layout of an instruction cell.
///
/// The classic `Abc`/`ABx`/`AsBx` forms occupy only the high 32 bits of the
/// cell; the fused `Ax` and the widened `Call` forms use the full width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Format {
    /// Opcode + three 8-bit register fields `A`, `B`, `C`.
    Abc,
    /// Opcode + 8-bit `A` + 16-bit unsigned `Bx`.
    ABx,
    /// Opcode + 8-bit `A` + 16-bit signed `sBx`.
    AsBx,
    /// Opcode + 8-bit `A` + 24-bit `Ax` payload (three packed 8-bit fields).
    Ax,
    /// Opcode + 8-bit destination `A` + function index + `nargs` + `nres`.
    Call,
}

/// A single instruction cell.
///
/// Cells are uniformly 64 bits wide in memory and on disk; the PC indexes
/// cells, never bytes. Field layout, from the most significant byte down:
///
/// ```text
/// | op | A | B/Bx-hi | C/Bx-lo | D | nres | 0 | 0 |
/// ```
///
/// All operands decode from fixed bit positions, so the accessors are format
/// hints rather than checked views; [`Opcode::format`] names the fields that
/// are meaningful for a given opcode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction(u64);

impl Instruction {
    /// Size of one instruction cell in bytes.
    pub const SIZE: usize = 8;

    /// Wrap a raw cell without validating its opcode byte.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw cell.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// The opcode byte.
    pub const fn op(self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// Decode the opcode byte.
    pub fn opcode(self) -> Result<Opcode, InvalidOpcode> {
        Opcode::try_from(self.op())
    }

    /// Register field `A`.
    pub const fn a(self) -> RegId {
        RegId::new((self.0 >> 48) as u8)
    }

    /// Register field `B`.
    pub const fn b(self) -> RegId {
        RegId::new((self.0 >> 40) as u8)
    }

    /// Register field `C`.
    pub const fn c(self) -> RegId {
        RegId::new((self.0 >> 32) as u8)
    }

    /// Register field `D` (fused `Ax` forms only).
    pub const fn d(self) -> RegId {
        RegId::new((self.0 >> 24) as u8)
    }

    /// Unsigned 16-bit immediate `Bx`.
    pub const fn bx(self) -> Imm16 {
        Imm16((self.0 >> 32) as u16)
    }

    /// Signed 16-bit immediate `sBx`.
    pub const fn sbx(self) -> Simm16 {
        Simm16((self.0 >> 32) as u16 as i16)
    }

    /// The `C` field as a signed 8-bit immediate.
    pub const fn imm_c(self) -> Simm8 {
        Simm8((self.0 >> 32) as u8 as i8)
    }

    /// The `D` field as a signed 8-bit immediate (fused branch offsets).
    pub const fn imm_d(self) -> Simm8 {
        Simm8((self.0 >> 24) as u8 as i8)
    }

    /// The `A` field as a comparison selector (`CMPJMP`).
    pub fn cmp_kind(self) -> Result<CmpKind, crate::PanicReason> {
        CmpKind::try_from(self.a().to_u8())
    }

    /// Function-table index (`Call` form).
    pub const fn func(self) -> FuncId {
        FuncId::new((self.0 >> 32) as u16)
    }

    /// Argument count (`Call` form).
    pub const fn nargs(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Result count (`Call` form).
    pub const fn nres(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Pack an `Abc` cell.
    pub fn abc(op: Opcode, a: RegId, b: RegId, c: RegId) -> Self {
        Self(
            (op as u64) << 56
                | (a.to_u8() as u64) << 48
                | (b.to_u8() as u64) << 40
                | (c.to_u8() as u64) << 32,
        )
    }

    /// Pack an `Abc` cell whose `C` field carries a signed immediate.
    pub fn abc_imm(op: Opcode, a: RegId, b: RegId, imm: Simm8) -> Self {
        Self(
            (op as u64) << 56
                | (a.to_u8() as u64) << 48
                | (b.to_u8() as u64) << 40
                | (imm.0 as u8 as u64) << 32,
        )
    }

    /// Pack an `ABx` cell.
    pub fn abx(op: Opcode, a: RegId, bx: Imm16) -> Self {
        Self((op as u64) << 56 | (a.to_u8() as u64) << 48 | (bx.0 as u64) << 32)
    }

    /// Pack an `AsBx` cell.
    pub fn asbx(op: Opcode, a: RegId, sbx: Simm16) -> Self {
        Self((op as u64) << 56 | (a.to_u8() as u64) << 48 | (sbx.0 as u16 as u64) << 32)
    }

    /// Pack an `Ax` cell with four register fields.
    pub fn ax(op: Opcode, a: RegId, b: RegId, c: RegId, d: RegId) -> Self {
        Self(
            (op as u64) << 56
                | (a.to_u8() as u64) << 48
                | (b.to_u8() as u64) << 40
                | (c.to_u8() as u64) << 32
                | (d.to_u8() as u64) << 24,
        )
    }

    /// Pack an `Ax` cell carrying a key-constant index and a signed immediate.
    pub fn ax_imm(op: Opcode, a: RegId, key: u8, imm: Simm8) -> Self {
        Self(
            (op as u64) << 56
                | (a.to_u8() as u64) << 48
                | (key as u64) << 40
                | (imm.0 as u8 as u64) << 32,
        )
    }

    /// Pack an `Ax` cell whose `D` field is a signed branch offset.
    pub fn ax_off(op: Opcode, a: RegId, b: RegId, offset: Simm8) -> Self {
        Self(
            (op as u64) << 56
                | (a.to_u8() as u64) << 48
                | (b.to_u8() as u64) << 40
                | (offset.0 as u8 as u64) << 24,
        )
    }

    /// Pack a `CMPJMP` cell: comparison selector, two sources, signed offset.
    pub fn cmp_off(op: Opcode, cmp: CmpKind, b: RegId, c: RegId, offset: Simm8) -> Self {
        Self(
            (op as u64) << 56
                | (cmp as u64) << 48
                | (b.to_u8() as u64) << 40
                | (c.to_u8() as u64) << 32
                | (offset.0 as u8 as u64) << 24,
        )
    }

    /// Pack a `Call` cell.
    pub fn call(op: Opcode, a: RegId, func: FuncId, nargs: u8, nres: u8) -> Self {
        Self(
            (op as u64) << 56
                | (a.to_u8() as u64) << 48
                | (func.to_u16() as u64) << 32
                | (nargs as u64) << 24
                | (nres as u64) << 16,
        )
    }

    /// Big-endian byte representation of the cell.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        self.0.to_be_bytes()
    }

    /// Rebuild a cell from its big-endian byte representation.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl From<u64> for Instruction {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Instruction> for u64 {
    fn from(instruction: Instruction) -> Self {
        instruction.0
    }
}

impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let Ok(op) = self.opcode() else {
            return write!(f, "??? {:#018x}", self.0);
        };
        match op.format() {
            Format::Abc => write!(
                f,
                "{op:?} r{} r{} r{}",
                self.a().to_u8(),
                self.b().to_u8(),
                self.c().to_u8()
            ),
            Format::ABx => write!(f, "{op:?} r{} {}", self.a().to_u8(), self.bx().0),
            Format::AsBx => write!(f, "{op:?} r{} {:+}", self.a().to_u8(), self.sbx().0),
            Format::Ax => write!(
                f,
                "{op:?} r{} r{} r{} r{}",
                self.a().to_u8(),
                self.b().to_u8(),
                self.c().to_u8(),
                self.d().to_u8()
            ),
            Format::Call => write!(
                f,
                "{op:?} r{} f{} args={} res={}",
                self.a().to_u8(),
                self.func().to_u16(),
                self.nargs(),
                self.nres()
            ),
        }
    }
}
