//! # The `impl_opcodes!` macro
//!
//! The instruction set is described once, as a table of
//! `"doc" value NAME ctor_name Form;` rows. Everything else — the `Opcode`
//! enum, its `TryFrom<u8>` conversion, the operand-format mapping used by the
//! decoder, and the shorthand instruction constructors in [`crate::op`] — is
//! derived from that single table so the compiler's emitter and the VM's
//! dispatcher can never disagree about an encoding.
//!
//! The `Form` column is a constructor shape, not just a wire format: `Abc`
//! and `AbcImm` both decode as [`crate::Format::Abc`], while `Ax`, `AxImm`,
//! `AxOff` and `CmpOff` all decode as [`crate::Format::Ax`].

/// Defines an enum with a `TryFrom` implementation over its discriminant type.
#[macro_export]
macro_rules! enum_try_from {
    (
        $(#[$meta:meta])* $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $vname:ident $(= $val:expr)?,)*
        },
        $from:ident
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($(#[$vmeta])* $vname $(= $val)?,)*
        }

        impl core::convert::TryFrom<$from> for $name {
            type Error = $crate::PanicReason;

            fn try_from(v: $from) -> Result<Self, Self::Error> {
                match v {
                    $(x if x == $name::$vname as $from => Ok($name::$vname),)*
                    _ => Err($crate::PanicReason::InvalidInstruction),
                }
            }
        }
    }
}

/// Derives `Opcode`, its decode metadata and the `op` constructor module from
/// the instruction table. See the module docs for the row syntax.
#[macro_export]
macro_rules! impl_opcodes {
    (
        $( $doc:literal $val:literal $Name:ident $fn:ident $Form:ident; )*
    ) => {
        /// Solely the opcode portion of an instruction, represented as a
        /// single byte.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[repr(u8)]
        pub enum Opcode {
            $( #[doc = $doc] $Name = $val, )*
        }

        impl core::convert::TryFrom<u8> for Opcode {
            type Error = $crate::InvalidOpcode;

            fn try_from(b: u8) -> Result<Self, Self::Error> {
                match b {
                    $( $val => Ok(Opcode::$Name), )*
                    _ => Err($crate::InvalidOpcode),
                }
            }
        }

        impl Opcode {
            /// Encoding form the decoder must use for this opcode's operands.
            pub const fn format(self) -> $crate::Format {
                match self {
                    $( Opcode::$Name => $crate::impl_opcodes!(@form $Form), )*
                }
            }
        }

        /// Shorthand instruction constructors, one per opcode.
        pub mod _op {
            use $crate::{
                args::{CmpKind, FuncId, Imm16, RegId, Simm16, Simm8},
                Instruction,
            };
            use super::Opcode;

            $( $crate::impl_opcodes!(@ctor $doc $Name $fn $Form); )*
        }
    };

    (@form Abc) => { $crate::Format::Abc };
    (@form AbcImm) => { $crate::Format::Abc };
    (@form ABx) => { $crate::Format::ABx };
    (@form AsBx) => { $crate::Format::AsBx };
    (@form Ax) => { $crate::Format::Ax };
    (@form AxImm) => { $crate::Format::Ax };
    (@form AxOff) => { $crate::Format::Ax };
    (@form CmpOff) => { $crate::Format::Ax };
    (@form Call) => { $crate::Format::Call };

    (@ctor $doc:literal $Name:ident $fn:ident Abc) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, b: RegId, c: RegId) -> Instruction {
            Instruction::abc(Opcode::$Name, a, b, c)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident AbcImm) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, b: RegId, imm: Simm8) -> Instruction {
            Instruction::abc_imm(Opcode::$Name, a, b, imm)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident ABx) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, bx: Imm16) -> Instruction {
            Instruction::abx(Opcode::$Name, a, bx)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident AsBx) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, sbx: Simm16) -> Instruction {
            Instruction::asbx(Opcode::$Name, a, sbx)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident Ax) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, b: RegId, c: RegId, d: RegId) -> Instruction {
            Instruction::ax(Opcode::$Name, a, b, c, d)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident AxImm) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, key: u8, imm: Simm8) -> Instruction {
            Instruction::ax_imm(Opcode::$Name, a, key, imm)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident AxOff) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, b: RegId, offset: Simm8) -> Instruction {
            Instruction::ax_off(Opcode::$Name, a, b, offset)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident CmpOff) => {
        #[doc = $doc]
        pub fn $fn(cmp: CmpKind, b: RegId, c: RegId, offset: Simm8) -> Instruction {
            Instruction::cmp_off(Opcode::$Name, cmp, b, c, offset)
        }
    };
    (@ctor $doc:literal $Name:ident $fn:ident Call) => {
        #[doc = $doc]
        pub fn $fn(a: RegId, func: FuncId, nargs: u8, nres: u8) -> Instruction {
            Instruction::call(Opcode::$Name, a, func, nargs, nres)
        }
    };
}
