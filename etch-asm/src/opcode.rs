//! The instruction table. Every opcode of the current bytecode version is
//! declared here, once, together with its encoding form.

crate::impl_opcodes! {
    "Copy register `B` into register `A`."
    0x01 MOVE mov Abc;
    "Load constant `K[Bx]` into register `A`."
    0x02 LOADK loadk ABx;
    "Load the small signed immediate `sBx` into register `A` as an `int`."
    0x03 LOADI loadi AsBx;
    "Store `nil` into the register range `A..=A+B`."
    0x04 LOADNIL loadnil Abc;
    "Store `bool(B)` into register `A`; skip the next instruction when `C` is set."
    0x05 LOADBOOL loadbool Abc;
    "Store `none` into register `A`."
    0x06 LOADNONE loadnone Abc;
    "Load the global named by constant `K[Bx]` into register `A`."
    0x07 GETGLOB getglob ABx;
    "Store register `A` into the global named by constant `K[Bx]`."
    0x08 SETGLOB setglob ABx;
    "Box register `B` into a fresh scalar heap slot; strong handle into `A`."
    0x09 REFNEW refnew Abc;
    "Load the value boxed by the scalar handle in `B` into register `A`."
    0x0a REFGET refget Abc;
    "Store register `B` into the scalar heap slot referenced by `A`."
    0x0b REFSET refset Abc;
    "Create a weak handle to the heap slot referenced by `B`; store into `A`."
    0x0c WEAKNEW weaknew Abc;

    "`A = B + C`. Matching numeric types, string or array concatenation."
    0x10 ADD add Abc;
    "`A = B - C`. Matching numeric types only."
    0x11 SUB sub Abc;
    "`A = B * C`. Matching numeric types only."
    0x12 MUL mul Abc;
    "`A = B / C`. Matching numeric types only; panics on integer division by zero."
    0x13 DIV div Abc;
    "`A = B % C`. Matching numeric types only; panics on integer division by zero."
    0x14 MOD mod_ Abc;
    "`A = B ** C`. Matching numeric types only."
    0x15 POW pow Abc;
    "`A = -B`. Numeric negation."
    0x16 NEG neg Abc;
    "`A = !B`. Boolean negation."
    0x17 NOT not Abc;

    "`A = B + C` with both operands proven `int`."
    0x18 IADD iadd Abc;
    "`A = B - C` with both operands proven `int`."
    0x19 ISUB isub Abc;
    "`A = B * C` with both operands proven `int`."
    0x1a IMUL imul Abc;
    "`A = B / C` with both operands proven `int`; panics on division by zero."
    0x1b IDIV idiv Abc;
    "`A = B % C` with both operands proven `int`; panics on division by zero."
    0x1c IMOD imod Abc;
    "`A = B + C` with both operands proven `float`."
    0x1d FADD fadd Abc;
    "`A = B - C` with both operands proven `float`."
    0x1e FSUB fsub Abc;
    "`A = B * C` with both operands proven `float`."
    0x1f FMUL fmul Abc;
    "`A = B / C` with both operands proven `float`."
    0x20 FDIV fdiv Abc;
    "`A = B % C` with both operands proven `float`."
    0x21 FMOD fmod Abc;

    "`A = B + imm` with an 8-bit signed immediate."
    0x22 ADDIMM addimm AbcImm;
    "`A = B - imm` with an 8-bit signed immediate."
    0x23 SUBIMM subimm AbcImm;
    "`A = B * imm` with an 8-bit signed immediate."
    0x24 MULIMM mulimm AbcImm;
    "`A = B / imm` with an 8-bit signed immediate; panics when `imm` is zero."
    0x25 DIVIMM divimm AbcImm;
    "`A = B % imm` with an 8-bit signed immediate; panics when `imm` is zero."
    0x26 MODIMM modimm AbcImm;
    "`A = B & imm` bitwise, with an 8-bit signed (sign-extended) immediate."
    0x27 ANDIMM andimm AbcImm;
    "`A = B | imm` bitwise, with an 8-bit signed (sign-extended) immediate."
    0x28 ORIMM orimm AbcImm;

    "Skip the next instruction when `(B == C) != A`."
    0x29 EQ eq Abc;
    "Skip the next instruction when `(B < C) != A`. Ordered scalars only."
    0x2a LT lt Abc;
    "Skip the next instruction when `(B <= C) != A`. Ordered scalars only."
    0x2b LE le Abc;
    "`A = B == C` as a boolean register."
    0x2c EQS eqs Abc;
    "`A = B != C` as a boolean register."
    0x2d NES nes Abc;
    "`A = B < C` as a boolean register. Ordered scalars only."
    0x2e LTS lts Abc;
    "`A = B <= C` as a boolean register. Ordered scalars only."
    0x2f LES les Abc;
    "Fused compare-and-branch: branch by the signed offset in `D` when `B cmp C` holds, with the comparison selected by `A` ([`crate::CmpKind`])."
    0x30 CMPJMP cmpjmp CmpOff;

    "`A = B && C`. Boolean conjunction."
    0x31 AND and Abc;
    "`A = B || C`. Boolean disjunction."
    0x32 OR or Abc;
    "`A = B in C`. Container membership."
    0x33 IN in_ Abc;
    "`A = B not in C`. Negated container membership."
    0x34 NOTIN notin Abc;

    "`A = B[C]`. Array, string or table indexing."
    0x35 GETIDX getidx Abc;
    "`A[B] = C`. Array or table element store."
    0x36 SETIDX setidx Abc;
    "`A = B[imm]` with an 8-bit immediate index."
    0x37 GETIDXI getidxi AbcImm;
    "`A[imm] = B` with an 8-bit immediate index."
    0x38 SETIDXI setidxi AbcImm;
    "`A = B.field` where the key is the short-string constant `K[C]`."
    0x39 GETFLD getfld Abc;
    "`A.field = C` where the key is the short-string constant `K[B]`."
    0x3a SETFLD setfld Abc;
    "`A = B[C..D]`. Array or string slice with register bounds."
    0x3b SLICE slice Ax;
    "`A = len(B)`. Array, string or table length."
    0x3c LEN len Abc;
    "Fresh heap array of `Bx` nil elements; strong handle into `A`."
    0x3d NEWARR newarr ABx;
    "Fresh empty heap table; strong handle into `A`."
    0x3e NEWTAB newtab Abc;
    "Allocate a closure over function `func`, capturing `nargs` values at `A+1..`; strong handle into `A`."
    0x3f CLOSURE closure Call;

    "`A = some(B)`."
    0x40 WRAPSOME wrapsome Abc;
    "`A = ok(B)`."
    0x41 WRAPOK wrapok Abc;
    "`A = error(B)`."
    0x42 WRAPERR wraperr Abc;
    "Skip the next instruction when `(tag(A) == B) != C`, with `B` a [`crate::ValueTag`] byte."
    0x43 TESTTAG testtag Abc;
    "`A = inner of B` for `some(v)`; panics when `B` is not `some`."
    0x44 UNWRAPOPT unwrapopt Abc;
    "`A = inner of B`. With `C` clear expects `ok(v)`; with `C` set expects `error(v)`. Panics on the other variant."
    0x45 UNWRAPRES unwrapres Abc;
    "`A = convert(B)` with the conversion selected by the [`crate::CastKind`] byte in `C`."
    0x46 CAST cast Abc;
    "Call the closure in `A` with `nargs` arguments at `A+1..`; its captures become the callee's leading parameters. Result into `A`."
    0x47 CALLC callc Call;

    "Unconditional branch by the signed offset `sBx`."
    0x48 JMP jmp AsBx;
    "Skip the next instruction when `truth(A) != C`."
    0x49 TEST test Abc;
    "When `truth(B) == C` copy `B` into `A`, otherwise skip the next instruction."
    0x4a TESTSET testset Abc;
    "Generic loop setup over the iterable in `A`; branch by `sBx` to the loop tail."
    0x4b FORPREP forprep AsBx;
    "Generic loop step: advance the iterator at `A`, bind into `A+1` and branch back by `sBx` while items remain."
    0x4c FORLOOP forloop AsBx;
    "Counted int loop setup: `A` counter, `A+1` limit; branch by `sBx` to the loop tail."
    0x4d FORIPREP foriprep AsBx;
    "Counted int loop step: bump the counter at `A` and branch back by `sBx` while it has not passed the limit at `A+1`."
    0x4e FORILOOP foriloop AsBx;
    "Return from the current frame; `A` is the result arity (0 or 1) and `B` the result register."
    0x4f RET ret Abc;
    "Queue the defer body starting at `PC+1` for frame exit, then fall through to `PC+1+sBx`."
    0x50 DEFER defer AsBx;
    "End of a defer body; control returns to the defer driver."
    0x51 DEFEREND deferend Abc;

    "Call the native function `func` with `nargs` arguments at `A+1..`; result into `A`."
    0x52 CALL call Call;
    "Call the builtin function `func`; same register convention as `CALL`."
    0x53 CALLB callb Call;
    "Call the registered host callback bound to `func`; same register convention as `CALL`."
    0x54 CALLH callh Call;
    "Call the foreign (dynamically loaded) function `func`; same register convention as `CALL`."
    0x55 CALLF callf Call;

    "Spawn a coroutine over function `func` with `nargs` arguments at `A+1..`; handle into `A`."
    0x56 SPAWN spawn Call;
    "Resume the coroutine referenced by `B`; its next yield (or final return) lands in `A`. When `C != 0`, register `C-1` is delivered to the coroutine's pending yield."
    0x57 RESUME resume Abc;
    "Suspend the active coroutine, yielding register `B` (when `C` is set, `nil` otherwise); the next resume argument lands in `A`."
    0x58 YIELD yield_ Abc;
    "Bounded channel with capacity `Bx` (0 selects the default); strong handle into `A`."
    0x59 CHANNEW channew ABx;
    "Send register `B` into the channel referenced by `A`; suspends the active coroutine while the channel is full."
    0x5a CHANSEND chansend Abc;
    "Receive from the channel referenced by `B` into `A`; suspends the active coroutine while the channel is empty."
    0x5b CHANRECV chanrecv Abc;

    "`A = (B + C) + D`."
    0x60 ADDADD addadd Ax;
    "`A = (B * C) + D`."
    0x61 MULADD muladd Ax;
    "`A = (B - C) - D`."
    0x62 SUBSUB subsub Ax;
    "`A = (B - C) * D`."
    0x63 SUBMUL submul Ax;
    "`A = (B * C) - D`."
    0x64 MULSUB mulsub Ax;
    "`A = (B / C) + D`."
    0x65 DIVADD divadd Ax;
    "`A = (B + C) - D`."
    0x66 ADDSUB addsub Ax;
    "`A = (B + C) * D`."
    0x67 ADDMUL addmul Ax;
    "`A = (B - C) / D`."
    0x68 SUBDIV subdiv Ax;
    "`A = (B + C) + D` with all operands proven `int`."
    0x69 IADDADD iaddadd Ax;
    "`A = (B * C) + D` with all operands proven `int`."
    0x6a IMULADD imuladd Ax;
    "`A = (B - C) - D` with all operands proven `int`."
    0x6b ISUBSUB isubsub Ax;
    "`A = (B - C) * D` with all operands proven `int`."
    0x6c ISUBMUL isubmul Ax;
    "`A = (B * C) - D` with all operands proven `int`."
    0x6d IMULSUB imulsub Ax;
    "`A = (B / C) + D` with all operands proven `int`."
    0x6e IDIVADD idivadd Ax;
    "`A = (B + C) - D` with all operands proven `int`."
    0x6f IADDSUB iaddsub Ax;
    "`A = (B + C) * D` with all operands proven `int`."
    0x70 IADDMUL iaddmul Ax;
    "`A = (B - C) / D` with all operands proven `int`."
    0x71 ISUBDIV isubdiv Ax;
    "`A = (B + C) + D` with all operands proven `float`."
    0x72 FADDADD faddadd Ax;
    "`A = (B * C) + D` with all operands proven `float`."
    0x73 FMULADD fmuladd Ax;
    "`A = (B - C) - D` with all operands proven `float`."
    0x74 FSUBSUB fsubsub Ax;
    "`A = (B - C) * D` with all operands proven `float`."
    0x75 FSUBMUL fsubmul Ax;
    "`A = (B * C) - D` with all operands proven `float`."
    0x76 FMULSUB fmulsub Ax;
    "`A = (B / C) + D` with all operands proven `float`."
    0x77 FDIVADD fdivadd Ax;
    "`A = (B + C) - D` with all operands proven `float`."
    0x78 FADDSUB faddsub Ax;
    "`A = (B + C) * D` with all operands proven `float`."
    0x79 FADDMUL faddmul Ax;
    "`A = (B - C) / D` with all operands proven `float`."
    0x7a FSUBDIV fsubdiv Ax;

    "Fused field increment: `A.field += imm` where the key is the short-string constant `K[B]` and `imm` is 8-bit signed."
    0x7b FLDADDI fldaddi AxImm;
    "Fused element compound add: `A[B] = A[B] + C`."
    0x7c GETADDSET getaddset Ax;
    "Fused element compound subtract: `A[B] = A[B] - C`."
    0x7d GETSUBSET getsubset Ax;
    "Fused element compound multiply: `A[B] = A[B] * C`."
    0x7e GETMULSET getmulset Ax;
    "Fused element compound divide: `A[B] = A[B] / C`."
    0x7f GETDIVSET getdivset Ax;
    "Fused element compound remainder: `A[B] = A[B] % C`."
    0x80 GETMODSET getmodset Ax;
    "Fused increment-and-test: `A += 1`, then branch by the signed offset in `D` while `A < B`."
    0x81 INCLT inclt AxOff;
    "Abort execution with the [`crate::PanicReason`] byte in `A` (pattern-match fall-through and compiler-retained guards)."
    0x82 TRAP trap Abc;
}

impl Opcode {
    /// Whether this opcode's handler may suspend the active coroutine.
    pub const fn is_suspension_point(self) -> bool {
        matches!(
            self,
            Opcode::YIELD | Opcode::CHANSEND | Opcode::CHANRECV
        )
    }

    /// Whether this opcode transfers control (so the peephole pass must not
    /// merge across it).
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::JMP
                | Opcode::RET
                | Opcode::FORPREP
                | Opcode::FORLOOP
                | Opcode::FORIPREP
                | Opcode::FORILOOP
                | Opcode::CMPJMP
                | Opcode::INCLT
                | Opcode::DEFER
                | Opcode::DEFEREND
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn opcode_u8_round_trip() {
        for op in Opcode::iter() {
            let b = op as u8;
            assert_eq!(Opcode::try_from(b), Ok(op));
        }
    }

    #[test]
    fn reserved_bytes_are_rejected() {
        let known: std::collections::HashSet<u8> =
            Opcode::iter().map(|op| op as u8).collect();
        for b in 0..=255u8 {
            if !known.contains(&b) {
                assert!(Opcode::try_from(b).is_err(), "byte {b:#04x} should be reserved");
            }
        }
    }
}
