//! The fused-instruction table.
//!
//! One table drives both sides: the compiler's peephole matcher asks
//! [`fuse_triadic`] whether a pair of arithmetic opcodes has a fused
//! equivalent, and the VM dispatcher asks [`triadic_ops`] which scalar
//! operators a fused opcode denotes.

use crate::{
    args::{AluClass, AluOp, CmpKind},
    Opcode,
};

/// Row of the fused-triadic table: the two-instruction pattern, its fused
/// replacement, and the decoded operator pair.
type TriadicRow = (Opcode, Opcode, Opcode, AluOp, AluOp, AluClass);

macro_rules! triadic_rows {
    ($( $first:ident $second:ident => $fused:ident
         ($op1:ident, $op2:ident, $class:ident); )*) => {
        &[ $( (
            Opcode::$first,
            Opcode::$second,
            Opcode::$fused,
            AluOp::$op1,
            AluOp::$op2,
            AluClass::$class,
        ), )* ]
    };
}

/// All fused triadic forms of the current instruction set.
pub const TRIADIC_TABLE: &[TriadicRow] = triadic_rows! {
    ADD ADD => ADDADD (Add, Add, Generic);
    MUL ADD => MULADD (Mul, Add, Generic);
    SUB SUB => SUBSUB (Sub, Sub, Generic);
    SUB MUL => SUBMUL (Sub, Mul, Generic);
    MUL SUB => MULSUB (Mul, Sub, Generic);
    DIV ADD => DIVADD (Div, Add, Generic);
    ADD SUB => ADDSUB (Add, Sub, Generic);
    ADD MUL => ADDMUL (Add, Mul, Generic);
    SUB DIV => SUBDIV (Sub, Div, Generic);
    IADD IADD => IADDADD (Add, Add, Int);
    IMUL IADD => IMULADD (Mul, Add, Int);
    ISUB ISUB => ISUBSUB (Sub, Sub, Int);
    ISUB IMUL => ISUBMUL (Sub, Mul, Int);
    IMUL ISUB => IMULSUB (Mul, Sub, Int);
    IDIV IADD => IDIVADD (Div, Add, Int);
    IADD ISUB => IADDSUB (Add, Sub, Int);
    IADD IMUL => IADDMUL (Add, Mul, Int);
    ISUB IDIV => ISUBDIV (Sub, Div, Int);
    FADD FADD => FADDADD (Add, Add, Float);
    FMUL FADD => FMULADD (Mul, Add, Float);
    FSUB FSUB => FSUBSUB (Sub, Sub, Float);
    FSUB FMUL => FSUBMUL (Sub, Mul, Float);
    FMUL FSUB => FMULSUB (Mul, Sub, Float);
    FDIV FADD => FDIVADD (Div, Add, Float);
    FADD FSUB => FADDSUB (Add, Sub, Float);
    FADD FMUL => FADDMUL (Add, Mul, Float);
    FSUB FDIV => FSUBDIV (Sub, Div, Float);
};

/// The fused opcode replacing `first; second` when the intermediate register
/// dies at the second instruction, if one exists.
pub fn fuse_triadic(first: Opcode, second: Opcode) -> Option<Opcode> {
    TRIADIC_TABLE
        .iter()
        .find(|(f, s, ..)| *f == first && *s == second)
        .map(|(_, _, fused, ..)| *fused)
}

/// The operator pair `(first, second, class)` a fused triadic opcode denotes:
/// `A = (B first C) second D`.
pub fn triadic_ops(fused: Opcode) -> Option<(AluOp, AluOp, AluClass)> {
    TRIADIC_TABLE
        .iter()
        .find(|(_, _, f, ..)| *f == fused)
        .map(|(_, _, _, op1, op2, class)| (*op1, *op2, *class))
}

/// The scalar operator and specialization class of a plain binary arithmetic
/// opcode, if it is one.
pub fn alu_binop(op: Opcode) -> Option<(AluOp, AluClass)> {
    let pair = match op {
        Opcode::ADD => (AluOp::Add, AluClass::Generic),
        Opcode::SUB => (AluOp::Sub, AluClass::Generic),
        Opcode::MUL => (AluOp::Mul, AluClass::Generic),
        Opcode::DIV => (AluOp::Div, AluClass::Generic),
        Opcode::MOD => (AluOp::Mod, AluClass::Generic),
        Opcode::IADD => (AluOp::Add, AluClass::Int),
        Opcode::ISUB => (AluOp::Sub, AluClass::Int),
        Opcode::IMUL => (AluOp::Mul, AluClass::Int),
        Opcode::IDIV => (AluOp::Div, AluClass::Int),
        Opcode::IMOD => (AluOp::Mod, AluClass::Int),
        Opcode::FADD => (AluOp::Add, AluClass::Float),
        Opcode::FSUB => (AluOp::Sub, AluClass::Float),
        Opcode::FMUL => (AluOp::Mul, AluClass::Float),
        Opcode::FDIV => (AluOp::Div, AluClass::Float),
        Opcode::FMOD => (AluOp::Mod, AluClass::Float),
        _ => return None,
    };
    Some(pair)
}

/// The branch selector replacing a skip-form comparison whose taken edge is
/// `expected`: `EQ/LT/LE` with `A = expected` fuse with a following `JMP`
/// into one `CMPJMP`.
pub fn cmp_branch(cmp: Opcode, expected: bool) -> Option<CmpKind> {
    let kind = match (cmp, expected) {
        (Opcode::EQ, true) => CmpKind::Eq,
        (Opcode::EQ, false) => CmpKind::Ne,
        (Opcode::LT, true) => CmpKind::Lt,
        (Opcode::LT, false) => CmpKind::Ge,
        (Opcode::LE, true) => CmpKind::Le,
        (Opcode::LE, false) => CmpKind::Gt,
        _ => return None,
    };
    Some(kind)
}

/// The fused element compound-assignment opcode for an operator
/// (`a[i] = a[i] op v`).
pub const fn compound_index(op: AluOp) -> Opcode {
    match op {
        AluOp::Add => Opcode::GETADDSET,
        AluOp::Sub => Opcode::GETSUBSET,
        AluOp::Mul => Opcode::GETMULSET,
        AluOp::Div => Opcode::GETDIVSET,
        AluOp::Mod => Opcode::GETMODSET,
    }
}

/// The compound operator a fused element opcode denotes, if it is one.
pub fn compound_index_op(op: Opcode) -> Option<AluOp> {
    let alu = match op {
        Opcode::GETADDSET => AluOp::Add,
        Opcode::GETSUBSET => AluOp::Sub,
        Opcode::GETMULSET => AluOp::Mul,
        Opcode::GETDIVSET => AluOp::Div,
        Opcode::GETMODSET => AluOp::Mod,
        _ => return None,
    };
    Some(alu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_fused_row_decodes_to_its_operators() {
        for (first, second, fused, op1, op2, class) in TRIADIC_TABLE {
            assert_eq!(fuse_triadic(*first, *second), Some(*fused));
            assert_eq!(triadic_ops(*fused), Some((*op1, *op2, *class)));
        }
    }

    #[test]
    fn non_patterns_do_not_fuse() {
        assert_eq!(fuse_triadic(Opcode::ADD, Opcode::DIV), None);
        assert_eq!(fuse_triadic(Opcode::IADD, Opcode::FADD), None);
        assert_eq!(triadic_ops(Opcode::ADD), None);
    }

    #[test]
    fn cmp_branch_covers_both_polarities() {
        assert_eq!(cmp_branch(Opcode::LT, true), Some(CmpKind::Lt));
        assert_eq!(cmp_branch(Opcode::LT, false), Some(CmpKind::Ge));
        assert_eq!(cmp_branch(Opcode::JMP, true), None);
    }
}
