//! Round-trip tests over the packed operand fields and the byte
//! representation of instruction cells.

use crate::{
    op, CmpKind, Format, FuncId, Imm16, Instruction, Opcode, RegId, Simm16, Simm8,
};
use quickcheck_macros::quickcheck;
use strum::IntoEnumIterator;

#[test]
fn abc_fields_round_trip() {
    let insn = op::add(RegId::new(1), RegId::new(2), RegId::new(3));
    assert_eq!(insn.opcode(), Ok(Opcode::ADD));
    assert_eq!(insn.a(), RegId::new(1));
    assert_eq!(insn.b(), RegId::new(2));
    assert_eq!(insn.c(), RegId::new(3));
}

#[test]
fn abx_fields_round_trip() {
    let insn = op::loadk(RegId::new(7), Imm16::new(0x1234));
    assert_eq!(insn.opcode(), Ok(Opcode::LOADK));
    assert_eq!(insn.a(), RegId::new(7));
    assert_eq!(insn.bx(), Imm16::new(0x1234));
}

#[test]
fn asbx_preserves_sign() {
    let back = op::jmp(RegId::new(0), Simm16::new(-42));
    assert_eq!(back.sbx(), Simm16::new(-42));

    let forward = op::jmp(RegId::new(0), Simm16::new(i16::MAX));
    assert_eq!(forward.sbx(), Simm16::new(i16::MAX));
}

#[test]
fn ax_fields_round_trip() {
    let insn = op::muladd(RegId::new(4), RegId::new(5), RegId::new(6), RegId::new(7));
    assert_eq!(insn.opcode(), Ok(Opcode::MULADD));
    assert_eq!(insn.a(), RegId::new(4));
    assert_eq!(insn.b(), RegId::new(5));
    assert_eq!(insn.c(), RegId::new(6));
    assert_eq!(insn.d(), RegId::new(7));
}

#[test]
fn cmpjmp_carries_selector_and_offset() {
    let insn = op::cmpjmp(CmpKind::Ge, RegId::new(3), RegId::new(9), Simm8::new(-5));
    assert_eq!(insn.cmp_kind(), Ok(CmpKind::Ge));
    assert_eq!(insn.b(), RegId::new(3));
    assert_eq!(insn.c(), RegId::new(9));
    assert_eq!(insn.imm_d(), Simm8::new(-5));
}

#[test]
fn call_fields_round_trip() {
    let insn = op::call(RegId::new(2), FuncId::new(0xBEEF), 3, 1);
    assert_eq!(insn.opcode(), Ok(Opcode::CALL));
    assert_eq!(insn.a(), RegId::new(2));
    assert_eq!(insn.func(), FuncId::new(0xBEEF));
    assert_eq!(insn.nargs(), 3);
    assert_eq!(insn.nres(), 1);
}

#[test]
fn immediate_c_preserves_sign() {
    let insn = op::addimm(RegId::new(0), RegId::new(1), Simm8::new(-100));
    assert_eq!(insn.imm_c(), Simm8::new(-100));
}

#[test]
fn every_opcode_has_a_decodable_format() {
    for opcode in Opcode::iter() {
        // The format mapping is total; decoding a freshly packed cell of any
        // form must give back the opcode.
        let insn = match opcode.format() {
            Format::Abc => Instruction::abc(opcode, RegId::new(1), RegId::new(2), RegId::new(3)),
            Format::ABx => Instruction::abx(opcode, RegId::new(1), Imm16::new(44)),
            Format::AsBx => Instruction::asbx(opcode, RegId::new(1), Simm16::new(-44)),
            Format::Ax => {
                Instruction::ax(opcode, RegId::new(1), RegId::new(2), RegId::new(3), RegId::new(4))
            }
            Format::Call => Instruction::call(opcode, RegId::new(1), FuncId::new(9), 2, 1),
        };
        assert_eq!(insn.opcode(), Ok(opcode));
    }
}

#[quickcheck]
fn raw_cell_byte_round_trip(raw: u64) -> bool {
    let insn = Instruction::from_raw(raw);
    Instruction::from_bytes(insn.to_bytes()) == insn
}

#[quickcheck]
fn loadi_round_trips_any_small_literal(value: i16) -> bool {
    op::loadi(RegId::new(0), Simm16::new(value)).sbx() == Simm16::new(value)
}
