//! Fusion peepholes and late cleanups over freshly lowered function code.
//!
//! The pass decodes every branch to an absolute target, rewrites over that
//! form (pair fusion, triple fusion, jump threading, move collapsing and, in
//! release mode, dead-store elimination), then compacts the stream and
//! re-encodes the offsets. Cost changes; semantics never do.

use crate::lower::LoweredFunction;
use etch_asm::{
    cmp_branch, compound_index, fuse_triadic, op, Instruction, Opcode, RegId, Simm16,
    Simm8,
};
use itertools::Itertools;
use std::collections::HashSet;

struct Cell {
    insn: Instruction,
    /// Absolute branch target, when the instruction branches.
    target: Option<usize>,
    live: bool,
}

pub(crate) fn optimize(func: &mut LoweredFunction, release: bool) {
    let mut cells = decode(&func.code);
    let named: HashSet<u8> = func
        .lifetimes
        .iter()
        .map(|record| record.register)
        .collect();

    thread_jumps(&mut cells);
    let targets = target_set(&cells);
    fuse_cmp_jmp(&mut cells, &targets);
    fuse_triadics(&mut cells, &targets, &named);
    fold_immediates(&mut cells, &targets, &named);
    collapse_moves(&mut cells, &targets, &named);
    fuse_field_bumps(&mut cells, &targets, &named);
    fuse_index_compounds(&mut cells, &targets, &named);
    if release {
        let targets = target_set(&cells);
        eliminate_dead_stores(&mut cells, &targets, &named);
    }

    compact(func, cells);
}

fn decode(code: &[Instruction]) -> Vec<Cell> {
    code.iter()
        .enumerate()
        .map(|(pc, &insn)| Cell {
            insn,
            target: branch_target(pc, insn),
            live: true,
        })
        .collect()
}

fn branch_target(pc: usize, insn: Instruction) -> Option<usize> {
    let Ok(opcode) = insn.opcode() else {
        return None;
    };
    let offset = match opcode {
        Opcode::JMP
        | Opcode::FORPREP
        | Opcode::FORLOOP
        | Opcode::FORIPREP
        | Opcode::FORILOOP
        | Opcode::DEFER => i64::from(insn.sbx().0),
        Opcode::CMPJMP | Opcode::INCLT => i64::from(insn.imm_d().0),
        _ => return None,
    };
    usize::try_from(pc as i64 + 1 + offset).ok()
}

fn target_set(cells: &[Cell]) -> HashSet<usize> {
    cells
        .iter()
        .filter(|cell| cell.live)
        .filter_map(|cell| cell.target)
        .collect()
}

/// `jmp L1; L1: jmp L2` chains retarget straight to `L2`.
fn thread_jumps(cells: &mut [Cell]) {
    for i in 0..cells.len() {
        let Some(mut target) = cells[i].target else {
            continue;
        };
        let mut hops = 0;
        while hops < cells.len() {
            match cells.get(target) {
                Some(next)
                    if next.live
                        && next.insn.opcode() == Ok(Opcode::JMP)
                        && next.target.is_some()
                        && target != i =>
                {
                    target = next.target.expect("checked above");
                    hops += 1;
                }
                _ => break,
            }
        }
        cells[i].target = Some(target);
    }
}

/// `cmp; jmp` becomes one `CMPJMP` when nothing lands on the jump.
fn fuse_cmp_jmp(cells: &mut [Cell], targets: &HashSet<usize>) {
    for i in 0..cells.len().saturating_sub(1) {
        if !cells[i].live || !cells[i + 1].live || targets.contains(&(i + 1)) {
            continue;
        }
        let (first, second) = (cells[i].insn, cells[i + 1].insn);
        let (Ok(cmp), Ok(jump)) = (first.opcode(), second.opcode()) else {
            continue;
        };
        if jump != Opcode::JMP {
            continue;
        }
        // The jump executes when the comparison agrees with `A`.
        let Some(kind) = cmp_branch(cmp, first.a().to_u8() == 1) else {
            continue;
        };
        let Some(target) = cells[i + 1].target else {
            continue;
        };
        // The fused offset field is 8-bit; stay well inside it since
        // compaction only shrinks distances.
        let offset = target as i64 - (i as i64 + 1);
        if offset < -120 || offset > 120 {
            continue;
        }
        cells[i].insn =
            Instruction::cmp_off(Opcode::CMPJMP, kind, first.b(), first.c(), Simm8::new(0));
        cells[i].target = Some(target);
        cells[i + 1].live = false;
    }
}

/// `mul t,b,c; add a,t,d` with a dying temp becomes one fused triadic.
fn fuse_triadics(cells: &mut [Cell], targets: &HashSet<usize>, named: &HashSet<u8>) {
    for i in 0..cells.len().saturating_sub(1) {
        if !cells[i].live || !cells[i + 1].live || targets.contains(&(i + 1)) {
            continue;
        }
        let (first, second) = (cells[i].insn, cells[i + 1].insn);
        let (Ok(op1), Ok(op2)) = (first.opcode(), second.opcode()) else {
            continue;
        };
        let Some(fused) = fuse_triadic(op1, op2) else {
            continue;
        };
        let tmp = first.a().to_u8();
        if named.contains(&tmp) || read_after(cells, i + 1, tmp) {
            continue;
        }
        // The temp feeds the second instruction's B operand directly, or its
        // C operand when the second operator commutes.
        let commutative = matches!(
            etch_asm::triadic_ops(fused),
            Some((_, etch_asm::AluOp::Add | etch_asm::AluOp::Mul, _))
        );
        let fourth = if second.b().to_u8() == tmp && second.c().to_u8() != tmp {
            second.c()
        } else if commutative
            && second.c().to_u8() == tmp
            && second.b().to_u8() != tmp
        {
            second.b()
        } else {
            continue;
        };
        cells[i].insn = Instruction::ax(fused, second.a(), first.b(), first.c(), fourth);
        cells[i + 1].live = false;
    }
}

/// `loadi t, k; op a, b, t` folds into the immediate-arithmetic form when the
/// literal fits eight bits and the temp dies.
fn fold_immediates(cells: &mut [Cell], targets: &HashSet<usize>, named: &HashSet<u8>) {
    for i in 0..cells.len().saturating_sub(1) {
        if !cells[i].live || !cells[i + 1].live || targets.contains(&(i + 1)) {
            continue;
        }
        let (first, second) = (cells[i].insn, cells[i + 1].insn);
        if first.opcode() != Ok(Opcode::LOADI) {
            continue;
        }
        let Ok(value) = i8::try_from(first.sbx().0) else {
            continue;
        };
        let Ok(opcode) = second.opcode() else {
            continue;
        };
        let imm_form = match opcode {
            Opcode::ADD | Opcode::IADD => Opcode::ADDIMM,
            Opcode::SUB | Opcode::ISUB => Opcode::SUBIMM,
            Opcode::MUL | Opcode::IMUL => Opcode::MULIMM,
            Opcode::DIV | Opcode::IDIV => Opcode::DIVIMM,
            Opcode::MOD | Opcode::IMOD => Opcode::MODIMM,
            _ => continue,
        };
        let tmp = first.a().to_u8();
        if named.contains(&tmp)
            || second.c().to_u8() != tmp
            || second.b().to_u8() == tmp
            || read_after(cells, i + 1, tmp)
        {
            continue;
        }
        cells[i].insn =
            Instruction::abc_imm(imm_form, second.a(), second.b(), Simm8::new(value));
        cells[i + 1].live = false;
    }
}

/// `move a,b; move c,a` with a dying middle register collapses to one copy.
fn collapse_moves(cells: &mut [Cell], targets: &HashSet<usize>, named: &HashSet<u8>) {
    for i in 0..cells.len().saturating_sub(1) {
        if !cells[i].live || !cells[i + 1].live || targets.contains(&(i + 1)) {
            continue;
        }
        let (first, second) = (cells[i].insn, cells[i + 1].insn);
        if first.opcode() != Ok(Opcode::MOVE) || second.opcode() != Ok(Opcode::MOVE) {
            continue;
        }
        let tmp = first.a().to_u8();
        if named.contains(&tmp)
            || second.b().to_u8() != tmp
            || read_after(cells, i + 1, tmp)
        {
            continue;
        }
        cells[i].insn = op::mov(second.a(), first.b(), RegId::new(0));
        cells[i + 1].live = false;
    }
}

/// `getfld t,o,k; addimm u,t,imm; setfld o,k,u` becomes one `FLDADDI`.
fn fuse_field_bumps(cells: &mut [Cell], targets: &HashSet<usize>, named: &HashSet<u8>) {
    for i in 0..cells.len().saturating_sub(2) {
        if !(cells[i].live && cells[i + 1].live && cells[i + 2].live)
            || targets.contains(&(i + 1))
            || targets.contains(&(i + 2))
        {
            continue;
        }
        let (load, bump, store) = (cells[i].insn, cells[i + 1].insn, cells[i + 2].insn);
        if load.opcode() != Ok(Opcode::GETFLD)
            || bump.opcode() != Ok(Opcode::ADDIMM)
            || store.opcode() != Ok(Opcode::SETFLD)
        {
            continue;
        }
        let obj = load.b().to_u8();
        let key = load.c().to_u8();
        let loaded = load.a().to_u8();
        let bumped = bump.a().to_u8();
        let same_site = store.a().to_u8() == obj
            && store.b().to_u8() == key
            && store.c().to_u8() == bumped
            && bump.b().to_u8() == loaded;
        if !same_site
            || named.contains(&loaded)
            || named.contains(&bumped)
            || read_after(cells, i + 2, loaded)
            || read_after(cells, i + 2, bumped)
        {
            continue;
        }
        cells[i].insn = op::fldaddi(RegId::new(obj), key, bump.imm_c());
        cells[i + 1].live = false;
        cells[i + 2].live = false;
    }
}

/// `getidx t,a,i; op u,t,v; setidx a,i,u` becomes one fused element
/// compound-assignment.
fn fuse_index_compounds(cells: &mut [Cell], targets: &HashSet<usize>, named: &HashSet<u8>) {
    for i in 0..cells.len().saturating_sub(2) {
        if !(cells[i].live && cells[i + 1].live && cells[i + 2].live)
            || targets.contains(&(i + 1))
            || targets.contains(&(i + 2))
        {
            continue;
        }
        let (load, compute, store) =
            (cells[i].insn, cells[i + 1].insn, cells[i + 2].insn);
        if load.opcode() != Ok(Opcode::GETIDX) || store.opcode() != Ok(Opcode::SETIDX) {
            continue;
        }
        let Some((alu, _)) = compute.opcode().ok().and_then(etch_asm::alu_binop) else {
            continue;
        };
        let arr = load.b().to_u8();
        let index = load.c().to_u8();
        let loaded = load.a().to_u8();
        let computed = compute.a().to_u8();
        let operand = compute.c();
        let same_site = compute.b().to_u8() == loaded
            && store.a().to_u8() == arr
            && store.b().to_u8() == index
            && store.c().to_u8() == computed;
        if !same_site
            || operand.to_u8() == loaded
            || named.contains(&loaded)
            || named.contains(&computed)
            || read_after(cells, i + 2, loaded)
            || read_after(cells, i + 2, computed)
        {
            continue;
        }
        cells[i].insn = Instruction::ax(
            compound_index(alu),
            RegId::new(arr),
            RegId::new(index),
            operand,
            RegId::new(0),
        );
        cells[i + 1].live = false;
        cells[i + 2].live = false;
    }
}

/// Remove pure stores into registers nothing ever reads.
fn eliminate_dead_stores(
    cells: &mut [Cell],
    targets: &HashSet<usize>,
    named: &HashSet<u8>,
) {
    let read_anywhere: HashSet<u8> = cells
        .iter()
        .filter(|cell| cell.live)
        .flat_map(|cell| reg_reads(cell.insn))
        .collect();
    for i in 0..cells.len() {
        if !cells[i].live || targets.contains(&i) {
            continue;
        }
        let insn = cells[i].insn;
        let pure = matches!(
            insn.opcode(),
            Ok(Opcode::MOVE)
                | Ok(Opcode::LOADI)
                | Ok(Opcode::LOADK)
                | Ok(Opcode::LOADNONE)
                | Ok(Opcode::GETGLOB)
        ) || (insn.opcode() == Ok(Opcode::LOADBOOL) && insn.c().to_u8() == 0);
        if !pure {
            continue;
        }
        let dst = insn.a().to_u8();
        if !named.contains(&dst) && !read_anywhere.contains(&dst) {
            cells[i].live = false;
        }
    }
}

/// Whether `reg` is read by any live instruction after `after`.
fn read_after(cells: &[Cell], after: usize, reg: u8) -> bool {
    cells
        .iter()
        .skip(after + 1)
        .filter(|cell| cell.live)
        .any(|cell| reg_reads(cell.insn).contains(&reg))
}

/// Registers an instruction reads, over-approximated where an operand field
/// is conditionally meaningful. The rewrites above only ever use it to prove
/// a register dead, so erring toward more reads is safe.
fn reg_reads(insn: Instruction) -> Vec<u8> {
    use Opcode::*;

    let Ok(opcode) = insn.opcode() else {
        return Vec::new();
    };
    let a = insn.a().to_u8();
    let b = insn.b().to_u8();
    let c = insn.c().to_u8();
    let d = insn.d().to_u8();
    match opcode {
        MOVE | NEG | NOT | REFNEW | REFGET | WEAKNEW | GETIDXI | GETFLD | LEN
        | WRAPSOME | WRAPOK | WRAPERR | UNWRAPOPT | UNWRAPRES | CAST | TESTSET
        | CHANRECV => vec![b],
        LOADK | LOADI | LOADNIL | LOADBOOL | LOADNONE | GETGLOB | NEWARR | NEWTAB
        | CHANNEW | JMP | DEFER | DEFEREND | TRAP => Vec::new(),
        SETGLOB | TEST | TESTTAG | FLDADDI | FORIPREP | FORPREP => vec![a],
        ADD | SUB | MUL | DIV | MOD | POW | IADD | ISUB | IMUL | IDIV | IMOD
        | FADD | FSUB | FMUL | FDIV | FMOD | EQ | LT | LE | EQS | NES | LTS | LES
        | AND | OR | IN | NOTIN | GETIDX | CMPJMP => vec![b, c],
        ADDIMM | SUBIMM | MULIMM | DIVIMM | MODIMM | ANDIMM | ORIMM => vec![b],
        REFSET | SETIDXI | CHANSEND => vec![a, b],
        SETIDX | SETFLD | GETADDSET | GETSUBSET | GETMULSET | GETDIVSET
        | GETMODSET => vec![a, b, c],
        SLICE => vec![b, c, d],
        ADDADD | MULADD | SUBSUB | SUBMUL | MULSUB | DIVADD | ADDSUB | ADDMUL
        | SUBDIV | IADDADD | IMULADD | ISUBSUB | ISUBMUL | IMULSUB | IDIVADD
        | IADDSUB | IADDMUL | ISUBDIV | FADDADD | FMULADD | FSUBSUB | FSUBMUL
        | FMULSUB | FDIVADD | FADDSUB | FADDMUL | FSUBDIV => vec![b, c, d],
        FORLOOP | FORILOOP | INCLT => vec![a, a.saturating_add(1), b],
        RET => {
            if a > 0 {
                vec![b]
            } else {
                Vec::new()
            }
        }
        CALL | CALLB | CALLH | CALLF | SPAWN | CLOSURE => {
            (0..insn.nargs()).map(|i| a + 1 + i).collect()
        }
        CALLC => std::iter::once(a)
            .chain((0..insn.nargs()).map(|i| a + 1 + i))
            .collect(),
        RESUME => {
            let mut reads = vec![b];
            if c > 0 {
                reads.push(c - 1);
            }
            reads
        }
        YIELD => {
            if c != 0 {
                vec![b]
            } else {
                Vec::new()
            }
        }
    }
}

/// Drop dead cells, remap branch targets, re-encode offsets, and rewrite the
/// debug and lifetime PCs.
fn compact(func: &mut LoweredFunction, cells: Vec<Cell>) {
    let mut new_pc = vec![0u32; cells.len() + 1];
    let mut next = 0u32;
    for (pc, cell) in cells.iter().enumerate() {
        new_pc[pc] = next;
        if cell.live {
            next += 1;
        }
    }
    new_pc[cells.len()] = next;

    let mut code = Vec::with_capacity(next as usize);
    for (pc, cell) in cells.iter().enumerate() {
        if !cell.live {
            continue;
        }
        let mut insn = cell.insn;
        if let Some(target) = cell.target {
            let here = new_pc[pc] as i64;
            let target = new_pc[target.min(cells.len())] as i64;
            let offset = target - (here + 1);
            insn = reencode_branch(insn, offset);
        }
        code.push(insn);
    }
    func.code = code;

    for record in &mut func.lifetimes {
        record.start_pc = new_pc[record.start_pc as usize];
        record.end_pc = new_pc[(record.end_pc as usize).min(cells.len())];
        record.def_pc = new_pc[record.def_pc as usize];
    }
    func.debug = func
        .debug
        .iter()
        .map(|&(pc, pos)| (new_pc[(pc as usize).min(cells.len())], pos))
        .dedup_by(|a, b| a.0 == b.0)
        .collect();
}

fn reencode_branch(insn: Instruction, offset: i64) -> Instruction {
    let opcode = insn.opcode().expect("branch cells decode");
    match opcode {
        Opcode::CMPJMP | Opcode::INCLT => {
            let offset = i8::try_from(offset)
                .expect("fusion kept the offset inside the 8-bit field");
            let mut raw = insn.raw();
            raw = (raw & !0xFF00_0000) | ((offset as u8 as u64) << 24);
            Instruction::from_raw(raw)
        }
        _ => {
            let offset =
                i16::try_from(offset).expect("compaction only shrinks distances");
            Instruction::asbx(opcode, insn.a(), Simm16::new(offset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::LoweredFunction;
    use etch_asm::CmpKind;

    fn lowered(code: Vec<Instruction>) -> LoweredFunction {
        LoweredFunction {
            code,
            lifetimes: Vec::new(),
            debug: Vec::new(),
            max_registers: 8,
            propagates: None,
        }
    }

    #[test]
    fn cmp_jmp_pairs_fuse() {
        let mut func = lowered(vec![
            op::lt(RegId::new(1), RegId::new(0), RegId::new(1)),
            op::jmp(RegId::new(0), Simm16::new(2)),
            op::loadi(RegId::new(2), Simm16::new(1)),
            op::loadi(RegId::new(3), Simm16::new(2)),
            op::ret(RegId::new(0), RegId::new(0), RegId::new(0)),
        ]);
        optimize(&mut func, false);
        assert_eq!(func.code[0].opcode(), Ok(Opcode::CMPJMP));
        assert_eq!(func.code[0].cmp_kind(), Ok(CmpKind::Lt));
        assert_eq!(func.code.len(), 4);
        // Old target pc 4 is now pc 3; offset from pc 1.
        assert_eq!(func.code[0].imm_d(), Simm8::new(2));
    }

    #[test]
    fn mul_add_fuses_when_the_temp_dies() {
        let mut func = lowered(vec![
            op::imul(RegId::new(4), RegId::new(0), RegId::new(1)),
            op::iadd(RegId::new(5), RegId::new(4), RegId::new(2)),
            op::ret(RegId::new(1), RegId::new(5), RegId::new(0)),
        ]);
        optimize(&mut func, false);
        assert_eq!(func.code.len(), 2);
        assert_eq!(func.code[0].opcode(), Ok(Opcode::IMULADD));
        assert_eq!(func.code[0].a(), RegId::new(5));
        assert_eq!(func.code[0].b(), RegId::new(0));
        assert_eq!(func.code[0].c(), RegId::new(1));
        assert_eq!(func.code[0].d(), RegId::new(2));
    }

    #[test]
    fn live_temps_do_not_fuse() {
        let mut func = lowered(vec![
            op::imul(RegId::new(4), RegId::new(0), RegId::new(1)),
            op::iadd(RegId::new(5), RegId::new(4), RegId::new(2)),
            // The temp is read again here, so the pair must survive.
            op::ret(RegId::new(1), RegId::new(4), RegId::new(0)),
        ]);
        optimize(&mut func, false);
        assert_eq!(func.code.len(), 3);
        assert_eq!(func.code[0].opcode(), Ok(Opcode::IMUL));
    }

    #[test]
    fn loadi_folds_into_immediate_arithmetic() {
        let mut func = lowered(vec![
            op::loadi(RegId::new(3), Simm16::new(7)),
            op::iadd(RegId::new(4), RegId::new(0), RegId::new(3)),
            op::ret(RegId::new(1), RegId::new(4), RegId::new(0)),
        ]);
        optimize(&mut func, false);
        assert_eq!(func.code.len(), 2);
        assert_eq!(func.code[0].opcode(), Ok(Opcode::ADDIMM));
        assert_eq!(func.code[0].imm_c(), Simm8::new(7));
    }

    #[test]
    fn jump_chains_thread_to_the_final_target() {
        let mut func = lowered(vec![
            op::jmp(RegId::new(0), Simm16::new(1)),
            op::loadi(RegId::new(0), Simm16::new(1)),
            op::jmp(RegId::new(0), Simm16::new(1)),
            op::loadi(RegId::new(0), Simm16::new(2)),
            op::ret(RegId::new(0), RegId::new(0), RegId::new(0)),
        ]);
        optimize(&mut func, false);
        // First jump now lands on the return directly.
        let target = 0 + 1 + i64::from(func.code[0].sbx().0);
        assert_eq!(func.code[target as usize].opcode(), Ok(Opcode::RET));
    }

    #[test]
    fn release_mode_drops_unread_stores() {
        let mut func = lowered(vec![
            op::loadi(RegId::new(6), Simm16::new(9)),
            op::loadi(RegId::new(0), Simm16::new(1)),
            op::ret(RegId::new(1), RegId::new(0), RegId::new(0)),
        ]);
        optimize(&mut func, true);
        assert_eq!(func.code.len(), 2);
        assert_eq!(func.code[0].sbx(), Simm16::new(1));
    }

    #[test]
    fn debug_mode_keeps_stores() {
        let mut func = lowered(vec![
            op::loadi(RegId::new(6), Simm16::new(9)),
            op::ret(RegId::new(0), RegId::new(0), RegId::new(0)),
        ]);
        optimize(&mut func, false);
        assert_eq!(func.code.len(), 2);
    }
}
