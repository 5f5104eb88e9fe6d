//! Match lowering: pattern trees become decision trees of tag tests,
//! comparisons, jumps and binds. Arms are tried top to bottom; the first
//! match wins; a fall-through past every arm traps.

use super::Lowerer;
use crate::{
    ast::{Expr, MatchArm, Pattern, Pos},
    CompileError, ErrorKind,
};
use etch_asm::{op, PanicReason, RegId, Simm8, ValueTag};
use etch_bytecode::{type_id, Constant};

impl<'a> Lowerer<'a> {
    pub(super) fn lower_match(
        &mut self,
        scrutinee: &Expr,
        arms: &[MatchArm],
        pos: Pos,
    ) -> Result<(), CompileError> {
        let value = self.lower_expr(scrutinee, pos)?;
        let mut end_patches = Vec::new();

        for arm in arms {
            self.push_scope();
            let mut fail_patches = Vec::new();
            self.lower_pattern(&arm.pattern, value, &mut fail_patches, pos)?;
            if let Some(guard) = &arm.guard {
                let guard_reg = self.lower_expr(guard, pos)?;
                // Skip the fail jump when the guard holds.
                self.emit(
                    op::test(RegId::new(guard_reg), RegId::new(0), RegId::new(0)),
                    pos,
                );
                self.free_temp(guard_reg);
                fail_patches.push(self.emit_jump_placeholder(pos));
            }
            self.lower_block(&arm.body)?;
            end_patches.push(self.emit_jump_placeholder(pos));
            self.pop_scope();
            for patch in fail_patches {
                self.patch_jump_to_here(patch)?;
            }
        }

        // The type checker owes exhaustiveness; a value no arm accepts is a
        // VM panic, not silence.
        self.emit(
            op::trap(
                RegId::new(PanicReason::UnmatchedPattern as u8),
                RegId::new(0),
                RegId::new(0),
            ),
            pos,
        );
        for patch in end_patches {
            self.patch_jump_to_here(patch)?;
        }
        self.free_temp(value);
        Ok(())
    }

    /// Emit the tests and binds for one pattern. On mismatch, control flows
    /// through one of `fail_patches`.
    fn lower_pattern(
        &mut self,
        pattern: &Pattern,
        value: u8,
        fail_patches: &mut Vec<usize>,
        pos: Pos,
    ) -> Result<(), CompileError> {
        match pattern {
            Pattern::Wildcard => {}
            Pattern::Bind(name) => {
                let reg = self.declare_var(name, pos)?;
                self.emit(
                    op::mov(RegId::new(reg), RegId::new(value), RegId::new(0)),
                    pos,
                );
            }
            Pattern::Literal(literal) => {
                let lit_reg = self.lower_expr(literal, pos)?;
                // Skip the fail jump when the values are equal.
                self.emit(
                    op::eq(RegId::new(0), RegId::new(value), RegId::new(lit_reg)),
                    pos,
                );
                self.free_temp(lit_reg);
                fail_patches.push(self.emit_jump_placeholder(pos));
            }
            Pattern::Range { lo, hi } => {
                let lo_reg = self.load_const(Constant::Int(*lo), pos)?;
                self.emit(
                    op::le(RegId::new(0), RegId::new(lo_reg), RegId::new(value)),
                    pos,
                );
                self.free_temp(lo_reg);
                fail_patches.push(self.emit_jump_placeholder(pos));
                let hi_reg = self.load_const(Constant::Int(*hi), pos)?;
                self.emit(
                    op::le(RegId::new(0), RegId::new(value), RegId::new(hi_reg)),
                    pos,
                );
                self.free_temp(hi_reg);
                fail_patches.push(self.emit_jump_placeholder(pos));
            }
            Pattern::None => {
                self.emit_tag_test(value, ValueTag::None, fail_patches, pos);
            }
            Pattern::Some(inner) => {
                self.emit_tag_test(value, ValueTag::Some, fail_patches, pos);
                let unwrapped = self.alloc_temp(pos)?;
                self.emit(
                    op::unwrapopt(RegId::new(unwrapped), RegId::new(value), RegId::new(0)),
                    pos,
                );
                self.lower_pattern(inner, unwrapped, fail_patches, pos)?;
                self.free_temp(unwrapped);
            }
            Pattern::Ok(inner) => {
                self.emit_tag_test(value, ValueTag::Ok, fail_patches, pos);
                let unwrapped = self.alloc_temp(pos)?;
                self.emit(
                    op::unwrapres(RegId::new(unwrapped), RegId::new(value), RegId::new(0)),
                    pos,
                );
                self.lower_pattern(inner, unwrapped, fail_patches, pos)?;
                self.free_temp(unwrapped);
            }
            Pattern::Err(inner) => {
                self.emit_tag_test(value, ValueTag::Err, fail_patches, pos);
                let unwrapped = self.alloc_temp(pos)?;
                // C=1 selects the error payload.
                self.emit(
                    op::unwrapres(RegId::new(unwrapped), RegId::new(value), RegId::new(1)),
                    pos,
                );
                self.lower_pattern(inner, unwrapped, fail_patches, pos)?;
                self.free_temp(unwrapped);
            }
            Pattern::Enum {
                type_name,
                value: variant,
            } => {
                let lit = self.load_const(
                    Constant::Enum {
                        type_id: type_id(type_name),
                        value: *variant,
                        display: None,
                    },
                    pos,
                )?;
                self.emit(
                    op::eq(RegId::new(0), RegId::new(value), RegId::new(lit)),
                    pos,
                );
                self.free_temp(lit);
                fail_patches.push(self.emit_jump_placeholder(pos));
            }
            Pattern::TypeWithBind { tag, name } => {
                self.emit_tag_test(value, *tag, fail_patches, pos);
                let reg = self.declare_var(name, pos)?;
                self.emit(
                    op::mov(RegId::new(reg), RegId::new(value), RegId::new(0)),
                    pos,
                );
            }
            Pattern::Tuple(items) => {
                for (i, item) in items.iter().enumerate() {
                    let index = i8::try_from(i).map_err(|_| {
                        CompileError::new(ErrorKind::TooLarge, pos, "tuple too wide")
                    })?;
                    let element = self.alloc_temp(pos)?;
                    self.emit(
                        op::getidxi(
                            RegId::new(element),
                            RegId::new(value),
                            Simm8::new(index),
                        ),
                        pos,
                    );
                    self.lower_pattern(item, element, fail_patches, pos)?;
                    self.free_temp(element);
                }
            }
            Pattern::ArraySpread { head, rest, tail } => {
                self.lower_array_spread(head, rest.as_deref(), tail, value, fail_patches, pos)?;
            }
            Pattern::As { pattern, name } => {
                self.lower_pattern(pattern, value, fail_patches, pos)?;
                let reg = self.declare_var(name, pos)?;
                self.emit(
                    op::mov(RegId::new(reg), RegId::new(value), RegId::new(0)),
                    pos,
                );
            }
            Pattern::Or(alternatives) => {
                // Alternatives are tried left to right; the first success
                // jumps to the shared continuation.
                let mut success_patches = Vec::new();
                let mut pending: Vec<usize> = Vec::new();
                for (i, alternative) in alternatives.iter().enumerate() {
                    for patch in pending.drain(..) {
                        self.patch_jump_to_here(patch)?;
                    }
                    let last = i + 1 == alternatives.len();
                    let mut local_fails = Vec::new();
                    self.lower_pattern(alternative, value, &mut local_fails, pos)?;
                    if last {
                        fail_patches.extend(local_fails);
                    } else {
                        success_patches.push(self.emit_jump_placeholder(pos));
                        pending = local_fails;
                    }
                }
                for patch in success_patches {
                    self.patch_jump_to_here(patch)?;
                }
            }
        }
        Ok(())
    }

    fn lower_array_spread(
        &mut self,
        head: &[Pattern],
        rest: Option<&str>,
        tail: &[Pattern],
        value: u8,
        fail_patches: &mut Vec<usize>,
        pos: Pos,
    ) -> Result<(), CompileError> {
        let needed = (head.len() + tail.len()) as i64;
        let len_reg = self.alloc_temp(pos)?;
        self.emit(
            op::len(RegId::new(len_reg), RegId::new(value), RegId::new(0)),
            pos,
        );
        let needed_reg = self.load_const(Constant::Int(needed), pos)?;
        // Without a rest binding the length must match exactly; with one it
        // only needs to cover the fixed elements.
        let length_test = if rest.is_some() {
            op::le(RegId::new(0), RegId::new(needed_reg), RegId::new(len_reg))
        } else {
            op::eq(RegId::new(0), RegId::new(len_reg), RegId::new(needed_reg))
        };
        self.emit(length_test, pos);
        self.free_temp(needed_reg);
        fail_patches.push(self.emit_jump_placeholder(pos));

        for (i, item) in head.iter().enumerate() {
            let index = i8::try_from(i).map_err(|_| {
                CompileError::new(ErrorKind::TooLarge, pos, "array pattern too wide")
            })?;
            let element = self.alloc_temp(pos)?;
            self.emit(
                op::getidxi(RegId::new(element), RegId::new(value), Simm8::new(index)),
                pos,
            );
            self.lower_pattern(item, element, fail_patches, pos)?;
            self.free_temp(element);
        }

        // Tail elements index back from the length.
        for (i, item) in tail.iter().enumerate() {
            let offset = (tail.len() - i) as i64;
            let index_reg = self.alloc_temp(pos)?;
            let offset_reg = self.load_const(Constant::Int(offset), pos)?;
            self.emit(
                op::isub(
                    RegId::new(index_reg),
                    RegId::new(len_reg),
                    RegId::new(offset_reg),
                ),
                pos,
            );
            self.free_temp(offset_reg);
            let element = self.alloc_temp(pos)?;
            self.emit(
                op::getidx(
                    RegId::new(element),
                    RegId::new(value),
                    RegId::new(index_reg),
                ),
                pos,
            );
            self.free_temp(index_reg);
            self.lower_pattern(item, element, fail_patches, pos)?;
            self.free_temp(element);
        }

        if let Some(rest) = rest {
            let lo = self.load_const(Constant::Int(head.len() as i64), pos)?;
            let hi = self.alloc_temp(pos)?;
            let tail_len = self.load_const(Constant::Int(tail.len() as i64), pos)?;
            self.emit(
                op::isub(RegId::new(hi), RegId::new(len_reg), RegId::new(tail_len)),
                pos,
            );
            self.free_temp(tail_len);
            let reg = self.declare_var(rest, pos)?;
            self.emit(
                op::slice(
                    RegId::new(reg),
                    RegId::new(value),
                    RegId::new(lo),
                    RegId::new(hi),
                ),
                pos,
            );
            self.free_temp(hi);
            self.free_temp(lo);
        }
        self.free_temp(len_reg);
        Ok(())
    }

    /// `skip the fail jump when tag(value) == tag`.
    fn emit_tag_test(
        &mut self,
        value: u8,
        tag: ValueTag,
        fail_patches: &mut Vec<usize>,
        pos: Pos,
    ) {
        self.emit(
            op::testtag(RegId::new(value), RegId::new(tag as u8), RegId::new(0)),
            pos,
        );
        fail_patches.push(self.emit_jump_placeholder(pos));
    }
}
