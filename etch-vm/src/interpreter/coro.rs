//! Coroutine and channel handlers, plus the cleanup machinery the heap's
//! pending queue feeds.

use super::Interpreter;
use crate::{
    call::{CallFrame, PendingExit},
    coroutine::{Coroutine, CoroutineState},
    error::SimpleResult,
    state::ExecuteState,
    value::{HeapId, Value},
};
use etch_asm::{Instruction, Opcode, PanicReason, RegId};
use etch_bytecode::FunctionKind;

impl Interpreter {
    pub(super) fn op_coro(&mut self, opcode: Opcode, insn: Instruction) -> SimpleResult<()> {
        match opcode {
            Opcode::SPAWN => self.op_spawn(insn),
            Opcode::RESUME => self.op_resume(insn),
            Opcode::YIELD => self.op_yield(insn),
            Opcode::CHANNEW => {
                let id = self.heap_mut().alloc_channel(insn.bx().0 as usize)?;
                self.write_reg_owned(insn.a(), Value::Ref(id));
                Ok(())
            }
            Opcode::CHANSEND => self.op_chansend(insn),
            Opcode::CHANRECV => self.op_chanrecv(insn),
            _ => Err(PanicReason::InvalidInstruction),
        }
    }

    fn op_spawn(&mut self, insn: Instruction) -> SimpleResult<()> {
        let func = insn.func().to_u16();
        let desc = self
            .program()
            .functions
            .get(func)
            .ok_or(PanicReason::MissingFunction)?;
        if desc.kind != FunctionKind::Native {
            return Err(PanicReason::MissingFunction);
        }
        let entry = desc.entry;
        let max_registers = desc.max_registers;

        let base = insn.a().to_u8();
        let args: Vec<Value> = (0..insn.nargs())
            .map(|i| self.reg_cloned(RegId::new(base + 1 + i)))
            .collect();
        for arg in &args {
            self.heap_mut().retain(arg);
        }
        let coroutine = Coroutine::new(func, entry, args, max_registers);
        let id = self.heap_mut().alloc_coroutine(coroutine)?;
        self.write_reg_owned(insn.a(), Value::Coroutine(id));
        Ok(())
    }

    fn op_resume(&mut self, insn: Instruction) -> SimpleResult<()> {
        let id = match self.reg(insn.b()) {
            Value::Coroutine(id) => *id,
            _ => return Err(PanicReason::CoroutineMisuse),
        };
        if self.active_coroutine() == Some(id) {
            return Err(PanicReason::CoroutineMisuse);
        }
        let resume_arg = match insn.c().to_u8() {
            0 => None,
            reg => Some(self.reg_cloned(RegId::new(reg - 1))),
        };

        let state = self.heap().coroutine(id)?.state;
        match state {
            CoroutineState::Dead | CoroutineState::Cleanup => {
                // A finished coroutine replays its final value; nothing runs.
                let result = self.heap().coroutine(id)?.result.clone();
                self.write_reg(insn.a(), result);
                Ok(())
            }
            CoroutineState::Running => Err(PanicReason::CoroutineMisuse),
            CoroutineState::Ready | CoroutineState::Suspended => {
                let ret_pc = self.pc();
                let coroutine = self.heap_mut().coroutine_mut(id)?;
                let registers = std::mem::take(&mut coroutine.registers);
                let defers = std::mem::take(&mut coroutine.defers);
                let func = coroutine.func;
                let resume_pc = coroutine.resume_pc;
                let yield_dst = coroutine.yield_dst;
                let at_yield = state == CoroutineState::Suspended
                    && coroutine.parked_on.is_none();
                coroutine.state = CoroutineState::Running;

                let frame = CallFrame {
                    func,
                    registers,
                    ret_pc,
                    dst: insn.a(),
                    wants_result: true,
                    defers,
                    coroutine: Some(id),
                    dtor_of: None,
                    exiting: None,
                };
                self.push_frame(frame)?;
                self.set_pc(resume_pc);
                if at_yield {
                    self.write_reg(yield_dst, resume_arg.unwrap_or(Value::Nil));
                }
                Ok(())
            }
        }
    }

    fn op_yield(&mut self, insn: Instruction) -> SimpleResult<()> {
        let Some(id) = self.frame().coroutine else {
            return Err(match self.active_coroutine() {
                // Yield out of a nested call inside a coroutine: the state
                // machine is stackless, only the coroutine body may yield.
                Some(_) => PanicReason::CoroutineMisuse,
                None => PanicReason::YieldOutsideCoroutine,
            });
        };
        let value = if insn.c().to_u8() != 0 {
            self.reg_cloned(insn.b())
        } else {
            Value::Nil
        };

        let frame = self.pop_frame();
        let resume_pc = self.pc();
        let old_yield = {
            let coroutine = self.heap_mut().coroutine_mut(id)?;
            coroutine.registers = frame.registers;
            coroutine.defers = frame.defers;
            coroutine.resume_pc = resume_pc;
            coroutine.yield_dst = insn.a();
            coroutine.state = CoroutineState::Suspended;
            coroutine.parked_on = None;
            std::mem::replace(&mut coroutine.last_yield, value.clone())
        };
        self.heap_mut().retain(&value);
        self.heap_mut().release(&old_yield);

        self.set_pc(frame.ret_pc);
        if frame.wants_result {
            self.write_reg(frame.dst, value);
        }
        Ok(())
    }

    fn op_chansend(&mut self, insn: Instruction) -> SimpleResult<()> {
        let chan = self.channel_handle(insn.a())?;
        let value = self.reg_cloned(insn.b());
        if self.heap_mut().channel_mut(chan)?.is_full() {
            return self.park_on_channel(chan, ParkSide::Sender);
        }
        self.heap_mut().retain(&value);
        self.heap_mut()
            .channel_mut(chan)?
            .offer(value)
            .map_err(|_| PanicReason::TypeMismatch)?;
        let _ = self.heap_mut().channel_mut(chan)?.wake_receiver();
        Ok(())
    }

    fn op_chanrecv(&mut self, insn: Instruction) -> SimpleResult<()> {
        let chan = self.channel_handle(insn.b())?;
        match self.heap_mut().channel_mut(chan)?.poll() {
            Some(value) => {
                let _ = self.heap_mut().channel_mut(chan)?.wake_sender();
                // Ownership moves from the queue into the register.
                self.write_reg_owned(insn.a(), value);
                Ok(())
            }
            None => self.park_on_channel(chan, ParkSide::Receiver),
        }
    }

    fn channel_handle(&mut self, reg: RegId) -> SimpleResult<HeapId> {
        let id = match self.reg(reg) {
            Value::Ref(id) => *id,
            Value::Nil => return Err(PanicReason::NilDeref),
            _ => return Err(PanicReason::TypeMismatch),
        };
        self.heap_mut().channel_mut(id)?;
        Ok(id)
    }

    /// Suspend the active coroutine on a channel, arranging for the channel
    /// instruction to re-execute at its next resume. On the main thread a
    /// blocking channel operation can never be woken, so it panics instead.
    fn park_on_channel(&mut self, chan: HeapId, side: ParkSide) -> SimpleResult<()> {
        let Some(id) = self.frame().coroutine else {
            return Err(PanicReason::CoroutineMisuse);
        };
        // The channel instruction itself is the resume label.
        let retry_pc = self.pc() - 1;
        let frame = self.pop_frame();
        {
            let coroutine = self.heap_mut().coroutine_mut(id)?;
            coroutine.registers = frame.registers;
            coroutine.defers = frame.defers;
            coroutine.resume_pc = retry_pc;
            coroutine.state = CoroutineState::Suspended;
            coroutine.parked_on = Some(chan);
        }
        let channel = self.heap_mut().channel_mut(chan)?;
        match side {
            ParkSide::Sender => channel.park_sender(id),
            ParkSide::Receiver => channel.park_receiver(id),
        }

        self.set_pc(frame.ret_pc);
        if frame.wants_result {
            self.write_reg(frame.dst, Value::Nil);
        }
        Ok(())
    }

    /// A coroutine's top frame returned: record the result, mark it dead and
    /// hand the value to the resumer.
    pub(super) fn finish_coroutine(
        &mut self,
        id: HeapId,
        frame: CallFrame,
        value: Value,
    ) -> SimpleResult<ExecuteState> {
        let old_result = {
            let coroutine = self.heap_mut().coroutine_mut(id)?;
            coroutine.state = CoroutineState::Dead;
            coroutine.parked_on = None;
            std::mem::replace(&mut coroutine.result, value.clone())
        };
        self.heap_mut().release(&old_result);

        self.set_pc(frame.ret_pc);
        if frame.wants_result {
            self.write_reg(frame.dst, value);
        }
        // The handle may have been dropped while the coroutine ran.
        if self
            .heap()
            .slot(id)
            .map(|slot| slot.strong() == 0)
            .unwrap_or(false)
        {
            self.kill_coroutine(id)?;
        }
        Ok(ExecuteState::Proceed)
    }

    /// Mark a coroutine dead and reclaim its slot.
    pub(super) fn kill_coroutine(&mut self, id: HeapId) -> SimpleResult<()> {
        if let Ok(coroutine) = self.heap_mut().coroutine_mut(id) {
            coroutine.state = CoroutineState::Dead;
        }
        if self
            .heap()
            .slot(id)
            .map(|slot| slot.strong() == 0)
            .unwrap_or(false)
        {
            self.heap_mut().free_slot(id);
        }
        Ok(())
    }

    /// The last strong reference to a coroutine dropped: resume it just long
    /// enough to drain its defers, then mark it dead. Returns `true` when a
    /// cleanup frame was pushed.
    pub(super) fn begin_coroutine_cleanup(&mut self, id: HeapId) -> SimpleResult<bool> {
        let Ok(state) = self.heap().coroutine(id).map(|c| c.state) else {
            return Ok(false);
        };
        match state {
            CoroutineState::Running => {
                // Its frame is still live; the return path reclaims it.
                Ok(false)
            }
            CoroutineState::Dead | CoroutineState::Cleanup => {
                self.kill_coroutine(id)?;
                Ok(false)
            }
            CoroutineState::Ready | CoroutineState::Suspended => {
                let (registers, defers, func, parked_on) = {
                    let coroutine = self.heap_mut().coroutine_mut(id)?;
                    let parked_on = coroutine.parked_on.take();
                    if coroutine.defers.is_empty() {
                        (None, Vec::new(), coroutine.func, parked_on)
                    } else {
                        coroutine.state = CoroutineState::Cleanup;
                        (
                            Some(std::mem::take(&mut coroutine.registers)),
                            std::mem::take(&mut coroutine.defers),
                            coroutine.func,
                            parked_on,
                        )
                    }
                };
                if let Some(chan) = parked_on {
                    if let Ok(channel) = self.heap_mut().channel_mut(chan) {
                        channel.unpark(id);
                    }
                }
                let Some(registers) = registers else {
                    self.kill_coroutine(id)?;
                    return Ok(false);
                };
                let frame = CallFrame {
                    func,
                    registers,
                    ret_pc: self.pc(),
                    dst: RegId::new(0),
                    wants_result: false,
                    defers,
                    coroutine: Some(id),
                    dtor_of: None,
                    exiting: None,
                };
                self.push_frame(frame)?;
                let _ = self.begin_frame_exit(PendingExit::Cleanup)?;
                Ok(true)
            }
        }
    }
}

enum ParkSide {
    Sender,
    Receiver,
}
