//! The reference-counted heap slab.
//!
//! Every non-scalar object lives in a fixed-capacity slab of slots addressed
//! by plain integer handles. Values are retained when stored and released
//! exactly once on overwrite or scope exit; destructors and coroutine
//! cleanups are queued here and drained by the interpreter at instruction
//! boundaries, never run re-entrantly from inside a release.

mod cycle;

pub use cycle::{GcBudget, GcStats};

use crate::{
    channel::Channel,
    consts::{HEAP_CAPACITY, MAX_TRACKED_REFS},
    coroutine::Coroutine,
    error::SimpleResult,
    value::{HeapId, Value},
};
use etch_asm::PanicReason;
use std::collections::VecDeque;
use std::rc::Rc;

/// Bounded set of outgoing reference edges used by the cycle collector.
/// Adding past the bound drops the edge and flags the slot, which makes the
/// collector fall back to content traversal for it.
#[derive(Debug, Default, Clone)]
pub struct RefSet {
    ids: [HeapId; MAX_TRACKED_REFS],
    len: u8,
    overflowed: bool,
}

impl RefSet {
    fn add(&mut self, id: HeapId) {
        if self.iter().any(|tracked| tracked == id) {
            return;
        }
        if (self.len as usize) < MAX_TRACKED_REFS {
            self.ids[self.len as usize] = id;
            self.len += 1;
        } else {
            self.overflowed = true;
        }
    }

    fn clear(&mut self) {
        self.len = 0;
        self.overflowed = false;
    }

    /// Iterate tracked edges.
    pub fn iter(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.ids[..self.len as usize].iter().copied()
    }

    /// Whether edges were dropped since the last clear.
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }
}

/// Payload of a heap slot.
#[derive(Debug, Clone, Default)]
pub enum SlotKind {
    /// Unoccupied; either on the free list or a tombstone awaiting its last
    /// weak handle.
    #[default]
    Free,
    /// A boxed scalar value.
    Scalar(Value),
    /// Insertion-ordered short-string-keyed mapping.
    Table(Vec<(Rc<str>, Value)>),
    /// Contiguous sequence of values.
    Array(Vec<Value>),
    /// A weak cell naming a target slot; does not keep the target alive.
    Weak(HeapId),
    /// A closure: function-table index plus captured values.
    Closure {
        /// Function the closure enters.
        func: u16,
        /// Captured values, in capture order.
        captures: Vec<Value>,
    },
    /// A coroutine state machine.
    Coroutine(Box<Coroutine>),
    /// A bounded channel.
    Channel(Box<Channel>),
}

/// One slab cell with its refcount metadata.
#[derive(Debug, Default, Clone)]
pub struct Slot {
    strong: u32,
    weak: u32,
    mark: bool,
    dtor: Option<u16>,
    dtor_queued: bool,
    kind: SlotKind,
    refs: RefSet,
}

impl Slot {
    /// Strong reference count.
    pub const fn strong(&self) -> u32 {
        self.strong
    }

    /// Weak reference count.
    pub const fn weak(&self) -> u32 {
        self.weak
    }

    /// The payload.
    pub const fn kind(&self) -> &SlotKind {
        &self.kind
    }

    /// Tracked outgoing edges.
    pub const fn refs(&self) -> &RefSet {
        &self.refs
    }

    const fn is_live(&self) -> bool {
        !matches!(self.kind, SlotKind::Free)
    }
}

/// The slab heap.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<HeapId>,
    capacity: usize,
    dtor_stack: Vec<HeapId>,
    pending_dtors: VecDeque<(u16, HeapId)>,
    pending_cleanups: Vec<HeapId>,
    dirty: usize,
    freed_total: u64,
}

impl Default for Heap {
    fn default() -> Self {
        Self::with_capacity(HEAP_CAPACITY)
    }
}

impl Heap {
    /// A heap bounded at `capacity` slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            dtor_stack: Vec::new(),
            pending_dtors: VecDeque::new(),
            pending_cleanups: Vec::new(),
            dirty: 0,
            freed_total: 0,
        }
    }

    fn alloc(&mut self, kind: SlotKind, dtor: Option<u16>) -> SimpleResult<HeapId> {
        let slot = Slot {
            strong: 1,
            weak: 0,
            mark: false,
            dtor,
            dtor_queued: false,
            kind,
            refs: RefSet::default(),
        };
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = slot;
            return Ok(id);
        }
        if self.slots.len() >= self.capacity {
            return Err(PanicReason::HeapExhausted);
        }
        self.slots.push(slot);
        Ok((self.slots.len() - 1) as HeapId)
    }

    /// Box a scalar value; the new slot starts with one strong reference.
    pub fn alloc_scalar(&mut self, value: Value, dtor: Option<u16>) -> SimpleResult<HeapId> {
        self.retain(&value);
        let id = self.alloc(SlotKind::Scalar(value), dtor)?;
        self.track_children(id);
        Ok(id)
    }

    /// Fresh empty table.
    pub fn alloc_table(&mut self, dtor: Option<u16>) -> SimpleResult<HeapId> {
        self.alloc(SlotKind::Table(Vec::new()), dtor)
    }

    /// Fresh array with reserved length.
    pub fn alloc_array(&mut self, reserve: usize) -> SimpleResult<HeapId> {
        self.alloc(SlotKind::Array(Vec::with_capacity(reserve)), None)
    }

    /// Fresh closure over already-retained captures.
    pub fn alloc_closure(&mut self, func: u16, captures: Vec<Value>) -> SimpleResult<HeapId> {
        for capture in &captures {
            self.retain(capture);
        }
        let id = self.alloc(SlotKind::Closure { func, captures }, None)?;
        self.track_children(id);
        Ok(id)
    }

    /// Fresh weak cell; bumps the target's weak count.
    pub fn alloc_weak(&mut self, target: HeapId) -> SimpleResult<HeapId> {
        let id = self.alloc(SlotKind::Weak(target), None)?;
        if let Some(slot) = self.slots.get_mut(target as usize) {
            slot.weak += 1;
        }
        Ok(id)
    }

    /// Fresh coroutine slot.
    pub fn alloc_coroutine(&mut self, coroutine: Coroutine) -> SimpleResult<HeapId> {
        self.alloc(SlotKind::Coroutine(Box::new(coroutine)), None)
    }

    /// Fresh bounded channel.
    pub fn alloc_channel(&mut self, capacity: usize) -> SimpleResult<HeapId> {
        self.alloc(SlotKind::Channel(Box::new(Channel::new(capacity))), None)
    }

    /// Slot accessor.
    pub fn slot(&self, id: HeapId) -> Option<&Slot> {
        self.slots.get(id as usize).filter(|slot| slot.is_live())
    }

    fn slot_mut(&mut self, id: HeapId) -> SimpleResult<&mut Slot> {
        self.slots
            .get_mut(id as usize)
            .filter(|slot| slot.is_live())
            .ok_or(PanicReason::NilDeref)
    }

    /// Retain a value: strong handles gain a reference, inline containers and
    /// wrappers retain their contents transitively, scalars are untouched.
    pub fn retain(&mut self, value: &Value) {
        match value {
            Value::Ref(id) | Value::Closure(id) | Value::Coroutine(id) | Value::Weak(id) => {
                if let Some(slot) = self.slots.get_mut(*id as usize) {
                    slot.strong += 1;
                }
            }
            Value::Array(items) => {
                for item in items.iter() {
                    self.retain(item);
                }
            }
            Value::Some(inner) | Value::Ok(inner) | Value::Err(inner) => self.retain(inner),
            _ => {}
        }
    }

    /// Release a value: the exact inverse of [`Heap::retain`]. Dropping the
    /// last strong reference frees the slot, queueing its destructor or
    /// coroutine cleanup for the interpreter to drain.
    pub fn release(&mut self, value: &Value) {
        match value {
            Value::Ref(id) | Value::Closure(id) | Value::Coroutine(id) | Value::Weak(id) => {
                self.release_slot(*id);
            }
            Value::Array(items) => {
                for item in items.iter() {
                    self.release(item);
                }
            }
            Value::Some(inner) | Value::Ok(inner) | Value::Err(inner) => self.release(inner),
            _ => {}
        }
    }

    fn release_slot(&mut self, id: HeapId) {
        // Reentry guard: a slot whose destructor is on the stack is freed by
        // the driver once that destructor returns.
        let in_dtor = self.dtor_stack.contains(&id);
        let Some(slot) = self.slots.get_mut(id as usize) else {
            return;
        };
        if !slot.is_live() || slot.strong == 0 {
            return;
        }
        slot.strong -= 1;
        if slot.strong > 0 || in_dtor {
            return;
        }
        let is_coroutine = matches!(slot.kind, SlotKind::Coroutine(_));
        let dtor = slot.dtor;
        let dtor_queued = slot.dtor_queued;
        if is_coroutine {
            self.pending_cleanups.push(id);
        } else if let (Some(dtor), false) = (dtor, dtor_queued) {
            self.slots[id as usize].dtor_queued = true;
            self.pending_dtors.push_back((dtor, id));
        } else {
            self.free_slot(id);
        }
    }

    /// Unlink and reclaim a slot whose strong count reached zero: children
    /// are released, weak cells detach from their targets, and the cell is
    /// recycled unless outstanding weak handles keep it as a tombstone.
    pub(crate) fn free_slot(&mut self, id: HeapId) {
        let Some(slot) = self.slots.get_mut(id as usize) else {
            return;
        };
        if !slot.is_live() {
            return;
        }
        let kind = std::mem::take(&mut slot.kind);
        slot.refs.clear();
        slot.dtor = None;
        self.freed_total += 1;

        match kind {
            SlotKind::Free => {}
            SlotKind::Scalar(value) => self.release(&value),
            SlotKind::Table(entries) => {
                for (_, value) in entries {
                    self.release(&value);
                }
            }
            SlotKind::Array(items) => {
                for item in items {
                    self.release(&item);
                }
            }
            SlotKind::Weak(target) => {
                if let Some(target_slot) = self.slots.get_mut(target as usize) {
                    target_slot.weak = target_slot.weak.saturating_sub(1);
                    if !target_slot.is_live()
                        && target_slot.strong == 0
                        && target_slot.weak == 0
                    {
                        self.free.push(target);
                    }
                }
            }
            SlotKind::Closure { captures, .. } => {
                for capture in captures {
                    self.release(&capture);
                }
            }
            SlotKind::Coroutine(coroutine) => {
                for value in coroutine.owned_values() {
                    self.release(&value);
                }
            }
            SlotKind::Channel(mut channel) => {
                for value in channel.drain() {
                    self.release(&value);
                }
            }
        }

        let slot = &mut self.slots[id as usize];
        if slot.weak == 0 {
            self.free.push(id);
        }
    }

    /// Whether the weak cell still names a live referent.
    pub fn weak_is_valid(&self, weak: HeapId) -> bool {
        match self.slot(weak).map(Slot::kind) {
            Some(SlotKind::Weak(target)) => self.slot(*target).is_some(),
            _ => false,
        }
    }

    /// The live referent behind a weak cell.
    pub fn weak_target(&self, weak: HeapId) -> Option<HeapId> {
        match self.slot(weak)?.kind() {
            SlotKind::Weak(target) => self.slot(*target).map(|_| *target),
            _ => None,
        }
    }

    /// Record a `parent -> child` edge for the cycle collector when the child
    /// is a heap handle.
    pub fn track_ref(&mut self, parent: HeapId, child: &Value) {
        let Some(child_id) = child.heap_id() else {
            return;
        };
        if let Ok(slot) = self.slot_mut(parent) {
            slot.refs.add(child_id);
        }
    }

    fn track_children(&mut self, id: HeapId) {
        let children: Vec<HeapId> = match self.slot(id).map(Slot::kind) {
            Some(SlotKind::Scalar(value)) => value.heap_id().into_iter().collect(),
            Some(SlotKind::Closure { captures, .. }) => {
                captures.iter().filter_map(Value::heap_id).collect()
            }
            _ => return,
        };
        for child in children {
            if let Ok(slot) = self.slot_mut(id) {
                slot.refs.add(child);
            }
        }
    }

    /// Read the boxed scalar.
    pub fn scalar_get(&self, id: HeapId) -> SimpleResult<Value> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Scalar(value) => Ok(value.clone()),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Overwrite the boxed scalar, retaining the new value and releasing the
    /// old one.
    pub fn scalar_set(&mut self, id: HeapId, value: Value) -> SimpleResult<()> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Scalar(_) => {}
            _ => return Err(PanicReason::TypeMismatch),
        }
        self.retain(&value);
        let slot = self.slot_mut(id)?;
        let SlotKind::Scalar(cell) = &mut slot.kind else {
            return Err(PanicReason::TypeMismatch);
        };
        let old = std::mem::replace(cell, value.clone());
        self.track_ref(id, &value);
        self.release(&old);
        self.dirty += 1;
        Ok(())
    }

    /// Table field read; linear search over insertion-ordered keys.
    pub fn table_get(&self, id: HeapId, key: &str) -> SimpleResult<Value> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Table(entries) => Ok(entries
                .iter()
                .find(|(k, _)| k.as_ref() == key)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Nil)),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Table field write: retains the new value, releases any previous one,
    /// keeps insertion order for fresh keys.
    pub fn table_set(&mut self, id: HeapId, key: &str, value: Value) -> SimpleResult<()> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Table(_) => {}
            _ => return Err(PanicReason::TypeMismatch),
        }
        self.retain(&value);
        let slot = self.slot_mut(id)?;
        let SlotKind::Table(entries) = &mut slot.kind else {
            return Err(PanicReason::TypeMismatch);
        };
        let old = match entries.iter_mut().find(|(k, _)| k.as_ref() == key) {
            Some((_, cell)) => Some(std::mem::replace(cell, value.clone())),
            None => {
                entries.push((Rc::from(key), value.clone()));
                None
            }
        };
        self.track_ref(id, &value);
        if let Some(old) = old {
            self.release(&old);
        }
        self.dirty += 1;
        Ok(())
    }

    /// Whether a table holds a key.
    pub fn table_has(&self, id: HeapId, key: &str) -> SimpleResult<bool> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Table(entries) => Ok(entries.iter().any(|(k, _)| k.as_ref() == key)),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Table keys in insertion order (iteration support).
    pub fn table_keys(&self, id: HeapId) -> SimpleResult<Vec<Rc<str>>> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Table(entries) => Ok(entries.iter().map(|(k, _)| k.clone()).collect()),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Array element read.
    pub fn array_get(&self, id: HeapId, index: usize) -> SimpleResult<Value> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Array(items) => items
                .get(index)
                .cloned()
                .ok_or(PanicReason::IndexOutOfBounds),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Array element write: retains new, releases old.
    pub fn array_set(&mut self, id: HeapId, index: usize, value: Value) -> SimpleResult<()> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Array(items) if index < items.len() => {}
            SlotKind::Array(_) => return Err(PanicReason::IndexOutOfBounds),
            _ => return Err(PanicReason::TypeMismatch),
        }
        self.retain(&value);
        let slot = self.slot_mut(id)?;
        let SlotKind::Array(items) = &mut slot.kind else {
            return Err(PanicReason::TypeMismatch);
        };
        let old = std::mem::replace(&mut items[index], value.clone());
        self.track_ref(id, &value);
        self.release(&old);
        self.dirty += 1;
        Ok(())
    }

    /// Append to an array, retaining the value.
    pub fn array_push(&mut self, id: HeapId, value: Value) -> SimpleResult<()> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Array(_) => {}
            _ => return Err(PanicReason::TypeMismatch),
        }
        self.retain(&value);
        let slot = self.slot_mut(id)?;
        let SlotKind::Array(items) = &mut slot.kind else {
            return Err(PanicReason::TypeMismatch);
        };
        items.push(value.clone());
        self.track_ref(id, &value);
        self.dirty += 1;
        Ok(())
    }

    /// Array or table length.
    pub fn container_len(&self, id: HeapId) -> SimpleResult<usize> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Array(items) => Ok(items.len()),
            SlotKind::Table(entries) => Ok(entries.len()),
            SlotKind::Scalar(Value::Str(s)) => Ok(s.len()),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Clone out an array's elements.
    pub fn array_items(&self, id: HeapId) -> SimpleResult<Vec<Value>> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Array(items) => Ok(items.clone()),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// The closure behind a handle: `(function, captures)`.
    pub fn closure(&self, id: HeapId) -> SimpleResult<(u16, Vec<Value>)> {
        match self.slot(id).ok_or(PanicReason::NilDeref)?.kind() {
            SlotKind::Closure { func, captures } => Ok((*func, captures.clone())),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Mutable coroutine access.
    pub fn coroutine_mut(&mut self, id: HeapId) -> SimpleResult<&mut Coroutine> {
        match &mut self.slot_mut(id)?.kind {
            SlotKind::Coroutine(coroutine) => Ok(coroutine),
            _ => Err(PanicReason::CoroutineMisuse),
        }
    }

    /// Shared coroutine access.
    pub fn coroutine(&self, id: HeapId) -> SimpleResult<&Coroutine> {
        match self.slot(id).ok_or(PanicReason::CoroutineMisuse)?.kind() {
            SlotKind::Coroutine(coroutine) => Ok(coroutine),
            _ => Err(PanicReason::CoroutineMisuse),
        }
    }

    /// Mutable channel access.
    pub fn channel_mut(&mut self, id: HeapId) -> SimpleResult<&mut Channel> {
        match &mut self.slot_mut(id)?.kind {
            SlotKind::Channel(channel) => Ok(channel),
            _ => Err(PanicReason::TypeMismatch),
        }
    }

    /// Queued destructor calls `(function, slot)` accumulated by releases.
    pub fn take_pending_dtor(&mut self) -> Option<(u16, HeapId)> {
        self.pending_dtors.pop_front()
    }

    /// Coroutines whose last strong reference dropped and that still need a
    /// cleanup resume.
    pub fn take_pending_cleanups(&mut self) -> Vec<HeapId> {
        std::mem::take(&mut self.pending_cleanups)
    }

    /// Push a slot onto the destructor-reentry guard stack.
    pub fn dtor_stack_push(&mut self, id: HeapId) -> SimpleResult<()> {
        if self.dtor_stack.contains(&id) {
            return Err(PanicReason::DestructorReentry);
        }
        self.dtor_stack.push(id);
        Ok(())
    }

    /// Pop the destructor-reentry guard stack.
    pub fn dtor_stack_pop(&mut self) {
        self.dtor_stack.pop();
    }

    /// Count of live slots.
    pub fn live_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_live()).count()
    }

    /// Lifetime count of freed slots.
    pub const fn freed_total(&self) -> u64 {
        self.freed_total
    }

    /// Mutations since the last cycle collection.
    pub const fn dirty(&self) -> usize {
        self.dirty
    }

    pub(crate) fn reset_dirty(&mut self) {
        self.dirty = 0;
    }

    pub(crate) fn live_ids(&self) -> Vec<HeapId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_live())
            .map(|(id, _)| id as HeapId)
            .collect()
    }

    pub(crate) fn set_mark(&mut self, id: HeapId, mark: bool) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            slot.mark = mark;
        }
    }

    pub(crate) fn mark(&self, id: HeapId) -> bool {
        self.slots
            .get(id as usize)
            .map(|slot| slot.mark)
            .unwrap_or(false)
    }

    pub(crate) fn force_drop_strong(&mut self, id: HeapId) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            slot.strong = 0;
        }
    }

    /// Child slot ids a slot can reach, for the collector's marking phase.
    /// Table, array, scalar and closure slots use their tracked edge set
    /// unless it overflowed, in which case the actual contents are walked.
    /// Coroutines and channels carry no edge sets and always walk contents.
    /// Weak cells contribute no edge; they do not keep their target alive.
    pub(crate) fn children_of(&self, id: HeapId) -> Vec<HeapId> {
        let Some(slot) = self.slot(id) else {
            return Vec::new();
        };
        match slot.kind() {
            SlotKind::Coroutine(coroutine) => coroutine
                .owned_values()
                .iter()
                .filter_map(Value::heap_id)
                .collect(),
            SlotKind::Channel(channel) => {
                channel.queued().filter_map(Value::heap_id).collect()
            }
            SlotKind::Weak(_) | SlotKind::Free => Vec::new(),
            _ if !slot.refs.overflowed() => slot.refs.iter().collect(),
            SlotKind::Scalar(value) => value.heap_id().into_iter().collect(),
            SlotKind::Table(entries) => {
                entries.iter().filter_map(|(_, v)| v.heap_id()).collect()
            }
            SlotKind::Array(items) => items.iter().filter_map(Value::heap_id).collect(),
            SlotKind::Closure { captures, .. } => {
                captures.iter().filter_map(Value::heap_id).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retain_release_round_trip_restores_counts() {
        let mut heap = Heap::default();
        let id = heap.alloc_table(None).unwrap();
        let handle = Value::Ref(id);
        assert_eq!(heap.slot(id).unwrap().strong(), 1);
        heap.retain(&handle);
        heap.release(&handle);
        assert_eq!(heap.slot(id).unwrap().strong(), 1);
    }

    #[test]
    fn last_release_frees_and_slot_is_reused() {
        let mut heap = Heap::default();
        let id = heap.alloc_table(None).unwrap();
        heap.release(&Value::Ref(id));
        assert!(heap.slot(id).is_none());
        assert_eq!(heap.freed_total(), 1);

        let next = heap.alloc_array(0).unwrap();
        assert_eq!(next, id);
    }

    #[test]
    fn table_set_releases_the_overwritten_value() {
        let mut heap = Heap::default();
        let table = heap.alloc_table(None).unwrap();
        let inner = heap.alloc_array(0).unwrap();

        heap.table_set(table, "x", Value::Ref(inner)).unwrap();
        assert_eq!(heap.slot(inner).unwrap().strong(), 2);

        heap.table_set(table, "x", Value::Int(1)).unwrap();
        assert_eq!(heap.slot(inner).unwrap().strong(), 1);
    }

    #[test]
    fn freeing_a_container_releases_children_transitively() {
        let mut heap = Heap::default();
        let outer = heap.alloc_table(None).unwrap();
        let inner = heap.alloc_array(0).unwrap();
        heap.table_set(outer, "child", Value::Ref(inner)).unwrap();

        heap.release(&Value::Ref(inner));
        assert!(heap.slot(inner).is_some());

        heap.release(&Value::Ref(outer));
        assert!(heap.slot(outer).is_none());
        assert!(heap.slot(inner).is_none());
    }

    #[test]
    fn weak_handles_do_not_keep_targets_alive() {
        let mut heap = Heap::default();
        let target = heap.alloc_table(None).unwrap();
        let weak = heap.alloc_weak(target).unwrap();
        assert!(heap.weak_is_valid(weak));

        heap.release(&Value::Ref(target));
        assert!(!heap.weak_is_valid(weak));

        // The tombstone is not recycled while the weak cell lives.
        let fresh = heap.alloc_table(None).unwrap();
        assert_ne!(fresh, target);

        heap.release(&Value::Weak(weak));
        assert!(!heap.weak_is_valid(weak));
    }

    #[test]
    fn destructors_queue_instead_of_running_inline() {
        let mut heap = Heap::default();
        let id = heap.alloc_table(Some(3)).unwrap();
        heap.release(&Value::Ref(id));
        assert_eq!(heap.take_pending_dtor(), Some((3, id)));
        // The slot stays for the driver to pass to the destructor.
        assert!(heap.slot(id).is_some());
    }

    #[test]
    fn heap_exhaustion_is_fatal() {
        let mut heap = Heap::with_capacity(1);
        heap.alloc_table(None).unwrap();
        assert_eq!(heap.alloc_table(None), Err(PanicReason::HeapExhausted));
    }

    #[test]
    fn ref_set_overflow_flags_the_slot() {
        let mut heap = Heap::default();
        let parent = heap.alloc_table(None).unwrap();
        for i in 0..MAX_TRACKED_REFS + 2 {
            let child = heap.alloc_array(0).unwrap();
            heap.table_set(parent, &format!("k{i}"), Value::Ref(child))
                .unwrap();
            heap.release(&Value::Ref(child));
        }
        assert!(heap.slot(parent).unwrap().refs().overflowed());
        // Content traversal still sees every child.
        assert_eq!(heap.children_of(parent).len(), MAX_TRACKED_REFS + 2);
    }
}
