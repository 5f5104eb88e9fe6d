//! Fixed limits of the virtual machine.

/// Largest register window a single frame may declare. The compiler proves a
/// per-function bound and rejects functions that exceed it.
pub const VM_MAX_REGISTERS: u8 = 250;

/// Maximum call-stack depth before [`etch_asm::PanicReason::CallDepthExceeded`].
pub const VM_MAX_CALL_DEPTH: usize = 512;

/// Number of heap slots; allocation past this bound is a fatal
/// [`etch_asm::PanicReason::HeapExhausted`].
pub const HEAP_CAPACITY: usize = 1 << 16;

/// Bound of the per-slot outgoing-reference set used by the cycle collector.
/// Overflowing slots fall back to content traversal during marking.
pub const MAX_TRACKED_REFS: usize = 16;

/// Channel capacity used when `CHANNEW` carries a zero capacity operand.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// Dirty-object count that triggers a cycle collection when the host has not
/// configured one.
pub const GC_DEFAULT_CYCLE_INTERVAL: usize = 64;

/// Upper bound the adaptive GC threshold may grow to when collections keep
/// coming back empty.
pub const GC_MAX_CYCLE_INTERVAL: usize = 4096;
