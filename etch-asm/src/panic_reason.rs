use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
/// Panic reason representation for the virtual machine.
pub enum PanicReason {
    /// The byte can't be mapped to any known `PanicReason`.
    UnknownPanicReason = 0x00,
    /// An operator received a value whose tag it is not defined for.
    TypeMismatch = 0x01,
    /// Array, string or tuple index outside the container's bounds.
    IndexOutOfBounds = 0x02,
    /// A `nil` value was dereferenced or indexed.
    NilDeref = 0x03,
    /// Integer division or remainder by zero.
    DivisionByZero = 0x04,
    /// The heap slab is out of slots.
    HeapExhausted = 0x05,
    /// A function requires more registers than a frame window holds.
    RegisterFileExhausted = 0x06,
    /// A destructor re-entered the destructor of the same heap slot.
    DestructorReentry = 0x07,
    /// `yield` executed on the main thread of control.
    YieldOutsideCoroutine = 0x08,
    /// A coroutine operation was applied to a value that is not a live
    /// coroutine, or a coroutine resumed itself.
    CoroutineMisuse = 0x09,
    /// A match expression fell through every arm.
    UnmatchedPattern = 0x0a,
    /// `UNWRAPOPT`/`UNWRAPRES` on a `none`/`error` value.
    UnwrapFailed = 0x0b,
    /// The call stack grew past its fixed bound.
    CallDepthExceeded = 0x0c,
    /// A call referenced a function-table index that does not exist.
    MissingFunction = 0x0d,
    /// The opcode byte or an operand field does not decode.
    InvalidInstruction = 0x0e,
    /// A branch target lies outside the current function.
    InvalidJump = 0x0f,
    /// A cast failed (malformed string, char out of byte range).
    InvalidCast = 0x10,
    /// A host callback raised instead of returning a value.
    HostCallbackFailed = 0x11,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for PanicReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl From<u8> for PanicReason {
    /// Converts the `u8` into a `PanicReason`.
    fn from(b: u8) -> Self {
        use PanicReason::*;
        match b {
            0x01 => TypeMismatch,
            0x02 => IndexOutOfBounds,
            0x03 => NilDeref,
            0x04 => DivisionByZero,
            0x05 => HeapExhausted,
            0x06 => RegisterFileExhausted,
            0x07 => DestructorReentry,
            0x08 => YieldOutsideCoroutine,
            0x09 => CoroutineMisuse,
            0x0a => UnmatchedPattern,
            0x0b => UnwrapFailed,
            0x0c => CallDepthExceeded,
            0x0d => MissingFunction,
            0x0e => InvalidInstruction,
            0x0f => InvalidJump,
            0x10 => InvalidCast,
            0x11 => HostCallbackFailed,
            _ => UnknownPanicReason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn u8_panic_reason_round_trip() {
        let last_known: u8 = PanicReason::iter().last().unwrap() as u8 + 1;
        assert_eq!(PanicReason::from(0), PanicReason::UnknownPanicReason);

        for i in 1..last_known {
            let reason = PanicReason::from(i);
            assert_eq!(i, reason as u8);
        }
        for i in last_known..=255 {
            let reason = PanicReason::from(i);
            assert_eq!(PanicReason::UnknownPanicReason as u8, reason as u8);
        }
    }
}
