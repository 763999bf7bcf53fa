//! The error taxonomy shared by every control command, probe throw and
//! request answer in the crate.
//!
//! `UError` is a closed enum, not an open-ended error type: every fallible
//! operation in the pipe graph resolves to exactly one of these kinds.
//! `Unhandled` is special — it means "not an error, try the next probe in
//! the chain" and is never surfaced to an application as a failure on its
//! own.

use std::fmt;

/// The outcome of a control command, probe throw, or buffer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UError {
    /// Out-of-memory, or a pool could not produce a new entry.
    Alloc,
    /// An event-loop (pump) registration or deregistration failed.
    Upump,
    /// Caller-supplied arguments are invalid, or a flow format is
    /// incompatible with what the callee can produce/consume.
    Invalid,
    /// An underlying library or OS call failed.
    External,
    /// The resource is shared and cannot be written right now.
    Busy,
    /// The catcher declined to handle the event or command; callers should
    /// forward it to the next link in a chain.
    Unhandled,
    /// Fallback for an event or command code nobody along the chain
    /// recognized.
    Unknown,
}

impl fmt::Display for UError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            UError::Alloc => "allocation failed or pool exhausted",
            UError::Upump => "event-loop operation failed",
            UError::Invalid => "invalid arguments or incompatible flow format",
            UError::External => "underlying library or OS call failed",
            UError::Busy => "resource is shared and currently unavailable",
            UError::Unhandled => "handler declined, pass to next",
            UError::Unknown => "unrecognized event or command",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for UError {}

/// A `Result` alias for control-plane operations: `Ok(())` is the `NONE`
/// outcome of spec.md §7; everything else is a `UError`.
pub type UResult = Result<(), UError>;
