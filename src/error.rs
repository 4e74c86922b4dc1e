//! Core error kinds shared across every subsystem.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

#[cfg(not(feature = "std"))]
use core::fmt::Debug;

/// Error kinds surfaced by the core, per the error handling design.
///
/// `LeaseQuery` is not a failure: it tells the caller the message has
/// been parked pending address resolution and will be retried. It
/// must never reach the IP layer as an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ThreadError {
    /// The message buffer pool has no free cells left.
    #[cfg_attr(feature = "std", error("message buffer pool exhausted"))]
    NoBufs,
    /// The operation cannot proceed right now (e.g. radio mid-transmit).
    #[cfg_attr(feature = "std", error("operation would block"))]
    Busy,
    /// Malformed input that cannot be decoded.
    #[cfg_attr(feature = "std", error("malformed input"))]
    Parse,
    /// Input was well-formed but must be silently discarded.
    #[cfg_attr(feature = "std", error("well-formed input discarded"))]
    Drop,
    /// Link-layer security check (MIC / frame counter) failed.
    #[cfg_attr(feature = "std", error("link-layer security check failed"))]
    Security,
    /// No route exists to the requested destination.
    #[cfg_attr(feature = "std", error("no route to destination"))]
    NoRoute,
    /// The message has been parked awaiting address resolution.
    #[cfg_attr(feature = "std", error("parked pending address resolution"))]
    LeaseQuery,
    /// The call is not valid for the component's current state.
    #[cfg_attr(feature = "std", error("invalid for current state"))]
    InvalidState,
    /// Caller-supplied arguments are invalid.
    #[cfg_attr(feature = "std", error("invalid arguments"))]
    InvalidArgs,
    /// The item is already enqueued / already present.
    #[cfg_attr(feature = "std", error("already present"))]
    Already,
    /// The item could not be found (e.g. dequeue of an absent message).
    #[cfg_attr(feature = "std", error("not found"))]
    NotFound,
}

/// Wraps [`ThreadError`] with an underlying radio/platform error, mirroring
/// the teacher crate's `CoreError<E>` so platform failures keep their
/// original type instead of being collapsed into a single variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum CoreError<E> {
    /// One of the fixed core error kinds.
    #[cfg_attr(feature = "std", error(transparent))]
    Core(#[cfg_attr(feature = "std", from)] ThreadError),
    /// An error returned by the underlying radio/platform driver.
    #[cfg_attr(feature = "std", error("radio error: {0:?}"))]
    Radio(E),
}

#[cfg(not(feature = "std"))]
impl<E> From<ThreadError> for CoreError<E> {
    fn from(e: ThreadError) -> Self {
        CoreError::Core(e)
    }
}

#[cfg(not(feature = "std"))]
impl<E: Debug> core::fmt::Display for CoreError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CoreError::Core(e) => write!(f, "{:?}", e),
            CoreError::Radio(e) => write!(f, "radio error: {:?}", e),
        }
    }
}

/// Shorthand used throughout the core for operations that cannot fail
/// with a platform error (buffer pool, codecs, queues).
pub type Result<T> = core::result::Result<T, ThreadError>;
