//! Unified error type for bluecat-link.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` under the `defmt` feature for efficient
//! on-target logging.

/// Top-level error type returned by `kickoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The callback table failed validation: a mandatory field is missing,
    /// or `passkey_entry`/`passkey_confirm` were not supplied together.
    /// Fatal to `kickoff`; no stack call has been made.
    InvalidConfig,

    /// `kickoff` already ran its one-time side effects.  An idempotence
    /// signal, not a failure: the first registration stays in force.
    AlreadyStarted,

    /// The host stack returned an error during initialization.
    Stack(StackError),
}

/// Raw error code from a host stack call.
///
/// The orchestrator never interprets the code; it is logged and the
/// triggering operation abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackError(pub i32);

impl StackError {
    pub fn code(&self) -> i32 {
        self.0
    }
}

impl From<StackError> for Error {
    fn from(e: StackError) -> Self {
        Error::Stack(e)
    }
}
