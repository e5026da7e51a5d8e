//! Application-supplied capability table.
//!
//! The application hands the orchestrator a table of plain function
//! pointers at `kickoff` time.  The table is read-only afterwards and
//! must stay valid for the whole process lifetime.  Which optional
//! entries are present is itself meaningful: it determines the pairing
//! I/O capability declared to the host stack.

use crate::error::Error;
use crate::stack::IoCapability;

/// Sentinel a `passkey_entry` callback returns when the user aborts.
/// Any negative value, or anything above [`crate::config::PASSKEY_MAX`],
/// cancels the pairing.
pub const PASSKEY_ABORTED: i32 = -1;

/// Capability table for one role instance.
///
/// `H` is the stack's connection handle type.  All entries are plain
/// `fn` pointers so the table is `Copy` and freely shared across the
/// stack's callback contexts.
pub struct CallbackTable<H: 'static> {
    /// Central: exact-match name filter for scanning.  Peripheral: the
    /// local device name, checked against the build configuration.
    pub peer_name: &'static str,

    /// Notified once the link is authenticated.  Optional.
    pub connected: Option<fn(&H)>,

    /// Notified after the link is torn down.  Optional.
    pub disconnected: Option<fn()>,

    /// Show a 6-digit passkey to the user.  Mandatory.
    pub passkey_display: Option<fn(u32)>,

    /// Ask the user to type a passkey.  Returns the value, or anything
    /// out of range (e.g. [`PASSKEY_ABORTED`]) to cancel.  Must be
    /// supplied together with `passkey_confirm` or not at all.
    pub passkey_entry: Option<fn() -> i32>,

    /// Ask the user whether the displayed passkey matches.  Must be
    /// supplied together with `passkey_entry` or not at all.
    pub passkey_confirm: Option<fn(u32) -> bool>,
}

// Manual impls: `derive` would needlessly bound `H`.
impl<H> Clone for CallbackTable<H> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<H> Copy for CallbackTable<H> {}

impl<H> CallbackTable<H> {
    /// A display-only table with no connection notifications.
    pub const fn new(peer_name: &'static str, passkey_display: fn(u32)) -> Self {
        Self {
            peer_name,
            connected: None,
            disconnected: None,
            passkey_display: Some(passkey_display),
            passkey_entry: None,
            passkey_confirm: None,
        }
    }

    /// Cross-field validation, run before any stack interaction.
    ///
    /// The entry/confirm co-presence rule exists because the stack may
    /// request either operation depending on the peer's capability;
    /// declaring one without the other would promise an ability the
    /// device cannot deliver.
    pub fn validate(&self) -> Result<(), Error> {
        if self.peer_name.is_empty() {
            return Err(Error::InvalidConfig);
        }
        if self.passkey_display.is_none() {
            return Err(Error::InvalidConfig);
        }
        if self.passkey_entry.is_some() != self.passkey_confirm.is_some() {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    /// I/O capability this table declares to the stack.
    pub fn io_capability(&self) -> IoCapability {
        if self.passkey_entry.is_some() {
            IoCapability::KeyboardDisplay
        } else {
            IoCapability::DisplayOnly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn display(_passkey: u32) {}
    fn entry() -> i32 {
        123456
    }
    fn confirm(_passkey: u32) -> bool {
        true
    }

    #[test]
    fn display_only_table_is_valid() {
        let table: CallbackTable<()> = CallbackTable::new("BlueCat", display);
        assert!(table.validate().is_ok());
        assert_eq!(table.io_capability(), IoCapability::DisplayOnly);
    }

    #[test]
    fn keyboard_table_is_valid() {
        let mut table: CallbackTable<()> = CallbackTable::new("BlueCat", display);
        table.passkey_entry = Some(entry);
        table.passkey_confirm = Some(confirm);
        assert!(table.validate().is_ok());
        assert_eq!(table.io_capability(), IoCapability::KeyboardDisplay);
    }

    #[test]
    fn entry_without_confirm_rejected() {
        let mut table: CallbackTable<()> = CallbackTable::new("BlueCat", display);
        table.passkey_entry = Some(entry);
        assert_eq!(table.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn confirm_without_entry_rejected() {
        let mut table: CallbackTable<()> = CallbackTable::new("BlueCat", display);
        table.passkey_confirm = Some(confirm);
        assert_eq!(table.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn missing_display_rejected() {
        let table: CallbackTable<()> = CallbackTable {
            peer_name: "BlueCat",
            connected: None,
            disconnected: None,
            passkey_display: None,
            passkey_entry: None,
            passkey_confirm: None,
        };
        assert_eq!(table.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn empty_peer_name_rejected() {
        let table: CallbackTable<()> = CallbackTable::new("", display);
        assert_eq!(table.validate(), Err(Error::InvalidConfig));
    }
}
