//! Interface boundary to the external BLE host stack.
//!
//! The stack owns the radio, link layer, GATT transport, and pairing
//! cryptography.  The orchestrator drives it only through [`HostStack`]
//! and receives its notifications through the `ConnLoop::on_*` entry
//! points.  Tests substitute a fake; the embedded build binds this trait
//! to the Nordic SoftDevice.

use crate::error::StackError;

/// Pairing I/O capability declared to the stack at registration time.
///
/// Derived from which callbacks the application supplies, never from a
/// null check at pairing time: the stack uses the declared capability
/// during feature negotiation with the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoCapability {
    /// Can show a 6-digit passkey but not enter one.
    DisplayOnly,
    /// Can show a passkey, type one in, and answer yes/no.
    KeyboardDisplay,
}

/// Reason attached to an orchestrator-initiated disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// Security escalation or pairing failed (HCI authentication failure).
    AuthenticationFailure,
    /// Local user asked to drop the link.
    UserRequested,
}

/// Link security level, in escalating order.
///
/// `AuthenticatedLeSecure` corresponds to Zephyr's L4: authenticated
/// LE Secure Connections with encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityLevel {
    None,
    Encrypted,
    Authenticated,
    AuthenticatedLeSecure,
}

/// Operations the orchestrator issues to the host stack.
///
/// Every method may be called from any context the stack itself calls
/// back from, so implementations must be `Sync` and must not re-enter
/// the orchestrator synchronously.
pub trait HostStack: Sync {
    /// Opaque, stack-owned reference to a live link.  The stack reference
    /// counts it; dropping the last clone releases the link object back
    /// to the stack.
    type Handle: Clone + Send + 'static;

    /// Peer address, as the stack represents it.
    type Addr: Clone + Send;

    /// Bring the stack up.  Called exactly once, from `kickoff`.
    fn enable(&self) -> Result<(), StackError>;

    /// Declare the local pairing I/O capability.  Called once during
    /// `kickoff`, after `enable`.
    fn declare_io_capability(&self, cap: IoCapability) -> Result<(), StackError>;

    /// Start connectable advertising with the given raw AD payload.
    fn adv_start(&self, payload: &[u8]) -> Result<(), StackError>;

    /// Stop advertising.
    fn adv_stop(&self) -> Result<(), StackError>;

    /// Start passive scanning.
    fn scan_start(&self) -> Result<(), StackError>;

    /// Stop scanning.
    fn scan_stop(&self) -> Result<(), StackError>;

    /// Initiate a connection to `addr`.  Completion is reported later
    /// through the connected notification, or not at all on timeout.
    fn connect(&self, addr: &Self::Addr) -> Result<(), StackError>;

    /// Tear down a live link.
    fn disconnect(&self, handle: &Self::Handle, reason: DisconnectReason)
        -> Result<(), StackError>;

    /// Request a security upgrade on a raw link.
    fn request_security(
        &self,
        handle: &Self::Handle,
        level: SecurityLevel,
    ) -> Result<(), StackError>;

    /// Submit a passkey the user typed in.
    fn submit_passkey(&self, handle: &Self::Handle, passkey: u32) -> Result<(), StackError>;

    /// Confirm that the displayed passkey matches.
    fn confirm_passkey(&self, handle: &Self::Handle) -> Result<(), StackError>;

    /// Cancel the ongoing pairing procedure.
    fn cancel_pairing(&self, handle: &Self::Handle) -> Result<(), StackError>;

    /// Blocking sleep on the stack's clock.  Used only by the bounded
    /// slot-release recovery wait.
    fn sleep_ms(&self, ms: u32);
}

// Lets a lifecycle loop borrow a stack that outlives it (the embedded
// binding keeps one static stack shared with its radio task).
impl<T: HostStack> HostStack for &T {
    type Handle = T::Handle;
    type Addr = T::Addr;

    fn enable(&self) -> Result<(), StackError> {
        (**self).enable()
    }
    fn declare_io_capability(&self, cap: IoCapability) -> Result<(), StackError> {
        (**self).declare_io_capability(cap)
    }
    fn adv_start(&self, payload: &[u8]) -> Result<(), StackError> {
        (**self).adv_start(payload)
    }
    fn adv_stop(&self) -> Result<(), StackError> {
        (**self).adv_stop()
    }
    fn scan_start(&self) -> Result<(), StackError> {
        (**self).scan_start()
    }
    fn scan_stop(&self) -> Result<(), StackError> {
        (**self).scan_stop()
    }
    fn connect(&self, addr: &Self::Addr) -> Result<(), StackError> {
        (**self).connect(addr)
    }
    fn disconnect(
        &self,
        handle: &Self::Handle,
        reason: DisconnectReason,
    ) -> Result<(), StackError> {
        (**self).disconnect(handle, reason)
    }
    fn request_security(
        &self,
        handle: &Self::Handle,
        level: SecurityLevel,
    ) -> Result<(), StackError> {
        (**self).request_security(handle, level)
    }
    fn submit_passkey(&self, handle: &Self::Handle, passkey: u32) -> Result<(), StackError> {
        (**self).submit_passkey(handle, passkey)
    }
    fn confirm_passkey(&self, handle: &Self::Handle) -> Result<(), StackError> {
        (**self).confirm_passkey(handle)
    }
    fn cancel_pairing(&self, handle: &Self::Handle) -> Result<(), StackError> {
        (**self).cancel_pairing(handle)
    }
    fn sleep_ms(&self, ms: u32) {
        (**self).sleep_ms(ms)
    }
}
