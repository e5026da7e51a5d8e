//! The connection lifecycle loop.
//!
//! One `ConnLoop` per role instance receives every stack notification
//! (connected, disconnected, recycled, identity-resolved, security-changed,
//! pairing traffic) and drives discovery, the connection slot, security
//! escalation, and the application's capability table.  All entry points
//! take `&self` and may be invoked concurrently from the stack's own
//! execution contexts; shared state is limited to a handful of CAS cells.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::callbacks::CallbackTable;
use crate::config;
use crate::conn::pairing::{self, PairingCoordinator, PairingRequest, PasskeyOutcome};
use crate::conn::role::{FoundDisposition, RoleStrategy};
use crate::conn::slot::ConnectionSlot;
use crate::error::{Error, StackError};
use crate::stack::{DisconnectReason, HostStack, SecurityLevel};

/// Where the loop currently is in its cycle.  The machine is cyclic:
/// `TearingDown` leads back to `Discovering` on the next recycled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LifecycleState {
    Idle = 0,
    Discovering = 1,
    Connecting = 2,
    SecuringLink = 3,
    Pairing = 4,
    Authenticated = 5,
    TearingDown = 6,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Discovering,
            2 => Self::Connecting,
            3 => Self::SecuringLink,
            4 => Self::Pairing,
            5 => Self::Authenticated,
            6 => Self::TearingDown,
            _ => Self::Idle,
        }
    }
}

/// Write-once home of the callback table.  Written by whichever `kickoff`
/// call wins the init race, read-only ever after.
struct TableCell<H: 'static> {
    ready: AtomicBool,
    table: UnsafeCell<Option<CallbackTable<H>>>,
}

// The table is plain `fn` pointers plus a `&'static str`, and `ready`
// orders the single write before all reads.
unsafe impl<H> Sync for TableCell<H> {}

impl<H> TableCell<H> {
    const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            table: UnsafeCell::new(None),
        }
    }

    fn set(&self, table: CallbackTable<H>) {
        unsafe { *self.table.get() = Some(table) };
        self.ready.store(true, Ordering::Release);
    }

    fn get(&self) -> Option<CallbackTable<H>> {
        if self.ready.load(Ordering::Acquire) {
            unsafe { *self.table.get() }
        } else {
            None
        }
    }
}

/// Connection lifecycle orchestrator for one role.
pub struct ConnLoop<S: HostStack, R: RoleStrategy<S>> {
    stack: S,
    role: R,
    started: AtomicBool,
    state: AtomicU8,
    slot: ConnectionSlot<S::Handle>,
    pairing: PairingCoordinator,
    table: TableCell<S::Handle>,
}

impl<S: HostStack, R: RoleStrategy<S>> ConnLoop<S, R> {
    pub const fn new(stack: S, role: R) -> Self {
        Self {
            stack,
            role,
            started: AtomicBool::new(false),
            state: AtomicU8::new(LifecycleState::Idle as u8),
            slot: ConnectionSlot::new(),
            pairing: PairingCoordinator::new(),
            table: TableCell::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn has_connection(&self) -> bool {
        self.slot.is_occupied()
    }

    /// Run `f` with a borrow of the live connection handle, if any.
    pub fn with_connection<T>(&self, f: impl FnOnce(Option<&S::Handle>) -> T) -> T {
        self.slot.with(f)
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// Move the state byte to `to` if it currently is one of `from`.
    fn transition(&self, from: &[LifecycleState], to: LifecycleState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !from.iter().any(|s| *s as u8 == current) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(seen) => current = seen,
            }
        }
    }

    fn set_state(&self, to: LifecycleState) {
        self.state.store(to as u8, Ordering::Release);
    }

    /// CALL ONLY ONCE: validates the callback table, brings the stack up,
    /// declares the pairing I/O capability, and starts discovery.
    ///
    /// A second call performs no side effects and returns
    /// [`Error::AlreadyStarted`]; the first table stays registered.
    pub fn kickoff(&self, table: CallbackTable<S::Handle>) -> Result<(), Error> {
        table.validate()?;
        self.role.validate_table(&table)?;
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }
        self.table.set(table);

        if let Err(e) = self.stack.enable() {
            error!("err {}: Failed to enable stack.", e.code());
            return Err(e.into());
        }
        if let Err(e) = self.stack.declare_io_capability(table.io_capability()) {
            error!("err {}: Failed to register pairing capability.", e.code());
            return Err(e.into());
        }
        match self.role.start_discovery(&self.stack) {
            Ok(()) => self.set_state(LifecycleState::Discovering),
            // Same policy as every later restart: log, abandon, wait for
            // the stack to report something.
            Err(e) => error!("err {}: Failed to start discovery.", e.code()),
        }
        Ok(())
    }

    /// A device was seen while scanning (central role).
    pub fn on_device_found(&self, addr: S::Addr, rssi: i8, adv_data: &[u8]) {
        if self.state() != LifecycleState::Discovering {
            debug!("Dropping device-found event outside discovery.");
            return;
        }
        let Some(table) = self.table.get() else { return };
        match self
            .role
            .device_found(&self.stack, table.peer_name, &addr, rssi, adv_data)
        {
            FoundDisposition::Connecting => {
                self.transition(&[LifecycleState::Discovering], LifecycleState::Connecting);
            }
            FoundDisposition::Ignored | FoundDisposition::Restarted => {}
        }
    }

    /// A link came up (or failed to).  On success the loop admits the
    /// handle and immediately escalates security; the application is NOT
    /// notified until the escalation completes through
    /// [`Self::on_security_changed`] or [`Self::on_pairing_complete`].
    pub fn on_connected(&self, conn: Result<S::Handle, StackError>) {
        let handle = match conn {
            Ok(h) => h,
            Err(e) => {
                warn!("err {}: Failed connection.", e.code());
                return;
            }
        };
        self.role.halt_discovery_on_connect(&self.stack);

        if !self.slot.try_admit(handle) {
            // More live connections than the single-link configuration
            // allows; a stack or config defect.  Discovery is deliberately
            // not restarted from here.
            error!("Connection slot occupied on connect; dropping new link.");
            return;
        }
        self.transition(
            &[LifecycleState::Discovering, LifecycleState::Connecting],
            LifecycleState::SecuringLink,
        );
        self.slot.with(|h| {
            let Some(h) = h else { return };
            if let Err(e) = self
                .stack
                .request_security(h, SecurityLevel::AuthenticatedLeSecure)
            {
                error!("err {}: Failed to request security.", e.code());
                self.role.escalation_failed(&self.stack, h);
            }
        });
    }

    /// The link went down.  Releases the one held handle - waiting out, if
    /// necessary, a connect notification that has not finished storing it -
    /// then tells the application.  Discovery restarts on the recycled
    /// event that follows.
    pub fn on_disconnected(&self, reason: u8) {
        info!("reason {}: Disconnected.", reason);
        self.set_state(LifecycleState::TearingDown);
        self.pairing.clear();

        let mut released = false;
        for attempt in 0..=config::SLOT_RELEASE_RETRIES {
            if let Some(handle) = self.slot.take() {
                // Dropping the handle returns the stack's reference.
                drop(handle);
                released = true;
                break;
            }
            if attempt == config::SLOT_RELEASE_RETRIES {
                break;
            }
            // The disconnect arrived before the connect handler stored the
            // handle; give it a bounded amount of time to show up.
            self.stack.sleep_ms(config::SLOT_RELEASE_RETRY_MS);
        }
        if !released {
            error!("No handle to release after disconnect; lifecycle defect.");
        }

        if let Some(table) = self.table.get() {
            if let Some(disconnected) = table.disconnected {
                disconnected();
            }
        }
    }

    /// The stack returned the link object to a reusable state; the
    /// authoritative trigger for restarting discovery.
    pub fn on_recycled(&self) {
        match self.role.start_discovery(&self.stack) {
            Ok(()) => self.set_state(LifecycleState::Discovering),
            Err(e) => error!("err {}: Failed to restart discovery.", e.code()),
        }
    }

    /// The peer's random address was resolved to its identity address.
    /// Informational; the addresses are raw on-air bytes.
    pub fn on_identity_resolved(&self, rpa: &[u8; 6], identity: &[u8; 6]) {
        info!(
            "Identity resolved: {:x} is {:x}.",
            addr_bits(rpa),
            addr_bits(identity)
        );
    }

    /// The link security level changed.  Reaching an authenticated level
    /// is what makes the connection visible to the application.
    pub fn on_security_changed(&self, level: SecurityLevel, error: Option<u8>) {
        info!(
            "Sec changed: level {} err {}",
            level as u8,
            error.unwrap_or(0)
        );
        if error.is_none() && level >= SecurityLevel::Authenticated {
            self.finish_authentication();
        }
    }

    fn finish_authentication(&self) {
        let became_authenticated = self.transition(
            &[LifecycleState::SecuringLink, LifecycleState::Pairing],
            LifecycleState::Authenticated,
        );
        if !became_authenticated {
            return; // Already notified, or the link is gone.
        }
        let Some(table) = self.table.get() else { return };
        if let Some(connected) = table.connected {
            self.slot.with(|h| {
                if let Some(h) = h {
                    connected(h);
                }
            });
        }
    }

    fn pairing_active(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::SecuringLink | LifecycleState::Pairing
        )
    }

    /// Stack wants the user shown a passkey.  Forwarded directly; display
    /// is cheap and needs no response.
    pub fn on_passkey_display(&self, passkey: u32) {
        if !self.pairing_active() {
            warn!("Dropping passkey display outside pairing.");
            return;
        }
        self.transition(&[LifecycleState::SecuringLink], LifecycleState::Pairing);
        if let Some(table) = self.table.get() {
            if let Some(display) = table.passkey_display {
                display(passkey);
            }
        }
    }

    /// Stack wants a passkey typed in.  Only records the request; the
    /// stack context returns immediately and the application answers
    /// later through [`Self::service_pairing`] or
    /// [`Self::respond_passkey_entry`].
    pub fn on_passkey_entry(&self) {
        if !self.pairing_active() {
            warn!("Dropping passkey entry request outside pairing.");
            return;
        }
        self.transition(&[LifecycleState::SecuringLink], LifecycleState::Pairing);
        if !self.pairing.post_entry() {
            error!("Passkey request arrived while another is pending.");
        }
    }

    /// Stack wants a yes/no on a displayed passkey.  Recorded like entry.
    pub fn on_passkey_confirm(&self, passkey: u32) {
        if !self.pairing_active() {
            warn!("Dropping passkey confirm request outside pairing.");
            return;
        }
        self.transition(&[LifecycleState::SecuringLink], LifecycleState::Pairing);
        if !self.pairing.post_confirm(passkey) {
            error!("Passkey request arrived while another is pending.");
        }
    }

    /// Stack cancelled the ongoing authentication; any pending credential
    /// request is void.
    pub fn on_pairing_cancel(&self) {
        self.pairing.clear();
    }

    /// Pairing finished.  Informational beyond completing authentication.
    pub fn on_pairing_complete(&self, bonded: bool) {
        info!("Paired. bonded={}", bonded);
        self.finish_authentication();
    }

    /// Pairing failed: the link is dropped with an authentication-failure
    /// reason and the teardown path takes over from the resulting
    /// disconnected event.
    pub fn on_pairing_failed(&self, reason: u8) {
        warn!("reason {}: Pairing failed.", reason);
        self.pairing.clear();
        self.slot.with(|h| {
            let Some(h) = h else { return };
            if let Err(e) = self
                .stack
                .disconnect(h, DisconnectReason::AuthenticationFailure)
            {
                error!("err {}: Failed to disconnect.", e.code());
            }
        });
        self.set_state(LifecycleState::TearingDown);
    }

    /// Pending credential request, if the application wants to drive the
    /// exchange itself instead of via [`Self::service_pairing`].
    pub fn take_pairing_request(&self) -> Option<PairingRequest> {
        self.pairing.take()
    }

    /// Answer an entry request.  In-range values are submitted as the
    /// passkey; anything else cancels the pairing through the stack.
    pub fn respond_passkey_entry(&self, value: i32) -> PasskeyOutcome {
        match pairing::validate_entry(value) {
            Some(passkey) => {
                self.with_live_handle(|stack, h| {
                    if let Err(e) = stack.submit_passkey(h, passkey) {
                        error!("err {}: Failed to input passkey.", e.code());
                    }
                });
                PasskeyOutcome::Accepted
            }
            None => {
                self.cancel_through_stack();
                PasskeyOutcome::Cancelled
            }
        }
    }

    /// Answer a confirm request.
    pub fn respond_passkey_confirm(&self, matches: bool) -> PasskeyOutcome {
        if matches {
            self.with_live_handle(|stack, h| {
                if let Err(e) = stack.confirm_passkey(h) {
                    error!("err {}: Failed to confirm passkey.", e.code());
                }
            });
            PasskeyOutcome::Accepted
        } else {
            self.cancel_through_stack();
            PasskeyOutcome::Rejected
        }
    }

    /// Drain and answer one pending credential request using the callback
    /// table.  Runs the potentially blocking user-input callbacks, so call
    /// this from an application context, never from a stack callback.
    ///
    /// Returns the transaction outcome, or `None` when nothing was
    /// pending.
    pub fn service_pairing(&self) -> Option<PasskeyOutcome> {
        let request = self.pairing.take()?;
        let table = self.table.get()?;
        let outcome = match request {
            PairingRequest::Entry => match table.passkey_entry {
                Some(entry) => self.respond_passkey_entry(entry()),
                None => {
                    // The stack asked for an ability we never declared.
                    error!("Entry requested from a display-only table.");
                    self.cancel_through_stack();
                    PasskeyOutcome::Cancelled
                }
            },
            PairingRequest::Confirm(passkey) => match table.passkey_confirm {
                Some(confirm) => self.respond_passkey_confirm(confirm(passkey)),
                None => {
                    error!("Confirm requested from a display-only table.");
                    self.cancel_through_stack();
                    PasskeyOutcome::Cancelled
                }
            },
        };
        Some(outcome)
    }

    fn cancel_through_stack(&self) {
        self.with_live_handle(|stack, h| {
            if let Err(e) = stack.cancel_pairing(h) {
                error!("err {}: Failed to reject passkey.", e.code());
            }
        });
    }

    fn with_live_handle(&self, f: impl FnOnce(&S, &S::Handle)) {
        self.slot.with(|h| match h {
            Some(h) => f(&self.stack, h),
            None => warn!("No live connection for pairing response."),
        });
    }
}

// Addresses arrive LSB first; fold MSB first so the log reads like a
// written-out address.
fn addr_bits(addr: &[u8; 6]) -> u64 {
    addr.iter().rev().fold(0, |acc, b| (acc << 8) | u64::from(*b))
}
