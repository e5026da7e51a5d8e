//! Role strategies: what "discovery" means and how security failures are
//! handled differ between the two roles; everything else is shared by the
//! lifecycle loop.

use crate::adv;
use crate::callbacks::CallbackTable;
use crate::config;
use crate::error::{Error, StackError};
use crate::stack::{DisconnectReason, HostStack};

/// What became of a discovered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FoundDisposition {
    /// Not our peer, or the event could not be acted on; keep discovering.
    Ignored,
    /// Discovery stopped and a connection request is in flight.
    Connecting,
    /// Connection initiation failed; discovery was restarted.
    Restarted,
}

/// The role-specific seam of the connection loop.
pub trait RoleStrategy<S: HostStack>: Sync {
    /// Role-specific callback-table checks, run during `kickoff` before
    /// any stack interaction.
    fn validate_table(&self, table: &CallbackTable<S::Handle>) -> Result<(), Error>;

    /// Begin advertising (peripheral) or scanning (central).
    fn start_discovery(&self, stack: &S) -> Result<(), StackError>;

    /// Stop discovery when a raw link appears.  Only the peripheral has
    /// work here: the central already stopped scanning before initiating.
    fn halt_discovery_on_connect(&self, _stack: &S) {}

    /// React to a discovered device (central only).
    fn device_found(
        &self,
        _stack: &S,
        _peer_name: &str,
        _addr: &S::Addr,
        _rssi: i8,
        _adv_data: &[u8],
    ) -> FoundDisposition {
        warn!("Device-found event in a role that does not scan.");
        FoundDisposition::Ignored
    }

    /// React to a failed security escalation on a fresh link.
    fn escalation_failed(&self, stack: &S, handle: &S::Handle);
}

/// Advertises and accepts one inbound connection.
pub struct Peripheral;

impl<S: HostStack> RoleStrategy<S> for Peripheral {
    fn validate_table(&self, table: &CallbackTable<S::Handle>) -> Result<(), Error> {
        // The advertised name comes from the build configuration; a table
        // naming anything else is wired to the wrong device.
        if table.peer_name != config::DEVICE_NAME {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }

    fn start_discovery(&self, stack: &S) -> Result<(), StackError> {
        let payload = adv::peripheral_adv_payload();
        stack.adv_start(&payload)
    }

    fn halt_discovery_on_connect(&self, stack: &S) {
        if let Err(e) = stack.adv_stop() {
            // The stack is assumed to already be in the desired state, or
            // will report otherwise through its own callbacks.
            error!("err {}: Failed to stop adv.", e.code());
        }
    }

    fn escalation_failed(&self, stack: &S, handle: &S::Handle) {
        // Inbound link on our radio: drop it rather than serve an
        // unauthenticated peer.
        if let Err(e) = stack.disconnect(handle, DisconnectReason::AuthenticationFailure) {
            error!("err {}: Failed to disconnect.", e.code());
        }
    }
}

/// Scans for and connects to one named peer.
pub struct Central;

impl<S: HostStack> RoleStrategy<S> for Central {
    fn validate_table(&self, table: &CallbackTable<S::Handle>) -> Result<(), Error> {
        // `CallbackTable::validate` already rejects an empty peer name;
        // nothing central-specific to add yet.
        let _ = table;
        Ok(())
    }

    fn start_discovery(&self, stack: &S) -> Result<(), StackError> {
        stack.scan_start()
    }

    fn device_found(
        &self,
        stack: &S,
        peer_name: &str,
        addr: &S::Addr,
        rssi: i8,
        adv_data: &[u8],
    ) -> FoundDisposition {
        if let Some(name) = adv::extract_peer_name(adv_data) {
            debug!("Found {}, rssi {}.", name.as_str(), rssi);
        }
        if !adv::peer_name_matches(adv_data, peer_name) {
            debug!("Peer name wrong.");
            return FoundDisposition::Ignored;
        }
        if let Err(e) = stack.scan_stop() {
            // Supposedly the scanning is still ongoing?
            error!("err {}: Failed to stop LE scan.", e.code());
            return FoundDisposition::Ignored;
        }
        if let Err(e) = stack.connect(addr) {
            error!("err {}: Failed to initiate connection.", e.code());
            // No connection was created, so no slot bookkeeping: just get
            // back to scanning.
            if let Err(e) = stack.scan_start() {
                error!("err {}: Failed to start scanning.", e.code());
            }
            return FoundDisposition::Restarted;
        }
        FoundDisposition::Connecting
    }

    fn escalation_failed(&self, _stack: &S, _handle: &S::Handle) {
        // Outbound link so soon after creation: not enough assurance the
        // link can take a disconnect command; let the stack sort it out.
    }
}
