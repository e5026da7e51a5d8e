//! Nordic SoftDevice binding (nRF52840, S140).
//!
//! Implements [`HostStack`] on top of `nrf-softdevice` and bridges the
//! SoftDevice's async API to the synchronous lifecycle loop: the
//! `HostStack` methods record what the radio should be doing, and the
//! role-specific radio loop ([`advertise_loop`] / [`scan_loop`]) carries
//! it out and feeds the resulting events back into the `ConnLoop`.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::signal::Signal;
use embassy_time::{block_for, Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute, Metadata, Properties};
use nrf_softdevice::ble::gatt_server::{self, CharacteristicHandles, RegisterError, WriteOp};
use nrf_softdevice::ble::security::{IoCapabilities, PasskeyReply, SecurityHandler};
use nrf_softdevice::ble::{central, peripheral, Address, Connection, SecurityMode, Uuid};
use nrf_softdevice::{raw, Softdevice};

use crate::adv::ADV_MAX_LEN;
use crate::config;
use crate::conn::{ConnLoop, RoleStrategy};
use crate::doorbell::DoorbellRing;
use crate::error::StackError;
use crate::stack::{DisconnectReason, HostStack, IoCapability, SecurityLevel};

const GATT_CUD_UUID: u16 = 0x2901;
const GATT_CPF_UUID: u16 = 0x2904;

const IO_DISPLAY_ONLY: u8 = 0;
const IO_KEYBOARD_DISPLAY: u8 = 1;

fn sd_err(ret: u32) -> StackError {
    StackError(ret as i32)
}

/// [`HostStack`] over the SoftDevice.
///
/// Discovery commands only flip flags here; the radio loop owns the
/// actual advertise/scan/connect futures, because those are async and
/// the lifecycle loop's command surface is not.
pub struct SoftdeviceStack {
    sd: &'static Softdevice,
    io: AtomicU8,
    adv_active: AtomicBool,
    scan_active: AtomicBool,
    adv_payload: BlockingMutex<CriticalSectionRawMutex, RefCell<Vec<u8, ADV_MAX_LEN>>>,
    connect_target: BlockingMutex<CriticalSectionRawMutex, Cell<Option<Address>>>,
    passkey_reply: BlockingMutex<CriticalSectionRawMutex, Cell<Option<PasskeyReply>>>,
    kick: Signal<CriticalSectionRawMutex, ()>,
}

impl SoftdeviceStack {
    pub fn new(sd: &'static Softdevice) -> Self {
        Self {
            sd,
            io: AtomicU8::new(IO_DISPLAY_ONLY),
            adv_active: AtomicBool::new(false),
            scan_active: AtomicBool::new(false),
            adv_payload: BlockingMutex::new(RefCell::new(Vec::new())),
            connect_target: BlockingMutex::new(Cell::new(None)),
            passkey_reply: BlockingMutex::new(Cell::new(None)),
            kick: Signal::new(),
        }
    }

    fn stash_passkey_reply(&self, reply: PasskeyReply) {
        self.passkey_reply.lock(|cell| cell.set(Some(reply)));
    }

    /// Reply to the SoftDevice's authentication key request.  `key` is
    /// six ASCII digits for a passkey, `None` confirms a matching
    /// numeric-comparison value.
    fn auth_key_reply(
        &self,
        handle: &Connection,
        key_type: u32,
        key: Option<&[u8; 6]>,
    ) -> Result<(), StackError> {
        let conn_handle = handle
            .handle()
            .ok_or(sd_err(raw::BLE_ERROR_INVALID_CONN_HANDLE))?;
        let p_key = key.map_or(core::ptr::null(), |k| k.as_ptr());
        let ret = unsafe { raw::sd_ble_gap_auth_key_reply(conn_handle, key_type as u8, p_key) };
        if ret == raw::NRF_SUCCESS {
            Ok(())
        } else {
            Err(sd_err(ret))
        }
    }
}

fn passkey_digits(passkey: u32) -> [u8; 6] {
    let mut digits = [0u8; 6];
    let mut value = passkey;
    for d in digits.iter_mut().rev() {
        *d = b'0' + (value % 10) as u8;
        value /= 10;
    }
    digits
}

impl HostStack for SoftdeviceStack {
    type Handle = Connection;
    type Addr = Address;

    fn enable(&self) -> Result<(), StackError> {
        // The SoftDevice itself is brought up at boot, before this stack
        // exists; nothing left to do by kickoff time.
        Ok(())
    }

    fn declare_io_capability(&self, cap: IoCapability) -> Result<(), StackError> {
        let raw_cap = match cap {
            IoCapability::DisplayOnly => IO_DISPLAY_ONLY,
            IoCapability::KeyboardDisplay => IO_KEYBOARD_DISPLAY,
        };
        self.io.store(raw_cap, Ordering::Release);
        Ok(())
    }

    fn adv_start(&self, payload: &[u8]) -> Result<(), StackError> {
        self.adv_payload.lock(|p| {
            let mut p = p.borrow_mut();
            p.clear();
            p.extend_from_slice(payload)
        })
        .map_err(|_| sd_err(raw::NRF_ERROR_DATA_SIZE))?;
        self.adv_active.store(true, Ordering::Release);
        self.kick.signal(());
        Ok(())
    }

    fn adv_stop(&self) -> Result<(), StackError> {
        // The advertise future already ended when it produced the
        // connection; the flag keeps the radio loop from re-arming.
        self.adv_active.store(false, Ordering::Release);
        Ok(())
    }

    fn scan_start(&self) -> Result<(), StackError> {
        self.scan_active.store(true, Ordering::Release);
        self.kick.signal(());
        Ok(())
    }

    fn scan_stop(&self) -> Result<(), StackError> {
        self.scan_active.store(false, Ordering::Release);
        Ok(())
    }

    fn connect(&self, addr: &Address) -> Result<(), StackError> {
        self.connect_target.lock(|c| c.set(Some(*addr)));
        Ok(())
    }

    fn disconnect(&self, handle: &Connection, reason: DisconnectReason) -> Result<(), StackError> {
        // The SoftDevice picks the HCI reason code itself.
        let _ = reason;
        handle
            .disconnect()
            .map_err(|_| sd_err(raw::BLE_ERROR_INVALID_CONN_HANDLE))
    }

    fn request_security(
        &self,
        handle: &Connection,
        _level: SecurityLevel,
    ) -> Result<(), StackError> {
        // The target level (LESC with MITM) is fixed by the security
        // parameters the handler negotiates.
        handle
            .request_pairing()
            .map_err(|_| sd_err(raw::NRF_ERROR_INVALID_STATE))
    }

    fn submit_passkey(&self, handle: &Connection, passkey: u32) -> Result<(), StackError> {
        let digits = passkey_digits(passkey);
        match self.passkey_reply.lock(|cell| cell.take()) {
            Some(reply) => {
                reply.reply(Some(&digits));
                Ok(())
            }
            None => self.auth_key_reply(handle, raw::BLE_GAP_AUTH_KEY_TYPE_PASSKEY, Some(&digits)),
        }
    }

    fn confirm_passkey(&self, handle: &Connection) -> Result<(), StackError> {
        self.auth_key_reply(handle, raw::BLE_GAP_AUTH_KEY_TYPE_PASSKEY, None)
    }

    fn cancel_pairing(&self, handle: &Connection) -> Result<(), StackError> {
        if let Some(reply) = self.passkey_reply.lock(|cell| cell.take()) {
            reply.reply(None);
            return Ok(());
        }
        self.auth_key_reply(handle, raw::BLE_GAP_AUTH_KEY_TYPE_NONE, None)
    }

    fn sleep_ms(&self, ms: u32) {
        block_for(Duration::from_millis(ms as u64));
    }
}

/// [`SecurityHandler`] that forwards the SoftDevice's pairing traffic
/// into the lifecycle loop.
pub struct Authenticator<R>
where
    R: RoleStrategy<&'static SoftdeviceStack> + 'static,
{
    stack: &'static SoftdeviceStack,
    link: &'static ConnLoop<&'static SoftdeviceStack, R>,
}

impl<R> Authenticator<R>
where
    R: RoleStrategy<&'static SoftdeviceStack> + 'static,
{
    pub fn new(
        stack: &'static SoftdeviceStack,
        link: &'static ConnLoop<&'static SoftdeviceStack, R>,
    ) -> Self {
        Self { stack, link }
    }
}

impl<R> SecurityHandler for Authenticator<R>
where
    R: RoleStrategy<&'static SoftdeviceStack> + 'static,
{
    fn io_capabilities(&self) -> IoCapabilities {
        match self.stack.io.load(Ordering::Acquire) {
            IO_KEYBOARD_DISPLAY => IoCapabilities::KeyboardDisplay,
            _ => IoCapabilities::DisplayOnly,
        }
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        // No bond storage yet; every connection pairs afresh.
        false
    }

    fn display_passkey(&self, passkey: &[u8; 6]) {
        let mut value: u32 = 0;
        for d in passkey {
            value = value * 10 + u32::from(d.wrapping_sub(b'0'));
        }
        self.link.on_passkey_display(value);
    }

    fn enter_passkey(&self, reply: PasskeyReply) {
        self.stack.stash_passkey_reply(reply);
        self.link.on_passkey_entry();
    }

    fn on_security_update(&self, _conn: &Connection, security_mode: SecurityMode) {
        let level = match security_mode {
            SecurityMode::NoAccess | SecurityMode::Open => SecurityLevel::None,
            SecurityMode::JustWorks | SecurityMode::Signed => SecurityLevel::Encrypted,
            SecurityMode::Mitm | SecurityMode::SignedMitm => SecurityLevel::Authenticated,
            SecurityMode::LescMitm => SecurityLevel::AuthenticatedLeSecure,
        };
        self.link.on_security_changed(level, None);
    }
}

/// Doorbell GATT service: one int32 ring characteristic, readable and
/// notifiable on an authenticated link, with the presentation format and
/// user description descriptors clients use to interpret it.
pub struct DoorbellServer {
    state: &'static DoorbellRing,
    ring: CharacteristicHandles,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DoorbellEvent {
    RingNotificationsChanged(bool),
}

impl DoorbellServer {
    pub fn new(sd: &mut Softdevice, state: &'static DoorbellRing) -> Result<Self, RegisterError> {
        let mut service = ServiceBuilder::new(sd, Uuid::new_128(&config::DOORBELL_SERVICE_UUID))?;

        let initial = state.read_le();
        let attr = Attribute::new(&initial).security(SecurityMode::Mitm);
        let props = Properties::new().read().notify();
        let mut characteristic = service.add_characteristic(
            Uuid::new_128(&config::DOORBELL_RING_UUID),
            attr,
            Metadata::new(props),
        )?;

        let _ = characteristic.add_descriptor(
            Uuid::new_16(GATT_CUD_UUID),
            Attribute::new(config::DOORBELL_RING_DESCRIPTION.as_bytes())
                .security(SecurityMode::Mitm),
        )?;
        // Presentation format: int32, no exponent, unit, or namespace.
        let cpf = [config::DOORBELL_RING_FORMAT_INT32, 0, 0, 0, 0, 0, 0];
        let _ = characteristic.add_descriptor(Uuid::new_16(GATT_CPF_UUID), Attribute::new(&cpf))?;

        let ring = characteristic.build();
        let _ = service.build();

        Ok(Self { state, ring })
    }

    /// Update the ring value, notifying subscribers only when it changed.
    pub fn ring_write(&self, sd: &Softdevice, conn: Option<&Connection>, millis: i32) {
        let Some(payload) = self.state.write(millis) else {
            return;
        };
        if let Err(e) = gatt_server::set_value(sd, self.ring.value_handle, &payload) {
            error!("Failed to set ring value: {}", defmt::Debug2Format(&e));
            return;
        }
        if let Some(conn) = conn {
            // Not subscribed is fine; reads still see the new value.
            let _ = gatt_server::notify_value(conn, self.ring.value_handle, &payload);
        }
    }
}

impl gatt_server::Server for DoorbellServer {
    type Event = DoorbellEvent;

    fn on_write(
        &self,
        _conn: &Connection,
        handle: u16,
        _op: WriteOp,
        _offset: usize,
        data: &[u8],
    ) -> Option<Self::Event> {
        if handle == self.ring.cccd_handle && !data.is_empty() {
            return Some(DoorbellEvent::RingNotificationsChanged(data[0] & 0x01 != 0));
        }
        None
    }
}

/// Peripheral radio loop: advertise, serve the doorbell GATT table until
/// disconnect, report every step into the lifecycle loop.
pub async fn advertise_loop<R>(
    stack: &'static SoftdeviceStack,
    link: &'static ConnLoop<&'static SoftdeviceStack, R>,
    security: &'static Authenticator<R>,
    server: &'static DoorbellServer,
) -> !
where
    R: RoleStrategy<&'static SoftdeviceStack> + 'static,
{
    loop {
        if !stack.adv_active.load(Ordering::Acquire) {
            stack.kick.wait().await;
            continue;
        }
        let payload = stack.adv_payload.lock(|p| p.borrow().clone());
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &payload,
            scan_data: &[],
        };
        let adv_config = peripheral::Config::default();
        match peripheral::advertise_pairable(stack.sd, adv, &adv_config, security).await {
            Ok(conn) => {
                link.on_connected(Ok(conn.clone()));
                let _disconnected = gatt_server::run(&conn, server, |event| match event {
                    DoorbellEvent::RingNotificationsChanged(enabled) => {
                        info!("Ring notifications enabled: {}", enabled);
                    }
                })
                .await;
                link.on_disconnected(0);
                drop(conn);
                link.on_recycled();
            }
            Err(e) => {
                warn!("Advertising ended: {}", defmt::Debug2Format(&e));
                link.on_recycled();
            }
        }
    }
}

/// Central radio loop: scan, let the lifecycle loop pick the peer, then
/// connect with security and watch the link until it drops.
pub async fn scan_loop<R>(
    stack: &'static SoftdeviceStack,
    link: &'static ConnLoop<&'static SoftdeviceStack, R>,
    security: &'static Authenticator<R>,
) -> !
where
    R: RoleStrategy<&'static SoftdeviceStack> + 'static,
{
    loop {
        if !stack.scan_active.load(Ordering::Acquire) {
            stack.kick.wait().await;
            continue;
        }
        let scan_config = central::ScanConfig::default();
        let found = central::scan(stack.sd, &scan_config, |report| {
            let len = report.data.len as usize;
            let data = unsafe { core::slice::from_raw_parts(report.data.p_data, len) };
            link.on_device_found(Address::from_raw(report.peer_addr), report.rssi, data);
            // The loop reacted by stopping the scan and naming a target,
            // or by ignoring the report.
            stack.connect_target.lock(|c| c.take())
        })
        .await;

        let target = match found {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Scan ended: {}", defmt::Debug2Format(&e));
                continue;
            }
        };

        let whitelist = [&target];
        let connect_config = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                ..Default::default()
            },
            conn_params: raw::ble_gap_conn_params_t {
                min_conn_interval: config::BLE_CONN_INTERVAL_MIN,
                max_conn_interval: config::BLE_CONN_INTERVAL_MAX,
                slave_latency: config::BLE_SLAVE_LATENCY,
                conn_sup_timeout: config::BLE_SUP_TIMEOUT,
            },
            ..Default::default()
        };
        match central::connect_with_security(stack.sd, &connect_config, security).await {
            Ok(conn) => {
                link.on_connected(Ok(conn.clone()));
                while conn.handle().is_some() {
                    Timer::after(Duration::from_millis(500)).await;
                }
                link.on_disconnected(0);
                drop(conn);
                link.on_recycled();
            }
            Err(_) => {
                link.on_connected(Err(sd_err(raw::NRF_ERROR_TIMEOUT)));
                link.on_recycled();
            }
        }
    }
}
