//! BlueCat doorbell firmware: advertises as `BlueCat`, accepts one
//! authenticated connection, and exposes the doorbell ring over GATT.

#![no_std]
#![no_main]

use defmt::{info, unwrap};
use defmt_rtt as _;
use panic_probe as _;

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use nrf_softdevice::{raw, Softdevice};
use static_cell::StaticCell;

use bluecat_link::sd::{advertise_loop, Authenticator, DoorbellServer, SoftdeviceStack};
use bluecat_link::{config, CallbackTable, ConnLoop, DoorbellRing, Peripheral};

type PeripheralLoop = ConnLoop<&'static SoftdeviceStack, Peripheral>;

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn radio_task(
    stack: &'static SoftdeviceStack,
    link: &'static PeripheralLoop,
    security: &'static Authenticator<Peripheral>,
    server: &'static DoorbellServer,
) -> ! {
    advertise_loop(stack, link, security, server).await
}

fn passkey_display(passkey: u32) {
    info!("Passkey: {}", passkey);
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: config::DEVICE_NAME.as_ptr() as _,
            current_len: config::DEVICE_NAME.len() as u16,
            max_len: config::DEVICE_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let mut nrf_config = embassy_nrf::config::Config::default();
    // The SoftDevice reserves the highest interrupt priorities.
    nrf_config.gpiote_interrupt_priority = embassy_nrf::interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = embassy_nrf::interrupt::Priority::P2;
    let _p = embassy_nrf::init(nrf_config);

    let sd_config = softdevice_config();
    let sd = Softdevice::enable(&sd_config);

    static RING: DoorbellRing = DoorbellRing::new();
    static SERVER: StaticCell<DoorbellServer> = StaticCell::new();
    let server: &'static DoorbellServer = SERVER.init(unwrap!(DoorbellServer::new(sd, &RING)));

    let sd: &'static Softdevice = sd;

    static STACK: StaticCell<SoftdeviceStack> = StaticCell::new();
    let stack: &'static SoftdeviceStack = STACK.init(SoftdeviceStack::new(sd));

    static LINK: StaticCell<PeripheralLoop> = StaticCell::new();
    let link: &'static PeripheralLoop = LINK.init(ConnLoop::new(stack, Peripheral));

    static SECURITY: StaticCell<Authenticator<Peripheral>> = StaticCell::new();
    let security: &'static Authenticator<Peripheral> =
        SECURITY.init(Authenticator::new(stack, link));

    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(radio_task(stack, link, security, server)));

    let table = CallbackTable::new(config::DEVICE_NAME, passkey_display);
    if let Err(e) = link.kickoff(table) {
        defmt::panic!("Failed to kickoff the conn loop: {}", e);
    }

    let mut tick: i32 = 0;
    loop {
        Timer::after(Duration::from_millis(2000)).await;
        info!("Hello, loop.");
        // Alternate between an idle spell and a ramping ring value, so a
        // subscribed client sees both the -1 sentinel and real changes.
        let value = if tick % 32 < 16 { -1 } else { tick };
        link.with_connection(|conn| server.ring_write(sd, conn, value));
        tick = tick.wrapping_add(1);
    }
}
