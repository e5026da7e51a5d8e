//! Application-wide constants and compile-time configuration.
//!
//! All protocol constants, UUIDs, and timing parameters live here so they
//! can be tuned in one place.

// Identity

/// Local device name the peripheral role advertises.  The peripheral's
/// callback table must carry the same name; `kickoff` rejects a mismatch
/// as a configuration defect.
pub const DEVICE_NAME: &str = "BlueCat";

// GATT doorbell service

/// Doorbell primary service UUID, 7E9648B5-EE32-4B37-9B96-1C5904381BE2
/// (little-endian byte order, as the SoftDevice expects).
pub const DOORBELL_SERVICE_UUID: [u8; 16] = [
    0xE2, 0x1B, 0x38, 0x04, 0x59, 0x1C, 0x96, 0x9B, //
    0x37, 0x4B, 0x32, 0xEE, 0xB5, 0x48, 0x96, 0x7E,
];

/// Doorbell ring characteristic UUID, 8AE241C9-8029-4051-890D-071F62C36FE3
/// (little-endian).  Readable and notifiable; reads require an
/// authenticated link.
pub const DOORBELL_RING_UUID: [u8; 16] = [
    0xE3, 0x6F, 0xC3, 0x62, 0x1F, 0x07, 0x0D, 0x89, //
    0x51, 0x40, 0x29, 0x80, 0xC9, 0x41, 0xE2, 0x8A,
];

/// Characteristic presentation format code for int32 (Bluetooth assigned
/// numbers, characteristic presentation format table).
pub const DOORBELL_RING_FORMAT_INT32: u8 = 0x10;

/// User description attached to the ring characteristic.
pub const DOORBELL_RING_DESCRIPTION: &str = "DoorbellRing in ms. -1 for not ongoing.";

// Advertising

/// 16-bit service UUID placed in the advertisement payload (Battery
/// Service).  The doorbell service itself is 128-bit and does not fit a
/// 31-byte legacy advertisement next to the name.
pub const ADV_SERVICE_UUID16: u16 = 0x180F;

// Pairing

/// Largest valid 6-digit passkey.
pub const PASSKEY_MAX: u32 = 999_999;

// Connection slot recovery
//
// A disconnect notification can arrive before the connected handler has
// finished storing the handle.  The disconnect path re-checks the slot at
// this interval, up to the retry bound, then gives up and logs a defect.

/// Delay between slot re-checks on the disconnect path (ms).
pub const SLOT_RELEASE_RETRY_MS: u32 = 100;

/// Maximum number of slot re-checks before the release is abandoned.
pub const SLOT_RELEASE_RETRIES: u32 = 100;

// BLE connection parameters (embedded binding)

/// Connection interval range (in 1.25 ms units). 24 = 30 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// Slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// Supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;
