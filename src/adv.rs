//! BLE advertisement payload parsing and construction.
//!
//! Legacy advertising data is a sequence of AD structures:
//! `| len | type | payload... |` where `len` counts the type byte plus
//! the payload.  The central role parses incoming payloads to match the
//! peer name; the peripheral role builds its fixed outgoing payload here.

use heapless::{String, Vec};

use crate::config;

/// AD type: flags.
pub const AD_FLAGS: u8 = 0x01;
/// AD type: incomplete list of 16-bit service UUIDs.
pub const AD_UUID16_SOME: u8 = 0x02;
/// AD type: shortened local name.
pub const AD_NAME_SHORTENED: u8 = 0x08;
/// AD type: complete local name.
pub const AD_NAME_COMPLETE: u8 = 0x09;

/// Flags payload: LE general discoverable, BR/EDR not supported.
pub const FLAGS_GENERAL_NO_BREDR: u8 = 0x02 | 0x04;

/// Maximum legacy advertisement payload size.
pub const ADV_MAX_LEN: usize = 31;

/// Iterator over the AD structures of a raw advertisement payload.
///
/// Stops at the first malformed structure (zero length or one running
/// past the end of the buffer).
pub struct AdStructures<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AdStructures<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    /// `(ad_type, payload)`
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.pos;
        if i >= self.data.len() {
            return None;
        }
        let len = self.data[i] as usize;
        if len == 0 || i + 1 + len > self.data.len() {
            return None;
        }
        let ad_type = self.data[i + 1];
        let payload = &self.data[i + 2..i + 1 + len];
        self.pos = i + 1 + len;
        Some((ad_type, payload))
    }
}

/// Check whether the advertisement carries `name` as its local name.
///
/// Byte-exact and length-exact.  Only the first name structure counts;
/// a payload with several name structures is decided by the first one,
/// matching how the stack-side parser walks the payload.
pub fn peer_name_matches(adv_data: &[u8], name: &str) -> bool {
    for (ad_type, payload) in AdStructures::new(adv_data) {
        if ad_type == AD_NAME_SHORTENED || ad_type == AD_NAME_COMPLETE {
            return payload == name.as_bytes();
        }
    }
    false
}

/// Extract the local name for diagnostics, truncated to 32 bytes.
pub fn extract_peer_name(adv_data: &[u8]) -> Option<String<32>> {
    for (ad_type, payload) in AdStructures::new(adv_data) {
        if ad_type == AD_NAME_SHORTENED || ad_type == AD_NAME_COMPLETE {
            let mut name = String::new();
            for &b in payload {
                if name.push(b as char).is_err() {
                    break;
                }
            }
            return Some(name);
        }
    }
    None
}

fn push_ad(out: &mut Vec<u8, ADV_MAX_LEN>, ad_type: u8, payload: &[u8]) {
    // The fixed peripheral payload is sized to fit; a failed push would
    // be a compile-time constant mistake, so truncation is acceptable.
    let _ = out.push(payload.len() as u8 + 1);
    let _ = out.push(ad_type);
    let _ = out.extend_from_slice(payload);
}

/// Build the peripheral's fixed connectable advertisement: flags, a
/// 16-bit service UUID list, and the complete device name.
pub fn peripheral_adv_payload() -> Vec<u8, ADV_MAX_LEN> {
    let mut out = Vec::new();
    push_ad(&mut out, AD_FLAGS, &[FLAGS_GENERAL_NO_BREDR]);
    push_ad(&mut out, AD_UUID16_SOME, &config::ADV_SERVICE_UUID16.to_le_bytes());
    push_ad(&mut out, AD_NAME_COMPLETE, config::DEVICE_NAME.as_bytes());
    out
}
