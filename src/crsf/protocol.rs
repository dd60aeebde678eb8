//! # CRSF Protocol Constants and Types
//!
//! Wire-level definitions for the Crossfire protocol: sync/address bytes,
//! frame type tags, channel value ranges, and the records decoded from
//! telemetry frames.

use serde::Serialize;
use std::time::Instant;

use crate::error::{FrameError, Result, SimlinkError};

/// Transmitter-module serial sync byte (also the flight controller address)
pub const CRSF_SYNC_BYTE: u8 = 0xC8;

/// Broadcast device address
pub const CRSF_ADDRESS_BROADCAST: u8 = 0x00;

/// Remote control (handset) address
pub const CRSF_ADDRESS_RADIO: u8 = 0xEA;

/// Crossfire receiver address as observed on the wire.
///
/// Documented receivers answer as 0xEC; target hardware has been seen using
/// 0x0C. Confirm against the device before changing the accepted set.
pub const CRSF_ADDRESS_RECEIVER: u8 = 0x0C;

/// Crossfire transmitter module address
pub const CRSF_ADDRESS_TRANSMITTER: u8 = 0xEE;

/// Sync bytes accepted on inbound frames
pub const SYNC_ACCEPTED: [u8; 4] = [
    CRSF_ADDRESS_BROADCAST,
    CRSF_ADDRESS_RADIO,
    CRSF_ADDRESS_RECEIVER,
    CRSF_SYNC_BYTE,
];

/// Battery sensor telemetry
pub const CRSF_FRAMETYPE_BATTERY_SENSOR: u8 = 0x08;

/// Link statistics telemetry
pub const CRSF_FRAMETYPE_LINK_STATISTICS: u8 = 0x14;

/// RC channels, 16 x 11-bit packed
pub const CRSF_FRAMETYPE_RC_CHANNELS_PACKED: u8 = 0x16;

/// Device ping (extended)
pub const CRSF_FRAMETYPE_DEVICE_PING: u8 = 0x28;

/// Device info, ping response (extended)
pub const CRSF_FRAMETYPE_DEVICE_INFO: u8 = 0x29;

/// Parameter settings entry, one chunk per frame (extended)
pub const CRSF_FRAMETYPE_PARAMETER_SETTINGS_ENTRY: u8 = 0x2B;

/// Parameter read request (extended)
pub const CRSF_FRAMETYPE_PARAMETER_READ: u8 = 0x2C;

/// Radio ID / timing sync (extended)
pub const CRSF_FRAMETYPE_RADIO_ID: u8 = 0x3A;

/// Frame types at or above this carry destination/origin address bytes
/// ahead of the type-specific body
pub const CRSF_EXTENDED_TYPE_MIN: u8 = 0x28;

/// Radio ID subtype for OpenTX sync (CRSFShot)
pub const CRSF_SUBTYPE_OPENTX_SYNC: u8 = 0x10;

/// CRSF hard limit on total frame size
pub const CRSF_MAX_FRAME_SIZE: usize = 64;

/// Maximum payload size: sync(1) + length(1) + type(1) + payload(N) + crc(1)
pub const CRSF_MAX_PAYLOAD_SIZE: usize = CRSF_MAX_FRAME_SIZE - 4;

/// RC channels payload size (16 channels x 11 bits = 176 bits)
pub const CRSF_RC_CHANNELS_PAYLOAD_SIZE: usize = 22;

/// Number of RC channels
pub const CRSF_NUM_CHANNELS: usize = 16;

/// Channel value range used by CRSF links (988us..2012us equivalent)
pub const CRSF_CHANNEL_VALUE_MIN: u16 = 172;
pub const CRSF_CHANNEL_VALUE_MAX: u16 = 1811;
pub const CRSF_CHANNEL_VALUE_CENTER: u16 = 992;

/// Default steering value before any input arrives. Deliberately off-center
/// so a live link is visible on the receiver side.
pub const CRSF_CHANNEL_LIVENESS: u16 = 1300;

/// Link statistics payload size
pub const CRSF_LINK_STATS_PAYLOAD_SIZE: usize = 10;

/// Battery sensor payload size
pub const CRSF_BATTERY_PAYLOAD_SIZE: usize = 8;

/// RC channels array type (16 channels, 11-bit values)
pub type RcChannels = [u16; CRSF_NUM_CHANNELS];

/// A validated CRSF frame.
///
/// `payload` holds everything between the type byte and the CRC; for
/// extended frames that includes the leading destination and origin
/// address bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sync / address byte the frame arrived under
    pub sync: u8,

    /// Frame type tag
    pub frame_type: u8,

    /// Payload bytes (destination/origin included for extended types)
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame, validating the payload size limit.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::LengthMismatch`] if the payload exceeds
    /// [`CRSF_MAX_PAYLOAD_SIZE`].
    pub fn new(sync: u8, frame_type: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > CRSF_MAX_PAYLOAD_SIZE {
            return Err(SimlinkError::Frame(FrameError::LengthMismatch {
                expected: CRSF_MAX_PAYLOAD_SIZE,
                actual: payload.len(),
            }));
        }

        Ok(Self {
            sync,
            frame_type,
            payload,
        })
    }

    /// Frame length byte value: type + payload + crc
    pub fn length(&self) -> u8 {
        (1 + self.payload.len() + 1) as u8
    }

    /// Whether this frame type carries extended addressing
    pub fn is_extended(&self) -> bool {
        self.frame_type >= CRSF_EXTENDED_TYPE_MIN
    }

    /// Split an extended frame's payload into (destination, origin, body).
    ///
    /// Returns `None` for non-extended types or payloads too short to hold
    /// the two address bytes.
    pub fn extended_body(&self) -> Option<(u8, u8, &[u8])> {
        if !self.is_extended() || self.payload.len() < 2 {
            return None;
        }
        Some((self.payload[0], self.payload[1], &self.payload[2..]))
    }
}

/// Link statistics telemetry, one record per 0x14 frame.
///
/// RSSI fields are stored as signed dBm (the wire carries the magnitude).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LinkStats {
    /// Uplink RSSI antenna 1 in dBm
    pub uplink_rssi_1: i16,

    /// Uplink RSSI antenna 2 in dBm (diversity)
    pub uplink_rssi_2: i16,

    /// Uplink link quality (0-100%)
    pub uplink_lq: u8,

    /// Uplink SNR in dB
    pub uplink_snr: i8,

    /// Active antenna (0 or 1)
    pub active_antenna: u8,

    /// RF mode / packet rate
    pub rf_mode: u8,

    /// Uplink TX power (encoded enum)
    pub uplink_tx_power: u8,

    /// Downlink RSSI in dBm
    pub downlink_rssi: i16,

    /// Downlink link quality (0-100%)
    pub downlink_lq: u8,

    /// Downlink SNR in dB
    pub downlink_snr: i8,

    /// When this record was last refreshed by a received frame
    #[serde(skip)]
    pub last_update: Option<Instant>,
}

/// Battery sensor telemetry, one record per 0x08 frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BatteryTelemetry {
    /// Battery voltage in volts
    pub voltage: f32,

    /// Current draw in amperes
    pub current: f32,

    /// Capacity used in mAh
    pub capacity: u32,

    /// Battery remaining percentage (0-100%)
    pub remaining: u8,
}

/// Radio timing sync (CRSFShot), one record per 0x3A/OPENTX_SYNC frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct RadioSync {
    /// Packet interval in microseconds
    pub interval_us: f32,

    /// Phase offset, signed
    pub phase: i32,
}

/// Device identity, set once per handshake from a 0x29 frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Device display name
    pub name: String,

    /// Four-byte serial tag (e.g. "ELRS")
    pub serial: [u8; 4],

    /// Hardware version, little-endian on the wire
    pub hw_version: u32,

    /// Software version, little-endian on the wire
    pub sw_version: u32,

    /// Number of configuration parameters the device exposes
    pub param_count: u8,

    /// Parameter protocol version
    pub protocol_version: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_value_ranges() {
        assert_eq!(CRSF_CHANNEL_VALUE_MIN, 172);
        assert_eq!(CRSF_CHANNEL_VALUE_MAX, 1811);
        assert_eq!(CRSF_CHANNEL_VALUE_CENTER, 992);
        assert!(CRSF_CHANNEL_LIVENESS != CRSF_CHANNEL_VALUE_CENTER);
    }

    #[test]
    fn test_frame_constants() {
        assert_eq!(CRSF_SYNC_BYTE, 0xC8);
        assert_eq!(CRSF_FRAMETYPE_RC_CHANNELS_PACKED, 0x16);
        assert_eq!(CRSF_FRAMETYPE_PARAMETER_SETTINGS_ENTRY, 0x2B);
        assert_eq!(CRSF_NUM_CHANNELS, 16);
        assert_eq!(SYNC_ACCEPTED, [0x00, 0xEA, 0x0C, 0xC8]);
    }

    #[test]
    fn test_frame_length() {
        let frame = Frame::new(CRSF_SYNC_BYTE, CRSF_FRAMETYPE_RC_CHANNELS_PACKED, vec![0u8; 22])
            .unwrap();
        assert_eq!(frame.frame_type, 0x16);
        assert_eq!(frame.length(), 24); // 1 (type) + 22 (payload) + 1 (crc)
        assert!(!frame.is_extended());
    }

    #[test]
    fn test_frame_payload_too_large() {
        let result = Frame::new(CRSF_SYNC_BYTE, CRSF_FRAMETYPE_RC_CHANNELS_PACKED, vec![0u8; 61]);
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_max_payload() {
        let frame = Frame::new(CRSF_SYNC_BYTE, CRSF_FRAMETYPE_RC_CHANNELS_PACKED, vec![0u8; 60])
            .unwrap();
        assert_eq!(frame.payload.len(), 60);
        assert_eq!(frame.length(), 62);
    }

    #[test]
    fn test_extended_body_split() {
        let frame = Frame::new(
            CRSF_ADDRESS_RADIO,
            CRSF_FRAMETYPE_PARAMETER_SETTINGS_ENTRY,
            vec![0xEA, 0xEE, 0x05, 0x02, 0xAB],
        )
        .unwrap();

        let (dest, origin, body) = frame.extended_body().unwrap();
        assert_eq!(dest, 0xEA);
        assert_eq!(origin, 0xEE);
        assert_eq!(body, &[0x05, 0x02, 0xAB]);
    }

    #[test]
    fn test_extended_body_non_extended_type() {
        let frame = Frame::new(
            CRSF_SYNC_BYTE,
            CRSF_FRAMETYPE_LINK_STATISTICS,
            vec![0u8; 10],
        )
        .unwrap();
        assert!(frame.extended_body().is_none());
    }
}
