//! # CRSF Frame and Telemetry Decoding
//!
//! Validates raw byte buffers into [`Frame`]s and decodes the telemetry
//! frame types the transmitter role consumes: battery (0x08), link
//! statistics (0x14), radio sync (0x3A) and device info (0x29).
//!
//! All decoders are pure transforms. A failed decode never aborts the
//! session loop; the caller logs and drops the frame.

use tracing::trace;

use super::crc::crc8;
use super::protocol::*;
use crate::error::FrameError;

/// Validate a raw buffer into a [`Frame`].
///
/// The buffer may be longer than the frame it starts with; trailing bytes
/// are ignored when the length byte says so. A buffer shorter than its
/// length byte claims is rejected.
///
/// # Errors
///
/// * [`FrameError::Truncated`] - fewer than 5 bytes
/// * [`FrameError::LengthMismatch`] - length byte out of range or buffer
///   shorter than declared
/// * [`FrameError::BadSync`] - sync byte not in [`SYNC_ACCEPTED`]
/// * [`FrameError::CrcMismatch`] - checksum disagreement
pub fn decode_frame(raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.len() < 5 {
        return Err(FrameError::Truncated(raw.len()));
    }

    let expected_len = raw[1] as usize;

    // Length byte covers type + payload + crc; total frame is capped at 64
    if expected_len < 2 || expected_len + 2 > CRSF_MAX_FRAME_SIZE {
        return Err(FrameError::LengthMismatch {
            expected: expected_len,
            actual: raw.len(),
        });
    }

    let raw = if raw.len() - 2 != expected_len {
        if raw.len() > expected_len + 2 {
            &raw[..expected_len + 2]
        } else {
            return Err(FrameError::LengthMismatch {
                expected: expected_len,
                actual: raw.len(),
            });
        }
    } else {
        raw
    };

    if !SYNC_ACCEPTED.contains(&raw[0]) {
        return Err(FrameError::BadSync(raw[0]));
    }

    // CRC covers type + payload, excluding sync, length and the CRC itself
    let received = raw[raw.len() - 1];
    let computed = crc8(&raw[2..raw.len() - 1]);
    if computed != received {
        return Err(FrameError::CrcMismatch { computed, received });
    }

    Ok(Frame {
        sync: raw[0],
        frame_type: raw[2],
        payload: raw[3..raw.len() - 1].to_vec(),
    })
}

/// Decode a battery sensor payload (0x08).
///
/// Voltage and current arrive as big-endian deci-units, capacity as a
/// big-endian 24-bit mAh count.
pub fn decode_battery(payload: &[u8]) -> Result<BatteryTelemetry, FrameError> {
    if payload.len() < CRSF_BATTERY_PAYLOAD_SIZE {
        return Err(FrameError::Truncated(payload.len()));
    }

    let voltage = u16::from_be_bytes([payload[0], payload[1]]) as f32 / 10.0;
    let current = u16::from_be_bytes([payload[2], payload[3]]) as f32 / 10.0;
    let capacity = u32::from_be_bytes([0, payload[4], payload[5], payload[6]]);
    let remaining = payload[7];

    Ok(BatteryTelemetry {
        voltage,
        current,
        capacity,
        remaining,
    })
}

/// Decode a link statistics payload (0x14).
///
/// RSSI bytes carry the magnitude in dBm and are negated on decode.
pub fn decode_link_stats(payload: &[u8]) -> Result<LinkStats, FrameError> {
    if payload.len() < CRSF_LINK_STATS_PAYLOAD_SIZE {
        return Err(FrameError::Truncated(payload.len()));
    }

    Ok(LinkStats {
        uplink_rssi_1: -(payload[0] as i16),
        uplink_rssi_2: -(payload[1] as i16),
        uplink_lq: payload[2],
        uplink_snr: payload[3] as i8,
        active_antenna: payload[4],
        rf_mode: payload[5],
        uplink_tx_power: payload[6],
        downlink_rssi: -(payload[7] as i16),
        downlink_lq: payload[8],
        downlink_snr: payload[9] as i8,
        last_update: None,
    })
}

/// Decode a radio sync body (0x3A, after the extended addresses).
///
/// Only the OpenTX sync subtype (CRSFShot) is understood; other subtypes
/// return `Ok(None)` and are logged by the caller.
pub fn decode_radio_sync(body: &[u8]) -> Result<Option<RadioSync>, FrameError> {
    if body.is_empty() {
        return Err(FrameError::Truncated(0));
    }

    if body[0] != CRSF_SUBTYPE_OPENTX_SYNC {
        trace!("ignoring radio ID subtype 0x{:02X}", body[0]);
        return Ok(None);
    }

    if body.len() < 9 {
        return Err(FrameError::Truncated(body.len()));
    }

    let interval_us =
        u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as f32 / 10.0;
    let phase = i32::from_be_bytes([body[5], body[6], body[7], body[8]]);

    Ok(Some(RadioSync { interval_us, phase }))
}

/// Decode a device info body (0x29, after the extended addresses).
///
/// Layout: null-terminated name, 4-byte serial tag, hardware and software
/// versions (little-endian u32), parameter count, protocol version.
pub fn decode_device_info(body: &[u8]) -> Result<DeviceInfo, FrameError> {
    let nul = body
        .iter()
        .position(|&b| b == 0)
        .ok_or(FrameError::Truncated(body.len()))?;
    let name = String::from_utf8_lossy(&body[..nul]).into_owned();

    let rest = &body[nul + 1..];
    if rest.len() < 14 {
        return Err(FrameError::Truncated(rest.len()));
    }

    Ok(DeviceInfo {
        name,
        serial: [rest[0], rest[1], rest[2], rest[3]],
        hw_version: u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]),
        sw_version: u32::from_le_bytes([rest[8], rest[9], rest[10], rest[11]]),
        param_count: rest[12],
        protocol_version: rest[13],
    })
}

/// Unpack a 22-byte RC channels payload into 16 11-bit values.
///
/// Exact mirror of the LSB-first packing in
/// [`encoder::pack_rc_channels`](super::encoder::pack_rc_channels).
pub fn unpack_rc_channels(payload: &[u8]) -> Result<RcChannels, FrameError> {
    if payload.len() < CRSF_RC_CHANNELS_PAYLOAD_SIZE {
        return Err(FrameError::Truncated(payload.len()));
    }

    let mut channels = [0u16; CRSF_NUM_CHANNELS];
    let mut bit_index = 0;

    for channel in channels.iter_mut() {
        let mut value = 0u16;
        for bit in 0..11 {
            let byte_index = bit_index / 8;
            let bit_offset = bit_index % 8;
            if (payload[byte_index] >> bit_offset) & 1 == 1 {
                value |= 1 << bit;
            }
            bit_index += 1;
        }
        *channel = value;
    }

    Ok(channels)
}

/// Best-effort display decode of an inbound RC channels frame.
///
/// Reads big-endian byte pairs from the raw frame starting at the type
/// byte's successor, which is NOT the 11-bit packing used on the wire.
/// Kept only for tracing looped-back frames; never feeds session state.
pub fn unpack_rc_channels_legacy(raw: &[u8]) -> Vec<u16> {
    let mut channels = Vec::new();
    let mut i = 3;

    while i + 1 < raw.len().saturating_sub(1) && channels.len() < CRSF_NUM_CHANNELS {
        channels.push(u16::from_be_bytes([raw[i], raw[i + 1]]));
        i += 2;
    }

    channels
}
