//! # CRSF Protocol Module
//!
//! Implementation of the Crossfire (CRSF) protocol as spoken by an
//! ExpressLRS transmitter module over USB serial.
//!
//! This module handles:
//! - Frame validation and assembly (sync, length, CRC8-DVB-S2)
//! - RC channels packet encoding (16 channels, 11-bit resolution)
//! - Telemetry packet decoding (Link Stats, Battery, Radio Sync)
//! - Device info and the chunked parameter catalogue

pub mod crc;
pub mod decoder;
pub mod encoder;
pub mod params;
pub mod protocol;
