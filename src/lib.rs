//! # SimLink Library
//!
//! Drive an RC car from sim-racing wheel and pedals via ExpressLRS.
//!
//! This library implements the transmitter-module side of the CRSF
//! (Crossfire) protocol: frame codec, telemetry decoding, the chunked
//! parameter catalogue, and the device session state machine that paces
//! outgoing RC channel frames.

pub mod config;
pub mod error;
pub mod crsf;
pub mod input;
pub mod serial;
pub mod session;
pub mod telemetry;
