//! # DS4 Report Codec
//!
//! Pure encoding and decoding of DualShock 4 HID reports.
//!
//! This module handles:
//! - Input report decoding for USB, L2CAP and hidraw Bluetooth framings
//! - Output (LED, flash, rumble) report encoding
//! - Typed button and axis names used by combos and layouts

pub mod protocol;
pub mod fields;
pub mod decoder;
pub mod encoder;
