//! # DS4 Bridge Library
//!
//! Userspace DualShock 4 driver.
//!
//! Reads input reports from controllers connected over Bluetooth or USB,
//! exposes them as virtual joystick and mouse devices, and runs configurable
//! actions (LED, battery warning, bindings) on a per-controller event loop.

pub mod actions;
pub mod config;
pub mod device;
pub mod error;
pub mod event_loop;
pub mod output;
pub mod report;
pub mod session;
pub mod supervisor;
