//! Testing utilities for shutterbug
//!
//! Synthetic photo payloads and device fixtures for driving the capture
//! service against the simulated platform without hardware.

pub mod synthetic_data;

pub use synthetic_data::{fixture_devices, synthetic_photo_jpeg, FixtureDevices};
