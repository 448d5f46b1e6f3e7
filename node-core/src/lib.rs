#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Shared logic for the sensor node wake-scheduling core.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware access is expressed through the collaborator
// traits in `clock`, `scheduler`, `sensor` and `node`; the firmware and the
// emulator provide the concrete implementations.

pub mod button;
pub mod clock;
pub mod config;
pub mod display;
pub mod node;
pub mod scheduler;
pub mod sensor;
pub mod telemetry;
