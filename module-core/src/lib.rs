#![no_std]

// Control and communication nucleus for a battery module controller.
//
// Everything in this crate is portable across the MCU firmware and host
// tooling: hardware sits behind small traits with simulated implementations,
// and all state is statically sized.

pub mod collaborators;
pub mod console;
pub mod durable;
pub mod frame;
pub mod node;
pub mod power;
pub mod protocol;
pub mod scheduler;
pub mod telemetry;
pub mod transport;
