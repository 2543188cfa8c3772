#![cfg_attr(not(test), no_std)]

//! Flight-data payload core.
//!
//! Everything that decides *what* the payload does lives here, behind the
//! collaborator traits in [`hal`]: the telemetry frame decoder, the link
//! liveness supervisor, the indicator pattern engine, the cooperative task
//! scheduler and the control loop tying them together. The firmware binary
//! only wires STM32 peripherals into these traits.

#[macro_use]
mod fmt;

pub mod config;
pub mod control_loop;
pub mod drivers;
pub mod hal;
pub mod link;
pub mod liveness;
pub mod patterns;
pub mod scheduler;
pub mod sensor_log;
pub mod state;

#[cfg(test)]
mod mock;

pub use control_loop::{ControlLoop, StartupError, StopReason};
pub use state::{RunMode, TaskContext};
