//! Shared state handed between the control loop and the scheduled tasks.
//!
//! All types are `Copy` so a task can snapshot them cheaply.

use crate::drivers::mavlink::{Attitude, GlobalPosition};

// ── Run mode ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunMode {
    /// Telemetry link required; startup waits for a heartbeat.
    Flight,
    /// No telemetry; sensors and lights only.
    GroundTest,
}

impl RunMode {
    /// Suffix shown in the display header.
    pub const fn tag(self) -> &'static str {
        match self {
            RunMode::Flight => "F",
            RunMode::GroundTest => "G",
        }
    }
}

// ── Per-tick context ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TaskContext {
    /// Most recent fused position, if any has arrived.
    pub gps: Option<GlobalPosition>,
    pub attitude: Option<Attitude>,
    /// Iteration counter of the task currently firing.
    pub iteration: u32,
    pub display_enabled: bool,
}

impl TaskContext {
    pub const fn new(display_enabled: bool) -> Self {
        Self {
            gps: None,
            attitude: None,
            iteration: 0,
            display_enabled,
        }
    }
}
