//! Heartbeat liveness supervision.
//!
//! [`LivenessSupervisor`] is plain state owned by the control loop. The
//! visible side effect, a blinking warning LED, is a [`WarningBeacon`] shared
//! with a 10 Hz timer task.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::hal::Indicator;

/// Warning blink rate on the board.
pub const WARNING_BLINK_HZ: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    AwaitingFirst,
    Alive,
    Warning,
}

impl LinkState {
    pub const fn as_str(self) -> &'static str {
        match self {
            LinkState::AwaitingFirst => "awaiting-first",
            LinkState::Alive => "alive",
            LinkState::Warning => "warning",
        }
    }
}

/// State changes the caller has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Transition {
    /// First heartbeat seen.
    Connected,
    /// Liveness threshold reached without a heartbeat.
    Lost,
    /// Heartbeat back after a loss.
    Recovered,
}

pub struct LivenessSupervisor {
    state: LinkState,
    last_heartbeat_ms: u32,
    threshold_ms: u32,
    heartbeats: u32,
    losses: u32,
}

impl LivenessSupervisor {
    pub const fn new(threshold_ms: u32) -> Self {
        Self {
            state: LinkState::AwaitingFirst,
            last_heartbeat_ms: 0,
            threshold_ms,
            heartbeats: 0,
            losses: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn warning_active(&self) -> bool {
        self.state == LinkState::Warning
    }

    pub fn heartbeats(&self) -> u32 {
        self.heartbeats
    }

    pub fn losses(&self) -> u32 {
        self.losses
    }

    pub fn last_heartbeat_ms(&self) -> u32 {
        self.last_heartbeat_ms
    }

    pub fn on_heartbeat(&mut self, now_ms: u32) -> Option<Transition> {
        self.last_heartbeat_ms = now_ms;
        self.heartbeats = self.heartbeats.wrapping_add(1);

        let transition = match self.state {
            LinkState::AwaitingFirst => Some(Transition::Connected),
            LinkState::Warning => Some(Transition::Recovered),
            LinkState::Alive => None,
        };
        self.state = LinkState::Alive;
        transition
    }

    /// Call once per loop iteration. Raises the warning as soon as the
    /// silence reaches the threshold.
    pub fn check(&mut self, now_ms: u32) -> Option<Transition> {
        if self.state != LinkState::Alive {
            return None;
        }
        if now_ms.wrapping_sub(self.last_heartbeat_ms) >= self.threshold_ms {
            self.state = LinkState::Warning;
            self.losses = self.losses.wrapping_add(1);
            log_warn!(
                "link: no heartbeat for {} ms",
                now_ms.wrapping_sub(self.last_heartbeat_ms)
            );
            return Some(Transition::Lost);
        }
        None
    }
}

// ── Warning beacon ────────────────────────────────────────────────────────────

struct BeaconState<P> {
    led: P,
    active: bool,
    lit: bool,
    enabled: bool,
}

/// Warning LED toggled from its own periodic task while the link is lost.
pub struct WarningBeacon<P> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<BeaconState<P>>>,
    skipped: AtomicU32,
}

impl<P: Indicator> WarningBeacon<P> {
    pub const fn new(led: P) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(BeaconState {
                led,
                active: false,
                lit: false,
                enabled: true,
            })),
            skipped: AtomicU32::new(0),
        }
    }

    /// Timer entry point. Toggles the LED while active; never blocks.
    pub fn tick(&self) {
        self.with_state(|s| {
            if s.enabled && s.active {
                s.lit = !s.lit;
                s.led.set(s.lit);
            }
        });
    }

    /// Start or stop blinking. Stopping always leaves the LED off.
    pub fn set_active(&self, active: bool) {
        self.with_state(|s| {
            s.active = active && s.enabled;
            if !active {
                s.lit = false;
                s.led.set(false);
            }
        });
    }

    /// Drive the LED directly, outside the blink cycle.
    pub fn force(&self, on: bool) {
        self.with_state(|s| {
            s.lit = on;
            s.led.set(on);
        });
    }

    /// Stop for good and switch the LED off.
    pub fn shutdown(&self) {
        self.with_state(|s| {
            s.enabled = false;
            s.active = false;
            s.lit = false;
            s.led.set(false);
        });
    }

    pub fn is_active(&self) -> bool {
        self.inner
            .lock(|c| c.try_borrow().map(|s| s.active).unwrap_or(false))
    }

    /// Ticks dropped because the state was already borrowed.
    pub fn skipped_ticks(&self) -> u32 {
        self.skipped.load(Ordering::Relaxed)
    }

    fn with_state(&self, f: impl FnOnce(&mut BeaconState<P>)) {
        self.inner.lock(|c| match c.try_borrow_mut() {
            Ok(mut s) => f(&mut s),
            Err(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        });
    }
}
