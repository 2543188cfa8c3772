//! Indicator light patterns.
//!
//! Three channels cycle on a fixed 8 Hz tick: the status LED, the dome lamp
//! and the TLC59711-driven tail lights. Dome and tail follow the flight
//! state derived from telemetry; status runs the same pattern throughout,
//! except that it freezes while the link warning owns the operator's
//! attention.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::drivers::mavlink::GlobalPosition;
use crate::drivers::tlc59711::{TailFrame, Tlc59711, HIGH};
use crate::hal::{CommandBus, Indicator};

pub const PATTERN_TICK_HZ: u32 = 8;

/// Height-above-ground thresholds, protocol units (mm).
const FLIGHT_ABOVE: u32 = 1000;
const LANDING_ABOVE: u32 = 500;

// ── Flight state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlightState {
    Ground,
    Landing,
    Flight,
}

impl FlightState {
    pub fn classify(height_above_ground: u32) -> Self {
        if height_above_ground > FLIGHT_ABOVE {
            FlightState::Flight
        } else if height_above_ground > LANDING_ABOVE {
            FlightState::Landing
        } else {
            FlightState::Ground
        }
    }

    pub fn from_position(pos: &GlobalPosition) -> Self {
        Self::classify(pos.height_above_ground())
    }

    /// Landing uses the flight dome pattern, also when entered straight
    /// from Ground: the dome never keeps the ground pattern on descent.
    pub fn pattern_set(self) -> PatternSet {
        match self {
            FlightState::Ground => PatternSet {
                dome: &DOME_GROUND,
                tail: &TAIL_GROUND,
            },
            FlightState::Landing => PatternSet {
                dome: &DOME_FLIGHT,
                tail: &TAIL_LANDING,
            },
            FlightState::Flight => PatternSet {
                dome: &DOME_FLIGHT,
                tail: &TAIL_FLIGHT,
            },
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            FlightState::Ground => "ground",
            FlightState::Landing => "landing",
            FlightState::Flight => "flight",
        }
    }
}

// ── Pattern tables ────────────────────────────────────────────────────────────

// Board wiring: (pixel, colour).
const SPOT1: (usize, usize) = (3, 0);
const LEFT: [(usize, usize); 3] = [(1, 0), (1, 1), (1, 2)];
const RIGHT: [(usize, usize); 3] = [(0, 0), (0, 1), (0, 2)];

/// Spot and both centre lamps lit.
const TAIL_BASE: Tlc59711 = Tlc59711::new()
    .with_led(SPOT1.0, SPOT1.1, HIGH)
    .with_led(LEFT[1].0, LEFT[1].1, HIGH)
    .with_led(RIGHT[1].0, RIGHT[1].1, HIGH);

/// Everything lit.
const TAIL_ALL: Tlc59711 = TAIL_BASE
    .with_led(LEFT[0].0, LEFT[0].1, HIGH)
    .with_led(LEFT[2].0, LEFT[2].1, HIGH)
    .with_led(RIGHT[0].0, RIGHT[0].1, HIGH)
    .with_led(RIGHT[2].0, RIGHT[2].1, HIGH);

pub static TAIL_ON: TailFrame = TailFrame::from_driver(&TAIL_ALL);
pub static TAIL_OFF: TailFrame = TailFrame::from_driver(&TAIL_BASE);
pub static TAIL_CLEAR: TailFrame = TailFrame::from_driver(&Tlc59711::new());

const ON: TailFrame = TailFrame::from_driver(&TAIL_ALL);
const OFF: TailFrame = TailFrame::from_driver(&TAIL_BASE);

pub static TAIL_GROUND: [TailFrame; 6] = [ON, OFF, ON, OFF, OFF, OFF];
pub static TAIL_FLIGHT: [TailFrame; 6] = [ON, ON, ON, ON, OFF, OFF];
pub static TAIL_LANDING: [TailFrame; 2] = [ON, OFF];

pub static DOME_GROUND: [bool; 6] = [true, false, true, false, false, false];
pub static DOME_FLIGHT: [bool; 7] = [false, false, false, false, false, true, true];
pub static STATUS: [bool; 10] = [
    false, false, false, false, false, true, true, true, true, true,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSet {
    pub dome: &'static [bool],
    pub tail: &'static [TailFrame],
}

// ── Channel cursor ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ChannelCursor<T: 'static> {
    pattern: &'static [T],
    position: usize,
}

impl<T: Copy + PartialEq> ChannelCursor<T> {
    fn new(pattern: &'static [T]) -> Self {
        Self {
            pattern,
            position: 0,
        }
    }

    /// Current frame, then step (wrapping).
    fn next(&mut self) -> Option<T> {
        if self.pattern.is_empty() {
            return None;
        }
        if self.position >= self.pattern.len() {
            self.position = 0;
        }
        let frame = self.pattern[self.position];
        self.position = (self.position + 1) % self.pattern.len();
        Some(frame)
    }

    /// Restart from the top only if the pattern actually differs.
    fn switch_to(&mut self, pattern: &'static [T]) {
        if self.pattern != pattern {
            self.pattern = pattern;
            self.position = 0;
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// What happened on the tail channel during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickOutcome {
    Disabled,
    Suppressed,
    Wrote,
    BusError,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatternStats {
    pub ticks: u32,
    pub bus_writes: u32,
    pub suppressed: u32,
    pub bus_errors: u32,
}

pub struct PatternEngine<S, D, B> {
    status_led: S,
    dome_led: D,
    bus: B,
    state: FlightState,
    status: ChannelCursor<bool>,
    dome: ChannelCursor<bool>,
    tail: ChannelCursor<TailFrame>,
    last_fingerprint: Option<u64>,
    status_suspended: bool,
    enabled: bool,
    stats: PatternStats,
}

impl<S: Indicator, D: Indicator, B: CommandBus> PatternEngine<S, D, B> {
    /// Starts disabled on the ground pattern; call [`enable`](Self::enable).
    pub fn new(status_led: S, dome_led: D, bus: B) -> Self {
        Self {
            status_led,
            dome_led,
            bus,
            state: FlightState::Ground,
            status: ChannelCursor::new(&STATUS),
            dome: ChannelCursor::new(&DOME_GROUND),
            tail: ChannelCursor::new(&TAIL_GROUND),
            last_fingerprint: None,
            status_suspended: false,
            enabled: false,
            stats: PatternStats {
                ticks: 0,
                bus_writes: 0,
                suppressed: 0,
                bus_errors: 0,
            },
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    pub fn stats(&self) -> PatternStats {
        self.stats
    }

    pub fn last_fingerprint(&self) -> Option<u64> {
        self.last_fingerprint
    }

    /// Switch flight state. Returns `false` when already in `state`.
    pub fn select(&mut self, state: FlightState) -> bool {
        if state == self.state {
            return false;
        }
        log_info!("lights: {} -> {}", self.state.as_str(), state.as_str());
        self.state = state;
        let set = state.pattern_set();
        self.dome.switch_to(set.dome);
        self.tail.switch_to(set.tail);
        true
    }

    /// While suspended the status channel neither advances nor writes.
    pub fn suspend_status(&mut self, suspended: bool) {
        self.status_suspended = suspended;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.enabled {
            return TickOutcome::Disabled;
        }
        self.stats.ticks = self.stats.ticks.wrapping_add(1);

        if !self.status_suspended {
            if let Some(on) = self.status.next() {
                self.status_led.set(on);
            }
        }
        if let Some(on) = self.dome.next() {
            self.dome_led.set(on);
        }

        let Some(frame) = self.tail.next() else {
            return TickOutcome::Suppressed;
        };
        if self.last_fingerprint == Some(frame.fingerprint) {
            self.stats.suppressed = self.stats.suppressed.wrapping_add(1);
            return TickOutcome::Suppressed;
        }
        self.write_tail(&frame)
    }

    /// Drive status and dome directly, bypassing the patterns.
    pub fn force_outputs(&mut self, on: bool) {
        self.status_led.set(on);
        self.dome_led.set(on);
    }

    /// Blank the tail, drop dome and status, and stop ticking.
    pub fn shutdown(&mut self) {
        self.enabled = false;
        if self.write_tail(&TAIL_CLEAR) == TickOutcome::BusError {
            log_error!("lights: tail clear failed");
        }
        self.dome_led.set(false);
        self.status_led.set(false);
    }

    fn write_tail(&mut self, frame: &TailFrame) -> TickOutcome {
        match self.bus.write(&frame.bytes) {
            Ok(()) => {
                self.last_fingerprint = Some(frame.fingerprint);
                self.stats.bus_writes = self.stats.bus_writes.wrapping_add(1);
                TickOutcome::Wrote
            }
            Err(_) => {
                self.stats.bus_errors = self.stats.bus_errors.wrapping_add(1);
                TickOutcome::BusError
            }
        }
    }
}

// ── Interrupt-shared wrapper ──────────────────────────────────────────────────

/// What the control loop needs from the lights.
pub trait LightControl {
    fn enable(&self);
    fn select(&self, state: FlightState);
    fn suspend_status(&self, suspended: bool);
    fn force_outputs(&self, on: bool);
    fn shutdown(&self);
}

/// [`PatternEngine`] behind a critical-section mutex, ticked from a timer
/// task and steered from the control loop.
pub struct SharedLights<S, D, B> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<PatternEngine<S, D, B>>>,
    skipped: AtomicU32,
}

impl<S: Indicator, D: Indicator, B: CommandBus> SharedLights<S, D, B> {
    pub const fn new(engine: PatternEngine<S, D, B>) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(engine)),
            skipped: AtomicU32::new(0),
        }
    }

    /// Timer entry point. A tick that lands while the engine is borrowed
    /// is dropped and counted.
    pub fn tick(&self) -> TickOutcome {
        self.with(|e| e.tick()).unwrap_or(TickOutcome::Disabled)
    }

    pub fn skipped_ticks(&self) -> u32 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PatternStats {
        self.with(|e| e.stats()).unwrap_or_default()
    }

    pub fn state(&self) -> Option<FlightState> {
        self.with(|e| e.state())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut PatternEngine<S, D, B>) -> R) -> Option<R> {
        self.inner.lock(|c| match c.try_borrow_mut() {
            Ok(mut engine) => Some(f(&mut engine)),
            Err(_) => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                None
            }
        })
    }
}

impl<S: Indicator, D: Indicator, B: CommandBus> LightControl for SharedLights<S, D, B> {
    fn enable(&self) {
        let _ = self.with(|e| e.enable());
    }

    fn select(&self, state: FlightState) {
        let _ = self.with(|e| e.select(state));
    }

    fn suspend_status(&self, suspended: bool) {
        let _ = self.with(|e| e.suspend_status(suspended));
    }

    fn force_outputs(&self, on: bool) {
        let _ = self.with(|e| e.force_outputs(on));
    }

    fn shutdown(&self) {
        let _ = self.with(|e| e.shutdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{RecordingBus, RecordingIndicator};

    struct Rig {
        status: RecordingIndicator,
        dome: RecordingIndicator,
        bus: RecordingBus,
        engine: PatternEngine<RecordingIndicator, RecordingIndicator, RecordingBus>,
    }

    fn rig() -> Rig {
        let status = RecordingIndicator::new();
        let dome = RecordingIndicator::new();
        let bus = RecordingBus::new();
        let mut engine = PatternEngine::new(status.clone(), dome.clone(), bus.clone());
        engine.enable();
        Rig {
            status,
            dome,
            bus,
            engine,
        }
    }

    fn ticks(engine: &mut PatternEngine<RecordingIndicator, RecordingIndicator, RecordingBus>, n: usize) -> Vec<TickOutcome> {
        (0..n).map(|_| engine.tick()).collect()
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(FlightState::classify(1200), FlightState::Flight);
        assert_eq!(FlightState::classify(1001), FlightState::Flight);
        assert_eq!(FlightState::classify(1000), FlightState::Landing);
        assert_eq!(FlightState::classify(501), FlightState::Landing);
        assert_eq!(FlightState::classify(500), FlightState::Ground);
        assert_eq!(FlightState::classify(0), FlightState::Ground);

        let pos = GlobalPosition {
            alt: 3200,
            relative_alt: 2000,
            ..Default::default()
        };
        assert_eq!(FlightState::from_position(&pos), FlightState::Flight);
    }

    #[test]
    fn delta_1200_selects_flight_dome_and_tail() {
        let mut r = rig();
        assert!(r.engine.select(FlightState::classify(1200)));
        ticks(&mut r.engine, 7);
        assert_eq!(r.dome.history(), DOME_FLIGHT.to_vec());
        assert_eq!(r.bus.writes()[0], TAIL_ON.bytes.to_vec());
        assert_eq!(r.bus.writes()[1], TAIL_OFF.bytes.to_vec());
    }

    #[test]
    fn landing_from_ground_switches_to_flight_dome() {
        let mut r = rig();
        ticks(&mut r.engine, 2);
        assert!(r.engine.select(FlightState::Landing));
        let before = r.dome.history().len();
        ticks(&mut r.engine, 7);
        assert_eq!(r.dome.history()[before..], DOME_FLIGHT[..]);
        assert_eq!(FlightState::Landing.pattern_set().tail, &TAIL_LANDING[..]);
    }

    #[test]
    fn tail_frames_differ_only_in_outer_lamps() {
        assert_ne!(TAIL_ON.fingerprint, TAIL_OFF.fingerprint);
        assert_ne!(TAIL_OFF.fingerprint, TAIL_CLEAR.fingerprint);
        assert!(TAIL_CLEAR.bytes[4..].iter().all(|&b| b == 0));
        assert_eq!(TAIL_ALL.led(SPOT1.0, SPOT1.1), HIGH);
        assert_eq!(TAIL_BASE.led(LEFT[0].0, LEFT[0].1), 0);
        assert_eq!(TAIL_BASE.led(RIGHT[1].0, RIGHT[1].1), HIGH);
    }

    #[test]
    fn unchanged_tail_frames_are_not_rewritten() {
        let mut r = rig();
        // Ground: ON OFF ON OFF OFF OFF | ON ...
        let out = ticks(&mut r.engine, 7);
        use TickOutcome::*;
        assert_eq!(out, vec![Wrote, Wrote, Wrote, Wrote, Suppressed, Suppressed, Wrote]);
        assert_eq!(r.bus.write_count(), 5);
        assert_eq!(r.engine.stats().suppressed, 2);
    }

    #[test]
    fn flight_tail_writes_on_change_only() {
        let mut r = rig();
        r.engine.select(FlightState::Flight);
        // ON ON ON ON OFF OFF | ON
        ticks(&mut r.engine, 7);
        assert_eq!(
            r.bus.writes(),
            vec![TAIL_ON.bytes.to_vec(), TAIL_OFF.bytes.to_vec(), TAIL_ON.bytes.to_vec()]
        );
    }

    #[test]
    fn cursors_wrap_modulo_pattern_length() {
        let mut r = rig();
        ticks(&mut r.engine, 12);
        let mut expected = DOME_GROUND.to_vec();
        expected.extend_from_slice(&DOME_GROUND);
        assert_eq!(r.dome.history(), expected);

        let status = r.status.history();
        assert_eq!(&status[..10], &STATUS);
        assert_eq!(&status[10..], &STATUS[..2]);
    }

    #[test]
    fn selection_resets_cursor_but_keeps_fingerprint() {
        let mut r = rig();
        ticks(&mut r.engine, 3); // ON OFF ON written
        assert_eq!(r.engine.last_fingerprint(), Some(TAIL_ON.fingerprint));

        r.engine.select(FlightState::Flight);
        // Flight starts with ON, which was the last thing written.
        assert_eq!(r.engine.tick(), TickOutcome::Suppressed);
        assert_eq!(r.bus.write_count(), 3);
        // Dome restarted at the top of the flight pattern.
        assert_eq!(r.dome.history()[3], DOME_FLIGHT[0]);
    }

    #[test]
    fn reselecting_current_state_keeps_cycling() {
        let mut r = rig();
        ticks(&mut r.engine, 2);
        assert!(!r.engine.select(FlightState::Ground));
        r.engine.tick();
        assert_eq!(r.dome.history(), DOME_GROUND[..3].to_vec());
    }

    #[test]
    fn landing_keeps_flight_dome_position() {
        let mut r = rig();
        r.engine.select(FlightState::Flight);
        ticks(&mut r.engine, 5);
        r.engine.select(FlightState::Landing);
        r.engine.tick();
        // Sixth dome frame of the flight pattern, not a restart.
        assert_eq!(r.dome.history()[5], DOME_FLIGHT[5]);
        // Landing tail restarted: ON then OFF.
        r.engine.tick();
        let writes = r.bus.writes();
        assert_eq!(writes.last().unwrap(), &TAIL_OFF.bytes.to_vec());
    }

    #[test]
    fn failed_bus_write_is_retried() {
        let mut r = rig();
        r.engine.select(FlightState::Flight);
        r.bus.fail_next(1);
        assert_eq!(r.engine.tick(), TickOutcome::BusError);
        assert_eq!(r.engine.last_fingerprint(), None);
        assert_eq!(r.engine.tick(), TickOutcome::Wrote);
        assert_eq!(r.engine.tick(), TickOutcome::Suppressed);
        assert_eq!(r.engine.stats().bus_errors, 1);
    }

    #[test]
    fn suspended_status_is_frozen() {
        let mut r = rig();
        ticks(&mut r.engine, 4);
        r.engine.suspend_status(true);
        ticks(&mut r.engine, 3);
        assert_eq!(r.status.history().len(), 4);
        assert_eq!(r.dome.history().len(), 7);

        r.engine.suspend_status(false);
        r.engine.tick();
        assert_eq!(r.status.history()[4], STATUS[4]);
    }

    #[test]
    fn shutdown_clears_and_stops() {
        let mut r = rig();
        ticks(&mut r.engine, 2);
        r.engine.shutdown();
        assert_eq!(r.bus.writes().last().unwrap(), &TAIL_CLEAR.bytes.to_vec());
        assert!(!r.dome.is_on());
        assert!(!r.status.is_on());
        assert_eq!(r.engine.tick(), TickOutcome::Disabled);
    }

    #[test]
    fn disabled_engine_does_nothing() {
        let bus = RecordingBus::new();
        let mut engine = PatternEngine::new(RecordingIndicator::new(), RecordingIndicator::new(), bus.clone());
        assert_eq!(engine.tick(), TickOutcome::Disabled);
        assert_eq!(bus.write_count(), 0);
    }

    #[test]
    fn shared_tick_while_borrowed_is_skipped() {
        let bus = RecordingBus::new();
        let lights = SharedLights::new(PatternEngine::new(
            RecordingIndicator::new(),
            RecordingIndicator::new(),
            bus.clone(),
        ));
        lights.enable();

        let inner = lights.with(|_| lights.tick());
        assert_eq!(inner, Some(TickOutcome::Disabled));
        assert_eq!(lights.skipped_ticks(), 1);
        assert_eq!(bus.write_count(), 0);

        assert_eq!(lights.tick(), TickOutcome::Wrote);
        lights.select(FlightState::Flight);
        assert_eq!(lights.state(), Some(FlightState::Flight));
        lights.shutdown();
        assert_eq!(lights.tick(), TickOutcome::Disabled);
    }
}
