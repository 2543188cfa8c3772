//! Host-side stand-ins for the board peripherals.
//!
//! Handles are `Clone` and share their recording state, so a test can keep
//! one copy while the code under test owns the other.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use crate::drivers::mavlink::{frame_crc, MessageKind, FRAME_MARKER};
use crate::hal::{
    BusError, Clock, CommandBus, Display, DisplayError, Indicator, LogSink, Measurement, Sensor,
    SinkError, StopSwitch, Transport, TransportError,
};

// ── Frame builders ────────────────────────────────────────────────────────────

/// A complete frame with a valid trailer for known kinds.
pub fn frame(kind_id: u8, seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![FRAME_MARKER, payload.len() as u8, seq, 1, 1, kind_id];
    out.extend_from_slice(payload);
    let crc = match MessageKind::from_id(kind_id).crc_extra() {
        Some(extra) => frame_crc(&out[1..], extra),
        None => 0xBEEF,
    };
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

pub fn heartbeat_payload() -> Vec<u8> {
    vec![0, 0, 0, 0, 2, 3, 0x51, 4, 3]
}

pub fn heartbeat(seq: u8) -> Vec<u8> {
    frame(0, seq, &heartbeat_payload())
}

pub fn gps_payload(alt: i32, relative_alt: i32) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&1000u32.to_le_bytes());
    p.extend_from_slice(&(-353_000_000i32).to_le_bytes());
    p.extend_from_slice(&(1_490_000_000i32).to_le_bytes());
    p.extend_from_slice(&alt.to_le_bytes());
    p.extend_from_slice(&relative_alt.to_le_bytes());
    p
}

pub fn gps(seq: u8, alt: i32, relative_alt: i32) -> Vec<u8> {
    frame(33, seq, &gps_payload(alt, relative_alt))
}

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Time only moves when a test sets it or the code under test delays.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
    delayed: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new(start_ms: u32) -> Self {
        let clock = Self::default();
        clock.set(start_ms);
        clock
    }

    pub fn set(&self, ms: u32) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }

    /// Total milliseconds spent in `delay_ms`.
    pub fn delayed(&self) -> u32 {
        self.delayed.get()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }

    async fn delay_ms(&self, ms: u32) {
        self.delayed.set(self.delayed.get() + ms);
        self.advance(ms);
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Bytes become readable once the clock reaches their release time.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    clock: Option<ManualClock>,
    script: Rc<RefCell<VecDeque<(u32, Vec<u8>)>>>,
    written: Rc<RefCell<Vec<Vec<u8>>>>,
    pub fail_writes: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timed(clock: &ManualClock) -> Self {
        Self {
            clock: Some(clock.clone()),
            ..Self::default()
        }
    }

    pub fn push(&self, bytes: impl Into<Vec<u8>>) {
        self.push_at(0, bytes);
    }

    /// Scripted entries must be pushed in release order.
    pub fn push_at(&self, at_ms: u32, bytes: impl Into<Vec<u8>>) {
        self.script.borrow_mut().push_back((at_ms, bytes.into()));
    }

    pub fn remaining(&self) -> usize {
        self.script.borrow().iter().map(|(_, b)| b.len()).sum()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.borrow().clone()
    }

    fn now(&self) -> u32 {
        self.clock.as_ref().map_or(u32::MAX, |c| c.now_ms())
    }
}

impl Transport for ScriptedTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError);
        }
        self.written.borrow_mut().push(bytes.to_vec());
        Ok(())
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> usize {
        let now = self.now();
        let mut script = self.script.borrow_mut();
        let Some((at, chunk)) = script.front_mut() else {
            return 0;
        };
        if *at > now {
            return 0;
        }
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            script.pop_front();
        }
        n
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingIndicator {
    history: Rc<RefCell<Vec<bool>>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<bool> {
        self.history.borrow().clone()
    }

    pub fn is_on(&self) -> bool {
        self.history.borrow().last().copied().unwrap_or(false)
    }

    pub fn times_set_on(&self) -> usize {
        self.history.borrow().iter().filter(|&&on| on).count()
    }
}

impl Indicator for RecordingIndicator {
    fn set(&mut self, on: bool) {
        self.history.borrow_mut().push(on);
    }
}

#[derive(Clone, Default)]
pub struct RecordingBus {
    writes: Rc<RefCell<Vec<Vec<u8>>>>,
    failures_left: Rc<Cell<u32>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.set(n);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.borrow().clone()
    }

    pub fn write_count(&self) -> usize {
        self.writes.borrow().len()
    }
}

impl CommandBus for RecordingBus {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let left = self.failures_left.get();
        if left > 0 {
            self.failures_left.set(left - 1);
            return Err(BusError);
        }
        self.writes.borrow_mut().push(bytes.to_vec());
        Ok(())
    }
}

/// Reports pressed on the `n`th poll (counting from 1) and every poll after.
#[derive(Clone)]
pub struct PressAfter {
    polls_left: Rc<Cell<u32>>,
}

impl PressAfter {
    pub fn new(polls: u32) -> Self {
        Self {
            polls_left: Rc::new(Cell::new(polls)),
        }
    }

    pub fn never() -> Self {
        Self::new(u32::MAX)
    }
}

impl StopSwitch for PressAfter {
    fn pressed(&mut self) -> bool {
        let left = self.polls_left.get();
        if left == u32::MAX {
            return false;
        }
        let left = left.saturating_sub(1);
        self.polls_left.set(left);
        left == 0
    }
}

// ── Sensor / display / sink ───────────────────────────────────────────────────

#[derive(Default)]
pub struct ScriptedSensor {
    readings: VecDeque<Option<Measurement>>,
}

impl ScriptedSensor {
    pub fn new(readings: Vec<Option<Vec<f32>>>) -> Self {
        let readings = readings
            .into_iter()
            .map(|r| r.map(|vals| Measurement::from_slice(&vals).unwrap()))
            .collect();
        Self { readings }
    }
}

impl Sensor for ScriptedSensor {
    async fn get_measurement(&mut self) -> Option<Measurement> {
        self.readings.pop_front().flatten()
    }
}

#[derive(Default)]
pub struct RecordingDisplay {
    pub headers: Vec<(String, String)>,
    pub lines: Vec<(String, u8)>,
    pub fail: bool,
}

impl Display for RecordingDisplay {
    async fn header(&mut self, title: &str, subtitle: &str) -> Result<(), DisplayError> {
        if self.fail {
            return Err(DisplayError);
        }
        self.headers.push((title.into(), subtitle.into()));
        Ok(())
    }

    async fn show_line(&mut self, text: &str, index: u8) -> Result<(), DisplayError> {
        if self.fail {
            return Err(DisplayError);
        }
        self.lines.push((text.into(), index));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    rows: Rc<RefCell<Vec<String>>>,
    flushes: Rc<Cell<u32>>,
    closed: Rc<Cell<bool>>,
    fail_writes: Rc<Cell<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<String> {
        self.rows.borrow().clone()
    }

    pub fn flushes(&self) -> u32 {
        self.flushes.get()
    }

    pub fn closed(&self) -> bool {
        self.closed.get()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.set(failing);
    }
}

impl LogSink for RecordingSink {
    async fn write_row(&mut self, row: &str) -> Result<(), SinkError> {
        if self.fail_writes.get() {
            return Err(SinkError);
        }
        self.rows.borrow_mut().push(row.into());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.flushes.set(self.flushes.get() + 1);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.set(true);
    }
}
