//! Collaborator interfaces.
//!
//! The payload core never touches a peripheral directly. The board firmware
//! implements these traits over embassy-stm32 drivers; the unit tests
//! implement them over scripted mocks.

#![allow(async_fn_in_trait)]

/// Telemetry serial link.
pub trait Transport {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Copy whatever has already arrived into `buf` without waiting for more.
    /// Returns the number of bytes copied (0 when the line is idle).
    async fn read_available(&mut self, buf: &mut [u8]) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportError;

/// Millisecond time base. Timestamps wrap; compare with `wrapping_sub`.
pub trait Clock {
    fn now_ms(&self) -> u32;
    async fn delay_ms(&self, ms: u32);
}

/// A single on/off output: status LED, dome lamp, warning LED, fault LED.
pub trait Indicator {
    fn set(&mut self, on: bool);
}

/// Serial bus carrying commands to the tail light driver.
///
/// Implementations must be blocking and bounded: the pattern tick calls
/// this from interrupt context.
pub trait CommandBus {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BusError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusError;

/// Physical stop control, sampled once per control-loop iteration.
pub trait StopSwitch {
    fn pressed(&mut self) -> bool;
}

/// Up to four channels per reading (the ADS1115 has four inputs).
pub type Measurement = heapless::Vec<f32, 4>;

pub trait Sensor {
    /// `None` when the device did not answer; that is not a task fault.
    async fn get_measurement(&mut self) -> Option<Measurement>;
}

/// Line-oriented status display.
pub trait Display {
    async fn header(&mut self, title: &str, subtitle: &str) -> Result<(), DisplayError>;
    async fn show_line(&mut self, text: &str, index: u8) -> Result<(), DisplayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayError;

/// Append-only destination for one device's CSV rows.
pub trait LogSink {
    async fn write_row(&mut self, row: &str) -> Result<(), SinkError>;
    async fn flush(&mut self) -> Result<(), SinkError>;
    async fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SinkError;
