//! Board-side sensor and log collaborators.

use embassy_stm32::i2c::I2c;
use embassy_stm32::peripherals::{DMA1_CH0, DMA1_CH7, I2C1};
use embassy_time::{Duration, Timer};
use flight_payload::hal::{LogSink, Measurement, Sensor, SinkError};

pub type SensorBus = I2c<'static, I2C1, DMA1_CH7, DMA1_CH0>;

// ── ADS1115 ───────────────────────────────────────────────────────────────────

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

const CHANNELS: u8 = 4;

// OS=start, PGA=±4.096 V, single shot, 128 SPS, comparator off.
const CFG_START: u16 = 1 << 15;
const CFG_PGA_4V096: u16 = 0b001 << 9;
const CFG_SINGLE_SHOT: u16 = 1 << 8;
const CFG_128SPS: u16 = 0b100 << 5;
const CFG_COMP_OFF: u16 = 0b11;

const FULL_SCALE_V: f32 = 4.096;

/// One conversion at 128 SPS takes 7.8 ms.
const CONVERSION_MS: u64 = 9;

/// Four single-ended channels, read in turn, in volts.
pub struct Ads1115 {
    i2c: SensorBus,
    address: u8,
}

impl Ads1115 {
    /// `address` is 0x48 with the ADDR pin tied to GND.
    pub fn new(i2c: SensorBus, address: u8) -> Self {
        Self { i2c, address }
    }

    fn config_word(channel: u8) -> u16 {
        // MUX 0b100 + n selects AINn against GND.
        let mux = (0b100 | channel as u16) << 12;
        CFG_START | mux | CFG_PGA_4V096 | CFG_SINGLE_SHOT | CFG_128SPS | CFG_COMP_OFF
    }

    async fn read_channel(&mut self, channel: u8) -> Result<f32, embassy_stm32::i2c::Error> {
        let [hi, lo] = Self::config_word(channel).to_be_bytes();
        self.i2c.blocking_write(self.address, &[REG_CONFIG, hi, lo])?;
        Timer::after(Duration::from_millis(CONVERSION_MS)).await;

        let mut buf = [0u8; 2];
        self.i2c
            .blocking_write_read(self.address, &[REG_CONVERSION], &mut buf)?;
        let raw = i16::from_be_bytes(buf);
        Ok(raw as f32 * FULL_SCALE_V / 32768.0)
    }
}

impl Sensor for Ads1115 {
    async fn get_measurement(&mut self) -> Option<Measurement> {
        let mut values = Measurement::new();
        for ch in 0..CHANNELS {
            match self.read_channel(ch).await {
                Ok(v) => {
                    let _ = values.push(v);
                }
                Err(_) => {
                    defmt::warn!("ads1115: channel {} did not answer", ch);
                    return None;
                }
            }
        }
        Some(values)
    }
}

// ── Row log ───────────────────────────────────────────────────────────────────

/// CSV rows go out over RTT, tagged with the device's log root, for the
/// ground station to capture.
pub struct RttRowLog {
    root: &'static str,
    rows: u32,
}

impl RttRowLog {
    pub fn new(root: &'static str) -> Self {
        Self { root, rows: 0 }
    }
}

impl LogSink for RttRowLog {
    async fn write_row(&mut self, row: &str) -> Result<(), SinkError> {
        defmt::info!("{}/{}: {}", self.root, self.rows, row);
        self.rows = self.rows.wrapping_add(1);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn close(&mut self) {
        defmt::info!("{}: closed after {} rows", self.root, self.rows);
    }
}
