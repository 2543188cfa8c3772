//! Embassy tasks. The two light tasks run on the interrupt executor and
//! preempt the control loop; the USB task runs in thread mode.

use embassy_time::{Duration, Ticker};
use embassy_usb::UsbDevice;
use flight_payload::liveness::{WarningBeacon, WARNING_BLINK_HZ};
use flight_payload::patterns::{SharedLights, TickOutcome, PATTERN_TICK_HZ};

use crate::board::{Led, TailBus};
use crate::usb::UsbDriver;

pub type BoardLights = SharedLights<Led, Led, TailBus>;
pub type BoardBeacon = WarningBeacon<Led>;

#[embassy_executor::task]
pub async fn pattern_tick_task(lights: &'static BoardLights) {
    let mut ticker = Ticker::every(Duration::from_hz(PATTERN_TICK_HZ as u64));
    let mut bus_errors = 0u32;
    loop {
        ticker.next().await;
        if lights.tick() == TickOutcome::BusError {
            bus_errors = bus_errors.wrapping_add(1);
            // Report every eighth failure.
            if bus_errors % PATTERN_TICK_HZ == 1 {
                defmt::warn!("tail: spi write failed ({} total)", bus_errors);
            }
        }
    }
}

#[embassy_executor::task]
pub async fn warning_blink_task(beacon: &'static BoardBeacon) {
    let mut ticker = Ticker::every(Duration::from_hz(WARNING_BLINK_HZ as u64));
    loop {
        ticker.next().await;
        beacon.tick();
    }
}

#[embassy_executor::task]
pub async fn usb_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    device.run().await
}
