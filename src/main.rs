#![no_std]
#![no_main]

mod board;
mod sensors;
mod tasks;
mod usb;

use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Input, Level, Output, Pin, Pull, Speed};
use embassy_stm32::i2c::I2c;
use embassy_stm32::interrupt;
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_stm32::spi::{Config as SpiConfig, Spi, MODE_1};
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::{Config as UsartConfig, Uart};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_time::{Duration, Timer};
use flight_payload::config::{self, DeviceKind, MAX_TASKS};
use flight_payload::control_loop::{show_banner, Outputs};
use flight_payload::hal::Clock;
use flight_payload::link::MavLink;
use flight_payload::liveness::WarningBeacon;
use flight_payload::patterns::{PatternEngine, SharedLights};
use flight_payload::scheduler::{ScheduledTask, Scheduler};
use flight_payload::sensor_log::{SensorLogTask, SharedDisplay};
use flight_payload::{ControlLoop, RunMode};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use crate::board::{Board, EmbassyClock, Led, StopButton, TailBus, TelemetryUart};
use crate::sensors::{Ads1115, RttRowLog};
use crate::tasks::{BoardBeacon, BoardLights};
use crate::usb::UsbDisplay;

type LogTask = SensorLogTask<'static, Ads1115, UsbDisplay, RttRowLog>;

// ── Static resources ─────────────────────────────────────────────────────────

static LIGHTS: StaticCell<BoardLights> = StaticCell::new();
static BEACON: StaticCell<BoardBeacon> = StaticCell::new();
static DISPLAY: StaticCell<SharedDisplay<UsbDisplay>> = StaticCell::new();
static TELEMETRY_RING: StaticCell<[u8; 512]> = StaticCell::new();

/// Runs the light tasks above thread mode. UART5 is unused on this board, so
/// its vector is free to drive the executor.
static LIGHTS_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

#[interrupt]
unsafe fn UART5() {
    LIGHTS_EXECUTOR.on_interrupt()
}

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    I2C1_EV  => embassy_stm32::i2c::EventInterruptHandler<peripherals::I2C1>;
    I2C1_ER  => embassy_stm32::i2c::ErrorInterruptHandler<peripherals::I2C1>;
    USART3   => embassy_stm32::usart::InterruptHandler<peripherals::USART3>;
});

async fn park() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────
#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init (168 MHz PLL)
    let board = Board::init();

    let config = config::DEFAULT;
    if let Err(e) = config.validate() {
        defmt::error!("config: {}", e.as_str());
        park().await;
    }

    // 2. USB console
    let (usb_dev, usb_serial) = usb::init(board.usb);
    spawner.spawn(tasks::usb_task(usb_dev)).unwrap();
    let display: &'static SharedDisplay<UsbDisplay> =
        DISPLAY.init(SharedDisplay::new(UsbDisplay::new(usb_serial)));

    // 3. Indicators and the TLC59711 tail bus (SPI1, mode 1)
    let ind = board.indicators;
    let led = |pin: AnyPin| Led(Output::new(pin, Level::Low, Speed::Low));

    let mut spi_config = SpiConfig::default();
    spi_config.frequency = TimeHertz(1_000_000);
    spi_config.mode = MODE_1;
    let spi = Spi::new(
        board.tail.spi,
        board.tail.sck, board.tail.mosi, board.tail.miso,
        NoDma, NoDma,
        spi_config,
    );

    let lights: &'static BoardLights = LIGHTS.init(SharedLights::new(PatternEngine::new(
        led(ind.status.degrade()),
        led(ind.dome.degrade()),
        TailBus(spi),
    )));
    let beacon: &'static BoardBeacon = BEACON.init(WarningBeacon::new(led(ind.warning.degrade())));
    let fault_led = led(ind.fault.degrade());

    // 4. Light tasks on the interrupt executor
    interrupt::UART5.set_priority(Priority::P6);
    let light_spawner = LIGHTS_EXECUTOR.start(interrupt::UART5);
    light_spawner.spawn(tasks::pattern_tick_task(lights)).unwrap();
    light_spawner.spawn(tasks::warning_blink_task(beacon)).unwrap();

    // 5. Telemetry USART3 @ 115200, ring-buffered RX
    let mut uart_config = UsartConfig::default();
    uart_config.baudrate = 115_200;
    let uart = Uart::new(
        board.telemetry.uart, board.telemetry.rx, board.telemetry.tx,
        Irqs,
        board.telemetry.tx_dma, board.telemetry.rx_dma,
        uart_config,
    ).unwrap();
    let (uart_tx, uart_rx) = uart.split();
    let uart_rx = uart_rx.into_ring_buffered(TELEMETRY_RING.init([0; 512]));
    let link = MavLink::new(TelemetryUart::new(uart_tx, uart_rx), config.trailer_check);

    // 6. Sensor I2C1 @ 100 kHz
    let i2c = I2c::new(
        board.sensors.i2c,
        board.sensors.scl, board.sensors.sda,
        Irqs,
        board.sensors.tx_dma,
        board.sensors.rx_dma,
        TimeHertz(100_000),
        Default::default(),
    );

    // 7. One logging task per enabled device
    let clock = EmbassyClock;
    let shared_display = config.display_enabled.then_some(display);
    let mut scheduler: Scheduler<LogTask, MAX_TASKS> = Scheduler::new();
    let mut sensor_bus = Some(i2c);
    for dev in config.enabled_devices() {
        let kind = dev.descriptor.kind;
        let sensor = match kind {
            DeviceKind::Ads1115 { bus: 1, address } => match sensor_bus.take() {
                Some(bus) => Ads1115::new(bus, address),
                None => {
                    defmt::warn!("{}: I2C1 already claimed, skipped", kind.as_str());
                    continue;
                }
            },
            DeviceKind::Ads1115 { bus, .. } => {
                defmt::warn!("{}: no I2C{} on this board, skipped", kind.as_str(), bus);
                continue;
            }
            DeviceKind::Dht22 { data_pin } | DeviceKind::Ds18x20 { data_pin } => {
                defmt::warn!("{}: no board driver for {}, skipped", kind.as_str(), data_pin);
                continue;
            }
        };
        let task = SensorLogTask::new(
            kind,
            dev.display_line,
            sensor,
            shared_display,
            RttRowLog::new(kind.log_root()),
        );
        let scheduled = ScheduledTask::new(task, dev.descriptor.period_ms(), clock.now_ms());
        if scheduler.add(scheduled).is_err() {
            defmt::warn!("{}: no task slot left", kind.as_str());
        }
    }
    defmt::info!("payload: {} sensor tasks", scheduler.len());

    // 8. Control loop
    let mode = RunMode::Flight;
    if config.display_enabled {
        show_banner(display, mode).await;
    }

    let stop = StopButton(Input::new(board.stop_switch.degrade(), Pull::Up));
    let outputs = Outputs {
        lights,
        beacon,
        fault_led,
    };
    let mut payload = ControlLoop::new(config, link, clock, outputs, scheduler, stop);

    match payload.run(mode).await {
        Ok(reason) => defmt::info!("payload: stopped ({})", reason.as_str()),
        Err(e) => defmt::error!("payload: {}", e.as_str()),
    }
    park().await
}
