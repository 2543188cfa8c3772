//! JHEF405 clock tree, the payload's pin allocation and the peripheral
//! adapters onto the payload traits.

use embassy_futures::select::{select, Either};
use embassy_stm32::dma::NoDma;
use embassy_stm32::gpio::{AnyPin, Input, Output};
use embassy_stm32::peripherals::*;
use embassy_stm32::rcc::*;
use embassy_stm32::spi::Spi;
use embassy_stm32::time::Hertz as TimeHertz;
use embassy_stm32::usart::{RingBufferedUartRx, UartTx};
use embassy_stm32::Config;
use embassy_time::{Instant, Timer};
use flight_payload::hal::{
    BusError, Clock, CommandBus, Indicator, StopSwitch, Transport, TransportError,
};

/// Autopilot telemetry, USART3 (TX=PB10, RX=PB11).
pub struct TelemetryPins {
    pub uart: USART3,
    pub rx: PB11,
    pub tx: PB10,
    pub tx_dma: DMA1_CH3,
    pub rx_dma: DMA1_CH1,
}

/// TLC59711 tail driver, SPI1 (SCK=PA5, MOSI=PA7). The chip has no data
/// out but the bus still claims MISO.
pub struct TailPins {
    pub spi: SPI1,
    pub sck: PA5,
    pub mosi: PA7,
    pub miso: PA6,
}

/// Sensor I2C1 (SCL=PB8, SDA=PB9).
pub struct SensorBusPins {
    pub i2c: I2C1,
    pub scl: PB8,
    pub sda: PB9,
    pub tx_dma: DMA1_CH7,
    pub rx_dma: DMA1_CH0,
}

pub struct UsbPins {
    pub otg: USB_OTG_FS,
    pub dp: PA12,
    pub dm: PA11,
}

pub struct IndicatorPins {
    pub status: PC14,
    /// MOTOR1 pad, driving the dome lamp MOSFET.
    pub dome: PB0,
    /// On-board LED.
    pub warning: PC13,
    pub fault: PC15,
}

pub struct Board {
    pub telemetry: TelemetryPins,
    pub tail: TailPins,
    pub sensors: SensorBusPins,
    pub usb: UsbPins,
    pub indicators: IndicatorPins,
    /// Active low, internal pull-up.
    pub stop_switch: PB1,
}

impl Board {
    pub fn init() -> Self {
        let p = embassy_stm32::init(clock_config());

        Self {
            telemetry: TelemetryPins {
                uart: p.USART3,
                rx: p.PB11,
                tx: p.PB10,
                tx_dma: p.DMA1_CH3,
                rx_dma: p.DMA1_CH1,
            },
            tail: TailPins {
                spi: p.SPI1,
                sck: p.PA5,
                mosi: p.PA7,
                miso: p.PA6,
            },
            sensors: SensorBusPins {
                i2c: p.I2C1,
                scl: p.PB8,
                sda: p.PB9,
                tx_dma: p.DMA1_CH7,
                rx_dma: p.DMA1_CH0,
            },
            usb: UsbPins {
                otg: p.USB_OTG_FS,
                dp: p.PA12,
                dm: p.PA11,
            },
            indicators: IndicatorPins {
                status: p.PC14,
                dome: p.PB0,
                warning: p.PC13,
                fault: p.PC15,
            },
            stop_switch: p.PB1,
        }
    }
}

/// 8 MHz crystal, 168 MHz core, 48 MHz for USB.
fn clock_config() -> Config {
    let mut config = Config::default();
    config.rcc.hse = Some(Hse {
        freq: TimeHertz(8_000_000),
        mode: HseMode::Oscillator,
    });
    config.rcc.pll_src = PllSource::HSE;
    config.rcc.pll = Some(Pll {
        prediv: PllPreDiv::DIV4,
        mul: PllMul::MUL168,
        divp: Some(PllPDiv::DIV2),
        divq: Some(PllQDiv::DIV7),
        divr: None,
    });
    config.rcc.sys = Sysclk::PLL1_P;
    config.rcc.ahb_pre = AHBPrescaler::DIV1;
    config.rcc.apb1_pre = APBPrescaler::DIV4;
    config.rcc.apb2_pre = APBPrescaler::DIV2;
    config
}

// ── Adapters onto the payload traits ─────────────────────────────────────────

pub struct Led(pub Output<'static, AnyPin>);

impl Indicator for Led {
    fn set(&mut self, on: bool) {
        if on {
            self.0.set_high();
        } else {
            self.0.set_low();
        }
    }
}

/// Blocking SPI1 writes; one 28-byte command is ~224 µs at 1 MHz.
pub struct TailBus(pub Spi<'static, SPI1, NoDma, NoDma>);

impl CommandBus for TailBus {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.0.blocking_write(bytes).map_err(|_| BusError)
    }
}

pub struct StopButton(pub Input<'static, AnyPin>);

impl StopSwitch for StopButton {
    fn pressed(&mut self) -> bool {
        self.0.is_low()
    }
}

#[derive(Clone, Copy)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }

    async fn delay_ms(&self, ms: u32) {
        Timer::after_millis(ms as u64).await;
    }
}

/// How long a read waits for the first byte before reporting an idle line.
const RX_POLL_US: u64 = 200;

/// USART3 with DMA ring-buffered reception, so bytes arriving between
/// polls are kept.
pub struct TelemetryUart {
    tx: UartTx<'static, USART3, DMA1_CH3>,
    rx: RingBufferedUartRx<'static, USART3, DMA1_CH1>,
}

impl TelemetryUart {
    pub fn new(
        tx: UartTx<'static, USART3, DMA1_CH3>,
        rx: RingBufferedUartRx<'static, USART3, DMA1_CH1>,
    ) -> Self {
        Self { tx, rx }
    }
}

impl Transport for TelemetryUart {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.tx.write(bytes).await.map_err(|_| TransportError)
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> usize {
        match select(self.rx.read(buf), Timer::after_micros(RX_POLL_US)).await {
            Either::First(Ok(n)) => n,
            Either::First(Err(_)) => {
                // Overrun; the ring restarts on the next read.
                defmt::warn!("telemetry: rx overrun");
                0
            }
            Either::Second(_) => 0,
        }
    }
}
