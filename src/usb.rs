//! USB CDC-ACM console, used as the payload's status display.

use core::fmt::Write;

use embassy_stm32::usb_otg::{self, Driver};
use embassy_stm32::{bind_interrupts, peripherals};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use flight_payload::hal::{Display, DisplayError};
use static_cell::StaticCell;

use crate::board::UsbPins;

bind_interrupts!(struct Irqs {
    OTG_FS => usb_otg::InterruptHandler<peripherals::USB_OTG_FS>;
});

pub type UsbDriver = Driver<'static, peripherals::USB_OTG_FS>;
pub type UsbSerial = CdcAcmClass<'static, UsbDriver>;

const MAX_PACKET: u16 = 64;

struct UsbBuffers {
    config_desc: [u8; 256],
    bos_desc: [u8; 256],
    control_buf: [u8; 64],
    ep_out: [u8; 256],
}

static BUFFERS: StaticCell<UsbBuffers> = StaticCell::new();
static CDC_STATE: StaticCell<State<'static>> = StaticCell::new();

pub fn init(pins: UsbPins) -> (UsbDevice<'static, UsbDriver>, UsbSerial) {
    let UsbBuffers {
        config_desc,
        bos_desc,
        control_buf,
        ep_out,
    } = BUFFERS.init(UsbBuffers {
        config_desc: [0; 256],
        bos_desc: [0; 256],
        control_buf: [0; 64],
        ep_out: [0; 256],
    });

    let mut usb_config = usb_otg::Config::default();
    usb_config.vbus_detection = false;
    let driver = Driver::new_fs(pins.otg, Irqs, pins.dp, pins.dm, ep_out, usb_config);

    let mut config = Config::new(0xc0de, 0xcafe);
    config.manufacturer = Some("MPSP");
    config.product = Some("Flight payload console");
    config.serial_number = Some("00000002");

    let mut builder = Builder::new(driver, config, config_desc, bos_desc, &mut [], control_buf);
    let class = CdcAcmClass::new(&mut builder, CDC_STATE.init(State::new()), MAX_PACKET);
    (builder.build(), class)
}

// ── Display ───────────────────────────────────────────────────────────────────

/// Renders the display as a fixed-row terminal screen: the header on rows 1
/// and 2, device line `n` on row `n + 1`.
pub struct UsbDisplay {
    serial: UsbSerial,
}

impl UsbDisplay {
    pub fn new(serial: UsbSerial) -> Self {
        Self { serial }
    }

    async fn send(&mut self, text: &str) -> Result<(), DisplayError> {
        // No terminal attached.
        if !self.serial.dtr() {
            return Ok(());
        }
        // Stay below a full packet so no zero-length terminator is needed.
        for chunk in text.as_bytes().chunks(MAX_PACKET as usize - 1) {
            self.serial
                .write_packet(chunk)
                .await
                .map_err(|_: EndpointError| DisplayError)?;
        }
        Ok(())
    }
}

impl Display for UsbDisplay {
    async fn header(&mut self, title: &str, subtitle: &str) -> Result<(), DisplayError> {
        let mut s: heapless::String<96> = heapless::String::new();
        write!(s, "\x1b[2J\x1b[1;1H{}\r\n{}\r\n", title, subtitle).map_err(|_| DisplayError)?;
        self.send(&s).await
    }

    async fn show_line(&mut self, text: &str, index: u8) -> Result<(), DisplayError> {
        let mut s: heapless::String<64> = heapless::String::new();
        write!(s, "\x1b[{};1H\x1b[2K{}", index as u16 + 1, text).map_err(|_| DisplayError)?;
        self.send(&s).await
    }
}
