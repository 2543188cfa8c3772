//! TLC59711 12-channel PWM driver: command word packing.
//!
//! One write is 224 bits, MSB first:
//! `100101` | OUTTMG EXTGCK TMGRST DSPRPT BLANK | BC×3 (7 bit) | GS×12 (16 bit).
//! Everything here is `const` so the tail light frames are baked into flash.

pub const COMMAND_LEN: usize = 28;
pub const COMMAND_BITS: usize = COMMAND_LEN * 8;

const WRITE_CMD: u32 = 0b100101;

pub const HIGH: u16 = u16::MAX;
pub const LOW: u16 = 0;

/// Global brightness ceiling for each colour group.
pub const FULL_BRIGHTNESS: u8 = 0b111_1111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    pub outtmg: bool,
    pub extgck: bool,
    pub tmgrst: bool,
    pub dsprpt: bool,
    pub blank: bool,
}

impl Flags {
    pub const DEFAULT: Flags = Flags {
        outtmg: true,
        extgck: false,
        tmgrst: true,
        dsprpt: true,
        blank: false,
    };
}

/// Driver register image: four RGB pixels of 16-bit greyscale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlc59711 {
    pub flags: Flags,
    pub brightness: [u8; 3],
    pixels: [[u16; 3]; 4],
}

impl Tlc59711 {
    pub const fn new() -> Self {
        Self {
            flags: Flags::DEFAULT,
            brightness: [FULL_BRIGHTNESS; 3],
            pixels: [[LOW; 3]; 4],
        }
    }

    /// Set one channel. `pixel` and `color` are board numbering; the chip
    /// shifts pixels out in reverse and colours B-G-R within a pixel.
    ///
    /// Panics (at compile time for `const` frames) when `pixel > 3` or `color > 2`.
    pub const fn with_led(mut self, pixel: usize, color: usize, value: u16) -> Self {
        self.pixels[3 - pixel][2 - color] = value;
        self
    }

    pub const fn led(&self, pixel: usize, color: usize) -> u16 {
        self.pixels[3 - pixel][2 - color]
    }

    pub const fn command(&self) -> [u8; COMMAND_LEN] {
        let f = &self.flags;
        let mut out = [0u8; COMMAND_LEN];
        let mut pos = 0;

        out = put_bits(out, pos, WRITE_CMD, 6);
        pos += 6;

        let flags = [f.outtmg, f.extgck, f.tmgrst, f.dsprpt, f.blank];
        let mut i = 0;
        while i < flags.len() {
            out = put_bits(out, pos, flags[i] as u32, 1);
            pos += 1;
            i += 1;
        }

        i = 0;
        while i < 3 {
            out = put_bits(out, pos, (self.brightness[i] & FULL_BRIGHTNESS) as u32, 7);
            pos += 7;
            i += 1;
        }

        let mut p = 0;
        while p < 4 {
            let mut c = 0;
            while c < 3 {
                out = put_bits(out, pos, self.pixels[p][c] as u32, 16);
                pos += 16;
                c += 1;
            }
            p += 1;
        }

        out
    }
}

impl Default for Tlc59711 {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the low `width` bits of `value`, MSB first, starting at bit `pos`.
const fn put_bits(mut out: [u8; COMMAND_LEN], pos: usize, value: u32, width: usize) -> [u8; COMMAND_LEN] {
    let mut i = 0;
    while i < width {
        let bit = (value >> (width - 1 - i)) & 1;
        let at = pos + i;
        if bit != 0 {
            out[at / 8] |= 0x80 >> (at % 8);
        }
        i += 1;
    }
    out
}

/// 64-bit FNV-1a.
pub const fn fingerprint(bytes: &[u8; COMMAND_LEN]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        i += 1;
    }
    hash
}

/// A ready-to-send tail command and its write-suppression key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailFrame {
    pub bytes: [u8; COMMAND_LEN],
    pub fingerprint: u64,
}

impl TailFrame {
    pub const fn from_driver(driver: &Tlc59711) -> Self {
        let bytes = driver.command();
        Self {
            fingerprint: fingerprint(&bytes),
            bytes,
        }
    }
}
