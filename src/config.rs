//! Static payload configuration.
//!
//! There is no filesystem on the board, so the configuration is a `const`
//! baked into the image and checked once at boot with [`Config::validate`].

use crate::drivers::mavlink::TrailerCheck;

/// Upper bound on scheduled device tasks.
pub const MAX_TASKS: usize = 8;

/// First display line used by device tasks; lines 0 and 1 hold the header.
pub const FIRST_DEVICE_LINE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceKind {
    /// Single-wire data line, named by board pin.
    Dht22 { data_pin: &'static str },
    Ds18x20 { data_pin: &'static str },
    /// I2C bus number and 7-bit device address.
    Ads1115 { bus: u8, address: u8 },
}

impl DeviceKind {
    pub const fn dht22() -> Self {
        DeviceKind::Dht22 { data_pin: "PA8" }
    }

    pub const fn ds18x20() -> Self {
        DeviceKind::Ds18x20 { data_pin: "PA9" }
    }

    pub const fn ads1115() -> Self {
        DeviceKind::Ads1115 {
            bus: 1,
            address: 0x48,
        }
    }

    pub const fn default_period_ms(&self) -> u32 {
        match self {
            DeviceKind::Dht22 { .. } | DeviceKind::Ds18x20 { .. } => 1000,
            DeviceKind::Ads1115 { .. } => 250,
        }
    }

    /// Directory name the device's CSV files go under.
    pub const fn log_root(&self) -> &'static str {
        match self {
            DeviceKind::Dht22 { .. } => "dht",
            DeviceKind::Ds18x20 { .. } => "ds18x20",
            DeviceKind::Ads1115 { .. } => "ads115",
        }
    }

    /// Prefix for display lines.
    pub const fn display_name(&self) -> &'static str {
        match self {
            DeviceKind::Dht22 { .. } => "dht",
            DeviceKind::Ds18x20 { .. } => "ds18x20",
            DeviceKind::Ads1115 { .. } => "A",
        }
    }

    /// Value columns appended to the GPS columns of every CSV row.
    pub const fn csv_header(&self) -> &'static str {
        match self {
            DeviceKind::Dht22 { .. } => "Humidity%,TempC",
            DeviceKind::Ds18x20 { .. } => "TempC",
            DeviceKind::Ads1115 { .. } => "A0,A1,A2,A3",
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Dht22 { .. } => "DHT22",
            DeviceKind::Ds18x20 { .. } => "DS18X20",
            DeviceKind::Ads1115 { .. } => "ADS1115",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceDescriptor {
    pub enabled: bool,
    pub kind: DeviceKind,
    /// `None` uses the kind's default.
    pub period_ms: Option<u32>,
}

impl DeviceDescriptor {
    pub const fn new(kind: DeviceKind) -> Self {
        Self {
            enabled: true,
            kind,
            period_ms: None,
        }
    }

    pub const fn period_ms(&self) -> u32 {
        match self.period_ms {
            Some(p) => p,
            None => self.kind.default_period_ms(),
        }
    }
}

/// A device that survived enablement filtering, with its display line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnabledDevice {
    pub descriptor: DeviceDescriptor,
    pub display_line: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ZeroLivenessTimeout,
    /// The startup wait cannot cover even one idle-gap poll.
    StartupTimeoutTooShort,
    TooManyDevices,
    ZeroDevicePeriod,
}

impl ConfigError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConfigError::ZeroLivenessTimeout => "liveness timeout is zero",
            ConfigError::StartupTimeoutTooShort => "startup timeout shorter than link idle gap",
            ConfigError::TooManyDevices => "more enabled devices than task slots",
            ConfigError::ZeroDevicePeriod => "device period is zero",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Pause between control-loop iterations.
    pub loop_period_ms: u32,
    pub display_enabled: bool,
    /// Silence after the last heartbeat that raises the link warning.
    pub liveness_timeout_ms: u32,
    /// How long startup waits for the first heartbeat.
    pub startup_timeout_ms: u32,
    /// Idle gap that ends one `get_messages` batch.
    pub link_idle_ms: u32,
    pub trailer_check: TrailerCheck,
    pub devices: &'static [DeviceDescriptor],
}

const DEFAULT_DEVICES: &[DeviceDescriptor] = &[
    DeviceDescriptor::new(DeviceKind::ads1115()),
    DeviceDescriptor::new(DeviceKind::dht22()),
    DeviceDescriptor::new(DeviceKind::ds18x20()),
];

pub const DEFAULT: Config = Config {
    loop_period_ms: 10,
    display_enabled: true,
    liveness_timeout_ms: 5000,
    startup_timeout_ms: 30_000,
    link_idle_ms: 5,
    trailer_check: TrailerCheck::Ignore,
    devices: DEFAULT_DEVICES,
};

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness_timeout_ms == 0 {
            return Err(ConfigError::ZeroLivenessTimeout);
        }
        if self.startup_timeout_ms <= self.link_idle_ms {
            return Err(ConfigError::StartupTimeoutTooShort);
        }
        if self.enabled_devices().count() > MAX_TASKS {
            return Err(ConfigError::TooManyDevices);
        }
        if self.enabled_devices().any(|d| d.descriptor.period_ms() == 0) {
            return Err(ConfigError::ZeroDevicePeriod);
        }
        Ok(())
    }

    /// Enabled devices in configuration order, numbered onto display lines
    /// from [`FIRST_DEVICE_LINE`].
    pub fn enabled_devices(&self) -> impl Iterator<Item = EnabledDevice> + '_ {
        self.devices
            .iter()
            .filter(|d| d.enabled)
            .zip(FIRST_DEVICE_LINE..)
            .map(|(d, line)| EnabledDevice {
                descriptor: *d,
                display_line: line,
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        DEFAULT
    }
}
