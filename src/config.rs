//! Deployment configuration
//!
//! Everything here is set once at initialization and never hot-reloaded.
//! Each type has a `const` default, so it can be used to build statics, and
//! validates its fields when it is constructed or changed.

use embassy_time::Duration;

use crate::{
    point::{binary::BinaryPv, input::Polarity},
    Error, MAX_STATION_ADDRESS,
};

/// Baud rates legal on an MS/TP segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BaudRate {
    /// 9600 baud
    B9600,
    /// 19200 baud, the default
    B19200,
    /// 38400 baud
    B38400,
    /// 57600 baud
    B57600,
    /// 76800 baud
    B76800,
    /// 115200 baud
    B115200,
}

impl BaudRate {
    /// The rate in bits per second
    pub const fn bps(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B76800 => 76800,
            BaudRate::B115200 => 115200,
        }
    }

    /// How long `bits` bit times take on the wire
    pub fn bits_to_time(self, bits: u32) -> Duration {
        Duration::from_micros(bits as u64 * 1_000_000 / self.bps() as u64)
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        BaudRate::B19200
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            9600 => Ok(BaudRate::B9600),
            19200 => Ok(BaudRate::B19200),
            38400 => Ok(BaudRate::B38400),
            57600 => Ok(BaudRate::B57600),
            76800 => Ok(BaudRate::B76800),
            115200 => Ok(BaudRate::B115200),
            _ => Err(Error::InvalidBaudRate),
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(val: BaudRate) -> Self {
        val.bps()
    }
}

/// Serial link and MS/TP station configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig {
    station: u8,
    baud: BaudRate,
    max_master: u8,
    max_info_frames: u8,
    #[cfg_attr(feature = "serde", serde(with = "duration_us"))]
    driver_setup: Duration,
    #[cfg_attr(feature = "serde", serde(with = "duration_us"))]
    turnaround_guard: Duration,
}

impl LinkConfig {
    /// The largest legal `max_master`
    pub const MAX_MASTER_LIMIT: u8 = 127;

    /// Station 1, 19200 baud, max master 127, one info frame, 10us driver
    /// setup and guard
    pub const DEFAULT: Self = Self {
        station: 1,
        baud: BaudRate::B19200,
        max_master: 127,
        max_info_frames: 1,
        driver_setup: Duration::from_micros(10),
        turnaround_guard: Duration::from_micros(10),
    };

    /// Create a configuration with the given station address and the rest
    /// of [LinkConfig::DEFAULT]
    pub fn new(station: u8) -> Result<Self, Error> {
        let mut cfg = Self::DEFAULT;
        cfg.set_station(station)?;
        Ok(cfg)
    }

    /// This station's MAC address, `0..=254`
    pub fn station(&self) -> u8 {
        self.station
    }

    /// Set the station address. `255` is the broadcast address and is
    /// rejected.
    pub fn set_station(&mut self, station: u8) -> Result<(), Error> {
        if station > MAX_STATION_ADDRESS {
            return Err(Error::InvalidConfig);
        }
        self.station = station;
        Ok(())
    }

    /// The configured baud rate
    pub fn baud(&self) -> BaudRate {
        self.baud
    }

    /// Set the baud rate
    pub fn set_baud(&mut self, baud: BaudRate) {
        self.baud = baud;
    }

    /// Highest master station address polled, `0..=127`
    pub fn max_master(&self) -> u8 {
        self.max_master
    }

    /// Set the highest master address
    pub fn set_max_master(&mut self, max_master: u8) -> Result<(), Error> {
        if max_master > Self::MAX_MASTER_LIMIT {
            return Err(Error::InvalidConfig);
        }
        self.max_master = max_master;
        Ok(())
    }

    /// Frames this station may send per token, at least 1
    pub fn max_info_frames(&self) -> u8 {
        self.max_info_frames
    }

    /// Set the number of frames per token
    pub fn set_max_info_frames(&mut self, frames: u8) -> Result<(), Error> {
        if frames == 0 {
            return Err(Error::InvalidConfig);
        }
        self.max_info_frames = frames;
        Ok(())
    }

    /// Time between asserting driver enable and loading the first byte
    pub fn driver_setup(&self) -> Duration {
        self.driver_setup
    }

    /// Set the driver enable setup time
    pub fn set_driver_setup(&mut self, setup: Duration) {
        self.driver_setup = setup;
    }

    /// Time driver enable stays asserted after the shift register drained
    pub fn turnaround_guard(&self) -> Duration {
        self.turnaround_guard
    }

    /// Set the turnaround guard time
    pub fn set_turnaround_guard(&mut self, guard: Duration) {
        self.turnaround_guard = guard;
    }

    /// Is this station a master node, i.e. does it take part in token passing?
    pub fn is_master(&self) -> bool {
        self.station <= self.max_master
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-point configuration of an analog output
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalogConfig {
    /// Lowest accepted value, inclusive
    pub min: f32,
    /// Highest accepted value, inclusive
    pub max: f32,
    /// Smallest change of the present value that raises the changed flag
    pub cov_increment: f32,
    /// Present value when no priority slot is active
    pub relinquish_default: f32,
}

impl AnalogConfig {
    /// `0.0..=100.0`, COV increment 1.0, relinquish default 0.0
    pub const DEFAULT: Self = Self {
        min: 0.0,
        max: 100.0,
        cov_increment: 1.0,
        relinquish_default: 0.0,
    };

    /// Check that the range is ordered, the increment is not negative, and
    /// the relinquish default lies inside the range. NaN fails every check.
    ///
    /// A zero increment is allowed, and flags every change of the present
    /// value.
    pub fn validate(&self) -> Result<(), Error> {
        let range_ok = self.min <= self.max;
        let cov_ok = self.cov_increment >= 0.0;
        let default_ok = self.min <= self.relinquish_default && self.relinquish_default <= self.max;
        if range_ok && cov_ok && default_ok {
            Ok(())
        } else {
            Err(Error::InvalidConfig)
        }
    }
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-point configuration of a binary output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinaryConfig {
    /// Minimum time the output stays Active before it may turn Inactive
    #[cfg_attr(feature = "serde", serde(with = "duration_us"))]
    pub min_on_time: Duration,
    /// Minimum time the output stays Inactive before it may turn Active
    #[cfg_attr(feature = "serde", serde(with = "duration_us"))]
    pub min_off_time: Duration,
    /// Present value when no priority slot is active
    pub relinquish_default: BinaryPv,
}

impl BinaryConfig {
    /// No dwell limits, relinquish default Inactive
    pub const DEFAULT: Self = Self {
        min_on_time: Duration::from_ticks(0),
        min_off_time: Duration::from_ticks(0),
        relinquish_default: BinaryPv::Inactive,
    };
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-point configuration of an analog input
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalogInputConfig {
    /// Lowest plausible reading, inclusive
    pub min: f32,
    /// Highest plausible reading, inclusive
    pub max: f32,
    /// Smallest change of the present value that raises the changed flag
    pub cov_increment: f32,
    /// May the network write the present value while in service?
    pub writable: bool,
}

impl AnalogInputConfig {
    /// `-100000.0..=100000.0`, COV increment 1.0, not writable
    pub const DEFAULT: Self = Self {
        min: -100_000.0,
        max: 100_000.0,
        cov_increment: 1.0,
        writable: false,
    };

    /// Check that the range is ordered and the increment is not negative.
    /// NaN fails every check.
    pub fn validate(&self) -> Result<(), Error> {
        if self.min <= self.max && self.cov_increment >= 0.0 {
            Ok(())
        } else {
            Err(Error::InvalidConfig)
        }
    }
}

impl Default for AnalogInputConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Per-point configuration of a binary input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BinaryInputConfig {
    /// How the contact maps onto the present value
    pub polarity: Polarity,
    /// May the network write the present value while in service?
    pub writable: bool,
}

impl BinaryInputConfig {
    /// Normal polarity, not writable
    pub const DEFAULT: Self = Self {
        polarity: Polarity::Normal,
        writable: false,
    };
}

#[cfg(feature = "serde")]
mod duration_us {
    use embassy_time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_micros)
    }
}

/// Helpers for storing a [LinkConfig] in a flash configuration page
#[cfg(feature = "postcard-config")]
pub mod flash {
    use super::LinkConfig;
    use crate::Error;

    /// Largest encoded size of a [LinkConfig]
    pub const MAX_ENCODED_LEN: usize = 32;

    /// Encode `cfg` into the front of `buf`, returning the used part
    pub fn store<'a>(cfg: &LinkConfig, buf: &'a mut [u8]) -> Result<&'a mut [u8], Error> {
        postcard::to_slice(cfg, buf).map_err(|_| Error::FrameTooLarge)
    }

    /// Decode and validate a [LinkConfig] previously written with [store]
    pub fn load(buf: &[u8]) -> Result<LinkConfig, Error> {
        let cfg: LinkConfig = postcard::from_bytes(buf).map_err(|_| Error::InvalidConfig)?;
        // An erased or corrupted page may still decode; re-check the limits
        let mut checked = LinkConfig::DEFAULT;
        checked.set_station(cfg.station())?;
        checked.set_max_master(cfg.max_master())?;
        checked.set_max_info_frames(cfg.max_info_frames())?;
        checked.set_baud(cfg.baud());
        checked.set_driver_setup(cfg.driver_setup());
        checked.set_turnaround_guard(cfg.turnaround_guard());
        Ok(checked)
    }

    #[cfg(test)]
    mod test {
        use super::*;
        use crate::BaudRate;

        #[test]
        fn store_then_load() {
            let mut cfg = LinkConfig::new(42).unwrap();
            cfg.set_baud(BaudRate::B38400);
            cfg.set_max_master(64).unwrap();
            let mut page = [0xFFu8; MAX_ENCODED_LEN];
            let used = store(&cfg, &mut page).unwrap().len();
            assert!(used <= MAX_ENCODED_LEN);
            assert_eq!(load(&page[..used]).unwrap(), cfg);
        }

        #[test]
        fn erased_page_rejected() {
            let page = [0xFFu8; MAX_ENCODED_LEN];
            assert!(load(&page).is_err());
        }
    }
}
