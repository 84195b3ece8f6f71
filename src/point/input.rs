//! Analog and binary inputs
//!
//! An input follows its sensor: the application feeds every fresh reading
//! with [Input::sample]. While the point is out of service, readings are
//! ignored and the present value can be written over the network instead,
//! for testing or to override a broken sensor. A point configured
//! `writable` takes network writes while in service too.
//!
//! Change of value detection follows the outputs: analog inputs flag a move
//! of at least the COV increment, binary inputs any change of state.

use grounded::const_init::ConstInit;

use super::{
    analog::{cov_exceeded, in_range},
    BinaryPv, Input, Point, Reliability,
};
use crate::{
    clock::Tick,
    config::{AnalogInputConfig, BinaryInputConfig},
    Error,
};

/// How the state of a binary contact maps onto the present value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Polarity {
    /// A closed contact reads Active
    #[default]
    Normal,
    /// A closed contact reads Inactive
    Reverse,
}

impl Polarity {
    /// The present value for the physical state `raw`
    pub fn apply(self, raw: BinaryPv) -> BinaryPv {
        match (self, raw) {
            (Polarity::Normal, v) => v,
            (Polarity::Reverse, BinaryPv::Active) => BinaryPv::Inactive,
            (Polarity::Reverse, BinaryPv::Inactive) => BinaryPv::Active,
        }
    }
}

/// A continuous valued input
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogInput {
    present_value: f32,
    min: f32,
    max: f32,
    cov_increment: f32,
    writable: bool,
    out_of_service: bool,
    reliability: Reliability,
    changed: bool,
}

impl ConstInit for AnalogInput {
    const VAL: Self = AnalogInput::new(AnalogInputConfig::DEFAULT);
}

impl AnalogInput {
    /// Create a point reading 0.0
    ///
    /// `cfg` is taken as-is, use [AnalogInputConfig::validate] or
    /// [Point::configure] for a checked configuration.
    pub const fn new(cfg: AnalogInputConfig) -> Self {
        Self {
            present_value: 0.0,
            min: cfg.min,
            max: cfg.max,
            cov_increment: cfg.cov_increment,
            writable: cfg.writable,
            out_of_service: false,
            reliability: Reliability::NoFaultDetected,
            changed: false,
        }
    }

    /// `(min, max)` of plausible readings
    pub fn limits(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// The configured COV increment
    pub fn cov_increment(&self) -> f32 {
        self.cov_increment
    }

    /// Change the COV increment. Negative and NaN increments are rejected.
    pub fn set_cov_increment(&mut self, increment: f32) -> Result<(), Error> {
        if !(increment >= 0.0) {
            return Err(Error::InvalidConfig);
        }
        self.cov_increment = increment;
        Ok(())
    }

    /// Does the network get to write the present value while in service?
    pub fn writable(&self) -> bool {
        self.writable
    }

    fn update_present(&mut self, new: f32) {
        if cov_exceeded(self.present_value, new, self.cov_increment) {
            self.changed = true;
        }
        self.present_value = new;
    }
}

impl Point for AnalogInput {
    type Value = f32;
    type Config = AnalogInputConfig;

    fn configure(&mut self, cfg: &AnalogInputConfig, _now: Tick) -> Result<(), Error> {
        cfg.validate()?;
        *self = AnalogInput::new(*cfg);
        Ok(())
    }

    fn present_value(&self) -> f32 {
        self.present_value
    }

    fn out_of_service(&self) -> bool {
        self.out_of_service
    }

    fn set_out_of_service(&mut self, oos: bool, _now: Tick) {
        self.out_of_service = oos;
    }

    fn reliability(&self) -> Reliability {
        self.reliability
    }

    fn set_reliability(&mut self, reliability: Reliability) {
        self.reliability = reliability;
    }

    fn changed(&self) -> bool {
        self.changed
    }

    fn clear_changed(&mut self) {
        self.changed = false;
    }
}

impl Input for AnalogInput {
    /// A reading outside the limits keeps the last good value, and marks the
    /// point over or under range until the next good reading. NaN marks it
    /// as having no sensor.
    fn sample(&mut self, reading: f32) -> Result<(), Error> {
        if self.out_of_service {
            return Ok(());
        }
        if !in_range(self.min, self.max, reading) {
            self.reliability = if reading > self.max {
                Reliability::OverRange
            } else if reading < self.min {
                Reliability::UnderRange
            } else {
                Reliability::NoSensor
            };
            return Err(Error::OutOfRange);
        }
        if matches!(
            self.reliability,
            Reliability::OverRange | Reliability::UnderRange | Reliability::NoSensor
        ) {
            self.reliability = Reliability::NoFaultDetected;
        }
        self.update_present(reading);
        Ok(())
    }

    fn write_present(&mut self, value: f32) -> Result<(), Error> {
        if !(self.out_of_service || self.writable) {
            return Err(Error::AccessDenied);
        }
        if !in_range(self.min, self.max, value) {
            return Err(Error::OutOfRange);
        }
        self.update_present(value);
        Ok(())
    }
}

/// A two-state input
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryInput {
    present_value: BinaryPv,
    polarity: Polarity,
    writable: bool,
    out_of_service: bool,
    reliability: Reliability,
    changed: bool,
}

impl ConstInit for BinaryInput {
    const VAL: Self = BinaryInput::new(BinaryInputConfig::DEFAULT);
}

impl BinaryInput {
    /// Create a point reading Inactive
    pub const fn new(cfg: BinaryInputConfig) -> Self {
        Self {
            present_value: BinaryPv::Inactive,
            polarity: cfg.polarity,
            writable: cfg.writable,
            out_of_service: false,
            reliability: Reliability::NoFaultDetected,
            changed: false,
        }
    }

    /// The configured polarity
    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Change the polarity, applied from the next reading on
    pub fn set_polarity(&mut self, polarity: Polarity) {
        self.polarity = polarity;
    }

    /// Does the network get to write the present value while in service?
    pub fn writable(&self) -> bool {
        self.writable
    }

    fn update_present(&mut self, new: BinaryPv) {
        if new != self.present_value {
            self.changed = true;
        }
        self.present_value = new;
    }
}

impl Point for BinaryInput {
    type Value = BinaryPv;
    type Config = BinaryInputConfig;

    fn configure(&mut self, cfg: &BinaryInputConfig, _now: Tick) -> Result<(), Error> {
        *self = BinaryInput::new(*cfg);
        Ok(())
    }

    fn present_value(&self) -> BinaryPv {
        self.present_value
    }

    fn out_of_service(&self) -> bool {
        self.out_of_service
    }

    fn set_out_of_service(&mut self, oos: bool, _now: Tick) {
        self.out_of_service = oos;
    }

    fn reliability(&self) -> Reliability {
        self.reliability
    }

    fn set_reliability(&mut self, reliability: Reliability) {
        self.reliability = reliability;
    }

    fn changed(&self) -> bool {
        self.changed
    }

    fn clear_changed(&mut self) {
        self.changed = false;
    }
}

impl Input for BinaryInput {
    /// `reading` is the physical contact state, before polarity
    fn sample(&mut self, reading: BinaryPv) -> Result<(), Error> {
        if self.out_of_service {
            return Ok(());
        }
        let value = self.polarity.apply(reading);
        self.update_present(value);
        Ok(())
    }

    fn write_present(&mut self, value: BinaryPv) -> Result<(), Error> {
        if !(self.out_of_service || self.writable) {
            return Err(Error::AccessDenied);
        }
        self.update_present(value);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use BinaryPv::{Active, Inactive};

    const T0: Tick = Tick(0);

    fn analog(writable: bool) -> AnalogInput {
        let mut p = AnalogInput::VAL;
        let cfg = AnalogInputConfig {
            min: -40.0,
            max: 120.0,
            cov_increment: 0.5,
            writable,
        };
        p.configure(&cfg, T0).unwrap();
        p
    }

    #[test]
    fn analog_samples_follow_cov_rule() {
        let mut p = analog(false);
        p.sample(21.0).unwrap();
        assert_eq!(p.present_value(), 21.0);
        assert!(p.changed());
        p.clear_changed();

        p.sample(21.25).unwrap();
        assert_eq!(p.present_value(), 21.25);
        assert!(!p.changed());

        p.sample(21.75).unwrap();
        assert!(p.changed());
        p.clear_changed();

        p.sample(21.75).unwrap();
        assert!(!p.changed());
    }

    #[test]
    fn analog_bad_readings_mark_reliability() {
        let mut p = analog(false);
        p.sample(20.0).unwrap();

        assert_eq!(p.sample(150.0), Err(Error::OutOfRange));
        assert_eq!(p.present_value(), 20.0);
        assert_eq!(p.reliability(), Reliability::OverRange);

        assert_eq!(p.sample(-50.0), Err(Error::OutOfRange));
        assert_eq!(p.reliability(), Reliability::UnderRange);

        assert_eq!(p.sample(f32::NAN), Err(Error::OutOfRange));
        assert_eq!(p.reliability(), Reliability::NoSensor);

        p.sample(22.0).unwrap();
        assert_eq!(p.reliability(), Reliability::NoFaultDetected);
    }

    #[test]
    fn good_reading_keeps_other_faults() {
        let mut p = analog(false);
        p.set_reliability(Reliability::CommunicationFailure);
        p.sample(10.0).unwrap();
        assert_eq!(p.reliability(), Reliability::CommunicationFailure);
    }

    #[test]
    fn analog_network_write_needs_oos_or_writable() {
        let mut p = analog(false);
        assert_eq!(p.write_present(30.0), Err(Error::AccessDenied));
        assert_eq!(p.present_value(), 0.0);

        p.set_out_of_service(true, T0);
        assert_eq!(p.write_present(300.0), Err(Error::OutOfRange));
        p.write_present(30.0).unwrap();
        assert_eq!(p.present_value(), 30.0);
        assert!(p.changed());

        // The sensor is disconnected while out of service
        p.sample(5.0).unwrap();
        assert_eq!(p.present_value(), 30.0);

        p.set_out_of_service(false, T0);
        p.sample(5.0).unwrap();
        assert_eq!(p.present_value(), 5.0);

        let mut w = analog(true);
        w.write_present(12.0).unwrap();
        assert_eq!(w.present_value(), 12.0);
    }

    #[test]
    fn cov_increment_setter() {
        let mut p = analog(false);
        assert_eq!(p.set_cov_increment(-0.1), Err(Error::InvalidConfig));
        assert_eq!(p.set_cov_increment(f32::NAN), Err(Error::InvalidConfig));
        assert_eq!(p.cov_increment(), 0.5);

        p.set_cov_increment(0.0).unwrap();
        p.sample(1.0).unwrap();
        p.clear_changed();
        p.sample(1.0).unwrap();
        assert!(!p.changed());
        p.sample(1.001).unwrap();
        assert!(p.changed());
    }

    #[test]
    fn analog_bad_config_rejected() {
        let mut p = analog(false);
        let cfg = AnalogInputConfig {
            min: 10.0,
            max: -10.0,
            ..AnalogInputConfig::DEFAULT
        };
        assert_eq!(p.configure(&cfg, T0), Err(Error::InvalidConfig));
        assert_eq!(p.limits(), (-40.0, 120.0));
    }

    #[test]
    fn binary_polarity() {
        let mut p = BinaryInput::VAL;
        p.sample(Active).unwrap();
        assert_eq!(p.present_value(), Active);
        assert!(p.changed());
        p.clear_changed();

        p.set_polarity(Polarity::Reverse);
        assert_eq!(p.present_value(), Active);
        p.sample(Active).unwrap();
        assert_eq!(p.present_value(), Inactive);
        assert!(p.changed());
        p.clear_changed();

        p.sample(Active).unwrap();
        assert!(!p.changed());
    }

    #[test]
    fn binary_network_write_needs_oos_or_writable() {
        let mut p = BinaryInput::VAL;
        assert_eq!(p.write_present(Active), Err(Error::AccessDenied));
        assert!(!p.changed());

        p.set_out_of_service(true, T0);
        p.write_present(Active).unwrap();
        assert!(p.changed());
        p.sample(Inactive).unwrap();
        assert_eq!(p.present_value(), Active);

        let mut w = BinaryInput::new(BinaryInputConfig {
            writable: true,
            ..BinaryInputConfig::DEFAULT
        });
        w.write_present(Active).unwrap();
        assert_eq!(w.present_value(), Active);
    }
}
