//! Analog outputs

use grounded::const_init::ConstInit;

use super::{Commandable, Point, PriorityArray, Reliability};
use crate::{clock::Tick, config::AnalogConfig, Error};

/// A continuous valued commandable output
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogOutput {
    priority_array: PriorityArray<f32>,
    relinquish_default: f32,
    present_value: f32,
    min: f32,
    max: f32,
    cov_increment: f32,
    out_of_service: bool,
    reliability: Reliability,
    changed: bool,
}

impl ConstInit for AnalogOutput {
    const VAL: Self = AnalogOutput::new(AnalogConfig::DEFAULT);
}

impl AnalogOutput {
    /// Create a point with every priority relinquished
    ///
    /// `cfg` is taken as-is, use [AnalogConfig::validate] or
    /// [Point::configure] for a checked configuration.
    pub const fn new(cfg: AnalogConfig) -> Self {
        Self {
            priority_array: PriorityArray::new(),
            relinquish_default: cfg.relinquish_default,
            present_value: cfg.relinquish_default,
            min: cfg.min,
            max: cfg.max,
            cov_increment: cfg.cov_increment,
            out_of_service: false,
            reliability: Reliability::NoFaultDetected,
            changed: false,
        }
    }

    /// The whole priority array
    pub fn priority_array(&self) -> &PriorityArray<f32> {
        &self.priority_array
    }

    /// `(min, max)` of accepted values
    pub fn limits(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// The configured COV increment
    pub fn cov_increment(&self) -> f32 {
        self.cov_increment
    }

    fn in_range(&self, value: f32) -> bool {
        in_range(self.min, self.max, value)
    }

    fn update_present(&mut self, new: f32) {
        if cov_exceeded(self.present_value, new, self.cov_increment) {
            self.changed = true;
        }
        self.present_value = new;
    }

    fn recompute(&mut self) {
        if self.out_of_service {
            return;
        }
        let candidate = self.priority_array.resolve(self.relinquish_default);
        self.update_present(candidate);
    }
}

/// `min <= value <= max`. NaN is never in range.
pub(crate) fn in_range(min: f32, max: f32, value: f32) -> bool {
    min <= value && value <= max
}

/// Did a move from `old` to `new` reach the COV increment?
///
/// A value that did not move never counts, even with a zero increment.
pub(crate) fn cov_exceeded(old: f32, new: f32, increment: f32) -> bool {
    let delta = if old > new { old - new } else { new - old };
    delta > 0.0 && delta >= increment
}

impl Point for AnalogOutput {
    type Value = f32;
    type Config = AnalogConfig;

    fn configure(&mut self, cfg: &AnalogConfig, _now: Tick) -> Result<(), Error> {
        cfg.validate()?;
        *self = AnalogOutput::new(*cfg);
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
        // Back in service: the priority array takes over again
        self.recompute();
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

impl Commandable for AnalogOutput {
    fn write(&mut self, value: f32, priority: u8, _now: Tick) -> Result<(), Error> {
        if priority > 16 {
            return Err(Error::InvalidPriority);
        }
        if priority == 0 && !self.out_of_service {
            return Err(Error::AccessDenied);
        }
        if !self.in_range(value) {
            return Err(Error::OutOfRange);
        }
        if priority == 0 {
            self.update_present(value);
            return Ok(());
        }
        self.priority_array.set(priority, value)?;
        self.recompute();
        Ok(())
    }

    fn relinquish(&mut self, priority: u8, _now: Tick) -> Result<(), Error> {
        self.priority_array.clear(priority)?;
        self.recompute();
        Ok(())
    }

    fn priority_value(&self, priority: u8) -> Result<Option<f32>, Error> {
        self.priority_array.get(priority)
    }

    fn relinquish_default(&self) -> f32 {
        self.relinquish_default
    }

    fn set_relinquish_default(&mut self, value: f32, _now: Tick) -> Result<(), Error> {
        if !self.in_range(value) {
            return Err(Error::OutOfRange);
        }
        self.relinquish_default = value;
        self.recompute();
        Ok(())
    }
}
