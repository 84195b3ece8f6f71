//! Binary outputs with minimum on/off dwell times

use embassy_time::Duration;
use grounded::const_init::ConstInit;

use super::{Commandable, Point, PriorityArray, Reliability};
use crate::{
    clock::{millis, Tick},
    config::BinaryConfig,
    Error,
};

/// The present value of a binary output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryPv {
    /// Off
    #[default]
    Inactive,
    /// On
    Active,
}

impl From<bool> for BinaryPv {
    fn from(value: bool) -> Self {
        if value {
            BinaryPv::Active
        } else {
            BinaryPv::Inactive
        }
    }
}

impl From<BinaryPv> for bool {
    fn from(value: BinaryPv) -> Self {
        value == BinaryPv::Active
    }
}

/// A two-state commandable output
///
/// A transition is only taken once the current state has been held for its
/// minimum dwell time. A transition that is too early is dropped, not
/// deferred: the priority array keeps the command, and the next write or
/// relinquish evaluates it again.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOutput {
    priority_array: PriorityArray<BinaryPv>,
    relinquish_default: BinaryPv,
    present_value: BinaryPv,
    last_stable_state: BinaryPv,
    last_transition: Tick,
    min_on_time: Duration,
    min_off_time: Duration,
    out_of_service: bool,
    reliability: Reliability,
    changed: bool,
}

impl ConstInit for BinaryOutput {
    const VAL: Self = BinaryOutput::new(BinaryConfig::DEFAULT, Tick(0));
}

impl BinaryOutput {
    /// Create a point at its relinquish default, considered held since `now`
    pub const fn new(cfg: BinaryConfig, now: Tick) -> Self {
        Self {
            priority_array: PriorityArray::new(),
            relinquish_default: cfg.relinquish_default,
            present_value: cfg.relinquish_default,
            last_stable_state: cfg.relinquish_default,
            last_transition: now,
            min_on_time: cfg.min_on_time,
            min_off_time: cfg.min_off_time,
            out_of_service: false,
            reliability: Reliability::NoFaultDetected,
            changed: false,
        }
    }

    /// The whole priority array
    pub fn priority_array(&self) -> &PriorityArray<BinaryPv> {
        &self.priority_array
    }

    /// The state before the last transition
    pub fn last_stable_state(&self) -> BinaryPv {
        self.last_stable_state
    }

    /// The tick of the last transition
    pub fn last_transition(&self) -> Tick {
        self.last_transition
    }

    /// Has the present state been held long enough to leave it?
    fn dwell_satisfied(&self, now: Tick) -> bool {
        let held = now.millis_since(self.last_transition);
        let min = match self.present_value {
            BinaryPv::Active => millis(self.min_on_time),
            BinaryPv::Inactive => millis(self.min_off_time),
        };
        held >= min
    }

    fn transition(&mut self, new: BinaryPv, now: Tick) {
        if new == self.present_value {
            return;
        }
        self.last_stable_state = self.present_value;
        self.present_value = new;
        self.last_transition = now;
        self.changed = true;
    }

    fn recompute(&mut self, now: Tick) {
        if self.out_of_service {
            return;
        }
        let candidate = self.priority_array.resolve(self.relinquish_default);
        if candidate == self.present_value {
            return;
        }
        if !self.dwell_satisfied(now) {
            io_trace!("binary transition suppressed by dwell");
            return;
        }
        self.transition(candidate, now);
    }
}

impl Point for BinaryOutput {
    type Value = BinaryPv;
    type Config = BinaryConfig;

    fn configure(&mut self, cfg: &BinaryConfig, now: Tick) -> Result<(), Error> {
        *self = BinaryOutput::new(*cfg, now);
        Ok(())
    }

    fn present_value(&self) -> BinaryPv {
        self.present_value
    }

    fn out_of_service(&self) -> bool {
        self.out_of_service
    }

    fn set_out_of_service(&mut self, oos: bool, now: Tick) {
        self.out_of_service = oos;
        self.recompute(now);
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

impl Commandable for BinaryOutput {
    fn write(&mut self, value: BinaryPv, priority: u8, now: Tick) -> Result<(), Error> {
        if priority == 0 {
            if !self.out_of_service {
                return Err(Error::AccessDenied);
            }
            self.transition(value, now);
            return Ok(());
        }
        self.priority_array.set(priority, value)?;
        self.recompute(now);
        Ok(())
    }

    fn relinquish(&mut self, priority: u8, now: Tick) -> Result<(), Error> {
        self.priority_array.clear(priority)?;
        self.recompute(now);
        Ok(())
    }

    fn priority_value(&self, priority: u8) -> Result<Option<BinaryPv>, Error> {
        self.priority_array.get(priority)
    }

    fn relinquish_default(&self) -> BinaryPv {
        self.relinquish_default
    }

    fn set_relinquish_default(&mut self, value: BinaryPv, now: Tick) -> Result<(), Error> {
        self.relinquish_default = value;
        self.recompute(now);
        Ok(())
    }
}
