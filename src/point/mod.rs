//! Points
//!
//! A commandable point is an output whose value is arbitrated between several
//! writers by priority. The arbitration itself lives on the point types
//! ([analog::AnalogOutput], [binary::BinaryOutput]). Inputs
//! ([input::AnalogInput], [input::BinaryInput]) follow their sensor instead,
//! unless taken out of service.
//!
//! The [PointTable] holds a fixed number of one kind of point, indexed by
//! instance number.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use grounded::const_init::ConstInit;

use crate::{clock::Tick, Error};

pub mod analog;
pub mod binary;
pub mod input;

pub use analog::AnalogOutput;
pub use binary::{BinaryOutput, BinaryPv};
pub use input::{AnalogInput, BinaryInput, Polarity};

/// Number of slots in a priority array
pub const PRIORITY_LEVELS: usize = 16;

/// A 16 slot priority array
///
/// Slot `i` holds the value commanded at priority `i + 1`, or `None` when that
/// priority is relinquished. Priority 1 is the highest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityArray<V: Copy> {
    slots: [Option<V>; PRIORITY_LEVELS],
}

impl<V: Copy> PriorityArray<V> {
    /// An array with every slot relinquished
    pub const fn new() -> Self {
        Self {
            slots: [None; PRIORITY_LEVELS],
        }
    }

    /// The value at `priority`, if commanded
    pub fn get(&self, priority: u8) -> Result<Option<V>, Error> {
        Ok(self.slots[slot(priority)?])
    }

    /// Command `value` at `priority`
    pub fn set(&mut self, priority: u8, value: V) -> Result<(), Error> {
        self.slots[slot(priority)?] = Some(value);
        Ok(())
    }

    /// Relinquish `priority`
    pub fn clear(&mut self, priority: u8) -> Result<(), Error> {
        self.slots[slot(priority)?] = None;
        Ok(())
    }

    /// The value in the highest priority (lowest numbered) active slot,
    /// falling back to `default`
    pub fn resolve(&self, default: V) -> V {
        self.slots.iter().find_map(|s| *s).unwrap_or(default)
    }

    /// The highest active priority, if any
    pub fn active_priority(&self) -> Option<u8> {
        self.slots
            .iter()
            .position(Option::is_some)
            .map(|i| i as u8 + 1)
    }
}

impl<V: Copy> Default for PriorityArray<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a BACnet priority `1..=16` to a slot index
#[inline]
fn slot(priority: u8) -> Result<usize, Error> {
    match priority {
        1..=16 => Ok(priority as usize - 1),
        _ => Err(Error::InvalidPriority),
    }
}

/// Whether a present value can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Reliability {
    /// The value is good
    #[default]
    NoFaultDetected,
    /// The sensor is missing
    NoSensor,
    /// The sensor reads above its range
    OverRange,
    /// The sensor reads below its range
    UnderRange,
    /// The wiring to the sensor or actuator is open
    OpenLoop,
    /// The wiring to the sensor or actuator is shorted
    ShortedLoop,
    /// The output is not connected to anything
    NoOutput,
    /// Any other fault
    UnreliableOther,
    /// The value comes over a link that is down
    CommunicationFailure,
}

/// What every point, input or output, supports
pub trait Point: ConstInit {
    /// The type of the present value
    type Value: Copy + PartialEq;

    /// Per-point configuration, applied at init
    type Config: Copy;

    /// Apply `cfg`, resetting the point and clearing the changed flag
    fn configure(&mut self, cfg: &Self::Config, now: Tick) -> Result<(), Error>;

    /// The effective value
    fn present_value(&self) -> Self::Value;

    /// Is the point out of service?
    fn out_of_service(&self) -> bool;

    /// Take the point out of, or put it back into, service
    fn set_out_of_service(&mut self, oos: bool, now: Tick);

    /// How far the present value can be trusted
    fn reliability(&self) -> Reliability;

    /// Report a fault, or its end
    fn set_reliability(&mut self, reliability: Reliability);

    /// The sticky change of value flag
    fn changed(&self) -> bool;

    /// Acknowledge a change of value
    fn clear_changed(&mut self);
}

/// The operations every commandable output supports
///
/// `now` is only consulted by points with dwell time limits, others ignore
/// it.
pub trait Commandable: Point {
    /// Command `value` at `priority` (`1..=16`), or write the present value
    /// directly with priority `0` while out of service.
    fn write(&mut self, value: Self::Value, priority: u8, now: Tick) -> Result<(), Error>;

    /// Relinquish `priority` (`1..=16`)
    fn relinquish(&mut self, priority: u8, now: Tick) -> Result<(), Error>;

    /// The value commanded at `priority`, `None` if relinquished
    fn priority_value(&self, priority: u8) -> Result<Option<Self::Value>, Error>;

    /// The value used when no priority is active
    fn relinquish_default(&self) -> Self::Value;

    /// Change the relinquish default
    fn set_relinquish_default(&mut self, value: Self::Value, now: Tick) -> Result<(), Error>;
}

/// The operations of an input point
pub trait Input: Point {
    /// Feed a fresh reading from the hardware
    ///
    /// Ignored while the point is out of service.
    fn sample(&mut self, reading: Self::Value) -> Result<(), Error>;

    /// Write the present value over the network, which is only allowed while
    /// out of service or if the point is configured writable
    fn write_present(&mut self, value: Self::Value) -> Result<(), Error>;
}

/// A fixed size table of points
///
/// The instance number is the index into the table. The table is intended to
/// be used as a static, and uses a blocking Mutex so it can be shared between
/// tasks if needed. A device with a single polling loop can use
/// `NoopRawMutex` or `ThreadModeRawMutex`.
///
/// ```rust
/// use bacnet_field_io::point::{AnalogOutput, PointTable};
/// use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
///
/// static ANALOG_OUTPUTS: PointTable<CriticalSectionRawMutex, AnalogOutput, 4> = PointTable::new();
/// ```
pub struct PointTable<R: RawMutex, P: Point, const N: usize> {
    points: Mutex<R, RefCell<[P; N]>>,
}

impl<R: RawMutex, P: Point, const N: usize> PointTable<R, P, N> {
    /// Create a table of `N` points in their default state
    pub const fn new() -> Self {
        Self {
            points: Mutex::new(RefCell::new([const { P::VAL }; N])),
        }
    }

    /// Number of points in the table
    pub const fn count(&self) -> usize {
        N
    }

    /// Is `instance` a point of this table?
    pub fn valid_instance(&self, instance: u32) -> bool {
        (instance as usize) < N
    }

    /// Run `f` on one point
    fn with_point<T>(&self, instance: u32, f: impl FnOnce(&mut P) -> T) -> Result<T, Error> {
        let idx = usize::try_from(instance).map_err(|_| Error::UnknownInstance)?;
        self.points.lock(|cell| {
            let mut points = cell.borrow_mut();
            points.get_mut(idx).map(f).ok_or(Error::UnknownInstance)
        })
    }

    /// Apply the same configuration to every point
    pub fn configure_all(&self, cfg: &P::Config, now: Tick) -> Result<(), Error> {
        self.points.lock(|cell| {
            cell.borrow_mut()
                .iter_mut()
                .try_for_each(|p| p.configure(cfg, now))
        })
    }

    /// Configure one point
    pub fn configure(&self, instance: u32, cfg: &P::Config, now: Tick) -> Result<(), Error> {
        self.with_point(instance, |p| p.configure(cfg, now))?
    }

    /// The present value
    pub fn present_value(&self, instance: u32) -> Result<P::Value, Error> {
        self.with_point(instance, |p| p.present_value())
    }

    /// Is the point out of service?
    pub fn out_of_service(&self, instance: u32) -> Result<bool, Error> {
        self.with_point(instance, |p| p.out_of_service())
    }

    /// Take the point out of, or put it back into, service
    pub fn set_out_of_service(&self, instance: u32, oos: bool, now: Tick) -> Result<(), Error> {
        self.with_point(instance, |p| p.set_out_of_service(oos, now))
    }

    /// The reliability of the point
    pub fn reliability(&self, instance: u32) -> Result<Reliability, Error> {
        self.with_point(instance, |p| p.reliability())
    }

    /// Report a fault on the point, or its end
    pub fn set_reliability(&self, instance: u32, reliability: Reliability) -> Result<(), Error> {
        self.with_point(instance, |p| p.set_reliability(reliability))
    }

    /// The sticky change of value flag
    pub fn changed(&self, instance: u32) -> Result<bool, Error> {
        self.with_point(instance, |p| p.changed())
    }

    /// Acknowledge a change of value
    pub fn clear_changed(&self, instance: u32) -> Result<(), Error> {
        self.with_point(instance, |p| p.clear_changed())
    }

    /// Instances with a pending change of value, lowest first
    pub fn changed_instances(&self) -> heapless::Vec<u32, N> {
        self.points.lock(|cell| {
            cell.borrow()
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.changed().then_some(i as u32))
                .collect()
        })
    }
}

impl<R: RawMutex, P: Commandable, const N: usize> PointTable<R, P, N> {
    /// Command `value` at `priority`, see [Commandable::write]
    pub fn write(&self, instance: u32, value: P::Value, priority: u8, now: Tick) -> Result<(), Error> {
        let res = self.with_point(instance, |p| p.write(value, priority, now))?;
        if let Err(_e) = res {
            io_debug!("write to {=u32} at {=u8} rejected", instance, priority);
        }
        res
    }

    /// Relinquish `priority`
    pub fn relinquish(&self, instance: u32, priority: u8, now: Tick) -> Result<(), Error> {
        self.with_point(instance, |p| p.relinquish(priority, now))?
    }

    /// The value commanded at `priority`
    pub fn priority_value(&self, instance: u32, priority: u8) -> Result<Option<P::Value>, Error> {
        self.with_point(instance, |p| p.priority_value(priority))?
    }

    /// The relinquish default
    pub fn relinquish_default(&self, instance: u32) -> Result<P::Value, Error> {
        self.with_point(instance, |p| p.relinquish_default())
    }

    /// Change the relinquish default
    pub fn set_relinquish_default(&self, instance: u32, value: P::Value, now: Tick) -> Result<(), Error> {
        self.with_point(instance, |p| p.set_relinquish_default(value, now))?
    }
}

impl<R: RawMutex, P: Input, const N: usize> PointTable<R, P, N> {
    /// Feed a hardware reading, see [Input::sample]
    pub fn sample(&self, instance: u32, reading: P::Value) -> Result<(), Error> {
        self.with_point(instance, |p| p.sample(reading))?
    }

    /// Write the present value over the network, see [Input::write_present]
    pub fn write_present(&self, instance: u32, value: P::Value) -> Result<(), Error> {
        let res = self.with_point(instance, |p| p.write_present(value))?;
        if let Err(_e) = res {
            io_debug!("present value write to {=u32} rejected", instance);
        }
        res
    }
}

impl<R: RawMutex, P: Point, const N: usize> Default for PointTable<R, P, N> {
    fn default() -> Self {
        Self::new()
    }
}
