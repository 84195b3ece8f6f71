//! # BACnet Field I/O
//!
//! This is the run-time I/O core of a BACnet MS/TP field device. It's intended
//! to run on bare metal devices with one interrupt context and one cooperative
//! polling loop, and does two things:
//!
//! 1. Arbitrate competing writes to physical outputs ([point])
//! 2. Move bytes across a shared, half-duplex RS-485 bus ([serial], [datalink])
//!
//! Both halves share the same millisecond time base ([clock]).
//!
//! ## Commandable points
//!
//! Every output owns a 16 slot priority array. Writers (the application, the
//! protocol stack, an operator workstation...) each command a slot, and the
//! effective "present value" is the value in the lowest numbered active slot,
//! or the relinquish default if no slot is active.
//!
//! On top of that:
//!
//! * Analog outputs reject values outside their configured range, and raise a
//!   sticky "changed" flag only when the present value moves by at least the
//!   COV increment.
//! * Binary outputs enforce a minimum on time and a minimum off time, so two
//!   writers racing each other can't short-cycle a motor or chatter a contact.
//!   A suppressed transition is NOT queued, it is re-evaluated on the next
//!   write or relinquish.
//! * Out of service points take direct writes, bypassing the priority array.
//!
//! Analog and binary inputs share the out of service, reliability and COV
//! handling, but follow readings from their sensor instead of a priority
//! array.
//!
//! ## Serial transport
//!
//! RS-485 is a half-duplex, shared medium bus. The [`SerialLink`] owns:
//!
//! * A receive ring of bytes, each stamped with the millisecond tick it arrived
//!   at. The receive interrupt is the only producer, the polling loop is the
//!   only consumer. When the ring is full, the newest byte is dropped and
//!   counted; a flow-control-free bus is lossy anyway.
//! * A transmit buffer, shifted out byte-by-byte from the transmit interrupt.
//!   The driver enable line is asserted before the first byte, and held for a
//!   guard time after the shift register drains, so the last stop bit is not
//!   truncated.
//!
//! A send while a frame is still in flight fails with [`Error::Busy`]. This is
//! a normal condition, the caller retries later.
//!
//! ## Link layer glue
//!
//! The MS/TP token passing state machine itself is NOT part of this crate. It
//! is modeled as the [`datalink::MstpFsm`] trait, and talks to the
//! [`Datalink`] only through the four calls of [`datalink::FrameGlue`]:
//!
//! 1. Pull a formatted frame to send, if one is queued
//! 2. Pull one received byte
//! 3. Hand over a completely received frame
//! 4. Push bytes onto the wire
//!
//! ## Contexts
//!
//! | Item                          | Interrupt | Polling loop |
//! | :---------------------------- | :-------: | :----------: |
//! | [`Clock::on_tick`]            |     X     |              |
//! | [`serial::IsrPort`]           |     X     |              |
//! | [`serial::LinkPort`]          |           |      X       |
//! | [`Datalink`], [`point`] table |           |      X       |

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod clock;
pub mod config;
pub mod datalink;
pub mod frame;
pub mod point;
mod ring;
pub mod serial;

pub use crate::{
    clock::{Clock, Tick},
    config::{BaudRate, LinkConfig},
    datalink::Datalink,
    ring::TimestampedByte,
    serial::SerialLink,
};

/// The MS/TP broadcast station address
pub const BROADCAST_ADDRESS: u8 = 255;

/// The largest station address a device may own
pub const MAX_STATION_ADDRESS: u8 = 254;

/// Error type for all fallible operations of this crate
///
/// Every rejected operation leaves the prior state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// An analog write outside `[min, max]` of the point
    OutOfRange,
    /// A priority outside `1..=16`
    InvalidPriority,
    /// A priority 0 (direct) write to a point that is in service
    AccessDenied,
    /// No point with this instance number
    UnknownInstance,
    /// The transmitter, or the outgoing PDU slot, is occupied. Retry later.
    Busy,
    /// A baud rate outside of the set legal on the medium
    InvalidBaudRate,
    /// Received bytes were dropped because the receive ring was full
    Overflow,
    /// A frame or PDU larger than the buffer it must fit in
    FrameTooLarge,
    /// A send of zero bytes
    EmptyFrame,
    /// A configuration value outside its legal range
    InvalidConfig,
    /// The serial link has not been taken yet
    NotInitialized,
}

/// The hardware side of an RS-485 transceiver
///
/// Implemented by the board support code for the UART plus the driver enable
/// (DE/RE) pin. All methods are called with interrupts masked (from inside a
/// critical section), so they should be short and MUST NOT block, except
/// [`Transceiver::delay_us`] which is expected to busy wait.
pub trait Transceiver {
    /// Reprogram the UART divider for a new baud rate
    fn set_baud_rate(&mut self, baud: BaudRate);

    /// Drive the bus (`true`, DE asserted) or listen (`false`)
    fn set_driver_enable(&mut self, transmit: bool);

    /// Load one byte into the UART transmit holding register
    fn write_byte(&mut self, byte: u8);

    /// Enable or disable the "transmit holding register empty" interrupt
    fn enable_tx_interrupt(&mut self, enable: bool);

    /// Has the transmit shift register completely drained, including the stop
    /// bit of the last byte?
    fn is_tx_idle(&self) -> bool;

    /// Busy wait for `us` microseconds
    fn delay_us(&mut self, us: u32);
}
