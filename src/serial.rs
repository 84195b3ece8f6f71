//! Half-duplex RS-485 byte transport
//!
//! A [SerialLink] is intended to be used as a static. It is split once, with
//! [SerialLink::take], into two halves:
//!
//! * An [IsrPort], owned by the UART interrupt handler. It feeds received
//!   bytes into the receive ring, and shifts out the transmit buffer.
//! * A [LinkPort], owned by the polling loop. It drains the receive ring and
//!   starts transmissions.
//!
//! ```rust,ignore
//! static LINK: SerialLink<Uart1> = SerialLink::new();
//!
//! let (isr, port) = LINK.take(uart, &LinkConfig::DEFAULT).unwrap();
//! ```
//!
//! The receive ring only uses atomic loads and stores. The transmit state is
//! shared through a critical section mutex, as both halves need to touch the
//! hardware.

use core::{
    cell::RefCell,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex},
    signal::Signal,
};
use embassy_time::Duration;
use heapless::Vec;

use crate::{
    clock::Tick,
    config::{BaudRate, LinkConfig},
    ring::{RxRing, TimestampedByte},
    Error, Transceiver,
};

/// Byte counters of a [SerialLink]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct LinkStats {
    /// Bytes received, including dropped ones
    pub rx_bytes: u32,
    /// Bytes handed to [LinkPort::send]
    pub tx_bytes: u32,
    /// Bytes dropped because the receive ring was full
    pub rx_overflows: u32,
    /// Framing, parity or overrun errors reported by the UART
    pub rx_errors: u32,
}

struct TxState<T, const TX: usize> {
    hw: Option<T>,
    buf: Vec<u8, TX>,
    pos: usize,
    baud: BaudRate,
    setup_us: u32,
    guard_us: u32,
}

impl<T, const TX: usize> TxState<T, TX> {
    const fn new() -> Self {
        Self {
            hw: None,
            buf: Vec::new(),
            pos: 0,
            baud: BaudRate::B19200,
            setup_us: 0,
            guard_us: 0,
        }
    }
}

/// Storage and state of one RS-485 port
///
/// `RX` is the size of the receive ring, and must be a power of two. `TX` is
/// the largest frame that can be sent.
pub struct SerialLink<T, const RX: usize = 512, const TX: usize = 512> {
    once: AtomicBool,
    rx: RxRing<RX>,
    tx: Mutex<CriticalSectionRawMutex, RefCell<TxState<T, TX>>>,
    transmitting: AtomicBool,
    rx_bytes: AtomicU32,
    tx_bytes: AtomicU32,
    rx_errors: AtomicU32,
    rx_error_flag: AtomicBool,
    last_activity: AtomicU32,
    tx_done: Signal<CriticalSectionRawMutex, ()>,
}

impl<T: Transceiver, const RX: usize, const TX: usize> SerialLink<T, RX, TX> {
    /// Create a new, untaken, link
    pub const fn new() -> Self {
        Self {
            once: AtomicBool::new(false),
            rx: RxRing::new(),
            tx: Mutex::new(RefCell::new(TxState::new())),
            transmitting: AtomicBool::new(false),
            rx_bytes: AtomicU32::new(0),
            tx_bytes: AtomicU32::new(0),
            rx_errors: AtomicU32::new(0),
            rx_error_flag: AtomicBool::new(false),
            last_activity: AtomicU32::new(0),
            tx_done: Signal::new(),
        }
    }

    /// Hand over the hardware and split the link into its two halves
    ///
    /// The first call will return Some, all later calls will return None.
    /// Uses a [critical section][critical_section::with] to ensure it only
    /// works once, even on targets without atomics.
    ///
    /// The transceiver is programmed with the configured baud rate and left
    /// listening, with the transmit interrupt disabled.
    pub fn take(
        &self,
        hw: T,
        cfg: &LinkConfig,
    ) -> Option<(IsrPort<'_, T, RX, TX>, LinkPort<'_, T, RX, TX>)> {
        let first = critical_section::with(|_| {
            let old = self.once.load(Ordering::Acquire);
            self.once.store(true, Ordering::Release);
            !old
        });
        if !first {
            return None;
        }

        self.tx.lock(|cell| {
            let mut st = cell.borrow_mut();
            let mut hw = hw;
            hw.set_baud_rate(cfg.baud());
            hw.set_driver_enable(false);
            hw.enable_tx_interrupt(false);
            st.hw = Some(hw);
            st.baud = cfg.baud();
            st.setup_us = micros(cfg.driver_setup());
            st.guard_us = micros(cfg.turnaround_guard());
        });
        io_info!("serial link up at {=u32} baud", cfg.baud().bps());

        Some((
            IsrPort { link: self },
            LinkPort {
                link: self,
                seen_overflows: 0,
            },
        ))
    }
}

impl<T: Transceiver, const RX: usize, const TX: usize> Default for SerialLink<T, RX, TX> {
    fn default() -> Self {
        Self::new()
    }
}

fn micros(d: Duration) -> u32 {
    u32::try_from(d.as_micros()).unwrap_or(u32::MAX)
}

// Counters are only ever written from one side, so load/store is enough.
fn bump(ctr: &AtomicU32, by: u32) {
    let old = ctr.load(Ordering::Relaxed);
    ctr.store(old.wrapping_add(by), Ordering::Relaxed);
}

/// The interrupt handler's half of a [SerialLink]
pub struct IsrPort<'a, T, const RX: usize, const TX: usize> {
    link: &'a SerialLink<T, RX, TX>,
}

impl<'a, T: Transceiver, const RX: usize, const TX: usize> IsrPort<'a, T, RX, TX> {
    /// Store one received byte, stamped with `now`
    ///
    /// If the ring is full, the byte is dropped and counted as an overflow.
    #[inline]
    pub fn on_rx_byte(&mut self, byte: u8, now: Tick) {
        // SAFETY: the IsrPort is the only producer, and there is only one
        // IsrPort per link.
        unsafe {
            self.link.rx.push(byte, now);
        }
        bump(&self.link.rx_bytes, 1);
        self.link.last_activity.store(now.0, Ordering::Release);
    }

    /// Record a framing, parity or overrun error
    pub fn on_rx_error(&mut self) {
        bump(&self.link.rx_errors, 1);
        self.link.rx_error_flag.store(true, Ordering::Release);
    }

    /// Handle a "transmit holding register empty" interrupt
    ///
    /// Loads the next byte, or, once the buffer is exhausted, waits for the
    /// shift register to drain, holds the driver for the guard time and
    /// releases the bus.
    pub fn on_tx_interrupt(&mut self, now: Tick) {
        let link = self.link;
        let finished = link.tx.lock(|cell| {
            let mut st = cell.borrow_mut();
            let TxState {
                hw, buf, pos, guard_us, ..
            } = &mut *st;
            let Some(hw) = hw.as_mut() else {
                return false;
            };
            if !link.transmitting.load(Ordering::Acquire) {
                // Spurious, or the transmission was aborted
                hw.enable_tx_interrupt(false);
                return false;
            }

            if let Some(byte) = buf.get(*pos) {
                hw.write_byte(*byte);
                *pos += 1;
                return false;
            }

            hw.enable_tx_interrupt(false);
            // At most one character time: the last byte is in the shift
            // register.
            while !hw.is_tx_idle() {
                core::hint::spin_loop();
            }
            hw.delay_us(*guard_us);
            hw.set_driver_enable(false);
            buf.clear();
            *pos = 0;
            link.transmitting.store(false, Ordering::Release);
            true
        });

        if finished {
            link.last_activity.store(now.0, Ordering::Release);
            link.tx_done.signal(());
        }
    }
}

/// The polling loop's half of a [SerialLink]
pub struct LinkPort<'a, T, const RX: usize, const TX: usize> {
    link: &'a SerialLink<T, RX, TX>,
    seen_overflows: u32,
}

impl<'a, T: Transceiver, const RX: usize, const TX: usize> LinkPort<'a, T, RX, TX> {
    /// Take the oldest received byte
    #[inline]
    pub fn recv(&mut self) -> Option<TimestampedByte> {
        // SAFETY: the LinkPort is the only consumer, and there is only one
        // LinkPort per link.
        unsafe { self.link.rx.pop() }
    }

    /// Is at least one received byte waiting?
    pub fn data_available(&self) -> bool {
        !self.link.rx.is_empty()
    }

    /// Number of received bytes waiting
    pub fn rx_pending(&self) -> usize {
        self.link.rx.len()
    }

    /// Size of the receive ring
    pub fn rx_capacity(&self) -> usize {
        self.link.rx.capacity()
    }

    /// Discard all received bytes, returning how many were dropped
    pub fn discard_rx(&mut self) -> usize {
        // SAFETY: see `recv`
        unsafe { self.link.rx.drain() }
    }

    /// Is the transmitter free for a new frame?
    pub fn is_tx_ready(&self) -> bool {
        !self.link.transmitting.load(Ordering::Acquire)
    }

    /// Start sending `bytes`
    ///
    /// The bytes are copied, so `bytes` may be reused as soon as this returns.
    /// Returns [Error::Busy] while a previous frame is still going out.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.is_empty() {
            return Err(Error::EmptyFrame);
        }
        if bytes.len() > TX {
            return Err(Error::FrameTooLarge);
        }

        let link = self.link;
        link.tx.lock(|cell| {
            let mut st = cell.borrow_mut();
            if link.transmitting.load(Ordering::Acquire) {
                return Err(Error::Busy);
            }
            let TxState {
                hw,
                buf,
                pos,
                setup_us,
                ..
            } = &mut *st;
            let hw = hw.as_mut().ok_or(Error::NotInitialized)?;

            buf.clear();
            buf.extend_from_slice(bytes)
                .map_err(|_| Error::FrameTooLarge)?;
            *pos = 1;
            link.transmitting.store(true, Ordering::Release);
            link.tx_done.reset();

            hw.set_driver_enable(true);
            hw.delay_us(*setup_us);
            hw.write_byte(bytes[0]);
            hw.enable_tx_interrupt(true);
            Ok(())
        })?;

        bump(&link.tx_bytes, bytes.len() as u32);
        Ok(())
    }

    /// Wait until the frame in flight, if any, has completely left the wire
    pub async fn flush(&self) {
        if self.is_tx_ready() {
            return;
        }
        self.link.tx_done.wait().await;
    }

    /// Force the transmitter back to idle
    ///
    /// For use by a supervisor that found `transmitting` stuck, e.g. because
    /// the UART stopped raising interrupts. The rest of the frame is lost.
    pub fn abort_transmission(&mut self) {
        let link = self.link;
        let was = link.tx.lock(|cell| {
            let mut st = cell.borrow_mut();
            let was = link.transmitting.load(Ordering::Acquire);
            if let Some(hw) = st.hw.as_mut() {
                hw.enable_tx_interrupt(false);
                hw.set_driver_enable(false);
            }
            st.buf.clear();
            st.pos = 0;
            link.transmitting.store(false, Ordering::Release);
            was
        });
        if was {
            io_warn!("transmission aborted");
            link.tx_done.signal(());
        }
    }

    /// Change the baud rate
    ///
    /// Only the rates of [BaudRate] are accepted. Fails with [Error::Busy]
    /// while a frame is going out.
    pub fn set_baud_rate(&mut self, bps: u32) -> Result<BaudRate, Error> {
        let baud = BaudRate::try_from(bps)?;
        let link = self.link;
        link.tx.lock(|cell| {
            let mut st = cell.borrow_mut();
            if link.transmitting.load(Ordering::Acquire) {
                return Err(Error::Busy);
            }
            st.hw
                .as_mut()
                .ok_or(Error::NotInitialized)?
                .set_baud_rate(baud);
            st.baud = baud;
            Ok(baud)
        })
    }

    /// The current baud rate
    pub fn baud_rate(&self) -> BaudRate {
        self.link.tx.lock(|cell| cell.borrow().baud)
    }

    /// A snapshot of the counters
    pub fn statistics(&self) -> LinkStats {
        LinkStats {
            rx_bytes: self.link.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.link.tx_bytes.load(Ordering::Relaxed),
            rx_overflows: self.link.rx.overflows(),
            rx_errors: self.link.rx_errors.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters
    ///
    /// The receive side counters are owned by the interrupt, a byte arriving
    /// during the clear may still be counted.
    pub fn clear_statistics(&mut self) {
        self.link.rx_bytes.store(0, Ordering::Relaxed);
        self.link.tx_bytes.store(0, Ordering::Relaxed);
        self.link.rx_errors.store(0, Ordering::Relaxed);
        self.link.rx.clear_overflows();
        self.seen_overflows = 0;
    }

    /// Was a receive error reported since the last call?
    pub fn take_rx_error(&mut self) -> bool {
        let flag = self.link.rx_error_flag.load(Ordering::Acquire);
        if flag {
            self.link.rx_error_flag.store(false, Ordering::Release);
        }
        flag
    }

    /// Returns [Error::Overflow] once for every batch of bytes dropped since
    /// the last call
    pub fn check_overflow(&mut self) -> Result<(), Error> {
        let now = self.link.rx.overflows();
        if now == self.seen_overflows {
            return Ok(());
        }
        self.seen_overflows = now;
        Err(Error::Overflow)
    }

    /// Milliseconds since the last byte was received or the last frame
    /// finished sending
    pub fn silence_elapsed(&self, now: Tick) -> u32 {
        now.millis_since(Tick(self.link.last_activity.load(Ordering::Acquire)))
    }

    /// Restart the silence timer at `now`
    pub fn reset_silence(&mut self, now: Tick) {
        self.link.last_activity.store(now.0, Ordering::Release);
    }
}
