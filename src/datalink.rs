//! Glue between the serial port and an MS/TP state machine
//!
//! The token passing state machine is not part of this crate. Whatever
//! implements it talks to the [Datalink] only through the [FrameGlue] trait,
//! and is driven from the polling loop with [Datalink::task].
//!
//! Outgoing NPDUs are queued with [Datalink::send_pdu]. There is room for
//! exactly one: the next one can only be queued once the state machine has
//! pulled the previous one with [FrameGlue::pull_to_send].

use heapless::Vec;

use crate::{
    clock::Tick,
    config::{BaudRate, LinkConfig},
    frame::{self, FrameType, ReceivedFrame, MAX_PDU},
    serial::LinkPort,
    Error, Transceiver, BROADCAST_ADDRESS,
};

/// Receiver of NPDUs from data frames addressed to this station
pub trait NpduHandler {
    /// Handle one NPDU sent by station `source`
    fn handle_npdu(&mut self, source: u8, npdu: &[u8]);
}

impl<F> NpduHandler for F
where
    F: FnMut(u8, &[u8]),
{
    fn handle_npdu(&mut self, source: u8, npdu: &[u8]) {
        (self)(source, npdu)
    }
}

/// The services an MS/TP state machine needs from the layers around it
pub trait FrameGlue {
    /// Format the queued PDU, if any, as a frame into `out`
    ///
    /// Returns the number of bytes to send, 0 if there is nothing to send.
    /// `timeout_ms` is how long the caller is willing to wait for a PDU, and
    /// may be ignored.
    fn pull_to_send(&mut self, out: &mut [u8], timeout_ms: u32) -> usize;

    /// Take one received byte
    fn pull_received_byte(&mut self) -> Option<u8>;

    /// Hand over a completely received, CRC checked, frame
    ///
    /// Returns the number of data bytes consumed, 0 if the frame was not for
    /// this station or carried nothing for the upper layers.
    fn frame_complete(&mut self, frame: &ReceivedFrame<'_>) -> usize;

    /// Put a formatted frame on the wire
    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;

    /// Milliseconds since the bus was last active
    fn silence_elapsed(&self, now: Tick) -> u32;

    /// Restart the silence timer
    fn reset_silence(&mut self, now: Tick);
}

/// An MS/TP state machine, driven by [Datalink::task]
pub trait MstpFsm {
    /// Run the receive state machine once
    fn receive_frame<G: FrameGlue>(&mut self, glue: &mut G, now: Tick);

    /// Run the master node state machine once, returning `true` if it should
    /// be run again right away
    fn master_node<G: FrameGlue>(&mut self, glue: &mut G, now: Tick) -> bool;
}

struct OutgoingPdu {
    destination: u8,
    frame_type: FrameType,
    pdu: Vec<u8, MAX_PDU>,
}

/// The data link layer of one MS/TP port
pub struct Datalink<'a, T, H, const RX: usize = 512, const TX: usize = 512> {
    port: LinkPort<'a, T, RX, TX>,
    handler: H,
    config: LinkConfig,
    outgoing: Option<OutgoingPdu>,
    valid_frames: u32,
}

impl<'a, T, H, const RX: usize, const TX: usize> Datalink<'a, T, H, RX, TX>
where
    T: Transceiver,
    H: NpduHandler,
{
    /// Create a datalink on top of a taken [LinkPort]
    ///
    /// `config` should be the one the port was taken with.
    pub fn new(port: LinkPort<'a, T, RX, TX>, config: LinkConfig, handler: H) -> Self {
        Self {
            port,
            handler,
            config,
            outgoing: None,
            valid_frames: 0,
        }
    }

    /// Queue an NPDU for `destination` (255 to broadcast)
    ///
    /// Returns the number of bytes queued, or [Error::Busy] if the previous
    /// NPDU has not been picked up yet.
    pub fn send_pdu(
        &mut self,
        destination: u8,
        expecting_reply: bool,
        pdu: &[u8],
    ) -> Result<usize, Error> {
        if pdu.is_empty() {
            return Err(Error::EmptyFrame);
        }
        if pdu.len() > MAX_PDU {
            return Err(Error::FrameTooLarge);
        }
        if self.outgoing.is_some() {
            return Err(Error::Busy);
        }
        let mut data = Vec::new();
        data.extend_from_slice(pdu)
            .map_err(|_| Error::FrameTooLarge)?;
        self.outgoing = Some(OutgoingPdu {
            destination,
            frame_type: FrameType::for_data(expecting_reply),
            pdu: data,
        });
        Ok(pdu.len())
    }

    /// Is an NPDU waiting to be sent?
    pub fn pdu_pending(&self) -> bool {
        self.outgoing.is_some()
    }

    /// This station's address
    pub fn my_address(&self) -> u8 {
        self.config.station()
    }

    /// The MS/TP broadcast address
    pub fn broadcast_address(&self) -> u8 {
        BROADCAST_ADDRESS
    }

    /// The active configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Change this station's address
    pub fn set_station(&mut self, station: u8) -> Result<(), Error> {
        self.config.set_station(station)
    }

    /// Change the highest polled master address
    pub fn set_max_master(&mut self, max_master: u8) -> Result<(), Error> {
        self.config.set_max_master(max_master)
    }

    /// Change the number of frames sent per token
    pub fn set_max_info_frames(&mut self, frames: u8) -> Result<(), Error> {
        self.config.set_max_info_frames(frames)
    }

    /// Change the baud rate of the port
    pub fn set_baud_rate(&mut self, bps: u32) -> Result<BaudRate, Error> {
        let baud = self.port.set_baud_rate(bps)?;
        self.config.set_baud(baud);
        Ok(baud)
    }

    /// Frames received that were addressed to this station, or broadcast
    pub fn valid_frame_count(&self) -> u32 {
        self.valid_frames
    }

    /// The underlying port
    pub fn port(&self) -> &LinkPort<'a, T, RX, TX> {
        &self.port
    }

    /// The underlying port
    pub fn port_mut(&mut self) -> &mut LinkPort<'a, T, RX, TX> {
        &mut self.port
    }

    /// Run the state machine: the receive side once, then, if this station
    /// is a master, the master side until it runs out of work
    pub fn task<F: MstpFsm>(&mut self, fsm: &mut F, now: Tick) {
        if self.port.check_overflow().is_err() {
            io_warn!("receive ring overflowed");
        }
        if self.port.take_rx_error() {
            io_debug!("receive line error");
        }

        fsm.receive_frame(self, now);
        if self.config.is_master() {
            while fsm.master_node(self, now) {}
        }
    }
}

impl<'a, T, H, const RX: usize, const TX: usize> FrameGlue for Datalink<'a, T, H, RX, TX>
where
    T: Transceiver,
    H: NpduHandler,
{
    fn pull_to_send(&mut self, out: &mut [u8], _timeout_ms: u32) -> usize {
        let Some(pdu) = self.outgoing.take() else {
            return 0;
        };
        let res = frame::encode(
            out,
            pdu.frame_type,
            pdu.destination,
            self.config.station(),
            &pdu.pdu,
        );
        match res {
            Ok(used) => used,
            Err(_e) => {
                io_error!("outgoing PDU does not fit the frame buffer, dropped");
                0
            }
        }
    }

    fn pull_received_byte(&mut self) -> Option<u8> {
        self.port.recv().map(|b| b.byte)
    }

    fn frame_complete(&mut self, frame: &ReceivedFrame<'_>) -> usize {
        let for_us = frame.destination == self.config.station()
            || frame.destination == BROADCAST_ADDRESS;
        if !for_us {
            return 0;
        }
        self.valid_frames = self.valid_frames.wrapping_add(1);

        match frame.frame_type {
            FrameType::BacnetDataExpectingReply | FrameType::BacnetDataNotExpectingReply
                if !frame.data.is_empty() =>
            {
                self.handler.handle_npdu(frame.source, frame.data);
                frame.data.len()
            }
            // The reply is up to the state machine
            FrameType::TestRequest => frame.data.len(),
            _ => 0,
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if !self.port.is_tx_ready() {
            return Err(Error::Busy);
        }
        self.port.send(bytes)
    }

    fn silence_elapsed(&self, now: Tick) -> u32 {
        self.port.silence_elapsed(now)
    }

    fn reset_silence(&mut self, now: Tick) {
        self.port.reset_silence(now)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        frame::{FrameHeader, HEADER_LEN, MAX_FRAME},
        serial::test::FakeUart,
        SerialLink,
    };
    use std::vec::Vec;

    fn cfg(station: u8) -> LinkConfig {
        LinkConfig::new(station).unwrap()
    }

    /// Just enough of a state machine to move whole frames: collects bytes
    /// until a frame is complete, and sends whatever is queued.
    #[derive(Default)]
    struct LoopbackFsm {
        rx: Vec<u8>,
        receive_runs: usize,
        master_runs: usize,
    }

    impl MstpFsm for LoopbackFsm {
        fn receive_frame<G: FrameGlue>(&mut self, glue: &mut G, now: Tick) {
            self.receive_runs += 1;
            while let Some(b) = glue.pull_received_byte() {
                self.rx.push(b);
            }
            let Some(hdr) = FrameHeader::decode(&self.rx) else {
                return;
            };
            let len = hdr.length as usize;
            let data_end = HEADER_LEN + len;
            if len > 0 && self.rx.len() < data_end + 2 {
                return;
            }
            let frame = ReceivedFrame {
                frame_type: hdr.kind().unwrap(),
                destination: hdr.destination,
                source: hdr.source,
                data: &self.rx[HEADER_LEN..data_end],
            };
            glue.frame_complete(&frame);
            glue.reset_silence(now);
            self.rx.clear();
        }

        fn master_node<G: FrameGlue>(&mut self, glue: &mut G, _now: Tick) -> bool {
            self.master_runs += 1;
            let mut out = [0u8; MAX_FRAME];
            let used = glue.pull_to_send(&mut out, 0);
            if used > 0 {
                glue.push_bytes(&out[..used]).unwrap();
            }
            // Go around once more after sending
            used > 0
        }
    }

    #[test]
    fn send_pdu_slot() {
        let link: SerialLink<FakeUart, 16, 512> = SerialLink::new();
        let (_isr, port) = link.take(FakeUart::default(), &cfg(3)).unwrap();
        let mut dl = Datalink::new(port, cfg(3), |_: u8, _: &[u8]| {});

        assert_eq!(dl.send_pdu(255, false, &[]), Err(Error::EmptyFrame));
        assert_eq!(
            dl.send_pdu(255, false, &[0; MAX_PDU + 1]),
            Err(Error::FrameTooLarge)
        );
        assert_eq!(dl.send_pdu(255, false, &[1, 0x22, 0x30]), Ok(3));
        assert!(dl.pdu_pending());
        assert_eq!(dl.send_pdu(4, true, &[1]), Err(Error::Busy));

        let mut out = [0u8; MAX_FRAME];
        let used = dl.pull_to_send(&mut out, 10);
        assert_eq!(
            &out[..used],
            &[0x55, 0xFF, 0x06, 0xFF, 0x03, 0x00, 0x03, out[7], 0x01, 0x22, 0x30, 0x10, 0xBD]
        );
        assert!(FrameHeader::decode(&out[..used]).is_some());
        assert!(!dl.pdu_pending());
        assert_eq!(dl.pull_to_send(&mut out, 10), 0);

        // The slot is free again
        assert_eq!(dl.send_pdu(4, true, &[1]), Ok(1));
        let used = dl.pull_to_send(&mut out, 10);
        assert_eq!(out[2], 0x05);
        assert_eq!(used, HEADER_LEN + 1 + 2);
    }

    #[test]
    fn pdu_dropped_when_buffer_too_small() {
        let link: SerialLink<FakeUart, 16, 512> = SerialLink::new();
        let (_isr, port) = link.take(FakeUart::default(), &cfg(3)).unwrap();
        let mut dl = Datalink::new(port, cfg(3), |_: u8, _: &[u8]| {});

        dl.send_pdu(9, false, &[1, 2, 3, 4]).unwrap();
        let mut small = [0u8; 8];
        assert_eq!(dl.pull_to_send(&mut small, 0), 0);
        assert!(!dl.pdu_pending());
    }

    fn from_nine(frame_type: FrameType, destination: u8, data: &[u8]) -> ReceivedFrame<'_> {
        ReceivedFrame {
            frame_type,
            destination,
            source: 9,
            data,
        }
    }

    #[test]
    fn frame_complete_rules() {
        let mut got: Vec<(u8, Vec<u8>)> = Vec::new();
        let link: SerialLink<FakeUart, 16, 512> = SerialLink::new();
        let (_isr, port) = link.take(FakeUart::default(), &cfg(3)).unwrap();
        let mut dl = Datalink::new(port, cfg(3), |src: u8, npdu: &[u8]| {
            got.push((src, npdu.to_vec()))
        });

        // For us
        let n = dl.frame_complete(&from_nine(FrameType::BacnetDataExpectingReply, 3, &[1, 2]));
        assert_eq!(n, 2);
        // Broadcast
        let n = dl.frame_complete(&from_nine(FrameType::BacnetDataNotExpectingReply, 255, &[7]));
        assert_eq!(n, 1);
        // Someone else's
        let n = dl.frame_complete(&from_nine(FrameType::BacnetDataNotExpectingReply, 4, &[8]));
        assert_eq!(n, 0);
        // Empty data frame
        let n = dl.frame_complete(&from_nine(FrameType::BacnetDataNotExpectingReply, 3, &[]));
        assert_eq!(n, 0);
        // Test request, not dispatched
        let n = dl.frame_complete(&from_nine(FrameType::TestRequest, 3, &[5, 5, 5]));
        assert_eq!(n, 3);
        // Token
        let n = dl.frame_complete(&from_nine(FrameType::Token, 3, &[]));
        assert_eq!(n, 0);

        assert_eq!(dl.valid_frame_count(), 5);
        drop(dl);
        assert_eq!(got, [(9u8, vec![1u8, 2]), (9u8, vec![7u8])]);
    }

    #[test]
    fn push_bytes_backpressure() {
        let link: SerialLink<FakeUart, 16, 512> = SerialLink::new();
        let uart = FakeUart::default();
        let (mut isr, port) = link.take(uart.clone(), &cfg(3)).unwrap();
        let mut dl = Datalink::new(port, cfg(3), |_: u8, _: &[u8]| {});

        dl.push_bytes(&[1, 2]).unwrap();
        assert_eq!(dl.push_bytes(&[3]), Err(Error::Busy));
        isr.on_tx_interrupt(Tick(0));
        isr.on_tx_interrupt(Tick(0));
        dl.push_bytes(&[3]).unwrap();
        assert_eq!(uart.sent(), [1u8, 2, 3]);
    }

    #[test]
    fn addresses_and_config() {
        let link: SerialLink<FakeUart, 16, 512> = SerialLink::new();
        let (_isr, port) = link.take(FakeUart::default(), &cfg(3)).unwrap();
        let mut dl = Datalink::new(port, cfg(3), |_: u8, _: &[u8]| {});

        assert_eq!(dl.my_address(), 3);
        assert_eq!(dl.broadcast_address(), 255);
        assert_eq!(dl.set_station(255), Err(Error::InvalidConfig));
        dl.set_station(17).unwrap();
        assert_eq!(dl.my_address(), 17);
        assert_eq!(dl.set_max_master(200), Err(Error::InvalidConfig));
        assert_eq!(dl.set_max_info_frames(0), Err(Error::InvalidConfig));
        assert_eq!(dl.set_baud_rate(1200), Err(Error::InvalidBaudRate));
        assert_eq!(dl.set_baud_rate(115200), Ok(BaudRate::B115200));
        assert_eq!(dl.config().baud(), BaudRate::B115200);
        assert_eq!(dl.port().baud_rate(), BaudRate::B115200);
    }

    #[test]
    fn task_moves_frames_both_ways() {
        let mut got: Vec<(u8, Vec<u8>)> = Vec::new();
        let link: SerialLink<FakeUart, 64, 512> = SerialLink::new();
        let uart = FakeUart::default();
        let (mut isr, port) = link.take(uart.clone(), &cfg(3)).unwrap();
        let mut fsm = LoopbackFsm::default();

        // Station 9 sends us a data frame
        let mut wire = [0u8; MAX_FRAME];
        let used = frame::encode(
            &mut wire,
            FrameType::BacnetDataExpectingReply,
            3,
            9,
            &[0x01, 0x04, 0xAB],
        )
        .unwrap();
        for (i, b) in wire[..used].iter().enumerate() {
            isr.on_rx_byte(*b, Tick(i as u32));
        }

        {
            let mut dl = Datalink::new(port, cfg(3), |src: u8, npdu: &[u8]| {
                got.push((src, npdu.to_vec()))
            });
            dl.send_pdu(9, false, &[0x01, 0x00]).unwrap();
            dl.task(&mut fsm, Tick(50));

            assert_eq!(dl.valid_frame_count(), 1);
            assert!(!dl.pdu_pending());
            assert_eq!(dl.silence_elapsed(Tick(60)), 10);
        }
        assert_eq!(got, [(9u8, vec![0x01u8, 0x04, 0xAB])]);
        assert_eq!(fsm.receive_runs, 1);
        // One run that sent, one that found nothing
        assert_eq!(fsm.master_runs, 2);

        // Shift the reply out
        for _ in 0..16 {
            isr.on_tx_interrupt(Tick(70));
        }
        let sent = uart.sent();
        let hdr = FrameHeader::decode(&sent).unwrap();
        assert_eq!(hdr.destination, 9);
        assert_eq!(hdr.source, 3);
        assert_eq!(hdr.kind(), Some(FrameType::BacnetDataNotExpectingReply));
        assert_eq!(&sent[HEADER_LEN..HEADER_LEN + 2], &[0x01, 0x00]);
    }

    #[test]
    fn slave_skips_master_node() {
        let link: SerialLink<FakeUart, 16, 512> = SerialLink::new();
        let (_isr, port) = link.take(FakeUart::default(), &cfg(100)).unwrap();
        let mut config = cfg(100);
        config.set_max_master(50).unwrap();
        let mut dl = Datalink::new(port, config, |_: u8, _: &[u8]| {});
        let mut fsm = LoopbackFsm::default();

        dl.task(&mut fsm, Tick(0));
        assert_eq!(fsm.receive_runs, 1);
        assert_eq!(fsm.master_runs, 0);
    }
}
