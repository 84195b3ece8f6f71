//! MS/TP frame format
//!
//! Only the parts needed to put a queued PDU on the wire, and to let an
//! external state machine check a received header. Every frame looks like:
//!
//! ```text
//! 0x55 0xFF | type | dest | src | len_hi len_lo | hdr_crc | data... | crc_lo crc_hi
//! ```
//!
//! The data and its CRC-16 are only present when the length is not zero.

use crate::Error;

/// The two preamble bytes
pub const PREAMBLE: [u8; 2] = [0x55, 0xFF];

/// Preamble, type, addresses, length and header CRC
pub const HEADER_LEN: usize = 8;

/// The largest NPDU carried in one data frame
pub const MAX_PDU: usize = 501;

/// The largest encoded frame
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PDU + 2;

/// What [header_crc] returns when run over a header INCLUDING its CRC byte
pub const HEADER_CRC_RESIDUE: u8 = !0x55;

/// What [data_crc] returns when run over data INCLUDING its two CRC bytes
pub const DATA_CRC_RESIDUE: u16 = !0xF0B8;

/// MS/TP frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum FrameType {
    /// `0`
    Token,
    /// `1`
    PollForMaster,
    /// `2`
    ReplyToPollForMaster,
    /// `3`
    TestRequest,
    /// `4`
    TestResponse,
    /// `5`
    BacnetDataExpectingReply,
    /// `6`
    BacnetDataNotExpectingReply,
    /// `7`
    ReplyPostponed,
    /// `128..=255`, vendor specific
    ///
    /// Build it with [FrameType::proprietary] or `try_from`. A value below
    /// 128 put in by hand is sent with its top bit set.
    Proprietary(u8),
}

/// Frame type error
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub enum FrameTypeError {
    /// A type in the reserved range `8..=127`
    Reserved,
}

impl FrameType {
    const TOKEN: u8 = 0;
    const POLL_FOR_MASTER: u8 = 1;
    const REPLY_TO_POLL_FOR_MASTER: u8 = 2;
    const TEST_REQUEST: u8 = 3;
    const TEST_RESPONSE: u8 = 4;
    const DATA_EXPECTING_REPLY: u8 = 5;
    const DATA_NOT_EXPECTING_REPLY: u8 = 6;
    const REPLY_POSTPONED: u8 = 7;
    const PROPRIETARY_START: u8 = 128;

    /// The data frame type for a PDU
    pub fn for_data(expecting_reply: bool) -> Self {
        if expecting_reply {
            FrameType::BacnetDataExpectingReply
        } else {
            FrameType::BacnetDataNotExpectingReply
        }
    }

    /// A vendor specific frame type, `128..=255`
    pub fn proprietary(value: u8) -> Result<Self, FrameTypeError> {
        if value >= Self::PROPRIETARY_START {
            Ok(FrameType::Proprietary(value))
        } else {
            Err(FrameTypeError::Reserved)
        }
    }

    /// Does this frame carry an NPDU for the upper layers?
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            FrameType::BacnetDataExpectingReply | FrameType::BacnetDataNotExpectingReply
        )
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameTypeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            Self::TOKEN => Ok(FrameType::Token),
            Self::POLL_FOR_MASTER => Ok(FrameType::PollForMaster),
            Self::REPLY_TO_POLL_FOR_MASTER => Ok(FrameType::ReplyToPollForMaster),
            Self::TEST_REQUEST => Ok(FrameType::TestRequest),
            Self::TEST_RESPONSE => Ok(FrameType::TestResponse),
            Self::DATA_EXPECTING_REPLY => Ok(FrameType::BacnetDataExpectingReply),
            Self::DATA_NOT_EXPECTING_REPLY => Ok(FrameType::BacnetDataNotExpectingReply),
            Self::REPLY_POSTPONED => Ok(FrameType::ReplyPostponed),
            v if v >= Self::PROPRIETARY_START => Ok(FrameType::Proprietary(v)),
            _ => Err(FrameTypeError::Reserved),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(val: FrameType) -> Self {
        match val {
            FrameType::Token => FrameType::TOKEN,
            FrameType::PollForMaster => FrameType::POLL_FOR_MASTER,
            FrameType::ReplyToPollForMaster => FrameType::REPLY_TO_POLL_FOR_MASTER,
            FrameType::TestRequest => FrameType::TEST_REQUEST,
            FrameType::TestResponse => FrameType::TEST_RESPONSE,
            FrameType::BacnetDataExpectingReply => FrameType::DATA_EXPECTING_REPLY,
            FrameType::BacnetDataNotExpectingReply => FrameType::DATA_NOT_EXPECTING_REPLY,
            FrameType::ReplyPostponed => FrameType::REPLY_POSTPONED,
            // Never lands in the reserved range
            FrameType::Proprietary(v) => v | FrameType::PROPRIETARY_START,
        }
    }
}

/// Header CRC-8, polynomial `x^8 + x^7 + 1`
///
/// Run over the five bytes between the preamble and the CRC. The result is
/// already complemented, ready to be sent.
pub fn header_crc(bytes: &[u8]) -> u8 {
    let mut crc = 0xFFu8;
    for &byte in bytes {
        let mut t = u16::from(crc ^ byte);
        t = t ^ (t << 1) ^ (t << 2) ^ (t << 3) ^ (t << 4) ^ (t << 5) ^ (t << 6) ^ (t << 7);
        crc = ((t & 0xFE) ^ ((t >> 8) & 1)) as u8;
    }
    !crc
}

/// Data CRC-16, CCITT polynomial in reflected form
///
/// The result is already complemented, and is sent least significant byte
/// first.
pub fn data_crc(bytes: &[u8]) -> u16 {
    let mut crc = 0xFFFFu16;
    for &byte in bytes {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

/// Format one frame into `out`, returning the number of bytes used
pub fn encode(
    out: &mut [u8],
    frame_type: FrameType,
    destination: u8,
    source: u8,
    data: &[u8],
) -> Result<usize, Error> {
    if data.len() > MAX_PDU {
        return Err(Error::FrameTooLarge);
    }
    let total = if data.is_empty() {
        HEADER_LEN
    } else {
        HEADER_LEN + data.len() + 2
    };
    let out = out.get_mut(..total).ok_or(Error::FrameTooLarge)?;

    let len = (data.len() as u16).to_be_bytes();
    out[..2].copy_from_slice(&PREAMBLE);
    out[2] = frame_type.into();
    out[3] = destination;
    out[4] = source;
    out[5] = len[0];
    out[6] = len[1];
    out[7] = header_crc(&out[2..7]);

    if let Some((body, crc)) = out[HEADER_LEN..].split_last_chunk_mut::<2>() {
        body.copy_from_slice(data);
        *crc = data_crc(data).to_le_bytes();
    }
    Ok(total)
}

/// A decoded, CRC checked frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct FrameHeader {
    /// The raw frame type
    pub frame_type: u8,
    /// Destination station, 255 for broadcast
    pub destination: u8,
    /// Source station
    pub source: u8,
    /// Data length, not counting the data CRC
    pub length: u16,
}

impl FrameHeader {
    /// Decode the first [HEADER_LEN] bytes of `bytes`
    ///
    /// Returns `None` on a missing preamble, a short buffer, or a bad header
    /// CRC.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let hdr = bytes.get(..HEADER_LEN)?;
        if hdr[..2] != PREAMBLE {
            return None;
        }
        if header_crc(&hdr[2..8]) != HEADER_CRC_RESIDUE {
            return None;
        }
        Some(FrameHeader {
            frame_type: hdr[2],
            destination: hdr[3],
            source: hdr[4],
            length: u16::from_be_bytes([hdr[5], hdr[6]]),
        })
    }

    /// The frame type, if it is not a reserved one
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::try_from(self.frame_type).ok()
    }
}

/// A completely received frame, handed from the state machine to the
/// [Datalink](crate::Datalink)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame<'a> {
    /// The frame type
    pub frame_type: FrameType,
    /// Destination station
    pub destination: u8,
    /// Source station
    pub source: u8,
    /// The data, CRC already checked and stripped
    pub data: &'a [u8],
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_type_bytes() {
        for b in (0u8..=7).chain(128..=255) {
            let ft = FrameType::try_from(b).unwrap();
            assert_eq!(u8::from(ft), b);
        }
        for b in 8u8..=127 {
            assert_eq!(FrameType::try_from(b), Err(FrameTypeError::Reserved));
        }
        assert_eq!(
            FrameType::for_data(true),
            FrameType::BacnetDataExpectingReply
        );
        assert!(FrameType::for_data(false).is_data());
        assert!(!FrameType::TestRequest.is_data());
    }

    #[test]
    fn proprietary_range() {
        assert_eq!(FrameType::proprietary(200), Ok(FrameType::Proprietary(200)));
        assert_eq!(FrameType::proprietary(128), Ok(FrameType::Proprietary(128)));
        assert_eq!(FrameType::proprietary(127), Err(FrameTypeError::Reserved));
        assert_eq!(FrameType::proprietary(5), Err(FrameTypeError::Reserved));

        // A hand built out of range value is sent as a proprietary type
        assert_eq!(u8::from(FrameType::Proprietary(5)), 133);
    }

    #[test]
    fn crc_vectors() {
        // Token from 0x05 to 0x10
        assert_eq!(header_crc(&[0x00, 0x10, 0x05, 0x00, 0x00]), 0x8C);
        assert_eq!(data_crc(&[0x01, 0x22, 0x30]), 0xBD10);
    }

    #[test]
    fn crc_residues() {
        let hdr = [0x06, 0xFF, 0x03, 0x00, 0x02];
        let crc = header_crc(&hdr);
        assert_eq!(header_crc(&[0x06, 0xFF, 0x03, 0x00, 0x02, crc]), HEADER_CRC_RESIDUE);

        let data = [0x01, 0x22, 0x30];
        let [lo, hi] = data_crc(&data).to_le_bytes();
        assert_eq!(data_crc(&[0x01, 0x22, 0x30, lo, hi]), DATA_CRC_RESIDUE);
    }

    #[test]
    fn encode_token() {
        let mut out = [0u8; 16];
        let used = encode(&mut out, FrameType::Token, 0x10, 0x05, &[]).unwrap();
        assert_eq!(used, HEADER_LEN);
        assert_eq!(&out[..used], &[0x55, 0xFF, 0x00, 0x10, 0x05, 0x00, 0x00, 0x8C]);
    }

    #[test]
    fn encode_data_frame() {
        let mut out = [0u8; 32];
        let pdu = [0x01, 0x22, 0x30];
        let used = encode(
            &mut out,
            FrameType::BacnetDataNotExpectingReply,
            255,
            7,
            &pdu,
        )
        .unwrap();
        assert_eq!(used, HEADER_LEN + 3 + 2);
        assert_eq!(&out[8..11], &pdu);
        assert_eq!(&out[11..13], &[0x10, 0xBD]);

        let hdr = FrameHeader::decode(&out[..used]).unwrap();
        assert_eq!(
            hdr,
            FrameHeader {
                frame_type: 6,
                destination: 255,
                source: 7,
                length: 3,
            }
        );
        assert_eq!(hdr.kind(), Some(FrameType::BacnetDataNotExpectingReply));
    }

    #[test]
    fn encode_limits() {
        let mut small = [0u8; 10];
        assert_eq!(
            encode(&mut small, FrameType::TestRequest, 1, 2, &[1, 2, 3]),
            Err(Error::FrameTooLarge)
        );
        let mut big = [0u8; MAX_FRAME + 8];
        let pdu = [0xAA; MAX_PDU + 1];
        assert_eq!(
            encode(&mut big, FrameType::TestRequest, 1, 2, &pdu),
            Err(Error::FrameTooLarge)
        );
        assert_eq!(
            encode(&mut big, FrameType::TestRequest, 1, 2, &pdu[..MAX_PDU]),
            Ok(MAX_FRAME)
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        let mut out = [0u8; 8];
        encode(&mut out, FrameType::PollForMaster, 3, 4, &[]).unwrap();
        assert!(FrameHeader::decode(&out).is_some());
        assert!(FrameHeader::decode(&out[..7]).is_none());

        let mut bad_crc = out;
        bad_crc[7] ^= 0x01;
        assert!(FrameHeader::decode(&bad_crc).is_none());

        let mut bad_preamble = out;
        bad_preamble[0] = 0x54;
        assert!(FrameHeader::decode(&bad_preamble).is_none());
    }
}
