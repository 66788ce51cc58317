//! Wire framing for the simulated link.
//!
//! Frames are laid out as `STX | len | seq | sysid | compid | msgid |
//! payload | crc_lo | crc_hi` with an X.25 CRC-16 accumulated over every
//! byte after the STX marker. The decoder is a byte-at-a-time state
//! machine: garbage, truncated frames, and checksum failures are dropped
//! silently and decoding re-arms on the next byte.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const FRAME_STX: u8 = 0xFE;
pub const MAX_PAYLOAD_LEN: usize = 128;
/// STX + len + seq + sysid + compid + msgid + 2 CRC bytes.
pub const FRAME_OVERHEAD: usize = 8;
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD_LEN + FRAME_OVERHEAD;

pub const CRC_INIT: u16 = 0xFFFF;

// The length field is a single byte on the wire.
const_assert!(MAX_PAYLOAD_LEN <= u8::MAX as usize);

pub type PayloadBuf = Vec<u8, MAX_PAYLOAD_LEN>;
pub type FrameBuf = Vec<u8, MAX_FRAME_LEN>;

/// One complete, checksum-validated unit of the binary protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub seq: u8,
    pub system_id: u8,
    pub component_id: u8,
    pub message_id: u8,
    pub payload: PayloadBuf,
}

impl Frame {
    /// Serialize the frame into its on-the-wire byte form.
    pub fn encode(&self) -> FrameBuf {
        let mut out = FrameBuf::new();
        let _ = out.push(FRAME_STX);
        let _ = out.push(self.payload.len() as u8);
        let _ = out.push(self.seq);
        let _ = out.push(self.system_id);
        let _ = out.push(self.component_id);
        let _ = out.push(self.message_id);
        let _ = out.extend_from_slice(&self.payload);

        let crc = crc_x25(&out[1..]);
        let _ = out.extend_from_slice(&crc.to_le_bytes());
        out
    }
}

fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc & 0x00ff) as u8;
    tmp ^= tmp << 4;
    (crc >> 8) ^ (u16::from(tmp) << 8) ^ (u16::from(tmp) << 3) ^ (u16::from(tmp) >> 4)
}

/// X.25 CRC-16 over `bytes`, seeded with [`CRC_INIT`].
pub fn crc_x25(bytes: &[u8]) -> u16 {
    bytes.iter().fold(CRC_INIT, |crc, &b| crc_accumulate(b, crc))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    Len,
    Seq,
    SystemId,
    ComponentId,
    MessageId,
    Payload,
    CrcLow,
    CrcHigh,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecoderStats {
    pub frames_decoded: u32,
    pub crc_failures: u32,
    pub bytes_discarded: u32,
}

/// Incremental frame parser. One decoder instance exists per link and
/// carries its decode context across arbitrarily chunked input.
#[derive(Debug)]
pub struct FrameDecoder {
    link_id: u32,
    state: DecodeState,
    len: u8,
    seq: u8,
    system_id: u8,
    component_id: u8,
    message_id: u8,
    payload: PayloadBuf,
    crc: u16,
    crc_low: u8,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new(link_id: u32) -> Self {
        Self {
            link_id,
            state: DecodeState::Idle,
            len: 0,
            seq: 0,
            system_id: 0,
            component_id: 0,
            message_id: 0,
            payload: PayloadBuf::new(),
            crc: CRC_INIT,
            crc_low: 0,
            stats: DecoderStats::default(),
        }
    }

    pub fn link_id(&self) -> u32 {
        self.link_id
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Feed one byte; yields a frame when the byte completes one.
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        match self.state {
            DecodeState::Idle => {
                if byte == FRAME_STX {
                    self.crc = CRC_INIT;
                    self.payload.clear();
                    self.state = DecodeState::Len;
                } else {
                    self.stats.bytes_discarded = self.stats.bytes_discarded.saturating_add(1);
                }
                None
            }
            DecodeState::Len => {
                if byte as usize > MAX_PAYLOAD_LEN {
                    // Length a real frame cannot carry; treat the STX as noise.
                    self.stats.bytes_discarded = self.stats.bytes_discarded.saturating_add(2);
                    self.state = DecodeState::Idle;
                } else {
                    self.len = byte;
                    self.crc = crc_accumulate(byte, self.crc);
                    self.state = DecodeState::Seq;
                }
                None
            }
            DecodeState::Seq => {
                self.seq = byte;
                self.crc = crc_accumulate(byte, self.crc);
                self.state = DecodeState::SystemId;
                None
            }
            DecodeState::SystemId => {
                self.system_id = byte;
                self.crc = crc_accumulate(byte, self.crc);
                self.state = DecodeState::ComponentId;
                None
            }
            DecodeState::ComponentId => {
                self.component_id = byte;
                self.crc = crc_accumulate(byte, self.crc);
                self.state = DecodeState::MessageId;
                None
            }
            DecodeState::MessageId => {
                self.message_id = byte;
                self.crc = crc_accumulate(byte, self.crc);
                self.state = if self.len == 0 {
                    DecodeState::CrcLow
                } else {
                    DecodeState::Payload
                };
                None
            }
            DecodeState::Payload => {
                let _ = self.payload.push(byte);
                self.crc = crc_accumulate(byte, self.crc);
                if self.payload.len() == self.len as usize {
                    self.state = DecodeState::CrcLow;
                }
                None
            }
            DecodeState::CrcLow => {
                self.crc_low = byte;
                self.state = DecodeState::CrcHigh;
                None
            }
            DecodeState::CrcHigh => {
                self.state = DecodeState::Idle;
                let received = u16::from_le_bytes([self.crc_low, byte]);
                if received == self.crc {
                    self.stats.frames_decoded = self.stats.frames_decoded.saturating_add(1);
                    Some(Frame {
                        seq: self.seq,
                        system_id: self.system_id,
                        component_id: self.component_id,
                        message_id: self.message_id,
                        payload: core::mem::take(&mut self.payload),
                    })
                } else {
                    self.stats.crc_failures = self.stats.crc_failures.saturating_add(1);
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        let mut payload = PayloadBuf::new();
        payload.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        Frame {
            seq: 7,
            system_id: 128,
            component_id: 200,
            message_id: 21,
            payload,
        }
    }

    fn decode_all(decoder: &mut FrameDecoder, bytes: &[u8]) -> std::vec::Vec<Frame> {
        bytes.iter().filter_map(|&b| decoder.push(b)).collect()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let frame = sample_frame();
        let mut decoder = FrameDecoder::new(1);

        let frames = decode_all(&mut decoder, &frame.encode());
        assert_eq!(frames, vec![frame]);
        assert_eq!(decoder.stats().frames_decoded, 1);
    }

    #[test]
    fn zero_length_payload_roundtrip() {
        let frame = Frame {
            seq: 0,
            system_id: 1,
            component_id: 1,
            message_id: 43,
            payload: PayloadBuf::new(),
        };
        let mut decoder = FrameDecoder::new(1);

        let frames = decode_all(&mut decoder, &frame.encode());
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn leading_garbage_is_discarded() {
        let frame = sample_frame();
        let mut bytes = vec![0x00, 0x13, 0x37, 0xFF];
        bytes.extend_from_slice(&frame.encode());

        let mut decoder = FrameDecoder::new(1);
        let frames = decode_all(&mut decoder, &bytes);
        assert_eq!(frames, vec![frame]);
        assert_eq!(decoder.stats().bytes_discarded, 4);
    }

    #[test]
    fn crc_corruption_drops_frame_and_recovers() {
        let frame = sample_frame();
        let mut corrupted = frame.encode().to_vec();
        let payload_start = 6;
        corrupted[payload_start] ^= 0xFF;

        let mut decoder = FrameDecoder::new(1);
        assert!(decode_all(&mut decoder, &corrupted).is_empty());
        assert_eq!(decoder.stats().crc_failures, 1);

        // The decoder must pick up the next clean frame.
        let frames = decode_all(&mut decoder, &frame.encode());
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn frames_survive_arbitrary_chunking() {
        let frame = sample_frame();
        let wire = frame.encode();
        let mut decoder = FrameDecoder::new(1);

        let mut decoded = std::vec::Vec::new();
        for chunk in wire.chunks(3) {
            decoded.extend(decode_all(&mut decoder, chunk));
        }
        assert_eq!(decoded, vec![frame]);
    }

    #[test]
    fn oversized_length_field_resets_decoder() {
        let frame = sample_frame();
        let mut bytes = vec![FRAME_STX, 0xFF];
        bytes.extend_from_slice(&frame.encode());

        let mut decoder = FrameDecoder::new(1);
        let frames = decode_all(&mut decoder, &bytes);
        assert_eq!(frames, vec![frame]);
    }
}
