//! Typed messages carried inside frames.
//!
//! Only the subset needed to drive client-side tests is modeled:
//! heartbeat, mode-set, the parameter exchange, and the mission exchange.
//! Payload fields are little-endian; name fields are fixed 16-byte
//! buffers that are not guaranteed to be NUL-terminated on the wire.

use thiserror::Error;

use crate::frame::{Frame, PayloadBuf};
use crate::mission::MissionItem;
use crate::params::{ParamName, PARAM_ID_LEN};

pub const MSG_ID_HEARTBEAT: u8 = 0;
pub const MSG_ID_SET_MODE: u8 = 11;
pub const MSG_ID_PARAM_REQUEST_READ: u8 = 20;
pub const MSG_ID_PARAM_REQUEST_LIST: u8 = 21;
pub const MSG_ID_PARAM_VALUE: u8 = 22;
pub const MSG_ID_PARAM_SET: u8 = 23;
pub const MSG_ID_MISSION_ITEM: u8 = 39;
pub const MSG_ID_MISSION_REQUEST: u8 = 40;
pub const MSG_ID_MISSION_REQUEST_LIST: u8 = 43;
pub const MSG_ID_MISSION_COUNT: u8 = 44;

/// Sentinel index meaning "resolve the read by name instead".
pub const PARAM_INDEX_BY_NAME: i16 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageDecodeError {
    #[error("message id {0} is not part of the simulated subset")]
    UnknownMessageId(u8),
    #[error("payload for message id {id} truncated at offset {offset}")]
    Truncated { id: u8, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Heartbeat {
        custom_mode: u32,
        vehicle_type: u8,
        autopilot: u8,
        base_mode: u8,
        system_status: u8,
    },
    SetMode {
        custom_mode: u32,
        target_system: u8,
        base_mode: u8,
    },
    ParamRequestRead {
        param_index: i16,
        target_system: u8,
        target_component: u8,
        param_id: ParamName,
    },
    ParamRequestList {
        target_system: u8,
        target_component: u8,
    },
    ParamValue {
        param_value: f32,
        param_count: u16,
        param_index: u16,
        param_id: ParamName,
        param_type: u8,
    },
    ParamSet {
        param_value: f32,
        target_system: u8,
        target_component: u8,
        param_id: ParamName,
    },
    MissionItem {
        target_system: u8,
        target_component: u8,
        item: MissionItem,
    },
    MissionRequest {
        seq: u16,
        target_system: u8,
        target_component: u8,
    },
    MissionRequestList {
        target_system: u8,
        target_component: u8,
    },
    MissionCount {
        count: u16,
        target_system: u8,
        target_component: u8,
    },
}

impl Message {
    pub fn id(&self) -> u8 {
        match self {
            Self::Heartbeat { .. } => MSG_ID_HEARTBEAT,
            Self::SetMode { .. } => MSG_ID_SET_MODE,
            Self::ParamRequestRead { .. } => MSG_ID_PARAM_REQUEST_READ,
            Self::ParamRequestList { .. } => MSG_ID_PARAM_REQUEST_LIST,
            Self::ParamValue { .. } => MSG_ID_PARAM_VALUE,
            Self::ParamSet { .. } => MSG_ID_PARAM_SET,
            Self::MissionItem { .. } => MSG_ID_MISSION_ITEM,
            Self::MissionRequest { .. } => MSG_ID_MISSION_REQUEST,
            Self::MissionRequestList { .. } => MSG_ID_MISSION_REQUEST_LIST,
            Self::MissionCount { .. } => MSG_ID_MISSION_COUNT,
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self, MessageDecodeError> {
        let mut r = PayloadReader::new(frame.message_id, &frame.payload);

        let message = match frame.message_id {
            MSG_ID_HEARTBEAT => Self::Heartbeat {
                custom_mode: r.u32()?,
                vehicle_type: r.u8()?,
                autopilot: r.u8()?,
                base_mode: r.u8()?,
                system_status: r.u8()?,
            },
            MSG_ID_SET_MODE => Self::SetMode {
                custom_mode: r.u32()?,
                target_system: r.u8()?,
                base_mode: r.u8()?,
            },
            MSG_ID_PARAM_REQUEST_READ => Self::ParamRequestRead {
                param_index: r.i16()?,
                target_system: r.u8()?,
                target_component: r.u8()?,
                param_id: r.param_id()?,
            },
            MSG_ID_PARAM_REQUEST_LIST => Self::ParamRequestList {
                target_system: r.u8()?,
                target_component: r.u8()?,
            },
            MSG_ID_PARAM_VALUE => Self::ParamValue {
                param_value: r.f32()?,
                param_count: r.u16()?,
                param_index: r.u16()?,
                param_id: r.param_id()?,
                param_type: r.u8()?,
            },
            MSG_ID_PARAM_SET => Self::ParamSet {
                param_value: r.f32()?,
                target_system: r.u8()?,
                target_component: r.u8()?,
                param_id: r.param_id()?,
            },
            MSG_ID_MISSION_ITEM => {
                let param1 = r.f64()?;
                let param2 = r.f64()?;
                let param3 = r.f64()?;
                let param4 = r.f64()?;
                let x = r.f64()?;
                let y = r.f64()?;
                let z = r.f64()?;
                let seq = r.u16()?;
                let command = r.u16()?;
                let target_system = r.u8()?;
                let target_component = r.u8()?;
                let frame_kind = r.u8()?;
                let current = r.u8()? != 0;
                let autocontinue = r.u8()? != 0;
                Self::MissionItem {
                    target_system,
                    target_component,
                    item: MissionItem {
                        seq,
                        frame: frame_kind,
                        command,
                        current,
                        autocontinue,
                        param1,
                        param2,
                        param3,
                        param4,
                        x,
                        y,
                        z,
                    },
                }
            }
            MSG_ID_MISSION_REQUEST => Self::MissionRequest {
                seq: r.u16()?,
                target_system: r.u8()?,
                target_component: r.u8()?,
            },
            MSG_ID_MISSION_REQUEST_LIST => Self::MissionRequestList {
                target_system: r.u8()?,
                target_component: r.u8()?,
            },
            MSG_ID_MISSION_COUNT => Self::MissionCount {
                count: r.u16()?,
                target_system: r.u8()?,
                target_component: r.u8()?,
            },
            other => return Err(MessageDecodeError::UnknownMessageId(other)),
        };

        Ok(message)
    }

    pub fn encode_payload(&self) -> PayloadBuf {
        let mut w = PayloadWriter::new();

        match self {
            Self::Heartbeat {
                custom_mode,
                vehicle_type,
                autopilot,
                base_mode,
                system_status,
            } => {
                w.u32(*custom_mode);
                w.u8(*vehicle_type);
                w.u8(*autopilot);
                w.u8(*base_mode);
                w.u8(*system_status);
            }
            Self::SetMode {
                custom_mode,
                target_system,
                base_mode,
            } => {
                w.u32(*custom_mode);
                w.u8(*target_system);
                w.u8(*base_mode);
            }
            Self::ParamRequestRead {
                param_index,
                target_system,
                target_component,
                param_id,
            } => {
                w.i16(*param_index);
                w.u8(*target_system);
                w.u8(*target_component);
                w.param_id(param_id);
            }
            Self::ParamRequestList {
                target_system,
                target_component,
            } => {
                w.u8(*target_system);
                w.u8(*target_component);
            }
            Self::ParamValue {
                param_value,
                param_count,
                param_index,
                param_id,
                param_type,
            } => {
                w.f32(*param_value);
                w.u16(*param_count);
                w.u16(*param_index);
                w.param_id(param_id);
                w.u8(*param_type);
            }
            Self::ParamSet {
                param_value,
                target_system,
                target_component,
                param_id,
            } => {
                w.f32(*param_value);
                w.u8(*target_system);
                w.u8(*target_component);
                w.param_id(param_id);
            }
            Self::MissionItem {
                target_system,
                target_component,
                item,
            } => {
                w.f64(item.param1);
                w.f64(item.param2);
                w.f64(item.param3);
                w.f64(item.param4);
                w.f64(item.x);
                w.f64(item.y);
                w.f64(item.z);
                w.u16(item.seq);
                w.u16(item.command);
                w.u8(*target_system);
                w.u8(*target_component);
                w.u8(item.frame);
                w.u8(u8::from(item.current));
                w.u8(u8::from(item.autocontinue));
            }
            Self::MissionRequest {
                seq,
                target_system,
                target_component,
            } => {
                w.u16(*seq);
                w.u8(*target_system);
                w.u8(*target_component);
            }
            Self::MissionRequestList {
                target_system,
                target_component,
            } => {
                w.u8(*target_system);
                w.u8(*target_component);
            }
            Self::MissionCount {
                count,
                target_system,
                target_component,
            } => {
                w.u16(*count);
                w.u8(*target_system);
                w.u8(*target_component);
            }
        }

        w.finish()
    }
}

/// Read a fixed-width name field into a bounded string, stopping at the
/// first NUL or at the field width.
pub fn unpack_param_id(raw: &[u8]) -> ParamName {
    let mut name = ParamName::new();
    for &b in raw.iter().take(PARAM_ID_LEN) {
        if b == 0 {
            break;
        }
        if name.try_push(b as char).is_err() {
            break;
        }
    }
    name
}

struct PayloadReader<'a> {
    id: u8,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(id: u8, buf: &'a [u8]) -> Self {
        Self { id, buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], MessageDecodeError> {
        if self.pos + n > self.buf.len() {
            return Err(MessageDecodeError::Truncated {
                id: self.id,
                offset: self.pos,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, MessageDecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, MessageDecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, MessageDecodeError> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, MessageDecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, MessageDecodeError> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, MessageDecodeError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_le_bytes(arr))
    }

    fn param_id(&mut self) -> Result<ParamName, MessageDecodeError> {
        Ok(unpack_param_id(self.take(PARAM_ID_LEN)?))
    }
}

struct PayloadWriter {
    buf: PayloadBuf,
}

impl PayloadWriter {
    fn new() -> Self {
        Self {
            buf: PayloadBuf::new(),
        }
    }

    fn u8(&mut self, v: u8) {
        let _ = self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        let _ = self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i16(&mut self, v: i16) {
        let _ = self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        let _ = self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        let _ = self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        let _ = self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Write a name zero-padded to the fixed field width. A name that
    /// exactly fills the field carries no NUL terminator.
    fn param_id(&mut self, name: &ParamName) {
        let bytes = name.as_bytes();
        let _ = self.buf.extend_from_slice(bytes);
        for _ in bytes.len()..PARAM_ID_LEN {
            let _ = self.buf.push(0);
        }
    }

    fn finish(self) -> PayloadBuf {
        self.buf
    }
}
