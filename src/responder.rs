//! Protocol responder: the endpoint's entire reactive surface.
//!
//! Separates the diagnostic shell sub-mode from the binary protocol,
//! feeds protocol bytes through the incremental frame decoder, dispatches
//! decoded frames to the mode / parameter / mission handlers, and emits
//! heartbeat and response frames through the link's event channel.
//!
//! Everything here runs on the link's single worker; the responder is
//! never touched from another execution context, so its stores need no
//! locking.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::frame::{Frame, FrameDecoder};
use crate::link::{EndpointState, Identity, AUTOPILOT_PX4, VEHICLE_TYPE_QUADROTOR};
use crate::message::{Message, MessageDecodeError, PARAM_INDEX_BY_NAME};
use crate::mission::{MissionItem, MissionStore};
use crate::params::{ParamName, ParamStore};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Escape sentinel that toggles the shell sub-mode.
pub const SHELL_ESCAPE: &[u8] = b"\r\r\r";
/// A chunk of exactly this length opening with the sentinel exits shell mode.
pub const SHELL_EXIT_CHUNK_LEN: usize = 4;
/// Shell line that starts the binary protocol side of the endpoint.
pub const PROTOCOL_START_COMMAND: &str = "sh /etc/init.d/rc.usb\n";

/// Events published to the transport collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    /// Outbound framed bytes for the client under test.
    Bytes { link_id: u32, data: Vec<u8> },
    /// Non-fatal protocol violation; the offending request was dropped.
    ProtocolError(ProtocolViolation),
}

/// Taxonomy of recoverable wire-level violations. None of these ever
/// terminate the worker loop or the connection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolViolation {
    #[error("request targeted system {received}, this endpoint is system {expected}")]
    TargetSystemMismatch { received: u8, expected: u8 },
    #[error("parameter set requested unknown name {name:?}")]
    UnknownParameter { name: ParamName },
    #[error("parameter read requested index {requested}, table holds {count}")]
    ParamIndexOutOfRange { requested: i16, count: u16 },
    #[error("mission request for sequence {requested}, store holds {count}")]
    MissionSequenceOutOfRange { requested: u16, count: u16 },
    #[error("mission item re-uploaded at existing sequence {seq}")]
    DuplicateMissionSequence { seq: u16 },
}

/// Collaborator seam: observers see every decoded frame before the
/// responder's own dispatch runs, in registration order. A richer
/// mission-exchange implementation hooks in here without displacing the
/// built-in minimal handling.
pub trait FrameObserver: Send {
    fn on_frame(&mut self, frame: &Frame);
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponderStats {
    pub frames_dispatched: u32,
    pub frames_unhandled: u32,
    pub heartbeats_sent: u32,
    pub violations: u32,
    pub shell_lines: u32,
}

pub struct Responder {
    identity: Identity,
    state: EndpointState,
    params: ParamStore,
    missions: MissionStore,
    decoder: FrameDecoder,
    observers: Vec<Box<dyn FrameObserver>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    tx_seq: u8,
    stats: ResponderStats,
}

impl Responder {
    pub fn new(
        identity: Identity,
        params: ParamStore,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            identity,
            state: EndpointState::default(),
            params,
            missions: MissionStore::new(),
            decoder: FrameDecoder::new(identity.link_id),
            observers: Vec::new(),
            events,
            tx_seq: 0,
            stats: ResponderStats::default(),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn stats(&self) -> ResponderStats {
        self.stats
    }

    pub fn decoder_stats(&self) -> crate::frame::DecoderStats {
        self.decoder.stats()
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn missions(&self) -> &MissionStore {
        &self.missions
    }

    pub fn add_observer(&mut self, observer: Box<dyn FrameObserver>) {
        self.observers.push(observer);
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.state.connected = connected;
    }

    /// Entry point for one inbound chunk from the transport.
    ///
    /// In shell mode the whole chunk goes to the shell matcher. In
    /// protocol mode a chunk opening with the escape sentinel enters
    /// shell mode and hands the remainder to the matcher, and the
    /// original chunk still reaches the frame decoder: both paths fire
    /// on the same bytes.
    pub fn handle_bytes(&mut self, bytes: &[u8]) {
        if self.state.shell_mode {
            self.handle_shell_bytes(bytes);
        } else {
            if bytes.starts_with(SHELL_ESCAPE) {
                self.state.shell_mode = true;
                debug!(link_id = self.identity.link_id, "shell mode entered");
                self.handle_shell_bytes(&bytes[SHELL_ESCAPE.len()..]);
            }
            self.handle_protocol_bytes(bytes);
        }
    }

    /// Periodic tick from the worker loop. Emits one heartbeat while the
    /// protocol is started; otherwise does nothing.
    pub fn heartbeat_tick(&mut self) {
        if !self.state.protocol_started {
            return;
        }
        self.stats.heartbeats_sent = self.stats.heartbeats_sent.saturating_add(1);
        let heartbeat = Message::Heartbeat {
            custom_mode: 0,
            vehicle_type: VEHICLE_TYPE_QUADROTOR,
            autopilot: AUTOPILOT_PX4,
            base_mode: self.state.mode_flags,
            system_status: self.state.system_status.tag(),
        };
        self.emit(&heartbeat);
    }

    fn handle_shell_bytes(&mut self, bytes: &[u8]) {
        if bytes.len() == SHELL_EXIT_CHUNK_LEN && bytes.starts_with(SHELL_ESCAPE) {
            self.state.shell_mode = false;
            debug!(link_id = self.identity.link_id, "shell mode exited");
            return;
        }
        if bytes.is_empty() {
            return;
        }

        self.stats.shell_lines = self.stats.shell_lines.saturating_add(1);
        let line = String::from_utf8_lossy(bytes);
        debug!(
            link_id = self.identity.link_id,
            line = %line.trim_end(),
            "shell input"
        );

        if bytes == PROTOCOL_START_COMMAND.as_bytes() {
            self.state.protocol_started = true;
            debug!(link_id = self.identity.link_id, "protocol started");
        }
    }

    fn handle_protocol_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if let Some(frame) = self.decoder.push(byte) {
                self.dispatch(&frame);
            }
        }
    }

    fn dispatch(&mut self, frame: &Frame) {
        for observer in &mut self.observers {
            observer.on_frame(frame);
        }

        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(MessageDecodeError::UnknownMessageId(id)) => {
                debug!(
                    link_id = self.identity.link_id,
                    message_id = id,
                    "unhandled message"
                );
                self.stats.frames_unhandled = self.stats.frames_unhandled.saturating_add(1);
                return;
            }
            Err(err @ MessageDecodeError::Truncated { .. }) => {
                warn!(link_id = self.identity.link_id, %err, "dropping frame");
                self.stats.frames_unhandled = self.stats.frames_unhandled.saturating_add(1);
                return;
            }
        };

        self.stats.frames_dispatched = self.stats.frames_dispatched.saturating_add(1);

        match message {
            // Client heartbeats are observational only.
            Message::Heartbeat { .. } => {}
            Message::SetMode {
                target_system,
                base_mode,
                ..
            } => self.handle_set_mode(target_system, base_mode),
            Message::ParamRequestList { target_system, .. } => {
                self.handle_param_request_list(target_system);
            }
            Message::ParamRequestRead {
                param_index,
                target_system,
                param_id,
                ..
            } => self.handle_param_request_read(target_system, param_index, &param_id),
            Message::ParamSet {
                param_value,
                target_system,
                param_id,
                ..
            } => self.handle_param_set(target_system, &param_id, param_value),
            Message::MissionRequestList { target_system, .. } => {
                self.handle_mission_request_list(target_system, frame);
            }
            Message::MissionRequest {
                seq, target_system, ..
            } => self.handle_mission_request(target_system, seq, frame),
            Message::MissionItem {
                target_system, item, ..
            } => self.handle_mission_item(target_system, item),
            // Response-type frames are ours to send, not to receive.
            Message::ParamValue { .. } | Message::MissionCount { .. } => {
                debug!(
                    link_id = self.identity.link_id,
                    message_id = frame.message_id,
                    "ignoring response-type frame from peer"
                );
                self.stats.frames_unhandled = self.stats.frames_unhandled.saturating_add(1);
            }
        }
    }

    fn handle_set_mode(&mut self, target_system: u8, base_mode: u8) {
        if !self.target_matches(target_system) {
            return;
        }
        self.state.mode_flags = base_mode;
    }

    fn handle_param_request_list(&mut self, target_system: u8) {
        if !self.target_matches(target_system) {
            return;
        }

        let count = self.params.count();
        let responses: Vec<Message> = self
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| Message::ParamValue {
                param_value: param.value.as_f32(),
                param_count: count,
                param_index: index as u16,
                param_id: param.name,
                param_type: param.value.declared_type().tag(),
            })
            .collect();

        for response in &responses {
            self.emit(response);
        }
    }

    fn handle_param_request_read(&mut self, target_system: u8, param_index: i16, param_id: &ParamName) {
        if !self.target_matches(target_system) {
            return;
        }

        let resolved = if param_index == PARAM_INDEX_BY_NAME {
            // A read-by-name miss is silently ignored, unlike the
            // explicit error a set-by-name miss raises.
            let hit = self.params.get_indexed(param_id.as_str());
            if hit.is_none() {
                debug!(
                    link_id = self.identity.link_id,
                    name = param_id.as_str(),
                    "read of unknown parameter name ignored"
                );
            }
            hit.map(|(index, param)| (index, *param))
        } else if param_index >= 0 {
            match self.params.by_index(param_index as usize) {
                Some(param) => Some((param_index as usize, *param)),
                None => {
                    self.raise(ProtocolViolation::ParamIndexOutOfRange {
                        requested: param_index,
                        count: self.params.count(),
                    });
                    None
                }
            }
        } else {
            self.raise(ProtocolViolation::ParamIndexOutOfRange {
                requested: param_index,
                count: self.params.count(),
            });
            None
        };

        if let Some((index, param)) = resolved {
            let response = Message::ParamValue {
                param_value: param.value.as_f32(),
                param_count: self.params.count(),
                param_index: index as u16,
                param_id: param.name,
                param_type: param.value.declared_type().tag(),
            };
            self.emit(&response);
        }
    }

    fn handle_param_set(&mut self, target_system: u8, param_id: &ParamName, param_value: f32) {
        if !self.target_matches(target_system) {
            return;
        }

        match self.params.set_from_wire(param_id.as_str(), param_value) {
            Some((index, value)) => {
                let response = Message::ParamValue {
                    param_value: value.as_f32(),
                    param_count: self.params.count(),
                    param_index: index as u16,
                    param_id: *param_id,
                    param_type: value.declared_type().tag(),
                };
                self.emit(&response);
            }
            None => self.raise(ProtocolViolation::UnknownParameter { name: *param_id }),
        }
    }

    fn handle_mission_request_list(&mut self, target_system: u8, request: &Frame) {
        if !self.target_matches(target_system) {
            return;
        }

        // Addressed back to whoever asked, not a fixed peer.
        let response = Message::MissionCount {
            count: self.missions.count(),
            target_system: request.system_id,
            target_component: request.component_id,
        };
        self.emit(&response);
    }

    fn handle_mission_request(&mut self, target_system: u8, seq: u16, request: &Frame) {
        if !self.target_matches(target_system) {
            return;
        }

        match self.missions.get(seq) {
            Some(item) => {
                let response = Message::MissionItem {
                    target_system: request.system_id,
                    target_component: request.component_id,
                    item: *item,
                };
                self.emit(&response);
            }
            None => self.raise(ProtocolViolation::MissionSequenceOutOfRange {
                requested: seq,
                count: self.missions.count(),
            }),
        }
    }

    fn handle_mission_item(&mut self, target_system: u8, item: MissionItem) {
        if !self.target_matches(target_system) {
            return;
        }

        if let Err(duplicate) = self.missions.insert(item) {
            self.raise(ProtocolViolation::DuplicateMissionSequence { seq: duplicate.0 });
        }
    }

    /// Addressing rule shared by every request-type handler.
    fn target_matches(&mut self, target_system: u8) -> bool {
        if target_system == self.identity.system_id {
            return true;
        }
        self.raise(ProtocolViolation::TargetSystemMismatch {
            received: target_system,
            expected: self.identity.system_id,
        });
        false
    }

    fn raise(&mut self, violation: ProtocolViolation) {
        warn!(link_id = self.identity.link_id, %violation, "protocol violation");
        self.stats.violations = self.stats.violations.saturating_add(1);
        let _ = self.events.send(LinkEvent::ProtocolError(violation));
    }

    fn emit(&mut self, message: &Message) {
        let frame = Frame {
            seq: self.tx_seq,
            system_id: self.identity.system_id,
            component_id: self.identity.component_id,
            message_id: message.id(),
            payload: message.encode_payload(),
        };
        self.tx_seq = self.tx_seq.wrapping_add(1);
        let _ = self.events.send(LinkEvent::Bytes {
            link_id: self.identity.link_id,
            data: frame.encode().to_vec(),
        });
    }
}
