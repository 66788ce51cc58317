//! # Simulated Link Endpoint
//!
//! An in-process stand-in for real vehicle hardware speaking a
//! heartbeat-bearing, parameter-exchange, mission-exchange binary
//! protocol over an arbitrary byte-stream transport. Client
//! implementations are exercised against deterministic responses instead
//! of a live device.
//!
//! ## Features
//!
//! - **Byte-stream demultiplexing**: a diagnostic shell sub-mode toggled
//!   by an escape sentinel, separated from the binary protocol path
//! - **Incremental frame decoding**: checksum-validated framing tolerant
//!   of garbage, truncation, and arbitrary chunking
//! - **Parameter exchange**: list/read/set over an insertion-ordered,
//!   typed parameter table loaded from a fixture
//! - **Mission exchange**: count/request/upload over a sequence-keyed
//!   mission item store
//! - **Periodic heartbeat**: emitted on a fixed cadence once the
//!   protocol is started, reflecting live mode/state flags
//! - **Single-worker concurrency**: all mutable state owned by one task;
//!   foreign contexts only enqueue
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use simlink::{LinkConfig, LinkIdAllocator, SimLink};
//! use simlink::params::DEFAULT_PARAM_FIXTURE;
//!
//! # #[tokio::main] async fn main() {
//! let allocator = LinkIdAllocator::new();
//! let (link, mut events) =
//!     SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE)
//!         .expect("default fixture is well-formed");
//!
//! // Feed the endpoint bytes exactly as a transport would.
//! link.write_bytes(b"\r\r\rsh /etc/init.d/rc.usb\n");
//!
//! while let Some(event) = events.recv().await {
//!     println!("endpoint event: {event:?}");
//! }
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`link`] - identity, endpoint state, and the async link handle
//! - [`frame`] - wire framing and the incremental decoder
//! - [`message`] - the typed message subset and payload codecs
//! - [`params`] - ordered parameter table and fixture loading
//! - [`mission`] - sequence-keyed mission item store
//! - [`responder`] - demultiplexer, dispatcher, and protocol handlers

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod frame;
pub mod link;
pub mod message;
pub mod mission;
pub mod params;
pub mod responder;

// Re-export the main public types for convenience
pub use frame::{Frame, FrameDecoder};
pub use link::{EndpointState, Identity, LinkConfig, LinkIdAllocator, SimLink, SystemStatus};
pub use message::Message;
pub use mission::{MissionItem, MissionStore};
pub use params::{ParamStore, ParamType, ParamValue};
pub use responder::{FrameObserver, LinkEvent, ProtocolViolation, Responder};
