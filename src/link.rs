//! Link lifecycle and the single-worker execution model.
//!
//! [`SimLink`] is the handle the transport side of a client application
//! holds: `write_bytes` and `disconnect` may be called from any execution
//! context and only enqueue messages. One spawned worker task owns the
//! [`Responder`](crate::responder::Responder) and therefore every piece
//! of mutable endpoint state; inbound chunks and the heartbeat tick are
//! two event sources of the same loop and never run concurrently.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::params::{FixtureError, ParamStore};
use crate::responder::{FrameObserver, LinkEvent, Responder};

pub const DEFAULT_SYSTEM_ID: u8 = 128;
pub const DEFAULT_COMPONENT_ID: u8 = 200;
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

// Base-mode flag bits carried in heartbeat and mode-set frames.
pub const MODE_FLAG_CUSTOM_MODE_ENABLED: u8 = 1;
pub const MODE_FLAG_TEST_ENABLED: u8 = 1 << 1;
pub const MODE_FLAG_AUTO_ENABLED: u8 = 1 << 2;
pub const MODE_FLAG_GUIDED_ENABLED: u8 = 1 << 3;
pub const MODE_FLAG_STABILIZE_ENABLED: u8 = 1 << 4;
pub const MODE_FLAG_HIL_ENABLED: u8 = 1 << 5;
pub const MODE_FLAG_MANUAL_INPUT_ENABLED: u8 = 1 << 6;
pub const MODE_FLAG_SAFETY_ARMED: u8 = 1 << 7;

// Fixed vehicle/autopilot tags stamped into every heartbeat.
pub const VEHICLE_TYPE_QUADROTOR: u8 = 2;
pub const AUTOPILOT_PX4: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SystemStatus {
    Uninit = 0,
    Boot = 1,
    Calibrating = 2,
    Standby = 3,
    Active = 4,
    Critical = 5,
    Emergency = 6,
    Poweroff = 7,
}

impl SystemStatus {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Addressing of one simulated endpoint. Immutable after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub link_id: u32,
    pub system_id: u8,
    pub component_id: u8,
}

/// Mutable mode/state flags, owned exclusively by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointState {
    pub connected: bool,
    pub shell_mode: bool,
    pub protocol_started: bool,
    pub mode_flags: u8,
    pub system_status: SystemStatus,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            connected: false,
            shell_mode: false,
            protocol_started: false,
            mode_flags: MODE_FLAG_MANUAL_INPUT_ENABLED,
            system_status: SystemStatus::Standby,
        }
    }
}

/// Hands out process-unique link ids. Clones share one counter; pass the
/// same allocator to every endpoint a test constructs instead of relying
/// on hidden static state.
#[derive(Debug, Clone, Default)]
pub struct LinkIdAllocator {
    next: Arc<AtomicU32>,
}

impl LinkIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub system_id: u8,
    pub component_id: u8,
    pub heartbeat_period: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            system_id: DEFAULT_SYSTEM_ID,
            component_id: DEFAULT_COMPONENT_ID,
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
        }
    }
}

#[derive(Debug)]
enum LinkCommand {
    Write(Vec<u8>),
    Disconnect,
}

/// Handle to a connected simulated endpoint.
#[derive(Debug)]
pub struct SimLink {
    identity: Identity,
    commands: mpsc::UnboundedSender<LinkCommand>,
    worker: Option<JoinHandle<()>>,
}

impl SimLink {
    /// Load the parameter fixture, spawn the worker, and report
    /// [`LinkEvent::Connected`]. A malformed fixture is fatal and no
    /// endpoint starts. Must be called within a tokio runtime.
    pub fn connect(
        config: LinkConfig,
        allocator: &LinkIdAllocator,
        param_fixture: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), FixtureError> {
        Self::connect_with_observers(config, allocator, param_fixture, Vec::new())
    }

    /// As [`connect`](Self::connect), with frame observers registered
    /// before the first byte can arrive.
    pub fn connect_with_observers(
        config: LinkConfig,
        allocator: &LinkIdAllocator,
        param_fixture: &str,
        observers: Vec<Box<dyn FrameObserver>>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), FixtureError> {
        let params = ParamStore::from_fixture(param_fixture)?;
        let identity = Identity {
            link_id: allocator.next_id(),
            system_id: config.system_id,
            component_id: config.component_id,
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut responder = Responder::new(identity, params, event_tx.clone());
        for observer in observers {
            responder.add_observer(observer);
        }

        let _ = event_tx.send(LinkEvent::Connected);
        info!(
            link_id = identity.link_id,
            system_id = identity.system_id,
            component_id = identity.component_id,
            "simulated endpoint connected"
        );

        let worker = tokio::spawn(run_worker(
            responder,
            command_rx,
            event_tx,
            config.heartbeat_period,
        ));

        Ok((
            Self {
                identity,
                commands: command_tx,
                worker: Some(worker),
            },
            event_rx,
        ))
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn link_id(&self) -> u32 {
        self.identity.link_id
    }

    /// Deliver one inbound chunk. Callable from any execution context;
    /// chunks reach the worker in submission order. Writes after
    /// disconnect are dropped.
    pub fn write_bytes(&self, bytes: &[u8]) {
        if self
            .commands
            .send(LinkCommand::Write(bytes.to_vec()))
            .is_err()
        {
            warn!(
                link_id = self.identity.link_id,
                "write after disconnect dropped"
            );
        }
    }

    /// Stop the worker and wait for it to wind down. Safe to call before
    /// any bytes ever arrived, and idempotent.
    pub async fn disconnect(&mut self) {
        let _ = self.commands.send(LinkCommand::Disconnect);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

/// The endpoint's single logical execution context: one loop over two
/// event sources, inbound command messages and the heartbeat interval.
async fn run_worker(
    mut responder: Responder,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
    heartbeat_period: Duration,
) {
    // First tick one full period after connect, not immediately.
    let mut heartbeat = time::interval_at(
        time::Instant::now() + heartbeat_period,
        heartbeat_period,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    responder.set_connected(true);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Write(bytes)) => responder.handle_bytes(&bytes),
                Some(LinkCommand::Disconnect) | None => break,
            },
            _ = heartbeat.tick() => responder.heartbeat_tick(),
        }
    }

    responder.set_connected(false);
    debug!(
        link_id = responder.identity().link_id,
        stats = ?responder.stats(),
        "worker loop finished"
    );
    let _ = events.send(LinkEvent::Disconnected);
    info!(
        link_id = responder.identity().link_id,
        "simulated endpoint disconnected"
    );
}
