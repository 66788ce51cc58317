use std::time::Duration;

use simlink::frame::FrameDecoder;
use simlink::link::{
    LinkConfig, LinkIdAllocator, SimLink, MODE_FLAG_MANUAL_INPUT_ENABLED, MODE_FLAG_SAFETY_ARMED,
};
use simlink::message::Message;
use simlink::params::{FixtureError, DEFAULT_PARAM_FIXTURE};
use simlink::responder::LinkEvent;
use tokio::sync::mpsc;
use tokio::time;

const START_SEQUENCE: &[u8] = b"\r\r\rsh /etc/init.d/rc.usb\n";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn drain(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn decode_messages(events: &[LinkEvent]) -> Vec<Message> {
    let mut decoder = FrameDecoder::new(99);
    let mut out = Vec::new();
    for event in events {
        if let LinkEvent::Bytes { data, .. } = event {
            for &byte in data {
                if let Some(frame) = decoder.push(byte) {
                    out.push(Message::decode(&frame).unwrap());
                }
            }
        }
    }
    out
}

fn heartbeats(events: &[LinkEvent]) -> Vec<(u8, u8)> {
    decode_messages(events)
        .into_iter()
        .filter_map(|message| match message {
            Message::Heartbeat {
                base_mode,
                system_status,
                ..
            } => Some((base_mode, system_status)),
            _ => None,
        })
        .collect()
}

/// Build a request frame as the client under test would.
fn request_bytes(message: &Message) -> Vec<u8> {
    let frame = simlink::Frame {
        seq: 0,
        system_id: 250,
        component_id: 1,
        message_id: message.id(),
        payload: message.encode_payload(),
    };
    frame.encode().to_vec()
}

#[tokio::test(start_paused = true)]
async fn heartbeat_fires_once_per_period_after_protocol_start() {
    init_tracing();
    let allocator = LinkIdAllocator::new();
    let (mut link, mut events) =
        SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE).unwrap();

    // Several periods pass before the start command: silence expected.
    time::sleep(Duration::from_millis(3500)).await;
    assert!(heartbeats(&drain(&mut events)).is_empty());

    link.write_bytes(START_SEQUENCE);
    time::sleep(Duration::from_millis(100)).await;
    drain(&mut events);

    // Exactly one heartbeat per period from here on.
    time::sleep(Duration::from_secs(3)).await;
    let beats = heartbeats(&drain(&mut events));
    assert_eq!(beats.len(), 3);
    assert!(beats
        .iter()
        .all(|(base_mode, _)| *base_mode == MODE_FLAG_MANUAL_INPUT_ENABLED));

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn heartbeat_reflects_most_recent_mode_flags() {
    init_tracing();
    let allocator = LinkIdAllocator::new();
    let (mut link, mut events) =
        SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE).unwrap();

    link.write_bytes(START_SEQUENCE);
    // Drop out of shell mode so protocol frames reach the dispatcher.
    link.write_bytes(b"\r\r\r\n");
    link.write_bytes(&request_bytes(&Message::SetMode {
        custom_mode: 0,
        target_system: 128,
        base_mode: MODE_FLAG_SAFETY_ARMED,
    }));

    time::sleep(Duration::from_millis(1500)).await;
    let beats = heartbeats(&drain(&mut events));
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].0, MODE_FLAG_SAFETY_ARMED);

    link.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn param_exchange_round_trip_over_link() {
    init_tracing();
    let allocator = LinkIdAllocator::new();
    let (mut link, mut events) =
        SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE).unwrap();

    link.write_bytes(&request_bytes(&Message::ParamRequestList {
        target_system: 128,
        target_component: 200,
    }));
    time::sleep(Duration::from_millis(10)).await;

    let responses = decode_messages(&drain(&mut events));
    assert_eq!(responses.len(), 8);
    for (index, response) in responses.iter().enumerate() {
        match response {
            Message::ParamValue {
                param_count,
                param_index,
                ..
            } => {
                assert_eq!(*param_count, 8);
                assert_eq!(*param_index, index as u16);
            }
            other => panic!("expected ParamValue, got {other:?}"),
        }
    }

    link.disconnect().await;
}

#[tokio::test]
async fn connect_emits_connected_and_disconnect_is_clean() {
    init_tracing();
    let allocator = LinkIdAllocator::new();
    let (mut link, mut events) =
        SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE).unwrap();

    assert_eq!(events.recv().await, Some(LinkEvent::Connected));

    // Disconnect before any bytes ever arrived must wind down cleanly.
    link.disconnect().await;
    assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));

    // Idempotent, and late writes are dropped without effect.
    link.write_bytes(b"late");
    link.disconnect().await;
}

#[tokio::test]
async fn dropping_the_handle_stops_the_worker() {
    init_tracing();
    let allocator = LinkIdAllocator::new();
    let (link, mut events) =
        SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE).unwrap();

    drop(link);

    assert_eq!(events.recv().await, Some(LinkEvent::Connected));
    assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));
    assert_eq!(events.recv().await, None);
}

#[tokio::test]
async fn malformed_fixture_is_fatal_at_connect() {
    init_tracing();
    let allocator = LinkIdAllocator::new();

    let err = SimLink::connect(LinkConfig::default(), &allocator, "no tabs here\n").unwrap_err();
    assert!(matches!(err, FixtureError::FieldCount { line: 1, .. }));
}

#[tokio::test]
async fn allocator_hands_out_unique_link_ids() {
    init_tracing();
    let allocator = LinkIdAllocator::new();

    let (mut first, _first_events) =
        SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE).unwrap();
    let (mut second, _second_events) =
        SimLink::connect(LinkConfig::default(), &allocator, DEFAULT_PARAM_FIXTURE).unwrap();

    assert_ne!(first.link_id(), second.link_id());

    first.disconnect().await;
    second.disconnect().await;
}
