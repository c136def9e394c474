// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frame codec tests for tributary-protocol.

use bytes::Bytes;
use tributary_protocol::frame::{HEADER_SIZE, MAX_FRAME_SIZE};
use tributary_protocol::wire::{
    ControlMessage, DaemonEvent, Hello, LogEntry, LogEvent, LogLevel, ModelType, RemoteSource,
    StopMessage, control_message, daemon_event,
};
use tributary_protocol::{Frame, FrameError, MessageType};

#[test]
fn test_frame_header_format() {
    let hello = Hello {
        client_id: "client-1".to_string(),
        ..Default::default()
    };
    let frame = Frame::hello(&hello).unwrap();
    let encoded = frame.encode();

    let length = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;
    let message_type = u16::from_be_bytes([encoded[4], encoded[5]]);

    assert_eq!(length, frame.payload.len());
    assert_eq!(message_type, MessageType::Hello as u16);
    assert_eq!(encoded.len(), HEADER_SIZE + length);
}

#[test]
fn test_event_frame_decodes_log_event() {
    let event = DaemonEvent {
        event: Some(daemon_event::Event::Log(LogEvent {
            source: Some(RemoteSource {
                model_type: ModelType::Operation.into(),
                id: "op-7".to_string(),
            }),
            entry: Some(LogEntry {
                message: "row 12 rejected".to_string(),
                level: LogLevel::Error.into(),
                timestamp_ms: 1_700_000_000_000,
            }),
        })),
    };

    let encoded = Frame::event(&event).unwrap().encode();
    let frame = Frame::decode_from_bytes(encoded).unwrap();
    assert_eq!(frame.message_type, MessageType::Event);

    let decoded: DaemonEvent = frame.decode().unwrap();
    assert_eq!(decoded, event);
}

#[test]
fn test_control_frame_wraps_stop() {
    let control = ControlMessage {
        control: Some(control_message::Control::Stop(StopMessage {
            reason_phrase: "maintenance".to_string(),
            safe_stop: false,
        })),
    };

    let frame = Frame::control(&control).unwrap();
    let decoded: ControlMessage = frame.decode().unwrap();
    match decoded.control {
        Some(control_message::Control::Stop(stop)) => {
            assert_eq!(stop.reason_phrase, "maintenance");
            assert!(!stop.safe_stop);
        }
        other => panic!("unexpected control payload: {:?}", other),
    }
}

#[test]
fn test_frame_decode_incomplete_header() {
    let result = Frame::decode_from_bytes(Bytes::from_static(&[0, 0, 0]));
    assert!(matches!(result, Err(FrameError::Truncated("header"))));
}

#[test]
fn test_frame_decode_incomplete_payload() {
    let mut data = Vec::new();
    data.extend_from_slice(&10u32.to_be_bytes());
    data.extend_from_slice(&(MessageType::Event as u16).to_be_bytes());
    data.extend_from_slice(&[1, 2, 3]);

    let result = Frame::decode_from_bytes(Bytes::from(data));
    assert!(matches!(result, Err(FrameError::Truncated("payload"))));
}

#[test]
fn test_frame_decode_invalid_message_type() {
    let mut data = Vec::new();
    data.extend_from_slice(&0u32.to_be_bytes());
    data.extend_from_slice(&99u16.to_be_bytes());

    let result = Frame::decode_from_bytes(Bytes::from(data));
    assert!(matches!(result, Err(FrameError::InvalidMessageType(99))));
}

#[test]
fn test_garbage_payload_fails_to_decode() {
    let frame = Frame {
        message_type: MessageType::Event,
        payload: Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]),
    };
    assert!(matches!(
        frame.decode::<DaemonEvent>(),
        Err(FrameError::Decode(_))
    ));
}

#[test]
fn test_max_frame_size_constant() {
    assert_eq!(MAX_FRAME_SIZE, 16 * 1024 * 1024);
}
