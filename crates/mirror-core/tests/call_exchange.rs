//! Integration tests for the mirror-core protocol.
//!
//! These tests replay the frames of complete call exchanges through the
//! public API, the way a transport reads them from a socket: concatenated in
//! one buffer and decoded one after another.

use mirror_core::protocol::{
    codec::{decode_frame, encode_frame, DecodeLimits, Frame, FrameKind},
    messages::{ConnectionMetadata, ImageFormat, ImageMessage, RpcRequest, RpcResponse, VmRunState, RunState},
    sequence::SequenceCounter,
    status::{RpcStatus, StatusCode},
};
use mirror_core::domain::display::{Rotation, Size};
use mirror_core::domain::layout::{best_layout, PanelLayout};

fn decode_all(bytes: &[u8], limits: &DecodeLimits) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut cursor = 0;
    while cursor < bytes.len() {
        let (frame, used) = decode_frame(&bytes[cursor..], limits).expect("frame must decode");
        cursor += used;
        frames.push(frame);
    }
    frames
}

#[test]
fn test_streaming_call_exchange_decodes_in_order() {
    // Arrange: metadata, a stream request, two images and the end of stream.
    let ids = SequenceCounter::new();
    let call_id = ids.next();
    let format = ImageFormat { width: 2, height: 1, rotation: Rotation::Deg90, ..Default::default() };
    let mut wire = Vec::new();
    let metadata = ConnectionMetadata {
        authorization: Some("Bearer secret".to_string()),
        max_inbound_message_size: 2 * 3 + 100,
        compression_enabled: false,
    };
    wire.extend(encode_frame(&Frame::metadata(&metadata).unwrap()));
    wire.extend(encode_frame(&Frame::request(call_id, &RpcRequest::StreamScreenshot(format.clone())).unwrap()));
    for seq in 0..2 {
        let image = ImageMessage { format: format.clone(), image: vec![seq as u8; 6], seq, timestamp_us: 0 };
        wire.extend(encode_frame(&Frame::stream_item(call_id, &RpcResponse::Image(image)).unwrap()));
    }
    wire.extend(encode_frame(&Frame::stream_end(call_id)));

    // Act
    let frames = decode_all(&wire, &DecodeLimits::default());

    // Assert
    let kinds: Vec<FrameKind> = frames.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![FrameKind::Metadata, FrameKind::Request, FrameKind::StreamItem, FrameKind::StreamItem, FrameKind::StreamEnd]
    );
    assert_eq!(frames[0].decode_payload::<ConnectionMetadata>().unwrap(), metadata);
    assert!(frames[1..].iter().all(|f| f.call_id == call_id));
    match frames[3].decode_payload::<RpcResponse>().unwrap() {
        RpcResponse::Image(image) => {
            assert_eq!(image.seq, 1);
            assert_eq!(image.format.rotation, Rotation::Deg90);
        }
        other => panic!("unexpected stream item {other:?}"),
    }
}

#[test]
fn test_failed_unary_call_carries_status() {
    // Arrange
    let mut wire = encode_frame(&Frame::request(7, &RpcRequest::SetVmState(VmRunState { state: RunState::Shutdown })).unwrap());
    wire.extend(encode_frame(&Frame::status(7, &RpcStatus::unavailable("device is gone")).unwrap()));

    // Act
    let frames = decode_all(&wire, &DecodeLimits::default());

    // Assert
    let status: RpcStatus = frames[1].decode_payload().unwrap();
    assert_eq!(status.code, StatusCode::Unavailable);
    assert_eq!(status.message, "device is gone");
}

#[test]
fn test_optimized_layout_persists_as_panel_json() {
    // Arrange: a phone beside a landscape tablet.
    let node = best_layout(Size::new(3000, 2400), &[Size::new(1080, 2340), Size::new(1920, 1200)]).unwrap();

    // Act
    let json = PanelLayout::from_layout_node(&node, &[0, 2]).unwrap().to_json().unwrap();
    let restored = PanelLayout::from_json(&json).unwrap();

    // Assert
    assert_eq!(restored.display_ids(), vec![0, 2]);
}
