//! Unit tests for the detector protocol.

use super::*;
use crate::error::DetectorError;
use crate::testing::{DeviceState, fail, ok_i32, tag, update_client_reply};
use crate::transport::Port;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Client connection whose peer has already written `reply` and closed.
async fn replying(reply: &[u8]) -> (Connection<DuplexStream>, DuplexStream) {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    server.write_all(reply).await.unwrap();
    server.shutdown().await.unwrap();
    (Connection::new(client, Port::Control), server)
}

#[test]
fn test_pack_then_decode_layout() {
    let mut body = Vec::new();
    pack(
        &[
            Arg::Str { value: "10.0.0.7", width: 16 },
            Arg::I32(-17),
            Arg::I64(1 << 40),
        ],
        &mut body,
    );
    assert_eq!(body.len(), 28);

    let layout = [FieldKind::Str(16), FieldKind::I32, FieldKind::I64];
    let fields = decode(&layout, &body).unwrap();
    assert_eq!(fields.str(0).unwrap(), "10.0.0.7");
    assert_eq!(fields.i32(1).unwrap(), -17);
    assert_eq!(fields.i64(2).unwrap(), 1 << 40);
}

#[test]
fn test_decode_wrong_length_is_error() {
    let result = decode(&[FieldKind::I32, FieldKind::I64], &[0u8; 11]);
    assert!(matches!(result, Err(DetectorError::Decode(_))));
}

#[test]
fn test_encode_request_layout() {
    let packet = encode(CommandCode::Timer, &[Arg::I32(TimerType::NbFrames.as_i32()), Arg::I64(-1)]);
    assert_eq!(packet.len(), 16);
    assert_eq!(&packet[0..4], &37i32.to_le_bytes());
    assert_eq!(&packet[4..8], &TimerType::NbFrames.as_i32().to_le_bytes());
    assert_eq!(&packet[8..16], &(-1i64).to_le_bytes());
}

#[test]
fn test_field_type_mismatch_is_decode_error() {
    let fields = decode(&[FieldKind::I32], &7i32.to_le_bytes()).unwrap();
    assert!(matches!(fields.i64(0), Err(DetectorError::Decode(_))));
    assert!(matches!(fields.i32(1), Err(DetectorError::Decode(_))));
}

#[test]
fn test_timing_mode_names() {
    assert_eq!(TimingMode::from_name("trigger"), Some(TimingMode::TriggerExposure));
    assert_eq!(TimingMode::TriggerExposure.name(), "trigger");
    assert_eq!(TimingMode::from_name("sometimes"), None);
}

#[tokio::test]
async fn test_fail_reply_skips_layout() {
    let mut reply = fail("no such module");
    reply.extend_from_slice(b"NEXT");
    let (mut conn, _server) = replying(&reply).await;

    let layout = [FieldKind::I64, FieldKind::I64];
    let reply = conn.exchange(CommandCode::Timer, &[], &layout).await.unwrap();
    assert_eq!(reply, Reply::Fail("no such module".to_string()));

    // Bytes after the message are still on the wire.
    assert_eq!(conn.read_bytes(4).await.unwrap(), b"NEXT");
}

#[tokio::test]
async fn test_fail_reply_becomes_protocol_error() {
    let (mut conn, _server) = replying(&fail("detector busy")).await;
    let result = conn.send_request(CommandCode::DynamicRange, &[Arg::I32(GET_CODE)], &[FieldKind::I32]).await;
    match result {
        Err(DetectorError::Protocol(message)) => assert_eq!(message, "detector busy"),
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_fail_message_ends_at_eof() {
    let mut reply = tag(ResultType::Fail);
    reply.extend_from_slice(b"cut short");
    let (mut conn, _server) = replying(&reply).await;

    let reply = conn.exchange(CommandCode::Settings, &[], &[FieldKind::I32]).await.unwrap();
    assert_eq!(reply, Reply::Fail("cut short".to_string()));
}

#[tokio::test]
async fn test_fail_message_is_bounded() {
    let mut reply = tag(ResultType::Fail);
    reply.extend(std::iter::repeat_n(b'x', MAX_MESSAGE_LEN + 10));
    let (mut conn, _server) = replying(&reply).await;

    match conn.exchange(CommandCode::Settings, &[], &[]).await.unwrap() {
        Reply::Fail(message) => assert_eq!(message.len(), MAX_MESSAGE_LEN),
        other => panic!("expected FAIL, got {other:?}"),
    }
    assert_eq!(conn.read_bytes(10).await.unwrap(), vec![b'x'; 10]);
}

#[tokio::test]
async fn test_short_reply_is_connection_error() {
    let mut reply = tag(ResultType::Ok);
    reply.extend_from_slice(&[0x01, 0x02]);
    let (mut conn, _server) = replying(&reply).await;

    let result = conn.exchange(CommandCode::NbModules, &[], &[FieldKind::I32]).await;
    assert!(matches!(result, Err(DetectorError::Connection(_))));
}

#[tokio::test]
async fn test_unknown_result_tag_is_protocol_error() {
    let (mut conn, _server) = replying(&99i32.to_le_bytes()).await;
    let result = conn.exchange(CommandCode::RunStatus, &[], &[FieldKind::I32]).await;
    assert!(matches!(result, Err(DetectorError::Protocol(_))));
}

#[tokio::test]
async fn test_request_written_before_reply_read() {
    let (conn, mut server) = replying(&ok_i32(16)).await;
    let mut ctrl = ControlChannel(conn);

    let tagged = ctrl.dynamic_range(GET_CODE).await.unwrap();
    assert_eq!(tagged.result, ResultType::Ok);
    assert_eq!(tagged.value, 16);

    drop(ctrl);
    let mut sent = Vec::new();
    server.read_to_end(&mut sent).await.unwrap();
    assert_eq!(sent, encode(CommandCode::DynamicRange, &[Arg::I32(GET_CODE)]));
}

#[tokio::test]
async fn test_update_client_parses_info() {
    let state = DeviceState {
        dynamic_range: 32,
        data_bytes: 5120,
        nb_frames: 10,
        nb_cycles: 3,
    };
    let (conn, _server) = replying(&update_client_reply(ResultType::ForceUpdate, &state)).await;
    let mut ctrl = ControlChannel(conn);

    let tagged = ctrl.update_client().await.unwrap();
    assert_eq!(tagged.result, ResultType::ForceUpdate);
    let info = tagged.value;
    assert_eq!(info.last_client_ip, "127.0.0.1");
    assert_eq!(info.dynamic_range, 32);
    assert_eq!(info.data_bytes, 5120);
    assert_eq!(info.nb_frames, 10);
    assert_eq!(info.nb_cycles, 3);
    assert_eq!(info.total_frames(), 30);
    assert_eq!(info.exposure_time, std::time::Duration::from_millis(1));
}

#[tokio::test]
async fn test_stop_reply_is_tag_only() {
    let (client, mut server) = tokio::io::duplex(1024);
    server.write_all(&tag(ResultType::Ok)).await.unwrap();
    server.write_all(b"extra").await.unwrap();
    let mut stop = StopChannel::from_stream(client);

    let tagged = stop.stop_acquisition().await.unwrap();
    assert_eq!(tagged.result, ResultType::Ok);
    assert_eq!(stop.0.read_bytes(5).await.unwrap(), b"extra");
}

#[tokio::test]
async fn test_run_status_on_stop_port() {
    let (client, mut server) = tokio::io::duplex(1024);
    server.write_all(&ok_i32(RunStatus::Running.as_i32())).await.unwrap();
    let mut stop = StopChannel::from_stream(client);

    assert_eq!(stop.run_status().await.unwrap().value, RunStatus::Running);
}
