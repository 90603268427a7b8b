//! Codec Tests
//!
//! Tests for memcached binary request and response encoding/decoding.

use std::io::Cursor;

use vbucketd::protocol::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, Command, Opcode, Request, Response, Status,
    HEADER_SIZE, MAX_BODY_SIZE, REQUEST_MAGIC, RESPONSE_MAGIC,
};
use vbucketd::BucketError;

// =============================================================================
// Helper Functions
// =============================================================================

/// Hand-built request frame
fn raw_request(opcode: u8, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<u8> {
    let body_len = (extras.len() + key.len() + value.len()) as u32;
    let mut frame = vec![REQUEST_MAGIC, opcode];
    frame.extend_from_slice(&(key.len() as u16).to_be_bytes());
    frame.push(extras.len() as u8);
    frame.push(0);
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&body_len.to_be_bytes());
    frame.extend_from_slice(&0u32.to_be_bytes());
    frame.extend_from_slice(&0u64.to_be_bytes());
    frame.extend_from_slice(extras);
    frame.extend_from_slice(key);
    frame.extend_from_slice(value);
    frame
}

fn round_trip(request: &Request) -> Request {
    decode_request(&encode_request(request)).unwrap()
}

// =============================================================================
// Request Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_get() {
    let request = Request::new(Command::Get {
        key: b"hello".to_vec(),
    })
    .with_vbucket(42)
    .with_opaque(0xdeadbeef);

    let decoded = round_trip(&request);
    assert_eq!(decoded, request);
    assert_eq!(decoded.vbucket, 42);
    assert_eq!(decoded.opaque, 0xdeadbeef);
}

#[test]
fn test_encode_decode_set() {
    let request = Request::new(Command::Set {
        key: b"mykey".to_vec(),
        value: b"myvalue".to_vec(),
        flags: 0x0102_0304,
        expiration: 60,
    })
    .with_vbucket(1023)
    .with_cas(77);

    match round_trip(&request) {
        Request {
            vbucket: 1023,
            cas: 77,
            command:
                Command::Set {
                    key,
                    value,
                    flags,
                    expiration,
                },
            ..
        } => {
            assert_eq!(key, b"mykey");
            assert_eq!(value, b"myvalue");
            assert_eq!(flags, 0x0102_0304);
            assert_eq!(expiration, 60);
        }
        other => panic!("Expected SET request, got {other:?}"),
    }
}

#[test]
fn test_encode_decode_set_empty_value() {
    let request = Request::new(Command::Set {
        key: b"k".to_vec(),
        value: Vec::new(),
        flags: 0,
        expiration: 0,
    });
    assert_eq!(round_trip(&request), request);
}

#[test]
fn test_encode_decode_binary_data() {
    let key: Vec<u8> = (0..=255).collect();
    let request = Request::new(Command::Set {
        key: key.clone(),
        value: vec![0x00, 0xff, 0x80, 0x81],
        flags: u32::MAX,
        expiration: 0,
    });
    assert_eq!(round_trip(&request), request);
}

#[test]
fn test_encode_decode_simple_commands() {
    for command in [Command::Quit, Command::Noop, Command::Version] {
        let request = Request::new(command);
        assert_eq!(round_trip(&request), request);
    }

    let delete = Request::new(Command::Delete {
        key: b"gone".to_vec(),
    });
    assert_eq!(round_trip(&delete), delete);

    let select = Request::new(Command::SelectBucket {
        name: "default".to_string(),
    });
    assert_eq!(round_trip(&select), select);
}

// =============================================================================
// Malformed Request Tests
// =============================================================================

#[test]
fn test_unknown_opcode_decodes() {
    let frame = raw_request(0x42, &[], b"k", &[]);
    let decoded = decode_request(&frame).unwrap();
    assert_eq!(decoded.command, Command::Unknown { opcode: 0x42 });
    assert_eq!(decoded.command.opcode(), 0x42);
}

#[test]
fn test_set_without_extras_is_invalid() {
    let frame = raw_request(Opcode::Set as u8, &[], b"k", b"v");
    match decode_request(&frame).unwrap().command {
        Command::Invalid { opcode, .. } => assert_eq!(opcode, Opcode::Set as u8),
        other => panic!("Expected invalid command, got {other:?}"),
    }
}

#[test]
fn test_get_without_key_is_invalid() {
    let frame = raw_request(Opcode::Get as u8, &[], &[], &[]);
    assert!(matches!(
        decode_request(&frame).unwrap().command,
        Command::Invalid { .. }
    ));
}

#[test]
fn test_noop_with_body_is_invalid() {
    let frame = raw_request(Opcode::Noop as u8, &[], &[], b"junk");
    assert!(matches!(
        decode_request(&frame).unwrap().command,
        Command::Invalid { .. }
    ));
}

#[test]
fn test_select_bucket_requires_utf8_name() {
    let frame = raw_request(Opcode::SelectBucket as u8, &[], &[0xff, 0xfe], &[]);
    assert!(matches!(
        decode_request(&frame).unwrap().command,
        Command::Invalid { .. }
    ));
}

#[test]
fn test_bad_magic() {
    let mut frame = raw_request(Opcode::Noop as u8, &[], &[], &[]);
    frame[0] = 0x42;
    assert!(matches!(
        decode_request(&frame).unwrap_err(),
        BucketError::Protocol(_)
    ));

    // A request is not a response
    let frame = raw_request(Opcode::Noop as u8, &[], &[], &[]);
    assert!(decode_response(&frame).is_err());
}

#[test]
fn test_incomplete_header() {
    let frame = raw_request(Opcode::Noop as u8, &[], &[], &[]);
    assert!(decode_request(&frame[..HEADER_SIZE - 1]).is_err());
    assert!(decode_request(&[]).is_err());
}

#[test]
fn test_incomplete_body() {
    let frame = raw_request(Opcode::Get as u8, &[], b"hello", &[]);
    assert!(decode_request(&frame[..frame.len() - 1]).is_err());
}

#[test]
fn test_body_too_large() {
    let mut frame = raw_request(Opcode::Get as u8, &[], b"k", &[]);
    frame[8..12].copy_from_slice(&(MAX_BODY_SIZE + 1).to_be_bytes());
    assert!(matches!(
        decode_request(&frame).unwrap_err(),
        BucketError::Protocol(_)
    ));
}

#[test]
fn test_key_longer_than_body() {
    let mut frame = raw_request(Opcode::Get as u8, &[], b"k", &[]);
    frame[2..4].copy_from_slice(&10u16.to_be_bytes());
    assert!(decode_request(&frame).is_err());
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_encode_decode_response_with_value() {
    let response = Response::success(Opcode::Get as u8)
        .with_opaque(9)
        .with_cas(1234)
        .with_flags(5)
        .with_value(b"payload".to_vec());

    let decoded = decode_response(&encode_response(&response)).unwrap();
    assert_eq!(decoded, response);
    assert_eq!(decoded.flags(), Some(5));
    assert!(decoded.is_success());
}

#[test]
fn test_encode_decode_error_response() {
    let response = Response::error(Opcode::Get as u8, Status::NotMyVbucket, "not my vbucket");
    let decoded = decode_response(&encode_response(&response)).unwrap();
    assert_eq!(decoded.status, Status::NotMyVbucket);
    assert_eq!(decoded.value, b"not my vbucket");
    assert_eq!(decoded.flags(), None);
    assert!(!decoded.is_success());
}

#[test]
fn test_unknown_response_status() {
    let mut frame = encode_response(&Response::success(Opcode::Noop as u8));
    frame[6..8].copy_from_slice(&0x7777u16.to_be_bytes());
    assert!(decode_response(&frame).is_err());
}

#[test]
fn test_status_codes() {
    for status in [
        Status::Success,
        Status::KeyNotFound,
        Status::KeyExists,
        Status::InvalidArguments,
        Status::NotMyVbucket,
        Status::NoBucket,
        Status::UnknownCommand,
        Status::InternalError,
    ] {
        assert_eq!(Status::from_u16(status as u16), Some(status));
    }
    assert_eq!(Status::NotMyVbucket as u16, 0x0007);
    assert_eq!(Status::from_u16(0x0003), None);
}

// =============================================================================
// Stream Tests
// =============================================================================

#[test]
fn test_stream_multiple_requests() {
    let requests = vec![
        Request::new(Command::Noop),
        Request::new(Command::Get {
            key: b"a".to_vec(),
        })
        .with_vbucket(3),
        Request::new(Command::Quit),
    ];

    let mut buf = Vec::new();
    for request in &requests {
        write_request(&mut buf, request).unwrap();
    }

    let mut cursor = Cursor::new(buf);
    for expected in &requests {
        assert_eq!(&read_request(&mut cursor).unwrap(), expected);
    }
    assert!(matches!(
        read_request(&mut cursor).unwrap_err(),
        BucketError::Io(_)
    ));
}

#[test]
fn test_stream_write_read_response() {
    let response = Response::success(Opcode::Version as u8).with_value(b"1.0.0".to_vec());

    let mut buf = Vec::new();
    write_response(&mut buf, &response).unwrap();
    let decoded = read_response(&mut Cursor::new(buf)).unwrap();
    assert_eq!(decoded, response);
}

// =============================================================================
// Wire Format Tests
// =============================================================================

#[test]
fn test_wire_format_get() {
    let request = Request::new(Command::Get {
        key: b"ab".to_vec(),
    })
    .with_vbucket(0x0102);
    let encoded = encode_request(&request);

    assert_eq!(encoded.len(), HEADER_SIZE + 2);
    assert_eq!(encoded[0], REQUEST_MAGIC);
    assert_eq!(encoded[1], 0x00);
    assert_eq!(&encoded[2..4], &[0x00, 0x02]);
    assert_eq!(encoded[4], 0);
    assert_eq!(&encoded[6..8], &[0x01, 0x02]);
    assert_eq!(&encoded[8..12], &[0, 0, 0, 2]);
    assert_eq!(&encoded[HEADER_SIZE..], b"ab");
}

#[test]
fn test_wire_format_set_extras() {
    let request = Request::new(Command::Set {
        key: b"k".to_vec(),
        value: b"v".to_vec(),
        flags: 1,
        expiration: 2,
    });
    let encoded = encode_request(&request);

    assert_eq!(encoded[4], 8);
    assert_eq!(&encoded[8..12], &[0, 0, 0, 10]);
    assert_eq!(&encoded[HEADER_SIZE..HEADER_SIZE + 8], &[0, 0, 0, 1, 0, 0, 0, 2]);
}

#[test]
fn test_wire_format_response_status() {
    let response = Response::error(Opcode::Set as u8, Status::KeyExists, "");
    let encoded = encode_response(&response);

    assert_eq!(encoded.len(), HEADER_SIZE);
    assert_eq!(encoded[0], RESPONSE_MAGIC);
    assert_eq!(encoded[1], Opcode::Set as u8);
    assert_eq!(&encoded[6..8], &[0x00, 0x02]);
}
