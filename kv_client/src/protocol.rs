//! The subset of the memcached binary protocol the harness speaks: GET, SET,
//! SASL PLAIN authentication and bucket selection.
//!
//! Every frame is a 24 byte big-endian header followed by extras, key and
//! value. Requests carry a caller-chosen `opaque` that the server echoes back,
//! which is how pipelined responses are matched to their requests.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use key_value::ErrorKind;
use thiserror::Error;

pub const HEADER_LEN: usize = 24;
pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;
pub const MAX_BODY_LEN: usize = 20 * 1024 * 1024;
pub const MAX_KEY_LEN: usize = 250;
pub const SET_EXTRAS_LEN: usize = 8;

pub const STATUS_SUCCESS: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    SaslAuth = 0x21,
    SelectBucket = 0x89,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid response magic: {0:#04x}")]
    BadMagic(u8),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed frame: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: u8,
    pub status: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Response {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        error_kind(self.status)
    }
}

/// Maps a response status to the error it reports, `None` for success.
pub fn error_kind(status: u16) -> Option<ErrorKind> {
    let kind = match status {
        STATUS_SUCCESS => return None,
        0x0001 => ErrorKind::NotFound,
        0x0002 => ErrorKind::Exists,
        0x0003 => ErrorKind::TooBig,
        0x0004 => ErrorKind::InvalidArguments,
        0x0005 => ErrorKind::NotStored,
        0x0007 => ErrorKind::NotMyVbucket,
        0x0020 => ErrorKind::AuthFailed,
        0x0081 => ErrorKind::UnknownCommand,
        0x0082 => ErrorKind::OutOfMemory,
        0x0083 => ErrorKind::NotSupported,
        0x0084 => ErrorKind::Internal,
        0x0085 => ErrorKind::Busy,
        0x0086 => ErrorKind::TemporaryFailure,
        other => ErrorKind::Unknown(other),
    };
    Some(kind)
}

fn encode_request(
    opcode: Opcode,
    opaque: u32,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> Bytes {
    let body_len = extras.len() + key.len() + value.len();
    let mut buffer = BytesMut::with_capacity(HEADER_LEN + body_len);
    buffer.put_u8(REQUEST_MAGIC);
    buffer.put_u8(opcode as u8);
    buffer.put_u16(key.len() as u16);
    buffer.put_u8(extras.len() as u8);
    buffer.put_u8(0); // raw bytes
    buffer.put_u16(0); // vbucket
    buffer.put_u32(body_len as u32);
    buffer.put_u32(opaque);
    buffer.put_u64(0); // cas
    buffer.put_slice(extras);
    buffer.put_slice(key);
    buffer.put_slice(value);
    buffer.freeze()
}

pub fn get_request(key: &str, opaque: u32) -> Bytes {
    encode_request(Opcode::Get, opaque, &[], key.as_bytes(), &[])
}

/// SET with zero flags and no expiry.
pub fn set_request(key: &str, value: &[u8], opaque: u32) -> Bytes {
    let extras = [0u8; SET_EXTRAS_LEN];
    encode_request(Opcode::Set, opaque, &extras, key.as_bytes(), value)
}

pub fn sasl_plain_request(username: &str, password: &str, opaque: u32) -> Bytes {
    let mut token = Vec::with_capacity(username.len() + password.len() + 2);
    token.push(0);
    token.extend_from_slice(username.as_bytes());
    token.push(0);
    token.extend_from_slice(password.as_bytes());
    encode_request(Opcode::SaslAuth, opaque, &[], b"PLAIN", &token)
}

pub fn select_bucket_request(bucket: &str, opaque: u32) -> Bytes {
    encode_request(Opcode::SelectBucket, opaque, &[], bucket.as_bytes(), &[])
}

/// Splits one complete response off the front of `src`.
///
/// Returns `Ok(None)` when `src` does not yet hold a whole frame; nothing is
/// consumed in that case.
pub fn decode_response(src: &mut BytesMut) -> Result<Option<Response>, ProtocolError> {
    if src.len() < HEADER_LEN {
        return Ok(None);
    }
    if src[0] != RESPONSE_MAGIC {
        return Err(ProtocolError::BadMagic(src[0]));
    }

    let key_len = u16::from_be_bytes([src[2], src[3]]) as usize;
    let extras_len = src[4] as usize;
    let body_len = u32::from_be_bytes([src[8], src[9], src[10], src[11]]) as usize;
    if body_len > MAX_BODY_LEN {
        return Err(ProtocolError::FrameTooLarge(body_len));
    }
    if key_len + extras_len > body_len {
        return Err(ProtocolError::Malformed("key and extras exceed body length"));
    }
    if src.len() < HEADER_LEN + body_len {
        src.reserve(HEADER_LEN + body_len - src.len());
        return Ok(None);
    }

    let mut header = src.split_to(HEADER_LEN);
    let _magic = header.get_u8();
    let opcode = header.get_u8();
    header.advance(4); // key length, extras length, data type
    let status = header.get_u16();
    header.advance(4); // body length
    let opaque = header.get_u32();
    let cas = header.get_u64();

    let mut body = src.split_to(body_len).freeze();
    let extras = body.split_to(extras_len);
    let key = body.split_to(key_len);

    Ok(Some(Response {
        opcode,
        status,
        opaque,
        cas,
        extras,
        key,
        value: body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_server::{decode_request, encode_response};

    #[test]
    fn test_get_request_layout() {
        let frame = get_request("k1", 7);
        assert_eq!(frame.len(), HEADER_LEN + 2);
        assert_eq!(frame[0], REQUEST_MAGIC);
        assert_eq!(frame[1], Opcode::Get as u8);
        assert_eq!(&frame[2..4], &[0, 2]);
        assert_eq!(frame[4], 0);
        assert_eq!(&frame[8..12], &[0, 0, 0, 2]);
        assert_eq!(&frame[12..16], &[0, 0, 0, 7]);
        assert_eq!(&frame[HEADER_LEN..], b"k1");
    }

    #[test]
    fn test_set_request_carries_extras_key_and_value() {
        let mut wire = BytesMut::from(&set_request("key", b"value", 42)[..]);
        let request = decode_request(&mut wire).unwrap().unwrap();
        assert_eq!(request.opcode, Opcode::Set as u8);
        assert_eq!(request.opaque, 42);
        assert_eq!(&request.extras[..], &[0u8; 8]);
        assert_eq!(&request.key[..], b"key");
        assert_eq!(&request.value[..], b"value");
        assert!(wire.is_empty());
    }

    #[test]
    fn test_sasl_plain_token() {
        let mut wire = BytesMut::from(&sasl_plain_request("user", "secret", 1)[..]);
        let request = decode_request(&mut wire).unwrap().unwrap();
        assert_eq!(request.opcode, Opcode::SaslAuth as u8);
        assert_eq!(&request.key[..], b"PLAIN");
        assert_eq!(&request.value[..], b"\0user\0secret");
    }

    #[test]
    fn test_partial_response_needs_more_bytes() {
        let frame = encode_response(Opcode::Get as u8, 0, 9, &[0, 0, 0, 0], b"payload");
        let mut wire = BytesMut::new();

        wire.extend_from_slice(&frame[..10]);
        assert_eq!(decode_response(&mut wire).unwrap(), None);
        wire.extend_from_slice(&frame[10..HEADER_LEN + 2]);
        assert_eq!(decode_response(&mut wire).unwrap(), None);
        assert_eq!(wire.len(), HEADER_LEN + 2);

        wire.extend_from_slice(&frame[HEADER_LEN + 2..]);
        let response = decode_response(&mut wire).unwrap().unwrap();
        assert_eq!(response.opaque, 9);
        assert_eq!(response.extras.len(), 4);
        assert_eq!(&response.value[..], b"payload");
        assert_eq!(response.error_kind(), None);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_pipelined_responses_decode_in_order() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_response(Opcode::Set as u8, 0, 2, &[], &[]));
        wire.extend_from_slice(&encode_response(Opcode::Get as u8, 1, 1, &[], b"Not found"));

        let first = decode_response(&mut wire).unwrap().unwrap();
        let second = decode_response(&mut wire).unwrap().unwrap();
        assert_eq!((first.opcode, first.opaque), (Opcode::Set as u8, 2));
        assert_eq!(second.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(decode_response(&mut wire).unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_magic_and_oversized_frames() {
        let mut wire = BytesMut::from(&get_request("k", 1)[..]);
        assert_eq!(
            decode_response(&mut wire),
            Err(ProtocolError::BadMagic(REQUEST_MAGIC))
        );

        let mut huge = BytesMut::from(&encode_response(0, 0, 0, &[], &[])[..]);
        huge[8..12].copy_from_slice(&((MAX_BODY_LEN + 1) as u32).to_be_bytes());
        assert_eq!(
            decode_response(&mut huge),
            Err(ProtocolError::FrameTooLarge(MAX_BODY_LEN + 1))
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(error_kind(0), None);
        assert_eq!(error_kind(0x0001), Some(ErrorKind::NotFound));
        assert_eq!(error_kind(0x0020), Some(ErrorKind::AuthFailed));
        assert_eq!(error_kind(0x0086), Some(ErrorKind::TemporaryFailure));
        assert_eq!(error_kind(0x00ff), Some(ErrorKind::Unknown(0x00ff)));
    }
}
