//! Server side of the protocol subset plus a tiny in-memory server speaking
//! it, for exercising the client against a real socket.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::protocol::{
    HEADER_LEN, MAX_BODY_LEN, Opcode, ProtocolError, REQUEST_MAGIC, RESPONSE_MAGIC,
    STATUS_SUCCESS,
};

const STATUS_NOT_FOUND: u16 = 0x0001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: u8,
    pub opaque: u32,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

pub fn decode_request(src: &mut BytesMut) -> Result<Option<Request>, ProtocolError> {
    if src.len() < HEADER_LEN {
        return Ok(None);
    }
    if src[0] != REQUEST_MAGIC {
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
        return Ok(None);
    }

    let header = src.split_to(HEADER_LEN);
    let opcode = header[1];
    let opaque = u32::from_be_bytes([header[12], header[13], header[14], header[15]]);
    let mut body = src.split_to(body_len).freeze();
    let extras = body.split_to(extras_len);
    let key = body.split_to(key_len);
    Ok(Some(Request {
        opcode,
        opaque,
        extras,
        key,
        value: body,
    }))
}

pub fn encode_response(opcode: u8, status: u16, opaque: u32, extras: &[u8], value: &[u8]) -> Bytes {
    let mut buffer = BytesMut::with_capacity(HEADER_LEN + extras.len() + value.len());
    put_response(&mut buffer, opcode, status, opaque, extras, value);
    buffer.freeze()
}

fn put_response(
    dst: &mut BytesMut,
    opcode: u8,
    status: u16,
    opaque: u32,
    extras: &[u8],
    value: &[u8],
) {
    dst.put_u8(RESPONSE_MAGIC);
    dst.put_u8(opcode);
    dst.put_u16(0);
    dst.put_u8(extras.len() as u8);
    dst.put_u8(0);
    dst.put_u16(status);
    dst.put_u32((extras.len() + value.len()) as u32);
    dst.put_u32(opaque);
    dst.put_u64(0);
    dst.put_slice(extras);
    dst.put_slice(value);
}

#[derive(Debug, Default)]
struct Shared {
    data: Mutex<HashMap<Bytes, Bytes>>,
    requests: AtomicU64,
}

/// Accepts any number of connections on an ephemeral localhost port. GETs
/// of unknown keys answer "not found"; SASL answers with `auth_status`.
#[derive(Debug)]
pub struct MockServer {
    address: SocketAddr,
    shared: Arc<Shared>,
    accept_loop: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> io::Result<Self> {
        Self::with_auth_status(STATUS_SUCCESS).await
    }

    pub async fn with_auth_status(auth_status: u16) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let shared = Arc::new(Shared::default());

        let accept_shared = shared.clone();
        let accept_loop = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, accept_shared.clone(), auth_status));
            }
        });

        Ok(Self {
            address,
            shared,
            accept_loop,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// GET and SET requests answered so far, across all connections.
    pub fn requests(&self) -> u64 {
        self.shared.requests.load(Ordering::Relaxed)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(mut socket: TcpStream, shared: Arc<Shared>, auth_status: u16) {
    let mut buffer = BytesMut::with_capacity(16 * 1024);
    let mut replies = BytesMut::new();
    loop {
        loop {
            let request = match decode_request(&mut buffer) {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(_) => return,
            };
            answer(&request, &shared, auth_status, &mut replies);
        }
        if !replies.is_empty() {
            if socket.write_all(&replies).await.is_err() {
                return;
            }
            replies.clear();
        }
        match socket.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn answer(request: &Request, shared: &Shared, auth_status: u16, replies: &mut BytesMut) {
    let opaque = request.opaque;
    match request.opcode {
        op if op == Opcode::Get as u8 => {
            shared.requests.fetch_add(1, Ordering::Relaxed);
            let value = shared.data.lock().unwrap_or_else(PoisonError::into_inner).get(&request.key).cloned();
            match value {
                Some(value) => put_response(replies, op, STATUS_SUCCESS, opaque, &[0; 4], &value),
                None => put_response(replies, op, STATUS_NOT_FOUND, opaque, &[], b"Not found"),
            }
        }
        op if op == Opcode::Set as u8 => {
            shared.requests.fetch_add(1, Ordering::Relaxed);
            shared
                .data
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(request.key.clone(), request.value.clone());
            put_response(replies, op, STATUS_SUCCESS, opaque, &[], &[]);
        }
        op if op == Opcode::SaslAuth as u8 => {
            put_response(replies, op, auth_status, opaque, &[], &[]);
        }
        op => put_response(replies, op, STATUS_SUCCESS, opaque, &[], &[]),
    }
}
