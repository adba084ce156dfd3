use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use key_value::{ErrorKind, Operation, OperationResult};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::{self, JoinHandle},
    time,
};
use tracing::{debug, warn};

use crate::{
    ClientOperations, Completions, client_builder::Credentials, error::ClientError, protocol,
};

const READ_CHUNK: usize = 16 * 1024;
const HANDSHAKE_OPAQUE: u32 = 0;

// Requests written but not yet answered, keyed by opaque.
#[derive(Debug, Default)]
struct InFlight {
    operations: HashMap<u32, Operation>,
    closed: bool,
}

impl InFlight {
    fn close(&mut self, completions: &Completions) -> usize {
        self.closed = true;
        let dropped = self.operations.len();
        for (_, operation) in self.operations.drain() {
            let _ = completions.send(OperationResult::failed(operation, ErrorKind::Disconnected));
        }
        dropped
    }
}

/// A pipelined connection to a memcached binary protocol endpoint.
///
/// Requests are queued to a writer task and answered by a reader task, both
/// spawned with `spawn_local`, so a connection must be opened from inside a
/// `tokio::task::LocalSet`. Every issued operation posts exactly one result on
/// the completion channel, including the ones cut short by a disconnect.
#[derive(Debug)]
pub struct MemcachedConnection {
    frames: UnboundedSender<Bytes>,
    in_flight: Rc<RefCell<InFlight>>,
    completions: Completions,
    next_opaque: Cell<u32>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl MemcachedConnection {
    pub async fn connect(
        address: &str,
        bucket: &str,
        credentials: Option<&Credentials>,
        connect_timeout: Duration,
        completions: Completions,
    ) -> Result<Self, ClientError> {
        let (stream, leftover) = time::timeout(
            connect_timeout,
            Self::establish(address, bucket, credentials),
        )
        .await
        .map_err(|_| ClientError::Timeout(address.to_string()))??;
        debug!(address, bucket, "connected");

        let (read_half, write_half) = stream.into_split();
        let in_flight = Rc::new(RefCell::new(InFlight::default()));
        let (frames, frame_receiver) = mpsc::unbounded_channel();

        let reader = task::spawn_local(read_loop(
            read_half,
            leftover,
            in_flight.clone(),
            completions.clone(),
        ));
        let writer = task::spawn_local(write_loop(
            write_half,
            frame_receiver,
            in_flight.clone(),
            completions.clone(),
        ));

        Ok(Self {
            frames,
            in_flight,
            completions,
            next_opaque: Cell::new(HANDSHAKE_OPAQUE + 1),
            reader,
            writer,
        })
    }

    async fn establish(
        address: &str,
        bucket: &str,
        credentials: Option<&Credentials>,
    ) -> Result<(TcpStream, BytesMut), ClientError> {
        let mut stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);

        // Without credentials the server's default bucket is used.
        if let Some(credentials) = credentials {
            let request = protocol::sasl_plain_request(
                &credentials.username,
                &credentials.password,
                HANDSHAKE_OPAQUE,
            );
            let response = round_trip(&mut stream, &mut buffer, request).await?;
            if let Some(kind) = response.error_kind() {
                return Err(ClientError::Authentication {
                    username: credentials.username.clone(),
                    kind,
                });
            }

            let request = protocol::select_bucket_request(bucket, HANDSHAKE_OPAQUE);
            let response = round_trip(&mut stream, &mut buffer, request).await?;
            if let Some(kind) = response.error_kind() {
                return Err(ClientError::BucketSelection {
                    bucket: bucket.to_string(),
                    kind,
                });
            }
        }

        Ok((stream, buffer))
    }

    fn issue(&self, operation: Operation, encode: impl FnOnce(u32) -> Bytes) {
        let mut in_flight = self.in_flight.borrow_mut();
        if in_flight.closed {
            let _ = self
                .completions
                .send(OperationResult::failed(operation, ErrorKind::Disconnected));
            return;
        }

        let opaque = self.next_opaque.get();
        self.next_opaque.set(opaque.wrapping_add(1));
        in_flight.operations.insert(opaque, operation);

        if self.frames.send(encode(opaque)).is_err() {
            in_flight.operations.remove(&opaque);
            let _ = self
                .completions
                .send(OperationResult::failed(operation, ErrorKind::Disconnected));
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.in_flight.borrow().operations.len()
    }
}

impl ClientOperations for MemcachedConnection {
    fn get(&self, key: &str) {
        self.issue(Operation::Get, |opaque| protocol::get_request(key, opaque));
    }

    fn set(&self, key: &str, value: &Bytes) {
        self.issue(Operation::Set, |opaque| {
            protocol::set_request(key, value, opaque)
        });
    }
}

impl Drop for MemcachedConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn round_trip(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    request: Bytes,
) -> Result<protocol::Response, ClientError> {
    stream.write_all(&request).await?;
    loop {
        if let Some(response) = protocol::decode_response(buffer)? {
            return Ok(response);
        }
        if stream.read_buf(buffer).await? == 0 {
            return Err(ClientError::HandshakeClosed);
        }
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    mut buffer: BytesMut,
    in_flight: Rc<RefCell<InFlight>>,
    completions: Completions,
) {
    loop {
        match protocol::decode_response(&mut buffer) {
            Ok(Some(response)) => {
                let operation = in_flight.borrow_mut().operations.remove(&response.opaque);
                match operation {
                    Some(operation) => {
                        let result = match response.error_kind() {
                            None => OperationResult::ok(operation),
                            Some(kind) => OperationResult::failed(operation, kind),
                        };
                        let _ = completions.send(result);
                    }
                    None => debug!(opaque = response.opaque, "response for unknown request"),
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "dropping connection after protocol error");
                break;
            }
        }

        buffer.reserve(READ_CHUNK);
        match reader.read_buf(&mut buffer).await {
            Ok(0) => {
                debug!("server closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "read failed");
                break;
            }
        }
    }

    let dropped = in_flight.borrow_mut().close(&completions);
    if dropped > 0 {
        warn!(dropped, "in-flight operations lost to disconnect");
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: UnboundedReceiver<Bytes>,
    in_flight: Rc<RefCell<InFlight>>,
    completions: Completions,
) {
    let mut batch = BytesMut::new();
    while let Some(frame) = frames.recv().await {
        // a whole tick's worth of requests usually lands in one write
        batch.extend_from_slice(&frame);
        while let Ok(next) = frames.try_recv() {
            batch.extend_from_slice(&next);
        }
        if let Err(e) = writer.write_all(&batch).await {
            warn!(error = %e, "write failed");
            break;
        }
        batch.clear();
    }

    in_flight.borrow_mut().close(&completions);
}
