//! Blocking local-network session with a vacuum.
//!
//! - One TCP connection per session, opened lazily on the first request.
//! - Every wait is bounded by a deadline enforced through socket read timeouts.
//! - The stream is shut down by `disconnect` and, failing that, on drop.

use log::{debug, info, warn};
use rand::Rng;
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::local::error::LocalError;
use crate::local::protocol::{
    LocalCodec, LocalProtocolVersion, MessageProtocol, RoborockMessage, decode_rpc_response, encode_rpc_request,
};
use crate::models::roborock::{DeviceIdentity, RoomMapping};
use crate::utils::{json_scalar_to_string, unix_timestamp};

pub const GET_ROOM_MAPPING: &str = "get_room_mapping";

/// The device operations the lookup consumes.
pub trait DeviceClient {
    fn get_room_mapping(&mut self) -> Result<Vec<RoomMapping>, LocalError>;
    /// Releases the connection. Safe to call when nothing is connected.
    fn disconnect(&mut self) -> Result<(), LocalError>;
}

#[derive(Debug, Clone)]
pub struct LocalOptions {
    pub port: u16,
    /// Bound on every handshake and request/response exchange.
    pub queue_timeout: Duration,
    /// Forced protocol version; `None` tries 1.0 then L01.
    pub protocol: Option<LocalProtocolVersion>,
}

/// Monotonic sequence numbers and random nonces for outgoing frames.
#[derive(Debug)]
struct Counters {
    seq: u32,
}

impl Counters {
    fn new() -> Self {
        Counters {
            seq: rand::rng().random_range(100_000..=999_999),
        }
    }

    fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }

    fn nonce(&self) -> u32 {
        rand::rng().random_range(10_000..=99_999)
    }

    fn request_id(&self) -> u32 {
        rand::rng().random_range(10_000..=32_767)
    }
}

pub struct LocalConnection {
    stream: TcpStream,
    codec: LocalCodec,
    version: LocalProtocolVersion,
    buffer: Vec<u8>,
    pending: VecDeque<RoborockMessage>,
    timeout: Duration,
}

impl LocalConnection {
    /// Connects and performs the hello exchange for `version`.
    pub fn open(
        addr: SocketAddr,
        local_key: &str,
        version: LocalProtocolVersion,
        hello_seq: u32,
        connect_nonce: u32,
        timeout: Duration,
    ) -> Result<Self, LocalError> {
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| io_error(e, timeout))?;
        stream.set_nodelay(true)?;

        let mut connection = LocalConnection {
            stream,
            codec: LocalCodec::new(local_key, connect_nonce),
            version,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            timeout,
        };

        let ack_nonce = connection.hello(hello_seq)?;
        connection.codec = connection.codec.clone().with_ack_nonce(ack_nonce);
        Ok(connection)
    }

    pub fn version(&self) -> LocalProtocolVersion {
        self.version
    }

    fn hello(&mut self, seq: u32) -> Result<u32, LocalError> {
        let message = RoborockMessage::new(
            self.version,
            MessageProtocol::HelloRequest,
            seq,
            self.codec.connect_nonce(),
            None,
        );
        debug!("hello send: version={}, seq={}", self.version.name(), seq);
        self.send(&message)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let response = self.next_message(deadline)?;
            if response.protocol == MessageProtocol::HelloResponse && response.seq == seq {
                debug!("hello ok: version={}, ack_nonce={}", self.version.name(), response.random);
                return Ok(response.random);
            }
            debug!("hello skip: protocol={:?}, seq={}", response.protocol, response.seq);
        }
    }

    /// Sends one RPC and waits for the response carrying the same id.
    pub fn send_rpc(
        &mut self,
        request_id: u32,
        seq: u32,
        random: u32,
        method: &str,
        params: Value,
    ) -> Result<Value, LocalError> {
        let payload = encode_rpc_request(request_id, method, &params, unix_timestamp())?;
        let message = RoborockMessage::new(self.version, MessageProtocol::GeneralRequest, seq, random, Some(payload));
        debug!("rpc send: method={}, request_id={}", method, request_id);
        self.send(&message)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let response = self.next_message(deadline)?;
            if !matches!(
                response.protocol,
                MessageProtocol::GeneralRequest | MessageProtocol::GeneralResponse | MessageProtocol::RpcResponse
            ) {
                debug!("rpc skip: protocol={:?}", response.protocol);
                continue;
            }
            let Some(payload) = response.payload else {
                continue;
            };
            let rpc = match decode_rpc_response(&payload) {
                Ok(rpc) => rpc,
                Err(e) => {
                    // status pushes share the general protocol but carry other data points
                    debug!("rpc skip: {}", e);
                    continue;
                }
            };
            if rpc.id != Some(request_id) {
                debug!("rpc ignore: response_id={:?}, request_id={}", rpc.id, request_id);
                continue;
            }
            if let Some(error) = rpc.error {
                return Err(LocalError::Device(error));
            }
            return Ok(rpc.result);
        }
    }

    fn send(&mut self, message: &RoborockMessage) -> Result<(), LocalError> {
        let frame = self.codec.encode(message)?;
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn next_message(&mut self, deadline: Instant) -> Result<RoborockMessage, LocalError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LocalError::Timeout(self.timeout));
            }
            self.stream.set_read_timeout(Some(remaining))?;

            let mut chunk = [0u8; 1024];
            let read = self.stream.read(&mut chunk).map_err(|e| io_error(e, self.timeout))?;
            if read == 0 {
                return Err(LocalError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            let mut decoded = self.codec.decode(&mut self.buffer)?.into_iter();
            if let Some(first) = decoded.next() {
                self.pending.extend(decoded);
                return Ok(first);
            }
        }
    }

    pub fn close(self) -> Result<(), LocalError> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn io_error(err: std::io::Error, timeout: Duration) -> LocalError {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => LocalError::Timeout(timeout),
        _ => LocalError::Io(err),
    }
}

/// Decodes `[[segment_id, iot_id, ...], ...]`. Anything that is not a list yields no entries.
pub fn room_mapping_from_result(result: &Value) -> Vec<RoomMapping> {
    let Some(entries) = result.as_array() else {
        debug!("room mapping result is not a list: {}", result);
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let fields = entry.as_array()?;
            let segment_id = fields.first()?.as_i64()?;
            let iot_id = json_scalar_to_string(fields.get(1)?)?;
            Some(RoomMapping { segment_id, iot_id })
        })
        .collect()
}

/// Local client for one vacuum.
pub struct LocalClient {
    identity: DeviceIdentity,
    options: LocalOptions,
    connection: Option<LocalConnection>,
    counters: Counters,
}

impl LocalClient {
    pub fn new(identity: DeviceIdentity, options: LocalOptions) -> Self {
        LocalClient {
            identity,
            options,
            connection: None,
            counters: Counters::new(),
        }
    }

    fn connected(&mut self) -> Result<&mut LocalConnection, LocalError> {
        if self.connection.is_none() {
            let connection = self.connect()?;
            info!(
                "connected to {} ({}, duid={}) with protocol {}",
                self.identity.name,
                self.identity.model,
                self.identity.duid,
                connection.version().name()
            );
            self.connection = Some(connection);
        }
        match self.connection.as_mut() {
            Some(c) => Ok(c),
            None => Err(LocalError::ConnectionClosed),
        }
    }

    fn connect(&mut self) -> Result<LocalConnection, LocalError> {
        let addr = SocketAddr::from((self.identity.host, self.options.port));
        let versions: Vec<LocalProtocolVersion> = match self.options.protocol {
            Some(v) => vec![v],
            None => LocalProtocolVersion::ALL.to_vec(),
        };

        let mut failures = Vec::new();
        for version in versions {
            let seq = self.counters.next_seq();
            let nonce = self.counters.request_id();
            match LocalConnection::open(addr, &self.identity.local_key, version, seq, nonce, self.options.queue_timeout) {
                Ok(c) => return Ok(c),
                Err(e) if self.options.protocol.is_none() => {
                    warn!("hello with protocol {} failed: {}", version.name(), e);
                    failures.push(format!("{}: {}", version.name(), e));
                }
                Err(e) => return Err(e),
            }
        }
        Err(LocalError::Handshake(failures.join("; ")))
    }
}

impl DeviceClient for LocalClient {
    fn get_room_mapping(&mut self) -> Result<Vec<RoomMapping>, LocalError> {
        let request_id = self.counters.request_id();
        let seq = self.counters.next_seq();
        let random = self.counters.nonce();
        let result = self
            .connected()?
            .send_rpc(request_id, seq, random, GET_ROOM_MAPPING, Value::Array(Vec::new()))?;
        Ok(room_mapping_from_result(&result))
    }

    fn disconnect(&mut self) -> Result<(), LocalError> {
        match self.connection.take() {
            Some(c) => {
                debug!("closing connection to {}", self.identity.host);
                c.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            debug!("close on drop failed: {}", e);
        }
    }
}
