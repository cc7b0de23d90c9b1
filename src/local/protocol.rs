//! Framing and payload encryption of the Roborock local TCP protocol.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! u32 length | version[3] | seq u32 | random u32 | timestamp u32 | protocol u16
//!            | [ payload_len u16 | payload ] | crc32 u32
//! ```
//!
//! The CRC covers everything after the length prefix. Payloads are encrypted with a key
//! derived from the device local key and the frame timestamp:
//! - `1.0`: AES-128-ECB, PKCS7, key `md5(encode_ts(ts) + local_key + SALT)`.
//! - `L01`: AES-256-GCM, key `sha256(encode_ts(ts) + local_key + SALT)`, IV and AAD bound
//!   to the frame header and the nonces exchanged in the hello.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use crc32fast::Hasher as Crc32;
use log::{debug, warn};
use md5::Md5;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::local::error::{DecodeError, LocalError};
use crate::utils::{hex_bytes, unix_timestamp};

const SALT: &[u8] = b"TXdfu$jyZ#TZHsg4";
const HEADER_LEN: usize = 17;
const CRC_LEN: usize = 4;
const BLOCK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalProtocolVersion {
    /// "1.0"
    V1,
    L01,
}

impl LocalProtocolVersion {
    pub const ALL: [LocalProtocolVersion; 2] = [LocalProtocolVersion::V1, LocalProtocolVersion::L01];

    pub fn as_bytes(self) -> [u8; 3] {
        match self {
            LocalProtocolVersion::V1 => *b"1.0",
            LocalProtocolVersion::L01 => *b"L01",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_bytes() == bytes)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::from_bytes(name.as_bytes())
    }

    pub fn name(self) -> &'static str {
        match self {
            LocalProtocolVersion::V1 => "1.0",
            LocalProtocolVersion::L01 => "L01",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageProtocol {
    HelloRequest = 0,
    HelloResponse = 1,
    PingRequest = 2,
    PingResponse = 3,
    GeneralRequest = 4,
    GeneralResponse = 5,
    RpcRequest = 101,
    RpcResponse = 102,
}

impl TryFrom<u16> for MessageProtocol {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => MessageProtocol::HelloRequest,
            1 => MessageProtocol::HelloResponse,
            2 => MessageProtocol::PingRequest,
            3 => MessageProtocol::PingResponse,
            4 => MessageProtocol::GeneralRequest,
            5 => MessageProtocol::GeneralResponse,
            101 => MessageProtocol::RpcRequest,
            102 => MessageProtocol::RpcResponse,
            other => return Err(DecodeError::UnknownProtocol(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoborockMessage {
    pub version: LocalProtocolVersion,
    pub seq: u32,
    pub random: u32,
    pub timestamp: u32,
    pub protocol: MessageProtocol,
    /// Plaintext payload. `None` means the frame carries no payload section at all.
    pub payload: Option<Vec<u8>>,
}

impl RoborockMessage {
    pub fn new(
        version: LocalProtocolVersion,
        protocol: MessageProtocol,
        seq: u32,
        random: u32,
        payload: Option<Vec<u8>>,
    ) -> Self {
        RoborockMessage {
            version,
            seq,
            random,
            timestamp: unix_timestamp(),
            protocol,
            payload,
        }
    }
}

/// Encodes and decodes frames for one connection.
///
/// `ack_nonce` is only known after the L01 hello; decrypting L01 payloads requires it.
#[derive(Debug, Clone)]
pub struct LocalCodec {
    local_key: String,
    connect_nonce: u32,
    ack_nonce: Option<u32>,
}

impl LocalCodec {
    pub fn new(local_key: impl Into<String>, connect_nonce: u32) -> Self {
        LocalCodec {
            local_key: local_key.into(),
            connect_nonce,
            ack_nonce: None,
        }
    }

    pub fn with_ack_nonce(mut self, ack_nonce: u32) -> Self {
        self.ack_nonce = Some(ack_nonce);
        self
    }

    pub fn connect_nonce(&self) -> u32 {
        self.connect_nonce
    }

    /// Serialises a message, length prefix included.
    pub fn encode(&self, message: &RoborockMessage) -> Result<Vec<u8>, LocalError> {
        let encrypted = match &message.payload {
            Some(p) => Some(self.encrypt(message, p)?),
            None => None,
        };

        let body_len = HEADER_LEN + encrypted.as_ref().map_or(0, |p| 2 + p.len()) + CRC_LEN;
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.extend_from_slice(&message.version.as_bytes());
        out.extend_from_slice(&message.seq.to_be_bytes());
        out.extend_from_slice(&message.random.to_be_bytes());
        out.extend_from_slice(&message.timestamp.to_be_bytes());
        out.extend_from_slice(&(message.protocol as u16).to_be_bytes());
        if let Some(payload) = encrypted {
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            out.extend_from_slice(&payload);
        }
        let crc = crc32(&out[4..]);
        out.extend_from_slice(&crc.to_be_bytes());
        Ok(out)
    }

    /// Drains every complete frame from `buffer`, leaving a trailing partial frame in place.
    pub fn decode(&self, buffer: &mut Vec<u8>) -> Result<Vec<RoborockMessage>, LocalError> {
        let mut messages = Vec::new();

        while buffer.len() >= 4 {
            if buffer.len() >= 7 && LocalProtocolVersion::from_bytes(&buffer[4..7]).is_none() {
                if !resync(buffer) {
                    break;
                }
                continue;
            }

            let frame_len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
            if frame_len == 0 {
                buffer.drain(..4);
                continue;
            }
            if buffer.len() < 4 + frame_len {
                break;
            }

            let frame: Vec<u8> = buffer.drain(..4 + frame_len).skip(4).collect();
            match self.decode_frame(&frame) {
                Ok(message) => messages.push(message),
                // firmware sends message types this client has no use for
                Err(LocalError::Decode(DecodeError::UnknownProtocol(protocol))) => {
                    warn!("skipping frame with unknown message protocol {}", protocol);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(messages)
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<RoborockMessage, LocalError> {
        if frame.len() < HEADER_LEN {
            return Err(DecodeError::FrameTooShort.into());
        }

        let version = LocalProtocolVersion::from_bytes(&frame[0..3]).ok_or(DecodeError::UnknownVersion)?;
        let seq = be_u32(&frame[3..7]);
        let random = be_u32(&frame[7..11]);
        let timestamp = be_u32(&frame[11..15]);
        let protocol = MessageProtocol::try_from(u16::from_be_bytes([frame[15], frame[16]]))?;

        let mut message = RoborockMessage {
            version,
            seq,
            random,
            timestamp,
            protocol,
            payload: None,
        };

        // 17: bare header, 21: header + crc, anything longer carries a payload section
        if frame.len() == HEADER_LEN || frame.len() == HEADER_LEN + CRC_LEN {
            return Ok(message);
        }
        if frame.len() < HEADER_LEN + 2 {
            return Err(DecodeError::FrameTooShort.into());
        }

        let payload_len = u16::from_be_bytes([frame[17], frame[18]]) as usize;
        let message_len = HEADER_LEN + 2 + payload_len;
        if frame.len() < message_len {
            return Err(DecodeError::PayloadLengthMismatch.into());
        }
        if frame.len() < message_len + CRC_LEN {
            return Err(DecodeError::PayloadCrcMissing.into());
        }

        let expected = &frame[message_len..message_len + CRC_LEN];
        let computed = crc32(&frame[..message_len]);
        // some firmwares write the checksum little-endian
        if be_u32(expected) != computed && u32::from_le_bytes([expected[0], expected[1], expected[2], expected[3]]) != computed {
            debug!("crc mismatch: computed={:08x}, frame={}", computed, hex_bytes(frame));
            return Err(DecodeError::CrcMismatch.into());
        }

        let encrypted = &frame[19..message_len];
        message.payload = Some(if encrypted.is_empty() {
            Vec::new()
        } else {
            self.decrypt(&message, encrypted)?
        });
        Ok(message)
    }

    fn encrypt(&self, message: &RoborockMessage, plaintext: &[u8]) -> Result<Vec<u8>, LocalError> {
        match message.version {
            LocalProtocolVersion::V1 => Ok(encrypt_ecb(&v1_key(&self.local_key, message.timestamp), plaintext)),
            LocalProtocolVersion::L01 => {
                let cipher = Aes256Gcm::new_from_slice(&l01_key(&self.local_key, message.timestamp))
                    .map_err(|_| LocalError::Encrypt)?;
                let iv = l01_iv(message.timestamp, message.random, message.seq);
                let aad = l01_aad(message, self.connect_nonce, self.ack_nonce);
                cipher
                    .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad: &aad })
                    .map_err(|_| LocalError::Encrypt)
            }
        }
    }

    fn decrypt(&self, message: &RoborockMessage, ciphertext: &[u8]) -> Result<Vec<u8>, LocalError> {
        match message.version {
            LocalProtocolVersion::V1 => Ok(decrypt_ecb(&v1_key(&self.local_key, message.timestamp), ciphertext)?),
            LocalProtocolVersion::L01 => {
                let ack_nonce = self.ack_nonce.ok_or(DecodeError::MissingAckNonce)?;
                let cipher = Aes256Gcm::new_from_slice(&l01_key(&self.local_key, message.timestamp))
                    .map_err(|_| DecodeError::Decrypt)?;
                let iv = l01_iv(message.timestamp, message.random, message.seq);
                let aad = l01_aad(message, self.connect_nonce, Some(ack_nonce));
                Ok(cipher
                    .decrypt(Nonce::from_slice(&iv), Payload { msg: ciphertext, aad: &aad })
                    .map_err(|_| DecodeError::Decrypt)?)
            }
        }
    }
}

/// Drops leading bytes until a plausible frame start. Returns `false` when more data is needed.
fn resync(buffer: &mut Vec<u8>) -> bool {
    let found = buffer
        .windows(3)
        .enumerate()
        .skip(5)
        .find(|(_, w)| LocalProtocolVersion::from_bytes(w).is_some())
        .map(|(i, _)| i);

    match found {
        Some(index) => {
            debug!("local resync: skipping {} byte(s)", index - 4);
            buffer.drain(..index - 4);
            true
        }
        None => {
            // keep a tail that may hold the start of the next length prefix and version
            let keep = buffer.len().min(6);
            buffer.drain(..buffer.len() - keep);
            false
        }
    }
}

// =====================
// RPC payloads
// =====================

/// `{"dps": {"101": "<json request>"}, "t": ts}`
pub fn encode_rpc_request(request_id: u32, method: &str, params: &Value, timestamp: u32) -> Result<Vec<u8>, LocalError> {
    let inner = serde_json::json!({
        "id": request_id,
        "method": method,
        "params": params,
    });
    let outer = serde_json::json!({
        "dps": {"101": serde_json::to_string(&inner)?},
        "t": timestamp,
    });
    Ok(serde_json::to_vec(&outer)?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    pub id: Option<u32>,
    pub result: Value,
    pub error: Option<String>,
}

/// Decodes `{"dps": {"102": "<json response>"}}`.
pub fn decode_rpc_response(payload: &[u8]) -> Result<RpcResponse, LocalError> {
    let outer: Value = serde_json::from_slice(payload)?;
    let dps = outer.get("dps").and_then(Value::as_object).ok_or(DecodeError::MissingDps)?;
    let data_point = dps.get("102").and_then(Value::as_str).ok_or(DecodeError::MissingResponse)?;
    let response: Value = serde_json::from_str(data_point)?;

    let id = response.get("id").and_then(Value::as_u64).map(|id| id as u32);
    let mut error = response.get("error").map(|e| match e {
        Value::String(s) => s.clone(),
        Value::Object(o) => o
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| e.to_string()),
        other => other.to_string(),
    });
    let result = response.get("result").cloned().unwrap_or(Value::Null);
    if error.is_none() && result == Value::String("unknown_method".to_string()) {
        error = Some("unknown_method".to_string());
    }

    Ok(RpcResponse { id, result, error })
}

// =====================
// Crypto helpers
// =====================

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}

/// Shuffles the hex digits of the timestamp; part of the key derivation.
fn encode_timestamp(timestamp: u32) -> [u8; 8] {
    let hex = format!("{:08x}", timestamp);
    let hex = hex.as_bytes();
    let mut out = [0u8; 8];
    for (pos, idx) in [5, 6, 3, 7, 1, 2, 0, 4].into_iter().enumerate() {
        out[pos] = hex[idx];
    }
    out
}

fn v1_key(local_key: &str, timestamp: u32) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(encode_timestamp(timestamp));
    hasher.update(local_key.as_bytes());
    hasher.update(SALT);
    hasher.finalize().into()
}

fn l01_key(local_key: &str, timestamp: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(encode_timestamp(timestamp));
    hasher.update(local_key.as_bytes());
    hasher.update(SALT);
    hasher.finalize().into()
}

fn l01_iv(timestamp: u32, nonce: u32, sequence: u32) -> [u8; 12] {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(timestamp.to_be_bytes());
    let digest = hasher.finalize();
    let mut iv = [0u8; 12];
    iv.copy_from_slice(&digest[..12]);
    iv
}

fn l01_aad(message: &RoborockMessage, connect_nonce: u32, ack_nonce: Option<u32>) -> Vec<u8> {
    let mut aad = Vec::with_capacity(20);
    aad.extend_from_slice(&message.seq.to_be_bytes());
    aad.extend_from_slice(&connect_nonce.to_be_bytes());
    if let Some(ack) = ack_nonce {
        aad.extend_from_slice(&ack.to_be_bytes());
    }
    aad.extend_from_slice(&message.random.to_be_bytes());
    aad.extend_from_slice(&message.timestamp.to_be_bytes());
    aad
}

fn encrypt_ecb(key: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let pad = BLOCK - plaintext.len() % BLOCK;
    let mut data = Vec::with_capacity(plaintext.len() + pad);
    data.extend_from_slice(plaintext);
    data.resize(plaintext.len() + pad, pad as u8);
    for block in data.chunks_exact_mut(BLOCK) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    data
}

fn decrypt_ecb(key: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK != 0 {
        return Err(DecodeError::BadPadding);
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut data = ciphertext.to_vec();
    for block in data.chunks_exact_mut(BLOCK) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    let pad = *data.last().ok_or(DecodeError::BadPadding)? as usize;
    if pad == 0 || pad > BLOCK || !data[data.len() - pad..].iter().all(|b| *b as usize == pad) {
        return Err(DecodeError::BadPadding);
    }
    data.truncate(data.len() - pad);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "0123456789abcdef";

    fn message(version: LocalProtocolVersion, protocol: MessageProtocol, payload: Option<&[u8]>) -> RoborockMessage {
        RoborockMessage {
            version,
            seq: 42,
            random: 4242,
            timestamp: 1_700_000_000,
            protocol,
            payload: payload.map(<[u8]>::to_vec),
        }
    }

    #[test]
    fn timestamp_digits_are_shuffled() {
        assert_eq!(&encode_timestamp(0x12345678), b"67482315");
    }

    #[test]
    fn version_names() {
        assert_eq!(LocalProtocolVersion::from_name("L01"), Some(LocalProtocolVersion::L01));
        assert_eq!(LocalProtocolVersion::from_name("1.0"), Some(LocalProtocolVersion::V1));
        assert_eq!(LocalProtocolVersion::from_name("A01"), None);
        assert_eq!(LocalProtocolVersion::V1.name(), "1.0");
    }

    #[test]
    fn ecb_padding_is_stripped() {
        let key = v1_key(KEY, 1_700_000_000);
        let encrypted = encrypt_ecb(&key, b"{\"test\":\"message\"}");
        assert_eq!(encrypted.len(), 32);
        assert_eq!(decrypt_ecb(&key, &encrypted).unwrap(), b"{\"test\":\"message\"}");

        // a full block of padding is appended to block-aligned input
        assert_eq!(encrypt_ecb(&key, &[7u8; 16]).len(), 32);
    }

    #[test]
    fn ecb_with_wrong_key_is_rejected_or_garbled() {
        let encrypted = encrypt_ecb(&v1_key(KEY, 1), b"hello");
        match decrypt_ecb(&v1_key("another-key-0000", 1), &encrypted) {
            Ok(plain) => assert_ne!(plain, b"hello"),
            Err(e) => assert_eq!(e, DecodeError::BadPadding),
        }
    }

    #[test]
    fn v1_frame_layout() {
        let codec = LocalCodec::new(KEY, 1);
        let msg = message(LocalProtocolVersion::V1, MessageProtocol::GeneralRequest, Some(b"{}"));
        let frame = codec.encode(&msg).unwrap();

        let body_len = be_u32(&frame[0..4]) as usize;
        assert_eq!(body_len, frame.len() - 4);
        assert_eq!(&frame[4..7], b"1.0");
        assert_eq!(be_u32(&frame[7..11]), 42);
        assert_eq!(u16::from_be_bytes([frame[19], frame[20]]), 4);
        // 2 plaintext bytes pad to one AES block
        assert_eq!(u16::from_be_bytes([frame[21], frame[22]]), 16);
        assert_eq!(be_u32(&frame[frame.len() - 4..]), crc32(&frame[4..frame.len() - 4]));
    }

    #[test]
    fn v1_roundtrip() {
        let codec = LocalCodec::new(KEY, 1);
        let msg = message(LocalProtocolVersion::V1, MessageProtocol::GeneralResponse, Some(b"{\"hello\":1}"));
        let mut buffer = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&mut buffer).unwrap();
        assert_eq!(decoded, vec![msg]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn l01_roundtrip_after_hello() {
        let codec = LocalCodec::new(KEY, 12345).with_ack_nonce(22222);
        let msg = message(LocalProtocolVersion::L01, MessageProtocol::GeneralRequest, Some(b"{\"hello\":1}"));
        let mut buffer = codec.encode(&msg).unwrap();
        let decoded = codec.decode(&mut buffer).unwrap();
        assert_eq!(decoded, vec![msg]);
    }

    #[test]
    fn l01_payload_needs_ack_nonce() {
        let sender = LocalCodec::new(KEY, 12345).with_ack_nonce(22222);
        let receiver = LocalCodec::new(KEY, 12345);
        let msg = message(LocalProtocolVersion::L01, MessageProtocol::GeneralResponse, Some(b"{}"));
        let mut buffer = sender.encode(&msg).unwrap();
        let err = receiver.decode(&mut buffer).unwrap_err();
        assert!(matches!(err, LocalError::Decode(DecodeError::MissingAckNonce)));
    }

    #[test]
    fn l01_tampered_payload_fails() {
        let codec = LocalCodec::new(KEY, 1).with_ack_nonce(2);
        let msg = message(LocalProtocolVersion::L01, MessageProtocol::GeneralResponse, Some(b"{\"a\":1}"));
        let mut frame = codec.encode(&msg).unwrap();
        // flip a ciphertext byte and fix up the crc so only GCM notices
        frame[4 + 19] ^= 0xff;
        let end = frame.len() - 4;
        let crc = crc32(&frame[4..end]).to_be_bytes();
        frame[end..].copy_from_slice(&crc);
        let err = codec.decode(&mut frame).unwrap_err();
        assert!(matches!(err, LocalError::Decode(DecodeError::Decrypt)));
    }

    #[test]
    fn hello_without_payload() {
        let codec = LocalCodec::new(KEY, 54321);
        let msg = message(LocalProtocolVersion::L01, MessageProtocol::HelloRequest, None);
        let mut buffer = codec.encode(&msg).unwrap();
        assert_eq!(buffer.len(), 4 + 21);
        let decoded = codec.decode(&mut buffer).unwrap();
        assert_eq!(decoded[0].payload, None);
        assert_eq!(decoded[0].protocol, MessageProtocol::HelloRequest);
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let codec = LocalCodec::new(KEY, 1);
        let msg = message(LocalProtocolVersion::V1, MessageProtocol::GeneralResponse, Some(b"{}"));
        let mut frame = codec.encode(&msg).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        let err = codec.decode(&mut frame).unwrap_err();
        assert!(matches!(err, LocalError::Decode(DecodeError::CrcMismatch)));
    }

    #[test]
    fn partial_frames_wait_for_more_data() {
        let codec = LocalCodec::new(KEY, 1);
        let first = message(LocalProtocolVersion::V1, MessageProtocol::GeneralResponse, Some(b"{\"n\":1}"));
        let mut second = first.clone();
        second.seq = 43;
        let mut stream = codec.encode(&first).unwrap();
        stream.extend(codec.encode(&second).unwrap());

        let split = stream.len() - 5;
        let mut buffer = stream[..split].to_vec();
        let decoded = codec.decode(&mut buffer).unwrap();
        assert_eq!(decoded, vec![first]);

        buffer.extend_from_slice(&stream[split..]);
        let decoded = codec.decode(&mut buffer).unwrap();
        assert_eq!(decoded, vec![second]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn unknown_protocol_frames_are_skipped() {
        let codec = LocalCodec::new(KEY, 1);
        let good = message(LocalProtocolVersion::V1, MessageProtocol::GeneralResponse, Some(b"{\"n\":1}"));
        let mut buffer = codec.encode(&good).unwrap();

        let mut odd = codec
            .encode(&message(LocalProtocolVersion::V1, MessageProtocol::GeneralResponse, Some(b"{}")))
            .unwrap();
        odd[19..21].copy_from_slice(&500u16.to_be_bytes());
        let end = odd.len() - 4;
        let crc = crc32(&odd[4..end]).to_be_bytes();
        odd[end..].copy_from_slice(&crc);
        buffer.extend(odd);
        buffer.extend(codec.encode(&good).unwrap());

        let decoded = codec.decode(&mut buffer).unwrap();
        assert_eq!(decoded, vec![good.clone(), good]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn resync_skips_garbage_prefix() {
        let codec = LocalCodec::new(KEY, 54321);
        let msg = message(LocalProtocolVersion::L01, MessageProtocol::HelloResponse, None);
        let mut buffer = b"junk".to_vec();
        buffer.extend(codec.encode(&msg).unwrap());
        let decoded = codec.decode(&mut buffer).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].protocol, MessageProtocol::HelloResponse);
    }

    #[test]
    fn pure_garbage_is_discarded() {
        let codec = LocalCodec::new(KEY, 1);
        let mut buffer = vec![0xAAu8; 64];
        assert!(codec.decode(&mut buffer).unwrap().is_empty());
        assert!(buffer.len() <= 6);
    }

    #[test]
    fn rpc_request_payload_shape() {
        let payload = encode_rpc_request(10001, "get_room_mapping", &json!([]), 1_700_000_000).unwrap();
        let outer: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(outer["t"], json!(1_700_000_000));
        let inner: Value = serde_json::from_str(outer["dps"]["101"].as_str().unwrap()).unwrap();
        assert_eq!(inner, json!({"id": 10001, "method": "get_room_mapping", "params": []}));
    }

    #[test]
    fn rpc_response_with_result() {
        let payload = json!({"dps": {"102": "{\"id\":123,\"result\":[[16,\"6474987\",14]]}"}});
        let response = decode_rpc_response(&serde_json::to_vec(&payload).unwrap()).unwrap();
        assert_eq!(response.id, Some(123));
        assert_eq!(response.error, None);
        assert_eq!(response.result, json!([[16, "6474987", 14]]));
    }

    #[test]
    fn rpc_response_errors() {
        let payload = json!({"dps": {"102": "{\"id\":5,\"error\":{\"code\":-10000,\"message\":\"method not found\"}}"}});
        let response = decode_rpc_response(&serde_json::to_vec(&payload).unwrap()).unwrap();
        assert_eq!(response.error.as_deref(), Some("method not found"));

        let payload = json!({"dps": {"102": "{\"id\":6,\"result\":\"unknown_method\"}"}});
        let response = decode_rpc_response(&serde_json::to_vec(&payload).unwrap()).unwrap();
        assert_eq!(response.error.as_deref(), Some("unknown_method"));

        let payload = json!({"dps": {"121": 8}});
        let err = decode_rpc_response(&serde_json::to_vec(&payload).unwrap()).unwrap_err();
        assert!(matches!(err, LocalError::Decode(DecodeError::MissingResponse)));
    }
}
