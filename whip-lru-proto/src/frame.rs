//! Streaming frame parser for client requests, server responses, and the
//! auth handshake messages (spec.md §4.2, §6).

use crate::asset::AssetId;
use crate::codec::{decode_uuid, encode_uuid};
use std::convert::TryFrom;
use std::convert::TryInto;
use thiserror::Error;

pub const FRAME_HEADER_LEN: usize = 37;
pub const DEFAULT_MAX_BODY_LEN: u32 = 64 * 1024 * 1024;
pub const AUTH_CHALLENGE_LEN: usize = 8;
pub const AUTH_RESPONSE_LEN: usize = 41;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown request type byte {0}")]
    UnknownType(u8),
    #[error("non-hex uuid in frame header")]
    BadUuid,
    #[error("body of {0} bytes exceeds the {1} byte cap")]
    OversizedBody(u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Get = 10,
    Put = 11,
    Purge = 12,
    Test = 13,
    MaintPurgeLocals = 14,
    StatusGet = 15,
    StoredAssetIdsGet = 16,
    GetDontCache = 17,
}

impl TryFrom<u8> for RequestType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(RequestType::Get),
            11 => Ok(RequestType::Put),
            12 => Ok(RequestType::Purge),
            13 => Ok(RequestType::Test),
            14 => Ok(RequestType::MaintPurgeLocals),
            15 => Ok(RequestType::StatusGet),
            16 => Ok(RequestType::StoredAssetIdsGet),
            17 => Ok(RequestType::GetDontCache),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Found = 0x00,
    NotFound = 0x01,
    Error = 0x02,
    Ok = 0x03,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub kind: RequestType,
    pub id: AssetId,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    pub code: ResponseCode,
    pub id: AssetId,
    pub body: Vec<u8>,
}

impl ServerResponse {
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.code as u8, &self.id, &self.body)
    }
}

impl ClientRequest {
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.kind as u8, &self.id, &self.body)
    }
}

fn encode_frame(type_byte: u8, id: &AssetId, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.push(type_byte);
    out.extend_from_slice(encode_uuid(id).as_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Incremental decoder: feed it bytes as they arrive off the socket, then
/// repeatedly call `try_parse_request` (or `try_parse_response`) until it
/// returns `Ok(None)`, meaning "not enough bytes yet".
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_body_len: u32,
    /// Bytes still to be discarded from an oversized frame that was
    /// rejected before all of its declared body had arrived. Without this,
    /// re-parsing after `OversizedBody` would just see the same header
    /// again and error forever.
    skip_remaining: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buf: Vec::new(),
            max_body_len: DEFAULT_MAX_BODY_LEN,
            skip_remaining: 0,
        }
    }

    pub fn with_max_body_len(max_body_len: u32) -> Self {
        FrameDecoder {
            buf: Vec::new(),
            max_body_len,
            skip_remaining: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn header_complete(&self) -> bool {
        self.buf.len() >= FRAME_HEADER_LEN
    }

    fn data_length(&self) -> u32 {
        u32::from_be_bytes(self.buf[33..37].try_into().unwrap())
    }

    /// Returns the parsed `(type_byte, id, body)` if a full frame is
    /// buffered, validating the body length against the configured cap.
    /// Does not interpret `type_byte` — callers pick `try_parse_request`
    /// or `try_parse_response` depending on context.
    fn try_parse_raw(&mut self) -> Result<Option<(u8, AssetId, Vec<u8>)>, FrameError> {
        if self.skip_remaining > 0 {
            let n = self.skip_remaining.min(self.buf.len());
            self.buf.drain(0..n);
            self.skip_remaining -= n;
            if self.skip_remaining > 0 {
                return Ok(None);
            }
        }

        if !self.header_complete() {
            return Ok(None);
        }

        let data_length = self.data_length();
        if data_length > self.max_body_len {
            let total_len = FRAME_HEADER_LEN + data_length as usize;
            let drained = self.buf.len().min(total_len);
            self.buf.drain(0..drained);
            self.skip_remaining = total_len - drained;
            return Err(FrameError::OversizedBody(data_length, self.max_body_len));
        }

        let total_len = FRAME_HEADER_LEN + data_length as usize;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let type_byte = self.buf[0];
        let id = decode_uuid(&self.buf[1..33]).map_err(|_| FrameError::BadUuid)?;
        let body = self.buf[FRAME_HEADER_LEN..total_len].to_vec();

        self.buf.drain(0..total_len);
        Ok(Some((type_byte, id, body)))
    }

    pub fn try_parse_request(&mut self) -> Result<Option<ClientRequest>, FrameError> {
        match self.try_parse_raw()? {
            None => Ok(None),
            Some((type_byte, id, body)) => {
                let kind = RequestType::try_from(type_byte)?;
                Ok(Some(ClientRequest { kind, id, body }))
            }
        }
    }

    pub fn try_parse_response(&mut self) -> Result<Option<ServerResponse>, FrameError> {
        match self.try_parse_raw()? {
            None => Ok(None),
            Some((type_byte, id, body)) => {
                let code = match type_byte {
                    0x00 => ResponseCode::Found,
                    0x01 => ResponseCode::NotFound,
                    0x02 => ResponseCode::Error,
                    0x03 => ResponseCode::Ok,
                    other => return Err(FrameError::UnknownType(other)),
                };
                Ok(Some(ServerResponse { code, id, body }))
            }
        }
    }

    /// Parses a fixed-size 41-byte `AuthResponse` (spec.md §6): a leading
    /// `0x00` byte followed by 40 ASCII hex digits of a SHA-1 digest.
    pub fn try_parse_auth_response(&mut self) -> Option<[u8; 40]> {
        if self.buf.len() < AUTH_RESPONSE_LEN {
            return None;
        }

        let mut digest = [0u8; 40];
        digest.copy_from_slice(&self.buf[1..41]);
        self.buf.drain(0..AUTH_RESPONSE_LEN);
        Some(digest)
    }
}
