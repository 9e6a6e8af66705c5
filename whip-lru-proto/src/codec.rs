//! Encodes and decodes the two serialized forms of an `Asset` (spec.md §4.1).
//!
//! The wire form is bit-exact (spec.md §6) and used on the TCP protocol.
//! The storage form is whatever canonical, self-describing encoding the
//! local store happens to use on disk; here that's `bincode`, matching the
//! teacher's own `bf` crate which leans on `bincode` for its archive format.

use crate::asset::{Asset, MAX_DESCRIPTION_LEN, MAX_NAME_LEN};
use std::convert::TryInto;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed asset encoding: {0}")]
    Malformed(String),
    #[error("field out of range: {0}")]
    OutOfRange(String),
    #[error("field is not valid utf-8")]
    InvalidUtf8,
}

/// Encodes/decodes the bit-exact wire form of an asset (spec.md §6).
pub struct WireCodec;

impl WireCodec {
    pub fn encode(asset: &Asset) -> Result<Vec<u8>, CodecError> {
        if asset.name.as_bytes().len() > MAX_NAME_LEN {
            return Err(CodecError::OutOfRange("name longer than 32 bytes".into()));
        }
        if asset.description.as_bytes().len() > MAX_DESCRIPTION_LEN {
            return Err(CodecError::OutOfRange(
                "description longer than 64 bytes".into(),
            ));
        }
        let data_len: u32 = asset
            .data
            .len()
            .try_into()
            .map_err(|_| CodecError::OutOfRange("data longer than u32::MAX".into()))?;

        let mut out = Vec::with_capacity(39 + asset.name.len() + asset.description.len() + asset.data.len());
        out.extend_from_slice(hex::encode_uuid(&asset.id).as_bytes());
        out.push(asset.kind as u8);
        out.push(asset.local as u8);
        out.push(asset.temporary as u8);
        out.extend_from_slice(&asset.create_time.to_be_bytes());
        out.push(asset.name.as_bytes().len() as u8);
        out.extend_from_slice(asset.name.as_bytes());
        out.push(asset.description.as_bytes().len() as u8);
        out.extend_from_slice(asset.description.as_bytes());
        out.extend_from_slice(&data_len.to_be_bytes());
        out.extend_from_slice(&asset.data);

        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Asset, CodecError> {
        if bytes.len() < 39 {
            return Err(CodecError::Malformed("truncated asset header".into()));
        }

        let id = hex::decode_uuid(&bytes[0..32])
            .map_err(|_| CodecError::Malformed("non-hex uuid".into()))?;
        let kind = bytes[32] as i8;
        let local = bytes[33] != 0;
        let temporary = bytes[34] != 0;
        let create_time = i32::from_be_bytes(bytes[35..39].try_into().unwrap());

        let mut offset = 39;
        let name_len = *bytes.get(offset).ok_or_else(|| truncated("name length"))? as usize;
        offset += 1;
        let name_bytes = bytes
            .get(offset..offset + name_len)
            .ok_or_else(|| truncated("name"))?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();
        offset += name_len;

        let description_len = *bytes.get(offset).ok_or_else(|| truncated("description length"))? as usize;
        offset += 1;
        let description_bytes = bytes
            .get(offset..offset + description_len)
            .ok_or_else(|| truncated("description"))?;
        let description = std::str::from_utf8(description_bytes)
            .map_err(|_| CodecError::InvalidUtf8)?
            .to_string();
        offset += description_len;

        let data_len_bytes = bytes
            .get(offset..offset + 4)
            .ok_or_else(|| truncated("data length"))?;
        let data_len = u32::from_be_bytes(data_len_bytes.try_into().unwrap()) as usize;
        offset += 4;

        let data = bytes
            .get(offset..offset + data_len)
            .ok_or_else(|| truncated("data"))?
            .to_vec();

        Ok(Asset {
            id,
            kind,
            local,
            temporary,
            create_time,
            name,
            description,
            data,
        })
    }
}

fn truncated(field: &str) -> CodecError {
    CodecError::Malformed(format!("truncated {}", field))
}

/// Encodes/decodes the canonical on-disk storage form of an asset. Any
/// self-describing, byte-order-independent encoding works here; `bincode`
/// over `serde` is what the teacher's own archive format already uses.
pub struct StorageCodec;

impl StorageCodec {
    pub fn encode(asset: &Asset) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(asset).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Asset, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

mod hex {
    use uuid::Uuid;

    pub fn encode_uuid(id: &Uuid) -> String {
        let mut s = String::with_capacity(32);
        for byte in id.as_bytes() {
            s.push_str(&format!("{:02x}", byte));
        }
        s
    }

    pub fn decode_uuid(bytes: &[u8]) -> Result<Uuid, ()> {
        if bytes.len() != 32 {
            return Err(());
        }
        let mut raw = [0u8; 16];
        for i in 0..16 {
            let hi = hex_val(bytes[i * 2])?;
            let lo = hex_val(bytes[i * 2 + 1])?;
            raw[i] = (hi << 4) | lo;
        }
        Ok(Uuid::from_bytes(raw))
    }

    fn hex_val(b: u8) -> Result<u8, ()> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(()),
        }
    }
}

pub(crate) use hex::{decode_uuid, encode_uuid};
