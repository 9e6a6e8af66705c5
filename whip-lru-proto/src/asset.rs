//! The `Asset` data model (spec.md §3).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies an asset. A thin wrapper so call sites can't confuse it with
/// any other `Uuid`-shaped value.
pub type AssetId = Uuid;

/// The reserved, always-invalid asset id. Rejected by every ID-bearing
/// operation.
pub fn uuid_zero() -> AssetId {
    Uuid::from_bytes([0u8; 16])
}

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_DESCRIPTION_LEN: usize = 64;

/// An immutable, content-addressed asset.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub id: AssetId,
    pub kind: i8,
    pub local: bool,
    pub temporary: bool,
    pub create_time: i32,
    pub name: String,
    pub description: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Asset {
    pub fn new(
        id: AssetId,
        kind: i8,
        local: bool,
        temporary: bool,
        create_time: i32,
        name: String,
        description: String,
        data: Vec<u8>,
    ) -> Self {
        Asset {
            id,
            kind,
            local,
            temporary,
            create_time,
            name,
            description,
            data,
        }
    }
}
