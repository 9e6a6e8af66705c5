//! Wire protocol and asset serialization shared by every WHIP-LRU crate.
//!
//! This crate has no knowledge of sockets or async runtimes: it turns bytes
//! into typed requests/responses/assets and back, nothing more.

mod asset;
mod codec;
mod frame;

pub use asset::{uuid_zero, Asset, AssetId};
pub use codec::{CodecError, StorageCodec, WireCodec};
pub use frame::{
    ClientRequest, FrameDecoder, FrameError, RequestType, ResponseCode, ServerResponse,
    AUTH_CHALLENGE_LEN, AUTH_RESPONSE_LEN, DEFAULT_MAX_BODY_LEN, FRAME_HEADER_LEN,
};
