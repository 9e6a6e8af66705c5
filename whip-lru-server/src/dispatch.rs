//! Maps a parsed `ClientRequest` onto `StorageManager` calls and builds
//! the `ServerResponse` (spec.md §4.9, §6, §7).

use std::sync::Arc;
use whip_lru_proto::{
    uuid_zero, AssetId, ClientRequest, RequestType, ResponseCode, ServerResponse, WireCodec,
};
use whip_lru_store::{RemoteError, RemoteProvider, StorageError, StorageManager};

fn error(id: AssetId, message: impl Into<String>) -> ServerResponse {
    ServerResponse {
        code: ResponseCode::Error,
        id,
        body: message.into().into_bytes(),
    }
}

fn zero_uuid_error(id: AssetId) -> ServerResponse {
    error(id, "Zero UUID not allowed.")
}

fn storage_error_response(id: AssetId, err: StorageError) -> ServerResponse {
    match err {
        StorageError::NotFound | StorageError::Remote(RemoteError::NotFound) => ServerResponse {
            code: ResponseCode::NotFound,
            id,
            body: Vec::new(),
        },
        StorageError::Duplicate | StorageError::Remote(RemoteError::Duplicate) => {
            error(id, "Duplicate assets are not allowed.")
        }
        other => error(id, other.to_string()),
    }
}

/// Dispatches one request against `storage`. `active_connections` backs
/// `STATUS_GET`'s body text.
pub async fn dispatch<R: RemoteProvider + 'static>(
    request: ClientRequest,
    storage: &Arc<StorageManager<R>>,
    active_connections: usize,
) -> ServerResponse {
    let id = request.id;

    match request.kind {
        RequestType::Get | RequestType::GetDontCache => {
            if id == uuid_zero() {
                return zero_uuid_error(id);
            }
            let cache_result = request.kind == RequestType::Get;
            match storage.get_asset(&id, cache_result).await {
                Ok(asset) => match WireCodec::encode(&asset) {
                    Ok(body) => ServerResponse {
                        code: ResponseCode::Found,
                        id,
                        body,
                    },
                    Err(e) => error(id, e.to_string()),
                },
                Err(err) => storage_error_response(id, err),
            }
        }

        RequestType::Put => {
            if id == uuid_zero() {
                return zero_uuid_error(id);
            }
            let asset = match WireCodec::decode(&request.body) {
                Ok(asset) => asset,
                Err(e) => return error(id, e.to_string()),
            };
            if asset.id != id {
                return error(id, "Frame UUID does not match asset UUID.");
            }
            match storage.store_asset(asset).await {
                Ok(()) => ServerResponse {
                    code: ResponseCode::Ok,
                    id,
                    body: Vec::new(),
                },
                Err(err) => storage_error_response(id, err),
            }
        }

        RequestType::Purge => {
            if id == uuid_zero() {
                return zero_uuid_error(id);
            }
            match storage.purge_asset(&id).await {
                Ok(()) => ServerResponse {
                    code: ResponseCode::Ok,
                    id,
                    body: Vec::new(),
                },
                Err(err) => storage_error_response(id, err),
            }
        }

        RequestType::Test => {
            if id == uuid_zero() {
                return zero_uuid_error(id);
            }
            match storage.check_asset(&id).await {
                Ok(true) => ServerResponse {
                    code: ResponseCode::Found,
                    id,
                    body: Vec::new(),
                },
                Ok(false) => ServerResponse {
                    code: ResponseCode::NotFound,
                    id,
                    body: Vec::new(),
                },
                Err(err) => storage_error_response(id, err),
            }
        }

        RequestType::MaintPurgeLocals => match storage.purge_all_local_assets() {
            Ok(()) => ServerResponse {
                code: ResponseCode::Ok,
                id,
                body: Vec::new(),
            },
            Err(err) => storage_error_response(id, err),
        },

        RequestType::StatusGet => {
            let status = if active_connections > 0 { "ACTIVE" } else { "IDLE" };
            let body = format!("STATUS: {}\nconnections: {}\n", status, active_connections);
            ServerResponse {
                code: ResponseCode::Ok,
                id,
                body: body.into_bytes(),
            }
        }

        RequestType::StoredAssetIdsGet => {
            let hex = id.to_simple().to_string();
            let prefix = &hex[..3];
            let ids = storage.locally_known_ids(prefix);
            let body = ids
                .iter()
                .map(|id| id.to_simple().to_string())
                .collect::<Vec<_>>()
                .join(",");
            ServerResponse {
                code: ResponseCode::Ok,
                id,
                body: body.into_bytes(),
            }
        }
    }
}
