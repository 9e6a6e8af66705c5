//! INI-based configuration loading (spec.md §6 "Configuration").
//!
//! Grounded in the teacher's `settings::load_settings` (a typed struct
//! loaded eagerly at startup, panicking with a descriptive message if the
//! file is missing or malformed) but reading INI via the `ini` crate
//! instead of the teacher's JSON, since spec.md requires INI and nothing
//! in the teacher's own dependency graph reads INI files.

use ini::Ini;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 32700;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub password: String,

    pub database_folder_path: PathBuf,
    pub database_max_size_bytes: u64,
    pub write_cache_file_path: PathBuf,
    pub write_cache_max_record_count: u32,

    /// Opaque key/value bags passed straight to whatever `RemoteProvider`
    /// constructor the deployment wires up; the core never interprets
    /// them (spec.md §6).
    pub assets_read: HashMap<String, String>,
    pub assets_write: HashMap<String, String>,
}

impl Config {
    /// `Server.Address` of `*` means "any interface", matching the
    /// source's own convention; translated to `0.0.0.0` for `TcpListener`.
    pub fn bind_addr(&self) -> IpAddr {
        if self.bind_address == "*" {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            self.bind_address
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        }
    }
}

pub fn load_settings(path: &std::path::Path) -> Config {
    if !path.exists() {
        panic!("Cannot find settings file: {:?}", path);
    }

    let ini = match Ini::load_from_file(path) {
        Ok(ini) => ini,
        Err(e) => panic!("Cannot parse settings file {:?}: {}", path, e),
    };

    let server = ini.section(Some("Server"));
    let cache = ini.section(Some("Cache"));

    let password = server
        .and_then(|s| s.get("Password"))
        .unwrap_or_else(|| panic!("Missing required key Server.Password in {:?}", path))
        .to_string();

    let bind_address = server
        .and_then(|s| s.get("Address"))
        .unwrap_or("*")
        .to_string();

    let port = server
        .and_then(|s| s.get("Port"))
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let database_folder_path = cache
        .and_then(|s| s.get("DatabaseFolderPath"))
        .unwrap_or("./whip-lru-data")
        .into();

    let database_max_size_bytes = cache
        .and_then(|s| s.get("DatabaseMaxSizeBytes"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(64 * 1024 * 1024);

    let write_cache_file_path = cache
        .and_then(|s| s.get("WriteCacheFilePath"))
        .unwrap_or("./whip-lru-data/journal.bin")
        .into();

    let write_cache_max_record_count = cache
        .and_then(|s| s.get("WriteCacheMaxRecordCount"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1024);

    let assets_read = section_to_map(ini.section(Some("AssetsRead")));
    let assets_write = section_to_map(ini.section(Some("AssetsWrite")));

    Config {
        bind_address,
        port,
        password,
        database_folder_path,
        database_max_size_bytes,
        write_cache_file_path,
        write_cache_max_record_count,
        assets_read,
        assets_write,
    }
}

fn section_to_map(section: Option<&ini::Properties>) -> HashMap<String, String> {
    section
        .map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}
