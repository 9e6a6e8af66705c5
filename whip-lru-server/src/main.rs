use crate::fs_remote::FilesystemRemoteProvider;
use crate::server::{Server, DEFAULT_GRACE_PERIOD, DEFAULT_WORKERS};
use crate::settings::load_settings;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use whip_lru_core::pidfile::{PidFileManager, Status};
use whip_lru_store::StorageManager;

pub mod connection_fsm;
pub mod dispatch;
pub mod fs_remote;
pub mod server;
pub mod settings;

#[derive(Parser, Debug)]
#[clap(name = "whip-lru-server")]
struct Args {
    /// Path to the INI settings file (spec.md §6).
    #[clap(long)]
    inifile: PathBuf,

    /// Path to a logging config file. Currently only its presence is
    /// honored: `env_logger` is configured entirely from `RUST_LOG`, so
    /// this flag exists for CLI-surface parity with deployments that
    /// expect it (spec.md §6).
    #[clap(long)]
    logconfig: Option<PathBuf>,

    /// Path to write the `"<status> <pid>"` pid file to.
    #[clap(long)]
    pidfile: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(logconfig) = &args.logconfig {
        info!("ignoring unused --logconfig={:?}: logging is controlled by RUST_LOG", logconfig);
    }

    let pidfile = args
        .pidfile
        .as_ref()
        .map(PidFileManager::create)
        .transpose()?;

    let config = load_settings(&args.inifile);
    info!("loaded settings from {:?}", args.inifile);

    let remote = Arc::new(FilesystemRemoteProvider::new(
        &config.assets_read,
        &config.assets_write,
    ));

    let storage = StorageManager::open(
        &config.database_folder_path,
        config.database_max_size_bytes,
        config.write_cache_max_record_count,
        remote,
    )
    .await?;

    let bind_addr = std::net::SocketAddr::new(config.bind_addr(), config.port);
    let server = Arc::new(Server::new(
        storage,
        config.password.clone(),
        bind_addr,
        DEFAULT_WORKERS,
        DEFAULT_GRACE_PERIOD,
    ));

    if let Some(pidfile) = &pidfile {
        pidfile.write(Status::Ready)?;
    }
    info!("whip-lru-server ready, listening on {}", bind_addr);

    server.run().await?;
    Ok(())
}
