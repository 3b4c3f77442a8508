//! environet distribution node server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`) layered with
//! `ENVIRONET_*` environment variables, opens the SQLite store, and serves
//! the upload endpoint over HTTP.
//!
//! List-valued settings are comma-separated in the environment:
//!
//! ```text
//! ENVIRONET_SYSTEM_ALLOWED_ADDRS=127.0.0.1,10.0.0.5
//! ```

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::Parser;
use environet_api::{AppState, ServerConfig};
use environet_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Environet distribution node")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("ENVIRONET")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("system_allowed_addrs"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  let system_public_key = match &server_cfg.system_public_key_path {
    Some(path) => {
      let path = expand_tilde(path);
      let pem = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read system public key {path:?}"))?;
      environet_core::signature::decode_public_key(&pem)
        .with_context(|| format!("invalid system public key {path:?}"))?;
      Some(pem)
    }
    None => {
      tracing::warn!("no system_public_key_path configured; system identity disabled");
      None
    }
  };

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  if let Some(dir) = &server_cfg.upload_archive_dir {
    tracing::info!(dir = %dir.display(), "archiving upload bodies");
  }

  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  let state = AppState::new(store, server_cfg, system_public_key);
  let app = environet_api::router(state);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
    .await
    .context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
