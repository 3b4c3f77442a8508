//! `environet`: data-node client for an Environet distribution node.
//!
//! # Usage
//!
//! ```
//! environet keygen --out-dir keys/
//! environet build --point H001 --series h=level.csv --out upload.xml
//! environet sign --file upload.xml
//! environet upload --file upload.xml --url http://node:8080 --user node-hu --key keys/private.pem
//! environet --config ~/.config/environet/config.toml read --point H001 --property h
//! ```

mod client;
mod csv;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use client::{NodeClient, NodeConfig, Reply};
use environet_core::{
  signature::{body_digest, generate_key_pair},
  upload::{UploadData, parse_point_time},
};
use environet_xml::build_upload_xml;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "environet", about = "Data-node client for an Environet distribution node")]
struct Args {
  /// Path to a TOML config file (url, username, private_key_path).
  #[arg(short, long, value_name = "FILE", global = true)]
  config: Option<PathBuf>,

  /// Base URL of the distribution node (default: http://localhost:8080).
  #[arg(long, env = "ENVIRONET_URL", global = true)]
  url: Option<String>,

  /// Account name used as the signature `keyId`.
  #[arg(long, env = "ENVIRONET_USER", global = true)]
  user: Option<String>,

  /// PEM file holding the account's RSA private key.
  #[arg(long, env = "ENVIRONET_PRIVATE_KEY", global = true)]
  key: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Generate an RSA key pair and write `private.pem` and `public.pem`.
  Keygen {
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    #[arg(long, default_value_t = 2048)]
    bits:    usize,
  },
  /// Build an upload document from `time,value` CSV files.
  Build {
    /// National code of the monitoring point.
    #[arg(long)]
    point:  String,
    /// `SYMBOL=FILE`, repeatable; blocks keep the given order.
    #[arg(long, required = true)]
    series: Vec<String>,
    /// Output file; stdout when omitted.
    #[arg(long)]
    out:    Option<PathBuf>,
  },
  /// Print the Authorization header for an upload document.
  Sign {
    #[arg(long)]
    file: PathBuf,
  },
  /// Sign and send an upload document.
  Upload {
    #[arg(long)]
    file: PathBuf,
  },
  /// Read the current values of one series.
  Read {
    #[arg(long)]
    point:    String,
    #[arg(long)]
    property: String,
    #[arg(long)]
    start:    Option<String>,
    #[arg(long)]
    end:      Option<String>,
  },
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:              String,
  #[serde(default)]
  username:         String,
  #[serde(default)]
  private_key_path: Option<PathBuf>,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  match &args.command {
    Command::Keygen { out_dir, bits } => keygen(out_dir, *bits),
    Command::Build { point, series, out } => build(point, series, out.as_deref()),
    Command::Sign { file } => {
      let body = read_file(file)?;
      let client = NodeClient::new(node_config(&args)?)?;
      println!("{}", client.authorization(&body_digest(&body))?);
      Ok(())
    }
    Command::Upload { file } => {
      let body = read_file(file)?;
      let client = NodeClient::new(node_config(&args)?)?;
      tracing::info!(file = %file.display(), bytes = body.len(), "uploading");
      finish(client.upload(body).await?)
    }
    Command::Read { point, property, start, end } => {
      let client = NodeClient::new(node_config(&args)?)?;
      let reply = client
        .observations(point, property, time_arg(start)?, time_arg(end)?)
        .await?;
      finish(reply)
    }
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

fn keygen(out_dir: &Path, bits: usize) -> Result<()> {
  let pair = generate_key_pair(bits).context("generating key pair")?;
  std::fs::create_dir_all(out_dir)
    .with_context(|| format!("creating {}", out_dir.display()))?;
  let private = out_dir.join("private.pem");
  let public = out_dir.join("public.pem");
  std::fs::write(&private, pair.private_pem)
    .with_context(|| format!("writing {}", private.display()))?;
  std::fs::write(&public, pair.public_pem)
    .with_context(|| format!("writing {}", public.display()))?;
  eprintln!("wrote {} and {}", private.display(), public.display());
  Ok(())
}

fn build(point: &str, series: &[String], out: Option<&Path>) -> Result<()> {
  let mut upload = UploadData::new(point);
  for arg in series {
    let (symbol, path) = csv::series_arg(arg)?;
    let src = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    let points = csv::parse_series(&src).with_context(|| format!("parsing {path}"))?;
    upload = upload.with_series(symbol, points);
  }
  let xml = build_upload_xml(&upload).context("building upload document")?;

  match out {
    Some(path) => {
      std::fs::write(path, xml).with_context(|| format!("writing {}", path.display()))?
    }
    None => println!("{xml}"),
  }
  Ok(())
}

fn finish(reply: Reply) -> Result<()> {
  match reply {
    Reply::Accepted(body) => {
      println!("{}", body.trim_end());
      Ok(())
    }
    Reply::Rejected { status, entries } => {
      for entry in &entries {
        eprintln!("[{}] {}", entry.code, entry.message);
      }
      bail!("request rejected with {status}")
    }
  }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// CLI flags override the config file, which overrides defaults.
fn node_config(args: &Args) -> Result<NodeConfig> {
  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  let username = args
    .user
    .clone()
    .or_else(|| (!file_cfg.username.is_empty()).then(|| file_cfg.username.clone()))
    .context("no account name given (--user or `username` in the config file)")?;
  let key_path = args
    .key
    .clone()
    .or(file_cfg.private_key_path)
    .context("no private key given (--key or `private_key_path` in the config file)")?;
  let private_key = std::fs::read_to_string(&key_path)
    .with_context(|| format!("reading private key {}", key_path.display()))?;

  Ok(NodeConfig {
    base_url: args
      .url
      .clone()
      .or_else(|| (!file_cfg.url.is_empty()).then(|| file_cfg.url.clone()))
      .unwrap_or_else(|| "http://localhost:8080".to_string()),
    username,
    private_key,
  })
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
  std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn time_arg(raw: &Option<String>) -> Result<Option<DateTime<Utc>>> {
  match raw.as_deref() {
    None => Ok(None),
    Some(raw) => match parse_point_time(raw) {
      Some(time) => Ok(Some(time)),
      None => bail!("not a date-time: {raw:?}"),
    },
  }
}
