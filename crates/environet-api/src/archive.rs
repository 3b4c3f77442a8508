//! Best-effort archive of raw upload bodies.
//!
//! Each authenticated upload body is written verbatim to its own file before
//! it is parsed, so rejected documents can be inspected later. Archive
//! failures are logged and otherwise ignored.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct Archive {
  dir: Option<PathBuf>,
}

impl Archive {
  pub fn new(dir: Option<PathBuf>) -> Self { Self { dir } }

  /// An archive that stores nothing.
  pub fn disabled() -> Self { Self::default() }

  pub fn dir(&self) -> Option<&Path> { self.dir.as_deref() }

  /// Write `body` as `<dir>/<YYYYMMDD_HHMMSS_ffffff>_<uuid>.xml`.
  ///
  /// Returns the written path, or `None` when archiving is disabled or the
  /// write failed.
  pub async fn store(&self, body: &[u8], now: DateTime<Utc>) -> Option<PathBuf> {
    let dir = self.dir.as_ref()?;
    let path = dir.join(file_name(now, Uuid::new_v4()));

    let written = async {
      tokio::fs::create_dir_all(dir).await?;
      tokio::fs::write(&path, body).await
    }
    .await;

    match written {
      Ok(()) => {
        tracing::debug!(path = %path.display(), bytes = body.len(), "archived upload body");
        Some(path)
      }
      Err(e) => {
        tracing::warn!(path = %path.display(), error = %e, "could not archive upload body");
        None
      }
    }
  }
}

fn file_name(now: DateTime<Utc>, id: Uuid) -> String {
  format!("{}_{id}.xml", now.format("%Y%m%d_%H%M%S_%6f"))
}
