//! `POST /upload`: the ingestion pipeline.
//!
//! ```text
//! Authorization header ─▶ identity ─▶ signature over md5(body) ─▶ api.upload
//!   ─▶ archive ─▶ well-formedness ─▶ schema ─▶ resolve + persist (one tx)
//! ```
//!
//! Each stage fails with its own [`ApiError`]; the first failure ends the
//! request and is rendered as an `ErrorResponse`.

use axum::{
  body::Body,
  extract::{Request, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use chrono::Utc;
use environet_core::{
  identity::PERMISSION_UPLOAD, signature::body_digest, store::DistributionStore,
};
use environet_xml::parse_upload;

use crate::{
  AppState,
  auth::{authenticate, authorize},
  error::ApiError,
  handlers::{collect_body, remote_ip},
};

pub async fn handler<S>(State(state): State<AppState<S>>, req: Request<Body>) -> Response
where
  S: DistributionStore + Clone + 'static,
{
  match ingest(&state, req).await {
    Ok(()) => (StatusCode::OK, "OK").into_response(),
    Err(e) => e.into_response(),
  }
}

async fn ingest<S>(state: &AppState<S>, req: Request<Body>) -> Result<(), ApiError>
where
  S: DistributionStore,
{
  let remote = remote_ip(&req);
  let headers = req.headers().clone();
  let body = collect_body(req, state.config.max_body_bytes).await?;

  let mut identity = authenticate(state, &headers, remote, &body_digest(&body)).await?;
  authorize(state, &mut identity, &[&[PERMISSION_UPLOAD]]).await?;

  let now = Utc::now();
  state.archive.store(&body, now).await;

  // A body that is not UTF-8 cannot be a well-formed upload document.
  let xml = std::str::from_utf8(&body)
    .map_err(|e| ApiError::MalformedXml(format!("body is not valid UTF-8: {e}")))?;
  let upload = parse_upload(xml)?;
  let points = upload.point_count();

  let outcome = state.store.apply_upload(upload, now).await?;

  tracing::info!(
    sender = identity.name(),
    point = outcome.point_id,
    family = %outcome.family,
    series = outcome.series.len(),
    received = points,
    inserted = outcome.inserted(),
    "upload accepted"
  );
  for series in &outcome.series {
    tracing::debug!(
      symbol = %series.symbol,
      time_series = series.time_series_id,
      created = series.created,
      inserted = series.inserted,
      duplicates = series.duplicates(),
      "series updated"
    );
  }

  Ok(())
}
