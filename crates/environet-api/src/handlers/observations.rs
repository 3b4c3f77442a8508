//! `GET /observations`: read the current values of one series.
//!
//! Signed over the `token` query parameter instead of a body. Callers with
//! `api.observation.read` may read any point; callers holding only
//! `api.observation.readown` are limited to points of their own operator.

use axum::{
  body::Body,
  extract::{Query, Request, State},
  http::{HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use environet_core::{
  identity::{PERMISSION_OBSERVATION_READ, PERMISSION_OBSERVATION_READ_OWN},
  monitoring::ObservationRange,
  store::DistributionStore,
  upload::{DataPoint, UploadData, parse_point_time},
};
use environet_xml::write_upload_xml;
use serde::Deserialize;

use crate::{
  AppState,
  auth::{authenticate, authorize},
  error::ApiError,
  handlers::remote_ip,
};

#[derive(Debug, Default, Deserialize)]
pub struct ObservationQuery {
  pub token:    Option<String>,
  /// National code of the monitoring point.
  pub point:    Option<String>,
  /// Property symbol.
  pub property: Option<String>,
  pub start:    Option<String>,
  pub end:      Option<String>,
}

pub async fn handler<S>(State(state): State<AppState<S>>, req: Request<Body>) -> Response
where
  S: DistributionStore + Clone + 'static,
{
  match read(&state, req).await {
    Ok(xml) => {
      let mut res = (StatusCode::OK, xml).into_response();
      res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml; charset=utf-8"),
      );
      res
    }
    Err(e) => e.into_response(),
  }
}

async fn read<S>(state: &AppState<S>, req: Request<Body>) -> Result<String, ApiError>
where
  S: DistributionStore,
{
  let Query(query) = Query::<ObservationQuery>::try_from_uri(req.uri())
    .map_err(|e| ApiError::InvalidQuery(e.body_text()))?;

  let token = query
    .token
    .as_deref()
    .filter(|t| !t.is_empty())
    .ok_or(ApiError::MissingToken)?;

  let mut identity = authenticate(state, req.headers(), remote_ip(&req), token).await?;
  authorize(state, &mut identity, &[
    &[PERMISSION_OBSERVATION_READ],
    &[PERMISSION_OBSERVATION_READ_OWN],
  ])
  .await?;

  let ncd = required(&query.point, "point")?;
  let symbol = required(&query.property, "property")?;
  let range = ObservationRange {
    start: optional_time(&query.start, "start")?,
    end:   optional_time(&query.end, "end")?,
  };

  let point = state
    .store
    .find_monitoring_point(ncd)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::UnknownMonitoringPoint(ncd.to_owned()))?;

  if !identity.authorized_for(PERMISSION_OBSERVATION_READ) {
    let own = point.operator_id.is_some() && point.operator_id == identity.operator_id();
    if !own {
      tracing::warn!(sender = identity.name(), point = ncd, "point outside own operator");
      return Err(ApiError::Forbidden);
    }
  }

  let property = state
    .store
    .find_point_property(point.family, point.id, symbol)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::PropertyNotAllowedForPoint {
      point:  ncd.to_owned(),
      symbol: symbol.to_owned(),
    })?;

  let observations = state
    .store
    .latest_observations(point.family, point.id, property.id, range)
    .await
    .map_err(ApiError::store)?;

  let document = UploadData::new(point.ncd.clone()).with_series(
    property.symbol.clone(),
    observations.iter().map(|o| DataPoint::new(o.time, o.value)),
  );
  write_upload_xml(&document).map_err(ApiError::from)
}

fn required<'q>(value: &'q Option<String>, name: &str) -> Result<&'q str, ApiError> {
  value
    .as_deref()
    .filter(|v| !v.is_empty())
    .ok_or_else(|| ApiError::InvalidQuery(format!("missing parameter {name:?}")))
}

fn optional_time(value: &Option<String>, name: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
  value
    .as_deref()
    .map(|raw| {
      parse_point_time(raw)
        .ok_or_else(|| ApiError::InvalidQuery(format!("{name} is not a valid date-time: {raw:?}")))
    })
    .transpose()
}
