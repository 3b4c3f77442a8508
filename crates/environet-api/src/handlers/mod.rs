//! Route handlers.

pub mod observations;
pub mod upload;

use std::net::{IpAddr, SocketAddr};

use axum::{
  body::Body,
  extract::{ConnectInfo, Request},
};
use bytes::Bytes;
use http_body_util::LengthLimitError;

use crate::error::ApiError;

/// Peer address recorded by `into_make_service_with_connect_info`. Absent
/// when the router is driven without a socket, as in tests.
pub(crate) fn remote_ip(req: &Request<Body>) -> Option<IpAddr> {
  req
    .extensions()
    .get::<ConnectInfo<SocketAddr>>()
    .map(|ConnectInfo(addr)| addr.ip())
}

pub(crate) async fn collect_body(req: Request<Body>, limit: usize) -> Result<Bytes, ApiError> {
  axum::body::to_bytes(req.into_body(), limit)
    .await
    .map_err(|e| body_error(&e, limit))
}

/// Only the length limit is the sender's fault. Disconnects and transport
/// failures are not.
fn body_error(e: &axum::Error, limit: usize) -> ApiError {
  let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
  while let Some(err) = source {
    if err.is::<LengthLimitError>() {
      return ApiError::BodyTooLarge(limit);
    }
    source = err.source();
  }
  ApiError::Internal(format!("could not read request body: {e}"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn length_limit_is_body_too_large() {
    let req = Request::new(Body::from("0123456789"));
    let err = collect_body(req, 4).await.unwrap_err();
    assert!(matches!(err, ApiError::BodyTooLarge(4)), "{err}");

    let req = Request::new(Body::from("0123"));
    assert_eq!(collect_body(req, 4).await.unwrap().as_ref(), b"0123");
  }

  #[test]
  fn transport_failures_are_internal() {
    let err = axum::Error::new(std::io::Error::new(
      std::io::ErrorKind::ConnectionReset,
      "connection reset by peer",
    ));
    let mapped = body_error(&err, 4);
    assert!(matches!(mapped, ApiError::Internal(_)), "{mapped}");
    assert_eq!(mapped.code(), 500);
  }
}
