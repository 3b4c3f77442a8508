//! HTTP ingestion endpoint of an Environet distribution node.
//!
//! Exposes an axum [`Router`] backed by any [`DistributionStore`]:
//!
//! - `POST /upload` takes a signed `UploadData` document and persists it.
//! - `GET /observations` returns the current values of one series.
//!
//! Every failure is answered with an `ErrorResponse` document carrying
//! numeric error codes; see [`error::ApiError`].

pub mod archive;
pub mod auth;
pub mod error;
pub mod handlers;

pub use error::ApiError;

use std::{
  net::{IpAddr, Ipv4Addr, Ipv6Addr},
  path::PathBuf,
  sync::Arc,
};

use axum::{
  Router,
  routing::{get, post},
};
use environet_core::store::DistributionStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use archive::Archive;
use auth::AuthConfig;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `ENVIRONET_*` environment variables. Every field has a default.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                   String,
  pub port:                   u16,
  pub store_path:             PathBuf,
  /// Where raw upload bodies are archived. Archiving is off when unset.
  pub upload_archive_dir:     Option<PathBuf>,
  /// `keyId` of the internal system identity. Empty disables it.
  pub system_account:         String,
  pub system_public_key_path: Option<PathBuf>,
  pub system_allowed_addrs:   Vec<IpAddr>,
  pub max_body_bytes:         usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                   "127.0.0.1".to_string(),
      port:                   8080,
      store_path:             PathBuf::from("environet.db"),
      upload_archive_dir:     None,
      system_account:         "environet-system".to_string(),
      system_public_key_path: None,
      system_allowed_addrs:   vec![
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(Ipv6Addr::LOCALHOST),
      ],
      max_body_bytes:         16 * 1024 * 1024,
    }
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState<S: DistributionStore> {
  pub store:   Arc<S>,
  pub config:  Arc<ServerConfig>,
  pub auth:    Arc<AuthConfig>,
  pub archive: Arc<Archive>,
}

impl<S: DistributionStore> AppState<S> {
  /// Assemble state from a loaded configuration. `system_public_key` is the
  /// PEM read from `system_public_key_path`, if any.
  pub fn new(store: S, config: ServerConfig, system_public_key: Option<String>) -> Self {
    let auth = AuthConfig::new(&config, system_public_key);
    let archive = Archive::new(config.upload_archive_dir.clone());
    Self {
      store:   Arc::new(store),
      config:  Arc::new(config),
      auth:    Arc::new(auth),
      archive: Arc::new(archive),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the node's axum [`Router`].
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so
/// the system identity can check the peer address.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: DistributionStore + Clone + 'static,
{
  Router::new()
    .route("/upload",       post(handlers::upload::handler::<S>))
    .route("/observations", get(handlers::observations::handler::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::{
    net::SocketAddr,
    sync::LazyLock,
  };

  use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
  };
  use chrono::{DateTime, TimeZone, Utc};
  use environet_core::{
    identity::{
      Account, PERMISSION_OBSERVATION_READ, PERMISSION_OBSERVATION_READ_OWN, PERMISSION_UPLOAD,
    },
    monitoring::{DatasetFamily, NewMonitoringPoint, NewObservedProperty},
    signature::{KeyPair, SignatureHeader, body_digest, generate_key_pair},
    upload::{DataPoint, UploadData},
  };
  use environet_store_sqlite::SqliteStore;
  use environet_xml::{build_upload_xml, parse_error_response, parse_upload};
  use serde_json::json;
  use tower::ServiceExt;

  use super::*;

  static KEYS: LazyLock<KeyPair> = LazyLock::new(|| generate_key_pair(1024).expect("key pair"));

  static NEXT_KEYS: LazyLock<KeyPair> =
    LazyLock::new(|| generate_key_pair(1024).expect("rotated key pair"));

  static SYSTEM_KEYS: LazyLock<KeyPair> =
    LazyLock::new(|| generate_key_pair(1024).expect("system key pair"));

  const SYSTEM: &str = "environet-system";

  /// A node with hydro point `H001` (owned by operator `OVF`) allowed to
  /// report `h`, an unlinked hydro property `Q`, and account `node-hu` of
  /// the same operator holding `api.upload`.
  struct Harness {
    state:    AppState<SqliteStore>,
    account:  Account,
    operator: i64,
  }

  async fn harness_with(config: ServerConfig) -> Harness {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let operator = store.add_operator("OVF").await.unwrap();
    let account = store
      .add_account("node-hu", Some(operator), json!({}))
      .await
      .unwrap();
    store.register_public_key(account.id, &KEYS.public_pem).await.unwrap();
    store.grant_account_permission(account.id, PERMISSION_UPLOAD).await.unwrap();

    let mut point = NewMonitoringPoint::new(DatasetFamily::Hydro, "H001");
    point.operator_id = Some(operator);
    let point = store.add_monitoring_point(point).await.unwrap();
    let h = store
      .add_observed_property(DatasetFamily::Hydro, NewObservedProperty::new("h", "cm"))
      .await
      .unwrap();
    store
      .add_observed_property(DatasetFamily::Hydro, NewObservedProperty::new("Q", "m3/s"))
      .await
      .unwrap();
    store.link_property(DatasetFamily::Hydro, point.id, h.id).await.unwrap();

    let state = AppState::new(store, config, Some(SYSTEM_KEYS.public_pem.clone()));
    Harness { state, account, operator }
  }

  async fn harness() -> Harness { harness_with(ServerConfig::default()).await }

  fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() }

  fn upload_body(point: &str, symbol: &str, value: f64) -> String {
    build_upload_xml(&UploadData::new(point).with_series(symbol, [DataPoint::new(t0(), value)]))
      .unwrap()
  }

  fn signature(key_id: &str, canonical: &str, keys: &KeyPair) -> String {
    SignatureHeader::create(key_id, canonical, &keys.private_pem)
      .unwrap()
      .to_string()
  }

  fn upload_request(key_id: &str, keys: &KeyPair, body: &str) -> Request<Body> {
    Request::builder()
      .method("POST")
      .uri("/upload")
      .header(header::AUTHORIZATION, signature(key_id, &body_digest(body.as_bytes()), keys))
      .body(Body::from(body.to_owned()))
      .unwrap()
  }

  fn read_request(key_id: &str, keys: &KeyPair, query: &str) -> Request<Body> {
    Request::builder()
      .method("GET")
      .uri(format!("/observations?token=tok-1&{query}"))
      .header(header::AUTHORIZATION, signature(key_id, "tok-1", keys))
      .body(Body::empty())
      .unwrap()
  }

  fn from_peer(mut req: Request<Body>, addr: &str) -> Request<Body> {
    let addr: SocketAddr = addr.parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
  }

  async fn send(state: &AppState<SqliteStore>, req: Request<Body>) -> (StatusCode, String) {
    let resp = router(state.clone()).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
  }

  fn codes(body: &str) -> Vec<u16> {
    parse_error_response(body)
      .unwrap()
      .into_iter()
      .map(|e| e.code)
      .collect()
  }

  async fn stored(h: &Harness) -> usize {
    h.state.store.result_count(DatasetFamily::Hydro).await.unwrap()
  }

  // ── Upload: accepted ──────────────────────────────────────────────────────

  #[tokio::test]
  async fn signed_upload_is_persisted() {
    let h = harness().await;
    let body = upload_body("H001", "h", 12.5);

    let (status, text) = send(&h.state, upload_request("node-hu", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::OK, "{text}");
    assert_eq!(text, "OK");
    assert_eq!(stored(&h).await, 1);

    // Resubmitting the same document adds nothing.
    let (status, _) = send(&h.state, upload_request("node-hu", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored(&h).await, 1);
  }

  #[tokio::test]
  async fn permission_through_group_is_enough() {
    let h = harness().await;
    let store = &h.state.store;
    let other = store.add_account("node-at", None, json!({})).await.unwrap();
    store.register_public_key(other.id, &NEXT_KEYS.public_pem).await.unwrap();
    let group = store.add_group("data-nodes").await.unwrap();
    store.grant_group_permission(group, PERMISSION_UPLOAD).await.unwrap();
    store.add_account_to_group(other.id, group).await.unwrap();

    let body = upload_body("H001", "h", 1.0);
    let (status, text) = send(&h.state, upload_request("node-at", &NEXT_KEYS, &body)).await;
    assert_eq!(status, StatusCode::OK, "{text}");
  }

  // ── Upload: semantic rejections ───────────────────────────────────────────

  #[tokio::test]
  async fn unknown_point_is_rejected() {
    let h = harness().await;
    let body = upload_body("UNKNOWN", "h", 1.0);
    let (status, text) = send(&h.state, upload_request("node-hu", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(codes(&text), vec![401]);
  }

  #[tokio::test]
  async fn unlinked_property_rolls_back_the_upload() {
    let h = harness().await;
    let t1 = t0() + chrono::Duration::hours(1);
    let body = build_upload_xml(
      &UploadData::new("H001")
        .with_series("h", [DataPoint::new(t0(), 1.0), DataPoint::new(t1, 2.0)])
        .with_series("Q", [DataPoint::new(t0(), 3.0)]),
    )
    .unwrap();

    let (status, text) = send(&h.state, upload_request("node-hu", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(codes(&text), vec![402]);
    assert_eq!(stored(&h).await, 0);
  }

  // ── Upload: authentication ────────────────────────────────────────────────

  #[tokio::test]
  async fn missing_header_is_101() {
    let h = harness().await;
    let req = Request::builder()
      .method("POST")
      .uri("/upload")
      .body(Body::from(upload_body("H001", "h", 1.0)))
      .unwrap();
    let (status, text) = send(&h.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![101]);
  }

  #[tokio::test]
  async fn non_signature_scheme_is_102() {
    let h = harness().await;
    let req = Request::builder()
      .method("POST")
      .uri("/upload")
      .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
      .body(Body::from(upload_body("H001", "h", 1.0)))
      .unwrap();
    let (status, text) = send(&h.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![102]);
  }

  #[tokio::test]
  async fn unknown_sender_is_103() {
    let h = harness().await;
    let body = upload_body("H001", "h", 1.0);
    let (status, text) = send(&h.state, upload_request("nobody", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![103]);
  }

  #[tokio::test]
  async fn account_without_key_is_104() {
    let h = harness().await;
    h.state.store.add_account("keyless", None, json!({})).await.unwrap();
    let body = upload_body("H001", "h", 1.0);
    let (status, text) = send(&h.state, upload_request("keyless", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![104]);
  }

  #[tokio::test]
  async fn tampered_body_is_106() {
    let h = harness().await;
    let signed = upload_body("H001", "h", 1.0);
    let sent = upload_body("H001", "h", 999.0);
    let req = Request::builder()
      .method("POST")
      .uri("/upload")
      .header(header::AUTHORIZATION, signature("node-hu", &body_digest(signed.as_bytes()), &KEYS))
      .body(Body::from(sent))
      .unwrap();

    let (status, text) = send(&h.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![106]);
    assert_eq!(stored(&h).await, 0);
  }

  #[tokio::test]
  async fn rotated_key_replaces_the_old_one() {
    let h = harness().await;
    h.state
      .store
      .register_public_key(h.account.id, &NEXT_KEYS.public_pem)
      .await
      .unwrap();
    let body = upload_body("H001", "h", 1.0);

    let (status, text) = send(&h.state, upload_request("node-hu", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![106]);

    let (status, _) = send(&h.state, upload_request("node-hu", &NEXT_KEYS, &body)).await;
    assert_eq!(status, StatusCode::OK);
  }

  #[tokio::test]
  async fn missing_permission_is_201() {
    let h = harness().await;
    let store = &h.state.store;
    let reader = store.add_account("reader", None, json!({})).await.unwrap();
    store.register_public_key(reader.id, &NEXT_KEYS.public_pem).await.unwrap();
    store
      .grant_account_permission(reader.id, PERMISSION_OBSERVATION_READ)
      .await
      .unwrap();

    let body = upload_body("H001", "h", 1.0);
    let (status, text) = send(&h.state, upload_request("reader", &NEXT_KEYS, &body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(codes(&text), vec![201]);
  }

  // ── Upload: system identity ───────────────────────────────────────────────

  #[tokio::test]
  async fn system_identity_from_an_allowed_peer() {
    let h = harness().await;
    let body = upload_body("H001", "h", 4.0);
    let req = from_peer(upload_request(SYSTEM, &SYSTEM_KEYS, &body), "127.0.0.1:40000");
    let (status, text) = send(&h.state, req).await;
    assert_eq!(status, StatusCode::OK, "{text}");
    assert_eq!(stored(&h).await, 1);
  }

  #[tokio::test]
  async fn system_identity_is_refused_elsewhere() {
    let h = harness().await;
    let body = upload_body("H001", "h", 4.0);

    let remote = from_peer(upload_request(SYSTEM, &SYSTEM_KEYS, &body), "10.1.2.3:40000");
    let (status, text) = send(&h.state, remote).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![103]);

    // No peer address at all.
    let (_, text) = send(&h.state, upload_request(SYSTEM, &SYSTEM_KEYS, &body)).await;
    assert_eq!(codes(&text), vec![103]);
  }

  #[tokio::test]
  async fn system_identity_still_checks_its_signature() {
    let h = harness().await;
    let body = upload_body("H001", "h", 4.0);
    let req = from_peer(upload_request(SYSTEM, &KEYS, &body), "127.0.0.1:40000");
    let (status, text) = send(&h.state, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![106]);
  }

  // ── Upload: document ──────────────────────────────────────────────────────

  #[tokio::test]
  async fn malformed_xml_is_301() {
    let h = harness().await;
    let body = "<environet:UploadData xmlns:environet=\"environet\">";
    let (status, text) = send(&h.state, upload_request("node-hu", &KEYS, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(codes(&text), vec![301]);
  }

  #[tokio::test]
  async fn every_schema_violation_is_reported() {
    let h = harness().await;
    let body = r#"<environet:UploadData xmlns:environet="environet">
  <environet:MonitoringPointId>H001</environet:MonitoringPointId>
  <environet:Property>
    <environet:PropertyId>h</environet:PropertyId>
    <environet:TimeSeries>
      <environet:Point>
        <environet:PointTime>yesterday</environet:PointTime>
        <environet:PointValue>high</environet:PointValue>
      </environet:Point>
    </environet:TimeSeries>
  </environet:Property>
</environet:UploadData>"#;

    let (status, text) = send(&h.state, upload_request("node-hu", &KEYS, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let entries = parse_error_response(&text).unwrap();
    assert_eq!(entries.len(), 2, "{entries:?}");
    assert!(entries.iter().all(|e| e.code == 302));
    assert!(entries[0].message.contains("PointTime"), "{}", entries[0].message);
    assert!(entries[1].message.contains("PointValue"), "{}", entries[1].message);
    assert_eq!(stored(&h).await, 0);
  }

  #[tokio::test]
  async fn oversized_body_is_303() {
    let h = harness_with(ServerConfig { max_body_bytes: 64, ..ServerConfig::default() }).await;
    let body = upload_body("H001", "h", 1.0);
    let (status, text) = send(&h.state, upload_request("node-hu", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(codes(&text), vec![303]);
  }

  #[tokio::test]
  async fn authenticated_bodies_are_archived_before_parsing() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
      upload_archive_dir: Some(dir.path().to_path_buf()),
      ..ServerConfig::default()
    };
    let h = harness_with(config).await;

    let body = "<not-closed>";
    let (status, _) = send(&h.state, upload_request("node-hu", &KEYS, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // Unauthenticated bodies are not archived.
    send(&h.state, upload_request("nobody", &KEYS, body)).await;

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
    let path = files[0].as_ref().unwrap().path();
    assert_eq!(std::fs::read_to_string(path).unwrap(), body);
  }

  // ── Observations ──────────────────────────────────────────────────────────

  async fn with_reader(h: &Harness, name: &str, operator: Option<i64>, permission: &str) {
    let store = &h.state.store;
    let reader = store.add_account(name, operator, json!({})).await.unwrap();
    store.register_public_key(reader.id, &NEXT_KEYS.public_pem).await.unwrap();
    store.grant_account_permission(reader.id, permission).await.unwrap();
  }

  async fn seed(h: &Harness) {
    let body = upload_body("H001", "h", 12.5);
    let (status, _) = send(&h.state, upload_request("node-hu", &KEYS, &body)).await;
    assert_eq!(status, StatusCode::OK);
  }

  #[tokio::test]
  async fn reader_gets_the_current_series() {
    let h = harness().await;
    seed(&h).await;
    with_reader(&h, "reader", None, PERMISSION_OBSERVATION_READ).await;

    let req = read_request("reader", &NEXT_KEYS, "point=H001&property=h");
    let (status, text) = send(&h.state, req).await;
    assert_eq!(status, StatusCode::OK, "{text}");

    let document = parse_upload(&text).unwrap();
    assert_eq!(document.monitoring_point_id, "H001");
    assert_eq!(document.properties[0].symbol, "h");
    assert_eq!(document.properties[0].points, vec![DataPoint::new(t0(), 12.5)]);
  }

  #[tokio::test]
  async fn read_range_excludes_earlier_values() {
    let h = harness().await;
    seed(&h).await;
    with_reader(&h, "reader", None, PERMISSION_OBSERVATION_READ).await;

    let req = read_request("reader", &NEXT_KEYS, "point=H001&property=h&start=2024-01-02T00:00:00Z");
    let (status, text) = send(&h.state, req).await;
    assert_eq!(status, StatusCode::OK, "{text}");
    let root = environet_xml::parse_document(&text).unwrap();
    let series = root.child("Property").and_then(|p| p.child("TimeSeries")).unwrap();
    assert!(series.children.is_empty());
  }

  #[tokio::test]
  async fn readown_is_limited_to_the_own_operator() {
    let h = harness().await;
    seed(&h).await;
    with_reader(&h, "same-operator", Some(h.operator), PERMISSION_OBSERVATION_READ_OWN).await;
    let stranger = h.state.store.add_operator("ARSO").await.unwrap();
    with_reader(&h, "other-operator", Some(stranger), PERMISSION_OBSERVATION_READ_OWN).await;

    let (status, text) =
      send(&h.state, read_request("same-operator", &NEXT_KEYS, "point=H001&property=h")).await;
    assert_eq!(status, StatusCode::OK, "{text}");

    let (status, text) =
      send(&h.state, read_request("other-operator", &NEXT_KEYS, "point=H001&property=h")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(codes(&text), vec![201]);
  }

  #[tokio::test]
  async fn read_rejections() {
    let h = harness().await;
    with_reader(&h, "reader", None, PERMISSION_OBSERVATION_READ).await;

    let no_token = Request::builder()
      .uri("/observations?point=H001&property=h")
      .header(header::AUTHORIZATION, signature("reader", "tok-1", &NEXT_KEYS))
      .body(Body::empty())
      .unwrap();
    let (status, text) = send(&h.state, no_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(codes(&text), vec![105]);

    let cases = [
      ("point=H001&property=h&start=soon", 304),
      ("property=h", 304),
      ("point=UNKNOWN&property=h", 401),
      ("point=H001&property=Q", 402),
    ];
    for (query, code) in cases {
      let (status, text) = send(&h.state, read_request("reader", &NEXT_KEYS, query)).await;
      assert_eq!(status, StatusCode::BAD_REQUEST, "{query}");
      assert_eq!(codes(&text), vec![code], "{query}");
    }

    // Signed over a different token.
    let req = Request::builder()
      .uri("/observations?token=tok-2&point=H001&property=h")
      .header(header::AUTHORIZATION, signature("reader", "tok-1", &NEXT_KEYS))
      .body(Body::empty())
      .unwrap();
    let (_, text) = send(&h.state, req).await;
    assert_eq!(codes(&text), vec![106]);
  }

  #[tokio::test]
  async fn uploader_cannot_read() {
    let h = harness().await;
    let (status, text) =
      send(&h.state, read_request("node-hu", &KEYS, "point=H001&property=h")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(codes(&text), vec![201]);
  }

  #[test]
  fn config_defaults_fill_missing_keys() {
    let config: ServerConfig = config::Config::builder()
      .set_override("port", 9000)
      .unwrap()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(config.port, 9000);
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.system_allowed_addrs.len(), 2);
    assert!(config.upload_archive_dir.is_none());
  }
}
