//! The `DistributionStore` trait.
//!
//! The trait is implemented by storage backends (e.g.
//! `environet-store-sqlite`). The HTTP layer depends on this abstraction, not
//! on any concrete backend, and receives the store as an explicit handle.

use std::{collections::BTreeSet, future::Future};

use chrono::{DateTime, Utc};

use crate::{
  identity::{Account, PublicKeyRecord},
  monitoring::{
    DatasetFamily, MonitoringPoint, Observation, ObservationRange, ObservedProperty,
  },
  upload::{IngestError, UploadData, UploadOutcome},
};

/// Abstraction over an Environet distribution-node store.
///
/// Identity, key and permission lookups are never cached by implementations:
/// a revoked key must be rejected by the very next request.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes (e.g. tokio with `axum`).
pub trait DistributionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Identities ────────────────────────────────────────────────────────

  /// Look up an account by the name senders put in `keyId`.
  fn find_account<'a>(
    &'a self,
    username: &'a str,
  ) -> impl Future<Output = Result<Option<Account>, Self::Error>> + Send + 'a;

  /// The most recently registered non-revoked key of an account.
  fn current_public_key(
    &self,
    account_id: i64,
  ) -> impl Future<Output = Result<Option<PublicKeyRecord>, Self::Error>> + Send + '_;

  /// Direct grants united with the grants of every group the account is in.
  fn permissions_for(
    &self,
    account_id: i64,
  ) -> impl Future<Output = Result<BTreeSet<String>, Self::Error>> + Send + '_;

  // ── Monitoring points ─────────────────────────────────────────────────

  /// Resolve a national code, trying each family in
  /// [`DatasetFamily::RESOLUTION_ORDER`].
  fn find_monitoring_point<'a>(
    &'a self,
    ncd: &'a str,
  ) -> impl Future<Output = Result<Option<MonitoringPoint>, Self::Error>> + Send + 'a;

  /// Resolve a property symbol through the point's allow-list. Returns `None`
  /// when the symbol is unknown or not linked to the point.
  fn find_point_property<'a>(
    &'a self,
    family: DatasetFamily,
    point_id: i64,
    symbol: &'a str,
  ) -> impl Future<Output = Result<Option<ObservedProperty>, Self::Error>> + Send + 'a;

  // ── Ingestion ─────────────────────────────────────────────────────────

  /// Resolve and persist a validated upload in one transaction.
  ///
  /// Property blocks are applied in document order. The first block that
  /// cannot be resolved aborts the whole upload and nothing becomes visible.
  /// Observations identical to stored ones are skipped silently.
  fn apply_upload(
    &self,
    upload: UploadData,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<UploadOutcome, IngestError<Self::Error>>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// The most recently created value per timestamp of a series, ordered by
  /// time. An absent series yields an empty list.
  fn latest_observations(
    &self,
    family: DatasetFamily,
    point_id: i64,
    property_id: i64,
    range: ObservationRange,
  ) -> impl Future<Output = Result<Vec<Observation>, Self::Error>> + Send + '_;
}
