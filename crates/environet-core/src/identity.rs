//! Identities, public keys, and permission checks.
//!
//! An [`Identity`] is built once per request from the `keyId` the sender
//! claims in its `Authorization` header, and dropped when the request ends.
//! Nothing here is cached across requests: keys can be revoked at any moment.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Permissions ─────────────────────────────────────────────────────────────

/// Required to `POST /upload`.
pub const PERMISSION_UPLOAD: &str = "api.upload";

/// Read observations of any monitoring point.
pub const PERMISSION_OBSERVATION_READ: &str = "api.observation.read";

/// Read observations of points owned by the caller's own operator.
pub const PERMISSION_OBSERVATION_READ_OWN: &str = "api.observation.readown";

// ─── Accounts and keys ───────────────────────────────────────────────────────

/// A registered API account (a data node or a human user).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
  pub id:          i64,
  pub username:    String,
  /// The operator this account acts for, if any.
  pub operator_id: Option<i64>,
  /// Free-form attributes kept alongside the account row.
  pub attributes:  serde_json::Value,
  pub created_at:  DateTime<Utc>,
}

/// A public key registered for an account.
///
/// Rotating a key marks earlier records revoked; records are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRecord {
  pub id:         i64,
  pub account_id: i64,
  /// PEM-encoded RSA public key (SPKI or PKCS#1).
  pub public_key: String,
  pub revoked:    bool,
  pub revoked_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
}

// ─── Identity ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
  /// A regular account looked up in the identity store.
  User,
  /// The internal service account; trusted with every permission.
  System,
}

/// The resolved sender of one request.
#[derive(Debug, Clone)]
pub struct Identity {
  kind:        IdentityKind,
  /// The name the sender claimed in `keyId`.
  name:        String,
  account:     Option<Account>,
  public_key:  Option<String>,
  /// Loaded on first authorization; `None` until then.
  permissions: Option<BTreeSet<String>>,
  /// The permission set that satisfied the last successful authorization.
  authorized:  Option<Vec<String>>,
}

impl Identity {
  /// An identity for a regular account with its current (non-revoked) key.
  pub fn user(account: Account, public_key: Option<String>) -> Self {
    Self {
      kind: IdentityKind::User,
      name: account.username.clone(),
      account: Some(account),
      public_key,
      permissions: None,
      authorized: None,
    }
  }

  /// The system identity. Its key comes from server configuration.
  pub fn system(name: impl Into<String>, public_key: Option<String>) -> Self {
    Self {
      kind: IdentityKind::System,
      name: name.into(),
      account: None,
      public_key,
      permissions: None,
      authorized: None,
    }
  }

  pub fn kind(&self) -> IdentityKind { self.kind }

  pub fn name(&self) -> &str { &self.name }

  pub fn is_system(&self) -> bool { self.kind == IdentityKind::System }

  pub fn account(&self) -> Option<&Account> { self.account.as_ref() }

  pub fn account_id(&self) -> Option<i64> { self.account.as_ref().map(|a| a.id) }

  pub fn operator_id(&self) -> Option<i64> {
    self.account.as_ref().and_then(|a| a.operator_id)
  }

  pub fn public_key(&self) -> Option<&str> { self.public_key.as_deref() }

  /// Whether the permission set still has to be fetched from the store.
  /// The system identity never needs one.
  pub fn needs_permissions(&self) -> bool {
    !self.is_system() && self.permissions.is_none()
  }

  pub fn set_permissions(&mut self, permissions: BTreeSet<String>) {
    self.permissions = Some(permissions);
  }

  pub fn permissions(&self) -> Option<&BTreeSet<String>> {
    self.permissions.as_ref()
  }

  /// Check `alternatives` in order and record the first set the identity
  /// holds in full. Returns the matched set, or `None` when no set matches.
  ///
  /// An empty `alternatives` slice requires nothing and always matches. The
  /// system identity matches the first alternative unconditionally.
  pub fn authorize(&mut self, alternatives: &[&[&str]]) -> Option<&[String]> {
    self.authorized = None;
    let matched: Vec<String> = if alternatives.is_empty() {
      Vec::new()
    } else if self.is_system() {
      to_owned_set(alternatives[0])
    } else {
      let held = self.permissions.as_ref()?;
      let set = alternatives
        .iter()
        .find(|set| set.iter().all(|p| held.contains(*p)))?;
      to_owned_set(set)
    };
    self.authorized = Some(matched);
    self.authorized.as_deref()
  }

  /// Whether `permission` was part of the set this call was authorized with.
  /// Always true for the system identity.
  pub fn authorized_for(&self, permission: &str) -> bool {
    if self.is_system() {
      return true;
    }
    self
      .authorized
      .as_ref()
      .is_some_and(|set| set.iter().any(|p| p == permission))
  }
}

fn to_owned_set(set: &[&str]) -> Vec<String> {
  set.iter().map(|p| (*p).to_owned()).collect()
}
