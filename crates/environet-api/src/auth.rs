//! Request authentication and authorization.
//!
//! A request is authenticated by its `Signature` header: the claimed
//! `keyId` is resolved to an [`Identity`], and the signature is verified
//! over the request's canonical string with that identity's current key.
//! Lookups go to the store on every request; nothing is cached.

use std::net::IpAddr;

use axum::http::{HeaderMap, header};
use environet_core::{identity::Identity, signature::SignatureHeader, store::DistributionStore};

use crate::{AppState, ServerConfig, error::ApiError};

/// Settings for the internal system identity.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
  /// `keyId` reserved for the system identity.
  pub system_account:       String,
  /// PEM public key the system identity signs with. Without one the system
  /// identity cannot authenticate.
  pub system_public_key:    Option<String>,
  /// Peers allowed to act as the system identity.
  pub system_allowed_addrs: Vec<IpAddr>,
}

impl AuthConfig {
  pub fn new(config: &ServerConfig, system_public_key: Option<String>) -> Self {
    Self {
      system_account: config.system_account.clone(),
      system_public_key,
      system_allowed_addrs: config.system_allowed_addrs.clone(),
    }
  }

  /// Whether a request claiming `key_id` from `remote` is the system.
  fn is_system(&self, key_id: &str, remote: Option<IpAddr>) -> bool {
    !self.system_account.is_empty()
      && key_id == self.system_account
      && remote.is_some_and(|ip| self.system_allowed_addrs.contains(&ip))
  }
}

// ─── Authentication ──────────────────────────────────────────────────────────

/// Authenticate a request whose signature covers `canonical`.
pub async fn authenticate<S>(
  state: &AppState<S>,
  headers: &HeaderMap,
  remote: Option<IpAddr>,
  canonical: &str,
) -> Result<Identity, ApiError>
where
  S: DistributionStore,
{
  let value = headers
    .get(header::AUTHORIZATION)
    .ok_or(ApiError::MissingAuthHeader)?
    .to_str()
    .map_err(|_| ApiError::MalformedAuthHeader("header is not visible ASCII".into()))?;
  let signature =
    SignatureHeader::parse(value).map_err(|e| ApiError::MalformedAuthHeader(e.to_string()))?;

  let identity = resolve_identity(state, &signature.key_id, remote).await?;
  let public_key = identity
    .public_key()
    .ok_or_else(|| ApiError::NoPublicKeyRegistered(signature.key_id.clone()))?;

  if let Err(e) = signature.verify(canonical, public_key) {
    tracing::warn!(key_id = %signature.key_id, error = %e, "signature verification failed");
    return Err(ApiError::InvalidSignature);
  }

  tracing::debug!(key_id = %signature.key_id, system = identity.is_system(), "authenticated");
  Ok(identity)
}

async fn resolve_identity<S>(
  state: &AppState<S>,
  key_id: &str,
  remote: Option<IpAddr>,
) -> Result<Identity, ApiError>
where
  S: DistributionStore,
{
  if state.auth.is_system(key_id, remote) {
    return Ok(Identity::system(key_id, state.auth.system_public_key.clone()));
  }

  let account = state
    .store
    .find_account(key_id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| {
      tracing::warn!(key_id, "unknown sender");
      ApiError::UnknownSender(key_id.to_owned())
    })?;

  let key = state
    .store
    .current_public_key(account.id)
    .await
    .map_err(ApiError::store)?
    .ok_or_else(|| ApiError::NoPublicKeyRegistered(key_id.to_owned()))?;

  Ok(Identity::user(account, Some(key.public_key)))
}

// ─── Authorization ───────────────────────────────────────────────────────────

/// Require one of `alternatives` in full. The permission set is loaded from
/// the store on first use. Returns the set that matched.
pub async fn authorize<S>(
  state: &AppState<S>,
  identity: &mut Identity,
  alternatives: &[&[&str]],
) -> Result<Vec<String>, ApiError>
where
  S: DistributionStore,
{
  if identity.needs_permissions()
    && let Some(account_id) = identity.account_id()
  {
    let permissions = state
      .store
      .permissions_for(account_id)
      .await
      .map_err(ApiError::store)?;
    identity.set_permissions(permissions);
  }

  match identity.authorize(alternatives) {
    Some(scope) => Ok(scope.to_vec()),
    None => {
      tracing::warn!(sender = identity.name(), "forbidden");
      Err(ApiError::Forbidden)
    }
  }
}
