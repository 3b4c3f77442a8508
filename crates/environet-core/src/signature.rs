//! Request signatures.
//!
//! Senders sign a canonical string with their RSA private key (PKCS#1 v1.5
//! over SHA-256) and send
//!
//! ```text
//! Authorization: Signature keyId="<account>",algorithm="rsa-sha256",signature="<base64>"
//! ```
//!
//! The canonical string is either an opaque token passed alongside the
//! request, or the lowercase MD5 hex digest of the raw request body, which
//! binds the signature to the exact payload bytes.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use md5::{Digest as _, Md5};
use rand_core::OsRng;
use rsa::{
  RsaPrivateKey, RsaPublicKey,
  pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
  pkcs1v15::{Signature, SigningKey, VerifyingKey},
  pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
  signature::{SignatureEncoding as _, Signer as _, Verifier as _},
};
use sha2::Sha256;

use crate::{Error, Result};

/// The only accepted `algorithm` parameter.
pub const ALGORITHM: &str = "rsa-sha256";

const SCHEME_PREFIX: &str = "Signature ";

// ─── Header ──────────────────────────────────────────────────────────────────

/// The parameters of a `Signature` authorization header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
  /// The claimed sender.
  pub key_id:    String,
  /// Base64 signature, still encoded.
  pub signature: String,
}

impl SignatureHeader {
  /// Parse an `Authorization` header value.
  ///
  /// Exactly the `keyId`, `algorithm` and `signature` parameters must be
  /// present, each once, each as `name="value"`. Anything else is rejected.
  pub fn parse(value: &str) -> Result<Self> {
    let params = value.strip_prefix(SCHEME_PREFIX).ok_or(Error::NotSignatureScheme)?;

    let mut key_id = None;
    let mut algorithm = None;
    let mut signature = None;

    for param in params.split(',') {
      let param = param.trim();
      let (name, quoted) = param
        .split_once('=')
        .ok_or_else(|| Error::MalformedParameter(param.to_owned()))?;
      let value = quoted
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .filter(|v| !v.contains('"'))
        .ok_or_else(|| Error::MalformedParameter(param.to_owned()))?;

      let slot = match name {
        "keyId" => &mut key_id,
        "algorithm" => &mut algorithm,
        "signature" => &mut signature,
        other => return Err(Error::UnknownParameter(other.to_owned())),
      };
      if slot.replace(value.to_owned()).is_some() {
        return Err(Error::DuplicateParameter(name.to_owned()));
      }
    }

    let key_id = key_id
      .filter(|k| !k.is_empty())
      .ok_or(Error::MissingParameter("keyId"))?;
    let algorithm = algorithm.ok_or(Error::MissingParameter("algorithm"))?;
    if algorithm != ALGORITHM {
      return Err(Error::UnsupportedAlgorithm(algorithm));
    }
    let signature = signature
      .filter(|s| !s.is_empty())
      .ok_or(Error::MissingParameter("signature"))?;

    Ok(Self { key_id, signature })
  }

  /// Sign `canonical` with `private_key_pem` on behalf of `key_id`.
  pub fn create(key_id: &str, canonical: &str, private_key_pem: &str) -> Result<Self> {
    Ok(Self {
      key_id:    key_id.to_owned(),
      signature: sign(canonical, private_key_pem)?,
    })
  }

  /// Check the carried signature over `canonical` against `public_key_pem`.
  pub fn verify(&self, canonical: &str, public_key_pem: &str) -> Result<()> {
    verify(canonical, &self.signature, public_key_pem)
  }
}

impl fmt::Display for SignatureHeader {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{SCHEME_PREFIX}keyId=\"{}\",algorithm=\"{ALGORITHM}\",signature=\"{}\"",
      self.key_id, self.signature
    )
  }
}

// ─── Canonical values ────────────────────────────────────────────────────────

/// Lowercase MD5 hex digest of a request body.
pub fn body_digest(body: &[u8]) -> String { hex::encode(Md5::digest(body)) }

// ─── Sign / verify ───────────────────────────────────────────────────────────

/// Sign `canonical` and return the base64 signature.
pub fn sign(canonical: &str, private_key_pem: &str) -> Result<String> {
  let key = decode_private_key(private_key_pem)?;
  let signature = SigningKey::<Sha256>::new(key).sign(canonical.as_bytes());
  Ok(B64.encode(signature.to_bytes()))
}

/// Verify a base64 `signature` over `canonical`.
pub fn verify(canonical: &str, signature: &str, public_key_pem: &str) -> Result<()> {
  let raw = B64.decode(signature.trim()).map_err(|_| Error::SignatureEncoding)?;
  let signature = Signature::try_from(raw.as_slice()).map_err(|_| Error::SignatureMismatch)?;
  let key = decode_public_key(public_key_pem)?;
  VerifyingKey::<Sha256>::new(key)
    .verify(canonical.as_bytes(), &signature)
    .map_err(|_| Error::SignatureMismatch)
}

/// Accepts both `BEGIN PUBLIC KEY` (SPKI) and `BEGIN RSA PUBLIC KEY` (PKCS#1).
pub fn decode_public_key(pem: &str) -> Result<RsaPublicKey> {
  let pem = pem.trim();
  RsaPublicKey::from_public_key_pem(pem)
    .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
    .map_err(|e| Error::InvalidKey(e.to_string()))
}

/// Accepts both `BEGIN PRIVATE KEY` (PKCS#8) and `BEGIN RSA PRIVATE KEY`.
pub fn decode_private_key(pem: &str) -> Result<RsaPrivateKey> {
  let pem = pem.trim();
  RsaPrivateKey::from_pkcs8_pem(pem)
    .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
    .map_err(|e| Error::InvalidKey(e.to_string()))
}

// ─── Key generation ──────────────────────────────────────────────────────────

/// A freshly generated key pair, both halves PEM-encoded.
pub struct KeyPair {
  pub private_pem: String,
  pub public_pem:  String,
}

/// Generate an RSA key pair of `bits` bits.
pub fn generate_key_pair(bits: usize) -> Result<KeyPair> {
  let private =
    RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| Error::InvalidKey(e.to_string()))?;
  let public = RsaPublicKey::from(&private);
  let private_pem = private
    .to_pkcs8_pem(LineEnding::LF)
    .map_err(|e| Error::InvalidKey(e.to_string()))?
    .to_string();
  let public_pem = public
    .to_public_key_pem(LineEnding::LF)
    .map_err(|e| Error::InvalidKey(e.to_string()))?;
  Ok(KeyPair { private_pem, public_pem })
}
