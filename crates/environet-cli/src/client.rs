//! Async HTTP client for a distribution node.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use environet_core::signature::{SignatureHeader, body_digest};
use environet_xml::{ErrorEntry, parse_error_response};
use reqwest::{Client, StatusCode, header};
use uuid::Uuid;

/// Connection settings for a distribution node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
  pub base_url:    String,
  /// Account name sent as `keyId`.
  pub username:    String,
  pub private_key: String,
}

/// What the node answered.
#[derive(Debug)]
pub enum Reply {
  Accepted(String),
  Rejected { status: StatusCode, entries: Vec<ErrorEntry> },
}

/// Async HTTP client that signs every request with the account's key.
#[derive(Clone)]
pub struct NodeClient {
  client: Client,
  config: NodeConfig,
}

impl NodeClient {
  pub fn new(config: NodeConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(60))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  /// The `Authorization` header value for `canonical`.
  pub fn authorization(&self, canonical: &str) -> Result<String> {
    let header = SignatureHeader::create(&self.config.username, canonical, &self.config.private_key)
      .context("signing request")?;
    Ok(header.to_string())
  }

  /// `POST /upload`, signed over the body digest.
  pub async fn upload(&self, body: Vec<u8>) -> Result<Reply> {
    let authorization = self.authorization(&body_digest(&body))?;
    let resp = self
      .client
      .post(self.url("/upload"))
      .header(header::AUTHORIZATION, authorization)
      .header(header::CONTENT_TYPE, "application/xml")
      .body(body)
      .send()
      .await
      .context("POST /upload failed")?;
    reply(resp).await
  }

  /// `GET /observations`, signed over a fresh token.
  pub async fn observations(
    &self,
    point: &str,
    property: &str,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
  ) -> Result<Reply> {
    let token = Uuid::new_v4().to_string();
    let mut query = vec![
      ("token", token.clone()),
      ("point", point.to_owned()),
      ("property", property.to_owned()),
    ];
    if let Some(start) = start {
      query.push(("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }
    if let Some(end) = end {
      query.push(("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }

    let resp = self
      .client
      .get(self.url("/observations"))
      .query(&query)
      .header(header::AUTHORIZATION, self.authorization(&token)?)
      .send()
      .await
      .context("GET /observations failed")?;
    reply(resp).await
  }
}

async fn reply(resp: reqwest::Response) -> Result<Reply> {
  let status = resp.status();
  let text = resp.text().await.context("reading response body")?;
  if status.is_success() {
    return Ok(Reply::Accepted(text));
  }
  // Not every failure comes from the node itself (proxies, gateways).
  let entries = parse_error_response(&text)
    .unwrap_or_else(|_| vec![ErrorEntry::new(status.as_u16(), text.trim().to_owned())]);
  Ok(Reply::Rejected { status, entries })
}
