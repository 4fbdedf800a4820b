//! Generic webhook provider, for DNS hosts fronted by a small HTTP API.
//!
//! # Webhook API
//!
//! ## Create Record
//! ```text
//! POST {url}/records
//! Content-Type: application/json
//!
//! {
//!   "domain": "example.com",
//!   "zone": "example.com",
//!   "fqdn": "_acme-challenge.example.com",
//!   "record_name": "_acme-challenge",
//!   "record_type": "TXT",
//!   "record_value": "challenge-value",
//!   "ttl": 60
//! }
//!
//! Response:
//! {
//!   "record_id": "unique-id"
//! }
//! ```
//!
//! When `_acme-challenge.<domain>` is a CNAME, `fqdn`, `zone` and `record_name` describe the
//! end of the chain.
//!
//! ## Delete Record
//! ```text
//! DELETE {url}/records/{record_id}?domain={domain}
//!
//! Response: 200 OK or 204 No Content (404 is taken as already deleted)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use eyre::{bail, WrapErr as _};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{
    Capabilities, ChallengeRecord, Provider, ProviderConfig, RecordHandles, CHALLENGE_TTL,
};
use crate::{
    dns::normalize_domain,
    poll::RetryPolicy,
    req::{req_safe_read_body, send_with_retry},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider talking to a generic HTTP API.
///
/// Settings (see [`ProviderConfig`]):
///
/// - `url`: base URL of the API, required.
/// - `auth_token`: sent as bearer token, or in the `auth_header` header when that is set.
/// - `timeout`: request timeout in seconds, 30 by default.
#[derive(Debug)]
pub struct WebhookProvider {
    client: reqwest::Client,
    retry: RetryPolicy,
    base_url: String,
    auth_header: Option<String>,
    auth_token: Option<String>,
    records: RecordHandles<String>,
    capabilities: Capabilities,
}

impl WebhookProvider {
    pub fn new(base_url: &str, timeout: Duration) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .wrap_err("build webhook HTTP client")?;

        Ok(Self {
            client,
            retry: RetryPolicy::default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            auth_header: None,
            auth_token: None,
            records: RecordHandles::new(),
            capabilities: Capabilities::default(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> eyre::Result<Self> {
        let timeout = config.secs("timeout")?.unwrap_or(DEFAULT_TIMEOUT);

        let mut provider = Self::new(config.require("url")?, timeout)?
            .with_capabilities(config.capabilities()?);

        if let Some(token) = config.get("auth_token") {
            provider = provider.with_auth(config.get("auth_header"), token);
        }

        Ok(provider)
    }

    /// Authenticates with `token`, as a bearer token unless `header` names another header.
    pub fn with_auth(mut self, header: Option<&str>, token: &str) -> Self {
        self.auth_header = header.map(ToOwned::to_owned);
        self.auth_token = Some(token.to_owned());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.auth_header, &self.auth_token) {
            (Some(header), Some(token)) => req.header(header.as_str(), token),
            (None, Some(token)) => req.bearer_auth(token),
            _ => req,
        }
    }
}

#[async_trait]
impl Provider for WebhookProvider {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn present(&self, record: &ChallengeRecord) -> eyre::Result<()> {
        let domain = normalize_domain(&record.domain);
        let token = &record.token;

        let body = CreateRecordRequest {
            domain,
            zone: &record.zone,
            fqdn: &record.fqdn,
            record_name: record.name(),
            record_type: "TXT",
            record_value: &record.value,
            ttl: CHALLENGE_TTL,
        };

        let url = format!("{}/records", self.base_url);
        log::debug!("Creating TXT {} via {url}", record.fqdn);

        let res = send_with_retry(&self.retry, &url, || {
            self.authorized(self.client.post(&url).json(&body)).send()
        })
        .await?;

        let status = res.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            bail!("webhook rejected credentials ({status})");
        }
        if !status.is_success() {
            let body = req_safe_read_body(res).await;
            bail!("webhook returned {status} creating TXT {}: {body}", record.fqdn);
        }

        // the record exists from here on, even if its id cannot be read
        let raw = req_safe_read_body(res).await;
        let created = match serde_json::from_str::<CreateRecordResponse>(&raw) {
            Ok(created) => created,
            Err(err) => {
                log::warn!(
                    "Webhook created TXT {} for {domain} but sent an unreadable response: {raw}",
                    record.fqdn
                );
                bail!(
                    "webhook created TXT {} for {domain} but its response could not be read ({err}); \
                     the record may still exist and must be removed by hand: {raw}",
                    record.fqdn
                );
            }
        };

        log::debug!("Created TXT {} as record {}", record.fqdn, created.record_id);

        if let Some(previous) = self.records.insert(token, created.record_id) {
            log::debug!("Token {token} presented again, record {previous} is superseded");
        }

        Ok(())
    }

    async fn clean_up(&self, record: &ChallengeRecord) -> eyre::Result<()> {
        let token = &record.token;
        let Some(record_id) = self.records.take(token) else {
            log::debug!("No record known for token {token}, nothing to clean up");
            return Ok(());
        };

        let url = format!("{}/records/{record_id}", self.base_url);
        let query = [("domain", normalize_domain(&record.domain))];

        let res = send_with_retry(&self.retry, &url, || {
            self.authorized(self.client.delete(&url).query(&query)).send()
        })
        .await?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            log::debug!("Record {record_id} already deleted");
            return Ok(());
        }
        if !status.is_success() {
            let body = req_safe_read_body(res).await;
            bail!("webhook returned {status} deleting record {record_id}: {body}");
        }

        log::debug!("Deleted record {record_id}");
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<'a> {
    domain: &'a str,
    zone: &'a str,
    fqdn: &'a str,
    record_name: &'a str,
    record_type: &'a str,
    record_value: &'a str,
    ttl: u32,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    record_id: String,
}
