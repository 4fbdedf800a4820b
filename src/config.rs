//! Configuration structs.
//!
//! Everything is plain data with defaults. Reading the environment is left to the `from_env`
//! adapters, which are meant to be called once at the process boundary.

use std::{env, time::Duration};

use eyre::WrapErr as _;

use crate::poll::{PollPolicy, RetryPolicy};

const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// HTTP settings for talking to the CA.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout (connect + read).
    pub request_timeout: Duration,

    /// Retries for connection errors, timeouts and 5xx responses.
    pub retry: RetryPolicy,

    pub user_agent: String,
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub(crate) fn http_client(&self) -> eyre::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.request_timeout)
            .timeout(self.request_timeout)
            .user_agent(&self.user_agent)
            .build()
            .wrap_err("build HTTP client")
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

/// Settings for the order orchestrator.
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Polling of an authorization after its challenge was submitted.
    pub authorization_poll: PollPolicy,

    /// Polling of the order, both while waiting for `ready` and after finalization.
    pub order_poll: PollPolicy,

    /// How long clean-up may still run after the issuance was cancelled.
    pub cleanup_grace: Duration,
}

impl IssuerConfig {
    pub fn with_authorization_poll(mut self, policy: PollPolicy) -> Self {
        self.authorization_poll = policy;
        self
    }

    pub fn with_order_poll(mut self, policy: PollPolicy) -> Self {
        self.order_poll = policy;
        self
    }

    pub fn with_cleanup_grace(mut self, grace: Duration) -> Self {
        self.cleanup_grace = grace;
        self
    }
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            authorization_poll: PollPolicy::new(
                Duration::from_millis(500),
                Duration::from_secs(10),
                Duration::from_secs(300),
            ),
            order_poll: PollPolicy::default(),
            cleanup_grace: Duration::from_secs(10),
        }
    }
}

/// Reads a whole number of seconds from the environment variable `name`.
pub(crate) fn env_secs(name: &str) -> eyre::Result<Option<Duration>> {
    match env::var(name) {
        Ok(value) => {
            let secs = value
                .trim()
                .parse::<u64>()
                .wrap_err_with(|| format!("{name} must be a number of seconds, got {value:?}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).wrap_err_with(|| format!("read {name}")),
    }
}

/// Reads a comma separated list from the environment variable `name`.
pub(crate) fn env_list(name: &str) -> Option<Vec<String>> {
    let value = env::var(name).ok()?;

    Some(
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = IssuerConfig::default()
            .with_cleanup_grace(Duration::from_secs(1))
            .with_order_poll(PollPolicy::fixed(Duration::from_millis(5), Duration::from_secs(1)));

        assert_eq!(config.cleanup_grace, Duration::from_secs(1));
        assert_eq!(config.order_poll.max_interval, Duration::from_millis(5));
        assert_eq!(config.authorization_poll, IssuerConfig::default().authorization_poll);
    }

    #[test]
    fn client_config_builds() {
        let config = ClientConfig::default()
            .with_user_agent("test-agent")
            .with_retry(RetryPolicy::none());

        assert_eq!(config.retry.max_attempts, 1);
        config.http_client().unwrap();
    }

    #[test]
    fn env_secs_parses_and_rejects() {
        env::set_var("ACME_DNS01_TEST_SECS", "42");
        assert_eq!(
            env_secs("ACME_DNS01_TEST_SECS").unwrap(),
            Some(Duration::from_secs(42))
        );

        env::set_var("ACME_DNS01_TEST_SECS", "soon");
        assert!(env_secs("ACME_DNS01_TEST_SECS").is_err());

        env::remove_var("ACME_DNS01_TEST_SECS");
        assert_eq!(env_secs("ACME_DNS01_TEST_SECS").unwrap(), None);
    }

    #[test]
    fn env_list_splits_on_commas() {
        env::set_var("ACME_DNS01_TEST_LIST", "1.1.1.1, 8.8.8.8,,");
        assert_eq!(
            env_list("ACME_DNS01_TEST_LIST").unwrap(),
            ["1.1.1.1", "8.8.8.8"]
        );
        env::remove_var("ACME_DNS01_TEST_LIST");
    }
}
