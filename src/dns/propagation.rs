use std::{net::IpAddr, sync::Arc, time::Duration};

use eyre::WrapErr as _;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{DnsClient, ZoneResolver};
use crate::{
    config::{env_list, env_secs},
    error::{Cancelled, DnsError, PropagationError},
    util::sleep_cancellable,
};

/// Configuration for propagation checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationConfig {
    /// Maximum time to wait for propagation, unless the provider asks for another.
    pub timeout: Duration,

    /// Interval between checks, unless the provider asks for another.
    pub interval: Duration,

    /// Every authoritative name server of the zone must serve the value.
    pub require_authoritative: bool,

    /// The recursive resolver must serve the value.
    pub require_recursive: bool,

    /// Follow CNAMEs of the challenge record before presenting it.
    pub follow_cname: bool,

    /// Recursive resolvers to use instead of the system configured ones.
    pub nameservers: Vec<IpAddr>,
}

impl PropagationConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_require_authoritative(mut self, require: bool) -> Self {
        self.require_authoritative = require;
        self
    }

    pub fn with_require_recursive(mut self, require: bool) -> Self {
        self.require_recursive = require;
        self
    }

    pub fn with_follow_cname(mut self, follow: bool) -> Self {
        self.follow_cname = follow;
        self
    }

    pub fn with_nameservers(mut self, nameservers: Vec<IpAddr>) -> Self {
        self.nameservers = nameservers;
        self
    }

    /// Defaults, overridden by `ACME_PROPAGATION_TIMEOUT` and `ACME_PROPAGATION_INTERVAL`
    /// (seconds) and `ACME_DNS_RESOLVERS` (comma separated IP addresses).
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();

        if let Some(timeout) = env_secs("ACME_PROPAGATION_TIMEOUT")? {
            config.timeout = timeout;
        }

        if let Some(interval) = env_secs("ACME_PROPAGATION_INTERVAL")? {
            config.interval = interval;
        }

        if let Some(resolvers) = env_list("ACME_DNS_RESOLVERS") {
            config.nameservers = resolvers
                .iter()
                .map(|ip| {
                    ip.parse::<IpAddr>()
                        .wrap_err_with(|| format!("ACME_DNS_RESOLVERS: {ip:?} is not an IP address"))
                })
                .collect::<eyre::Result<_>>()?;
        }

        Ok(config)
    }
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
            require_authoritative: true,
            require_recursive: false,
            follow_cname: true,
            nameservers: Vec::new(),
        }
    }
}

/// Waits for TXT records to become visible.
///
/// Which servers have to answer is decided by [`PropagationConfig`]: by default every
/// authoritative name server of the record's zone. Each expected value is looked for on its own,
/// so records sharing a name (a wildcard and its base domain) don't satisfy each other.
#[derive(Debug, Clone)]
pub struct PropagationChecker {
    zones: ZoneResolver,
    config: PropagationConfig,
}

impl PropagationChecker {
    pub fn new(dns: Arc<dyn DnsClient>, config: PropagationConfig) -> Self {
        Self::with_zone_resolver(ZoneResolver::new(dns), config)
    }

    /// Shares `zones` (and its cache) with the caller.
    pub fn with_zone_resolver(zones: ZoneResolver, config: PropagationConfig) -> Self {
        Self { zones, config }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    pub fn zone_resolver(&self) -> &ZoneResolver {
        &self.zones
    }

    /// Checks every `interval` until `value` is visible at `fqdn`, giving up after `timeout`.
    ///
    /// The first check happens right away. Lookup errors are retried until the timeout, and
    /// the last one is reported with it. Cancellation ends the wait immediately.
    pub async fn wait_for(
        &self,
        cancel: &CancellationToken,
        fqdn: &str,
        value: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), PropagationError> {
        let deadline = Instant::now() + timeout;
        let mut last_error = None;

        log::debug!("waiting up to {timeout:?} for TXT {fqdn} to propagate");

        loop {
            let check = tokio::time::timeout_at(deadline, self.check(fqdn, value));

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled.into()),
                outcome = check => outcome,
            };

            match outcome {
                Ok(Ok(true)) => {
                    log::debug!("TXT {fqdn} propagated");
                    return Ok(());
                }
                Ok(Ok(false)) => log::trace!("TXT {fqdn} not visible yet"),
                Ok(Err(err)) => {
                    log::debug!("propagation check of {fqdn} failed: {err}");
                    last_error = Some(err.to_string());
                }
                // deadline hit during the check
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PropagationError::Timeout {
                    fqdn: fqdn.to_owned(),
                    timeout,
                    last_error,
                });
            }

            sleep_cancellable(cancel, interval.min(deadline - now)).await?;
        }
    }

    /// Runs a single check, true when every required server serves `value`.
    pub async fn check(&self, fqdn: &str, value: &str) -> Result<bool, PropagationError> {
        let dns = self.zones.dns();

        if self.config.require_recursive && !contains(dns.txt(fqdn, None).await, value)? {
            return Ok(false);
        }

        if self.config.require_authoritative {
            let zone = self.zones.find_zone_by_fqdn(fqdn).await?;

            for server in &zone.nameservers {
                if !contains(dns.txt(fqdn, Some(server)).await, value)? {
                    log::trace!("{server} does not serve TXT {fqdn} yet");
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}

fn contains(answer: Result<Vec<String>, DnsError>, value: &str) -> Result<bool, PropagationError> {
    let values = answer.map_err(|err| PropagationError::Zone(err.into()))?;
    Ok(values.iter().any(|v| v == value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::StubDns;

    const FQDN: &str = "_acme-challenge.example.com";

    fn checker(dns: &Arc<StubDns>, config: PropagationConfig) -> PropagationChecker {
        PropagationChecker::new(Arc::clone(dns) as Arc<dyn DnsClient>, config)
    }

    fn stub() -> Arc<StubDns> {
        Arc::new(StubDns::new().zone("example.com", &["ns1.example.net", "ns2.example.net"]))
    }

    #[tokio::test(start_paused = true)]
    async fn visible_record_returns_without_sleeping() {
        let dns = stub();
        dns.set_txt(FQDN, "token-value");

        let started = Instant::now();
        checker(&dns, PropagationConfig::default())
            .wait_for(
                &CancellationToken::new(),
                FQDN,
                "token-value",
                Duration::from_secs(60),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_record_times_out_within_one_interval() {
        let dns = stub();
        let timeout = Duration::from_secs(10);
        let interval = Duration::from_secs(3);

        let started = Instant::now();
        let err = checker(&dns, PropagationConfig::default())
            .wait_for(&CancellationToken::new(), FQDN, "never", timeout, interval)
            .await
            .unwrap_err();

        assert!(matches!(err, PropagationError::Timeout { .. }), "{err}");
        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() <= timeout + interval);
    }

    #[tokio::test(start_paused = true)]
    async fn every_authoritative_server_must_answer() {
        let dns = stub();
        dns.set_txt(FQDN, "v");
        dns.lagging_server("ns2.example.net");

        let checker = checker(&dns, PropagationConfig::default());
        assert!(!checker.check(FQDN, "v").await.unwrap());

        dns.catch_up("ns2.example.net");
        assert!(checker.check(FQDN, "v").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn values_sharing_a_name_are_checked_independently() {
        let dns = stub();
        dns.set_txt(FQDN, "wildcard-value");

        let checker = checker(&dns, PropagationConfig::default());
        assert!(checker.check(FQDN, "wildcard-value").await.unwrap());
        assert!(!checker.check(FQDN, "base-value").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn recursive_only_mode_skips_zone_lookup() {
        let dns = Arc::new(StubDns::new());
        dns.set_txt(FQDN, "v");

        let config = PropagationConfig::default()
            .with_require_authoritative(false)
            .with_require_recursive(true);

        assert!(checker(&dns, config).check(FQDN, "v").await.unwrap());
        assert!(dns.soa_queries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_last_lookup_error() {
        let dns = stub();
        dns.fail_txt("SERVFAIL");

        let err = checker(&dns, PropagationConfig::default())
            .wait_for(
                &CancellationToken::new(),
                FQDN,
                "v",
                Duration::from_secs(4),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("SERVFAIL"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_not_a_timeout() {
        let dns = stub();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = checker(&dns, PropagationConfig::default())
            .wait_for(&cancel, FQDN, "v", Duration::from_secs(60), Duration::from_secs(2))
            .await
            .unwrap_err();

        assert!(matches!(err, PropagationError::Cancelled(_)));
    }

    #[test]
    fn env_overrides() {
        std::env::set_var("ACME_PROPAGATION_TIMEOUT", "120");
        std::env::set_var("ACME_DNS_RESOLVERS", "1.1.1.1, 9.9.9.9");

        let config = PropagationConfig::from_env().unwrap();
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.nameservers.len(), 2);

        std::env::set_var("ACME_DNS_RESOLVERS", "not-an-ip");
        assert!(PropagationConfig::from_env().is_err());

        std::env::remove_var("ACME_PROPAGATION_TIMEOUT");
        std::env::remove_var("ACME_DNS_RESOLVERS");
    }
}
