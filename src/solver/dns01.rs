use std::sync::Arc;

use async_trait::async_trait;
use eyre::WrapErr as _;
use tokio_util::sync::CancellationToken;

use super::{ChallengeKind, ChallengeParams, Solver};
use crate::{
    dns::{challenge_record_fqdn, DnsClient, PropagationChecker, PropagationConfig},
    error::DnsError,
    jws::dns01_txt_value,
    provider::{ChallengeRecord, Provider, RecordHandles},
};

/// Upper bound on CNAMEs followed from the challenge record.
const MAX_CNAME_HOPS: usize = 50;

/// Name and value of a dns-01 challenge record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeInfo {
    /// `_acme-challenge.<domain>`, without the wildcard label.
    pub fqdn: String,

    /// Where the record actually lives: `fqdn`, or the end of its CNAME chain.
    pub effective_fqdn: String,

    /// Base64url SHA-256 of the key authorization.
    pub value: String,
}

impl ChallengeInfo {
    pub fn new(domain: &str, key_auth: &str) -> Self {
        let fqdn = challenge_record_fqdn(domain);

        Self {
            effective_fqdn: fqdn.clone(),
            fqdn,
            value: dns01_txt_value(key_auth),
        }
    }

    /// Follows CNAMEs from the challenge record, so `effective_fqdn` names the record the CA
    /// will end up reading.
    pub async fn resolve(mut self, dns: &dyn DnsClient) -> Result<Self, DnsError> {
        for _ in 0..MAX_CNAME_HOPS {
            match dns.cname(&self.effective_fqdn).await? {
                Some(target) if target != self.effective_fqdn => {
                    log::debug!("{} is an alias of {target}", self.effective_fqdn);
                    self.effective_fqdn = target;
                }
                _ => return Ok(self),
            }
        }

        log::warn!(
            "gave up following CNAMEs of {} after {MAX_CNAME_HOPS} hops",
            self.fqdn
        );
        Ok(self)
    }
}

/// Solves dns-01 challenges through a [`Provider`].
///
/// Before the provider is asked for anything, CNAMEs on the challenge record are followed and the
/// zone of the record is looked up, so names that cannot be served fail without touching the DNS
/// host. The provider writes at the end of the CNAME chain, which is also where the
/// [`PropagationChecker`] looks, using the provider's timeout and interval when it has them.
#[derive(Debug)]
pub struct Dns01Solver {
    provider: Arc<dyn Provider>,
    checker: PropagationChecker,
    records: RecordHandles<ChallengeRecord>,
}

impl Dns01Solver {
    pub fn new(
        provider: Arc<dyn Provider>,
        dns: Arc<dyn DnsClient>,
        config: PropagationConfig,
    ) -> Self {
        Self::with_checker(provider, PropagationChecker::new(dns, config))
    }

    pub fn with_checker(provider: Arc<dyn Provider>, checker: PropagationChecker) -> Self {
        Self {
            provider,
            checker,
            records: RecordHandles::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    async fn challenge_info(&self, params: &ChallengeParams) -> eyre::Result<ChallengeInfo> {
        let info = ChallengeInfo::new(&params.domain, &params.key_authorization);

        if !self.checker.config().follow_cname {
            return Ok(info);
        }

        let dns = self.checker.zone_resolver().dns();
        info.resolve(dns.as_ref())
            .await
            .wrap_err_with(|| format!("follow CNAMEs of {}", challenge_record_fqdn(&params.domain)))
    }

    async fn challenge_record(&self, params: &ChallengeParams) -> eyre::Result<ChallengeRecord> {
        let domain = &params.domain;
        let info = self.challenge_info(params).await?;

        let zone = self
            .checker
            .zone_resolver()
            .find_zone_by_fqdn(&info.effective_fqdn)
            .await
            .wrap_err_with(|| format!("{domain}: no zone for {}", info.effective_fqdn))?;

        Ok(ChallengeRecord::new(params, info, zone.name))
    }

    /// The record presented for `params`, or a fresh lookup of it.
    async fn presented_record(&self, params: &ChallengeParams) -> eyre::Result<ChallengeRecord> {
        match self.records.get(&params.token) {
            Some(record) => Ok(record),
            None => self.challenge_record(params).await,
        }
    }
}

#[async_trait]
impl Solver for Dns01Solver {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Dns01
    }

    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn present(&self, params: &ChallengeParams) -> eyre::Result<()> {
        let domain = &params.domain;
        let record = self.challenge_record(params).await?;

        log::debug!(
            "[{domain}] presenting TXT {} in zone {} via {}",
            record.fqdn,
            record.zone,
            self.provider.name()
        );

        self.provider
            .present(&record)
            .await
            .wrap_err_with(|| format!("{domain}: {} could not present record", self.provider.name()))?;

        self.records.insert(&params.token, record);
        Ok(())
    }

    async fn wait_ready(
        &self,
        params: &ChallengeParams,
        cancel: &CancellationToken,
    ) -> eyre::Result<()> {
        let domain = &params.domain;
        let capabilities = self.provider.capabilities();

        if capabilities.confirms_propagation {
            log::debug!(
                "[{domain}] {} confirms its writes, skipping DNS checks",
                self.provider.name()
            );
            return Ok(());
        }

        let record = self.presented_record(params).await?;

        let (timeout, interval) = match capabilities.timeout {
            Some(policy) => (policy.timeout, policy.interval),
            None => (self.checker.config().timeout, self.checker.config().interval),
        };

        self.checker
            .wait_for(cancel, &record.fqdn, &record.value, timeout, interval)
            .await
            .wrap_err_with(|| format!("{domain}: record not visible"))
    }

    async fn clean_up(&self, params: &ChallengeParams) -> eyre::Result<()> {
        let domain = &params.domain;
        let record = match self.records.take(&params.token) {
            Some(record) => record,
            None => self.challenge_record(params).await?,
        };

        self.provider
            .clean_up(&record)
            .await
            .wrap_err_with(|| format!("{domain}: {} could not clean up record", self.provider.name()))
    }

    fn sequential(&self) -> Option<std::time::Duration> {
        self.provider
            .capabilities()
            .sequential
            .map(|policy| policy.interval)
    }
}
