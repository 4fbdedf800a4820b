use std::{collections::HashMap, net::IpAddr, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::{
        op::ResponseCode,
        rr::{RData, RecordType},
    },
    TokioAsyncResolver,
};
use parking_lot::Mutex;

use super::{normalize_name, DnsClient, SoaAnswer};
use crate::error::DnsError;

const DNS_PORT: u16 = 53;

/// [`DnsClient`] on top of `hickory-resolver`.
///
/// Recursive queries go to the system resolver, or to the configured addresses. Queries aimed at
/// an authoritative server get a resolver of their own, built on first use and kept per server.
/// Caching is disabled everywhere so every propagation check sees fresh answers.
#[derive(Debug)]
pub struct HickoryDns {
    recursive: TokioAsyncResolver,
    authoritative: Mutex<HashMap<String, TokioAsyncResolver>>,
}

impl HickoryDns {
    /// Uses the resolvers from the system configuration (`/etc/resolv.conf` on Unix).
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let (config, _) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|err| DnsError::Config(err.to_string()))?;

        Ok(Self::with_resolver(TokioAsyncResolver::tokio(config, opts())))
    }

    /// Uses the given recursive resolvers instead of the system ones.
    pub fn with_nameservers(nameservers: &[IpAddr]) -> Self {
        Self::with_resolver(resolver_for(nameservers))
    }

    /// System resolvers when `nameservers` is empty, the given ones otherwise.
    pub fn new(nameservers: &[IpAddr]) -> Result<Self, DnsError> {
        if nameservers.is_empty() {
            Self::from_system_conf()
        } else {
            Ok(Self::with_nameservers(nameservers))
        }
    }

    fn with_resolver(recursive: TokioAsyncResolver) -> Self {
        Self {
            recursive,
            authoritative: Mutex::default(),
        }
    }

    async fn authoritative(&self, server: &str) -> Result<TokioAsyncResolver, DnsError> {
        let cached = self.authoritative.lock().get(server).cloned();
        if let Some(resolver) = cached {
            return Ok(resolver);
        }

        let ips = self
            .recursive
            .lookup_ip(fqdn(server))
            .await
            .map_err(|err| {
                log::debug!("resolving name server {server}: {err}");
                DnsError::NameServer(server.to_owned())
            })?
            .iter()
            .collect::<Vec<_>>();

        if ips.is_empty() {
            return Err(DnsError::NameServer(server.to_owned()));
        }

        log::trace!("name server {server} is at {ips:?}");

        let resolver = resolver_for(&ips);
        self.authoritative
            .lock()
            .insert(server.to_owned(), resolver.clone());

        Ok(resolver)
    }
}

#[async_trait]
impl DnsClient for HickoryDns {
    async fn soa(&self, name: &str) -> Result<SoaAnswer, DnsError> {
        let lookup = match self.recursive.lookup(fqdn(name), RecordType::SOA).await {
            Ok(lookup) => lookup,
            Err(err) => {
                return match no_records(&err) {
                    Some(ResponseCode::NXDomain) => Ok(SoaAnswer::NxDomain),
                    Some(_) => Ok(SoaAnswer::NoData),
                    None => Err(lookup_error(name, "SOA", &err)),
                };
            }
        };

        let mut answer = SoaAnswer::NoData;

        for record in lookup.records() {
            log::trace!("SOA {name}: {record}");

            match record.data() {
                // zone apexes cannot be aliases, whatever else the answer holds
                Some(RData::CNAME(target)) => {
                    return Ok(SoaAnswer::Cname(normalize_name(&target.0.to_utf8())))
                }
                Some(RData::SOA(_)) if normalize_name(&record.name().to_utf8()) == name => {
                    answer = SoaAnswer::Zone;
                }
                _ => {}
            }
        }

        Ok(answer)
    }

    async fn nameservers(&self, zone: &str) -> Result<Vec<String>, DnsError> {
        match self.recursive.ns_lookup(fqdn(zone)).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|ns| normalize_name(&ns.0.to_utf8()))
                .collect()),
            Err(err) if no_records(&err).is_some() => Ok(Vec::new()),
            Err(err) => Err(lookup_error(zone, "NS", &err)),
        }
    }

    async fn cname(&self, name: &str) -> Result<Option<String>, DnsError> {
        let lookup = match self.recursive.lookup(fqdn(name), RecordType::CNAME).await {
            Ok(lookup) => lookup,
            Err(err) if no_records(&err).is_some() => return Ok(None),
            Err(err) => return Err(lookup_error(name, "CNAME", &err)),
        };

        Ok(lookup.records().iter().find_map(|record| {
            let owner = normalize_name(&record.name().to_utf8());
            match record.data() {
                Some(RData::CNAME(target)) if owner == name => {
                    Some(normalize_name(&target.0.to_utf8()))
                }
                _ => None,
            }
        }))
    }

    async fn txt(&self, name: &str, server: Option<&str>) -> Result<Vec<String>, DnsError> {
        let resolver = match server {
            Some(server) => self.authoritative(server).await?,
            None => self.recursive.clone(),
        };

        match resolver.txt_lookup(fqdn(name)).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|data| String::from_utf8_lossy(data))
                        .collect::<String>()
                })
                .collect()),
            Err(err) if no_records(&err).is_some() => Ok(Vec::new()),
            Err(err) => Err(lookup_error(name, "TXT", &err)),
        }
    }
}

fn opts() -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = Duration::from_secs(5);
    opts.attempts = 2;
    opts.cache_size = 0;
    opts
}

fn resolver_for(ips: &[IpAddr]) -> TokioAsyncResolver {
    let group = NameServerConfigGroup::from_ips_clear(ips, DNS_PORT, true);
    let config = ResolverConfig::from_parts(None, vec![], group);
    TokioAsyncResolver::tokio(config, opts())
}

/// Fully qualified form, so no search domains get appended.
fn fqdn(name: &str) -> String {
    format!("{name}.")
}

/// The response code for answers without records, `None` for actual failures.
fn no_records(err: &ResolveError) -> Option<ResponseCode> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => Some(*response_code),
        _ => None,
    }
}

fn lookup_error(name: &str, record_type: &'static str, err: &ResolveError) -> DnsError {
    DnsError::Lookup {
        name: name.to_owned(),
        record_type,
        message: err.to_string(),
    }
}
