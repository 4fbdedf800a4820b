use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use super::{normalize_name, validate_name, DnsClient, SoaAnswer};
use crate::error::ZoneError;

/// Upper bound on labels in a name; a valid DNS name cannot have more.
const MAX_LABELS: usize = 127;

/// An authoritative zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    /// Zone apex, lowercase, without trailing dot.
    pub name: String,

    /// Host names of the authoritative name servers.
    pub nameservers: Vec<String>,
}

/// Finds the zone a name belongs to by walking up its labels and asking for SOA records.
///
/// Walks from the full name towards its registrable domain, and the first name with its own SOA
/// record is the zone apex. Public suffixes (`com`, `co.uk`, `github.io`) are never taken as a
/// zone. Names that are aliases are skipped, since a zone apex cannot be a CNAME. Resolve the challenge record's CNAME chain first (see
/// [`ChallengeInfo::resolve`](crate::solver::ChallengeInfo::resolve)) when the zone of the alias
/// target is wanted.
///
/// Results are not cached unless [`with_cache`](Self::with_cache) is used. Clones share the cache.
#[derive(Debug, Clone)]
pub struct ZoneResolver {
    dns: Arc<dyn DnsClient>,
    cache: Option<Arc<Mutex<HashMap<String, Zone>>>>,
}

impl ZoneResolver {
    pub fn new(dns: Arc<dyn DnsClient>) -> Self {
        Self { dns, cache: None }
    }

    /// Remember zones by FQDN until [`clear_cache`](Self::clear_cache) is called.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(Arc::default());
        self
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.lock().clear();
        }
    }

    pub(crate) fn dns(&self) -> &Arc<dyn DnsClient> {
        &self.dns
    }

    /// Returns the zone `fqdn` belongs to, along with its name servers.
    pub async fn find_zone_by_fqdn(&self, fqdn: &str) -> Result<Zone, ZoneError> {
        let fqdn = normalize_name(fqdn);
        if fqdn.split('.').count() > MAX_LABELS {
            return Err(ZoneError::TooManyLabels {
                fqdn,
                max: MAX_LABELS,
            });
        }

        let fqdn = validate_name(&fqdn)?;

        if let Some(zone) = self.cached(&fqdn) {
            log::trace!("zone of {fqdn} is {} (cached)", zone.name);
            return Ok(zone);
        }

        let labels = fqdn.split('.').collect::<Vec<_>>();
        let candidates = labels.len().saturating_sub(public_suffix_labels(&fqdn));

        for start in 0..candidates {
            let candidate = labels[start..].join(".");

            match self.dns.soa(&candidate).await? {
                SoaAnswer::Zone => {
                    let zone = self.zone_at(candidate).await?;
                    log::debug!("zone of {fqdn} is {}", zone.name);

                    if let Some(cache) = &self.cache {
                        cache.lock().insert(fqdn, zone.clone());
                    }

                    return Ok(zone);
                }

                SoaAnswer::Cname(target) => {
                    log::trace!("{candidate} is an alias of {target}, cannot be a zone apex");
                }

                SoaAnswer::NoData | SoaAnswer::NxDomain => {}
            }
        }

        log::debug!("no zone for {fqdn} below its public suffix");
        Err(ZoneError::NotFound { fqdn })
    }

    async fn zone_at(&self, name: String) -> Result<Zone, ZoneError> {
        let nameservers = self.dns.nameservers(&name).await?;

        if nameservers.is_empty() {
            return Err(ZoneError::NoNameServers { zone: name });
        }

        Ok(Zone { name, nameservers })
    }

    fn cached(&self, fqdn: &str) -> Option<Zone> {
        self.cache.as_ref()?.lock().get(fqdn).cloned()
    }
}

/// Number of labels in the public suffix of `fqdn`, taking the last label when it has none.
fn public_suffix_labels(fqdn: &str) -> usize {
    psl::suffix(fqdn.as_bytes()).map_or(1, |suffix| {
        suffix.as_bytes().split(|&byte| byte == b'.').count()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::StubDns;

    fn resolver(dns: &Arc<StubDns>) -> ZoneResolver {
        ZoneResolver::new(Arc::clone(dns) as Arc<dyn DnsClient>)
    }

    #[tokio::test]
    async fn finds_apex_regardless_of_depth() {
        let dns = Arc::new(StubDns::new().zone("example.com", &["ns1.example.net"]));
        let zones = resolver(&dns);

        for fqdn in [
            "_acme-challenge.example.com",
            "_acme-challenge.www.example.com",
            "_acme-challenge.a.b.c.example.com",
        ] {
            let zone = zones.find_zone_by_fqdn(fqdn).await.unwrap();
            assert_eq!(zone.name, "example.com", "{fqdn}");
            assert_eq!(zone.nameservers, ["ns1.example.net"]);
        }
    }

    #[tokio::test]
    async fn delegated_subzone_wins_over_parent() {
        let dns = Arc::new(
            StubDns::new()
                .zone("example.com", &["ns1.example.net"])
                .zone("dev.example.com", &["ns.dev.example.com"]),
        );

        let zone = resolver(&dns)
            .find_zone_by_fqdn("_acme-challenge.api.dev.example.com.")
            .await
            .unwrap();
        assert_eq!(zone.name, "dev.example.com");
    }

    #[tokio::test]
    async fn aliases_are_not_apexes() {
        let dns = Arc::new(
            StubDns::new()
                .zone("example.com", &["ns1.example.net"])
                .cname("www.example.com", "lb.example.org"),
        );

        let zone = resolver(&dns)
            .find_zone_by_fqdn("www.example.com")
            .await
            .unwrap();
        assert_eq!(zone.name, "example.com");
    }

    #[tokio::test]
    async fn unknown_zone_is_not_found() {
        let dns = Arc::new(StubDns::new().zone("example.com", &["ns1.example.net"]));

        let err = resolver(&dns)
            .find_zone_by_fqdn("_acme-challenge.example.invalid")
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::NotFound { .. }));
    }

    #[tokio::test]
    async fn walk_stops_at_the_public_suffix() {
        let dns = Arc::new(
            StubDns::new()
                .zone("co.uk", &["ns1.nic.uk"])
                .zone("example.co.uk", &["ns1.example.net"]),
        );
        let zones = resolver(&dns);

        let zone = zones
            .find_zone_by_fqdn("_acme-challenge.www.example.co.uk")
            .await
            .unwrap();
        assert_eq!(zone.name, "example.co.uk");

        let err = zones
            .find_zone_by_fqdn("_acme-challenge.unregistered.co.uk")
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::NotFound { .. }), "{err}");

        let queries = dns.soa_queries();
        assert!(queries.contains(&"unregistered.co.uk".to_owned()), "{queries:?}");
        assert!(!queries.iter().any(|name| name == "co.uk" || name == "uk"), "{queries:?}");
    }

    #[test]
    fn public_suffix_length() {
        assert_eq!(public_suffix_labels("_acme-challenge.example.com"), 1);
        assert_eq!(public_suffix_labels("_acme-challenge.example.co.uk"), 2);
        assert_eq!(public_suffix_labels("_acme-challenge.example.invalid"), 1);
    }

    #[tokio::test]
    async fn label_count_is_bounded() {
        let dns = Arc::new(StubDns::new());
        let fqdn = format!("{}example.com", "a.".repeat(MAX_LABELS));

        let err = resolver(&dns).find_zone_by_fqdn(&fqdn).await.unwrap_err();
        assert!(matches!(err, ZoneError::TooManyLabels { .. }));
        assert!(dns.soa_queries().is_empty());
    }

    #[tokio::test]
    async fn cache_is_opt_in_and_clearable() {
        let dns = Arc::new(StubDns::new().zone("example.com", &["ns1.example.net"]));
        let zones = resolver(&dns).with_cache();

        zones.find_zone_by_fqdn("_acme-challenge.example.com").await.unwrap();
        let queries = dns.soa_queries().len();

        zones.find_zone_by_fqdn("_acme-challenge.example.com").await.unwrap();
        assert_eq!(dns.soa_queries().len(), queries);

        zones.clear_cache();
        zones.find_zone_by_fqdn("_acme-challenge.example.com").await.unwrap();
        assert_eq!(dns.soa_queries().len(), queries * 2);
    }
}
