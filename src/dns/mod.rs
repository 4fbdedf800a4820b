//! DNS side of the dns-01 challenge: zone discovery and propagation checks.
//!
//! All lookups go through the [`DnsClient`] trait. [`HickoryDns`] is the implementation used
//! outside of tests.

use std::fmt;

use async_trait::async_trait;

use crate::error::{DnsError, ZoneError};

mod hickory;
mod propagation;
mod zone;

pub use self::{
    hickory::HickoryDns,
    propagation::{PropagationChecker, PropagationConfig},
    zone::{Zone, ZoneResolver},
};

/// ACME challenge record name prefix.
pub const ACME_CHALLENGE_RECORD: &str = "_acme-challenge";

/// Longest name DNS allows, without the trailing dot.
const MAX_NAME_LEN: usize = 253;

/// Longest single label DNS allows.
const MAX_LABEL_LEN: usize = 63;

/// Outcome of an SOA query for one candidate name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoaAnswer {
    /// The name is a zone apex.
    Zone,

    /// The name is an alias; zone apexes never are.
    Cname(String),

    /// The name exists but has no SOA record.
    NoData,

    /// The name does not exist.
    NxDomain,
}

/// The lookups needed for zone discovery and propagation checks.
///
/// Names are passed without trailing dot; implementations return names the same way,
/// lowercased.
#[async_trait]
pub trait DnsClient: Send + Sync + fmt::Debug {
    /// Queries the SOA record of `name` through the recursive resolver.
    async fn soa(&self, name: &str) -> Result<SoaAnswer, DnsError>;

    /// Returns the authoritative name server host names of `zone`.
    async fn nameservers(&self, zone: &str) -> Result<Vec<String>, DnsError>;

    /// Returns the CNAME target of `name`, if it is an alias.
    async fn cname(&self, name: &str) -> Result<Option<String>, DnsError>;

    /// Returns the TXT values at `name`, asking `server` directly when given, or the recursive
    /// resolver otherwise. Multi-string records are concatenated.
    async fn txt(&self, name: &str, server: Option<&str>) -> Result<Vec<String>, DnsError>;
}

/// Strips the wildcard prefix: the challenge for `*.example.com` lives at `example.com`.
pub fn normalize_domain(domain: &str) -> &str {
    domain.strip_prefix("*.").unwrap_or(domain)
}

/// Builds the full challenge record name.
///
/// For `example.com` and `*.example.com` this is `_acme-challenge.example.com`.
pub fn challenge_record_fqdn(domain: &str) -> String {
    let normalized = normalize_name(normalize_domain(domain));
    format!("{ACME_CHALLENGE_RECORD}.{normalized}")
}

/// Lowercases `name` and drops the trailing dot.
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Normalizes `name` and checks it is a syntactically usable DNS name.
pub(crate) fn validate_name(name: &str) -> Result<String, ZoneError> {
    let normalized = normalize_name(name);

    let valid = !normalized.is_empty()
        && normalized.len() <= MAX_NAME_LEN
        && normalized
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN);

    if valid {
        Ok(normalized)
    } else {
        Err(ZoneError::InvalidName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("example.com"), "example.com");
        assert_eq!(normalize_domain("*.example.com"), "example.com");
        assert_eq!(normalize_domain("*.sub.example.com"), "sub.example.com");
    }

    #[test]
    fn test_challenge_record_fqdn() {
        assert_eq!(
            challenge_record_fqdn("example.com"),
            "_acme-challenge.example.com"
        );
        assert_eq!(
            challenge_record_fqdn("*.Example.com."),
            "_acme-challenge.example.com"
        );
    }

    #[test]
    fn name_validation() {
        assert_eq!(validate_name("WWW.Example.COM.").unwrap(), "www.example.com");
        assert!(validate_name("").is_err());
        assert!(validate_name("a..example.com").is_err());
        assert!(validate_name(&format!("{}.com", "a".repeat(64))).is_err());
    }
}
