use serde::{Deserialize, Serialize};

use crate::api;

/// Status of an [`Authorization`], see [RFC 8555 §7.1.6].
///
/// [RFC 8555 §7.1.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
        }
    }
}

/// Authorization of the account for one identifier ([RFC 8555 §7.1.4]).
///
/// Pending authorizations list every challenge the CA accepts. Once decided, the list holds the
/// challenge that was attempted, with its `error` when validation failed.
///
/// [RFC 8555 §7.1.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: api::Identifier,

    pub status: AuthorizationStatus,

    /// RFC 3339 timestamp; always present on valid authorizations.
    pub expires: Option<String>,

    pub challenges: Vec<Challenge>,

    /// Set for authorizations created from a wildcard identifier. The identifier itself then
    /// comes without the `*.` label.
    pub wildcard: Option<bool>,
}

impl Authorization {
    pub fn is_wildcard(&self) -> bool {
        self.wildcard.unwrap_or(false)
    }

    /// Returns the domain as it was requested in the order, `*.` included.
    pub fn domain(&self) -> String {
        if self.is_wildcard() && !self.identifier.value.starts_with("*.") {
            format!("*.{}", self.identifier.value)
        } else {
            self.identifier.value.clone()
        }
    }

    /// Returns the first challenge of the given type (e.g. `dns-01`), if one is offered.
    pub fn challenge(&self, challenge_type: &str) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c._type == challenge_type)
    }

    pub fn http_challenge(&self) -> Option<&Challenge> {
        self.challenge("http-01")
    }

    pub fn dns_challenge(&self) -> Option<&Challenge> {
        self.challenge("dns-01")
    }

    pub fn tls_alpn_challenge(&self) -> Option<&Challenge> {
        self.challenge("tls-alpn-01")
    }

    /// Returns the first validation error reported on any of the challenges.
    pub fn challenge_error(&self) -> Option<&api::Problem> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}

/// Status of a [`Challenge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// One way of proving control of an identifier ([RFC 8555 §7.1.5]).
///
/// [RFC 8555 §7.1.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// `dns-01`, `http-01`, `tls-alpn-01`, or a type this crate does not know.
    #[serde(rename = "type")]
    pub _type: String,

    /// Posting `{}` here asks the CA to validate.
    pub url: String,

    pub status: ChallengeStatus,

    /// RFC 3339 timestamp of a successful validation.
    pub validated: Option<String>,

    pub error: Option<api::Problem>,

    pub token: String,
}

impl Challenge {
    /// Returns true if the CA has not yet been asked to validate this challenge.
    pub fn is_pending(&self) -> bool {
        self.status == ChallengeStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_domain_is_restored() {
        let authz: Authorization = serde_json::from_str(
            r#"{
                "identifier": {"type": "dns", "value": "example.com"},
                "status": "pending",
                "wildcard": true,
                "challenges": [
                    {"type": "dns-01", "status": "pending", "url": "https://ca/chall/1", "token": "tok"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(authz.domain(), "*.example.com");
        assert!(authz.dns_challenge().is_some());
        assert!(authz.http_challenge().is_none());
        assert_eq!(authz.status.as_str(), "pending");
        assert!(authz.challenges[0].is_pending());
    }

    #[test]
    fn challenge_error_is_surfaced() {
        let authz: Authorization = serde_json::from_str(
            r#"{
                "identifier": {"type": "dns", "value": "bad.example.com"},
                "status": "invalid",
                "challenges": [
                    {
                        "type": "dns-01",
                        "status": "invalid",
                        "url": "https://ca/chall/1",
                        "token": "tok",
                        "error": {
                            "type": "urn:ietf:params:acme:error:dns",
                            "detail": "NXDOMAIN looking up TXT for _acme-challenge.bad.example.com",
                            "status": 400
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        let error = authz.challenge_error().unwrap();
        assert_eq!(error.kind(), Some("dns"));
        assert_eq!(error.status, Some(400));
        assert_eq!(authz.challenges[0].status, ChallengeStatus::Invalid);
    }
}
