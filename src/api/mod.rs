//! JSON API payloads.
//!
//! Not intended to be used directly. Provided to aid debugging.

use std::{fmt, time::Duration};

use serde::{
    ser::{SerializeMap as _, Serializer},
    Deserialize, Serialize,
};

mod account;
mod authorization;
mod directory;
mod order;
mod request;

pub use self::{
    account::{Account, AccountStatus},
    authorization::{Authorization, AuthorizationStatus, Challenge, ChallengeStatus},
    directory::{Directory, DirectoryMeta},
    order::{Order, OrderStatus},
    request::{Finalize, Identifier, Revocation},
};

/// Namespace of the ACME error URNs registered by [RFC 8555 §6.7].
///
/// [RFC 8555 §6.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.7
const ACME_ERROR_NS: &str = "urn:ietf:params:acme:error:";

/// Pre-RFC (ACME v1) namespace still emitted by some servers.
const LEGACY_ERROR_NS: &str = "urn:acme:error:";

/// Serializes to `""`.
pub struct EmptyString;

impl Serialize for EmptyString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("")
    }
}

/// Serializes to `{}`.
pub struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_map(Some(0))?.end()
    }
}

/// A problem document ([RFC 7807]) returned by the CA.
///
/// The `type` field is kept verbatim. Problems returned from requests implement
/// [`std::error::Error`], so they can be recovered from an [`eyre::Report`] with
/// `report.downcast_ref::<Problem>()`.
///
/// [RFC 7807]: https://datatracker.ietf.org/doc/html/rfc7807
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub _type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// HTTP status code the problem was delivered with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subproblems: Option<Vec<Subproblem>>,

    /// Value of the `Retry-After` response header, if the CA sent one.
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

impl Problem {
    /// Constructs a problem that did not originate from a problem document.
    pub(crate) fn local(_type: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            _type: _type.into(),
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    /// Returns the short error kind, e.g. `badNonce` for
    /// `urn:ietf:params:acme:error:badNonce`.
    ///
    /// Returns `None` when the type is outside the ACME namespaces.
    pub fn kind(&self) -> Option<&str> {
        self._type
            .strip_prefix(ACME_ERROR_NS)
            .or_else(|| self._type.strip_prefix(LEGACY_ERROR_NS))
    }

    /// Returns true if problem type is "badNonce".
    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == Some("badNonce")
    }

    /// Returns true if problem type is "rateLimited".
    pub fn is_rate_limited(&self) -> bool {
        self.kind() == Some("rateLimited")
    }

    /// Returns true if the problem was delivered with a 5xx status.
    pub fn is_server_error(&self) -> bool {
        self.status.is_some_and(|status| status >= 500)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self._type)?,
            None => write!(f, "{}", self._type)?,
        }

        if let Some(retry_after) = self.retry_after {
            write!(f, " (retry after {}s)", retry_after.as_secs())?;
        }

        Ok(())
    }
}

impl std::error::Error for Problem {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub _type: String,
    pub detail: Option<String>,
    pub identifier: Option<Identifier>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_empty_string() {
        let x = serde_json::to_string(&EmptyString).unwrap();
        assert_eq!("\"\"", x);
    }

    #[test]
    fn test_api_empty_object() {
        let x = serde_json::to_string(&EmptyObject).unwrap();
        assert_eq!("{}", x);
    }

    #[test]
    fn test_problem_kind() {
        let problem: Problem = serde_json::from_str(
            r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"JWS has an invalid anti-replay nonce","status":400}"#,
        )
        .unwrap();

        assert_eq!(problem.kind(), Some("badNonce"));
        assert!(problem.is_bad_nonce());
        assert!(!problem.is_rate_limited());
        assert!(!problem.is_server_error());

        let legacy = Problem::local("urn:acme:error:rateLimited", "too many");
        assert!(legacy.is_rate_limited());

        let foreign = Problem::local("httpReqError", "502 Bad Gateway");
        assert_eq!(foreign.kind(), None);
    }

    #[test]
    fn test_problem_display_keeps_type_verbatim() {
        let problem = Problem {
            _type: "urn:ietf:params:acme:error:rateLimited".to_owned(),
            detail: Some("too many certificates".to_owned()),
            retry_after: Some(Duration::from_secs(3600)),
            ..Default::default()
        };

        assert_eq!(
            problem.to_string(),
            "urn:ietf:params:acme:error:rateLimited: too many certificates (retry after 3600s)"
        );

        let report = eyre::Report::new(problem.clone());
        assert_eq!(report.downcast_ref::<Problem>(), Some(&problem));
    }
}
