//! Payloads only ever sent to the CA.

use serde::{Deserialize, Serialize};

/// A `dns` identifier, see [RFC 8555 §9.7.7].
///
/// [RFC 8555 §9.7.7]: https://datatracker.ietf.org/doc/html/rfc8555#section-9.7.7
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    /// Lowercased and without trailing dot, the way the CA echoes names back.
    pub(crate) fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.trim_end_matches('.').to_ascii_lowercase(),
        }
    }
}

/// Body of the finalize request ([RFC 8555 §7.4]).
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finalize {
    /// Base64url DER of the CSR.
    pub csr: String,
}

impl Finalize {
    pub(crate) fn from_der(csr_der: &[u8]) -> Self {
        Self {
            csr: crate::util::base64url(csr_der),
        }
    }
}

/// Body of the revokeCert request ([RFC 8555 §7.6]).
///
/// [RFC 8555 §7.6]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.6
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    /// Base64url DER of the certificate.
    pub certificate: String,

    /// Reason code from [RFC 5280 §5.3.1].
    ///
    /// [RFC 5280 §5.3.1]: https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<usize>,
}
