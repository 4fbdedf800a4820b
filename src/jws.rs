//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use eyre::eyre;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{acc::AcmeKey, util::base64url};

/// JWT Protected Header scheme as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtectedHeader {
    /// Algorithm.
    ///
    /// This field MUST NOT contain "none" or a Message Authentication Code (MAC) algorithm (e.g.
    /// one in which the algorithm registry description mentions MAC/HMAC).
    ///
    /// > An ACME server MUST implement the "ES256" signature algorithm (RFC 7518) and SHOULD
    /// implement the "EdDSA" signature algorithm using the "Ed25519" variant (indicated by "crv")
    /// (RFC 8037).
    alg: String,

    /// A unique value that enables the verifier of a JWS to recognize when replay has occurred.
    ///
    /// As defined in [RFC 8555 §6.5].
    ///
    /// > The value of the "nonce" header parameter MUST be an octet string, encoded according to
    /// the base64url encoding. If the value of a "nonce" header parameter is not valid according to
    /// this encoding, then the verifier MUST reject the JWS as malformed
    ///
    /// [RFC 8555 §6.5: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.
    nonce: String,

    /// Defined in [RFC 8555 §6.4].
    ///
    /// > The "url" header parameter specifies the URL (RFC 3986) to which this JWS object is
    /// directed. The "url" header parameter MUST be carried in the protected header of the JWS. The
    /// value of the "url" header parameter MUST be a string representing the target URL.
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    url: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    /// Key ID.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce,
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub(crate) struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl TryFrom<&AcmeKey> for Jwk {
    type Error = eyre::Error;

    fn try_from(a: &AcmeKey) -> eyre::Result<Self> {
        let point = a.signing_key().verifying_key().to_encoded_point(false);

        // uncompressed points always carry both coordinates
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(eyre!("account key is not an uncompressed P-256 point"));
        };

        Ok(Jwk {
            alg: "ES256".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: base64url(x),
            y: base64url(y),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        JwkThumb {
            crv: a.crv.clone(),
            kty: a.kty.clone(),
            x: a.x.clone(),
            y: a.y.clone(),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    protected: String,
    payload: String,
    signature: String,
}

impl FlattenedJsonJws {
    pub(crate) fn new(protected: String, payload: String, signature: String) -> Self {
        FlattenedJsonJws {
            protected,
            payload,
            signature,
        }
    }
}

/// JWK thumbprint of the account key, see [RFC 7638].
///
/// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
pub(crate) fn thumbprint(key: &AcmeKey) -> eyre::Result<String> {
    let jwk = Jwk::try_from(key)?;
    let jwk_json = serde_json::to_string(&JwkThumb::from(&jwk))?;
    Ok(base64url(&Sha256::digest(jwk_json)))
}

/// Key authorization for `token`: `<token>.<thumbprint>` ([RFC 8555 §8.1]).
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub(crate) fn key_authorization(token: &str, key: &AcmeKey) -> eyre::Result<String> {
    Ok(format!("{token}.{}", thumbprint(key)?))
}

/// The dns-01 TXT value derived from a key authorization ([RFC 8555 §8.4]).
///
/// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
pub fn dns01_txt_value(key_authorization: &str) -> String {
    base64url(&Sha256::digest(key_authorization))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumbprint_fields_are_lexically_ordered() {
        let key = AcmeKey::new();
        let jwk = Jwk::try_from(&key).unwrap();
        let json = serde_json::to_string(&JwkThumb::from(&jwk)).unwrap();

        assert!(json.starts_with(r#"{"crv":"P-256","kty":"EC","x":""#));
        assert_eq!(thumbprint(&key).unwrap().len(), 43);
    }

    #[test]
    fn key_authorization_is_token_dot_thumbprint() {
        let key = AcmeKey::new();
        let key_auth = key_authorization("tok3n", &key).unwrap();
        let (token, thumb) = key_auth.split_once('.').unwrap();

        assert_eq!(token, "tok3n");
        assert_eq!(thumb, thumbprint(&key).unwrap());
    }

    #[test]
    fn dns01_value_is_sha256_of_key_authorization() {
        let value = dns01_txt_value(
            "evaGxfADs6pSRb2LAv9IZf17Dt3juxGJ-PCt92wr-oA.nP1qzpXGymHBrUEepNY9HCsQk7K8KhOypzEt62jcerQ",
        );
        assert_eq!(value, "NGwKoXBgCT8JhEa0bK7AwfSqHyu_ZWeugV07fLGIVq0");
    }
}
