use std::io::{BufReader, Cursor};

use der::{asn1::Ia5String, Decode as _, DecodePem as _};
use eyre::{eyre, WrapErr as _};
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use time::{OffsetDateTime, PrimitiveDateTime};
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
};
use zeroize::Zeroizing;

/// Longest value X.509 allows for a Common Name (`ub-common-name`).
const MAX_CN_LEN: usize = 64;

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// Creates a CSR with `domains` and signs it with `signer`.
///
/// The first item of `domains` is picked for the CSR's Common Name (CN), unless it is too long to
/// fit one. All domains are added to a Subject Alternative Name (SAN) extension.
pub(crate) fn create_csr(
    signer: &p256::ecdsa::SigningKey,
    domains: &[&str],
) -> eyre::Result<x509_cert::request::CertReq> {
    let primary_domain = domains
        .first()
        .ok_or_else(|| eyre!("CSR needs at least one domain"))?;

    let subject = if primary_domain.len() <= MAX_CN_LEN {
        format!("CN={primary_domain}")
            .parse::<Name>()
            .wrap_err_with(|| format!("{primary_domain} is not a valid common name"))?
    } else {
        Name::default()
    };

    let mut csr = CsrBuilder::new(subject, signer).wrap_err("start CSR")?;

    let names = domains
        .iter()
        .map(|domain| {
            Ia5String::new(domain)
                .map(GeneralName::DnsName)
                .wrap_err_with(|| format!("{domain} is not a valid DNS name"))
        })
        .collect::<eyre::Result<Vec<_>>>()?;

    csr.add_extension(&SubjectAltName(names))
        .wrap_err("add SAN extension")?;

    csr.build::<p256::ecdsa::DerSignature>()
        .wrap_err("build csr")
}

/// Encapsulated certificate and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    private_key_pem: Zeroizing<String>,
    certificate: String,
}

impl Certificate {
    pub(crate) fn new(private_key_pem: Zeroizing<String>, certificate: String) -> Self {
        Certificate {
            private_key_pem,
            certificate,
        }
    }

    pub fn parse(private_key_pem: Zeroizing<String>, certificate: String) -> eyre::Result<Self> {
        // validate certificate
        x509_cert::Certificate::from_pem(certificate.as_str()).wrap_err("parse certificate PEM")?;

        // validate private key
        ecdsa::SigningKey::<p256::NistP256>::from_pkcs8_pem(&private_key_pem)
            .wrap_err("parse private key PEM")?;

        Ok(Certificate {
            private_key_pem,
            certificate,
        })
    }

    /// The private key in PEM format.
    pub fn private_key(&self) -> &str {
        &self.private_key_pem
    }

    /// The private key in DER encoding.
    pub fn private_key_der(&self) -> eyre::Result<Vec<u8>> {
        let private_key =
            ecdsa::SigningKey::<p256::NistP256>::from_pkcs8_pem(&self.private_key_pem)?;
        let der = private_key.to_pkcs8_der()?;
        Ok(der.as_bytes().to_vec())
    }

    /// The issued certificate file in PEM format.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The issued certificate chain in DER format, end-entity certificate first.
    pub fn certificate_chain(&self) -> eyre::Result<Vec<Vec<u8>>> {
        let mut rdr = BufReader::new(Cursor::new(self.certificate()));

        rustls_pemfile::certs(&mut rdr)
            .map(|res| res.map(|cert| cert.to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> eyre::Result<i64> {
        let cert_chain = self.certificate_chain()?;
        let cert_ee = cert_chain
            .first() // EE cert is first
            .ok_or_else(|| eyre!("no certificates in chain"))?;

        let cert = x509_cert::Certificate::from_der(cert_ee)?;

        // X.509 validity times are always UTC
        let not_after = cert.tbs_certificate.validity.not_after.to_date_time();
        let not_after = PrimitiveDateTime::try_from(not_after)
            .wrap_err("certificate expiry out of range")?
            .assume_utc();

        let diff = not_after - OffsetDateTime::now_utc();

        Ok(diff.whole_days())
    }
}

#[cfg(test)]
mod tests {
    use der::Encode as _;

    use super::*;

    #[test]
    fn csr_lists_every_domain_as_san() {
        let key = create_p256_key();
        let csr = create_csr(&key, &["example.com", "www.example.com"]).unwrap();

        assert_eq!(csr.info.subject.to_string(), "CN=example.com");
        assert!(!csr.to_der().unwrap().is_empty());

        let attrs = csr.info.attributes.len();
        assert_eq!(attrs, 1, "extension request attribute present");
    }

    #[test]
    fn single_domain_csr_still_has_san() {
        let key = create_p256_key();
        let csr = create_csr(&key, &["example.com"]).unwrap();
        assert_eq!(csr.info.attributes.len(), 1);
    }

    #[test]
    fn long_primary_name_skips_common_name() {
        let long = format!("{}.example.com", "a".repeat(60));
        let key = create_p256_key();
        let csr = create_csr(&key, &[&long]).unwrap();

        assert!(csr.info.subject.0.is_empty());
    }

    #[test]
    fn empty_domain_list_is_an_error() {
        assert!(create_csr(&create_p256_key(), &[]).is_err());
    }

    #[test]
    fn days_left_of_fresh_certificate() {
        let cert = crate::test::issued_certificate(&["days.example.com"]);
        assert_eq!(cert.valid_days_left().unwrap(), 89);
        assert_eq!(cert.certificate_chain().unwrap().len(), 1);
    }
}
