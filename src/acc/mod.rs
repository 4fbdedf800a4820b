use std::{collections::HashSet, sync::Arc};

use eyre::{ensure, WrapErr as _};
use zeroize::Zeroizing;

use crate::{
    api,
    cert::Certificate,
    order::{NewOrder, Order},
    req::req_expect_header,
    trans::Transport,
    util::{base64url, read_json},
};

mod acme_key;

pub(crate) use self::acme_key::AcmeKey;

#[derive(Debug)]
pub(crate) struct AccountInner {
    pub transport: Transport,
    pub api_account: api::Account,
    pub api_directory: api::Directory,
}

/// Account with an ACME provider.
///
/// Accounts are created using [`Directory::register_account()`] and consists of a contact email
/// address and a private key for signing requests to the ACME API.
///
/// This library uses elliptic curve P-256 for accessing the account.
///
/// The advantages of using elliptic curve cryptography are that the signed requests against the
/// ACME lib are small and that the public key can be derived from the private key.
///
/// Cloning is cheap; clones share the nonce pool and HTTP client.
///
/// [`Directory::register_account()`]: crate::Directory::register_account()
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        api_account: api::Account,
        api_directory: api::Directory,
    ) -> Self {
        Self {
            inner: Arc::new(AccountInner {
                transport,
                api_account,
                api_directory,
            }),
        }
    }

    /// Private key for this account.
    ///
    /// The key is an elliptic curve private key. Persist it to load the same account later.
    pub fn acme_private_key_pem(&self) -> eyre::Result<Zeroizing<String>> {
        self.inner.transport.acme_key().to_pem()
    }

    /// The account URL (`kid`) assigned by the CA.
    pub fn url(&self) -> &str {
        // set by the directory before an `Account` is handed out
        self.inner.transport.acme_key().key_id().unwrap_or_default()
    }

    /// Create a new order to issue a certificate for `domains`.
    ///
    /// Names are lowercased and deduplicated; the first one ends up as the certificate's `CN`.
    ///
    /// This library doesn't constrain the number of names, but it is limited by the ACME API
    /// provider. Let's Encrypt [sets a max of 100 names] per certificate.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain names
    /// supplied are exactly the same.
    ///
    /// [sets a max of 100 names]: https://letsencrypt.org/docs/rate-limits/
    pub async fn new_order(&self, domains: &[&str]) -> eyre::Result<NewOrder> {
        let identifiers = dedup_identifiers(domains);
        ensure!(!identifiers.is_empty(), "an order needs at least one domain");

        let order = api::Order::from_identifiers(identifiers);
        let new_order_url = self.inner.api_directory.new_order.as_str();

        let res = self
            .inner
            .transport
            .call_kid(new_order_url, &order)
            .await
            .wrap_err("create order")?;
        let order_url = req_expect_header(&res, "location")?;
        let api_order = read_json::<api::Order>(res).await?;

        log::info!("Created order {order_url} for {:?}", api_order.domains());

        Ok(NewOrder {
            order: Order::new(&self.inner, api_order, order_url),
        })
    }

    /// Revoke a certificate for the reason given.
    pub async fn revoke_certificate(
        &self,
        cert: &Certificate,
        reason: RevocationReason,
    ) -> eyre::Result<()> {
        let chain = cert.certificate_chain()?;
        let ee = chain
            .first()
            .ok_or_else(|| eyre::eyre!("certificate PEM holds no certificates"))?;

        // convert to base64url of the DER (which is not PEM).
        let certificate = base64url(ee);

        let reason = match reason {
            // > the reason code CRL entry extension SHOULD be absent instead of
            // > using the unspecified (0) reasonCode value
            // see <https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1>
            RevocationReason::Unspecified => None,

            reason => Some(reason as usize),
        };

        let revocation = api::Revocation {
            certificate,
            reason,
        };

        let url = &self.inner.api_directory.revoke_cert;
        self.inner
            .transport
            .call_kid(url, &revocation)
            .await
            .wrap_err("revoke certificate")?;

        Ok(())
    }

    /// Returns a reference to the account's API object.
    ///
    /// Useful for debugging.
    pub fn api_account(&self) -> &api::Account {
        &self.inner.api_account
    }

    pub(crate) fn inner(&self) -> &Arc<AccountInner> {
        &self.inner
    }
}

fn dedup_identifiers(domains: &[&str]) -> Vec<api::Identifier> {
    let mut seen = HashSet::new();

    domains
        .iter()
        .map(|domain| api::Identifier::dns(domain))
        .filter(|ident| !ident.value.is_empty() && seen.insert(ident.value.clone()))
        .collect()
}

/// Enumeration of reasons for revocation.
///
/// The reason codes are taken from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}
