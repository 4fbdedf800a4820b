//! Order life cycle.
//!
//! An order goes through a life cycle of different states that require various actions by
//! the user. To ensure the user only use appropriate actions, this library have simple façade
//! structs that wraps the actual [`api::Order`].
//!
//! 1. First prove ownership:
//!    * [`NewOrder`] -> [`Auth`]* -> [`Challenge`]
//! 2. Then submit CSR and download the cert.
//!    * [`NewOrder`] -> [`CsrOrder`] -> [`CertOrder`]
//!
//! \* Possibly multiple auths.
//!
//! [`Issuer`](crate::Issuer) drives all of this for you; use the façade directly when challenges
//! are answered by something other than a [`Solver`](crate::solver::Solver).

use std::{sync::Arc, time::Duration};

use der::Encode as _;
use ecdsa::SigningKey;
use eyre::{eyre, WrapErr as _};
use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use tokio_util::sync::CancellationToken;

use crate::{
    acc::AccountInner,
    api,
    cert::{create_csr, Certificate},
    poll::PollPolicy,
    util::{read_json, retry_after, sleep_cancellable},
};

mod auth;

pub(crate) use self::auth::authorization_error;
pub use self::auth::{Auth, Challenge};

/// The order wrapped with an outer façade.
#[derive(Debug)]
pub(crate) struct Order {
    inner: Arc<AccountInner>,
    api_order: api::Order,
    url: String,
}

impl Order {
    pub(crate) fn new(inner: &Arc<AccountInner>, api_order: api::Order, url: String) -> Self {
        Order {
            inner: Arc::clone(inner),
            api_order,
            url,
        }
    }

    /// Refreshes the order (POST-as-GET), keeping the requested domain order.
    ///
    /// Returns the `Retry-After` the CA sent along, if any.
    async fn refresh(&mut self) -> eyre::Result<Option<Duration>> {
        let res = self
            .inner
            .transport
            .call_kid(&self.url, &api::EmptyString)
            .await
            .wrap_err("refresh order")?;

        let retry_after = retry_after(res.headers());
        let api_order = read_json::<api::Order>(res).await?;
        self.api_order.overwrite(api_order)?;

        Ok(retry_after)
    }

    /// Polls the order until `done` holds, the order turns invalid, or `policy` runs out.
    ///
    /// `retry_after` is the delay the CA asked for when the current state was fetched.
    async fn poll_until(
        &mut self,
        policy: &PollPolicy,
        cancel: &CancellationToken,
        mut retry_after: Option<Duration>,
        done: impl Fn(&api::Order) -> bool,
    ) -> eyre::Result<()> {
        let mut backoff = policy.start();

        loop {
            if done(&self.api_order) {
                return Ok(());
            }

            if self.api_order.is_status_invalid() {
                return Err(order_error(&self.api_order));
            }

            let Some(delay) = backoff.next_delay(retry_after) else {
                return Err(eyre!(
                    "order {} still {:?} after {:?}",
                    self.url,
                    self.api_order.status,
                    backoff.elapsed()
                ));
            };

            log::debug!("Order is {:?}, polling again in {delay:?}", self.api_order.status);
            sleep_cancellable(cancel, delay).await?;

            retry_after = self.refresh().await?;
        }
    }
}

fn order_error(api_order: &api::Order) -> eyre::Report {
    match &api_order.error {
        Some(problem) => eyre::Report::new(problem.clone()).wrap_err("order is invalid"),
        None => eyre!("order is invalid"),
    }
}

/// A new order created by [`Account::new_order`].
///
/// An order is created using one or many domains (a primary `CN` and possible multiple
/// alt names). All domains in the order must have authorizations ([confirmed ownership])
/// before the order can progress to submitting a [CSR].
///
/// This order façade provides calls to provide such authorizations and to progress the order
/// when ready.
///
/// The ACME API provider might "remember" for a time that you already own a domain, which
/// means you might not need to prove the ownership every time. Use appropriate methods to
/// first check whether you really need to handle authorizations.
///
/// [`Account::new_order`]: crate::Account::new_order
/// [confirmed ownership]: crate#domain-ownership
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
#[derive(Debug)]
pub struct NewOrder {
    pub(crate) order: Order,
}

impl NewOrder {
    /// Tell if the domains in this order have been authorized.
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// In ACME API terms, the order can either be `ready` or `valid`, which both would
    /// mean we have passed the authorization stage.
    ///
    /// [`refresh`]: Self::refresh
    pub fn is_validated(&self) -> bool {
        self.order.api_order.is_status_ready() || self.order.api_order.is_status_valid()
    }

    /// If the order [`is_validated`] progress it to a [`CsrOrder`].
    ///
    /// This doesn't do any calls against the API. You must manually call [`refresh`].
    ///
    /// [`is_validated`]: Self::is_validated
    /// [`refresh`]: Self::refresh
    pub fn confirm_validations(self) -> Result<CsrOrder, NewOrder> {
        if self.is_validated() {
            Ok(CsrOrder { order: self.order })
        } else {
            Err(self)
        }
    }

    /// Refresh the order state against the ACME API.
    ///
    /// A POST-as-GET against the order URL.
    pub async fn refresh(&mut self) -> eyre::Result<()> {
        self.order.refresh().await?;
        Ok(())
    }

    /// Polls the order until it leaves `pending`.
    ///
    /// Meant to be called once every authorization is valid; fails if the order turns invalid or
    /// `policy` runs out first.
    pub async fn wait_ready(
        mut self,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> eyre::Result<CsrOrder> {
        self.order
            .poll_until(policy, cancel, None, |order| !order.is_status_pending())
            .await?;

        self.confirm_validations()
            .map_err(|order| eyre!("order not ready: {:?}", order.api_order().status))
    }

    /// Provide the authorizations. The number of authorizations will be the same as
    /// the number of domains requests, i.e. at least one (the primary CN), but possibly
    /// more (for alt names).
    ///
    /// If the order includes new domain names that have not been authorized before, this
    /// list might contain a mix of already valid and not yet valid auths.
    pub async fn authorizations(&self) -> eyre::Result<Vec<Auth>> {
        let mut result = vec![];

        for auth_url in self.order.api_order.authorizations.iter().flatten() {
            result.push(Auth::fetch(&self.order.inner, auth_url).await?);
        }

        Ok(result)
    }

    /// URL of the order resource.
    pub fn url(&self) -> &str {
        &self.order.url
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// An order that is ready for a [CSR] submission.
///
/// To submit the CSR is called "finalizing" the order.
///
/// To finalize, the user supplies a P-256 private key (from which a public key is derived). See
/// [`create_p256_key`](crate::create_p256_key).
///
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
#[derive(Debug)]
pub struct CsrOrder {
    pub(crate) order: Order,
}

impl CsrOrder {
    /// Finalize the order by providing a private key as PEM.
    ///
    /// Once the CSR has been submitted, the order goes into a `processing` status,
    /// where we poll according to `policy` until the status changes.
    ///
    /// This is a convenience wrapper that in turn calls the lower level [`finalize_signing_key`].
    ///
    /// [`finalize_signing_key`]: Self::finalize_signing_key
    pub async fn finalize(self, private_key_pem: &str, policy: &PollPolicy) -> eyre::Result<CertOrder> {
        let signing_key =
            SigningKey::from_pkcs8_pem(private_key_pem).wrap_err("Error reading private key PEM")?;
        self.finalize_signing_key(signing_key, policy, &CancellationToken::new())
            .await
    }

    /// Creates the CSR for the domains in the order and submit it to the ACME API.
    ///
    /// Once the CSR has been submitted, the order goes into a `processing` status,
    /// where we poll according to `policy` until the status changes. A `Retry-After` sent by the
    /// CA replaces the computed delay.
    pub async fn finalize_signing_key(
        mut self,
        signing_key: p256::ecdsa::SigningKey,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> eyre::Result<CertOrder> {
        // csr from private key and authorized domains.
        let csr = {
            let domains = self.order.api_order.domains();
            create_csr(&signing_key, &domains)?
        };

        // this is not the same as PEM.
        let finalize = api::Finalize::from_der(&csr.to_der()?);

        // if the CSR is invalid, we will get a 4xx code back
        let res = self
            .order
            .inner
            .transport
            .call_kid(&self.order.api_order.finalize, &finalize)
            .await
            .wrap_err("finalize order")?;

        let retry_after = retry_after(res.headers());
        let api_order = read_json::<api::Order>(res).await?;
        self.order.api_order.overwrite(api_order)?;

        log::debug!("Finalized order {}", self.order.url);

        // valid -> cert is issued
        // invalid -> the whole thing is off
        self.order
            .poll_until(policy, cancel, retry_after, api::Order::is_status_valid)
            .await?;

        Ok(CertOrder {
            signing_key,
            order: self.order,
        })
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

/// Order for an issued certificate that is ready to download.
#[derive(Debug)]
pub struct CertOrder {
    signing_key: p256::ecdsa::SigningKey,
    order: Order,
}

impl CertOrder {
    /// Request download of the issued certificate.
    pub async fn download_cert(self) -> eyre::Result<Certificate> {
        let url = self
            .order
            .api_order
            .certificate
            .as_deref()
            .ok_or_else(|| eyre!("valid order has no certificate URL"))?;

        let res = self
            .order
            .inner
            .transport
            .call_kid(url, &api::EmptyString)
            .await
            .wrap_err("download certificate")?;

        let certificate = res.text().await.wrap_err("read certificate body")?;

        let signing_key_pem = self
            .signing_key
            .to_pkcs8_pem(der::pem::LineEnding::LF)
            .wrap_err("encode certificate key")?;

        Ok(Certificate::new(signing_key_pem, certificate))
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.order.api_order
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{cert, test::CaServer};

    fn fast_poll() -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(10), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_get_authorizations() {
        let server = CaServer::start();
        let acc = server.account().await;

        let ord = acc
            .new_order(&["acmetest.example.com", "www.acmetest.example.com"])
            .await
            .unwrap();

        let authorizations = ord.authorizations().await.unwrap();
        let domains = authorizations
            .iter()
            .map(|auth| auth.domain_name())
            .collect::<Vec<_>>();

        assert_eq!(domains, ["acmetest.example.com", "www.acmetest.example.com"]);
        assert!(!ord.is_validated());
    }

    #[tokio::test]
    async fn unvalidated_order_cannot_be_finalized() {
        let server = CaServer::start();
        let acc = server.account().await;

        let ord = acc.new_order(&["acmetest.example.com"]).await.unwrap();
        assert!(ord.confirm_validations().is_err());
    }

    #[tokio::test]
    async fn test_finalize_and_download() {
        let server = CaServer::start();
        let acc = server.account().await;

        let ord = acc.new_order(&["acmetest.example.com"]).await.unwrap();
        server.state().authorize_all();

        let ord = ord
            .wait_ready(&fast_poll(), &CancellationToken::new())
            .await
            .unwrap();

        let signing_key = cert::create_p256_key();
        let ord = ord
            .finalize_signing_key(signing_key, &fast_poll(), &CancellationToken::new())
            .await
            .unwrap();

        let cert = ord.download_cert().await.unwrap();
        assert!(cert.certificate().starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(!cert.private_key().is_empty());
        assert_eq!(cert.valid_days_left().unwrap(), 89);
    }

    #[tokio::test]
    async fn processing_order_honours_retry_after() {
        let server = CaServer::start();
        server.state().set_processing_polls(1, Some(1));

        let acc = server.account().await;
        let ord = acc.new_order(&["slow.example.com"]).await.unwrap();
        server.state().authorize_all();

        let ord = ord
            .wait_ready(&fast_poll(), &CancellationToken::new())
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let ord = ord
            .finalize_signing_key(cert::create_p256_key(), &fast_poll(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(ord.api_order().is_status_valid());
    }

    #[tokio::test]
    async fn wait_ready_gives_up_after_budget() {
        let server = CaServer::start();
        let acc = server.account().await;
        let ord = acc.new_order(&["stuck.example.com"]).await.unwrap();

        let policy = PollPolicy::fixed(Duration::from_millis(10), Duration::from_millis(100));
        let err = ord
            .wait_ready(&policy, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("still"), "{err:#}");
    }
}
