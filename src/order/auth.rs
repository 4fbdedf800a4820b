use std::sync::Arc;

use eyre::{eyre, WrapErr as _};
use sha2::{Digest as _, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{
    acc::AccountInner,
    api,
    jws::{dns01_txt_value, key_authorization},
    poll::PollPolicy,
    solver::ChallengeKind,
    util::{read_json, retry_after, sleep_cancellable},
};

/// An authorization ([ownership proof]) for a domain name.
///
/// Each authorization for an order much be progressed to a valid state before the ACME API
/// will issue a certificate.
///
/// Authorizations may or may not be required depending on previous orders against the same
/// ACME account. The ACME API decides if the authorization is needed.
///
/// [ownership proof]: crate#domain-ownership
#[derive(Debug)]
pub struct Auth {
    inner: Arc<AccountInner>,
    api_auth: api::Authorization,
    auth_url: String,
}

impl Auth {
    pub(crate) async fn fetch(inner: &Arc<AccountInner>, auth_url: &str) -> eyre::Result<Self> {
        let api_auth = fetch_authorization(inner, auth_url).await?.0;

        Ok(Auth {
            inner: Arc::clone(inner),
            api_auth,
            auth_url: auth_url.to_owned(),
        })
    }

    /// Domain name for this authorization, with the `*.` prefix for wildcards.
    pub fn domain_name(&self) -> String {
        self.api_auth.domain()
    }

    /// Whether we actually need to do the authorization. This might not be needed if we have
    /// proven ownership of the domain recently in a previous order.
    pub fn need_challenge(&self) -> bool {
        !matches!(self.api_auth.status, api::AuthorizationStatus::Valid)
    }

    /// Returns the challenge of the given kind, if the CA offers one.
    pub fn challenge(&self, kind: ChallengeKind) -> Option<Challenge> {
        self.api_auth
            .challenge(kind.as_str())
            .map(|c| Challenge::new(&self.inner, c.clone(), &self.auth_url, self.domain_name()))
    }

    /// Get the http challenge.
    ///
    /// The http challenge must be placed so it is accessible under:
    ///
    /// ```text
    /// http://<domain-to-be-proven>/.well-known/acme-challenge/<token>
    /// ```
    ///
    /// The challenge will be accessed over HTTP (not HTTPS), for obvious reasons.
    pub fn http_challenge(&self) -> Option<Challenge> {
        self.challenge(ChallengeKind::Http01)
    }

    /// Returns the dns-01 challenge.
    ///
    /// Its proof goes in a TXT record at `_acme-challenge.<domain>`, which wildcard and base
    /// name share. [`Issuer`](crate::Issuer) does all of this through a
    /// [`Dns01Solver`](crate::solver::Dns01Solver); by hand it looks like:
    ///
    /// ```no_run
    /// use acme::{dns::challenge_record_fqdn, order::Auth, PollPolicy};
    ///
    /// async fn dns_authorize(auth: &Auth) -> eyre::Result<()> {
    ///     let challenge = auth.dns_challenge().ok_or_else(|| eyre::eyre!("no dns-01"))?;
    ///     let record = challenge_record_fqdn(&auth.domain_name());
    ///     // publish `challenge.dns_proof()?` as TXT at `record`, then:
    ///     challenge.validate(&PollPolicy::default()).await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn dns_challenge(&self) -> Option<Challenge> {
        self.challenge(ChallengeKind::Dns01)
    }

    /// Returns the TLS ALPN challenge.
    ///
    /// The TLS ALPN challenge is a certificate that must be served when a TLS connection is made
    /// with the ALPN protocol "acme-tls/1". The certificate must contain a single dNSName SAN
    /// containing the domain being validated, as well as an ACME extension containing the SHA256 of
    /// the key authorization.
    pub fn tls_alpn_challenge(&self) -> Option<Challenge> {
        self.challenge(ChallengeKind::TlsAlpn01)
    }

    /// URL of the authorization resource.
    pub fn url(&self) -> &str {
        &self.auth_url
    }

    /// Returns a reference to the authorization's API object.
    ///
    /// Useful for debugging.
    ///
    /// We don't refresh the authorization when the corresponding challenge is validated, so there
    /// will be no changes to see here.
    pub fn api_auth(&self) -> &api::Authorization {
        &self.api_auth
    }
}

/// A challenge obtained from an [`Auth`].
#[derive(Debug, Clone)]
pub struct Challenge {
    inner: Arc<AccountInner>,
    api_challenge: api::Challenge,
    auth_url: String,
    domain: String,
}

impl Challenge {
    fn new(
        inner: &Arc<AccountInner>,
        api_challenge: api::Challenge,
        auth_url: &str,
        domain: String,
    ) -> Self {
        Challenge {
            inner: Arc::clone(inner),
            api_challenge,
            auth_url: auth_url.to_owned(),
            domain,
        }
    }

    /// The challenge kind, `None` for types this library doesn't know.
    pub fn kind(&self) -> Option<ChallengeKind> {
        ChallengeKind::from_type(&self.api_challenge._type)
    }

    /// Returns the token, a unique identifier of the challenge.
    ///
    /// For `http-01` this is used as the file name:
    ///
    /// ```text
    /// http://<domain-to-be-proven>/.well-known/acme-challenge/<token>
    /// ```
    pub fn token(&self) -> &str {
        &self.api_challenge.token
    }

    /// Domain (with `*.` for wildcards) of the authorization this challenge belongs to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The key authorization, `<token>.<account key thumbprint>`.
    pub fn key_authorization(&self) -> eyre::Result<String> {
        key_authorization(&self.api_challenge.token, self.inner.transport.acme_key())
    }

    /// Returns the proof content for HTTP validation ([RFC 8555 §8.3]).
    ///
    /// Proof is typically placed in a text file that is served as the file named by `token`.
    ///
    /// [RFC 8555 §8.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.3
    pub fn http_proof(&self) -> eyre::Result<String> {
        self.key_authorization()
    }

    /// Returns the proof content for DNS validation ([RFC 8555 §8.4]).
    ///
    /// Proof is to be placed in a DNS TXT record like so:
    ///
    /// ```plain
    /// _acme-challenge.<domain-to-be-proven>.  TXT  <proof>
    /// ```
    ///
    /// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
    pub fn dns_proof(&self) -> eyre::Result<String> {
        Ok(dns01_txt_value(&self.key_authorization()?))
    }

    /// Returns the proof content for TLS-ALPN validation ([RFC 8737 §3]).
    ///
    /// Proof is to be placed in the certificate used for validation.
    ///
    /// [RFC 8737 §3]: https://datatracker.ietf.org/doc/html/rfc8737#section-3
    pub fn tls_alpn_proof(&self) -> eyre::Result<[u8; 32]> {
        Ok(Sha256::digest(self.key_authorization()?).into())
    }

    /// Returns true if this challenge needs validation.
    ///
    /// It might already been done in a previous order for the same account.
    pub fn need_validate(&self) -> bool {
        self.api_challenge.is_pending()
    }

    /// Tells the ACME API to attempt to validate the proof of this challenge.
    ///
    /// The challenge proof must be put in place before this call. Either by: placing it in a DNS
    /// record, updating a web server, or passing it to TLS connection for ALPN exchange.
    pub async fn notify(&self) -> eyre::Result<()> {
        let res = self
            .inner
            .transport
            .call_kid(&self.api_challenge.url, &api::EmptyObject)
            .await
            .wrap_err_with(|| format!("notify {} challenge", self.api_challenge._type))?;

        let api_challenge = read_json::<api::Challenge>(res).await?;
        log::debug!(
            "Challenge {} for {} is {:?}",
            api_challenge._type,
            self.domain,
            api_challenge.status
        );

        Ok(())
    }

    /// Polls the authorization until it leaves `pending`, returning it in its final state.
    pub async fn poll_authorization(
        &self,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> eyre::Result<api::Authorization> {
        let mut backoff = policy.start();

        loop {
            let (auth, retry_after) = fetch_authorization(&self.inner, &self.auth_url).await?;

            if !matches!(auth.status, api::AuthorizationStatus::Pending) {
                return Ok(auth);
            }

            let Some(delay) = backoff.next_delay(retry_after) else {
                return Err(eyre!(
                    "authorization for {} still pending after {:?}",
                    self.domain,
                    backoff.elapsed()
                ));
            };

            sleep_cancellable(cancel, delay).await?;
        }
    }

    /// Notifies the CA and waits for the authorization to become valid.
    ///
    /// A failed validation carries the CA's problem document.
    pub async fn validate(&self, policy: &PollPolicy) -> eyre::Result<()> {
        self.notify().await?;

        let auth = self
            .poll_authorization(policy, &CancellationToken::new())
            .await?;

        match auth.status {
            api::AuthorizationStatus::Valid => Ok(()),
            _ => Err(authorization_error(&auth)),
        }
    }

    /// Returns a reference to the challenge's API object.
    ///
    /// Useful for debugging.
    pub fn api_challenge(&self) -> &api::Challenge {
        &self.api_challenge
    }
}

/// Error for an authorization that ended in something other than `valid`.
pub(crate) fn authorization_error(auth: &api::Authorization) -> eyre::Report {
    let status = auth.status.as_str();

    match auth.challenge_error() {
        Some(problem) => eyre::Report::new(problem.clone())
            .wrap_err(format!("authorization for {} is {status}", auth.domain())),
        None => eyre!("authorization for {} is {status}", auth.domain()),
    }
}

async fn fetch_authorization(
    inner: &AccountInner,
    auth_url: &str,
) -> eyre::Result<(api::Authorization, Option<std::time::Duration>)> {
    let res = inner
        .transport
        .call_kid(auth_url, &api::EmptyString)
        .await
        .wrap_err("fetch authorization")?;

    let retry_after = retry_after(res.headers());
    let auth = read_json::<api::Authorization>(res).await?;

    Ok((auth, retry_after))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{error::find_problem, test::CaServer};

    fn fast_poll() -> PollPolicy {
        PollPolicy::fixed(Duration::from_millis(10), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_get_challenges() {
        let server = CaServer::start();
        let acc = server.account().await;

        let ord = acc.new_order(&["acme-test.example.com"]).await.unwrap();
        let authz = ord.authorizations().await.unwrap();
        assert_eq!(authz.len(), 1);

        let auth = &authz[0];
        assert!(auth.need_challenge());

        let http = auth.http_challenge().unwrap();
        assert!(http.need_validate());
        assert_eq!(http.kind(), Some(ChallengeKind::Http01));

        let dns = auth.dns_challenge().unwrap();
        assert_eq!(dns.domain(), "acme-test.example.com");

        let key_auth = dns.key_authorization().unwrap();
        assert!(key_auth.starts_with(dns.token()));
        assert_eq!(dns.dns_proof().unwrap(), dns01_txt_value(&key_auth));
        assert_eq!(http.http_proof().unwrap(), http.key_authorization().unwrap());
    }

    #[tokio::test]
    async fn validate_succeeds_when_ca_accepts() {
        let server = CaServer::start();
        let acc = server.account().await;

        let ord = acc.new_order(&["ok.example.com"]).await.unwrap();
        let auth = ord.authorizations().await.unwrap().remove(0);

        auth.dns_challenge().unwrap().validate(&fast_poll()).await.unwrap();
        assert_eq!(server.state().notified(), ["ok.example.com"]);
    }

    #[tokio::test]
    async fn validate_surfaces_ca_problem() {
        let server = CaServer::start();
        server.state().reject("bad.example.com");

        let acc = server.account().await;
        let ord = acc.new_order(&["bad.example.com"]).await.unwrap();
        let auth = ord.authorizations().await.unwrap().remove(0);

        let err = auth
            .dns_challenge()
            .unwrap()
            .validate(&fast_poll())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("bad.example.com is invalid"));
        assert_eq!(find_problem(&err).unwrap().kind(), Some("unauthorized"));
    }
}
