//! Order orchestration.
//!
//! [`Issuer::obtain`] runs a whole order: it creates the order, solves every authorization in
//! its own task, and once all of them are valid finalizes the order and downloads the
//! certificate.

use std::{fmt, sync::Arc};

use eyre::eyre;
use tokio_util::sync::CancellationToken;

use crate::{
    cert::{create_p256_key, Certificate},
    config::IssuerConfig,
    error::{Cancelled, ObtainError, Stage, StageFailure},
    solver::SolverSet,
    util::cancellable,
    Account,
};

mod worker;

pub use self::worker::WorkerState;
use self::worker::AuthorizationWorker;

/// Domains to put on a certificate, and optionally the key to certify.
pub struct CertificateRequest {
    domains: Vec<String>,
    private_key: Option<p256::ecdsa::SigningKey>,
}

impl CertificateRequest {
    /// The first domain becomes the certificate's common name.
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
            private_key: None,
        }
    }

    /// Certifies `key` instead of a newly generated one.
    pub fn with_private_key(mut self, key: p256::ecdsa::SigningKey) -> Self {
        self.private_key = Some(key);
        self
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }
}

impl fmt::Debug for CertificateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateRequest")
            .field("domains", &self.domains)
            .field("private_key", &self.private_key.is_some())
            .finish()
    }
}

/// Obtains certificates for an [`Account`], answering challenges with a [`SolverSet`].
///
/// ```no_run
/// use std::sync::Arc;
///
/// use acme::{
///     dns::{HickoryDns, PropagationConfig},
///     provider::{ProviderConfig, ProviderRegistry},
///     solver::{Dns01Solver, SolverSet},
///     Account, CertificateRequest, Issuer,
/// };
/// use tokio_util::sync::CancellationToken;
///
/// async fn issue(account: Account) -> eyre::Result<()> {
///     let provider = ProviderRegistry::with_builtin()
///         .build("webhook", &ProviderConfig::from_env("WEBHOOK"))?;
///     let dns = Arc::new(HickoryDns::from_system_conf()?);
///     let solver = Dns01Solver::new(provider, dns, PropagationConfig::default());
///
///     let issuer = Issuer::new(account, SolverSet::new().with_solver(Arc::new(solver)));
///     let request = CertificateRequest::new(["example.com", "*.example.com"]);
///     let cert = issuer.obtain(request, &CancellationToken::new()).await?;
///
///     println!("{}", cert.certificate());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Issuer {
    account: Account,
    solvers: Arc<SolverSet>,
    config: IssuerConfig,
}

impl Issuer {
    pub fn new(account: Account, solvers: SolverSet) -> Self {
        Self {
            account,
            solvers: Arc::new(solvers),
            config: IssuerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: IssuerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Runs an order for `request` to completion.
    ///
    /// Every authorization is solved concurrently, except those on a sequential solver. When
    /// any of them fails, the others still run to the end (clean-up included) and the error
    /// lists every failed domain.
    ///
    /// Cancelling `cancel` stops all waiting; proofs already in place are still removed, each
    /// within [`IssuerConfig::cleanup_grace`].
    pub async fn obtain(
        &self,
        request: CertificateRequest,
        cancel: &CancellationToken,
    ) -> Result<Certificate, ObtainError> {
        let CertificateRequest {
            domains,
            private_key,
        } = request;

        let order_error = |stage: Stage, cause: eyre::Report| {
            if cancel.is_cancelled() || cause.downcast_ref::<Cancelled>().is_some() {
                ObtainError::Cancelled
            } else {
                ObtainError::Order {
                    stage,
                    domains: domains.clone(),
                    cause,
                }
            }
        };

        let names = domains.iter().map(String::as_str).collect::<Vec<_>>();

        let order = cancellable(cancel, self.account.new_order(&names))
            .await
            .map_err(|err| order_error(Stage::Ordering, err))?;

        let auths = cancellable(cancel, order.authorizations())
            .await
            .map_err(|err| order_error(Stage::Ordering, err))?;

        let workers = auths
            .into_iter()
            .map(|auth| {
                let domain = auth.domain_name();
                let worker = AuthorizationWorker::new(
                    auth,
                    Arc::clone(&self.solvers),
                    self.config.clone(),
                    cancel.clone(),
                );

                (domain, tokio::spawn(worker.run()))
            })
            .collect::<Vec<_>>();

        let mut failures = Vec::new();

        for (domain, worker) in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(err) => failures.push(StageFailure {
                    domain,
                    stage: Stage::Validating,
                    cause: eyre!("authorization task ended abnormally: {err}"),
                }),
            }
        }

        if cancel.is_cancelled() {
            return Err(ObtainError::Cancelled);
        }

        if !failures.is_empty() {
            return Err(ObtainError::Authorizations(failures));
        }

        let order = order
            .wait_ready(&self.config.order_poll, cancel)
            .await
            .map_err(|err| order_error(Stage::Finalizing, err))?;

        let key = private_key.unwrap_or_else(create_p256_key);

        let order = order
            .finalize_signing_key(key, &self.config.order_poll, cancel)
            .await
            .map_err(|err| order_error(Stage::Finalizing, err))?;

        let cert = cancellable(cancel, order.download_cert())
            .await
            .map_err(|err| order_error(Stage::Downloading, err))?;

        match cert.valid_days_left() {
            Ok(days) => log::info!("Issued certificate for {domains:?}, valid for {days} days"),
            Err(err) => log::warn!("Issued certificate for {domains:?} could not be inspected: {err:#}"),
        }

        Ok(cert)
    }
}
