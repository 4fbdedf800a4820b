//! Obtains a certificate with dns-01, publishing records through a webhook.
//!
//! Configure with:
//!
//! - `ACME_DOMAINS`: comma separated names, e.g. `example.com,*.example.com`
//! - `WEBHOOK_URL`, optionally `WEBHOOK_AUTH_TOKEN`, `WEBHOOK_SEQUENTIAL_INTERVAL`, ...
//! - `ACME_PROPAGATION_TIMEOUT`, `ACME_PROPAGATION_INTERVAL`, `ACME_DNS_RESOLVERS`

use std::{env, sync::Arc};

use acme::{
    dns::{HickoryDns, PropagationConfig},
    provider::{ProviderConfig, ProviderRegistry},
    solver::{Dns01Solver, SolverSet},
    CertificateRequest, Directory, DirectoryUrl, Issuer,
};
use eyre::WrapErr as _;
use tokio::fs;
use tokio_util::sync::CancellationToken;

const ACCOUNT_KEY_PATH: &str = "./acme-accounts/account.pem";
const CERT_DIR: &str = "./acme-certs";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let domains = env::var("ACME_DOMAINS").wrap_err("ACME_DOMAINS is not set")?;
    let domains = domains
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>();

    log::info!("fetching LetsEncrypt directory");
    let dir = Directory::fetch(DirectoryUrl::LetsEncryptStaging).await?;

    let account_key = fs::read_to_string(ACCOUNT_KEY_PATH)
        .await
        .wrap_err_with(|| format!("read {ACCOUNT_KEY_PATH}; run the account-management demo first"))?;
    let account = dir.load_existing_account(&account_key).await?;

    let provider =
        ProviderRegistry::with_builtin().build("webhook", &ProviderConfig::from_env("WEBHOOK"))?;

    let propagation = PropagationConfig::from_env()?;
    let dns = if propagation.nameservers.is_empty() {
        HickoryDns::from_system_conf()?
    } else {
        HickoryDns::new(&propagation.nameservers)?
    };

    let solver = Dns01Solver::new(provider, Arc::new(dns), propagation);
    let issuer = Issuer::new(account, SolverSet::new().with_solver(Arc::new(solver)));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, cleaning up");
                cancel.cancel();
            }
        }
    });

    let cert = issuer
        .obtain(CertificateRequest::new(domains.iter().copied()), &cancel)
        .await?;

    fs::create_dir_all(CERT_DIR).await?;
    fs::write(format!("{CERT_DIR}/cert.pem"), cert.certificate()).await?;
    fs::write(format!("{CERT_DIR}/key.pem"), cert.private_key()).await?;

    log::info!(
        "certificate written to {CERT_DIR}, valid for {} days",
        cert.valid_days_left()?
    );

    Ok(())
}
