use std::sync::Arc;

use eyre::WrapErr as _;

use crate::{
    acc::AcmeKey,
    api,
    config::ClientConfig,
    req::{req_expect_header, req_get, req_handle_error},
    trans::{NoncePool, Transport},
    util::read_json,
    Account,
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Provide an arbitrary director URL to connect to.
    Other(&'a str),
}

impl DirectoryUrl<'_> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// Entry point for accessing an ACME API.
///
/// The directory document is fetched once and kept for the lifetime of this value. Accounts
/// obtained from the same `Directory` share one nonce pool and HTTP client.
#[derive(Debug, Clone)]
pub struct Directory {
    nonce_pool: Arc<NoncePool>,
    api_directory: api::Directory,
}

impl Directory {
    /// Fetches the directory document with the default [`ClientConfig`].
    pub async fn fetch(url: DirectoryUrl<'_>) -> eyre::Result<Directory> {
        Self::fetch_with_config(url, &ClientConfig::default()).await
    }

    pub async fn fetch_with_config(
        url: DirectoryUrl<'_>,
        config: &ClientConfig,
    ) -> eyre::Result<Directory> {
        let url = url.to_url();
        let client = config.http_client()?;

        let res = req_get(&client, &config.retry, url).await?;
        let res = req_handle_error(res)
            .await
            .wrap_err_with(|| format!("fetch directory {url}"))?;
        let api_directory = read_json::<api::Directory>(res).await?;

        log::debug!("Fetched directory {url}");

        let nonce_pool = Arc::new(NoncePool::new(
            client,
            config.retry,
            &api_directory.new_nonce,
        ));

        Ok(Directory {
            nonce_pool,
            api_directory,
        })
    }

    /// Registers a new account with a freshly generated key.
    ///
    /// Terms of service are agreed to on the caller's behalf.
    pub async fn register_account(&self, contact: Option<Vec<String>>) -> eyre::Result<Account> {
        let acme_key = AcmeKey::new();
        self.upsert_account(acme_key, contact).await
    }

    /// Registers the account for an existing key, or returns it if the CA already knows the key.
    pub async fn load_account(
        &self,
        private_key_pem: &str,
        contact: Option<Vec<String>>,
    ) -> eyre::Result<Account> {
        let acme_key = AcmeKey::from_pem(private_key_pem)?;
        self.upsert_account(acme_key, contact).await
    }

    /// Looks up the account for an existing key without creating one.
    ///
    /// Fails with the CA's `accountDoesNotExist` problem for unknown keys.
    pub async fn load_existing_account(&self, private_key_pem: &str) -> eyre::Result<Account> {
        let acme_key = AcmeKey::from_pem(private_key_pem)?;

        let acc = api::Account {
            only_return_existing: Some(true),
            ..Default::default()
        };

        self.new_account(acme_key, &acc).await
    }

    async fn upsert_account(
        &self,
        acme_key: AcmeKey,
        contact: Option<Vec<String>>,
    ) -> eyre::Result<Account> {
        // newAccount with a known key answers 200 and the existing kid (RFC 8555 §7.3.1)
        let acc = api::Account {
            contact,
            terms_of_service_agreed: Some(true),
            ..Default::default()
        };

        self.new_account(acme_key, &acc).await
    }

    async fn new_account(&self, acme_key: AcmeKey, acc: &api::Account) -> eyre::Result<Account> {
        let mut transport = Transport::new(Arc::clone(&self.nonce_pool), acme_key);

        let res = transport
            .call_jwk(&self.api_directory.new_account, acc)
            .await
            .wrap_err("newAccount")?;

        let existing = res.status() == reqwest::StatusCode::OK;
        let kid = req_expect_header(&res, "location")?;
        let api_account = read_json::<api::Account>(res).await?;

        if existing {
            log::debug!("Found existing account {kid}");
        } else {
            log::info!("Registered account {kid}");
        }

        // fill in the server returned key ID
        transport.set_key_id(kid);

        Ok(Account::new(
            transport,
            api_account,
            self.api_directory.clone(),
        ))
    }

    /// Returns a reference to the directory's API object.
    ///
    /// Useful for debugging.
    pub fn api_directory(&self) -> &api::Directory {
        &self.api_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::find_problem, test::CaServer};

    #[tokio::test]
    async fn test_create_directory() {
        let server = CaServer::start();

        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::fetch(url).await.unwrap();

        assert!(dir.api_directory().new_nonce.ends_with("/acme/new-nonce"));
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let server = CaServer::start();
        let dir = server.directory().await;

        let acc = dir
            .register_account(Some(vec!["mailto:foo@bar.com".to_owned()]))
            .await
            .unwrap();
        let pem = acc.acme_private_key_pem().unwrap();

        let again = dir.load_account(&pem, None).await.unwrap();
        assert_eq!(again.url(), acc.url());

        let existing = dir.load_existing_account(&pem).await.unwrap();
        assert_eq!(existing.url(), acc.url());
        assert!(existing.api_account().is_status_valid());
    }

    #[tokio::test]
    async fn unknown_key_is_not_created_by_lookup() {
        let server = CaServer::start();
        let dir = server.directory().await;

        let pem = AcmeKey::new().to_pem().unwrap();
        let err = dir.load_existing_account(&pem).await.unwrap_err();

        let problem = find_problem(&err).unwrap();
        assert_eq!(problem.kind(), Some("accountDoesNotExist"));
    }
}
