use std::{collections::VecDeque, sync::Arc};

use base64::prelude::*;
use eyre::WrapErr as _;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    acc::AcmeKey,
    jws::{FlattenedJsonJws, Jwk, JwsProtectedHeader},
    poll::RetryPolicy,
    req::{
        is_transient, is_transient_status, req_expect_header, req_handle_error, req_head, req_post,
    },
};

/// Upper bound of nonces kept around for reuse.
const NONCE_POOL_SIZE: usize = 10;

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against newAccount url
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `call_kid()` for all calls after that.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    acme_key: AcmeKey,
    nonce_pool: Arc<NoncePool>,
}

impl Transport {
    pub(crate) fn new(nonce_pool: Arc<NoncePool>, acme_key: AcmeKey) -> Self {
        Transport {
            acme_key,
            nonce_pool,
        }
    }

    /// Update the key ID once it is known (part of setting up the transport).
    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.acme_key.set_key_id(kid);
    }

    /// The key used in the transport
    pub(crate) fn acme_key(&self) -> &AcmeKey {
        &self.acme_key
    }

    /// Make call using the full JWS.
    ///
    /// Only needed for the first newAccount request.
    pub(crate) async fn call_jwk<T>(&self, url: &str, body: &T) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        fn jws_with_jwk<T: Serialize + ?Sized>(
            url: &str,
            nonce: String,
            key: &AcmeKey,
            payload: &T,
        ) -> eyre::Result<String> {
            let jwk = Jwk::try_from(key)?;
            let protected = JwsProtectedHeader::new_jwk(jwk, url, nonce);
            jws_with(protected, key, payload)
        }

        self.do_call(url, body, jws_with_jwk).await
    }

    /// Make call using the key ID.
    pub(crate) async fn call_kid<T>(&self, url: &str, body: &T) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        fn jws_with_kid<T: Serialize + ?Sized>(
            url: &str,
            nonce: String,
            key: &AcmeKey,
            payload: &T,
        ) -> eyre::Result<String> {
            let protected = JwsProtectedHeader::new_kid(key.key_id()?, url, nonce);
            jws_with(protected, key, payload)
        }

        self.do_call(url, body, jws_with_kid).await
    }

    async fn do_call<T, F>(
        &self,
        url: &str,
        body: &T,
        make_body: F,
    ) -> eyre::Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
        F: Fn(&str, String, &AcmeKey, &T) -> eyre::Result<String>,
    {
        let retry = self.nonce_pool.retry;
        let mut attempt = 1;
        let mut bad_nonce_seen = false;

        loop {
            // After a badNonce the pooled nonces are suspect, so go to the server for a new one.
            let nonce = if bad_nonce_seen && attempt == 1 {
                self.nonce_pool.fresh_nonce().await?
            } else {
                self.nonce_pool.get_nonce().await?
            };

            let signed = make_body(url, nonce, &self.acme_key, body)?;

            log::debug!("Call endpoint: {url}");

            let response = match req_post(&self.nonce_pool.client, url, signed).await {
                Ok(response) => response,
                Err(err) if is_transient(&err) && attempt < retry.max_attempts => {
                    log::warn!("request to {url} failed, retrying: {err}");
                    attempt += 1;
                    tokio::time::sleep(retry.delay(attempt)).await;
                    continue;
                }
                Err(err) => {
                    return Err(eyre::Report::new(err).wrap_err(format!("request to {url}")))
                }
            };

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.extract_nonce(&response);

            if is_transient_status(response.status()) && attempt < retry.max_attempts {
                log::warn!("{url} answered {}, retrying", response.status());
                attempt += 1;
                tokio::time::sleep(retry.delay(attempt)).await;
                continue;
            }

            match req_handle_error(response).await {
                Ok(response) => return Ok(response),

                // One silent retry; a second badNonce for the same request is surfaced.
                Err(problem) if problem.is_bad_nonce() && !bad_nonce_seen => {
                    log::debug!("Retrying on bad nonce");
                    bad_nonce_seen = true;
                    attempt = 1;
                }

                Err(problem) => return Err(problem.into()),
            }
        }
    }
}

/// Shared pool of nonces, along with the HTTP client used for all CA requests.
#[derive(Debug)]
pub(crate) struct NoncePool {
    client: reqwest::Client,
    retry: RetryPolicy,
    nonce_url: String,
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    pub(crate) fn new(client: reqwest::Client, retry: RetryPolicy, nonce_url: &str) -> Self {
        NoncePool {
            client,
            retry,
            nonce_url: nonce_url.to_owned(),
            pool: Mutex::default(),
        }
    }

    fn extract_nonce(&self, res: &reqwest::Response) {
        let Some(nonce) = res.headers().get("replay-nonce") else {
            return;
        };

        // see https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
        let Some(nonce) = nonce.to_str().ok().filter(|n| is_valid_nonce(n)) else {
            log::debug!("Ignoring malformed replay-nonce {nonce:?}");
            return;
        };

        log::trace!("Extracting new nonce");

        let mut pool = self.pool.lock();
        pool.push_back(nonce.to_owned());

        if pool.len() > NONCE_POOL_SIZE {
            pool.pop_front();
        }
    }

    async fn get_nonce(&self) -> eyre::Result<String> {
        if let Some(nonce) = self.pool.lock().pop_front() {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        self.fresh_nonce().await
    }

    /// Requests a new nonce from the server, dropping any pooled ones.
    async fn fresh_nonce(&self) -> eyre::Result<String> {
        self.pool.lock().clear();

        log::debug!("Request new nonce");
        let res = req_head(&self.client, &self.retry, &self.nonce_url).await?;

        let nonce = req_expect_header(&res, "replay-nonce")?;
        if !is_valid_nonce(&nonce) {
            return Err(eyre::eyre!("server sent malformed replay-nonce {nonce:?}"));
        }

        Ok(nonce)
    }
}

/// Nonces must be non-empty base64url.
fn is_valid_nonce(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Construct JWS with protected header according to [RFC 7515 §5.1].
///
/// [RFC 7515 §5.1]: https://datatracker.ietf.org/doc/html/rfc7515#section-5.1
fn jws_with<T: Serialize + ?Sized>(
    protected: JwsProtectedHeader,
    key: &AcmeKey,
    payload: &T,
) -> eyre::Result<String> {
    let header = {
        let pro_json = serde_json::to_string(&protected)?;
        BASE64_URL_SAFE_NO_PAD.encode(pro_json)
    };

    let payload = {
        let payload_json = serde_json::to_string(payload)?;

        // POST-as-GET: `EmptyString` must produce an empty payload, not base64 of `""`.
        if payload_json == "\"\"" {
            String::new()
        } else {
            BASE64_URL_SAFE_NO_PAD.encode(payload_json)
        }
    };

    let to_sign = format!("{header}.{payload}");
    let (signature, _rec_id) = key
        .signing_key()
        .sign_recoverable(to_sign.as_bytes())
        .wrap_err("sign JWS")?;

    let signature = BASE64_URL_SAFE_NO_PAD.encode(signature.to_bytes());

    let jws = FlattenedJsonJws::new(header, payload, signature);

    Ok(serde_json::to_string(&jws)?)
}
