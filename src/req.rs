use std::future::Future;

use reqwest::{header::CONTENT_TYPE, StatusCode};

use crate::{api::Problem, poll::RetryPolicy, util::retry_after};

pub(crate) type ReqResult<T> = std::result::Result<T, Problem>;

pub(crate) async fn req_get(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    url: &str,
) -> eyre::Result<reqwest::Response> {
    log::trace!("GET {url}");
    send_with_retry(retry, url, || client.get(url).send()).await
}

pub(crate) async fn req_head(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    url: &str,
) -> eyre::Result<reqwest::Response> {
    log::trace!("HEAD {url}");
    send_with_retry(retry, url, || client.head(url).send()).await
}

/// Sends a single signed request. Retrying is up to the caller, since a retry needs a fresh nonce.
pub(crate) async fn req_post(
    client: &reqwest::Client,
    url: &str,
    body: String,
) -> reqwest::Result<reqwest::Response> {
    log::trace!("POST {url} {body}");
    client
        .post(url)
        .header(CONTENT_TYPE, "application/jose+json")
        .body(body)
        .send()
        .await
}

/// Returns true for errors worth retrying: the request may not have reached the server, or the
/// server did not answer in time.
pub(crate) fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || err.is_request()
}

pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
}

pub(crate) async fn send_with_retry<F, Fut>(
    retry: &RetryPolicy,
    url: &str,
    mut send: F,
) -> eyre::Result<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<reqwest::Response>>,
{
    let mut attempt = 1;

    loop {
        let last_attempt = attempt >= retry.max_attempts;

        match send().await {
            Ok(res) if is_transient_status(res.status()) && !last_attempt => {
                log::warn!("{url} answered {}, retrying", res.status());
            }
            Ok(res) => return Ok(res),
            Err(err) if is_transient(&err) && !last_attempt => {
                log::warn!("request to {url} failed, retrying: {err}");
            }
            Err(err) => return Err(eyre::Report::new(err).wrap_err(format!("request to {url}"))),
        }

        attempt += 1;
        tokio::time::sleep(retry.delay(attempt)).await;
    }
}

/// Passes successful responses through and turns anything else into a [`Problem`].
pub(crate) async fn req_handle_error(res: reqwest::Response) -> ReqResult<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }

    let status = res.status();
    let retry_after = retry_after(res.headers());
    let is_problem_json = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/problem+json"));

    let body = req_safe_read_body(res).await;

    let mut problem = if is_problem_json {
        serde_json::from_str(&body).unwrap_or_else(|err| {
            Problem::local(
                "problemJsonFail",
                format!("Failed to deserialize application/problem+json ({err}) body: {body}"),
            )
        })
    } else {
        Problem::local("httpReqError", format!("{status} body: {body}"))
    };

    problem.status.get_or_insert(status.as_u16());
    problem.retry_after = retry_after;

    Err(problem)
}

pub(crate) fn req_expect_header(res: &reqwest::Response, name: &str) -> ReqResult<String> {
    res.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
        .ok_or_else(|| Problem::local("missingHeader", format!("Missing header: {name}")))
}

pub(crate) async fn req_safe_read_body(res: reqwest::Response) -> String {
    // letsencrypt sometimes closes the TLS abruptly causing io error
    // even though we did capture the body.
    res.text().await.unwrap_or_default()
}
