use std::{
    future::Future,
    time::{Duration, SystemTime},
};

use base64::prelude::*;
use eyre::WrapErr as _;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

pub(crate) fn base64url<T: ?Sized + AsRef<[u8]>>(input: &T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// Reads the response body as JSON, logging the raw body.
pub(crate) async fn read_json<T: de::DeserializeOwned>(res: reqwest::Response) -> eyre::Result<T> {
    let url = res.url().to_string();
    let body = res.text().await.wrap_err_with(|| format!("read body of {url}"))?;
    log::trace!("{url}: {body}");
    serde_json::from_str(&body).wrap_err_with(|| format!("decode JSON from {url}"))
}

/// Parses a `Retry-After` header, either delay-seconds or an HTTP-date.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or_default())
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> eyre::Result<T>
where
    F: Future<Output = eyre::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled.into()),
        res = fut => res,
    }
}

/// Sleeps for `delay` unless `cancel` fires first.
pub(crate) async fn sleep_cancellable(
    cancel: &CancellationToken,
    delay: Duration,
) -> Result<(), Cancelled> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_http_date_in_the_past_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn cancellable_aborts_pending_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let res = cancellable(&cancel, std::future::pending::<eyre::Result<()>>()).await;
        assert!(res.unwrap_err().downcast_ref::<Cancelled>().is_some());
    }
}
