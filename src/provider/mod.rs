//! DNS provider capability.
//!
//! A [`Provider`] knows how to create and delete the `_acme-challenge` TXT record at one
//! particular DNS host. It holds no protocol logic: the [`Dns01Solver`] decides when to call it
//! and checks propagation afterwards.
//!
//! Providers are built by name through a [`ProviderRegistry`] from a [`ProviderConfig`].
//!
//! [`Dns01Solver`]: crate::solver::Dns01Solver

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::solver::{ChallengeInfo, ChallengeParams};

mod registry;
mod webhook;

pub use self::{
    registry::{ProviderConfig, ProviderFactory, ProviderRegistry},
    webhook::WebhookProvider,
};

/// TTL for challenge records, in seconds.
pub const CHALLENGE_TTL: u32 = 60;

/// Creates and deletes challenge TXT records at a DNS host.
///
/// `present` and `clean_up` may be called concurrently for different tokens, also for the same
/// domain (a wildcard and its base name). Both must tolerate being called twice for the same
/// token. A provider that cannot tell records apart must add values to the record set instead
/// of replacing it.
#[async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Creates the TXT record `record.value` at `record.fqdn`.
    async fn present(&self, record: &ChallengeRecord) -> eyre::Result<()>;

    /// Deletes the record created by [`present`](Self::present) for `record.token`.
    async fn clean_up(&self, record: &ChallengeRecord) -> eyre::Result<()>;

    /// Optional behaviour of this provider.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
}

/// A challenge TXT record, named after any CNAMEs on `_acme-challenge.<domain>` are followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    /// Domain of the authorization, with `*.` for wildcards.
    pub domain: String,
    pub token: String,
    pub key_authorization: String,

    /// Name the record is written at.
    pub fqdn: String,

    /// Zone holding `fqdn`.
    pub zone: String,

    pub value: String,
}

impl ChallengeRecord {
    /// The record for `params`, written at `info.effective_fqdn` in `zone`.
    pub fn new(params: &ChallengeParams, info: ChallengeInfo, zone: impl Into<String>) -> Self {
        Self {
            domain: params.domain.clone(),
            token: params.token.clone(),
            key_authorization: params.key_authorization.clone(),
            fqdn: info.effective_fqdn,
            zone: zone.into(),
            value: info.value,
        }
    }

    /// `fqdn` relative to `zone`, `@` at the apex.
    pub fn name(&self) -> &str {
        if self.fqdn == self.zone {
            return "@";
        }

        self.fqdn
            .strip_suffix(self.zone.as_str())
            .and_then(|name| name.strip_suffix('.'))
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.fqdn)
    }
}

/// Optional provider behaviour, absent unless set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Overrides the propagation timeout and check interval.
    pub timeout: Option<TimeoutPolicy>,

    /// Domains using this provider are solved one at a time.
    pub sequential: Option<SequentialPolicy>,

    /// `present` only returns once the record is served, so DNS is not checked afterwards.
    pub confirms_propagation: bool,
}

impl Capabilities {
    pub fn with_timeout(mut self, timeout: Duration, interval: Duration) -> Self {
        self.timeout = Some(TimeoutPolicy { timeout, interval });
        self
    }

    pub fn with_sequential(mut self, interval: Duration) -> Self {
        self.sequential = Some(SequentialPolicy { interval });
        self
    }

    pub fn with_confirmed_propagation(mut self) -> Self {
        self.confirms_propagation = true;
        self
    }
}

/// How long to wait for propagation, and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Minimum time between the starts of two challenges on the same provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequentialPolicy {
    pub interval: Duration,
}

/// Provider-side record identifiers, keyed by ACME challenge token.
///
/// Keyed by token rather than domain: the challenges for `*.example.com` and `example.com`
/// share a record name but carry different values.
#[derive(Debug)]
pub struct RecordHandles<H> {
    handles: Mutex<HashMap<String, H>>,
}

impl<H> RecordHandles<H> {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Remembers `handle` for `token`, returning the one it replaces.
    pub fn insert(&self, token: &str, handle: H) -> Option<H> {
        self.handles.lock().insert(token.to_owned(), handle)
    }

    /// Returns a copy of the handle for `token`.
    pub fn get(&self, token: &str) -> Option<H>
    where
        H: Clone,
    {
        self.handles.lock().get(token).cloned()
    }

    /// Removes and returns the handle for `token`.
    pub fn take(&self, token: &str) -> Option<H> {
        self.handles.lock().remove(token)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

impl<H> Default for RecordHandles<H> {
    fn default() -> Self {
        Self::new()
    }
}
