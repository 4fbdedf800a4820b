//! Error taxonomy.
//!
//! Protocol calls return [`eyre::Result`]; the types here are the ones callers are expected to
//! match on, either directly or through `report.downcast_ref::<T>()`. CA problem documents are
//! carried as [`api::Problem`](crate::api::Problem).

use std::{fmt, time::Duration};

use thiserror::Error;

/// The top-level cancellation token fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// A DNS query could not be answered.
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DNS lookup of {record_type} {name} failed: {message}")]
    Lookup {
        name: String,
        record_type: &'static str,
        message: String,
    },

    #[error("could not resolve address of name server {0}")]
    NameServer(String),

    #[error("DNS resolver configuration: {0}")]
    Config(String),
}

/// The zone apex of a name could not be determined.
#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("could not find the zone for {fqdn}")]
    NotFound { fqdn: String },

    #[error("{fqdn} has more than {max} labels")]
    TooManyLabels { fqdn: String, max: usize },

    #[error("invalid domain name {0:?}")]
    InvalidName(String),

    #[error("zone {zone} lists no usable name servers")]
    NoNameServers { zone: String },

    #[error(transparent)]
    Lookup(#[from] DnsError),
}

/// A TXT record did not become visible.
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error(
        "TXT record {fqdn} did not propagate within {timeout:?}{}",
        .last_error.as_deref().map(|err| format!(" (last error: {err})")).unwrap_or_default()
    )]
    Timeout {
        fqdn: String,
        timeout: Duration,
        last_error: Option<String>,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error(transparent)]
    Zone(#[from] ZoneError),
}

/// Stage of issuance a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Creating the order or fetching its authorizations.
    Ordering,

    /// Selecting a challenge and asking the solver to put the proof in place.
    Presenting,

    /// Waiting for the proof to become visible (DNS propagation).
    Propagating,

    /// Waiting for the CA to validate the challenge.
    Validating,

    /// Submitting the CSR and waiting for the order to become valid.
    Finalizing,

    /// Downloading the issued certificate chain.
    Downloading,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Ordering => "ordering",
            Stage::Presenting => "presenting",
            Stage::Propagating => "propagating",
            Stage::Validating => "cs-validating",
            Stage::Finalizing => "finalizing",
            Stage::Downloading => "downloading",
        })
    }
}

/// One domain that could not be authorized.
#[derive(Debug)]
pub struct StageFailure {
    pub domain: String,
    pub stage: Stage,
    pub cause: eyre::Report,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {:#}", self.domain, self.stage, self.cause)
    }
}

/// Issuance failed.
#[derive(Debug, Error)]
pub enum ObtainError {
    /// One or more authorizations did not become valid. Every failed domain is listed.
    #[error("authorization failed for {} domain(s): {}", .0.len(), join_failures(.0))]
    Authorizations(Vec<StageFailure>),

    /// The order itself failed.
    #[error("{stage} failed for [{}]: {cause:#}", .domains.join(", "))]
    Order {
        stage: Stage,
        domains: Vec<String>,
        cause: eyre::Report,
    },

    #[error("issuance cancelled")]
    Cancelled,
}

impl ObtainError {
    /// Returns the per-domain failures; empty for order-level failures.
    pub fn failures(&self) -> &[StageFailure] {
        match self {
            ObtainError::Authorizations(failures) => failures,
            _ => &[],
        }
    }

    /// Returns the stage the issuance stopped in, if it is a single one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ObtainError::Authorizations(failures) => {
                let stage = failures.first()?.stage;
                failures.iter().all(|f| f.stage == stage).then_some(stage)
            }
            ObtainError::Order { stage, .. } => Some(*stage),
            ObtainError::Cancelled => None,
        }
    }
}

/// Finds the CA problem document somewhere in the chain of `err`.
pub fn find_problem(err: &eyre::Report) -> Option<&crate::api::Problem> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<crate::api::Problem>())
}

fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
