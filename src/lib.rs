//! Provisioning certificates from ACME (Automatic Certificate Management Environment) providers
//! such as [Let's Encrypt](https://letsencrypt.org/), proving domain control with `dns-01`.
//!
//! It implements ACME v2 as described in [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555)
//! to issue/renew certificates.
//!
//! # Usage
//!
//! An [`Issuer`] runs a whole order: it creates the order, solves every authorization in
//! parallel, finalizes with a CSR and downloads the certificate.
//!
//! 1. Fetch the [`Directory`] and register (or load) an [`Account`].
//! 2. Build a [`Dns01Solver`] from a DNS [`Provider`] and add it to a [`SolverSet`].
//! 3. Call [`Issuer::obtain`] with a [`CertificateRequest`].
//!
//! A complete example is in `demos/dns-01.rs`.
//!
//! The lower level building blocks ([`Account::new_order`], [`order::Auth`],
//! [`order::Challenge`]) stay available for driving an order by hand.
//!
//! # Domain Ownership
//!
//! For `dns-01`, control is proven by publishing a TXT record at `_acme-challenge.<domain>`.
//! Wildcard names and their base name share that record, each with its own value.
//!
//! Before the CA is asked to validate, the record is looked for at every authoritative name
//! server of its zone (see [`dns::PropagationChecker`]). DNS hosts that replicate slowly can
//! declare a longer timeout, or require challenges to run one at a time (see
//! [`provider::Capabilities`]).
//!
//! ## Multiple Domains
//!
//! When creating a new order, it's possible to provide multiple alt-names that will also be part of
//! the certificate. The ACME API requires you to prove ownership of each such domain. See
//! [`authorizations`].
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused. It
//! might be tempting to put the `delay` really low in some of this library's polling calls, but
//! balance this against the real risk of having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`Dns01Solver`]: crate::solver::Dns01Solver
//! [`SolverSet`]: crate::solver::SolverSet
//! [`Provider`]: crate::provider::Provider
//! [`authorizations`]: crate::order::NewOrder::authorizations()
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cert;
mod dir;
mod jws;
mod req;
mod trans;
mod util;

pub mod api;
pub mod config;
pub mod dns;
pub mod error;
pub mod issuer;
pub mod order;
pub mod poll;
pub mod provider;
pub mod solver;


pub use crate::{
    acc::{Account, RevocationReason},
    cert::{create_p256_key, Certificate},
    config::{ClientConfig, IssuerConfig},
    dir::{Directory, DirectoryUrl},
    issuer::{CertificateRequest, Issuer},
    poll::{PollPolicy, RetryPolicy},
};
