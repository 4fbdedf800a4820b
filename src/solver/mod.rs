//! Challenge solvers.
//!
//! A [`Solver`] puts the proof for one challenge in place, waits until the CA can see it, and
//! removes it afterwards. [`Dns01Solver`] does this through a DNS [`Provider`]; solvers for
//! `http-01` and `tls-alpn-01` are left to the caller.
//!
//! [`Provider`]: crate::provider::Provider

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::MutexGuard, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{dns::normalize_domain, error::Cancelled, util::sleep_cancellable};

mod dns01;

pub use self::dns01::{ChallengeInfo, Dns01Solver};

/// Challenge types, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeKind {
    Dns01,
    Http01,
    TlsAlpn01,
}

impl ChallengeKind {
    /// Every kind, most preferred first.
    pub const PREFERENCE: [ChallengeKind; 3] = [Self::Dns01, Self::Http01, Self::TlsAlpn01];

    /// The `type` of the challenge object.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns01 => "dns-01",
            Self::Http01 => "http-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }

    pub fn from_type(challenge_type: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|kind| kind.as_str() == challenge_type)
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a solver gets to work with for one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeParams {
    /// Domain of the authorization, with `*.` for wildcards.
    pub domain: String,
    pub token: String,
    pub key_authorization: String,
}

/// Answers one kind of challenge.
///
/// For a given challenge the calls are `present`, then `wait_ready`, then (once the CA has
/// decided) `clean_up`. `clean_up` is called whenever `present` succeeded, whatever happens
/// afterwards.
#[async_trait]
pub trait Solver: Send + Sync + fmt::Debug {
    fn kind(&self) -> ChallengeKind;

    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Puts the proof in place.
    async fn present(&self, params: &ChallengeParams) -> eyre::Result<()>;

    /// Returns once the proof can be seen by the CA.
    async fn wait_ready(
        &self,
        params: &ChallengeParams,
        cancel: &CancellationToken,
    ) -> eyre::Result<()> {
        let _ = (params, cancel);
        Ok(())
    }

    /// Removes the proof.
    async fn clean_up(&self, params: &ChallengeParams) -> eyre::Result<()>;

    /// When set, challenges on this solver run one at a time, starting at least this far apart.
    fn sequential(&self) -> Option<Duration> {
        None
    }
}

/// The solvers available to an [`Issuer`](crate::Issuer).
///
/// Solvers registered for a domain suffix take precedence over the defaults for names under that
/// suffix (the longest matching suffix wins). Among the candidates, the challenge kind preferred
/// by [`ChallengeKind::PREFERENCE`] that the CA offers is used.
#[derive(Debug, Default)]
pub struct SolverSet {
    defaults: Vec<SolverEntry>,
    by_suffix: Vec<(String, Vec<SolverEntry>)>,
}

impl SolverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a solver used for every domain without a more specific one.
    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        let entry = self.entry_for(solver);
        self.defaults.push(entry);
        self
    }

    /// Adds a solver for `suffix` and every name below it.
    pub fn with_domain_solver(mut self, suffix: &str, solver: Arc<dyn Solver>) -> Self {
        let suffix = normalize_suffix(suffix);
        let entry = self.entry_for(solver);

        match self.by_suffix.iter_mut().find(|(s, _)| *s == suffix) {
            Some((_, entries)) => entries.push(entry),
            None => self.by_suffix.push((suffix, vec![entry])),
        }

        self
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty() && self.by_suffix.is_empty()
    }

    /// Picks the solver for `domain` among the challenge kinds the CA `offered`.
    pub fn select(&self, domain: &str, offered: &[ChallengeKind]) -> Option<SelectedSolver> {
        let domain = normalize_suffix(domain);

        let candidates = self
            .by_suffix
            .iter()
            .filter(|(suffix, _)| {
                domain == *suffix
                    || domain
                        .strip_suffix(suffix.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            })
            .max_by_key(|(suffix, _)| suffix.len())
            .map_or(&self.defaults, |(_, entries)| entries);

        ChallengeKind::PREFERENCE
            .into_iter()
            .filter(|kind| offered.contains(kind))
            .find_map(|kind| candidates.iter().find(|entry| entry.solver.kind() == kind))
            .map(|entry| SelectedSolver {
                solver: Arc::clone(&entry.solver),
                gate: entry.gate.clone(),
            })
    }

    /// Solvers added more than once share one sequential gate.
    fn entry_for(&self, solver: Arc<dyn Solver>) -> SolverEntry {
        let existing = self
            .defaults
            .iter()
            .chain(self.by_suffix.iter().flat_map(|(_, entries)| entries))
            .find(|entry| Arc::ptr_eq(&entry.solver, &solver));

        if let Some(entry) = existing {
            return entry.clone();
        }

        let gate = solver
            .sequential()
            .map(|interval| Arc::new(SequentialGate::new(interval)));

        SolverEntry { solver, gate }
    }
}

fn normalize_suffix(name: &str) -> String {
    normalize_domain(name.trim())
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

#[derive(Debug, Clone)]
struct SolverEntry {
    solver: Arc<dyn Solver>,
    gate: Option<Arc<SequentialGate>>,
}

/// Result of [`SolverSet::select`].
#[derive(Debug, Clone)]
pub struct SelectedSolver {
    pub(crate) solver: Arc<dyn Solver>,
    pub(crate) gate: Option<Arc<SequentialGate>>,
}

impl SelectedSolver {
    pub fn solver(&self) -> &Arc<dyn Solver> {
        &self.solver
    }

    pub fn is_sequential(&self) -> bool {
        self.gate.is_some()
    }
}

/// Serializes the challenges of one sequential solver.
///
/// The guard is held for a whole challenge cycle; starts are at least `interval` apart.
#[derive(Debug)]
pub(crate) struct SequentialGate {
    interval: Duration,
    last_start: tokio::sync::Mutex<Option<Instant>>,
}

impl SequentialGate {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) async fn acquire(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, Option<Instant>>, Cancelled> {
        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            guard = self.last_start.lock() => guard,
        };

        if let Some(last) = *guard {
            let next = last + self.interval;
            let now = Instant::now();
            if next > now {
                log::debug!("Sequential solver: waiting {:?} before next challenge", next - now);
                sleep_cancellable(cancel, next - now).await?;
            }
        }

        *guard = Some(Instant::now());
        Ok(guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NamedSolver {
        kind: ChallengeKind,
        name: &'static str,
        sequential: Option<Duration>,
    }

    #[async_trait]
    impl Solver for NamedSolver {
        fn kind(&self) -> ChallengeKind {
            self.kind
        }

        fn name(&self) -> &str {
            self.name
        }

        async fn present(&self, _params: &ChallengeParams) -> eyre::Result<()> {
            Ok(())
        }

        async fn clean_up(&self, _params: &ChallengeParams) -> eyre::Result<()> {
            Ok(())
        }

        fn sequential(&self) -> Option<Duration> {
            self.sequential
        }
    }

    fn solver(kind: ChallengeKind, name: &'static str) -> Arc<dyn Solver> {
        Arc::new(NamedSolver {
            kind,
            name,
            sequential: None,
        })
    }

    const ALL: &[ChallengeKind] = &ChallengeKind::PREFERENCE;

    #[test]
    fn kinds_round_trip_through_wire_names() {
        for kind in ChallengeKind::PREFERENCE {
            assert_eq!(ChallengeKind::from_type(kind.as_str()), Some(kind));
        }
        assert_eq!(ChallengeKind::from_type("dns-account-01"), None);
    }

    #[test]
    fn dns01_is_preferred_when_offered() {
        let set = SolverSet::new()
            .with_solver(solver(ChallengeKind::Http01, "http"))
            .with_solver(solver(ChallengeKind::Dns01, "dns"));

        let picked = set.select("example.com", ALL).unwrap();
        assert_eq!(picked.solver().name(), "dns");

        let picked = set
            .select("example.com", &[ChallengeKind::Http01, ChallengeKind::TlsAlpn01])
            .unwrap();
        assert_eq!(picked.solver().name(), "http");

        assert!(set.select("example.com", &[ChallengeKind::TlsAlpn01]).is_none());
    }

    #[test]
    fn longest_domain_suffix_wins() {
        let set = SolverSet::new()
            .with_solver(solver(ChallengeKind::Dns01, "default"))
            .with_domain_solver("example.com", solver(ChallengeKind::Dns01, "corp"))
            .with_domain_solver("dev.example.com", solver(ChallengeKind::Dns01, "dev"));

        let name = |domain| set.select(domain, ALL).unwrap().solver().name().to_owned();

        assert_eq!(name("example.com"), "corp");
        assert_eq!(name("*.example.com"), "corp");
        assert_eq!(name("api.dev.example.com"), "dev");
        assert_eq!(name("notexample.com"), "default");
        assert_eq!(name("example.org"), "default");
    }

    #[test]
    fn reused_solver_shares_its_gate() {
        let shared: Arc<dyn Solver> = Arc::new(NamedSolver {
            kind: ChallengeKind::Dns01,
            name: "slow",
            sequential: Some(Duration::from_secs(1)),
        });

        let set = SolverSet::new()
            .with_domain_solver("a.example", Arc::clone(&shared))
            .with_domain_solver("b.example", shared);

        let a = set.select("a.example", ALL).unwrap();
        let b = set.select("b.example", ALL).unwrap();
        assert!(a.is_sequential());
        assert!(Arc::ptr_eq(a.gate.as_ref().unwrap(), b.gate.as_ref().unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_spaces_out_starts() {
        let gate = SequentialGate::new(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let started = Instant::now();

        drop(gate.acquire(&cancel).await.unwrap());
        assert_eq!(started.elapsed(), Duration::ZERO);

        drop(gate.acquire(&cancel).await.unwrap());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_wait_is_cancellable() {
        let gate = SequentialGate::new(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        drop(gate.acquire(&cancel).await.unwrap());
        cancel.cancel();
        assert_eq!(gate.acquire(&cancel).await.unwrap_err(), Cancelled);
    }
}
