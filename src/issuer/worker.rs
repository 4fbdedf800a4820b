use std::{fmt, sync::Arc};

use eyre::eyre;
use tokio_util::sync::CancellationToken;

use crate::{
    api,
    config::IssuerConfig,
    error::{Stage, StageFailure},
    order::{authorization_error, Auth, Challenge},
    solver::{ChallengeKind, ChallengeParams, SelectedSolver, Solver, SolverSet},
    util::cancellable,
};

/// States an authorization goes through while it is being solved.
///
/// ```text
/// start -> presenting -> propagating -> cs-validating -> {valid | invalid} -> cleaned-up
/// ```
///
/// A failed `presenting` goes straight to `invalid` and never reaches `cleaned-up`, since
/// nothing was created that needs removing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Start,
    Presenting,
    Propagating,
    Validating,
    Valid,
    Invalid,
    CleanedUp,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerState::Start => "start",
            WorkerState::Presenting => "presenting",
            WorkerState::Propagating => "propagating",
            WorkerState::Validating => "cs-validating",
            WorkerState::Valid => "valid",
            WorkerState::Invalid => "invalid",
            WorkerState::CleanedUp => "cleaned-up",
        })
    }
}

/// Drives one authorization to a terminal state.
pub(crate) struct AuthorizationWorker {
    auth: Auth,
    domain: String,
    solvers: Arc<SolverSet>,
    config: IssuerConfig,
    cancel: CancellationToken,
    state: WorkerState,
}

impl AuthorizationWorker {
    pub(crate) fn new(
        auth: Auth,
        solvers: Arc<SolverSet>,
        config: IssuerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            domain: auth.domain_name(),
            auth,
            solvers,
            config,
            cancel,
            state: WorkerState::Start,
        }
    }

    fn transition(&mut self, to: WorkerState) {
        log::debug!("[{}] {} -> {to}", self.domain, self.state);
        self.state = to;
    }

    fn failure(&self, stage: Stage, cause: eyre::Report) -> StageFailure {
        StageFailure {
            domain: self.domain.clone(),
            stage,
            cause,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), StageFailure> {
        if !self.auth.need_challenge() {
            log::debug!("[{}] already authorized", self.domain);
            self.transition(WorkerState::Valid);
            return Ok(());
        }

        let (selected, challenge, params) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(cause) => {
                self.transition(WorkerState::Invalid);
                return Err(self.failure(Stage::Presenting, cause));
            }
        };

        let solver = Arc::clone(selected.solver());

        // held until clean-up is done, so sequential solvers run one full cycle at a time
        let _turn = match &selected.gate {
            Some(gate) => match gate.acquire(&self.cancel).await {
                Ok(turn) => Some(turn),
                Err(cancelled) => return Err(self.failure(Stage::Presenting, cancelled.into())),
            },
            None => None,
        };

        self.transition(WorkerState::Presenting);
        log::debug!(
            "[{}] solving {} challenge with {}",
            self.domain,
            solver.kind(),
            solver.name()
        );

        if let Err(cause) = cancellable(&self.cancel, solver.present(&params)).await {
            self.transition(WorkerState::Invalid);
            return Err(self.failure(Stage::Presenting, cause));
        }

        let outcome = self.validate(solver.as_ref(), &challenge, &params).await;

        match &outcome {
            Ok(()) => {
                log::info!("[{}] authorization valid", self.domain);
                self.transition(WorkerState::Valid);
            }
            Err((stage, cause)) => {
                log::debug!("[{}] failed while {stage}: {cause:#}", self.domain);
                self.transition(WorkerState::Invalid);
            }
        }

        self.clean_up(solver.as_ref(), &params).await;
        self.transition(WorkerState::CleanedUp);

        outcome.map_err(|(stage, cause)| self.failure(stage, cause))
    }

    /// Picks the solver and the matching challenge.
    fn prepare(&self) -> eyre::Result<(SelectedSolver, Challenge, ChallengeParams)> {
        let offered = self
            .auth
            .api_auth()
            .challenges
            .iter()
            .filter_map(|challenge| ChallengeKind::from_type(&challenge._type))
            .collect::<Vec<_>>();

        let selected = self.solvers.select(&self.domain, &offered).ok_or_else(|| {
            eyre!(
                "no solver for {} among offered challenges {:?}",
                self.domain,
                offered.iter().map(ChallengeKind::as_str).collect::<Vec<_>>()
            )
        })?;

        let kind = selected.solver().kind();
        let challenge = self
            .auth
            .challenge(kind)
            .ok_or_else(|| eyre!("{} offers no {kind} challenge", self.domain))?;

        let params = ChallengeParams {
            domain: self.domain.clone(),
            token: challenge.token().to_owned(),
            key_authorization: challenge.key_authorization()?,
        };

        Ok((selected, challenge, params))
    }

    /// Everything between a successful `present` and clean-up.
    async fn validate(
        &mut self,
        solver: &dyn Solver,
        challenge: &Challenge,
        params: &ChallengeParams,
    ) -> Result<(), (Stage, eyre::Report)> {
        self.transition(WorkerState::Propagating);
        solver
            .wait_ready(params, &self.cancel)
            .await
            .map_err(|err| (Stage::Propagating, err))?;

        self.transition(WorkerState::Validating);
        cancellable(&self.cancel, challenge.notify())
            .await
            .map_err(|err| (Stage::Validating, err))?;

        let auth = challenge
            .poll_authorization(&self.config.authorization_poll, &self.cancel)
            .await
            .map_err(|err| (Stage::Validating, err))?;

        match auth.status {
            api::AuthorizationStatus::Valid => Ok(()),
            _ => Err((Stage::Validating, authorization_error(&auth))),
        }
    }

    /// Removes the proof; failures are only logged.
    async fn clean_up(&self, solver: &dyn Solver, params: &ChallengeParams) {
        let res = if self.cancel.is_cancelled() {
            let grace = self.config.cleanup_grace;
            tokio::time::timeout(grace, solver.clean_up(params))
                .await
                .unwrap_or_else(|_| Err(eyre!("clean-up did not finish within {grace:?}")))
        } else {
            solver.clean_up(params).await
        };

        if let Err(err) = res {
            log::warn!("[{}] clean-up with {} failed: {err:#}", self.domain, solver.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_use_wire_names() {
        let names = [
            WorkerState::Start,
            WorkerState::Presenting,
            WorkerState::Propagating,
            WorkerState::Validating,
            WorkerState::Valid,
            WorkerState::Invalid,
            WorkerState::CleanedUp,
        ]
        .map(|state| state.to_string());

        assert_eq!(
            names,
            [
                "start",
                "presenting",
                "propagating",
                "cs-validating",
                "valid",
                "invalid",
                "cleaned-up",
            ]
        );
    }
}
