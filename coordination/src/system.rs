//! The asynchronous agent system: one worker pool plus a coordinator.
//!
//! [`AgentSystem::start`] spawns the Analyst, Fixer and Voting Controller as
//! long-lived tasks. Any number of cases may then be run against the same
//! pool; a semaphore bounds how many are in flight at once. Dropping the
//! system cancels the workers; [`AgentSystem::shutdown`] also waits for them.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::{run_worker, Agent, Analyst, Fixer, Role, VotingController};
use crate::case::{Case, CaseOutcome};
use crate::collaborators::Toolkit;
use crate::config::{ConfigError, RunConfig};
use crate::coordinator::{Coordinator, Workers};
use crate::mailbox::Mailbox;
use crate::voting::ReviewPanel;

struct Worker {
    role: Role,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct AgentSystem {
    coordinator: Coordinator,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    workers: Vec<Worker>,
}

fn spawn_worker<A: Agent>(agent: A, parent: &CancellationToken) -> (Worker, Arc<Mailbox>) {
    let role = agent.role();
    let mailbox = Mailbox::new(role.as_str());
    let cancel = parent.child_token();
    let handle = tokio::spawn(run_worker(agent, Arc::clone(&mailbox), cancel.clone()));
    (
        Worker {
            role,
            cancel,
            handle,
        },
        mailbox,
    )
}

impl AgentSystem {
    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start(toolkit: Toolkit, config: &RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let step_timeout = config.step_timeout()?;
        let cancel = CancellationToken::new();

        let (analyst, analyst_box) = spawn_worker(Analyst::new(toolkit.analyzer.clone()), &cancel);
        let (fixer, fixer_box) = spawn_worker(
            Fixer::new(toolkit.suggester.clone(), config.max_candidates),
            &cancel,
        );
        let panel = ReviewPanel::new(toolkit.reviewer.clone(), config.n_reviewers, config.seed);
        let (controller, controller_box) = spawn_worker(VotingController::new(panel), &cancel);

        let coordinator = Coordinator::new(
            Workers {
                analyst: analyst_box.address(),
                fixer: fixer_box.address(),
                controller: controller_box.address(),
            },
            toolkit.patcher.clone(),
            toolkit.oracle.clone(),
            step_timeout,
            config.max_retries,
        );

        info!(
            n_reviewers = config.n_reviewers,
            max_retries = config.max_retries,
            step_timeout_ms = step_timeout.as_millis() as u64,
            seed = config.seed,
            max_concurrent_cases = config.max_concurrent_cases,
            "Agent system started"
        );

        Ok(Self {
            coordinator,
            permits: Arc::new(Semaphore::new(config.max_concurrent_cases)),
            cancel,
            workers: vec![analyst, fixer, controller],
        })
    }

    /// Stop one worker, leaving its mailbox in place. Requests sent to it
    /// afterwards are queued and never answered.
    pub fn disconnect(&self, role: Role) {
        for worker in self.workers.iter().filter(|w| w.role == role) {
            worker.cancel.cancel();
            debug!(agent = %role, "Worker disconnected");
        }
    }

    /// Run one case, waiting for a concurrency slot first.
    pub async fn run_case(&self, case: &Case) -> CaseOutcome {
        let _permit = self.permits.acquire().await.ok();
        self.coordinator.run_case(case).await
    }

    /// Run cases concurrently, bounded by `max_concurrent_cases`.
    /// Outcomes are returned in input order.
    pub async fn run_cases(&self, cases: &[Case]) -> Vec<CaseOutcome> {
        join_all(cases.iter().map(|case| self.run_case(case))).await
    }

    /// Run cases one after another on the same worker pool.
    pub async fn run_sequential(&self, cases: &[Case]) -> Vec<CaseOutcome> {
        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            outcomes.push(self.run_case(case).await);
        }
        outcomes
    }

    /// Cancel every worker and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.handle.await {
                warn!(agent = %worker.role, error = %e, "Worker task ended abnormally");
            }
        }
        info!("Agent system stopped");
    }
}

impl Drop for AgentSystem {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a fresh system, run one case and shut the system down.
pub async fn run_case(toolkit: Toolkit, case: &Case, config: &RunConfig) -> Result<CaseOutcome, ConfigError> {
    let system = AgentSystem::start(toolkit, config)?;
    let outcome = system.run_case(case).await;
    system.shutdown().await;
    Ok(outcome)
}
