//! Provider lifecycle management.
//!
//! Providers start in waves derived from the dependency graph. A provider is
//! running once `start()` returned and `health_check()` reported ready within
//! the health deadline. The next wave starts only when the whole current wave
//! is running. Any failure stops every launched provider in reverse start
//! order. A provider that launched but never became healthy is stopped on
//! the spot.

pub mod provider;
pub mod registry;
pub mod waves;

pub use provider::{ManagedProvider, Provider, ProviderStatus};
pub use registry::ProviderRegistry;
pub use waves::plan_waves;

use crate::core::config::OrchestratorConfig;
use crate::core::error::OrchestratorError;
use crate::core::graph::AppGraph;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Starts and stops managed providers.
#[derive(Debug)]
pub struct Orchestrator {
    settings: OrchestratorConfig,
    running: bool,
    /// Providers that reached `Running`, in start order
    started: Vec<ManagedProvider>,
    statuses: HashMap<String, ProviderStatus>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(settings: OrchestratorConfig) -> Self {
        Self {
            settings,
            running: false,
            started: Vec::new(),
            statuses: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels an in-progress `start`, including a wave whose
    /// providers are still starting. A cancelled startup replaces the token,
    /// so fetch it again before the next `start`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn status(&self, provider: &str) -> Option<ProviderStatus> {
        self.statuses.get(provider).copied()
    }

    /// Names of running providers in start order.
    pub fn started(&self) -> Vec<&str> {
        self.started.iter().map(ManagedProvider::name).collect()
    }

    /// Start `providers` following `order` (graph node ids, dependencies
    /// first).
    pub async fn start(
        &mut self,
        graph: &AppGraph,
        providers: Vec<ManagedProvider>,
        order: &[String],
    ) -> Result<(), OrchestratorError> {
        if self.running {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let cycles = graph.detect_cycles();
        if !cycles.is_empty() {
            return Err(OrchestratorError::Cycle { cycles });
        }

        let mut names = HashSet::new();
        for p in &providers {
            if !names.insert(p.name().to_string()) {
                return Err(OrchestratorError::DuplicateProvider {
                    name: p.name().to_string(),
                });
            }
        }

        let waves = plan_waves(order, |id| graph.dependencies_of(id), self.settings.startup)?;

        let mut by_node: BTreeMap<String, Vec<ManagedProvider>> = BTreeMap::new();
        for p in providers {
            by_node.entry(p.node_id.clone()).or_default().push(p);
        }
        for (node, unscheduled) in by_node.iter().filter(|(n, _)| !order.contains(*n)) {
            warn!(
                "{} provider(s) for {} are not in the startup order; skipping",
                unscheduled.len(),
                node
            );
        }

        self.statuses = names
            .into_iter()
            .map(|n| (n, ProviderStatus::Stopped))
            .collect();
        self.started.clear();

        info!(
            "starting {} node(s) in {} wave(s) ({} mode)",
            order.len(),
            waves.len(),
            self.settings.startup
        );

        for (number, wave) in waves.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("startup cancelled before wave {}", number + 1);
                return self.abandon().await;
            }

            let members: Vec<ManagedProvider> = wave
                .iter()
                .flat_map(|id| by_node.remove(id).unwrap_or_default())
                .collect();
            if members.is_empty() {
                continue;
            }
            debug!("wave {}: {:?}", number + 1, wave);

            match self.start_wave(members).await {
                Ok(()) => {}
                Err(OrchestratorError::Cancelled) => {
                    info!("startup cancelled during wave {}", number + 1);
                    return self.abandon().await;
                }
                Err(e) => {
                    warn!("wave {} failed: {}", number + 1, e);
                    self.rollback().await;
                    return Err(e);
                }
            }
        }

        self.running = true;
        info!("{} provider(s) running", self.started.len());
        Ok(())
    }

    /// Start every member of a wave concurrently and wait for all of them.
    ///
    /// On cancellation the outstanding tasks are aborted. Members whose
    /// `start()` already returned are still recorded as started so the
    /// rollback stops them.
    async fn start_wave(&mut self, members: Vec<ManagedProvider>) -> Result<(), OrchestratorError> {
        let launched: Vec<Arc<AtomicBool>> = members
            .iter()
            .map(|_| Arc::new(AtomicBool::new(false)))
            .collect();

        let mut tasks = JoinSet::new();
        for (index, member) in members.iter().enumerate() {
            self.statuses
                .insert(member.name().to_string(), ProviderStatus::Starting);
            let provider = Arc::clone(&member.provider);
            let flag = Arc::clone(&launched[index]);
            let settings = self.settings.clone();
            tasks.spawn(async move { (index, start_and_wait(provider, flag, &settings).await) });
        }

        let cancel = self.cancel.clone();
        let mut cancelled = false;
        let mut outcomes: Vec<Option<Result<(), OrchestratorError>>> =
            members.iter().map(|_| None).collect();
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => outcomes[index] = Some(outcome),
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => warn!("provider task aborted: {}", e),
                    None => break,
                },
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    tasks.abort_all();
                }
            }
        }

        let mut first_error = None;
        for ((member, outcome), flag) in members.into_iter().zip(outcomes).zip(launched) {
            let name = member.name().to_string();
            match outcome {
                Some(Ok(())) => {
                    debug!("{} running", name);
                    self.statuses.insert(name, ProviderStatus::Running);
                    self.started.push(member);
                }
                Some(Err(e)) => {
                    self.statuses.insert(name, ProviderStatus::Error);
                    first_error.get_or_insert(e);
                }
                None if cancelled => {
                    if flag.load(Ordering::SeqCst) {
                        debug!("{} launched before cancellation", name);
                        self.started.push(member);
                    } else {
                        self.statuses.insert(name, ProviderStatus::Stopped);
                    }
                }
                None => {
                    self.statuses.insert(name.clone(), ProviderStatus::Error);
                    first_error.get_or_insert(OrchestratorError::TaskFailed {
                        provider: name,
                        reason: "task panicked".to_string(),
                    });
                }
            }
        }

        if cancelled {
            return Err(OrchestratorError::Cancelled);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop every running provider in reverse start order. Errors do not halt
    /// the shutdown; the first one is returned.
    pub async fn stop(&mut self) -> Result<(), OrchestratorError> {
        let timeout = self.settings.stop_timeout();
        let mut first_error = None;

        while let Some(member) = self.started.pop() {
            let name = member.name().to_string();
            let outcome = match tokio::time::timeout(timeout, member.provider.stop()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(source)) => Err(OrchestratorError::StopFailed {
                    provider: name.clone(),
                    source,
                }),
                Err(_) => Err(OrchestratorError::StopTimeout {
                    provider: name.clone(),
                    timeout,
                }),
            };
            match outcome {
                Ok(()) => {
                    debug!("{} stopped", name);
                    self.statuses.insert(name, ProviderStatus::Stopped);
                }
                Err(e) => {
                    warn!("{}", e);
                    self.statuses.insert(name, ProviderStatus::Error);
                    first_error.get_or_insert(e);
                }
            }
        }

        self.running = false;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) {
        if let Err(e) = self.stop().await {
            warn!("rollback incomplete: {}", e);
        }
    }

    /// Roll back a cancelled startup and arm a fresh token.
    async fn abandon(&mut self) -> Result<(), OrchestratorError> {
        self.rollback().await;
        self.cancel = CancellationToken::new();
        Err(OrchestratorError::Cancelled)
    }
}

/// Start `provider` and poll it until healthy. `launched` is set once
/// `start()` has returned. A provider that misses the health deadline is
/// stopped before the timeout is reported.
async fn start_and_wait(
    provider: Arc<dyn Provider>,
    launched: Arc<AtomicBool>,
    settings: &OrchestratorConfig,
) -> Result<(), OrchestratorError> {
    let name = provider.name().to_string();
    provider
        .start()
        .await
        .map_err(|source| OrchestratorError::StartFailed {
            provider: name.clone(),
            source,
        })?;
    launched.store(true, Ordering::SeqCst);

    let interval = settings.health_poll_interval();
    let healthy = async {
        while !provider.health_check().await {
            tokio::time::sleep(interval).await;
        }
    };
    let timeout = settings.health_timeout();
    if tokio::time::timeout(timeout, healthy).await.is_ok() {
        return Ok(());
    }

    warn!("{} not healthy after {}ms; stopping it", name, timeout.as_millis());
    match tokio::time::timeout(settings.stop_timeout(), provider.stop()).await {
        Ok(Ok(())) => launched.store(false, Ordering::SeqCst),
        Ok(Err(e)) => warn!("{}: {}", name, e),
        Err(_) => warn!("{} did not stop within {}ms", name, settings.stop_timeout().as_millis()),
    }
    Err(OrchestratorError::HealthTimeout {
        provider: name,
        timeout,
    })
}
