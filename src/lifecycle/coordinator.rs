//! The lifecycle state machine.
//!
//! One control task drives the phases sequentially:
//!
//! ```text
//! Unstarted -> Constructing -> Starting -> Ready -> ShuttingDown -> Stopped
//!                  |               |
//!                  +---> Failed <--+   (absorbing)
//! ```
//!
//! Hook invocation order is always plan-derived and deterministic: start and
//! ready hooks in plan order, shutdown hooks in strict reverse realized
//! order. Shutdown runs once for every module whose start succeeded, even
//! when a later module failed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use super::error::{LifecycleError, Result};
use crate::config::ConfigService;
use crate::container::ServiceContainer;
use crate::descriptor::{HookContext, ModuleDescriptor, ServiceInstance};
use crate::health::{HealthState, HealthStatus};
use crate::registry::{ActivationPlan, CompositionRegistry};
use crate::scheduler::HostedTaskScheduler;

/// Phases of the composition lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum LifecyclePhase {
    Unstarted,
    Constructing,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
    Failed,
}

/// Drives module construction, hook execution, and ordered shutdown.
pub struct LifecycleCoordinator {
    phase: LifecyclePhase,
    plan: ActivationPlan,
    config: ConfigService,
    scheduler: Arc<HostedTaskScheduler>,
    health: HealthState,
    container: Option<Arc<ServiceContainer>>,
    /// Plan indexes whose start phase completed; drained on rollback or
    /// shutdown so hooks never run twice.
    started: Vec<usize>,
    local_addr: Option<SocketAddr>,
    shutdown_grace: Duration,
}

impl LifecycleCoordinator {
    /// Validate the registry and build the activation plan. No side effects
    /// beyond the plan itself; nothing is constructed yet.
    pub fn new(registry: &CompositionRegistry, config: ConfigService) -> crate::error::Result<Self> {
        let plan = registry.build_plan()?;
        tracing::info!(modules = plan.len(), "activation plan: {:?}", plan.names());
        let grace_ms: u64 = config
            .get_or("lifecycle.shutdown_grace_ms", "5000")
            .parse()
            .unwrap_or(5000);
        Ok(Self {
            phase: LifecyclePhase::Unstarted,
            plan,
            config,
            scheduler: Arc::new(HostedTaskScheduler::new()),
            health: HealthState::new(),
            container: None,
            started: Vec::new(),
            local_addr: None,
            shutdown_grace: Duration::from_millis(grace_ms),
        })
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    pub fn plan(&self) -> &ActivationPlan {
        &self.plan
    }

    pub fn health(&self) -> HealthState {
        self.health.clone()
    }

    pub fn scheduler(&self) -> Arc<HostedTaskScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn container(&self) -> Option<Arc<ServiceContainer>> {
        self.container.clone()
    }

    /// Unstarted -> Constructing: instantiate every module in plan order.
    /// Returns the populated container.
    pub async fn construct(&mut self) -> Result<Arc<ServiceContainer>> {
        self.expect_phase(LifecyclePhase::Unstarted, LifecyclePhase::Constructing)?;
        self.phase = LifecyclePhase::Constructing;
        match ServiceContainer::instantiate(
            &self.plan,
            self.config.clone(),
            Arc::clone(&self.scheduler),
        )
        .await
        {
            Ok(container) => {
                self.container = Some(Arc::clone(&container));
                Ok(container)
            }
            Err(cause) => {
                self.phase = LifecyclePhase::Failed;
                Err(cause.into())
            }
        }
    }

    /// Constructing -> Starting: run start hooks in plan order. A failure
    /// rolls back started modules in reverse and fails the boot.
    pub async fn start(&mut self) -> Result<()> {
        self.expect_phase(LifecyclePhase::Constructing, LifecyclePhase::Starting)?;
        let container = self.require_container(LifecyclePhase::Starting)?;
        self.phase = LifecyclePhase::Starting;

        let plan = self.plan.clone();
        for (index, descriptor) in plan.iter().enumerate() {
            if let Some(hook) = descriptor.hooks.on_start.clone() {
                tracing::debug!("starting module '{}'", descriptor.name());
                let cx = self.hook_context(&container, descriptor);
                if let Err(cause) = hook(cx).await {
                    tracing::error!(
                        "start hook failed for module '{}', rolling back: {cause:#}",
                        descriptor.name()
                    );
                    self.run_shutdown_hooks(&container, &plan).await;
                    self.phase = LifecyclePhase::Failed;
                    return Err(LifecycleError::StartHookFailed {
                        module: descriptor.name().to_string(),
                        cause,
                    });
                }
            }
            self.started.push(index);
        }
        tracing::info!("all modules started ({})", plan.len());
        Ok(())
    }

    /// Starting -> Ready: the listener is bound. Ready hooks run in plan
    /// order with the bound address; failures degrade health but never abort
    /// (external registration is retryable by policy). Hosted tasks begin
    /// here.
    pub async fn ready(&mut self, addr: SocketAddr) -> Result<()> {
        self.expect_phase(LifecyclePhase::Starting, LifecyclePhase::Ready)?;
        let container = self.require_container(LifecyclePhase::Ready)?;
        self.local_addr = Some(addr);

        let plan = self.plan.clone();
        for descriptor in plan.iter() {
            if let Some(hook) = descriptor.hooks.on_ready.clone() {
                let cx = self.hook_context(&container, descriptor);
                if let Err(cause) = hook(cx).await {
                    tracing::error!(
                        "ready hook failed for module '{}', degrading health: {cause:#}",
                        descriptor.name()
                    );
                    self.health
                        .degrade(format!("ready hook failed for module '{}'", descriptor.name()));
                }
            }
        }

        self.phase = LifecyclePhase::Ready;
        if self.health.status() != HealthStatus::Degraded {
            self.health.set(HealthStatus::Ready);
        }
        self.scheduler.start();
        tracing::info!("ready on {addr}");
        Ok(())
    }

    /// Ready -> ShuttingDown -> Stopped. Cancels hosted tasks, then runs
    /// shutdown hooks in strict reverse realized order; each failure is
    /// logged and does not block subsequent hooks. Idempotent.
    pub async fn shutdown(&mut self) {
        if matches!(
            self.phase,
            LifecyclePhase::ShuttingDown | LifecyclePhase::Stopped
        ) {
            return;
        }
        self.phase = LifecyclePhase::ShuttingDown;
        self.health.set(HealthStatus::ShuttingDown);
        tracing::info!("shutting down");

        self.scheduler.shutdown(self.shutdown_grace).await;

        if let Some(container) = self.container.clone() {
            let plan = self.plan.clone();
            self.run_shutdown_hooks(&container, &plan).await;
        }
        self.phase = LifecyclePhase::Stopped;
        tracing::info!("stopped");
    }

    /// Run shutdown hooks for every started module, newest first, draining
    /// the started list so no hook runs twice.
    async fn run_shutdown_hooks(&mut self, container: &Arc<ServiceContainer>, plan: &ActivationPlan) {
        let started = std::mem::take(&mut self.started);
        for &index in started.iter().rev() {
            let descriptor = &plan.modules()[index];
            let Some(hook) = descriptor.hooks.on_shutdown.clone() else {
                continue;
            };
            tracing::debug!("shutting down module '{}'", descriptor.name());
            let cx = self.hook_context(container, descriptor);
            if let Err(cause) = hook(cx).await {
                tracing::error!(
                    "shutdown hook failed for module '{}': {cause:#}",
                    descriptor.name()
                );
            }
        }
    }

    fn hook_context(
        &self,
        container: &Arc<ServiceContainer>,
        descriptor: &ModuleDescriptor,
    ) -> HookContext {
        let module = container
            .lookup(descriptor.name())
            .unwrap_or_else(|_| Arc::new(()) as ServiceInstance);
        HookContext {
            module,
            services: Arc::clone(container),
            config: self.config.clone(),
            scheduler: Arc::clone(&self.scheduler),
            local_addr: self.local_addr,
        }
    }

    fn expect_phase(&self, expected: LifecyclePhase, attempted: LifecyclePhase) -> Result<()> {
        if self.phase != expected {
            return Err(LifecycleError::InvalidTransition {
                from: self.phase,
                attempted,
            });
        }
        Ok(())
    }

    fn require_container(&self, attempted: LifecyclePhase) -> Result<Arc<ServiceContainer>> {
        self.container
            .clone()
            .ok_or(LifecycleError::InvalidTransition {
                from: self.phase,
                attempted,
            })
    }
}
