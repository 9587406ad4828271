//! Service container: owns every constructed module instance.
//!
//! One container per process, passed explicitly to whatever needs lookup.
//! Instances are stored as `Arc<dyn Any>` keyed by module name, with a
//! secondary capability index so dependents resolve by the contract name
//! they declared rather than the providing module's name.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::ConfigService;
use crate::descriptor::{HookContext, ServiceInstance};
use crate::error::{ComposeError, Result};
use crate::registry::ActivationPlan;
use crate::scheduler::HostedTaskScheduler;

/// Holds constructed module instances for the process lifetime.
pub struct ServiceContainer {
    /// module name -> instance
    services: DashMap<String, ServiceInstance>,
    /// capability -> providing module name
    capabilities: DashMap<String, String>,
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field(
                "services",
                &self
                    .services
                    .iter()
                    .map(|entry| entry.key().clone())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl ServiceContainer {
    fn new() -> Self {
        Self {
            services: DashMap::new(),
            capabilities: DashMap::new(),
        }
    }

    /// Construct every module in plan order.
    ///
    /// Each constructor sees a [`DependencyView`] restricted to the
    /// capabilities its descriptor requires. A failing constructor aborts the
    /// remainder; modules constructed before it have their shutdown hooks
    /// invoked in reverse order, exactly once, before the error propagates.
    pub async fn instantiate(
        plan: &ActivationPlan,
        config: ConfigService,
        scheduler: Arc<HostedTaskScheduler>,
    ) -> Result<Arc<Self>> {
        let container = Arc::new(Self::new());
        let mut constructed: Vec<usize> = Vec::new();

        for (index, descriptor) in plan.iter().enumerate() {
            let view = DependencyView {
                container: &container,
                allowed: descriptor.required(),
                config: &config,
            };
            match (descriptor.constructor)(&view) {
                Ok(instance) => {
                    tracing::debug!("constructed module '{}'", descriptor.name());
                    container
                        .services
                        .insert(descriptor.name().to_string(), instance);
                    for capability in descriptor.provided() {
                        container
                            .capabilities
                            .insert(capability.clone(), descriptor.name().to_string());
                    }
                    constructed.push(index);
                }
                Err(cause) => {
                    tracing::error!(
                        "module '{}' failed to construct, rolling back {} modules: {cause:#}",
                        descriptor.name(),
                        constructed.len()
                    );
                    Self::rollback(plan, &container, &constructed, &config, &scheduler).await;
                    return Err(ComposeError::ModuleInit {
                        name: descriptor.name().to_string(),
                        source: cause,
                    });
                }
            }
        }

        tracing::info!("service container populated ({} modules)", container.len());
        Ok(container)
    }

    async fn rollback(
        plan: &ActivationPlan,
        container: &Arc<Self>,
        constructed: &[usize],
        config: &ConfigService,
        scheduler: &Arc<HostedTaskScheduler>,
    ) {
        for &index in constructed.iter().rev() {
            let descriptor = &plan.modules()[index];
            let Some(hook) = descriptor.hooks.on_shutdown.clone() else {
                continue;
            };
            let Ok(module) = container.lookup(descriptor.name()) else {
                continue;
            };
            let cx = HookContext {
                module,
                services: Arc::clone(container),
                config: config.clone(),
                scheduler: Arc::clone(scheduler),
                local_addr: None,
            };
            if let Err(cause) = hook(cx).await {
                tracing::error!(
                    "rollback shutdown failed for module '{}': {cause:#}",
                    descriptor.name()
                );
            }
        }
    }

    /// Look up a module instance by module name.
    pub fn lookup(&self, name: &str) -> Result<ServiceInstance> {
        self.services
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| ComposeError::ServiceNotFound {
                name: name.to_string(),
            })
    }

    /// Resolve a capability to its provider's instance.
    pub fn resolve(&self, capability: &str) -> Result<ServiceInstance> {
        let provider = self.capabilities.get(capability).ok_or_else(|| {
            ComposeError::ServiceNotFound {
                name: capability.to_string(),
            }
        })?;
        self.lookup(provider.value())
    }

    /// Look up a module instance by name and downcast it.
    pub fn lookup_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.lookup(name)?
            .downcast::<T>()
            .map_err(|_| ComposeError::DowncastFailed {
                name: name.to_string(),
                type_name: std::any::type_name::<T>().to_string(),
            })
    }

    /// Resolve a capability and downcast the provider's instance.
    pub fn resolve_as<T: Send + Sync + 'static>(&self, capability: &str) -> Result<Arc<T>> {
        self.resolve(capability)?
            .downcast::<T>()
            .map_err(|_| ComposeError::DowncastFailed {
                name: capability.to_string(),
                type_name: std::any::type_name::<T>().to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Read-only view handed to a module constructor, restricted to the
/// capabilities the module declared in `requires`.
pub struct DependencyView<'a> {
    pub(crate) container: &'a ServiceContainer,
    pub(crate) allowed: &'a BTreeSet<String>,
    pub(crate) config: &'a ConfigService,
}

impl DependencyView<'_> {
    /// Resolve a declared capability.
    pub fn get(&self, capability: &str) -> Result<ServiceInstance> {
        if !self.allowed.contains(capability) {
            return Err(ComposeError::ServiceNotFound {
                name: capability.to_string(),
            });
        }
        self.container.resolve(capability)
    }

    /// Resolve a declared capability and downcast the instance.
    pub fn get_as<T: Send + Sync + 'static>(&self, capability: &str) -> Result<Arc<T>> {
        self.get(capability)?
            .downcast::<T>()
            .map_err(|_| ComposeError::DowncastFailed {
                name: capability.to_string(),
                type_name: std::any::type_name::<T>().to_string(),
            })
    }

    pub fn config(&self) -> &ConfigService {
        self.config
    }
}
