//! Static metadata describing one infrastructure capability.
//!
//! A [`ModuleDescriptor`] is created during the registration phase, before any
//! instantiation. It names the module, declares the capabilities it requires
//! and provides, and carries its constructor, its optional pipeline stage,
//! and its optional lifecycle hooks. Ordering between modules comes from the
//! declared `requires`/`provides` sets, never from registration order alone.
//!
//! # Example
//!
//! ```rust,ignore
//! use ensemble::prelude::*;
//!
//! let discovery = ModuleDescriptor::new("discovery")
//!     .requires("auth")
//!     .requires("cache")
//!     .provides("discovery")
//!     .constructor(|deps| {
//!         let client = ConsulClient::new(deps.config());
//!         Ok(Arc::new(client) as ServiceInstance)
//!     })
//!     .on_ready(|cx| async move {
//!         let client = cx.module_as::<ConsulClient>()?;
//!         client.announce(cx.local_addr).await
//!     });
//! ```

use std::any::Any;
use std::collections::BTreeSet;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::ConfigService;
use crate::container::{DependencyView, ServiceContainer};
use crate::error::{ComposeError, Result};
use crate::pipeline::{PipelineContext, StageSpec};
use crate::scheduler::HostedTaskScheduler;

/// A constructed module instance as stored in the service container.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Constructor invoked during activation with a view of the module's declared
/// dependencies.
pub type ConstructorFn =
    Arc<dyn Fn(&DependencyView<'_>) -> anyhow::Result<ServiceInstance> + Send + Sync>;

/// Boxed future returned by a lifecycle hook.
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A lifecycle hook contributed by a module.
pub type HookFn = Arc<dyn Fn(HookContext) -> HookFuture + Send + Sync>;

/// Everything a lifecycle hook can see.
#[derive(Clone)]
pub struct HookContext {
    /// The hook's own module instance.
    pub module: ServiceInstance,
    pub services: Arc<ServiceContainer>,
    pub config: ConfigService,
    pub scheduler: Arc<HostedTaskScheduler>,
    /// `None` until the network listener is bound; ready and shutdown hooks
    /// observe the bound address.
    pub local_addr: Option<SocketAddr>,
}

impl HookContext {
    /// Downcast the hook's own module instance.
    pub fn module_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.module
            .clone()
            .downcast::<T>()
            .map_err(|_| ComposeError::DowncastFailed {
                name: "<self>".to_string(),
                type_name: std::any::type_name::<T>().to_string(),
            })
    }
}

/// Lifecycle hooks for one module. All optional.
///
/// `on_ready` fires only after the listener is bound. `on_shutdown` runs once
/// for every module whose start succeeded, even when a later module fails.
#[derive(Clone, Default)]
pub struct Hooks {
    pub(crate) on_start: Option<HookFn>,
    pub(crate) on_ready: Option<HookFn>,
    pub(crate) on_shutdown: Option<HookFn>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.on_start.is_none() && self.on_ready.is_none() && self.on_shutdown.is_none()
    }
}

/// Static metadata for one infrastructure module.
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub(crate) name: String,
    pub(crate) requires: BTreeSet<String>,
    pub(crate) provides: BTreeSet<String>,
    pub(crate) constructor: ConstructorFn,
    pub(crate) pipeline_stage: Option<StageSpec>,
    pub(crate) hooks: Hooks,
}

impl ModuleDescriptor {
    /// A descriptor with no dependencies, a unit instance, and no hooks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires: BTreeSet::new(),
            provides: BTreeSet::new(),
            constructor: Arc::new(|_| Ok(Arc::new(()) as ServiceInstance)),
            pipeline_stage: None,
            hooks: Hooks::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> &BTreeSet<String> {
        &self.requires
    }

    pub fn provided(&self) -> &BTreeSet<String> {
        &self.provides
    }

    pub fn stage(&self) -> Option<&StageSpec> {
        self.pipeline_stage.as_ref()
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Declare a capability this module needs before it can be constructed.
    pub fn requires(mut self, capability: impl Into<String>) -> Self {
        self.requires.insert(capability.into());
        self
    }

    /// Declare a capability this module contributes.
    pub fn provides(mut self, capability: impl Into<String>) -> Self {
        self.provides.insert(capability.into());
        self
    }

    /// Set the constructor. It runs in activation order and sees only the
    /// services of the capabilities declared with [`requires`](Self::requires).
    pub fn constructor<F>(mut self, construct: F) -> Self
    where
        F: Fn(&DependencyView<'_>) -> anyhow::Result<ServiceInstance> + Send + Sync + 'static,
    {
        self.constructor = Arc::new(construct);
        self
    }

    /// Contribute a request-pipeline stage. Stages apply in ascending order;
    /// equal orders keep registration order.
    pub fn stage_fn<F>(mut self, order: i32, apply: F) -> Self
    where
        F: Fn(PipelineContext) -> PipelineContext + Send + Sync + 'static,
    {
        self.pipeline_stage = Some(StageSpec::new(order, apply));
        self
    }

    /// Hook run in plan order before the listener is bound. A failure aborts
    /// the boot and rolls back already-started modules.
    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.on_start = Some(boxed_hook(hook));
        self
    }

    /// Hook run in plan order once the listener is bound. A failure degrades
    /// health but does not abort.
    pub fn on_ready<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.on_ready = Some(boxed_hook(hook));
        self
    }

    /// Hook run in reverse plan order during shutdown or rollback. Failures
    /// are logged and do not block later hooks.
    pub fn on_shutdown<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.on_shutdown = Some(boxed_hook(hook));
        self
    }
}

fn boxed_hook<F, Fut>(hook: F) -> HookFn
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |cx| Box::pin(hook(cx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_capabilities() {
        let descriptor = ModuleDescriptor::new("discovery")
            .requires("auth")
            .requires("cache")
            .provides("discovery");

        assert_eq!(descriptor.name(), "discovery");
        assert!(descriptor.required().contains("auth"));
        assert!(descriptor.required().contains("cache"));
        assert!(descriptor.provided().contains("discovery"));
        assert!(descriptor.hooks().is_empty());
        assert!(descriptor.stage().is_none());
    }

    #[test]
    fn test_hooks_are_recorded() {
        let descriptor = ModuleDescriptor::new("auth")
            .on_start(|_cx| async { Ok(()) })
            .on_shutdown(|_cx| async { Ok(()) });

        assert!(descriptor.hooks().on_start.is_some());
        assert!(descriptor.hooks().on_ready.is_none());
        assert!(descriptor.hooks().on_shutdown.is_some());
    }
}
