//! Application bootstrap.
//!
//! Ties the pieces together the way a service `main` wants them: register
//! modules fluently, build (plan, construct, start, assemble pipeline), then
//! run (bind, ready, serve until shutdown, tear down). A boot failure is
//! fail-fast; [`BootError::exit_code`] gives the non-zero process exit code.
//!
//! # Example
//!
//! ```rust,ignore
//! use ensemble::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Application::builder()
//!         .config(ConfigService::from_env())
//!         .module(auth_module()).unwrap()
//!         .module(cache_module()).unwrap()
//!         .module(discovery_module()).unwrap()
//!         .build()
//!         .await
//!         .unwrap_or_else(|e| {
//!             eprintln!("boot failed: {e}");
//!             std::process::exit(e.exit_code());
//!         });
//!
//!     if let Err(e) = app.run().await {
//!         std::process::exit(e.exit_code());
//!     }
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use super::coordinator::{LifecycleCoordinator, LifecyclePhase};
use super::error::LifecycleError;
use super::shutdown::ShutdownSignal;
use crate::config::ConfigService;
use crate::container::ServiceContainer;
use crate::descriptor::ModuleDescriptor;
use crate::error::ComposeError;
use crate::health::HealthState;
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::registry::CompositionRegistry;
use crate::scheduler::HostedTaskScheduler;

/// Errors that abort the boot sequence.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("invalid bind address '{value}'")]
    InvalidBindAddr { value: String },

    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error")]
    Serve(#[source] std::io::Error),
}

impl BootError {
    /// Process exit code: 0 is reserved for a normal shutdown.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootError::Compose(_) => 2,
            BootError::Lifecycle(_) => 3,
            BootError::InvalidBindAddr { .. } | BootError::Bind { .. } | BootError::Serve(_) => 1,
        }
    }
}

/// A fully composed application: constructed modules, started hooks, and a
/// finalized pipeline, ready to bind and serve.
pub struct Application {
    coordinator: LifecycleCoordinator,
    pipeline: Pipeline,
    shutdown: ShutdownSignal,
    bind_addr: SocketAddr,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("bind_addr", &self.bind_addr)
            .finish_non_exhaustive()
    }
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.coordinator.phase()
    }

    pub fn health(&self) -> HealthState {
        self.coordinator.health()
    }

    pub fn scheduler(&self) -> Arc<HostedTaskScheduler> {
        self.coordinator.scheduler()
    }

    pub fn services(&self) -> Option<Arc<ServiceContainer>> {
        self.coordinator.container()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle for requesting shutdown from outside `run`.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bind the listener, fire ready hooks with the bound address, and serve
    /// until shutdown is requested; then run the shutdown sequence.
    ///
    /// Consumes the application. Grab [`shutdown_signal`](Self::shutdown_signal)
    /// and [`health`](Self::health) handles first to interact with it while
    /// running.
    pub async fn run(mut self) -> Result<(), BootError> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|source| BootError::Bind {
                addr: self.bind_addr,
                source,
            })?;
        let addr = listener.local_addr().map_err(BootError::Serve)?;
        tracing::info!("listening on {addr}");

        self.coordinator.ready(addr).await?;

        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, self.pipeline.router())
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await;

        self.coordinator.shutdown().await;
        result.map_err(BootError::Serve)
    }
}

/// Fluent builder: module registration calls chained onto the composition.
pub struct ApplicationBuilder {
    registry: CompositionRegistry,
    config: ConfigService,
    bind: Option<SocketAddr>,
}

impl std::fmt::Debug for ApplicationBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationBuilder")
            .field("bind", &self.bind)
            .finish_non_exhaustive()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            registry: CompositionRegistry::new(),
            config: ConfigService::from_env(),
            bind: None,
        }
    }

    pub fn config(mut self, config: ConfigService) -> Self {
        self.config = config;
        self
    }

    /// Override the bind address (otherwise `server.bind` from config,
    /// default `0.0.0.0:8080`).
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = Some(addr);
        self
    }

    /// Register one module. Registering the same module name twice is an
    /// error.
    pub fn module(mut self, descriptor: ModuleDescriptor) -> Result<Self, ComposeError> {
        self.registry.register(descriptor)?;
        Ok(self)
    }

    /// Build the plan, construct every module, run start hooks, and assemble
    /// the pipeline. Any failure here is fatal to the boot.
    pub async fn build(self) -> Result<Application, BootError> {
        let bind_addr = match self.bind {
            Some(addr) => addr,
            None => {
                let value = self.config.get_or("server.bind", "0.0.0.0:8080");
                value
                    .parse()
                    .map_err(|_| BootError::InvalidBindAddr { value })?
            }
        };

        let mut coordinator = LifecycleCoordinator::new(&self.registry, self.config.clone())?;
        let container = coordinator.construct().await?;
        coordinator.start().await?;

        let pipeline = PipelineBuilder::collect(
            coordinator.plan(),
            container,
            self.config.clone(),
            coordinator.health(),
        );

        Ok(Application {
            coordinator,
            pipeline,
            shutdown: ShutdownSignal::new(),
            bind_addr,
        })
    }
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ServiceInstance;
    use crate::discovery::ServiceRegistration;
    use crate::health::HealthStatus;
    use crate::openapi::RouteDoc;
    use anyhow::anyhow;
    use axum::routing::get;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn local_bind() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_module_rejected_at_registration() {
        let err = Application::builder()
            .module(ModuleDescriptor::new("auth"))
            .unwrap()
            .module(ModuleDescriptor::new("auth"))
            .unwrap_err();
        assert!(matches!(err, ComposeError::DuplicateModule { name } if name == "auth"));
    }

    #[tokio::test]
    async fn test_failed_construction_aborts_boot_with_nonzero_exit() {
        let hooks_run = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&hooks_run);

        let err = Application::builder()
            .config(ConfigService::empty())
            .bind(local_bind())
            .module(ModuleDescriptor::new("auth").provides("auth"))
            .unwrap()
            .module(
                ModuleDescriptor::new("cache")
                    .provides("cache")
                    .constructor(|_| Err(anyhow!("redis unreachable"))),
            )
            .unwrap()
            .module(
                ModuleDescriptor::new("discovery")
                    .requires("auth")
                    .requires("cache")
                    .on_start(move |_cx| {
                        let probe = Arc::clone(&probe);
                        async move {
                            probe.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
            )
            .unwrap()
            .build()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootError::Lifecycle(LifecycleError::Compose(ComposeError::ModuleInit { ref name, .. }))
                if name == "cache"
        ));
        assert_ne!(err.exit_code(), 0);
        // Discovery never got any hook invocation.
        assert_eq!(hooks_run.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_boot_serve_and_graceful_shutdown() {
        let registered: Arc<Mutex<Option<ServiceRegistration>>> = Arc::new(Mutex::new(None));
        let deregistered = Arc::new(AtomicUsize::new(0));

        let reg_probe = Arc::clone(&registered);
        let dereg_probe = Arc::clone(&deregistered);

        let config = ConfigService::empty();
        config.set("service.name", "identity");

        let app = Application::builder()
            .config(config)
            .bind(local_bind())
            .module(ModuleDescriptor::new("api").stage_fn(10, |cx| {
                cx.route(RouteDoc::get("/ping"), get(|| async { "pong" }))
            }))
            .unwrap()
            .module(
                ModuleDescriptor::new("discovery")
                    .on_ready(move |cx| {
                        let probe = Arc::clone(&reg_probe);
                        async move {
                            let addr = cx.local_addr.ok_or_else(|| anyhow!("no bound address"))?;
                            let registration = ServiceRegistration::from_config(&cx.config, addr);
                            *probe.lock().unwrap() = Some(registration);
                            Ok(())
                        }
                    })
                    .on_shutdown(move |_cx| {
                        let probe = Arc::clone(&dereg_probe);
                        async move {
                            probe.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
            )
            .unwrap()
            .build()
            .await
            .unwrap();

        assert_eq!(app.phase(), LifecyclePhase::Starting);
        let health = app.health();
        let shutdown = app.shutdown_signal();

        let server = tokio::spawn(app.run());

        // Wait for the ready transition, then stop the server.
        for _ in 0..100 {
            if health.status() == HealthStatus::Ready {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(health.status(), HealthStatus::Ready);
        {
            let guard = registered.lock().unwrap();
            let registration = guard.as_ref().expect("ready hook did not run");
            assert_eq!(registration.service_name, "identity");
            assert!(registration.address.starts_with("127.0.0.1:"));
        }

        shutdown.trigger();
        server.await.unwrap().unwrap();
        assert_eq!(deregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_bind_addr_from_config() {
        let config = ConfigService::empty();
        config.set("server.bind", "not-an-addr");

        let err = Application::builder()
            .config(config)
            .module(ModuleDescriptor::new("auth"))
            .unwrap()
            .build()
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::InvalidBindAddr { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_services_reachable_after_build() {
        struct TokenValidator {
            issuer: String,
        }

        let config = ConfigService::empty();
        config.set("auth.issuer", "https://sso.internal");

        let app = Application::builder()
            .config(config)
            .bind(local_bind())
            .module(
                ModuleDescriptor::new("auth")
                    .provides("auth")
                    .constructor(|deps| {
                        Ok(Arc::new(TokenValidator {
                            issuer: deps.config().get_or("auth.issuer", ""),
                        }) as ServiceInstance)
                    }),
            )
            .unwrap()
            .build()
            .await
            .unwrap();

        let services = app.services().unwrap();
        let validator = services.resolve_as::<TokenValidator>("auth").unwrap();
        assert_eq!(validator.issuer, "https://sso.internal");
    }
}
