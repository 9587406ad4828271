//! # Ensemble
//!
//! A module composition and lifecycle-ordering framework for Rust
//! microservices.
//!
//! Ensemble lets independently-authored infrastructure modules (auth,
//! caching, messaging, service discovery, tracing, ...) each contribute
//! process-lifetime services, ordered request-pipeline stages, and lifecycle
//! hooks, while the framework guarantees that ordering-sensitive dependencies
//! are satisfied: every module declares the capabilities it `requires` and
//! `provides`, and composition fails fast when the graph is unsatisfiable —
//! implicit "call AddX before AddY" knowledge becomes a checked invariant.
//!
//! ## Features
//!
//! - **Capability graph**: stable topological activation order with
//!   registration-order tie-break, validated before anything is constructed
//! - **Service container**: one explicit per-process container, name-keyed,
//!   with rollback on partial construction failure
//! - **Ordered pipeline**: modules contribute axum routes and middleware
//!   stages applied in `(order, registration)` order, finalized immutably
//! - **Lifecycle state machine**: start / post-bind ready / reverse-order
//!   shutdown hooks with failure containment
//! - **Hosted tasks**: recurring background work, cancelled on shutdown,
//!   disabled individually on fatal failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ensemble::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache = ModuleDescriptor::new("cache")
//!         .provides("cache")
//!         .constructor(|deps| {
//!             let url = deps.config().get_or("cache.url", "redis://localhost");
//!             Ok(Arc::new(url) as ServiceInstance)
//!         });
//!
//!     let api = ModuleDescriptor::new("api")
//!         .requires("cache")
//!         .stage_fn(10, |cx| {
//!             cx.route(RouteDoc::get("/ping"), axum::routing::get(|| async { "pong" }))
//!         });
//!
//!     let app = Application::builder()
//!         .module(cache).unwrap()
//!         .module(api).unwrap()
//!         .build()
//!         .await
//!         .unwrap_or_else(|e| std::process::exit(e.exit_code()));
//!
//!     if let Err(e) = app.run().await {
//!         std::process::exit(e.exit_code());
//!     }
//! }
//! ```

pub mod config;
pub mod container;
pub mod descriptor;
pub mod discovery;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod openapi;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

// Re-export core types
pub use config::ConfigService;
pub use container::{DependencyView, ServiceContainer};
pub use descriptor::{HookContext, Hooks, ModuleDescriptor, ServiceInstance};
pub use error::{ComposeError, Result};
pub use lifecycle::{Application, ApplicationBuilder, BootError, LifecycleCoordinator, LifecyclePhase};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineContext, StageSpec};
pub use registry::{ActivationPlan, CompositionRegistry};
pub use scheduler::{HostedTask, HostedTaskScheduler, TaskError};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use ensemble::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::ConfigService;
    pub use crate::container::{DependencyView, ServiceContainer};
    pub use crate::descriptor::{HookContext, Hooks, ModuleDescriptor, ServiceInstance};
    pub use crate::discovery::{DiscoveryBackend, ServiceRegistration};
    pub use crate::error::{ComposeError, Result};
    pub use crate::health::{HealthState, HealthStatus};
    pub use crate::lifecycle::{
        Application, ApplicationBuilder, BootError, LifecycleCoordinator, LifecyclePhase,
        ShutdownSignal, os_signal,
    };
    pub use crate::openapi::RouteDoc;
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineContext, StageSpec};
    pub use crate::registry::{ActivationPlan, CompositionRegistry};
    pub use crate::scheduler::{HostedTask, HostedTaskScheduler, TaskError, TaskStatus};
    pub use async_trait::async_trait;
    pub use axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    pub use std::sync::Arc;
}
