//! Ordered request-pipeline assembly.
//!
//! Each module may contribute one [`StageSpec`]. The builder threads an
//! accumulating [`PipelineContext`] through every stage in ascending
//! `(order, registration index)` order, so a stage that layers middleware
//! wraps everything mounted by earlier stages. Finalization yields an
//! immutable [`Pipeline`]; no stage can be added afterwards.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::IntoResponse;
use axum::routing::{MethodRouter, Route, get};
use axum::{Json, Router};
use tower::{Layer, Service};

use crate::config::ConfigService;
use crate::container::ServiceContainer;
use crate::health::{self, HealthState};
use crate::openapi::{self, RouteDoc};
use crate::registry::ActivationPlan;

/// A pipeline stage application function.
pub type StageFn = Arc<dyn Fn(PipelineContext) -> PipelineContext + Send + Sync>;

/// One module's contribution to the request pipeline.
#[derive(Clone)]
pub struct StageSpec {
    pub(crate) order: i32,
    pub(crate) apply: StageFn,
}

impl StageSpec {
    pub fn new<F>(order: i32, apply: F) -> Self
    where
        F: Fn(PipelineContext) -> PipelineContext + Send + Sync + 'static,
    {
        Self {
            order,
            apply: Arc::new(apply),
        }
    }

    pub fn order(&self) -> i32 {
        self.order
    }
}

/// Accumulating pipeline state threaded through stages.
pub struct PipelineContext {
    router: Router,
    routes: Vec<RouteDoc>,
    services: Arc<ServiceContainer>,
    config: ConfigService,
}

impl PipelineContext {
    fn new(services: Arc<ServiceContainer>, config: ConfigService) -> Self {
        Self {
            router: Router::new(),
            routes: Vec::new(),
            services,
            config,
        }
    }

    /// Mount a documented route.
    pub fn route(mut self, doc: RouteDoc, handler: MethodRouter) -> Self {
        self.router = self.router.route(doc.path(), handler);
        self.routes.push(doc);
        self
    }

    /// Merge a router contributed wholesale. Its routes stay undocumented.
    pub fn merge(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    /// Wrap every route mounted by earlier stages in a middleware layer.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<Route> + Clone + Send + Sync + 'static,
        L::Service: Service<Request> + Clone + Send + Sync + 'static,
        <L::Service as Service<Request>>::Response: IntoResponse + 'static,
        <L::Service as Service<Request>>::Error: Into<Infallible> + 'static,
        <L::Service as Service<Request>>::Future: Send + 'static,
    {
        self.router = self.router.layer(layer);
        self
    }

    /// Record a route document without mounting anything (for routes mounted
    /// via [`merge`](Self::merge)).
    pub fn document(mut self, doc: RouteDoc) -> Self {
        self.routes.push(doc);
        self
    }

    pub fn services(&self) -> &Arc<ServiceContainer> {
        &self.services
    }

    pub fn config(&self) -> &ConfigService {
        &self.config
    }

    pub fn documented_routes(&self) -> &[RouteDoc] {
        &self.routes
    }
}

/// Collects module pipeline stages into a finalized pipeline.
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Apply each module's stage in `(order, registration index)` order and
    /// finalize, mounting the documentation and readiness endpoints.
    pub fn collect(
        plan: &ActivationPlan,
        services: Arc<ServiceContainer>,
        config: ConfigService,
        health: HealthState,
    ) -> Pipeline {
        let mut stages: Vec<(i32, usize, StageFn)> = plan
            .iter()
            .enumerate()
            .filter_map(|(position, descriptor)| {
                descriptor.stage().map(|stage| {
                    (
                        stage.order,
                        plan.registration_index(position),
                        stage.apply.clone(),
                    )
                })
            })
            .collect();
        stages.sort_by_key(|(order, registration, _)| (*order, *registration));

        let mut cx = PipelineContext::new(services, config.clone());
        for (_, _, apply) in &stages {
            cx = apply(cx);
        }
        tracing::debug!(
            stages = stages.len(),
            routes = cx.routes.len(),
            "pipeline collected"
        );

        let service_name = config.get_or("service.name", "ensemble-service");
        let version = config.get_or("service.version", env!("CARGO_PKG_VERSION"));
        let doc = openapi::document(&service_name, &version, &cx.routes);

        let doc_handler = get(move || {
            let body = doc.clone();
            async move { Json(body) }
        });
        let health_handler = get(move || {
            let state = health.clone();
            async move { state.response() }
        });
        let router = cx
            .router
            .route(openapi::DOC_PATH, doc_handler)
            .route(health::READINESS_PATH, health_handler);

        Pipeline {
            router,
            routes: cx.routes,
        }
    }
}

/// The finalized request pipeline. No stage may be added once built.
pub struct Pipeline {
    router: Router,
    routes: Vec<RouteDoc>,
}

impl Pipeline {
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    pub fn documented_routes(&self) -> &[RouteDoc] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ModuleDescriptor;
    use crate::registry::CompositionRegistry;
    use crate::scheduler::HostedTaskScheduler;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use std::sync::Mutex;
    use tower::ServiceExt;

    async fn pipeline_of(descriptors: Vec<ModuleDescriptor>, config: ConfigService) -> Pipeline {
        let mut registry = CompositionRegistry::new();
        for descriptor in descriptors {
            registry.register(descriptor).unwrap();
        }
        let plan = registry.build_plan().unwrap();
        let container = ServiceContainer::instantiate(
            &plan,
            config.clone(),
            Arc::new(HostedTaskScheduler::new()),
        )
        .await
        .unwrap();
        PipelineBuilder::collect(&plan, container, config, HealthState::new())
    }

    #[tokio::test]
    async fn test_equal_orders_apply_in_registration_order() {
        let applied = Arc::new(Mutex::new(Vec::new()));

        let mut descriptors = Vec::new();
        for (name, order) in [("first", 10), ("second", 5), ("third", 10)] {
            let applied = Arc::clone(&applied);
            descriptors.push(ModuleDescriptor::new(name).stage_fn(order, move |cx| {
                applied.lock().unwrap().push((order, name));
                cx
            }));
        }

        pipeline_of(descriptors, ConfigService::empty()).await;
        assert_eq!(
            *applied.lock().unwrap(),
            vec![(5, "second"), (10, "first"), (10, "third")]
        );
    }

    #[tokio::test]
    async fn test_documented_routes_are_served_and_described() {
        let config = ConfigService::empty();
        config.set("service.name", "identity");

        let pipeline = pipeline_of(
            vec![ModuleDescriptor::new("api").stage_fn(0, |cx| {
                cx.route(
                    RouteDoc::get("/whoami").summary("Current principal"),
                    get(|| async { "anonymous" }),
                )
            })],
            config,
        )
        .await;

        assert_eq!(pipeline.documented_routes().len(), 1);

        let response = pipeline
            .router()
            .oneshot(
                HttpRequest::builder()
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = pipeline
            .router()
            .oneshot(
                HttpRequest::builder()
                    .uri(openapi::DOC_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["info"]["title"], "identity");
        assert!(doc["paths"]["/whoami"]["get"].is_object());
    }

    #[tokio::test]
    async fn test_readiness_endpoint_reflects_health() {
        let pipeline = pipeline_of(vec![], ConfigService::empty()).await;
        let response = pipeline
            .router()
            .oneshot(
                HttpRequest::builder()
                    .uri(health::READINESS_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // Health starts in Starting; the probe must fail until Ready.
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_later_stage_observes_earlier_routes() {
        let pipeline = pipeline_of(
            vec![
                ModuleDescriptor::new("routes").stage_fn(10, |cx| {
                    cx.route(RouteDoc::get("/items"), get(|| async { "[]" }))
                }),
                ModuleDescriptor::new("audit").stage_fn(20, |cx| {
                    assert_eq!(cx.documented_routes().len(), 1);
                    cx
                }),
            ],
            ConfigService::empty(),
        )
        .await;
        assert_eq!(pipeline.documented_routes().len(), 1);
    }
}
