pub mod access_log;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod routes;
pub mod test_util;
pub mod upstream;

pub use access_log::{AccessEvent, AccessLog};
pub use auth::{AuthUser, Authenticator};
pub use config::{Config, SchedulerConfig, Strategy};
pub use error::ProxyError;
pub use upstream::UpstreamClient;

use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ollama_proxy_scheduler::{
    BackendRegistry, Dispatcher, ModelAffinityScheduler, RegistryError, Scheduler,
    ShortestQueueScheduler,
};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub auth: Authenticator,
    /// Admission and backend selection.
    pub dispatcher: Arc<Dispatcher>,
    pub upstream: UpstreamClient,
}

impl AppState {
    pub fn new(config: Config, auth: Authenticator) -> Result<Self, RegistryError> {
        let registry = Arc::new(BackendRegistry::new(config.backends())?);
        let dispatcher = Arc::new(build_dispatcher(&config.scheduler, registry));
        let upstream = UpstreamClient::new(&config.upstream);

        Ok(Self {
            config,
            auth,
            dispatcher,
            upstream,
        })
    }
}

/// Build the dispatcher for the configured strategy.
pub fn build_dispatcher(config: &SchedulerConfig, registry: Arc<BackendRegistry>) -> Dispatcher {
    let scheduler: Arc<dyn Scheduler> = match config.strategy {
        Strategy::ModelAffinity => Arc::new(ModelAffinityScheduler::with_window(
            registry.clone(),
            config.max_in_flight,
            config.affinity_window(),
        )),
        Strategy::ShortestQueue => Arc::new(ShortestQueueScheduler::new(
            registry.clone(),
            config.max_in_flight,
        )),
    };
    tracing::info!(
        "Scheduling with {} across {} backends (max in flight: {})",
        scheduler.name(),
        registry.len(),
        config.max_in_flight
    );
    Dispatcher::new(scheduler, registry, config.admission_timeout())
}

/// Build the proxy router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::proxy::router(state))
        .layer(middleware::from_fn(logging::request_logger))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
