//! HTTP operations surface for the order saga.
//!
//! Exposes saga start and status, participant lookups, circuit-breaker
//! controls, outbox and dead-letter review, broker introspection and the
//! batch topic, with structured logging (tracing) and Prometheus metrics.
//! [`AppState`] also wires the relay and the consumers the binary runs in
//! the background.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::ApiError;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    use routes::{
        admin, batch, circuit_breakers, failed_messages, inventory, orders, outbox, payments,
        products, sagas, system,
    };

    let metrics_router = Router::new()
        .route("/metrics", get(system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(system::check::<S>))
        .route("/sagas", post(sagas::start::<S>).get(sagas::list::<S>))
        .route("/sagas/{id}", get(sagas::get::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/saga", get(orders::saga::<S>))
        .route("/payments/{id}", get(payments::get::<S>))
        .route("/payments/{id}/inquiry", get(payments::inquire::<S>))
        .route("/inventory", post(inventory::initialize::<S>))
        .route("/inventory/{product_id}", get(inventory::get::<S>))
        .route("/products", post(products::register::<S>))
        .route("/products/stats", get(products::stats::<S>))
        .route("/batch", post(batch::publish::<S>))
        .route("/batch/stats", get(batch::stats::<S>))
        .route("/circuit-breakers", get(circuit_breakers::list::<S>))
        .route("/circuit-breakers/{name}", get(circuit_breakers::get::<S>))
        .route(
            "/circuit-breakers/{name}/reset",
            post(circuit_breakers::reset::<S>),
        )
        .route(
            "/circuit-breakers/{name}/force-open",
            post(circuit_breakers::force_open::<S>),
        )
        .route(
            "/circuit-breakers/{name}/close",
            post(circuit_breakers::close::<S>),
        )
        .route("/outbox", get(outbox::list::<S>))
        .route("/outbox/stats", get(outbox::stats::<S>))
        .route("/outbox/relay", post(outbox::relay::<S>))
        .route("/outbox/{id}/requeue", post(outbox::requeue::<S>))
        .route("/admin/topics", get(admin::list_topics::<S>))
        .route("/admin/topics/{name}", get(admin::describe_topic::<S>))
        .route(
            "/admin/consumer-groups",
            get(admin::list_consumer_groups::<S>),
        )
        .route(
            "/admin/consumer-groups/{group}",
            get(admin::describe_consumer_group::<S>),
        )
        .route("/failed-messages", get(failed_messages::list::<S>))
        .route("/failed-messages/{id}", get(failed_messages::get::<S>))
        .route(
            "/failed-messages/{id}/status",
            put(failed_messages::update_status::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
