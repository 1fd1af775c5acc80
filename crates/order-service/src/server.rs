//! HTTP server for the order API.
//!
//! Routes live under `/api` and share one [`OrderEngine`] through
//! [`AppState`].

use crate::apis::order::{create_order, delete_order, get_order, list_orders, update_order};
use axum::{http::StatusCode, routing::get, Router};
use order_config::ApiConfig;
use order_core::OrderEngine;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Engine every handler works through.
	pub engine: Arc<OrderEngine>,
	/// API settings, used for page size defaults.
	pub api: ApiConfig,
}

/// Builds the router with all order endpoints and middleware.
pub fn router(state: AppState) -> Router {
	let timeout = Duration::from_secs(state.api.timeout_seconds);

	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", get(list_orders).post(create_order))
				.route(
					"/orders/{id}",
					get(get_order).put(update_order).delete(delete_order),
				),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(TimeoutLayer::with_status_code(
					StatusCode::REQUEST_TIMEOUT,
					timeout,
				))
				.layer(CorsLayer::permissive()),
		)
		.with_state(state)
}

/// Starts the HTTP server and serves until `shutdown` resolves.
pub async fn start_server<F>(
	api_config: ApiConfig,
	engine: Arc<OrderEngine>,
	shutdown: F,
) -> Result<(), Box<dyn std::error::Error>>
where
	F: Future<Output = ()> + Send + 'static,
{
	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let app = router(AppState {
		engine,
		api: api_config,
	});

	let listener = TcpListener::bind(&bind_address).await?;
	tracing::info!("Order API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown)
		.await?;

	Ok(())
}
