//! Order endpoints.
//!
//! Thin handlers over [`OrderEngine`]: they translate HTTP input into engine
//! calls and repository errors into [`APIError`] responses.

use crate::server::AppState;
use axum::{
	extract::{
		rejection::{JsonRejection, PathRejection, QueryRejection},
		Path, Query, State,
	},
	http::StatusCode,
	response::Json,
};
use order_core::{FindAllPage, LifecycleError, RepositoryError};
use order_types::{
	APIError, CreateOrderRequest, ListOrdersQuery, ListOrdersResponse, Order, UpdateOrderRequest,
};
use tracing::{info, warn};

/// Maps a repository error onto its HTTP response.
pub fn to_api_error(err: RepositoryError) -> APIError {
	let message = err.to_string();
	match err {
		RepositoryError::NotFound(_) => APIError::not_found("ORDER_NOT_FOUND", message),
		RepositoryError::InvalidOrder(_) => APIError::bad_request("INVALID_ORDER", message),
		RepositoryError::InvalidPage(_) => APIError::bad_request("INVALID_PAGE", message),
		RepositoryError::Lifecycle(LifecycleError::InvalidTransition { .. }) => {
			APIError::bad_request("INVALID_TRANSITION", message)
		}
		RepositoryError::Lifecycle(LifecycleError::InvalidStatus(_)) => {
			APIError::bad_request("INVALID_STATUS", message)
		}
		RepositoryError::Conflict(_) => {
			APIError::internal("ID_ALLOCATION_FAILED", "Could not allocate an order ID")
		}
		RepositoryError::StoreUnavailable(_) => {
			APIError::internal("STORE_UNAVAILABLE", "Order store unavailable")
		}
		RepositoryError::DecodeError(_) => {
			APIError::internal("CORRUPT_ORDER", "Stored order could not be decoded")
		}
	}
}

/// Logs a failed engine call and converts it for the response.
fn reject(operation: &str, err: RepositoryError) -> APIError {
	match &err {
		RepositoryError::StoreUnavailable(_)
		| RepositoryError::DecodeError(_)
		| RepositoryError::Conflict(_) => {
			tracing::error!(operation, error = %err, "Order request failed");
		}
		_ => warn!(operation, error = %err, "Order request rejected"),
	}
	to_api_error(err)
}

fn order_id(path: Result<Path<u64>, PathRejection>) -> Result<u64, APIError> {
	match path {
		Ok(Path(id)) => Ok(id),
		Err(e) => Err(APIError::bad_request("INVALID_ORDER_ID", e.body_text())),
	}
}

fn body<T>(json: Result<Json<T>, JsonRejection>) -> Result<T, APIError> {
	match json {
		Ok(Json(value)) => Ok(value),
		Err(e) => Err(APIError::bad_request("INVALID_BODY", e.body_text())),
	}
}

/// Handles POST /api/orders.
pub async fn create_order(
	State(state): State<AppState>,
	request: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), APIError> {
	let request = body(request)?;
	let order = state
		.engine
		.create(request.customer_id, request.line_items)
		.await
		.map_err(|e| reject("create", e))?;

	info!(order_id = order.order_id, customer_id = %order.customer_id, "Order created");
	Ok((StatusCode::CREATED, Json(order)))
}

/// Handles GET /api/orders.
///
/// `size` falls back to the configured default and is capped at the
/// configured maximum. A zero size is rejected.
pub async fn list_orders(
	State(state): State<AppState>,
	query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> Result<Json<ListOrdersResponse>, APIError> {
	let Query(query) =
		query.map_err(|e| APIError::bad_request("INVALID_QUERY", e.body_text()))?;

	let size = query
		.size
		.unwrap_or(state.api.default_page_size)
		.min(state.api.max_page_size);
	let page = FindAllPage {
		size,
		offset: query.cursor.unwrap_or(0),
	};

	let result = state
		.engine
		.list(page)
		.await
		.map_err(|e| reject("list", e))?;

	tracing::debug!(count = result.orders.len(), next = ?result.cursor, "Listed orders");
	Ok(Json(ListOrdersResponse {
		items: result.orders,
		next: result.cursor,
	}))
}

/// Handles GET /api/orders/{id}.
pub async fn get_order(
	State(state): State<AppState>,
	path: Result<Path<u64>, PathRejection>,
) -> Result<Json<Order>, APIError> {
	let id = order_id(path)?;
	let order = state.engine.get(id).await.map_err(|e| reject("get", e))?;
	Ok(Json(order))
}

/// Handles PUT /api/orders/{id}.
pub async fn update_order(
	State(state): State<AppState>,
	path: Result<Path<u64>, PathRejection>,
	request: Result<Json<UpdateOrderRequest>, JsonRejection>,
) -> Result<Json<Order>, APIError> {
	let id = order_id(path)?;
	let request = body(request)?;
	let order = state
		.engine
		.update_status(id, &request.status)
		.await
		.map_err(|e| reject("update", e))?;

	info!(order_id = id, status = %order.status(), "Order status changed");
	Ok(Json(order))
}

/// Handles DELETE /api/orders/{id}.
pub async fn delete_order(
	State(state): State<AppState>,
	path: Result<Path<u64>, PathRejection>,
) -> Result<StatusCode, APIError> {
	let id = order_id(path)?;
	state
		.engine
		.delete(id)
		.await
		.map_err(|e| reject("delete", e))?;
	Ok(StatusCode::NO_CONTENT)
}
