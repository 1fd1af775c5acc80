//! API types for the order service HTTP surface.
//!
//! Request/response bodies plus the structured error type every handler
//! returns. The order itself is serialized as-is (see [`crate::Order`]).

use crate::{LineItem, Order};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Body of `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
	pub customer_id: Uuid,
	#[serde(default)]
	pub line_items: Vec<LineItem>,
}

/// Body of `PUT /api/orders/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOrderRequest {
	/// Requested status, "shipped" or "completed".
	pub status: String,
}

/// Query parameters of `GET /api/orders`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOrdersQuery {
	/// Last order id of the previous page. Absent or 0 starts from the beginning.
	pub cursor: Option<u64>,
	/// Page size; falls back to the configured default.
	pub size: Option<usize>,
}

/// Response of `GET /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOrdersResponse {
	pub items: Vec<Order>,
	/// Cursor for the next page, omitted on the last page.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub next: Option<u64>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error type/code
	pub error: String,
	/// Human-readable description
	pub message: String,
}

/// Structured API error type with HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Malformed input or a lifecycle rule violation (400)
	BadRequest { error_type: String, message: String },
	/// Entity absent (404)
	NotFound { error_type: String, message: String },
	/// Store failure or corrupt record (500)
	InternalServerError { error_type: String, message: String },
}

impl APIError {
	pub fn bad_request(error_type: &str, message: impl Into<String>) -> Self {
		APIError::BadRequest {
			error_type: error_type.to_string(),
			message: message.into(),
		}
	}

	pub fn not_found(error_type: &str, message: impl Into<String>) -> Self {
		APIError::NotFound {
			error_type: error_type.to_string(),
			message: message.into(),
		}
	}

	pub fn internal(error_type: &str, message: impl Into<String>) -> Self {
		APIError::InternalServerError {
			error_type: error_type.to_string(),
			message: message.into(),
		}
	}

	/// Get the HTTP status code for this error.
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (error_type, message) = match self {
			APIError::BadRequest {
				error_type,
				message,
			}
			| APIError::NotFound {
				error_type,
				message,
			}
			| APIError::InternalServerError {
				error_type,
				message,
			} => (error_type, message),
		};
		ErrorResponse {
			error: error_type.clone(),
			message: message.clone(),
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			APIError::BadRequest { message, .. } => write!(f, "Bad Request: {}", message),
			APIError::NotFound { message, .. } => write!(f, "Not Found: {}", message),
			APIError::InternalServerError { message, .. } => {
				write!(f, "Internal Server Error: {}", message)
			}
		}
	}
}

impl std::error::Error for APIError {}

impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status = StatusCode::from_u16(self.status_code())
			.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

		(status, Json(self.to_error_response())).into_response()
	}
}
