//! Error taxonomy shared by the parser, the resolver, the stores and the HTTP layer.
//!
//! Every failure a resource operation can produce is one of the `ApiError` variants.
//! The HTTP layer switches on the variant to pick the status code; the parser and the
//! stores never decide status codes themselves.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Marker value used when a parameter was present but empty.
pub const EMPTY_VALUE: &str = "[empty]";

/// Field name reported for unknown filter parameters and unknown defaults.
pub const RESOURCE_PROPERTY: &str = "[resource property]";

/// One violated constraint of a payload, as reported by a store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationItem {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub field: String,
    #[serde(rename = "illegalValue", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ValidationItem {
    pub fn new(message: impl Into<String>, kind: &str, field: &str, value: Option<String>) -> Self {
        Self {
            message: message.into(),
            kind: kind.to_string(),
            field: field.to_string(),
            value,
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    /// Unknown field or association in any position of the criteria.
    #[error("{message}")]
    Field {
        message: String,
        field: String,
        value: String,
    },

    /// Malformed parameter value.
    #[error("{message}")]
    Parsing {
        message: String,
        field: String,
        value: String,
    },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{field} must be unique")]
    UniqueConstraint { field: String, value: String },

    #[error("Validation error")]
    Validation { errors: Vec<ValidationItem> },

    /// Anything unexpected, usually a datastore failure. Details never reach the client.
    #[error(transparent)]
    Server(#[from] anyhow::Error),
}

impl ApiError {
    /// Unknown field(s) error: `Resource has no field(s): <value>`.
    pub fn field(field: &str, value: &str) -> Self {
        Self::Field {
            message: format!("Resource has no field(s): {}", value),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Unknown association(s) error, always reported against `expand`.
    pub fn association(value: &str) -> Self {
        Self::Field {
            message: format!("Resource has no association(s): {}", value),
            field: "expand".to_string(),
            value: value.to_string(),
        }
    }

    pub fn parsing(message: impl Into<String>, field: &str, value: &str) -> Self {
        Self::Parsing {
            message: message.into(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn not_found() -> Self {
        Self::NotFound {
            message: "Not found".to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Field { .. } | Self::Parsing { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::UniqueConstraint { .. } => StatusCode::CONFLICT,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short type tag carried in `developerMessage.type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Field { .. } => "Field error",
            Self::Parsing { .. } => "Parsing error",
            Self::NotFound { .. } => "NotFoundError",
            Self::UniqueConstraint { .. } => "unique violation",
            Self::Validation { .. } => "Validation error",
            Self::Server(_) => "Server error",
        }
    }
}

/// Reason phrase used in the `status` member of every envelope.
pub fn status_phrase(code: StatusCode) -> &'static str {
    match code.as_u16() {
        200 => "OK",
        201 => "Created",
        204 => "No content",
        400 => "Bad request",
        404 => "Not found",
        409 => "Conflict",
        422 => "Unprocessable Entity",
        _ => "Server error",
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum DeveloperMessage {
    Single(ValidationItem),
    List(Vec<ValidationItem>),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub message: String,
    #[serde(rename = "developerMessage", skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<DeveloperMessage>,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        let code = err.status_code();
        let developer_message = match err {
            ApiError::Field {
                message,
                field,
                value,
            }
            | ApiError::Parsing {
                message,
                field,
                value,
            } => Some(DeveloperMessage::Single(ValidationItem::new(
                message.clone(),
                err.kind(),
                field,
                Some(value.clone()),
            ))),
            ApiError::UniqueConstraint { field, value } => {
                Some(DeveloperMessage::Single(ValidationItem::new(
                    err.to_string(),
                    err.kind(),
                    field,
                    Some(value.clone()),
                )))
            }
            ApiError::Validation { errors } => Some(DeveloperMessage::List(errors.clone())),
            ApiError::NotFound { .. } | ApiError::Server(_) => None,
        };
        let message = match err {
            ApiError::Server(_) => "Server error".to_string(),
            other => other.to_string(),
        };

        Self {
            status: status_phrase(code),
            status_code: code.as_u16(),
            message,
            developer_message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Server(err) => log::error!("Server error: {:#}", err),
            other => log::debug!("Request rejected: {} ({})", other, other.kind()),
        }
        let body = ErrorResponse::from(&self);
        (self.status_code(), Json(body)).into_response()
    }
}
