use std::collections::BTreeMap;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use utoipa::ToSchema;
use validator::{ValidationError, ValidationErrors};

use crate::policy::Denial;
use crate::repo::RepoError;

/// Field name -> human readable messages.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: FieldErrors,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("invalid input")]
    Validation(FieldErrors),
    #[error("{message}")]
    Conflict { field: &'static str, message: String },
    #[error("invalid confirmation code")]
    InvalidCredentials,
    #[error("authentication required")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    /// Validation failure on a single field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        ApiError::Validation(BTreeMap::from([(field.to_string(), vec![message.into()])]))
    }

    fn fields(&self) -> FieldErrors {
        match self {
            ApiError::Validation(fields) => fields.clone(),
            ApiError::Conflict { field, message } => BTreeMap::from([(field.to_string(), vec![message.clone()])]),
            _ => BTreeMap::new(),
        }
    }
}

/// Message for a validator error; derive-generated errors carry no message.
fn describe(err: &ValidationError) -> String {
    if let Some(message) = &err.message {
        return message.to_string();
    }
    let param = |name: &str| err.params.get(name).map(|v| v.to_string());
    match err.code.as_ref() {
        "length" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("Length must be between {min} and {max}"),
            (None, Some(max)) => format!("Ensure this field has no more than {max} characters"),
            (Some(min), None) => format!("Ensure this field has at least {min} characters"),
            (None, None) => "Invalid length".to_string(),
        },
        "email" => "Enter a valid email address".to_string(),
        "range" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("Value must be between {min} and {max}"),
            _ => "Value out of range".to_string(),
        },
        "required" => "This field is required".to_string(),
        code => code.to_string(),
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| (field.to_string(), errs.iter().map(describe).collect()))
            .collect();
        ApiError::Validation(fields)
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict(c) => ApiError::Conflict { field: c.field(), message: c.message().to_string() },
            RepoError::Internal(msg) => {
                tracing::error!("storage failure: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl From<Denial> for ApiError {
    fn from(d: Denial) -> Self {
        match d {
            Denial::Unauthenticated => ApiError::Unauthorized,
            Denial::Forbidden => ApiError::Forbidden,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Conflict { .. } | ApiError::InvalidCredentials => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string(), fields: self.fields() })
    }
}
