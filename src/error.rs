use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use thiserror::Error;

use crate::pages;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("login required")]
    LoginRequired { next: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            // The message stays in the logs; the page is generic by design.
            AppError::NotFound(what) => {
                tracing::debug!("404: {}", what);
                (StatusCode::NOT_FOUND, Html(pages::not_found())).into_response()
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Html(pages::bad_request(&msg))).into_response()
            }
            AppError::LoginRequired { next } => {
                Redirect::to(&format!("/auth/login/?next={}", next)).into_response()
            }
            AppError::Database(err) => {
                tracing::error!("database error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, Html(pages::server_error())).into_response()
            }
            AppError::Internal(err) => {
                tracing::error!("internal error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, Html(pages::server_error())).into_response()
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
