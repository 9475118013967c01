use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use payloads::{ErrorBody, ErrorCode, RejectReason};
use thiserror::Error;
use tracing::error;

use crate::{service::IssueError, store::StoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Missing user identity")]
    Unauthenticated,

    #[error("Article already read")]
    AlreadyCredited,

    #[error("Unknown article")]
    UnknownArticle,

    #[error("Read rejected: {0}")]
    Rejected(RejectReason),

    #[error("Internal error: {0}")]
    InternalError(#[from] StoreError),
}

impl From<IssueError> for AppError {
    fn from(error: IssueError) -> Self {
        match error {
            IssueError::AlreadyCredited => AppError::AlreadyCredited,
            IssueError::UnknownArticle => AppError::UnknownArticle,
            IssueError::Store(error) => AppError::InternalError(error),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::MalformedPayload => (
                StatusCode::BAD_REQUEST,
                ErrorBody::new(ErrorCode::MalformedPayload, self.to_string()),
            ),
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::new(ErrorCode::Unauthenticated, self.to_string()),
            ),
            AppError::AlreadyCredited => (
                StatusCode::CONFLICT,
                ErrorBody::new(ErrorCode::AlreadyCredited, self.to_string()),
            ),
            AppError::UnknownArticle => (
                StatusCode::NOT_FOUND,
                ErrorBody::new(ErrorCode::UnknownArticle, self.to_string()),
            ),
            AppError::Rejected(reason) if reason.is_precondition() => {
                (StatusCode::CONFLICT, ErrorBody::rejected(*reason))
            }
            AppError::Rejected(reason) => {
                (StatusCode::UNPROCESSABLE_ENTITY, ErrorBody::rejected(*reason))
            }
            AppError::InternalError(e) => {
                error!("Store failure: {e}");

                // store details stay in the logs
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new(ErrorCode::Internal, "Internal error"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
