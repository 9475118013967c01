use axum::{body::Bytes, http::HeaderMap};
use payloads::USER_HEADER;
use serde::de::DeserializeOwned;

use crate::error::AppError;

pub fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|_| AppError::MalformedPayload)
}

/// The gateway authenticates and forwards the user id. Blank means nobody.
pub fn acting_user(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthenticated)
}
