//! HTTP request handlers.
//!
//! Organized by caller: buyers (`reservations`, `finalize`, `tiers`),
//! operators (`admin`) and load balancers (`health`).

pub mod admin;
pub mod finalize;
pub mod health;
pub mod reservations;
pub mod tiers;

use crate::error::AppError;
use axum::{Json, extract::rejection::JsonRejection};

/// Unwrap a JSON body, turning a rejection into a `VALIDATION_ERROR`.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}
