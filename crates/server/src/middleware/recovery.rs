//! Panic boundary at the top of the pipeline.
//!
//! Any unhandled failure from a later stage is converted into a 500 with
//! the standard envelope instead of tearing down the connection. Stack
//! traces are logged, never returned.

use super::{error_response, X_CORRELATION_ID};
use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use portico_core::{context::CorrelationId, errors::ErrorKind};
use std::panic::AssertUnwindSafe;

pub async fn recovery_middleware(request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(&X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let correlation_id =
                correlation_id.unwrap_or_else(|| CorrelationId::generate().to_string());
            tracing::error!(
                correlation_id = %correlation_id,
                panic = %panic_message(&panic),
                "panic recovered in request pipeline"
            );

            let mut response = error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Internal,
                "An internal server error occurred",
                None,
                Some(correlation_id.clone()),
            );
            if let Ok(value) = HeaderValue::from_str(&correlation_id) {
                response
                    .headers_mut()
                    .insert(X_CORRELATION_ID.clone(), value);
            }
            response
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
