//! Bearer-token authentication.
//!
//! Parses `Authorization: Bearer <token>`, verifies through the caching
//! token verifier, binds the principal to the request context, and injects
//! the internal headers for downstream consumption. The injected headers
//! are always replaced, never merged, so clients cannot spoof them.

use super::{error_response, trace_id, X_INTERNAL_TOKEN, X_TENANT_ID};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use portico_core::{
    auth::AuthError,
    context::{Principal, RequestContext},
    errors::ErrorKind,
};

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let trace = trace_id(&request);

    let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return unauthorized("Authorization header required", trace);
    };

    let parts: Vec<&str> = header.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" {
        return unauthorized("Invalid authorization header format", trace);
    }
    let token = parts[1];

    let record = match state.verifier.verify(token).await {
        Ok(record) => record,
        Err(AuthError::InvalidToken) => {
            state.metrics.record_auth_attempt(false);
            return unauthorized("Invalid or expired token", trace);
        }
        Err(e) => {
            state.metrics.record_auth_attempt(false);
            tracing::warn!(error = %e, "token verification failed");
            return unauthorized("Invalid or expired token", trace);
        }
    };
    state.metrics.record_auth_attempt(true);

    let internal_token = match state.signer.mint(&record) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "internal token minting failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Internal,
                "An internal server error occurred",
                None,
                trace,
            );
        }
    };

    // Replace, never merge: a client-supplied value must not survive.
    match HeaderValue::from_str(&record.tenant_id) {
        Ok(value) => {
            request.headers_mut().insert(X_TENANT_ID.clone(), value);
        }
        Err(_) => {
            request.headers_mut().remove(&X_TENANT_ID);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&internal_token) {
        request
            .headers_mut()
            .insert(X_INTERNAL_TOKEN.clone(), value);
    }

    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        ctx.principal = Some(Principal {
            user_id: record.user_id.clone(),
            tenant_id: record.tenant_id.clone(),
            email: record.email.clone(),
            roles: record.roles.clone(),
            permissions: record.permissions.clone(),
            default_service: record.default_service().map(str::to_string),
        });
    }

    next.run(request).await
}

fn unauthorized(message: &str, trace: Option<String>) -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        ErrorKind::Unauthorized,
        message,
        None,
        trace,
    )
}
