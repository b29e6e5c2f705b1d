//! Request validation: body-bearing methods must declare a media type.

use super::{error_response, trace_id};
use axum::{
    extract::Request,
    http::{header::CONTENT_TYPE, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use portico_core::errors::ErrorKind;

pub async fn validation_middleware(request: Request, next: Next) -> Response {
    // GET and DELETE carry no body by contract; HEAD and OPTIONS must not
    // be blocked or CORS preflight would 400 before reaching the CORS stage.
    let exempt = matches!(
        *request.method(),
        Method::GET | Method::DELETE | Method::HEAD | Method::OPTIONS
    );

    if !exempt {
        let has_content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| !v.is_empty());
        if !has_content_type {
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorKind::InvalidRequest,
                "Content-Type header required",
                None,
                trace_id(&request),
            );
        }
    }
    next.run(request).await
}
