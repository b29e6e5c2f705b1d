//! Route-specific authorization consulting the permission evaluator.
//!
//! Policies are attached per route group. A denial lists what was
//! required (and what is missing for all-of policies) but never the
//! caller's granted set.

use super::{error_response, trace_id};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use portico_core::{
    auth::permissions::PermissionSet,
    context::{Principal, RequestContext},
    errors::ErrorKind,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequirementMode {
    /// Every listed permission must be granted.
    All,
    /// At least one listed permission must be granted.
    Any,
    /// At least one listed role must be held.
    Role,
}

/// A route-group authorization policy.
#[derive(Clone)]
pub struct PermissionPolicy {
    mode: RequirementMode,
    required: Arc<Vec<String>>,
}

impl PermissionPolicy {
    #[must_use]
    pub fn require(permissions: &[&str]) -> Self {
        Self {
            mode: RequirementMode::All,
            required: Arc::new(permissions.iter().map(ToString::to_string).collect()),
        }
    }

    #[must_use]
    pub fn require_any(permissions: &[&str]) -> Self {
        Self {
            mode: RequirementMode::Any,
            required: Arc::new(permissions.iter().map(ToString::to_string).collect()),
        }
    }

    #[must_use]
    pub fn require_role(roles: &[&str]) -> Self {
        Self {
            mode: RequirementMode::Role,
            required: Arc::new(roles.iter().map(ToString::to_string).collect()),
        }
    }
}

/// Enforces a [`PermissionPolicy`] against the authenticated principal.
pub async fn permission_middleware(
    State(policy): State<PermissionPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let trace = trace_id(&request);
    let Some(principal) = request
        .extensions()
        .get::<RequestContext>()
        .and_then(|ctx| ctx.principal.clone())
    else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            ErrorKind::Unauthorized,
            "authentication required",
            None,
            trace,
        );
    };

    if let Some(response) = evaluate(&policy, &principal, trace) {
        return response;
    }
    next.run(request).await
}

fn evaluate(
    policy: &PermissionPolicy,
    principal: &Principal,
    trace: Option<String>,
) -> Option<Response> {
    let required: Vec<&str> = policy.required.iter().map(String::as_str).collect();
    match policy.mode {
        RequirementMode::All => {
            let granted = PermissionSet::new(&principal.permissions);
            let missing = granted.missing(required.iter().copied());
            if missing.is_empty() {
                return None;
            }
            tracing::warn!(
                user_id = %principal.user_id,
                tenant_id = %principal.tenant_id,
                missing = ?missing,
                "permission denied"
            );
            Some(error_response(
                StatusCode::FORBIDDEN,
                ErrorKind::Forbidden,
                "insufficient permissions",
                Some(json!({
                    "required_permissions": *policy.required,
                    "missing_permissions": missing,
                })),
                trace,
            ))
        }
        RequirementMode::Any => {
            let granted = PermissionSet::new(&principal.permissions);
            if granted.has_any(required.iter().copied()) {
                return None;
            }
            tracing::warn!(
                user_id = %principal.user_id,
                tenant_id = %principal.tenant_id,
                any_of = ?policy.required,
                "permission denied, none of the alternatives granted"
            );
            Some(error_response(
                StatusCode::FORBIDDEN,
                ErrorKind::Forbidden,
                "insufficient permissions",
                Some(json!({"any_of": *policy.required})),
                trace,
            ))
        }
        RequirementMode::Role => {
            if policy
                .required
                .iter()
                .any(|role| principal.roles.contains(role))
            {
                return None;
            }
            tracing::warn!(
                user_id = %principal.user_id,
                required_roles = ?policy.required,
                "role check failed"
            );
            Some(error_response(
                StatusCode::FORBIDDEN,
                ErrorKind::Forbidden,
                "insufficient role",
                Some(json!({"required_roles": *policy.required})),
                trace,
            ))
        }
    }
}

/// Config-driven authorization for `/api/{service}` routes: when the
/// service carries required permissions in the services table, all of
/// them must be granted.
pub async fn service_authorization_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let service = request
        .uri()
        .path()
        .strip_prefix("/api/")
        .and_then(|rest| rest.split('/').next())
        .unwrap_or("")
        .to_string();

    if let Some(required) = state.config.services.required_permissions.get(&service) {
        let required: Vec<&str> = required.iter().map(String::as_str).collect();
        let policy = PermissionPolicy::require(&required);
        return permission_middleware(State(policy), request, next).await;
    }
    next.run(request).await
}
