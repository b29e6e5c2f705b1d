//! Logical service name resolution.
//!
//! A logical name (`user`, `file-service`) resolves to a transport target
//! from the configured map, falling back to the `<NAME>_URL` environment
//! convention. The dispatcher never sees transport details beyond the
//! tagged target.

use std::collections::HashMap;

/// A resolved transport target.
///
/// The generic byte-stream dispatcher serves HTTP targets; gRPC targets
/// belong to typed collaborator clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceTarget {
    /// Plain HTTP(S) base URL, without a trailing slash.
    Http(String),
    /// gRPC endpoint, owned by a typed client.
    Grpc(String),
}

/// Resolves logical service names to transport targets.
pub struct ServiceResolver {
    targets: HashMap<String, String>,
}

impl ServiceResolver {
    #[must_use]
    pub fn new(targets: HashMap<String, String>) -> Self {
        Self { targets }
    }

    /// Resolves `name`, consulting the configured map first and the
    /// `<NAME>_URL` environment convention second.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<ServiceTarget> {
        let url = self
            .targets
            .get(name)
            .cloned()
            .or_else(|| std::env::var(Self::env_key(name)).ok())?;
        Some(Self::classify(&url))
    }

    /// Environment variable the name falls back to, e.g.
    /// `file-service` -> `FILE_SERVICE_URL`.
    #[must_use]
    pub fn env_key(name: &str) -> String {
        let mut key = name.to_uppercase().replace('-', "_");
        if !key.ends_with("_SERVICE") {
            // `user` -> `USER_SERVICE_URL`, matching the deployment's
            // conventional variable names.
            key.push_str("_SERVICE");
        }
        key.push_str("_URL");
        key
    }

    fn classify(url: &str) -> ServiceTarget {
        let trimmed = url.trim_end_matches('/').to_string();
        if trimmed.starts_with("grpc://") || trimmed.starts_with("grpcs://") {
            ServiceTarget::Grpc(trimmed)
        } else {
            ServiceTarget::Http(trimmed)
        }
    }

    /// The UI variant of a logical name, used by `/page/{service}` routes.
    #[must_use]
    pub fn ui_variant(name: &str) -> String {
        format!("{name}-ui")
    }
}
