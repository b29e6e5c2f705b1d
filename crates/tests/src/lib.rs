//! Integration tests for the Portico gateway.
//!
//! Test modules:
//!
//! - `middleware_chain_tests`: pipeline ordering and cross-stage interaction
//! - `rate_limit_tests`: admission boundaries through the full application
//! - `auth_flow_tests`: authentication, token caching, header injection,
//!   and route authorization
//! - `failover_tests`: breaker trips and the tenant/system/redirect chain
//! - `mock_infrastructure`: reusable mock upstreams and a mock auth
//!   collaborator
//!
//! All tests assemble the real router in-process and exercise it with
//! `tower::ServiceExt::oneshot`; mock upstreams are real HTTP servers on
//! ephemeral ports so the forwarding path is exercised end to end.

#[cfg(test)]
mod auth_flow_tests;

#[cfg(test)]
mod failover_tests;

#[cfg(test)]
mod middleware_chain_tests;

#[cfg(test)]
mod rate_limit_tests;

/// Mock infrastructure for testing.
pub mod mock_infrastructure;
