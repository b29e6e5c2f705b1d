//! # Portico Core
//!
//! Core library for the Portico multi-tenant API gateway.
//!
//! This crate provides the foundational components for:
//!
//! - **[`ratelimit`]**: Per-key token-bucket admission control with background
//!   reclamation of idle buckets.
//!
//! - **[`breaker`]**: Per-upstream circuit breakers with a three-state machine
//!   (closed, open, half-open) and bounded half-open probing.
//!
//! - **[`cache`]**: Two-level caching with a cost-bounded in-process L1 in
//!   front of a pooled Redis L2.
//!
//! - **[`auth`]**: Opaque bearer-token verification against the auth
//!   collaborator, verified-token caching, internal token minting, and
//!   wildcard permission evaluation.
//!
//! - **[`proxy`]**: Dynamic reverse-proxy dispatch with service resolution,
//!   bounded retries, and a tenant-aware failover chain.
//!
//! - **[`health`]**: Concurrent dependency health aggregation under a shared
//!   deadline.
//!
//! - **[`metrics`]**: Prometheus metrics collection behind a thin facade.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Middleware Pipeline                      │
//! │  ┌────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ RateLimiter│  │ TokenVerifier│  │    MetricsCollector  │  │
//! │  └─────┬──────┘  └──────┬───────┘  └──────────┬───────────┘  │
//! │        │                │                     │              │
//! │        │         ┌──────▼───────┐      ┌──────▼──────┐       │
//! │        │         │  TieredCache │      │  Prometheus │       │
//! │        │         │  (L1 + L2)   │      │   Exporter  │       │
//! │        │         └──────────────┘      └─────────────┘       │
//! └────────┼─────────────────────────────────────────────────────┘
//!          ▼
//! ┌──────────────────┐     ┌─────────────────┐
//! │    Dispatcher    │────▶│ BreakerRegistry │
//! │ (resolve/forward │     └─────────────────┘
//! │  retry/failover) │
//! └──────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! Middleware Pipeline ── reject ──▶ Structured error envelope
//!       │ admit
//!       ▼
//! Dispatcher ──▶ resolve logical service ──▶ breaker-guarded forward
//!       │                                         │ failure
//!       ▼                                         ▼
//! Upstream response                    Failover chain (tenant default →
//! (streamed back unmodified)           system default → login redirect)
//! ```

pub mod auth;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod context;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod proxy;
pub mod ratelimit;
