//! Reusable mocks: HTTP upstreams on ephemeral ports and an auth
//! collaborator with call counting.

mod auth_mock;
mod test_helpers;

pub use auth_mock::MockAuthApi;
pub use test_helpers::{build_state, gateway_config, sample_record, send, TEST_JWT_SECRET};
pub use upstream_mock::MockUpstream;
