//! HTTP client for the auth collaborator.

use super::{AuthApi, AuthError, VerifiedToken};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct VerifyTokenRequest<'a> {
    token: &'a str,
}

/// Auth collaborator client speaking JSON over HTTP.
///
/// The collaborator exposes `POST {base}/internal/tokens/verify` taking
/// `{"token": "..."}` and answering with the verified-token record.
pub struct HttpAuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthClient {
    /// # Errors
    ///
    /// Returns [`AuthError::Unavailable`] when the underlying client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::Unavailable(format!("auth client build failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthClient {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let url = format!("{}/internal/tokens/verify", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&VerifyTokenRequest { token })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Unavailable("auth service timed out".to_string())
                } else {
                    AuthError::Unavailable("auth service unreachable".to_string())
                }
            })?;

        match response.status() {
            status if status.is_success() => response
                .json::<VerifiedToken>()
                .await
                .map_err(|e| AuthError::Service(format!("malformed verify response: {e}"))),
            status if status.as_u16() == 401 || status.as_u16() == 403 => {
                Err(AuthError::InvalidToken)
            }
            status => Err(AuthError::Service(format!(
                "verify returned status {status}"
            ))),
        }
    }
}
