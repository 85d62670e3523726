//! Validator transport.

use async_trait::async_trait;

use crate::envelope::ReplayValidationResponse;
use crate::error::{RemoteError, TransportError};

/// One submission of an envelope body to a validator.
#[async_trait]
pub trait ReplayTransport: Send + Sync {
    async fn submit(&self, endpoint: &str, body: Vec<u8>) -> Result<ReplayValidationResponse, TransportError>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("parity-remote/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ReplayTransport for HttpTransport {
    async fn submit(&self, endpoint: &str, body: Vec<u8>) -> Result<ReplayValidationResponse, TransportError> {
        let resp = self
            .http
            .post(endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout(0)
                } else {
                    TransportError::Connection(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<ReplayValidationResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}
