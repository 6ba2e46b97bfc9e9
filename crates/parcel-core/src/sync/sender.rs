//! Remote sender
//!
//! Delivers one address to the delivery API: `POST {api_url}/delivery` with
//! a JSON body `{"address": "..."}`. Any 2xx is a success; the response
//! body is read opportunistically and never changes the verdict.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Why a send did not succeed
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl SendError {
    /// Timeouts and transport failures suggest the device went offline
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SendError::Timeout(_) | SendError::Network(_))
    }
}

/// A successful send
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub status: u16,
    /// Parsed JSON body, when the server returned one
    pub body: Option<serde_json::Value>,
}

/// One-shot transmission of an address to the remote API
#[async_trait]
pub trait RemoteSender: Send + Sync {
    async fn send(&self, address: &str) -> Result<SendReceipt, SendError>;
}

#[derive(Serialize)]
struct DeliveryPayload<'a> {
    address: &'a str,
}

/// HTTP implementation of [`RemoteSender`]
pub struct HttpSender {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSender {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SendError> {
        Self::new(config.delivery_endpoint(), config.sync.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(&self, error: reqwest::Error) -> SendError {
        if error.is_timeout() {
            warn!(endpoint = %self.endpoint, timeout = ?self.timeout, "Delivery API request timed out");
            SendError::Timeout(self.timeout)
        } else if error.is_builder() {
            warn!(error = %error, "Invalid delivery API request");
            SendError::Client(error.to_string())
        } else {
            warn!(endpoint = %self.endpoint, error = %error, "Delivery API unreachable");
            SendError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl RemoteSender for HttpSender {
    async fn send(&self, address: &str) -> Result<SendReceipt, SendError> {
        debug!(endpoint = %self.endpoint, address, "Sending delivery address");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&DeliveryPayload { address })
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Delivery API rejected address");
            return Err(SendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = match response.json::<serde_json::Value>().await {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "Delivery API response had no JSON body");
                None
            }
        };

        info!(status = status.as_u16(), "Delivery address sent");
        Ok(SendReceipt {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sender_for(server: &MockServer, timeout: Duration) -> HttpSender {
        HttpSender::new(format!("{}/delivery", server.uri()), timeout).unwrap()
    }

    #[tokio::test]
    async fn test_send_posts_json_address() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delivery"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({ "address": "Kyiv, branch 15" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = sender_for(&server, Duration::from_secs(5))
            .send("Kyiv, branch 15")
            .await
            .unwrap();

        assert_eq!(receipt.status, 201);
        assert_eq!(receipt.body, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn test_empty_body_is_still_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delivery"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let receipt = sender_for(&server, Duration::from_secs(5))
            .send("Kyiv")
            .await
            .unwrap();

        assert_eq!(receipt.status, 200);
        assert!(receipt.body.is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delivery"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = sender_for(&server, Duration::from_secs(5))
            .send("Kyiv")
            .await
            .unwrap_err();

        match &err {
            SendError::Rejected { status, body } => {
                assert_eq!(*status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_connectivity());
    }

    #[tokio::test]
    async fn test_client_error_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = sender_for(&server, Duration::from_secs(5))
            .send("Kyiv")
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = sender_for(&server, Duration::from_millis(100))
            .send("Kyiv")
            .await
            .unwrap_err();

        assert!(matches!(err, SendError::Timeout(_)));
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let sender = HttpSender::new(
            format!("http://127.0.0.1:{}/delivery", port),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = sender.send("Kyiv").await.unwrap_err();

        assert!(matches!(err, SendError::Network(_)));
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_from_config_uses_delivery_endpoint() {
        let config = Config {
            api_url: "http://10.0.2.2:3000/".to_string(),
            ..Config::default()
        };
        let sender = HttpSender::from_config(&config).unwrap();
        assert_eq!(sender.endpoint(), "http://10.0.2.2:3000/delivery");
    }
}
