//! HTTP transport for the collection service
//!
//! Handles the register, report and delete calls.

use crate::error::{AgentError, AgentResult};
use crate::types::{ApiError, DeleteRequest, RegisterRequest, ServerResponse, DEVICE_DELETED_CODE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Header carrying the device credential
pub const AUTH_HEADER: &str = "X-Auth-Token";

/// HTTP client for the collection service
pub struct HttpClient {
    client: Client,
    request_timeout: Duration,
    register_timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(request_timeout: Duration, register_timeout: Duration) -> AgentResult<Self> {
        let client = Client::builder()
            .user_agent(format!("fleetwatch/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            request_timeout,
            register_timeout,
        })
    }

    /// Register the device
    pub async fn register(
        &self,
        url: &str,
        request: &RegisterRequest,
    ) -> AgentResult<ServerResponse> {
        debug!(endpoint = %url, client_id = %request.client_id, "Registering device");

        let response = self
            .client
            .post(url)
            .timeout(self.register_timeout)
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        self.handle_response(url, response).await
    }

    /// Post a single sample or a batch of samples
    pub async fn report<T: Serialize + ?Sized>(
        &self,
        url: &str,
        token: &str,
        body: &T,
    ) -> AgentResult<ServerResponse> {
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header(AUTH_HEADER, token)
            .json(body)
            .send()
            .await
            .map_err(send_error)?;

        self.handle_response(url, response).await
    }

    /// Tell the service this device is leaving
    pub async fn notify_deletion(
        &self,
        url: &str,
        token: &str,
        request: &DeleteRequest,
    ) -> AgentResult<()> {
        debug!(endpoint = %url, client_id = %request.client_id, "Sending deletion notice");

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .header(AUTH_HEADER, token)
            .json(request)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error = parse_error(response).await;
        Err(AgentError::server(
            status.as_u16(),
            error.message.unwrap_or_else(|| "Unknown error".to_string()),
        ))
    }

    /// Map an HTTP response onto the protocol
    ///
    /// A 2xx body must be a JSON response object. A 403 carrying the
    /// device-deleted error code becomes a `deleted` response rather than an error.
    async fn handle_response(
        &self,
        url: &str,
        response: reqwest::Response,
    ) -> AgentResult<ServerResponse> {
        let status = response.status();

        if status.is_success() {
            let body = response.text().await.map_err(send_error)?;
            return serde_json::from_str::<ServerResponse>(&body).map_err(|e| {
                error!(endpoint = %url, %status, "Malformed response body: {}", e);
                AgentError::protocol(format!("malformed response from {}: {}", url, e))
            });
        }

        let error = parse_error(response).await;
        let message = error
            .message
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());

        if status == StatusCode::FORBIDDEN
            && error.error_code.as_deref() == Some(DEVICE_DELETED_CODE)
        {
            warn!(endpoint = %url, "Service reports this device as deleted");
            return Ok(ServerResponse::deleted_signal(error.message));
        }

        if status.is_server_error() {
            error!(endpoint = %url, %status, "Server error: {}", message);
        } else {
            warn!(endpoint = %url, %status, "Request failed: {}", message);
        }
        Err(AgentError::server(status.as_u16(), message))
    }
}

fn send_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout
    } else {
        AgentError::Transport(e)
    }
}

async fn parse_error(response: reqwest::Response) -> ApiError {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<ApiError>(&text).unwrap_or_else(|_| ApiError {
        error_code: None,
        message: (!text.trim().is_empty()).then(|| text.trim().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceInfo;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(Duration::from_secs(5), Duration::from_secs(5)).unwrap()
    }

    fn info() -> DeviceInfo {
        DeviceInfo {
            hostname: "edge-01".to_string(),
            os: "Linux".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_posts_device_info() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/register"))
            .and(body_json(json!({"client_id": "dev-1", "hostname": "edge-01", "os": "Linux"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "pending"})))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/api/agent/register", server.uri());
        let response = client()
            .register(&url, &RegisterRequest::new("dev-1", &info()))
            .await
            .unwrap();
        assert_eq!(response.status.as_deref(), Some("pending"));
    }

    #[tokio::test]
    async fn test_report_sends_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agent/report"))
            .and(header(AUTH_HEADER, "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "accepted"})))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/api/agent/report", server.uri());
        let response = client().report(&url, "tok", &json!([{"n": 1}])).await.unwrap();
        assert_eq!(response.status.as_deref(), Some("accepted"));
    }

    #[tokio::test]
    async fn test_forbidden_device_deleted_is_signal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(json!({"error_code": "DEVICE_DELETED", "message": "gone"})),
            )
            .mount(&server)
            .await;

        let response = client().report(&server.uri(), "tok", &json!({})).await.unwrap();
        assert!(response.is_device_deleted());
    }

    #[tokio::test]
    async fn test_other_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/forbidden"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"detail": "nope"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client()
            .report(&format!("{}/forbidden", server.uri()), "t", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Server { status: 403, ref message } if message == "nope"));

        let err = client()
            .report(&format!("{}/broken", server.uri()), "t", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Nothing listens on port 9 of localhost
        let err = client()
            .report("http://127.0.0.1:9/api/agent/report", "t", &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
