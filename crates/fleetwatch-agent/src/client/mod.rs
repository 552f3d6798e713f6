//! Collection service client
//!
//! Pairs the HTTP transport with the service endpoints and this host's description.

mod http;

pub use http::{HttpClient, AUTH_HEADER};

use crate::config::ServerSettings;
use crate::error::AgentResult;
use crate::identity::Credential;
use crate::types::{DeleteRequest, DeviceInfo, RegisterRequest, ServerResponse};
use serde::Serialize;

/// Endpoints of the collection service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub register: String,
    pub delete: String,
}

impl Endpoints {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            register: settings.register_url(),
            delete: settings.delete_url(),
        }
    }
}

/// Client for the collection service
pub struct CollectorClient {
    http: HttpClient,
    endpoints: Endpoints,
    device: DeviceInfo,
}

impl CollectorClient {
    /// Create a client for the configured service
    pub fn new(settings: &ServerSettings, device: DeviceInfo) -> AgentResult<Self> {
        let http = HttpClient::new(settings.http_timeout(), settings.register_timeout())?;
        Ok(Self {
            http,
            endpoints: Endpoints::from_settings(settings),
            device,
        })
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// `POST /register`
    pub async fn register(&self, device_id: &str) -> AgentResult<ServerResponse> {
        let request = RegisterRequest::new(device_id, &self.device);
        self.http.register(&self.endpoints.register, &request).await
    }

    /// `POST /report` to `url`
    pub async fn report<T: Serialize + ?Sized>(
        &self,
        url: &str,
        credential: &Credential,
        body: &T,
    ) -> AgentResult<ServerResponse> {
        self.http.report(url, credential.as_str(), body).await
    }

    /// `POST /delete`
    pub async fn notify_deletion(
        &self,
        device_id: &str,
        credential: &Credential,
        timestamp: i64,
    ) -> AgentResult<()> {
        let request = DeleteRequest::new(device_id, &self.device, timestamp);
        self.http
            .notify_deletion(&self.endpoints.delete, credential.as_str(), &request)
            .await
    }
}
