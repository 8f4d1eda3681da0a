//! HTTP client for the portal attachment API.
//!
//! Implements [`AttachmentApi`] over the REST endpoints under
//! `{base_url}{api_prefix}/work-orders/{id}/attachments`. Non-2xx responses
//! become [`PortalError`]s carrying the server's `message` (or `error`)
//! field, or a generic message when the body has none.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mp_attachments::{Attachment, AttachmentApi, CreateAttachmentRequest};
use mp_core::config::ApiConfig;
use mp_core::{PortalError, PortalResult, GENERIC_FAILURE_MESSAGE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, instrument, warn};
use url::Url;

#[derive(Clone, Debug)]
pub struct HttpAttachmentApi {
    client: Client,
    base_url: Url,
    prefix: Vec<String>,
    token: Option<String>,
}

impl HttpAttachmentApi {
    pub fn new(
        base_url: &str,
        api_prefix: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> PortalResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PortalError::Config(format!("invalid API URL {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(PortalError::Config(format!(
                "API URL {} cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortalError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            prefix: api_prefix
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn from_config(config: &ApiConfig) -> PortalResult<Self> {
        Self::new(
            &config.base_url,
            &config.api_prefix,
            config.token.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    /// `{base}{prefix}/work-orders/{id}/attachments/{tail..}`, every segment
    /// percent-encoded.
    pub fn attachments_url(&self, work_order_id: &str, tail: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(self.prefix.iter().map(String::as_str))
                .extend(["work-orders", work_order_id, "attachments"])
                .extend(tail.iter().copied());
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> PortalResult<Response> {
        let response = self.authorize(request).send().await.map_err(|e| {
            warn!(error = %e, "Request to portal failed");
            PortalError::Transport {
                status: e.status().map(|s| s.as_u16()),
                message: GENERIC_FAILURE_MESSAGE.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = server_message(&body).unwrap_or_default();
        debug!(status = status.as_u16(), message = %message, "Portal returned an error");
        Err(PortalError::from_status(status.as_u16(), message))
    }
}

/// The `message` or `error` field of a JSON error body.
fn server_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}

fn invalid_body(e: reqwest::Error) -> PortalError {
    PortalError::Internal(format!("unexpected response body: {}", e))
}

#[async_trait]
impl AttachmentApi for HttpAttachmentApi {
    #[instrument(skip(self))]
    async fn list_attachments(&self, work_order_id: &str) -> PortalResult<Vec<Attachment>> {
        let url = self.attachments_url(work_order_id, &[]);
        let response = self.send(self.client.get(url)).await?;
        response.json().await.map_err(invalid_body)
    }

    #[instrument(skip(self, request), fields(file = %request.file.name()))]
    async fn create_attachment(
        &self,
        work_order_id: &str,
        request: CreateAttachmentRequest,
    ) -> PortalResult<Attachment> {
        let data = request.file.read().await.map_err(|e| {
            PortalError::Internal(format!("failed to read {}: {}", request.file.name(), e))
        })?;

        let part = Part::bytes(data.to_vec())
            .file_name(request.file.name().to_string())
            .mime_str(&request.file.content_type())
            .map_err(|e| PortalError::Internal(format!("invalid content type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("category", request.category.as_str().to_string())
            .text("kind", request.kind.as_str().to_string())
            .text("camNumber", request.cam_number);

        let url = self.attachments_url(work_order_id, &[]);
        let response = self.send(self.client.post(url).multipart(form)).await?;
        response.json().await.map_err(invalid_body)
    }

    #[instrument(skip(self))]
    async fn delete_attachment(&self, work_order_id: &str, filename: &str) -> PortalResult<()> {
        let url = self.attachments_url(work_order_id, &[filename]);
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn download_attachment(
        &self,
        work_order_id: &str,
        filename: &str,
    ) -> PortalResult<Bytes> {
        let url = self.attachments_url(work_order_id, &[filename, "download"]);
        let response = self.send(self.client.get(url)).await?;
        response.bytes().await.map_err(invalid_body)
    }
}
