//! Deployment notifier: the control-plane `ensure` call.

use async_trait::async_trait;
use gradeflow_core::{DeploymentRequest, GradeflowError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Successful control-plane response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyReceipt {
    pub status: u16,
    /// Raw response body, kept for the run report. Not interpreted.
    pub body: String,
}

/// Asks a control plane to ensure a grading function runs a given image.
///
/// Calls carry ensure-semantics: repeating one with the same request must
/// converge to the same deployed state.
#[async_trait]
pub trait DeploymentNotifier: Send + Sync {
    /// POST `request` to `url`. Any non-2xx response is a
    /// [`GradeflowError::Notify`]; there is no retry.
    async fn ensure(&self, url: &str, request: &DeploymentRequest) -> Result<NotifyReceipt>;
}

/// [`DeploymentNotifier`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    /// Create a notifier; `timeout` bounds each request end to end.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("gradeflow/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            GradeflowError::InvalidSettings(format!("failed to create HTTP client: {e}"))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeploymentNotifier for HttpNotifier {
    async fn ensure(&self, url: &str, request: &DeploymentRequest) -> Result<NotifyReceipt> {
        info!(
            url = %url,
            function = %request.function_name,
            image = %request.docker_image_uri,
            "Ensuring grading function"
        );

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| GradeflowError::Notify {
                status: None,
                message: format!("request to {url} failed: {e}"),
            })?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    url = %url,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read control-plane response body"
                );
                String::new()
            }
        };
        debug!(status = status.as_u16(), body = %body, "Control plane responded");

        if !status.is_success() {
            return Err(GradeflowError::Notify {
                status: Some(status.as_u16()),
                message: format!("{url} returned {status}: {}", truncate(&body, MAX_ERROR_BODY)),
            });
        }

        Ok(NotifyReceipt {
            status: status.as_u16(),
            body,
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
