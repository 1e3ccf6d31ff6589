//! Submitting prompts to the generation service.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::types::{CorrelationId, GenerationRequest, GenerationResponse};
use super::workspace::Workspace;
use crate::errors::DispatchError;

/// Abstraction over the remote generation service.
/// Real implementation: `HttpGenerationClient`.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
    -> Result<GenerationResponse, DispatchError>;
}

#[derive(Serialize)]
struct PromptBody<'a> {
    prompt: &'a str,
}

/// Largest response body accepted from the generation service.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// POSTs `{"prompt": ...}` as JSON to a configured endpoint.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
    max_body: usize,
}

impl HttpGenerationClient {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("slidesmith/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            max_body: MAX_RESPONSE_BYTES,
        })
    }

    /// Refuse response bodies longer than `bytes`.
    pub fn with_max_body(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, DispatchError> {
        let mut resp = self
            .client
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(&PromptBody {
                prompt: &request.prompt,
            })
            .send()
            .await
            .map_err(|e| classify_reqwest(e, request.timeout))?;

        let status = resp.status().as_u16();
        let too_large = DispatchError::ResponseTooLarge {
            limit: self.max_body,
        };
        if resp
            .content_length()
            .is_some_and(|len| len > self.max_body as u64)
        {
            return Err(too_large);
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| classify_reqwest(e, request.timeout))?
        {
            if body.len() + chunk.len() > self.max_body {
                tracing::warn!(limit = self.max_body, "generation response too large");
                return Err(too_large);
            }
            body.extend_from_slice(&chunk);
        }

        Ok(GenerationResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

fn classify_reqwest(err: reqwest::Error, timeout: Duration) -> DispatchError {
    if err.is_timeout() {
        return DispatchError::Timeout { after: timeout };
    }
    // reqwest's Display omits the underlying cause (DNS, refused, TLS...).
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    DispatchError::Network(message)
}

/// Owns correlation-id allocation, workspace creation and the network call.
pub struct RequestDispatcher {
    client: Arc<dyn GenerationClient>,
    workspace_root: PathBuf,
    timeout: Duration,
}

impl RequestDispatcher {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        workspace_root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            workspace_root: workspace_root.into(),
            timeout,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Validate the prompt, allocate a correlation id and create its workspace.
    ///
    /// Creating the workspace directory is the only filesystem change made
    /// before the service responds.
    pub fn prepare(&self, prompt: &str) -> Result<(GenerationRequest, Workspace), DispatchError> {
        if prompt.trim().is_empty() {
            return Err(DispatchError::EmptyPrompt);
        }
        let correlation_id = CorrelationId::new();
        let workspace = Workspace::create(&self.workspace_root, correlation_id)?;
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            correlation_id,
            timeout: self.timeout,
        };
        Ok((request, workspace))
    }

    /// Send the request, bounded by its timeout and abortable via `cancel`.
    ///
    /// Cancelling drops the in-flight request future, which closes the
    /// connection rather than merely ignoring the reply.
    pub async fn dispatch(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResponse, DispatchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DispatchError::Cancelled),
            result = tokio::time::timeout(request.timeout, self.client.generate(request)) => {
                match result {
                    Ok(response) => response,
                    Err(_) => Err(DispatchError::Timeout { after: request.timeout }),
                }
            }
        }
    }
}
