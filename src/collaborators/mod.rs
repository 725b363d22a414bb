//! External media collaborators: the transcoding service and the video host.
//!
//! Both sit behind traits so tests and deployments without a media stack can
//! swap them out. Neither ever touches the ledger.

mod hosting;
mod transcoder;

pub use hosting::HttpVideoHost;
pub use transcoder::HttpTranscoder;

use std::sync::Arc;
use std::time::Duration;

pub use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::config::CollaboratorConfig;
use crate::error::AppError;
use crate::models::EditOperation;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("{service} request failed: {message}")]
    Transport { service: &'static str, message: String },

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} sent an unexpected response: {message}")]
    InvalidResponse { service: &'static str, message: String },
}

impl CollaboratorError {
    /// Network failures, 429 and 5xx are worth retrying. Everything else is not.
    pub fn is_transient(&self) -> bool {
        match self {
            CollaboratorError::Transport { .. } => true,
            CollaboratorError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<CollaboratorError> for AppError {
    fn from(e: CollaboratorError) -> Self {
        match e {
            CollaboratorError::NotConfigured(_) => AppError::Unprocessable(e.to_string()),
            _ => AppError::Upstream(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscodeStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodePoll {
    pub status: TranscodeStatus,
    pub result_ref: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostedVideo {
    pub video_id: String,
    pub url: String,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Queue a job. Returns the transcoder's job id.
    async fn submit(&self, source_ref: &str, operations: &[EditOperation]) -> Result<String, CollaboratorError>;

    async fn poll(&self, job_id: &str) -> Result<TranscodePoll, CollaboratorError>;
}

#[async_trait]
pub trait VideoHost: Send + Sync {
    /// Upload a processed asset. Returns the host's video id and playback URL.
    async fn upload(&self, asset_ref: &str, title: &str) -> Result<HostedVideo, CollaboratorError>;
}

/// Stand-in used when no media stack is configured.
pub struct Unconfigured;

#[async_trait]
impl Transcoder for Unconfigured {
    async fn submit(&self, _: &str, _: &[EditOperation]) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::NotConfigured("transcoder"))
    }

    async fn poll(&self, _: &str) -> Result<TranscodePoll, CollaboratorError> {
        Err(CollaboratorError::NotConfigured("transcoder"))
    }
}

#[async_trait]
impl VideoHost for Unconfigured {
    async fn upload(&self, _: &str, _: &str) -> Result<HostedVideo, CollaboratorError> {
        Err(CollaboratorError::NotConfigured("video host"))
    }
}

/// Build clients from configuration, falling back to [`Unconfigured`].
pub fn from_config(config: &CollaboratorConfig) -> (Arc<dyn Transcoder>, Arc<dyn VideoHost>) {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new());

    let transcoder: Arc<dyn Transcoder> = match &config.transcoder_url {
        Some(url) => Arc::new(HttpTranscoder::new(
            client.clone(),
            url,
            config.transcoder_api_key.clone(),
        )),
        None => {
            tracing::info!("TRANSCODER_URL not set, media processing disabled");
            Arc::new(Unconfigured)
        }
    };

    let video_host: Arc<dyn VideoHost> = match &config.video_host_url {
        Some(url) => Arc::new(HttpVideoHost::new(client, url, config.video_host_token.clone())),
        None => {
            tracing::info!("VIDEO_HOST_URL not set, uploads disabled");
            Arc::new(Unconfigured)
        }
    };

    (transcoder, video_host)
}

/// Turn a non-success response into a [`CollaboratorError::Status`].
async fn check_status(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, CollaboratorError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(CollaboratorError::Status {
        service,
        status,
        body,
    })
}

fn transport(service: &'static str) -> impl Fn(reqwest::Error) -> CollaboratorError {
    move |e| CollaboratorError::Transport {
        service,
        message: e.to_string(),
    }
}

fn invalid(service: &'static str) -> impl Fn(reqwest::Error) -> CollaboratorError {
    move |e| CollaboratorError::InvalidResponse {
        service,
        message: e.to_string(),
    }
}
