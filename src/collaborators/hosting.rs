use reqwest::Client;
use serde::Serialize;

use super::{CollaboratorError, HostedVideo, VideoHost, async_trait, check_status, invalid, transport};
use crate::util::{RETRY_DELAYS_MS, retry_with_backoff};

const SERVICE: &str = "video host";

#[derive(Serialize)]
struct UploadRequest<'a> {
    source_url: &'a str,
    title: &'a str,
}

/// Video hosting API: `POST /videos` pulls the asset from `source_url`.
pub struct HttpVideoHost {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpVideoHost {
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[async_trait]
impl VideoHost for HttpVideoHost {
    async fn upload(&self, asset_ref: &str, title: &str) -> Result<HostedVideo, CollaboratorError> {
        let url = format!("{}/videos", self.base_url);
        let body = UploadRequest {
            source_url: asset_ref,
            title,
        };
        let (url, body) = (&url, &body);

        let response = retry_with_backoff(
            "video upload",
            RETRY_DELAYS_MS,
            |e: &CollaboratorError| matches!(e, CollaboratorError::Transport { .. }),
            move || async move {
                let mut request = self.client.post(url).json(body);
                if let Some(token) = &self.token {
                    request = request.bearer_auth(token);
                }
                let response = request.send().await.map_err(transport(SERVICE))?;
                check_status(SERVICE, response).await
            },
        )
        .await?;

        let video: HostedVideo = response.json().await.map_err(invalid(SERVICE))?;
        tracing::info!("Uploaded {} as hosted video {}", asset_ref, video.video_id);
        Ok(video)
    }
}
