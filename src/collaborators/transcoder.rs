use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    CollaboratorError, TranscodePoll, Transcoder, async_trait, check_status, invalid, transport,
};
use crate::models::EditOperation;
use crate::util::{RETRY_DELAYS_MS, retry_with_backoff};

const SERVICE: &str = "transcoder";

#[derive(Serialize)]
struct SubmitJobRequest<'a> {
    source_ref: &'a str,
    operations: &'a [EditOperation],
}

#[derive(Deserialize)]
struct SubmitJobResponse {
    job_id: String,
}

/// JSON-over-HTTP transcoding service: `POST /jobs`, `GET /jobs/{id}`.
pub struct HttpTranscoder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTranscoder {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl Transcoder for HttpTranscoder {
    async fn submit(&self, source_ref: &str, operations: &[EditOperation]) -> Result<String, CollaboratorError> {
        let url = format!("{}/jobs", self.base_url);
        let body = SubmitJobRequest {
            source_ref,
            operations,
        };
        let (url, body) = (&url, &body);

        // A retried submit could queue a duplicate job; only network-level
        // failures before a response are retried.
        let response = retry_with_backoff(
            "transcoder submit",
            RETRY_DELAYS_MS,
            |e: &CollaboratorError| matches!(e, CollaboratorError::Transport { .. }),
            move || async move {
                let response = self
                    .authorize(self.client.post(url).json(body))
                    .send()
                    .await
                    .map_err(transport(SERVICE))?;
                check_status(SERVICE, response).await
            },
        )
        .await?;

        let parsed: SubmitJobResponse = response.json().await.map_err(invalid(SERVICE))?;
        tracing::info!("Transcoder accepted {} as job {}", source_ref, parsed.job_id);
        Ok(parsed.job_id)
    }

    async fn poll(&self, job_id: &str) -> Result<TranscodePoll, CollaboratorError> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let url = &url;
        let response = retry_with_backoff(
            "transcoder poll",
            RETRY_DELAYS_MS,
            CollaboratorError::is_transient,
            move || async move {
                let response = self
                    .authorize(self.client.get(url))
                    .send()
                    .await
                    .map_err(transport(SERVICE))?;
                check_status(SERVICE, response).await
            },
        )
        .await?;

        response.json().await.map_err(invalid(SERVICE))
    }
}
