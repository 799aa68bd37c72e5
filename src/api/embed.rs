use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::face::FacialArea;

/// One detected face as reported by the embedding service.
#[derive(Debug, Clone, Deserialize)]
pub struct FaceRecord {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub facial_area: Option<FacialArea>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbedResponse {
    Error { error: String },
    Faces(Vec<FaceRecord>),
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("embed request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("embed service returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("embed service error: {0}")]
    Service(String),
    #[error("embed service returned malformed payload: {0}")]
    Malformed(String),
}

impl EmbedError {
    /// Connection problems, timeouts and 5xx answers are worth another
    /// attempt; everything else (4xx, application errors, bad payloads)
    /// will fail identically on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbedError::Transport(e) => e.is_timeout() || e.is_connect(),
            EmbedError::Status(code) => code.is_server_error(),
            EmbedError::Service(_) | EmbedError::Malformed(_) => false,
        }
    }
}

/// Bounded exponential backoff for transient embed-service failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(500) }
    }
}

/// Client for the external face-detection/embedding service.
///
/// The service is a black box over HTTP: one multipart POST per image,
/// answering either a JSON array of face records or `{"error": "..."}`.
/// Responses are untrusted; numeric validation happens in the extractor.
pub struct EmbedClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl EmbedClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), retry })
    }

    /// Fetch the image from the media store and run one embed round trip,
    /// retrying transient failures with exponential backoff.
    pub async fn embed_media(&self, image_url: &str) -> Result<Vec<FaceRecord>, EmbedError> {
        let mut attempt = 0u32;
        loop {
            match self.try_embed(image_url).await {
                Ok(faces) => return Ok(faces),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "embed attempt failed: {e}; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_embed(&self, image_url: &str) -> Result<Vec<FaceRecord>, EmbedError> {
        let image = self.client.get(image_url).send().await?;
        if !image.status().is_success() {
            return Err(EmbedError::Status(image.status()));
        }
        let filename = image_url.rsplit('/').next().unwrap_or("image").to_string();
        let mime = mime_guess::from_path(&filename).first_or_octet_stream();
        let bytes = image.bytes().await?;

        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename)
            .mime_str(mime.essence_str())?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/embed", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EmbedError::Status(status));
        }

        let body = response.text().await?;
        match serde_json::from_str::<EmbedResponse>(&body) {
            Ok(EmbedResponse::Faces(faces)) => {
                debug!(count = faces.len(), "embed service returned face records");
                Ok(faces)
            }
            Ok(EmbedResponse::Error { error }) => Err(EmbedError::Service(error)),
            Err(e) => Err(EmbedError::Malformed(e.to_string())),
        }
    }
}
