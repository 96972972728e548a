//! HTTP provider speaking the OpenAI-compatible speech and image APIs.
//!
//! One shared `reqwest` client with a hard per-request timeout. Failures
//! are classified (rate limit, quota, timeout, status) and surfaced as-is:
//! retrying is the caller's decision.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{AssetProvider, AudioArtifact, ImageArtifact, ProviderError, Service};

/// Longest error body kept in a [`ProviderError::Status`].
const MAX_ERROR_BODY: usize = 300;

/// Endpoint and credential settings for [`HttpAssetProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Text-to-speech endpoint
    pub narration_url: String,
    /// Speech model name sent with each request
    pub narration_model: String,
    /// Bearer token for the speech endpoint
    pub narration_api_key: Option<String>,
    /// Image generation endpoint
    pub image_url: String,
    /// Image model name sent with each request
    pub image_model: String,
    /// Bearer token for the image endpoint
    pub image_api_key: Option<String>,
    /// Requested image size (portrait for vertical video)
    pub image_size: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            narration_url: "https://api.openai.com/v1/audio/speech".to_string(),
            narration_model: "tts-1".to_string(),
            narration_api_key: None,
            image_url: "https://api.openai.com/v1/images/generations".to_string(),
            image_model: "dall-e-3".to_string(),
            image_api_key: None,
            image_size: "1024x1792".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    /// Use the same bearer token for both endpoints
    #[must_use]
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.narration_api_key = Some(key.to_string());
        self.image_api_key = Some(key.to_string());
        self
    }

    /// Point both endpoints at another base URL (e.g. a local gateway)
    #[must_use]
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.narration_url = format!("{base}/v1/audio/speech");
        self.image_url = format!("{base}/v1/images/generations");
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u8,
    response_format: &'static str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// [`AssetProvider`] backed by HTTP APIs.
pub struct HttpAssetProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpAssetProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .use_rustls_tls()
            .gzip(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Transport {
                service: Service::Narration,
                message: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        key: Option<&String>,
    ) -> reqwest::RequestBuilder {
        match key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn fetch_image_url(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(Service::Image, &e, self.config.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(Service::Image, status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(Service::Image, &e, self.config.timeout()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AssetProvider for HttpAssetProvider {
    #[instrument(skip(self, text), fields(chars = text.len()))]
    async fn synthesize_narration(
        &self,
        text: &str,
        voice_id: &str,
        dest: &Path,
    ) -> Result<AudioArtifact, ProviderError> {
        let service = Service::Narration;
        let body = SpeechRequest {
            model: &self.config.narration_model,
            input: text,
            voice: voice_id,
            response_format: "mp3",
        };

        let request = self.client.post(&self.config.narration_url).json(&body);
        let response = self
            .authorized(request, self.config.narration_api_key.as_ref())
            .send()
            .await
            .map_err(|e| transport_error(service, &e, self.config.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(service, status, &body));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| transport_error(service, &e, self.config.timeout()))?;
        if audio.is_empty() {
            return Err(ProviderError::InvalidResponse {
                service,
                message: "empty audio body".to_string(),
            });
        }

        tokio::fs::write(dest, &audio)
            .await
            .map_err(|source| ProviderError::Io { service, source })?;

        info!("Narration written: {} bytes -> {}", audio.len(), dest.display());
        Ok(AudioArtifact {
            path: dest.to_path_buf(),
            bytes: audio.len() as u64,
        })
    }

    #[instrument(skip(self, prompt))]
    async fn synthesize_image(
        &self,
        prompt: &str,
        dest: &Path,
    ) -> Result<ImageArtifact, ProviderError> {
        let service = Service::Image;
        let timeout = self.config.timeout();

        // One bound covers generation plus any follow-up download
        let image = tokio::time::timeout(timeout, self.request_image(prompt))
            .await
            .map_err(|_| ProviderError::Timeout {
                service,
                after: timeout,
            })??;

        tokio::fs::write(dest, &image)
            .await
            .map_err(|source| ProviderError::Io { service, source })?;

        info!("Image written: {} bytes -> {}", image.len(), dest.display());
        Ok(ImageArtifact {
            path: dest.to_path_buf(),
            bytes: image.len() as u64,
        })
    }
}

impl HttpAssetProvider {
    /// Generate one image and return its bytes, downloading it when the
    /// API answers with a URL.
    async fn request_image(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let service = Service::Image;
        let body = ImageRequest {
            model: &self.config.image_model,
            prompt,
            size: &self.config.image_size,
            n: 1,
            response_format: "b64_json",
        };

        let request = self.client.post(&self.config.image_url).json(&body);
        let response = self
            .authorized(request, self.config.image_api_key.as_ref())
            .send()
            .await
            .map_err(|e| transport_error(service, &e, self.config.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(service, status, &body));
        }

        let parsed: ImageResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    service,
                    message: e.to_string(),
                })?;

        match parsed.data.into_iter().next() {
            Some(ImageData {
                b64_json: Some(encoded),
                ..
            }) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| ProviderError::InvalidResponse {
                    service,
                    message: format!("bad base64 image: {e}"),
                }),
            Some(ImageData { url: Some(url), .. }) => {
                debug!("Downloading generated image from {}", url);
                self.fetch_image_url(&url).await
            }
            _ => Err(ProviderError::InvalidResponse {
                service,
                message: "response contained no image".to_string(),
            }),
        }
    }
}

/// Map a non-success response to a [`ProviderError`].
pub(crate) fn classify_status(service: Service, status: StatusCode, body: &str) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let lowered = body.to_ascii_lowercase();
        // Some gateways report exhausted quota as 429.
        if service == Service::Image && mentions_quota(&lowered) {
            return ProviderError::QuotaExhausted { service };
        }
        return ProviderError::RateLimited { service };
    }

    if status == StatusCode::PAYMENT_REQUIRED
        || (service == Service::Image && mentions_quota(&body.to_ascii_lowercase()))
    {
        return ProviderError::QuotaExhausted { service };
    }

    ProviderError::Status {
        service,
        status: status.as_u16(),
        body: truncate(body.trim(), MAX_ERROR_BODY),
    }
}

fn mentions_quota(lowered: &str) -> bool {
    ["quota", "credit", "billing", "insufficient_balance"]
        .iter()
        .any(|needle| lowered.contains(needle))
}

fn transport_error(service: Service, err: &reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            service,
            after: timeout,
        }
    } else {
        ProviderError::Transport {
            service,
            message: err.to_string(),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
