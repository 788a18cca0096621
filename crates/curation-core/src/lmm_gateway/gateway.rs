use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::cache::CacheRegistry;
use super::error::LmmError;
use super::model_name::ModelName;
use super::parsing::parse_tolerant;
use super::request::{ContextCache, GenerateRequest, MediaPart, UploadState};
use super::retry::retry_with_backoff;

/// The seam the Batch Pipeline and Decision Feedback Store program against.
/// One implementation talks to the real model over HTTP; tests swap in a
/// `wiremock` server bound to the same base-URL shape.
#[async_trait]
pub trait LmmGateway: Send + Sync {
    async fn generate(&self, model: ModelName, request: GenerateRequest) -> Result<String, LmmError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LmmError>;

    async fn upload_for_processing(&self, bytes: Bytes, mime: &str) -> Result<String, LmmError>;

    async fn poll_upload_state(&self, handle: &str) -> Result<UploadState, LmmError>;

    /// Polls `handle` until `active` or `failed`, bounded by `timeout`.
    async fn wait_for_upload(
        &self,
        handle: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<(), LmmError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.poll_upload_state(handle).await? {
                UploadState::Active => return Ok(()),
                UploadState::Failed => {
                    return Err(LmmError::FileProcessingFailed(format!(
                        "handle {handle} reached failed state"
                    )))
                }
                UploadState::Processing => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LmmError::FileProcessingTimeout(timeout));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Best-effort deletion of a model-side upload handle once consumed.
    async fn delete_upload(&self, handle: &str);

    async fn get_or_create_cache(
        &self,
        session_id: &str,
        operation: &str,
        system_instruction: &str,
        media: &[MediaPart],
        ttl: Duration,
        min_cache_tokens: u64,
    ) -> Option<ContextCache>;

    async fn delete_cache(&self, cache_id: &str);

    /// Deletes every context cache still live for this session. The
    /// default no-op suits gateways with no cache registry of their own
    /// (test doubles); `HttpLmmGateway` overrides it to actually tear
    /// down the model-side caches it created.
    async fn evict_session_caches(&self, _session_id: &str) {}
}

/// Generates then runs the response through the tolerant parsing front-end,
/// for callers that need a typed result rather than raw text.
pub async fn generate_structured<G, T>(
    gateway: &G,
    model: ModelName,
    request: GenerateRequest,
) -> Result<T, LmmError>
where
    G: LmmGateway + ?Sized,
    T: DeserializeOwned,
{
    let raw = gateway.generate(model, request).await?;
    parse_tolerant(&raw)
}

pub struct HttpLmmGateway {
    client: Client,
    base_url: String,
    api_key: String,
    cache: CacheRegistry,
}

impl HttpLmmGateway {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            cache: CacheRegistry::new(),
        }
    }

    fn media_part_json(part: &MediaPart) -> Value {
        match part {
            MediaPart::Inline { bytes, mime } => json!({
                "inline_data": { "mime_type": mime, "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes) },
            }),
            MediaPart::PresignedUrl { url, mime } => json!({
                "file_data": { "mime_type": mime, "file_uri": url },
            }),
            MediaPart::ModelUpload { handle, mime } => json!({
                "file_data": { "mime_type": mime, "file_uri": handle },
            }),
        }
    }

    fn classify_error_status(status: StatusCode, body: &str) -> LmmError {
        match status {
            StatusCode::BAD_REQUEST => LmmError::InvalidArgument(body.to_string()),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => LmmError::PermissionDenied(body.to_string()),
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                LmmError::Transient(format!("{status}: {body}"))
            }
            _ => LmmError::Transient(format!("{status}: {body}")),
        }
    }
}

#[async_trait]
impl LmmGateway for HttpLmmGateway {
    #[instrument(skip(self, request), fields(model = %model), err)]
    async fn generate(&self, model: ModelName, request: GenerateRequest) -> Result<String, LmmError> {
        let mut parts: Vec<Value> = Vec::new();
        if let Some(reference) = &request.reference_image {
            parts.push(Self::media_part_json(reference));
        }
        for part in &request.media {
            parts.push(Self::media_part_json(part));
        }
        parts.push(json!({ "text": request.prompt }));

        let mut payload = json!({
            "model": model.as_str(),
            "system_instruction": { "parts": [{ "text": request.system_instruction }] },
            "contents": [{ "role": "user", "parts": parts }],
        });
        if let Some(cache_id) = &request.cache_id {
            payload["cachedContent"] = json!(cache_id);
        }

        retry_with_backoff(|| {
            let payload = payload.clone();
            async {
                let response = self
                    .client
                    .post(format!("{}/v1/models:generate", self.base_url))
                    .bearer_auth(&self.api_key)
                    .json(&payload)
                    .send()
                    .await?;

                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if !status.is_success() {
                    return Err(Self::classify_error_status(status, &body));
                }

                let parsed: Value = serde_json::from_str(&body)
                    .map_err(|_| LmmError::UnparseableResponse(body.clone()))?;
                parsed
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| LmmError::UnparseableResponse(body.clone()))
            }
        })
        .await
    }

    #[instrument(skip(self, text), err)]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LmmError> {
        let payload = json!({ "model": ModelName::Embedding.as_str(), "text": text });

        retry_with_backoff(|| {
            let payload = payload.clone();
            async {
                let response = self
                    .client
                    .post(format!("{}/v1/models:embed", self.base_url))
                    .bearer_auth(&self.api_key)
                    .json(&payload)
                    .send()
                    .await?;
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                if !status.is_success() {
                    return Err(Self::classify_error_status(status, &body));
                }
                let parsed: Value = serde_json::from_str(&body)
                    .map_err(|_| LmmError::UnparseableResponse(body.clone()))?;
                parsed
                    .get("embedding")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
                    .ok_or_else(|| LmmError::UnparseableResponse(body.clone()))
            }
        })
        .await
    }

    #[instrument(skip(self, bytes), err)]
    async fn upload_for_processing(&self, bytes: Bytes, mime: &str) -> Result<String, LmmError> {
        let response = self
            .client
            .post(format!("{}/v1/files:upload", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", mime.to_string())
            .body(bytes)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_error_status(status, &body));
        }
        let parsed: Value =
            serde_json::from_str(&body).map_err(|_| LmmError::UnparseableResponse(body.clone()))?;
        parsed
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LmmError::UnparseableResponse(body))
    }

    #[instrument(skip(self), err)]
    async fn poll_upload_state(&self, handle: &str) -> Result<UploadState, LmmError> {
        let response = self
            .client
            .get(format!("{}/v1/files/{handle}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::classify_error_status(status, &body));
        }
        let parsed: Value =
            serde_json::from_str(&body).map_err(|_| LmmError::UnparseableResponse(body.clone()))?;
        match parsed.get("state").and_then(Value::as_str) {
            Some("ACTIVE") => Ok(UploadState::Active),
            Some("FAILED") => Ok(UploadState::Failed),
            _ => Ok(UploadState::Processing),
        }
    }

    async fn delete_upload(&self, handle: &str) {
        if let Err(err) = self
            .client
            .delete(format!("{}/v1/files/{handle}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            tracing::warn!(%handle, error = %err, "failed to delete model-side upload handle");
        }
    }

    #[instrument(skip(self, system_instruction, media))]
    async fn get_or_create_cache(
        &self,
        session_id: &str,
        operation: &str,
        system_instruction: &str,
        media: &[MediaPart],
        ttl: Duration,
        min_cache_tokens: u64,
    ) -> Option<ContextCache> {
        if let Some(existing) = self.cache.get(session_id, operation) {
            return Some(existing);
        }

        // A rough proxy for token count: ~4 bytes/token for inline media,
        // enough to decide whether caching is worth the round trip.
        let approx_tokens: u64 = media
            .iter()
            .map(|part| match part {
                MediaPart::Inline { bytes, .. } => (bytes.len() as u64) / 4,
                _ => 0,
            })
            .sum();
        if approx_tokens < min_cache_tokens {
            return None;
        }

        let parts: Vec<Value> = media.iter().map(Self::media_part_json).collect();
        let payload = json!({
            "system_instruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "role": "user", "parts": parts }],
            "ttl": format!("{}s", ttl.as_secs()),
        });

        let response = match self
            .client
            .post(format!("{}/v1/cachedContents", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // Cache creation failures are non-fatal: the caller falls
                // back to inline context.
                tracing::warn!(error = %err, "context cache creation failed, falling back to inline context");
                return None;
            }
        };

        if !response.status().is_success() {
            return None;
        }

        let body: Value = response.json().await.ok()?;
        let cache_id = body.get("name").and_then(Value::as_str)?.to_string();
        let cache = ContextCache {
            cache_id,
            expires_at: chrono::Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
        };
        self.cache.put(session_id, operation, cache.clone());
        info!(session_id, operation, "created context cache");
        Some(cache)
    }

    async fn delete_cache(&self, cache_id: &str) {
        if let Err(err) = self
            .client
            .delete(format!("{}/v1/cachedContents/{cache_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            tracing::warn!(%cache_id, error = %err, "failed to delete context cache");
        }
    }

    async fn evict_session_caches(&self, session_id: &str) {
        for cache in self.cache.evict_session(session_id) {
            self.delete_cache(&cache.cache_id).await;
        }
    }
}
