use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One piece of media attached to a generation request, tagged by which of
/// the three upload modes applies.
#[derive(Debug, Clone)]
pub enum MediaPart {
    /// Thumbnails and very small videos travel as raw bytes.
    Inline { bytes: Bytes, mime: String },
    /// Videos under the provider cap but too big to inline.
    PresignedUrl { url: String, mime: String },
    /// Videos above the URL-reference cap; `handle` is the model-side file
    /// handle returned by [`super::gateway::LmmGateway::upload_for_processing`]
    /// once it reaches `active`.
    ModelUpload { handle: String, mime: String },
}

/// A single generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub system_instruction: String,
    pub reference_image: Option<MediaPart>,
    pub media: Vec<MediaPart>,
    pub prompt: String,
    pub cache_id: Option<String>,
}

/// A live server-side context cache binding media + system instruction for
/// reuse across requests within a session.
#[derive(Debug, Clone)]
pub struct ContextCache {
    pub cache_id: String,
    pub expires_at: DateTime<Utc>,
}

/// State of a model-side file upload handle, polled until terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Processing,
    Active,
    Failed,
}
