//! Batch Pipeline. Assembles the job's valid FileResults into LMM requests,
//! interleaves mixed media, splits into bounded sub-batches, drives the
//! triage/selection/description operations, and reconciles the merged
//! result into a single terminal `PutJob`.

use std::collections::HashSet;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::job_store::{
    DescriptionOutcome, FileResultStatus, Job, JobOutcome, JobStatus, JobStore, SceneGroup,
    SelectionOutcome, TriageOutcome,
};
use crate::lmm_gateway::{generate_structured, GenerateRequest, LmmError, LmmGateway, MediaPart, ModelName};
use crate::media::{MediaKind, MediaMetadata};
use crate::object_store::ObjectStoreGateway;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("job store error: {0}")]
    JobStore(#[from] crate::job_store::JobStoreError),

    #[error("object store error: {0}")]
    ObjectStore(#[from] crate::object_store::ObjectStoreError),

    #[error("LMM error: {0}")]
    Lmm(#[from] LmmError),

    #[error("job has no processed files to analyze")]
    EmptyManifest,
}

/// A valid `FileResult` reconstructed into the transient `MediaFile` shape
/// plus the identifiers the Batch Pipeline needs for reconciliation.
#[derive(Debug, Clone)]
pub struct AssembledItem {
    pub original_key: String,
    pub filename: String,
    pub kind: MediaKind,
    pub metadata: MediaMetadata,
    pub mime_type: String,
    /// Key to the artifact actually sent to the model: the compressed
    /// video or the thumbnail, never the raw upload.
    pub artifact_key: String,
    /// Size in bytes of the artifact at `artifact_key` (post-transcode for
    /// video, post-thumbnail for images) — drives the inline/URL/upload
    /// mode choice in [`build_media_part`].
    pub artifact_size: u64,
    pub presigned_url: Option<String>,
}

/// Reads FileResults for the job, keeps only `valid` rows, and builds the
/// ordered assembly the rest of the pipeline operates on.
#[instrument(skip(store, jobs), err)]
pub async fn assemble(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
) -> Result<Vec<AssembledItem>, BatchError> {
    let results = jobs.file_results().list_for_job(session_id, job_id).await?;

    let mut items = Vec::new();
    for result in results.into_iter().filter(|r| r.status == FileResultStatus::Valid) {
        let Some(metadata) = result.metadata.clone() else {
            continue;
        };
        let artifact_key = result
            .processed_key
            .clone()
            .or_else(|| result.thumbnail_key.clone())
            .unwrap_or_else(|| result.original_key.clone());

        let presigned_url = store
            .presign_get(&artifact_key, config.presign_ttl)
            .await
            .ok();

        items.push(AssembledItem {
            original_key: result.original_key,
            filename: result.filename,
            kind: metadata.kind(),
            metadata,
            mime_type: result.mime_type,
            artifact_key,
            artifact_size: result.file_size,
            presigned_url,
        });
    }

    Ok(items)
}

/// FileResults invalidated at the per-file stage specifically because the
/// video was under the short-video threshold. Triage treats these as an
/// automatic, LMM-free `unsaveable` verdict; other invalid reasons
/// (unsupported format, decode failure) contribute only to `errorCount` and
/// never appear in a terminal list.
const SHORT_VIDEO_MARKER: &str = "video too short for analysis";

pub async fn short_video_prefilter(
    jobs: &JobStore,
    session_id: &str,
    job_id: &str,
) -> Result<Vec<String>, BatchError> {
    let results = jobs.file_results().list_for_job(session_id, job_id).await?;
    Ok(results
        .into_iter()
        .filter(|r| r.status == FileResultStatus::Invalid)
        .filter(|r| {
            r.error_message
                .as_deref()
                .is_some_and(|msg| msg.starts_with(SHORT_VIDEO_MARKER))
        })
        .map(|r| r.original_key)
        .collect())
}

/// Interleaves videos and images as `[V, I×k, V, I×k, …]` with
/// `k = max(1, ⌊|images|/|videos|⌋)`, then appends any remaining images. If
/// there are no videos (or no images), the original relative order is
/// preserved.
#[must_use]
pub fn interleave(items: Vec<AssembledItem>) -> Vec<AssembledItem> {
    let (videos, images): (Vec<_>, Vec<_>) = items.into_iter().partition(|i| i.kind == MediaKind::Video);

    if videos.is_empty() || images.is_empty() {
        let mut combined = videos;
        combined.extend(images);
        return combined;
    }

    let k = (images.len() / videos.len()).max(1);
    let mut out = Vec::with_capacity(videos.len() + images.len());
    let mut images = images.into_iter();

    for video in videos {
        out.push(video);
        for _ in 0..k {
            if let Some(image) = images.next() {
                out.push(image);
            }
        }
    }
    out.extend(images);
    out
}

/// Splits an ordered list into consecutive sub-batches no larger than
/// `batch_size`, pairing each sub-batch with the 1-based global index of
/// its first element.
#[must_use]
pub fn sub_batches(items: &[AssembledItem], batch_size: usize) -> Vec<(usize, &[AssembledItem])> {
    items
        .chunks(batch_size.max(1))
        .scan(1usize, |next_start, chunk| {
            let start = *next_start;
            *next_start += chunk.len();
            Some((start, chunk))
        })
        .collect()
}

/// Chooses one of the three request modes per item by size: images and
/// very short videos go inline; videos under the provider cap travel as a
/// presigned URL; anything larger is streamed to the model's own object API
/// and polled until active.
async fn build_media_part<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    lmm: &G,
    config: &EngineConfig,
    item: &AssembledItem,
) -> Result<MediaPart, BatchError> {
    let is_tiny_video = item.kind == MediaKind::Video
        && item.metadata.is_short_video(config.short_video_threshold.as_secs_f64() * 4.0);

    if item.kind == MediaKind::Image || is_tiny_video {
        let bytes = store.get(&item.artifact_key).await?;
        return Ok(MediaPart::Inline {
            bytes,
            mime: item.mime_type.clone(),
        });
    }

    if item.artifact_size <= config.max_presigned_url_video_bytes {
        if let Some(url) = &item.presigned_url {
            return Ok(MediaPart::PresignedUrl {
                url: url.clone(),
                mime: item.mime_type.clone(),
            });
        }
    }

    let bytes = store.get(&item.artifact_key).await?;
    let handle = lmm.upload_for_processing(bytes, &item.mime_type).await?;
    lmm.wait_for_upload(
        &handle,
        config.upload_poll_interval,
        config.upload_poll_timeout,
    )
    .await
    .map_err(|err| match err {
        LmmError::FileProcessingFailed(reason) => {
            LmmError::FileProcessingFailed(format!("Gemini file processing failed: {reason}"))
        }
        other => other,
    })?;
    Ok(MediaPart::ModelUpload {
        handle,
        mime: item.mime_type.clone(),
    })
}

async fn build_batch_media<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    lmm: &G,
    config: &EngineConfig,
    batch: &[AssembledItem],
) -> Result<Vec<MediaPart>, BatchError> {
    let mut parts = Vec::with_capacity(batch.len());
    for item in batch {
        parts.push(build_media_part(store, lmm, config, item).await?);
    }
    Ok(parts)
}

/// Deletes every model-side upload handle used in one request, best-effort.
async fn cleanup_model_uploads<G: LmmGateway>(lmm: &G, media: &[MediaPart]) {
    for part in media {
        if let MediaPart::ModelUpload { handle, .. } = part {
            lmm.delete_upload(handle).await;
        }
    }
}

/// Creates (or reuses) the context cache for this `(session, operation)`
/// pair from the first sub-batch's media, so every later sub-batch in the
/// same operation reuses it instead of re-sending the same context.
async fn establish_cache<G: LmmGateway>(
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    operation: &str,
    system_instruction: &str,
    media: &[MediaPart],
) -> Option<String> {
    lmm.get_or_create_cache(
        session_id,
        operation,
        system_instruction,
        media,
        config.context_cache_ttl,
        config.min_cache_tokens,
    )
    .await
    .map(|cache| cache.cache_id)
}

#[derive(Debug, Deserialize)]
struct TriageVerdictRaw {
    index: usize,
    saveable: bool,
    reason: String,
}

const TRIAGE_SYSTEM_INSTRUCTION: &str = "You are triaging a batch of photos and videos. \
For each numbered item, decide whether it is worth keeping. Respond with a JSON array of \
objects: {\"index\": <1-based item number>, \"saveable\": <bool>, \"reason\": <short string>}.";

/// Runs the triage operation over every sub-batch sequentially, merging
/// into one ordered verdict list with the documented safety-net default
/// applied to any index the model never mentions.
#[instrument(skip(store, lmm, ordered), fields(session_id, item_count = ordered.len()), err)]
async fn run_triage<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    ordered: &[AssembledItem],
) -> Result<Vec<(String, bool)>, BatchError> {
    let mut verdicts_by_index: std::collections::HashMap<usize, (bool, String)> = std::collections::HashMap::new();
    let mut cache_id: Option<String> = None;

    for (batch_index, (start, batch)) in sub_batches(ordered, config.triage_batch_size).into_iter().enumerate() {
        let prompt = batch
            .iter()
            .enumerate()
            .map(|(local_idx, item)| format!("{}. {}", local_idx + 1, item.filename))
            .collect::<Vec<_>>()
            .join("\n");

        let media = build_batch_media(store, lmm, config, batch).await?;

        if batch_index == 0 {
            cache_id = establish_cache(lmm, config, session_id, "triage", TRIAGE_SYSTEM_INSTRUCTION, &media).await;
        }

        let request = GenerateRequest {
            system_instruction: TRIAGE_SYSTEM_INSTRUCTION.to_string(),
            reference_image: None,
            media: media.clone(),
            prompt,
            cache_id: cache_id.clone(),
        };

        let raw: Vec<TriageVerdictRaw> =
            generate_structured(lmm, ModelName::FastMultimodal, request).await?;
        cleanup_model_uploads(lmm, &media).await;

        for verdict in raw {
            if verdict.index == 0 || verdict.index > batch.len() {
                warn!(index = verdict.index, "ignoring out-of-range triage verdict index");
                continue;
            }
            // `start` is the 1-based global index of the batch's first item;
            // `verdict.index` is 1-based within the batch. Converting both
            // to 0-based and adding: (start - 1) + (verdict.index - 1).
            let global_index = start + verdict.index - 2;
            verdicts_by_index.insert(global_index, (verdict.saveable, verdict.reason));
        }
    }

    let mut out = Vec::with_capacity(ordered.len());
    for (global_index, item) in ordered.iter().enumerate() {
        let (saveable, _reason) = verdicts_by_index.remove(&global_index).unwrap_or_else(|| {
            (true, "Not evaluated by AI — kept by default".to_string())
        });
        out.push((item.original_key.clone(), saveable));
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct SelectedItemRaw {
    index: usize,
    #[allow(dead_code)]
    rank: u32,
    #[allow(dead_code)]
    justification: String,
    scene: String,
}

#[derive(Debug, Deserialize)]
struct ExcludedItemRaw {
    index: usize,
    #[allow(dead_code)]
    category: String,
    #[allow(dead_code)]
    reason: String,
    #[allow(dead_code)]
    duplicate_of: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SceneGroupRaw {
    name: String,
    gps: Option<crate::media::GpsCoordinates>,
    items: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct SelectionResponseRaw {
    #[serde(default)]
    selected: Vec<SelectedItemRaw>,
    #[serde(default)]
    excluded: Vec<ExcludedItemRaw>,
    #[serde(default)]
    scene_groups: Vec<SceneGroupRaw>,
}

const SELECTION_SYSTEM_INSTRUCTION: &str = "You are curating a batch of photos and videos into \
a final selection. Every item must appear in exactly one of `selected` or `excluded`, and in \
exactly one scene group. Respond as JSON: {\"selected\": [...], \"excluded\": [...], \
\"scene_groups\": [...]}.";

/// Runs the selection operation. Unlike triage, there is no per-item
/// safety-net default — partition totality is enforced here by assigning
/// any item the model fails to place into a synthetic "unreviewed" scene
/// group and the `excluded` list, logged loudly since it indicates a
/// model-response gap rather than an expected outcome.
#[instrument(skip(store, lmm, ordered), fields(session_id, item_count = ordered.len()), err)]
async fn run_selection<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    ordered: &[AssembledItem],
) -> Result<SelectionOutcome, BatchError> {
    let mut selected = HashSet::new();
    let mut excluded = HashSet::new();
    let mut scene_groups: Vec<SceneGroup> = Vec::new();

    let mut cache_id: Option<String> = None;

    for (batch_index, (start, batch)) in sub_batches(ordered, config.selection_batch_size).into_iter().enumerate() {
        let prompt = batch
            .iter()
            .enumerate()
            .map(|(local_idx, item)| format!("{}. {}", local_idx + 1, item.filename))
            .collect::<Vec<_>>()
            .join("\n");
        let media = build_batch_media(store, lmm, config, batch).await?;

        if batch_index == 0 {
            cache_id = establish_cache(lmm, config, session_id, "selection", SELECTION_SYSTEM_INSTRUCTION, &media).await;
        }

        let request = GenerateRequest {
            system_instruction: SELECTION_SYSTEM_INSTRUCTION.to_string(),
            reference_image: None,
            media: media.clone(),
            prompt,
            cache_id: cache_id.clone(),
        };

        let raw: SelectionResponseRaw =
            generate_structured(lmm, ModelName::FastMultimodal, request).await?;
        cleanup_model_uploads(lmm, &media).await;

        for item in &raw.selected {
            if let Some(key) = global_key(ordered, start, item.index, batch.len()) {
                selected.insert(key);
            }
        }
        for item in &raw.excluded {
            if let Some(key) = global_key(ordered, start, item.index, batch.len()) {
                excluded.insert(key);
            }
        }
        for group in raw.scene_groups {
            let items = group
                .items
                .into_iter()
                .filter_map(|local_idx| global_key(ordered, start, local_idx, batch.len()))
                .collect();
            scene_groups.push(SceneGroup {
                name: group.name,
                gps: group.gps,
                time_range: None,
                items,
            });
        }
    }

    // Anything the model left unplaced goes to excluded and a catch-all
    // scene group, rather than silently vanishing.
    let mut unreviewed = Vec::new();
    for item in ordered {
        if !selected.contains(&item.original_key) && !excluded.contains(&item.original_key) {
            excluded.insert(item.original_key.clone());
            unreviewed.push(item.original_key.clone());
        }
    }
    if !unreviewed.is_empty() {
        warn!(count = unreviewed.len(), "items unplaced by selection response, excluding by default");
        scene_groups.push(SceneGroup {
            name: "unreviewed".to_string(),
            gps: None,
            time_range: None,
            items: unreviewed,
        });
    }

    Ok(SelectionOutcome {
        selected: selected.into_iter().collect(),
        excluded: excluded.into_iter().collect(),
        scene_groups,
    })
}

fn global_key(ordered: &[AssembledItem], start: usize, local_index: usize, batch_len: usize) -> Option<String> {
    if local_index == 0 || local_index > batch_len {
        return None;
    }
    ordered.get(start + local_index - 2).map(|item| item.original_key.clone())
}

const DESCRIPTION_SYSTEM_INSTRUCTION: &str = "You are writing a social caption for a group of \
media from one scene. Respond as JSON: {\"caption\": <string>, \"hashtags\": [<string>...], \
\"location_tag\": <string or null>}.";

/// Generates a caption for one post group. `prior_turns` carries the full
/// prior conversation for multi-turn feedback regeneration; empty on the
/// first call.
#[instrument(skip(store, lmm, group_items, prior_turns), fields(session_id, group_label), err)]
pub async fn run_description<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    group_label: &str,
    event_description: &str,
    group_items: &[AssembledItem],
    prior_turns: &[String],
    new_instruction: Option<&str>,
) -> Result<DescriptionOutcome, BatchError> {
    let mut prompt = format!("Post group: {group_label}\nEvent: {event_description}\n");
    for turn in prior_turns {
        prompt.push_str("Prior turn: ");
        prompt.push_str(turn);
        prompt.push('\n');
    }
    if let Some(instruction) = new_instruction {
        prompt.push_str("User feedback: ");
        prompt.push_str(instruction);
        prompt.push('\n');
    }

    let media = build_batch_media(store, lmm, config, group_items).await?;
    let operation = format!("description:{group_label}");
    let cache_id = establish_cache(lmm, config, session_id, &operation, DESCRIPTION_SYSTEM_INSTRUCTION, &media).await;

    let request = GenerateRequest {
        system_instruction: DESCRIPTION_SYSTEM_INSTRUCTION.to_string(),
        reference_image: None,
        media: media.clone(),
        prompt,
        cache_id,
    };

    let raw: DescriptionOutcome = generate_structured(lmm, ModelName::ProMultimodal, request).await?;
    cleanup_model_uploads(lmm, &media).await;
    info!(session_id, group_label, "generated description");
    Ok(raw)
}

/// Runs the full triage operation end to end and writes the terminal Job
/// record. Videos under the short-video threshold are merged in as
/// automatic discards without ever reaching the model.
#[instrument(skip(store, jobs, lmm), err)]
pub async fn run_triage_job<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
) -> Result<Job, BatchError> {
    let assembled = assemble(store, jobs, config, session_id, job_id).await?;
    let short_video_discards = short_video_prefilter(jobs, session_id, job_id).await?;

    let ordered = interleave(assembled);
    let verdicts = if ordered.is_empty() {
        Vec::new()
    } else {
        run_triage(store, lmm, config, session_id, &ordered).await?
    };

    let mut keep = Vec::new();
    let mut discard = short_video_discards;
    for (key, saveable) in verdicts {
        if saveable {
            keep.push(key);
        } else {
            discard.push(key);
        }
    }

    if keep.is_empty() && discard.is_empty() {
        return Err(BatchError::EmptyManifest);
    }

    let outcome = TriageOutcome { keep, discard };
    let job = jobs
        .jobs()
        .merge_put(session_id, job_id, |job| {
            job.status = JobStatus::Complete;
            job.phase = crate::job_store::JobPhase::Done;
            job.outcome = JobOutcome {
                triage: Some(outcome),
                selection: None,
                description: None,
            };
        })
        .await?;

    Ok(job)
}

/// Runs the full selection operation end to end and writes the terminal
/// Job record.
#[instrument(skip(store, jobs, lmm), err)]
pub async fn run_selection_job<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
) -> Result<Job, BatchError> {
    let assembled = assemble(store, jobs, config, session_id, job_id).await?;
    if assembled.is_empty() {
        return Err(BatchError::EmptyManifest);
    }
    let ordered = interleave(assembled);
    let outcome = run_selection(store, lmm, config, session_id, &ordered).await?;

    let job = jobs
        .jobs()
        .merge_put(session_id, job_id, |job| {
            job.status = JobStatus::Complete;
            job.phase = crate::job_store::JobPhase::Done;
            job.outcome = JobOutcome {
                triage: None,
                selection: Some(outcome),
                description: None,
            };
        })
        .await?;

    Ok(job)
}

/// Runs the description operation for the job's single post group and
/// writes the terminal Job record. `prior_turns`/`new_instruction` support
/// the multi-turn feedback regeneration flow.
#[instrument(skip(store, jobs, lmm), err)]
pub async fn run_description_job<G: LmmGateway>(
    store: &dyn ObjectStoreGateway,
    jobs: &JobStore,
    lmm: &G,
    config: &EngineConfig,
    session_id: &str,
    job_id: &str,
    group_label: &str,
    event_description: &str,
    prior_turns: &[String],
    new_instruction: Option<&str>,
) -> Result<Job, BatchError> {
    let assembled = assemble(store, jobs, config, session_id, job_id).await?;
    if assembled.is_empty() {
        return Err(BatchError::EmptyManifest);
    }

    let outcome = run_description(
        store,
        lmm,
        config,
        session_id,
        group_label,
        event_description,
        &assembled,
        prior_turns,
        new_instruction,
    )
    .await?;

    let job = jobs
        .jobs()
        .merge_put(session_id, job_id, |job| {
            job.status = JobStatus::Complete;
            job.phase = crate::job_store::JobPhase::Done;
            job.outcome = JobOutcome {
                triage: None,
                selection: None,
                description: Some(outcome),
            };
        })
        .await?;

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{GpsCoordinates as _Gps, ImageMetadata, VideoMetadata};

    fn image_item(key: &str) -> AssembledItem {
        AssembledItem {
            original_key: key.to_string(),
            filename: format!("{key}.jpg"),
            kind: MediaKind::Image,
            metadata: MediaMetadata::Image(ImageMetadata::default()),
            mime_type: "image/jpeg".to_string(),
            artifact_key: format!("thumbnails/{key}.webp"),
            artifact_size: 1024,
            presigned_url: Some(format!("https://example.invalid/{key}")),
        }
    }

    fn video_item(key: &str) -> AssembledItem {
        AssembledItem {
            original_key: key.to_string(),
            filename: format!("{key}.mp4"),
            kind: MediaKind::Video,
            metadata: MediaMetadata::Video(VideoMetadata {
                duration_secs: 10.0,
                ..Default::default()
            }),
            mime_type: "video/mp4".to_string(),
            artifact_key: format!("compressed/{key}.webm"),
            artifact_size: 4096,
            presigned_url: Some(format!("https://example.invalid/{key}")),
        }
    }

    #[test]
    fn interleave_distributes_videos_across_images() {
        let items = vec![
            image_item("i1"),
            image_item("i2"),
            image_item("i3"),
            image_item("i4"),
            video_item("v1"),
            video_item("v2"),
        ];
        let out = interleave(items);
        let keys: Vec<_> = out.iter().map(|i| i.original_key.clone()).collect();
        // k = floor(4/2) = 2: [v1, i, i, v2, i, i]
        assert_eq!(keys, vec!["v1", "i1", "i2", "v2", "i3", "i4"]);
    }

    #[test]
    fn interleave_is_identity_when_no_videos() {
        let items = vec![image_item("i1"), image_item("i2")];
        let out = interleave(items);
        let keys: Vec<_> = out.iter().map(|i| i.original_key.clone()).collect();
        assert_eq!(keys, vec!["i1", "i2"]);
    }

    #[test]
    fn sub_batches_track_global_start_offsets() {
        let items: Vec<_> = (0..45).map(|n| image_item(&format!("i{n}"))).collect();
        let batches = sub_batches(&items, 20);
        let starts: Vec<_> = batches.iter().map(|(start, _)| *start).collect();
        assert_eq!(starts, vec![1, 21, 41]);
        assert_eq!(batches.last().unwrap().1.len(), 5);
    }
}
