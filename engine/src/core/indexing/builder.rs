//! Index Builder
//!
//! Turns a video into a snapshot: sample frames, embed each one, attach a
//! transcript, write the keyframe JPEG, then persist and activate the result.
//!
//! Decoding runs on a blocking thread and streams frames over a bounded
//! channel. Embedding runs on the async runtime with a bounded number of
//! frames in flight; results are put back in sampling order before the index
//! is assembled, so the outcome never depends on task scheduling.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{FrameStore, Snapshot, SnapshotStore, VectorIndex};
use crate::core::context::VideoContext;
use crate::core::embedding::EmbeddingModel;
use crate::core::fs::remove_dir_best_effort;
use crate::core::sampling::{FrameSampler, SampledFrame, SamplingStride, VideoDecoder};
use crate::core::transcript::Transcriber;
use crate::core::{CoreError, CoreResult, Embedding, Frame, ModelIdentity, SnapshotId};

/// Default JPEG quality for keyframes
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

// =============================================================================
// Options & Report
// =============================================================================

/// Tunables for a build
#[derive(Clone, Copy, Debug)]
pub struct IndexBuilderOptions {
    pub stride: SamplingStride,
    /// Frames embedded concurrently (0 = number of CPUs)
    pub max_concurrency: usize,
    pub jpeg_quality: u8,
}

impl Default for IndexBuilderOptions {
    fn default() -> Self {
        Self {
            stride: SamplingStride::default(),
            max_concurrency: 0,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl IndexBuilderOptions {
    fn effective_concurrency(&self) -> usize {
        if self.max_concurrency == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_concurrency
        }
    }
}

/// Summary of a successful build
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub snapshot_id: SnapshotId,
    pub model: ModelIdentity,
    /// Frames decoded from the video, kept or not
    pub frames_decoded: u64,
    /// Frames selected by the sampler
    pub frames_sampled: usize,
    /// Frames that made it into the index
    pub frames_indexed: usize,
    /// Sampled frames dropped because embedding or transcription failed
    pub frames_skipped: usize,
    pub keyframe_dir: PathBuf,
    pub elapsed_ms: u64,
}

/// One processed frame, before ordinals are assigned
struct IndexedFrame {
    seq: usize,
    embedding: Embedding,
    frame: Frame,
}

/// Outcome of the decode thread
struct DecodeStats {
    decoded: u64,
    sampled: usize,
}

// =============================================================================
// Index Builder
// =============================================================================

/// Builds snapshots and installs them into a [`VideoContext`]
pub struct IndexBuilder {
    context: Arc<VideoContext>,
    model: Arc<dyn EmbeddingModel>,
    transcriber: Arc<dyn Transcriber>,
    decoder: Arc<dyn VideoDecoder>,
    store: SnapshotStore,
    options: IndexBuilderOptions,
}

impl IndexBuilder {
    pub fn new(
        context: Arc<VideoContext>,
        model: Arc<dyn EmbeddingModel>,
        transcriber: Arc<dyn Transcriber>,
        decoder: Arc<dyn VideoDecoder>,
        store: SnapshotStore,
    ) -> Self {
        Self {
            context,
            model,
            transcriber,
            decoder,
            store,
            options: IndexBuilderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: IndexBuilderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_options(&mut self, options: IndexBuilderOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &IndexBuilderOptions {
        &self.options
    }

    /// Builds a snapshot from `video` and makes it the active one.
    ///
    /// On any failure, including cancellation, the previous snapshot stays
    /// active and on disk, and the new keyframes are removed.
    pub async fn build(&self, video: Vec<u8>, cancel: CancellationToken) -> CoreResult<BuildReport> {
        let _guard = self.context.begin_build()?;
        let started = Instant::now();

        let snapshot_id = ulid::Ulid::new().to_string();
        let staging = self.store.keyframe_dir(&snapshot_id);
        info!(
            "Building snapshot {} ({} bytes, stride {:?}, model {})",
            snapshot_id,
            video.len(),
            self.options.stride,
            self.model.identity()
        );

        let result = self
            .build_and_persist(&snapshot_id, &staging, video, &cancel)
            .await;

        match result {
            Ok((snapshot, stats, skipped)) => {
                let report = BuildReport {
                    snapshot_id: snapshot_id.clone(),
                    model: snapshot.model().clone(),
                    frames_decoded: stats.decoded,
                    frames_sampled: stats.sampled,
                    frames_indexed: snapshot.len(),
                    frames_skipped: skipped,
                    keyframe_dir: staging,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                self.context.install(snapshot);
                info!(
                    "Snapshot {} ready: {} frames indexed, {} skipped, {}ms",
                    report.snapshot_id,
                    report.frames_indexed,
                    report.frames_skipped,
                    report.elapsed_ms
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Build of snapshot {} failed: {}", snapshot_id, e);
                remove_dir_best_effort(&staging);
                Err(e)
            }
        }
    }

    async fn build_and_persist(
        &self,
        snapshot_id: &str,
        staging: &Path,
        video: Vec<u8>,
        cancel: &CancellationToken,
    ) -> CoreResult<(Snapshot, DecodeStats, usize)> {
        tokio::fs::create_dir_all(staging).await?;

        let (mut processed, stats) = self.process_video(staging, video, cancel).await?;
        if stats.sampled == 0 {
            return Err(CoreError::EmptyVideo);
        }

        let skipped = stats.sampled - processed.len();
        if processed.is_empty() {
            warn!("All {} sampled frames failed to embed", stats.sampled);
            return Err(CoreError::EmptyVideo);
        }

        processed.sort_by_key(|p| p.seq);
        let mut vectors = Vec::with_capacity(processed.len());
        let mut store = FrameStore::new();
        for (position, item) in processed.into_iter().enumerate() {
            vectors.push(item.embedding);
            store.put(position, item.frame)?;
        }

        let index = VectorIndex::build(vectors)?;
        let snapshot = Snapshot::new(
            snapshot_id.to_string(),
            self.model.identity().clone(),
            index,
            store,
        )?;

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let store = self.store.clone();
        let snapshot = tokio::task::spawn_blocking(move || {
            store.save(&snapshot)?;
            Ok::<_, CoreError>(snapshot)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("Snapshot save task failed: {}", e)))??;

        Ok((snapshot, stats, skipped))
    }

    /// Streams sampled frames through embedding and transcription
    async fn process_video(
        &self,
        staging: &Path,
        video: Vec<u8>,
        cancel: &CancellationToken,
    ) -> CoreResult<(Vec<IndexedFrame>, DecodeStats)> {
        let concurrency = self.options.effective_concurrency();
        let (tx, mut rx) = mpsc::channel::<SampledFrame>(concurrency * 2);

        let decoder = Arc::clone(&self.decoder);
        let sampler = FrameSampler::new(self.options.stride);
        let decode_cancel = cancel.clone();
        let decode_task = tokio::task::spawn_blocking(move || -> CoreResult<DecodeStats> {
            let mut frames = sampler.sample(decoder.as_ref(), &video)?;
            let mut sampled = 0;
            for frame in frames.by_ref() {
                if decode_cancel.is_cancelled() {
                    break;
                }
                sampled += 1;
                if tx.blocking_send(frame).is_err() {
                    break;
                }
            }
            Ok(DecodeStats {
                decoded: frames.decoded_count(),
                sampled,
            })
        });

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<CoreResult<Option<IndexedFrame>>> = JoinSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|e| CoreError::Internal(format!("Embedding semaphore closed: {}", e)))?,
            };

            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = rx.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };

            let model = Arc::clone(&self.model);
            let transcriber = Arc::clone(&self.transcriber);
            let staging = staging.to_path_buf();
            let quality = self.options.jpeg_quality;
            tasks.spawn(async move {
                let result = process_frame(model, transcriber, &staging, quality, frame).await;
                drop(permit);
                result
            });
        }

        if cancel.is_cancelled() {
            info!("Build cancelled; stopping {} in-flight frames", tasks.len());
            tasks.abort_all();
            drop(rx);
            while tasks.join_next().await.is_some() {}
            let _ = decode_task.await;
            return Err(CoreError::Cancelled);
        }

        let mut processed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome =
                joined.map_err(|e| CoreError::Internal(format!("Frame task failed: {}", e)))?;
            if let Some(item) = outcome? {
                processed.push(item);
            }
        }

        let stats = decode_task
            .await
            .map_err(|e| CoreError::Internal(format!("Decode task failed: {}", e)))??;
        debug!(
            "Decoded {} frames, sampled {}, embedded {}",
            stats.decoded,
            stats.sampled,
            processed.len()
        );

        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        Ok((processed, stats))
    }
}

/// Embeds, transcribes, and saves one frame.
///
/// Returns `Ok(None)` when the frame should be skipped.
async fn process_frame(
    model: Arc<dyn EmbeddingModel>,
    transcriber: Arc<dyn Transcriber>,
    staging: &Path,
    jpeg_quality: u8,
    frame: SampledFrame,
) -> CoreResult<Option<IndexedFrame>> {
    let embedding = match model.embed_image(&frame.image).await {
        Ok(embedding) => embedding,
        Err(e) => {
            warn!(
                "Skipping frame {} (source frame {}): {}",
                frame.seq, frame.source_index, e
            );
            return Ok(None);
        }
    };

    let transcript = match transcriber.transcribe(&frame).await {
        Ok(text) => text,
        Err(e) => {
            warn!(
                "Skipping frame {} (source frame {}): transcription failed: {}",
                frame.seq, frame.source_index, e
            );
            return Ok(None);
        }
    };

    let path = staging.join(keyframe_file_name(frame.seq));
    let SampledFrame {
        seq,
        source_index,
        timestamp_sec,
        image,
    } = frame;
    let write_path = path.clone();
    tokio::task::spawn_blocking(move || write_keyframe(&write_path, &image, jpeg_quality))
        .await
        .map_err(|e| CoreError::Internal(format!("Keyframe write task failed: {}", e)))??;

    Ok(Some(IndexedFrame {
        seq,
        embedding,
        frame: Frame {
            ordinal: seq,
            source_path: path,
            source_index,
            timestamp_sec,
            transcript,
        },
    }))
}

pub fn keyframe_file_name(seq: usize) -> String {
    format!("frame_{:06}.jpg", seq)
}

fn write_keyframe(path: &Path, image: &RgbImage, quality: u8) -> CoreResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| {
            CoreError::Internal(format!(
                "Failed to write keyframe {}: {}",
                path.display(),
                e
            ))
        })
}

// =============================================================================
// Tests
// =============================================================================
