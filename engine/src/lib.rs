//! framequery Core Library
//!
//! Ask questions about a video in natural language. A video is sampled into
//! keyframes, each keyframe is embedded with a CLIP-style model, and a
//! question is answered by retrieving the keyframe whose embedding is closest
//! to the question's and handing it to a visual question answering model.
//!
//! [`Pipeline`] wires the pieces together; the building blocks live under
//! [`core`].

pub mod core;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::core::context::VideoContext;
use crate::core::embedding::{verify_determinism, EmbeddingModel};
use crate::core::indexing::{
    BuildReport, IndexBuilder, IndexBuilderOptions, SnapshotMeta, SnapshotStore,
};
use crate::core::memory::ChatMemory;
use crate::core::retrieval::Retriever;
use crate::core::sampling::{SamplingStride, VideoDecoder};
use crate::core::session::{Answer, QaSession};
use crate::core::settings::PipelineSettings;
use crate::core::transcript::Transcriber;
use crate::core::vqa::VqaModel;
use crate::core::{CoreError, CoreResult, ModelIdentity, RetrievalResult};

// =============================================================================
// Logging
// =============================================================================

static LOG_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Log file name prefix inside the log directory
pub const LOG_FILE_NAME: &str = "framequery.log";

/// Installs the global tracing subscriber: console output on stderr plus a
/// daily-rolling file in `log_dir`.
///
/// If `log_dir` cannot be created or written, only the console layer is
/// installed. `RUST_LOG` overrides `default_level`. Calling this twice is a
/// no-op.
pub fn init_logging(log_dir: &Path, default_level: tracing::Level) {
    if LOG_GUARD.get().is_some() {
        return;
    }

    let (file_writer, guard) = match open_log_file(log_dir) {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };
    if LOG_GUARD.set(guard).is_err() {
        return;
    }

    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = file_writer.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    // Tests may have installed a subscriber already.
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Opens the daily-rolling log file, or returns `None` if `log_dir` is unusable
fn open_log_file(log_dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!(
            "framequery: file logging disabled, cannot create {}: {}",
            log_dir.display(),
            e
        );
        return None;
    }

    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_NAME)
        .build(log_dir)
    {
        Ok(appender) => Some(tracing_appender::non_blocking(appender)),
        Err(e) => {
            eprintln!(
                "framequery: file logging disabled, cannot write to {}: {}",
                log_dir.display(),
                e
            );
            None
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Summary of the pipeline state for `info`
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInfo {
    pub data_dir: PathBuf,
    /// Model queries are embedded with
    pub model: ModelIdentity,
    pub building: bool,
    /// Active snapshot, if any
    pub snapshot: Option<SnapshotMeta>,
}

/// Video question answering pipeline
pub struct Pipeline {
    settings: PipelineSettings,
    context: Arc<VideoContext>,
    embedder: Arc<dyn EmbeddingModel>,
    vqa: Arc<dyn VqaModel>,
    retriever: Arc<Retriever>,
    builder: IndexBuilder,
}

impl Pipeline {
    /// Opens the pipeline over `settings.dataDir`.
    ///
    /// Loads the persisted snapshot if there is one and, when enabled, checks
    /// that the embedding model is deterministic before anything is indexed
    /// or queried.
    pub async fn open(
        settings: PipelineSettings,
        embedder: Arc<dyn EmbeddingModel>,
        vqa: Arc<dyn VqaModel>,
        transcriber: Arc<dyn Transcriber>,
        decoder: Arc<dyn VideoDecoder>,
    ) -> CoreResult<Self> {
        let mut settings = settings;
        settings.normalize();

        if settings.embedding.verify_determinism {
            verify_determinism(embedder.as_ref()).await?;
        }

        let data_dir = settings.resolved_data_dir();
        let store = SnapshotStore::new(&data_dir);

        let loader = store.clone();
        let persisted = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| CoreError::Internal(format!("Snapshot load task failed: {}", e)))??;

        let context = Arc::new(match persisted {
            Some(snapshot) => {
                if snapshot.model() != embedder.identity() {
                    warn!(
                        "Snapshot {} was built with {}, but the configured model is {}; reindex before asking",
                        snapshot.id(),
                        snapshot.model(),
                        embedder.identity()
                    );
                }
                info!(
                    "Restored snapshot {} ({} frames) from {}",
                    snapshot.id(),
                    snapshot.len(),
                    data_dir.display()
                );
                VideoContext::with_snapshot(snapshot)
            }
            None => {
                info!("No snapshot in {}", data_dir.display());
                VideoContext::new()
            }
        });

        let retriever = Arc::new(
            Retriever::new(Arc::clone(&context), Arc::clone(&embedder))
                .with_min_similarity(settings.retrieval.min_similarity),
        );

        let builder = IndexBuilder::new(
            Arc::clone(&context),
            Arc::clone(&embedder),
            transcriber,
            decoder,
            store,
        )
        .with_options(IndexBuilderOptions {
            stride: settings.sampling_stride(),
            max_concurrency: settings.indexing.max_concurrent_embeddings,
            jpeg_quality: settings.indexing.jpeg_quality,
        });

        Ok(Self {
            settings,
            context,
            embedder,
            vqa,
            retriever,
            builder,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn context(&self) -> &Arc<VideoContext> {
        &self.context
    }

    /// Overrides the sampling stride for subsequent builds
    pub fn set_sampling_stride(&mut self, stride: SamplingStride) {
        let options = IndexBuilderOptions {
            stride,
            ..*self.builder.options()
        };
        self.builder.set_options(options);
    }

    /// Indexes `video`, replacing the active snapshot on success
    pub async fn index_video(
        &self,
        video: Vec<u8>,
        cancel: CancellationToken,
    ) -> CoreResult<BuildReport> {
        self.builder.build(video, cancel).await
    }

    /// Reads and indexes a video file
    pub async fn index_file(&self, path: &Path, cancel: CancellationToken) -> CoreResult<BuildReport> {
        let video = tokio::fs::read(path).await?;
        info!("Indexing {} ({} bytes)", path.display(), video.len());
        self.index_video(video, cancel).await
    }

    /// Best-matching frame for `question`
    pub async fn retrieve(&self, question: &str) -> CoreResult<RetrievalResult> {
        self.retriever.retrieve(question).await
    }

    /// Starts a conversation with its own chat memory
    pub fn session(&self) -> QaSession {
        QaSession::new(
            Arc::clone(&self.retriever),
            Arc::clone(&self.vqa),
            ChatMemory::new(self.settings.memory.max_turns),
        )
    }

    /// Answers a single question without history
    pub async fn ask(&self, question: &str) -> CoreResult<Answer> {
        self.session().ask(question).await
    }

    pub fn info(&self) -> PipelineInfo {
        PipelineInfo {
            data_dir: self.settings.resolved_data_dir(),
            model: self.embedder.identity().clone(),
            building: self.context.is_building(),
            snapshot: self.context.current().map(|s| s.meta().clone()),
        }
    }
}
