//! Pipeline construction from settings and command-line overrides

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use framequery_lib::core::embedding::ClipServiceModel;
use framequery_lib::core::sampling::{FfmpegVideoDecoder, FrameDecoder, VideoDecoder};
use framequery_lib::core::settings::{default_config_dir, PipelineSettings, SettingsManager};
use framequery_lib::core::transcript::PlaceholderTranscriber;
use framequery_lib::core::vqa::{LlavaApiClient, VqaModel, VqaRequest};
use framequery_lib::core::{CoreError, CoreResult};
use framequery_lib::{init_logging, Pipeline};
use tracing::{debug, warn};

/// Global options shared by every command
pub struct AppOptions {
    pub settings_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub verbose: bool,
}

/// Loads settings: file, then environment, then command-line overrides
pub fn load_settings(options: &AppOptions) -> PipelineSettings {
    let manager = match &options.settings_path {
        Some(path) => SettingsManager::with_file(path.clone()),
        None => SettingsManager::new(default_config_dir()),
    };

    let mut settings = manager.load();
    settings.apply_env_overrides();
    if let Some(dir) = &options.data_dir {
        settings.data_dir = Some(dir.clone());
    }
    settings.normalize();
    settings
}

/// Initializes logging and opens the pipeline
pub async fn open_pipeline(options: &AppOptions) -> Result<Pipeline> {
    let settings = load_settings(options);
    let level = if options.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    init_logging(&settings.resolved_data_dir().join("logs"), level);

    let embedder = Arc::new(ClipServiceModel::new(
        &settings.embedding.endpoint,
        settings.model_identity(),
        Duration::from_secs(settings.embedding.timeout_secs),
    )?);

    let vqa: Arc<dyn VqaModel> = match settings.require_vqa_endpoint() {
        Ok(endpoint) => Arc::new(LlavaApiClient::new(
            endpoint,
            &settings.vqa.api_key,
            Duration::from_secs(settings.vqa.timeout_secs),
        )?),
        Err(e) => Arc::new(UnconfiguredVqa(e.to_string())),
    };

    let decoder: Arc<dyn VideoDecoder> = match FfmpegVideoDecoder::detect() {
        Ok(decoder) => Arc::new(decoder),
        Err(e) => {
            debug!("FFmpeg unavailable: {}", e);
            Arc::new(UnavailableDecoder(e.to_string()))
        }
    };

    let pipeline = Pipeline::open(
        settings,
        embedder,
        vqa,
        Arc::new(PlaceholderTranscriber),
        decoder,
    )
    .await?;
    Ok(pipeline)
}

/// Stands in for the VQA model when no endpoint is configured
struct UnconfiguredVqa(String);

#[async_trait]
impl VqaModel for UnconfiguredVqa {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn generate_answer(&self, _request: &VqaRequest) -> CoreResult<String> {
        Err(CoreError::InvalidSettings(self.0.clone()))
    }
}

/// Stands in for the decoder when FFmpeg is not installed
struct UnavailableDecoder(String);

impl VideoDecoder for UnavailableDecoder {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn open(&self, _video: &[u8]) -> CoreResult<Box<dyn FrameDecoder>> {
        warn!("Cannot decode video: {}", self.0);
        Err(CoreError::Decode(self.0.clone()))
    }
}
