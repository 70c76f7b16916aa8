//! Settings Persistence System
//!
//! Provides persistent pipeline settings with:
//! - Atomic file writes (temp file + rename)
//! - Schema validation with defaults
//! - Environment overrides for endpoints and secrets
//!
//! Storage location: {config_dir}/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::core::fs::{atomic_write_json_pretty, with_file_lock};
use crate::core::sampling::SamplingStride;
use crate::core::{CoreError, CoreResult, ModelIdentity};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Environment variable overriding the data directory
pub const ENV_DATA_DIR: &str = "FRAMEQUERY_DATA_DIR";
/// Environment variable overriding the embedding service endpoint
pub const ENV_EMBEDDING_URL: &str = "FRAMEQUERY_EMBEDDING_URL";
/// Environment variable overriding the VQA endpoint
pub const ENV_VQA_URL: &str = "VQA_URL";
/// Environment variable holding the VQA API key
pub const ENV_VQA_API_KEY: &str = "VQA_API_KEY";

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Where snapshots and keyframes live (platform data dir when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub sampling: SamplingSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub indexing: IndexingSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    #[serde(default)]
    pub vqa: VqaSettings,

    #[serde(default)]
    pub memory: MemorySettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            data_dir: None,
            sampling: SamplingSettings::default(),
            embedding: EmbeddingSettings::default(),
            indexing: IndexingSettings::default(),
            retrieval: RetrievalSettings::default(),
            vqa: VqaSettings::default(),
            memory: MemorySettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Bad values are corrected instead of rejected.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.sampling.mode = normalize_enum(
            &self.sampling.mode,
            &[SAMPLING_PER_SECOND, SAMPLING_EVERY_N_FRAMES],
            default_sampling_mode(),
        );
        self.sampling.frames_per_second = clamp_f64(self.sampling.frames_per_second, 0.01, 60.0);
        self.sampling.every_n_frames = self.sampling.every_n_frames.clamp(1, 10_000);

        self.embedding.endpoint = self.embedding.endpoint.trim().to_string();
        self.embedding.model_id = self.embedding.model_id.trim().to_string();
        if self.embedding.model_id.is_empty() {
            self.embedding.model_id = default_model_id();
        }
        self.embedding.dimension = self.embedding.dimension.clamp(1, 8192);
        self.embedding.timeout_secs = self.embedding.timeout_secs.clamp(1, 600);

        // 0 means "auto".
        self.indexing.max_concurrent_embeddings = self.indexing.max_concurrent_embeddings.min(64);
        self.indexing.jpeg_quality = self.indexing.jpeg_quality.clamp(1, 100);

        self.retrieval.min_similarity = self
            .retrieval
            .min_similarity
            .filter(|v| v.is_finite())
            .map(|v| v.clamp(-1.0, 1.0));

        self.vqa.endpoint = self.vqa.endpoint.trim().to_string();
        self.vqa.timeout_secs = self.vqa.timeout_secs.clamp(1, 600);

        self.memory.max_turns = self.memory.max_turns.clamp(1, 100);
    }

    /// Applies environment overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup; empty values are ignored
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = get(ENV_DATA_DIR) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = get(ENV_EMBEDDING_URL) {
            self.embedding.endpoint = url.trim().to_string();
        }
        if let Some(url) = get(ENV_VQA_URL) {
            self.vqa.endpoint = url.trim().to_string();
        }
        if let Some(key) = get(ENV_VQA_API_KEY) {
            self.vqa.api_key = key.trim().to_string();
        }
    }

    /// Data directory, falling back to the platform data dir
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Sampling stride selected by `sampling.mode`
    pub fn sampling_stride(&self) -> SamplingStride {
        if self.sampling.mode == SAMPLING_EVERY_N_FRAMES {
            SamplingStride::EveryNFrames(self.sampling.every_n_frames)
        } else {
            SamplingStride::FramesPerSecond(self.sampling.frames_per_second)
        }
    }

    /// Identity of the configured embedding model
    pub fn model_identity(&self) -> ModelIdentity {
        ModelIdentity::new(self.embedding.model_id.clone(), self.embedding.dimension)
    }

    /// Fails with `InvalidSettings` if a required endpoint is missing
    pub fn require_vqa_endpoint(&self) -> CoreResult<&str> {
        if self.vqa.endpoint.is_empty() {
            return Err(CoreError::InvalidSettings(format!(
                "VQA endpoint is not configured (set vqa.endpoint or {})",
                ENV_VQA_URL
            )));
        }
        Ok(&self.vqa.endpoint)
    }
}

/// Platform data directory for snapshots
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("framequery")
}

/// Platform config directory for `settings.json`
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("framequery")
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}

fn normalize_enum(value: &str, allowed: &[&str], fallback: String) -> String {
    allowed
        .iter()
        .find(|v| v.eq_ignore_ascii_case(value))
        .map(|v| v.to_string())
        .unwrap_or(fallback)
}

// =============================================================================
// Sections
// =============================================================================

pub const SAMPLING_PER_SECOND: &str = "perSecond";
pub const SAMPLING_EVERY_N_FRAMES: &str = "everyNFrames";

/// Frame sampling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SamplingSettings {
    /// "perSecond" or "everyNFrames"
    #[serde(default = "default_sampling_mode")]
    pub mode: String,
    #[serde(default = "default_frames_per_second")]
    pub frames_per_second: f64,
    #[serde(default = "default_every_n_frames")]
    pub every_n_frames: u32,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            mode: default_sampling_mode(),
            frames_per_second: default_frames_per_second(),
            every_n_frames: default_every_n_frames(),
        }
    }
}

fn default_sampling_mode() -> String {
    SAMPLING_PER_SECOND.to_string()
}

fn default_frames_per_second() -> f64 {
    1.0
}

fn default_every_n_frames() -> u32 {
    30
}

/// Embedding model settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingSettings {
    /// Base URL of the CLIP embedding service
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Check at startup that repeated embeddings are identical
    #[serde(default = "default_true")]
    pub verify_determinism: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model_id: default_model_id(),
            dimension: default_dimension(),
            timeout_secs: default_timeout_secs(),
            verify_determinism: true,
        }
    }
}

fn default_embedding_endpoint() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_model_id() -> String {
    "openai/clip-vit-large-patch14".to_string()
}

fn default_dimension() -> usize {
    768
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Index build settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexingSettings {
    /// Frames embedded concurrently (0 = number of CPUs)
    #[serde(default)]
    pub max_concurrent_embeddings: usize,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            max_concurrent_embeddings: 0,
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_jpeg_quality() -> u8 {
    90
}

/// Retrieval settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalSettings {
    /// Best matches below this cosine similarity are rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f32>,
}

/// VQA model settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VqaSettings {
    #[serde(default)]
    pub endpoint: String,
    /// Never written to disk when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VqaSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Chat memory settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemorySettings {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

fn default_max_turns() -> usize {
    crate::core::memory::DEFAULT_MAX_TURNS
}

// =============================================================================
// Settings Manager
// =============================================================================

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a settings manager for `{config_dir}/settings.json`
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    /// Create a settings manager for an explicit file path
    pub fn with_file(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or
    /// unreadable
    pub fn load(&self) -> PipelineSettings {
        let result = with_file_lock(&self.lock_path(), false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(PipelineSettings::default());
            }
            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings: PipelineSettings = serde_json::from_str(&content)?;
            settings.normalize();
            Ok(settings)
        });

        result.unwrap_or_else(|e| {
            warn!(
                "Failed to load settings from {}, using defaults: {}",
                self.settings_path.display(),
                e
            );
            PipelineSettings::default()
        })
    }

    /// Normalizes `settings` and writes them atomically (temp file + rename)
    pub fn save(&self, settings: &PipelineSettings) -> CoreResult<PipelineSettings> {
        with_file_lock(&self.lock_path(), true, || {
            let mut normalized = settings.clone();
            normalized.normalize();
            atomic_write_json_pretty(&self.settings_path, &normalized)?;
            info!("Settings saved to {}", self.settings_path.display());
            Ok(normalized)
        })
    }

    /// Deletes the settings file and returns the defaults
    pub fn reset(&self) -> CoreResult<PipelineSettings> {
        with_file_lock(&self.lock_path(), true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file {} deleted", self.settings_path.display());
            }
            Ok(PipelineSettings::default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.sampling.mode, "perSecond");
        assert!((settings.sampling.frames_per_second - 1.0).abs() < f64::EPSILON);
        assert_eq!(settings.indexing.jpeg_quality, 90);
        assert_eq!(settings.memory.max_turns, 10);
        assert!(settings.retrieval.min_similarity.is_none());
        assert_eq!(
            settings.sampling_stride(),
            SamplingStride::FramesPerSecond(1.0)
        );
    }

    #[test]
    fn test_settings_serialization() {
        let settings = PipelineSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let deserialized: PipelineSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, deserialized);
    }

    #[test]
    fn test_empty_api_key_is_not_serialized() {
        let mut settings = PipelineSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("apiKey"));

        settings.vqa.api_key = "secret".to_string();
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"apiKey\":\"secret\""));
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        assert_eq!(manager.load(), PipelineSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        let mut settings = PipelineSettings::default();
        settings.sampling.mode = "everyNFrames".to_string();
        settings.sampling.every_n_frames = 12;
        settings.retrieval.min_similarity = Some(0.25);

        manager.save(&settings).unwrap();
        let loaded = manager.load();

        assert_eq!(loaded.sampling_stride(), SamplingStride::EveryNFrames(12));
        assert_eq!(loaded.retrieval.min_similarity, Some(0.25));
        assert!(!manager.settings_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_reset_deletes_file() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path().to_path_buf());

        manager.save(&PipelineSettings::default()).unwrap();
        assert!(manager.settings_path().exists());

        let reset_settings = manager.reset().unwrap();
        assert!(!manager.settings_path().exists());
        assert_eq!(reset_settings, PipelineSettings::default());
    }

    #[test]
    fn test_invalid_json_returns_defaults() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(SETTINGS_FILE), "invalid json {{{").unwrap();

        let manager = SettingsManager::new(temp_dir.path().to_path_buf());
        assert_eq!(manager.load(), PipelineSettings::default());
    }

    #[test]
    fn test_partial_json_uses_defaults_for_missing() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(SETTINGS_FILE),
            r#"{"version": 1, "embedding": {"modelId": "clip-b32", "dimension": 512}}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(temp_dir.path().to_path_buf());
        let settings = manager.load();

        assert_eq!(
            settings.model_identity(),
            ModelIdentity::new("clip-b32", 512)
        );
        assert!(settings.embedding.verify_determinism);
        assert_eq!(settings.memory.max_turns, 10);
    }

    #[test]
    fn test_normalization_clamps_values() {
        let mut settings = PipelineSettings::default();
        settings.sampling.mode = "EVERYNFRAMES".to_string();
        settings.sampling.frames_per_second = 500.0;
        settings.sampling.every_n_frames = 0;
        settings.indexing.max_concurrent_embeddings = 1000;
        settings.indexing.jpeg_quality = 0;
        settings.retrieval.min_similarity = Some(3.0);
        settings.memory.max_turns = 0;
        settings.embedding.model_id = "  ".to_string();

        settings.normalize();

        assert_eq!(settings.sampling.mode, "everyNFrames");
        assert!((settings.sampling.frames_per_second - 60.0).abs() < f64::EPSILON);
        assert_eq!(settings.sampling.every_n_frames, 1);
        assert_eq!(settings.indexing.max_concurrent_embeddings, 64);
        assert_eq!(settings.indexing.jpeg_quality, 1);
        assert_eq!(settings.retrieval.min_similarity, Some(1.0));
        assert_eq!(settings.memory.max_turns, 1);
        assert_eq!(settings.embedding.model_id, default_model_id());
    }

    #[test]
    fn test_normalization_handles_non_finite_values() {
        let mut settings = PipelineSettings::default();
        settings.sampling.frames_per_second = f64::NAN;
        settings.retrieval.min_similarity = Some(f32::INFINITY);
        settings.sampling.mode = "weekly".to_string();

        settings.normalize();

        assert!((settings.sampling.frames_per_second - 0.01).abs() < f64::EPSILON);
        assert!(settings.retrieval.min_similarity.is_none());
        assert_eq!(settings.sampling.mode, "perSecond");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DATA_DIR, "/srv/framequery"),
            (ENV_VQA_URL, " https://vqa.example/llava "),
            (ENV_VQA_API_KEY, "k-123"),
            (ENV_EMBEDDING_URL, ""),
        ]);

        let mut settings = PipelineSettings::default();
        settings.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.resolved_data_dir(), PathBuf::from("/srv/framequery"));
        assert_eq!(settings.vqa.endpoint, "https://vqa.example/llava");
        assert_eq!(settings.vqa.api_key, "k-123");
        assert_eq!(settings.embedding.endpoint, default_embedding_endpoint());
    }

    #[test]
    fn test_require_vqa_endpoint() {
        let mut settings = PipelineSettings::default();
        assert!(matches!(
            settings.require_vqa_endpoint(),
            Err(CoreError::InvalidSettings(_))
        ));

        settings.vqa.endpoint = "http://localhost:9000".to_string();
        assert_eq!(settings.require_vqa_endpoint().unwrap(), "http://localhost:9000");
    }

    #[test]
    fn test_concurrent_read_write() {
        use std::sync::Arc;
        use std::thread;

        let temp_dir = TempDir::new().unwrap();
        let manager = Arc::new(SettingsManager::new(temp_dir.path().to_path_buf()));
        manager.save(&PipelineSettings::default()).unwrap();

        let mut handles = vec![];
        for _ in 0..4 {
            let manager_clone = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    let _ = manager_clone.load();
                }
            }));
        }
        for i in 0..3 {
            let manager_clone = Arc::clone(&manager);
            handles.push(thread::spawn(move || {
                for j in 0..5 {
                    let mut settings = PipelineSettings::default();
                    settings.memory.max_turns = i * 10 + j;
                    let _ = manager_clone.save(&settings);
                }
            }));
        }

        for handle in handles {
            handle.join().expect("Thread should not panic");
        }

        let final_settings = manager.load();
        assert!((1..=100).contains(&final_settings.memory.max_turns));
    }
}
