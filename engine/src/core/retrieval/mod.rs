//! Retrieval Module
//!
//! Answers "which frame best matches this question?" by embedding the
//! question with the same model that built the index and taking the nearest
//! stored vector.

use std::sync::Arc;

use tracing::debug;

use crate::core::context::VideoContext;
use crate::core::embedding::EmbeddingModel;
use crate::core::{CoreError, CoreResult, RetrievalResult};

/// Text-to-frame retriever over the active snapshot
pub struct Retriever {
    context: Arc<VideoContext>,
    model: Arc<dyn EmbeddingModel>,
    min_similarity: Option<f32>,
}

impl Retriever {
    pub fn new(context: Arc<VideoContext>, model: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            context,
            model,
            min_similarity: None,
        }
    }

    /// Rejects best matches scoring below `threshold`
    pub fn with_min_similarity(mut self, threshold: Option<f32>) -> Self {
        self.min_similarity = threshold;
        self
    }

    pub fn min_similarity(&self) -> Option<f32> {
        self.min_similarity
    }

    /// Returns the single most similar frame for `question`
    pub async fn retrieve(&self, question: &str) -> CoreResult<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(CoreError::InvalidQuery(
                "question must not be empty".to_string(),
            ));
        }

        let snapshot = self.context.snapshot()?;
        snapshot.model().ensure_matches(self.model.identity())?;

        let query = self.model.embed_text(question).await?;
        let hit = snapshot
            .index()
            .search(&query, 1)?
            .into_iter()
            .next()
            .ok_or(CoreError::EmptyIndex)?;

        if let Some(threshold) = self.min_similarity {
            if hit.score < threshold {
                return Err(CoreError::NoConfidentMatch {
                    score: hit.score,
                    threshold,
                });
            }
        }

        let frame = snapshot.store().get(hit.position)?.clone();
        debug!(
            "Question matched frame {} (source frame {}, score {:.4})",
            frame.ordinal, frame.source_index, hit.score
        );

        Ok(RetrievalResult {
            transcript: frame.transcript.clone(),
            frame,
            score: hit.score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::indexing::{FrameStore, Snapshot, VectorIndex};
    use crate::core::testing::{FakeEmbeddingModel, SyntheticVideoDecoder};
    use crate::core::{Frame, ModelIdentity};
    use image::RgbImage;
    use std::path::PathBuf;

    /// Snapshot whose three frames are the synthetic colors of source frames 0, 30, 60
    async fn indexed_context(model: &FakeEmbeddingModel) -> Arc<VideoContext> {
        let mut vectors = Vec::new();
        let mut store = FrameStore::new();
        for (ordinal, source_index) in [0u64, 30, 60].into_iter().enumerate() {
            let color = SyntheticVideoDecoder::color_for(source_index);
            let image = RgbImage::from_pixel(8, 8, image::Rgb(color));
            vectors.push(model.embed_image(&image).await.unwrap());
            store
                .put(
                    ordinal,
                    Frame {
                        ordinal,
                        source_path: PathBuf::from(format!("frame_{ordinal:06}.jpg")),
                        source_index,
                        timestamp_sec: source_index as f64 / 30.0,
                        transcript: format!("Transcription for frame {}", source_index),
                    },
                )
                .unwrap();
        }
        let snapshot = Snapshot::new(
            "S".to_string(),
            model.identity().clone(),
            VectorIndex::build(vectors).unwrap(),
            store,
        )
        .unwrap();
        Arc::new(VideoContext::with_snapshot(snapshot))
    }

    #[tokio::test]
    async fn test_retrieve_exact_frame() {
        let model = Arc::new(FakeEmbeddingModel::new());
        let context = indexed_context(&model).await;
        let retriever = Retriever::new(context, model.clone());

        let question = FakeEmbeddingModel::color_query(SyntheticVideoDecoder::color_for(30));
        let result = retriever.retrieve(&question).await.unwrap();

        assert_eq!(result.frame.ordinal, 1);
        assert_eq!(result.transcript, "Transcription for frame 30");
        assert!((result.score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_question_does_not_embed() {
        let model = Arc::new(FakeEmbeddingModel::new());
        let retriever = Retriever::new(Arc::new(VideoContext::new()), model.clone());

        for question in ["", "   \n"] {
            let err = retriever.retrieve(question).await.unwrap_err();
            assert!(matches!(err, CoreError::InvalidQuery(_)));
        }
        assert_eq!(model.text_calls(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_without_snapshot() {
        let model = Arc::new(FakeEmbeddingModel::new());
        let retriever = Retriever::new(Arc::new(VideoContext::new()), model);

        let err = retriever.retrieve("a red car").await.unwrap_err();
        assert!(matches!(err, CoreError::NoContext));
    }

    #[tokio::test]
    async fn test_retrieve_during_build() {
        let model = Arc::new(FakeEmbeddingModel::new());
        let context = indexed_context(&model).await;
        let retriever = Retriever::new(Arc::clone(&context), model);

        let _guard = context.begin_build().unwrap();
        let err = retriever.retrieve("a red car").await.unwrap_err();
        assert!(matches!(err, CoreError::IndexBuilding));
    }

    #[tokio::test]
    async fn test_retrieve_with_other_model_fails() {
        let indexing_model = FakeEmbeddingModel::new();
        let context = indexed_context(&indexing_model).await;

        let other = Arc::new(
            FakeEmbeddingModel::new().with_identity(ModelIdentity::new("other-clip", 16)),
        );
        let retriever = Retriever::new(context, other.clone());

        let err = retriever.retrieve("a red car").await.unwrap_err();
        assert!(matches!(err, CoreError::ModelMismatch { .. }));
        assert_eq!(other.text_calls(), 0);
    }

    #[tokio::test]
    async fn test_min_similarity_threshold() {
        let model = Arc::new(FakeEmbeddingModel::new());
        let context = indexed_context(&model).await;
        let question = FakeEmbeddingModel::color_query(SyntheticVideoDecoder::color_for(30));

        let strict = Retriever::new(Arc::clone(&context), model.clone())
            .with_min_similarity(Some(1.5));
        let err = strict.retrieve(&question).await.unwrap_err();
        assert!(matches!(err, CoreError::NoConfidentMatch { .. }));

        let lenient =
            Retriever::new(context, model.clone()).with_min_similarity(Some(0.5));
        assert_eq!(lenient.retrieve(&question).await.unwrap().frame.ordinal, 1);
    }

    #[tokio::test]
    async fn test_repeated_retrieval_is_deterministic() {
        let model = Arc::new(FakeEmbeddingModel::new());
        let context = indexed_context(&model).await;
        let retriever = Retriever::new(context, model);

        let first = retriever.retrieve("something blue-ish").await.unwrap();
        for _ in 0..5 {
            assert_eq!(retriever.retrieve("something blue-ish").await.unwrap(), first);
        }
    }
}
