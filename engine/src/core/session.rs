//! QA Session
//!
//! One conversation about the indexed video: each question is retrieved
//! against the snapshot, answered by the VQA model with the chat history, and
//! then remembered.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::core::memory::ChatMemory;
use crate::core::retrieval::Retriever;
use crate::core::vqa::{VqaModel, VqaRequest};
use crate::core::{CoreResult, RetrievalResult};

/// Answer to one question, with the frame it was based on
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub text: String,
    pub retrieval: RetrievalResult,
}

/// Stateful question answering over the active snapshot
pub struct QaSession {
    retriever: Arc<Retriever>,
    vqa: Arc<dyn VqaModel>,
    memory: ChatMemory,
}

impl QaSession {
    pub fn new(retriever: Arc<Retriever>, vqa: Arc<dyn VqaModel>, memory: ChatMemory) -> Self {
        Self {
            retriever,
            vqa,
            memory,
        }
    }

    /// Retrieves the best frame, asks the VQA model, and records the turn.
    ///
    /// Nothing is recorded if retrieval or the VQA call fails.
    pub async fn ask(&mut self, question: &str) -> CoreResult<Answer> {
        let retrieval = self.retriever.retrieve(question).await?;

        let request = VqaRequest {
            frame_path: retrieval.frame.source_path.clone(),
            question: question.trim().to_string(),
            transcript: retrieval.transcript.clone(),
            history: self.memory.entries(),
        };
        let text = self.vqa.generate_answer(&request).await?;

        info!(
            "Answered from frame {} via {} (score {:.4})",
            retrieval.frame.ordinal,
            self.vqa.name(),
            retrieval.score
        );
        self.memory.add(request.question, text.clone());

        Ok(Answer { text, retrieval })
    }

    pub fn memory(&self) -> &ChatMemory {
        &self.memory
    }

    /// Forgets the conversation so far
    pub fn reset(&mut self) {
        self.memory.clear();
    }
}
