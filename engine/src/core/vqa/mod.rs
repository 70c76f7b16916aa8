//! Visual Question Answering Module
//!
//! The VQA model receives the retrieved keyframe together with a prompt that
//! folds in the chat history and the frame transcript.

#[cfg(feature = "ai-providers")]
mod llava;

#[cfg(feature = "ai-providers")]
pub use llava::LlavaApiClient;

use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::memory::ChatTurn;
use crate::core::CoreResult;

/// Answer text used when the model response carries none
pub const NO_ANSWER: &str = "No answer found.";

// =============================================================================
// VQA Model Trait
// =============================================================================

/// Everything the model needs to answer about one frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VqaRequest {
    /// Keyframe image on disk
    pub frame_path: PathBuf,
    pub question: String,
    pub transcript: String,
    /// Previous turns, oldest first
    pub history: Vec<ChatTurn>,
}

impl VqaRequest {
    /// Prompt text sent alongside the image
    pub fn prompt(&self) -> String {
        build_prompt(&self.history, &self.transcript, &self.question)
    }
}

/// Image + text question answering model (LLaVA and friends)
#[async_trait]
pub trait VqaModel: Send + Sync {
    /// Returns the model name
    fn name(&self) -> &str;

    /// Answers the question about the request's frame
    async fn generate_answer(&self, request: &VqaRequest) -> CoreResult<String>;
}

// =============================================================================
// Prompt
// =============================================================================

/// Renders the VQA prompt:
///
/// ```text
/// Chat History:
/// User: ...
/// Assistant: ...
///
/// Frame Transcription:
/// <transcript>
///
/// Question: <question>
/// Answer:
/// ```
pub fn build_prompt(history: &[ChatTurn], transcript: &str, question: &str) -> String {
    let mut prompt = String::from("Chat History:\n");
    for turn in history {
        let _ = writeln!(prompt, "User: {}", turn.question);
        let _ = writeln!(prompt, "Assistant: {}", turn.answer);
    }
    let _ = write!(
        prompt,
        "\nFrame Transcription:\n{}\n\nQuestion: {}\nAnswer:",
        transcript, question
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_without_history() {
        let prompt = build_prompt(&[], "Transcription for frame 30", "What color is the car?");
        assert_eq!(
            prompt,
            "Chat History:\n\nFrame Transcription:\nTranscription for frame 30\n\nQuestion: What color is the car?\nAnswer:"
        );
    }

    #[test]
    fn test_prompt_with_history() {
        let history = vec![
            ChatTurn {
                question: "Who is there?".to_string(),
                answer: "A man.".to_string(),
            },
            ChatTurn {
                question: "Where?".to_string(),
                answer: "On a bridge.".to_string(),
            },
        ];

        let prompt = build_prompt(&history, "t", "What is he holding?");
        assert!(prompt.starts_with(
            "Chat History:\nUser: Who is there?\nAssistant: A man.\nUser: Where?\nAssistant: On a bridge.\n\n"
        ));
        assert!(prompt.ends_with("Question: What is he holding?\nAnswer:"));
    }

    #[test]
    fn test_request_prompt_matches_builder() {
        let request = VqaRequest {
            frame_path: PathBuf::from("frame_000001.jpg"),
            question: "q".to_string(),
            transcript: "t".to_string(),
            history: Vec::new(),
        };
        assert_eq!(request.prompt(), build_prompt(&[], "t", "q"));
    }
}
