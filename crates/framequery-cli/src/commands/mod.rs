//! Command implementations

pub mod ask;
pub mod chat;
pub mod index;
pub mod info;
pub mod retrieve;

use framequery_lib::core::RetrievalResult;

/// Human-readable summary of a retrieved frame
pub(crate) fn describe_retrieval(result: &RetrievalResult) -> String {
    format!(
        "frame #{} at {:.2}s (source frame {}, score {:.4})\n  keyframe: {}\n  transcript: {}",
        result.frame.ordinal,
        result.frame.timestamp_sec,
        result.frame.source_index,
        result.score,
        result.frame.source_path.display(),
        result.transcript
    )
}
