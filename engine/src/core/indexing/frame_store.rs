//! Frame Store
//!
//! Positional frame metadata, aligned 1:1 with the vector index.
//! Positions are contiguous from 0; a gap is an integrity violation.

use crate::core::{CoreError, CoreResult, Frame, Ordinal};

/// Frame metadata indexed by position
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameStore {
    frames: Vec<Frame>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from frames loaded from disk, checking contiguity
    pub fn from_frames(frames: Vec<Frame>) -> CoreResult<Self> {
        for (position, frame) in frames.iter().enumerate() {
            if frame.ordinal != position {
                return Err(CoreError::CorruptStore(format!(
                    "expected frame ordinal {} at position {}, found {}",
                    position, position, frame.ordinal
                )));
            }
        }
        Ok(Self { frames })
    }

    /// Frame at `position`
    pub fn get(&self, position: Ordinal) -> CoreResult<&Frame> {
        self.frames.get(position).ok_or_else(|| {
            CoreError::CorruptStore(format!(
                "no frame at position {} (store has {})",
                position,
                self.frames.len()
            ))
        })
    }

    /// Replaces the frame at `position` or appends at `len()`.
    ///
    /// The frame's ordinal is set to `position`. Any other position would
    /// leave a gap and is rejected.
    pub fn put(&mut self, position: Ordinal, mut frame: Frame) -> CoreResult<()> {
        frame.ordinal = position;
        match position.cmp(&self.frames.len()) {
            std::cmp::Ordering::Less => {
                self.frames[position] = frame;
                Ok(())
            }
            std::cmp::Ordering::Equal => {
                self.frames.push(frame);
                Ok(())
            }
            std::cmp::Ordering::Greater => Err(CoreError::CorruptStore(format!(
                "put at position {} would leave a gap after {}",
                position,
                self.frames.len()
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn frame(ordinal: Ordinal) -> Frame {
        Frame {
            ordinal,
            source_path: PathBuf::from(format!("frame_{ordinal:06}.jpg")),
            source_index: ordinal as u64 * 30,
            timestamp_sec: ordinal as f64,
            transcript: format!("Transcription for frame {}", ordinal * 30),
        }
    }

    #[test]
    fn test_put_appends_and_replaces() {
        let mut store = FrameStore::new();
        store.put(0, frame(0)).unwrap();
        store.put(1, frame(1)).unwrap();
        assert_eq!(store.len(), 2);

        let mut replacement = frame(7);
        replacement.transcript = "replaced".to_string();
        store.put(1, replacement).unwrap();

        let got = store.get(1).unwrap();
        assert_eq!(got.ordinal, 1);
        assert_eq!(got.transcript, "replaced");
    }

    #[test]
    fn test_put_rejects_gap() {
        let mut store = FrameStore::new();
        store.put(0, frame(0)).unwrap();

        let err = store.put(2, frame(2)).unwrap_err();
        assert!(matches!(err, CoreError::CorruptStore(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_out_of_range() {
        let store = FrameStore::from_frames(vec![frame(0)]).unwrap();
        assert!(store.get(0).is_ok());
        assert!(matches!(store.get(1), Err(CoreError::CorruptStore(_))));
    }

    #[test]
    fn test_from_frames_requires_contiguous_ordinals() {
        assert!(FrameStore::from_frames(vec![frame(0), frame(1), frame(2)]).is_ok());
        assert!(FrameStore::from_frames(Vec::new()).unwrap().is_empty());

        let gap = FrameStore::from_frames(vec![frame(0), frame(2)]);
        assert!(matches!(gap, Err(CoreError::CorruptStore(_))));

        let offset = FrameStore::from_frames(vec![frame(1)]);
        assert!(matches!(offset, Err(CoreError::CorruptStore(_))));

        let duplicate = FrameStore::from_frames(vec![frame(0), frame(0)]);
        assert!(matches!(duplicate, Err(CoreError::CorruptStore(_))));
    }
}
