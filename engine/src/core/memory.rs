//! Chat Memory
//!
//! Bounded history of question/answer turns fed back into the VQA prompt.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of turns kept
pub const DEFAULT_MAX_TURNS: usize = 10;

/// One question and the answer it received
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

/// FIFO of the most recent turns
#[derive(Clone, Debug)]
pub struct ChatMemory {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
}

impl Default for ChatMemory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ChatMemory {
    /// Creates an empty memory; a capacity of 0 is treated as 1
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// Appends a turn, evicting the oldest one when full
    pub fn add(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if self.turns.len() == self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(ChatTurn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    /// Turns from oldest to newest
    pub fn entries(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_entries_in_order() {
        let mut memory = ChatMemory::new(3);
        memory.add("q1", "a1");
        memory.add("q2", "a2");

        let entries = memory.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].question, "q1");
        assert_eq!(entries[1].answer, "a2");
    }

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let mut memory = ChatMemory::default();
        for i in 0..12 {
            memory.add(format!("q{i}"), format!("a{i}"));
        }

        assert_eq!(memory.len(), DEFAULT_MAX_TURNS);
        let entries = memory.entries();
        assert_eq!(entries.first().unwrap().question, "q2");
        assert_eq!(entries.last().unwrap().question, "q11");
    }

    #[test]
    fn test_zero_capacity_keeps_one_turn() {
        let mut memory = ChatMemory::new(0);
        memory.add("q1", "a1");
        memory.add("q2", "a2");

        assert_eq!(memory.max_turns(), 1);
        assert_eq!(memory.entries()[0].question, "q2");
    }

    #[test]
    fn test_clear() {
        let mut memory = ChatMemory::new(2);
        memory.add("q", "a");
        memory.clear();
        assert!(memory.is_empty());
    }
}
