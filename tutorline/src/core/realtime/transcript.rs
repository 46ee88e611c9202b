//! Assistant transcript buffer.
//!
//! Deltas accumulate into the current utterance. When the utterance settles
//! the buffer holds the final text until a delayed clear fires. Every
//! mutation bumps a generation counter so a clear scheduled for one
//! utterance never wipes the next one.

#[derive(Debug, Default, Clone)]
pub struct TranscriptBuffer {
    text: String,
    generation: u64,
    settled: bool,
}

impl TranscriptBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta. The first delta after a settled utterance starts a
    /// fresh one.
    pub fn append(&mut self, delta: &str) -> &str {
        if self.settled {
            self.text.clear();
            self.settled = false;
        }
        self.text.push_str(delta);
        self.generation += 1;
        &self.text
    }

    /// Replace with the final text. Returns the generation a later
    /// [`clear_if`](Self::clear_if) must match.
    pub fn finish(&mut self, transcript: &str) -> u64 {
        self.text.clear();
        self.text.push_str(transcript);
        self.settled = true;
        self.generation += 1;
        self.generation
    }

    /// Clear only if nothing changed since `generation`.
    pub fn clear_if(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.clear();
        true
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.settled = false;
        self.generation += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
