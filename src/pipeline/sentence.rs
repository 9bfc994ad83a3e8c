//! Splits a live token stream into sentences.
//!
//! A sentence ends after a run of `.`, `?` or `!`. A run that reaches the end of
//! the buffer is held back until more text arrives, so `"Wait.."` followed by
//! `"."` yields `"Wait..."` and never `"Wait.."` plus `"."`.

#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

fn is_terminal(byte: u8) -> bool {
    matches!(byte, b'.' | b'?' | b'!')
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return the sentences it completed, in text order.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);

        let mut sentences = Vec::new();
        let mut start = 0;
        let bytes = self.buffer.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            if !is_terminal(bytes[i]) {
                i += 1;
                continue;
            }

            let mut end = i;
            while end < bytes.len() && is_terminal(bytes[end]) {
                end += 1;
            }
            if end == bytes.len() {
                break;
            }

            let sentence = self.buffer[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }

            let rest = &self.buffer[end..];
            start = end + (rest.len() - rest.trim_start().len());
            i = start;
        }

        self.buffer.drain(..start);
        sentences
    }

    /// Flush the trailing partial sentence at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Text held back waiting for a sentence boundary.
    #[cfg(test)]
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
