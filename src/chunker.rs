use regex::Regex;
use serde::Serialize;

use crate::error::{ConvertError, Result};

/// One unit of synthesis work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    /// Length in characters.
    pub len: usize,
}

/// Splits text into sentence-aligned chunks of bounded length.
pub struct Chunker {
    sentence_boundary: Regex,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker {
    pub fn new() -> Self {
        Self {
            sentence_boundary: Regex::new(r"[.!?]+\s+").expect("sentence boundary pattern"),
        }
    }

    /// Greedily packs whole sentences into chunks of at most `max_len`
    /// characters. A sentence longer than `max_len` becomes its own chunk.
    pub fn split(&self, text: &str, max_len: usize) -> Result<Vec<TextChunk>> {
        if max_len == 0 {
            return Err(ConvertError::InvalidArgument(
                "chunk size must be a positive integer".to_string(),
            ));
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;

        for sentence in self.sentences(text) {
            let sentence_len = sentence.chars().count();
            let separator = usize::from(!current.is_empty());

            if current_len + separator + sentence_len > max_len && !current.is_empty() {
                push_chunk(&mut chunks, &mut current);
                current_len = 0;
            }

            if !current.is_empty() {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(sentence);
            current_len += sentence_len;
        }

        if !current.is_empty() {
            push_chunk(&mut chunks, &mut current);
        }

        Ok(chunks)
    }

    /// Sentences keep their terminal punctuation; surrounding whitespace is dropped.
    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;

        for boundary in self.sentence_boundary.find_iter(text) {
            let end = boundary.start() + boundary.as_str().trim_end().len();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = boundary.end();
        }

        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }

        sentences
    }
}

fn push_chunk(chunks: &mut Vec<TextChunk>, current: &mut String) {
    let text = std::mem::take(current);
    chunks.push(TextChunk {
        index: chunks.len(),
        len: text.chars().count(),
        text,
    });
}
