
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Sizes for splitting long documents, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on the length of every emitted chunk
    pub max_chunk_size: usize,
    /// How much of the previous chunk's tail is repeated at the start of the next one
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 2000,
            overlap: 200,
        }
    }
}

/// A bounded piece of a longer document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Leading characters of `text` copied from the previous chunk, including the joining space
    pub overlap_chars: usize,
}

impl Chunk {
    /// The chunk's own text with the carried-over prefix removed
    #[inline]
    pub fn body(&self) -> &str {
        let start = self
            .text
            .char_indices()
            .nth(self.overlap_chars)
            .map_or(self.text.len(), |(i, _)| i);
        self.text.get(start..).unwrap_or_default().trim_start()
    }

    #[inline]
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Splits documents into overlapping chunks on sentence boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn with_sizes(max_chunk_size: usize, overlap: usize) -> Self {
        Self::new(ChunkingConfig {
            max_chunk_size,
            overlap,
        })
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Lazily split `text`. The returned iterator is single-pass.
    ///
    /// Text that already fits in one chunk comes back whole (trimmed). Otherwise
    /// sentences are accumulated greedily; when the next sentence would overflow,
    /// the chunk is closed and the next one starts with the closed chunk's tail.
    /// Sentences longer than the limit are cut at character boundaries.
    #[inline]
    pub fn chunk<'a>(&self, text: &'a str) -> Chunks<'a> {
        let max_chars = self.config.max_chunk_size.max(1);
        let mut chunks = Chunks {
            sentences: Sentences { rest: "" },
            max_chars,
            overlap: self.config.overlap,
            buffer: String::new(),
            buffer_chars: 0,
            buffer_overlap: 0,
            ready: VecDeque::new(),
        };

        if text.chars().count() <= max_chars {
            let whole = text.trim();
            if !whole.is_empty() {
                chunks.ready.push_back(Chunk {
                    text: whole.to_string(),
                    overlap_chars: 0,
                });
            }
        } else {
            chunks.sentences = Sentences { rest: text };
        }

        chunks
    }
}

/// Iterator returned by [`TextChunker::chunk`]
#[derive(Debug)]
pub struct Chunks<'a> {
    sentences: Sentences<'a>,
    max_chars: usize,
    overlap: usize,
    buffer: String,
    buffer_chars: usize,
    buffer_overlap: usize,
    ready: VecDeque<Chunk>,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    #[inline]
    fn next(&mut self) -> Option<Chunk> {
        loop {
            if let Some(chunk) = self.ready.pop_front() {
                return Some(chunk);
            }

            match self.sentences.next() {
                Some(sentence) => self.push_sentence(sentence),
                None => return self.take_buffer(),
            }
        }
    }
}

impl Chunks<'_> {
    fn push_sentence(&mut self, sentence: &str) {
        let len = sentence.chars().count();

        if self.buffer.is_empty() {
            if len <= self.max_chars {
                self.start_buffer("", sentence, len);
            } else {
                self.hard_split(sentence);
            }
            return;
        }

        if self.buffer_chars + 1 + len <= self.max_chars {
            self.buffer.push(' ');
            self.buffer.push_str(sentence);
            self.buffer_chars += 1 + len;
            return;
        }

        let Some(closed) = self.take_buffer() else {
            return;
        };

        if len > self.max_chars {
            self.ready.push_back(closed);
            self.hard_split(sentence);
            return;
        }

        // Shrink the carried tail so tail + space + sentence still fits
        let room = self.max_chars.saturating_sub(len + 1);
        let tail = overlap_tail(&closed.text, self.overlap, room).to_string();
        self.ready.push_back(closed);
        self.start_buffer(&tail, sentence, len);
    }

    fn start_buffer(&mut self, tail: &str, sentence: &str, sentence_chars: usize) {
        self.buffer.clear();
        if tail.is_empty() {
            self.buffer_overlap = 0;
            self.buffer_chars = sentence_chars;
        } else {
            let tail_chars = tail.chars().count();
            self.buffer.push_str(tail);
            self.buffer.push(' ');
            self.buffer_overlap = tail_chars + 1;
            self.buffer_chars = tail_chars + 1 + sentence_chars;
        }
        self.buffer.push_str(sentence);
    }

    /// Cut an oversized sentence into limit-sized pieces. The last piece stays buffered.
    fn hard_split(&mut self, sentence: &str) {
        let chars: Vec<char> = sentence.chars().collect();
        let mut pieces = chars
            .chunks(self.max_chars)
            .map(|piece| piece.iter().collect::<String>().trim().to_string())
            .filter(|piece| !piece.is_empty())
            .peekable();

        while let Some(piece) = pieces.next() {
            if pieces.peek().is_some() {
                self.ready.push_back(Chunk {
                    text: piece,
                    overlap_chars: 0,
                });
            } else {
                let piece_chars = piece.chars().count();
                self.start_buffer("", &piece, piece_chars);
            }
        }
    }

    fn take_buffer(&mut self) -> Option<Chunk> {
        if self.buffer.is_empty() {
            return None;
        }

        let chunk = Chunk {
            text: std::mem::take(&mut self.buffer),
            overlap_chars: self.buffer_overlap,
        };
        self.buffer_chars = 0;
        self.buffer_overlap = 0;
        Some(chunk)
    }
}

/// Last `overlap` characters of a closed chunk, capped at `room`, trimmed.
/// Empty when the chunk is not longer than the overlap.
fn overlap_tail(text: &str, overlap: usize, room: usize) -> &str {
    let total = text.chars().count();
    let take = overlap.min(room);
    if overlap == 0 || take == 0 || total <= overlap {
        return "";
    }

    let start = text
        .char_indices()
        .nth(total - take)
        .map_or(text.len(), |(i, _)| i);
    text.get(start..).unwrap_or_default().trim()
}

/// Sentences split after runs of `.`, `!` or `?`, punctuation kept, whitespace trimmed
#[derive(Debug)]
struct Sentences<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Sentences<'a> {
    type Item = &'a str;

    #[inline]
    fn next(&mut self) -> Option<&'a str> {
        while !self.rest.is_empty() {
            let end = sentence_end(self.rest);
            let (sentence, rest) = self.rest.split_at(end);
            self.rest = rest;

            let sentence = sentence.trim();
            if !sentence.is_empty() {
                return Some(sentence);
            }
        }
        None
    }
}

fn sentence_end(text: &str) -> usize {
    let mut in_terminal_run = false;
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            in_terminal_run = true;
        } else if in_terminal_run {
            return i;
        }
    }
    text.len()
}
