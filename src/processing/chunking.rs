//! Token-accurate sliding-window chunking.
//!
//! Extracted text is segmented into fixed token windows so retrieval can
//! address exact offsets into the source text. The windowing is a pure
//! function of the input: chunking the same text twice yields identical
//! boundaries, which is what makes delete-then-recreate reindexing safe.

use anyhow::Error as TokenizerError;
use thiserror::Error;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Errors produced while turning raw text into token-window chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// The configured window geometry cannot make progress.
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidWindow {
        /// Configured token budget per window.
        size: usize,
        /// Configured overlap between adjacent windows.
        overlap: usize,
    },
    /// Tokenizer resources were unavailable.
    #[error("failed to initialize tokenizer: {source}")]
    Tokenizer {
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
    /// A token window could not be decoded back to text.
    #[error("failed to decode token window starting at {start_token}: {source}")]
    Decode {
        /// Token offset of the window that failed to decode.
        start_token: usize,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// One window of tokens decoded back to text, with its offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Decoded text of the token window.
    pub text: String,
    /// Zero-based position of the chunk within the document.
    pub index: usize,
    /// Token offset where the window starts.
    pub start_token: usize,
    /// Token offset where the window ends (clamped to the text length).
    pub end_token: usize,
    /// Number of tokens in the window.
    pub token_count: usize,
}

/// Deterministic sliding-window chunker over the `cl100k_base` encoding.
pub struct Chunker {
    encoding: CoreBPE,
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Build a chunker with the given window geometry.
    ///
    /// `overlap` must be strictly smaller than `chunk_size` so every window
    /// advances; the step between windows is `chunk_size - overlap`.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(ChunkingError::InvalidWindow {
                size: chunk_size,
                overlap,
            });
        }
        let encoding = cl100k_base().map_err(|source| ChunkingError::Tokenizer {
            source: source.into(),
        })?;
        Ok(Self {
            encoding,
            chunk_size,
            overlap,
        })
    }

    /// Split `text` into overlapping token windows.
    ///
    /// Empty or whitespace-only input yields an empty vector; callers treat
    /// that as a no-op, not an error. For `n` tokens the chunk count is
    /// `max(1, ceil(max(n - overlap, 0) / step))`: iteration stops once the
    /// next window would add no tokens beyond the previous window's overlap.
    pub fn chunk(&self, text: &str) -> Result<Vec<TextChunk>, ChunkingError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let tokens = self.encoding.encode_ordinary(text);
        let total = tokens.len();
        let step = self.chunk_size - self.overlap;

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(total);
            let window = tokens[start..end].to_vec();
            let text = self
                .encoding
                .decode(window)
                .map_err(|source| ChunkingError::Decode {
                    start_token: start,
                    source: source.into(),
                })?;
            chunks.push(TextChunk {
                text,
                index: chunks.len(),
                start_token: start,
                end_token: end,
                token_count: end - start,
            });

            start += step;
            if start + self.overlap >= total {
                break;
            }
        }

        Ok(chunks)
    }

    /// Number of tokens the configured encoding assigns to `text`.
    pub fn count_tokens(&self, text: &str) -> usize {
        self.encoding.encode_ordinary(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: usize = 400;
    const OVERLAP: usize = 50;
    const STEP: usize = SIZE - OVERLAP;

    fn chunker() -> Chunker {
        Chunker::new(SIZE, OVERLAP).expect("chunker init")
    }

    /// `"word"` followed by `count - 1` repetitions of `" word"`, each a
    /// single cl100k token.
    fn text_with_tokens(count: usize) -> String {
        let mut text = String::from("word");
        for _ in 1..count {
            text.push_str(" word");
        }
        text
    }

    fn expected_count(tokens: usize) -> usize {
        if tokens == 0 {
            return 0;
        }
        let uncovered = tokens.saturating_sub(OVERLAP);
        std::cmp::max(1, uncovered.div_ceil(STEP))
    }

    #[test]
    fn rejects_invalid_window_geometry() {
        assert!(matches!(
            Chunker::new(0, 0),
            Err(ChunkingError::InvalidWindow { .. })
        ));
        assert!(matches!(
            Chunker::new(100, 100),
            Err(ChunkingError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn empty_and_whitespace_input_yield_no_chunks() {
        let chunker = chunker();
        assert!(chunker.chunk("").expect("chunk").is_empty());
        assert!(chunker.chunk("   \n\t  ").expect("chunk").is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunker = chunker();
        let chunks = chunker
            .chunk("patient presents with mild hypertension")
            .expect("chunk");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_token, 0);
        assert_eq!(chunks[0].token_count, chunks[0].end_token);
    }

    #[test]
    fn exactly_one_window_of_tokens_yields_single_chunk() {
        let chunker = chunker();
        let text = text_with_tokens(SIZE);
        assert_eq!(chunker.count_tokens(&text), SIZE);

        let chunks = chunker.chunk(&text).expect("chunk");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_token, SIZE);
    }

    #[test]
    fn chunk_count_matches_window_formula() {
        let chunker = chunker();
        for token_count in [1, 49, 50, 351, 400, 401, 750, 800, 1000, 1399] {
            let text = text_with_tokens(token_count);
            let total = chunker.count_tokens(&text);
            assert_eq!(total, token_count, "token construction for {token_count}");

            let chunks = chunker.chunk(&text).expect("chunk");
            assert_eq!(
                chunks.len(),
                expected_count(total),
                "chunk count for {total} tokens"
            );

            for (position, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, position);
                assert_eq!(chunk.start_token, position * STEP);
                assert_eq!(chunk.end_token, (chunk.start_token + SIZE).min(total));
                assert_eq!(chunk.token_count, chunk.end_token - chunk.start_token);
            }
        }
    }

    #[test]
    fn thousand_token_text_splits_into_three_windows() {
        let chunker = chunker();
        let text = text_with_tokens(1000);
        assert_eq!(chunker.count_tokens(&text), 1000);

        let chunks = chunker.chunk(&text).expect("chunk");
        assert_eq!(chunks.len(), 3);

        let starts: Vec<usize> = chunks.iter().map(|chunk| chunk.start_token).collect();
        assert_eq!(starts, vec![0, 350, 700]);

        let last = chunks.last().expect("last chunk");
        assert_eq!(last.end_token, 1000);
        assert_eq!(last.token_count, 300);
    }

    #[test]
    fn chunking_is_deterministic() {
        let chunker = chunker();
        let text = text_with_tokens(900);
        let first = chunker.chunk(&text).expect("chunk");
        let second = chunker.chunk(&text).expect("chunk");
        assert_eq!(first, second);
    }

    #[test]
    fn windows_round_trip_through_the_tokenizer() {
        let chunker = chunker();
        let text = "Blood pressure 140/90 mmHg. Prescribed lisinopril 10mg daily; follow-up in two weeks. ".repeat(40);
        let tokens = chunker.encoding.encode_ordinary(&text);

        let chunks = chunker.chunk(&text).expect("chunk");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            let window = tokens[chunk.start_token..chunk.end_token].to_vec();
            let decoded = chunker.encoding.decode(window).expect("decode window");
            assert_eq!(chunk.text, decoded);
        }
    }
}
