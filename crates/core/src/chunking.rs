use crate::error::IngestError;
use crate::models::{ChunkSpan, ChunkUnit, PageUnit, SpanUnit};
use std::str::FromStr;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const SENTENCE_SEPARATOR: &str = ". ";

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> Result<String, IngestError>;
}

pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn for_model(model: &str) -> Result<Self, IngestError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|error| {
            IngestError::Tokenizer(format!("no tokenizer for model '{model}': {error}"))
        })?;
        Ok(Self { bpe })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_ordinary(text)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, IngestError> {
        self.bpe
            .decode(tokens.to_vec())
            .map_err(|error| IngestError::Tokenizer(error.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkStrategy {
    #[default]
    Token,
    Character,
}

impl FromStr for ChunkStrategy {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(ChunkStrategy::Token),
            "char" | "character" => Ok(ChunkStrategy::Character),
            other => Err(IngestError::Configuration(format!(
                "choose a chunk strategy of token or char, got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub token_size: usize,
    pub token_overlap: usize,
    pub char_size: usize,
    pub char_overlap: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            token_size: 512,
            token_overlap: 128,
            char_size: 2_048,
            char_overlap: 300,
        }
    }
}

impl ChunkingOptions {
    pub fn validate(&self) -> Result<(), IngestError> {
        for (label, size, overlap) in [
            ("token", self.token_size, self.token_overlap),
            ("char", self.char_size, self.char_overlap),
        ] {
            if size == 0 || overlap >= size {
                return Err(IngestError::Configuration(format!(
                    "{label} overlap ({overlap}) must be smaller than {label} size ({size})"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Chunker {
    strategy: ChunkStrategy,
    options: ChunkingOptions,
    tokenizer: Option<Arc<dyn Tokenizer>>,
}

impl Chunker {
    pub fn token(tokenizer: Arc<dyn Tokenizer>, options: ChunkingOptions) -> Result<Self, IngestError> {
        options.validate()?;
        Ok(Self {
            strategy: ChunkStrategy::Token,
            options,
            tokenizer: Some(tokenizer),
        })
    }

    pub fn character(options: ChunkingOptions) -> Result<Self, IngestError> {
        options.validate()?;
        Ok(Self {
            strategy: ChunkStrategy::Character,
            options,
            tokenizer: None,
        })
    }

    pub fn for_strategy(
        strategy: ChunkStrategy,
        embedding_model: &str,
        options: ChunkingOptions,
    ) -> Result<Self, IngestError> {
        match strategy {
            ChunkStrategy::Token => {
                let tokenizer = TiktokenTokenizer::for_model(embedding_model)?;
                Self::token(Arc::new(tokenizer), options)
            }
            ChunkStrategy::Character => Self::character(options),
        }
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }

    pub fn split_pages(&self, pages: &[PageUnit]) -> Result<Vec<ChunkUnit>, IngestError> {
        let mut chunks = Vec::new();
        for page in pages {
            let pieces = match (self.strategy, &self.tokenizer) {
                (ChunkStrategy::Token, Some(tokenizer)) => split_tokens(
                    tokenizer.as_ref(),
                    &page.content,
                    self.options.token_size,
                    self.options.token_overlap,
                )?,
                (ChunkStrategy::Token, None) => {
                    return Err(IngestError::Configuration(
                        "token chunking needs a tokenizer".to_string(),
                    ))
                }
                (ChunkStrategy::Character, _) => split_characters(
                    &page.content,
                    self.options.char_size,
                    self.options.char_overlap,
                ),
            };

            chunks.extend(pieces.into_iter().map(|(content, span)| ChunkUnit {
                content,
                metadata: page.metadata.clone(),
                span,
            }));
        }
        Ok(chunks)
    }
}

/// Fixed windows of `size` tokens; consecutive windows share `overlap` tokens.
pub fn split_tokens(
    tokenizer: &dyn Tokenizer,
    text: &str,
    size: usize,
    overlap: usize,
) -> Result<Vec<(String, ChunkSpan)>, IngestError> {
    if overlap >= size {
        return Err(IngestError::Configuration(format!(
            "overlap ({overlap}) must be smaller than size ({size})"
        )));
    }

    let tokens = tokenizer.encode(text);
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + size).min(tokens.len());
        let content = tokenizer.decode(&tokens[start..end])?;
        pieces.push((
            content,
            ChunkSpan {
                unit: SpanUnit::Token,
                start,
                end,
            },
        ));
        if end == tokens.len() {
            break;
        }
        start += size - overlap;
    }
    Ok(pieces)
}

fn sentence_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(SENTENCE_SEPARATOR) {
        if position > start {
            ranges.push((start, position));
        }
        start = position + SENTENCE_SEPARATOR.len();
    }
    if start < text.len() {
        ranges.push((start, text.len()));
    }
    ranges
}

/// Greedy merge of sentences up to `size` characters, carrying trailing
/// sentences worth at most `overlap` characters into the next window.
/// A window that still exceeds `size` (no separator in range) is cut into
/// fixed character windows.
pub fn split_characters(text: &str, size: usize, overlap: usize) -> Vec<(String, ChunkSpan)> {
    let char_len = |start: usize, end: usize| text[start..end].chars().count();
    let separator_len = SENTENCE_SEPARATOR.chars().count();

    let mut windows: Vec<(usize, usize)> = Vec::new();
    let mut current: Vec<(usize, usize)> = Vec::new();
    let mut total = 0usize;

    for range in sentence_ranges(text) {
        let length = char_len(range.0, range.1);
        let joiner = if current.is_empty() { 0 } else { separator_len };

        if total + length + joiner > size && !current.is_empty() {
            windows.push((current[0].0, current[current.len() - 1].1));
            while let Some(first) = current.first().copied() {
                if total <= overlap && total + length + separator_len <= size {
                    break;
                }
                current.remove(0);
                total -= char_len(first.0, first.1);
                if !current.is_empty() {
                    total -= separator_len;
                }
            }
        }

        if !current.is_empty() {
            total += separator_len;
        }
        current.push(range);
        total += length;
    }
    if let (Some(first), Some(last)) = (current.first(), current.last()) {
        windows.push((first.0, last.1));
    }

    let mut pieces = Vec::new();
    for (start, end) in windows {
        let char_start = text[..start].chars().count();
        let window = &text[start..end];
        for (content, offset, length) in force_split(window, size, overlap) {
            pieces.push((
                content,
                ChunkSpan {
                    unit: SpanUnit::Char,
                    start: char_start + offset,
                    end: char_start + offset + length,
                },
            ));
        }
    }
    pieces
}

fn force_split(window: &str, size: usize, overlap: usize) -> Vec<(String, usize, usize)> {
    let chars: Vec<char> = window.chars().collect();
    if chars.len() <= size {
        return vec![(window.to_string(), 0, chars.len())];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        pieces.push((piece, start, end - start));
        if end == chars.len() {
            break;
        }
        start = start.saturating_add(size.saturating_sub(overlap));
    }
    pieces
}
