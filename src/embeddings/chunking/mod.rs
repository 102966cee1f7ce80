
use std::collections::VecDeque;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::LoadedDocument;

/// Separators tried in order, coarsest first; the empty separator splits into characters
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Represents a chunk of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text
    pub content: String,
    /// Position of this chunk within the document, contiguous across pages
    pub chunk_index: usize,
    /// 1-based page number for paginated sources
    pub page: Option<u32>,
    /// Character offset of the chunk within its page or document text
    pub start_offset: usize,
}

/// Configuration for text chunking, both values measured in characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Maximum number of characters shared by adjacent chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Chunk every section of a loaded document
#[inline]
pub fn chunk_document(document: &LoadedDocument, config: &ChunkingConfig) -> Vec<TextChunk> {
    let mut chunks = Vec::new();

    for section in &document.sections {
        let pieces = split_text(&section.text, config);
        for (content, start_offset) in locate_chunks(&section.text, pieces) {
            chunks.push(TextChunk {
                content,
                chunk_index: chunks.len(),
                page: section.page,
                start_offset,
            });
        }
    }

    debug!(
        "Chunked '{}' into {} chunks (avg {} chars)",
        document.source,
        chunks.len(),
        chunks
            .iter()
            .map(|c| char_len(&c.content))
            .sum::<usize>()
            / chunks.len().max(1)
    );

    chunks
}

/// Split text recursively on paragraph, line, word and finally character boundaries
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: &ChunkingConfig) -> Vec<String> {
    let mut final_chunks = Vec::new();

    // Coarsest separator present in the text wins
    let mut separator = "";
    let mut finer: &[&str] = &[];
    for (i, candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            break;
        }
        if text.contains(*candidate) {
            separator = *candidate;
            finer = &separators[i + 1..];
            break;
        }
    }

    let splits: Vec<&str> = if separator.is_empty() {
        text.split_inclusive(|_: char| true).collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut good_splits = Vec::new();
    for split in splits {
        if char_len(split) < config.chunk_size {
            good_splits.push(split);
            continue;
        }

        if !good_splits.is_empty() {
            final_chunks.extend(merge_splits(&good_splits, separator, config));
            good_splits.clear();
        }

        if finer.is_empty() {
            final_chunks.push(split.to_string());
        } else {
            final_chunks.extend(split_recursive(split, finer, config));
        }
    }

    if !good_splits.is_empty() {
        final_chunks.extend(merge_splits(&good_splits, separator, config));
    }

    final_chunks
}

/// Greedily join small splits into chunks, keeping a tail of at most
/// `chunk_overlap` characters as the start of the next chunk
fn merge_splits(splits: &[&str], separator: &str, config: &ChunkingConfig) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0;

    for &split in splits {
        let len = char_len(split);

        if total + len + joiner_len(&current, separator_len) > config.chunk_size
            && !current.is_empty()
        {
            if let Some(chunk) = join_chunk(&current, separator) {
                chunks.push(chunk);
            }

            while total > config.chunk_overlap
                || (total + len + joiner_len(&current, separator_len) > config.chunk_size
                    && total > 0)
            {
                let Some(front) = current.pop_front() else {
                    break;
                };
                let joined = if current.is_empty() { 0 } else { separator_len };
                total = total.saturating_sub(char_len(front) + joined);
            }
        }

        current.push_back(split);
        total += len + if current.len() > 1 { separator_len } else { 0 };
    }

    if let Some(chunk) = join_chunk(&current, separator) {
        chunks.push(chunk);
    }

    chunks
}

fn joiner_len(current: &VecDeque<&str>, separator_len: usize) -> usize {
    if current.is_empty() { 0 } else { separator_len }
}

fn join_chunk(parts: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = parts.iter().join(separator);
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Pair each chunk with its character offset in `text`.
///
/// Chunks rejoin their pieces with a single separator, so a whitespace run in a
/// chunk matches any whitespace run in the text.
fn locate_chunks(text: &str, chunks: Vec<String>) -> Vec<(String, usize)> {
    let mut search_from = 0;
    let mut located = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let byte_offset = find_loosely(text, &chunk, search_from)
            .or_else(|| find_loosely(text, &chunk, 0))
            .unwrap_or(search_from);

        let start_offset = text.get(..byte_offset).map_or(0, char_len);
        search_from = byte_offset + chunk.chars().next().map_or(1, char::len_utf8);
        located.push((chunk, start_offset));
    }

    located
}

/// Byte offset of the first match of `chunk` at or after `from`
fn find_loosely(text: &str, chunk: &str, from: usize) -> Option<usize> {
    let first = chunk.chars().next()?;
    text.get(from..)?
        .char_indices()
        .filter(|&(_, c)| c == first)
        .map(|(i, _)| i + from)
        .find(|&start| {
            text.get(start..)
                .is_some_and(|rest| starts_with_loosely(rest, chunk))
        })
}

fn starts_with_loosely(text: &str, chunk: &str) -> bool {
    let mut text_chars = text.chars().peekable();
    let mut chunk_chars = chunk.chars().peekable();

    while let Some(c) = chunk_chars.next() {
        if c.is_whitespace() {
            while chunk_chars.next_if(|c| c.is_whitespace()).is_some() {}
            if !text_chars.next().is_some_and(char::is_whitespace) {
                return false;
            }
            while text_chars.next_if(|c| c.is_whitespace()).is_some() {}
        } else if text_chars.next() != Some(c) {
            return false;
        }
    }

    true
}

#[inline]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
