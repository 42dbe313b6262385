// src/chunker.rs
//
// Splits normalized document text into overlapping, bounded-size chunks.
// Pure function over the input: no I/O, deterministic output.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Boundary preference order: paragraph, line, sentence, word. Anything
/// still oversized after the last separator is hard-cut at char boundaries.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// One bounded slice of document text, the unit of embedding. Immutable
/// once produced; `chunk_index` is ordinal within the producing call only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub text: String,
    pub doc_id: String,
    pub page_range: String,
    pub chunk_index: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    /// An overlap at or above the chunk size can never terminate; it is a
    /// configuration error and gets clamped to a tenth of the chunk size.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let chunk_overlap = if chunk_overlap >= chunk_size {
            warn!(
                chunk_size,
                chunk_overlap,
                "chunk_overlap must be smaller than chunk_size, clamping"
            );
            chunk_size / 10
        } else {
            chunk_overlap
        };
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    /// Split `text` into chunks of at most `chunk_size` characters with
    /// `chunk_overlap` characters carried between consecutive chunks where
    /// natural boundaries allow it. Empty or whitespace-only input yields
    /// an empty sequence.
    pub fn chunk(&self, text: &str, page_range: &str, doc_id: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            warn!(doc_id, page_range, "Empty text provided for chunking");
            return Vec::new();
        }

        let pieces = self.split_text(text);
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| Chunk {
                text,
                doc_id: doc_id.to_string(),
                page_range: page_range.to_string(),
                chunk_index,
            })
            .collect();

        info!(
            chunk_count = chunks.len(),
            text_chars = text.chars().count(),
            page_range,
            "Chunked text"
        );

        chunks
    }

    /// Raw split without metadata, used directly by tests and callers that
    /// bring their own bookkeeping.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let atoms = self.atomize(text, &SEPARATORS);
        self.merge(atoms)
    }

    /// Rough token estimate at ~4 characters per token.
    pub fn estimate_token_count(text: &str) -> usize {
        text.chars().count() / 4
    }

    /// Break text into ordered atoms, each at most `chunk_size` chars, whose
    /// concatenation reproduces the input exactly. Tries each separator in
    /// preference order; fragments keep their trailing separator so nothing
    /// is dropped.
    fn atomize(&self, text: &str, separators: &[&str]) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        if let Some((sep, rest)) = separators.split_first() {
            if text.contains(sep) {
                let mut atoms = Vec::new();
                for part in text.split_inclusive(sep) {
                    if char_len(part) <= self.chunk_size {
                        atoms.push(part.to_string());
                    } else {
                        atoms.extend(self.atomize(part, rest));
                    }
                }
                return atoms;
            }
            return self.atomize(text, rest);
        }

        hard_cut(text, self.chunk_size)
    }

    /// Greedily pack atoms into chunks of at most `chunk_size` chars. When a
    /// chunk is emitted, trailing atoms totalling at most `chunk_overlap`
    /// chars seed the next chunk, so consecutive chunks share a suffix/prefix.
    fn merge(&self, atoms: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for atom in atoms {
            let atom_len = char_len(&atom);

            if current_len + atom_len > self.chunk_size && !current.is_empty() {
                chunks.push(current.concat());

                let (carried, carried_len) = self.overlap_tail(&current);
                current = carried;
                current_len = carried_len;

                // If the carried overlap leaves no room for the next atom,
                // drop it; the size bound wins over overlap.
                if current_len + atom_len > self.chunk_size {
                    current.clear();
                    current_len = 0;
                }
            }

            current_len += atom_len;
            current.push(atom);
        }

        if !current.is_empty() {
            chunks.push(current.concat());
        }

        chunks
    }

    /// Trailing atoms of the emitted chunk whose total length fits within
    /// the configured overlap.
    fn overlap_tail(&self, emitted: &[String]) -> (Vec<String>, usize) {
        let mut carried = Vec::new();
        let mut carried_len = 0usize;
        for atom in emitted.iter().rev() {
            let len = char_len(atom);
            if carried_len + len > self.chunk_overlap {
                break;
            }
            carried_len += len;
            carried.push(atom.clone());
        }
        carried.reverse();
        (carried, carried_len)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cut text into fixed-width pieces at char boundaries.
fn hard_cut(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width)
        .map(|piece| piece.iter().collect())
        .collect()
}
