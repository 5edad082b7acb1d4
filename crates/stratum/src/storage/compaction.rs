//! Content compression for archival items
//!
//! The tier manager only tracks the `compressed` flag and a reference to the
//! compressed form; producing that form is delegated to a [`Compressor`].
//! Compression is lossy and only applied when enabled in the tier config.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

use crate::index::bm25::is_stop_word;
use crate::memory::MemoryItem;
use crate::storage::envelope::content_digest;

/// Replacement content plus a reference identifying how it was produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedForm {
    pub content: String,
    pub reference: String,
}

/// Produces a smaller representation of an item's content.
pub trait Compressor: Send + Sync + fmt::Debug {
    /// `None` when compressing would not make the content smaller
    fn compress(&self, item: &MemoryItem) -> Option<CompressedForm>;
}

/// How aggressively [`SummaryCompressor`] reduces content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    /// Leading sentences
    #[default]
    Summary,
    /// Distinct significant words
    Keywords,
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionLevel::Summary => write!(f, "summary"),
            CompressionLevel::Keywords => write!(f, "keywords"),
        }
    }
}

/// Extractive compressor keeping leading sentences or keywords
#[derive(Debug, Clone)]
pub struct SummaryCompressor {
    pub level: CompressionLevel,
    pub max_sentences: usize,
    pub max_keywords: usize,
    pub min_word_length: usize,
}

impl Default for SummaryCompressor {
    fn default() -> Self {
        Self {
            level: CompressionLevel::Summary,
            max_sentences: 3,
            max_keywords: 20,
            min_word_length: 4,
        }
    }
}

impl SummaryCompressor {
    pub fn new(level: CompressionLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    fn summarize(&self, content: &str) -> String {
        let sentences: Vec<&str> = content
            .split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(self.max_sentences)
            .collect();

        if sentences.is_empty() {
            content.chars().take(200).collect()
        } else {
            sentences.join(". ") + "."
        }
    }

    fn keywords(&self, content: &str) -> String {
        let mut seen = HashSet::new();
        content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.chars().count() >= self.min_word_length)
            .filter(|word| {
                let lower = word.to_lowercase();
                !is_stop_word(&lower) && seen.insert(lower)
            })
            .take(self.max_keywords)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Compressor for SummaryCompressor {
    fn compress(&self, item: &MemoryItem) -> Option<CompressedForm> {
        let content = match self.level {
            CompressionLevel::Summary => self.summarize(&item.content),
            CompressionLevel::Keywords => self.keywords(&item.content),
        };
        if content.len() >= item.content.len() {
            return None;
        }

        Some(CompressedForm {
            content,
            reference: format!("{}:{}", self.level, content_digest(&item.content)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Rust has ownership. Borrowing is checked at compile time! \
                        Lifetimes annotate references. Traits describe shared behavior?";

    #[test]
    fn test_summary_keeps_leading_sentences() {
        let compressor = SummaryCompressor::default();
        let form = compressor.compress(&MemoryItem::new(TEXT)).unwrap();

        assert_eq!(
            form.content,
            "Rust has ownership. Borrowing is checked at compile time. Lifetimes annotate references."
        );
        assert!(form.reference.starts_with("summary:"));
    }

    #[test]
    fn test_keywords_drop_stop_words_and_duplicates() {
        let compressor = SummaryCompressor::new(CompressionLevel::Keywords);
        let item = MemoryItem::new("Ownership ensures memory safety; ownership also prevents data races with borrowing");
        let form = compressor.compress(&item).unwrap();

        assert_eq!(form.content, "Ownership, ensures, memory, safety, prevents, data, races, borrowing");
        assert!(form.reference.starts_with("keywords:"));
    }

    #[test]
    fn test_short_content_is_left_alone() {
        let compressor = SummaryCompressor::default();
        assert!(compressor.compress(&MemoryItem::new("Tiny note.")).is_none());
    }

    #[test]
    fn test_reference_identifies_original() {
        let compressor = SummaryCompressor::default();
        let a = compressor.compress(&MemoryItem::new(TEXT)).unwrap();
        let b = compressor.compress(&MemoryItem::new(format!("{TEXT} Extra."))).unwrap();

        assert_eq!(a.content, b.content);
        assert_ne!(a.reference, b.reference);
    }
}
