//! BM25 inverted index
//!
//! Postings map each term to the documents containing it and the term's
//! frequency in each. Document count, total token length and per-term
//! document frequency are running totals, so IDF is derived in O(1) per
//! query term instead of rescanning the corpus.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use uuid::Uuid;

/// Words too common to carry ranking signal
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "this", "that", "these",
    "those", "it", "its", "they", "them", "their", "we", "you", "your", "our", "i", "me", "my",
    "he", "she", "his", "her", "not", "no", "what", "which", "who", "when", "where", "why", "how",
    "all", "each", "every", "both", "some", "such", "than", "too", "very", "just", "also", "only",
    "then", "there", "here", "now", "about", "into", "over", "so", "if", "as",
];

/// BM25 scoring parameters
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bm25Config {
    /// Term-frequency saturation (default: 1.2)
    #[serde(default = "default_k1")]
    pub k1: f32,
    /// Document length normalization (default: 0.75)
    #[serde(default = "default_b")]
    pub b: f32,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
        }
    }
}

fn default_k1() -> f32 {
    1.2
}

fn default_b() -> f32 {
    0.75
}

/// Split text into lowercase alphanumeric tokens, dropping stop words
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !is_stop_word(word))
        .collect()
}

/// Whether a lowercased word carries no retrieval signal
pub(crate) fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// One lexical search result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    pub id: Uuid,
    pub score: f32,
}

/// Inverted index scored with Okapi BM25.
#[derive(Debug, Default)]
pub struct Bm25Index {
    config: Bm25Config,
    /// term -> (document -> term frequency)
    postings: HashMap<String, HashMap<Uuid, u32>>,
    /// document -> token count
    doc_lengths: HashMap<Uuid, u32>,
    /// document -> distinct terms, for removal
    doc_terms: HashMap<Uuid, Vec<String>>,
    total_length: u64,
}

impl Bm25Index {
    pub fn new(config: Bm25Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Number of distinct terms in the vocabulary
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.doc_lengths.contains_key(id)
    }

    /// Number of documents containing `term`
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, HashMap::len)
    }

    pub fn average_length(&self) -> f32 {
        if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.total_length as f32 / self.doc_lengths.len() as f32
        }
    }

    /// Index a document's tokens, replacing any previous version of it
    pub fn index(&mut self, id: Uuid, tokens: &[String]) {
        self.remove(&id);

        let mut frequencies: HashMap<&str, u32> = HashMap::new();
        for token in tokens {
            *frequencies.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut terms = Vec::with_capacity(frequencies.len());
        for (term, tf) in frequencies {
            self.postings
                .entry(term.to_string())
                .or_default()
                .insert(id, tf);
            terms.push(term.to_string());
        }

        let length = tokens.len() as u32;
        self.doc_lengths.insert(id, length);
        self.doc_terms.insert(id, terms);
        self.total_length += u64::from(length);
    }

    /// Remove every posting for a document. Returns `false` if it was not indexed.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        let Some(length) = self.doc_lengths.remove(id) else {
            return false;
        };
        self.total_length = self.total_length.saturating_sub(u64::from(length));

        for term in self.doc_terms.remove(id).unwrap_or_default() {
            if let Some(docs) = self.postings.get_mut(&term) {
                docs.remove(id);
                if docs.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        true
    }

    /// Score documents against the query terms and return the top `k`.
    ///
    /// Repeated query terms count once. Ties are ordered by ascending id.
    pub fn search(&self, query: &[String], k: usize) -> Vec<LexicalHit> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }

        let avg_length = self.average_length().max(f32::EPSILON);
        let Bm25Config { k1, b } = self.config;
        let mut scores: HashMap<Uuid, f32> = HashMap::new();

        let unique: HashSet<&str> = query.iter().map(String::as_str).collect();
        for term in unique {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(docs.len());
            for (id, &tf) in docs {
                let length = self.doc_lengths.get(id).copied().unwrap_or(0) as f32;
                let tf = tf as f32;
                let norm = k1 * (1.0 - b + b * length / avg_length);
                *scores.entry(*id).or_insert(0.0) += idf * tf * (k1 + 1.0) / (tf + norm);
            }
        }

        let mut hits: Vec<LexicalHit> = scores
            .into_iter()
            .map(|(id, score)| LexicalHit { id, score })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(k);
        hits
    }

    /// Non-negative IDF: ln(1 + (N - df + 0.5) / (df + 0.5))
    fn idf(&self, document_frequency: usize) -> f32 {
        let n = self.doc_lengths.len() as f32;
        let df = document_frequency as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }
}
