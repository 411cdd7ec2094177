//! Okapi BM25 over tool name, description, and server id.
//!
//! Fields are boosted at indexing time (name ×3, description ×1,
//! server id ×0.5): a term occurrence contributes its boost to the
//! weighted term frequency and to the document length. A query term with
//! no exact vocabulary match takes a single prefix fallback (doc term
//! starts with query term or vice versa) at half score.

use std::collections::{BTreeMap, HashMap};

const K1: f64 = 1.2;
const B: f64 = 0.75;
const MIN_TOKEN_LEN: usize = 2;
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Longest-first so `est` wins over `es` over `s`.
const STEM_SUFFIXES: &[&str] = &[
    "tion", "ness", "ing", "est", "es", "ed", "er", "ly", "s",
];

#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Exposed tool name of the matching document.
    pub exposed_name: String,
    pub score: f64,
}

#[derive(Debug, Default)]
struct Document {
    exposed_name: String,
    /// stemmed term → boost-weighted frequency.
    term_weights: HashMap<String, f64>,
    /// Sum of weighted frequencies.
    length: f64,
}

/// Immutable index rebuilt on every catalog refresh.
#[derive(Debug, Default)]
pub struct SearchIndex {
    documents: Vec<Document>,
    /// stemmed term → number of documents containing it. BTreeMap keeps
    /// prefix-fallback selection deterministic.
    document_frequency: BTreeMap<String, usize>,
    average_length: f64,
}

pub struct IndexEntry<'a> {
    pub exposed_name: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub server_id: &'a str,
}

impl SearchIndex {
    pub fn build(entries: &[IndexEntry<'_>]) -> Self {
        let mut documents = Vec::with_capacity(entries.len());
        let mut document_frequency: BTreeMap<String, usize> = BTreeMap::new();

        for entry in entries {
            let mut doc = Document {
                exposed_name: entry.exposed_name.to_string(),
                ..Document::default()
            };
            for (text, boost) in [
                (entry.name, 3.0),
                (entry.description, 1.0),
                (entry.server_id, 0.5),
            ] {
                for token in tokenize(text) {
                    *doc.term_weights.entry(token).or_insert(0.0) += boost;
                    doc.length += boost;
                }
            }
            for term in doc.term_weights.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            documents.push(doc);
        }

        let average_length = if documents.is_empty() {
            0.0
        } else {
            documents.iter().map(|d| d.length).sum::<f64>() / documents.len() as f64
        };

        Self {
            documents,
            document_frequency,
            average_length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Score every document against `query`; results sorted by score
    /// descending, ties broken by exposed name.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        if self.documents.is_empty() {
            return Vec::new();
        }

        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<SearchHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let score: f64 = terms
                    .iter()
                    .map(|term| self.term_score(term, doc))
                    .sum();
                (score > 0.0).then(|| SearchHit {
                    exposed_name: doc.exposed_name.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.exposed_name.cmp(&b.exposed_name))
        });
        hits.truncate(limit.max(1));
        hits
    }

    fn term_score(&self, term: &str, doc: &Document) -> f64 {
        if self.document_frequency.contains_key(term) {
            return self.bm25(term, doc, 1.0);
        }

        // Single prefix fallback at half score: the first vocabulary term
        // in a prefix relation with the query term.
        let fallback = self
            .document_frequency
            .keys()
            .find(|candidate| candidate.starts_with(term) || term.starts_with(candidate.as_str()));
        match fallback {
            Some(candidate) => self.bm25(&candidate.clone(), doc, 0.5),
            None => 0.0,
        }
    }

    fn bm25(&self, term: &str, doc: &Document, scale: f64) -> f64 {
        let Some(&tf) = doc.term_weights.get(term) else {
            return 0.0;
        };
        let df = self.document_frequency.get(term).copied().unwrap_or(0) as f64;
        let n = self.documents.len() as f64;
        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
        let norm = 1.0 - B + B * doc.length / self.average_length.max(f64::EPSILON);
        scale * idf * (tf * (K1 + 1.0)) / (tf + K1 * norm)
    }
}

/// Lowercase unicode word tokens of length ≥ 2, suffix-stemmed.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_LEN)
        .map(stem)
        .collect()
}

/// Strip at most one suffix; keep the original token when stripping
/// would leave fewer than two characters.
fn stem(token: &str) -> String {
    for suffix in STEM_SUFFIXES {
        if let Some(stripped) = token.strip_suffix(suffix) {
            if stripped.chars().count() >= MIN_TOKEN_LEN {
                return stripped.to_string();
            }
        }
    }
    token.to_string()
}
