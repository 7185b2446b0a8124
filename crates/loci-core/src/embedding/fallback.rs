//! Deterministic local embedding.
//!
//! When the remote provider is unreachable, texts are encoded by hashing
//! normalized token unigrams and adjacent bigrams into the 1024-dim space
//! and L2-normalizing. The result is stable across runs and machines, and
//! paraphrases with the same content words land close together, which is all
//! the fallback path promises. Vectors produced here are tagged
//! `is_fallback` so the normalizer can re-embed them later.

use crate::memory::EMBEDDING_DIMENSIONS;

/// Weight of bigram features relative to unigrams.
const BIGRAM_WEIGHT: f32 = 0.5;

/// Function words dropped before hashing; they carry no retrieval signal and
/// would otherwise dominate short texts.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "all", "every", "each", "any", "some", "this", "that", "these", "those",
    "is", "are", "was", "were", "be", "been", "being", "am", "to", "of", "in", "on", "at", "by",
    "for", "with", "and", "or", "not", "no", "it", "its", "as", "from", "into", "than", "then",
    "shall", "should", "will", "would", "must", "may", "might", "can", "could", "do", "does",
    "did", "done", "has", "have", "had", "having", "if", "else", "when", "while", "we", "you",
    "i", "they", "he", "she", "their", "our", "your",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// FNV-1a, 64-bit. Cheap, stable, and good enough for feature bucketing.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Split a raw word on camelCase boundaries.
fn split_camel_case(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;

    for c in word.chars() {
        if c.is_uppercase() && previous_lower && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
        }
        previous_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Light plural stemming: strip a trailing 's' from longer words.
fn stem(token: String) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token
    }
}

/// Tokenize for encoding: split on non-alphanumerics and identifier
/// boundaries, lowercase, drop stopwords, stem plurals.
pub fn normalize_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|raw| !raw.is_empty())
        .flat_map(|raw| split_camel_case(raw))
        .filter(|token| !is_stopword(token))
        .map(stem)
        .filter(|token| !token.is_empty())
        .collect()
}

/// Deterministic encoder producing 1024-dim unit vectors.
#[derive(Debug, Clone)]
pub struct FallbackEncoder {
    model_id: String,
}

impl FallbackEncoder {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Encode one text. Always exactly [`EMBEDDING_DIMENSIONS`] components,
    /// unit length unless the text has no usable tokens at all.
    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; EMBEDDING_DIMENSIONS];
        let tokens = normalize_tokens(text);

        if tokens.is_empty() {
            // Nothing survived normalization; hash the raw text so even
            // stopword-only inputs stay deterministic and non-zero.
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return vector;
            }
            let bucket = (fnv1a(trimmed.as_bytes()) as usize) % EMBEDDING_DIMENSIONS;
            vector[bucket] = 1.0;
            return vector;
        }

        for token in &tokens {
            let bucket = (fnv1a(token.as_bytes()) as usize) % EMBEDDING_DIMENSIONS;
            vector[bucket] += 1.0;
        }
        for pair in tokens.windows(2) {
            let joined = format!("{} {}", pair[0], pair[1]);
            let bucket = (fnv1a(joined.as_bytes()) as usize) % EMBEDDING_DIMENSIONS;
            vector[bucket] += BIGRAM_WEIGHT;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}
