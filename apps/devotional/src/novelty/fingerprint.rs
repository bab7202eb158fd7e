//! Fingerprint Engine: exact-match digests and Jaccard token overlap.
//!
//! Tokens shorter than or equal to `min_len` characters are dropped so that
//! "the", "and", "his" do not inflate overlap between unrelated texts.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::novelty::normalize::normalize;

/// Tokens must be strictly longer than this to count.
pub const DEFAULT_TOKEN_MIN_LEN: usize = 3;

/// Lowercase hex SHA-256 of the normalized text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(normalize(text).as_bytes()))
}

/// Set of normalized tokens with more than `min_len` characters.
pub fn token_set(text: &str, min_len: usize) -> BTreeSet<String> {
    normalize(text)
        .split(' ')
        .filter(|token| token.chars().count() > min_len)
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two texts using the default token length policy.
/// The ledger compares precomputed token sets through `jaccard` instead.
#[cfg(test)]
pub fn similarity(a: &str, b: &str) -> f64 {
    jaccard(
        &token_set(a, DEFAULT_TOKEN_MIN_LEN),
        &token_set(b, DEFAULT_TOKEN_MIN_LEN),
    )
}

/// |A ∩ B| / |A ∪ B|, with an empty union scoring 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union.max(1) as f64
}
