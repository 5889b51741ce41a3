//! Similarity primitives shared by the database layer and the matching engine.
//!
//! Lexical similarity follows PostgreSQL `pg_trgm` semantics so that the
//! in-memory catalog and the SQL catalog score identical inputs the same way.

use std::collections::HashSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::defaults::{LEXICAL_WEIGHT, NORMALIZED_TEXT_MAX_CHARS, VECTOR_WEIGHT};

/// Normalize free text for lexical matching and embedding.
///
/// Lowercases, strips diacritics, collapses whitespace runs and truncates to
/// [`NORMALIZED_TEXT_MAX_CHARS`] characters.
///
/// ```
/// use previsa_core::normalize_text;
///
/// assert_eq!(normalize_text("  Radiografía   de TÓRAX "), "radiografia de torax");
/// ```
pub fn normalize_text(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .collect();

    folded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(NORMALIZED_TEXT_MAX_CHARS)
        .collect()
}

/// Cosine similarity between two vectors, clamped to `[0, 1]`.
///
/// Mismatched dimensions and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    clamp_unit(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Trigram similarity with `pg_trgm` semantics.
///
/// Each alphanumeric word is lowercased and padded with two leading blanks
/// and one trailing blank before trigrams are taken. The score is the size of
/// the shared trigram set over the size of the union.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }

    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    shared as f64 / union as f64
}

fn trigrams(text: &str) -> HashSet<[char; 3]> {
    let mut set = HashSet::new();
    let lowered = text.to_lowercase();
    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = "  "
            .chars()
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }
    set
}

/// Blend vector and lexical similarity with the default 0.7 / 0.3 policy.
pub fn combined_score(vector: f64, lexical: f64) -> f64 {
    weighted_score(vector, lexical, VECTOR_WEIGHT, LEXICAL_WEIGHT)
}

/// Blend vector and lexical similarity with explicit weights.
///
/// Both inputs are clamped to `[0, 1]` first, and so is the result.
pub fn weighted_score(vector: f64, lexical: f64, vector_weight: f64, lexical_weight: f64) -> f64 {
    clamp_unit(vector_weight * clamp_unit(vector) + lexical_weight * clamp_unit(lexical))
}

/// Clamp a score into `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
