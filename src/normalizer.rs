//! Content canonicalization ahead of hashing and deduplication.
//!
//! `normalize` is a pure function of `(raw, reference_time)`: Unicode NFKC,
//! whitespace collapsing, alias mapping, relative-date resolution, and
//! subject completion, then a case-folded canonical form that feeds the
//! SHA-256 content hash. Deterministic and idempotent:
//! `normalize(normalize(x)) == normalize(x)`.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

/// Canonical subject token prepended to subjectless chunks.
pub const SUBJECT_TOKEN: &str = "User";

static RELATIVE_DATE_REGEX: OnceLock<Regex> = OnceLock::new();

fn relative_date_regex() -> &'static Regex {
    RELATIVE_DATE_REGEX
        .get_or_init(|| Regex::new(r"(?i)\b(today|yesterday|tomorrow)\b").unwrap())
}

/// Output of one normalization pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// Display form: original casing, resolved dates, completed subject
    pub content: String,
    /// Hashing form: ASCII-lowercased `content`
    pub canonical: String,
    /// Hex SHA-256 of `canonical`
    pub content_hash: String,
}

/// Deterministic content normalizer.
pub struct Normalizer {
    /// Case-insensitive alias -> canonical spelling, matched word-wise
    synonyms: HashMap<String, String>,
    /// First words that signal a missing subject ("Likes coffee")
    subject_predicates: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        let mut synonyms = HashMap::new();
        for (alias, canonical) in [
            ("toeic", "TOEIC"),
            ("toefl", "TOEFL"),
            ("ielts", "IELTS"),
            ("javascript", "JavaScript"),
            ("typescript", "TypeScript"),
            ("postgres", "PostgreSQL"),
            ("postgresql", "PostgreSQL"),
            ("k8s", "Kubernetes"),
            ("kubernetes", "Kubernetes"),
        ] {
            synonyms.insert(alias.to_string(), canonical.to_string());
        }

        let subject_predicates = [
            "likes", "dislikes", "loves", "hates", "prefers", "enjoys", "lives", "moved",
            "works", "owns", "studies", "plays", "uses", "wants", "needs", "feels", "drinks",
            "eats", "speaks", "knows", "visited", "attended", "started", "finished",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            synonyms,
            subject_predicates,
        }
    }
}

impl Normalizer {
    /// Build a normalizer with extra alias mappings layered over the
    /// built-in table. Canonical values must be their own fixpoint under the
    /// table or idempotency breaks.
    pub fn with_synonyms(extra: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut normalizer = Self::default();
        for (alias, canonical) in extra {
            normalizer
                .synonyms
                .insert(alias.to_lowercase(), canonical);
        }
        normalizer
    }

    /// Canonicalize one chunk of content.
    pub fn normalize(&self, raw: &str, reference: DateTime<Utc>) -> Normalized {
        // Unicode NFKC folds full-width forms and compatibility characters
        let mut text: String = raw.nfkc().collect();

        // Trim and collapse internal whitespace
        text = text.split_whitespace().collect::<Vec<_>>().join(" ");

        // Alias mapping, word-wise with punctuation preserved
        text = self.apply_synonyms(&text);

        // Relative date expressions resolve against the ingest reference clock
        text = self.resolve_dates(&text, reference);

        // Subject completion for bare-predicate chunks
        text = self.complete_subject(&text);

        let canonical = text.to_ascii_lowercase();
        let content_hash = content_hash(&canonical);

        Normalized {
            content: text,
            canonical,
            content_hash,
        }
    }

    fn apply_synonyms(&self, text: &str) -> String {
        text.split(' ')
            .map(|word| {
                let (core, trailing) = split_trailing_punct(word);
                match self.synonyms.get(&core.to_lowercase()) {
                    Some(canonical) if !core.is_empty() => format!("{canonical}{trailing}"),
                    _ => word.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn resolve_dates(&self, text: &str, reference: DateTime<Utc>) -> String {
        relative_date_regex()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let date = match caps[1].to_lowercase().as_str() {
                    "yesterday" => reference - Duration::days(1),
                    "tomorrow" => reference + Duration::days(1),
                    _ => reference,
                };
                date.format("%Y-%m-%d").to_string()
            })
            .into_owned()
    }

    fn complete_subject(&self, text: &str) -> String {
        let first = text
            .split(' ')
            .next()
            .map(|w| split_trailing_punct(w).0.to_lowercase())
            .unwrap_or_default();
        if self.subject_predicates.contains(&first) {
            format!("{SUBJECT_TOKEN} {text}")
        } else {
            text.to_string()
        }
    }
}

/// Hex SHA-256 digest of the canonical content.
pub fn content_hash(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn split_trailing_punct(word: &str) -> (&str, &str) {
    let core_end = word
        .rfind(|c: char| c.is_alphanumeric())
        .map(|i| i + word[i..].chars().next().map(char::len_utf8).unwrap_or(1))
        .unwrap_or(0);
    word.split_at(core_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_whitespace_collapse() {
        let n = Normalizer::default();
        let out = n.normalize("  I   live\tin  Tokyo.  ", reference());
        assert_eq!(out.content, "I live in Tokyo.");
    }

    #[test]
    fn test_casing_preserved_in_content_folded_in_hash() {
        let n = Normalizer::default();
        let upper = n.normalize("I Live In Tokyo.", reference());
        let lower = n.normalize("i live in tokyo.", reference());
        assert_ne!(upper.content, lower.content);
        assert_eq!(upper.content_hash, lower.content_hash);
    }

    #[test]
    fn test_nfkc_folds_fullwidth() {
        let n = Normalizer::default();
        // Full-width "ＴＯＥＩＣ" folds to ASCII, then the alias table fires
        let out = n.normalize("Scored 900 on ＴＯＥＩＣ", reference());
        assert!(out.content.contains("TOEIC"));
    }

    #[test]
    fn test_synonym_mapping_is_case_insensitive() {
        let n = Normalizer::default();
        let a = n.normalize("Passed the Toeic exam.", reference());
        let b = n.normalize("Passed the TOEIC exam.", reference());
        assert_eq!(a.content, "Passed the TOEIC exam.");
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_synonym_keeps_trailing_punctuation() {
        let n = Normalizer::default();
        let out = n.normalize("Uses postgres.", reference());
        assert!(out.content.ends_with("PostgreSQL."));
    }

    #[test]
    fn test_relative_dates_resolve() {
        let n = Normalizer::default();
        let out = n.normalize("Met Prof. Z yesterday at the conference.", reference());
        assert!(out.content.contains("2025-02-28"));
        let out = n.normalize("Dentist appointment tomorrow.", reference());
        assert!(out.content.contains("2025-03-02"));
    }

    #[test]
    fn test_subject_completion() {
        let n = Normalizer::default();
        let out = n.normalize("likes strong coffee", reference());
        assert_eq!(out.content, "User likes strong coffee");

        // Already has a subject: untouched
        let out = n.normalize("Alice likes strong coffee", reference());
        assert_eq!(out.content, "Alice likes strong coffee");
    }

    #[test]
    fn test_idempotent() {
        let n = Normalizer::default();
        let cases = [
            "  likes   coffee ",
            "Met Prof. Z yesterday.",
            "Passed the toeic exam tomorrow",
            "I Live In Tokyo.",
        ];
        for raw in cases {
            let once = n.normalize(raw, reference());
            let twice = n.normalize(&once.content, reference());
            assert_eq!(once.content, twice.content, "content fixpoint for {raw:?}");
            assert_eq!(once.content_hash, twice.content_hash);
        }
    }

    #[test]
    fn test_deterministic() {
        let n = Normalizer::default();
        let a = n.normalize("I moved to Osaka.", reference());
        let b = n.normalize("I moved to Osaka.", reference());
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let out = Normalizer::default().normalize("x", reference());
        assert_eq!(out.content_hash.len(), 64);
        assert!(out.content_hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
