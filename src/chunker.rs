//! Text chunker (C1): splits assistant text into ordered utterance
//! fragments sized to minimize time-to-first-frame while keeping later
//! chunk cadence smooth.
//!
//! Mirrors the "config struct + stateful splitter + emit a vec of
//! fragments" shape used elsewhere in this codebase for streaming
//! segmentation, generalized here from audio frames to sentence text.

use crate::config::ChunkerConfig;

/// Sentinel used to mask a protected abbreviation's trailing period while
/// splitting. Never appears in normal input text.
const MASK: char = '\u{1}';

/// Splits assistant text into ordered fragments.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    /// Creates a chunker with the given configuration.
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Creates a chunker with default configuration (`max_chars=120`,
    /// `first_chunk_hard_limit=125`).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ChunkerConfig::default())
    }

    /// Splits `text` into an ordered sequence of fragments.
    ///
    /// Every fragment is `<= max_chars`, except fragment 0, which is
    /// `<= first_chunk_hard_limit`. Fragments are never reordered or
    /// dropped; joining them with single spaces reproduces the normalized
    /// input.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        let normalized = normalize_whitespace(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let masked = mask_abbreviations(&normalized, &self.config.abbreviation_set);
        let sentences = split_sentences(&masked);

        let mut fragments = Vec::new();
        for sentence in sentences {
            fragments.extend(subdivide(&sentence, self.config.max_chars));
        }

        let fragments = buffer_first_chunk(fragments, self.config.first_chunk_hard_limit);

        fragments.into_iter().map(|f| unmask(&f)).collect()
    }
}

/// Collapses any run of whitespace to a single space and trims the ends.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Masks the trailing period of every abbreviation in `abbrevs` so the
/// sentence splitter does not treat it as a boundary. Abbreviations are
/// matched as whole words (surrounded by start/whitespace/end).
fn mask_abbreviations(text: &str, abbrevs: &[String]) -> String {
    let words: Vec<&str> = text.split(' ').collect();
    let masked_words: Vec<String> = words
        .into_iter()
        .map(|word| {
            for abbr in abbrevs {
                if let Some(stripped) = abbr.strip_suffix('.') {
                    // Word may carry trailing punctuation after the
                    // abbreviation's own period (e.g. "D.C.;").
                    if let Some(rest) = word.strip_prefix(abbr) {
                        return format!("{stripped}{MASK}{rest}");
                    }
                }
            }
            word.to_owned()
        })
        .collect();
    masked_words.join(" ")
}

/// Reverses [`mask_abbreviations`]'s substitution.
fn unmask(text: &str) -> String {
    text.replace(MASK, ".")
}

/// Splits at every occurrence of `[.!?;]` followed by whitespace or
/// end-of-string. Boundary punctuation stays attached to the sentence
/// it ends.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < chars.len() {
        let c = chars[i];
        if matches!(c, '.' | '!' | '?' | ';') {
            let at_end = i + 1 == chars.len();
            let followed_by_space = !at_end && chars[i + 1] == ' ';
            if at_end || followed_by_space {
                let sentence: String = chars[start..=i].iter().collect();
                sentences.push(sentence);
                start = if at_end { i + 1 } else { i + 2 };
                i = start;
                continue;
            }
        }
        i += 1;
    }
    if start < chars.len() {
        let rest: String = chars[start..].iter().collect();
        if !rest.trim().is_empty() {
            sentences.push(rest);
        }
    }
    sentences
}

/// Subdivides a sentence longer than `max_chars` at word boundaries.
/// Never splits inside a word, so a single word longer than `max_chars`
/// is emitted whole.
fn subdivide(sentence: &str, max_chars: usize) -> Vec<String> {
    if sentence.chars().count() <= max_chars {
        return vec![sentence.to_owned()];
    }

    let mut fragments = Vec::new();
    let mut current = String::new();
    for word in sentence.split(' ') {
        let candidate_len = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if !current.is_empty() && candidate_len > max_chars {
            fragments.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

/// Greedily merges consecutive fragments into fragment 0 as long as the
/// combined length stays `<= first_chunk_hard_limit`.
fn buffer_first_chunk(fragments: Vec<String>, first_chunk_hard_limit: usize) -> Vec<String> {
    if fragments.is_empty() {
        return fragments;
    }

    let mut iter = fragments.into_iter();
    let mut first = match iter.next() {
        Some(f) => f,
        None => return Vec::new(),
    };
    let mut rest: Vec<String> = iter.collect();

    while let Some(next) = rest.first() {
        let combined_len = first.chars().count() + 1 + next.chars().count();
        if combined_len > first_chunk_hard_limit {
            break;
        }
        first.push(' ');
        first.push_str(next);
        rest.remove(0);
    }

    let mut out = vec![first];
    out.extend(rest);
    out
}
