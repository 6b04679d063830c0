use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', '…'];
const COUNTED_PUNCTUATION: [char; 6] = ['.', ',', ';', ':', '!', '?'];

/// Comparable quality metrics for one text. Ratios use denominators floored
/// at one, so every field is defined for empty input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub word_count: usize,
    pub sentence_count: usize,
    pub char_count: usize,
    pub avg_word_length: f64,
    pub punctuation_frequency: f64,
    pub lexical_diversity: f64,
    pub ocr_error_rate: f64,
}

impl Metrics {
    pub fn compute(text: &str) -> Self {
        let words = text.split_whitespace().collect::<Vec<&str>>();
        let word_count = words.len();
        let guarded_words = word_count.max(1) as f64;

        let char_count = text.chars().count();
        let punctuation = text
            .chars()
            .filter(|character| COUNTED_PUNCTUATION.contains(character))
            .count();

        let sentence_count = count_sentences(text);

        let word_chars = words
            .iter()
            .map(|word| word.chars().count())
            .sum::<usize>();
        let distinct = words.iter().collect::<HashSet<_>>().len();
        let suspicious = words.iter().filter(|word| is_suspicious_word(word)).count();

        Self {
            word_count,
            sentence_count,
            char_count,
            avg_word_length: word_chars as f64 / guarded_words,
            punctuation_frequency: punctuation as f64 / char_count.max(1) as f64,
            lexical_diversity: distinct as f64 / guarded_words,
            ocr_error_rate: suspicious as f64 / guarded_words,
        }
    }
}

/// Counts non-blank segments between sentence boundaries. A boundary is a
/// newline, or a run of terminators followed by whitespace; terminators
/// glued to the next token ("3.5", "e.g.x") stay inside the segment. A
/// segment made only of terminators is blank.
fn count_sentences(text: &str) -> usize {
    let mut count = 0usize;
    let mut has_content = false;
    let mut characters = text.chars().peekable();

    while let Some(character) = characters.next() {
        let boundary = if character == '\n' {
            true
        } else if SENTENCE_TERMINATORS.contains(&character) {
            while characters
                .next_if(|next| SENTENCE_TERMINATORS.contains(next))
                .is_some()
            {}
            characters.next_if(|next| next.is_whitespace()).is_some()
        } else {
            has_content |= !character.is_whitespace();
            false
        };

        if boundary {
            if has_content {
                count += 1;
            }
            has_content = false;
        }
    }

    if has_content {
        count += 1;
    }
    count
}

/// A word looks like an OCR misread when it carries a replacement marker,
/// mixes ASCII letters with digits, or contains any non-ASCII character.
pub fn is_suspicious_word(word: &str) -> bool {
    if word.contains('\u{FFFD}') || !word.is_ascii() {
        return true;
    }
    let has_letter = word.chars().any(|character| character.is_ascii_alphabetic());
    let has_digit = word.chars().any(|character| character.is_ascii_digit());
    has_letter && has_digit
}
