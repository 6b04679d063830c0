use std::collections::{HashMap, HashSet};

use regex::Captures;
use unicode_normalization::UnicodeNormalization;

use super::RepairPipeline;

const TERMINAL_PUNCTUATION: [char; 4] = ['.', '!', '?', ':'];
const PUNCTUATION_LINE_RATIO: f64 = 0.7;
const DEGENERATE_LINE_MIN_CHARS: usize = 5;

pub(super) fn normalize_unicode(text: &str) -> String {
    text.nfkc()
        .filter(|character| matches!(*character, '\n' | '\t') || !is_invisible(*character))
        .collect()
}

fn is_invisible(character: char) -> bool {
    character.is_control()
        || matches!(
            character,
            '\u{00AD}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{206A}'..='\u{206F}'
                | '\u{FEFF}'
                | '\u{FFF9}'..='\u{FFFB}'
                | '\u{E000}'..='\u{F8FF}'
        )
}

impl RepairPipeline {
    pub(super) fn fix_ocr_characters(&self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());
        for character in text.chars() {
            match self.char_map.get(&character) {
                Some(replacement) => output.push_str(replacement),
                None => output.push(character),
            }
        }

        for (pattern, replacement) in &self.word_fixes {
            output = pattern
                .replace_all(&output, replacement.as_str())
                .into_owned();
        }

        output = self
            .year_token
            .replace_all(&output, |captures: &Captures| {
                let token = &captures[0];
                let folded = fold_numeric_confusions(token);
                match folded.parse::<u32>() {
                    Ok(year) if (self.year_min..=self.year_max).contains(&year) => folded,
                    _ => token.to_string(),
                }
            })
            .into_owned();

        if let Some(symbol_number) = &self.symbol_number {
            output = symbol_number
                .replace_all(&output, |captures: &Captures| {
                    format!("{}{}", &captures[1], fold_numeric_confusions(&captures[2]))
                })
                .into_owned();
        }

        output
    }

    pub(super) fn remove_noise(&self, text: &str) -> String {
        let mut output = text.to_string();
        for pattern in &self.noise {
            output = pattern.replace_all(&output, "").into_owned();
        }
        self.inline_whitespace_run
            .replace_all(&output, " ")
            .into_owned()
    }

    pub(super) fn fix_fragments(&self, text: &str) -> String {
        let mut output = text.to_string();
        for (pattern, canonical) in &self.term_fixes {
            output = pattern
                .replace_all(&output, regex::NoExpand(canonical))
                .into_owned();
        }

        output = self
            .single_letter_triple
            .replace_all(&output, "${1}${2}${3}")
            .into_owned();

        // The triple pass has to run first: once a pair is merged the
        // remaining digit no longer sits on a word boundary.
        output = self
            .digit_triple
            .replace_all(&output, "${1}${2}${3}")
            .into_owned();
        self.digit_pair
            .replace_all(&output, "${1}${2}")
            .into_owned()
    }

    pub(super) fn fix_punctuation_spacing(&self, text: &str) -> String {
        let mut output = self
            .spaced_decimal
            .replace_all(text, "${1}.${2}")
            .into_owned();
        output = self
            .space_before_punctuation
            .replace_all(&output, "${1}")
            .into_owned();
        output = self
            .missing_space_after_punctuation
            .replace_all(&output, "${1} ${2}")
            .into_owned();
        for (pattern, replacement) in &self.quote_spacing {
            output = pattern
                .replace_all(&output, regex::NoExpand(replacement))
                .into_owned();
        }
        output
    }

    pub(super) fn remove_isolated_content(&self, text: &str) -> String {
        text.lines()
            .map(str::trim)
            .filter(|line| line.is_empty() || !self.is_isolated_artifact(line))
            .collect::<Vec<&str>>()
            .join("\n")
    }

    fn is_isolated_artifact(&self, line: &str) -> bool {
        let length = line.chars().count();
        if length <= 2
            && !line.chars().all(|character| character.is_ascii_digit())
            && !self.short_token_allow_list.iter().any(|token| token == line)
        {
            return true;
        }

        let punctuation = line
            .chars()
            .filter(|character| character.is_ascii_punctuation())
            .count();
        if punctuation as f64 / length as f64 > PUNCTUATION_LINE_RATIO {
            return true;
        }

        self.page_number.is_match(line)
    }

    pub(super) fn repair_word_breaks(&self, text: &str) -> String {
        let merged = merge_hyphenated_lines(text.lines());
        self.hyphen_chain
            .replace_all(&merged.join("\n"), |captures: &Captures| {
                collapse_short_hyphenation(&captures[0])
            })
            .into_owned()
    }

    pub(super) fn remove_repeated_lines(&self, text: &str) -> String {
        let mut counts = HashMap::<String, usize>::new();
        for line in text.lines() {
            let normalized = normalize_repeated_line(line);
            if normalized.chars().count() > self.repeated_line_min_chars {
                *counts.entry(normalized).or_insert(0) += 1;
            }
        }

        let boilerplate = counts
            .into_iter()
            .filter_map(|(line, count)| {
                (count > self.repeated_line_max_occurrences).then_some(line)
            })
            .collect::<HashSet<String>>();
        if boilerplate.is_empty() {
            return text.to_string();
        }

        text.lines()
            .filter(|line| !boilerplate.contains(&normalize_repeated_line(line)))
            .collect::<Vec<&str>>()
            .join("\n")
    }

    pub(super) fn normalize_whitespace(&self, text: &str) -> String {
        let mut lines = Vec::<String>::new();
        for line in text.lines() {
            let untabbed = line.replace('\t', " ");
            let collapsed = self.space_run.replace_all(&untabbed, " ");
            let line = collapsed.trim();
            if line.is_empty() && lines.last().is_none_or(|previous| previous.is_empty()) {
                continue;
            }
            lines.push(line.to_string());
        }
        lines.join("\n").trim().to_string()
    }
}

fn fold_numeric_confusions(token: &str) -> String {
    token.replace('l', "1").replace('O', "0")
}

fn merge_hyphenated_lines<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut merged = Vec::<String>::new();
    for line in lines {
        if let Some(previous) = merged.last_mut() {
            if should_merge_hyphenated_pair(previous, line) {
                let joined = format!(
                    "{}{}",
                    previous.trim_end().trim_end_matches('-'),
                    line.trim_start()
                );
                *previous = joined;
                continue;
            }
        }
        merged.push(line.to_string());
    }
    merged
}

fn should_merge_hyphenated_pair(current: &str, next: &str) -> bool {
    let left = current.trim_end();
    if !left.ends_with('-') {
        return false;
    }

    let starts_with_lowercase = next
        .trim_start()
        .chars()
        .next()
        .map(char::is_lowercase)
        .unwrap_or(false);
    if !starts_with_lowercase {
        return false;
    }

    left.trim_end_matches('-')
        .chars()
        .last()
        .map(char::is_alphabetic)
        .unwrap_or(false)
}

/// Merges hyphen-joined fragments until every remaining pair has more than
/// two characters on both sides.
fn collapse_short_hyphenation(chain: &str) -> String {
    let mut parts = chain.split('-').map(str::to_string).collect::<Vec<String>>();
    let mut index = 0usize;
    while index + 1 < parts.len() {
        if parts[index].chars().count() <= 2 || parts[index + 1].chars().count() <= 2 {
            let next = parts.remove(index + 1);
            parts[index].push_str(&next);
        } else {
            index += 1;
        }
    }
    parts.join("-")
}

pub(super) fn remove_degenerate_lines(text: &str) -> String {
    text.lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return Some("");
            }
            if trimmed
                .chars()
                .all(|character| character.is_whitespace() || matches!(character, '.' | '_' | '-'))
            {
                return None;
            }
            let distinct = trimmed.chars().collect::<HashSet<char>>().len();
            if trimmed.chars().count() > DEGENERATE_LINE_MIN_CHARS && distinct <= 2 {
                return None;
            }
            Some(line)
        })
        .collect::<Vec<&str>>()
        .join("\n")
}

fn normalize_repeated_line(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

pub(super) fn join_continuation_lines(text: &str) -> String {
    let mut paragraphs = Vec::<String>::new();
    let mut sentences = Vec::<String>::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            if !sentences.is_empty() {
                paragraphs.push(sentences.join("\n"));
                sentences.clear();
            }
            continue;
        }

        let continues = sentences.last().is_some_and(|current| {
            !current.ends_with(TERMINAL_PUNCTUATION)
                && line.chars().next().is_some_and(char::is_lowercase)
        });
        match sentences.last_mut() {
            Some(current) if continues => {
                current.push(' ');
                current.push_str(line);
            }
            _ => sentences.push(line.to_string()),
        }
    }

    if !sentences.is_empty() {
        paragraphs.push(sentences.join("\n"));
    }
    paragraphs.join("\n\n")
}
