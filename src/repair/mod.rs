//! Pattern-based repair of extracted text.
//!
//! The pipeline is an ordered cascade of text-to-text stages. Later stages
//! assume earlier ones have run: fragment repair expects punctuation already
//! folded to ASCII, continuation repair expects isolated and repeated lines
//! to be gone. Stages are not idempotent on their own; the composition is
//! expected to converge on well-formed text.

use std::collections::HashMap;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;

mod config;
mod stages;

pub use config::RepairConfig;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStage {
    UnicodeNormalization,
    CharacterSubstitution,
    NoiseRemoval,
    FragmentRepair,
    PunctuationSpacing,
    IsolatedContentRemoval,
    WordBreakRepair,
    DegenerateLineRemoval,
    RepeatedLineRemoval,
    SentenceContinuation,
    WhitespaceNormalization,
}

impl RepairStage {
    pub const ORDER: [RepairStage; 11] = [
        Self::UnicodeNormalization,
        Self::CharacterSubstitution,
        Self::NoiseRemoval,
        Self::FragmentRepair,
        Self::PunctuationSpacing,
        Self::IsolatedContentRemoval,
        Self::WordBreakRepair,
        Self::DegenerateLineRemoval,
        Self::RepeatedLineRemoval,
        Self::SentenceContinuation,
        Self::WhitespaceNormalization,
    ];
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTrace {
    pub stage: RepairStage,
    pub chars_before: usize,
    pub chars_after: usize,
}

/// Compiled repair cascade. Holds only read-only tables, so one instance is
/// shared by reference across worker threads.
pub struct RepairPipeline {
    char_map: HashMap<char, String>,
    word_fixes: Vec<(Regex, String)>,
    year_token: Regex,
    symbol_number: Option<Regex>,
    year_min: u32,
    year_max: u32,
    noise: Vec<Regex>,
    inline_whitespace_run: Regex,
    term_fixes: Vec<(Regex, String)>,
    single_letter_triple: Regex,
    digit_triple: Regex,
    digit_pair: Regex,
    spaced_decimal: Regex,
    space_before_punctuation: Regex,
    missing_space_after_punctuation: Regex,
    quote_spacing: Vec<(Regex, &'static str)>,
    page_number: Regex,
    hyphen_chain: Regex,
    space_run: Regex,
    short_token_allow_list: Vec<String>,
    repeated_line_min_chars: usize,
    repeated_line_max_occurrences: usize,
}

impl RepairPipeline {
    pub fn new(config: RepairConfig) -> Result<Self> {
        let word_fixes = config
            .word_fixes
            .iter()
            .map(|fix| Ok((compile(&fix.pattern)?, fix.replacement.clone())))
            .collect::<Result<Vec<_>>>()?;

        let noise = config
            .noise_patterns
            .iter()
            .map(|pattern| compile(&format!("(?i){pattern}")))
            .collect::<Result<Vec<_>>>()?;

        let term_fixes = config
            .term_fixes
            .iter()
            .map(|fix| {
                let letters = fix
                    .fragmented
                    .split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<String>>()
                    .join(r"[ \t]+");
                Ok((compile(&format!(r"(?i)\b{letters}\b"))?, fix.canonical.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let symbol_number = if config.numeric_symbol_prefixes.is_empty() {
            None
        } else {
            let class = config
                .numeric_symbol_prefixes
                .chars()
                .map(|symbol| regex::escape(&symbol.to_string()))
                .collect::<String>();
            Some(compile(&format!(r"([{class}])([0-9Ol]{{1,6}})\b"))?)
        };

        Ok(Self {
            char_map: config
                .char_substitutions
                .iter()
                .map(|substitution| (substitution.from, substitution.to.clone()))
                .collect(),
            word_fixes,
            year_token: compile(r"\b[0-9Ol]{4}\b")?,
            symbol_number,
            year_min: config.year_min,
            year_max: config.year_max,
            noise,
            inline_whitespace_run: compile(r"[ \t]{5,}")?,
            term_fixes,
            single_letter_triple: compile(r"\b([a-zA-Z])[ \t]+([a-zA-Z])[ \t]+([a-zA-Z])\b")?,
            digit_triple: compile(r"\b([0-9])[ \t]+([0-9])[ \t]+([0-9])\b")?,
            digit_pair: compile(r"\b([0-9])[ \t]+([0-9])\b")?,
            spaced_decimal: compile(r"([0-9])[ \t]+\.[ \t]+([0-9])")?,
            space_before_punctuation: compile(r"[ \t]+([.,;:!?])")?,
            missing_space_after_punctuation: compile(r"([.,;:!?])([A-Za-z])")?,
            quote_spacing: vec![
                (compile(r#"[ \t]+""#)?, " \""),
                (compile(r#""[ \t]+"#)?, "\" "),
                (compile(r"[ \t]+'")?, " '"),
                (compile(r"'[ \t]+")?, "' "),
            ],
            page_number: compile(r"^-?\s*[0-9]{1,3}\s*-?$")?,
            hyphen_chain: compile(r"\b\p{L}+(?:-\p{L}+)+\b")?,
            space_run: compile(r" {2,}")?,
            short_token_allow_list: config.short_token_allow_list,
            repeated_line_min_chars: config.repeated_line_min_chars,
            repeated_line_max_occurrences: config.repeated_line_max_occurrences,
        })
    }

    pub fn repair(&self, text: &str) -> String {
        RepairStage::ORDER
            .iter()
            .fold(text.to_string(), |current, stage| {
                self.apply_stage(*stage, &current)
            })
    }

    pub fn repair_with_trace(&self, text: &str) -> (String, Vec<StageTrace>) {
        let mut current = text.to_string();
        let mut trace = Vec::with_capacity(RepairStage::ORDER.len());

        for stage in RepairStage::ORDER {
            let chars_before = current.chars().count();
            current = self.apply_stage(stage, &current);
            trace.push(StageTrace {
                stage,
                chars_before,
                chars_after: current.chars().count(),
            });
        }

        (current, trace)
    }

    pub fn apply_stage(&self, stage: RepairStage, text: &str) -> String {
        match stage {
            RepairStage::UnicodeNormalization => stages::normalize_unicode(text),
            RepairStage::CharacterSubstitution => self.fix_ocr_characters(text),
            RepairStage::NoiseRemoval => self.remove_noise(text),
            RepairStage::FragmentRepair => self.fix_fragments(text),
            RepairStage::PunctuationSpacing => self.fix_punctuation_spacing(text),
            RepairStage::IsolatedContentRemoval => self.remove_isolated_content(text),
            RepairStage::WordBreakRepair => self.repair_word_breaks(text),
            RepairStage::DegenerateLineRemoval => stages::remove_degenerate_lines(text),
            RepairStage::RepeatedLineRemoval => self.remove_repeated_lines(text),
            RepairStage::SentenceContinuation => stages::join_continuation_lines(text),
            RepairStage::WhitespaceNormalization => self.normalize_whitespace(text),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("failed to compile repair pattern: {pattern}"))
}
