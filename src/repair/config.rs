use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Vocabulary tables driving the repair stages.
///
/// Every field has a default tuned for the manifesto corpus, so a JSON
/// override file only needs to list the tables it replaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Single-character replacements applied before any regex fix.
    pub char_substitutions: Vec<CharSubstitution>,
    /// Whole-word digit/letter confusion fixes, applied in order.
    pub word_fixes: Vec<PatternFix>,
    /// Characters that may prefix a number misread with `l`/`O` (e.g. `£lO`).
    pub numeric_symbol_prefixes: String,
    pub year_min: u32,
    pub year_max: u32,
    /// Regexes whose matches are deleted outright (case-insensitive).
    pub noise_patterns: Vec<String>,
    /// Space-split acronyms and their canonical spelling.
    pub term_fixes: Vec<TermFix>,
    /// Short lines kept by isolated-content removal.
    pub short_token_allow_list: Vec<String>,
    /// A line must be longer than this to count as a repeated header/footer.
    pub repeated_line_min_chars: usize,
    /// A line occurring more often than this is removed everywhere.
    pub repeated_line_max_occurrences: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CharSubstitution {
    pub from: char,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternFix {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermFix {
    pub fragmented: String,
    pub canonical: String,
}

impl RepairConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("failed to read repair config {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse repair config {}", path.display()))
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            char_substitutions: [
                ('|', "I"),
                ('！', "!"),
                ('？', "?"),
                ('，', ","),
                ('。', "."),
                ('\u{2018}', "'"),
                ('\u{2019}', "'"),
                ('\u{201C}', "\""),
                ('\u{201D}', "\""),
                ('\u{2013}', "-"),
                ('\u{2014}', "-"),
            ]
            .into_iter()
            .map(|(from, to)| CharSubstitution {
                from,
                to: to.to_string(),
            })
            .collect(),
            word_fixes: [
                (r"(?i)\b1ike\b", "like"),
                (r"(?i)\b1ive\b", "live"),
                (r"(?i)\b1ater\b", "later"),
                (r"(?i)\b1ess\b", "less"),
                (r"(?i)\b2lst\b", "21st"),
                (r"(?m)(^|\. )l\b", "${1}I"),
                (r"\bls\b", "is"),
                (r"\blf\b", "If"),
                (r"\bln\b", "In"),
                (r"\blt\b", "It"),
            ]
            .into_iter()
            .map(|(pattern, replacement)| PatternFix {
                pattern: pattern.to_string(),
                replacement: replacement.to_string(),
            })
            .collect(),
            numeric_symbol_prefixes: "£$#%".to_string(),
            year_min: 1800,
            year_max: 2100,
            noise_patterns: [
                r"[•·∙◦▪▫■□▲▼►◄]",
                r"https?://[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}[/\w.-]*",
                r"www\.[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}[/\w.-]*",
                r"@\s*\\?[a-zA-Z]+\s*leave",
                r"EUReferendum\.gov\.uk",
                r"voteleavetakecontrol\.org",
                r"\$+_+\$*",
                r"\.{4,}",
                r"-{4,}",
                r"_{4,}",
                r"={4,}",
            ]
            .into_iter()
            .map(ToOwned::to_owned)
            .collect(),
            term_fixes: [
                ("N A T O", "NATO"),
                ("N H S", "NHS"),
                ("G D P", "GDP"),
                ("V A T", "VAT"),
                ("E E A", "EEA"),
                ("E U", "EU"),
                ("U K", "UK"),
                ("M P", "MP"),
                ("U N", "UN"),
                ("U S", "US"),
            ]
            .into_iter()
            .map(|(fragmented, canonical)| TermFix {
                fragmented: fragmented.to_string(),
                canonical: canonical.to_string(),
            })
            .collect(),
            short_token_allow_list: ["UK", "EU", "US", "UN", "MP", "PM"]
                .into_iter()
                .map(ToOwned::to_owned)
                .collect(),
            repeated_line_min_chars: 10,
            repeated_line_max_occurrences: 2,
        }
    }
}
