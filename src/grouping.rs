use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Extraction technique that produced a candidate rendering.
///
/// Declaration order is the arbitration priority: structured-source text
/// carries no recognition noise and wins exact score ties.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum ExtractionMethod {
    #[serde(rename = "from_csv")]
    StructuredSource,
    #[serde(rename = "pymupdf_extraction")]
    NativeExtraction,
    #[serde(rename = "tesseract_extraction")]
    OpticalExtraction,
}

impl ExtractionMethod {
    pub const ALL: [ExtractionMethod; 3] = [
        Self::StructuredSource,
        Self::NativeExtraction,
        Self::OpticalExtraction,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Self::StructuredSource => "from_csv",
            Self::NativeExtraction => "pymupdf_extraction",
            Self::OpticalExtraction => "tesseract_extraction",
        }
    }

    /// Short name used in report cells.
    pub fn label(self) -> &'static str {
        match self {
            Self::StructuredSource => "from_csv",
            Self::NativeExtraction => "PyMuPDF",
            Self::OpticalExtraction => "Tesseract",
        }
    }

    pub fn from_suffix(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.suffix().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A grouped candidate file that has not been read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSource {
    pub document_key: String,
    pub method: ExtractionMethod,
    pub path: PathBuf,
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct SourceGroup {
    pub document_key: String,
    pub sources: BTreeMap<ExtractionMethod, CandidateSource>,
}

pub struct IdentityGrouper {
    filename: Regex,
}

impl IdentityGrouper {
    pub fn new() -> Result<Self> {
        Ok(Self {
            filename: Regex::new(
                r"(?i)^(.+?)_(from_csv|pymupdf_extraction|tesseract_extraction)(?:_cleaned)?\.txt$",
            )
            .context("failed to compile candidate filename regex")?,
        })
    }

    /// Returns `None` for files that do not carry a recognised method suffix.
    pub fn identify(&self, file_name: &str) -> Option<(String, ExtractionMethod)> {
        let captures = self.filename.captures(file_name)?;
        let key = captures.get(1)?.as_str().to_lowercase();
        let method = ExtractionMethod::from_suffix(captures.get(2)?.as_str())?;
        Some((key, method))
    }

    /// Drops the method suffix and any `_cleaned` marker, keeping the
    /// document part of the name as written.
    pub fn strip_method_suffix(&self, file_name: &str) -> Option<String> {
        let captures = self.filename.captures(file_name)?;
        Some(format!("{}.txt", captures.get(1)?.as_str()))
    }

    /// Groups paths by document key. Paths are visited in sorted order and a
    /// later file claiming an occupied (key, method) slot replaces the earlier.
    pub fn group<I>(&self, paths: I) -> Vec<SourceGroup>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut paths = paths.into_iter().collect::<Vec<PathBuf>>();
        paths.sort();

        let mut groups = BTreeMap::<String, BTreeMap<ExtractionMethod, CandidateSource>>::new();
        for path in paths {
            let Some(file_name) = file_name_of(&path) else {
                continue;
            };
            let Some((document_key, method)) = self.identify(&file_name) else {
                continue;
            };

            let slots = groups.entry(document_key.clone()).or_default();
            if let Some(previous) = slots.get(&method) {
                debug!(
                    document_key = %document_key,
                    method = %method,
                    replaced = %previous.file_name,
                    by = %file_name,
                    "candidate slot overwritten"
                );
            }
            slots.insert(
                method,
                CandidateSource {
                    document_key,
                    method,
                    path,
                    file_name,
                },
            );
        }

        groups
            .into_iter()
            .map(|(document_key, sources)| SourceGroup {
                document_key,
                sources,
            })
            .collect()
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
}
