use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use serde::Serialize;

use crate::grouping::{CandidateSource, ExtractionMethod, SourceGroup};
use crate::metrics::Metrics;
use crate::repair::RepairPipeline;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

/// Reads a candidate as UTF-8, decoding as Latin-1 when the bytes are not
/// valid UTF-8. Latin-1 maps every byte, so only I/O errors fail.
pub fn read_candidate_text(path: &Path) -> Result<(String, TextEncoding)> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok((text, TextEncoding::Utf8)),
        Err(error) => {
            let text = error
                .as_bytes()
                .iter()
                .map(|byte| char::from(*byte))
                .collect::<String>();
            Ok((text, TextEncoding::Latin1))
        }
    }
}

/// One extraction method's rendering of a document. Cleaned text and
/// metrics are derived once at construction.
#[derive(Debug, Clone)]
pub struct Candidate {
    document_key: String,
    method: ExtractionMethod,
    file_name: String,
    raw_text: String,
    cleaned_text: String,
    metrics: Metrics,
}

impl Candidate {
    /// Builds a candidate; with no pipeline the raw text is measured as-is,
    /// for inputs that were cleaned in an earlier pass.
    pub fn evaluate(
        source: &CandidateSource,
        raw_text: String,
        pipeline: Option<&RepairPipeline>,
    ) -> Self {
        let cleaned_text = match pipeline {
            Some(pipeline) => pipeline.repair(&raw_text),
            None => raw_text.clone(),
        };
        let metrics = Metrics::compute(&cleaned_text);

        Self {
            document_key: source.document_key.clone(),
            method: source.method,
            file_name: source.file_name.clone(),
            raw_text,
            cleaned_text,
            metrics,
        }
    }

    pub fn document_key(&self) -> &str {
        &self.document_key
    }

    pub fn method(&self) -> ExtractionMethod {
        self.method
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn cleaned_text(&self) -> &str {
        &self.cleaned_text
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[derive(Debug, Clone)]
pub struct DocumentGroup {
    document_key: String,
    candidates: BTreeMap<ExtractionMethod, Candidate>,
}

impl DocumentGroup {
    pub fn new(document_key: impl Into<String>) -> Self {
        Self {
            document_key: document_key.into(),
            candidates: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, candidate: Candidate) -> Result<()> {
        if candidate.document_key() != self.document_key {
            bail!(
                "candidate {} belongs to '{}', not group '{}'",
                candidate.file_name(),
                candidate.document_key(),
                self.document_key
            );
        }
        self.candidates.insert(candidate.method(), candidate);
        Ok(())
    }

    pub fn document_key(&self) -> &str {
        &self.document_key
    }

    pub fn candidates(&self) -> &BTreeMap<ExtractionMethod, Candidate> {
        &self.candidates
    }
}

#[derive(Debug)]
pub struct UnavailableCandidate {
    pub method: ExtractionMethod,
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct LoadedGroup {
    pub group: DocumentGroup,
    pub encodings: BTreeMap<ExtractionMethod, TextEncoding>,
    pub unavailable: Vec<UnavailableCandidate>,
}

/// Reads, repairs and measures every candidate of a group. A candidate that
/// cannot be read is reported as unavailable instead of failing the group.
pub fn load_group(source_group: &SourceGroup, pipeline: Option<&RepairPipeline>) -> LoadedGroup {
    let results = source_group
        .sources
        .par_iter()
        .map(|(method, source)| {
            let outcome = read_candidate_text(&source.path)
                .map(|(text, encoding)| (Candidate::evaluate(source, text, pipeline), encoding));
            (*method, source, outcome)
        })
        .collect::<Vec<_>>();

    let mut loaded = LoadedGroup {
        group: DocumentGroup::new(source_group.document_key.clone()),
        encodings: BTreeMap::new(),
        unavailable: Vec::new(),
    };

    for (method, source, outcome) in results {
        let inserted = outcome.and_then(|(candidate, encoding)| {
            loaded.group.insert(candidate)?;
            Ok(encoding)
        });
        match inserted {
            Ok(encoding) => {
                loaded.encodings.insert(method, encoding);
            }
            Err(error) => loaded.unavailable.push(UnavailableCandidate {
                method,
                file_name: source.file_name.clone(),
                reason: format!("{error:#}"),
            }),
        }
    }

    loaded
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::repair::RepairConfig;

    fn source(dir: &Path, key: &str, method: ExtractionMethod) -> CandidateSource {
        let file_name = format!("{key}_{}.txt", method.suffix());
        CandidateSource {
            document_key: key.to_string(),
            method,
            path: dir.join(&file_name),
            file_name,
        }
    }

    #[test]
    fn read_falls_back_to_latin1() {
        let dir = tempfile::tempdir().unwrap();
        let utf8 = dir.path().join("utf8.txt");
        let latin1 = dir.path().join("latin1.txt");
        fs::write(&utf8, "caf\u{e9} £5").unwrap();
        fs::write(&latin1, [b'c', b'a', b'f', 0xE9, b' ', 0xA3, b'5']).unwrap();

        assert_eq!(
            read_candidate_text(&utf8).unwrap(),
            ("caf\u{e9} £5".to_string(), TextEncoding::Utf8)
        );
        assert_eq!(
            read_candidate_text(&latin1).unwrap(),
            ("caf\u{e9} £5".to_string(), TextEncoding::Latin1)
        );
    }

    #[test]
    fn read_reports_missing_file() {
        let error = read_candidate_text(&PathBuf::from("/nonexistent/none.txt")).unwrap_err();
        assert!(error.to_string().contains("failed to read"));
    }

    #[test]
    fn evaluate_measures_cleaned_text() {
        let pipeline = RepairPipeline::new(RepairConfig::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let source = source(dir.path(), "2020-01-partyx", ExtractionMethod::OpticalExtraction);

        let candidate = Candidate::evaluate(&source, "N H S funding".to_string(), Some(&pipeline));
        assert_eq!(candidate.raw_text(), "N H S funding");
        assert_eq!(candidate.cleaned_text(), "NHS funding");
        assert_eq!(candidate.metrics().word_count, 2);

        let unrepaired = Candidate::evaluate(&source, "N H S funding".to_string(), None);
        assert_eq!(unrepaired.metrics().word_count, 4);
    }

    #[test]
    fn group_rejects_foreign_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let foreign = source(dir.path(), "2019-12-snp", ExtractionMethod::StructuredSource);
        let candidate = Candidate::evaluate(&foreign, "text".to_string(), None);

        let mut group = DocumentGroup::new("2020-01-partyx");
        assert!(group.insert(candidate).is_err());
        assert!(group.candidates().is_empty());
    }

    #[test]
    fn load_group_degrades_unreadable_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let key = "2020-01-partyx";
        let csv = source(dir.path(), key, ExtractionMethod::StructuredSource);
        let ocr = source(dir.path(), key, ExtractionMethod::OpticalExtraction);
        fs::write(&csv.path, "Full text of the manifesto.").unwrap();

        let source_group = SourceGroup {
            document_key: key.to_string(),
            sources: BTreeMap::from([
                (ExtractionMethod::StructuredSource, csv),
                (ExtractionMethod::OpticalExtraction, ocr),
            ]),
        };

        let loaded = load_group(&source_group, None);
        assert_eq!(loaded.group.candidates().len(), 1);
        assert_eq!(loaded.unavailable.len(), 1);
        assert_eq!(loaded.unavailable[0].method, ExtractionMethod::OpticalExtraction);
        assert_eq!(
            loaded.encodings.get(&ExtractionMethod::StructuredSource),
            Some(&TextEncoding::Utf8)
        );
    }
}
