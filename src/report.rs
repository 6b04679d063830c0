use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::arbitration::{GroupEvaluation, quality_score};
use crate::grouping::ExtractionMethod;
use crate::metrics::Metrics;
use crate::util::ensure_directory;

pub const REPORT_FILE_NAME: &str = "extraction_comparison_summary.csv";

pub const REPORT_COLUMNS: [&str; 11] = [
    "group",
    "word_count",
    "sentence_count",
    "char_count",
    "avg_word_length",
    "punctuation_frequency",
    "lexical_diversity",
    "ocr_error_rate",
    "quality_score",
    "recommendation",
    "recommended_file",
];

enum MetricValue {
    Count(usize),
    Ratio(f64),
}

impl MetricValue {
    fn render(&self) -> String {
        match self {
            Self::Count(value) => value.to_string(),
            Self::Ratio(value) => format!("{value:.4}"),
        }
    }
}

#[derive(Copy, Clone)]
enum MetricColumn {
    WordCount,
    SentenceCount,
    CharCount,
    AvgWordLength,
    PunctuationFrequency,
    LexicalDiversity,
    OcrErrorRate,
    QualityScore,
}

impl MetricColumn {
    const ALL: [MetricColumn; 8] = [
        Self::WordCount,
        Self::SentenceCount,
        Self::CharCount,
        Self::AvgWordLength,
        Self::PunctuationFrequency,
        Self::LexicalDiversity,
        Self::OcrErrorRate,
        Self::QualityScore,
    ];

    fn value(self, metrics: &Metrics) -> MetricValue {
        match self {
            Self::WordCount => MetricValue::Count(metrics.word_count),
            Self::SentenceCount => MetricValue::Count(metrics.sentence_count),
            Self::CharCount => MetricValue::Count(metrics.char_count),
            Self::AvgWordLength => MetricValue::Ratio(metrics.avg_word_length),
            Self::PunctuationFrequency => MetricValue::Ratio(metrics.punctuation_frequency),
            Self::LexicalDiversity => MetricValue::Ratio(metrics.lexical_diversity),
            Self::OcrErrorRate => MetricValue::Ratio(metrics.ocr_error_rate),
            Self::QualityScore => MetricValue::Ratio(quality_score(metrics)),
        }
    }
}

/// Renders one cell as `label:value` per method in priority order, with
/// `N/A` for methods the group has no metrics for.
fn format_metric_list(metrics: &BTreeMap<ExtractionMethod, Metrics>, column: MetricColumn) -> String {
    ExtractionMethod::ALL
        .iter()
        .map(|method| {
            let value = metrics
                .get(method)
                .map(|metrics| column.value(metrics).render())
                .unwrap_or_else(|| "N/A".to_string());
            format!("{}:{value}", method.label())
        })
        .collect::<Vec<String>>()
        .join(", ")
}

fn metric_cells(row: &mut Vec<String>, metrics: &BTreeMap<ExtractionMethod, Metrics>) {
    row.extend(
        MetricColumn::ALL
            .into_iter()
            .map(|column| format_metric_list(metrics, column)),
    );
}

pub fn report_row(evaluation: &GroupEvaluation) -> Vec<String> {
    let mut row = Vec::with_capacity(REPORT_COLUMNS.len());
    row.push(evaluation.document_key().to_string());
    metric_cells(&mut row, &evaluation.metrics);
    row.push(evaluation.decision.winning_method.suffix().to_string());
    row.push(evaluation.decision.winning_candidate_name.clone());
    row
}

/// Row for a group none of whose candidates could be read: every metric is
/// `N/A` and the recommendation is empty.
fn undecided_row(document_key: &str) -> Vec<String> {
    let mut row = Vec::with_capacity(REPORT_COLUMNS.len());
    row.push(document_key.to_string());
    metric_cells(&mut row, &BTreeMap::new());
    row.push(String::new());
    row.push(String::new());
    row
}

/// One row per document key in key order, decided or not.
pub fn render_report(evaluations: &[GroupEvaluation], undecided: &[String]) -> String {
    let body = evaluations
        .iter()
        .map(|evaluation| (evaluation.document_key(), report_row(evaluation)))
        .chain(
            undecided
                .iter()
                .map(|document_key| (document_key.as_str(), undecided_row(document_key))),
        )
        .collect::<BTreeMap<&str, Vec<String>>>();

    let mut rows = Vec::<Vec<String>>::with_capacity(body.len() + 1);
    rows.push(REPORT_COLUMNS.iter().map(|column| column.to_string()).collect());
    rows.extend(body.into_values());
    rows_to_csv(&rows)
}

pub fn write_report(
    path: &Path,
    evaluations: &[GroupEvaluation],
    undecided: &[String],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }
    fs::write(path, render_report(evaluations, undecided))
        .with_context(|| format!("failed to write report: {}", path.display()))
}

pub fn rows_to_csv(rows: &[Vec<String>]) -> String {
    let mut csv = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| escape_csv_cell(cell))
                .collect::<Vec<String>>()
                .join(",")
        })
        .collect::<Vec<String>>()
        .join("\n");
    csv.push('\n');
    csv
}

fn escape_csv_cell(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::Decision;

    fn evaluation() -> GroupEvaluation {
        let csv = Metrics {
            word_count: 500,
            sentence_count: 20,
            char_count: 3000,
            avg_word_length: 5.0,
            punctuation_frequency: 0.01,
            lexical_diversity: 0.4,
            ocr_error_rate: 0.0,
        };
        let ocr = Metrics {
            word_count: 300,
            sentence_count: 12,
            char_count: 1700,
            avg_word_length: 4.66666,
            punctuation_frequency: 0.02,
            lexical_diversity: 0.5,
            ocr_error_rate: 0.25,
        };

        GroupEvaluation {
            decision: Decision {
                document_key: "2020-01-partyx".to_string(),
                quality_scores: BTreeMap::from([
                    (ExtractionMethod::StructuredSource, 500.0),
                    (ExtractionMethod::OpticalExtraction, 225.0),
                ]),
                winning_method: ExtractionMethod::StructuredSource,
                winning_candidate_name: "2020-01-partyx_from_csv.txt".to_string(),
            },
            metrics: BTreeMap::from([
                (ExtractionMethod::StructuredSource, csv),
                (ExtractionMethod::OpticalExtraction, ocr),
            ]),
            source_hash: "hash".to_string(),
            unavailable: Vec::new(),
        }
    }

    #[test]
    fn metric_cells_list_every_method_in_priority_order() {
        let row = report_row(&evaluation());

        assert_eq!(row.len(), REPORT_COLUMNS.len());
        assert_eq!(row[0], "2020-01-partyx");
        assert_eq!(row[1], "from_csv:500, PyMuPDF:N/A, Tesseract:300");
        assert_eq!(row[4], "from_csv:5.0000, PyMuPDF:N/A, Tesseract:4.6667");
        assert_eq!(row[8], "from_csv:500.0000, PyMuPDF:N/A, Tesseract:225.0000");
        assert_eq!(row[9], "from_csv");
        assert_eq!(row[10], "2020-01-partyx_from_csv.txt");
    }

    #[test]
    fn rendered_report_quotes_list_cells() {
        let report = render_report(&[evaluation()], &[]);
        let mut lines = report.lines();

        assert_eq!(lines.next(), Some(REPORT_COLUMNS.join(",").as_str()));
        let row = lines.next().unwrap();
        assert!(row.starts_with("2020-01-partyx,\"from_csv:500, PyMuPDF:N/A, Tesseract:300\","));
        assert!(row.ends_with(",from_csv,2020-01-partyx_from_csv.txt"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn undecided_groups_get_an_empty_row_in_key_order() {
        let undecided = ["2010-05-lost".to_string(), "2024-07-late".to_string()];
        let report = render_report(&[evaluation()], &undecided);
        let lines = report.lines().skip(1).collect::<Vec<_>>();

        let empty_cell = "\"from_csv:N/A, PyMuPDF:N/A, Tesseract:N/A\"";
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            format!("2010-05-lost,{},,", vec![empty_cell; 8].join(","))
        );
        assert!(lines[1].starts_with("2020-01-partyx,"));
        assert!(lines[2].starts_with("2024-07-late,"));
        assert!(lines[2].ends_with(",,"));
    }

    #[test]
    fn escape_doubles_embedded_quotes() {
        assert_eq!(escape_csv_cell("plain"), "plain");
        assert_eq!(escape_csv_cell("say \"no\""), "\"say \"\"no\"\"\"");
        assert_eq!(escape_csv_cell("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn write_report_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join(REPORT_FILE_NAME);

        write_report(&path, &[], &[]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\n", REPORT_COLUMNS.join(","))
        );
    }
}
