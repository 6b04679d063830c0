use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::candidate::TextEncoding;
use crate::grouping::ExtractionMethod;
use crate::repair::StageTrace;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub method: ExtractionMethod,
    pub filename: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryGroup {
    pub document_key: String,
    pub source_hash: String,
    pub candidates: Vec<CandidateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub group_count: usize,
    pub candidate_count: usize,
    pub groups: Vec<InventoryGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanedFileEntry {
    pub source: String,
    pub output: String,
    pub encoding: TextEncoding,
    pub chars_before: usize,
    pub chars_after: usize,
    pub converged: Option<bool>,
    pub stages: Vec<StageTrace>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanCounts {
    pub files_seen: usize,
    pub files_cleaned: usize,
    pub files_failed: usize,
    pub latin1_fallbacks: usize,
    pub non_convergent: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub updated_at: String,
    pub input_dir: String,
    pub output_dir: String,
    pub repair_config_path: Option<String>,
    pub verify_idempotence: bool,
    pub counts: CleanCounts,
    pub files: Vec<CleanedFileEntry>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparePaths {
    pub input_dir: String,
    pub report_path: String,
    pub db_path: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompareCounts {
    pub groups_total: usize,
    pub groups_evaluated: usize,
    pub groups_resumed: usize,
    pub groups_undecided: usize,
    pub candidates_read: usize,
    pub candidates_unavailable: usize,
    pub latin1_fallbacks: usize,
    pub checkpoints_written: usize,
    pub wins: BTreeMap<ExtractionMethod, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub repair_applied: bool,
    pub resumed: bool,
    pub paths: ComparePaths,
    pub counts: CompareCounts,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectionEntry {
    pub document_key: String,
    pub method: ExtractionMethod,
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub input_dir: String,
    pub output_dir: String,
    pub strip_method_suffix: bool,
    pub repair_applied: bool,
    pub selections: Vec<SelectionEntry>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChunkCounts {
    pub documents_seen: usize,
    pub documents_chunked: usize,
    pub documents_skipped: usize,
    pub chunks_written: usize,
    pub sentences_dropped: usize,
    pub chunks_exported: usize,
    pub documents_summarised: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub input_dir: String,
    pub csv_path: String,
    pub stats_path: String,
    pub max_chunk_chars: usize,
    pub counts: ChunkCounts,
    pub warnings: Vec<String>,
}
