use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::candidate::read_candidate_text;
use crate::chunking::{ChunkSizeStats, chunk_document, chunk_size_stats, default_keep_upper};
use crate::cli::ChunkArgs;
use crate::commands::inventory::discover_text_files;
use crate::model::{ChunkCounts, ChunkRunManifest};
use crate::report::rows_to_csv;
use crate::store::{self, ChunkRecord, STORE_FILE_NAME};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

const CHUNK_COLUMNS: [&str; 3] = ["document_name", "chunk_number", "chunk_text"];
const STATS_FILE_NAME: &str = "chunks_summary_stats.csv";
const STATS_COLUMNS: [&str; 5] = [
    "document_name",
    "doc_word_count",
    "number_of_chunks",
    "mean_chunk_size",
    "chunk_size_standard_deviation",
];

pub fn run(args: ChunkArgs) -> Result<()> {
    if args.max_chunk_chars == 0 {
        bail!("--max-chunk-chars must be at least 1");
    }

    let started_ts = Utc::now();
    let run_id = format!("chunk-{}", utc_compact_string(started_ts));
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join(STORE_FILE_NAME));
    let csv_path = args
        .csv_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("exports").join("chunks.csv"));
    let stats_path = args
        .stats_path
        .clone()
        .unwrap_or_else(|| csv_path.with_file_name(STATS_FILE_NAME));
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.cache_root.join("manifests").join(format!(
            "chunk_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    info!(input_dir = %args.input_dir.display(), run_id = %run_id, "starting chunk");

    let mut keep_upper = default_keep_upper();
    keep_upper.extend(args.keep_upper.iter().cloned());

    let mut connection = store::open_store(&db_path)?;
    let already_chunked = store::chunked_documents(&connection)?;
    let documents = discover_text_files(&args.input_dir)?;

    let mut counts = ChunkCounts {
        documents_seen: documents.len(),
        ..ChunkCounts::default()
    };
    let mut warnings = Vec::new();

    for path in &documents {
        let document_name = document_name(path)?;
        if !args.refresh && already_chunked.contains(&document_name) {
            debug!(document = %document_name, "chunks already stored; skipping");
            counts.documents_skipped += 1;
            continue;
        }

        let text = match read_candidate_text(path) {
            Ok((text, _)) => text,
            Err(err) => {
                warn!(file = %path.display(), error = %format!("{err:#}"), "failed to read document");
                warnings.push(format!("{}: {err:#}", path.display()));
                continue;
            }
        };

        let document = chunk_document(&text, args.max_chunk_chars, &keep_upper);
        counts.chunks_written += store::replace_chunks(&mut connection, &document_name, &document.chunks)?;
        counts.sentences_dropped += document.sentences_dropped;
        counts.documents_chunked += 1;
        info!(
            document = %document_name,
            chunks = document.chunks.len(),
            dropped = document.sentences_dropped,
            "chunked document"
        );
    }

    let chunks = store::load_chunks(&connection)?;
    write_chunk_csv(&csv_path, &chunks)?;
    counts.chunks_exported = chunks.len();
    info!(path = %csv_path.display(), chunks = chunks.len(), "wrote chunk csv");

    let stats = chunk_size_stats(
        chunks
            .iter()
            .map(|chunk| (chunk.document_name.as_str(), chunk.chunk_text.as_str())),
    );
    write_stats_csv(&stats_path, &stats)?;
    counts.documents_summarised = stats.len();
    info!(path = %stats_path.display(), documents = stats.len(), "wrote chunk statistics");

    let manifest = ChunkRunManifest {
        manifest_version: 1,
        run_id,
        generated_at: now_utc_string(),
        input_dir: args.input_dir.display().to_string(),
        csv_path: csv_path.display().to_string(),
        stats_path: stats_path.display().to_string(),
        max_chunk_chars: args.max_chunk_chars,
        counts,
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote chunk run manifest");
    info!(
        chunked = manifest.counts.documents_chunked,
        skipped = manifest.counts.documents_skipped,
        "chunk completed"
    );

    Ok(())
}

fn document_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))
}

fn write_chunk_csv(path: &Path, chunks: &[ChunkRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut rows = Vec::<Vec<String>>::with_capacity(chunks.len() + 1);
    rows.push(CHUNK_COLUMNS.iter().map(|column| column.to_string()).collect());
    rows.extend(chunks.iter().map(|chunk| {
        vec![
            chunk.document_name.clone(),
            chunk.chunk_number.to_string(),
            chunk.chunk_text.clone(),
        ]
    }));

    fs::write(path, rows_to_csv(&rows))
        .with_context(|| format!("failed to write chunk csv: {}", path.display()))
}

fn write_stats_csv(path: &Path, stats: &[ChunkSizeStats]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let mut rows = Vec::<Vec<String>>::with_capacity(stats.len() + 1);
    rows.push(STATS_COLUMNS.iter().map(|column| column.to_string()).collect());
    rows.extend(stats.iter().map(|document| {
        vec![
            document.document_name.clone(),
            document.word_count.to_string(),
            document.chunk_count.to_string(),
            format!("{:.4}", document.mean_chunk_words),
            document
                .chunk_words_std_dev
                .map(|std_dev| format!("{std_dev:.4}"))
                .unwrap_or_default(),
        ]
    }));

    fs::write(path, rows_to_csv(&rows))
        .with_context(|| format!("failed to write chunk statistics: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(input: &Path, cache: &Path, refresh: bool) -> ChunkArgs {
        ChunkArgs {
            cache_root: cache.to_path_buf(),
            input_dir: input.to_path_buf(),
            csv_path: None,
            stats_path: None,
            db_path: None,
            max_chunk_chars: 40,
            keep_upper: vec!["SNP".to_string()],
            refresh,
            manifest_path: Some(cache.join("chunk.json")),
        }
    }

    fn read_csv(cache: &Path) -> String {
        fs::read_to_string(cache.join("exports").join("chunks.csv")).unwrap()
    }

    #[test]
    fn documents_are_chunked_and_exported() {
        let input = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        fs::write(
            input.path().join("2019-12-snp.txt"),
            "VOTE SNP TODAY. We will hold a fresh referendum, soon. Thanks.",
        )
        .unwrap();

        run(args(input.path(), cache.path(), false)).unwrap();

        assert_eq!(
            read_csv(cache.path()),
            "document_name,chunk_number,chunk_text\n\
             2019-12-snp.txt,1,Vote SNP today.\n\
             2019-12-snp.txt,2,\"We will hold a fresh referendum, soon.\"\n\
             2019-12-snp.txt,3,Thanks.\n"
        );
        assert_eq!(
            fs::read_to_string(cache.path().join("exports").join(STATS_FILE_NAME)).unwrap(),
            "document_name,doc_word_count,number_of_chunks,mean_chunk_size,chunk_size_standard_deviation\n\
             2019-12-snp.txt,11,3,3.6667,3.0551\n"
        );
    }

    #[test]
    fn stored_documents_are_skipped_unless_refreshed() {
        let input = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let path = input.path().join("2017-06-labour.txt");
        fs::write(&path, "For the many.").unwrap();
        run(args(input.path(), cache.path(), false)).unwrap();

        fs::write(&path, "Not the few.").unwrap();
        run(args(input.path(), cache.path(), false)).unwrap();
        assert!(read_csv(cache.path()).contains("For the many."));

        run(args(input.path(), cache.path(), true)).unwrap();
        let csv = read_csv(cache.path());
        assert!(csv.contains("Not the few."));
        assert!(!csv.contains("For the many."));
    }
}
