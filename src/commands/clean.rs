use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::candidate::{TextEncoding, read_candidate_text};
use crate::cli::CleanArgs;
use crate::commands::inventory::discover_text_files;
use crate::commands::{build_pipeline, build_thread_pool};
use crate::model::{CleanCounts, CleanRunManifest, CleanedFileEntry};
use crate::repair::RepairPipeline;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

const CLEANED_SUFFIX: &str = "_cleaned";

pub fn run(args: CleanArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("clean-{}", utc_compact_string(started_ts));

    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| args.input_dir.clone());
    ensure_directory(&output_dir)?;
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.cache_root.join("manifests").join(format!(
            "clean_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    info!(
        input_dir = %args.input_dir.display(),
        output_dir = %output_dir.display(),
        run_id = %run_id,
        "starting clean"
    );

    let pipeline = build_pipeline(args.repair_config.as_deref())?;
    let sources = discover_text_files(&args.input_dir)?
        .into_iter()
        .filter(|path| !is_cleaned_output(path))
        .collect::<Vec<PathBuf>>();
    if sources.is_empty() {
        bail!("no text files to clean in {}", args.input_dir.display());
    }

    let pool = build_thread_pool(args.jobs)?;
    let outcomes = pool.install(|| {
        sources
            .par_iter()
            .map(|path| clean_file(path, &output_dir, &pipeline, args.verify_idempotence))
            .collect::<Vec<Result<CleanedFileEntry>>>()
    });

    let mut counts = CleanCounts {
        files_seen: sources.len(),
        ..CleanCounts::default()
    };
    let mut files = Vec::with_capacity(sources.len());
    let mut warnings = Vec::new();

    for (path, outcome) in sources.iter().zip(outcomes) {
        match outcome {
            Ok(entry) => {
                counts.files_cleaned += 1;
                if entry.encoding == TextEncoding::Latin1 {
                    counts.latin1_fallbacks += 1;
                }
                if entry.converged == Some(false) {
                    counts.non_convergent += 1;
                    warn!(file = %entry.source, "repair output changes on a second pass");
                    warnings.push(format!("{}: repair did not converge", entry.source));
                }
                files.push(entry);
            }
            Err(err) => {
                counts.files_failed += 1;
                warn!(file = %path.display(), error = %format!("{err:#}"), "failed to clean file");
                warnings.push(format!("{}: {err:#}", path.display()));
            }
        }
    }

    let manifest = CleanRunManifest {
        manifest_version: 1,
        run_id,
        started_at,
        updated_at: now_utc_string(),
        input_dir: args.input_dir.display().to_string(),
        output_dir: output_dir.display().to_string(),
        repair_config_path: args
            .repair_config
            .as_ref()
            .map(|path| path.display().to_string()),
        verify_idempotence: args.verify_idempotence,
        counts,
        files,
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote clean run manifest");
    info!(
        cleaned = manifest.counts.files_cleaned,
        failed = manifest.counts.files_failed,
        non_convergent = manifest.counts.non_convergent,
        "clean completed"
    );

    Ok(())
}

fn clean_file(
    path: &Path,
    output_dir: &Path,
    pipeline: &RepairPipeline,
    verify_idempotence: bool,
) -> Result<CleanedFileEntry> {
    let (raw, encoding) = read_candidate_text(path)?;
    let (cleaned, stages) = pipeline.repair_with_trace(&raw);
    let converged = verify_idempotence.then(|| pipeline.repair(&cleaned) == cleaned);

    let output = output_dir.join(cleaned_file_name(path)?);
    fs::write(&output, &cleaned)
        .with_context(|| format!("failed to write {}", output.display()))?;

    debug!(
        source = %path.display(),
        output = %output.display(),
        chars_before = raw.chars().count(),
        chars_after = cleaned.chars().count(),
        "cleaned file"
    );

    Ok(CleanedFileEntry {
        source: path.display().to_string(),
        output: output.display().to_string(),
        encoding,
        chars_before: raw.chars().count(),
        chars_after: cleaned.chars().count(),
        converged,
        stages,
    })
}

fn cleaned_file_name(path: &Path) -> Result<String> {
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;
    Ok(format!("{stem}{CLEANED_SUFFIX}.txt"))
}

fn is_cleaned_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.to_ascii_lowercase().ends_with(CLEANED_SUFFIX))
        .unwrap_or(false)
}
