use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::candidate::read_candidate_text;
use crate::cli::SelectArgs;
use crate::commands::build_pipeline;
use crate::grouping::IdentityGrouper;
use crate::model::{SelectRunManifest, SelectionEntry};
use crate::store::{self, STORE_FILE_NAME};
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: SelectArgs) -> Result<()> {
    let started_ts = Utc::now();
    let run_id = format!("select-{}", utc_compact_string(started_ts));
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join(STORE_FILE_NAME));
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.cache_root.join("manifests").join(format!(
            "select_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    let connection = store::open_store(&db_path)?;
    let evaluations = store::load_evaluations(&connection)?;
    if evaluations.is_empty() {
        bail!(
            "no decisions in {}; run compare first",
            db_path.display()
        );
    }

    ensure_directory(&args.output_dir)?;
    let grouper = IdentityGrouper::new()?;
    let pipeline = if args.skip_repair {
        None
    } else {
        Some(build_pipeline(args.repair_config.as_deref())?)
    };

    let mut selections = Vec::with_capacity(evaluations.len());
    let mut warnings = Vec::new();
    let mut destinations = BTreeSet::new();

    for evaluation in evaluations.values() {
        let file_name = &evaluation.decision.winning_candidate_name;
        let source = args.input_dir.join(file_name);
        if !source.is_file() {
            warn!(
                document_key = %evaluation.document_key(),
                file = %source.display(),
                "recommended file missing; skipping"
            );
            warnings.push(format!("{}: recommended file missing", source.display()));
            continue;
        }

        let destination_name = if args.strip_method_suffix {
            grouper
                .strip_method_suffix(file_name)
                .unwrap_or_else(|| file_name.clone())
        } else {
            file_name.clone()
        };
        if !destinations.insert(destination_name.to_lowercase()) {
            warn!(file = %destination_name, "destination name already used; skipping");
            warnings.push(format!("{destination_name}: duplicate destination"));
            continue;
        }

        let destination = args.output_dir.join(&destination_name);
        match &pipeline {
            Some(pipeline) => {
                let (text, _) = read_candidate_text(&source)?;
                fs::write(&destination, pipeline.repair(&text)).with_context(|| {
                    format!("failed to write {}", destination.display())
                })?;
            }
            None => {
                fs::copy(&source, &destination).with_context(|| {
                    format!(
                        "failed to copy {} to {}",
                        source.display(),
                        destination.display()
                    )
                })?;
            }
        }

        selections.push(SelectionEntry {
            document_key: evaluation.document_key().to_string(),
            method: evaluation.decision.winning_method,
            source: source.display().to_string(),
            destination: destination.display().to_string(),
        });
    }

    let manifest = SelectRunManifest {
        manifest_version: 1,
        run_id,
        generated_at: now_utc_string(),
        input_dir: args.input_dir.display().to_string(),
        output_dir: args.output_dir.display().to_string(),
        strip_method_suffix: args.strip_method_suffix,
        repair_applied: pipeline.is_some(),
        selections,
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote select run manifest");
    info!(
        selected = manifest.selections.len(),
        skipped = manifest.warnings.len(),
        "select completed"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;

    use super::*;
    use crate::arbitration::{Decision, GroupEvaluation};
    use crate::grouping::ExtractionMethod;

    fn seed_store(cache_root: &Path, winners: &[(&str, ExtractionMethod)]) {
        let mut connection = store::open_store(&cache_root.join(STORE_FILE_NAME)).unwrap();
        let evaluations = winners
            .iter()
            .map(|(key, method)| GroupEvaluation {
                decision: Decision {
                    document_key: key.to_lowercase(),
                    quality_scores: BTreeMap::from([(*method, 1.0)]),
                    winning_method: *method,
                    winning_candidate_name: format!("{key}_{}.txt", method.suffix()),
                },
                metrics: BTreeMap::new(),
                source_hash: "hash".to_string(),
                unavailable: Vec::new(),
            })
            .collect::<Vec<_>>();
        store::upsert_evaluations(&mut connection, "run-1", &evaluations).unwrap();
    }

    fn args(input: &Path, output: &Path, cache: &Path, strip: bool) -> SelectArgs {
        SelectArgs {
            skip_repair: true,
            ..repaired_args(input, output, cache, strip)
        }
    }

    fn repaired_args(input: &Path, output: &Path, cache: &Path, strip: bool) -> SelectArgs {
        SelectArgs {
            cache_root: cache.to_path_buf(),
            input_dir: input.to_path_buf(),
            output_dir: output.to_path_buf(),
            db_path: None,
            strip_method_suffix: strip,
            repair_config: None,
            skip_repair: false,
            manifest_path: Some(cache.join("select.json")),
        }
    }

    #[test]
    fn winners_are_copied_and_renamed() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        seed_store(
            cache.path(),
            &[
                ("2017-06-Labour", ExtractionMethod::OpticalExtraction),
                ("2019-12-snp", ExtractionMethod::StructuredSource),
            ],
        );
        fs::write(input.path().join("2017-06-Labour_tesseract_extraction.txt"), "labour").unwrap();

        run(args(input.path(), output.path(), cache.path(), true)).unwrap();

        assert_eq!(
            fs::read_to_string(output.path().join("2017-06-Labour.txt")).unwrap(),
            "labour"
        );
        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(cache.path().join("select.json")).unwrap()).unwrap();
        assert_eq!(manifest["selections"].as_array().unwrap().len(), 1);
        assert_eq!(manifest["warnings"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn names_are_kept_without_strip_flag() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        seed_store(cache.path(), &[("2019-12-snp", ExtractionMethod::StructuredSource)]);
        fs::write(input.path().join("2019-12-snp_from_csv.txt"), "snp").unwrap();

        run(args(input.path(), output.path(), cache.path(), false)).unwrap();

        assert!(output.path().join("2019-12-snp_from_csv.txt").is_file());
    }

    #[test]
    fn winners_are_written_as_the_repaired_text_that_was_measured() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        seed_store(cache.path(), &[("2019-12-snp", ExtractionMethod::OpticalExtraction)]);
        fs::write(
            input.path().join("2019-12-snp_tesseract_extraction.txt"),
            "The N H S is our\npriority .",
        )
        .unwrap();

        run(repaired_args(input.path(), output.path(), cache.path(), true)).unwrap();

        assert_eq!(
            fs::read_to_string(output.path().join("2019-12-snp.txt")).unwrap(),
            "The NHS is our priority."
        );
        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(cache.path().join("select.json")).unwrap()).unwrap();
        assert_eq!(manifest["repair_applied"], true);
    }

    #[test]
    fn empty_store_is_an_error() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let error = run(args(input.path(), output.path(), cache.path(), true)).unwrap_err();
        assert!(error.to_string().contains("run compare first"));
    }
}
