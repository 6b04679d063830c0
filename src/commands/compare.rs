use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::arbitration::GroupEvaluation;
use crate::candidate::{TextEncoding, load_group};
use crate::cli::CompareArgs;
use crate::commands::inventory::{discover_groups, source_hash};
use crate::commands::{build_pipeline, build_thread_pool};
use crate::grouping::SourceGroup;
use crate::model::{CompareCounts, ComparePaths, CompareRunManifest};
use crate::repair::RepairPipeline;
use crate::report::{REPORT_FILE_NAME, write_report};
use crate::store::{self, STORE_FILE_NAME};
use crate::util::{now_utc_string, sha256_file, utc_compact_string, write_json_pretty};

const UNREADABLE_HASH: &str = "unreadable";

struct CompareOutcome {
    evaluations: Vec<GroupEvaluation>,
    undecided: Vec<String>,
    counts: CompareCounts,
    warnings: Vec<String>,
}

struct GroupOutcome {
    document_key: String,
    source_hash: String,
    evaluation: Option<GroupEvaluation>,
    candidates_read: usize,
    latin1_fallbacks: usize,
    warnings: Vec<String>,
}

pub fn run(args: CompareArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("compare-{}", utc_compact_string(started_ts));

    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| args.input_dir.join(REPORT_FILE_NAME));
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join(STORE_FILE_NAME));
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.cache_root.join("manifests").join(format!(
            "compare_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });

    info!(
        input_dir = %args.input_dir.display(),
        run_id = %run_id,
        resume = args.resume,
        "starting compare"
    );

    let groups = discover_groups(&args.input_dir)?;
    let pipeline = if args.skip_repair {
        None
    } else {
        Some(build_pipeline(args.repair_config.as_deref())?)
    };

    let mut connection = store::open_store(&db_path)?;
    store::begin_run(&connection, &run_id, "compare", &args.input_dir, groups.len())?;

    let outcome = compare_groups(&args, &run_id, &groups, pipeline.as_ref(), &mut connection);
    let CompareOutcome {
        evaluations,
        undecided,
        counts,
        warnings,
    } = match outcome {
        Ok(result) => result,
        Err(err) => {
            store::update_run(&connection, &run_id, "failed", 0)?;
            return Err(err);
        }
    };

    write_report(&report_path, &evaluations, &undecided)?;
    info!(
        path = %report_path.display(),
        rows = evaluations.len() + undecided.len(),
        "wrote comparison report"
    );

    store::update_run(&connection, &run_id, "completed", counts.groups_total)?;

    let manifest = CompareRunManifest {
        manifest_version: 1,
        run_id,
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        repair_applied: pipeline.is_some(),
        resumed: args.resume,
        paths: ComparePaths {
            input_dir: args.input_dir.display().to_string(),
            report_path: report_path.display().to_string(),
            db_path: db_path.display().to_string(),
        },
        counts,
        warnings,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote compare run manifest");
    info!(
        groups = manifest.counts.groups_total,
        evaluated = manifest.counts.groups_evaluated,
        resumed = manifest.counts.groups_resumed,
        undecided = manifest.counts.groups_undecided,
        "compare completed"
    );

    Ok(())
}

fn compare_groups(
    args: &CompareArgs,
    run_id: &str,
    groups: &[SourceGroup],
    pipeline: Option<&RepairPipeline>,
    connection: &mut Connection,
) -> Result<CompareOutcome> {
    let mut counts = CompareCounts {
        groups_total: groups.len(),
        ..CompareCounts::default()
    };
    let mut warnings = Vec::new();
    let mut undecided = Vec::new();

    let fingerprints = groups
        .par_iter()
        .map(fingerprint_group)
        .collect::<Vec<String>>();

    let mut stored = if args.resume {
        store::load_evaluations(connection)?
    } else {
        BTreeMap::new()
    };

    let mut decided = BTreeMap::<String, GroupEvaluation>::new();
    let mut pending = Vec::new();
    for (group, fingerprint) in groups.iter().zip(fingerprints) {
        match stored.remove(&group.document_key) {
            Some(evaluation) if evaluation.source_hash == fingerprint => {
                debug!(document_key = %group.document_key, "reusing stored decision");
                counts.groups_resumed += 1;
                decided.insert(group.document_key.clone(), evaluation);
            }
            _ => pending.push((group, fingerprint)),
        }
    }
    if args.resume {
        info!(
            reused = counts.groups_resumed,
            pending = pending.len(),
            "resuming from run store"
        );
    }

    let pool = build_thread_pool(args.jobs)?;
    let checkpoint_every = args.checkpoint_every.max(1);
    for batch in pending.chunks(checkpoint_every) {
        let outcomes = pool.install(|| {
            batch
                .par_iter()
                .map(|(group, fingerprint)| evaluate_group(group, fingerprint.clone(), pipeline))
                .collect::<Vec<GroupOutcome>>()
        });

        let mut checkpoint = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            counts.candidates_read += outcome.candidates_read;
            counts.candidates_unavailable += outcome.warnings.len();
            counts.latin1_fallbacks += outcome.latin1_fallbacks;
            warnings.extend(outcome.warnings);

            match outcome.evaluation {
                Some(evaluation) => {
                    counts.groups_evaluated += 1;
                    checkpoint.push(evaluation);
                }
                None => {
                    counts.groups_undecided += 1;
                    warn!(
                        document_key = %outcome.document_key,
                        source_hash = %outcome.source_hash,
                        "no readable candidates; group left undecided"
                    );
                    warnings.push(format!("{}: no readable candidates", outcome.document_key));
                    undecided.push(outcome.document_key);
                }
            }
        }

        store::upsert_evaluations(connection, run_id, &checkpoint)?;
        counts.checkpoints_written += 1;
        let completed = counts.groups_resumed + counts.groups_evaluated + counts.groups_undecided;
        store::update_run(connection, run_id, "running", completed)?;
        info!(
            completed,
            total = counts.groups_total,
            "checkpoint written"
        );

        decided.extend(
            checkpoint
                .into_iter()
                .map(|evaluation| (evaluation.document_key().to_string(), evaluation)),
        );
    }

    let evaluations = decided.into_values().collect::<Vec<GroupEvaluation>>();
    for evaluation in &evaluations {
        *counts
            .wins
            .entry(evaluation.decision.winning_method)
            .or_insert(0) += 1;
    }

    Ok(CompareOutcome {
        evaluations,
        undecided,
        counts,
        warnings,
    })
}

fn fingerprint_group(group: &SourceGroup) -> String {
    let hashes = group
        .sources
        .values()
        .map(|source| {
            let sha256 = sha256_file(&source.path).unwrap_or_else(|_| UNREADABLE_HASH.to_string());
            (source.method, sha256)
        })
        .collect::<Vec<_>>();
    source_hash(
        hashes
            .iter()
            .map(|(method, sha256)| (*method, sha256.as_str())),
    )
}

fn evaluate_group(
    group: &SourceGroup,
    fingerprint: String,
    pipeline: Option<&RepairPipeline>,
) -> GroupOutcome {
    let loaded = load_group(group, pipeline);
    for candidate in loaded.group.candidates().values() {
        debug!(
            file = %candidate.file_name(),
            raw_chars = candidate.raw_text().chars().count(),
            cleaned_chars = candidate.cleaned_text().chars().count(),
            words = candidate.metrics().word_count,
            "candidate measured"
        );
    }

    let mut warnings = Vec::with_capacity(loaded.unavailable.len());
    for unavailable in &loaded.unavailable {
        warn!(
            document_key = %group.document_key,
            method = %unavailable.method,
            file = %unavailable.file_name,
            reason = %unavailable.reason,
            "candidate unavailable"
        );
        warnings.push(format!("{}: {}", unavailable.file_name, unavailable.reason));
    }

    let evaluation = GroupEvaluation::from_group(
        &loaded.group,
        fingerprint.clone(),
        loaded
            .unavailable
            .iter()
            .map(|unavailable| unavailable.method)
            .collect(),
    );
    if let Some(evaluation) = &evaluation {
        debug!(
            document_key = %group.document_key,
            winner = %evaluation.decision.winning_method,
            "group decided"
        );
    }

    GroupOutcome {
        document_key: group.document_key.clone(),
        source_hash: fingerprint,
        evaluation,
        candidates_read: loaded.group.candidates().len(),
        latin1_fallbacks: loaded
            .encodings
            .values()
            .filter(|encoding| **encoding == TextEncoding::Latin1)
            .count(),
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::grouping::{CandidateSource, ExtractionMethod};
    use crate::report::render_report;

    fn args(input_dir: &Path, cache_root: &Path, resume: bool) -> CompareArgs {
        CompareArgs {
            cache_root: cache_root.to_path_buf(),
            input_dir: input_dir.to_path_buf(),
            report_path: None,
            db_path: None,
            repair_config: None,
            skip_repair: false,
            jobs: Some(2),
            checkpoint_every: 1,
            resume,
            manifest_path: Some(cache_root.join("compare.json")),
        }
    }

    fn write_corpus(dir: &Path) {
        let sentence = "We will invest in schools and hospitals across the country. ";
        fs::write(dir.join("2020-01-partyx_from_csv.txt"), sentence.repeat(10)).unwrap();
        fs::write(dir.join("2020-01-partyx_pymupdf_extraction.txt"), sentence.repeat(8)).unwrap();
        fs::write(
            dir.join("2020-01-partyx_tesseract_extraction.txt"),
            "W3 wi11 inv3st in sch00ls. ".repeat(12),
        )
        .unwrap();
        fs::write(
            dir.join("2019-12-snp_tesseract_extraction.txt"),
            [b'S', b'c', b'o', b't', b'l', b'a', b'n', b'd', b' ', 0xE9, b't', b'e'],
        )
        .unwrap();
    }

    fn read_manifest(cache_root: &Path) -> serde_json::Value {
        serde_json::from_slice(&fs::read(cache_root.join("compare.json")).unwrap()).unwrap()
    }

    #[test]
    fn compare_reports_and_stores_every_group() {
        let input = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_corpus(input.path());

        run(args(input.path(), cache.path(), false)).unwrap();

        let report = fs::read_to_string(input.path().join(REPORT_FILE_NAME)).unwrap();
        let rows = report.lines().collect::<Vec<_>>();
        assert_eq!(rows.len(), 3);
        assert!(rows[1].starts_with("2019-12-snp,"));
        assert!(rows[1].ends_with(",tesseract_extraction,2019-12-snp_tesseract_extraction.txt"));
        assert!(rows[2].ends_with(",from_csv,2020-01-partyx_from_csv.txt"));

        let connection = store::open_store(&cache.path().join(STORE_FILE_NAME)).unwrap();
        let stored = store::load_evaluations(&connection).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(
            stored["2020-01-partyx"].decision.winning_method,
            ExtractionMethod::StructuredSource
        );
        assert_eq!(store::latest_run(&connection).unwrap().unwrap().status, "completed");

        let manifest = read_manifest(cache.path());
        assert_eq!(manifest["counts"]["groups_evaluated"], 2);
        assert_eq!(manifest["counts"]["candidates_read"], 4);
        assert_eq!(manifest["counts"]["latin1_fallbacks"], 1);
        assert_eq!(manifest["counts"]["checkpoints_written"], 2);
        assert_eq!(manifest["counts"]["wins"]["from_csv"], 1);
    }

    #[test]
    fn resume_reuses_unchanged_groups_only() {
        let input = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_corpus(input.path());
        run(args(input.path(), cache.path(), false)).unwrap();

        fs::write(
            input.path().join("2019-12-snp_from_csv.txt"),
            "Scotland deserves a fresh referendum on its future.",
        )
        .unwrap();
        run(args(input.path(), cache.path(), true)).unwrap();

        let manifest = read_manifest(cache.path());
        assert_eq!(manifest["counts"]["groups_resumed"], 1);
        assert_eq!(manifest["counts"]["groups_evaluated"], 1);

        let connection = store::open_store(&cache.path().join(STORE_FILE_NAME)).unwrap();
        let stored = store::load_evaluations(&connection).unwrap();
        assert_eq!(
            stored["2019-12-snp"].decision.winning_method,
            ExtractionMethod::StructuredSource
        );
    }

    #[test]
    fn fingerprint_changes_with_candidate_content() {
        let input = tempfile::tempdir().unwrap();
        write_corpus(input.path());
        let groups = discover_groups(input.path()).unwrap();
        let before = fingerprint_group(&groups[1]);

        fs::write(input.path().join("2020-01-partyx_from_csv.txt"), "edited").unwrap();
        assert_ne!(before, fingerprint_group(&groups[1]));
    }

    #[test]
    fn unreadable_group_is_reported_without_a_recommendation() {
        let input = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let file_name = "2010-05-lost_tesseract_extraction.txt".to_string();
        let groups = vec![SourceGroup {
            document_key: "2010-05-lost".to_string(),
            sources: BTreeMap::from([(
                ExtractionMethod::OpticalExtraction,
                CandidateSource {
                    document_key: "2010-05-lost".to_string(),
                    method: ExtractionMethod::OpticalExtraction,
                    path: input.path().join(&file_name),
                    file_name,
                },
            )]),
        }];
        let mut connection = store::open_store(&cache.path().join(STORE_FILE_NAME)).unwrap();

        let outcome = compare_groups(
            &args(input.path(), cache.path(), false),
            "run-1",
            &groups,
            None,
            &mut connection,
        )
        .unwrap();

        assert!(outcome.evaluations.is_empty());
        assert_eq!(outcome.undecided, vec!["2010-05-lost".to_string()]);
        assert_eq!(outcome.counts.groups_undecided, 1);
        assert_eq!(outcome.counts.candidates_unavailable, 1);

        let report = render_report(&outcome.evaluations, &outcome.undecided);
        let row = report.lines().nth(1).unwrap();
        assert!(row.starts_with("2010-05-lost,\"from_csv:N/A, PyMuPDF:N/A, Tesseract:N/A\","));
        assert!(row.ends_with(",,"));
    }

    #[test]
    fn empty_input_directory_fails() {
        let input = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        assert!(run(args(input.path(), cache.path(), false)).is_err());
    }
}
