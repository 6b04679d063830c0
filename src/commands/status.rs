use std::fs;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::inventory::INVENTORY_MANIFEST_NAME;
use crate::model::CandidateInventoryManifest;
use crate::store::{self, STORE_FILE_NAME};

pub fn run(args: StatusArgs) -> Result<()> {
    let inventory_path = args
        .cache_root
        .join("manifests")
        .join(INVENTORY_MANIFEST_NAME);
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join(STORE_FILE_NAME));

    info!(cache_root = %args.cache_root.display(), "status requested");

    if inventory_path.exists() {
        let raw = fs::read(&inventory_path)
            .with_context(|| format!("failed to read {}", inventory_path.display()))?;
        let inventory: CandidateInventoryManifest = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", inventory_path.display()))?;

        info!(
            generated_at = %inventory.generated_at,
            source = %inventory.source_directory,
            groups = inventory.group_count,
            candidates = inventory.candidate_count,
            "loaded inventory manifest"
        );
    } else {
        warn!(path = %inventory_path.display(), "inventory manifest missing");
    }

    if db_path.exists() {
        let connection = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;

        match store::latest_run(&connection).unwrap_or(None) {
            Some(run) => info!(
                run_id = %run.run_id,
                command = %run.command,
                status = %run.status,
                input_dir = %run.input_dir,
                groups_total = run.groups_total,
                groups_completed = run.groups_completed,
                started_at = %run.started_at,
                updated_at = %run.updated_at,
                "latest run"
            ),
            None => warn!("no runs recorded"),
        }

        let decisions = store::count_rows(&connection, "SELECT COUNT(*) FROM decisions").unwrap_or(0);
        let chunks = store::count_rows(&connection, "SELECT COUNT(*) FROM chunks").unwrap_or(0);
        info!(
            path = %db_path.display(),
            decisions,
            chunks,
            "run store status"
        );

        for (method, wins) in wins_by_method(&connection).unwrap_or_default() {
            info!(method = %method, wins, "decisions by winning method");
        }
    } else {
        warn!(path = %db_path.display(), "run store missing");
    }

    Ok(())
}

fn wins_by_method(connection: &Connection) -> Result<Vec<(String, i64)>> {
    let mut statement = connection.prepare(
        "SELECT winning_method, COUNT(*) FROM decisions GROUP BY winning_method ORDER BY winning_method",
    )?;
    let rows = statement
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::arbitration::{Decision, GroupEvaluation};
    use crate::grouping::ExtractionMethod;

    #[test]
    fn status_tolerates_an_empty_cache() {
        let cache = tempfile::tempdir().unwrap();
        run(StatusArgs {
            cache_root: cache.path().to_path_buf(),
            db_path: None,
        })
        .unwrap();
    }

    #[test]
    fn wins_are_counted_per_method() {
        let cache = tempfile::tempdir().unwrap();
        let mut connection = store::open_store(&cache.path().join(STORE_FILE_NAME)).unwrap();
        let evaluations = [
            ("a", ExtractionMethod::StructuredSource),
            ("b", ExtractionMethod::StructuredSource),
            ("c", ExtractionMethod::OpticalExtraction),
        ]
        .map(|(key, method)| GroupEvaluation {
            decision: Decision {
                document_key: key.to_string(),
                quality_scores: BTreeMap::new(),
                winning_method: method,
                winning_candidate_name: format!("{key}_{}.txt", method.suffix()),
            },
            metrics: BTreeMap::new(),
            source_hash: String::new(),
            unavailable: Vec::new(),
        });
        store::upsert_evaluations(&mut connection, "run-1", &evaluations).unwrap();

        assert_eq!(
            wins_by_method(&connection).unwrap(),
            vec![
                ("from_csv".to_string(), 2),
                ("tesseract_extraction".to_string(), 1),
            ]
        );

        run(StatusArgs {
            cache_root: cache.path().to_path_buf(),
            db_path: None,
        })
        .unwrap();
    }
}
