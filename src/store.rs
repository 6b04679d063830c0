use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::arbitration::{Decision, GroupEvaluation};
use crate::grouping::ExtractionMethod;
use crate::util::{ensure_directory, now_utc_string};

pub const STORE_FILE_NAME: &str = "arbiter.sqlite";
const DB_SCHEMA_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: String,
    pub command: String,
    pub input_dir: String,
    pub status: String,
    pub groups_total: usize,
    pub groups_completed: usize,
    pub started_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub document_name: String,
    pub chunk_number: usize,
    pub chunk_text: String,
}

pub fn open_store(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
              run_id TEXT PRIMARY KEY,
              command TEXT NOT NULL,
              input_dir TEXT NOT NULL,
              status TEXT NOT NULL,
              groups_total INTEGER NOT NULL DEFAULT 0,
              groups_completed INTEGER NOT NULL DEFAULT 0,
              started_at TEXT NOT NULL,
              updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS decisions (
              document_key TEXT PRIMARY KEY,
              run_id TEXT NOT NULL,
              winning_method TEXT NOT NULL,
              winning_file TEXT NOT NULL,
              source_hash TEXT NOT NULL,
              scores_json TEXT NOT NULL,
              metrics_json TEXT NOT NULL,
              unavailable_json TEXT NOT NULL,
              decided_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
              document_name TEXT NOT NULL,
              chunk_number INTEGER NOT NULL,
              chunk_text TEXT NOT NULL,
              created_at TEXT NOT NULL,
              PRIMARY KEY (document_name, chunk_number)
            );

            CREATE INDEX IF NOT EXISTS idx_decisions_run ON decisions(run_id);
            ",
        )
        .context("failed to initialize run store schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;

    Ok(())
}

pub fn begin_run(
    connection: &Connection,
    run_id: &str,
    command: &str,
    input_dir: &Path,
    groups_total: usize,
) -> Result<()> {
    let now = now_utc_string();
    connection
        .execute(
            "
            INSERT INTO runs(run_id, command, input_dir, status, groups_total, groups_completed, started_at, updated_at)
            VALUES(?1, ?2, ?3, 'running', ?4, 0, ?5, ?5)
            ON CONFLICT(run_id) DO UPDATE SET
              status='running',
              groups_total=excluded.groups_total,
              updated_at=excluded.updated_at
            ",
            params![
                run_id,
                command,
                input_dir.display().to_string(),
                groups_total as i64,
                now
            ],
        )
        .with_context(|| format!("failed to record run {run_id}"))?;
    Ok(())
}

pub fn update_run(
    connection: &Connection,
    run_id: &str,
    status: &str,
    groups_completed: usize,
) -> Result<()> {
    connection
        .execute(
            "UPDATE runs SET status=?2, groups_completed=?3, updated_at=?4 WHERE run_id=?1",
            params![run_id, status, groups_completed as i64, now_utc_string()],
        )
        .with_context(|| format!("failed to update run {run_id}"))?;
    Ok(())
}

pub fn latest_run(connection: &Connection) -> Result<Option<RunRecord>> {
    connection
        .query_row(
            "
            SELECT run_id, command, input_dir, status, groups_total, groups_completed, started_at, updated_at
            FROM runs
            ORDER BY started_at DESC, run_id DESC
            LIMIT 1
            ",
            [],
            |row| {
                Ok(RunRecord {
                    run_id: row.get(0)?,
                    command: row.get(1)?,
                    input_dir: row.get(2)?,
                    status: row.get(3)?,
                    groups_total: row.get::<_, i64>(4)? as usize,
                    groups_completed: row.get::<_, i64>(5)? as usize,
                    started_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            },
        )
        .optional()
        .context("failed to query latest run")
}

/// Writes a checkpoint batch in one transaction, replacing earlier decisions
/// for the same document keys.
pub fn upsert_evaluations(
    connection: &mut Connection,
    run_id: &str,
    evaluations: &[GroupEvaluation],
) -> Result<usize> {
    let decided_at = now_utc_string();
    let tx = connection.transaction()?;

    {
        let mut statement = tx.prepare(
            "
            INSERT INTO decisions(document_key, run_id, winning_method, winning_file, source_hash, scores_json, metrics_json, unavailable_json, decided_at)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(document_key) DO UPDATE SET
              run_id=excluded.run_id,
              winning_method=excluded.winning_method,
              winning_file=excluded.winning_file,
              source_hash=excluded.source_hash,
              scores_json=excluded.scores_json,
              metrics_json=excluded.metrics_json,
              unavailable_json=excluded.unavailable_json,
              decided_at=excluded.decided_at
            ",
        )?;

        for evaluation in evaluations {
            let scores_json = serde_json::to_string(&evaluation.decision.quality_scores)
                .context("failed to serialize quality scores")?;
            let metrics_json = serde_json::to_string(&evaluation.metrics)
                .context("failed to serialize metrics")?;
            let unavailable_json = serde_json::to_string(&evaluation.unavailable)
                .context("failed to serialize unavailable methods")?;

            statement
                .execute(params![
                    evaluation.document_key(),
                    run_id,
                    evaluation.decision.winning_method.suffix(),
                    &evaluation.decision.winning_candidate_name,
                    &evaluation.source_hash,
                    scores_json,
                    metrics_json,
                    unavailable_json,
                    &decided_at
                ])
                .with_context(|| {
                    format!("failed to store decision for {}", evaluation.document_key())
                })?;
        }
    }

    tx.commit()?;
    Ok(evaluations.len())
}

pub fn load_evaluations(connection: &Connection) -> Result<BTreeMap<String, GroupEvaluation>> {
    let mut statement = connection.prepare(
        "
        SELECT document_key, winning_method, winning_file, source_hash, scores_json, metrics_json, unavailable_json
        FROM decisions
        ORDER BY document_key
        ",
    )?;

    let mut rows = statement.query([])?;
    let mut evaluations = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let document_key: String = row.get(0)?;
        let winning_method: String = row.get(1)?;
        let scores_json: String = row.get(4)?;
        let metrics_json: String = row.get(5)?;
        let unavailable_json: String = row.get(6)?;

        let winning_method = ExtractionMethod::from_suffix(&winning_method).with_context(|| {
            format!("unknown winning method '{winning_method}' stored for {document_key}")
        })?;
        let evaluation = GroupEvaluation {
            decision: Decision {
                document_key: document_key.clone(),
                quality_scores: serde_json::from_str(&scores_json).with_context(|| {
                    format!("failed to parse stored scores for {document_key}")
                })?,
                winning_method,
                winning_candidate_name: row.get(2)?,
            },
            metrics: serde_json::from_str(&metrics_json).with_context(|| {
                format!("failed to parse stored metrics for {document_key}")
            })?,
            source_hash: row.get(3)?,
            unavailable: serde_json::from_str(&unavailable_json).with_context(|| {
                format!("failed to parse stored unavailable methods for {document_key}")
            })?,
        };
        evaluations.insert(document_key, evaluation);
    }

    Ok(evaluations)
}

pub fn chunked_documents(connection: &Connection) -> Result<BTreeSet<String>> {
    let mut statement = connection.prepare("SELECT DISTINCT document_name FROM chunks")?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;
    Ok(names)
}

/// Replaces every chunk of a document. Chunk numbers start at one.
pub fn replace_chunks(
    connection: &mut Connection,
    document_name: &str,
    chunks: &[String],
) -> Result<usize> {
    let created_at = now_utc_string();
    let tx = connection.transaction()?;

    tx.execute("DELETE FROM chunks WHERE document_name=?1", [document_name])
        .with_context(|| format!("failed to clear chunks for {document_name}"))?;
    {
        let mut statement = tx.prepare(
            "INSERT INTO chunks(document_name, chunk_number, chunk_text, created_at) VALUES(?1, ?2, ?3, ?4)",
        )?;
        for (index, chunk) in chunks.iter().enumerate() {
            statement.execute(params![document_name, (index + 1) as i64, chunk, &created_at])?;
        }
    }

    tx.commit()?;
    Ok(chunks.len())
}

pub fn load_chunks(connection: &Connection) -> Result<Vec<ChunkRecord>> {
    let mut statement = connection.prepare(
        "SELECT document_name, chunk_number, chunk_text FROM chunks ORDER BY document_name, chunk_number",
    )?;
    let chunks = statement
        .query_map([], |row| {
            Ok(ChunkRecord {
                document_name: row.get(0)?,
                chunk_number: row.get::<_, i64>(1)? as usize,
                chunk_text: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<ChunkRecord>>>()?;
    Ok(chunks)
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use crate::metrics::Metrics;

    use super::*;

    fn evaluation(key: &str, hash: &str) -> GroupEvaluation {
        GroupEvaluation {
            decision: Decision {
                document_key: key.to_string(),
                quality_scores: BTreeMap::from([
                    (ExtractionMethod::StructuredSource, 500.0),
                    (ExtractionMethod::NativeExtraction, 470.4),
                ]),
                winning_method: ExtractionMethod::StructuredSource,
                winning_candidate_name: format!("{key}_from_csv.txt"),
            },
            metrics: BTreeMap::from([(
                ExtractionMethod::StructuredSource,
                Metrics {
                    word_count: 500,
                    ..Metrics::default()
                },
            )]),
            source_hash: hash.to_string(),
            unavailable: vec![ExtractionMethod::OpticalExtraction],
        }
    }

    #[test]
    fn evaluations_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cache").join(STORE_FILE_NAME);

        {
            let mut connection = open_store(&db_path).unwrap();
            let stored = vec![evaluation("2020-01-partyx", "h1"), evaluation("2019-12-snp", "h2")];
            assert_eq!(upsert_evaluations(&mut connection, "run-1", &stored).unwrap(), 2);
        }

        let connection = open_store(&db_path).unwrap();
        let loaded = load_evaluations(&connection).unwrap();
        assert_eq!(loaded.keys().collect::<Vec<_>>(), vec!["2019-12-snp", "2020-01-partyx"]);
        assert_eq!(loaded["2020-01-partyx"], evaluation("2020-01-partyx", "h1"));
    }

    #[test]
    fn upsert_replaces_existing_decision() {
        let dir = tempfile::tempdir().unwrap();
        let mut connection = open_store(&dir.path().join(STORE_FILE_NAME)).unwrap();

        upsert_evaluations(&mut connection, "run-1", &[evaluation("2020-01-partyx", "old")]).unwrap();
        upsert_evaluations(&mut connection, "run-2", &[evaluation("2020-01-partyx", "new")]).unwrap();

        let loaded = load_evaluations(&connection).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["2020-01-partyx"].source_hash, "new");
        assert_eq!(count_rows(&connection, "SELECT COUNT(*) FROM decisions").unwrap(), 1);
    }

    #[test]
    fn run_progress_is_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let connection = open_store(&dir.path().join(STORE_FILE_NAME)).unwrap();

        assert_eq!(latest_run(&connection).unwrap(), None);
        begin_run(&connection, "run-20240101T000000Z", "compare", Path::new("in"), 250).unwrap();
        update_run(&connection, "run-20240101T000000Z", "running", 100).unwrap();

        let run = latest_run(&connection).unwrap().unwrap();
        assert_eq!(run.status, "running");
        assert_eq!(run.groups_total, 250);
        assert_eq!(run.groups_completed, 100);

        update_run(&connection, "run-20240101T000000Z", "completed", 250).unwrap();
        assert_eq!(latest_run(&connection).unwrap().unwrap().status, "completed");
    }

    #[test]
    fn chunks_are_replaced_per_document() {
        let dir = tempfile::tempdir().unwrap();
        let mut connection = open_store(&dir.path().join(STORE_FILE_NAME)).unwrap();

        replace_chunks(&mut connection, "2019-12-snp", &["A.".to_string(), "B.".to_string(), "C.".to_string()])
            .unwrap();
        replace_chunks(&mut connection, "2019-12-snp", &["Only.".to_string()]).unwrap();
        replace_chunks(&mut connection, "2017-06-labour", &["First.".to_string()]).unwrap();

        assert_eq!(
            chunked_documents(&connection).unwrap().into_iter().collect::<Vec<_>>(),
            vec!["2017-06-labour", "2019-12-snp"]
        );
        assert_eq!(
            load_chunks(&connection).unwrap(),
            vec![
                ChunkRecord {
                    document_name: "2017-06-labour".to_string(),
                    chunk_number: 1,
                    chunk_text: "First.".to_string(),
                },
                ChunkRecord {
                    document_name: "2019-12-snp".to_string(),
                    chunk_number: 1,
                    chunk_text: "Only.".to_string(),
                },
            ]
        );
    }
}
