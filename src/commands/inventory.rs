use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::InventoryArgs;
use crate::grouping::{ExtractionMethod, IdentityGrouper, SourceGroup};
use crate::model::{CandidateEntry, CandidateInventoryManifest, InventoryGroup};
use crate::util::{now_utc_string, sha256_file, sha256_text, write_json_pretty};

pub const INVENTORY_MANIFEST_NAME: &str = "candidate_inventory.json";

pub fn run(args: InventoryArgs) -> Result<()> {
    let manifest = build_manifest(&args.input_dir)?;

    if args.dry_run {
        info!(
            groups = manifest.group_count,
            candidates = manifest.candidate_count,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args.manifest_path.unwrap_or_else(|| {
        args.cache_root
            .join("manifests")
            .join(INVENTORY_MANIFEST_NAME)
    });

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(
        groups = manifest.group_count,
        candidates = manifest.candidate_count,
        "inventory completed"
    );

    Ok(())
}

pub fn build_manifest(input_dir: &Path) -> Result<CandidateInventoryManifest> {
    let groups = discover_groups(input_dir)?;

    let mut inventory_groups = Vec::with_capacity(groups.len());
    for group in &groups {
        let mut candidates = Vec::with_capacity(group.sources.len());
        for source in group.sources.values() {
            let bytes = fs::metadata(&source.path)
                .with_context(|| format!("failed to inspect {}", source.path.display()))?
                .len();
            candidates.push(CandidateEntry {
                method: source.method,
                filename: source.file_name.clone(),
                sha256: sha256_file(&source.path)?,
                bytes,
            });
        }

        inventory_groups.push(InventoryGroup {
            document_key: group.document_key.clone(),
            source_hash: source_hash(
                candidates
                    .iter()
                    .map(|candidate| (candidate.method, candidate.sha256.as_str())),
            ),
            candidates,
        });
    }

    Ok(CandidateInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: input_dir.display().to_string(),
        group_count: inventory_groups.len(),
        candidate_count: inventory_groups
            .iter()
            .map(|group| group.candidates.len())
            .sum(),
        groups: inventory_groups,
    })
}

/// Groups every recognised candidate in `input_dir`. Finding none is an
/// error: the caller pointed at the wrong directory.
pub fn discover_groups(input_dir: &Path) -> Result<Vec<SourceGroup>> {
    let grouper = IdentityGrouper::new()?;
    let groups = grouper.group(discover_text_files(input_dir)?);

    if groups.is_empty() {
        bail!("no candidate text files found in {}", input_dir.display());
    }

    Ok(groups)
}

pub fn discover_text_files(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("failed to read {}", input_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", input_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_text = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("txt"))
            .unwrap_or(false);

        if is_text {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Fingerprint of a group's candidate files; changes when any candidate is
/// added, removed or edited.
pub fn source_hash<'a, I>(candidates: I) -> String
where
    I: IntoIterator<Item = (ExtractionMethod, &'a str)>,
{
    let lines = candidates
        .into_iter()
        .map(|(method, sha256)| format!("{}:{sha256}\n", method.suffix()))
        .collect::<String>();
    sha256_text(&lines)
}
