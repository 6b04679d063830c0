use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "extraction-arbiter",
    version,
    about = "Repair, compare and select competing text extractions of the same documents"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Inventory(InventoryArgs),
    Clean(CleanArgs),
    Compare(CompareArgs),
    Select(SelectArgs),
    Chunk(ChunkArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InventoryArgs {
    #[arg(long, default_value = ".cache/extraction-arbiter")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input_dir: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CleanArgs {
    #[arg(long, default_value = ".cache/extraction-arbiter")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input_dir: PathBuf,

    /// Defaults to the input directory.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// JSON file overriding the built-in repair vocabulary.
    #[arg(long)]
    pub repair_config: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub verify_idempotence: bool,

    #[arg(long)]
    pub jobs: Option<usize>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    #[arg(long, default_value = ".cache/extraction-arbiter")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input_dir: PathBuf,

    /// Defaults to <input-dir>/extraction_comparison_summary.csv.
    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long)]
    pub repair_config: Option<PathBuf>,

    /// Measure candidates as read, for inputs cleaned by an earlier pass.
    #[arg(long, default_value_t = false)]
    pub skip_repair: bool,

    #[arg(long)]
    pub jobs: Option<usize>,

    #[arg(long, default_value_t = 100)]
    pub checkpoint_every: usize,

    /// Reuse stored decisions whose candidate files are unchanged.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SelectArgs {
    #[arg(long, default_value = ".cache/extraction-arbiter")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input_dir: PathBuf,

    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub strip_method_suffix: bool,

    /// JSON file overriding the built-in repair vocabulary.
    #[arg(long)]
    pub repair_config: Option<PathBuf>,

    /// Copy the raw winning file instead of writing its repaired text.
    #[arg(long, default_value_t = false)]
    pub skip_repair: bool,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ChunkArgs {
    #[arg(long, default_value = ".cache/extraction-arbiter")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub input_dir: PathBuf,

    /// Defaults to <cache-root>/exports/chunks.csv.
    #[arg(long)]
    pub csv_path: Option<PathBuf>,

    /// Defaults to chunks_summary_stats.csv beside the chunk csv.
    #[arg(long)]
    pub stats_path: Option<PathBuf>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, default_value_t = 280)]
    pub max_chunk_chars: usize,

    /// Upper-case words kept as written, in addition to the built-in list.
    #[arg(long = "keep-upper")]
    pub keep_upper: Vec<String>,

    /// Re-chunk documents that already have stored chunks.
    #[arg(long, default_value_t = false)]
    pub refresh: bool,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/extraction-arbiter")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
