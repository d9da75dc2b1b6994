use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "epistream",
    version,
    about = "Frame cache and outbreak statistics for epidemic simulation runs"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// YAML config file (default: EPISTREAM_* environment variables)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Frame cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Statistics database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build (or rebuild) the frame cache for a run
    Build(RunArgs),
    /// Write the frames document for a run
    Frames(FramesArgs),
    /// Print the chart document for a run
    Chart(ChartArgs),
    /// Per-location statistics
    Locations(LocationsArgs),
    /// Run the upload hook: frame cache, chart and location rows
    Upload(RunArgs),
    /// Frame cache maintenance
    Cache(CacheArgs),
    Version,
}

/// Source files of one run.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long)]
    pub run_id: i64,

    /// Infection-state stream (JSON, optionally gzip)
    #[arg(long)]
    pub simdata: PathBuf,

    /// Location stream (JSON, optionally gzip)
    #[arg(long)]
    pub patterns: PathBuf,

    /// Population and location document
    #[arg(long)]
    pub papdata: PathBuf,

    /// Declared run length in timesteps
    #[arg(long, default_value_t = 0)]
    pub length: u64,
}

#[derive(Args, Debug, Clone)]
pub struct FramesArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Run name placed in the document header
    #[arg(long, default_value = "")]
    pub name: String,

    /// JSON file with the zone object for the header
    #[arg(long)]
    pub zone: Option<PathBuf>,

    /// First timestep to include
    #[arg(long)]
    pub from: Option<u64>,

    /// Last timestep to include
    #[arg(long)]
    pub to: Option<u64>,

    /// Gzip the output
    #[arg(long)]
    pub gzip: bool,

    /// Skip output when the cached document still has this ETag
    #[arg(long)]
    pub if_none_match: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ChartArgs {
    #[arg(long)]
    pub run_id: i64,

    #[arg(long)]
    pub simdata: PathBuf,

    #[arg(long)]
    pub papdata: PathBuf,

    /// Regenerate even if a stored document exists
    #[arg(long)]
    pub regenerate: bool,
}

#[derive(Args, Debug)]
pub struct LocationsArgs {
    #[command(subcommand)]
    pub cmd: LocationsSub,
}

#[derive(Subcommand, Debug)]
pub enum LocationsSub {
    /// Merge-join both streams into location rows
    Ingest(RunArgs),
    /// List stored location ids for a run
    List {
        #[arg(long)]
        run_id: i64,
    },
    /// Rows (or chart series) for one location
    Query(LocationQueryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LocationQueryArgs {
    #[arg(long)]
    pub run_id: i64,

    /// Stored location id, e.g. `place:17` or `home:3`
    #[arg(long)]
    pub location: String,

    #[arg(long)]
    pub from: Option<u64>,

    #[arg(long)]
    pub to: Option<u64>,

    /// Print chart series instead of rows (requires --papdata)
    #[arg(long, requires = "papdata")]
    pub chart: bool,

    #[arg(long)]
    pub papdata: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub cmd: CacheSub,
}

#[derive(Subcommand, Debug)]
pub enum CacheSub {
    /// Print ETag and size of a run's artifact
    Status {
        #[arg(long)]
        run_id: i64,
    },
    /// Remove a run's artifact
    Evict {
        #[arg(long)]
        run_id: i64,
    },
    /// Remove temp files left by interrupted builds
    Sweep,
}
