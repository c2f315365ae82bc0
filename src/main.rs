//! Media Indexer CLI
//!
//! Indexes a media directory into a database and keeps it in sync.

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use media_indexer::config::{
    ConfigFile, DatabaseConfig, DEFAULT_MAX_PROBES, DEFAULT_PROBE_TIMEOUT_SECS,
};
use media_indexer::{FfprobeProber, Indexer, ScanConfig, ScanError, ScanSummary};

const ABOUT: &str = r#"
Media Indexer - keeps a database of media file metadata in sync with a directory

Examples:
  media_indexer -d /srv/media -b index.db -e sqlite       index and keep watching
  media_indexer -d /srv/media -i sqlite:///index.db -q    index once and exit
  media_indexer -c indexer.toml -f -q                     re-probe every file

Send SIGUSR1 to force a full rescan while running.
"#;

/// Media file indexer
#[derive(Parser)]
#[command(name = "media_indexer")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Database uri, e.g. sqlite:///index.db
    #[arg(short = 'i', long)]
    uri: Option<String>,

    /// Database driver
    #[arg(short = 'e', long)]
    drivername: Option<String>,

    /// Database user
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Database password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Database host
    #[arg(short = 'o', long)]
    host: Option<String>,

    /// Database port
    #[arg(short = 'r', long)]
    port: Option<u16>,

    /// Database name (the file for sqlite)
    #[arg(short = 'b', long)]
    database: Option<String>,

    /// Media root directory
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// Quit once everything is indexed instead of watching
    #[arg(short = 'q', long)]
    quit: bool,

    /// Probe every file, even unchanged ones
    #[arg(short = 'f', long)]
    force: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Emit JSON progress lines on stderr
    #[arg(long)]
    progress: bool,

    /// Per-file probe timeout in seconds
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT_SECS)]
    probe_timeout: u64,

    /// Maximum number of ffprobe processes running at once
    #[arg(short = 'j', long, default_value_t = DEFAULT_MAX_PROBES)]
    jobs: usize,

    /// ffprobe executable
    #[arg(long, default_value = "ffprobe")]
    ffprobe: PathBuf,
}

impl Cli {
    fn database_overrides(&self) -> DatabaseConfig {
        DatabaseConfig {
            uri: self.uri.clone(),
            drivername: self.drivername.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ScanError> {
    let file = ConfigFile::load(cli.config.as_deref())?;
    let root = cli
        .dir
        .clone()
        .or(file.root)
        .ok_or_else(|| ScanError::config("Missing media root directory (-d)"))?;
    let database = file.database.merge(cli.database_overrides()).resolve()?;

    info!("Root: {}", root.display());
    if let Some(uri) = &database.uri {
        info!("Database: {}", uri);
    }

    let config = ScanConfig::builder()
        .root(root)
        .database(database)
        .quit_on_idle(cli.quit)
        .force_rescan(cli.force)
        .probe_timeout_secs(cli.probe_timeout)
        .max_probes(cli.jobs)
        .show_progress(cli.progress)
        .build();
    let prober = FfprobeProber::new(&cli.ffprobe, config.probe_timeout(), config.max_probes);
    let indexer = Indexer::open(config, prober)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ScanError::config(format!("Cannot start runtime: {}", e)))?;
    let summary = runtime.block_on(indexer.run())?;

    print_summary(&summary, cli.json);
    Ok(())
}

fn print_summary(summary: &ScanSummary, json: bool) {
    if json {
        match serde_json::to_string_pretty(summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Cannot serialize summary: {}", e),
        }
    } else {
        println!("Indexing finished:");
        println!("  Files seen: {}", summary.files_seen);
        println!("  New files: {}", summary.new_files);
        println!("  Changed files: {}", summary.changed_files);
        println!("  Deleted files: {}", summary.deleted_files);
        println!("  Directories: {}", summary.dirs_listed);
        println!(
            "  Probes: {} ok, {} failed",
            summary.probes_succeeded, summary.probes_failed
        );
        println!("  Rescans: {}", summary.rescans);
        println!("  Duration: {}ms", summary.duration_ms);
    }
}
