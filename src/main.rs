use clap::Parser;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use wechat_chat_export::parallel;
use wechat_chat_export::utils::{self, ExportConfig, TimeRange};

/// Export decrypted WeChat chat history to CSV files, one per conversation.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Decrypted data directory containing MSG*.db (or a Msg/ subdirectory).
    #[arg(value_name = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory to write CSV files to.
    /// Defaults to ./wechat-chat-export if not set in config.
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Comma-separated conversations to export (ids, remarks or nicknames).
    /// All conversations when omitted.
    #[arg(long, value_name = "TALKERS", value_delimiter = ',')]
    talkers: Option<Vec<String>>,

    /// Earliest message time, e.g. 2025-01-01 or "2025-01-01 12:00".
    #[arg(long, value_name = "TIME", value_parser = utils::parse_local_datetime)]
    start: Option<chrono::DateTime<chrono::Local>>,

    /// Latest message time (inclusive).
    #[arg(long, value_name = "TIME", value_parser = utils::parse_local_datetime)]
    end: Option<chrono::DateTime<chrono::Local>>,

    /// Maximum number of messages per conversation.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,

    /// Number of conversations exported in parallel.
    /// Defaults to the number of CPUs.
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Path to FTSContact.db. Auto-detected next to the message databases if omitted.
    #[arg(long, value_name = "PATH")]
    contact_db: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/wechat-chat-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log every exported conversation and decoding detail.
    #[arg(short, long)]
    verbose: bool,

    /// Only report errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    contact_db: Option<PathBuf>,
    workers: Option<usize>,
    self_label: Option<String>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        // Search: XDG/OS config dir, then nothing
        dirs::config_dir()
            .map(|d| d.join("wechat-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wechat_chat_export={}", default_level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve data_dir (CLI > Config)
    let data_dir = cli.data_dir.or(file_cfg.data_dir).ok_or_else(|| {
        eyre!("No data directory given.\nPass DATA_DIR, or set data_dir in config.toml.")
    })?;
    if !data_dir.is_dir() {
        return Err(eyre!("Data directory not found: {}", data_dir.display()));
    }

    // 3. Resolve output_dir (CLI > Config > Default)
    let output_dir = cli
        .output
        .or(file_cfg.output_dir)
        .unwrap_or_else(|| PathBuf::from("wechat-chat-export"));

    // 4. Resolve workers (CLI > Config > CPU count)
    let workers = cli
        .workers
        .or(file_cfg.workers)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8)
        })
        .max(1);

    // 5. Build the Export Config
    let config = ExportConfig {
        data_dir,
        output_dir,
        contact_db: cli.contact_db.or(file_cfg.contact_db),
        talkers: cli.talkers,
        range: TimeRange::new(cli.start, cli.end),
        limit: cli.limit,
        workers,
        self_label: file_cfg.self_label,
    };

    // 6. Run the Business Logic
    let summary = parallel::execute(&config)?;

    if !summary.failed.is_empty() {
        eprintln!(
            "Completed with {} error(s), {} empty conversation(s).",
            summary.failed.len(),
            summary.empty
        );
    }

    if summary.exported.is_empty() {
        eprintln!("No conversations exported.");
        std::process::exit(1);
    }

    if !cli.quiet {
        println!("Exported {} conversation(s):", summary.exported.len());
        for (talker, path) in &summary.exported {
            println!("- {} -> {}", talker, path.display());
        }
    }

    Ok(())
}
