use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tcx_core::history::export_csv;
use tcx_core::*;

#[derive(Parser)]
#[command(name = "tcxsync")]
#[command(about = "Convert workouts to TCX and upload them", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Use this config file instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert recent workouts and optionally upload them (default)
    Sync {
        /// Number of recent workouts to consider
        #[arg(long)]
        num: Option<usize>,

        /// Directory of workout JSON bundles
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Directory for written TCX files
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Upload converted files to the destination
        #[arg(long)]
        upload: bool,
    },

    /// Convert a single workout bundle
    Convert {
        /// Path to a workout JSON bundle
        bundle: PathBuf,

        /// Directory for the written TCX file
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// List or export upload history
    History {
        /// Export history to this CSV file instead of listing it
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tcx_core::logging::init_with_level(&level);

    match cli.command {
        Some(Commands::Sync {
            num,
            input_dir,
            output_dir,
            upload,
        }) => {
            let mut config = config;
            if let Some(num) = num {
                config.source.num_activities = num;
            }
            if let Some(dir) = input_dir {
                config.source.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.output.directory = dir;
            }
            if upload {
                config.upload.enabled = true;
            }
            cmd_sync(&config)
        }
        Some(Commands::Convert { bundle, output_dir }) => {
            let output_dir = output_dir.unwrap_or_else(|| config.output.directory.clone());
            cmd_convert(&bundle, &output_dir)
        }
        Some(Commands::History { csv }) => cmd_history(&config, csv.as_deref()),
        None => {
            // Default to "sync" with config settings
            cmd_sync(&config)
        }
    }
}

fn cmd_sync(config: &Config) -> Result<()> {
    config.validate()?;

    let source = JsonDirSource::open(&config.source.input_dir)?;
    let pipeline = SyncPipeline::new(&source, SyncOptions::from_config(config));
    let mut report = pipeline.convert()?;

    for pending in &report.converted {
        println!("✓ {}", pending.path.display());
    }
    for skipped in &report.skipped {
        println!("- {} skipped: {}", skipped.activity_id, skipped.reason);
    }
    for failed in &report.failed {
        println!("✗ {} failed: {}", failed.activity_id, failed.reason);
    }

    if config.upload.enabled {
        let mut history = JsonlHistory::open(&config.upload.history_path)?;
        let mut uploader = CommandUploader::new(config.upload.command.clone());
        let limiter = RateLimiter::new(config.upload.min_interval());

        upload_converted(
            &mut report,
            &mut history,
            &mut uploader,
            limiter,
            &config.destination,
            &CancelToken::new(),
        )?;

        if let Some(uploads) = &report.uploads {
            for outcome in &uploads.outcomes {
                if let upload::UploadStatus::Failed(reason) = &outcome.status {
                    println!("✗ upload of {} failed: {}", outcome.activity_id, reason);
                }
            }
        }
    }

    println!("\n{}", report);
    Ok(())
}

fn cmd_convert(bundle_path: &Path, output_dir: &Path) -> Result<()> {
    let converted = WorkoutBundle::from_path(bundle_path)
        .and_then(|bundle| convert_bundle(&bundle, output_dir));

    match converted {
        Ok(pending) => {
            println!("✓ Wrote {}", pending.path.display());
            println!("  Title: {}", pending.title);
            println!("  Type: {}", pending.activity_type);
        }
        Err(e) => {
            tracing::error!("Failed to convert {:?}: {}", bundle_path, e);
            println!("✗ {} failed: {}", bundle_path.display(), e);
        }
    }
    Ok(())
}

fn cmd_history(config: &Config, csv_path: Option<&Path>) -> Result<()> {
    let history = JsonlHistory::open(&config.upload.history_path)?;
    let records = history.records();

    if let Some(csv_path) = csv_path {
        let count = export_csv(&records, csv_path)?;
        println!("✓ Exported {} uploads to CSV", count);
        println!("  CSV: {}", csv_path.display());
        return Ok(());
    }

    if records.is_empty() {
        println!("No uploads recorded.");
        return Ok(());
    }

    for record in &records {
        let uploaded_at = record.uploaded_at.with_timezone(&chrono::Local);
        println!(
            "{}  {}  {}",
            uploaded_at.format("%Y-%m-%d %H:%M"),
            record.activity_id,
            record.title
        );
    }
    Ok(())
}
