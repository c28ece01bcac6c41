//! Resonate - audio effects for media files
//!
//! Entry point for the resonate CLI, which probes media with ffprobe and
//! applies pitch, tempo, bass and other effect filters with ffmpeg.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use resonate::cli::{Args, Commands, ConfigAction};
use resonate::config::{Config, LoggingConfig};
use resonate::error::ResonateError;
use resonate::options::OptionKey;
use resonate::preset::PresetStore;
use resonate::workflow::{OutputTarget, Workflow};

const DEFAULT_CONFIG_FILE: &str = "resonate.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(path) = &args.ffmpeg_path {
        config.media.ffmpeg_path = path.clone();
    }
    if let Some(path) = &args.ffprobe_path {
        config.media.ffprobe_path = path.clone();
    }
    if let Some(secs) = args.timeout {
        config.media.timeout_secs = Some(secs);
    }
    if let Some(path) = &args.presets {
        config.presets.path = Some(path.clone());
    }

    // Keep the guard alive so buffered log lines are flushed on exit
    let _guard = setup_logging(args.verbose, &config.logging)?;

    let presets = match &config.presets.path {
        Some(path) => PresetStore::from_file(path)?,
        None => PresetStore::default(),
    };

    match args.command {
        Commands::Apply {
            input,
            output,
            dry_run,
            effects,
        } => {
            let mut options = effects.to_option_set()?;
            options.set_value(OptionKey::Input, &input)?;
            if let Some(output) = &output {
                options.set_value(OptionKey::Output, output)?;
            }

            let workflow = Workflow::new(config, presets);

            if dry_run {
                let plan = workflow.plan(&options).await?;
                println!("Input:       {}", plan.source);
                println!("Sample rate: {} Hz", plan.media.sample_rate());
                println!("Format:      {}", plan.format);
                println!("Output:      {}", plan.output);
                println!("Filters:     {}", plan.chain.describe());
                println!("{}", plan.command.display_line());
                return Ok(());
            }

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")?,
            );
            spinner.set_message(format!("Processing {}", input));
            spinner.enable_steady_tick(Duration::from_millis(120));

            let result = workflow.apply(&options).await;
            spinner.finish_and_clear();
            let outcome = result?;

            // stdout may carry the audio itself
            match &outcome.output {
                OutputTarget::Stdout => eprintln!(
                    "Wrote {} bytes of {} to stdout",
                    outcome.bytes_written, outcome.format
                ),
                OutputTarget::File(path) => println!("Finished! Saved at '{}'", path.display()),
            }
        }
        Commands::Batch {
            input_dir,
            output_dir,
            effects,
        } => {
            if let Some(dir) = output_dir {
                config.output.directory = dir;
            }
            let options = effects.to_option_set()?;
            let workflow = Workflow::new(config, presets);

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("#>-"),
            );

            let summary = workflow
                .process_directory(&input_dir, &options, |file, index, total| {
                    pb.set_length(total as u64);
                    pb.set_position(index as u64);
                    pb.set_message(
                        file.file_name()
                            .map(|name| name.to_string_lossy().to_string())
                            .unwrap_or_default(),
                    );
                })
                .await?;
            pb.finish_and_clear();

            println!(
                "Processed {} files: {} succeeded, {} failed",
                summary.succeeded.len() + summary.failed.len(),
                summary.succeeded.len(),
                summary.failed.len()
            );
            for (file, error) in &summary.failed {
                println!("  {}: {}", file.display(), error);
            }
            if !summary.failed.is_empty() {
                anyhow::bail!("{} files failed", summary.failed.len());
            }
        }
        Commands::Probe { input } => {
            let workflow = Workflow::new(config, presets);
            let media = workflow.probe(&input).await?;

            println!("{:<15} {}", "File", input.display());
            println!("{:<15} {} Hz", "Sample rate", media.sample_rate());
            println!("{:<15} {}", "Formats", media.formats().join(", "));
        }
        Commands::Presets => {
            if presets.is_empty() {
                println!("No presets loaded. Set [presets] path in the config or pass --presets.");
                return Ok(());
            }

            println!("{:<15} {:<25} {:<40}", "Id", "Name", "Options");
            println!("{}", "-".repeat(80));
            for preset in presets.iter() {
                println!("{:<15} {:<25} {:<40}", preset.id, preset.name, preset.options);
            }
        }
        Commands::Check => {
            let workflow = Workflow::new(config, presets);
            let mut missing = 0;

            println!("{:<25} {:<10} {}", "Tool", "Status", "Version");
            println!("{}", "-".repeat(80));
            for (program, result) in workflow.check_tools().await {
                match result {
                    Ok(version) => println!("{:<25} {:<10} {}", program.display(), "OK", version),
                    Err(e) => {
                        missing += 1;
                        warn!("{} is not usable: {}", program.display(), e);
                        println!("{:<25} {:<10} {}", program.display(), "Missing", e);
                    }
                }
            }
            if missing > 0 {
                anyhow::bail!("{} required tools are not available", missing);
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { path, force } => {
                if path.exists() && !force {
                    return Err(ResonateError::Config(format!(
                        "{} already exists, use --force to overwrite",
                        path.display()
                    ))
                    .into());
                }
                config.save_to_file(&path)?;
                println!("Wrote configuration to {}", path.display());
            }
        },
    }

    Ok(())
}

/// Setup logging to stderr and, when enabled, a daily rolling file
fn setup_logging(verbose: bool, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // stdout is reserved for piped audio output
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let (file_layer, guard) = if logging.file {
        std::fs::create_dir_all(&logging.directory)?;
        let file_appender = rolling::daily(&logging.directory, "resonate.log");
        let (non_blocking_file, guard) = non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(non_blocking_file)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        if logging.file {
            logging.directory.join("resonate.log").display().to_string()
        } else {
            "disabled".to_string()
        }
    );

    Ok(guard)
}
