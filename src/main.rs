use anyhow::{Context, Result};
use archive_sweeper::{Overrides, SweepConfig, SweepReport};
use clap::Parser;
use colored::Colorize;
use humansize::{format_size, BINARY};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Compress aged merge-report artifacts in place once they pass the retention threshold",
    long_about = None
)]
struct Args {
    /// Archive root containing the category subdirectories
    #[arg(long, env = "ARCHIVE_SWEEPER_ROOT")]
    root: Option<PathBuf>,

    /// TOML file with retention, categories and other settings
    #[arg(long, short, env = "ARCHIVE_SWEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Minimum age before a file is compressed (e.g. 182, 182d, 26w, 6m)
    #[arg(long, short, env = "ARCHIVE_SWEEPER_RETENTION")]
    retention: Option<String>,

    /// Number of files to compress at once within a category
    #[arg(long, short, env = "ARCHIVE_SWEEPER_JOBS")]
    jobs: Option<usize>,

    /// bzip2 block size level (1-9)
    #[arg(long)]
    level: Option<u32>,

    /// Skip decoding each archive back before removing the original
    #[arg(long)]
    no_verify: bool,

    /// Refuse to run while another sweep holds the root lock
    #[arg(long)]
    lock: bool,

    /// Show what would be compressed, but don't touch anything
    #[arg(long)]
    dry_run: bool,

    /// Show a progress spinner
    #[arg(long)]
    progress: bool,

    /// Log more (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Don't print the summary
    #[arg(long, short)]
    quiet: bool,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(report: &SweepReport) {
    let verb = if report.dry_run {
        "Would compress"
    } else {
        "Compressed"
    };

    println!(
        "{:<20} {:>12} {:>12}",
        "Category".bold(),
        verb.bold(),
        "Too young".bold()
    );
    for category in &report.categories {
        println!(
            "{:<20} {:>12} {:>12}",
            category.directory.display(),
            category.compressed,
            category.skipped_young
        );
    }
    println!("========================================");

    let total = report.total_compressed();
    if total == 0 {
        println!("{}", "Nothing to compress.".green());
    } else if report.dry_run {
        println!(
            "{} {} files ({})",
            verb,
            total,
            format_size(report.total_bytes_in(), BINARY).bold()
        );
    } else {
        println!(
            "{} {} files: {} -> {}",
            verb,
            total,
            format_size(report.total_bytes_in(), BINARY),
            format_size(report.total_bytes_out(), BINARY).bold().green()
        );
    }
    let reclaimed = report.total_reclaimed_partials();
    if reclaimed > 0 {
        println!(
            "{} {} stale staging files",
            if report.dry_run { "Would remove" } else { "Removed" },
            reclaimed
        );
    }
    if report.dry_run {
        println!("Dry run mode: No files were compressed.");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let overrides = Overrides {
        root: args.root,
        retention: args.retention,
        jobs: args.jobs,
        level: args.level,
        no_verify: args.no_verify,
        lock: args.lock,
    };
    let config = SweepConfig::load(args.config.as_deref(), overrides)
        .context("Failed to load sweep configuration")?;

    let report = config
        .run(args.dry_run, args.progress)
        .with_context(|| format!("Sweep of {} aborted", config.root.display()))?;

    if !args.quiet {
        print_summary(&report);
    }

    Ok(())
}
