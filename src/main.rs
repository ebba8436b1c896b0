use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod anilist;
mod config;
mod enrich;
mod jikan;
mod resolve;
mod season;
mod sheet;
mod types;
mod utils;

use config::Config;
use enrich::RunSummary;
use resolve::HttpSources;
use utils::{link_or_text, osc8_file_link};

pub const DEFAULT_INPUT: &str = "titles.xlsx";
pub const DEFAULT_OUTPUT: &str = "titles-done.xlsx";

/// Exit status after a Ctrl-C, matching the shell convention for SIGINT
const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(name = "anime-sheet")]
#[command(about = "Fill an anime title spreadsheet with season, studio, genres, tags and links")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// CONL file overriding endpoints, timeouts and pacing
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Log every request and fallback
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve every unresolved title and write the output sheet (default)
    Enrich {
        /// Spreadsheet with one title per row (.xlsx or .csv)
        #[arg(default_value = DEFAULT_INPUT)]
        input: PathBuf,
        /// Output sheet; an existing one is resumed
        #[arg(default_value = DEFAULT_OUTPUT)]
        output: PathBuf,
    },
    /// Re-apply the highlight to rows without a link
    Highlight {
        #[arg(default_value = DEFAULT_OUTPUT)]
        file: PathBuf,
    },
    /// Resolve a single title and print the result
    Lookup {
        title: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) {
    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    // HTTP internals stay quiet even in verbose mode
    clog.filter(Some("reqwest"), log::LevelFilter::Warn);
    clog.init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Ok(Config::default()),
    }
}

fn summary_headline(summary: &RunSummary) -> String {
    let counts = format!(
        "(AniList: {}, Jikan: {}, unresolved: {})",
        summary.from_primary, summary.from_secondary, summary.unresolved
    );
    if summary.interrupted {
        format!(
            "Interrupted! {} of {} pending titles processed {}; rerun to continue",
            summary.processed, summary.pending, counts
        )
    } else {
        format!(
            "Done! {} rows, {} resolved this run {}",
            summary.total_rows, summary.processed, counts
        )
    }
}

fn print_summary(summary: &RunSummary, output: &Path) {
    println!("\n{}", summary_headline(summary));
    if summary.highlighted > 0 {
        println!("{} rows need a manual look (highlighted)", summary.highlighted);
    }
    println!(
        "Saved to {}",
        osc8_file_link(output, &output.to_string_lossy())
    );
}

fn run_enrich(config: &Config, input: &Path, output: &Path, quiet: bool) -> Result<ExitCode> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        if handler_stop.swap(true, Ordering::SeqCst) {
            // Second Ctrl-C: the last checkpoint is what survives
            log::warn!("Interrupted again, exiting without saving");
            std::process::exit(i32::from(INTERRUPTED_EXIT));
        }
        log::warn!("Interrupt received, saving after the current title (Ctrl-C again to quit now)...");
    })
    .context("Failed to install Ctrl-C handler")?;

    let sources = HttpSources::new(config)?;
    let summary = enrich::run_enrich(&sources, config, input, output, &stop, quiet)?;

    if !quiet {
        print_summary(&summary, output);
    }
    if summary.interrupted {
        return Ok(ExitCode::from(INTERRUPTED_EXIT));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_highlight(file: &Path, quiet: bool) -> Result<ExitCode> {
    let highlighted = sheet::highlight_unresolved(file)?;
    if !quiet {
        println!(
            "Highlighted {} rows in {}",
            highlighted,
            osc8_file_link(file, &file.to_string_lossy())
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_lookup(config: &Config, title: &str, json: bool) -> Result<ExitCode> {
    let sources = HttpSources::new(config)?;
    let (resolution, tier) = resolve::resolve(&sources, title);

    if json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
    } else {
        println!("{} ({})", title, tier.as_str());
        println!("  season: {}", resolution.season);
        println!("  studio: {}", resolution.studio);
        println!("  genres: {}", resolution.genres);
        println!("  tags:   {}", resolution.tags);
        println!("  link:   {}", link_or_text(&resolution.link));
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        None => run_enrich(
            &config,
            Path::new(DEFAULT_INPUT),
            Path::new(DEFAULT_OUTPUT),
            cli.quiet,
        ),
        Some(Commands::Enrich { input, output }) => run_enrich(&config, &input, &output, cli.quiet),
        Some(Commands::Highlight { file }) => run_highlight(&file, cli.quiet),
        Some(Commands::Lookup { title, json }) => run_lookup(&config, &title, json),
    }
}
