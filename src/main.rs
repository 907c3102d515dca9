use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use newsletter_cache::app::App;
use newsletter_cache::config::Config;
use newsletter_cache::error::Result;
use newsletter_cache::models::{CacheMode, Effort};
use newsletter_cache::scrape::validate_range;

fn parse_date_arg(s: &str) -> std::result::Result<NaiveDate, String> {
    newsletter_cache::scrape::parse_date(s).map_err(|e| e.to_string())
}

fn parse_effort_arg(s: &str) -> std::result::Result<Effort, String> {
    s.parse().map_err(|e: newsletter_cache::error::AppError| e.to_string())
}

fn parse_mode_arg(s: &str) -> std::result::Result<CacheMode, String> {
    s.parse().map_err(|e: newsletter_cache::error::AppError| e.to_string())
}

/// Newsletter scraper cache: per-date payloads, user state and summaries.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "NEWSLETTER_CACHE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape a date range, serving fresh dates from the cache
    Scrape {
        #[arg(long, value_parser = parse_date_arg)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date_arg)]
        end: NaiveDate,
    },
    /// Print the summarizer system prompt
    Prompt {
        #[arg(long, value_parser = parse_effort_arg, default_value = "low")]
        effort: Effort,
    },
    /// Summarize a URL (cached per effort level)
    SummarizeUrl {
        url: String,
        #[arg(long, value_parser = parse_effort_arg, default_value = "low")]
        effort: Effort,
    },
    /// Summarize an article and record the TLDR on it
    TldrUrl {
        url: String,
        #[arg(long, value_parser = parse_date_arg)]
        date: NaiveDate,
        #[arg(long, value_parser = parse_effort_arg, default_value = "low")]
        effort: Effort,
    },
    /// Add a URL to the removed list, optionally flagging it on a date
    RemoveUrl {
        url: String,
        #[arg(long, value_parser = parse_date_arg)]
        date: Option<NaiveDate>,
    },
    /// List removed URLs
    RemovedUrls {
        /// Also delete superseded snapshots
        #[arg(long)]
        gc: bool,
    },
    /// Mark an article read (or unread)
    MarkRead {
        url: String,
        #[arg(long, value_parser = parse_date_arg)]
        date: NaiveDate,
        #[arg(long)]
        unread: bool,
    },
    /// Reset abandoned TLDR markers on a date
    SweepTldr {
        #[arg(long, value_parser = parse_date_arg)]
        date: NaiveDate,
    },
    /// Show or change the global cache mode
    CacheMode {
        #[command(subcommand)]
        action: CacheModeAction,
    },
    /// Drop the raw day cache for a date range
    InvalidateCache {
        #[arg(long, value_parser = parse_date_arg)]
        start: NaiveDate,
        #[arg(long, value_parser = parse_date_arg)]
        end: NaiveDate,
    },
    /// Drop the raw day cache for one date
    InvalidateDateCache {
        #[arg(value_parser = parse_date_arg)]
        date: NaiveDate,
    },
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080", env = "NEWSLETTER_CACHE_ADDR")]
        addr: String,
    },
}

#[derive(Subcommand, Debug)]
enum CacheModeAction {
    Get,
    Set {
        #[arg(value_parser = parse_mode_arg)]
        mode: CacheMode,
    },
    /// Forget this process's cached value
    Invalidate,
}

/// Reject bad arguments before any storage is opened.
fn check_args(command: &Command, config: &Config) -> Result<()> {
    match command {
        Command::Scrape { start, end } | Command::InvalidateCache { start, end } => {
            validate_range(*start, *end, config.max_range_days)
        }
        _ => Ok(()),
    }
}

fn print_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;

    // Printing the prompt needs no storage.
    if let Command::Prompt { effort } = args.command {
        println!("{}", newsletter_cache::ai::system_prompt(effort));
        return Ok(());
    }

    check_args(&args.command, &config)?;
    let app = App::new(config).await?;

    match args.command {
        Command::Prompt { .. } => {}
        Command::Scrape { start, end } => {
            let outcome = app.scrape(start, end).await?;
            print_json(json!({ "success": true, "result": outcome }))?;
        }
        Command::SummarizeUrl { url, effort } => {
            let summary = app.summarize_url(&url, effort).await?;
            print_json(json!({ "success": true, "result": summary }))?;
        }
        Command::TldrUrl { url, date, effort } => {
            let article = app.tldr_url(date, &url, effort).await?;
            print_json(json!({ "success": true, "article": article }))?;
        }
        Command::RemoveUrl { url, date } => {
            let outcome = app.remove_url(&url, date).await?;
            print_json(json!({ "success": true, "result": outcome }))?;
        }
        Command::RemovedUrls { gc } => {
            let collected = if gc { app.collect_removed_garbage().await } else { 0 };
            let urls = app.removed_urls().await;
            print_json(json!({
                "success": true,
                "count": urls.len(),
                "urls": urls,
                "collected": collected,
            }))?;
        }
        Command::MarkRead { url, date, unread } => {
            let article = app.mark_read(date, &url, !unread).await?;
            print_json(json!({ "success": true, "article": article }))?;
        }
        Command::SweepTldr { date } => {
            let swept = app.sweep_stale_tldr(date).await?;
            print_json(json!({ "success": true, "swept": swept }))?;
        }
        Command::CacheMode { action } => {
            let report = match action {
                CacheModeAction::Get => app.cache_mode().await,
                CacheModeAction::Set { mode } => app.set_cache_mode(mode).await?,
                CacheModeAction::Invalidate => {
                    app.invalidate_cache_mode().await;
                    app.cache_mode().await
                }
            };
            print_json(json!({ "success": true, "result": report }))?;
        }
        Command::InvalidateCache { start, end } => {
            let invalidated = app.invalidate_cache(start, end).await?;
            print_json(json!({ "success": true, "invalidated": invalidated }))?;
        }
        Command::InvalidateDateCache { date } => {
            app.invalidate_date_cache(date).await?;
            print_json(json!({ "success": true, "date": date }))?;
        }
        Command::Serve { addr } => {
            newsletter_cache::api::serve(Arc::new(app), &addr).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Only warnings and errors by default; stdout is reserved for JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
