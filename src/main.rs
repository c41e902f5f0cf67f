use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use jobsift::config::{parse_phrase_list, Config};
use jobsift::db::{date_key, previous_day_key, BatchStore, Database};
use jobsift::differ::DiffResult;
use jobsift::fetch::{DirectoryFetcher, Feed, HttpFeedFetcher};
use jobsift::filter::run_pipeline;
use jobsift::models::{records_from_raw, JobRecord, RawJob};
use jobsift::orchestrator::{OrchestrationReport, Orchestrator, RunRegistry};

#[derive(Parser)]
#[command(name = "jobsift")]
#[command(about = "Aggregate job postings, filter out the noise, and see what's new")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the SQLite database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Fetch, filter and store today's postings for every category
    Run {
        /// Search category (repeatable; defaults to the configured list)
        #[arg(short, long)]
        category: Vec<String>,

        /// Directory of pre-scraped <category>.json files
        #[arg(long, conflicts_with = "feed_url")]
        feed_dir: Option<PathBuf>,

        /// HTTP endpoint serving scraped records as JSON
        #[arg(long)]
        feed_url: Option<String>,

        /// Date to store the batch under (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Process categories concurrently
        #[arg(long)]
        parallel: bool,

        /// Extra comma-separated description phrases to exclude
        #[arg(long)]
        exclude_keywords: Option<String>,

        /// Extra comma-separated title phrases to exclude
        #[arg(long)]
        exclude_titles: Option<String>,

        /// Show what would be stored without storing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Filter a raw JSON batch file and show what was kept and why the rest was dropped
    Filter {
        /// JSON array of raw records
        file: PathBuf,

        /// Search query to tag the records with
        #[arg(short, long, default_value = "manual")]
        category: String,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show postings that differ from the previous day's batch
    Diff {
        /// Batch date (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Baseline date (default: the day before)
        #[arg(short, long)]
        against: Option<NaiveDate>,

        /// Only compare postings found for this search category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show a stored batch
    Show {
        /// Batch date (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Only show postings found for this search category
        #[arg(short, long)]
        category: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored batches
    Batches,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobsift=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = Some(db);
    }

    match cli.command {
        Commands::Init => {
            let db = Database::open(&config.database_path())?;
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Run {
            category,
            feed_dir,
            feed_url,
            date,
            parallel,
            exclude_keywords,
            exclude_titles,
            dry_run,
        } => {
            if feed_dir.is_none() && feed_url.is_none() {
                return Err(anyhow!("No feed given. Use --feed-dir or --feed-url"));
            }

            let mut db = Database::open(&config.database_path())?;
            db.init()?;

            let categories = if category.is_empty() {
                config.categories.clone()
            } else {
                category
            };
            let policy = config.policy.clone().with_extra_exclusions(
                &parse_phrase_list(exclude_keywords.as_deref().unwrap_or_default()),
                &parse_phrase_list(exclude_titles.as_deref().unwrap_or_default()),
            );
            let key = date_key(date.unwrap_or_else(|| Local::now().date_naive()));

            println!("Searching {} categories for {}...", categories.len(), key);
            let registry = RunRegistry::new();
            let job_categories = categories.clone();
            let handle = registry.spawn(&categories, move || {
                // The blocking HTTP client has to be built off the async runtime
                let feed = match (feed_dir, feed_url) {
                    (Some(dir), _) => Feed::Directory(DirectoryFetcher::new(dir)),
                    (None, Some(url)) => Feed::Http(HttpFeedFetcher::new(&url)?),
                    (None, None) => return Err(anyhow!("No feed given")),
                };
                let orchestrator = Orchestrator::new(feed, &policy)?.parallel(parallel);
                Ok(orchestrator.run(&job_categories))
            })?;
            let report = handle.await.context("Run task failed")??;

            print_run_summary(&report);

            if dry_run {
                println!("\n(Dry run - batch {} was not stored)", key);
            } else if report.all_failed() {
                println!("\nEvery category failed. Batch {} was left as it was.", key);
            } else {
                db.save_report(&key, &report)?;
                println!("\nSaved {} unique jobs as batch {}", report.batch.len(), key);
            }
        }

        Commands::Filter {
            file,
            category,
            json,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read batch file: {}", file.display()))?;
            let raws: Vec<RawJob> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse batch file: {}", file.display()))?;

            let (records, rejected) = records_from_raw(raws, &category, Utc::now());
            let outcome = run_pipeline(records, &config.policy)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("Kept ({}):", outcome.kept.len());
                print_records(&outcome.kept);
                println!("\nExcluded ({}):", outcome.excluded.len());
                println!("{:<12} {:<30} {:<20} {:<30}", "STAGE", "TITLE", "COMPANY", "REASON");
                println!("{}", "-".repeat(95));
                for excluded in &outcome.excluded {
                    println!(
                        "{:<12} {:<30} {:<20} {:<30}",
                        excluded.stage,
                        truncate(&excluded.record.title, 28),
                        truncate(&excluded.record.company, 18),
                        truncate(&excluded.matched.join(", "), 30)
                    );
                }
                if !rejected.is_empty() {
                    println!("\nInvalid records skipped: {}", rejected.len());
                }
            }
        }

        Commands::Diff {
            date,
            against,
            category,
        } => {
            let db = open_existing(&config)?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let key = date_key(date);
            let baseline = match against {
                Some(d) => date_key(d),
                None => previous_day_key(date).ok_or_else(|| anyhow!("No day before {}", key))?,
            };

            match db.diff_stored(&key, &baseline, category.as_deref())? {
                DiffResult::NoBaseline => {
                    println!("No baseline to compare against ({} is missing or empty).", baseline);
                }
                DiffResult::Identical => {
                    println!("No new or different jobs since {}.", baseline);
                }
                DiffResult::Difference(records) => {
                    println!("{} jobs differ between {} and {}:", records.len(), key, baseline);
                    print_records(&records);
                }
            }
        }

        Commands::Show {
            date,
            category,
            json,
        } => {
            let db = open_existing(&config)?;
            let key = date_key(date.unwrap_or_else(|| Local::now().date_naive()));
            match db.load_batch(&key, category.as_deref())? {
                Some(mut batch) => {
                    batch.sort_by(|a, b| a.posted_date.recency_cmp(&b.posted_date));
                    if json {
                        println!("{}", serde_json::to_string_pretty(&batch)?);
                    } else if batch.is_empty() {
                        println!("Batch {} is empty.", key);
                    } else {
                        println!("Batch {} ({} jobs)", key, batch.len());
                        print_records(&batch);
                    }
                }
                None => {
                    println!("No batch stored for {}.", key);
                }
            }
        }

        Commands::Batches => {
            let db = open_existing(&config)?;
            let batches = db.list_batches()?;
            if batches.is_empty() {
                println!("No batches stored.");
            } else {
                println!("{:<12} {:>8} {:>8} {:<20}", "DATE", "QUERIES", "JOBS", "SAVED");
                println!("{}", "-".repeat(51));
                for batch in batches {
                    println!(
                        "{:<12} {:>8} {:>8} {:<20}",
                        batch.key, batch.query_count, batch.record_count, batch.saved_at
                    );
                }
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn open_existing(config: &Config) -> Result<Database> {
    let db = Database::open(&config.database_path())?;
    db.ensure_initialized()?;
    Ok(db)
}

fn print_run_summary(report: &OrchestrationReport) {
    println!(
        "\n{:<20} {:>8} {:>8} {:>8} {:>8}  {}",
        "CATEGORY", "FETCHED", "INVALID", "KEPT", "EXCLUDED", "ERROR"
    );
    println!("{}", "-".repeat(76));
    for category in &report.categories {
        println!(
            "{:<20} {:>8} {:>8} {:>8} {:>8}  {}",
            truncate(&category.category, 18),
            category.fetched,
            category.invalid,
            category.kept,
            category.excluded.len(),
            category.error.as_deref().unwrap_or("")
        );
    }
    println!("\nFound {} unique jobs across all categories.", report.batch.len());
}

fn print_records(records: &[JobRecord]) {
    println!(
        "{:<30} {:<20} {:<20} {:<10} {:<12}",
        "TITLE", "COMPANY", "LOCATION", "SITE", "POSTED"
    );
    println!("{}", "-".repeat(96));
    for record in records {
        println!(
            "{:<30} {:<20} {:<20} {:<10} {:<12}",
            truncate(&record.title, 28),
            truncate(&record.company, 18),
            truncate(&record.location, 18),
            record.source_site(),
            record.posted_date.to_string()
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
