//! Aggregate scraped job postings, strip duplicates and unwanted listings,
//! and track what changed from one day to the next.

pub mod config;
pub mod db;
pub mod dedupe;
pub mod differ;
pub mod fetch;
pub mod filter;
pub mod matcher;
pub mod models;
pub mod orchestrator;

pub use config::{Config, PolicyConfig};
pub use db::{BatchStore, Database};
pub use dedupe::{dedupe, dedupe_by, DedupeKey};
pub use differ::{diff_batches, DiffResult};
pub use filter::{run_pipeline, ExclusionStage, FilterOutcome, PolicyFilter};
pub use matcher::{find_matches, matches_any, KeywordSet};
pub use models::{Batch, JobRecord, RawJob, RecordError, SourceSite};
pub use orchestrator::{run_orchestration, Fetcher, Orchestrator, RunRegistry, RunStatus};
