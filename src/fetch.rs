use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::RawJob;
use crate::orchestrator::Fetcher;

/// Turn a search term into a file-name friendly slug: "Model Risk" -> "model-risk".
pub fn slug(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Reads pre-scraped listings from `<dir>/<slug>.json`, one JSON array of
/// raw records per search term.
pub struct DirectoryFetcher {
    dir: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Fetcher for DirectoryFetcher {
    fn fetch(&self, search_term: &str, results_wanted: usize) -> Result<Vec<RawJob>> {
        let path = self.dir.join(format!("{}.json", slug(search_term)));
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read feed file: {}", path.display()))?;
        let mut raws: Vec<RawJob> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse feed file: {}", path.display()))?;
        raws.truncate(results_wanted);
        Ok(raws)
    }
}

/// Pulls listings from an HTTP endpoint that already serves scraped
/// records as JSON (`GET <base>?search_term=..&results_wanted=..`).
///
/// Uses the blocking client; build and call it off the async runtime.
pub struct HttpFeedFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpFeedFetcher {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("jobsift/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }
}

impl Fetcher for HttpFeedFetcher {
    fn fetch(&self, search_term: &str, results_wanted: usize) -> Result<Vec<RawJob>> {
        let wanted = results_wanted.to_string();
        let mut raws: Vec<RawJob> = self
            .client
            .get(&self.base_url)
            .query(&[("search_term", search_term), ("results_wanted", wanted.as_str())])
            .send()
            .with_context(|| format!("Failed to reach feed for '{}'", search_term))?
            .error_for_status()
            .with_context(|| format!("Feed rejected '{}'", search_term))?
            .json()
            .with_context(|| format!("Failed to decode feed response for '{}'", search_term))?;
        raws.truncate(results_wanted);
        Ok(raws)
    }
}

/// The feed a CLI run reads from.
pub enum Feed {
    Directory(DirectoryFetcher),
    Http(HttpFeedFetcher),
}

impl Fetcher for Feed {
    fn fetch(&self, search_term: &str, results_wanted: usize) -> Result<Vec<RawJob>> {
        match self {
            Feed::Directory(fetcher) => fetcher.fetch(search_term, results_wanted),
            Feed::Http(fetcher) => fetcher.fetch(search_term, results_wanted),
        }
    }
}
