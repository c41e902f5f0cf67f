use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::PolicyConfig;
use crate::dedupe::{dedupe, DedupeKey};
use crate::filter::{ExcludedRecord, PolicyFilter};
use crate::matcher::MatcherError;
use crate::models::{records_from_raw, Batch, RawJob};

/// Source of raw listings for a search term.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, search_term: &str, results_wanted: usize) -> Result<Vec<RawJob>>;
}

impl<F> Fetcher for F
where
    F: Fn(&str, usize) -> Result<Vec<RawJob>> + Send + Sync,
{
    fn fetch(&self, search_term: &str, results_wanted: usize) -> Result<Vec<RawJob>> {
        self(search_term, results_wanted)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub fetched: usize,
    pub invalid: usize,
    pub kept: usize,
    pub excluded: Vec<ExcludedRecord>,
    pub error: Option<String>, // fetch failure, if any
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestrationReport {
    pub batch: Batch,
    pub categories: Vec<CategoryReport>,
}

impl OrchestrationReport {
    pub fn failed_categories(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories.iter().filter(|c| c.error.is_some())
    }

    pub fn succeeded_categories(&self) -> impl Iterator<Item = &CategoryReport> {
        self.categories.iter().filter(|c| c.error.is_none())
    }

    /// True when there were categories and none of them fetched anything.
    pub fn all_failed(&self) -> bool {
        !self.categories.is_empty() && self.succeeded_categories().next().is_none()
    }

    pub fn total_excluded(&self) -> usize {
        self.categories.iter().map(|c| c.excluded.len()).sum()
    }
}

pub struct Orchestrator<F> {
    fetcher: F,
    filter: PolicyFilter,
    results_wanted: usize,
    parallel: bool,
}

impl<F: Fetcher> Orchestrator<F> {
    pub fn new(fetcher: F, policy: &PolicyConfig) -> Result<Self, MatcherError> {
        Ok(Self {
            fetcher,
            filter: PolicyFilter::new(policy)?,
            results_wanted: policy.results_wanted,
            parallel: false,
        })
    }

    /// Run categories on their own threads. Results are still joined in
    /// category order before the final dedupe.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Fetch one category and filter it. A failed or empty fetch yields an
    /// empty batch and a report carrying the error.
    pub fn run_category(
        &self,
        category: &str,
        fetched_at: DateTime<Utc>,
    ) -> (Batch, CategoryReport) {
        let mut report = CategoryReport {
            category: category.to_string(),
            ..Default::default()
        };

        let raws = match self.fetcher.fetch(category, self.results_wanted) {
            Ok(raws) if raws.is_empty() => {
                tracing::warn!(category, "fetch returned no records");
                report.error = Some("no records returned".to_string());
                return (Vec::new(), report);
            }
            Ok(raws) => raws,
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(category, error = %message, "fetch failed");
                report.error = Some(message);
                return (Vec::new(), report);
            }
        };

        report.fetched = raws.len();
        let (records, rejected) = records_from_raw(raws, category, fetched_at);
        report.invalid = rejected.len();

        let outcome = self.filter.run(records, DedupeKey::Listing);
        report.kept = outcome.kept.len();
        report.excluded = outcome.excluded;

        tracing::info!(
            category,
            fetched = report.fetched,
            invalid = report.invalid,
            kept = report.kept,
            excluded = report.excluded.len(),
            "processed category"
        );
        (outcome.kept, report)
    }

    pub fn run(&self, categories: &[String]) -> OrchestrationReport {
        let fetched_at = Utc::now();

        let results: Vec<(Batch, CategoryReport)> = if self.parallel {
            thread::scope(|scope| {
                let handles: Vec<_> = categories
                    .iter()
                    .map(|category| scope.spawn(move || self.run_category(category, fetched_at)))
                    .collect();
                handles
                    .into_iter()
                    .zip(categories)
                    .map(|(handle, category)| {
                        handle.join().unwrap_or_else(|_| {
                            tracing::error!(
                                category = category.as_str(),
                                "category worker panicked"
                            );
                            let report = CategoryReport {
                                category: category.clone(),
                                error: Some("worker panicked".to_string()),
                                ..Default::default()
                            };
                            (Vec::new(), report)
                        })
                    })
                    .collect()
            })
        } else {
            categories
                .iter()
                .map(|category| self.run_category(category, fetched_at))
                .collect()
        };

        let mut union = Vec::new();
        let mut reports = Vec::with_capacity(results.len());
        for (kept, report) in results {
            union.extend(kept);
            reports.push(report);
        }

        let batch = dedupe(union, DedupeKey::Identity);
        tracing::info!(
            categories = reports.len(),
            records = batch.len(),
            "orchestration finished"
        );
        OrchestrationReport {
            batch,
            categories: reports,
        }
    }
}

/// Run every category through fetch and filter and merge the survivors.
pub fn run_orchestration<F: Fetcher>(
    categories: &[String],
    fetcher: F,
    policy: &PolicyConfig,
) -> Result<Batch, MatcherError> {
    Ok(Orchestrator::new(fetcher, policy)?.run(categories).batch)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Complete { records: usize },
    Failed { message: String },
}

/// Tracks background orchestration runs per search category.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<String, RunStatus>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, RunStatus>> {
        lock_runs(&self.runs)
    }

    pub fn status(&self, category: &str) -> Option<RunStatus> {
        self.runs().get(category).cloned()
    }

    /// Forget a finished run. Pending runs are left alone.
    pub fn remove(&self, category: &str) -> Option<RunStatus> {
        let mut runs = self.runs();
        match runs.get(category) {
            Some(RunStatus::Pending) | None => None,
            Some(_) => runs.remove(category),
        }
    }

    /// Drop every finished run and return how many were dropped.
    pub fn clear_finished(&self) -> usize {
        let mut runs = self.runs();
        let before = runs.len();
        runs.retain(|_, status| *status == RunStatus::Pending);
        before - runs.len()
    }

    /// Run `job` for `categories` on the blocking pool and record how each
    /// category ends. Fails without a tokio runtime, or when one of the
    /// categories already has a pending run.
    pub fn spawn<J>(
        &self,
        categories: &[String],
        job: J,
    ) -> Result<JoinHandle<Result<OrchestrationReport>>>
    where
        J: FnOnce() -> Result<OrchestrationReport> + Send + 'static,
    {
        let runtime = Handle::try_current().context("No tokio runtime to run on")?;

        {
            let mut runs = self.runs();
            if let Some(busy) = categories
                .iter()
                .find(|c| runs.get(c.as_str()) == Some(&RunStatus::Pending))
            {
                return Err(anyhow!("A run for '{}' is already in progress", busy));
            }
            for category in categories {
                runs.insert(category.clone(), RunStatus::Pending);
            }
        }

        let runs = Arc::clone(&self.runs);
        let categories = categories.to_vec();
        let handle = runtime.spawn(async move {
            let result = match tokio::task::spawn_blocking(job).await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("Run task failed: {}", e)),
            };

            let mut runs = lock_runs(&runs);
            for category in categories {
                let status = category_status(&category, &result);
                tracing::info!(category = category.as_str(), ?status, "run finished");
                runs.insert(category, status);
            }
            drop(runs);
            result
        });
        Ok(handle)
    }
}

fn lock_runs(
    runs: &Mutex<HashMap<String, RunStatus>>,
) -> MutexGuard<'_, HashMap<String, RunStatus>> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn category_status(category: &str, result: &Result<OrchestrationReport>) -> RunStatus {
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            return RunStatus::Failed {
                message: format!("{:#}", e),
            };
        }
    };
    let error = report
        .categories
        .iter()
        .find(|c| c.category == category)
        .and_then(|c| c.error.clone());
    match error {
        Some(message) => RunStatus::Failed { message },
        None => RunStatus::Complete {
            records: report
                .batch
                .iter()
                .filter(|r| r.search_query == category)
                .count(),
        },
    }
}
