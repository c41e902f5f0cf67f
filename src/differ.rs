use std::collections::HashSet;

use crate::dedupe::{dedupe, DedupeKey};
use crate::models::{Batch, JobRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum DiffResult {
    /// There was no earlier batch to compare against.
    NoBaseline,
    Identical,
    /// Postings present on only one side: today's first, then yesterday's.
    Difference(Batch),
}

impl DiffResult {
    pub fn records(&self) -> &[JobRecord] {
        match self {
            DiffResult::Difference(records) => records,
            _ => &[],
        }
    }
}

/// Symmetric difference of two batches on the (title, company) identity key.
///
/// A missing or empty `yesterday` yields [`DiffResult::NoBaseline`] rather
/// than reporting everything in `today` as new.
pub fn diff_batches(today: &[JobRecord], yesterday: Option<&[JobRecord]>) -> DiffResult {
    let yesterday = match yesterday {
        Some(batch) if !batch.is_empty() => batch,
        _ => return DiffResult::NoBaseline,
    };

    let today = dedupe(today.to_vec(), DedupeKey::Identity);
    let yesterday = dedupe(yesterday.to_vec(), DedupeKey::Identity);

    let today_keys: HashSet<(&str, &str)> = today.iter().map(JobRecord::identity).collect();
    let yesterday_keys: HashSet<(&str, &str)> = yesterday.iter().map(JobRecord::identity).collect();

    let appeared = today.iter().filter(|r| !yesterday_keys.contains(&r.identity()));
    let disappeared = yesterday.iter().filter(|r| !today_keys.contains(&r.identity()));
    let changed: Batch = appeared.chain(disappeared).cloned().collect();

    if changed.is_empty() {
        DiffResult::Identical
    } else {
        DiffResult::Difference(changed)
    }
}
