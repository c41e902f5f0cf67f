use std::collections::HashSet;
use std::hash::Hash;

use crate::models::JobRecord;

/// Which fields make two records "the same" for a dedupe pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeKey {
    /// (title, company). The identity key used across categories and days.
    Identity,
    /// (title, company, location). Used inside a single category.
    Listing,
}

impl DedupeKey {
    pub fn extract<'a>(&self, record: &'a JobRecord) -> (&'a str, &'a str, Option<&'a str>) {
        match self {
            DedupeKey::Identity => (&record.title, &record.company, None),
            DedupeKey::Listing => (&record.title, &record.company, Some(&record.location)),
        }
    }
}

/// Keep the first record seen for each key, in original order.
pub fn dedupe_by<T, K, F>(records: Vec<T>, mut key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen: HashSet<K> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|record| seen.insert(key(record)))
        .collect()
}

pub fn dedupe(records: Vec<JobRecord>, key: DedupeKey) -> Vec<JobRecord> {
    let before = records.len();
    let kept = dedupe_by(records, |r: &JobRecord| {
        let (title, company, location) = key.extract(r);
        (title.to_owned(), company.to_owned(), location.map(str::to_owned))
    });
    if kept.len() < before {
        tracing::debug!(?key, removed = before - kept.len(), "dropped duplicate records");
    }
    kept
}
