use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::config::PolicyConfig;
use crate::dedupe::{dedupe, DedupeKey};
use crate::matcher::{KeywordSet, MatcherError};
use crate::models::{Batch, JobRecord};

/// The filter stage that dropped a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionStage {
    Company,
    JobType,
    Description,
    Title,
}

impl fmt::Display for ExclusionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExclusionStage::Company => "company",
            ExclusionStage::JobType => "job_type",
            ExclusionStage::Description => "description",
            ExclusionStage::Title => "title",
        };
        f.pad(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedRecord {
    pub record: JobRecord,
    pub stage: ExclusionStage,
    pub matched: Vec<String>, // what tripped the stage
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOutcome {
    pub kept: Batch,
    pub excluded: Vec<ExcludedRecord>,
}

impl FilterOutcome {
    pub fn excluded_records(&self) -> Batch {
        self.excluded.iter().map(|e| e.record.clone()).collect()
    }

    pub fn excluded_at(&self, stage: ExclusionStage) -> impl Iterator<Item = &ExcludedRecord> {
        self.excluded.iter().filter(move |e| e.stage == stage)
    }
}

/// A compiled [`PolicyConfig`].
///
/// Stages run in a fixed order: company, job type, description, title.
/// Each stage only sees what the previous one kept. Nothing here fails on
/// a record: a missing description, title or job type simply doesn't match.
#[derive(Debug, Clone)]
pub struct PolicyFilter {
    company_denylist: HashSet<String>,
    excluded_types: HashSet<String>,
    description: KeywordSet,
    title: KeywordSet,
}

impl PolicyFilter {
    pub fn new(policy: &PolicyConfig) -> Result<Self, MatcherError> {
        Ok(Self {
            company_denylist: policy.company_denylist.iter().cloned().collect(),
            excluded_types: policy.excluded_types.iter().map(|t| t.to_lowercase()).collect(),
            description: KeywordSet::new(policy.description_exclusions.as_slice())?,
            title: KeywordSet::new(policy.title_exclusions.as_slice())?,
        })
    }

    /// Exact, case-sensitive company name match.
    pub fn exclude_companies(&self, records: Batch) -> (Batch, Vec<ExcludedRecord>) {
        partition(records, ExclusionStage::Company, |record| {
            if self.company_denylist.contains(&record.company) {
                vec![record.company.clone()]
            } else {
                Vec::new()
            }
        })
    }

    pub fn exclude_job_types(&self, records: Batch) -> (Batch, Vec<ExcludedRecord>) {
        partition(records, ExclusionStage::JobType, |record| {
            match record.job_type.as_deref().map(str::to_lowercase) {
                Some(job_type) if self.excluded_types.contains(&job_type) => vec![job_type],
                _ => Vec::new(),
            }
        })
    }

    /// Also writes `removal_reason` on every record that reaches this stage.
    pub fn exclude_by_description(&self, records: Batch) -> (Batch, Vec<ExcludedRecord>) {
        partition(records, ExclusionStage::Description, |record| {
            let matches = self.description.find_matches(record.description.as_deref());
            record.removal_reason = matches.join(", ");
            matches
        })
    }

    pub fn exclude_by_title(&self, records: Batch) -> (Batch, Vec<ExcludedRecord>) {
        partition(records, ExclusionStage::Title, |record| {
            self.title.find_matches(Some(record.title.as_str()))
        })
    }

    pub fn apply(&self, records: Batch) -> FilterOutcome {
        let total = records.len();
        let mut excluded = Vec::new();

        let (kept, mut dropped) = self.exclude_companies(records);
        excluded.append(&mut dropped);
        let (kept, mut dropped) = self.exclude_job_types(kept);
        excluded.append(&mut dropped);
        let (kept, mut dropped) = self.exclude_by_description(kept);
        excluded.append(&mut dropped);
        let (kept, mut dropped) = self.exclude_by_title(kept);
        excluded.append(&mut dropped);

        tracing::debug!(
            total,
            kept = kept.len(),
            excluded = excluded.len(),
            "applied policy filter"
        );
        FilterOutcome { kept, excluded }
    }

    /// Dedupe on `key`, then apply every stage.
    pub fn run(&self, records: Batch, key: DedupeKey) -> FilterOutcome {
        self.apply(dedupe(records, key))
    }
}

/// Dedupe a batch on (title, company) and filter it with `policy`.
pub fn run_pipeline(records: Batch, policy: &PolicyConfig) -> Result<FilterOutcome, MatcherError> {
    Ok(PolicyFilter::new(policy)?.run(records, DedupeKey::Identity))
}

fn partition<F>(records: Batch, stage: ExclusionStage, mut check: F) -> (Batch, Vec<ExcludedRecord>)
where
    F: FnMut(&mut JobRecord) -> Vec<String>,
{
    let mut kept = Vec::with_capacity(records.len());
    let mut excluded = Vec::new();

    for mut record in records {
        let matched = check(&mut record);
        if matched.is_empty() {
            kept.push(record);
        } else {
            excluded.push(ExcludedRecord { record, stage, matched });
        }
    }

    if !excluded.is_empty() {
        tracing::debug!(%stage, excluded = excluded.len(), "excluded records");
    }
    (kept, excluded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(title: &str, company: &str, description: Option<&str>) -> JobRecord {
        let record = JobRecord::new(title, company).unwrap();
        match description {
            Some(d) => record.with_description(d),
            None => record,
        }
    }

    fn policy(descriptions: &[&str], titles: &[&str]) -> PolicyConfig {
        PolicyConfig {
            description_exclusions: descriptions.iter().map(|s| s.to_string()).collect(),
            title_exclusions: titles.iter().map(|s| s.to_string()).collect(),
            ..PolicyConfig::permissive()
        }
    }

    fn titles(records: &[JobRecord]) -> Vec<&str> {
        records.iter().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn test_end_to_end_pipeline() {
        let batch = vec![
            job("Senior Data Scientist", "Acme", Some("Requires 5+ years")),
            job("Data Analyst", "Acme", Some("entry level")),
            job("Data Analyst", "Acme", Some("entry level")),
            job("Manager, Data", "Beta", Some("team lead role")),
        ];

        let outcome = run_pipeline(batch, &policy(&["5+"], &["Manager"])).unwrap();

        assert_eq!(titles(&outcome.kept), vec!["Data Analyst"]);
        assert_eq!(outcome.kept[0].company, "Acme");
        assert_eq!(outcome.kept[0].removal_reason, "");

        assert_eq!(outcome.excluded.len(), 2);
        let by_description: Vec<_> = outcome.excluded_at(ExclusionStage::Description).collect();
        assert_eq!(by_description.len(), 1);
        assert_eq!(by_description[0].record.title, "Senior Data Scientist");
        assert_eq!(by_description[0].record.removal_reason, "5+");

        let by_title: Vec<_> = outcome.excluded_at(ExclusionStage::Title).collect();
        assert_eq!(by_title.len(), 1);
        assert_eq!(by_title[0].record.title, "Manager, Data");
        assert_eq!(by_title[0].matched, vec!["Manager"]);
    }

    #[test]
    fn test_excluding_every_company_excludes_everything() {
        let batch = vec![
            job("Data Analyst", "Acme", Some("5+ years")),
            job("Lead Engineer", "Beta", None),
            job("Scientist", "Gamma", Some("entry level")),
        ];
        let mut config = policy(&["5+"], &["Lead"]);
        config.company_denylist = ["Acme", "Beta", "Gamma"].iter().map(|s| s.to_string()).collect();

        let outcome = PolicyFilter::new(&config).unwrap().apply(batch.clone());
        assert!(outcome.kept.is_empty());
        assert_eq!(outcome.excluded_records(), batch);
        assert!(outcome.excluded.iter().all(|e| e.stage == ExclusionStage::Company));
    }

    #[test]
    fn test_company_match_is_exact() {
        let mut config = PolicyConfig::permissive();
        config.company_denylist.insert("Dice".to_string());
        let filter = PolicyFilter::new(&config).unwrap();

        let (kept, excluded) = filter.exclude_companies(vec![
            job("Analyst", "Dice", None),
            job("Analyst", "dice", None),
            job("Analyst", "Dice Inc", None),
        ]);
        assert_eq!(excluded.len(), 1);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_job_type_exclusion_ignores_case_and_missing_type() {
        let mut config = PolicyConfig::permissive();
        config.excluded_types.insert("contract".to_string());
        let filter = PolicyFilter::new(&config).unwrap();

        let (kept, excluded) = filter.exclude_job_types(vec![
            job("A", "Acme", None).with_job_type("Contract"),
            job("B", "Acme", None).with_job_type("fulltime"),
            job("C", "Acme", None),
        ]);
        assert_eq!(titles(&kept), vec!["B", "C"]);
        assert_eq!(excluded[0].matched, vec!["contract"]);
    }

    #[test]
    fn test_missing_description_is_kept() {
        let filter = PolicyFilter::new(&policy(&["5+"], &[])).unwrap();
        let (kept, excluded) = filter.exclude_by_description(vec![job("A", "Acme", None)]);
        assert_eq!(kept.len(), 1);
        assert!(excluded.is_empty());
    }

    #[test]
    fn test_removal_reason_joins_every_match() {
        let filter = PolicyFilter::new(&policy(&["TS/SCI", "5+", "US Citizen"], &[])).unwrap();
        let (_, excluded) = filter.exclude_by_description(vec![job(
            "A",
            "Acme",
            Some("Must be a us citizen with 5+ years"),
        )]);
        assert_eq!(excluded[0].record.removal_reason, "5+, US Citizen");
    }

    #[test]
    fn test_empty_policy_passes_everything_through() {
        let batch = vec![
            job("Director of Data", "Acme", Some("10+ years, TS/SCI")),
            job("Intern", "Jobot", None).with_job_type("contract"),
        ];
        let outcome = PolicyFilter::new(&PolicyConfig::permissive()).unwrap().apply(batch.clone());
        assert_eq!(outcome.kept, batch);
        assert!(outcome.excluded.is_empty());
    }

    #[test]
    fn test_stage_order_tags_first_matching_stage() {
        let mut config = policy(&["5+"], &["Manager"]);
        config.excluded_types.insert("contract".to_string());
        let outcome = PolicyFilter::new(&config).unwrap().apply(vec![
            job("Manager", "Acme", Some("5+ years")).with_job_type("contract"),
            job("Manager", "Beta", Some("5+ years")),
        ]);
        assert_eq!(outcome.excluded[0].stage, ExclusionStage::JobType);
        assert_eq!(outcome.excluded[1].stage, ExclusionStage::Description);
    }
}
