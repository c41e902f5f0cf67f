use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "jobsift";

const DEFAULT_DESCRIPTION_EXCLUSIONS: &[&str] = &[
    "5+",
    "Secret Clearance",
    "security clearance",
    "US Citizen",
    "3+",
    "4+",
    "TS/SCI",
    "6+",
    "7+",
    "8+",
    "6-10",
    "8-10",
    "5-7",
    "Minimum 5 years",
    "Must be a U.S Citizen",
    "Minimum of 5 years",
    "U.S. Citizen",
    "At least 5 years",
    "5-10 years",
    "Minimum of 3 years",
    "5 years of experience",
    "Minimum of five years",
    "Minimum of 7 years",
    "Five (5) years’ experience",
    "3-5 years",
    "Experience level: 5 years",
    "Minimum 3 years",
    "3 or more years",
    "Six or more years",
    "not sponsor",
    "it is not our practice to sponsor individuals for work visas",
];

const DEFAULT_TITLE_EXCLUSIONS: &[&str] =
    &["Director", "Manager", "Lead", "Principal", "AVP", "Intern"];

// Aggregators and staffing boards that repost other companies' listings
const DEFAULT_COMPANY_DENYLIST: &[&str] = &[
    "Opinion Focus Panel LLC",
    "Diverserec",
    "myGwork - LGBTQ+ Business Community",
    "Jobs for Humanity",
    "Team Remotely Inc",
    "HireMeFast LLC",
    "Phoenix Recruitment",
    "ClearanceJobs",
    "Augment Jobs",
    "Jobot",
    "Dice",
    "Jobs via eFinancialCareers",
    "Energy Jobline",
];

const DEFAULT_EXCLUDED_TYPES: &[&str] = &["contract"];

const DEFAULT_CATEGORIES: &[&str] =
    &["data scientist", "data analyst", "Model Risk", "data engineer"];

pub const DEFAULT_RESULTS_WANTED: usize = 150;

/// Everything the filter needs to decide what to drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub company_denylist: BTreeSet<String>,
    pub excluded_types: BTreeSet<String>,
    pub description_exclusions: Vec<String>,
    pub title_exclusions: Vec<String>,
    pub results_wanted: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            company_denylist: to_strings(DEFAULT_COMPANY_DENYLIST).into_iter().collect(),
            excluded_types: to_strings(DEFAULT_EXCLUDED_TYPES).into_iter().collect(),
            description_exclusions: to_strings(DEFAULT_DESCRIPTION_EXCLUSIONS),
            title_exclusions: to_strings(DEFAULT_TITLE_EXCLUSIONS),
            results_wanted: DEFAULT_RESULTS_WANTED,
        }
    }
}

impl PolicyConfig {
    /// A policy that excludes nothing.
    pub fn permissive() -> Self {
        Self {
            company_denylist: BTreeSet::new(),
            excluded_types: BTreeSet::new(),
            description_exclusions: Vec::new(),
            title_exclusions: Vec::new(),
            results_wanted: DEFAULT_RESULTS_WANTED,
        }
    }

    /// Append caller-supplied phrases after the configured ones, skipping
    /// blanks and phrases already present.
    pub fn with_extra_exclusions(mut self, descriptions: &[String], titles: &[String]) -> Self {
        merge_phrases(&mut self.description_exclusions, descriptions);
        merge_phrases(&mut self.title_exclusions, titles);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub categories: Vec<String>,
    pub database_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            categories: to_strings(DEFAULT_CATEGORIES),
            database_path: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// An explicit path must exist; the default location is optional.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database_path {
            return path.clone();
        }
        // Use XDG data directory or fallback
        match directories::ProjectDirs::from("", "", APP_NAME) {
            Some(dirs) => dirs.data_dir().join("jobsift.db"),
            None => PathBuf::from("jobsift.db"),
        }
    }
}

/// Split a comma-separated override like `"5+, TS/SCI"` into phrases.
pub fn parse_phrase_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn merge_phrases(target: &mut Vec<String>, extra: &[String]) {
    for phrase in extra {
        let phrase = phrase.trim();
        if phrase.is_empty() || target.iter().any(|p| p == phrase) {
            continue;
        }
        target.push(phrase.to_string());
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_vocabulary() {
        let policy = PolicyConfig::default();
        assert!(policy.company_denylist.contains("Jobot"));
        assert!(policy.excluded_types.contains("contract"));
        assert_eq!(policy.title_exclusions[0], "Director");
        assert!(policy.description_exclusions.iter().any(|p| p == "TS/SCI"));
        assert_eq!(policy.results_wanted, 150);
        assert_eq!(Config::default().categories.len(), 4);
    }

    #[test]
    fn test_with_extra_exclusions_unions_in_order() {
        let policy = PolicyConfig::permissive().with_extra_exclusions(
            &["5+".to_string(), " TS/SCI ".to_string(), "5+".to_string(), "".to_string()],
            &["Manager".to_string()],
        );
        assert_eq!(policy.description_exclusions, vec!["5+", "TS/SCI"]);
        assert_eq!(policy.title_exclusions, vec!["Manager"]);

        let merged = PolicyConfig::default()
            .with_extra_exclusions(&[], &["Staff".to_string(), "Lead".to_string()]);
        assert_eq!(merged.title_exclusions.len(), DEFAULT_TITLE_EXCLUSIONS.len() + 1);
        assert_eq!(merged.title_exclusions.last().map(String::as_str), Some("Staff"));
    }

    #[test]
    fn test_parse_phrase_list() {
        assert_eq!(
            parse_phrase_list("5+, TS/SCI,,  not sponsor "),
            vec!["5+", "TS/SCI", "not sponsor"]
        );
        assert!(parse_phrase_list("").is_empty());
    }

    #[test]
    fn test_partial_config_file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"categories": ["rust engineer"], "policy": {"title_exclusions": ["Staff"]}}"#,
        )
        .unwrap();

        let config = Config::load_or_default(Some(path.as_path())).unwrap();
        assert_eq!(config.categories, vec!["rust engineer"]);
        assert_eq!(config.policy.title_exclusions, vec!["Staff"]);
        assert_eq!(config.policy.company_denylist, PolicyConfig::default().company_denylist);
        assert_eq!(config.database_path, None);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_or_default(Some(dir.path().join("nope.json").as_path())).is_err());
    }
}
