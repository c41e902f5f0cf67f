use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Placeholder stored in text fields the source did not provide.
pub const NOT_AVAILABLE: &str = "N/A";

/// A listing as handed over by a fetch collaborator, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawJob {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    #[serde(alias = "url")]
    pub job_url: Option<String>,
    pub description: Option<String>,
    pub date_posted: Option<String>,
    pub job_type: Option<String>, // "fulltime", "contract", ...
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record has no title")]
    MissingTitle,
    #[error("record has no company")]
    MissingCompany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSite {
    LinkedIn,
    Glassdoor,
    Indeed,
    Other,
}

impl SourceSite {
    pub fn from_url(url: &str) -> Self {
        let lower = url.to_lowercase();
        if lower.contains("linkedin") {
            SourceSite::LinkedIn
        } else if lower.contains("glassdoor") {
            SourceSite::Glassdoor
        } else if lower.contains("indeed") {
            SourceSite::Indeed
        } else {
            SourceSite::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSite::LinkedIn => "linkedin",
            SourceSite::Glassdoor => "glassdoor",
            SourceSite::Indeed => "indeed",
            SourceSite::Other => "other",
        }
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// When a posting went up, as far as the source told us.
///
/// `Unknown` keeps a value the source sent but that isn't a date; `Absent`
/// means the source sent nothing at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum PostedDate {
    Known(NaiveDate),
    Unknown(String),
    Absent,
}

impl PostedDate {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return PostedDate::Absent;
        };
        // Scrapers emit either a bare date or a full timestamp
        let date_part = raw.get(..10).unwrap_or(raw);
        match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
            Ok(date) => PostedDate::Known(date),
            Err(_) => PostedDate::Unknown(raw.to_string()),
        }
    }

    pub fn as_raw(&self) -> Option<String> {
        match self {
            PostedDate::Known(date) => Some(date.format("%Y-%m-%d").to_string()),
            PostedDate::Unknown(raw) => Some(raw.clone()),
            PostedDate::Absent => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PostedDate::Known(_) => 0,
            PostedDate::Unknown(_) => 1,
            PostedDate::Absent => 2,
        }
    }

    /// Most recent known dates first, then unparseable values, then absent ones.
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PostedDate::Known(a), PostedDate::Known(b)) => b.cmp(a),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<Option<String>> for PostedDate {
    fn from(raw: Option<String>) -> Self {
        PostedDate::parse(raw.as_deref())
    }
}

impl From<PostedDate> for Option<String> {
    fn from(date: PostedDate) -> Self {
        date.as_raw()
    }
}

impl fmt::Display for PostedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_raw() {
            Some(raw) => f.pad(&raw),
            None => f.pad(NOT_AVAILABLE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub url: String,
    pub description: Option<String>,
    pub posted_date: PostedDate,
    pub job_type: Option<String>,
    pub search_query: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub removal_reason: String, // comma-joined description matches
}

/// One day's (or one category's) worth of records, in fetch order.
pub type Batch = Vec<JobRecord>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub key: String, // "YYYY-MM-DD"
    pub query_count: i64,
    pub record_count: i64,
    pub saved_at: String,
}

impl JobRecord {
    pub fn new(title: impl Into<String>, company: impl Into<String>) -> Result<Self, RecordError> {
        Self::from_raw(
            RawJob {
                title: Some(title.into()),
                company: Some(company.into()),
                ..Default::default()
            },
            NOT_AVAILABLE,
            Utc::now(),
        )
    }

    pub fn from_raw(
        raw: RawJob,
        search_query: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        let title = required(raw.title).ok_or(RecordError::MissingTitle)?;
        let company = required(raw.company).ok_or(RecordError::MissingCompany)?;

        Ok(Self {
            title,
            company,
            location: or_not_available(raw.location),
            url: or_not_available(raw.job_url),
            description: raw.description.filter(|d| !d.trim().is_empty()),
            posted_date: PostedDate::parse(raw.date_posted.as_deref()),
            job_type: raw.job_type.filter(|t| !t.trim().is_empty()),
            search_query: search_query.to_string(),
            fetched_at,
            removal_reason: String::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn source_site(&self) -> SourceSite {
        SourceSite::from_url(&self.url)
    }

    /// The (title, company) pair that decides whether two records are the same posting.
    pub fn identity(&self) -> (&str, &str) {
        (&self.title, &self.company)
    }
}

/// Validate a fetched batch. Invalid records are logged and reported by
/// index; they never abort the rest of the batch.
pub fn records_from_raw(
    raws: Vec<RawJob>,
    search_query: &str,
    fetched_at: DateTime<Utc>,
) -> (Batch, Vec<(usize, RecordError)>) {
    let mut records = Vec::with_capacity(raws.len());
    let mut rejected = Vec::new();

    for (index, raw) in raws.into_iter().enumerate() {
        match JobRecord::from_raw(raw, search_query, fetched_at) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(search_query, index, error = %e, "dropping invalid record");
                rejected.push((index, e));
            }
        }
    }

    (records, rejected)
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn or_not_available(value: Option<String>) -> String {
    required(value).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}
