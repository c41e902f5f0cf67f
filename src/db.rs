use anyhow::{anyhow, Context, Result};
use chrono::{Days, NaiveDate};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::dedupe::{dedupe, DedupeKey};
use crate::differ::{diff_batches, DiffResult};
use crate::models::{Batch, BatchSummary, JobRecord, PostedDate};
use crate::orchestrator::OrchestrationReport;

/// Where batches live between runs. A batch is keyed by date and split by
/// search query; saving replaces only the queries it names.
pub trait BatchStore {
    /// Load the batch stored under `key`, either for one search query or
    /// merged across every query (deduped on title and company).
    fn load_batch(&self, key: &str, query: Option<&str>) -> Result<Option<Batch>>;

    /// Replace the records stored under `key` for each of `queries`, plus
    /// any query a record in `batch` carries. Other queries are untouched.
    fn save_batch(&mut self, key: &str, queries: &[String], batch: &Batch) -> Result<()>;

    /// Store an orchestration run. Failed categories keep whatever was
    /// stored for them before; a run where every category failed is refused.
    fn save_report(&mut self, key: &str, report: &OrchestrationReport) -> Result<()> {
        if report.all_failed() {
            return Err(anyhow!(
                "Every category failed; batch {} was left as it was",
                key
            ));
        }
        let queries: Vec<String> = report
            .succeeded_categories()
            .map(|c| c.category.clone())
            .collect();
        self.save_batch(key, &queries, &report.batch)
    }

    /// Compare the batch stored under `key` with the one under `baseline_key`.
    fn diff_stored(
        &self,
        key: &str,
        baseline_key: &str,
        query: Option<&str>,
    ) -> Result<DiffResult> {
        let batch = self
            .load_batch(key, query)?
            .ok_or_else(|| anyhow!("No batch stored for {}", key))?;
        let baseline = self.load_batch(baseline_key, query)?;
        Ok(diff_batches(&batch, baseline.as_deref()))
    }
}

pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn previous_day_key(date: NaiveDate) -> Option<String> {
    date.checked_sub_days(Days::new(1)).map(date_key)
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create data directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Create the schema. Safe to call on every start.
    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                batch_key TEXT NOT NULL,
                search_query TEXT NOT NULL,
                record_count INTEGER NOT NULL,
                saved_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (batch_key, search_query)
            );

            CREATE TABLE IF NOT EXISTS job_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_key TEXT NOT NULL,
                search_query TEXT NOT NULL,
                title TEXT NOT NULL,
                company TEXT NOT NULL,
                location TEXT NOT NULL,
                url TEXT NOT NULL,
                description TEXT,
                posted_date TEXT,
                job_type TEXT,
                source_site TEXT NOT NULL
                    CHECK (source_site IN ('linkedin', 'glassdoor', 'indeed', 'other')),
                fetched_at TEXT NOT NULL,
                removal_reason TEXT NOT NULL DEFAULT '',
                UNIQUE (batch_key, search_query, title, company),
                FOREIGN KEY (batch_key, search_query)
                    REFERENCES batches(batch_key, search_query)
            );

            CREATE INDEX IF NOT EXISTS idx_job_records_batch
                ON job_records(batch_key, search_query);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_records'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'jobsift init' first."
            ));
        }
        Ok(())
    }

    pub fn list_batches(&self) -> Result<Vec<BatchSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT batch_key, COUNT(*), SUM(record_count), MAX(saved_at)
             FROM batches
             GROUP BY batch_key
             ORDER BY batch_key DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BatchSummary {
                key: row.get(0)?,
                query_count: row.get(1)?,
                record_count: row.get(2)?,
                saved_at: row.get(3)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list batches")
    }

    /// Search queries stored under `key`, alphabetically.
    pub fn list_queries(&self, key: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT search_query FROM batches WHERE batch_key = ?1 ORDER BY search_query",
        )?;
        let rows = stmt.query_map([key], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list queries for {}", key))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let posted_date: Option<String> = row.get(5)?;
        Ok(JobRecord {
            title: row.get(0)?,
            company: row.get(1)?,
            location: row.get(2)?,
            url: row.get(3)?,
            description: row.get(4)?,
            posted_date: PostedDate::parse(posted_date.as_deref()),
            job_type: row.get(6)?,
            search_query: row.get(7)?,
            fetched_at: row.get(8)?,
            removal_reason: row.get(9)?,
        })
    }
}

impl BatchStore for Database {
    fn load_batch(&self, key: &str, query: Option<&str>) -> Result<Option<Batch>> {
        let stored: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM batches
             WHERE batch_key = ?1 AND (?2 IS NULL OR search_query = ?2)",
            params![key, query],
            |row| row.get(0),
        )?;
        if stored == 0 {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT title, company, location, url, description, posted_date, job_type,
                    search_query, fetched_at, removal_reason
             FROM job_records
             WHERE batch_key = ?1 AND (?2 IS NULL OR search_query = ?2)
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![key, query], Self::row_to_record)?;
        let batch = rows
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to load batch {}", key))?;
        Ok(Some(dedupe(batch, DedupeKey::Identity)))
    }

    fn save_batch(&mut self, key: &str, queries: &[String], batch: &Batch) -> Result<()> {
        let batch = dedupe(batch.clone(), DedupeKey::Identity);
        let replaced: BTreeSet<&str> = queries
            .iter()
            .map(String::as_str)
            .chain(batch.iter().map(|r| r.search_query.as_str()))
            .collect();

        let tx = self.conn.transaction()?;
        for query in &replaced {
            let count = batch.iter().filter(|r| r.search_query == *query).count();
            tx.execute(
                "DELETE FROM job_records WHERE batch_key = ?1 AND search_query = ?2",
                params![key, query],
            )?;
            tx.execute(
                "DELETE FROM batches WHERE batch_key = ?1 AND search_query = ?2",
                params![key, query],
            )?;
            tx.execute(
                "INSERT INTO batches (batch_key, search_query, record_count) VALUES (?1, ?2, ?3)",
                params![key, query, count as i64],
            )?;
        }

        {
            let mut insert = tx.prepare(
                "INSERT INTO job_records (batch_key, search_query, title, company, location, url,
                    description, posted_date, job_type, source_site, fetched_at, removal_reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for record in &batch {
                insert.execute(params![
                    key,
                    record.search_query,
                    record.title,
                    record.company,
                    record.location,
                    record.url,
                    record.description,
                    record.posted_date.as_raw(),
                    record.job_type,
                    record.source_site().as_str(),
                    record.fetched_at,
                    record.removal_reason,
                ])?;
            }
        }

        tx.commit()
            .with_context(|| format!("Failed to save batch {}", key))?;
        tracing::info!(
            key,
            queries = replaced.len(),
            records = batch.len(),
            "saved batch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CategoryReport;

    fn db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn job(title: &str, company: &str) -> JobRecord {
        JobRecord::new(title, company).unwrap()
    }

    fn queried(title: &str, company: &str, query: &str) -> JobRecord {
        let mut record = job(title, company);
        record.search_query = query.to_string();
        record
    }

    fn queries(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn titles(batch: &[JobRecord]) -> Vec<&str> {
        batch.iter().map(|r| r.title.as_str()).collect()
    }

    fn report(batch: Batch, categories: &[(&str, Option<&str>)]) -> OrchestrationReport {
        OrchestrationReport {
            batch,
            categories: categories
                .iter()
                .map(|(name, error)| CategoryReport {
                    category: name.to_string(),
                    error: error.map(String::from),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        let db = db();
        db.init().unwrap();
        db.ensure_initialized().unwrap();
    }

    #[test]
    fn test_uninitialized_database_is_reported() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.ensure_initialized().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut db = db();
        let mut record = job("Data Analyst", "Acme")
            .with_url("https://www.linkedin.com/jobs/view/1")
            .with_description("SQL and Python")
            .with_job_type("fulltime");
        record.posted_date = PostedDate::parse(Some("2024-05-01"));
        let batch = vec![record, job("Data Scientist", "Beta")];

        db.save_batch("2024-05-02", &[], &batch).unwrap();
        let loaded = db.load_batch("2024-05-02", None).unwrap().unwrap();
        assert_eq!(loaded, batch);
        assert!(db.load_batch("2024-05-01", None).unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_previous_batch_for_same_query() {
        let mut db = db();
        db.save_batch("2024-05-02", &[], &vec![job("A", "X"), job("B", "Y")]).unwrap();
        db.save_batch("2024-05-02", &[], &vec![job("C", "Z")]).unwrap();

        let loaded = db.load_batch("2024-05-02", None).unwrap().unwrap();
        assert_eq!(titles(&loaded), vec!["C"]);

        let batches = db.list_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].record_count, 1);
    }

    #[test]
    fn test_runs_for_other_queries_are_kept() {
        let mut db = db();
        db.save_batch(
            "2024-05-02",
            &queries(&["data scientist"]),
            &vec![queried("DS", "Acme", "data scientist")],
        )
        .unwrap();
        db.save_batch(
            "2024-05-02",
            &queries(&["data analyst"]),
            &vec![queried("DA", "Beta", "data analyst")],
        )
        .unwrap();

        let all = db.load_batch("2024-05-02", None).unwrap().unwrap();
        assert_eq!(titles(&all), vec!["DS", "DA"]);

        let scientist = db.load_batch("2024-05-02", Some("data scientist")).unwrap().unwrap();
        assert_eq!(titles(&scientist), vec!["DS"]);
        assert!(db.load_batch("2024-05-02", Some("data engineer")).unwrap().is_none());

        assert_eq!(
            db.list_queries("2024-05-02").unwrap(),
            vec!["data analyst", "data scientist"]
        );
        let batches = db.list_batches().unwrap();
        assert_eq!(batches[0].query_count, 2);
        assert_eq!(batches[0].record_count, 2);
    }

    #[test]
    fn test_empty_result_clears_named_query() {
        let mut db = db();
        let analyst = queries(&["data analyst"]);
        db.save_batch("2024-05-02", &analyst, &vec![queried("DA", "Beta", "data analyst")])
            .unwrap();
        db.save_batch("2024-05-02", &analyst, &Vec::new()).unwrap();
        assert_eq!(
            db.load_batch("2024-05-02", Some("data analyst")).unwrap(),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_save_drops_duplicate_identities() {
        let mut db = db();
        let batch = vec![
            job("A", "X").with_location("NYC"),
            job("A", "X").with_location("Remote"),
        ];
        db.save_batch("2024-05-02", &[], &batch).unwrap();
        let loaded = db.load_batch("2024-05-02", None).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].location, "NYC");
    }

    #[test]
    fn test_merged_load_drops_identities_repeated_across_queries() {
        let mut db = db();
        db.save_batch("2024-05-02", &[], &vec![queried("A", "X", "data analyst")]).unwrap();
        db.save_batch("2024-05-02", &[], &vec![queried("A", "X", "data scientist")]).unwrap();

        let all = db.load_batch("2024-05-02", None).unwrap().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].search_query, "data analyst");
    }

    #[test]
    fn test_all_failed_run_leaves_stored_batch_alone() {
        let mut db = db();
        let good = vec![
            queried("DS", "Acme", "data scientist"),
            queried("DA", "Beta", "data analyst"),
        ];
        let both = queries(&["data scientist", "data analyst"]);
        db.save_batch("2024-05-01", &both, &good).unwrap();
        db.save_batch("2024-05-02", &both, &good).unwrap();

        let outage = report(
            Vec::new(),
            &[
                ("data scientist", Some("board unreachable")),
                ("data analyst", Some("board unreachable")),
            ],
        );
        assert!(db.save_report("2024-05-02", &outage).is_err());

        assert_eq!(db.load_batch("2024-05-02", None).unwrap(), Some(good));
        assert_eq!(
            db.diff_stored("2024-05-02", "2024-05-01", None).unwrap(),
            DiffResult::Identical
        );
    }

    #[test]
    fn test_partial_failure_keeps_failed_query_rows() {
        let mut db = db();
        let both = queries(&["data scientist", "data analyst"]);
        db.save_batch(
            "2024-05-02",
            &both,
            &vec![
                queried("DS", "Acme", "data scientist"),
                queried("DA", "Beta", "data analyst"),
            ],
        )
        .unwrap();

        let rerun = report(
            vec![queried("DS2", "Gamma", "data scientist")],
            &[("data scientist", None), ("data analyst", Some("no records returned"))],
        );
        db.save_report("2024-05-02", &rerun).unwrap();

        let loaded = db.load_batch("2024-05-02", None).unwrap().unwrap();
        let mut stored = titles(&loaded);
        stored.sort();
        assert_eq!(stored, vec!["DA", "DS2"]);
    }

    #[test]
    fn test_diff_stored_against_previous_day() {
        let mut db = db();
        db.save_batch("2024-05-01", &[], &vec![job("A", "X"), job("B", "Y")]).unwrap();
        db.save_batch("2024-05-02", &[], &vec![job("A", "X"), job("C", "Z")]).unwrap();

        let result = db.diff_stored("2024-05-02", "2024-05-01", None).unwrap();
        assert_eq!(titles(result.records()), vec!["C", "B"]);

        assert_eq!(
            db.diff_stored("2024-05-01", "2024-04-30", None).unwrap(),
            DiffResult::NoBaseline
        );
        assert!(db.diff_stored("2024-06-01", "2024-05-31", None).is_err());
    }

    #[test]
    fn test_date_keys() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(date_key(date), "2024-03-01");
        assert_eq!(previous_day_key(date).as_deref(), Some("2024-02-29"));
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobsift.db");
        let db = Database::open(&path).unwrap();
        db.init().unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), &path);
    }
}
