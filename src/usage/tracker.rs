//! SQLite-backed record of provider calls.
//!
//! Two tables: `api_usage` keeps one row per call, `daily_summary` keeps a
//! per-day rollup unique on `(date, provider)`. Both are written in the same
//! transaction so the rollup always matches the raw rows.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::error::DatabaseError;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Free-tier daily call limit for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderLimit {
    pub provider: String,
    pub label: String,
    /// `None` means unlimited.
    pub daily: Option<u64>,
}

impl ProviderLimit {
    pub fn daily(provider: &str, label: &str, daily: u64) -> Self {
        Self {
            provider: provider.to_string(),
            label: label.to_string(),
            daily: Some(daily),
        }
    }

    pub fn unlimited(provider: &str, label: &str) -> Self {
        Self {
            provider: provider.to_string(),
            label: label.to_string(),
            daily: None,
        }
    }
}

/// One row of the weekly rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub provider: String,
    pub calls: u64,
}

/// A provider at or above the warning share of its daily limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitWarning {
    pub provider: String,
    pub calls: u64,
    pub limit: u64,
    pub percent: f64,
}

impl std::fmt::Display for LimitWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}/{} ({:.1}%) WARNING",
            capitalize(&self.provider),
            self.calls,
            self.limit,
            self.percent
        )
    }
}

pub struct UsageTracker {
    conn: Mutex<Connection>,
}

impl UsageTracker {
    /// Open (or create) the usage database at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS api_usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                date TEXT NOT NULL,
                provider TEXT NOT NULL,
                tokens INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_usage_provider_time
                ON api_usage(provider, timestamp);

            CREATE TABLE IF NOT EXISTS daily_summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                provider TEXT NOT NULL,
                total_calls INTEGER NOT NULL DEFAULT 0,
                UNIQUE(date, provider)
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Record one successful call made now.
    pub fn record(&self, provider: &str, tokens: u64) -> Result<(), DatabaseError> {
        self.record_at(provider, tokens, Local::now())
    }

    pub fn record_at(
        &self,
        provider: &str,
        tokens: u64,
        at: DateTime<Local>,
    ) -> Result<(), DatabaseError> {
        let date = at.format(DATE_FORMAT).to_string();
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();

        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO api_usage (timestamp, date, provider, tokens) VALUES (?1, ?2, ?3, ?4)",
            params![timestamp, date, provider, tokens as i64],
        )?;
        tx.execute(
            "INSERT INTO daily_summary (date, provider, total_calls) VALUES (?1, ?2, 1)
             ON CONFLICT(date, provider) DO UPDATE SET total_calls = total_calls + 1",
            params![date, provider],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Calls recorded for `provider` on `date`.
    pub fn daily_total(&self, date: NaiveDate, provider: &str) -> Result<u64, DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let calls: Option<i64> = conn
            .query_row(
                "SELECT total_calls FROM daily_summary WHERE date = ?1 AND provider = ?2",
                params![date.format(DATE_FORMAT).to_string(), provider],
                |row| row.get(0),
            )
            .optional()?;
        Ok(calls.unwrap_or(0) as u64)
    }

    /// Per-provider call counts for today.
    pub fn today_usage(&self) -> Result<Vec<(String, u64)>, DatabaseError> {
        self.usage_on(Local::now().date_naive())
    }

    pub fn usage_on(&self, date: NaiveDate) -> Result<Vec<(String, u64)>, DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT provider, total_calls FROM daily_summary WHERE date = ?1 ORDER BY provider",
        )?;
        let rows = stmt
            .query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Rollup rows for the last seven calendar days (today and the six
    /// before it), newest first.
    pub fn week_usage(&self) -> Result<Vec<DailyUsage>, DatabaseError> {
        let since = Local::now().date_naive() - Duration::days(6);
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT date, provider, total_calls FROM daily_summary
             WHERE date >= ?1 ORDER BY date DESC, provider",
        )?;
        let raw = stmt
            .query_map(params![since.format(DATE_FORMAT).to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(date, provider, calls)| {
                let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                    DatabaseError::CorruptRow {
                        table: "daily_summary".to_string(),
                        reason: format!("bad date {date:?}: {e}"),
                    }
                })?;
                Ok(DailyUsage {
                    date,
                    provider,
                    calls: calls as u64,
                })
            })
            .collect()
    }

    /// Calls made to `provider` in the last hour.
    pub fn hourly_usage(&self, provider: &str) -> Result<u64, DatabaseError> {
        let since = (Local::now() - Duration::hours(1))
            .format(TIMESTAMP_FORMAT)
            .to_string();
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM api_usage WHERE provider = ?1 AND timestamp >= ?2",
            params![provider, since],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Providers at or above `ratio` of their daily limit today.
    pub fn limit_warnings(
        &self,
        limits: &[ProviderLimit],
        ratio: f64,
    ) -> Result<Vec<LimitWarning>, DatabaseError> {
        let today = self.today_usage()?;
        Ok(limit_warnings(&today, limits, ratio))
    }
}

/// Pure form of [`UsageTracker::limit_warnings`].
pub fn limit_warnings(
    usage: &[(String, u64)],
    limits: &[ProviderLimit],
    ratio: f64,
) -> Vec<LimitWarning> {
    limits
        .iter()
        .filter_map(|limit| {
            let daily = limit.daily.filter(|d| *d > 0)?;
            let calls = usage
                .iter()
                .find(|(p, _)| *p == limit.provider)
                .map(|(_, c)| *c)?;
            let share = calls as f64 / daily as f64;
            (share >= ratio).then(|| LimitWarning {
                provider: limit.provider.clone(),
                calls,
                limit: daily,
                percent: share * 100.0,
            })
        })
        .collect()
}

pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn limits() -> Vec<ProviderLimit> {
        vec![
            ProviderLimit::daily("groq", "Groq", 100),
            ProviderLimit::daily("mistral", "Mistral", 10),
            ProviderLimit::unlimited("ollama", "Local"),
        ]
    }

    #[test]
    fn test_record_updates_rollup() {
        let tracker = UsageTracker::open_in_memory().unwrap();
        let at = Local.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap();

        tracker.record_at("groq", 120, at).unwrap();
        tracker.record_at("groq", 80, at).unwrap();
        tracker.record_at("gemini", 0, at).unwrap();

        assert_eq!(tracker.daily_total(at.date_naive(), "groq").unwrap(), 2);
        assert_eq!(tracker.daily_total(at.date_naive(), "gemini").unwrap(), 1);
        assert_eq!(tracker.daily_total(at.date_naive(), "mistral").unwrap(), 0);
    }

    #[test]
    fn test_days_are_separate() {
        let tracker = UsageTracker::open_in_memory().unwrap();
        let monday = Local.with_ymd_and_hms(2026, 3, 16, 23, 59, 0).unwrap();
        let tuesday = Local.with_ymd_and_hms(2026, 3, 17, 0, 1, 0).unwrap();

        tracker.record_at("groq", 0, monday).unwrap();
        tracker.record_at("groq", 0, tuesday).unwrap();

        assert_eq!(tracker.daily_total(monday.date_naive(), "groq").unwrap(), 1);
        assert_eq!(
            tracker.usage_on(tuesday.date_naive()).unwrap(),
            vec![("groq".to_string(), 1)]
        );
    }

    #[test]
    fn test_concurrent_writers_rollup_matches() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(UsageTracker::open(&dir.path().join("usage.db")).unwrap());
        let at = Local.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    let provider = if i % 2 == 0 { "groq" } else { "gemini" };
                    for _ in 0..25 {
                        tracker.record_at(provider, 1, at).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(tracker.daily_total(at.date_naive(), "groq").unwrap(), 100);
        assert_eq!(tracker.daily_total(at.date_naive(), "gemini").unwrap(), 100);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("usage.db");
        let at = Local.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        {
            let tracker = UsageTracker::open(&path).unwrap();
            tracker.record_at("mistral", 5, at).unwrap();
        }
        let tracker = UsageTracker::open(&path).unwrap();
        assert_eq!(tracker.daily_total(at.date_naive(), "mistral").unwrap(), 1);
    }

    #[test]
    fn test_hourly_usage_counts_recent_calls() {
        let tracker = UsageTracker::open_in_memory().unwrap();
        tracker.record("groq", 0).unwrap();
        tracker
            .record_at("groq", 0, Local::now() - Duration::hours(3))
            .unwrap();
        assert_eq!(tracker.hourly_usage("groq").unwrap(), 1);
    }

    #[test]
    fn test_week_usage_newest_first() {
        let tracker = UsageTracker::open_in_memory().unwrap();
        let now = Local::now();
        tracker.record_at("groq", 0, now - Duration::days(2)).unwrap();
        tracker.record_at("groq", 0, now).unwrap();
        tracker.record_at("groq", 0, now - Duration::days(30)).unwrap();

        let week = tracker.week_usage().unwrap();
        assert_eq!(week.len(), 2);
        assert_eq!(week[0].date, now.date_naive());
    }

    #[test]
    fn test_week_usage_is_seven_days() {
        let tracker = UsageTracker::open_in_memory().unwrap();
        let today = Local::now().date_naive();
        for days_ago in [0, 6, 7, 8] {
            let noon = (today - Duration::days(days_ago))
                .and_hms_opt(12, 0, 0)
                .unwrap()
                .and_local_timezone(Local)
                .single()
                .unwrap();
            tracker.record_at("groq", 0, noon).unwrap();
        }

        let dates: Vec<_> = tracker.week_usage().unwrap().into_iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![today, today - Duration::days(6)]);
    }

    #[test]
    fn test_limit_warnings_threshold() {
        let usage = vec![
            ("groq".to_string(), 79),
            ("mistral".to_string(), 8),
            ("ollama".to_string(), 10_000),
        ];
        let warnings = limit_warnings(&usage, &limits(), 0.8);

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].provider, "mistral");
        assert_eq!(warnings[0].to_string(), "Mistral: 8/10 (80.0%) WARNING");
    }

    #[test]
    fn test_unlimited_never_warns() {
        let usage = vec![("ollama".to_string(), u64::MAX / 2)];
        assert!(limit_warnings(&usage, &limits(), 0.0).is_empty());
    }
}
