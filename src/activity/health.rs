//! Rolling history of machine health.
//!
//! A sample (CPU, RAM, disk, busiest processes, anything that looks off) is
//! stored every few minutes together with error-level system log events, so
//! questions like "why was my pc slow last night" can be answered after the
//! fact. Rows older than the retention window are pruned on every sample.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::tools::shell::run_program;
use crate::tools::{ProcessInfo, ResourceProbe, SystemSnapshot, ToolError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const NOTE_SEPARATOR: &str = "; ";

const HIGH_CPU: f32 = 80.0;
const HIGH_RAM: f32 = 85.0;
const HIGH_DISK: f32 = 90.0;

/// Process names that are almost always unwanted miners.
const SUSPICIOUS_PROCESSES: &[&str] = &["xmrig", "minerd", "cpuminer", "ethminer"];

const MAX_EVENTS_PER_CHECK: usize = 5;

/// One stored reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSample {
    pub at: DateTime<Local>,
    pub cpu: f32,
    pub ram: f32,
    pub disk: f32,
    /// Busiest processes, `name:X%CPU:Y%RAM` joined by `|`.
    pub top: String,
    pub notes: Vec<String>,
}

impl HealthSample {
    pub fn from_readings(s: &SystemSnapshot, processes: &[ProcessInfo], at: DateTime<Local>) -> Self {
        Self {
            at,
            cpu: s.cpu_percent,
            ram: s.ram_percent(),
            disk: s.disk_percent(),
            top: format_top(processes),
            notes: suspicious_notes(s, processes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemEvent {
    pub at: DateTime<Local>,
    pub kind: String,
    pub description: String,
}

pub fn format_top(processes: &[ProcessInfo]) -> String {
    processes
        .iter()
        .map(|p| format!("{}:{:.1}%CPU:{:.1}%RAM", p.name, p.cpu_percent, p.memory_percent))
        .collect::<Vec<_>>()
        .join("|")
}

/// Readings over their thresholds and processes with known-bad names.
pub fn suspicious_notes(s: &SystemSnapshot, processes: &[ProcessInfo]) -> Vec<String> {
    let mut notes = Vec::new();
    if s.cpu_percent > HIGH_CPU {
        notes.push(format!("HIGH_CPU: {:.1}%", s.cpu_percent));
    }
    if s.ram_percent() > HIGH_RAM {
        notes.push(format!("HIGH_RAM: {:.1}%", s.ram_percent()));
    }
    if s.disk_percent() > HIGH_DISK {
        notes.push(format!("HIGH_DISK: {:.1}%", s.disk_percent()));
    }
    for p in processes {
        let name = p.name.to_lowercase();
        if SUSPICIOUS_PROCESSES.iter().any(|bad| name.contains(bad)) {
            notes.push(format!("SUSPICIOUS_PROCESS: {}", p.name));
        }
    }
    notes
}

/// Take one sample from `probe`.
pub async fn take_sample(probe: &dyn ResourceProbe) -> Result<HealthSample, ToolError> {
    let snapshot = probe.snapshot().await?;
    let processes = probe.top_processes(5).await?;
    Ok(HealthSample::from_readings(&snapshot, &processes, Local::now()))
}

/// Error-level journal lines and OOM kills from the last ten minutes.
///
/// Hosts without `journalctl` simply report nothing.
pub async fn recent_events(timeout: Duration) -> Vec<SystemEvent> {
    let mut events = Vec::new();
    let now = Local::now();

    let errors = run_program(
        "journalctl",
        &["--since", "10 minutes ago", "-p", "err", "--no-pager", "-q", "-o", "cat"],
        None,
        timeout,
    )
    .await;
    match errors {
        Ok(out) if out.success() => {
            events.extend(parse_error_lines(&out.stdout).into_iter().map(|line| SystemEvent {
                at: now,
                kind: "SYSTEM_ERROR".to_string(),
                description: line,
            }));
        }
        Ok(out) => tracing::debug!("journalctl failed: {}", out.stderr.trim()),
        Err(e) => tracing::debug!("journalctl unavailable: {}", e),
    }

    if let Ok(out) = run_program(
        "journalctl",
        &["-k", "--since", "10 minutes ago", "--no-pager", "-q", "-o", "cat"],
        None,
        timeout,
    )
    .await
    {
        events.extend(oom_kills(&out.stdout).into_iter().map(|line| SystemEvent {
            at: now,
            kind: "OOM_KILL".to_string(),
            description: line,
        }));
    }
    events
}

pub fn parse_error_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("-- "))
        .take(MAX_EVENTS_PER_CHECK)
        .map(str::to_string)
        .collect()
}

pub fn oom_kills(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| {
            let lower = l.to_lowercase();
            lower.contains("out of memory") || lower.contains("oom-kill")
        })
        .take(MAX_EVENTS_PER_CHECK)
        .map(str::to_string)
        .collect()
}

pub struct HealthJournal {
    conn: Mutex<Connection>,
}

impl HealthJournal {
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
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                cpu_percent REAL NOT NULL,
                ram_percent REAL NOT NULL,
                disk_percent REAL NOT NULL,
                top_processes TEXT NOT NULL DEFAULT '',
                notes TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_time ON snapshots(timestamp);

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                description TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_time ON events(timestamp);
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record_sample(&self, sample: &HealthSample) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO snapshots (timestamp, cpu_percent, ram_percent, disk_percent, top_processes, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample.at.format(TIMESTAMP_FORMAT).to_string(),
                f64::from(sample.cpu),
                f64::from(sample.ram),
                f64::from(sample.disk),
                sample.top,
                sample.notes.join(NOTE_SEPARATOR)
            ],
        )?;
        Ok(())
    }

    pub fn record_event(&self, event: &SystemEvent) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO events (timestamp, kind, description) VALUES (?1, ?2, ?3)",
            params![
                event.at.format(TIMESTAMP_FORMAT).to_string(),
                event.kind,
                event.description
            ],
        )?;
        Ok(())
    }

    /// Drop everything older than `before`. Returns the number of rows removed.
    pub fn prune(&self, before: DateTime<Local>) -> Result<usize, DatabaseError> {
        let cutoff = before.format(TIMESTAMP_FORMAT).to_string();
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let snapshots = conn.execute("DELETE FROM snapshots WHERE timestamp < ?1", params![cutoff])?;
        let events = conn.execute("DELETE FROM events WHERE timestamp < ?1", params![cutoff])?;
        Ok(snapshots + events)
    }

    /// Samples taken at or after `since`, oldest first.
    pub fn samples_since(&self, since: DateTime<Local>) -> Result<Vec<HealthSample>, DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT timestamp, cpu_percent, ram_percent, disk_percent, top_processes, notes
             FROM snapshots WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;
        let raw = stmt
            .query_map(params![since.format(TIMESTAMP_FORMAT).to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(at, cpu, ram, disk, top, notes)| {
                Ok(HealthSample {
                    at: parse_timestamp("snapshots", &at)?,
                    cpu: cpu as f32,
                    ram: ram as f32,
                    disk: disk as f32,
                    top,
                    notes: notes
                        .split(NOTE_SEPARATOR)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .collect(),
                })
            })
            .collect()
    }

    pub fn events_since(&self, since: DateTime<Local>) -> Result<Vec<SystemEvent>, DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT timestamp, kind, description FROM events
             WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;
        let raw = stmt
            .query_map(params![since.format(TIMESTAMP_FORMAT).to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(at, kind, description)| {
                Ok(SystemEvent {
                    at: parse_timestamp("events", &at)?,
                    kind,
                    description,
                })
            })
            .collect()
    }
}

fn parse_timestamp(table: &str, raw: &str) -> Result<DateTime<Local>, DatabaseError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .ok_or_else(|| DatabaseError::CorruptRow {
            table: table.to_string(),
            reason: format!("bad timestamp {raw:?}"),
        })
}

/// Averages, peaks and alerts over a window of samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub samples: usize,
    pub cpu_avg: f32,
    pub cpu_peak: f32,
    pub ram_avg: f32,
    pub ram_peak: f32,
    pub disk_latest: f32,
    /// Busiest processes at the CPU peak.
    pub peak_top: String,
    pub alerts: Vec<String>,
    pub events: Vec<SystemEvent>,
}

/// `None` when there is nothing to summarize yet.
pub fn summarize(
    window: &[HealthSample],
    alerts: Vec<String>,
    events: Vec<SystemEvent>,
) -> Option<HealthSummary> {
    let peak = window.iter().max_by(|a, b| a.cpu.total_cmp(&b.cpu))?;
    let n = window.len() as f32;
    Some(HealthSummary {
        samples: window.len(),
        cpu_avg: window.iter().map(|s| s.cpu).sum::<f32>() / n,
        cpu_peak: peak.cpu,
        ram_avg: window.iter().map(|s| s.ram).sum::<f32>() / n,
        ram_peak: window.iter().map(|s| s.ram).fold(0.0, f32::max),
        disk_latest: window.last().map(|s| s.disk).unwrap_or_default(),
        peak_top: peak.top.clone(),
        alerts,
        events,
    })
}

/// Plain report used when no model is available.
pub fn render_summary(summary: &HealthSummary, hours: u32) -> String {
    let mut out = format!(
        "*PC Intelligence Report*\n\nLast {} hours:\nCPU: avg {:.1}%, peak {:.1}%\nRAM: avg {:.1}%, peak {:.1}%\nDisk: {:.1}%\n",
        hours,
        summary.cpu_avg,
        summary.cpu_peak,
        summary.ram_avg,
        summary.ram_peak,
        summary.disk_latest,
    );
    if !summary.peak_top.is_empty() {
        out.push_str(&format!("\nBusiest at peak: {}\n", summary.peak_top.replace('|', ", ")));
    }
    if !summary.alerts.is_empty() {
        out.push_str(&format!("\nAlerts: {} suspicious events found", summary.alerts.len()));
        for alert in summary.alerts.iter().rev().take(5) {
            out.push_str(&format!("\n- {}", alert));
        }
        out.push('\n');
    }
    if !summary.events.is_empty() {
        out.push_str(&format!("\nSystem events: {} errors logged", summary.events.len()));
    }
    out.trim_end().to_string()
}

/// Context handed to a model so it can explain the history in plain words.
pub fn model_context(summary: &HealthSummary, question: &str, hours: u32) -> String {
    let mut out = format!(
        "User question: {}\n\nMachine history, last {} hours ({} samples):\n\
         CPU avg {:.1}% peak {:.1}%\nRAM avg {:.1}% peak {:.1}%\nDisk {:.1}%\n\
         Top processes at CPU peak: {}\n",
        question.trim(),
        hours,
        summary.samples,
        summary.cpu_avg,
        summary.cpu_peak,
        summary.ram_avg,
        summary.ram_peak,
        summary.disk_latest,
        if summary.peak_top.is_empty() { "unknown" } else { summary.peak_top.as_str() },
    );
    if !summary.alerts.is_empty() {
        out.push_str("\nAlerts in the last day:\n");
        for alert in summary.alerts.iter().rev().take(10) {
            out.push_str(&format!("- {}\n", alert));
        }
    }
    if !summary.events.is_empty() {
        out.push_str("\nSystem log events in the last day:\n");
        for event in summary.events.iter().rev().take(10) {
            out.push_str(&format!(
                "- {} {}: {}\n",
                event.at.format("%H:%M"),
                event.kind,
                event.description
            ));
        }
    }
    out
}
