//! Proactive background jobs.
//!
//! Each job runs on its own timer and delivers its output, if any, to the
//! authorized user on every channel. Jobs are fire-and-forget: a failed run
//! is logged and the next one happens on schedule.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use cron::Schedule;
use tokio::task::JoinHandle;

use crate::activity::health::{recent_events, take_sample};
use crate::activity::{ChangeLog, HealthJournal};
use crate::channels::{ChannelManager, OutgoingResponse};
use crate::config::UsageConfig;
use crate::tools::system::format_stats;
use crate::tools::{ResourceProbe, SystemSnapshot};
use crate::usage::{LimitWarning, ProviderLimit, UsageTracker, report};

/// Timeout for the `git` and `journalctl` calls made by background jobs.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Alert thresholds, in percent.
    pub cpu_threshold: f32,
    pub ram_threshold: f32,
    pub disk_threshold: f32,
    /// Six-field cron expressions, local time.
    pub morning_digest: String,
    pub evening_digest: String,
    pub resource_interval: Duration,
    pub usage_check_interval: Duration,
    /// Changelog folder scan.
    pub activity_interval: Duration,
    /// Machine-health sample.
    pub health_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 85.0,
            ram_threshold: 85.0,
            disk_threshold: 90.0,
            morning_digest: "0 0 9 * * *".to_string(),
            evening_digest: "0 0 23 * * *".to_string(),
            resource_interval: Duration::from_secs(60 * 60),
            usage_check_interval: Duration::from_secs(3 * 60 * 60),
            activity_interval: Duration::from_secs(2 * 60),
            health_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    ResourceCheck,
    MorningDigest,
    EveningDigest,
    UsageCheck,
    ActivityScan,
    HealthSample,
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::ResourceCheck => "resource_check",
            Job::MorningDigest => "morning_digest",
            Job::EveningDigest => "evening_digest",
            Job::UsageCheck => "usage_check",
            Job::ActivityScan => "activity_scan",
            Job::HealthSample => "health_sample",
        }
    }
}

/// Alert text when any reading is over its threshold.
pub fn resource_alert(s: &SystemSnapshot, config: &SchedulerConfig) -> Option<String> {
    let mut lines = Vec::new();
    if s.cpu_percent > config.cpu_threshold {
        lines.push(format!("High CPU usage: {:.1}%", s.cpu_percent));
    }
    if s.ram_percent() > config.ram_threshold {
        lines.push(format!("High RAM usage: {:.1}%", s.ram_percent()));
    }
    if s.disk_percent() > config.disk_threshold {
        lines.push(format!("Disk almost full: {:.1}%", s.disk_percent()));
    }
    if lines.is_empty() {
        return None;
    }
    Some(format!("⚠️ *Resource Alert*\n\n{}", lines.join("\n")))
}

pub fn morning_digest(s: &SystemSnapshot, now: DateTime<Local>) -> String {
    format!("☀️ *Good morning!*\n\n{}", format_stats(s, now))
}

/// The day's changelog (when tracked) followed by provider usage.
pub fn evening_digest(changelog: Option<&str>, usage_report: &str) -> String {
    match changelog {
        Some(changelog) => format!("🌙 *Daily summary*\n\n{}\n\n{}", changelog, usage_report),
        None => format!("🌙 *Daily summary*\n\n{}", usage_report),
    }
}

pub fn usage_alert(warnings: &[LimitWarning]) -> Option<String> {
    if warnings.is_empty() {
        None
    } else {
        Some(format!("⚠️ {}", report::warnings_report(warnings)))
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    probe: Arc<dyn ResourceProbe>,
    tracker: Arc<UsageTracker>,
    limits: Vec<ProviderLimit>,
    warn_ratio: f64,
    changelog: Option<Arc<ChangeLog>>,
    repo_depth: usize,
    journal: Option<Arc<HealthJournal>>,
    retention: Duration,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        probe: Arc<dyn ResourceProbe>,
        tracker: Arc<UsageTracker>,
        usage: &UsageConfig,
    ) -> Self {
        Self {
            config,
            probe,
            tracker,
            limits: usage.limits.clone(),
            warn_ratio: usage.warn_ratio,
            changelog: None,
            repo_depth: 2,
            journal: None,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    /// Scan watched folders in the background and put the day's changelog
    /// into the evening digest.
    pub fn with_changelog(mut self, log: Arc<ChangeLog>, repo_depth: usize) -> Self {
        self.changelog = Some(log);
        self.repo_depth = repo_depth;
        self
    }

    /// Sample machine health in the background, keeping `retention` of history.
    pub fn with_health_journal(mut self, journal: Arc<HealthJournal>, retention: Duration) -> Self {
        self.journal = Some(journal);
        self.retention = retention;
        self
    }

    /// Run one job. Returns the message to deliver, if any.
    pub async fn run_job(&self, job: Job) -> Option<String> {
        match job {
            Job::ResourceCheck => match self.probe.snapshot().await {
                Ok(s) => resource_alert(&s, &self.config),
                Err(e) => {
                    tracing::warn!("Resource check failed: {}", e);
                    None
                }
            },
            Job::MorningDigest => match self.probe.snapshot().await {
                Ok(s) => Some(morning_digest(&s, Local::now())),
                Err(e) => {
                    tracing::warn!("Morning digest failed: {}", e);
                    None
                }
            },
            Job::EveningDigest => {
                let changelog = self.changelog_report().await;
                match self.tracker.today_usage() {
                    Ok(usage) => Some(evening_digest(
                        changelog.as_deref(),
                        &report::today_report(&usage, &self.limits, Local::now().time()),
                    )),
                    Err(e) => {
                        tracing::warn!("Evening digest failed: {}", e);
                        changelog.map(|c| evening_digest(None, &c))
                    }
                }
            }
            Job::UsageCheck => match self.tracker.limit_warnings(&self.limits, self.warn_ratio) {
                Ok(warnings) => usage_alert(&warnings),
                Err(e) => {
                    tracing::warn!("Usage check failed: {}", e);
                    None
                }
            },
            Job::ActivityScan => {
                self.scan_activity().await;
                None
            }
            Job::HealthSample => {
                self.sample_health().await;
                None
            }
        }
    }

    async fn changelog_report(&self) -> Option<String> {
        let log = self.changelog.clone()?;
        match tokio::task::spawn_blocking(move || log.report(1, Local::now())).await {
            Ok(Ok(text)) => Some(text),
            Ok(Err(e)) => {
                tracing::warn!("Changelog report failed: {}", e);
                None
            }
            Err(e) => {
                tracing::warn!("Changelog report panicked: {}", e);
                None
            }
        }
    }

    async fn scan_activity(&self) {
        let Some(log) = self.changelog.clone() else {
            return;
        };
        let scanner = log.clone();
        match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Changelog scan failed: {}", e),
            Err(e) => tracing::warn!("Changelog scan panicked: {}", e),
        }
        if let Err(e) = log.collect_commits(self.repo_depth, COMMAND_TIMEOUT).await {
            tracing::warn!("Commit collection failed: {}", e);
        }
    }

    async fn sample_health(&self) {
        let Some(journal) = self.journal.clone() else {
            return;
        };
        let sample = match take_sample(self.probe.as_ref()).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!("Health sample failed: {}", e);
                return;
            }
        };
        let events = recent_events(COMMAND_TIMEOUT).await;
        let cutoff = chrono::Duration::from_std(self.retention)
            .map(|keep| Local::now() - keep)
            .ok();

        let result = tokio::task::spawn_blocking(move || {
            journal.record_sample(&sample)?;
            for event in &events {
                journal.record_event(event)?;
            }
            match cutoff {
                Some(cutoff) => journal.prune(cutoff),
                None => Ok(0),
            }
        })
        .await;
        match result {
            Ok(Ok(pruned)) if pruned > 0 => tracing::debug!("Pruned {} old health rows", pruned),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("Storing health sample failed: {}", e),
            Err(e) => tracing::warn!("Storing health sample panicked: {}", e),
        }
    }

    /// Start every job on its own task.
    pub fn spawn(self: Arc<Self>, channels: Arc<ChannelManager>, user_id: String) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Scheduler is disabled");
            return Vec::new();
        }

        let mut intervals = vec![
            (Job::ResourceCheck, self.config.resource_interval, false),
            (Job::UsageCheck, self.config.usage_check_interval, false),
        ];
        // Background collectors start right away so the first scan primes early.
        if self.changelog.is_some() {
            intervals.push((Job::ActivityScan, self.config.activity_interval, true));
        }
        if self.journal.is_some() {
            intervals.push((Job::HealthSample, self.config.health_interval, true));
        }

        let mut handles: Vec<_> = intervals
            .into_iter()
            .map(|(job, every, immediate)| {
                self.clone()
                    .spawn_interval(job, every, immediate, channels.clone(), user_id.clone())
            })
            .collect();

        let daily = [
            (Job::MorningDigest, self.config.morning_digest.clone()),
            (Job::EveningDigest, self.config.evening_digest.clone()),
        ];
        for (job, expr) in daily {
            match Schedule::from_str(&expr) {
                Ok(schedule) => handles.push(self.clone().spawn_cron(
                    job,
                    schedule,
                    channels.clone(),
                    user_id.clone(),
                )),
                Err(e) => tracing::error!("Invalid cron '{}' for {}: {}", expr, job.name(), e),
            }
        }

        tracing::info!("Scheduler started {} jobs", handles.len());
        handles
    }

    fn spawn_interval(
        self: Arc<Self>,
        job: Job,
        every: Duration,
        immediate: bool,
        channels: Arc<ChannelManager>,
        user_id: String,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            if !immediate {
                interval.tick().await;
            }
            loop {
                interval.tick().await;
                self.fire(job, &channels, &user_id).await;
            }
        })
    }

    fn spawn_cron(
        self: Arc<Self>,
        job: Job,
        schedule: Schedule,
        channels: Arc<ChannelManager>,
        user_id: String,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Local).next() else {
                    tracing::warn!("No upcoming run for {}", job.name());
                    return;
                };
                let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!("{} next runs at {}", job.name(), next);
                tokio::time::sleep(wait).await;
                self.fire(job, &channels, &user_id).await;
            }
        })
    }

    async fn fire(&self, job: Job, channels: &ChannelManager, user_id: &str) {
        tracing::debug!("Running scheduled job {}", job.name());
        let Some(text) = self.run_job(job).await else {
            return;
        };
        for (channel, result) in channels
            .broadcast_all(user_id, OutgoingResponse::text(text))
            .await
        {
            if let Err(e) = result {
                tracing::warn!("{} delivery on {} failed: {}", job.name(), channel, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tools::system::tests::{FixedProbe, snapshot};

    fn scheduler(s: SystemSnapshot) -> (Scheduler, Arc<UsageTracker>) {
        let dir = std::env::temp_dir();
        let tracker = Arc::new(UsageTracker::open_in_memory().unwrap());
        let mut usage = UsageConfig::in_dir(&dir);
        usage.limits = vec![ProviderLimit::daily("mistral", "Mistral", 10)];
        let sched = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(FixedProbe(s)),
            tracker.clone(),
            &usage,
        );
        (sched, tracker)
    }

    #[test]
    fn test_resource_alert_thresholds() {
        let config = SchedulerConfig::default();
        assert_eq!(resource_alert(&snapshot(50.0, 50.0, 50.0), &config), None);

        let text = resource_alert(&snapshot(92.5, 50.0, 95.0), &config).unwrap();
        assert!(text.contains("High CPU usage: 92.5%"));
        assert!(text.contains("Disk almost full"));
        assert!(!text.contains("RAM"));
    }

    #[test]
    fn test_default_crons_parse() {
        let config = SchedulerConfig::default();
        assert!(Schedule::from_str(&config.morning_digest).is_ok());
        assert!(Schedule::from_str(&config.evening_digest).is_ok());
    }

    #[test]
    fn test_morning_digest_contains_stats() {
        let now = Local.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
        let text = morning_digest(&snapshot(10.0, 20.0, 30.0), now);
        assert!(text.starts_with("☀️ *Good morning!*"));
        assert!(text.contains("CPU: 10.0%"));
    }

    #[tokio::test]
    async fn test_resource_job_quiet_when_healthy() {
        let (sched, _) = scheduler(snapshot(10.0, 10.0, 10.0));
        assert_eq!(sched.run_job(Job::ResourceCheck).await, None);
    }

    #[tokio::test]
    async fn test_usage_job_warns_at_ratio() {
        let (sched, tracker) = scheduler(snapshot(10.0, 10.0, 10.0));
        assert_eq!(sched.run_job(Job::UsageCheck).await, None);

        for _ in 0..8 {
            tracker.record("mistral", 1).unwrap();
        }
        let text = sched.run_job(Job::UsageCheck).await.unwrap();
        assert!(text.contains("Mistral: 8/10 (80.0%)"));
    }

    #[tokio::test]
    async fn test_evening_digest_reports_usage() {
        let (sched, tracker) = scheduler(snapshot(10.0, 10.0, 10.0));
        tracker.record("mistral", 1).unwrap();
        let text = sched.run_job(Job::EveningDigest).await.unwrap();
        assert!(text.starts_with("🌙 *Daily summary*"));
        assert!(text.contains("*API Usage Today"));
    }

    #[tokio::test]
    async fn test_evening_digest_leads_with_changelog() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("site");
        std::fs::create_dir_all(&project).unwrap();

        let log = Arc::new(ChangeLog::open_in_memory(&[dir.path().to_path_buf()]).unwrap());
        let (sched, _) = scheduler(snapshot(10.0, 10.0, 10.0));
        let sched = sched.with_changelog(log, 0);

        // First scan primes, the second sees the new file.
        assert_eq!(sched.run_job(Job::ActivityScan).await, None);
        std::fs::write(project.join("index.html"), "<h1>hi</h1>").unwrap();
        assert_eq!(sched.run_job(Job::ActivityScan).await, None);

        let text = sched.run_job(Job::EveningDigest).await.unwrap();
        assert!(text.starts_with("🌙 *Daily summary*\n\n*Personal Changelog - "));
        assert!(text.contains("site/\n  Created: index.html"));
        assert!(text.contains("*API Usage Today"));
        let changelog_at = text.find("Personal Changelog").unwrap();
        let usage_at = text.find("API Usage Today").unwrap();
        assert!(changelog_at < usage_at);
    }

    #[tokio::test]
    async fn test_health_sample_is_stored() {
        let journal = Arc::new(HealthJournal::open_in_memory().unwrap());
        let (sched, _) = scheduler(snapshot(91.0, 20.0, 30.0));
        let sched = sched.with_health_journal(journal.clone(), Duration::from_secs(3600));

        assert_eq!(sched.run_job(Job::HealthSample).await, None);

        let stored = journal
            .samples_since(Local::now() - chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].notes, vec!["HIGH_CPU: 91.0%"]);
        assert_eq!(stored[0].top, "init:0.5%CPU:0.1%RAM");
    }
}
