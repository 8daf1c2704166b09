//! Personal changelog: which files changed and which commits landed.
//!
//! A periodic scan walks the watched folders and compares modification times
//! against the previous scan. The first scan of a folder only primes the
//! cache, so nothing that existed before the agent started is reported.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::plugins::builtin::find_repos;
use crate::tools::shell::run_program;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// File extensions worth reporting.
pub const TRACKED_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "html", "css", "java", "c", "cpp", "go", "rs", "md", "txt", "json", "yaml",
    "yml", "sh", "sql", "php", "rb", "toml",
];

const SKIP_DIRS: &[&str] = &["venv", "node_modules", "__pycache__", "target"];
const NAMES_PER_LINE: usize = 5;
const COMMITS_SHOWN: usize = 10;

pub const NO_ACTIVITY: &str = "No activity recorded yet. Give it a few minutes to start tracking.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileAction {
    Created,
    Modified,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::Created => "created",
            FileAction::Modified => "modified",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(FileAction::Created),
            "modified" => Some(FileAction::Modified),
            _ => None,
        }
    }
}

/// One recorded change to a tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    pub path: PathBuf,
    pub project: String,
    pub action: FileAction,
    pub size: u64,
}

impl FileChange {
    fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub hash: String,
    pub repo: String,
    pub message: String,
}

/// A tracked file seen during a walk.
#[derive(Debug, Clone)]
struct SeenFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

#[derive(Default)]
struct ScanCache {
    /// Folders whose first walk has already happened.
    primed: HashSet<PathBuf>,
    mtimes: HashMap<PathBuf, SystemTime>,
}

pub struct ChangeLog {
    conn: Mutex<Connection>,
    cache: Mutex<ScanCache>,
}

impl ChangeLog {
    /// Open (or create) the changelog database and make sure `folders` are watched.
    pub fn open(path: &Path, folders: &[PathBuf]) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn, folders)
    }

    pub fn open_in_memory(folders: &[PathBuf]) -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?, folders)
    }

    fn with_connection(conn: Connection, folders: &[PathBuf]) -> Result<Self, DatabaseError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS file_activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                path TEXT NOT NULL,
                project TEXT NOT NULL,
                action TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_file_activity_time
                ON file_activity(timestamp);

            CREATE TABLE IF NOT EXISTS git_commits (
                hash TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                repo TEXT NOT NULL,
                message TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watch_folders (
                path TEXT PRIMARY KEY
            );
            ",
        )?;
        for folder in folders {
            conn.execute(
                "INSERT OR IGNORE INTO watch_folders (path) VALUES (?1)",
                params![folder.to_string_lossy()],
            )?;
        }
        Ok(Self {
            conn: Mutex::new(conn),
            cache: Mutex::new(ScanCache::default()),
        })
    }

    pub fn watch_folders(&self) -> Result<Vec<PathBuf>, DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare("SELECT path FROM watch_folders ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows.into_iter().map(PathBuf::from).collect())
    }

    /// Start watching `folder`. Returns false if it was already watched.
    pub fn add_folder(&self, folder: &Path) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO watch_folders (path) VALUES (?1)",
            params![folder.to_string_lossy()],
        )?;
        Ok(inserted > 0)
    }

    /// Walk every watched folder and record what changed since the last walk.
    ///
    /// Blocking; run it off the async runtime.
    pub fn scan(&self) -> Result<Vec<FileChange>, DatabaseError> {
        let folders = self.watch_folders()?;
        let mut changes = Vec::new();
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            for root in folders.iter().filter(|f| f.is_dir()) {
                let priming = !cache.primed.contains(root);
                for file in tracked_files(root) {
                    let previous = cache.mtimes.insert(file.path.clone(), file.modified);
                    if priming {
                        continue;
                    }
                    let action = match previous {
                        None => FileAction::Created,
                        Some(old) if old != file.modified => FileAction::Modified,
                        Some(_) => continue,
                    };
                    changes.push(FileChange {
                        project: project_name(root, &file.path),
                        path: file.path,
                        action,
                        size: file.size,
                    });
                }
                cache.primed.insert(root.clone());
            }
        }

        let now = Local::now();
        for change in &changes {
            self.record_file(change, now)?;
        }
        if !changes.is_empty() {
            tracing::debug!("Changelog recorded {} file changes", changes.len());
        }
        Ok(changes)
    }

    pub fn record_file(&self, change: &FileChange, at: DateTime<Local>) -> Result<(), DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO file_activity (timestamp, path, project, action, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                at.format(TIMESTAMP_FORMAT).to_string(),
                change.path.to_string_lossy(),
                change.project,
                change.action.as_str(),
                change.size as i64
            ],
        )?;
        Ok(())
    }

    /// Store a commit. Returns false when the hash is already known.
    pub fn record_commit(
        &self,
        commit: &CommitRecord,
        at: DateTime<Local>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO git_commits (hash, timestamp, repo, message)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                commit.hash,
                at.format(TIMESTAMP_FORMAT).to_string(),
                commit.repo,
                commit.message
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Pick up the last day of commits from every repository under the
    /// watched folders.
    pub async fn collect_commits(
        &self,
        max_depth: usize,
        timeout: Duration,
    ) -> Result<usize, DatabaseError> {
        let folders = self.watch_folders()?;
        let repos = tokio::task::spawn_blocking(move || {
            let mut repos: Vec<PathBuf> = folders
                .iter()
                .flat_map(|root| find_repos(root, max_depth))
                .collect();
            repos.sort();
            repos.dedup();
            repos
        })
        .await
        .unwrap_or_default();

        let mut added = 0;
        for repo in repos {
            let args = ["log", "--since=24 hours ago", "--format=%H%x1f%aI%x1f%s"];
            let output = match run_program("git", &args, Some(&repo), timeout).await {
                Ok(out) if out.success() => out.stdout,
                Ok(out) => {
                    tracing::debug!("git log in {} failed: {}", repo.display(), out.stderr.trim());
                    continue;
                }
                Err(e) => {
                    tracing::debug!("git log in {} failed: {}", repo.display(), e);
                    continue;
                }
            };
            let name = repo_name(&repo);
            for (hash, at, message) in parse_git_log(&output) {
                let commit = CommitRecord {
                    hash,
                    repo: name.clone(),
                    message,
                };
                if self.record_commit(&commit, at)? {
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    /// The changelog for the last `days` days, rendered for chat.
    pub fn report(&self, days: u32, now: DateTime<Local>) -> Result<String, DatabaseError> {
        let since = (now - chrono::Duration::days(i64::from(days.max(1))))
            .format(TIMESTAMP_FORMAT)
            .to_string();
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let mut stmt = conn.prepare(
            "SELECT path, project, action, size_bytes FROM file_activity
             WHERE timestamp >= ?1 ORDER BY timestamp",
        )?;
        let raw = stmt
            .query_map(params![since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let files = raw
            .into_iter()
            .map(|(path, project, action, size)| {
                let action = FileAction::parse(&action).ok_or_else(|| DatabaseError::CorruptRow {
                    table: "file_activity".to_string(),
                    reason: format!("unknown action {action:?}"),
                })?;
                Ok(FileChange {
                    path: PathBuf::from(path),
                    project,
                    action,
                    size: size.max(0) as u64,
                })
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        let mut stmt = conn.prepare(
            "SELECT hash, repo, message FROM git_commits
             WHERE timestamp >= ?1 ORDER BY timestamp DESC",
        )?;
        let commits = stmt
            .query_map(params![since], |row| {
                Ok(CommitRecord {
                    hash: row.get(0)?,
                    repo: row.get(1)?,
                    message: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(render_changelog(now, days, &files, &commits))
    }
}

/// Every tracked file under `root`, skipping hidden and dependency folders.
fn tracked_files(root: &Path) -> Vec<SeenFile> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                if !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_ref()) {
                    stack.push(entry.path());
                }
                continue;
            }
            if !file_type.is_file() || !is_tracked(&name) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    files.push(SeenFile {
                        path: entry.path(),
                        modified,
                        size: meta.len(),
                    });
                }
            }
        }
    }
    files
}

fn is_tracked(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| TRACKED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// First folder below the watch root, or the root's own name for files at the top.
pub fn project_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(first), Some(_)) => first.as_os_str().to_string_lossy().into_owned(),
        _ => repo_name(root),
    }
}

fn repo_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Parse `git log --format=%H%x1f%aI%x1f%s`.
pub fn parse_git_log(output: &str) -> Vec<(String, DateTime<Local>, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\x1f');
            let hash = parts.next()?.trim();
            let at = DateTime::parse_from_rfc3339(parts.next()?.trim()).ok()?;
            let message = parts.next()?.trim();
            if hash.is_empty() {
                return None;
            }
            Some((hash.to_string(), at.with_timezone(&Local), message.to_string()))
        })
        .collect()
}

pub fn render_changelog(
    now: DateTime<Local>,
    days: u32,
    files: &[FileChange],
    commits: &[CommitRecord],
) -> String {
    if files.is_empty() && commits.is_empty() {
        return NO_ACTIVITY.to_string();
    }

    let mut out = if days <= 1 {
        format!("*Personal Changelog - {}*\n\n", now.format("%B %d, %Y"))
    } else {
        format!(
            "*Personal Changelog - last {} days to {}*\n\n",
            days,
            now.format("%B %d, %Y")
        )
    };

    if !files.is_empty() {
        // project -> (created, modified), names in first-seen order
        let mut projects: BTreeMap<&str, (Vec<String>, Vec<String>)> = BTreeMap::new();
        for change in files {
            let entry = projects.entry(change.project.as_str()).or_default();
            let names = match change.action {
                FileAction::Created => &mut entry.0,
                FileAction::Modified => &mut entry.1,
            };
            let name = change.filename();
            if !names.contains(&name) {
                names.push(name);
            }
        }

        out.push_str("*Files worked on:*\n");
        for (project, (created, modified)) in &projects {
            out.push_str(&format!("\n{}/\n", project));
            if !created.is_empty() {
                out.push_str(&format!("  Created: {}\n", name_list(created)));
            }
            if !modified.is_empty() {
                out.push_str(&format!("  Modified: {}\n", name_list(modified)));
            }
        }

        let touched: HashSet<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        out.push_str(&format!("\nTotal files touched: {}\n", touched.len()));
    }

    if !commits.is_empty() {
        out.push_str("\n*Git commits:*\n");
        let mut shown = HashSet::new();
        for commit in commits {
            if shown.len() >= COMMITS_SHOWN {
                break;
            }
            if shown.insert((commit.repo.as_str(), commit.message.as_str())) {
                out.push_str(&format!("- [{}] {}\n", commit.repo, commit.message));
            }
        }
    }

    out.trim_end().to_string()
}

fn name_list(names: &[String]) -> String {
    let mut list = names
        .iter()
        .take(NAMES_PER_LINE)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > NAMES_PER_LINE {
        list.push_str(&format!(" (+{} more)", names.len() - NAMES_PER_LINE));
    }
    list
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn touch(path: &Path, body: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    fn bump_mtime(path: &Path) {
        let later = SystemTime::now() + Duration::from_secs(120);
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(later).unwrap();
    }

    #[test]
    fn test_first_scan_only_primes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("app/main.rs"), "fn main() {}");

        let log = ChangeLog::open_in_memory(&[dir.path().to_path_buf()]).unwrap();
        assert!(log.scan().unwrap().is_empty());
        assert_eq!(log.report(1, Local::now()).unwrap(), NO_ACTIVITY);
    }

    #[test]
    fn test_scan_detects_created_and_modified() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("app/src/lib.rs");
        touch(&existing, "pub fn a() {}");
        touch(&dir.path().join("app/node_modules/dep.js"), "x");

        let log = ChangeLog::open_in_memory(&[dir.path().to_path_buf()]).unwrap();
        log.scan().unwrap();

        bump_mtime(&existing);
        touch(&dir.path().join("app/README.md"), "# app");
        touch(&dir.path().join("app/photo.png"), "not tracked");
        touch(&dir.path().join("app/node_modules/new.js"), "skipped");
        touch(&dir.path().join(".hidden/secret.txt"), "skipped");

        let mut changes = log.scan().unwrap();
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        let summary: Vec<_> = changes
            .iter()
            .map(|c| (c.filename(), c.project.as_str(), c.action))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("README.md".to_string(), "app", FileAction::Created),
                ("lib.rs".to_string(), "app", FileAction::Modified),
            ]
        );

        // Nothing changed since.
        assert!(log.scan().unwrap().is_empty());
    }

    #[test]
    fn test_added_folder_is_primed_before_reporting() {
        let watched = tempfile::tempdir().unwrap();
        let extra = tempfile::tempdir().unwrap();
        touch(&extra.path().join("old.md"), "old");

        let log = ChangeLog::open_in_memory(&[watched.path().to_path_buf()]).unwrap();
        log.scan().unwrap();
        assert!(log.add_folder(extra.path()).unwrap());
        assert!(!log.add_folder(extra.path()).unwrap());

        assert!(log.scan().unwrap().is_empty());
        touch(&extra.path().join("new.md"), "new");
        assert_eq!(log.scan().unwrap().len(), 1);
    }

    #[test]
    fn test_project_name() {
        let root = Path::new("/home/me/code");
        assert_eq!(project_name(root, Path::new("/home/me/code/kvclaw/src/main.rs")), "kvclaw");
        assert_eq!(project_name(root, Path::new("/home/me/code/notes.md")), "code");
    }

    #[test]
    fn test_parse_git_log() {
        let out = "abc123\x1f2026-03-01T10:00:00+00:00\x1fFix parser | again\n\nbroken line\n";
        let commits = parse_git_log(out);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, "abc123");
        assert_eq!(commits[0].2, "Fix parser | again");
    }

    #[test]
    fn test_report_groups_by_project_and_dedups_commits() {
        let log = ChangeLog::open_in_memory(&[]).unwrap();
        let now = Local.with_ymd_and_hms(2026, 3, 14, 22, 0, 0).unwrap();
        let change = |path: &str, project: &str, action| FileChange {
            path: PathBuf::from(path),
            project: project.to_string(),
            action,
            size: 10,
        };
        log.record_file(&change("/c/api/a.rs", "api", FileAction::Created), now).unwrap();
        log.record_file(&change("/c/api/b.rs", "api", FileAction::Modified), now).unwrap();
        log.record_file(&change("/c/api/b.rs", "api", FileAction::Modified), now).unwrap();
        log.record_file(&change("/c/web/x.ts", "web", FileAction::Modified), now).unwrap();
        // Outside the window.
        log.record_file(
            &change("/c/old/z.rs", "old", FileAction::Modified),
            now - chrono::Duration::days(3),
        )
        .unwrap();

        let commit = |hash: &str| CommitRecord {
            hash: hash.to_string(),
            repo: "api".to_string(),
            message: "Add endpoint".to_string(),
        };
        assert!(log.record_commit(&commit("h1"), now).unwrap());
        assert!(!log.record_commit(&commit("h1"), now).unwrap());
        log.record_commit(&commit("h2"), now).unwrap();

        let text = log.report(1, now).unwrap();
        assert_eq!(
            text,
            "*Personal Changelog - March 14, 2026*\n\n\
             *Files worked on:*\n\n\
             api/\n  Created: a.rs\n  Modified: b.rs\n\n\
             web/\n  Modified: x.ts\n\n\
             Total files touched: 3\n\n\
             *Git commits:*\n- [api] Add endpoint"
        );

        let week = log.report(7, now).unwrap();
        assert!(week.contains("last 7 days"));
        assert!(week.contains("old/"));
    }

    #[test]
    fn test_long_name_lists_are_capped() {
        let names: Vec<String> = (0..7).map(|i| format!("f{i}.rs")).collect();
        assert_eq!(name_list(&names), "f0.rs, f1.rs, f2.rs, f3.rs, f4.rs (+2 more)");
    }
}
