//! Read-only status of the local git repositories.
//!
//! Repositories are discovered under the configured roots. Nothing here
//! fetches, commits or pushes; ahead/behind counts are relative to whatever
//! the upstream ref last recorded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::plugins::{Plugin, PluginError, PluginOutput};
use crate::tools::shell::{run_program, truncate_chars};

const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "target",
    ".cache",
    ".cargo",
    ".rustup",
    ".local",
    ".npm",
    ".nvm",
    "venv",
    ".venv",
];
const MAX_REPLY_CHARS: usize = 3500;

/// Counts parsed from `git status --porcelain`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkingTree {
    pub staged: usize,
    pub modified: usize,
    pub untracked: usize,
}

impl WorkingTree {
    pub fn is_clean(&self) -> bool {
        self.staged == 0 && self.modified == 0 && self.untracked == 0
    }
}

pub fn parse_porcelain(output: &str) -> WorkingTree {
    let mut tree = WorkingTree::default();
    for line in output.lines() {
        let mut chars = line.chars();
        let (Some(index), Some(work)) = (chars.next(), chars.next()) else {
            continue;
        };
        if index == '?' && work == '?' {
            tree.untracked += 1;
            continue;
        }
        if index != ' ' {
            tree.staged += 1;
        }
        if work != ' ' {
            tree.modified += 1;
        }
    }
    tree
}

/// `(ahead, behind)` from `git rev-list --left-right --count HEAD...@{upstream}`.
pub fn parse_ahead_behind(output: &str) -> Option<(u32, u32)> {
    let mut parts = output.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}

/// Find repositories under `root`, at most `max_depth` levels down.
pub fn find_repos(root: &Path, max_depth: usize) -> Vec<PathBuf> {
    let mut repos = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        if dir.join(".git").exists() {
            repos.push(dir.clone());
        }
        if depth >= max_depth {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == ".git" || SKIP_DIRS.contains(&name.as_ref()) {
                continue;
            }
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                stack.push((entry.path(), depth + 1));
            }
        }
    }

    repos.sort();
    repos.dedup();
    repos
}

fn repo_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct GitStatusPlugin {
    roots: Vec<PathBuf>,
    max_depth: usize,
    timeout: Duration,
}

impl GitStatusPlugin {
    pub fn new(roots: Vec<PathBuf>, max_depth: usize) -> Self {
        Self {
            roots,
            max_depth,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn discover(&self) -> Result<Vec<PathBuf>, PluginError> {
        let roots = self.roots.clone();
        let max_depth = self.max_depth;
        let mut repos = tokio::task::spawn_blocking(move || {
            roots
                .iter()
                .flat_map(|root| find_repos(root, max_depth))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| PluginError::ExecutionFailed(e.to_string()))?;
        repos.sort();
        repos.dedup();
        Ok(repos)
    }

    async fn git(&self, repo: &Path, args: &[&str]) -> Option<String> {
        match run_program("git", args, Some(repo), self.timeout).await {
            Ok(out) if out.success() => Some(out.stdout.trim().to_string()),
            Ok(out) => {
                tracing::debug!("git {:?} in {} failed: {}", args, repo.display(), out.stderr.trim());
                None
            }
            Err(e) => {
                tracing::debug!("git {:?} in {} failed: {}", args, repo.display(), e);
                None
            }
        }
    }

    async fn repo_status(&self, repo: &Path) -> String {
        let name = repo_name(repo);
        let Some(porcelain) = self.git(repo, &["status", "--porcelain"]).await else {
            return format!("*{}*: could not read status", name);
        };
        let tree = parse_porcelain(&porcelain);
        let branch = self
            .git(repo, &["branch", "--show-current"])
            .await
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "detached".to_string());

        let mut line = format!("*{}* ({})", name, branch);
        if tree.is_clean() {
            line.push_str(" clean");
        } else {
            line.push_str(&format!(
                " {} staged, {} modified, {} untracked",
                tree.staged, tree.modified, tree.untracked
            ));
        }

        let counts = self
            .git(repo, &["rev-list", "--left-right", "--count", "HEAD...@{upstream}"])
            .await
            .and_then(|o| parse_ahead_behind(&o));
        match counts {
            Some((0, 0)) => {}
            Some((ahead, behind)) => line.push_str(&format!(", {} ahead, {} behind", ahead, behind)),
            None => line.push_str(", no upstream"),
        }

        if let Some(last) = self.git(repo, &["log", "-1", "--format=%ar: %s"]).await {
            if !last.is_empty() {
                line.push_str(&format!("\n  last: {}", last));
            }
        }
        line
    }

    async fn status_report(&self, repos: &[PathBuf]) -> String {
        let mut out = format!("*Git Status* ({} repos)\n\n", repos.len());
        for repo in repos {
            out.push_str(&self.repo_status(repo).await);
            out.push_str("\n\n");
        }
        out
    }

    async fn today_report(&self, repos: &[PathBuf], value: &str) -> String {
        let lowered = value.to_lowercase();
        let targets: Vec<&PathBuf> = {
            let named: Vec<&PathBuf> = repos
                .iter()
                .filter(|r| lowered.contains(&repo_name(r).to_lowercase()))
                .collect();
            if named.is_empty() { repos.iter().collect() } else { named }
        };

        let mut out = String::from("*Changes Today*\n\n");
        let mut any = false;
        for repo in targets {
            let Some(log) = self
                .git(repo, &["log", "--since=midnight", "--oneline", "--stat"])
                .await
            else {
                continue;
            };
            if log.is_empty() {
                continue;
            }
            any = true;
            out.push_str(&format!("*{}*\n{}\n\n", repo_name(repo), log));
        }
        if !any {
            out.push_str("No commits today.");
        }
        out
    }

    fn list_report(repos: &[PathBuf]) -> String {
        let mut out = format!("*Git Repositories* ({})\n\n", repos.len());
        for repo in repos {
            out.push_str(&format!("- {} ({})\n", repo_name(repo), repo.display()));
        }
        out
    }
}

#[async_trait]
impl Plugin for GitStatusPlugin {
    fn name(&self) -> &str {
        "GIT_STATUS"
    }

    fn description(&self) -> &str {
        "Status of local git repositories. VALUE: status, list or today"
    }

    fn triggers(&self) -> &[&str] {
        &[
            "git status",
            "my repos",
            "all repos",
            "show repos",
            "list repos",
            "uncommitted",
            "unpushed",
            "what changed today",
            "changes today",
        ]
    }

    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError> {
        let repos = self.discover().await?;
        if repos.is_empty() {
            return Ok(PluginOutput::text("No git repositories found."));
        }

        let lowered = value.to_lowercase();
        let text = if lowered.contains("today") || lowered.contains("changed") {
            self.today_report(&repos, value).await
        } else if lowered.contains("list") || lowered.contains("show repos") || lowered.contains("my repos") {
            Self::list_report(&repos)
        } else {
            self.status_report(&repos).await
        };
        Ok(PluginOutput::text(truncate_chars(text.trim_end(), MAX_REPLY_CHARS)))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_porcelain() {
        let out = "M  staged.rs\n M modified.rs\nMM both.rs\n?? new.txt\n?? other.txt\n";
        assert_eq!(
            parse_porcelain(out),
            WorkingTree {
                staged: 2,
                modified: 2,
                untracked: 2
            }
        );
        assert!(parse_porcelain("").is_clean());
    }

    #[test]
    fn test_parse_ahead_behind() {
        assert_eq!(parse_ahead_behind("3\t1\n"), Some((3, 1)));
        assert_eq!(parse_ahead_behind("0 0"), Some((0, 0)));
        assert_eq!(parse_ahead_behind("fatal: no upstream"), None);
    }

    #[test]
    fn test_find_repos_respects_depth_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("alpha/.git")).unwrap();
        std::fs::create_dir_all(root.join("work/beta/.git")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/gamma/.git")).unwrap();
        std::fs::create_dir_all(root.join("a/b/c/d/deep/.git")).unwrap();

        let repos = find_repos(root, 3);
        assert_eq!(repos, vec![root.join("alpha"), root.join("work/beta")]);
    }

    #[tokio::test]
    async fn test_no_repos() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = GitStatusPlugin::new(vec![dir.path().to_path_buf()], 2);
        let out = plugin.execute("git status").await.unwrap();
        assert_eq!(out.text, "No git repositories found.");
    }

    #[tokio::test]
    async fn test_list_repos() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("alpha/.git")).unwrap();
        let plugin = GitStatusPlugin::new(vec![dir.path().to_path_buf()], 2);
        let out = plugin.execute("list").await.unwrap();
        assert!(out.text.starts_with("*Git Repositories* (1)"));
        assert!(out.text.contains("- alpha"));
    }
}
