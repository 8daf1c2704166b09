//! Sort the files of a folder into category subfolders.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;

use crate::plugins::{Plugin, PluginError, PluginOutput};
use crate::tools::expand_home;

const CATEGORIES: &[(&str, &[&str])] = &[
    ("Images", &["jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "bmp", "tiff"]),
    (
        "Documents",
        &["pdf", "doc", "docx", "txt", "md", "odt", "rtf", "xlsx", "xls", "csv", "ppt", "pptx", "epub"],
    ),
    ("Videos", &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "3gp"]),
    ("Audio", &["mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", "opus"]),
    ("Archives", &["zip", "tar", "gz", "rar", "7z", "bz2", "xz", "tgz"]),
    (
        "Code",
        &[
            "py", "js", "ts", "html", "css", "java", "c", "cpp", "h", "sh", "json", "yaml", "yml",
            "xml", "sql", "php", "rb", "go", "rs",
        ],
    ),
    ("Installers", &["deb", "rpm", "appimage", "exe", "msi", "dmg", "snap"]),
    ("Fonts", &["ttf", "otf", "woff", "woff2"]),
];

const SHORTCUTS: &[(&str, &str)] = &[
    ("downloads", "~/Downloads"),
    ("desktop", "~/Desktop"),
    ("documents", "~/Documents"),
    ("pictures", "~/Pictures"),
    ("videos", "~/Videos"),
    ("music", "~/Music"),
];

/// Wording that asks how to organize rather than asking for it to be done.
const ADVICE_MARKERS: &[&str] = &[
    "tips",
    "advice",
    "how should",
    "how do",
    "how can",
    "how would",
    "best way",
    "ideas",
    "suggest",
];
const POLITE_OPENERS: &[&str] = &["can you", "could you", "would you", "will you", "please"];
const QUESTION_WORDS: &[&str] = &[
    "how", "what", "why", "when", "which", "should", "is", "are", "do", "does", "any",
];

/// True when a message asks for a folder to be organized now, as opposed to
/// asking about organizing.
fn is_request(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if ADVICE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return false;
    }
    if POLITE_OPENERS.iter().any(|p| lowered.starts_with(p)) {
        return true;
    }
    let first = lowered
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    !QUESTION_WORDS.contains(&first) && !lowered.ends_with('?')
}

/// Category folder for a file name.
pub fn category_for(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    let Some(ext) = ext else {
        return "Other";
    };
    CATEGORIES
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(name, _)| *name)
        .unwrap_or("Other")
}

/// Work out which folder the user means.
///
/// Accepts a path, a well-known folder name ("downloads"), or a sentence
/// containing either. A single bare word is taken as a relative path.
fn resolve_folder(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    if let Some(token) = value
        .split_whitespace()
        .find(|t| t.starts_with('/') || t.starts_with('~'))
    {
        return Some(expand_home(token.trim_end_matches(['?', '!', ',', '.'])));
    }

    let lowered = value.to_lowercase();
    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        for (name, path) in SHORTCUTS {
            if word == *name || word.strip_suffix('s') == Some(name) || Some(word) == name.strip_suffix('s') {
                return Some(expand_home(path));
            }
        }
    }

    if !value.is_empty() && !value.contains(char::is_whitespace) {
        return Some(PathBuf::from(value));
    }
    None
}

pub struct OrganizerPlugin;

#[derive(Debug, Default)]
struct Summary {
    moved: BTreeMap<&'static str, usize>,
    skipped_hidden: usize,
    errors: Vec<String>,
}

async fn organize(folder: &Path) -> Result<Summary, PluginError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();

    let mut summary = Summary::default();
    for name in files {
        if name.starts_with('.') {
            summary.skipped_hidden += 1;
            continue;
        }
        let category = category_for(&name);
        match move_into(folder, &name, category).await {
            Ok(()) => *summary.moved.entry(category).or_default() += 1,
            Err(e) => summary.errors.push(format!("{}: {}", name, e)),
        }
    }
    Ok(summary)
}

async fn move_into(folder: &Path, name: &str, category: &str) -> std::io::Result<()> {
    let dest_dir = folder.join(category);
    tokio::fs::create_dir_all(&dest_dir).await?;

    let mut dest = dest_dir.join(name);
    if dest.exists() {
        let path = Path::new(name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
        let suffix = Local::now().format("%H%M%S");
        dest = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => dest_dir.join(format!("{stem}_{suffix}.{ext}")),
            None => dest_dir.join(format!("{stem}_{suffix}")),
        };
    }
    tokio::fs::rename(folder.join(name), dest).await
}

fn render(folder: &Path, summary: &Summary) -> String {
    let total: usize = summary.moved.values().sum();
    let mut out = format!(
        "*Folder Organized: {}*\n\nTotal files processed: {}\n\n",
        folder.display(),
        total
    );
    if !summary.moved.is_empty() {
        out.push_str("*Files sorted into:*\n");
        for (category, count) in &summary.moved {
            out.push_str(&format!("- {}/: {} files\n", category, count));
        }
    }
    if summary.skipped_hidden > 0 {
        out.push_str(&format!("\nSkipped {} hidden files", summary.skipped_hidden));
    }
    if !summary.errors.is_empty() {
        out.push_str(&format!("\n\nErrors ({}):\n", summary.errors.len()));
        for e in summary.errors.iter().take(5) {
            out.push_str(&format!("- {}\n", e));
        }
    }
    out
}

#[async_trait]
impl Plugin for OrganizerPlugin {
    fn name(&self) -> &str {
        "ORGANIZE_FOLDER"
    }

    fn description(&self) -> &str {
        "Organize a folder by sorting its files into subfolders by type. VALUE is the folder"
    }

    fn triggers(&self) -> &[&str] {
        &[
            "organize my",
            "organise my",
            "organize the",
            "organize folder",
            "organize downloads",
            "organize desktop",
            "sort files in",
            "sort my files",
            "sort downloads",
            "sort my downloads",
            "tidy up my",
            "clean up my downloads",
            "clean up my desktop",
        ]
    }

    /// Files get moved, so only direct requests that name a folder qualify.
    fn accepts(&self, raw: &str) -> bool {
        is_request(raw) && resolve_folder(raw).is_some()
    }

    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError> {
        let Some(folder) = resolve_folder(value) else {
            return Err(PluginError::InvalidInput(
                "which folder? Name a path or one of downloads, desktop, documents".to_string(),
            ));
        };
        if !folder.exists() {
            return Err(PluginError::InvalidInput(format!(
                "Folder not found: {}",
                folder.display()
            )));
        }
        if !folder.is_dir() {
            return Err(PluginError::InvalidInput(format!(
                "That is not a folder: {}",
                folder.display()
            )));
        }

        tracing::info!("Organizing {}", folder.display());
        let summary = organize(&folder).await?;
        if summary.moved.is_empty() && summary.errors.is_empty() && summary.skipped_hidden == 0 {
            return Ok(PluginOutput::text(format!("No files found in {}", folder.display())));
        }
        Ok(PluginOutput::text(render(&folder, &summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(category_for("photo.JPG"), "Images");
        assert_eq!(category_for("main.rs"), "Code");
        assert_eq!(category_for("backup.tar.gz"), "Archives");
        assert_eq!(category_for("README"), "Other");
        assert_eq!(category_for("weird.xyz"), "Other");
    }

    #[test]
    fn test_resolve_folder_shortcuts() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(resolve_folder("organize my downloads"), Some(home.join("Downloads")));
        assert_eq!(resolve_folder("Desktop"), Some(home.join("Desktop")));
        assert_eq!(resolve_folder("sort /tmp/inbox please"), Some(PathBuf::from("/tmp/inbox")));
        assert_eq!(resolve_folder("organize /tmp/inbox?"), Some(PathBuf::from("/tmp/inbox")));
        assert_eq!(resolve_folder("organize my stuff please"), None);
    }

    #[test]
    fn test_requests_versus_questions() {
        assert!(is_request("organize my downloads"));
        assert!(is_request("Can you organize my downloads?"));
        assert!(is_request("please tidy up my desktop"));
        assert!(!is_request("Any tips on how I should organize my downloads folder?"));
        assert!(!is_request("What's the best way to organize my desktop"));
        assert!(!is_request("should I organize my documents by year?"));
    }

    #[test]
    fn test_accepts_only_actionable_messages() {
        assert!(OrganizerPlugin.accepts("organize my downloads folder"));
        assert!(!OrganizerPlugin.accepts("Any tips on how I should organize my downloads folder?"));
        assert!(!OrganizerPlugin.accepts("organize my life"));
    }

    #[tokio::test]
    async fn test_advice_question_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), "x").unwrap();
        let registry = crate::plugins::PluginRegistry::from_plugins([
            std::sync::Arc::new(OrganizerPlugin) as std::sync::Arc<dyn Plugin>,
        ])
        .unwrap();

        let question = format!("any tips on how to organize my {} folder?", dir.path().display());
        assert!(registry.lookup(crate::plugins::Lookup::Text(&question)).is_none());

        let request = format!("organize my folder {}", dir.path().display());
        let plugin = registry.lookup(crate::plugins::Lookup::Text(&request)).unwrap();
        plugin.execute(&request).await.unwrap();
        assert!(dir.path().join("Images/a.png").exists());
    }

    #[tokio::test]
    async fn test_organize_moves_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.png", "b.pdf", "c.rs", "d.unknown", ".hidden"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let out = OrganizerPlugin
            .execute(dir.path().to_str().unwrap())
            .await
            .unwrap();

        assert!(dir.path().join("Images/a.png").exists());
        assert!(dir.path().join("Documents/b.pdf").exists());
        assert!(dir.path().join("Code/c.rs").exists());
        assert!(dir.path().join("Other/d.unknown").exists());
        assert!(dir.path().join(".hidden").exists());
        assert!(out.text.contains("Total files processed: 4"));
        assert!(out.text.contains("Skipped 1 hidden files"));
    }

    #[tokio::test]
    async fn test_duplicate_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("Images")).unwrap();
        std::fs::write(dir.path().join("Images/a.png"), "old").unwrap();
        std::fs::write(dir.path().join("a.png"), "new").unwrap();

        OrganizerPlugin
            .execute(dir.path().to_str().unwrap())
            .await
            .unwrap();

        let count = std::fs::read_dir(dir.path().join("Images")).unwrap().count();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_missing_folder() {
        let err = OrganizerPlugin.execute("/no/such/folder").await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidInput(_)));
    }
}
