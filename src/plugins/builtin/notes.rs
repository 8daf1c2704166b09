//! Personal notes kept in a markdown file.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Local;
use tokio::io::AsyncWriteExt;

use crate::plugins::{Plugin, PluginError, PluginOutput};

/// Leading phrases that mean "save what follows". Longest first.
const SAVE_PREFIXES: &[&str] = &[
    "remember this:",
    "remember this ",
    "write down:",
    "write down ",
    "save note:",
    "save note ",
    "add note:",
    "add note ",
    "note:",
    "note ",
    "write ",
];
/// A whole request that means "show".
const SHOW_WORDS: &[&str] = &["show", "list", "all", "notes", "read"];
/// Phrases anywhere in a request that mean "show".
const SHOW_PHRASES: &[&str] = &[
    "show notes",
    "show my notes",
    "show me my notes",
    "list notes",
    "list my notes",
    "read my notes",
    "my notes",
    "all notes",
];
const MAX_DISPLAY_CHARS: usize = 3000;

pub struct NotesPlugin {
    path: PathBuf,
}

impl NotesPlugin {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn show(&self) -> Result<PluginOutput, PluginError> {
        if !self.path.exists() {
            return Ok(PluginOutput::text(
                "📝 No notes yet. Say 'note: something' to add one.",
            ));
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        let shown = crate::tools::shell::truncate_chars(content.trim(), MAX_DISPLAY_CHARS);
        Ok(PluginOutput::text(format!("📝 *Your Notes:*\n\n{}", shown)))
    }

    async fn append(&self, text: &str) -> Result<PluginOutput, PluginError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let entry = format!("\n## {}\n{}\n", Local::now().format("%Y-%m-%d %H:%M"), text);
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!("Saved note to {}", self.path.display());
        Ok(PluginOutput::text(format!("📝 Note saved: {}", text)))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Intent<'a> {
    Show,
    Save(&'a str),
}

/// Text after a leading save phrase, if the request starts with one.
fn strip_save_prefix(value: &str) -> Option<&str> {
    let text = value.trim();
    SAVE_PREFIXES.iter().find_map(|prefix| {
        let head = text.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix).then(|| text[prefix.len()..].trim())
    })
}

/// A save phrase at the start always wins; otherwise a show phrase anywhere
/// asks for the list, and anything else is saved as-is.
fn intent(value: &str) -> Intent<'_> {
    if let Some(text) = strip_save_prefix(value) {
        return Intent::Save(text);
    }
    let lowered = value.trim().to_lowercase();
    let bare = lowered.trim_end_matches(|c: char| c.is_ascii_punctuation());
    if SHOW_WORDS.contains(&bare) || SHOW_PHRASES.iter().any(|p| lowered.contains(p)) {
        Intent::Show
    } else {
        Intent::Save(value.trim())
    }
}

#[async_trait]
impl Plugin for NotesPlugin {
    fn name(&self) -> &str {
        "NOTES"
    }

    fn description(&self) -> &str {
        "Save and retrieve personal notes"
    }

    fn triggers(&self) -> &[&str] {
        &[
            "note:",
            "add note",
            "save note",
            "write down",
            "remember this",
            "show notes",
            "my notes",
        ]
    }

    async fn execute(&self, value: &str) -> Result<PluginOutput, PluginError> {
        match intent(value) {
            Intent::Show => self.show().await,
            Intent::Save("") => Err(PluginError::InvalidInput("nothing to note".to_string())),
            Intent::Save(text) => self.append(text).await,
        }
    }
}
