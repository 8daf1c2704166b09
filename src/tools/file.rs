//! Read-only file access for FILE_READ and FILE_LIST.

use std::path::Path;

use crate::tools::{ToolError, expand_home};

/// Lines shown by [`read_head`].
pub const PREVIEW_LINES: usize = 50;

const MAX_LISTING_CHARS: usize = 3000;

/// First [`PREVIEW_LINES`] lines of a text file, fenced.
pub async fn read_head(raw_path: &str) -> Result<String, ToolError> {
    let raw_path = raw_path.trim();
    let path = expand_home(raw_path);
    if !path.exists() {
        return Err(ToolError::NotFound(format!("File not found: {}", raw_path)));
    }

    let bytes = tokio::fs::read(&path).await?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();

    let mut out = format!(
        "*{}*\n```\n{}\n```",
        raw_path,
        lines.iter().take(PREVIEW_LINES).copied().collect::<Vec<_>>().join("\n")
    );
    if lines.len() > PREVIEW_LINES {
        out.push_str(&format!("\n\n...{} more lines", lines.len() - PREVIEW_LINES));
    }
    Ok(out)
}

/// Directory listing, directories first, each group sorted.
pub async fn list_dir(raw_path: &str) -> Result<String, ToolError> {
    let raw_path = raw_path.trim();
    let raw_path = if raw_path.is_empty() { "~" } else { raw_path };
    let path = expand_home(raw_path);
    if !path.is_dir() {
        return Err(ToolError::NotFound(format!("Directory not found: {}", raw_path)));
    }

    let (dirs, files) = scan(&path).await?;
    let entries: Vec<String> = dirs
        .into_iter()
        .map(|d| format!("[DIR] {}", d))
        .chain(files.into_iter().map(|f| format!("[FILE] {}", f)))
        .collect();

    let listing = entries.join("\n");
    let listing = crate::tools::shell::truncate_chars(&listing, MAX_LISTING_CHARS);
    Ok(format!("*{}*\n\n{}", raw_path, listing))
}

async fn scan(path: &Path) -> Result<(Vec<String>, Vec<String>), ToolError> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            dirs.push(name);
        } else if file_type.is_file() {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();
    Ok((dirs, files))
}
