//! WRITE_AND_RUN_CODE: save generated Python and run it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;

use crate::tools::ToolError;
use crate::tools::shell::{run_program, truncate_chars};

const MAX_OUTPUT_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct CodeRun {
    pub path: PathBuf,
    pub code: String,
    pub output: String,
}

impl CodeRun {
    pub fn render(&self) -> String {
        format!(
            "Saved: {}\n\n```python\n{}\n```\n\nOutput:\n```\n{}\n```",
            self.path.display(),
            self.code,
            truncate_chars(&self.output, MAX_OUTPUT_CHARS)
        )
    }
}

#[derive(Debug, Clone)]
pub struct CodeRunner {
    dir: PathBuf,
    interpreter: String,
    timeout: Duration,
}

impl CodeRunner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            interpreter: "python3".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn run(&self, raw: &str) -> Result<CodeRun, ToolError> {
        let code = strip_fences(raw);
        if code.trim().is_empty() {
            return Err(ToolError::InvalidParameters("no code to run".to_string()));
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let filename = format!("generated_{}.py", Local::now().format("%Y%m%d_%H%M%S_%3f"));
        let path = self.dir.join(filename);
        tokio::fs::write(&path, &code).await?;
        tracing::info!("Running generated code at {}", path.display());

        let path_arg = path.to_string_lossy().into_owned();
        let output = run_program(&self.interpreter, &[&path_arg], Some(&self.dir), self.timeout).await?;

        Ok(CodeRun {
            path,
            code,
            output: output.text().to_string(),
        })
    }
}

/// Drop a surrounding markdown code fence, if any.
fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Skip the language tag line.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```python\nprint(1)\n```"), "print(1)");
        assert_eq!(strip_fences("print(2)"), "print(2)");
        assert_eq!(strip_fences("```\nx = 1\ny = 2\n```\n"), "x = 1\ny = 2");
    }

    #[tokio::test]
    async fn test_empty_code_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = CodeRunner::new(dir.path()).run("```python\n```").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_runs_with_interpreter() {
        let dir = tempfile::tempdir().unwrap();
        // `cat` stands in for the interpreter so the test needs no Python.
        let run = CodeRunner::new(dir.path())
            .with_interpreter("cat")
            .run("print('hi')")
            .await
            .unwrap();

        assert!(run.path.starts_with(dir.path()));
        assert_eq!(run.output, "print('hi')");
        assert!(run.render().starts_with("Saved: "));
    }
}
