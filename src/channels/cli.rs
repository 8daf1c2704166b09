//! Interactive terminal channel.
//!
//! Lines are read with rustyline on a dedicated thread; replies are printed
//! to stdout. The prompt waits for the reply to the previous line, so output
//! and prompt do not interleave.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use async_trait::async_trait;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

const PROMPT: &str = "you> ";
const QUIT_WORDS: &[&str] = &["/quit", "/exit", "exit", "quit"];
/// Longest the prompt waits for a reply before showing again.
const REPLY_WAIT: Duration = Duration::from_secs(180);

pub struct CliChannel {
    user_id: String,
    agent_name: String,
    history_path: Option<PathBuf>,
    /// Signals the reader thread that a reply has been printed.
    reply_done: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CliChannel {
    pub fn new(user_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            agent_name: agent_name.into(),
            history_path: None,
            reply_done: Mutex::new(None),
        }
    }

    /// Persist line history to this file.
    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_path = Some(path.into());
        self
    }

    fn print(&self, response: &OutgoingResponse) {
        println!("\n{}> {}", self.agent_name, response.content);
        if let Some(file) = response.file() {
            println!("   [file: {}]", file);
        }
        println!();
    }
}

fn is_quit(line: &str) -> bool {
    QUIT_WORDS.contains(&line.trim().to_lowercase().as_str())
}

fn read_loop(
    user_id: String,
    history_path: Option<PathBuf>,
    tx: mpsc::Sender<IncomingMessage>,
    reply_done: std_mpsc::Receiver<()>,
) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            tracing::error!("Failed to open terminal: {}", e);
            return;
        }
    };
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if is_quit(line) {
                    break;
                }
                let _ = editor.add_history_entry(line);
                if tx
                    .blocking_send(IncomingMessage::new("cli", &user_id, line))
                    .is_err()
                {
                    break;
                }
                let _ = reply_done.recv_timeout(REPLY_WAIT);
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!("Terminal read failed: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        if let Err(e) = editor.save_history(path) {
            tracing::debug!("Could not save history: {}", e);
        }
    }
    tracing::debug!("CLI reader finished");
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let (done_tx, done_rx) = std_mpsc::channel();
        *self.reply_done.lock().unwrap_or_else(|e| e.into_inner()) = Some(done_tx);

        let user_id = self.user_id.clone();
        let history_path = self.history_path.clone();
        std::thread::Builder::new()
            .name("kvclaw-cli".to_string())
            .spawn(move || read_loop(user_id, history_path, tx, done_rx))
            .map_err(|e| ChannelError::StartupFailed {
                name: "cli".to_string(),
                reason: e.to_string(),
            })?;

        println!("{} ready. Type /quit to leave.\n", self.agent_name);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.print(&response);
        if let Some(done) = self
            .reply_done
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            let _ = done.send(());
        }
        Ok(())
    }

    async fn broadcast(
        &self,
        _user_id: &str,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.print(&response);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_words() {
        assert!(is_quit("/quit"));
        assert!(is_quit("  EXIT "));
        assert!(!is_quit("quit smoking tips"));
    }

    #[test]
    fn test_file_attachment_from_metadata() {
        let mut response = OutgoingResponse::text("done");
        assert_eq!(response.file(), None);
        response.metadata = serde_json::json!({ "file": "/tmp/x.py" });
        assert_eq!(response.file(), Some("/tmp/x.py"));
    }
}
