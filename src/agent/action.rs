//! The line-oriented action protocol.
//!
//! A provider reply is expected to look like:
//!
//! ```text
//! ACTION: RUN_COMMAND
//! VALUE: ls -la
//! ```
//!
//! Lines after `VALUE:` that are not themselves markers belong to the value,
//! which lets a model send multi-line code. Anything that does not follow the
//! protocol is treated as plain conversation.

use serde::{Deserialize, Serialize};

/// Action used when a reply carries no usable action.
pub const CHAT: &str = "CHAT";

const ACTION_MARKER: &str = "ACTION:";
const VALUE_MARKER: &str = "VALUE:";

/// A parsed reply: what to do, and with what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    pub value: String,
}

impl Decision {
    pub fn new(action: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            value: value.into(),
        }
    }

    pub fn chat(text: impl Into<String>) -> Self {
        Self::new(CHAT, text)
    }
}

/// Parse a provider reply. Never fails.
///
/// Markers are matched at column 0 and are case-sensitive. When a marker
/// repeats, the last one wins; a repeated `VALUE:` also drops any lines
/// collected for the earlier one.
pub fn parse_reply(reply: &str) -> Decision {
    let mut action: Option<&str> = None;
    let mut value: Option<Vec<&str>> = None;

    for line in reply.lines() {
        if let Some(rest) = line.strip_prefix(ACTION_MARKER) {
            action = Some(rest.trim());
        } else if let Some(rest) = line.strip_prefix(VALUE_MARKER) {
            value = Some(vec![rest.trim()]);
        } else if let Some(lines) = value.as_mut() {
            lines.push(line);
        }
    }

    match action {
        Some(name) if !name.is_empty() => Decision::new(
            name,
            value.map(|lines| lines.join("\n")).unwrap_or_default(),
        ),
        _ => Decision::chat(reply),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_plain_text_is_chat() {
        let reply = "Sure, the capital of France is Paris.";
        assert_eq!(parse_reply(reply), Decision::chat(reply));
    }

    #[test]
    fn test_action_and_value() {
        let d = parse_reply("ACTION: GET_STATS\nVALUE: now");
        assert_eq!(d, Decision::new("GET_STATS", "now"));
    }

    #[test]
    fn test_continuation_lines_collected() {
        let reply = "ACTION: WRITE_AND_RUN_CODE\nVALUE: import os\nprint(os.getcwd())\n\nprint('done')";
        let d = parse_reply(reply);
        assert_eq!(d.action, "WRITE_AND_RUN_CODE");
        assert_eq!(d.value, "import os\nprint(os.getcwd())\n\nprint('done')");
    }

    #[test]
    fn test_action_without_value_is_empty() {
        assert_eq!(parse_reply("ACTION: BOT_STATUS"), Decision::new("BOT_STATUS", ""));
    }

    #[test]
    fn test_value_without_action_is_chat() {
        let reply = "VALUE: just text";
        assert_eq!(parse_reply(reply), Decision::chat(reply));
    }

    #[test]
    fn test_empty_action_is_chat() {
        let reply = "ACTION:   \nVALUE: hi";
        assert_eq!(parse_reply(reply), Decision::chat(reply));
    }

    #[test]
    fn test_last_marker_wins() {
        let reply = "ACTION: CHAT\nVALUE: first\nmore\nACTION: WEB_SEARCH\nVALUE: rust async";
        assert_eq!(parse_reply(reply), Decision::new("WEB_SEARCH", "rust async"));
    }

    #[test]
    fn test_markers_are_case_sensitive_and_anchored() {
        let reply = "action: RUN_COMMAND\n  ACTION: RUN_COMMAND\nvalue: ls";
        assert_eq!(parse_reply(reply), Decision::chat(reply));
    }

    #[test]
    fn test_unknown_action_passes_through() {
        assert_eq!(
            parse_reply("ACTION: LAUNCH_ROCKET\nVALUE: moon"),
            Decision::new("LAUNCH_ROCKET", "moon")
        );
    }

    #[test]
    fn test_text_before_markers_ignored() {
        let d = parse_reply("Let me check.\nACTION: GET_PROCESSES\nVALUE:");
        assert_eq!(d, Decision::new("GET_PROCESSES", ""));
    }

    #[test]
    fn test_m_continuation_lines() {
        for m in 0..5 {
            let extra: Vec<String> = (0..m).map(|i| format!("line {i}")).collect();
            let mut reply = String::from("ACTION: X\nVALUE: Y");
            for line in &extra {
                reply.push('\n');
                reply.push_str(line);
            }
            let mut expected = vec!["Y".to_string()];
            expected.extend(extra);
            assert_eq!(parse_reply(&reply), Decision::new("X", expected.join("\n")));
        }
    }
}
