//! Wire types for the Claude CLI `--output-format stream-json` protocol.
//!
//! One JSON object per line. Only the fields the agent client consumes are
//! modelled; unknown event and content kinds must not break parsing.

use serde::Deserialize;
use serde_json::Value;

use crate::util::truncate_str;

/// Events from the Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: Option<String>,
    },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        total_cost_usd: Option<f64>,
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        num_turns: Option<u32>,
    },

    #[serde(rename = "system")]
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// Extract a human-readable description from a tool use event
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let field = |key: &str| input.get(key).and_then(|v| v.as_str());
    match name {
        "Read" => format!(
            "Reading: {}",
            field("file_path")
                .map(shorten_path)
                .unwrap_or_else(|| "file".into())
        ),
        "Write" => format!(
            "Creating: {}",
            field("file_path")
                .map(shorten_path)
                .unwrap_or_else(|| "file".into())
        ),
        "Edit" | "MultiEdit" => format!(
            "Editing: {}",
            field("file_path")
                .map(shorten_path)
                .unwrap_or_else(|| "file".into())
        ),
        "Bash" => format!(
            "Running: {}",
            field("command")
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "command".to_string())
        ),
        "Glob" => format!("Searching: {}", field("pattern").unwrap_or("*")),
        "Grep" => format!(
            "Grep: {}",
            field("pattern")
                .map(|s| truncate_str(s, 30))
                .unwrap_or_else(|| "pattern".to_string())
        ),
        "Task" => format!("Agent: {}", field("description").unwrap_or("subagent")),
        _ => name.to_string(),
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// Truncate thinking text to a reasonable snippet
pub fn truncate_thinking(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    truncate_str(first_line.trim(), max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_task_call_for_researcher() {
        let line = r#"{"type":"assistant","session_id":"m00-research","message":{"id":"msg_1","content":[{"type":"tool_use","id":"tu_1","name":"Task","input":{"description":"survey http crates","subagent_type":"researcher"}}]}}"#;
        let StreamEvent::Assistant {
            message,
            session_id,
        } = serde_json::from_str(line).unwrap()
        else {
            panic!("expected assistant event");
        };
        assert_eq!(session_id.as_deref(), Some("m00-research"));
        let ContentBlock::ToolUse { name, input } = &message.content[0] else {
            panic!("expected tool use");
        };
        assert_eq!(
            describe_tool_use(name, input),
            "Agent: survey http crates"
        );
    }

    #[test]
    fn test_parse_unknown_content_block_is_tolerated() {
        let json = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hmm"},{"type":"text","text":"Hello"}]}}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        let StreamEvent::Assistant { message, .. } = event else {
            panic!("Expected Assistant event");
        };
        assert!(matches!(message.content[0], ContentBlock::Other));
        assert!(matches!(&message.content[1], ContentBlock::Text { text } if text == "Hello"));
    }

    #[test]
    fn test_parse_result_with_usage_fields() {
        let json = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":4200,"num_turns":7,"result":"All done","session_id":"sess-1","total_cost_usd":0.125}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        match event {
            StreamEvent::Result {
                subtype,
                result,
                is_error,
                session_id,
                total_cost_usd,
                duration_ms,
                num_turns,
            } => {
                assert_eq!(subtype, "success");
                assert_eq!(result.as_deref(), Some("All done"));
                assert!(!is_error);
                assert_eq!(session_id.as_deref(), Some("sess-1"));
                assert_eq!(total_cost_usd, Some(0.125));
                assert_eq!(duration_ms, Some(4200));
                assert_eq!(num_turns, Some(7));
            }
            other => panic!("Expected Result, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_system_init() {
        let json = r#"{"type":"system","subtype":"init","session_id":"s-9","tools":["Read"]}"#;
        let event: StreamEvent = serde_json::from_str(json).unwrap();
        assert!(
            matches!(event, StreamEvent::System { session_id: Some(ref id), .. } if id == "s-9")
        );
    }

    #[test]
    fn test_tool_descriptions_shorten_artifact_paths() {
        let write = serde_json::json!({"file_path": "/work/app/.waypoint/milestones/01/plan.md"});
        assert_eq!(describe_tool_use("Write", &write), "Creating: 01/plan.md");
        assert_eq!(describe_tool_use("Edit", &serde_json::json!({})), "Editing: file");
        assert_eq!(
            describe_tool_use("WebSearch", &serde_json::json!({"query": "x"})),
            "WebSearch"
        );
    }

    #[test]
    fn test_truncate_thinking_uses_first_line() {
        assert_eq!(truncate_thinking("  first line  \nsecond", 60), "first line");
    }
}
