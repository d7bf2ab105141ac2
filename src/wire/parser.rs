//! Pure parser turning raw stream-json lines into response chunks.
//!
//! Parsing never fails the stream: a malformed line or an unrecognized
//! discriminator becomes a single explanatory text chunk so nothing is
//! silently dropped.

use std::path::Path;

use crate::wire::chunk::{ResponseChunk, TodoItem, ToolResultDetail};
use crate::wire::message::{ContentItem, StreamMessage};

/// Maximum length of a shell command shown in a tool-use summary.
const COMMAND_SUMMARY_LEN: usize = 40;

/// Parse one raw line into its ordered chunks.
///
/// Empty and whitespace-only lines produce nothing. Completion, error and
/// cost handling for `result` lines happens in the session layer, which
/// inspects the same raw line; this function only emits content chunks.
#[must_use]
pub fn parse_line(line: &str) -> Vec<ResponseChunk> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let message: StreamMessage = match serde_json::from_str(trimmed) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%error, "Unparseable stream line");
            return vec![bug_report_chunk(trimmed)];
        }
    };

    match message.message_type.as_str() {
        "system" => {
            tracing::debug!(
                subtype = message.subtype.as_deref().unwrap_or(""),
                session_id = message.session_id.as_deref().unwrap_or(""),
                "System line"
            );
            Vec::new()
        }
        "assistant" => parse_assistant(&message),
        "user" => parse_user(&message),
        "result" => {
            tracing::debug!(
                subtype = message.subtype.as_deref().unwrap_or(""),
                "Result line"
            );
            Vec::new()
        }
        other => {
            tracing::warn!(discriminator = other, "Unrecognized stream line type");
            vec![bug_report_chunk(trimmed)]
        }
    }
}

fn bug_report_chunk(line: &str) -> ResponseChunk {
    let preview: String = line.chars().take(120).collect();
    ResponseChunk::text(format!(
        "[Received an unrecognized message from the agent; please file a bug. Line began: {preview}]"
    ))
}

fn parse_assistant(message: &StreamMessage) -> Vec<ResponseChunk> {
    let Some(body) = &message.message else {
        return Vec::new();
    };

    let mut chunks = Vec::new();
    for item in &body.content {
        match item.item_type.as_str() {
            "text" => {
                if let Some(text) = &item.text {
                    if !text.is_empty() {
                        chunks.push(ResponseChunk::Text { text: text.clone() });
                    }
                }
            }
            "tool_use" => chunks.push(tool_use_chunk(item)),
            _ => {}
        }
    }
    chunks
}

fn tool_use_chunk(item: &ContentItem) -> ResponseChunk {
    let name = item.name.clone().unwrap_or_default();
    let id = item.id.clone().unwrap_or_default();
    let input = item.input.as_ref();

    if name == "TodoWrite" {
        if let Some(items) = input.and_then(parse_todos) {
            return ResponseChunk::TodoUpdate { items };
        }
        // Structured parse failed; fall through to the generic summary.
    }

    ResponseChunk::ToolUse {
        summary: input.map(|input| summarize_input(&name, input)).unwrap_or_default(),
        name,
        id,
    }
}

fn parse_todos(input: &serde_json::Value) -> Option<Vec<TodoItem>> {
    let todos = input.get("todos")?;
    serde_json::from_value(todos.clone()).ok()
}

/// Short summary of a tool input, per-tool extraction table.
///
/// File tools show the basename, shell commands are truncated, search tools
/// show the pattern, and anything unlisted falls back to the first string
/// field in the input object.
#[must_use]
pub fn summarize_input(tool: &str, input: &serde_json::Value) -> String {
    match tool {
        "Read" | "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => input
            .get("file_path")
            .and_then(serde_json::Value::as_str)
            .map(basename)
            .unwrap_or_default(),
        "Bash" => input
            .get("command")
            .and_then(serde_json::Value::as_str)
            .map(truncate_command)
            .unwrap_or_default(),
        "Grep" | "Glob" => input
            .get("pattern")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
        "WebFetch" => input
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => first_string_field(input),
    }
}

fn basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned())
}

fn truncate_command(command: &str) -> String {
    if command.chars().count() <= COMMAND_SUMMARY_LEN {
        return command.to_string();
    }
    let head: String = command.chars().take(COMMAND_SUMMARY_LEN).collect();
    format!("{head}...")
}

fn first_string_field(input: &serde_json::Value) -> String {
    if let serde_json::Value::Object(map) = input {
        for value in map.values() {
            if let serde_json::Value::String(s) = value {
                return s.clone();
            }
        }
    }
    String::new()
}

fn parse_user(message: &StreamMessage) -> Vec<ResponseChunk> {
    let Some(body) = &message.message else {
        return Vec::new();
    };

    let mut chunks = Vec::new();
    for item in &body.content {
        if !item.is_tool_result() {
            continue;
        }
        let detail = message.tool_use_result.as_ref().and_then(extract_detail);
        chunks.push(ResponseChunk::ToolResult {
            tool_use_id: item.tool_use_reference().unwrap_or_default().to_string(),
            detail,
        });
    }
    chunks
}

/// Pull structured counters out of a top-level `tool_use_result` value.
fn extract_detail(value: &serde_json::Value) -> Option<ToolResultDetail> {
    let object = value.as_object()?;

    let u64_field = |keys: &[&str]| {
        keys.iter()
            .find_map(|key| object.get(*key).and_then(serde_json::Value::as_u64))
    };

    let detail = ToolResultDetail {
        file_lines: object
            .get("file")
            .and_then(|f| f.get("numLines"))
            .and_then(serde_json::Value::as_u64)
            .or_else(|| u64_field(&["numLines"])),
        edit_applied: object
            .get("structuredPatch")
            .map(|_| true)
            .or_else(|| object.get("applied").and_then(serde_json::Value::as_bool)),
        match_count: u64_field(&["numMatches", "matchCount"]),
        file_count: u64_field(&["numFiles", "fileCount"]),
        exit_code: object
            .get("exitCode")
            .or_else(|| object.get("exit_code"))
            .and_then(serde_json::Value::as_i64),
    };

    if detail.is_empty() {
        None
    } else {
        Some(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::chunk::TodoStatus;
    use serde_json::json;

    #[test]
    fn empty_and_whitespace_lines_yield_nothing() {
        assert!(parse_line("").is_empty());
        assert!(parse_line("   \t ").is_empty());
    }

    #[test]
    fn assistant_text_yields_one_text_chunk() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello there"}]}}"#;
        let chunks = parse_line(line);

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], ResponseChunk::text("Hello there"));
    }

    #[test]
    fn assistant_empty_text_yields_nothing() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":""}]}}"#;
        assert!(parse_line(line).is_empty());
    }

    #[test]
    fn malformed_json_yields_bug_report() {
        let chunks = parse_line("{not json");
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            ResponseChunk::Text { text } => assert!(text.contains("file a bug")),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn missing_discriminator_yields_bug_report() {
        let chunks = parse_line(r#"{"foo":"bar"}"#);
        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            ResponseChunk::Text { text } => assert!(text.contains("file a bug")),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn system_and_result_lines_yield_no_chunks() {
        assert!(parse_line(r#"{"type":"system","subtype":"init","session_id":"s1"}"#).is_empty());
        assert!(parse_line(r#"{"type":"result","subtype":"success"}"#).is_empty());
    }

    #[test]
    fn tool_use_read_summarizes_basename() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_1","name":"Read","input":{"file_path":"/home/user/project/src/main.rs"}}]}}"#;
        let chunks = parse_line(line);

        assert_eq!(
            chunks[0],
            ResponseChunk::ToolUse {
                name: "Read".to_string(),
                summary: "main.rs".to_string(),
                id: "tu_1".to_string(),
            }
        );
    }

    #[test]
    fn tool_use_bash_truncates_command() {
        let command = "cargo test --workspace --all-features -- --nocapture";
        let input = json!({ "command": command });
        let summary = summarize_input("Bash", &input);

        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), COMMAND_SUMMARY_LEN + 3);
    }

    #[test]
    fn unlisted_tool_uses_first_string_field() {
        let input = json!({ "count": 3, "query": "find usages" });
        assert_eq!(summarize_input("MysteryTool", &input), "find usages");
    }

    #[test]
    fn todo_write_parses_structured_update() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_2","name":"TodoWrite","input":{"todos":[{"content":"a","status":"completed","activeForm":"Doing a"},{"content":"b","status":"in_progress","activeForm":"Doing b"},{"content":"c","status":"pending","activeForm":"Doing c"}]}}]}}"#;
        let chunks = parse_line(line);

        assert_eq!(chunks.len(), 1);
        match &chunks[0] {
            ResponseChunk::TodoUpdate { items } => {
                assert_eq!(items.len(), 3);
                assert_eq!(items[0].status, TodoStatus::Completed);
                assert_eq!(items[1].status, TodoStatus::InProgress);
                assert_eq!(items[2].status, TodoStatus::Pending);
                assert_eq!(items[2].content, "c");
            }
            other => panic!("expected TodoUpdate, got {other:?}"),
        }
    }

    #[test]
    fn todo_write_falls_back_to_tool_use_on_bad_shape() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_3","name":"TodoWrite","input":{"todos":[{"content":"a","status":"not-a-status"}]}}]}}"#;
        let chunks = parse_line(line);

        assert!(matches!(chunks[0], ResponseChunk::ToolUse { .. }));
    }

    #[test]
    fn user_tool_result_with_detail() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_9"}]},"tool_use_result":{"file":{"numLines":42}}}"#;
        let chunks = parse_line(line);

        assert_eq!(
            chunks[0],
            ResponseChunk::ToolResult {
                tool_use_id: "tu_9".to_string(),
                detail: Some(ToolResultDetail {
                    file_lines: Some(42),
                    ..Default::default()
                }),
            }
        );
    }

    #[test]
    fn user_tool_result_legacy_spelling() {
        let line = r#"{"type":"user","message":{"content":[{"toolUseID":"tu_old"}]}}"#;
        let chunks = parse_line(line);

        assert_eq!(
            chunks[0],
            ResponseChunk::ToolResult {
                tool_use_id: "tu_old".to_string(),
                detail: None,
            }
        );
    }

    #[test]
    fn user_shell_exit_code_detail() {
        let line = r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_sh"}]},"tool_use_result":{"exitCode":1}}"#;
        let chunks = parse_line(line);

        match &chunks[0] {
            ResponseChunk::ToolResult { detail, .. } => {
                assert_eq!(detail.as_ref().unwrap().exit_code, Some(1));
            }
            other => panic!("expected ToolResult, got {other:?}"),
        }
    }
}
