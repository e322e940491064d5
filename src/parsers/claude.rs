//! Claude-family line parser (§4.4).

use super::{ParseOutcome, ParsedLine};
use crate::error::ParseError;
use crate::models::MessageKind;
use serde_json::{Map, Value};

/// Parse one line of Claude-family `stream-json`/`json` output.
pub fn parse_line(raw: &str) -> ParseOutcome {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| ParseError::InvalidJson("top-level frame is not an object".to_string()))?;

    let frame_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("type"))?;

    match frame_type {
        "stream_event" => parse_stream_event(obj, raw),
        "result" => parse_result(obj, raw),
        "system" => parse_system(obj, raw),
        "assistant" | "user" => parse_message_frame(obj, raw),
        _ => parse_fallback(obj, raw),
    }
}

fn parse_stream_event(obj: &Map<String, Value>, raw: &str) -> ParseOutcome {
    let event = obj
        .get("event")
        .and_then(Value::as_object)
        .ok_or(ParseError::MissingField("event"))?;
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("event.type"))?;

    match event_type {
        "message_start" | "content_block_start" | "content_block_stop" | "message_stop" => {
            Ok(None)
        }
        "content_block_delta" => {
            let delta = event.get("delta").and_then(Value::as_object);
            let is_text_delta = delta
                .and_then(|d| d.get("type"))
                .and_then(Value::as_str)
                == Some("text_delta");
            if !is_text_delta {
                return Ok(None);
            }
            let text = delta
                .and_then(|d| d.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            Ok(Some(ParsedLine {
                kind: MessageKind::Assistant,
                role: Some("assistant".to_string()),
                content: text,
                metadata: None,
                raw: raw.to_string(),
            }))
        }
        "message_delta" => {
            let mut metadata = Map::new();
            if let Some(delta) = event.get("delta") {
                metadata.insert("delta".to_string(), delta.clone());
            }
            if let Some(usage) = event.get("usage") {
                metadata.insert("usage".to_string(), usage.clone());
            }
            Ok(Some(ParsedLine {
                kind: MessageKind::System,
                role: None,
                content: String::new(),
                metadata: Some(Value::Object(metadata)),
                raw: raw.to_string(),
            }))
        }
        _ => Ok(None),
    }
}

fn parse_result(obj: &Map<String, Value>, raw: &str) -> ParseOutcome {
    let content = obj
        .get("result")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let metadata = collect_unknown_fields(obj, &["type", "result"]);
    Ok(Some(ParsedLine {
        kind: MessageKind::Response,
        role: None,
        content,
        metadata,
        raw: raw.to_string(),
    }))
}

fn parse_system(obj: &Map<String, Value>, raw: &str) -> ParseOutcome {
    let content = obj
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let metadata = collect_unknown_fields(obj, &["type", "content"]);
    Ok(Some(ParsedLine {
        kind: MessageKind::System,
        role: Some("result".to_string()).filter(|_| {
            obj.get("subtype").and_then(Value::as_str) == Some("result")
        }),
        content,
        metadata,
        raw: raw.to_string(),
    }))
}

fn parse_fallback(obj: &Map<String, Value>, raw: &str) -> ParseOutcome {
    let has_content = obj.contains_key("content");
    let has_stats = obj.contains_key("stats");
    if !has_content && !has_stats {
        return Err(ParseError::MissingField("content"));
    }
    let content = obj
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let metadata = collect_unknown_fields(obj, &["type", "content"]);
    Ok(Some(ParsedLine {
        kind: MessageKind::System,
        role: None,
        content,
        metadata,
        raw: raw.to_string(),
    }))
}

fn parse_message_frame(obj: &Map<String, Value>, raw: &str) -> ParseOutcome {
    let message = obj
        .get("message")
        .and_then(Value::as_object)
        .ok_or(ParseError::MissingField("message"))?;
    let blocks = message
        .get("content")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut text_parts = Vec::new();
    let mut tool_use_blocks = Vec::new();
    let mut has_tool_result = false;

    for block in &blocks {
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
        match block_type {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    text_parts.push(text.to_string());
                }
            }
            "tool_use" => {
                text_parts.push(render_tool_use(block));
                tool_use_blocks.push(block.clone());
            }
            "tool_result" => {
                has_tool_result = true;
                text_parts.push(render_tool_result(block));
            }
            _ => {}
        }
    }

    let kind = if !tool_use_blocks.is_empty() {
        MessageKind::Tool
    } else if has_tool_result {
        MessageKind::User
    } else {
        MessageKind::Assistant
    };

    let mut metadata = Map::new();
    if !tool_use_blocks.is_empty() {
        metadata.insert("tool_use".to_string(), Value::Array(tool_use_blocks));
    }

    Ok(Some(ParsedLine {
        kind,
        role: message
            .get("role")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
        content: text_parts.join("\n"),
        metadata: if metadata.is_empty() {
            None
        } else {
            Some(Value::Object(metadata))
        },
        raw: raw.to_string(),
    }))
}

fn render_tool_use(block: &Value) -> String {
    let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
    let input = block.get("input").cloned().unwrap_or(Value::Null);

    let body = match name {
        "Bash" => input
            .get("command")
            .and_then(Value::as_str)
            .map(|c| format!("$ {c}")),
        "Read" => input
            .get("file_path")
            .and_then(Value::as_str)
            .map(|p| format!("read {p}")),
        "Write" => input
            .get("file_path")
            .and_then(Value::as_str)
            .map(|p| format!("write {p}")),
        "Edit" => input
            .get("file_path")
            .and_then(Value::as_str)
            .map(|p| format!("edit {p}")),
        "Grep" => input
            .get("pattern")
            .and_then(Value::as_str)
            .map(|p| format!("search for \"{p}\"")),
        "Glob" => input
            .get("pattern")
            .and_then(Value::as_str)
            .map(|p| format!("glob {p}")),
        "Task" => input
            .get("description")
            .and_then(Value::as_str)
            .map(|d| format!("spawn task: {d}")),
        "TodoWrite" => Some("update todo list".to_string()),
        _ => None,
    }
    .unwrap_or_else(|| input.to_string());

    format!("[{name}] {body}")
}

fn render_tool_result(block: &Value) -> String {
    let is_error = block
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let indicator = if is_error { "✗" } else { "✓" };
    let content = match block.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    format!("{indicator} {content}")
}

fn collect_unknown_fields(obj: &Map<String, Value>, known: &[&str]) -> Option<Value> {
    let mut metadata = Map::new();
    for (key, value) in obj {
        if !known.contains(&key.as_str()) {
            metadata.insert(key.clone(), value.clone());
        }
    }
    if metadata.is_empty() {
        None
    } else {
        Some(Value::Object(metadata))
    }
}

/// Both coexisting definitions of "complete" for a Claude-family message
/// (Open Question #1 in SPEC_FULL.md §9 — exposed rather than collapsed).
pub struct ClaudeCompletion;

impl ClaudeCompletion {
    pub fn is_terminal_system(parsed: &ParsedLine) -> bool {
        if parsed.kind != MessageKind::System {
            return false;
        }
        if parsed.role.as_deref() == Some("result") {
            return true;
        }
        parsed
            .metadata
            .as_ref()
            .and_then(|m| m.get("subtype"))
            .and_then(Value::as_str)
            .map(|s| s == "success" || s == "error")
            .unwrap_or(false)
    }

    pub fn is_response(parsed: &ParsedLine) -> bool {
        parsed.kind == MessageKind::Response
    }

    pub fn is_complete(parsed: &ParsedLine) -> bool {
        Self::is_terminal_system(parsed) || Self::is_response(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_fails() {
        let result = parse_line("not json");
        assert!(matches!(result, Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn missing_type_fails() {
        let result = parse_line(r#"{"content":"hi"}"#);
        assert!(matches!(result, Err(ParseError::MissingField("type"))));
    }

    #[test]
    fn system_init_without_content_is_valid_and_empty() {
        let line = r#"{"type":"system","subtype":"init","session_id":"s1","model":"m"}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        assert_eq!(parsed.kind, MessageKind::System);
        assert_eq!(parsed.content, "");
        assert_eq!(
            parsed.metadata.unwrap().get("subtype").unwrap(),
            "init"
        );
    }

    #[test]
    fn stream_event_lifecycle_frames_are_skipped() {
        for event_type in [
            "message_start",
            "content_block_start",
            "content_block_stop",
            "message_stop",
        ] {
            let line = format!(r#"{{"type":"stream_event","event":{{"type":"{event_type}"}}}}"#);
            assert_eq!(parse_line(&line).unwrap(), None);
        }
    }

    #[test]
    fn text_delta_yields_assistant_message() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        assert_eq!(parsed.kind, MessageKind::Assistant);
        assert_eq!(parsed.content, "hi");
    }

    #[test]
    fn result_frame_normalizes_to_response() {
        let line = r#"{"type":"result","subtype":"success","result":"done"}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        assert_eq!(parsed.kind, MessageKind::Response);
        assert_eq!(parsed.content, "done");
        assert!(ClaudeCompletion::is_complete(&parsed));
    }

    #[test]
    fn tool_use_block_sets_kind_tool_and_stashes_raw_blocks() {
        let line = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","name":"Bash","input":{"command":"ls"}}]}}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        assert_eq!(parsed.kind, MessageKind::Tool);
        assert!(parsed.content.contains("[Bash]"));
        assert!(parsed.metadata.unwrap().get("tool_use").is_some());
    }

    #[test]
    fn tool_result_only_sets_kind_user() {
        let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","content":"ok","is_error":false}]}}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        assert_eq!(parsed.kind, MessageKind::User);
        assert!(parsed.content.starts_with('✓'));
    }

    #[test]
    fn plain_text_yields_assistant_message() {
        let line = r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hello"}]}}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        assert_eq!(parsed.kind, MessageKind::Assistant);
        assert_eq!(parsed.content, "hello");
    }
}
