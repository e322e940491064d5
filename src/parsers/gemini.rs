//! Gemini-family line parser (§4.4). Simpler than the Claude-family parser:
//! non-JSON lines are treated as stray stderr noise rather than failures.

use super::{ParseOutcome, ParsedLine};
use crate::models::MessageKind;
use serde_json::Value;

pub fn parse_line(raw: &str) -> ParseOutcome {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    let obj = match value.as_object() {
        Some(o) => o,
        None => return Ok(None),
    };

    let frame_type = obj.get("type").and_then(Value::as_str).unwrap_or("");
    if frame_type == "init" || frame_type == "result" {
        return Ok(None);
    }
    if frame_type != "message" {
        return Ok(None);
    }

    let role = match obj.get("role").and_then(Value::as_str) {
        Some(r) => r,
        None => return Ok(None),
    };
    let content = match obj.get("content").and_then(Value::as_str) {
        Some(c) => c,
        None => return Ok(None),
    };

    let kind = MessageKind::parse(role).unwrap_or(MessageKind::Assistant);
    Ok(Some(ParsedLine {
        kind,
        role: Some(role.to_string()),
        content: content.to_string(),
        metadata: None,
        raw: raw.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_lines_are_skipped_not_failed() {
        assert_eq!(parse_line("warning: deprecated flag").unwrap(), None);
    }

    #[test]
    fn init_and_result_frames_are_skipped() {
        assert_eq!(parse_line(r#"{"type":"init"}"#).unwrap(), None);
        assert_eq!(parse_line(r#"{"type":"result"}"#).unwrap(), None);
    }

    #[test]
    fn message_frame_with_role_and_content_is_emitted() {
        let parsed = parse_line(r#"{"type":"message","role":"assistant","content":"hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.kind, MessageKind::Assistant);
        assert_eq!(parsed.content, "hi");
    }

    #[test]
    fn message_frame_missing_content_is_skipped() {
        let parsed = parse_line(r#"{"type":"message","role":"assistant"}"#).unwrap();
        assert_eq!(parsed, None);
    }
}
