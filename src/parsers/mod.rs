//! Message Parsers (§4.4): pure `line -> Message | skip | fail` functions,
//! one per provider wire format. No direct teacher grounding — the reference
//! Claude integration drives a tmux pane rather than parsing JSON lines —
//! built from the wire-format rules in SPEC_FULL.md.

pub mod claude;
pub mod gemini;

use crate::error::ParseError;
use crate::models::MessageKind;
use serde_json::Value;

/// The shape both parsers produce before the Message Store assigns an id,
/// sequence number and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub kind: MessageKind,
    pub role: Option<String>,
    pub content: String,
    pub metadata: Option<Value>,
    pub raw: String,
}

/// Result of feeding one line through a parser.
pub type ParseOutcome = Result<Option<ParsedLine>, ParseError>;
