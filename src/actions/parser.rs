/// Extraction of the action list embedded in a free-form model reply.
///
/// Replies are natural language wrapped around a JSON array. The default parser
/// takes the span from the first `[` to the last `]` and decodes it, which
/// tolerates prose on either side. A stray bracket in the surrounding prose
/// widens or narrows that span and turns the reply into `Malformed`; callers
/// then show the raw text instead. Swap the parser if that becomes a problem.
use serde::Deserialize;
use serde_json::Value;

use super::Action;
use crate::error::ParseError;

#[derive(Debug, PartialEq)]
pub enum Extracted {
    /// No bracketed span at all: the reply is a conversational answer
    Commentary,
    Actions(Vec<Action>),
}

pub trait ActionParser {
    fn parse(&self, raw: &str) -> Result<Extracted, ParseError>;
}

/// First-`[` to last-`]` heuristic.
#[derive(Debug, Default, Clone, Copy)]
pub struct BracketScanParser;

impl ActionParser for BracketScanParser {
    fn parse(&self, raw: &str) -> Result<Extracted, ParseError> {
        let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) else {
            return Ok(Extracted::Commentary);
        };
        if end < start {
            return Ok(Extracted::Commentary);
        }

        let span = sanitize_json_strings(&raw[start..=end]);
        let entries: Vec<RawAction> =
            serde_json::from_str(&span).map_err(|e| ParseError::Malformed(e.to_string()))?;

        Ok(Extracted::Actions(
            entries.into_iter().map(RawAction::into_action).collect(),
        ))
    }
}

// ── Wire shape ────────────────────────────────────────────────────────────────

/// One array entry as the model writes it. `move` historically carries its
/// paths in `path`/`content` and `terminal` its command in `content`; both
/// spellings are accepted.
#[derive(Debug, Deserialize)]
struct RawAction {
    action_type: String,
    description: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    source_path: Option<String>,
    #[serde(default)]
    dest_path: Option<String>,
    #[serde(default)]
    command: Option<String>,
}

impl RawAction {
    fn into_action(self) -> Action {
        let content = self.content.as_ref().and_then(value_text);
        let description = self.description;
        match self.action_type.trim().to_lowercase().as_str() {
            "create" => Action::Create {
                path: self.path.unwrap_or_default(),
                content,
                description,
            },
            "edit" => Action::Edit {
                path: self.path.unwrap_or_default(),
                content,
                description,
            },
            "move" => Action::Move {
                source_path: self.source_path.or(self.path).unwrap_or_default(),
                dest_path: self.dest_path.or(content).unwrap_or_default(),
                description,
            },
            "remove" => Action::Remove {
                path: self.path.unwrap_or_default(),
                description,
            },
            "terminal" => Action::Terminal {
                command: self.command.or(content).unwrap_or_default(),
                description,
            },
            _ => Action::Unknown {
                action_type: self.action_type,
                description,
            },
        }
    }
}

/// String content is taken as is; structured content (a model sending a JSON
/// document as an object) is pretty-printed.
fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => serde_json::to_string_pretty(other).ok(),
    }
}

/// Escape raw control characters inside JSON string literals. Models often put
/// literal newlines in `content`, which strict JSON rejects.
fn sanitize_json_strings(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                out.push(ch);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            c if in_string && (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}
