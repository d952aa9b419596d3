use serde::{Deserialize, Serialize};
use tracing::debug;

/// Abstract image reference produced by the LLM. Only `id` is required;
/// hints sharpen the catalogue search when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ImageRef {
    /// Search string handed to the catalogue resolver.
    pub fn query(&self) -> String {
        let mut parts = vec![self.id.as_str()];
        if let Some(title) = &self.title {
            parts.push(title);
        }
        if let Some(category) = &self.category {
            parts.push(category);
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TimelineAction {
    #[serde(rename = "PRELOAD_IMAGE")]
    PreloadImage(ImageRef),
}

/// A planned visual at a non-negative offset from the instant speech
/// playback begins on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub time_offset_ms: u64,
    pub action: TimelineAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredReply {
    pub speech_response: String,
    #[serde(default)]
    pub timeline_events: Vec<TimelineEvent>,
    #[serde(default)]
    pub end_chat: bool,
}

/// The LLM reply is a sum of "well-formed structured reply" and "plain
/// prose". The parser never guesses on partial structures: either every
/// field parses or the whole reply degrades to prose with an empty timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Structured(StructuredReply),
    Degraded { text: String },
}

impl Reply {
    /// Parse a raw model reply, stripping any fenced-code decoration first.
    pub fn parse(raw: &str) -> Self {
        let stripped = strip_code_fences(raw);
        match serde_json::from_str::<StructuredReply>(stripped) {
            Ok(reply) => Reply::Structured(reply),
            Err(e) => {
                debug!(error = %e, "structured parse failed, degrading to prose");
                Reply::Degraded {
                    text: raw.trim().to_string(),
                }
            }
        }
    }

    pub fn speech(&self) -> &str {
        match self {
            Reply::Structured(r) => &r.speech_response,
            Reply::Degraded { text } => text,
        }
    }

    pub fn timeline(&self) -> &[TimelineEvent] {
        match self {
            Reply::Structured(r) => &r.timeline_events,
            Reply::Degraded { .. } => &[],
        }
    }

    pub fn end_chat(&self) -> bool {
        match self {
            Reply::Structured(r) => r.end_chat,
            Reply::Degraded { .. } => false,
        }
    }
}

/// Drop a surrounding markdown code fence (with or without an info string).
/// Bare JSON passes through untouched.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str =
        r#"{"speech_response":"Hi","timeline_events":[],"end_chat":true}"#;

    #[test]
    fn fenced_and_bare_json_parse_identically() {
        let fenced = format!("```json\n{BARE}\n```");
        assert_eq!(Reply::parse(&fenced), Reply::parse(BARE));
        assert!(Reply::parse(BARE).end_chat());
    }

    #[test]
    fn fence_without_info_string_also_parses() {
        let fenced = format!("```\n{BARE}\n```");
        let reply = Reply::parse(&fenced);
        assert_eq!(reply.speech(), "Hi");
    }

    #[test]
    fn timeline_event_wire_shape() {
        let raw = r#"{
            "speech_response": "The Parthenon crowns the Acropolis.",
            "timeline_events": [
                {"time_offset_ms": 2000,
                 "action": {"type": "PRELOAD_IMAGE", "payload": {"id": "parthenon"}}}
            ],
            "end_chat": false
        }"#;
        let reply = Reply::parse(raw);
        let events = reply.timeline();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].time_offset_ms, 2000);
        let TimelineAction::PreloadImage(image) = &events[0].action;
        assert_eq!(image.id, "parthenon");
    }

    #[test]
    fn prose_degrades_with_empty_timeline() {
        let reply = Reply::parse("Sorry, let me think about that.");
        assert_eq!(reply.speech(), "Sorry, let me think about that.");
        assert!(reply.timeline().is_empty());
        assert!(!reply.end_chat());
    }

    #[test]
    fn partial_structure_degrades_entirely() {
        // Well-formed JSON but missing the required speech field.
        let reply = Reply::parse(r#"{"timeline_events": [], "end_chat": true}"#);
        assert!(matches!(reply, Reply::Degraded { .. }));
        assert!(!reply.end_chat());
    }

    #[test]
    fn negative_offset_degrades() {
        let raw = r#"{"speech_response":"x","timeline_events":
            [{"time_offset_ms": -5, "action": {"type":"PRELOAD_IMAGE","payload":{"id":"a"}}}]}"#;
        assert!(matches!(Reply::parse(raw), Reply::Degraded { .. }));
    }

    #[test]
    fn image_ref_query_joins_hints() {
        let r = ImageRef {
            id: "parthenon".into(),
            title: Some("The Parthenon".into()),
            category: Some("temples".into()),
        };
        assert_eq!(r.query(), "parthenon The Parthenon temples");
    }
}
