//! Stream event classification.
//!
//! Both transports produce JSON events in slightly different dialects.
//! Classification trusts an explicit `type`/`event` field when present;
//! otherwise it sniffs for the well-known text-bearing keys, looking one
//! level into nested objects and arrays. An `error` key at the top level
//! always wins.

use serde_json::Value;

/// One classified event from a transcription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental partial-text update
    Delta(String),
    /// Final-text completion signal
    Done(String),
    /// Service-reported error
    Error(String),
    /// Recognized but irrelevant, or unrecognized
    Ignore,
}

/// Keys that carry transcript text, in preference order.
const TEXT_KEYS: [&str; 3] = ["delta", "text", "transcript"];

/// Classify one decoded JSON event.
pub fn parse_stream_event(value: &Value) -> StreamEvent {
    if let Some(error) = value.get("error") {
        return StreamEvent::Error(describe_error(error));
    }

    if let Some(kind) = value
        .get("type")
        .or_else(|| value.get("event"))
        .and_then(Value::as_str)
    {
        if kind.contains("error") {
            return StreamEvent::Error(describe_error(value));
        }
        if kind.contains("delta") {
            return StreamEvent::Delta(find_text(value).unwrap_or_default());
        }
        if kind.contains("done") || kind.contains("completed") {
            return StreamEvent::Done(find_text(value).unwrap_or_default());
        }
        // A typed event we don't care about (session acks, buffer acks).
        return StreamEvent::Ignore;
    }

    // Untyped payload: best-effort key sniffing.
    match find_text(value) {
        Some(text) if !text.is_empty() => StreamEvent::Delta(text),
        _ => StreamEvent::Ignore,
    }
}

/// Find transcript text at the top level or one level down.
fn find_text(value: &Value) -> Option<String> {
    for key in TEXT_KEYS {
        if let Some(text) = value.get(key).and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }

    // One level of nesting: objects and arrays of objects.
    if let Some(object) = value.as_object() {
        for nested in object.values() {
            match nested {
                Value::Object(_) => {
                    for key in TEXT_KEYS {
                        if let Some(text) = nested.get(key).and_then(Value::as_str) {
                            return Some(text.to_string());
                        }
                    }
                }
                Value::Array(items) => {
                    for item in items {
                        for key in TEXT_KEYS {
                            if let Some(text) = item.get(key).and_then(Value::as_str) {
                                return Some(text.to_string());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    None
}

fn describe_error(value: &Value) -> String {
    value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_delta() {
        let event = json!({"type": "transcript.text.delta", "delta": "hel"});
        assert_eq!(parse_stream_event(&event), StreamEvent::Delta("hel".into()));
    }

    #[test]
    fn test_typed_done_with_text() {
        let event = json!({"type": "transcript.text.done", "text": "hello world"});
        assert_eq!(
            parse_stream_event(&event),
            StreamEvent::Done("hello world".into())
        );
    }

    #[test]
    fn test_typed_completed_with_transcript() {
        let event = json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "transcript": "hello"
        });
        assert_eq!(parse_stream_event(&event), StreamEvent::Done("hello".into()));
    }

    #[test]
    fn test_error_key_takes_precedence() {
        let event = json!({
            "type": "transcript.text.delta",
            "delta": "hel",
            "error": {"message": "rate limited"}
        });
        assert_eq!(
            parse_stream_event(&event),
            StreamEvent::Error("rate limited".into())
        );
    }

    #[test]
    fn test_typed_error() {
        let event = json!({"type": "invalid_request_error", "message": "bad model"});
        assert_eq!(
            parse_stream_event(&event),
            StreamEvent::Error("bad model".into())
        );
    }

    #[test]
    fn test_untyped_text_sniffed_as_delta() {
        let event = json!({"text": "partial"});
        assert_eq!(
            parse_stream_event(&event),
            StreamEvent::Delta("partial".into())
        );
    }

    #[test]
    fn test_nested_object_sniffed() {
        let event = json!({"result": {"transcript": "deep"}});
        assert_eq!(parse_stream_event(&event), StreamEvent::Delta("deep".into()));
    }

    #[test]
    fn test_nested_array_sniffed() {
        let event = json!({"segments": [{"text": "first"}, {"text": "second"}]});
        assert_eq!(
            parse_stream_event(&event),
            StreamEvent::Delta("first".into())
        );
    }

    #[test]
    fn test_typed_event_ignores_nested_noise() {
        // Explicit type is authoritative; an ack carrying unrelated nested
        // text keys must not be promoted to a delta.
        let event = json!({"type": "session.updated", "session": {"prompt": "x"}});
        assert_eq!(parse_stream_event(&event), StreamEvent::Ignore);
    }

    #[test]
    fn test_unknown_is_ignored() {
        assert_eq!(parse_stream_event(&json!({"ping": 1})), StreamEvent::Ignore);
        assert_eq!(parse_stream_event(&json!(42)), StreamEvent::Ignore);
    }
}
