// Server-Sent Events framing and document patching for the REST relay.
//
// Chunks arrive at arbitrary byte boundaries, so the decoder buffers bytes
// until it has a full line. An event is dispatched on a blank line.

use serde::Deserialize;
use serde_json::{Map, Value};

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `"message"` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed a chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_ref(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }

        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".into()),
            data,
        })
    }
}

// ── Document updates ─────────────────────────────────────────────────

/// Payload of a `put` or `patch` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct StreamUpdate {
    pub path: String,
    #[serde(default)]
    pub data: Value,
}

/// Replace the node at `path` (relative to `root`) with `data`. A `null`
/// removes the node.
pub(crate) fn apply_put(root: &mut Value, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *root = data;
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry((*segment).to_owned())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }

    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if data.is_null() {
            map.remove(*last);
        } else {
            map.insert((*last).to_owned(), data);
        }
    }
}

/// Merge each child of `data` into the node at `path`.
pub(crate) fn apply_patch(root: &mut Value, path: &str, data: Value) {
    let Value::Object(children) = data else {
        apply_put(root, path, data);
        return;
    };
    let base = path.trim_end_matches('/');
    for (key, value) in children {
        apply_put(root, &format!("{base}/{key}"), value);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"event: put\ndata: {\"path\":").is_empty());
        let events = decoder.push(b"\"/\",\"data\":1}\n\n: comment\nevent: keep-alive\ndata: null\n\n");

        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "put".into(),
                    data: r#"{"path":"/","data":1}"#.into(),
                },
                SseEvent {
                    event: "keep-alive".into(),
                    data: "null".into(),
                },
            ]
        );
    }

    #[test]
    fn handles_crlf_line_endings() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"event: cancel\r\ndata: null\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "cancel");
    }

    #[test]
    fn put_at_root_replaces_document() {
        let mut doc = json!({"old": true});
        apply_put(&mut doc, "/", json!({"soilHumidity": 40}));
        assert_eq!(doc, json!({"soilHumidity": 40}));
    }

    #[test]
    fn put_at_child_creates_intermediate_nodes() {
        let mut doc = Value::Null;
        apply_put(&mut doc, "/sensors/soil", json!(12));
        assert_eq!(doc, json!({"sensors": {"soil": 12}}));

        apply_put(&mut doc, "/sensors/soil", Value::Null);
        assert_eq!(doc, json!({"sensors": {}}));
    }

    #[test]
    fn patch_merges_children() {
        let mut doc = json!({"soilHumidity": 40, "motion": false});
        apply_patch(&mut doc, "/", json!({"motion": true, "temperature": 21.5}));
        assert_eq!(
            doc,
            json!({"soilHumidity": 40, "motion": true, "temperature": 21.5})
        );
    }
}
