//! Event files: JSON lines where each line is one batch.

use serde_json::Value;
use std::path::Path;

use crate::error::Error;
use turnstream_core::app::domain::StreamEvent;

/// Parse event-file text. A line holding an array is one batch; a line holding
/// an object is a batch of one. Blank lines and `#` comments are skipped.
pub fn parse_batches(text: &str) -> Result<Vec<Vec<StreamEvent>>, Error> {
    let mut batches = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| Error::Script {
            line: index + 1,
            message: e.to_string(),
        })?;
        let batch = match value {
            Value::Array(items) => items.into_iter().map(StreamEvent::from_value).collect(),
            Value::Object(_) => vec![StreamEvent::from_value(value)],
            other => {
                return Err(Error::Script {
                    line: index + 1,
                    message: format!("expected an event object or array, found {other}"),
                });
            }
        };
        batches.push(batch);
    }
    Ok(batches)
}

pub fn load_batches(path: &Path) -> Result<Vec<Vec<StreamEvent>>, Error> {
    let text = std::fs::read_to_string(path)?;
    parse_batches(&text)
}

/// Flatten and re-slice into batches of `size` events.
pub fn rebatch(batches: Vec<Vec<StreamEvent>>, size: usize) -> Vec<Vec<StreamEvent>> {
    let events: Vec<StreamEvent> = batches.into_iter().flatten().collect();
    events.chunks(size.max(1)).map(<[StreamEvent]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
# greeting
{"event_type": "partial_delta", "payload": {"chunk": {"id": "c1", "choices": [{"index": 0, "delta": {"content": "Hi"}}]}}}
[{"event_type": "session_local_patch", "payload": {"x": 1}}, {"event_type": "terminal"}]
"#;

    #[test]
    fn objects_and_arrays_become_batches() {
        let batches = parse_batches(SCRIPT).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].len(), 2);
        assert!(batches[1][1].is_terminal());
    }

    #[test]
    fn reports_the_offending_line() {
        let err = parse_batches("{\"event_type\": \"terminal\"}\nnot json\n").unwrap_err();
        assert!(matches!(err, Error::Script { line: 2, .. }));

        let err = parse_batches("42").unwrap_err();
        assert!(matches!(err, Error::Script { line: 1, .. }));
    }

    #[test]
    fn rebatch_preserves_order() {
        let batches = parse_batches(SCRIPT).unwrap();
        let resliced = rebatch(batches, 2);
        assert_eq!(resliced.len(), 2);
        assert_eq!(resliced[0].len(), 2);
        assert!(resliced[1][0].is_terminal());
    }
}
