//! Newline-delimited JSON record output.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;

use tap::{Payload, Record, RecordSink, SinkError, StreamName};

/// One output line.
#[derive(Debug, Serialize)]
struct RecordMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    stream: &'a StreamName,
    record: &'a Payload,
}

/// Writes one `{"type":"RECORD","stream":..,"record":..}` line per record,
/// flushed before `emit` returns.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send> RecordSink for JsonLinesSink<W> {
    async fn emit(&self, record: &Record) -> Result<(), SinkError> {
        let message = RecordMessage {
            kind: "RECORD",
            stream: record.stream(),
            record: record.fields(),
        };
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[tokio::test]
    async fn each_record_is_one_line() {
        let sink = JsonLinesSink::new(Vec::new());
        for id in [1, 2] {
            let fields = json!({"id": id, "repo": "widget"}).as_object().cloned().unwrap();
            let record = Record::finalize(StreamName::new("issues").unwrap(), fields, None);
            sink.emit(&record).await.unwrap();
        }

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            json!({"type": "RECORD", "stream": "issues", "record": {"id": 1, "repo": "widget"}})
        );
    }
}
