use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::EventSink;

#[derive(Debug, Serialize)]
struct FeedEvent<'a> {
    ts: String,
    source: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    payload: HaltPayload<'a>,
}

#[derive(Debug, Serialize)]
struct HaltPayload<'a> {
    services: &'a [String],
}

/// Append-only activity feed at `<town>/.events.jsonl`.
#[derive(Debug, Clone)]
pub struct FeedLog {
    path: PathBuf,
}

impl FeedLog {
    pub fn new(town_root: &Path) -> Self {
        Self {
            path: town_root.join(".events.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for FeedLog {
    fn record_halt(&self, units: &[String]) -> Result<()> {
        let event = FeedEvent {
            ts: Utc::now().to_rfc3339(),
            source: "gt",
            kind: "halt",
            payload: HaltPayload { services: units },
        };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_json_line_per_halt() {
        let dir = tempfile::tempdir().unwrap();
        let feed = FeedLog::new(dir.path());

        feed.record_halt(&["mayor".to_string(), "daemon".to_string()])
            .unwrap();
        feed.record_halt(&[]).unwrap();

        let content = std::fs::read_to_string(feed.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "halt");
        assert_eq!(first["source"], "gt");
        assert_eq!(first["payload"]["services"][1], "daemon");
    }
}
