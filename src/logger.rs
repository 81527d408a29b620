use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    Full,
    /// First status per system in full, then only changed paths.
    Diffed,
}

/// NDJSON trace of traffic with the cloud API.
pub struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_status: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn open(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_status: HashMap::new(),
        })
    }

    /// Bodies are never written here; auth requests carry credentials.
    pub fn log_request(&mut self, method: &str, path: &str, status: Option<u16>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "status": status,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, serial: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "serial": serial,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_status(&mut self, serial: &str, body: &Value) {
        let entry = match (self.mode, self.previous_status.get(serial)) {
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "status",
                "serial": serial,
                "body": body,
            }),
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "status",
                "serial": serial,
                "full": true,
                "body": body,
            }),
            (MessageLogMode::Diffed, Some(prev)) => {
                let mut changes = Vec::new();
                diff_json(prev, body, "", &mut changes);
                let change_entries: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "status",
                    "serial": serial,
                    "changes": change_entries,
                })
            }
        };
        self.write_line(&entry);
        if self.mode == MessageLogMode::Diffed {
            self.previous_status.insert(serial.to_string(), body.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
