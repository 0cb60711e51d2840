use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Lifecycle events recorded for every pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        kind: String,
        user_name: String,
        product_name: String,
    },
    ChainSelected {
        variant: String,
        steps: Vec<String>,
    },
    StepStarted {
        index: usize,
        step: String,
    },
    StepFinished {
        index: usize,
        step: String,
        outputs: Vec<String>,
        elapsed_ms: u64,
    },
    StepFailed {
        index: usize,
        step: String,
        error_kind: String,
        message: String,
    },
    CatalogUpserted {
        product_id: i64,
        status: String,
    },
    MediaCleaned {
        path: String,
    },
    RunFinished {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Append-only writer for a run's `events.jsonl`.
///
/// Each line is one compact object: the event fields plus `run_id` and `ts`.
/// Clones share the same file lock.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event: &RunEvent) -> anyhow::Result<Value> {
        let mut record = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            other => anyhow::bail!("run event serialized to non-object: {other}"),
        };
        record.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        record.insert("ts".to_string(), Value::String(now_utc_iso()));

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(&record)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .with_context(|| format!("failed to open {}", self.inner.path.display()))?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(record))
    }
}

/// Loads every event of an `events.jsonl` file, skipping blank lines.
pub fn read_events(path: &Path) -> anyhow::Result<Vec<Map<String, Value>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut events = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: Value = serde_json::from_str(line)
            .with_context(|| format!("{}:{} is not valid JSON", path.display(), index + 1))?;
        if let Value::Object(map) = parsed {
            events.push(map);
        }
    }
    Ok(events)
}

pub(crate) fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
