use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::events::now_utc_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub elapsed_ms: u64,
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub kind: String,
    /// Absent when the run failed before a chain was chosen.
    pub variant: Option<String>,
    pub status: RunStatus,
    pub started_at: String,
    pub finished_at: String,
    pub steps: Vec<StepRecord>,
    pub artifact: Option<String>,
    pub error: Option<String>,
}

/// Writes `summary.json`. `extra` keys are merged last and may override.
pub fn write_summary(
    path: &Path,
    summary: &RunSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(map) => map,
        other => anyhow::bail!("run summary serialized to non-object: {other}"),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn read_summary(path: &Path) -> anyhow::Result<RunSummary> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::*;

    fn sample() -> RunSummary {
        RunSummary {
            run_id: "run-123".to_string(),
            kind: "full_promotion".to_string(),
            variant: Some("with_image".to_string()),
            status: RunStatus::Failed,
            started_at: "2026-02-19T00:00:00+00:00".to_string(),
            finished_at: "2026-02-19T00:10:00+00:00".to_string(),
            steps: vec![StepRecord {
                step: "summarize".to_string(),
                elapsed_ms: 40,
                ok: true,
            }],
            artifact: None,
            error: Some("video generation timed out after 900.0s".to_string()),
        }
    }

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("summary.json");

        let mut extra = Map::new();
        extra.insert("catalog".to_string(), json!({"product_id": 7}));
        write_summary(&path, &sample(), Some(&extra))?;

        let payload: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(payload["status"], "failed");
        assert_eq!(payload["variant"], "with_image");
        assert_eq!(payload["steps"][0]["step"], "summarize");
        assert_eq!(payload["catalog"]["product_id"], 7);
        assert!(payload["ts"].is_string());
        Ok(())
    }

    #[test]
    fn summary_reads_back_ignoring_extra_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");
        let mut extra = Map::new();
        extra.insert("note".to_string(), json!("ignored"));
        write_summary(&path, &sample(), Some(&extra))?;

        assert_eq!(read_summary(&path)?, sample());
        Ok(())
    }
}
