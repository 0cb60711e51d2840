use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use reqwest::blocking::Response as HttpResponse;
use serde_json::{json, Value};

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Like [`response_json_or_error`] but keeps JSON error bodies, which carry
/// the API's own `ok`/`description` fields.
pub(crate) fn response_json_any_status(provider: &str, response: HttpResponse) -> Result<Value> {
    let code = response.status().as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    serde_json::from_str(&body).with_context(|| {
        format!(
            "{provider} returned a non-JSON payload ({code}): {}",
            truncate_text(&body, 512)
        )
    })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

pub(crate) fn image_part_from_path(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok(json!({
        "inlineData": {
            "mimeType": mime_for_path(path),
            "data": BASE64.encode(bytes),
        }
    }))
}

/// `<prefix>_<utc stamp>_<prompt snippet>.<ext>`, safe for any filesystem.
pub(crate) fn media_file_name(prefix: &str, prompt: &str, ext: &str) -> String {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let snippet: String = prompt
        .chars()
        .take(24)
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect();
    let snippet = if snippet.is_empty() {
        prefix.to_string()
    } else {
        snippet
    };
    format!("{prefix}_{stamp}_{snippet}.{ext}")
}
