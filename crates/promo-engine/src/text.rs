use std::path::PathBuf;

use anyhow::{bail, Context};
use promo_contracts::{PromoError, PromoResult};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::config::EngineConfig;
use crate::http::{image_part_from_path, response_json_or_error};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextRequest {
    pub system: String,
    pub prompt: String,
    /// Ground the answer with live web search results.
    pub web_search: bool,
    /// Ask for a bare JSON object instead of prose.
    pub json_output: bool,
    pub image: Option<PathBuf>,
}

impl TextRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image = Some(path.into());
        self
    }
}

/// The language model every text-generation step talks to.
pub trait TextModel: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &TextRequest) -> PromoResult<String>;
}

pub struct GeminiTextModel {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl GeminiTextModel {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            api_key: config.gemini_api_key.clone(),
            model: config.text_model.clone(),
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &TextRequest) -> anyhow::Result<Value> {
        let mut parts = Vec::new();
        if let Some(image) = request.image.as_deref() {
            parts.push(image_part_from_path(image)?);
        }
        parts.push(json!({ "text": request.prompt }));

        let mut payload = Map::new();
        if !request.system.trim().is_empty() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": request.system }] }),
            );
        }
        payload.insert(
            "contents".to_string(),
            json!([{ "role": "user", "parts": parts }]),
        );
        if request.web_search {
            payload.insert("tools".to_string(), json!([{ "google_search": {} }]));
        } else if request.json_output {
            // Search grounding and JSON mode cannot be combined.
            payload.insert(
                "generationConfig".to_string(),
                json!({ "responseMimeType": "application/json" }),
            );
        }
        Ok(Value::Object(payload))
    }
}

pub(crate) fn extract_text(payload: &Value) -> anyhow::Result<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        let reason = payload
            .pointer("/candidates/0/finishReason")
            .or_else(|| payload.pointer("/promptFeedback/blockReason"))
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        bail!("Gemini returned no text ({reason})");
    }
    Ok(text.trim().to_string())
}

impl TextModel for GeminiTextModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &TextRequest) -> PromoResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PromoError::config("GEMINI_API_KEY or GOOGLE_API_KEY is not set"))?;
        let endpoint = self.endpoint();
        let payload = Self::build_payload(request)?;
        tracing::debug!(model = %self.model, web_search = request.web_search, "gemini generateContent");
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let body = response_json_or_error("Gemini", response)?;
        Ok(extract_text(&body)?)
    }
}

/// Parses a JSON object out of model output, tolerating Markdown code fences.
pub fn parse_json_object(raw: &str) -> anyhow::Result<Map<String, Value>> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let start = unfenced.find('{');
    let end = unfenced.rfind('}');
    let candidate = match (start, end) {
        (Some(start), Some(end)) if start < end => &unfenced[start..=end],
        _ => bail!("model output contains no JSON object"),
    };
    match serde_json::from_str::<Value>(candidate).context("model output is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {other}"),
    }
}
