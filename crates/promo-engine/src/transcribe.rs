use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use promo_contracts::{Language, PromoError, PromoResult};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::http::response_json_or_error;

const SPEECH_ENDPOINT: &str = "https://speech.googleapis.com/v1p1beta1/speech:recognize";
const TRANSLATE_ENDPOINT: &str = "https://translation.googleapis.com/language/translate/v2";

/// Speech-to-text and translation collaborator.
pub trait SpeechBackend: Send + Sync {
    /// One transcript per recognized segment, in order. `audio` is a mono
    /// 16-bit PCM WAV.
    fn recognize(&self, audio: &[u8], locale: &str) -> PromoResult<Vec<String>>;
    fn translate(&self, text: &str, target: &str) -> PromoResult<String>;
}

pub struct GoogleSpeechBackend {
    api_key: Option<String>,
    http: HttpClient,
}

impl GoogleSpeechBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_key: config.cloud_api_key.clone(),
            http: HttpClient::new(),
        }
    }

    fn api_key(&self) -> PromoResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            PromoError::config("GOOGLE_CLOUD_API_KEY (or a Gemini key) is not set for speech")
        })
    }

    fn recognize_payload(audio: &[u8], locale: &str) -> Value {
        json!({
            "config": {
                "encoding": "LINEAR16",
                "languageCode": locale,
                "enableAutomaticPunctuation": true,
                "model": "latest_long",
                "audioChannelCount": 1,
            },
            "audio": { "content": BASE64.encode(audio) },
        })
    }

    fn transcripts(payload: &Value) -> Vec<String> {
        payload
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|result| result.pointer("/alternatives/0/transcript"))
                    .filter_map(Value::as_str)
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl SpeechBackend for GoogleSpeechBackend {
    fn recognize(&self, audio: &[u8], locale: &str) -> PromoResult<Vec<String>> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .post(SPEECH_ENDPOINT)
            .query(&[("key", api_key)])
            .json(&Self::recognize_payload(audio, locale))
            .send()
            .context("Speech-to-Text request failed")?;
        let body = response_json_or_error("Speech-to-Text", response)?;
        Ok(Self::transcripts(&body))
    }

    fn translate(&self, text: &str, target: &str) -> PromoResult<String> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .post(TRANSLATE_ENDPOINT)
            .query(&[("key", api_key)])
            .json(&json!({ "q": text, "target": target, "format": "text" }))
            .send()
            .context("Translate request failed")?;
        let body = response_json_or_error("Translate", response)?;
        Ok(body
            .pointer("/data/translations/0/translatedText")
            .and_then(Value::as_str)
            .unwrap_or(text)
            .to_string())
    }
}

pub struct Transcriber<'a> {
    backend: &'a dyn SpeechBackend,
}

impl<'a> Transcriber<'a> {
    pub fn new(backend: &'a dyn SpeechBackend) -> Self {
        Self { backend }
    }

    /// Transcribes a WAV recording, mixed down to mono 16-bit PCM first.
    /// `language` is a display name or locale; anything unrecognised is
    /// treated as English.
    pub fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
        translate_to_english: bool,
    ) -> PromoResult<String> {
        if audio_path.as_os_str().is_empty() || !audio_path.is_file() {
            return Err(PromoError::NotFound(audio_path.to_path_buf()));
        }
        let audio = mono_pcm16_wav(audio_path)?;
        let locale = Language::from_name_or_default(language).speech_locale();
        tracing::info!(locale, path = %audio_path.display(), "transcribing audio");

        let text = self
            .backend
            .recognize(&audio, locale)
            .map_err(in_stage("transcription failed"))?
            .join(" ");
        if translate_to_english && !text.is_empty() {
            let translated = self
                .backend
                .translate(&text, "en")
                .map_err(in_stage("translation failed"))?;
            return Ok(translated);
        }
        Ok(text)
    }
}

fn in_stage(stage: &'static str) -> impl FnOnce(PromoError) -> PromoError {
    move |err| match err {
        PromoError::Upstream(inner) => PromoError::Upstream(inner.context(stage)),
        other => other,
    }
}

/// Decodes a WAV file and averages its channels into a mono 16-bit PCM WAV
/// at the same sample rate.
pub(crate) fn mono_pcm16_wav(path: &Path) -> anyhow::Result<Vec<u8>> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to decode {} as WAV", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("failed to read float WAV samples")?,
        SampleFormat::Int => {
            let full_scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / full_scale))
                .collect::<Result<_, _>>()
                .context("failed to read integer WAV samples")?
        }
    };

    let mono = WavSpec {
        channels: 1,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, mono).context("failed to start mono WAV")?;
    for frame in samples.chunks(channels) {
        let mean = frame.iter().sum::<f32>() / frame.len() as f32;
        let pcm = (mean * f32::from(i16::MAX))
            .round()
            .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
        writer.write_sample(pcm).context("failed to write mono sample")?;
    }
    writer.finalize().context("failed to finish mono WAV")?;
    Ok(cursor.into_inner())
}
