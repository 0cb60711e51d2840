use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use promo_contracts::{PromoError, PromoResult};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::config::{EngineConfig, TelegramConfig};
use crate::ffmpeg::{probe_args, resolve_tool, run_tool, story_video_args, streams_include_audio};
use crate::http::{mime_for_path, response_json_any_status, truncate_text};

pub const STORY_PHOTO_SIZE: (u32, u32) = (1080, 1920);
pub const STORY_ACTIVE_PERIOD_SECONDS: u32 = 86_400;
const CAPTION_LIMIT: usize = 1024;
const MESSAGE_LIMIT: usize = 4096;

/// Channel and story publishing. Implementations return the raw API response.
pub trait Publisher: Send + Sync {
    fn send_text(&self, text: &str) -> PromoResult<Value>;
    fn send_photo(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value>;
    fn send_video(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value>;
    fn post_photo_story(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value>;
    fn post_video_story(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value>;
}

/// Turns a `{"ok": false}` Bot API reply into an error; passes anything else through.
pub fn ensure_accepted(method: &str, response: Value) -> PromoResult<Value> {
    if response.get("ok").and_then(Value::as_bool) == Some(false) {
        let description = response
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        return Err(anyhow::anyhow!("Telegram rejected {method}: {description}").into());
    }
    Ok(response)
}

fn remove_scratch(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(err) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %err, "could not remove story scratch file");
    }
}

pub struct TelegramPublisher {
    telegram: TelegramConfig,
    ffmpeg_bin: Option<PathBuf>,
    ffprobe_bin: Option<PathBuf>,
    scratch_dir: PathBuf,
    http: HttpClient,
}

impl TelegramPublisher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            telegram: config.telegram.clone(),
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            scratch_dir: config.work_dir.join("story_scratch"),
            http: HttpClient::new(),
        }
    }

    fn file_part(path: &Path) -> PromoResult<MultipartPart> {
        if !path.is_file() {
            return Err(PromoError::NotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = MultipartPart::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for_path(path))
            .context("invalid upload mime type")?;
        Ok(part)
    }

    fn post_form(&self, method: &str, form: MultipartForm) -> PromoResult<Value> {
        let url = self.telegram.bot_url(method)?;
        tracing::info!(method, "telegram upload");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .with_context(|| format!("Telegram {method} request failed"))?;
        Ok(response_json_any_status("Telegram", response)?)
    }

    fn send_media(
        &self,
        method: &str,
        field: &str,
        path: &Path,
        caption: Option<&str>,
    ) -> PromoResult<Value> {
        let chat_id = self.telegram.chat_id()?.to_string();
        let mut form = MultipartForm::new()
            .text("chat_id", chat_id)
            .part(field.to_string(), Self::file_part(path)?);
        if let Some(caption) = caption.filter(|value| !value.trim().is_empty()) {
            form = form.text("caption", truncate_caption(caption));
        }
        self.post_form(method, form)
    }

    fn post_story(
        &self,
        kind: &str,
        attach_name: &str,
        processed: &Path,
        caption: Option<&str>,
    ) -> PromoResult<Value> {
        let business_connection_id = self.telegram.business_connection_id()?.to_string();
        let mut content = Map::new();
        content.insert("type".to_string(), json!(kind));
        content.insert(kind.to_string(), json!(format!("attach://{attach_name}")));
        let mut form = MultipartForm::new()
            .text("business_connection_id", business_connection_id)
            .text("content", Value::Object(content).to_string())
            .text("active_period", STORY_ACTIVE_PERIOD_SECONDS.to_string())
            .part(attach_name.to_string(), Self::file_part(processed)?);
        if let Some(caption) = caption.filter(|value| !value.trim().is_empty()) {
            form = form.text("caption", truncate_caption(caption));
        }
        self.post_form("postStory", form)
    }

    fn scratch_path(&self, ext: &str) -> PromoResult<PathBuf> {
        fs::create_dir_all(&self.scratch_dir)
            .with_context(|| format!("failed to create {}", self.scratch_dir.display()))?;
        Ok(self
            .scratch_dir
            .join(format!("processed_story_{}.{ext}", uuid::Uuid::new_v4().simple())))
    }
}

impl Publisher for TelegramPublisher {
    fn send_text(&self, text: &str) -> PromoResult<Value> {
        let url = self.telegram.bot_url("sendMessage")?;
        let payload = json!({
            "chat_id": self.telegram.chat_id()?,
            "text": truncate_text(text, MESSAGE_LIMIT),
        });
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .context("Telegram sendMessage request failed")?;
        Ok(response_json_any_status("Telegram", response)?)
    }

    fn send_photo(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        self.send_media("sendPhoto", "photo", path, caption)
    }

    fn send_video(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        self.send_media("sendVideo", "video", path, caption)
    }

    fn post_photo_story(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        self.telegram.business_connection_id()?;
        let processed = self.scratch_path("jpg")?;
        let result = fit_image_for_story(path, &processed)
            .and_then(|()| self.post_story("photo", "story_photo", &processed, caption));
        remove_scratch(&processed);
        result
    }

    fn post_video_story(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        self.telegram.business_connection_id()?;
        let processed = self.scratch_path("mp4")?;
        let result = self
            .process_video_for_story(path, &processed)
            .and_then(|()| self.post_story("video", "story_video", &processed, caption));
        remove_scratch(&processed);
        result
    }
}

impl TelegramPublisher {
    fn process_video_for_story(&self, input: &Path, output: &Path) -> PromoResult<()> {
        if !input.is_file() {
            return Err(PromoError::NotFound(input.to_path_buf()));
        }
        let ffprobe = resolve_tool(self.ffprobe_bin.as_deref(), "ffprobe")?;
        let ffmpeg = resolve_tool(self.ffmpeg_bin.as_deref(), "ffmpeg")?;
        let probe = run_tool(&ffprobe, &probe_args(input)).context("ffprobe failed")?;
        let has_audio = streams_include_audio(&probe)?;
        run_tool(&ffmpeg, &story_video_args(input, output, has_audio))
            .context("story video processing failed")?;
        Ok(())
    }
}

fn truncate_caption(caption: &str) -> String {
    truncate_text(caption, CAPTION_LIMIT - 1)
}

/// Letterboxes an image into the story frame over a blurred, stretched copy
/// of itself. Smaller images are centred without upscaling.
pub fn fit_image_for_story(input: &Path, output: &Path) -> PromoResult<()> {
    if !input.is_file() {
        return Err(PromoError::NotFound(input.to_path_buf()));
    }
    let (width, height) = STORY_PHOTO_SIZE;
    let source = image::open(input)
        .with_context(|| format!("failed to decode {}", input.display()))?
        .to_rgb8();
    let source = DynamicImage::ImageRgb8(source);

    let foreground = if source.width() > width || source.height() > height {
        source.resize(width, height, FilterType::Lanczos3)
    } else {
        source.clone()
    };
    let mut background = source
        .resize_exact(width, height, FilterType::Lanczos3)
        .blur(30.0)
        .to_rgb8();
    let x = (width - foreground.width()) / 2;
    let y = (height - foreground.height()) / 2;
    image::imageops::overlay(&mut background, &foreground.to_rgb8(), i64::from(x), i64::from(y));

    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, 95);
    DynamicImage::ImageRgb8(background)
        .write_with_encoder(encoder)
        .context("story image JPEG encode failed")?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, bytes).with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}
