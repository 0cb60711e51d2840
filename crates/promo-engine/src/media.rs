use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use promo_contracts::{PromoError, PromoResult};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::ffmpeg::{mux_audio_args, resolve_tool, run_tool};
use crate::http::{media_file_name, mime_for_path, response_json_or_error};

const IMAGE_STYLE: &str = "photorealistic";

/// Produces image bytes for a prompt.
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, prompt: &str) -> PromoResult<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    /// Download location, present once `done` and successful.
    pub video_uri: Option<String>,
}

/// Long-running video generation: upload, start, poll, download.
pub trait VideoBackend: Send + Sync {
    fn name(&self) -> &str;
    fn upload_image(&self, path: &Path) -> PromoResult<UploadedImage>;
    fn start(&self, prompt: &str, image: &UploadedImage) -> PromoResult<VideoOperation>;
    fn poll(&self, operation: &VideoOperation) -> PromoResult<VideoOperation>;
    fn download(&self, operation: &VideoOperation, dest: &Path) -> PromoResult<()>;
}

/// Time source for polling; swapped for a manual clock in tests.
pub trait Clock: Send + Sync {
    /// Monotonic time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    File(PathBuf),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoOptions {
    pub duration_seconds: u32,
    pub aspect_ratio: String,
    pub style: String,
    pub audio: Option<AudioSource>,
    pub audio_volume: f32,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            duration_seconds: 15,
            aspect_ratio: "9:16".to_string(),
            style: "social media".to_string(),
            audio: None,
            audio_volume: 1.0,
        }
    }
}

impl VideoOptions {
    fn decorate(&self, prompt: &str) -> String {
        format!(
            "{prompt}\nStyle: {}\nAspect Ratio: {}\nDuration: {}s",
            self.style, self.aspect_ratio, self.duration_seconds
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            interval: config.veo_poll_interval,
            timeout: config.veo_timeout,
        }
    }
}

/// Image and video generation for one run, writing into `out_dir`.
pub struct MediaGenerator<'a> {
    image: &'a dyn ImageBackend,
    video: &'a dyn VideoBackend,
    clock: &'a dyn Clock,
    poll: PollSettings,
    ffmpeg_bin: Option<PathBuf>,
    out_dir: PathBuf,
}

impl<'a> MediaGenerator<'a> {
    pub fn new(
        image: &'a dyn ImageBackend,
        video: &'a dyn VideoBackend,
        clock: &'a dyn Clock,
        poll: PollSettings,
        out_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            image,
            video,
            clock,
            poll,
            ffmpeg_bin: None,
            out_dir: out_dir.into(),
        }
    }

    pub fn with_ffmpeg(mut self, ffmpeg_bin: Option<PathBuf>) -> Self {
        self.ffmpeg_bin = ffmpeg_bin;
        self
    }

    /// Returns `image_path` untouched when it exists; generates one when absent.
    pub fn ensure_image(&self, prompt: &str, image_path: Option<&Path>) -> PromoResult<PathBuf> {
        if let Some(path) = image_path.filter(|path| !path.as_os_str().is_empty()) {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "using provided image");
                return Ok(path.to_path_buf());
            }
            return Err(PromoError::NotFound(path.to_path_buf()));
        }

        tracing::info!(backend = self.image.name(), "generating product image");
        let bytes = self
            .image
            .generate(&format!("{prompt}, style: {IMAGE_STYLE}"))?;
        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.out_dir.join(media_file_name("imagen", prompt, "png"));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn generate_video(
        &self,
        prompt: &str,
        image_path: Option<&Path>,
        options: &VideoOptions,
    ) -> PromoResult<PathBuf> {
        let image = self.ensure_image(prompt, image_path)?;
        let uploaded = self.video.upload_image(&image)?;
        tracing::info!(backend = self.video.name(), image = %image.display(), "starting video generation");
        let started = self.video.start(&options.decorate(prompt), &uploaded)?;
        let finished = self.wait_for(started)?;

        fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("failed to create {}", self.out_dir.display()))?;
        let path = self.out_dir.join(media_file_name("veo", prompt, "mp4"));
        self.video.download(&finished, &path)?;

        match options.audio.as_ref() {
            Some(audio) => self.overlay_audio(&path, audio, options.audio_volume),
            None => Ok(path),
        }
    }

    /// Checks `done` first, then sleeps and polls until done or past the timeout.
    pub fn wait_for(&self, mut operation: VideoOperation) -> PromoResult<VideoOperation> {
        let started = self.clock.now();
        while !operation.done {
            let waited = self.clock.now().saturating_sub(started);
            if waited > self.poll.timeout {
                return Err(PromoError::Timeout {
                    operation: "video generation".to_string(),
                    waited,
                });
            }
            self.clock.sleep(self.poll.interval);
            operation = self.video.poll(&operation)?;
            tracing::debug!(operation = %operation.name, done = operation.done, "polled video operation");
        }
        Ok(operation)
    }

    fn overlay_audio(&self, video: &Path, audio: &AudioSource, volume: f32) -> PromoResult<PathBuf> {
        let ffmpeg = resolve_tool(self.ffmpeg_bin.as_deref(), "ffmpeg")?;
        let (audio_path, downloaded) = match audio {
            AudioSource::File(path) => {
                if !path.is_file() {
                    return Err(PromoError::NotFound(path.clone()));
                }
                (path.clone(), false)
            }
            AudioSource::Url(url) => (download_audio(url, &self.out_dir)?, true),
        };

        let stem = video
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or("video");
        let output = video.with_file_name(format!("{stem}_with_audio.mp4"));
        let result = run_tool(&ffmpeg, &mux_audio_args(video, &audio_path, &output, volume))
            .context("ffmpeg failed to mux audio");
        if downloaded {
            if let Err(err) = fs::remove_file(&audio_path) {
                tracing::warn!(path = %audio_path.display(), error = %err, "could not remove downloaded audio");
            }
        }
        result?;
        Ok(output)
    }
}

fn download_audio(url: &str, dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(media_file_name("audio", "", "tmp"));
    let response = HttpClient::builder()
        .timeout(Duration::from_secs(60))
        .build()?
        .get(url)
        .send()
        .with_context(|| format!("audio download failed ({url})"))?;
    if !response.status().is_success() {
        bail!("audio download failed ({}): {url}", response.status().as_u16());
    }
    let bytes = response.bytes().context("audio download body read failed")?;
    fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub struct ImagenBackend {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl ImagenBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.gemini_api_base.clone(),
            api_key: config.gemini_api_key.clone(),
            model: config.imagen_model.trim().trim_start_matches("models/").to_string(),
            http: HttpClient::new(),
        }
    }

    fn first_prediction(payload: &Value) -> anyhow::Result<Vec<u8>> {
        let predictions = payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in predictions {
            if let Some(encoded) = row
                .get("bytesBase64Encoded")
                .or_else(|| row.pointer("/image/imageBytes"))
                .and_then(Value::as_str)
            {
                return BASE64
                    .decode(encoded.as_bytes())
                    .context("Imagen image base64 decode failed");
            }
        }
        bail!("Imagen API call did not return any images")
    }
}

impl ImageBackend for ImagenBackend {
    fn name(&self) -> &str {
        "imagen"
    }

    fn generate(&self, prompt: &str) -> PromoResult<Vec<u8>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            PromoError::config("GEMINI_API_KEY or GOOGLE_API_KEY is not set for image generation")
        })?;
        let endpoint = format!("{}/models/{}:predict", self.api_base, self.model);
        let payload = json!({
            "instances": [{ "prompt": prompt }],
            "parameters": { "sampleCount": 1 },
        });
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .with_context(|| format!("Imagen request failed ({endpoint})"))?;
        let body = response_json_or_error("Imagen", response)?;
        Ok(Self::first_prediction(&body)?)
    }
}

pub struct VeoBackend {
    api_base: String,
    upload_base: String,
    api_key: Option<String>,
    model: String,
    http: HttpClient,
}

impl VeoBackend {
    pub fn new(config: &EngineConfig) -> Self {
        let api_base = config.gemini_api_base.clone();
        // Media uploads live under /upload on the same host.
        let upload_base = match api_base.rsplit_once('/') {
            Some((host, version)) => format!("{host}/upload/{version}"),
            None => format!("{api_base}/upload"),
        };
        Self {
            api_base,
            upload_base,
            api_key: config.gemini_api_key.clone(),
            model: config.veo_model.trim().trim_start_matches("models/").to_string(),
            http: HttpClient::new(),
        }
    }

    fn api_key(&self) -> PromoResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| PromoError::config("GEMINI_API_KEY or GOOGLE_API_KEY is not set"))
    }

    fn parse_operation(payload: &Value) -> anyhow::Result<VideoOperation> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .context("Veo operation has no name")?
            .to_string();
        let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
        if done {
            if let Some(error) = payload.get("error") {
                bail!("Veo operation failed: {error}");
            }
        }
        let video_uri = payload
            .pointer("/response/generateVideoResponse/generatedSamples/0/video/uri")
            .or_else(|| payload.pointer("/response/generatedVideos/0/video/uri"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if done && video_uri.is_none() {
            bail!("Veo operation completed without generated videos");
        }
        Ok(VideoOperation {
            name,
            done,
            video_uri,
        })
    }
}

impl VideoBackend for VeoBackend {
    fn name(&self) -> &str {
        "veo"
    }

    fn upload_image(&self, path: &Path) -> PromoResult<UploadedImage> {
        let api_key = self.api_key()?;
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let mime_type = mime_for_path(path);
        let endpoint = format!("{}/files", self.upload_base);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .header("X-Goog-Upload-Protocol", "raw")
            .header(CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .with_context(|| format!("Gemini file upload failed ({endpoint})"))?;
        let body = response_json_or_error("Gemini files", response)?;
        let file = body.get("file").unwrap_or(&body);
        let field = |key: &str| {
            file.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .with_context(|| format!("Gemini file upload response is missing '{key}'"))
        };
        Ok(UploadedImage {
            name: field("name")?,
            uri: field("uri")?,
            mime_type: field("mimeType").unwrap_or_else(|_| mime_type.to_string()),
        })
    }

    fn start(&self, prompt: &str, image: &UploadedImage) -> PromoResult<VideoOperation> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/models/{}:predictLongRunning", self.api_base, self.model);
        let payload = json!({
            "instances": [{
                "prompt": prompt,
                "image": { "fileUri": image.uri, "mimeType": image.mime_type },
            }],
        });
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .with_context(|| format!("Veo request failed ({endpoint})"))?;
        let body = response_json_or_error("Veo", response)?;
        Ok(Self::parse_operation(&body)?)
    }

    fn poll(&self, operation: &VideoOperation) -> PromoResult<VideoOperation> {
        let api_key = self.api_key()?;
        let endpoint = format!("{}/{}", self.api_base, operation.name);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("key", api_key)])
            .send()
            .with_context(|| format!("Veo poll request failed ({endpoint})"))?;
        let body = response_json_or_error("Veo poll", response)?;
        Ok(Self::parse_operation(&body)?)
    }

    fn download(&self, operation: &VideoOperation, dest: &Path) -> PromoResult<()> {
        let api_key = self.api_key()?;
        let uri = operation.video_uri.as_deref().ok_or_else(|| {
            PromoError::Upstream(anyhow::anyhow!(
                "Veo operation {} has no video to download",
                operation.name
            ))
        })?;
        let response = self
            .http
            .get(uri)
            .query(&[("key", api_key)])
            .send()
            .with_context(|| format!("Veo download failed ({uri})"))?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Veo download failed ({})", response.status().as_u16()).into());
        }
        let bytes = response.bytes().context("Veo download body read failed")?;
        fs::write(dest, &bytes).with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(())
    }
}
