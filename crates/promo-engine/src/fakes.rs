//! Counting in-memory adapters for tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use promo_contracts::{PromoError, PromoResult};
use serde_json::{json, Value};

use crate::media::{Clock, ImageBackend, UploadedImage, VideoBackend, VideoOperation};
use crate::publish::Publisher;
use crate::text::{TextModel, TextRequest};

/// Shared, ordered record of adapter calls across fakes.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|existing| existing == entry)
    }
}

#[derive(Default)]
pub struct FakeTextModel {
    requests: Mutex<Vec<TextRequest>>,
    log: CallLog,
    fail_on_call: Option<usize>,
}

impl FakeTextModel {
    pub fn logging_to(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            ..Self::default()
        }
    }

    /// Fails the `n`th call (1-based) with an upstream error.
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<TextRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl TextModel for FakeTextModel {
    fn name(&self) -> &str {
        "fake-text"
    }

    fn generate(&self, request: &TextRequest) -> PromoResult<String> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        self.log.push("text");
        if self.fail_on_call == Some(call) {
            return Err(anyhow::anyhow!("text model unavailable").into());
        }
        if request.json_output {
            return Ok(json!({"caption": "Fresh from the kiln", "contact_info": "@alice"}).to_string());
        }
        Ok(format!("text reply {call}"))
    }
}

#[derive(Default)]
pub struct FakeImageBackend {
    prompts: Mutex<Vec<String>>,
    log: CallLog,
}

impl FakeImageBackend {
    pub fn logging_to(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl ImageBackend for FakeImageBackend {
    fn name(&self) -> &str {
        "fake-image"
    }

    fn generate(&self, prompt: &str) -> PromoResult<Vec<u8>> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.log.push("image");
        Ok(b"fake-png".to_vec())
    }
}

pub struct FakeVideoBackend {
    /// Number of polls after which the operation reports done; `None` never finishes.
    done_after: Option<usize>,
    polls: AtomicUsize,
    downloads: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    log: CallLog,
}

impl FakeVideoBackend {
    pub fn done_after(polls: usize) -> Self {
        Self {
            done_after: Some(polls),
            polls: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            log: CallLog::default(),
        }
    }

    pub fn never_done() -> Self {
        Self {
            done_after: None,
            ..Self::done_after(0)
        }
    }

    pub fn logging_to(mut self, log: &CallLog) -> Self {
        self.log = log.clone();
        self
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn operation(&self, polls: usize) -> VideoOperation {
        let done = self.done_after.is_some_and(|target| polls >= target);
        VideoOperation {
            name: "operations/fake".to_string(),
            done,
            video_uri: done.then(|| "fake://video".to_string()),
        }
    }
}

impl VideoBackend for FakeVideoBackend {
    fn name(&self) -> &str {
        "fake-video"
    }

    fn upload_image(&self, path: &Path) -> PromoResult<UploadedImage> {
        if !path.is_file() {
            return Err(PromoError::NotFound(path.to_path_buf()));
        }
        Ok(UploadedImage {
            name: "files/fake".to_string(),
            uri: format!("fake://{}", path.display()),
            mime_type: "image/png".to_string(),
        })
    }

    fn start(&self, prompt: &str, _image: &UploadedImage) -> PromoResult<VideoOperation> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.log.push("video");
        Ok(self.operation(0))
    }

    fn poll(&self, _operation: &VideoOperation) -> PromoResult<VideoOperation> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.operation(polls))
    }

    fn download(&self, _operation: &VideoOperation, dest: &Path) -> PromoResult<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        std::fs::write(dest, b"fake-mp4").map_err(|err| PromoError::Upstream(err.into()))?;
        Ok(())
    }
}

#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    sleeps: AtomicUsize,
}

impl ManualClock {
    pub fn sleeps(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        *self.now.lock().unwrap() += duration;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedItem {
    pub method: &'static str,
    pub path: Option<PathBuf>,
    pub text: Option<String>,
}

#[derive(Default)]
pub struct FakePublisher {
    items: Mutex<Vec<PublishedItem>>,
    log: CallLog,
    reject: bool,
}

impl FakePublisher {
    pub fn logging_to(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            ..Self::default()
        }
    }

    /// Answers every call with `{"ok": false}` like a misconfigured bot.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn items(&self) -> Vec<PublishedItem> {
        self.items.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn record(&self, method: &'static str, path: Option<&Path>, text: Option<&str>) -> Value {
        self.items.lock().unwrap().push(PublishedItem {
            method,
            path: path.map(Path::to_path_buf),
            text: text.map(str::to_string),
        });
        self.log.push(method);
        if self.reject {
            return json!({"ok": false, "error_code": 400, "description": "Bad Request: chat not found"});
        }
        json!({"ok": true, "result": {"message_id": self.calls()}})
    }
}

impl Publisher for FakePublisher {
    fn send_text(&self, text: &str) -> PromoResult<Value> {
        Ok(self.record("sendMessage", None, Some(text)))
    }

    fn send_photo(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        Ok(self.record("sendPhoto", Some(path), caption))
    }

    fn send_video(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        Ok(self.record("sendVideo", Some(path), caption))
    }

    fn post_photo_story(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        Ok(self.record("postStory:photo", Some(path), caption))
    }

    fn post_video_story(&self, path: &Path, caption: Option<&str>) -> PromoResult<Value> {
        Ok(self.record("postStory:video", Some(path), caption))
    }
}
