//! Executes one `StepSpec` against its declared inputs.

use std::path::{Path, PathBuf};

use promo_contracts::{field, PromoError, PromoResult, StepInputs, StepKind, StepOutputs, StepSpec};
use serde_json::Value;

use crate::media::{Clock, ImageBackend, MediaGenerator, PollSettings, VideoBackend, VideoOptions};
use crate::publish::{ensure_accepted, Publisher};
use crate::text::{parse_json_object, TextModel, TextRequest};

/// Immutable per-run parameters shared by every step of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEnv {
    pub run_id: String,
    /// Generated images and videos land here.
    pub media_dir: PathBuf,
    pub video: VideoOptions,
    pub poll: PollSettings,
    pub ffmpeg_bin: Option<PathBuf>,
}

/// Borrowed collaborators a step may call.
#[derive(Clone, Copy)]
pub struct StepAdapters<'a> {
    pub text: &'a dyn TextModel,
    pub image: &'a dyn ImageBackend,
    pub video: &'a dyn VideoBackend,
    pub publisher: &'a dyn Publisher,
    pub clock: &'a dyn Clock,
}

impl<'a> StepAdapters<'a> {
    fn media(&self, env: &StepEnv) -> MediaGenerator<'a> {
        MediaGenerator::new(
            self.image,
            self.video,
            self.clock,
            env.poll.clone(),
            env.media_dir.clone(),
        )
        .with_ffmpeg(env.ffmpeg_bin.clone())
    }
}

const MARKETER: &str = "You are a social media marketer for small, local businesses. \
Write warm, concrete copy that sounds like the owner, never like an advertisement agency.";
const PRICE_ANALYST: &str = "You are a retail pricing analyst. Use current listings from the web \
and cite the marketplaces you looked at.";
const STORYTELLER: &str = "You are a storyteller who turns a maker's memories into a short, \
heartfelt post about the product they made.";
const VISUAL_DIRECTOR: &str = "You write prompts for generative image and video models. Reply \
with the prompt only, no preamble.";

pub fn execute_step(
    step: &StepSpec,
    inputs: &StepInputs,
    env: &StepEnv,
    adapters: &StepAdapters<'_>,
) -> PromoResult<StepOutputs> {
    tracing::debug!(step = step.name, run_id = %env.run_id, "executing step");
    match step.kind {
        StepKind::Summarize => {
            let prompt = format!(
                "Seller: {}\nProduct: {}\nDetails: {}\n\n\
                 Summarize what makes this product appealing in three or four sentences. \
                 Write in {}.",
                inputs.get(field::USER_NAME)?,
                inputs.get(field::PRODUCT_NAME)?,
                inputs.get(field::PRODUCT_DETAILS)?,
                inputs.get(field::LANGUAGE)?,
            );
            let summary = generate_text(adapters.text, TextRequest::new(MARKETER, prompt))?;
            Ok(StepOutputs::new().with(field::SUMMARY, summary))
        }
        StepKind::GenerateCaption => {
            let user_name = inputs.get(field::USER_NAME)?;
            let prompt = format!(
                "Seller: {user_name}\nProduct: {}\nPrice: {}\nSummary: {}\n\n\
                 Write a short promotional caption in {} with a few hashtags, and a one-line \
                 contact note telling buyers how to reach the seller. Reply as JSON with \
                 the keys \"caption\" and \"contact_info\".",
                inputs.get(field::PRODUCT_NAME)?,
                inputs.get(field::COST)?,
                inputs.get(field::SUMMARY)?,
                inputs.get(field::LANGUAGE)?,
            );
            let raw = generate_text(
                adapters.text,
                TextRequest::new(MARKETER, prompt).with_json_output(),
            )?;
            let (caption, contact_info) = caption_fields(&raw, user_name)?;
            Ok(StepOutputs::new()
                .with(field::CAPTION, caption)
                .with(field::CONTACT_INFO, contact_info))
        }
        StepKind::GenerateImagePrompt => {
            let prompt = format!(
                "Product: {}\nSummary: {}\n\nDescribe a single studio product photo for a \
                 vertical social media post: subject, setting, lighting and mood.",
                inputs.get(field::PRODUCT_NAME)?,
                inputs.get(field::SUMMARY)?,
            );
            let image_prompt = generate_text(adapters.text, TextRequest::new(VISUAL_DIRECTOR, prompt))?;
            Ok(StepOutputs::new().with(field::IMAGE_PROMPT, image_prompt))
        }
        StepKind::ExecuteImageGeneration => {
            let path = adapters
                .media(env)
                .ensure_image(inputs.get(field::IMAGE_PROMPT)?, None)?;
            Ok(StepOutputs::new().with(field::IMAGE_PATH, path_string(&path)))
        }
        StepKind::GenerateVideoPrompt { reference_image } => {
            let product = inputs.get(field::PRODUCT_NAME)?;
            let summary = inputs.get(field::SUMMARY)?;
            let request = if reference_image {
                let image = inputs.get(field::IMAGE_PATH)?;
                TextRequest::new(
                    VISUAL_DIRECTOR,
                    format!(
                        "Product: {product}\nSummary: {summary}\n\nThe attached photo is the \
                         first frame. Describe a short, slow camera move that shows the \
                         product off without changing how it looks."
                    ),
                )
                .with_image(image)
            } else {
                TextRequest::new(
                    VISUAL_DIRECTOR,
                    format!(
                        "Product: {product}\nSummary: {summary}\nFirst frame: {}\n\n\
                         Describe a short, slow camera move that starts from this frame.",
                        inputs.get(field::IMAGE_PROMPT)?,
                    ),
                )
            };
            let video_prompt = generate_text(adapters.text, request)?;
            Ok(StepOutputs::new().with(field::VIDEO_PROMPT, video_prompt))
        }
        StepKind::ExecuteVideoGeneration => {
            let image = PathBuf::from(inputs.get(field::IMAGE_PATH)?);
            let path = adapters.media(env).generate_video(
                inputs.get(field::VIDEO_PROMPT)?,
                Some(image.as_path()),
                &env.video,
            )?;
            Ok(StepOutputs::new().with(field::VIDEO_PATH, path_string(&path)))
        }
        StepKind::PublishToChannel => {
            let caption = channel_caption(
                inputs.get(field::CAPTION)?,
                inputs.get(field::CONTACT_INFO)?,
            );
            let video = Path::new(inputs.get(field::VIDEO_PATH)?);
            let response = adapters.publisher.send_video(video, Some(&caption))?;
            let response = ensure_accepted("sendVideo", response)?;
            Ok(StepOutputs::new().with(field::CHANNEL_POST, response.to_string()))
        }
        StepKind::PublishToStory => {
            let video = Path::new(inputs.get(field::VIDEO_PATH)?);
            let response = adapters
                .publisher
                .post_video_story(video, Some(inputs.get(field::CAPTION)?))?;
            let response = ensure_accepted("postStory", response)?;
            Ok(StepOutputs::new().with(field::STORY_POST, response.to_string()))
        }
        StepKind::PriceAnalysis => {
            let prompt = format!(
                "Seller: {}\nProduct: {}\nDetails: {}\n\n\
                 Find what comparable products sell for online right now. Give a price \
                 range, a recommended price, and two or three sentences of reasoning. \
                 Write in {}.",
                inputs.get(field::USER_NAME)?,
                inputs.get(field::PRODUCT_NAME)?,
                inputs.get(field::PRODUCT_DETAILS)?,
                inputs.get(field::LANGUAGE)?,
            );
            let report = generate_text(
                adapters.text,
                TextRequest::new(PRICE_ANALYST, prompt).with_web_search(),
            )?;
            Ok(StepOutputs::new().with(field::PRICE_REPORT, report))
        }
        StepKind::StoryNarrative => {
            let prompt = format!(
                "Maker: {}\nProduct: {}\nDetails: {}\nTheir story: {}\n\n\
                 Retell this as a first-person post of at most 150 words that ends by \
                 inviting readers to take the product home. Write in {}.",
                inputs.get(field::USER_NAME)?,
                inputs.get(field::PRODUCT_NAME)?,
                inputs.get(field::PRODUCT_DETAILS)?,
                inputs.get(field::USER_STORY)?,
                inputs.get(field::LANGUAGE)?,
            );
            let narrative = generate_text(adapters.text, TextRequest::new(STORYTELLER, prompt))?;
            Ok(StepOutputs::new().with(field::NARRATIVE, narrative))
        }
        StepKind::PublishStoryToChannel => {
            let image = Path::new(inputs.get(field::IMAGE_PATH)?);
            let response = adapters
                .publisher
                .send_photo(image, Some(inputs.get(field::NARRATIVE)?))?;
            let response = ensure_accepted("sendPhoto", response)?;
            Ok(StepOutputs::new().with(field::CHANNEL_POST, response.to_string()))
        }
        StepKind::PublishStoryToFeed => {
            let image = Path::new(inputs.get(field::IMAGE_PATH)?);
            let response = adapters
                .publisher
                .post_photo_story(image, Some(inputs.get(field::NARRATIVE)?))?;
            let response = ensure_accepted("postStory", response)?;
            Ok(StepOutputs::new().with(field::STORY_POST, response.to_string()))
        }
    }
}

fn generate_text(model: &dyn TextModel, request: TextRequest) -> PromoResult<String> {
    let text = model.generate(&request)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(anyhow::anyhow!("{} returned an empty reply", model.name()).into());
    }
    Ok(text.to_string())
}

/// Pulls `caption` and `contact_info` out of the model's JSON reply. A missing
/// contact line falls back to the seller's name.
fn caption_fields(raw: &str, user_name: &str) -> PromoResult<(String, String)> {
    let object = parse_json_object(raw).map_err(PromoError::Upstream)?;
    let caption = object
        .get("caption")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow::anyhow!("caption reply has no \"caption\" field"))?;
    let contact_info = object
        .get("contact_info")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(user_name);
    Ok((caption.to_string(), contact_info.to_string()))
}

fn channel_caption(caption: &str, contact_info: &str) -> String {
    if contact_info.is_empty() {
        return caption.to_string();
    }
    format!("{caption}\n\n{contact_info}")
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
