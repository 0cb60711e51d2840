//! Static chain tables.
//!
//! Every chain is a fixed, totally ordered list of steps. Branching happens once,
//! when a variant is chosen for a request; a chain never branches internally.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::error::{PromoError, PromoResult};
use crate::request::RequestKind;

/// Context field names shared by chain tables and step implementations.
pub mod field {
    pub const USER_NAME: &str = "user_name";
    pub const PRODUCT_NAME: &str = "product_name";
    pub const PRODUCT_DETAILS: &str = "product_details";
    pub const COST: &str = "cost";
    pub const LANGUAGE: &str = "language";
    pub const USER_STORY: &str = "user_story";
    /// Resolved product image: user-supplied or generated.
    pub const IMAGE_PATH: &str = "image_path";

    pub const SUMMARY: &str = "summary";
    pub const CAPTION: &str = "caption";
    pub const CONTACT_INFO: &str = "contact_info";
    pub const IMAGE_PROMPT: &str = "image_prompt";
    pub const VIDEO_PROMPT: &str = "video_prompt";
    pub const VIDEO_PATH: &str = "video_path";
    pub const CHANNEL_POST: &str = "channel_post";
    pub const STORY_POST: &str = "story_post";
    pub const PRICE_REPORT: &str = "price_report";
    pub const NARRATIVE: &str = "narrative";
}

use field::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Media,
    Publisher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Summarize,
    GenerateCaption,
    GenerateImagePrompt,
    ExecuteImageGeneration,
    /// With `reference_image`, the prompt is written while looking at `image_path`.
    GenerateVideoPrompt { reference_image: bool },
    ExecuteVideoGeneration,
    PublishToChannel,
    PublishToStory,
    PriceAnalysis,
    StoryNarrative,
    PublishStoryToChannel,
    PublishStoryToFeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepSpec {
    pub name: &'static str,
    pub kind: StepKind,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
    /// Text-generation steps only talk to the language model and carry `None`.
    pub adapter: Option<AdapterKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantName {
    WithoutImage,
    WithImage,
    PriceOnly,
    Story,
}

impl VariantName {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantName::WithoutImage => "without_image",
            VariantName::WithImage => "with_image",
            VariantName::PriceOnly => "price_only",
            VariantName::Story => "story",
        }
    }
}

impl fmt::Display for VariantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChainVariant {
    pub name: VariantName,
    /// Fields the orchestrator places in the context before the first step.
    pub seed_fields: &'static [&'static str],
    pub steps: &'static [StepSpec],
}

const BASE_SEED: &[&str] = &[USER_NAME, PRODUCT_NAME, PRODUCT_DETAILS, COST, LANGUAGE];

const SUMMARIZE: StepSpec = StepSpec {
    name: "summarize",
    kind: StepKind::Summarize,
    inputs: &[USER_NAME, PRODUCT_NAME, PRODUCT_DETAILS, LANGUAGE],
    outputs: &[SUMMARY],
    adapter: None,
};

const GENERATE_CAPTION: StepSpec = StepSpec {
    name: "generate_caption",
    kind: StepKind::GenerateCaption,
    inputs: &[USER_NAME, PRODUCT_NAME, COST, LANGUAGE, SUMMARY],
    outputs: &[CAPTION, CONTACT_INFO],
    adapter: None,
};

const GENERATE_IMAGE_PROMPT: StepSpec = StepSpec {
    name: "generate_image_prompt",
    kind: StepKind::GenerateImagePrompt,
    inputs: &[PRODUCT_NAME, SUMMARY],
    outputs: &[IMAGE_PROMPT],
    adapter: None,
};

const EXECUTE_IMAGE_GENERATION: StepSpec = StepSpec {
    name: "execute_image_generation",
    kind: StepKind::ExecuteImageGeneration,
    inputs: &[IMAGE_PROMPT],
    outputs: &[IMAGE_PATH],
    adapter: Some(AdapterKind::Media),
};

const GENERATE_VIDEO_PROMPT: StepSpec = StepSpec {
    name: "generate_video_prompt",
    kind: StepKind::GenerateVideoPrompt {
        reference_image: false,
    },
    inputs: &[PRODUCT_NAME, SUMMARY, IMAGE_PROMPT],
    outputs: &[VIDEO_PROMPT],
    adapter: None,
};

const GENERATE_VIDEO_PROMPT_FROM_IMAGE: StepSpec = StepSpec {
    name: "generate_video_prompt",
    kind: StepKind::GenerateVideoPrompt {
        reference_image: true,
    },
    inputs: &[PRODUCT_NAME, SUMMARY, IMAGE_PATH],
    outputs: &[VIDEO_PROMPT],
    adapter: None,
};

const EXECUTE_VIDEO_GENERATION: StepSpec = StepSpec {
    name: "execute_video_generation",
    kind: StepKind::ExecuteVideoGeneration,
    inputs: &[VIDEO_PROMPT, IMAGE_PATH],
    outputs: &[VIDEO_PATH],
    adapter: Some(AdapterKind::Media),
};

const PUBLISH_TO_CHANNEL: StepSpec = StepSpec {
    name: "publish_to_channel",
    kind: StepKind::PublishToChannel,
    inputs: &[CAPTION, CONTACT_INFO, VIDEO_PATH],
    outputs: &[CHANNEL_POST],
    adapter: Some(AdapterKind::Publisher),
};

const PUBLISH_TO_STORY: StepSpec = StepSpec {
    name: "publish_to_story",
    kind: StepKind::PublishToStory,
    inputs: &[CAPTION, VIDEO_PATH],
    outputs: &[STORY_POST],
    adapter: Some(AdapterKind::Publisher),
};

const PRICE_ANALYSIS: StepSpec = StepSpec {
    name: "price_analysis",
    kind: StepKind::PriceAnalysis,
    inputs: &[USER_NAME, PRODUCT_NAME, PRODUCT_DETAILS, LANGUAGE],
    outputs: &[PRICE_REPORT],
    adapter: None,
};

const STORY_NARRATIVE: StepSpec = StepSpec {
    name: "generate_story_narrative",
    kind: StepKind::StoryNarrative,
    inputs: &[USER_NAME, PRODUCT_NAME, PRODUCT_DETAILS, LANGUAGE, USER_STORY],
    outputs: &[NARRATIVE],
    adapter: None,
};

const PUBLISH_STORY_TO_CHANNEL: StepSpec = StepSpec {
    name: "publish_story_to_channel",
    kind: StepKind::PublishStoryToChannel,
    inputs: &[NARRATIVE, IMAGE_PATH],
    outputs: &[CHANNEL_POST],
    adapter: Some(AdapterKind::Publisher),
};

const PUBLISH_STORY_TO_FEED: StepSpec = StepSpec {
    name: "publish_story_to_feed",
    kind: StepKind::PublishStoryToFeed,
    inputs: &[NARRATIVE, IMAGE_PATH],
    outputs: &[STORY_POST],
    adapter: Some(AdapterKind::Publisher),
};

pub const WITHOUT_IMAGE: ChainVariant = ChainVariant {
    name: VariantName::WithoutImage,
    seed_fields: BASE_SEED,
    steps: &[
        SUMMARIZE,
        GENERATE_CAPTION,
        GENERATE_IMAGE_PROMPT,
        EXECUTE_IMAGE_GENERATION,
        GENERATE_VIDEO_PROMPT,
        EXECUTE_VIDEO_GENERATION,
        PUBLISH_TO_CHANNEL,
        PUBLISH_TO_STORY,
    ],
};

pub const WITH_IMAGE: ChainVariant = ChainVariant {
    name: VariantName::WithImage,
    seed_fields: &[USER_NAME, PRODUCT_NAME, PRODUCT_DETAILS, COST, LANGUAGE, IMAGE_PATH],
    steps: &[
        SUMMARIZE,
        GENERATE_CAPTION,
        GENERATE_VIDEO_PROMPT_FROM_IMAGE,
        EXECUTE_VIDEO_GENERATION,
        PUBLISH_TO_CHANNEL,
        PUBLISH_TO_STORY,
    ],
};

pub const PRICE_ONLY: ChainVariant = ChainVariant {
    name: VariantName::PriceOnly,
    seed_fields: BASE_SEED,
    steps: &[PRICE_ANALYSIS],
};

pub const STORY: ChainVariant = ChainVariant {
    name: VariantName::Story,
    seed_fields: &[
        USER_NAME,
        PRODUCT_NAME,
        PRODUCT_DETAILS,
        COST,
        LANGUAGE,
        USER_STORY,
        IMAGE_PATH,
    ],
    steps: &[
        STORY_NARRATIVE,
        PUBLISH_STORY_TO_CHANNEL,
        PUBLISH_STORY_TO_FEED,
    ],
};

impl ChainVariant {
    /// Variant selection rule. `image_available` means the request names an
    /// existing image file; it only matters for full promotions.
    pub fn for_request(kind: RequestKind, image_available: bool) -> &'static ChainVariant {
        match kind {
            RequestKind::FullPromotion if image_available => &WITH_IMAGE,
            RequestKind::FullPromotion => &WITHOUT_IMAGE,
            RequestKind::PriceOnly => &PRICE_ONLY,
            RequestKind::Story => &STORY,
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name).collect()
    }

    pub fn uses_adapter(&self, adapter: AdapterKind) -> bool {
        self.steps.iter().any(|step| step.adapter == Some(adapter))
    }

    /// Context key holding the chain's final artifact.
    pub fn artifact_field(&self) -> Option<&'static str> {
        self.steps
            .last()
            .and_then(|step| step.outputs.first().copied())
    }

    /// Checks that every step only reads seed fields or outputs of strictly
    /// earlier steps, and that no step re-declares a field already present.
    pub fn validate(&self) -> PromoResult<()> {
        if self.steps.is_empty() {
            return Err(PromoError::Chain(format!("chain '{}' has no steps", self.name)));
        }
        let mut available: BTreeSet<&str> = self.seed_fields.iter().copied().collect();
        for step in self.steps {
            if let Some(missing) = step.inputs.iter().find(|key| !available.contains(*key)) {
                return Err(PromoError::Chain(format!(
                    "step '{}' in chain '{}' reads '{}' before anything provides it",
                    step.name, self.name, missing
                )));
            }
            for output in step.outputs {
                if !available.insert(output) {
                    return Err(PromoError::Chain(format!(
                        "step '{}' in chain '{}' overwrites '{}'",
                        step.name, self.name, output
                    )));
                }
            }
        }
        Ok(())
    }
}
