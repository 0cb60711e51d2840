use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PromoError, PromoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    FullPromotion,
    PriceOnly,
    Story,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::FullPromotion => "full_promotion",
            RequestKind::PriceOnly => "price_only",
            RequestKind::Story => "story",
        }
    }

    /// Whether a successful run of this kind writes a catalog record.
    pub fn upserts_catalog(&self) -> bool {
        matches!(self, RequestKind::FullPromotion | RequestKind::Story)
    }

    /// Whether generation-scoped media is deleted once the run ends.
    pub fn cleans_up_media(&self) -> bool {
        matches!(self, RequestKind::FullPromotion)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Hindi,
    Tamil,
    Telugu,
    Malayalam,
    Urdu,
    Spanish,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::English,
        Language::Hindi,
        Language::Tamil,
        Language::Telugu,
        Language::Malayalam,
        Language::Urdu,
        Language::Spanish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Hindi => "Hindi",
            Language::Tamil => "Tamil",
            Language::Telugu => "Telugu",
            Language::Malayalam => "Malayalam",
            Language::Urdu => "Urdu",
            Language::Spanish => "Spanish",
        }
    }

    /// BCP-47 locale handed to the speech recognizer.
    pub fn speech_locale(&self) -> &'static str {
        match self {
            Language::English => "en-US",
            Language::Hindi => "hi-IN",
            Language::Tamil => "ta-IN",
            Language::Telugu => "te-IN",
            Language::Malayalam => "ml-IN",
            Language::Urdu => "ur-IN",
            Language::Spanish => "es-ES",
        }
    }

    /// Lenient lookup by display name or locale; unknown names fall back to English.
    pub fn from_name_or_default(raw: Option<&str>) -> Language {
        raw.and_then(|value| value.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let needle = raw.trim().to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|language| {
                let locale = language.speech_locale().to_ascii_lowercase();
                needle == language.as_str().to_ascii_lowercase()
                    || needle == locale
                    || locale.split('-').next() == Some(needle.as_str())
            })
            .ok_or_else(|| format!("unsupported language '{}'", raw.trim()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat input record built by an entry point before a chain runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_name: String,
    pub product_name: String,
    pub product_details: String,
    #[serde(default)]
    pub product_image_path: Option<PathBuf>,
    /// Raw cost as typed by the user; see [`coerce_cost`].
    #[serde(default)]
    pub cost: String,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub user_story: Option<String>,
}

impl RequestContext {
    pub fn new(
        user_name: impl Into<String>,
        product_name: impl Into<String>,
        product_details: impl Into<String>,
    ) -> Self {
        Self {
            user_name: user_name.into(),
            product_name: product_name.into(),
            product_details: product_details.into(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.product_image_path = Some(path.into());
        self
    }

    pub fn with_cost(mut self, cost: impl Into<String>) -> Self {
        self.cost = cost.into();
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_story(mut self, story: impl Into<String>) -> Self {
        self.user_story = Some(story.into());
        self
    }

    /// Copy with surrounding whitespace stripped from every text field.
    pub fn trimmed(&self) -> Self {
        Self {
            user_name: self.user_name.trim().to_string(),
            product_name: self.product_name.trim().to_string(),
            product_details: self.product_details.trim().to_string(),
            product_image_path: self
                .product_image_path
                .as_ref()
                .map(|path| path.to_string_lossy().trim().to_string())
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            cost: self.cost.clone(),
            language: self.language,
            user_story: self
                .user_story
                .as_deref()
                .map(str::trim)
                .filter(|story| !story.is_empty())
                .map(str::to_string),
        }
    }

    /// Checks the required fields for `kind`. Runs before any adapter is touched.
    pub fn validate(&self, kind: RequestKind) -> PromoResult<()> {
        for (field, value) in [
            ("user_name", &self.user_name),
            ("product_name", &self.product_name),
            ("product_details", &self.product_details),
        ] {
            if value.trim().is_empty() {
                return Err(PromoError::missing(field));
            }
        }

        if kind == RequestKind::Story {
            let has_story = self
                .user_story
                .as_deref()
                .map(|story| !story.trim().is_empty())
                .unwrap_or(false);
            if !has_story {
                return Err(PromoError::missing("user_story"));
            }
            let Some(image) = self.declared_image() else {
                return Err(PromoError::missing("product_image_path"));
            };
            if !image.is_file() {
                return Err(PromoError::NotFound(image.to_path_buf()));
            }
        }
        Ok(())
    }

    /// Image path as supplied, ignoring blank values.
    pub fn declared_image(&self) -> Option<&Path> {
        self.product_image_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Image path only when it names an existing file.
    pub fn image_on_disk(&self) -> Option<&Path> {
        self.declared_image().filter(|path| path.is_file())
    }

    pub fn cost_value(&self) -> u64 {
        coerce_cost(&self.cost)
    }
}

/// Cost coercion policy: an all-ASCII-digit string parses, anything else is `0`.
///
/// Non-numeric input is accepted rather than rejected; `" 50"`, `"50.0"` and
/// `"fifty"` all coerce to `0`.
pub fn coerce_cost(raw: &str) -> u64 {
    if raw.is_empty() || !raw.chars().all(|ch| ch.is_ascii_digit()) {
        return 0;
    }
    raw.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_coercion_keeps_digits_and_zeroes_the_rest() {
        assert_eq!(coerce_cost("50"), 50);
        assert_eq!(coerce_cost("0007"), 7);
        assert_eq!(coerce_cost("fifty"), 0);
        assert_eq!(coerce_cost(""), 0);
        assert_eq!(coerce_cost(" 50"), 0);
        assert_eq!(coerce_cost("12.5"), 0);
        assert_eq!(coerce_cost("99999999999999999999999"), 0);
    }

    #[test]
    fn validate_rejects_blank_required_fields() {
        let request = RequestContext::new("alice", "   ", "hand-thrown mug");
        let err = request.validate(RequestKind::FullPromotion).unwrap_err();
        assert!(matches!(err, PromoError::MissingField(ref field) if field == "product_name"));

        let request = RequestContext::new("", "Mug", "details");
        let err = request.validate(RequestKind::PriceOnly).unwrap_err();
        assert!(matches!(err, PromoError::MissingField(ref field) if field == "user_name"));
    }

    #[test]
    fn story_requires_story_text_and_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("craft.png");
        std::fs::write(&image, b"png")?;

        let base = RequestContext::new("alice", "Mug", "details");
        let err = base.clone().validate(RequestKind::Story).unwrap_err();
        assert!(matches!(err, PromoError::MissingField(ref field) if field == "user_story"));

        let err = base
            .clone()
            .with_story("  ")
            .validate(RequestKind::Story)
            .unwrap_err();
        assert!(matches!(err, PromoError::MissingField(ref field) if field == "user_story"));

        let err = base
            .clone()
            .with_story("my grandmother taught me")
            .validate(RequestKind::Story)
            .unwrap_err();
        assert!(
            matches!(err, PromoError::MissingField(ref field) if field == "product_image_path")
        );

        let err = base
            .clone()
            .with_story("my grandmother taught me")
            .with_image(temp.path().join("missing.png"))
            .validate(RequestKind::Story)
            .unwrap_err();
        assert!(matches!(err, PromoError::NotFound(_)));

        base.with_story("my grandmother taught me")
            .with_image(&image)
            .validate(RequestKind::Story)?;
        Ok(())
    }

    #[test]
    fn image_on_disk_ignores_blank_and_missing_paths() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("mug.jpg");
        std::fs::write(&image, b"jpg")?;

        let blank = RequestContext::new("a", "b", "c").with_image("");
        assert!(blank.image_on_disk().is_none());
        let missing = RequestContext::new("a", "b", "c").with_image(temp.path().join("nope.jpg"));
        assert!(missing.image_on_disk().is_none());
        let present = RequestContext::new("a", "b", "c").with_image(&image);
        assert_eq!(present.image_on_disk(), Some(image.as_path()));
        Ok(())
    }

    #[test]
    fn trimmed_drops_blank_optionals() {
        let request = RequestContext::new(" alice ", " Mug ", " glazed ")
            .with_image("  ")
            .with_story("   ");
        let trimmed = request.trimmed();
        assert_eq!(trimmed.user_name, "alice");
        assert_eq!(trimmed.product_name, "Mug");
        assert_eq!(trimmed.product_details, "glazed");
        assert!(trimmed.product_image_path.is_none());
        assert!(trimmed.user_story.is_none());
    }

    #[test]
    fn language_parses_names_and_locales() {
        assert_eq!("hindi".parse::<Language>(), Ok(Language::Hindi));
        assert_eq!("ta-IN".parse::<Language>(), Ok(Language::Tamil));
        assert_eq!("ur".parse::<Language>(), Ok(Language::Urdu));
        assert!("klingon".parse::<Language>().is_err());
        assert_eq!(Language::from_name_or_default(Some("klingon")), Language::English);
        assert_eq!(Language::Spanish.speech_locale(), "es-ES");
    }
}
