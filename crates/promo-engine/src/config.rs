use std::env;
use std::path::PathBuf;
use std::time::Duration;

use promo_contracts::{PromoError, PromoResult};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGEN_MODEL: &str = "imagen-3.0-generate-002";
pub const DEFAULT_VEO_MODEL: &str = "veo-3.0-generate-preview";

#[derive(Debug, Clone, PartialEq)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub business_connection_id: Option<String>,
}

impl TelegramConfig {
    pub fn bot_url(&self, method: &str) -> PromoResult<String> {
        let token = self
            .bot_token
            .as_deref()
            .ok_or_else(|| PromoError::config("BOT_TOKEN is not set"))?;
        Ok(format!("{}/bot{}/{}", self.api_base, token, method))
    }

    pub fn chat_id(&self) -> PromoResult<&str> {
        self.chat_id
            .as_deref()
            .ok_or_else(|| PromoError::config("CHAT_ID is not set"))
    }

    pub fn business_connection_id(&self) -> PromoResult<&str> {
        self.business_connection_id.as_deref().ok_or_else(|| {
            PromoError::config("BUSINESS_CONNECTION_ID is required for posting stories")
        })
    }
}

/// Process-wide settings, read once and passed by reference afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub text_model: String,
    pub imagen_model: String,
    pub veo_model: String,
    pub veo_poll_interval: Duration,
    pub veo_timeout: Duration,
    /// Key for Speech-to-Text and Translate.
    pub cloud_api_key: Option<String>,
    pub telegram: TelegramConfig,
    pub work_dir: PathBuf,
    pub public_dir: PathBuf,
    pub catalog_db: PathBuf,
    pub ffmpeg_bin: Option<PathBuf>,
    pub ffprobe_bin: Option<PathBuf>,
    pub admin: Option<AdminSeed>,
}

#[derive(Clone, PartialEq)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl EngineConfig {
    /// Loads `.env` (when present) and then reads the process environment.
    pub fn from_env() -> PromoResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        Self::from_lookup(non_empty_env)
    }

    /// Builds the config from an arbitrary key lookup. Blank values must be
    /// reported as `None` by the lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PromoResult<Self> {
        let gemini_api_key = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY"));
        let cloud_api_key = lookup("GOOGLE_CLOUD_API_KEY").or_else(|| gemini_api_key.clone());
        let admin = match (lookup("PROMO_ADMIN_USER"), lookup("PROMO_ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(AdminSeed { username, password }),
            (Some(_), None) => {
                return Err(PromoError::config(
                    "PROMO_ADMIN_USER is set but PROMO_ADMIN_PASSWORD is not",
                ))
            }
            _ => None,
        };

        Ok(Self {
            gemini_api_base: api_base(lookup("GEMINI_API_BASE"), DEFAULT_GEMINI_API_BASE),
            gemini_api_key,
            text_model: lookup("PROMO_TEXT_MODEL").unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            imagen_model: lookup("IMAGEN_MODEL").unwrap_or_else(|| DEFAULT_IMAGEN_MODEL.to_string()),
            veo_model: lookup("VEO_MODEL").unwrap_or_else(|| DEFAULT_VEO_MODEL.to_string()),
            veo_poll_interval: seconds(&lookup, "VEO_POLL_INTERVAL_SECONDS", 10.0)?,
            veo_timeout: seconds(&lookup, "VEO_TIMEOUT_SECONDS", 900.0)?,
            cloud_api_key,
            telegram: TelegramConfig {
                api_base: api_base(lookup("TELEGRAM_API_BASE"), DEFAULT_TELEGRAM_API_BASE),
                bot_token: lookup("BOT_TOKEN"),
                chat_id: lookup("CHAT_ID"),
                business_connection_id: lookup("BUSINESS_CONNECTION_ID"),
            },
            work_dir: lookup("PROMO_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("outputs")),
            public_dir: lookup("PROMO_PUBLIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("shop_data/static/uploads")),
            catalog_db: lookup("PROMO_CATALOG_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("shop_data/shop.db")),
            ffmpeg_bin: lookup("FFMPEG_BIN").map(PathBuf::from),
            ffprobe_bin: lookup("FFPROBE_BIN").map(PathBuf::from),
            admin,
        })
    }

    /// Same settings rooted under `dir`; used by tests and the CLI `--work-dir` flag.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn api_base(raw: Option<String>, default: &str) -> String {
    raw.map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: f64,
) -> PromoResult<Duration> {
    let Some(raw) = lookup(key) else {
        return Ok(Duration::from_secs_f64(default));
    };
    raw.parse::<f64>()
        .ok()
        .and_then(|value| Duration::try_from_secs_f64(value).ok())
        .ok_or_else(|| {
            PromoError::config(format!(
                "{key} must be a non-negative number of seconds, got '{raw}'"
            ))
        })
}
