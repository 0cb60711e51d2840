use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use promo_contracts::{coerce_cost, Language, PromoError, RequestContext, RequestKind};
use promo_engine::{
    open_catalog, AudioSource, EngineConfig, GoogleSpeechBackend, Pipeline, ProductUpsert,
    RunOutcome, Transcriber, VideoOptions,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "promo", version, about = "Promotional content pipeline for small sellers")]
struct Cli {
    /// Overrides PROMO_WORK_DIR for run folders.
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Caption, video, channel post and story for a product.
    Promote(PromoteArgs),
    /// Web-grounded price analysis only.
    Price(ProductArgs),
    /// Turn the seller's story into a photo post.
    Story(StoryArgs),
    /// Transcribe a WAV recording; stereo is mixed down to mono.
    Transcribe(TranscribeArgs),
    #[command(subcommand)]
    Catalog(CatalogCommand),
}

#[derive(Debug, Args)]
struct ProductArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    product: String,
    #[arg(long, default_value = "")]
    details: String,
    /// Spoken product details; replaces --details.
    #[arg(long)]
    details_audio: Option<PathBuf>,
    #[arg(long, default_value = "")]
    cost: String,
    #[arg(long, default_value = "English")]
    language: Language,
    /// Language spoken in the recordings; defaults to --language.
    #[arg(long)]
    audio_language: Option<String>,
    /// Translate transcribed audio to English.
    #[arg(long)]
    translate: bool,
}

#[derive(Debug, Args)]
struct PromoteArgs {
    #[command(flatten)]
    product: ProductArgs,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value_t = 15)]
    duration: u32,
    /// Background track muxed into the video: a local file or an http(s) URL.
    #[arg(long)]
    audio: Option<String>,
    #[arg(long, default_value_t = 1.0)]
    volume: f32,
}

#[derive(Debug, Args)]
struct StoryArgs {
    #[command(flatten)]
    product: ProductArgs,
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    story: Option<String>,
    #[arg(long)]
    story_audio: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TranscribeArgs {
    audio: PathBuf,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    translate: bool,
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    /// Every product, newest first.
    List,
    /// Products owned by one user.
    User { username: String },
    /// Products whose name, details or owner contain the query.
    Search { query: String },
    /// Usernames containing the query.
    Users { query: String },
    Upsert {
        #[arg(long)]
        user: String,
        #[arg(long)]
        product: String,
        #[arg(long)]
        details: String,
        #[arg(long, default_value = "")]
        price: String,
        #[arg(long)]
        image: Option<String>,
    },
    /// Admin only.
    Delete {
        id: i64,
        #[arg(long)]
        admin: String,
        #[arg(long)]
        password: String,
    },
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("promo error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("promo=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(work_dir) = cli.work_dir {
        config = config.with_work_dir(work_dir);
    }

    match cli.command {
        Command::Promote(args) => run_promote(config, args),
        Command::Price(args) => {
            let request = product_request(&config, &args)?;
            run_pipeline(Pipeline::from_config(config)?, RequestKind::PriceOnly, &request)
        }
        Command::Story(args) => run_story(config, args),
        Command::Transcribe(args) => {
            let backend = GoogleSpeechBackend::new(&config);
            let text = Transcriber::new(&backend).transcribe(
                &args.audio,
                args.language.as_deref(),
                args.translate,
            )?;
            println!("{text}");
            Ok(0)
        }
        Command::Catalog(command) => run_catalog(&config, command),
    }
}

fn run_promote(config: EngineConfig, args: PromoteArgs) -> Result<i32> {
    let mut request = product_request(&config, &args.product)?;
    if let Some(image) = args.image {
        request = request.with_image(image);
    }
    let options = VideoOptions {
        duration_seconds: args.duration,
        audio: args.audio.map(audio_source),
        audio_volume: args.volume,
        ..VideoOptions::default()
    };
    let pipeline = Pipeline::from_config(config)?.with_video_options(options);
    run_pipeline(pipeline, RequestKind::FullPromotion, &request)
}

/// http(s) values are downloaded; anything else is a local path.
fn audio_source(value: String) -> AudioSource {
    if value.starts_with("http://") || value.starts_with("https://") {
        AudioSource::Url(value)
    } else {
        AudioSource::File(PathBuf::from(value))
    }
}

fn run_story(config: EngineConfig, args: StoryArgs) -> Result<i32> {
    let story = match (&args.story_audio, args.story) {
        (Some(audio), _) => transcribe(&config, audio, &args.product)?,
        (None, Some(story)) => story,
        (None, None) => bail!("either --story or --story-audio is required"),
    };
    let request = product_request(&config, &args.product)?
        .with_image(args.image)
        .with_story(story);
    run_pipeline(Pipeline::from_config(config)?, RequestKind::Story, &request)
}

fn product_request(config: &EngineConfig, args: &ProductArgs) -> Result<RequestContext> {
    let details = match &args.details_audio {
        Some(audio) => transcribe(config, audio, args)?,
        None => args.details.clone(),
    };
    Ok(RequestContext::new(&args.user, &args.product, details)
        .with_cost(&args.cost)
        .with_language(args.language))
}

fn transcribe(config: &EngineConfig, audio: &Path, args: &ProductArgs) -> Result<String> {
    let backend = GoogleSpeechBackend::new(config);
    let spoken = args
        .audio_language
        .as_deref()
        .unwrap_or(args.language.as_str());
    let text = Transcriber::new(&backend)
        .transcribe(audio, Some(spoken), args.translate)
        .with_context(|| format!("could not transcribe {}", audio.display()))?;
    tracing::info!(chars = text.chars().count(), "transcribed audio");
    Ok(text)
}

fn run_pipeline(pipeline: Pipeline, kind: RequestKind, request: &RequestContext) -> Result<i32> {
    match pipeline.run(kind, request) {
        Ok(outcome) => {
            print_json(&outcome_json(&outcome))?;
            Ok(0)
        }
        Err(err) => failure_exit_code(err),
    }
}

/// Exit code 2 for failures the user can fix by changing the request.
fn failure_exit_code(err: PromoError) -> Result<i32> {
    if err.is_user_correctable() {
        eprintln!("promo: {err}");
        return Ok(2);
    }
    Err(err.into())
}

fn outcome_json(outcome: &RunOutcome) -> Value {
    let context: serde_json::Map<String, Value> = outcome
        .context
        .iter()
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect();
    json!({
        "run_id": outcome.run_id,
        "run_dir": outcome.run_dir.to_string_lossy(),
        "variant": outcome.variant.as_str(),
        "artifact": outcome.artifact,
        "context": context,
        "catalog": outcome.catalog.as_ref().map(|entry| json!({
            "status": entry.status,
            "product": entry.record,
        })),
    })
}

fn run_catalog(config: &EngineConfig, command: CatalogCommand) -> Result<i32> {
    let catalog = open_catalog(config)?;
    match command {
        CatalogCommand::List => print_json(&catalog.list_products()?)?,
        CatalogCommand::User { username } => print_json(&catalog.products_for_user(&username)?)?,
        CatalogCommand::Search { query } => print_json(&catalog.search_products(&query)?)?,
        CatalogCommand::Users { query } => print_json(&catalog.search_users(&query)?)?,
        CatalogCommand::Upsert {
            user,
            product,
            details,
            price,
            image,
        } => {
            let price = coerce_cost(&price).to_string();
            let (record, status) = catalog.upsert(&ProductUpsert {
                owner: &user,
                name: &product,
                details: &details,
                price: &price,
                image_path: image.as_deref(),
            })?;
            print_json(&json!({ "status": status, "product": record }))?;
        }
        CatalogCommand::Delete {
            id,
            admin,
            password,
        } => {
            let Some(actor) = catalog.authenticate(&admin, &password)? else {
                return Err(PromoError::Forbidden(format!("invalid credentials for {admin}")).into());
            };
            let Some(removed) = catalog.delete_product(&actor, id)? else {
                eprintln!("promo: no product with id {id}");
                return Ok(2);
            };
            print_json(&removed)?;
        }
    }
    Ok(0)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
