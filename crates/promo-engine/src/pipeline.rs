use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use promo_contracts::runs::summary::write_summary;
use promo_contracts::{
    field, new_run_id, ChainContext, ChainVariant, EventWriter, PromoResult, RequestContext,
    RequestKind, RunEvent, RunStatus, RunSummary, StepRecord, VariantName,
};

use crate::catalog::{publish_image, Catalog, ProductRecord, ProductUpsert, UpsertStatus};
use crate::config::EngineConfig;
use crate::media::{
    Clock, ImageBackend, ImagenBackend, PollSettings, SystemClock, VeoBackend, VideoBackend,
    VideoOptions,
};
use crate::publish::{Publisher, TelegramPublisher};
use crate::steps::{execute_step, StepAdapters, StepEnv};
use crate::text::{GeminiTextModel, TextModel};

/// The collaborators a pipeline drives. Shared so callers can keep handles.
#[derive(Clone)]
pub struct PipelineAdapters {
    pub text: Arc<dyn TextModel>,
    pub image: Arc<dyn ImageBackend>,
    pub video: Arc<dyn VideoBackend>,
    pub publisher: Arc<dyn Publisher>,
    pub clock: Arc<dyn Clock>,
}

impl PipelineAdapters {
    /// Gemini, Imagen, Veo and Telegram backed adapters.
    pub fn live(config: &EngineConfig) -> Self {
        Self {
            text: Arc::new(GeminiTextModel::new(config)),
            image: Arc::new(ImagenBackend::new(config)),
            video: Arc::new(VeoBackend::new(config)),
            publisher: Arc::new(TelegramPublisher::new(config)),
            clock: Arc::new(SystemClock::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub record: ProductRecord,
    pub status: UpsertStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub variant: VariantName,
    /// The final step's output.
    pub artifact: Option<String>,
    pub context: ChainContext,
    pub catalog: Option<CatalogEntry>,
}

pub struct Pipeline {
    config: EngineConfig,
    adapters: PipelineAdapters,
    catalog: Option<Catalog>,
    video: VideoOptions,
}

impl Pipeline {
    pub fn new(config: EngineConfig, adapters: PipelineAdapters) -> Self {
        Self {
            config,
            adapters,
            catalog: None,
            video: VideoOptions::default(),
        }
    }

    /// Live adapters plus the on-disk catalog, with the admin account seeded
    /// when one is configured.
    pub fn from_config(config: EngineConfig) -> PromoResult<Self> {
        let catalog = open_catalog(&config)?;
        let adapters = PipelineAdapters::live(&config);
        Ok(Self::new(config, adapters).with_catalog(catalog))
    }

    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_video_options(mut self, options: VideoOptions) -> Self {
        self.video = options;
        self
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Runs one request end to end. Everything under the run directory except
    /// `events.jsonl` and `summary.json` is scratch; a full promotion removes its
    /// generated media whether or not the chain succeeded.
    pub fn run(&self, kind: RequestKind, request: &RequestContext) -> PromoResult<RunOutcome> {
        let run_id = new_run_id();
        let run_dir = self.config.work_dir.join(&run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("failed to create {}", run_dir.display()))?;
        let events = EventWriter::new(run_dir.join("events.jsonl"), run_id.clone());
        let mut ledger = RunLedger {
            kind,
            started_at: now_utc_iso(),
            variant: None,
            steps: Vec::new(),
        };
        tracing::info!(%run_id, kind = kind.as_str(), "run started");

        let result = self.execute(kind, request, &run_id, &run_dir, &events, &mut ledger);

        let media_dir = media_dir(&run_dir);
        if kind.cleans_up_media() && media_dir.exists() {
            match fs::remove_dir_all(&media_dir) {
                Ok(()) => {
                    let path = media_dir.to_string_lossy().into_owned();
                    record_event(&events, &RunEvent::MediaCleaned { path });
                }
                Err(err) => {
                    tracing::warn!(path = %media_dir.display(), error = %err, "media cleanup failed")
                }
            }
        }

        self.finish(&run_id, &run_dir, &events, ledger, &result);
        result
    }

    fn execute(
        &self,
        kind: RequestKind,
        request: &RequestContext,
        run_id: &str,
        run_dir: &Path,
        events: &EventWriter,
        ledger: &mut RunLedger,
    ) -> PromoResult<RunOutcome> {
        let request = request.trimmed();
        record_event(
            events,
            &RunEvent::RunStarted {
                kind: kind.as_str().to_string(),
                user_name: request.user_name.clone(),
                product_name: request.product_name.clone(),
            },
        );
        request.validate(kind)?;

        let variant = ChainVariant::for_request(kind, request.image_on_disk().is_some());
        variant.validate()?;
        ledger.variant = Some(variant.name);
        tracing::info!(variant = %variant.name, steps = variant.steps.len(), "chain selected");
        record_event(
            events,
            &RunEvent::ChainSelected {
                variant: variant.name.to_string(),
                steps: variant.step_names().into_iter().map(str::to_string).collect(),
            },
        );

        let env = StepEnv {
            run_id: run_id.to_string(),
            media_dir: media_dir(run_dir),
            video: self.video.clone(),
            poll: PollSettings::from_config(&self.config),
            ffmpeg_bin: self.config.ffmpeg_bin.clone(),
        };
        let adapters = StepAdapters {
            text: self.adapters.text.as_ref(),
            image: self.adapters.image.as_ref(),
            video: self.adapters.video.as_ref(),
            publisher: self.adapters.publisher.as_ref(),
            clock: self.adapters.clock.as_ref(),
        };

        let mut context = ChainContext::seed(&request, variant)?;
        for (index, step) in variant.steps.iter().enumerate() {
            record_event(
                events,
                &RunEvent::StepStarted {
                    index,
                    step: step.name.to_string(),
                },
            );
            let started = Instant::now();
            let result = context
                .inputs_for(step)
                .and_then(|inputs| execute_step(step, &inputs, &env, &adapters))
                .and_then(|outputs| context.merge(step, outputs));
            let elapsed_ms = started.elapsed().as_millis() as u64;
            ledger.steps.push(StepRecord {
                step: step.name.to_string(),
                elapsed_ms,
                ok: result.is_ok(),
            });
            if let Err(err) = result {
                tracing::warn!(step = step.name, error = %err, "step failed");
                record_event(
                    events,
                    &RunEvent::StepFailed {
                        index,
                        step: step.name.to_string(),
                        error_kind: err.kind().to_string(),
                        message: format!("{err:#}"),
                    },
                );
                return Err(err);
            }
            tracing::info!(step = step.name, elapsed_ms, "step finished");
            record_event(
                events,
                &RunEvent::StepFinished {
                    index,
                    step: step.name.to_string(),
                    outputs: step.outputs.iter().map(|key| key.to_string()).collect(),
                    elapsed_ms,
                },
            );
        }

        let catalog = if kind.upserts_catalog() {
            self.upsert_product(&request, &context, events)
        } else {
            None
        };
        let artifact = variant
            .artifact_field()
            .and_then(|key| context.get(key))
            .map(str::to_string);

        Ok(RunOutcome {
            run_id: run_id.to_string(),
            run_dir: run_dir.to_path_buf(),
            variant: variant.name,
            artifact,
            context,
            catalog,
        })
    }

    /// Catalog writes happen after publishing succeeded; a failure here is
    /// logged and leaves the run successful.
    fn upsert_product(
        &self,
        request: &RequestContext,
        context: &ChainContext,
        events: &EventWriter,
    ) -> Option<CatalogEntry> {
        let catalog = self.catalog.as_ref()?;
        match self.write_catalog(catalog, request, context) {
            Ok(entry) => {
                record_event(
                    events,
                    &RunEvent::CatalogUpserted {
                        product_id: entry.record.id,
                        status: entry.status.as_str().to_string(),
                    },
                );
                Some(entry)
            }
            Err(err) => {
                tracing::warn!(error = %err, product = %request.product_name, "catalog upsert failed");
                None
            }
        }
    }

    fn write_catalog(
        &self,
        catalog: &Catalog,
        request: &RequestContext,
        context: &ChainContext,
    ) -> PromoResult<CatalogEntry> {
        let public_image = match context.get(field::IMAGE_PATH) {
            Some(image) => Some(publish_image(Path::new(image), &self.config.public_dir)?),
            None => None,
        };
        let public_image = public_image.map(|path| path.to_string_lossy().into_owned());
        let price = request.cost_value().to_string();
        let (record, status) = catalog.upsert(&ProductUpsert {
            owner: &request.user_name,
            name: &request.product_name,
            details: &request.product_details,
            price: &price,
            image_path: public_image.as_deref(),
        })?;
        Ok(CatalogEntry { record, status })
    }

    fn finish(
        &self,
        run_id: &str,
        run_dir: &Path,
        events: &EventWriter,
        ledger: RunLedger,
        result: &PromoResult<RunOutcome>,
    ) {
        let (status, artifact, error) = match result {
            Ok(outcome) => (RunStatus::Ok, outcome.artifact.clone(), None),
            Err(err) => (RunStatus::Failed, None, Some(format!("{err:#}"))),
        };
        record_event(
            events,
            &RunEvent::RunFinished {
                status: status.as_str().to_string(),
                artifact: artifact.clone(),
                error: error.clone(),
            },
        );
        let summary = RunSummary {
            run_id: run_id.to_string(),
            kind: ledger.kind.as_str().to_string(),
            variant: ledger.variant.map(|name| name.to_string()),
            status,
            started_at: ledger.started_at,
            finished_at: now_utc_iso(),
            steps: ledger.steps,
            artifact,
            error,
        };
        if let Err(err) = write_summary(&run_dir.join("summary.json"), &summary, None) {
            tracing::warn!(error = %err, "failed to write run summary");
        }
        tracing::info!(%run_id, status = status.as_str(), "run finished");
    }
}

/// Opens the catalog database and seeds the configured admin account.
pub fn open_catalog(config: &EngineConfig) -> PromoResult<Catalog> {
    let catalog = Catalog::open(&config.catalog_db)?;
    if let Some(admin) = config.admin.as_ref() {
        catalog.ensure_admin(&admin.username, &admin.password)?;
    }
    Ok(catalog)
}

struct RunLedger {
    kind: RequestKind,
    started_at: String,
    variant: Option<VariantName>,
    steps: Vec<StepRecord>,
}

fn media_dir(run_dir: &Path) -> PathBuf {
    run_dir.join("media")
}

fn record_event(events: &EventWriter, event: &RunEvent) {
    if let Err(err) = events.emit(event) {
        tracing::warn!(path = %events.path().display(), error = %err, "failed to record run event");
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
