pub mod catalog;
pub mod config;
pub mod ffmpeg;
mod http;
pub mod media;
pub mod pipeline;
pub mod publish;
pub mod steps;
pub mod text;
pub mod transcribe;

#[cfg(test)]
mod fakes;

pub use catalog::{Catalog, ProductRecord, ProductUpsert, UpsertStatus, UserRecord};
pub use config::{AdminSeed, EngineConfig, TelegramConfig};
pub use media::{AudioSource, MediaGenerator, VideoOptions};
pub use pipeline::{open_catalog, CatalogEntry, Pipeline, PipelineAdapters, RunOutcome};
pub use publish::{Publisher, TelegramPublisher};
pub use transcribe::{GoogleSpeechBackend, SpeechBackend, Transcriber};
