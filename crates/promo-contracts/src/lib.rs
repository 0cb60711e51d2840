pub mod chain;
pub mod context;
pub mod error;
pub mod events;
pub mod request;
pub mod runs;

pub use chain::{field, AdapterKind, ChainVariant, StepKind, StepSpec, VariantName};
pub use context::{ChainContext, StepInputs, StepOutputs};
pub use error::{PromoError, PromoResult};
pub use events::{EventWriter, RunEvent};
pub use request::{coerce_cost, Language, RequestContext, RequestKind};
pub use runs::summary::{RunStatus, RunSummary, StepRecord};

/// Fresh identifier for one pipeline run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
