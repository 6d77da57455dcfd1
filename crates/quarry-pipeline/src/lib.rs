//! Stage controller, table ranking, access gate and candidate arbitration.
//!
//! This crate implements the Quarry run loop: schema loading, concurrent
//! access checking and table ranking, the access gate, parallel candidate
//! generation, four-check arbitration with bounded retry, and the
//! explanation stage.

pub mod arbiter;
pub mod checks;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod events;
pub mod explain;
pub mod gate;
pub mod generation;
pub mod prompts;
pub mod retry;
pub mod schema_format;
pub mod state;
pub mod store;

pub use arbiter::{retry_guidance, select, CandidateArbiter};
pub use collaborators::{
    AccessDirectory, Collaborators, EmbeddingService, LlmEmbedder, LlmGenerator, OpenAccess,
    Prompt, SchemaStore, SqlparserParser, StaticAccessDirectory, StructuralParser, TextGenerator,
};
pub use config::{PipelineConfig, SignalWeights, VariantSpec};
pub use controller::{next_after_validate, Controller, PipelineResult, Stage};
pub use discovery::TableRanker;
pub use events::{EventEmitter, PipelineEvent};
pub use explain::{safety_report, Explainer, Explanation};
pub use gate::{apply_gate, GateResult};
pub use generation::{strip_code_fences, CandidateGenerator};
pub use retry::{execute_with_retry, BackoffPolicy, RetryingGenerator};
pub use schema_format::format_schema;
pub use state::{AttemptRecord, PipelineState, StateUpdate};
#[cfg(feature = "sqlite")]
pub use store::SqliteSchemaStore;
pub use store::{CachedSchemaStore, JsonSchemaStore, StaticSchemaStore};
