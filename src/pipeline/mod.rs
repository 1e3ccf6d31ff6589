//! The generation-to-artifact pipeline.
//!
//! ```text
//! prompt ─▶ dispatcher ─▶ generation service ─▶ response ─▶ sanitize
//!        ─▶ sandbox ─▶ locator ─▶ Artifact
//! ```
//!
//! Stages run strictly in that order inside one request-scoped workspace.
//! Any stage failure ends the run and is folded into a single
//! `PipelineError` by `classify`.

pub mod classify;
pub mod dispatcher;
#[cfg(target_os = "linux")]
mod jail;
pub mod locator;
pub mod orchestrator;
pub mod response;
pub mod sandbox;
pub mod sanitize;
pub mod types;
pub mod workspace;

pub use classify::classify;
pub use dispatcher::{GenerationClient, HttpGenerationClient, RequestDispatcher};
pub use locator::ArtifactLocator;
pub use orchestrator::{PipelineHandle, PipelineOrchestrator};
pub use response::parse_response;
pub use sandbox::{ExecutionSandbox, ResourceLimits, SandboxPolicy};
pub use sanitize::sanitize;
pub use types::{
    Artifact, ArtifactDownload, CorrelationId, ExecutionResult, GeneratedProgram,
    GenerationRequest, GenerationResponse,
};
pub use workspace::{Workspace, sweep_expired};
