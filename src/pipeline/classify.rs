//! Folding stage errors into the caller-facing taxonomy.
//!
//! Every stage error converts into exactly one `PipelineError`. Diagnostic
//! payloads (stderr, response body, candidate list) move into
//! `ErrorDetail`; the stage error itself never leaves the pipeline.

use crate::errors::{
    DispatchError, ErrorDetail, ErrorKind, LocateError, ParseError, PipelineError, SandboxError,
    SanitizeError, WorkspaceError,
};

impl From<WorkspaceError> for PipelineError {
    fn from(err: WorkspaceError) -> Self {
        PipelineError::new(ErrorKind::Workspace, err.to_string())
    }
}

impl From<DispatchError> for PipelineError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::EmptyPrompt => PipelineError::new(
                ErrorKind::InvalidPrompt,
                "Describe the document you want before submitting",
            ),
            DispatchError::Timeout { .. } => PipelineError::new(ErrorKind::Timeout, message),
            DispatchError::Network(_) => PipelineError::new(ErrorKind::Network, message),
            DispatchError::Cancelled => PipelineError::cancelled(),
            DispatchError::ResponseTooLarge { .. } => {
                PipelineError::new(ErrorKind::MalformedResponse, message)
            }
            DispatchError::Workspace(inner) => inner.into(),
        }
    }
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        let message = err.to_string();
        match err {
            ParseError::ServiceStatus { body, .. } => {
                PipelineError::new(ErrorKind::Service, message)
                    .with_detail(ErrorDetail::ResponseBody(body))
            }
            ParseError::InvalidJson { body, .. }
            | ParseError::MissingOutput { body }
            | ParseError::OutputNotText { body } => {
                PipelineError::new(ErrorKind::MalformedResponse, message)
                    .with_detail(ErrorDetail::ResponseBody(body))
            }
        }
    }
}

impl From<SanitizeError> for PipelineError {
    fn from(err: SanitizeError) -> Self {
        PipelineError::new(ErrorKind::Sanitization, err.to_string())
    }
}

impl From<SandboxError> for PipelineError {
    fn from(err: SandboxError) -> Self {
        let message = err.to_string();
        match err {
            SandboxError::Timeout { .. } => PipelineError::new(ErrorKind::Timeout, message),
            SandboxError::Cancelled => PipelineError::cancelled(),
            SandboxError::NonZeroExit { stderr, .. } => {
                PipelineError::new(ErrorKind::Execution, message)
                    .with_detail(ErrorDetail::Stderr(stderr))
            }
            SandboxError::WriteProgram { .. } => PipelineError::new(ErrorKind::Workspace, message),
            SandboxError::Confinement(_) | SandboxError::Spawn { .. } | SandboxError::Wait(_) => {
                PipelineError::new(ErrorKind::Execution, message)
            }
        }
    }
}

impl From<LocateError> for PipelineError {
    fn from(err: LocateError) -> Self {
        let message = err.to_string();
        match err {
            LocateError::NotFound { .. } => PipelineError::new(ErrorKind::ArtifactNotFound, message),
            LocateError::Ambiguous { candidates, .. } => {
                PipelineError::new(ErrorKind::ArtifactAmbiguity, message)
                    .with_detail(ErrorDetail::Candidates(candidates))
            }
            // A file outside the workspace or owned by another request is
            // treated as no valid artifact at all.
            LocateError::OutsideWorkspace { .. } | LocateError::CorrelationMismatch { .. } => {
                PipelineError::new(ErrorKind::ArtifactNotFound, message)
            }
            LocateError::Io { .. } => PipelineError::new(ErrorKind::Workspace, message),
        }
    }
}

/// Classify any stage error.
pub fn classify(err: impl Into<PipelineError>) -> PipelineError {
    err.into()
}
