//! Typed error hierarchy for the generation pipeline.
//!
//! Each pipeline stage owns one error enum describing how it can fail:
//! - `WorkspaceError`: creating, reading or cleaning a request workspace
//! - `DispatchError`: sending the prompt to the generation service
//! - `ParseError`: reading the service's response envelope
//! - `SanitizeError`: stripping fence markup from generated text
//! - `SandboxError`: running the generated program
//! - `LocateError`: finding the artifact the program produced
//!
//! Stage errors never leave the pipeline. `pipeline::classify` folds them into
//! a single `PipelineError` whose `ErrorKind` is the only taxonomy callers see.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::types::CorrelationId;

/// Errors from creating or maintaining a request workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Failed to create workspace at {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace {path} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("Failed to scan workspace {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from submitting a prompt to the generation service.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("Generation service did not respond within {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("Could not reach generation service: {0}")]
    Network(String),

    #[error("Generation request was cancelled")]
    Cancelled,

    #[error("Generation service response exceeded {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Errors from reading the generation service's response envelope.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Generation service returned HTTP {status}")]
    ServiceStatus { status: u16, body: String },

    #[error("Response body is not valid JSON: {source}")]
    InvalidJson {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Response has no `output` field")]
    MissingOutput { body: String },

    #[error("Response `output` field is not text")]
    OutputNotText { body: String },
}

/// Errors from sanitizing generated source text.
#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("Generated program is empty after removing fence markup")]
    Empty,
}

/// Errors from running a generated program.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to write program to {path}: {source}")]
    WriteProgram {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to prepare the sandbox: {0}")]
    Confinement(#[source] std::io::Error),

    #[error("Failed to start `{interpreter}`: {source}")]
    Spawn {
        interpreter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait for program: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Program exceeded the {}s execution limit and was killed", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("Program exited with code {exit_code}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Program execution was cancelled")]
    Cancelled,
}

/// Errors from locating the artifact a program produced.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("No {extension} file was produced in {workspace}")]
    NotFound {
        extension: String,
        workspace: PathBuf,
    },

    #[error("Program produced {} {extension} files; expected exactly one", .candidates.len())]
    Ambiguous {
        extension: String,
        candidates: Vec<PathBuf>,
    },

    #[error("Artifact {path} resolves outside its workspace")]
    OutsideWorkspace { path: PathBuf },

    #[error("Workspace belongs to request {found}, not {expected}")]
    CorrelationMismatch {
        expected: CorrelationId,
        found: CorrelationId,
    },

    #[error("Failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The fixed set of failure kinds a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "invalid_prompt")]
    InvalidPrompt,
    #[serde(rename = "network_error")]
    Network,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "service_error")]
    Service,
    #[serde(rename = "malformed_response")]
    MalformedResponse,
    #[serde(rename = "sanitization_error")]
    Sanitization,
    #[serde(rename = "execution_error")]
    Execution,
    #[serde(rename = "artifact_not_found")]
    ArtifactNotFound,
    #[serde(rename = "artifact_ambiguity")]
    ArtifactAmbiguity,
    #[serde(rename = "workspace_error")]
    Workspace,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPrompt => "invalid_prompt",
            Self::Network => "network_error",
            Self::Timeout => "timeout",
            Self::Service => "service_error",
            Self::MalformedResponse => "malformed_response",
            Self::Sanitization => "sanitization_error",
            Self::Execution => "execution_error",
            Self::ArtifactNotFound => "artifact_not_found",
            Self::ArtifactAmbiguity => "artifact_ambiguity",
            Self::Workspace => "workspace_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Short human-readable headline shown ahead of the message.
    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidPrompt => "Please enter a prompt",
            Self::Network => "Could not reach the generation service",
            Self::Timeout => "Timed out",
            Self::Service => "Generation failed",
            Self::MalformedResponse => "Unexpected response from the generation service",
            Self::Sanitization => "The generation service returned no program",
            Self::Execution => "Error while generating the document",
            Self::ArtifactNotFound => "Document not found after generation",
            Self::ArtifactAmbiguity => "Generation produced more than one document",
            Self::Workspace => "Workspace error",
            Self::Cancelled => "Generation cancelled",
        }
    }

    /// Only connectivity failures are worth retrying; everything else is
    /// deterministic for a given response.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic payload attached to a `PipelineError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ErrorDetail {
    /// Captured standard error of the generated program.
    Stderr(String),
    /// Raw (possibly truncated) body returned by the generation service.
    ResponseBody(String),
    /// Every file that could have been the artifact.
    Candidates(Vec<PathBuf>),
}

/// The single error type returned by the pipeline to its caller.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{}: {message}", .kind.title())]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "The request was cancelled before it finished")
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Captured stderr, if this error carries one.
    pub fn stderr(&self) -> Option<&str> {
        match &self.detail {
            Some(ErrorDetail::Stderr(stderr)) => Some(stderr),
            _ => None,
        }
    }

    /// Candidate artifact paths, if this error carries them.
    pub fn candidates(&self) -> Option<&[PathBuf]> {
        match &self.detail {
            Some(ErrorDetail::Candidates(paths)) => Some(paths),
            _ => None,
        }
    }
}
