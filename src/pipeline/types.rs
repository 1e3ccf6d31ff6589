use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique token binding one request to its workspace, program and artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for CorrelationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A prompt on its way to the generation service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub correlation_id: CorrelationId,
    pub timeout: Duration,
}

/// Raw reply from the generation service, consumed only by the response parser.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub status: u16,
    pub body: String,
}

/// Sanitized source text ready to execute.
#[derive(Debug, Clone)]
pub struct GeneratedProgram {
    pub source: String,
    pub correlation_id: CorrelationId,
}

/// Wall-clock bounds of one program execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionWindow {
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl ExecutionWindow {
    /// Whether `time` falls inside the window, allowing `slack` on either side
    /// for filesystems whose timestamps lag the system clock.
    pub fn contains(&self, time: SystemTime, slack: Duration) -> bool {
        let lower = self
            .started_at
            .checked_sub(slack)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let upper = self.finished_at + slack;
        time >= lower && time <= upper
    }

    /// `time` pulled inside the window. Used for timestamps accepted within the slack.
    pub fn clamp(&self, time: SystemTime) -> SystemTime {
        time.clamp(self.started_at, self.finished_at.max(self.started_at))
    }
}

/// Outcome of a program that ran to completion with exit status 0.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub window: ExecutionWindow,
    /// Where the program source was written inside the workspace.
    pub program_path: PathBuf,
}

/// The document a generated program produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub produced_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub extension: String,
}

impl Artifact {
    /// File name of the artifact as the program wrote it.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("artifact{}", self.extension))
    }

    /// MIME type derived from the artifact's extension.
    pub fn mime_type(&self) -> String {
        mime_for_extension(&self.extension)
    }

    /// The request workspace that owns this artifact: the nearest ancestor
    /// named after its correlation id.
    pub fn workspace_dir(&self) -> Option<&Path> {
        let name = self.correlation_id.to_string();
        self.path
            .ancestors()
            .skip(1)
            .find(|dir| dir.file_name().and_then(|n| n.to_str()) == Some(name.as_str()))
    }

    /// Read the artifact into a caller-facing download.
    ///
    /// `name_override` replaces the produced file name; the artifact's own
    /// extension is appended when the override lacks it.
    pub async fn download(&self, name_override: Option<&str>) -> std::io::Result<ArtifactDownload> {
        let bytes = tokio::fs::read(&self.path).await?;
        let filename = match name_override {
            Some(name) if name.to_lowercase().ends_with(&self.extension) => name.to_string(),
            Some(name) => format!("{}{}", name, self.extension),
            None => self.file_name(),
        };
        Ok(ArtifactDownload {
            bytes,
            filename,
            mime_type: self.mime_type(),
        })
    }
}

/// Artifact bytes plus the metadata a browser needs to save them.
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

/// Normalize an extension to lowercase with a single leading dot.
pub fn normalize_extension(extension: &str) -> String {
    let trimmed = extension.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

pub fn mime_for_extension(extension: &str) -> String {
    mime_guess::from_ext(extension.trim_start_matches('.'))
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
