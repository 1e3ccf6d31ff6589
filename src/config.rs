//! Configuration for slidesmith, read from `.slidesmith/slidesmith.toml`.
//!
//! Values are layered: file → environment → CLI. A missing file means
//! defaults everywhere except the generation endpoint, which has none.
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! endpoint = "https://generator.example.com/webhook"
//! timeout_secs = 120
//!
//! [execution]
//! interpreter = "python3"
//! args = []
//! program_file = "generated.py"
//! timeout_secs = 120
//! isolate_network = true
//! confine_filesystem = true
//! read_only_paths = ["/usr", "/bin", "/lib", "/etc/ld.so.cache"]
//! path = "/usr/local/bin:/usr/bin:/bin"
//! max_output_bytes = 1048576
//!
//! [execution.limits]   # 0 disables a limit
//! cpu_secs = 120
//! max_file_bytes = 268435456
//! max_open_files = 256
//! max_memory_bytes = 4294967296
//!
//! [artifact]
//! extension = ".pptx"
//! allowed_extensions = [".pptx", ".docx", ".xlsx", ".pdf"]
//! download_name = "Presentation.pptx"
//!
//! [workspace]
//! root = ".slidesmith/workspaces"
//! retention_secs = 3600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pipeline::sandbox::{
    DEFAULT_PATH, ResourceLimits, SandboxPolicy, default_read_only_paths,
};
use crate::pipeline::types::normalize_extension;

/// Directory holding the config file and, by default, workspaces.
pub const CONFIG_DIR: &str = ".slidesmith";
pub const CONFIG_FILE: &str = "slidesmith.toml";

pub const ENV_ENDPOINT: &str = "SLIDESMITH_ENDPOINT";
pub const ENV_NETWORK_TIMEOUT: &str = "SLIDESMITH_NETWORK_TIMEOUT";
pub const ENV_EXEC_TIMEOUT: &str = "SLIDESMITH_EXEC_TIMEOUT";
pub const ENV_ARTIFACT_EXTENSION: &str = "SLIDESMITH_ARTIFACT_EXTENSION";
pub const ENV_RETENTION: &str = "SLIDESMITH_RETENTION";
pub const ENV_INTERPRETER: &str = "SLIDESMITH_INTERPRETER";

/// The remote generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Endpoint the prompt is POSTed to. No built-in default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// How generated programs are run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Extra interpreter arguments placed before the program file.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_program_file")]
    pub program_file: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Run the program in an empty network namespace (Linux only).
    #[serde(default = "default_true")]
    pub isolate_network: bool,
    /// Run the program with its workspace as the root directory (Linux only).
    #[serde(default = "default_true")]
    pub confine_filesystem: bool,
    /// Host paths mounted read-only inside a confined workspace.
    #[serde(default = "default_read_only_paths")]
    pub read_only_paths: Vec<PathBuf>,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default)]
    pub limits: LimitsSection,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_program_file() -> String {
    "generated.py".to_string()
}

fn default_true() -> bool {
    true
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            program_file: default_program_file(),
            timeout_secs: default_timeout_secs(),
            isolate_network: default_true(),
            confine_filesystem: default_true(),
            read_only_paths: default_read_only_paths(),
            path: default_path(),
            max_output_bytes: default_max_output_bytes(),
            limits: LimitsSection::default(),
        }
    }
}

/// Kernel resource limits for generated programs. `0` disables a limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSection {
    #[serde(default = "default_cpu_secs")]
    pub cpu_secs: u64,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u64,
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: u64,
}

fn default_cpu_secs() -> u64 {
    120
}

fn default_max_file_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_max_open_files() -> u64 {
    256
}

fn default_max_memory_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            cpu_secs: default_cpu_secs(),
            max_file_bytes: default_max_file_bytes(),
            max_open_files: default_max_open_files(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

impl LimitsSection {
    pub fn to_resource_limits(&self) -> ResourceLimits {
        let limit = |value: u64| (value > 0).then_some(value);
        ResourceLimits {
            cpu_secs: limit(self.cpu_secs),
            max_file_bytes: limit(self.max_file_bytes),
            max_open_files: limit(self.max_open_files),
            max_memory_bytes: limit(self.max_memory_bytes),
        }
    }
}

/// What a generated program is expected to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSection {
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    /// Suggested download file name; defaults to the produced file's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_name: Option<String>,
}

fn default_extension() -> String {
    ".pptx".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    [".pptx", ".docx", ".xlsx", ".pdf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ArtifactSection {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            allowed_extensions: default_allowed_extensions(),
            download_name: None,
        }
    }
}

/// Where request workspaces live and how long failed ones are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Relative paths are resolved against the project directory.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("workspaces")
}

fn default_retention_secs() -> u64 {
    3600
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            retention_secs: default_retention_secs(),
        }
    }
}

/// Contents of `slidesmith.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlidesmithToml {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub artifact: ArtifactSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
}

impl SlidesmithToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse slidesmith.toml")
    }

    /// Load `slidesmith.toml` from `config_dir`, or defaults if it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize slidesmith.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Advisory problems that still leave a runnable configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.service.endpoint.is_none() {
            warnings.push(format!(
                "No generation endpoint configured: set [service].endpoint or {}",
                ENV_ENDPOINT
            ));
        }

        let extension = self.artifact.extension.trim();
        if !extension.is_empty() && !extension.starts_with('.') {
            warnings.push(format!(
                "Artifact extension '{}' should start with '.'",
                extension
            ));
        }

        warnings
    }

    /// Problems that make the configuration unusable. Nothing runs while any remain.
    pub fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(endpoint) = self.service.endpoint.as_deref() {
            match reqwest::Url::parse(endpoint) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "Endpoint '{}' uses unsupported scheme '{}': expected http or https",
                    endpoint,
                    url.scheme()
                )),
                Err(e) => errors.push(format!("Invalid endpoint '{}': {}", endpoint, e)),
            }
        }

        if self.service.timeout_secs == 0 {
            errors.push("[service].timeout_secs must be greater than 0".to_string());
        }
        if self.execution.timeout_secs == 0 {
            errors.push("[execution].timeout_secs must be greater than 0".to_string());
        }
        if self.execution.interpreter.trim().is_empty() {
            errors.push("[execution].interpreter is empty".to_string());
        }
        if !is_plain_file_name(&self.execution.program_file) {
            errors.push(format!(
                "[execution].program_file '{}' must be a plain file name",
                self.execution.program_file
            ));
        }
        for path in &self.execution.read_only_paths {
            let normal = path
                .components()
                .skip(1)
                .all(|c| matches!(c, std::path::Component::Normal(_)));
            if !path.is_absolute() || !normal {
                errors.push(format!(
                    "[execution].read_only_paths entry '{}' must be an absolute path without '..'",
                    path.display()
                ));
            }
        }

        let extension = self.artifact.extension.trim();
        let normalized = normalize_extension(extension);
        if normalized.len() < 2 {
            errors.push("[artifact].extension is empty".to_string());
        }
        let allowed = self
            .artifact
            .allowed_extensions
            .iter()
            .any(|e| normalize_extension(e) == normalized);
        if !allowed {
            errors.push(format!(
                "Artifact extension '{}' is not in allowed_extensions {:?}",
                extension, self.artifact.allowed_extensions
            ));
        }

        errors
    }
}

/// A single path component naming a file, such as `generated.py`.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Overrides read from `SLIDESMITH_*` environment variables.
///
/// Captured once so the merge itself stays a pure function.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub endpoint: Option<String>,
    pub network_timeout: Option<String>,
    pub exec_timeout: Option<String>,
    pub extension: Option<String>,
    pub retention: Option<String>,
    pub interpreter: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            endpoint: var(ENV_ENDPOINT),
            network_timeout: var(ENV_NETWORK_TIMEOUT),
            exec_timeout: var(ENV_EXEC_TIMEOUT),
            extension: var(ENV_ARTIFACT_EXTENSION),
            retention: var(ENV_RETENTION),
            interpreter: var(ENV_INTERPRETER),
        }
    }

    fn apply(&self, toml: &mut SlidesmithToml) -> Result<()> {
        if let Some(endpoint) = &self.endpoint {
            toml.service.endpoint = Some(endpoint.clone());
        }
        if let Some(secs) = &self.network_timeout {
            toml.service.timeout_secs = parse_secs(ENV_NETWORK_TIMEOUT, secs)?;
        }
        if let Some(secs) = &self.exec_timeout {
            toml.execution.timeout_secs = parse_secs(ENV_EXEC_TIMEOUT, secs)?;
        }
        if let Some(extension) = &self.extension {
            toml.artifact.extension = extension.clone();
        }
        if let Some(secs) = &self.retention {
            toml.workspace.retention_secs = parse_secs(ENV_RETENTION, secs)?;
        }
        if let Some(interpreter) = &self.interpreter {
            toml.execution.interpreter = interpreter.clone();
        }
        Ok(())
    }
}

fn parse_secs(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number of seconds, got '{}'", name, value))
}

/// Overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub exec_timeout_secs: Option<u64>,
    pub extension: Option<String>,
}

impl CliOverrides {
    fn apply(&self, toml: &mut SlidesmithToml) {
        if let Some(endpoint) = &self.endpoint {
            toml.service.endpoint = Some(endpoint.clone());
        }
        if let Some(secs) = self.timeout_secs {
            toml.service.timeout_secs = secs;
        }
        if let Some(secs) = self.exec_timeout_secs {
            toml.execution.timeout_secs = secs;
        }
        if let Some(extension) = &self.extension {
            toml.artifact.extension = extension.clone();
        }
    }
}

/// Effective configuration after merging file, environment and CLI.
#[derive(Debug, Clone)]
pub struct SlidesmithConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    /// Merged settings.
    pub toml: SlidesmithToml,
}

impl SlidesmithConfig {
    /// Load configuration for `project_dir`, applying environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_overrides(project_dir, &EnvOverrides::from_env(), &CliOverrides::default())
    }

    /// Load configuration for `project_dir` and apply `env` then `cli` on top.
    pub fn with_overrides(
        project_dir: PathBuf,
        env: &EnvOverrides,
        cli: &CliOverrides,
    ) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = SlidesmithToml::load_or_default(&config_dir)?;
        env.apply(&mut toml)?;
        cli.apply(&mut toml);

        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    /// Build a configuration from an in-memory file, without overrides.
    pub fn from_toml(project_dir: PathBuf, toml: SlidesmithToml) -> Self {
        let config_dir = project_dir.join(CONFIG_DIR);
        Self {
            project_dir,
            config_dir,
            toml,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.toml.service.endpoint.as_deref()
    }

    /// The endpoint, or an error explaining how to set one.
    pub fn require_endpoint(&self) -> Result<&str> {
        self.endpoint().with_context(|| {
            format!(
                "No generation endpoint configured. Set [service].endpoint in {}, {} or --endpoint",
                self.config_path().display(),
                ENV_ENDPOINT
            )
        })
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.service.timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.execution.timeout_secs)
    }

    /// Artifact extension, lowercase with a leading dot.
    pub fn extension(&self) -> String {
        normalize_extension(&self.toml.artifact.extension)
    }

    pub fn download_name(&self) -> Option<&str> {
        self.toml.artifact.download_name.as_deref()
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.toml.workspace.retention_secs)
    }

    /// Workspace root, resolved against the project directory when relative.
    pub fn workspace_root(&self) -> PathBuf {
        let root = &self.toml.workspace.root;
        if root.is_absolute() {
            root.clone()
        } else {
            self.project_dir.join(root)
        }
    }

    pub fn sandbox_policy(&self) -> SandboxPolicy {
        let exec = &self.toml.execution;
        SandboxPolicy {
            interpreter: exec.interpreter.clone(),
            args: exec.args.clone(),
            program_file: exec.program_file.clone(),
            timeout: self.exec_timeout(),
            isolate_network: exec.isolate_network,
            confine_filesystem: exec.confine_filesystem,
            read_only_paths: exec.read_only_paths.clone(),
            path: exec.path.clone(),
            max_output_bytes: exec.max_output_bytes,
            limits: exec.limits.to_resource_limits(),
        }
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// Fail with every configuration error at once, if there are any.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors = self.toml.errors();
        if errors.is_empty() {
            return Ok(());
        }
        anyhow::bail!(
            "Invalid configuration in {}:\n  - {}",
            self.config_path().display(),
            errors.join("\n  - ")
        )
    }
}
