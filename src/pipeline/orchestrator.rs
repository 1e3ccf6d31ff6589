//! Sequencing the pipeline stages for one request.
//!
//! `submit` validates the prompt and creates the workspace synchronously, so
//! a caller gets the correlation id (or an `InvalidPrompt`) right away, then
//! runs the remaining stages on a tokio task behind a `PipelineHandle`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::dispatcher::{GenerationClient, HttpGenerationClient, RequestDispatcher};
use super::locator::ArtifactLocator;
use super::response::parse_response;
use super::sandbox::ExecutionSandbox;
use super::sanitize::sanitize;
use super::types::{Artifact, CorrelationId, GeneratedProgram, GenerationRequest};
use super::workspace::{Workspace, schedule_removal};
use crate::config::SlidesmithConfig;
use crate::errors::{PipelineError, WorkspaceError};

/// Runs generation pipelines. Cheap to clone; clones share their stages.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    dispatcher: Arc<RequestDispatcher>,
    sandbox: Arc<ExecutionSandbox>,
    locator: Arc<ArtifactLocator>,
    retention: Duration,
}

impl PipelineOrchestrator {
    pub fn new(
        dispatcher: RequestDispatcher,
        sandbox: ExecutionSandbox,
        locator: ArtifactLocator,
        retention: Duration,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            sandbox: Arc::new(sandbox),
            locator: Arc::new(locator),
            retention,
        }
    }

    /// Build an orchestrator talking HTTP to the configured endpoint.
    ///
    /// Refuses a configuration with errors rather than running with it.
    pub fn from_config(config: &SlidesmithConfig) -> Result<Self> {
        config.ensure_valid()?;
        let client = HttpGenerationClient::new(config.require_endpoint()?)?;
        Self::with_client(config, Arc::new(client))
    }

    /// Build an orchestrator from `config` with a caller-supplied client.
    pub fn with_client(
        config: &SlidesmithConfig,
        client: Arc<dyn GenerationClient>,
    ) -> Result<Self> {
        config.ensure_valid()?;
        let dispatcher =
            RequestDispatcher::new(client, config.workspace_root(), config.network_timeout());
        Ok(Self::new(
            dispatcher,
            ExecutionSandbox::new(config.sandbox_policy()),
            ArtifactLocator::new(&config.extension()),
            config.retention(),
        ))
    }

    pub fn workspace_root(&self) -> &Path {
        self.dispatcher.workspace_root()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Start a pipeline for `prompt` in the background.
    ///
    /// Fails immediately for a blank prompt or when the workspace cannot be
    /// created; every later failure is reported through the handle.
    pub fn submit(&self, prompt: &str) -> Result<PipelineHandle, PipelineError> {
        let (request, workspace) = self.dispatcher.prepare(prompt)?;
        let correlation_id = request.correlation_id;
        let cancel = CancellationToken::new();

        let this = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { this.execute(request, workspace, &token).await });

        Ok(PipelineHandle {
            correlation_id,
            cancel,
            task,
        })
    }

    /// Run a pipeline for `prompt` to completion on the current task.
    pub async fn run(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Artifact, PipelineError> {
        let (request, workspace) = self.dispatcher.prepare(prompt)?;
        self.execute(request, workspace, cancel).await
    }

    /// Delete the workspace an artifact was produced in, artifact included.
    pub fn release(&self, artifact: &Artifact) -> Result<(), WorkspaceError> {
        let Some(dir) = artifact.workspace_dir() else {
            return Ok(());
        };
        if !dir.starts_with(self.workspace_root()) {
            return Ok(());
        }
        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Remove {
                path: dir.to_path_buf(),
                source,
            }),
        }
    }

    async fn execute(
        &self,
        request: GenerationRequest,
        workspace: Workspace,
        cancel: &CancellationToken,
    ) -> Result<Artifact, PipelineError> {
        let span = tracing::info_span!("pipeline", correlation_id = %request.correlation_id);
        async {
            let started = Instant::now();
            tracing::info!(prompt_len = request.prompt.len(), "pipeline started");

            let result = self.stages(&request, &workspace, cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(artifact) => {
                    // Only the artifact outlives a successful run.
                    if let Err(e) = workspace.retain_only(&artifact.path) {
                        tracing::warn!(error = %e, "failed to clean workspace after success");
                    }
                    tracing::info!(elapsed_ms, size_bytes = artifact.size_bytes, "pipeline succeeded");
                }
                Err(err) => {
                    tracing::warn!(
                        elapsed_ms,
                        kind = %err.kind,
                        retention_secs = self.retention.as_secs(),
                        "pipeline failed, workspace retained for diagnostics"
                    );
                    schedule_removal(workspace.path().to_path_buf(), self.retention);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn stages(
        &self,
        request: &GenerationRequest,
        workspace: &Workspace,
        cancel: &CancellationToken,
    ) -> Result<Artifact, PipelineError> {
        let started = Instant::now();
        let response = self.dispatcher.dispatch(request, cancel).await?;
        tracing::info!(
            status = response.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation service responded"
        );

        let output = parse_response(&response)?;
        let source = sanitize(&output)?;
        let program = GeneratedProgram {
            source: source.to_string(),
            correlation_id: request.correlation_id,
        };
        tracing::debug!(source_len = program.source.len(), "program sanitized");

        let baseline = workspace.snapshot()?;
        let execution = self.sandbox.execute(&program, workspace, cancel).await?;
        tracing::debug!(stdout_len = execution.stdout.len(), "program output captured");

        let artifact =
            self.locator
                .locate(workspace, request.correlation_id, &baseline, &execution)?;
        tracing::info!(artifact = %artifact.file_name(), "artifact located");
        Ok(artifact)
    }
}

/// A running pipeline.
pub struct PipelineHandle {
    correlation_id: CorrelationId,
    cancel: CancellationToken,
    task: JoinHandle<Result<Artifact, PipelineError>>,
}

impl PipelineHandle {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Abort the network call or kill the running program.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the pipeline's single outcome.
    pub async fn wait(self) -> Result<Artifact, PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(PipelineError::cancelled()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DispatchError, ErrorKind};
    use crate::pipeline::sandbox::SandboxPolicy;
    use crate::pipeline::types::GenerationResponse;
    use async_trait::async_trait;

    /// Replies with a fixed program after an optional delay.
    struct FixedProgram {
        output: String,
        delay: Duration,
    }

    #[async_trait]
    impl GenerationClient for FixedProgram {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<GenerationResponse, DispatchError> {
            tokio::time::sleep(self.delay).await;
            Ok(GenerationResponse {
                status: 200,
                body: serde_json::json!({ "output": self.output }).to_string(),
            })
        }
    }

    fn orchestrator(root: &Path, output: &str, retention: Duration) -> PipelineOrchestrator {
        let client = Arc::new(FixedProgram {
            output: output.to_string(),
            delay: Duration::ZERO,
        });
        let policy = SandboxPolicy {
            interpreter: "sh".into(),
            program_file: "program.sh".into(),
            timeout: Duration::from_secs(10),
            isolate_network: false,
            confine_filesystem: cfg!(target_os = "linux"),
            ..SandboxPolicy::default()
        };
        PipelineOrchestrator::new(
            RequestDispatcher::new(client, root, Duration::from_secs(5)),
            ExecutionSandbox::new(policy),
            ArtifactLocator::new(".pptx"),
            retention,
        )
    }

    #[tokio::test]
    async fn test_success_leaves_only_artifact() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), "echo deck > cats.pptx", Duration::from_secs(60));

        let handle = orch.submit("3-slide intro to cats").unwrap();
        let id = handle.correlation_id();
        let artifact = handle.wait().await.unwrap();

        assert_eq!(artifact.correlation_id, id);
        let workspace = artifact.workspace_dir().unwrap().to_path_buf();
        let names: Vec<_> = std::fs::read_dir(&workspace)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["cats.pptx".to_string()]);

        orch.release(&artifact).unwrap();
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_blank_prompt_rejected_before_side_effects() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), "true", Duration::from_secs(60));

        let err = orch.submit("  ").err().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidPrompt);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failure_retains_workspace() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), "exit 4", Duration::from_secs(60));

        let handle = orch.submit("broken").unwrap();
        let id = handle.correlation_id();
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Execution);
        let workspace = root.path().join(id.to_string());
        assert!(workspace.join("program.sh").exists());
    }

    #[tokio::test]
    async fn test_failed_workspace_removed_after_retention() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), "exit 4", Duration::from_millis(50));

        let handle = orch.submit("broken").unwrap();
        let id = handle.correlation_id();
        handle.wait().await.unwrap_err();

        let workspace = root.path().join(id.to_string());
        for _ in 0..100 {
            if !workspace.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!workspace.exists());
    }

    #[tokio::test]
    async fn test_cancel_during_execution() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), "sleep 30", Duration::from_secs(60));

        let handle = orch.submit("slow deck").unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();

        let started = Instant::now();
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_run_with_external_token() {
        let root = tempfile::tempdir().unwrap();
        let orch = orchestrator(root.path(), "```sh\ntouch deck.pptx\n```", Duration::from_secs(60));

        let artifact = orch
            .run("fenced deck", &CancellationToken::new())
            .await
            .unwrap();
        assert!(artifact.path.ends_with("deck.pptx"));
    }
}
