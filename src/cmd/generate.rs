//! One-shot generation command — `slidesmith generate`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use slidesmith::config::{CliOverrides, EnvOverrides, SlidesmithConfig};
use slidesmith::errors::{ErrorDetail, PipelineError};
use slidesmith::pipeline::{Artifact, PipelineOrchestrator, sweep_expired};

pub async fn cmd_generate(
    project_dir: PathBuf,
    overrides: &CliOverrides,
    prompt: &str,
    output: Option<&Path>,
    name: Option<&str>,
) -> Result<ExitCode> {
    let config = SlidesmithConfig::with_overrides(project_dir, &EnvOverrides::from_env(), overrides)?;

    let root = config.workspace_root();
    let swept = sweep_expired(&root, config.retention())
        .with_context(|| format!("Failed to sweep workspaces under {}", root.display()))?;
    if swept > 0 {
        tracing::debug!(count = swept, "removed expired workspaces");
    }

    let orchestrator = PipelineOrchestrator::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            on_interrupt.cancel();
        }
    });

    println!("{} {}", console::style("Generating:").bold().cyan(), prompt);
    let result = orchestrator.run(prompt, &cancel).await;
    interrupt.abort();

    match result {
        Ok(artifact) => {
            let saved = save_artifact(&artifact, output, name.or(config.download_name())).await;
            if let Err(e) = orchestrator.release(&artifact) {
                tracing::warn!(error = %e, "failed to remove workspace");
            }
            let saved = saved?;
            println!(
                "{} {}",
                console::style("Saved:").green().bold(),
                saved.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            report_failure(&err);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn save_artifact(
    artifact: &Artifact,
    output: Option<&Path>,
    name: Option<&str>,
) -> Result<PathBuf> {
    let download = artifact
        .download(name)
        .await
        .with_context(|| format!("Failed to read artifact {}", artifact.path.display()))?;

    let dir = match output {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    // A configured name may carry directories; only its last component is used.
    let filename = Path::new(&download.filename)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| artifact.file_name().into());
    let dest = dir.join(filename);
    tokio::fs::write(&dest, &download.bytes)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(dest)
}

fn report_failure(err: &PipelineError) {
    eprintln!(
        "{} {}",
        console::style(format!("{}:", err.kind.title())).red().bold(),
        err.message
    );
    match &err.detail {
        Some(ErrorDetail::Stderr(stderr)) if !stderr.trim().is_empty() => {
            eprintln!();
            eprintln!("{}", console::style("Program stderr:").dim());
            for line in stderr.lines() {
                eprintln!("  {}", line);
            }
        }
        Some(ErrorDetail::Candidates(paths)) => {
            eprintln!();
            eprintln!("{}", console::style("Candidate files:").dim());
            for path in paths {
                eprintln!("  - {}", path.display());
            }
        }
        Some(ErrorDetail::ResponseBody(body)) if !body.is_empty() => {
            eprintln!();
            eprintln!("{}", console::style("Service response:").dim());
            eprintln!("  {}", body);
        }
        _ => {}
    }
    if err.is_retryable() {
        eprintln!();
        eprintln!("{}", console::style("This error is usually transient; try again.").yellow());
    }
}
