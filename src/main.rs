use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use slidesmith::config::CliOverrides;

mod cmd;

#[derive(Parser)]
#[command(name = "slidesmith")]
#[command(version, about = "Turn a prompt into an Office document via a code-generation service")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Generation service endpoint. Overrides slidesmith.toml and SLIDESMITH_ENDPOINT.
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Network timeout in seconds for the generation service
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Wall-clock limit in seconds for the generated program
    #[arg(long, global = true)]
    pub exec_timeout: Option<u64>,

    /// Artifact file extension to look for (e.g. ".docx")
    #[arg(long, global = true)]
    pub extension: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            endpoint: self.endpoint.clone(),
            timeout_secs: self.timeout,
            exec_timeout_secs: self.exec_timeout,
            extension: self.extension.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate one document from a prompt and save it
    Generate {
        /// What the document should contain
        prompt: String,

        /// Directory to write the document into (defaults to the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// File name for the saved document
        #[arg(long)]
        name: Option<String>,
    },
    /// Serve the generation job API over HTTP
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "3141")]
        port: u16,

        /// Bind on all interfaces and allow any CORS origin
        #[arg(long)]
        dev: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration file
    Validate,
    /// Create a default slidesmith.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    slidesmith::telemetry::init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Generate {
            prompt,
            output,
            name,
        } => {
            return cmd::cmd_generate(
                project_dir,
                &cli.overrides(),
                prompt,
                output.as_deref(),
                name.as_deref(),
            )
            .await;
        }
        Commands::Serve { port, dev } => {
            cmd::cmd_serve(project_dir, &cli.overrides(), *port, *dev).await?
        }
        Commands::Config { command } => {
            cmd::cmd_config(project_dir, &cli.overrides(), command.clone())?
        }
    }

    Ok(ExitCode::SUCCESS)
}
