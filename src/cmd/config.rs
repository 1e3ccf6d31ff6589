//! Configuration view and validation commands — `slidesmith config`.

use anyhow::Result;
use std::path::PathBuf;

use super::super::ConfigCommands;
use slidesmith::config::{
    CONFIG_DIR, CONFIG_FILE, CliOverrides, EnvOverrides, SlidesmithConfig, SlidesmithToml,
};

pub fn cmd_config(
    project_dir: PathBuf,
    overrides: &CliOverrides,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Slidesmith Configuration");
            println!("========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                let toml = SlidesmithToml::load(&config_path)?;
                print_sections(&toml);
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!();
                println!("Using default configuration:");
                print_sections(&SlidesmithToml::default());
                println!("Run 'slidesmith config init' to create a {} file.", CONFIG_FILE);
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            let config =
                SlidesmithConfig::with_overrides(project_dir, &EnvOverrides::from_env(), overrides)?;
            match config.endpoint() {
                Some(endpoint) => println!("  endpoint = \"{}\"", endpoint),
                None => println!("  endpoint = (not set)"),
            }
            println!("  network_timeout = {}s", config.network_timeout().as_secs());
            println!("  exec_timeout = {}s", config.exec_timeout().as_secs());
            println!("  interpreter = \"{}\"", config.toml.execution.interpreter);
            println!("  extension = \"{}\"", config.extension());
            println!("  workspace_root = {}", config.workspace_root().display());
            println!("  retention = {}s", config.retention().as_secs());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config =
                SlidesmithConfig::with_overrides(project_dir, &EnvOverrides::from_env(), overrides)?;
            let warnings = config.validate();
            let errors = config.toml.errors();

            if warnings.is_empty() && errors.is_empty() {
                println!("Configuration is valid.");
            }
            if !warnings.is_empty() {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
            if !errors.is_empty() {
                println!("Configuration errors:");
                for error in &errors {
                    println!("  - {}", error);
                }
            }
            println!();
            config.ensure_valid()?;
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)?;
            }

            let toml = SlidesmithToml::default();
            toml.save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [service] endpoint, timeout_secs");
            println!(
                "  - [execution] interpreter, timeout_secs, isolate_network, confine_filesystem, limits"
            );
            println!("  - [artifact] extension, download_name");
            println!();
        }
    }

    Ok(())
}

fn print_sections(toml: &SlidesmithToml) {
    println!("[service]");
    if let Some(endpoint) = &toml.service.endpoint {
        println!("  endpoint = \"{}\"", endpoint);
    }
    println!("  timeout_secs = {}", toml.service.timeout_secs);
    println!();

    let exec = &toml.execution;
    println!("[execution]");
    println!("  interpreter = \"{}\"", exec.interpreter);
    if !exec.args.is_empty() {
        println!("  args = {:?}", exec.args);
    }
    println!("  program_file = \"{}\"", exec.program_file);
    println!("  timeout_secs = {}", exec.timeout_secs);
    println!("  isolate_network = {}", exec.isolate_network);
    println!("  confine_filesystem = {}", exec.confine_filesystem);
    println!("  read_only_paths = {:?}", exec.read_only_paths);
    println!("  path = \"{}\"", exec.path);
    println!("  max_output_bytes = {}", exec.max_output_bytes);
    println!();

    println!("[execution.limits]");
    println!("  cpu_secs = {}", exec.limits.cpu_secs);
    println!("  max_file_bytes = {}", exec.limits.max_file_bytes);
    println!("  max_open_files = {}", exec.limits.max_open_files);
    println!("  max_memory_bytes = {}", exec.limits.max_memory_bytes);
    println!();

    println!("[artifact]");
    println!("  extension = \"{}\"", toml.artifact.extension);
    println!("  allowed_extensions = {:?}", toml.artifact.allowed_extensions);
    if let Some(name) = &toml.artifact.download_name {
        println!("  download_name = \"{}\"", name);
    }
    println!();

    println!("[workspace]");
    println!("  root = \"{}\"", toml.workspace.root.display());
    println!("  retention_secs = {}", toml.workspace.retention_secs);
    println!();
}
