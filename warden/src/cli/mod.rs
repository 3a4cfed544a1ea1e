//! # Warden CLI
//!
//! Command-line definition and entry point of the `warden` binary.

use crate::{
    args::{OverwriteFlag, ReadRequest, WriteRequest},
    config::{ConfigOverrides, WardenConfig},
    tools::WorkspaceTools,
    utils::logging::init_logging,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf};
use tracing::info;
use warden_bridge::start_bridge;

/// Warden: a workspace gateway and interactive shell bridge.
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about,
    long_about = "warden confines file operations and shells to one workspace directory.

1. Serve: WebSocket shell bridge, one fresh shell per connection.
   Example: warden serve --workspace ./workspace --bind 127.0.0.1:8765

2. Gateway commands: run one file operation and print the result.
   Example: warden write notes/a.txt --content 'hello'
   Example: warden read notes/a.txt"
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Workspace root (overrides config and WARDEN_WORKSPACE_ROOT)
    #[arg(long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_to_stderr: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the shell bridge server
    Serve {
        /// Address to bind
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Shell executable spawned per connection
        #[arg(long)]
        shell: Option<String>,

        /// Primary encoding of shell output (e.g. utf-8, shift_jis, cp932)
        #[arg(long)]
        encoding: Option<String>,

        /// Mirror session traffic to stderr
        #[arg(long)]
        echo_io: bool,
    },

    /// Write a file inside the workspace
    Write {
        filename: String,

        /// Subdirectory of the workspace ("none" for the root)
        #[arg(long)]
        subdirectory: Option<String>,

        /// Replace an existing file (true/1/yes/y/on/t)
        #[arg(long, default_value = "false")]
        overwrite: String,

        /// Content to write
        #[arg(long, conflicts_with = "from_file", required_unless_present = "from_file")]
        content: Option<String>,

        /// Local file whose content is written
        #[arg(long)]
        from_file: Option<PathBuf>,
    },

    /// Print a workspace file
    Read { path: String },

    /// List files in the workspace or one of its directories
    Ls { dir: Option<String> },

    /// Delete a workspace file
    Rm { path: String },

    /// Save code blocks found in an agent transcript
    Salvage { transcript: PathBuf },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            workspace_root: self.workspace.clone(),
            ..ConfigOverrides::default()
        };
        if let Command::Serve {
            bind,
            shell,
            encoding,
            echo_io,
        } = &self.command
        {
            overrides.bind_addr = *bind;
            overrides.shell = shell.clone();
            overrides.encoding = encoding.clone();
            overrides.echo_io = *echo_io;
        }
        overrides
    }
}

/// Parse the command line and run.
pub async fn run() -> Result<()> {
    execute(Cli::parse()).await
}

pub async fn execute(cli: Cli) -> Result<()> {
    let log_level = if cli.debug { "debug" } else { "info" };
    init_logging(log_level, !cli.log_to_stderr)?;

    let config = WardenConfig::resolve(cli.config.as_deref(), &cli.overrides())?;
    let enforcer = config.prepare_workspace_root()?;

    match cli.command {
        Command::Serve { .. } => {
            let bridge = config.bridge_config(enforcer.root())?;
            info!(
                root = %enforcer.root().display(),
                shell = %bridge.shell.command,
                "Starting shell bridge"
            );
            start_bridge(bridge).await.context("Shell bridge failed")?;
        }
        Command::Write {
            filename,
            subdirectory,
            overwrite,
            content,
            from_file,
        } => {
            let content = match (content, from_file) {
                (Some(content), _) => content,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read '{}'", path.display()))?,
                (None, None) => String::new(),
            };
            let request = WriteRequest {
                filename,
                content,
                subdirectory,
                overwrite: OverwriteFlag::from_token(&overwrite),
            };
            println!("{}", WorkspaceTools::with_tracing(enforcer).write(&request).await);
        }
        Command::Read { path } => {
            let tools = WorkspaceTools::with_tracing(enforcer);
            println!("{}", tools.read(&ReadRequest::new(path)).await);
        }
        Command::Ls { dir } => {
            let tools = WorkspaceTools::with_tracing(enforcer);
            println!("{}", tools.list(dir.as_deref()).await);
        }
        Command::Rm { path } => {
            println!("{}", WorkspaceTools::with_tracing(enforcer).delete(&path).await);
        }
        Command::Salvage { transcript } => {
            let text = std::fs::read_to_string(&transcript)
                .with_context(|| format!("Failed to read '{}'", transcript.display()))?;
            let saved = WorkspaceTools::with_tracing(enforcer).salvage(&text).await;
            if saved.is_empty() {
                println!("(nothing salvaged)");
            } else {
                println!("{}", saved.join("\n"));
            }
        }
    }

    Ok(())
}
