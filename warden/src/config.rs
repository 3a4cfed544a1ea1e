//! Process configuration.
//!
//! Values are layered, later layers winning:
//!
//! 1. built-in defaults,
//! 2. a TOML file passed with `--config`,
//! 3. `WARDEN_WORKSPACE_ROOT`, `WARDEN_SHELL`, `WARDEN_ENCODING`,
//! 4. command-line flags.
//!
//! ```toml
//! workspace_root = "./workspace"
//! bind_addr = "127.0.0.1:8765"
//! shell = "bash"
//! encoding = "shift_jis"
//! read_chunk_size = 1024
//! echo_io = false
//! ```

use crate::boundary::BoundaryEnforcer;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
};
use tracing::info;
use warden_bridge::{
    BridgeConfig, DEFAULT_READ_CHUNK_SIZE, ShellConfig, TextCodec, bridge::DEFAULT_PORT,
    default_shell,
};

pub const ENV_WORKSPACE_ROOT: &str = "WARDEN_WORKSPACE_ROOT";
pub const ENV_SHELL: &str = "WARDEN_SHELL";
pub const ENV_ENCODING: &str = "WARDEN_ENCODING";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WardenConfig {
    /// Directory every file operation and shell is confined to.
    pub workspace_root: PathBuf,
    pub bind_addr: SocketAddr,
    /// Shell executable; the platform shell when unset.
    pub shell: Option<String>,
    /// Primary encoding of shell streams (WHATWG label or `cpNNN`).
    pub encoding: String,
    pub read_chunk_size: usize,
    pub echo_io: bool,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("./workspace"),
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            shell: None,
            encoding: "utf-8".to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            echo_io: false,
        }
    }
}

/// Command-line values that take precedence over every other layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub workspace_root: Option<PathBuf>,
    pub bind_addr: Option<SocketAddr>,
    pub shell: Option<String>,
    pub encoding: Option<String>,
    pub echo_io: bool,
}

impl WardenConfig {
    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    /// Build the effective configuration from every layer.
    pub fn resolve(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply environment values looked up through `lookup`. Empty values are ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(root) = lookup(ENV_WORKSPACE_ROOT) {
            self.workspace_root = PathBuf::from(root);
        }
        if let Some(shell) = lookup(ENV_SHELL) {
            self.shell = Some(shell);
        }
        if let Some(encoding) = lookup(ENV_ENCODING) {
            self.encoding = encoding;
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(root) = &overrides.workspace_root {
            self.workspace_root = root.clone();
        }
        if let Some(bind_addr) = overrides.bind_addr {
            self.bind_addr = bind_addr;
        }
        if let Some(shell) = &overrides.shell {
            self.shell = Some(shell.clone());
        }
        if let Some(encoding) = &overrides.encoding {
            self.encoding = encoding.clone();
        }
        self.echo_io |= overrides.echo_io;
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(anyhow!("workspace_root must not be empty"));
        }
        if self.read_chunk_size == 0 {
            return Err(anyhow!("read_chunk_size must be at least 1"));
        }
        self.codec()?;
        Ok(())
    }

    pub fn codec(&self) -> Result<TextCodec> {
        TextCodec::for_label(&self.encoding)
            .with_context(|| format!("Invalid shell encoding '{}'", self.encoding))
    }

    pub fn shell_command(&self) -> String {
        self.shell
            .clone()
            .unwrap_or_else(|| default_shell().to_string())
    }

    /// Create the workspace root if missing and build its enforcer.
    ///
    /// Refuses the filesystem root and an empty path.
    pub fn prepare_workspace_root(&self) -> Result<BoundaryEnforcer> {
        let root = &self.workspace_root;
        if root.as_os_str().is_empty() {
            return Err(anyhow!("workspace_root must not be empty"));
        }
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create workspace root '{}'", root.display()))?;
        let enforcer = BoundaryEnforcer::new(root)?;
        info!(root = %enforcer.root().display(), "Workspace root ready");
        Ok(enforcer)
    }

    /// Shell settings for sessions started in `working_dir`.
    pub fn shell_config(&self, working_dir: &Path) -> Result<ShellConfig> {
        Ok(ShellConfig {
            command: self.shell_command(),
            working_dir: Some(working_dir.to_path_buf()),
            codec: self.codec()?,
            read_chunk_size: self.read_chunk_size,
            echo_io: self.echo_io,
            ..ShellConfig::default()
        })
    }

    pub fn bridge_config(&self, working_dir: &Path) -> Result<BridgeConfig> {
        Ok(BridgeConfig {
            bind_addr: self.bind_addr,
            shell: self.shell_config(working_dir)?,
        })
    }
}
