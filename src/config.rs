//! # Configuration Module
//!
//! Every knob the host uses lives in [`Config`]. The defaults reproduce the
//! stock setup: a `BlazorTestMutex` instance token, a `BlazorTestMap` port
//! mailbox, ports scanned in `5050..6000` and a `1000x600` shell window at
//! `(1, 2)`.
//!
//! A JSON file can override any subset of the fields. It is looked up at the
//! path named by `BLAZOR_HOST_CONFIG`, otherwise as `blazor-host.json` next to
//! the executable. A missing file is not an error.

use std::{
    net::{IpAddr, Ipv4Addr},
    ops::Range,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

use crate::helper::retry::RetryPolicy;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "BLAZOR_HOST_CONFIG";

/// File name looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "blazor-host.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the OS-wide token used for leader election.
    pub instance_name: String,
    /// Name of the mailbox the leader publishes the port through.
    pub mailbox_name: String,
    /// Directory holding the mailbox. Defaults to the OS temp directory.
    pub mailbox_dir: Option<PathBuf>,
    /// First port scanned (inclusive).
    pub port_range_start: u16,
    /// End of the scanned range (exclusive).
    pub port_range_end: u16,
    /// Address the web server binds to and the shell navigates to.
    pub host: IpAddr,
    /// URL scheme served by the web server.
    pub scheme: String,
    /// How long the leader waits for the web server to listen.
    pub readiness_timeout_ms: u64,
    /// How long a follower waits for the leader to publish.
    pub handoff_timeout_ms: u64,
    pub server: ServerConfig,
    pub shell: ShellConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_name: "BlazorTestMutex".to_string(),
            mailbox_name: "BlazorTestMap".to_string(),
            mailbox_dir: None,
            port_range_start: 5050,
            port_range_end: 6000,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            scheme: "https".to_string(),
            readiness_timeout_ms: 30_000,
            handoff_timeout_ms: 45_000,
            server: ServerConfig::default(),
            shell: ShellConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the first file found, or the defaults.
    pub fn load() -> anyhow::Result<Self> {
        match Self::locate() {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) if std::env::var_os(CONFIG_PATH_ENV).is_some() => Err(anyhow::anyhow!(
                "configuration file {} does not exist",
                path.display()
            )),
            _ => {
                log::debug!("no configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reads a JSON configuration file, filling absent fields with defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        let config = Self::from_json(&content)
            .with_context(|| format!("failed to parse configuration {}", path.display()))?;
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn locate() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        let exe = std::env::current_exe().ok()?;
        Some(exe.parent()?.join(CONFIG_FILE_NAME))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.port_range_start == 0 {
            anyhow::bail!("port range cannot start at 0");
        }
        if self.port_range_start > self.port_range_end {
            anyhow::bail!(
                "port range {}..{} is reversed",
                self.port_range_start,
                self.port_range_end
            );
        }
        if self.instance_name.is_empty() || self.mailbox_name.is_empty() {
            anyhow::bail!("instance and mailbox names must not be empty");
        }
        Ok(())
    }

    pub fn port_range(&self) -> Range<u16> {
        self.port_range_start..self.port_range_end
    }

    pub fn mailbox_dir(&self) -> PathBuf {
        self.mailbox_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Backoff used while waiting for the web server to listen.
    ///
    /// Starts at 1 ms and doubles up to 100 ms between probes.
    pub fn readiness_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.readiness_timeout_ms),
            Duration::from_millis(1),
            Duration::from_millis(100),
        )
    }

    /// Backoff used by followers waiting on the mailbox.
    pub fn handoff_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.handoff_timeout_ms),
            Duration::from_millis(5),
            Duration::from_millis(250),
        )
    }
}

/// How the web server process is started.
///
/// `{url}` and `{port}` in `args` are replaced with the chosen endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            program: "dotnet".to_string(),
            args: vec![
                "BlazorApp.dll".to_string(),
                "--urls".to_string(),
                "{url}".to_string(),
            ],
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Chromium-family browser executable.
    pub program: PathBuf,
    /// Profile directory. Defaults to `<temp>/<instance_name>-shell`.
    pub profile_dir: Option<PathBuf>,
    pub position: (i32, i32),
    pub size: (u32, u32),
    pub icon_path: PathBuf,
    pub debugging: bool,
    pub allow_downloads: bool,
    pub silent_downloads: bool,
    /// Extra switches appended to the browser command line.
    pub extra_args: Vec<String>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_browser(),
            profile_dir: None,
            position: (1, 2),
            size: (1000, 600),
            icon_path: PathBuf::from("chromely.ico"),
            debugging: true,
            allow_downloads: true,
            silent_downloads: true,
            extra_args: vec![],
        }
    }
}

fn default_browser() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe")
    } else if cfg!(target_os = "macos") {
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")
    } else {
        PathBuf::from("chromium")
    }
}
