//! # Shell Module
//!
//! Opens the desktop window on the web UI and blocks until it is closed.
//!
//! The window is provided by a [`Shell`] backend. The default backend,
//! [`ChromiumShell`], runs a Chromium-family browser in app mode with its own
//! profile, so it behaves like a standalone application window. Shell
//! activity is reported to a [`ShellEvents`] observer whose hooks all
//! default to no-ops.

use std::{
    io::{self, BufRead, BufReader, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{debug, error, info, warn};
use serde_json::{Value, json};

use crate::{config::ShellConfig, error::ShellError};

/// Download behaviour of the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Pages may start downloads without a per-site permission prompt.
    pub allow_downloads: bool,
    /// Downloads are saved without asking where to put them.
    pub silent_downloads: bool,
}

/// Everything a shell needs to open the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOptions {
    pub start_url: String,
    pub position: (i32, i32),
    pub size: (u32, u32),
    pub icon_path: PathBuf,
    pub debugging: bool,
    pub downloads: DownloadOptions,
}

impl ShellOptions {
    pub fn from_config(config: &ShellConfig, start_url: String) -> Self {
        Self {
            start_url,
            position: config.position,
            size: config.size,
            icon_path: config.icon_path.clone(),
            debugging: config.debugging,
            downloads: DownloadOptions {
                allow_downloads: config.allow_downloads,
                silent_downloads: config.silent_downloads,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLoadStart {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLoadEnd {
    pub url: String,
    pub http_status: Option<u16>,
}

/// A line the page wrote to the browser console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleMessage {
    pub level: String,
    pub message: String,
    pub source: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeforeClose {
    pub exit_code: Option<i32>,
}

/// Observer for shell activity. Every hook is optional.
pub trait ShellEvents {
    fn on_frame_load_start(&mut self, _event: &FrameLoadStart) {}

    fn on_frame_load_end(&mut self, _event: &FrameLoadEnd) {}

    fn on_console_message(&mut self, _event: &ConsoleMessage) {}

    fn on_before_close(&mut self, _event: &BeforeClose) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopShellEvents;

impl ShellEvents for NoopShellEvents {}

/// Observer that forwards shell activity to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingShellEvents;

impl ShellEvents for LoggingShellEvents {
    fn on_frame_load_start(&mut self, event: &FrameLoadStart) {
        debug!("frame load start: {}", event.url);
    }

    fn on_frame_load_end(&mut self, event: &FrameLoadEnd) {
        debug!("frame load end: {} ({:?})", event.url, event.http_status);
    }

    fn on_console_message(&mut self, event: &ConsoleMessage) {
        info!(
            "console [{}] {} ({}:{})",
            event.level, event.message, event.source, event.line
        );
    }

    fn on_before_close(&mut self, event: &BeforeClose) {
        debug!("shell closing (exit code {:?})", event.exit_code);
    }
}

/// A GUI host that shows the web UI in a window.
pub trait Shell {
    /// Opens the window and blocks until it is closed.
    fn run(
        &mut self,
        options: &ShellOptions,
        events: &mut dyn ShellEvents,
    ) -> Result<(), ShellError>;
}

/// Runs `shell` with `options`, logging any failure before returning it.
pub fn launch_shell(
    shell: &mut dyn Shell,
    options: &ShellOptions,
    events: &mut dyn ShellEvents,
) -> Result<(), ShellError> {
    info!("opening shell on {}", options.start_url);

    shell.run(options, events).inspect_err(|e| {
        error!("shell failed: {}", e);
    })?;

    info!("shell closed");
    Ok(())
}

/// Chromium, Chrome or Edge in app mode.
///
/// Reports frame-load start when the window is launched on the start URL,
/// console messages when debugging is on (parsed from the browser's stderr
/// log), and before-close when the browser exits. Frame-load end is not
/// observable from outside the browser and is never reported.
#[derive(Debug, Clone)]
pub struct ChromiumShell {
    program: PathBuf,
    profile_dir: PathBuf,
    extra_args: Vec<String>,
}

impl ChromiumShell {
    pub fn new(program: impl Into<PathBuf>, profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            profile_dir: profile_dir.into(),
            extra_args: vec![],
        }
    }

    /// Builds the backend from configuration. Without an explicit profile
    /// directory, `<temp>/<instance_name>-shell` is used.
    pub fn from_config(config: &ShellConfig, instance_name: &str) -> Self {
        let profile_dir = config.profile_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("{}-shell", instance_name))
        });
        Self {
            program: config.program.clone(),
            profile_dir,
            extra_args: config.extra_args.clone(),
        }
    }

    pub fn command_args(&self, options: &ShellOptions) -> Vec<String> {
        let mut args = vec![
            format!("--app={}", options.start_url),
            format!(
                "--window-position={},{}",
                options.position.0, options.position.1
            ),
            format!("--window-size={},{}", options.size.0, options.size.1),
            format!("--user-data-dir={}", self.profile_dir.display()),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
        ];
        if options.debugging {
            args.extend([
                "--enable-logging=stderr".to_string(),
                "--v=0".to_string(),
                "--auto-open-devtools-for-tabs".to_string(),
            ]);
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Writes the download flags into the profile's `Default/Preferences`,
    /// keeping whatever else the browser stored there.
    pub fn prepare_profile(&self, downloads: &DownloadOptions) -> Result<(), ShellError> {
        let default_dir = self.profile_dir.join("Default");
        std::fs::create_dir_all(&default_dir)?;
        let path = default_dir.join("Preferences");

        let mut preferences = read_preferences(&path)?;
        apply_download_preferences(&mut preferences, downloads);
        std::fs::write(&path, serde_json::to_vec(&preferences)?)?;
        Ok(())
    }
}

fn read_preferences(path: &Path) -> Result<Value, ShellError> {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value @ Value::Object(_)) => Ok(value),
            Ok(_) | Err(_) => {
                warn!("replacing unreadable shell preferences {}", path.display());
                Ok(json!({}))
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({})),
        Err(e) => Err(e.into()),
    }
}

/// Content setting values used by Chromium preferences.
const CONTENT_SETTING_ALLOW: u8 = 1;
const CONTENT_SETTING_BLOCK: u8 = 2;

fn apply_download_preferences(preferences: &mut Value, downloads: &DownloadOptions) {
    let automatic_downloads = if downloads.allow_downloads {
        CONTENT_SETTING_ALLOW
    } else {
        CONTENT_SETTING_BLOCK
    };

    preferences["download"]["prompt_for_download"] = json!(!downloads.silent_downloads);
    preferences["download"]["directory_upgrade"] = json!(true);
    preferences["profile"]["default_content_setting_values"]["automatic_downloads"] =
        json!(automatic_downloads);
}

impl Shell for ChromiumShell {
    fn run(
        &mut self,
        options: &ShellOptions,
        events: &mut dyn ShellEvents,
    ) -> Result<(), ShellError> {
        self.prepare_profile(&options.downloads)?;
        if !options.icon_path.exists() {
            debug!(
                "icon {} not found, app-mode windows use the page favicon",
                options.icon_path.display()
            );
        }

        let mut command = Command::new(&self.program);
        command
            .args(self.command_args(options))
            .stdin(Stdio::null());
        if options.debugging {
            command.stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|source| ShellError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        info!("shell started (pid {})", child.id());

        events.on_frame_load_start(&FrameLoadStart {
            url: options.start_url.clone(),
        });

        if let Some(stderr) = child.stderr.take() {
            forward_console(stderr, events);
        }

        let status = child.wait()?;
        events.on_before_close(&BeforeClose {
            exit_code: status.code(),
        });
        if !status.success() {
            warn!("shell exited with {}", status);
        }

        Ok(())
    }
}

/// Reports the browser's console lines until its stderr closes. Bytes that
/// are not UTF-8 are replaced rather than ending the session.
fn forward_console(stderr: impl Read, events: &mut dyn ShellEvents) {
    let mut reader = BufReader::new(stderr);
    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buffer);
                let line = line.trim_end_matches(['\r', '\n']);
                match parse_console_line(line) {
                    Some(message) => events.on_console_message(&message),
                    None => debug!(target: "shell", "{}", line),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("stopped reading shell output: {}", e);
                break;
            }
        }
    }
}

/// Parses a console line from Chromium's log, e.g.
///
/// ```text
/// [1234:5678:1016/120000.123:INFO:CONSOLE(12)] "hello", source: https://127.0.0.1:5050/app.js (12)
/// ```
///
/// Newer builds print `CONSOLE:12` instead of `CONSOLE(12)`; both are accepted.
pub fn parse_console_line(line: &str) -> Option<ConsoleMessage> {
    let header_end = line.find("] ")?;
    let header = line.get(1..header_end)?;
    let console_at = header.find(":CONSOLE")?;
    let level = header[..console_at].rsplit(':').next()?.to_string();

    let body = &line[header_end + 2..];
    let source_at = body.rfind("\", source: ")?;
    let message = body.get(1..source_at)?.to_string();

    let rest = &body[source_at + "\", source: ".len()..];
    let (source, line_part) = rest.rsplit_once(" (")?;
    let line_number = line_part.strip_suffix(')')?.parse().ok()?;

    Some(ConsoleMessage {
        level,
        message,
        source: source.to_string(),
        line: line_number,
    })
}
