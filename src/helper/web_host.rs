//! # Web Host Module
//!
//! Starts the web UI server on the endpoint the broker picked. The server
//! itself is an external program; this module only launches it without
//! blocking and keeps it alive for as long as the leader runs.

use std::{
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info, warn};

use crate::{config::ServerConfig, error::WebHostError, helper::port_broker::Endpoint};

/// Something that can serve the web UI on a given endpoint.
pub trait WebHost {
    /// Starts serving on `endpoint` and returns at once.
    fn start(&self, endpoint: &Endpoint) -> Result<ServerHandle, WebHostError>;
}

/// Keeps a started server running. Dropping the handle stops a server
/// process the host spawned.
#[derive(Debug)]
pub struct ServerHandle {
    child: Option<Arc<Mutex<Child>>>,
    monitor: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Wraps a server running on a thread of this process.
    pub fn from_thread(thread: JoinHandle<()>) -> Self {
        Self {
            child: None,
            monitor: Some(thread),
        }
    }

    /// Wraps a server process and watches it on a dedicated thread.
    fn from_child(child: Child, program: String) -> Result<Self, WebHostError> {
        let child = Arc::new(Mutex::new(child));
        let watched = child.clone();

        let monitor = thread::Builder::new()
            .name("web-host".to_string())
            .spawn(move || watch_server(watched, program))
            .map_err(|source| WebHostError::Spawn {
                program: "web-host monitor".to_string(),
                source,
            })?;

        Ok(Self {
            child: Some(child),
            monitor: Some(monitor),
        })
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let Some(child) = self.child.take() else {
            // in-process servers die with the process
            return;
        };

        if let Ok(mut child) = child.lock() {
            if let Ok(None) = child.try_wait() {
                info!("stopping web server (pid {})", child.id());
                if let Err(e) = child.kill() {
                    warn!("failed to stop web server: {}", e);
                }
                let _ = child.wait();
            }
        }

        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}

const MONITOR_INTERVAL: Duration = Duration::from_millis(200);

fn watch_server(child: Arc<Mutex<Child>>, program: String) {
    loop {
        let status = match child.lock() {
            Ok(mut child) => child.try_wait(),
            Err(_) => return,
        };

        match status {
            Ok(Some(status)) if status.success() => {
                info!("web server `{}` exited", program);
                return;
            }
            Ok(Some(status)) => {
                // also hit when the handle kills the server on shutdown
                warn!("web server `{}` exited with {}", program, status);
                return;
            }
            Ok(None) => thread::sleep(MONITOR_INTERVAL),
            Err(e) => {
                error!("failed to poll web server `{}`: {}", program, e);
                return;
            }
        }
    }
}

/// Runs the web server as an external command.
///
/// `{url}` and `{port}` in the argument list are replaced with the endpoint.
#[derive(Debug, Clone)]
pub struct CommandWebHost {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandWebHost {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    /// The argument list with placeholders filled in.
    ///
    /// ```rust
    /// use std::net::{IpAddr, Ipv4Addr};
    /// use blazor_host::helper::{port_broker::PortLease, web_host::CommandWebHost};
    ///
    /// let host = CommandWebHost::new("dotnet", vec!["app.dll".into(), "--urls".into(), "{url}".into()]);
    /// let endpoint = PortLease::Bound(5050)
    ///     .endpoint("https", IpAddr::V4(Ipv4Addr::LOCALHOST))
    ///     .unwrap();
    /// assert_eq!(host.render_args(&endpoint), ["app.dll", "--urls", "https://127.0.0.1:5050"]);
    /// ```
    pub fn render_args(&self, endpoint: &Endpoint) -> Vec<String> {
        let url = endpoint.to_string();
        let port = endpoint.port.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{url}", &url).replace("{port}", &port))
            .collect()
    }
}

impl WebHost for CommandWebHost {
    fn start(&self, endpoint: &Endpoint) -> Result<ServerHandle, WebHostError> {
        let args = self.render_args(endpoint);
        info!("starting web server: {} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command.args(&args).stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| WebHostError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        ServerHandle::from_child(child, self.program.clone())
    }
}
