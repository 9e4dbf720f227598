//! # Bootstrap Module
//!
//! Ties the pieces together for one process:
//!
//! - a leader scans for a port, starts the web server on it, waits for it to
//!   listen and publishes the lease;
//! - a follower waits for the lease the leader published;
//! - either one then opens the shell, unless no port was found.

use log::{info, warn};

use crate::{
    config::Config,
    error::{BrokerError, ShellError},
    helper::{
        election::Role,
        handoff::{Mailbox, PortPublisher},
        listener_table::ListenerTable,
        port_broker::{Endpoint, PortLease, find_available_port, wait_until_listening},
        shell::{Shell, ShellEvents, ShellOptions, launch_shell},
        web_host::{ServerHandle, WebHost},
    },
};

/// The outcome of the port broker for this process.
///
/// A leader's resolution owns the running server and the published mailbox
/// record; both are torn down when it is dropped.
#[derive(Debug)]
pub struct Resolution {
    pub role: Role,
    pub lease: PortLease,
    server: Option<ServerHandle>,
    _publisher: Option<PortPublisher>,
}

impl Resolution {
    pub fn endpoint(&self, config: &Config) -> Option<Endpoint> {
        self.lease.endpoint(&config.scheme, config.host)
    }

    pub fn is_serving(&self) -> bool {
        self.server.is_some()
    }
}

/// Resolves the port lease according to `role`.
pub fn resolve_lease(
    role: Role,
    config: &Config,
    table: &dyn ListenerTable,
    web_host: &dyn WebHost,
) -> Result<Resolution, BrokerError> {
    let mailbox = Mailbox::new(&config.mailbox_dir(), &config.mailbox_name);

    match role {
        Role::Leader => lead(mailbox, config, table, web_host),
        Role::Follower => {
            let lease = mailbox.wait_for_lease(&config.handoff_policy())?;
            Ok(Resolution {
                role,
                lease,
                server: None,
                _publisher: None,
            })
        }
    }
}

fn lead(
    mailbox: Mailbox,
    config: &Config,
    table: &dyn ListenerTable,
    web_host: &dyn WebHost,
) -> Result<Resolution, BrokerError> {
    let mut publisher = mailbox.claim()?;

    match start_server(config, table, web_host) {
        Ok((lease, server)) => {
            publisher.publish(lease)?;
            let publisher = match lease {
                PortLease::Bound(_) => Some(publisher),
                // left for followers until this process exits
                PortLease::Unavailable => {
                    publisher.keep();
                    None
                }
            };
            Ok(Resolution {
                role: Role::Leader,
                lease,
                server,
                _publisher: publisher,
            })
        }
        Err(e) => {
            // followers must not wait on a leader that gave up
            match publisher.publish(PortLease::Unavailable) {
                Ok(()) => publisher.keep(),
                Err(publish_error) => warn!("failed to publish the sentinel: {}", publish_error),
            }
            Err(e)
        }
    }
}

fn start_server(
    config: &Config,
    table: &dyn ListenerTable,
    web_host: &dyn WebHost,
) -> Result<(PortLease, Option<ServerHandle>), BrokerError> {
    let lease = find_available_port(table, config.port_range())?;
    let Some(endpoint) = lease.endpoint(&config.scheme, config.host) else {
        warn!("no free port in {:?}", config.port_range());
        return Ok((lease, None));
    };

    info!("hosting web UI on {}", endpoint);
    let server = web_host.start(&endpoint)?;
    wait_until_listening(table, endpoint.port, &config.readiness_policy())?;

    Ok((lease, Some(server)))
}

/// Opens the shell on the resolved endpoint.
///
/// Returns `Ok(false)` without touching the shell when no port is available.
pub fn launch(
    resolution: &Resolution,
    config: &Config,
    shell: &mut dyn Shell,
    events: &mut dyn ShellEvents,
) -> Result<bool, ShellError> {
    let Some(endpoint) = resolution.endpoint(config) else {
        info!("no web server available, not opening the shell");
        return Ok(false);
    };

    let options = ShellOptions::from_config(&config.shell, endpoint.to_string());
    launch_shell(shell, &options, events)?;
    Ok(true)
}
