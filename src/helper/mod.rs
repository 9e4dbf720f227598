//! # Helper Module
//!
//! This module aggregates the building blocks of the host:
//!
//! - `election`: decides whether this process is the leader.
//! - `listener_table`: reads the OS table of live TCP listeners.
//! - `port_broker`: picks the web server port and waits for the server to listen.
//! - `handoff`: carries the chosen port from the leader to its followers.
//! - `web_host`: starts the web UI server.
//! - `shell`: opens the desktop window on the web UI.
//! - `bootstrap`: runs the above in order for one process.
//! - `retry`: bounded polling shared by the waits above.

pub mod bootstrap;
pub mod election;
pub mod handoff;
pub mod listener_table;
pub mod port_broker;
pub mod retry;
pub mod shell;
pub mod web_host;
