//! # Blazor Host Library
//!
//! `blazor-host` launches a desktop shell (a Chromium-based window) on a locally
//! hosted web UI. Several copies of the host may start at once; they agree on
//! which one runs the web server and share the port it listens on.
//! It provides functionality for:
//!
//! - Electing a single leader among processes sharing a named OS token.
//! - Finding a free local port by consulting the OS listener table.
//! - Starting the web server and waiting until it listens.
//! - Handing the chosen port to follower processes through a named mailbox.
//! - Opening the shell window on `https://127.0.0.1:<port>`.
//!
//! This library is structured into modules handling errors, configuration, and
//! helper modules for each step of the startup.

pub mod config;
pub mod error;
pub mod helper;
