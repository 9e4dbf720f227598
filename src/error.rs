//! # Error Handling Module
//!
//! This module defines the error types used throughout `blazor-host`.
//! Each concern (election, listener table, port broker, handoff, web host, shell)
//! gets its own enum so callers can tell an expected outcome (another process is
//! already the leader, every port is taken) apart from a real failure.

use std::{io, time::Duration};

use thiserror::Error;

#[cfg(windows)]
use windows_sys::Win32::Foundation::*;

/// Represents the Windows System Error codes the listener table can run into.
///
/// This enum maps raw `u32` error codes returned by Windows APIs (like
/// `GetExtendedTcpTable`) to meaningful Rust variants.
#[derive(Error, Debug)]
pub enum Win32Error {
    /// The operation completed successfully (ERROR_SUCCESS).
    #[error("The operation completed successfully")]
    Success,

    /// Access is denied (ERROR_ACCESS_DENIED).
    #[error("Access denied")]
    AccessDenied,

    /// Not enough storage is available to process this command (ERROR_NOT_ENOUGH_MEMORY).
    #[error("Not enough memory")]
    NotEnoughMemory,

    /// The parameter is incorrect (ERROR_INVALID_PARAMETER).
    #[error("Invalid parameter")]
    InvalidParameter,

    /// The data area passed to a system call is too small (ERROR_INSUFFICIENT_BUFFER).
    #[error("Insufficient buffer")]
    InsufficientBuffer,

    /// The request is not supported (ERROR_NOT_SUPPORTED).
    #[error("Not supported")]
    NotSupported,

    /// An unknown error code not explicitly mapped in this enum.
    #[error("Unknown error with code: {0}")]
    UnknownError(u32),
}

#[cfg(windows)]
impl From<u32> for Win32Error {
    /// Converts a raw Windows error code (`u32`) into a `Win32Error` variant.
    ///
    /// # Example
    ///
    /// ```rust
    /// # #[cfg(windows)]
    /// # {
    /// use blazor_host::error::Win32Error;
    /// use windows_sys::Win32::Foundation::ERROR_ACCESS_DENIED;
    ///
    /// let error: Win32Error = ERROR_ACCESS_DENIED.into();
    /// assert!(matches!(error, Win32Error::AccessDenied));
    /// # }
    /// ```
    fn from(code: u32) -> Self {
        match code {
            ERROR_SUCCESS => Win32Error::Success,
            ERROR_ACCESS_DENIED => Win32Error::AccessDenied,
            ERROR_NOT_ENOUGH_MEMORY => Win32Error::NotEnoughMemory,
            ERROR_INVALID_PARAMETER => Win32Error::InvalidParameter,
            ERROR_INSUFFICIENT_BUFFER => Win32Error::InsufficientBuffer,
            ERROR_NOT_SUPPORTED => Win32Error::NotSupported,
            _ => Win32Error::UnknownError(code),
        }
    }
}

/// Errors raised while deciding the instance role.
///
/// "Another process already holds the name" is not an error: it is the
/// follower outcome. Everything else ends up here.
#[derive(Error, Debug)]
pub enum ElectionError {
    /// The named exclusivity primitive could not be created or opened.
    #[error("failed to acquire instance token `{name}`: {source}")]
    Primitive {
        name: String,
        #[source]
        source: single_instance::error::SingleInstanceError,
    },
}

/// Errors raised while reading the OS table of live TCP listeners.
#[derive(Error, Debug)]
pub enum ListenerTableError {
    /// Reading the table from the OS failed.
    #[error("I/O error reading listener table: {0}")]
    Io(#[from] io::Error),

    /// A Windows API call failed.
    #[error("Win32 error occurred: {0}")]
    Win32Error(#[from] Win32Error),

    /// A row of the table could not be parsed.
    #[error("malformed listener table row: {0:?}")]
    Malformed(String),
}

/// Errors raised while handing the port lease from leader to followers.
#[derive(Error, Debug)]
pub enum HandoffError {
    /// The mailbox file could not be written or read.
    #[error("mailbox I/O error: {0}")]
    Io(#[from] io::Error),

    /// The mailbox is shorter than a full record.
    #[error("mailbox record truncated: {0} bytes")]
    Truncated(usize),

    /// The mailbox does not start with the expected magic bytes.
    #[error("mailbox does not hold a port record")]
    BadMagic,

    /// The record was written by an incompatible version of the host.
    #[error("unsupported mailbox version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// The record carries a value that is neither a port nor the sentinel.
    #[error("invalid port lease value {0}")]
    InvalidLease(i32),

    /// No leader published a lease within the allowed time.
    #[error("no port lease published after {0:?}")]
    Timeout(Duration),
}

/// Errors raised while starting the web server.
#[derive(Error, Debug)]
pub enum WebHostError {
    /// The server process could not be spawned.
    #[error("failed to start web server `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Errors raised by the leader's port broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The listener table could not be consulted.
    #[error("listener table error: {0}")]
    ListenerTable(#[from] ListenerTableError),

    /// The web server was started but never began listening.
    #[error("web server did not listen on port {port} within {waited:?}")]
    ReadinessTimeout { port: u16, waited: Duration },

    /// The web server could not be started.
    #[error("web host error: {0}")]
    WebHost(#[from] WebHostError),

    /// The lease could not be published.
    #[error("handoff error: {0}")]
    Handoff(#[from] HandoffError),
}

/// Errors raised while running the GUI shell.
#[derive(Error, Debug)]
pub enum ShellError {
    /// The browser executable could not be started.
    #[error("failed to start shell `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Waiting on the browser or reading its output failed.
    #[error("shell I/O error: {0}")]
    Io(#[from] io::Error),

    /// The browser profile preferences could not be prepared.
    #[error("failed to prepare shell profile: {0}")]
    Profile(#[from] serde_json::Error),
}
