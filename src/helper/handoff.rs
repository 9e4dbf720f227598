//! # Handoff Module
//!
//! Carries the port lease from the leader to its followers.
//!
//! The mailbox is a small file in a shared directory (the OS temp directory by
//! default), named after the configured mailbox name. The leader writes the
//! record to a private temporary file and renames it into place, so a reader
//! either finds no mailbox or a complete record. The rename is the signal
//! followers wait on.
//!
//! Record layout, 16 bytes, little-endian:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | magic `BHPL` |
//! | 4 | 4 | format version (`u32`) |
//! | 8 | 4 | leader process id (`u32`) |
//! | 12 | 4 | port lease (`i32`, `-1` when no port was found) |
//!
//! A record only counts while the leader that wrote it is still running.
//! Followers skip records left behind by an exited or crashed leader and keep
//! waiting for the current one.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use crate::{
    error::HandoffError,
    helper::{port_broker::PortLease, retry::RetryPolicy},
};

pub const MAILBOX_MAGIC: [u8; 4] = *b"BHPL";
pub const MAILBOX_VERSION: u32 = 1;
pub const RECORD_LEN: usize = 16;

/// One published lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRecord {
    pub leader_pid: u32,
    pub lease: PortLease,
}

impl PortRecord {
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..4].copy_from_slice(&MAILBOX_MAGIC);
        out[4..8].copy_from_slice(&MAILBOX_VERSION.to_le_bytes());
        out[8..12].copy_from_slice(&self.leader_pid.to_le_bytes());
        out[12..16].copy_from_slice(&self.lease.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, HandoffError> {
        if bytes.len() < RECORD_LEN {
            return Err(HandoffError::Truncated(bytes.len()));
        }
        if bytes[0..4] != MAILBOX_MAGIC {
            return Err(HandoffError::BadMagic);
        }

        let version = u32::from_le_bytes(word(bytes, 4));
        if version != MAILBOX_VERSION {
            return Err(HandoffError::UnsupportedVersion {
                found: version,
                expected: MAILBOX_VERSION,
            });
        }

        Ok(Self {
            leader_pid: u32::from_le_bytes(word(bytes, 8)),
            lease: PortLease::from_le_bytes(word(bytes, 12))?,
        })
    }

    /// Whether the process that published this record is still alive.
    pub fn leader_is_running(&self) -> bool {
        self.leader_pid == std::process::id() || process_is_running(self.leader_pid)
    }
}

fn word(bytes: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[offset..offset + 4]);
    out
}

/// The named mailbox, seen from either side.
#[derive(Debug, Clone)]
pub struct Mailbox {
    path: PathBuf,
}

impl Mailbox {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!("{}.port", name)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current record without waiting. `Ok(None)` when nothing is published.
    pub fn read(&self) -> Result<Option<PortRecord>, HandoffError> {
        match fs::read(&self.path) {
            Ok(bytes) => PortRecord::decode(&bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Follower side: waits for a running leader to publish, then returns its
    /// lease. Records whose leader has exited are treated as unpublished.
    pub fn wait_for_lease(&self, policy: &RetryPolicy) -> Result<PortLease, HandoffError> {
        debug!("waiting for a port lease in {}", self.path.display());

        let live_record = || {
            self.read().map(|record| {
                record.filter(|record| {
                    let running = record.leader_is_running();
                    if !running {
                        debug!(
                            "ignoring {} left by exited leader (pid {})",
                            record.lease, record.leader_pid
                        );
                    }
                    running
                })
            })
        };

        match policy.poll(live_record)? {
            Some(record) => {
                info!(
                    "leader (pid {}) published {}",
                    record.leader_pid, record.lease
                );
                Ok(record.lease)
            }
            None => Err(HandoffError::Timeout(policy.timeout)),
        }
    }

    /// Leader side: takes ownership of the mailbox, clearing whatever a
    /// previous leader left behind.
    pub fn claim(self) -> Result<PortPublisher, HandoffError> {
        match fs::remove_file(&self.path) {
            Ok(()) => warn!("removed stale mailbox {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(PortPublisher {
            path: self.path,
            published: false,
        })
    }
}

/// Write end of the mailbox, held by the leader.
///
/// The record is removed again when the publisher is dropped.
#[derive(Debug)]
pub struct PortPublisher {
    path: PathBuf,
    published: bool,
}

impl PortPublisher {
    pub fn publish(&mut self, lease: PortLease) -> Result<(), HandoffError> {
        let record = PortRecord {
            leader_pid: std::process::id(),
            lease,
        };

        let staging = self.path.with_extension(format!("{}.tmp", std::process::id()));
        fs::write(&staging, record.encode())?;
        if let Err(e) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        self.published = true;
        info!("published {} to {}", lease, self.path.display());
        Ok(())
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Gives up the publisher but leaves the record in place. Followers accept
    /// it for as long as this process runs; the next leader clears it.
    pub fn keep(mut self) {
        self.published = false;
    }
}

impl Drop for PortPublisher {
    fn drop(&mut self) {
        if !self.published {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("failed to remove mailbox {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(target_os = "linux")]
fn process_is_running(pid: u32) -> bool {
    pid != 0 && Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_is_running(pid: u32) -> bool {
    use std::process::{Command, Stdio};

    pid != 0
        && Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
}

#[cfg(windows)]
fn process_is_running(pid: u32) -> bool {
    use windows_sys::Win32::{
        Foundation::{CloseHandle, ERROR_ACCESS_DENIED, GetLastError, STILL_ACTIVE},
        System::Threading::{GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION},
    };

    // SAFETY: takes no pointers; failure is reported as a null handle.
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
    if handle.is_null() {
        // A process we may not query still exists.
        // SAFETY: reads the calling thread's last-error value.
        return unsafe { GetLastError() } == ERROR_ACCESS_DENIED;
    }

    let mut exit_code = 0u32;
    // SAFETY: `handle` was opened above with query rights and is closed right after.
    let queried = unsafe { GetExitCodeProcess(handle, &mut exit_code) };
    // SAFETY: `handle` is owned here and not used again.
    unsafe { CloseHandle(handle) };

    queried != 0 && exit_code == STILL_ACTIVE as u32
}

#[cfg(not(any(unix, windows)))]
fn process_is_running(_pid: u32) -> bool {
    true
}
