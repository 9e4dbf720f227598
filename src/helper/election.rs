//! # Election Module
//!
//! Decides which of several identically launched processes is the leader.
//!
//! The leader is whoever first creates the OS-wide named token; every later
//! process sees the token already held and becomes a follower. The token is
//! only an ownership marker: no process ever blocks waiting on it. It is
//! held by [`InstanceGuard`] and released when the guard is dropped.

use std::fmt;

use log::{debug, info};
use single_instance::SingleInstance;

use crate::error::ElectionError;

/// The part this process plays among the siblings sharing one token. It is
/// fixed when the token is acquired and never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the token; owns the port lease and the web server.
    Leader,
    /// Found the token already held; reads the leader's lease.
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Leader => write!(f, "leader"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

/// Holds the named token for the lifetime of the process.
pub struct InstanceGuard {
    name: String,
    role: Role,
    _token: SingleInstance,
}

impl InstanceGuard {
    /// Creates or opens the token called `name` and fixes this process's role.
    ///
    /// Finding the token already held is the follower outcome, not an error.
    /// Any other failure of the OS primitive is returned as an
    /// [`ElectionError`] instead of being mistaken for leadership.
    pub fn acquire(name: &str) -> Result<Self, ElectionError> {
        let token = SingleInstance::new(name).map_err(|source| ElectionError::Primitive {
            name: name.to_string(),
            source,
        })?;

        let role = if token.is_single() {
            Role::Leader
        } else {
            Role::Follower
        };
        info!("acting as {} for `{}`", role, name);

        Ok(Self {
            name: name.to_string(),
            role,
            _token: token,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

}

impl fmt::Debug for InstanceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("name", &self.name)
            .field("role", &self.role)
            .finish()
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        debug!("releasing instance token `{}` ({})", self.name, self.role);
    }
}
