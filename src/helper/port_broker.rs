//! # Port Broker Module
//!
//! Picks the port the web server is hosted on and waits for the server to come up.
//!
//! The scan is advisory: a port is chosen because the OS listener table shows
//! nobody listening on it, nothing is reserved. The readiness barrier polls the
//! same table until the chosen port shows up, with a bounded backoff.

use std::{fmt, net::IpAddr, ops::Range};

use log::{debug, info};

use crate::{
    error::{BrokerError, HandoffError},
    helper::{listener_table::ListenerTable, retry::RetryPolicy},
};

/// The port the leader hosts the web server on, or the fact that none was free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortLease {
    Bound(u16),
    Unavailable,
}

impl PortLease {
    /// Wire value of [`PortLease::Unavailable`].
    pub const SENTINEL: i32 = -1;

    /// The 4-byte signed value stored in the mailbox.
    pub fn to_raw(self) -> i32 {
        match self {
            PortLease::Bound(port) => i32::from(port),
            PortLease::Unavailable => Self::SENTINEL,
        }
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.to_raw().to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Result<Self, HandoffError> {
        Self::try_from(i32::from_le_bytes(bytes))
    }

    pub fn port(self) -> Option<u16> {
        match self {
            PortLease::Bound(port) => Some(port),
            PortLease::Unavailable => None,
        }
    }

    /// The endpoint a bound lease is served on; `None` for the sentinel.
    ///
    /// ```rust
    /// use std::net::{IpAddr, Ipv4Addr};
    /// use blazor_host::helper::port_broker::PortLease;
    ///
    /// let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    /// let endpoint = PortLease::Bound(5051).endpoint("https", localhost).unwrap();
    /// assert_eq!(endpoint.to_string(), "https://127.0.0.1:5051");
    /// assert!(PortLease::Unavailable.endpoint("https", localhost).is_none());
    /// ```
    pub fn endpoint(self, scheme: &str, host: IpAddr) -> Option<Endpoint> {
        self.port().map(|port| Endpoint {
            scheme: scheme.to_string(),
            host,
            port,
        })
    }
}

impl TryFrom<i32> for PortLease {
    type Error = HandoffError;

    /// Anything other than a nonzero `u16` or the sentinel is rejected.
    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        if raw == Self::SENTINEL {
            return Ok(PortLease::Unavailable);
        }
        match u16::try_from(raw) {
            Ok(port) if port != 0 => Ok(PortLease::Bound(port)),
            _ => Err(HandoffError::InvalidLease(raw)),
        }
    }
}

impl fmt::Display for PortLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortLease::Bound(port) => write!(f, "port {}", port),
            PortLease::Unavailable => write!(f, "no port"),
        }
    }
}

/// Where the web server is reachable, e.g. `https://127.0.0.1:5050`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub host: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            IpAddr::V4(host) => write!(f, "{}://{}:{}", self.scheme, host, self.port),
            IpAddr::V6(host) => write!(f, "{}://[{}]:{}", self.scheme, host, self.port),
        }
    }
}

/// Returns the lowest port in `range` with no live listener.
///
/// Every port being taken is an expected outcome, reported as
/// [`PortLease::Unavailable`].
pub fn find_available_port(
    table: &dyn ListenerTable,
    range: Range<u16>,
) -> Result<PortLease, BrokerError> {
    for port in range.clone() {
        if !table.is_listening(port)? {
            debug!("port {} is free", port);
            return Ok(PortLease::Bound(port));
        }
    }

    info!("every port in {:?} has a listener", range);
    Ok(PortLease::Unavailable)
}

/// Blocks until `port` appears in the listener table.
///
/// Fails with [`BrokerError::ReadinessTimeout`] once the policy's timeout
/// elapses without the port listening.
pub fn wait_until_listening(
    table: &dyn ListenerTable,
    port: u16,
    policy: &RetryPolicy,
) -> Result<(), BrokerError> {
    let ready = policy.poll(|| -> Result<Option<()>, BrokerError> {
        Ok(table.is_listening(port)?.then_some(()))
    })?;

    match ready {
        Some(()) => {
            info!("web server is listening on port {}", port);
            Ok(())
        }
        None => Err(BrokerError::ReadinessTimeout {
            port,
            waited: policy.timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::HashSet, time::Duration};

    use super::*;
    use crate::error::ListenerTableError;

    fn occupied(ports: &[u16]) -> HashSet<u16> {
        ports.iter().copied().collect()
    }

    #[test]
    fn lowest_free_port_wins() {
        let table = occupied(&[5050, 5051, 5053]);
        assert_eq!(
            find_available_port(&table, 5050..6000).unwrap(),
            PortLease::Bound(5052)
        );
    }

    #[test]
    fn empty_table_picks_range_start() {
        let table = occupied(&[]);
        assert_eq!(
            find_available_port(&table, 5050..6000).unwrap(),
            PortLease::Bound(5050)
        );
    }

    #[test]
    fn second_port_when_first_is_taken() {
        let table = occupied(&[5050]);
        assert_eq!(
            find_available_port(&table, 5050..5052).unwrap(),
            PortLease::Bound(5051)
        );
    }

    #[test]
    fn exhausted_range_is_not_an_error() {
        let table = occupied(&[5050]);
        assert_eq!(
            find_available_port(&table, 5050..5051).unwrap(),
            PortLease::Unavailable
        );

        let everything: HashSet<u16> = (5050..6000).collect();
        assert_eq!(
            find_available_port(&everything, 5050..6000).unwrap(),
            PortLease::Unavailable
        );
    }

    #[test]
    fn empty_range_is_unavailable() {
        let table = occupied(&[]);
        assert_eq!(
            find_available_port(&table, 5050..5050).unwrap(),
            PortLease::Unavailable
        );
    }

    #[test]
    fn sentinel_maps_to_unavailable() {
        assert_eq!(PortLease::try_from(-1).unwrap(), PortLease::Unavailable);
        assert_eq!(PortLease::Unavailable.to_raw(), -1);
        assert_eq!(
            PortLease::from_le_bytes((-1i32).to_le_bytes()).unwrap(),
            PortLease::Unavailable
        );
    }

    #[test]
    fn zeroed_or_out_of_range_values_are_rejected() {
        assert!(matches!(
            PortLease::try_from(0),
            Err(HandoffError::InvalidLease(0))
        ));
        assert!(matches!(
            PortLease::try_from(70_000),
            Err(HandoffError::InvalidLease(70_000))
        ));
        assert!(PortLease::try_from(-2).is_err());
    }

    #[test]
    fn sentinel_has_no_endpoint() {
        let host = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
        assert_eq!(PortLease::Unavailable.endpoint("https", host), None);
    }

    #[test]
    fn ipv6_endpoint_is_bracketed() {
        let host = IpAddr::V6(std::net::Ipv6Addr::LOCALHOST);
        let endpoint = PortLease::Bound(5050).endpoint("http", host).unwrap();
        assert_eq!(endpoint.to_string(), "http://[::1]:5050");
    }

    /// Starts listening after a given number of probes.
    struct SlowServer {
        port: u16,
        probes_until_ready: Cell<u32>,
    }

    impl ListenerTable for SlowServer {
        fn is_listening(&self, port: u16) -> Result<bool, ListenerTableError> {
            let left = self.probes_until_ready.get();
            if left > 0 {
                self.probes_until_ready.set(left - 1);
                return Ok(false);
            }
            Ok(port == self.port)
        }
    }

    fn policy(timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(1),
            Duration::from_millis(2),
        )
    }

    #[test]
    fn readiness_waits_for_the_listener() {
        let server = SlowServer {
            port: 5050,
            probes_until_ready: Cell::new(5),
        };

        wait_until_listening(&server, 5050, &policy(5_000)).unwrap();
        assert_eq!(server.probes_until_ready.get(), 0);
    }

    #[test]
    fn readiness_times_out() {
        let table = occupied(&[]);
        let result = wait_until_listening(&table, 5050, &policy(20));

        assert!(matches!(
            result,
            Err(BrokerError::ReadinessTimeout { port: 5050, .. })
        ));
    }

    #[test]
    fn table_errors_propagate() {
        struct Broken;
        impl ListenerTable for Broken {
            fn is_listening(&self, _port: u16) -> Result<bool, ListenerTableError> {
                Err(ListenerTableError::Malformed("garbage".to_string()))
            }
        }

        assert!(matches!(
            find_available_port(&Broken, 5050..5060),
            Err(BrokerError::ListenerTable(_))
        ));
    }
}
