//! # Listener Table Module
//!
//! Answers "is anything listening on this TCP port right now?" by asking the OS
//! for its table of live listeners rather than by binding the port ourselves.
//!
//! - On Windows the table comes from `GetExtendedTcpTable` (IPv4 and IPv6).
//! - On Linux it is read from `/proc/net/tcp` and `/proc/net/tcp6`.
//! - Elsewhere a loopback bind probe stands in for the table.

use std::collections::HashSet;

use crate::error::ListenerTableError;

/// A source of truth for which local TCP ports have a listener.
pub trait ListenerTable {
    fn is_listening(&self, port: u16) -> Result<bool, ListenerTableError>;
}

/// A fixed snapshot of listening ports.
impl ListenerTable for HashSet<u16> {
    fn is_listening(&self, port: u16) -> Result<bool, ListenerTableError> {
        Ok(self.contains(&port))
    }
}

/// The live listener table of the running OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemListenerTable;

impl ListenerTable for SystemListenerTable {
    #[cfg(any(windows, target_os = "linux"))]
    fn is_listening(&self, port: u16) -> Result<bool, ListenerTableError> {
        Ok(listening_ports()?.contains(&port))
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    fn is_listening(&self, port: u16) -> Result<bool, ListenerTableError> {
        use std::net::{Ipv4Addr, TcpListener};

        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
            Ok(_) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(target_os = "linux")]
fn listening_ports() -> Result<HashSet<u16>, ListenerTableError> {
    let mut ports = HashSet::new();
    for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            // tcp6 is absent when IPv6 is disabled
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        ports.extend(parse_proc_net_tcp(&content)?);
    }
    Ok(ports)
}

/// Socket state `TCP_LISTEN` as printed by the kernel.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const PROC_STATE_LISTEN: &str = "0A";

/// Extracts the local ports of all listening sockets from a
/// `/proc/net/tcp`-formatted table.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_net_tcp(content: &str) -> Result<Vec<u16>, ListenerTableError> {
    let mut ports = Vec::new();

    // first line is the column header
    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }

        let (Some(local_address), Some(state)) = (fields.get(1), fields.get(3)) else {
            return Err(ListenerTableError::Malformed(line.to_string()));
        };
        if *state != PROC_STATE_LISTEN {
            continue;
        }

        let port = local_address
            .rsplit_once(':')
            .and_then(|(_, port)| u16::from_str_radix(port, 16).ok())
            .ok_or_else(|| ListenerTableError::Malformed(line.to_string()))?;
        ports.push(port);
    }

    Ok(ports)
}

#[cfg(windows)]
fn listening_ports() -> Result<HashSet<u16>, ListenerTableError> {
    use windows_sys::Win32::Networking::WinSock::{AF_INET, AF_INET6};

    let mut ports = HashSet::new();
    ports.extend(win32::listener_ports(AF_INET as u32)?);
    ports.extend(win32::listener_ports(AF_INET6 as u32)?);
    Ok(ports)
}

#[cfg(windows)]
mod win32 {
    use std::ptr::{addr_of, null_mut};

    use windows_sys::Win32::{
        Foundation::{ERROR_INSUFFICIENT_BUFFER, NO_ERROR},
        NetworkManagement::IpHelper::{
            GetExtendedTcpTable, MIB_TCP6ROW_OWNER_PID, MIB_TCP6TABLE_OWNER_PID,
            MIB_TCPROW_OWNER_PID, MIB_TCPTABLE_OWNER_PID, TCP_TABLE_OWNER_PID_LISTENER,
        },
        Networking::WinSock::AF_INET,
    };

    use crate::error::Win32Error;

    /// Returns the local ports of every listener row for one address family.
    pub(super) fn listener_ports(family: u32) -> Result<Vec<u16>, Win32Error> {
        let buffer = retrieve_table(family)?;

        // SAFETY: `buffer` holds a table of the family we asked for, written by
        //  GetExtendedTcpTable, and is u32-aligned like the table structs.
        let ports = unsafe {
            if family == AF_INET as u32 {
                let table = buffer.as_ptr() as *const MIB_TCPTABLE_OWNER_PID;
                let rows = std::slice::from_raw_parts(
                    addr_of!((*table).table).cast::<MIB_TCPROW_OWNER_PID>(),
                    (*table).dwNumEntries as usize,
                );
                rows.iter().map(|row| local_port(row.dwLocalPort)).collect()
            } else {
                let table = buffer.as_ptr() as *const MIB_TCP6TABLE_OWNER_PID;
                let rows = std::slice::from_raw_parts(
                    addr_of!((*table).table).cast::<MIB_TCP6ROW_OWNER_PID>(),
                    (*table).dwNumEntries as usize,
                );
                rows.iter().map(|row| local_port(row.dwLocalPort)).collect()
            }
        };

        Ok(ports)
    }

    fn retrieve_table(family: u32) -> Result<Vec<u32>, Win32Error> {
        let mut required_size: u32 = 0;

        // First call to get the required size
        // SAFETY: a null table with a size out-pointer is the documented size query.
        let call_result = unsafe {
            GetExtendedTcpTable(
                null_mut(),
                &mut required_size as *mut u32,
                0,
                family,
                TCP_TABLE_OWNER_PID_LISTENER,
                0,
            )
        };
        if call_result != ERROR_INSUFFICIENT_BUFFER && call_result != NO_ERROR {
            return Err(call_result.into());
        }

        // The table can grow between calls, so retry until it fits.
        loop {
            let mut buffer: Vec<u32> = vec![0; (required_size as usize).div_ceil(4).max(1)];
            let mut buffer_size = (buffer.len() * 4) as u32;

            // SAFETY: `buffer` is writable for `buffer_size` bytes.
            let call_result = unsafe {
                GetExtendedTcpTable(
                    buffer.as_mut_ptr().cast(),
                    &mut buffer_size as *mut u32,
                    0,
                    family,
                    TCP_TABLE_OWNER_PID_LISTENER,
                    0,
                )
            };

            match call_result {
                NO_ERROR => return Ok(buffer),
                ERROR_INSUFFICIENT_BUFFER => required_size = buffer_size,
                code => return Err(code.into()),
            }
        }
    }

    /// The port sits in the low 16 bits, in network byte order.
    fn local_port(raw: u32) -> u16 {
        u16::from_be(raw as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_NET_TCP: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:13BA 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 41337 1 0000000000000000 100 0 0 10 0
   1: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 20810 1 0000000000000000 100 0 0 10 0
   2: 0100007F:13BB 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 41338 1 0000000000000000 20 4 30 10 -1
";

    #[test]
    fn only_listening_rows_are_reported() {
        let ports = parse_proc_net_tcp(PROC_NET_TCP).unwrap();
        assert_eq!(ports, vec![5050, 22]);
    }

    #[test]
    fn ipv6_rows_parse() {
        let content = "\
  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000001000000:13BC 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 51234 1 0000000000000000 100 0 0 10 0
";
        assert_eq!(parse_proc_net_tcp(content).unwrap(), vec![5052]);
    }

    #[test]
    fn truncated_row_is_malformed() {
        let content = "header\n   0: 0100007F:13BA\n";
        assert!(matches!(
            parse_proc_net_tcp(content),
            Err(ListenerTableError::Malformed(_))
        ));
    }

    #[test]
    fn snapshot_table_answers_from_its_set() {
        let table: HashSet<u16> = [5050, 5051].into_iter().collect();
        assert!(table.is_listening(5050).unwrap());
        assert!(!table.is_listening(5052).unwrap());
    }

    #[test]
    fn system_table_sees_a_bound_listener() {
        let listener = std::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(SystemListenerTable.is_listening(port).unwrap());
    }
}
