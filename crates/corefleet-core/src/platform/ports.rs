//! Host TCP listener table.

use std::collections::HashSet;
use std::io;

/// TCP state code for LISTEN in `/proc/net/tcp`.
const TCP_LISTEN_STATE: &str = "0A";

/// Ports with a socket in LISTEN state on this host (IPv4 and IPv6).
///
/// # Platform Behavior
/// - **Linux**: parses `/proc/net/tcp` and `/proc/net/tcp6`
/// - **Other**: returns `ErrorKind::Unsupported`; callers fall back to a bind probe
pub fn active_tcp_listeners() -> io::Result<HashSet<u16>> {
    #[cfg(target_os = "linux")]
    {
        let mut ports = HashSet::new();
        let mut read_any = false;

        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            match std::fs::read_to_string(table) {
                Ok(contents) => {
                    read_any = true;
                    ports.extend(parse_proc_net_tcp(&contents));
                }
                // tcp6 is absent when IPv6 is disabled.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        if read_any {
            Ok(ports)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no /proc/net/tcp tables available",
            ))
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "listener table not available on this platform",
        ))
    }
}

/// Extract listening ports from the text of `/proc/net/tcp` or `/proc/net/tcp6`.
///
/// Each data row is `sl local_address rem_address st ...` with the local
/// address as `HEXIP:HEXPORT`.
pub fn parse_proc_net_tcp(contents: &str) -> Vec<u16> {
    contents
        .lines()
        .skip(1) // header
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let local = fields.nth(1)?;
            let state = fields.nth(1)?;
            if state != TCP_LISTEN_STATE {
                return None;
            }
            let (_, port_hex) = local.rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}
