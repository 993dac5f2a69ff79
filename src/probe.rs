//! Best-effort TCP reachability check, run before any authentication is attempted.
//!
//! The result is advisory. It only decides whether the operator is asked to confirm before
//! continuing.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Checks whether a host accepts TCP connections on a port.
pub trait Probe {
    /// Returns `Ok` if a connection could be opened, or the reason it couldn't.
    fn reachable(&self, host: &str, port: u16) -> io::Result<()>;
}

/// The production [Probe]: a plain TCP connect with a timeout.
#[derive(Clone, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        TcpProbe { timeout }
    }
}

impl Probe for TcpProbe {
    fn reachable(&self, host: &str, port: u16) -> io::Result<()> {
        // Dropping the stream closes the connection right away.
        let _stream = open(host, port, self.timeout).map_err(|error| {
            tracing::warn!(host, port, %error, "reachability probe failed");
            error
        })?;
        Ok(())
    }
}

/// Resolves `host` and returns the first address that accepts a connection.
///
/// `timeout` bounds all connection attempts together, not each address. Name resolution uses the
/// system resolver and is not covered by `timeout`.
pub(crate) fn open(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{host} did not resolve to any address"),
        ));
    }
    connect_any(&addrs, timeout)
}

/// Tries `addrs` in order until one connects or `timeout` has passed since the first attempt.
fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut last_error = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match TcpStream::connect_timeout(addr, remaining) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    match last_error {
        Some(e) if Instant::now() < deadline => Err(e),
        _ => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no connection within {timeout:?}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// A local port with nothing listening on it.
    fn closed_port() -> io::Result<SocketAddr> {
        // Bind and release to get a port that's very likely closed.
        TcpListener::bind("127.0.0.1:0")?.local_addr()
    }

    #[test]
    fn listening_port_is_reachable() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        TcpProbe::new(TIMEOUT).reachable("127.0.0.1", port)?;
        Ok(())
    }

    #[test]
    fn closed_port_reports_reason() -> anyhow::Result<()> {
        let port = closed_port()?.port();
        let error = TcpProbe::new(TIMEOUT)
            .reachable("127.0.0.1", port)
            .unwrap_err();
        assert_eq!(io::ErrorKind::ConnectionRefused, error.kind());
        Ok(())
    }

    #[test]
    fn unresolvable_host_is_unreachable() {
        assert!(TcpProbe::new(TIMEOUT)
            .reachable("deploykey.invalid", 22)
            .is_err());
    }

    // Some networks accept every connect, so only the time bound is checked here.
    #[test]
    fn finishes_within_timeout() {
        let timeout = Duration::from_secs(1);
        let started = Instant::now();
        let _ = TcpProbe::new(timeout).reachable("203.0.113.1", 22);
        assert!(started.elapsed() < timeout + Duration::from_secs(2));
    }

    mod connect_any {
        use super::*;

        #[test]
        fn falls_through_to_later_address() -> anyhow::Result<()> {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let addrs = [closed_port()?, listener.local_addr()?];
            connect_any(&addrs, TIMEOUT)?;
            Ok(())
        }

        #[test]
        fn spent_budget_stops_before_connecting() -> anyhow::Result<()> {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let addrs = [listener.local_addr()?; 3];
            let started = Instant::now();
            let error = connect_any(&addrs, Duration::ZERO).unwrap_err();
            assert_eq!(io::ErrorKind::TimedOut, error.kind());
            assert!(started.elapsed() < Duration::from_secs(1));
            Ok(())
        }

        #[test]
        fn refusal_within_budget_keeps_its_reason() -> anyhow::Result<()> {
            let addrs = [closed_port()?, closed_port()?];
            let error = connect_any(&addrs, TIMEOUT).unwrap_err();
            assert_eq!(io::ErrorKind::ConnectionRefused, error.kind());
            Ok(())
        }
    }
}
