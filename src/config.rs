use std::io::{Error, ErrorKind::Other, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Client configuration.
///
/// Every instance of [`crate::Client`] is built from its own `Config`, so
/// several clients can live in one process.
#[derive(Debug, Clone)]
pub struct Config {
    /// coordinator host name or ip
    pub coordinator_host: String,
    /// coordinator control (tcp) port
    pub coordinator_tcp_port: u16,
    /// coordinator port observing our public udp endpoint
    pub coordinator_udp_port: u16,
    /// local udp bind address, port 0 picks an ephemeral port
    pub local_udp_addr: SocketAddr,

    pub connect_timeout: Duration,
    pub register_timeout: Duration,
    /// bound on a single control channel write, e.g. a relay send
    pub write_timeout: Duration,

    /// number of directory polls `connect_to` makes before giving up
    pub connect_attempts: u32,
    pub connect_interval: Duration,

    pub punch_duration: Duration,
    pub punch_interval: Duration,

    pub liveness_interval: Duration,
    /// how long since the last direct send before an unanswered peer is given up on
    pub silence_threshold: Duration,
    /// how far the last send must lead the last receive to count as unanswered
    pub grace_window: Duration,

    /// receive loops observe shutdown at this granularity
    pub poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator_host: "127.0.0.1".into(),
            coordinator_tcp_port: 9999,
            coordinator_udp_port: 9998,
            local_udp_addr: ([0, 0, 0, 0], 0).into(),
            connect_timeout: Duration::from_secs(5),
            register_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(2),
            connect_attempts: 30,
            connect_interval: Duration::from_millis(500),
            punch_duration: Duration::from_secs(1),
            punch_interval: Duration::from_millis(120),
            liveness_interval: Duration::from_secs(5),
            silence_threshold: Duration::from_secs(10),
            grace_window: Duration::from_secs(3),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Config {
    pub fn new<A: AsRef<str>>(coordinator_host: A) -> Self {
        Self {
            coordinator_host: coordinator_host.as_ref().into(),
            ..Default::default()
        }
    }

    pub fn coordinator_tcp_addr(&self) -> Result<SocketAddr> {
        Self::resolve(&self.coordinator_host, self.coordinator_tcp_port)
    }

    pub fn coordinator_udp_addr(&self) -> Result<SocketAddr> {
        Self::resolve(&self.coordinator_host, self.coordinator_udp_port)
    }

    fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
        (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::new(Other, "coordinator name resolve fail"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = Config::default();
        assert_eq!(c.connect_attempts, 30);
        assert_eq!(c.connect_interval, Duration::from_millis(500));
        assert_eq!(c.liveness_interval, Duration::from_secs(5));
        assert_eq!(c.silence_threshold, Duration::from_secs(10));
        assert_eq!(c.coordinator_tcp_port, 9999);
        assert_eq!(c.coordinator_udp_port, 9998);
    }

    #[test]
    fn test_resolve() {
        let mut c = Config::new("127.0.0.1");
        c.coordinator_tcp_port = 4000;
        c.coordinator_udp_port = 4001;
        assert_eq!(
            c.coordinator_tcp_addr().unwrap(),
            "127.0.0.1:4000".parse().unwrap()
        );
        assert_eq!(
            c.coordinator_udp_addr().unwrap(),
            "127.0.0.1:4001".parse().unwrap()
        );
    }
}
