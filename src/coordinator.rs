//! Control channel to the rendezvous coordinator.

use crate::error::{Error, Result};
use crate::handler::{deliver, MessageHandler};
use crate::peer::PeerDirectory;
use crate::poll;
use crate::proto::{LineBuffer, Request, Response};
use crate::sync::Exit;
use crate::udp::UdpChannel;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown::Both, SocketAddr, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Inbound {
    stream: TcpStream,
    lines: LineBuffer,
}

impl Inbound {
    /// Next line, waiting at most `timeout`. `Ok(None)` on timeout.
    /// Channel closure is reported as `UnexpectedEof`.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 4096];

        loop {
            if let Some(line) = self.lines.next_line() {
                return Ok(Some(line));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            if !poll::readable(&self.stream, deadline - now)? {
                continue;
            }

            match self.stream.read(&mut buf) {
                Ok(0) => return Err(io::Error::from(ErrorKind::UnexpectedEof)),
                Ok(n) => self.lines.extend(&buf[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// The client's one connection to the coordinator.
///
/// Writes may come from any thread. Reads belong to [`CoordinatorLink::register`]
/// until the receive loop takes them over.
pub struct CoordinatorLink {
    server_addr: SocketAddr,
    writer: Mutex<Option<TcpStream>>,
    inbound: Mutex<Option<Inbound>>,
}

impl CoordinatorLink {
    /// Open the control connection, giving up after `timeout`.
    pub fn connect(
        server_addr: SocketAddr,
        timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self> {
        let sk = Socket::new(
            Domain::for_address(server_addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;

        sk.connect_timeout(&server_addr.into(), timeout)
            .map_err(|e| match e.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => Error::ConnectTimeout(timeout),
                _ => Error::ConnectFailure(e),
            })?;

        let stream: TcpStream = sk.into();
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(write_timeout))?;
        let reader = stream.try_clone()?;

        log::debug!("connected coordinator {}", server_addr);

        Ok(Self {
            server_addr,
            writer: Mutex::new(Some(stream)),
            inbound: Mutex::new(Some(Inbound {
                stream: reader,
                lines: Default::default(),
            })),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    fn writer(&self) -> MutexGuard<'_, Option<TcpStream>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write one request line. A failed write may leave part of the line on
    /// the stream, so it closes the connection: the receive loop then sees
    /// the channel lost and later sends fail with `NotConnected`.
    fn send(&self, req: &Request) -> io::Result<()> {
        let mut writer = self.writer();
        let w = writer
            .as_mut()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;
        log::trace!("-> {:?}", req);

        if let Err(e) = w.write_all(req.to_line().as_bytes()) {
            log::warn!("coordinator {} write failed, closing: {}", self.server_addr, e);
            if let Some(s) = writer.take() {
                let _ = s.shutdown(Both);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Register as `id` and wait up to `timeout` for the acknowledgment.
    /// Returns whatever followed `OK` on the reply line.
    pub fn register(&self, id: &str, timeout: Duration) -> Result<String> {
        self.send(&Request::Register(id.into()))
            .map_err(|e| Error::RegistrationFailure(Some(e.to_string())))?;

        let mut inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        let inbound = inbound.as_mut().ok_or(Error::Closed)?;

        let line = match inbound.read_line(timeout) {
            Ok(line) => line,
            Err(e) => {
                log::debug!("register {}: {}", id, e);
                None
            }
        };

        match line.as_deref().map(|l| (l, Response::parse(l))) {
            Some((_, Some(Response::Ok(info)))) => {
                log::info!("registered as {}", id);
                Ok(info)
            }
            Some((l, _)) => Err(Error::RegistrationFailure(Some(l.to_string()))),
            None => Err(Error::RegistrationFailure(None)),
        }
    }

    /// Ask the coordinator for `peer_id`'s endpoint. The answer, if any,
    /// arrives later as a `PEER` announcement.
    pub fn request_connect(&self, peer_id: &str) -> io::Result<()> {
        self.send(&Request::Connect(peer_id.into()))
    }

    pub fn request_fallback(&self, peer_id: &str) -> io::Result<()> {
        self.send(&Request::Fallback(peer_id.into()))
    }

    /// Relay `payload` through the coordinator. Lossy for anything but
    /// single line UTF-8 text.
    pub fn relay_send(&self, peer_id: &str, payload: &[u8]) -> io::Result<()> {
        self.send(&Request::relay(peer_id, payload))
    }

    /// Let the coordinator observe our public udp endpoint.
    pub fn announce_udp(udp: &UdpChannel, udp_server_addr: SocketAddr, id: &str) -> io::Result<()> {
        udp.send(udp_server_addr, format!("ID: {}", id).as_bytes())
    }

    /// Shut the connection down. Only the first call returns true.
    pub fn close(&self) -> bool {
        match self.writer().take() {
            Some(s) => {
                let _ = s.shutdown(Both);
                log::debug!("coordinator {} closed", self.server_addr);
                true
            }
            None => false,
        }
    }

    /// Process coordinator messages until `exit` is set (`Ok`) or the channel
    /// is lost (`Err`).
    pub fn run_receiver(
        &self,
        directory: &PeerDirectory,
        udp: &UdpChannel,
        handler: &dyn MessageHandler,
        exit: &Exit,
        poll_interval: Duration,
    ) -> io::Result<()> {
        let mut inbound = self
            .inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;

        while !exit.is_set() {
            match inbound.read_line(poll_interval) {
                Ok(Some(line)) => self.handle_line(&line, directory, udp, handler),
                Ok(None) => {}
                Err(e) if exit.is_set() => {
                    log::trace!("coordinator read after exit: {}", e);
                    break;
                }
                Err(e) => {
                    log::warn!("coordinator {} lost: {}", self.server_addr, e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    fn handle_line(
        &self,
        line: &str,
        directory: &PeerDirectory,
        udp: &UdpChannel,
        handler: &dyn MessageHandler,
    ) {
        match Response::parse(line) {
            Some(Response::Peer(id, endpoint)) => {
                let prev = directory.upsert_endpoint(&id, endpoint);
                log::info!("peer {} @ {}", id, endpoint);

                let requested = directory.get(&id).map_or(false, |r| r.requested);
                if !requested && prev != Some(endpoint) {
                    // the other side is connecting to us, open our nat for its probes
                    if let Err(e) = udp.probe(endpoint) {
                        log::debug!("answer probe {} failed: {}", endpoint, e);
                    }
                }
            }
            Some(Response::Relay(id, payload)) => {
                directory.record_rx(&id, Instant::now());
                deliver(handler, &id, payload.as_bytes());
            }
            Some(Response::Fallback(id)) => {
                if directory.mark_relayed(&id) {
                    log::info!("coordinator moved {} to relay", id);
                }
            }
            Some(Response::Ok(info)) => log::trace!("ok {}", info),
            None => log::debug!("ignore control line {:?}", line),
        }
    }
}
