//! Direct peer to peer datagrams.
//!
//! A datagram is either the [`PUNCH`] sentinel or one application payload,
//! nothing else is framed on the wire.

use crate::handler::{deliver, MessageHandler};
use crate::peer::PeerDirectory;
use crate::poll;
use crate::proto::PUNCH;
use crate::sync::Exit;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const MAX_DATAGRAM: usize = 65536;

/// One non blocking udp socket, shared by the punch logic, the send path and
/// the receive loop.
pub struct UdpChannel {
    socket: Mutex<Option<Arc<UdpSocket>>>,
    local_addr: SocketAddr,
    /// sentinels seen per known endpoint
    punched: (Mutex<HashMap<SocketAddr, u64>>, Condvar),
}

impl UdpChannel {
    pub fn bind(local_addr: SocketAddr) -> Result<Self> {
        let sk = Socket::new(
            Domain::for_address(local_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        sk.set_reuse_address(true)?;
        sk.bind(&local_addr.into())?;
        sk.set_nonblocking(true)?;

        let socket: UdpSocket = sk.into();
        let local_addr = socket.local_addr()?;
        log::debug!("udp bound {}", local_addr);

        Ok(Self {
            socket: Mutex::new(Some(Arc::new(socket))),
            local_addr,
            punched: Default::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::from(ErrorKind::NotConnected))
    }

    fn punched(&self) -> MutexGuard<'_, HashMap<SocketAddr, u64>> {
        self.punched.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Best effort `sendto`. An error means the caller should try another path.
    pub fn send(&self, endpoint: SocketAddr, payload: &[u8]) -> Result<()> {
        let n = self.socket()?.send_to(payload, endpoint)?;
        if n != payload.len() {
            return Err(Error::new(ErrorKind::WriteZero, "short datagram write"));
        }
        Ok(())
    }

    /// fire a single punch sentinel at `endpoint`
    pub fn probe(&self, endpoint: SocketAddr) -> Result<()> {
        self.send(endpoint, PUNCH)
    }

    /// Keep probing `endpoint` every `interval` until a sentinel comes back
    /// from it, or `duration` runs out.
    ///
    /// Needs the receive loop running and `endpoint` known to the directory,
    /// sentinels from anywhere else are not counted. Only sentinels arriving
    /// after the call starts count, and concurrent punches do not take each
    /// other's answers.
    pub fn punch(
        &self,
        endpoint: SocketAddr,
        duration: Duration,
        interval: Duration,
    ) -> Result<()> {
        let seen = |punched: &HashMap<SocketAddr, u64>| {
            punched.get(&endpoint).copied().unwrap_or(0)
        };
        let start = seen(&*self.punched());

        let deadline = Instant::now() + duration;
        let mut probes = 0;
        loop {
            match self.probe(endpoint) {
                Ok(()) => probes += 1,
                Err(e) if self.is_closed() => return Err(e),
                Err(e) => log::debug!("punch probe {} failed: {}", endpoint, e),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            let (guard, _) = self
                .punched
                .1
                .wait_timeout_while(self.punched(), interval.min(deadline - now), |p| {
                    seen(p) <= start
                })
                .unwrap_or_else(PoisonError::into_inner);
            if seen(&*guard) > start {
                log::debug!("punch {} answered after {} probes", endpoint, probes);
                return Ok(());
            }
        }

        log::debug!("punch {} timed out after {} probes", endpoint, probes);
        Err(Error::new(ErrorKind::TimedOut, "punch timed out"))
    }

    /// Stop accepting sends, end the receive loop and close the socket. The
    /// descriptor is released as soon as a running receive loop lets go of
    /// it. Only the first call returns true.
    pub fn close(&self) -> bool {
        let first = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if first {
            log::debug!("udp {} closed", self.local_addr);
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Handle one received datagram. Sentinels only feed liveness and a
    /// waiting [`UdpChannel::punch`]; payloads from endpoints the directory
    /// does not know are dropped.
    pub(crate) fn dispatch(
        &self,
        data: &[u8],
        from: SocketAddr,
        directory: &PeerDirectory,
        handler: &dyn MessageHandler,
    ) {
        let peer_id = directory.record_rx_from(from, Instant::now());

        if data == PUNCH {
            log::trace!("punch from {} ({:?})", from, peer_id);
            if peer_id.is_some() {
                *self.punched().entry(from).or_default() += 1;
                self.punched.1.notify_all();
            }
            return;
        }

        match peer_id {
            Some(id) => deliver(handler, &id, data),
            None => log::trace!("drop {} bytes from unknown {}", data.len(), from),
        }
    }

    /// Receive until `exit` is set or the channel is closed. Returns an error
    /// only when the socket itself fails.
    pub fn run_receiver(
        &self,
        directory: &PeerDirectory,
        handler: &dyn MessageHandler,
        exit: &Exit,
        poll_interval: Duration,
    ) -> Result<()> {
        let socket = match self.socket() {
            Ok(socket) => socket,
            Err(_) => return Ok(()),
        };
        let mut buf = vec![0u8; MAX_DATAGRAM];

        while !exit.is_set() && !self.is_closed() {
            if !poll::readable(&*socket, poll_interval)? {
                continue;
            }

            loop {
                match socket.recv_from(&mut buf) {
                    Ok((n, from)) => self.dispatch(&buf[..n], from, directory, handler),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                        ) =>
                    {
                        // icmp unreachable from an earlier send
                        log::trace!("udp recv: {}", e);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }
}
