use crate::config::Config;
use crate::coordinator::CoordinatorLink;
use crate::error::{Error, Result};
use crate::handler::MessageHandler;
use crate::liveness::LivenessMonitor;
use crate::peer::{PeerDirectory, PeerRecord, PeerState};
use crate::proto::valid_id;
use crate::sync::Exit;
use crate::udp::UdpChannel;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

struct Shared {
    config: Config,
    directory: PeerDirectory,
    udp: UdpChannel,
    link: OnceLock<CoordinatorLink>,
    id: OnceLock<String>,
    handler: Box<dyn MessageHandler>,
    exit: Exit,
}

impl Shared {
    fn link(&self) -> Result<&CoordinatorLink> {
        if self.exit.is_set() {
            return Err(Error::Closed);
        }
        self.link.get().ok_or(Error::NotRegistered)
    }

    /// Stop every loop and close both sockets. Safe to call any number of
    /// times, from any thread.
    fn stop(&self) {
        if self.exit.set() {
            log::debug!("client {:?} stopping", self.id.get());
        }
        if let Some(link) = self.link.get() {
            link.close();
        }
        self.udp.close();
    }

    fn relay(&self, peer_id: &str, data: &[u8]) {
        match self.link() {
            Ok(link) => {
                if let Err(e) = link.relay_send(peer_id, data) {
                    log::warn!("relay to {} failed: {}", peer_id, e);
                }
            }
            Err(e) => log::warn!("drop {} bytes for {}: {}", data.len(), peer_id, e),
        }
    }
}

fn check_id(id: &str) -> Result<()> {
    if valid_id(id) {
        Ok(())
    } else {
        Err(Error::InvalidId(id.into()))
    }
}

/// Peer client.
///
/// Registers with the coordinator, learns peer endpoints from it, punches
/// udp paths to them and falls back to relaying through the coordinator when
/// a direct path goes quiet.
///
/// # example
/// ```no_run
/// use holepunch::{Client, Config};
///
/// let c = Client::new(Config::new("rndz.example.org"), |peer: &str, data: &[u8]| {
///     println!("{}: {:?}", peer, data);
/// })
/// .unwrap();
/// c.register("alice").unwrap();
/// c.connect_to("bob").unwrap();
/// c.send_to_peer("bob", b"hello");
/// ```
pub struct Client {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Client {
    /// Bind the local udp socket. Nothing is sent until [`Client::register`].
    pub fn new<H: MessageHandler>(config: Config, handler: H) -> Result<Self> {
        let udp = UdpChannel::bind(config.local_udp_addr)?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                directory: Default::default(),
                udp,
                link: OnceLock::new(),
                id: OnceLock::new(),
                handler: Box::new(handler),
                exit: Default::default(),
            }),
            threads: Default::default(),
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.shared.id.get().map(String::as_str)
    }

    pub fn local_udp_addr(&self) -> SocketAddr {
        self.shared.udp.local_addr()
    }

    /// false once shut down, or once the control channel is lost
    pub fn is_running(&self) -> bool {
        !self.shared.exit.is_set()
    }

    pub fn state(&self, peer_id: &str) -> PeerState {
        self.shared.directory.state(peer_id)
    }

    pub fn peer(&self, peer_id: &str) -> Option<PeerRecord> {
        self.shared.directory.get(peer_id)
    }

    /// Connect to the coordinator and register as `id`. Blocks up to the
    /// connect and register timeouts. On success the receive loops and the
    /// liveness monitor start.
    pub fn register(&self, id: &str) -> Result<()> {
        check_id(id)?;
        let shared = &self.shared;
        if shared.exit.is_set() {
            return Err(Error::Closed);
        }
        if shared.link.get().is_some() {
            return Err(Error::AlreadyRegistered);
        }

        let config = &shared.config;
        let link = CoordinatorLink::connect(
            config.coordinator_tcp_addr()?,
            config.connect_timeout,
            config.write_timeout,
        )?;

        if let Err(e) = link.register(id, config.register_timeout) {
            link.close();
            return Err(e);
        }

        if let Err(link) = shared.link.set(link) {
            link.close();
            return Err(Error::AlreadyRegistered);
        }
        let _ = shared.id.set(id.to_string());

        match config.coordinator_udp_addr() {
            Ok(addr) => {
                if let Err(e) = CoordinatorLink::announce_udp(&shared.udp, addr, id) {
                    log::warn!("udp endpoint announce to {} failed: {}", addr, e);
                }
            }
            Err(e) => log::warn!("udp endpoint announce skipped: {}", e),
        }

        if let Err(e) = self.spawn_loops() {
            shared.stop();
            return Err(e.into());
        }

        Ok(())
    }

    fn spawn_loops(&self) -> std::io::Result<()> {
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        let poll_interval = self.shared.config.poll_interval;

        let shared = self.shared.clone();
        threads.push(
            thread::Builder::new()
                .name("holepunch-coordinator".into())
                .spawn(move || {
                    if let Some(link) = shared.link.get() {
                        if let Err(e) = link.run_receiver(
                            &shared.directory,
                            &shared.udp,
                            &*shared.handler,
                            &shared.exit,
                            poll_interval,
                        ) {
                            log::warn!("control channel lost ({}), shutting down", e);
                        }
                    }
                    // nothing works without the control channel
                    shared.stop();
                })?,
        );

        let shared = self.shared.clone();
        threads.push(
            thread::Builder::new()
                .name("holepunch-udp".into())
                .spawn(move || {
                    if let Err(e) = shared.udp.run_receiver(
                        &shared.directory,
                        &*shared.handler,
                        &shared.exit,
                        poll_interval,
                    ) {
                        log::error!("udp receive failed ({}), relaying from now on", e);
                        shared.udp.close();
                    }
                })?,
        );

        let shared = self.shared.clone();
        threads.push(
            thread::Builder::new()
                .name("holepunch-liveness".into())
                .spawn(move || {
                    if let Some(link) = shared.link.get() {
                        LivenessMonitor::new(&shared.config).run(
                            &shared.directory,
                            link,
                            &shared.exit,
                        );
                    }
                })?,
        );

        Ok(())
    }

    /// Ask the coordinator for `peer_id` and wait for its endpoint, polling
    /// the directory up to `connect_attempts` times. Once known, punch toward
    /// it and return it.
    ///
    /// A punch that gets no answer is not an error: the peer may still be
    /// about to punch back, and the liveness monitor moves the peer to the
    /// relay if the path never opens.
    pub fn connect_to(&self, peer_id: &str) -> Result<SocketAddr> {
        let shared = &self.shared;
        let config = &shared.config;
        check_id(peer_id)?;
        let link = shared.link()?;

        shared.directory.mark_requested(peer_id);
        link.request_connect(peer_id)?;

        for _ in 0..config.connect_attempts {
            if let Some(rec) = shared.directory.get(peer_id) {
                if let Some(endpoint) = rec.endpoint {
                    if !rec.relayed {
                        match shared.udp.punch(
                            endpoint,
                            config.punch_duration,
                            config.punch_interval,
                        ) {
                            Ok(()) => log::info!("direct path to {} @ {}", peer_id, endpoint),
                            Err(e) => log::debug!("punch {} @ {}: {}", peer_id, endpoint, e),
                        }
                    }
                    return Ok(endpoint);
                }
            }

            if shared.exit.wait_timeout(config.connect_interval) {
                return Err(Error::Closed);
            }
        }

        log::info!("no endpoint for {} after {} attempts", peer_id, config.connect_attempts);
        Err(Error::PeerUnreachable(peer_id.into()))
    }

    /// Best effort delivery, never fails.
    ///
    /// Relayed peers and peers without a known endpoint go through the
    /// coordinator, everyone else gets a direct datagram. A failed direct
    /// send falls through to the relay.
    pub fn send_to_peer(&self, peer_id: &str, data: &[u8]) {
        let shared = &self.shared;
        if !valid_id(peer_id) {
            log::warn!("drop {} bytes for invalid peer id {:?}", data.len(), peer_id);
            return;
        }

        let rec = shared.directory.get(peer_id).unwrap_or_default();

        if let (false, Some(endpoint)) = (rec.relayed, rec.endpoint) {
            match shared.udp.send(endpoint, data) {
                Ok(()) => {
                    shared.directory.record_tx(peer_id, Instant::now());
                    return;
                }
                Err(e) => log::warn!("udp send to {} failed, relaying: {}", peer_id, e),
            }
        }

        shared.relay(peer_id, data);
    }

    /// Stop all loops and close the control connection and udp socket.
    /// Idempotent. Once it returns the udp port is free, unless called from
    /// the message handler, in which case the port is freed when the calling
    /// receive loop returns.
    pub fn shutdown(&self) {
        self.shared.stop();

        let threads: Vec<_> = self
            .threads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let me = thread::current().id();
        for t in threads {
            if t.thread().id() != me {
                let _ = t.join();
            }
        }
    }
}
