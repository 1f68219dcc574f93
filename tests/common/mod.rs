//! In-process coordinator speaking the line protocol, for driving clients in tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, UdpSocket},
    runtime::Runtime,
    select,
    sync::mpsc::{unbounded_channel, UnboundedSender},
};

/// `None` hangs the connection up.
type Outbox = UnboundedSender<Option<String>>;

#[derive(Default)]
struct State {
    peers: HashMap<String, Outbox>,
    endpoints: HashMap<String, SocketAddr>,
    received: Vec<(String, String)>,
    udp_seen: Vec<(String, SocketAddr)>,
    reject: bool,
}

pub struct MockCoordinator {
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    state: Arc<Mutex<State>>,
    _rt: Runtime,
}

impl MockCoordinator {
    pub fn start() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let rt = Runtime::new().unwrap();
        let state: Arc<Mutex<State>> = Default::default();

        let (listener, udp) = rt.block_on(async {
            (
                TcpListener::bind("127.0.0.1:0").await.unwrap(),
                UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            )
        });
        let tcp_addr = listener.local_addr().unwrap();
        let udp_addr = udp.local_addr().unwrap();

        {
            let state = state.clone();
            rt.spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = state.clone();
                    tokio::spawn(async move { handle_conn(stream, state).await });
                }
            });
        }

        {
            let state = state.clone();
            rt.spawn(async move {
                let mut buf = [0u8; 1500];
                while let Ok((n, from)) = udp.recv_from(&mut buf).await {
                    let msg = String::from_utf8_lossy(&buf[..n]);
                    if let Some(id) = msg.strip_prefix("ID: ") {
                        state.lock().unwrap().udp_seen.push((id.to_string(), from));
                    }
                }
            });
        }

        Self {
            tcp_addr,
            udp_addr,
            state,
            _rt: rt,
        }
    }

    pub fn config(&self) -> holepunch::Config {
        let mut config = holepunch::Config::new("127.0.0.1");
        config.coordinator_tcp_port = self.tcp_addr.port();
        config.coordinator_udp_port = self.udp_addr.port();
        config.local_udp_addr = "127.0.0.1:0".parse().unwrap();
        config.poll_interval = Duration::from_millis(20);
        config.register_timeout = Duration::from_secs(2);
        config.connect_timeout = Duration::from_secs(2);
        config
    }

    /// what `CONNECT <id>` gets answered with
    pub fn set_endpoint(&self, id: &str, addr: SocketAddr) {
        self.state.lock().unwrap().endpoints.insert(id.into(), addr);
    }

    pub fn reject_registrations(&self) {
        self.state.lock().unwrap().reject = true;
    }

    /// send a raw line to a registered client
    pub fn push(&self, id: &str, line: &str) {
        let st = self.state.lock().unwrap();
        st.peers[id].send(Some(format!("{}\n", line))).unwrap();
    }

    pub fn disconnect(&self, id: &str) {
        if let Some(p) = self.state.lock().unwrap().peers.remove(id) {
            let _ = p.send(None);
        }
    }

    /// lines received from `id`
    pub fn received(&self, id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .filter(|(from, _)| from == id)
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn count(&self, id: &str, line: &str) -> usize {
        self.received(id).iter().filter(|l| *l == line).count()
    }

    pub fn udp_seen(&self, id: &str) -> Option<SocketAddr> {
        self.state
            .lock()
            .unwrap()
            .udp_seen
            .iter()
            .find(|(seen, _)| seen == id)
            .map(|(_, addr)| *addr)
    }
}

async fn handle_conn(stream: TcpStream, state: Arc<Mutex<State>>) {
    let (r, mut w) = stream.into_split();
    let mut lines = BufReader::new(r).lines();
    let (tx, mut rx) = unbounded_channel();
    let mut id = String::new();

    loop {
        select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&state, &mut id, &tx, &line),
                _ => break,
            },
            out = rx.recv() => match out {
                Some(Some(out)) => {
                    if w.write_all(out.as_bytes()).await.is_err() {
                        break;
                    }
                }
                _ => break,
            },
        }
    }

    log::debug!("mock: {} disconnected", id);
}

fn handle_line(state: &Mutex<State>, id: &mut String, tx: &Outbox, line: &str) {
    let mut st = state.lock().unwrap();
    st.received.push((id.clone(), line.to_string()));

    let mut parts = line.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("REGISTER"), Some(me), _) => {
            if st.reject {
                let _ = tx.send(Some("ERR rejected\n".into()));
                return;
            }
            *id = me.to_string();
            st.peers.insert(me.into(), tx.clone());
            let _ = tx.send(Some(format!("OK registered {}\n", me)));
        }
        (Some("CONNECT"), Some(peer), _) => {
            if let Some(ep) = st.endpoints.get(peer) {
                let _ = tx.send(Some(format!("PEER {} {} {}\n", peer, ep.ip(), ep.port())));
            }
        }
        (Some("RELAY"), Some(peer), payload) => {
            if let Some(p) = st.peers.get(peer) {
                let _ = p.send(Some(format!("RELAY {} {}\n", id, payload.unwrap_or(""))));
            }
        }
        (Some("FALLBACK"), Some(peer), _) => {
            if let Some(p) = st.peers.get(peer) {
                let _ = p.send(Some(format!("FALLBACK {}\n", id)));
            }
        }
        _ => log::debug!("mock: ignore {:?}", line),
    }
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut f: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    f()
}
