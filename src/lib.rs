//!A peer client for direct messaging between two hosts that are both behind NAT.
//!
//!Neither peer can learn the other's public address on its own, and neither NAT
//!lets unsolicited traffic in. A publicly reachable coordinator solves the first
//!problem, hole punching the second.
//!
//!## How it works
//!Each peer keeps a tcp control connection to the coordinator and registers a
//!unique identity on it. Right after, it sends one udp datagram to the
//!coordinator from its udp socket, so the coordinator can observe the public
//!endpoint its NAT assigned.
//!
//!To reach a peer, the client sends `CONNECT <peer>` and the coordinator pushes
//!back `PEER <peer> <ip> <port>`. Both sides then fire punch sentinels at each
//!other. Whichever packet leaves first opens a mapping on its own NAT that the
//!other side's packets can come through.
//!
//!From then on payloads travel as plain datagrams. If the client keeps sending
//!to a peer and hears nothing back, the liveness monitor asks the coordinator to
//!relay for that peer, and payloads travel over the control connection instead.
//!The relay path is text: payloads are converted to UTF-8 lossily.
//!
//!There is no ordering between the two paths, and nothing is encrypted.
//!
//!## Threads
//!A registered client runs three threads: the control channel reader, the udp
//!reader and the liveness monitor. The message handler is called from the two
//!readers with no lock held.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod liveness;
pub mod peer;
mod poll;
pub mod proto;
mod sync;
pub mod udp;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use handler::MessageHandler;
pub use peer::{PeerRecord, PeerState};
pub use sync::Exit;
