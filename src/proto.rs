//! Coordinator control protocol.
//!
//! One message per line, newline terminated, space separated tokens:
//!
//! ```text
//! client -> server          server -> client
//! REGISTER <id>             OK ...
//! CONNECT <peer_id>         PEER <peer_id> <ip> <port>
//! RELAY <peer_id> <payload> RELAY <peer_id> <payload>
//! FALLBACK <peer_id>        FALLBACK <peer_id>
//! ```
//!
//! The relay payload is the remainder of the line and is text. Bytes that are
//! not valid UTF-8 are replaced with U+FFFD, and line breaks with spaces, so the
//! relay path is not byte preserving.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

/// Datagram both peers fire at each other to open their NAT mappings.
/// Never delivered as payload.
pub const PUNCH: &[u8] = b"HOLE_PUNCH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register(String),
    Connect(String),
    Relay(String, String),
    Fallback(String),
}

impl Request {
    /// encode as one newline terminated line
    pub fn to_line(&self) -> String {
        match self {
            Request::Register(id) => format!("REGISTER {}\n", id),
            Request::Connect(id) => format!("CONNECT {}\n", id),
            Request::Relay(id, payload) => format!("RELAY {} {}\n", id, payload),
            Request::Fallback(id) => format!("FALLBACK {}\n", id),
        }
    }

    /// build a relay request, lossily turning `payload` into single line text
    pub fn relay(peer_id: &str, payload: &[u8]) -> Self {
        Request::Relay(peer_id.into(), relay_text(payload).into_owned())
    }
}

/// Whether `id` can travel as one token of a control line.
pub fn valid_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(char::is_whitespace)
}

/// Text form of a relayed payload.
pub fn relay_text(payload: &[u8]) -> Cow<'_, str> {
    let text = String::from_utf8_lossy(payload);
    if text.contains(['\r', '\n']) {
        Cow::Owned(text.replace(['\r', '\n'], " "))
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// acknowledgment, the rest of the line is informational
    Ok(String),
    Peer(String, SocketAddr),
    Relay(String, String),
    Fallback(String),
}

impl Response {
    /// Parse one line without its terminator. Unknown verbs and malformed
    /// lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, rest),
            None => (line, ""),
        };

        match verb {
            "OK" => Some(Response::Ok(rest.into())),
            "PEER" => {
                let mut tokens = rest.split_whitespace();
                let id = tokens.next()?;
                let ip: IpAddr = tokens.next()?.parse().ok()?;
                let port: u16 = tokens.next()?.parse().ok()?;
                Some(Response::Peer(id.into(), SocketAddr::new(ip, port)))
            }
            "RELAY" => {
                let (id, payload) = rest.split_once(' ')?;
                if id.is_empty() {
                    return None;
                }
                Some(Response::Relay(id.into(), payload.into()))
            }
            "FALLBACK" => {
                let id = rest.split_whitespace().next()?;
                Some(Response::Fallback(id.into()))
            }
            _ => None,
        }
    }
}

/// Reassembles lines from a byte stream that may split them anywhere.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete, non blank line, decoded lossily.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..pos]);
            let line = line.trim_end_matches('\r');
            if !line.trim().is_empty() {
                return Some(line.to_string());
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
