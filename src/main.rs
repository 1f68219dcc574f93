use holepunch::{Client, Config};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "holepunch")]
struct Opt {
    #[structopt(long = "id")]
    id: String,

    #[structopt(long = "server-host")]
    server_host: String,

    #[structopt(long = "tcp-port", default_value = "9999")]
    tcp_port: u16,

    #[structopt(long = "udp-port", default_value = "9998")]
    udp_port: u16,

    #[structopt(long = "local-addr", default_value = "0.0.0.0:0")]
    local_addr: SocketAddr,

    /// connect to this peer right after registering
    #[structopt(long = "remote-peer")]
    remote_peer: Option<String>,

    /// seconds of unanswered sending before falling back to relay
    #[structopt(long = "silence", default_value = "10")]
    silence: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut config = Config::new(&opt.server_host);
    config.coordinator_tcp_port = opt.tcp_port;
    config.coordinator_udp_port = opt.udp_port;
    config.local_udp_addr = opt.local_addr;
    config.silence_threshold = Duration::from_secs(opt.silence);

    let client = Client::new(config, |peer: &str, data: &[u8]| {
        match std::str::from_utf8(data) {
            Ok(msg) => println!("\n[{}] {}", peer, msg),
            Err(_) => println!("\n[{}] <binary: {} bytes>", peer, data.len()),
        }
    })?;

    client.register(&opt.id)?;
    println!("registered as {} (udp {})", opt.id, client.local_udp_addr());

    if let Some(peer) = opt.remote_peer {
        connect(&client, &peer);
    }

    println!("commands: connect <peer> | send <peer> <msg> | quit");
    repl(&client)?;

    println!("shutting down");
    client.shutdown();
    Ok(())
}

fn connect(client: &Client, peer: &str) {
    match client.connect_to(peer) {
        Ok(addr) => println!("{} @ {}", peer, addr),
        Err(e) => println!("connect failed: {}", e),
    }
}

fn repl(client: &Client) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        if !client.is_running() {
            println!("coordinator connection lost");
            return Ok(());
        }

        print!("> ");
        io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => return Ok(()),
        };

        let mut parts = line.trim().splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(""), _, _) => {}
            (Some("quit"), _, _) => return Ok(()),
            (Some("connect"), Some(peer), _) => connect(client, peer),
            (Some("send"), Some(peer), Some(msg)) => client.send_to_peer(peer, msg.as_bytes()),
            (Some("state"), Some(peer), _) => println!("{:?}", client.state(peer)),
            _ => println!("invalid command"),
        }
    }
}
